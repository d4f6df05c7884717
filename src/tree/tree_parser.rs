use std::error::Error;
use std::fmt;

use anyhow::{anyhow, bail};
use log::info;
use pest::{
    error::Error as PestError,
    iterators::{Pair, Pairs},
    Parser,
};
use pest_derive::Parser;

use crate::tree::{NodeIdx, Param, Params, Tree, TreeBuilder, TreeError, LENGTH_KEY};
use crate::Result;

#[derive(Parser)]
#[grammar = "./tree/newick.pest"]
pub struct NewickParser;

#[derive(Debug)]
pub struct ParsingError(pub(crate) Box<PestError<Rule>>);

impl fmt::Display for ParsingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Malformed newick string")?;
        write!(f, "{}", self.0)
    }
}

impl Error for ParsingError {}

/// Parses a single Newick tree, building it bottom-up through a [`TreeBuilder`].
///
/// Nodes without a label in the text get synthesised names and are flagged as not loaded, so
/// they are written back without a label. With `underscore_unmunge` underscores in unquoted
/// labels are read as spaces.
///
/// # Example
/// ```
/// use phylotree::tree::tree_parser::from_newick;
/// let tree = from_newick("((A:1.0,B:2.0):3.0,C:4.0);", false).unwrap();
/// assert_eq!(tree.tip_names(tree.root()), vec!["A", "B", "C"]);
/// assert_eq!(tree.newick(true), "((A:1.0,B:2.0):3.0,C:4.0);");
/// ```
pub fn from_newick(newick: &str, underscore_unmunge: bool) -> Result<Tree> {
    if newick.trim().is_empty() {
        bail!(TreeError::Construction("Empty newick string".to_string()));
    }
    info!("Parsing newick tree.");
    let mut pairs = match NewickParser::parse(Rule::newick, newick) {
        Ok(pairs) => pairs,
        Err(e) => bail!(ParsingError(Box::new(e))),
    };
    let edge_rule = pairs
        .next()
        .and_then(|newick_rule| {
            newick_rule
                .into_inner()
                .find(|pair| matches!(pair.as_rule(), Rule::internal | Rule::leaf))
        })
        .ok_or_else(|| anyhow!("Malformed newick string, no tree found"))?;

    let mut builder = TreeBuilder::new();
    let root = build_edges(&mut builder, edge_rule, underscore_unmunge)?;
    let tree = builder.build(root);
    info!(
        "Finished parsing newick tree with {} nodes.",
        tree.node_count()
    );
    Ok(tree)
}

struct PendingEdge<'i> {
    inner: Pairs<'i, Rule>,
    children: Vec<NodeIdx>,
    name: Option<String>,
    params: Params,
}

impl<'i> PendingEdge<'i> {
    fn new(pair: Pair<'i, Rule>) -> Self {
        PendingEdge {
            inner: pair.into_inner(),
            children: Vec::new(),
            name: None,
            params: Params::new(),
        }
    }
}

/// Creates the edges bottom-up with an explicit stack, children before their parent in
/// left-to-right order, so nesting depth is bounded by memory rather than the call stack.
fn build_edges(builder: &mut TreeBuilder, pair: Pair<Rule>, underscore_unmunge: bool) -> Result<NodeIdx> {
    let mut stack = vec![PendingEdge::new(pair)];
    while let Some(pending) = stack.last_mut() {
        if let Some(inner) = pending.inner.next() {
            match inner.as_rule() {
                Rule::internal | Rule::leaf => stack.push(PendingEdge::new(inner)),
                Rule::label => pending.name = Some(parse_label(inner, underscore_unmunge)),
                Rule::branch_length => {
                    pending.params.insert(
                        LENGTH_KEY.to_string(),
                        Param::Float(parse_branch_length(inner)?),
                    );
                }
                _ => unreachable!(),
            }
            continue;
        }
        let Some(finished) = stack.pop() else {
            break;
        };
        let name_loaded = finished.name.is_some();
        let idx = builder.create_edge(
            finished.children,
            finished.name.as_deref(),
            finished.params,
            name_loaded,
        );
        match stack.last_mut() {
            Some(parent) => parent.children.push(idx),
            None => return Ok(idx),
        }
    }
    bail!("Malformed newick string, unterminated edge")
}

fn parse_label(rule: Pair<Rule>, underscore_unmunge: bool) -> String {
    let label = rule.as_str().trim();
    match label.strip_prefix('\'').and_then(|l| l.strip_suffix('\'')) {
        Some(quoted) => quoted.replace("''", "'"),
        None if underscore_unmunge => label.replace('_', " "),
        None => label.to_string(),
    }
}

fn parse_branch_length(rule: Pair<Rule>) -> Result<f64> {
    let text = rule.as_str().trim();
    text.parse::<f64>()
        .map_err(|e| anyhow!("Invalid branch length '{}': {}", text, e))
}
