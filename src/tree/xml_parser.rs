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

use crate::tree::{NodeIdx, Param, Params, Tree, TreeBuilder, TreeError};
use crate::Result;

#[derive(Parser)]
#[grammar = "./tree/xml.pest"]
pub struct XmlParser;

#[derive(Debug)]
pub struct XmlParsingError(pub(crate) Box<PestError<Rule>>);

impl fmt::Display for XmlParsingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Malformed tree xml")?;
        write!(f, "{}", self.0)
    }
}

impl Error for XmlParsingError {}

/// Parses the nested `<clade>` format written by [`Tree::xml`].
///
/// Each clade inherits the parameters of its ancestors and overrides those it lists itself; a
/// `length` parameter sets the branch length.
pub fn from_xml(xml: &str) -> Result<Tree> {
    if xml.trim().is_empty() {
        bail!(TreeError::Construction("Empty tree xml".to_string()));
    }
    info!("Parsing xml tree.");
    let mut pairs = match XmlParser::parse(Rule::xml, xml) {
        Ok(pairs) => pairs,
        Err(e) => bail!(XmlParsingError(Box::new(e))),
    };
    let clade_rule = pairs
        .next()
        .and_then(|xml_rule| {
            xml_rule
                .into_inner()
                .find(|pair| pair.as_rule() == Rule::clade)
        })
        .ok_or_else(|| anyhow!("Malformed tree xml, no clade found"))?;

    let mut builder = TreeBuilder::new();
    let root = build_clades(&mut builder, clade_rule)?;
    let tree = builder.build(root);
    info!("Finished parsing xml tree with {} nodes.", tree.node_count());
    Ok(tree)
}

struct PendingClade<'i> {
    inner: Pairs<'i, Rule>,
    children: Vec<NodeIdx>,
    name: Option<String>,
    params: Params,
}

impl<'i> PendingClade<'i> {
    fn new(pair: Pair<'i, Rule>, inherited: Params) -> Self {
        PendingClade {
            inner: pair.into_inner(),
            children: Vec::new(),
            name: None,
            params: inherited,
        }
    }
}

/// Walks nested clades with an explicit stack. A clade's own params precede its child clades,
/// so each child starts from the complete params of its parent.
fn build_clades(builder: &mut TreeBuilder, pair: Pair<Rule>) -> Result<NodeIdx> {
    let mut stack = vec![PendingClade::new(pair, Params::new())];
    while let Some(pending) = stack.last_mut() {
        if let Some(inner) = pending.inner.next() {
            match inner.as_rule() {
                Rule::name => pending.name = Some(inner_text(inner)),
                Rule::param => {
                    let mut parts = inner.into_inner();
                    let key = parts.next().map(inner_text).unwrap_or_default();
                    let value = parts.next().map(inner_text).unwrap_or_default();
                    pending.params.insert(key, Param::parse(&value));
                }
                Rule::clade => {
                    let inherited = pending.params.clone();
                    stack.push(PendingClade::new(inner, inherited));
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
    bail!("Malformed tree xml, unterminated clade")
}

fn inner_text(pair: Pair<Rule>) -> String {
    pair.into_inner()
        .next()
        .map(|text| text.as_str().trim().to_string())
        .unwrap_or_default()
}

#[cfg(test)]
#[cfg_attr(coverage, coverage(off))]
mod tests {
    use assert_matches::assert_matches;

    use crate::tree::xml_parser::{from_xml, XmlParsingError};
    use crate::tree::{tree_parser::from_newick, Param};

    #[test]
    fn xml_with_header_and_params() {
        let xml = r#"<?xml version="1.0"?>
<clade>
   <param><name>rate</name><value>0.5</value></param>
  <clade>
     <name>A</name>
     <param><name>length</name><value>1</value></param>
  </clade>
  <clade>
     <name>B</name>
     <param><name>rate</name><value>fast</value></param>
  </clade>
</clade>"#;
        let tree = from_xml(xml).unwrap();
        let root = tree.root();
        let (a, b) = (tree.children(root)[0], tree.children(root)[1]);
        assert!(!tree.node(root).name_loaded);
        assert_eq!(tree.node(a).name_str(), "A");
        assert_eq!(tree.length(a), Some(1.0));
        assert_eq!(tree.length(b), None);
        assert_eq!(tree.node(a).params["rate"], Param::Float(0.5));
        assert_eq!(tree.node(b).params["rate"], Param::Text("fast".to_string()));
    }

    #[test]
    fn xml_round_trip_keeps_lengths_and_names() {
        let tree = from_newick("((A:1.0,B:1.0)x:2.0,C:3.0);", false).unwrap();
        let xml = tree.xml();
        let reloaded = from_xml(&xml).unwrap();
        assert_eq!(reloaded.newick(true), tree.newick(true));
        assert_eq!(reloaded.xml(), xml);
    }

    #[test]
    fn deeply_nested_xml() {
        let depth = 2_000;
        let xml = format!(
            "{}<clade><name>A</name></clade>{}",
            "<clade>".repeat(depth),
            "</clade>".repeat(depth)
        );
        let tree = from_xml(&xml).unwrap();
        assert_eq!(tree.node_count(), depth + 1);
        assert_eq!(tree.tip_names(tree.root()), vec!["A"]);
    }

    #[test]
    fn malformed_xml() {
        let error = from_xml("<clade><name>A</name>").unwrap_err();
        assert_matches!(error.downcast_ref::<XmlParsingError>(), Some(_));
    }
}
