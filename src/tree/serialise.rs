use std::fmt::Write;

use crate::tree::tree_node::format_float;
use crate::tree::{NodeIdx, Params, Tree};

const ART_WIDTH: usize = 10;
const QUOTE_TRIGGERS: &[char] = &['[', ']', '\'', '"', '(', ')', ',', ':', ';', '_'];

fn escape_name(name: &str) -> String {
    if name.contains(QUOTE_TRIGGERS) {
        format!("'{}'", name.replace('\'', "''"))
    } else {
        name.replace(' ', "_")
    }
}

impl Tree {
    /// Newick string for the whole tree, terminated by `;`.
    pub fn newick(&self, with_distances: bool) -> String {
        self.to_newick(self.root(), with_distances, true)
    }

    /// Newick string for the subtree at `idx`.
    ///
    /// Only names flagged as loaded are written. Names containing Newick punctuation or `_` are
    /// single-quoted with inner quotes doubled, otherwise spaces become underscores.
    ///
    /// # Example
    /// ```
    /// use phylotree::tree;
    /// let tree = tree!("((A:1.0,B:2.0)x:3.0,'C c':4.0);");
    /// assert_eq!(tree.newick(true), "((A:1.0,B:2.0)x:3.0,C_c:4.0);");
    /// assert_eq!(tree.to_newick(tree.root(), false, false), "((A,B)x,C_c)");
    /// ```
    pub fn to_newick(&self, idx: NodeIdx, with_distances: bool, semicolon: bool) -> String {
        let mut newick = String::new();
        let mut stack = vec![(idx, 0)];
        while let Some(&(curr, child_pos)) = stack.last() {
            let children = self.children(curr);
            if child_pos == 0 && !children.is_empty() {
                newick.push('(');
            }
            match children.get(child_pos) {
                Some(&child) => {
                    if child_pos > 0 {
                        newick.push(',');
                    }
                    if let Some(top) = stack.last_mut() {
                        top.1 += 1;
                    }
                    stack.push((child, 0));
                }
                None => {
                    if !children.is_empty() {
                        newick.push(')');
                    }
                    self.push_newick_label(&mut newick, curr, with_distances);
                    stack.pop();
                }
            }
        }
        if semicolon {
            newick.push(';');
        }
        newick
    }

    fn push_newick_label(&self, newick: &mut String, idx: NodeIdx, with_distances: bool) {
        let node = self.node(idx);
        if node.name_loaded {
            newick.push_str(&escape_name(node.name_str()));
        }
        if let (true, Some(length)) = (with_distances, node.length) {
            let _ = write!(newick, ":{}", format_float(length));
        }
    }

    /// XML rendering of the whole tree with an XML declaration header.
    pub fn xml(&self) -> String {
        self.to_xml(self.root())
    }

    /// XML rendering of the subtree at `idx`.
    ///
    /// A parameter is only written where its value differs from the one inherited from the
    /// closest ancestor that wrote it. The branch length is written as the `length` parameter.
    pub fn to_xml(&self, idx: NodeIdx) -> String {
        let mut lines = vec![r#"<?xml version="1.0"?>"#.to_string()];
        self.xml_lines(idx, 0, &Params::new(), &mut lines);
        lines.join("\n")
    }

    fn xml_lines(&self, idx: NodeIdx, indent: usize, inherited: &Params, lines: &mut Vec<String>) {
        let node = self.node(idx);
        let pad = "  ".repeat(indent);
        lines.push(format!("{pad}<clade>"));
        if node.name_loaded {
            lines.push(format!("{pad}   <name>{}</name>", node.name_str()));
        }
        let mut params = inherited.clone();
        for (key, value) in node.params_with_length() {
            if params.get(&key) == Some(&value) {
                continue;
            }
            lines.push(format!(
                "{pad}   <param><name>{key}</name><value>{value}</value></param>"
            ));
            params.insert(key, value);
        }
        for &child in self.children(idx) {
            self.xml_lines(child, indent + 1, &params, lines);
        }
        lines.push(format!("{pad}</clade>"));
    }

    /// Text drawing of the tree, one tip per line (plus spacer lines unless `compact`).
    ///
    /// ```text
    ///           /-A
    /// -root----|
    ///           \-B
    /// ```
    pub fn ascii_art(&self, show_internal: bool, compact: bool) -> String {
        let (lines, _) = self.ascii_lines(self.root(), '-', show_internal, compact);
        lines.join("\n")
    }

    fn ascii_lines(
        &self,
        idx: NodeIdx,
        branch: char,
        show_internal: bool,
        compact: bool,
    ) -> (Vec<String>, usize) {
        let name = self.node(idx).name_str();
        let children = self.children(idx);
        if children.is_empty() {
            return (vec![format!("{branch}-{name}")], 0);
        }

        let mut mids = Vec::with_capacity(children.len());
        let mut lines: Vec<String> = Vec::new();
        for (i, &child) in children.iter().enumerate() {
            let child_branch = if i == 0 {
                '/'
            } else if i == children.len() - 1 {
                '\\'
            } else {
                '-'
            };
            let (child_lines, mid) = self.ascii_lines(child, child_branch, show_internal, compact);
            mids.push(mid + lines.len());
            lines.extend(child_lines);
            if !compact {
                lines.push(String::new());
            }
        }
        if !compact {
            lines.pop();
        }

        let (lo, hi, end) = (mids[0], mids[mids.len() - 1], lines.len());
        let blank = " ".repeat(ART_WIDTH);
        let bar = format!("{}|", " ".repeat(ART_WIDTH - 1));
        let mut prefixes = vec![blank.clone(); lo + 1];
        prefixes.extend(std::iter::repeat(bar).take(hi.saturating_sub(lo + 1)));
        prefixes.extend(std::iter::repeat(blank).take(end - hi));

        let mid = (lo + hi) / 2;
        let last = prefixes[mid].chars().last().unwrap_or(' ');
        prefixes[mid] = format!("{branch}{}{last}", "-".repeat(ART_WIDTH - 2));

        let mut lines: Vec<String> = prefixes
            .into_iter()
            .zip(lines)
            .map(|(prefix, line)| prefix + &line)
            .collect();
        if show_internal {
            let stem: Vec<char> = lines[mid].chars().collect();
            let name_len = name.chars().count();
            let rest: String = stem.iter().skip(name_len + 1).collect();
            lines[mid] = format!("{}{name}{rest}", stem[0]);
        }
        (lines, mid)
    }
}
