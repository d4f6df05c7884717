use std::collections::BTreeMap;
use std::fmt::{self, Debug, Display};

use crate::tree::NodeIdx;

/// Reserved parameter key under which branch lengths are exchanged with parsers and writers.
pub const LENGTH_KEY: &str = "length";

/// Generic per-node parameter table; the branch length is kept out of it in [`Node::length`].
pub type Params = BTreeMap<String, Param>;

/// A single node parameter value.
#[derive(Debug, Clone, PartialEq)]
pub enum Param {
    Float(f64),
    Text(String),
}

impl Param {
    /// Reads a value from text, preferring a float when the text parses as one.
    pub fn parse(value: &str) -> Param {
        match value.trim().parse::<f64>() {
            Ok(number) => Param::Float(number),
            Err(_) => Param::Text(value.to_string()),
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Param::Float(value) => Some(*value),
            Param::Text(_) => None,
        }
    }
}

/// Shortest round-trip text for a float that always reads back as a float: integral values keep
/// a `.0` and magnitudes outside `1e-4..1e16` use a signed two-digit exponent (`1.0`, `0.25`,
/// `1e-05`, `2.5e+16`).
pub(crate) fn format_float(value: f64) -> String {
    if !value.is_finite() {
        return value.to_string();
    }
    let exponent = if value == 0.0 {
        0
    } else {
        value.abs().log10().floor() as i32
    };
    if (-4..16).contains(&exponent) {
        let text = value.to_string();
        if text.contains('.') {
            text
        } else {
            format!("{text}.0")
        }
    } else {
        let text = format!("{value:e}");
        match text.split_once('e') {
            Some((mantissa, exp)) => {
                let (sign, digits) = match exp.strip_prefix('-') {
                    Some(digits) => ('-', digits),
                    None => ('+', exp),
                };
                format!("{mantissa}e{sign}{digits:0>2}")
            }
            None => text,
        }
    }
}

impl Display for Param {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Param::Float(value) => write!(f, "{}", format_float(*value)),
            Param::Text(value) => write!(f, "{value}"),
        }
    }
}

impl From<f64> for Param {
    fn from(value: f64) -> Self {
        Param::Float(value)
    }
}

impl From<&str> for Param {
    fn from(value: &str) -> Self {
        Param::Text(value.to_string())
    }
}

impl From<String> for Param {
    fn from(value: String) -> Self {
        Param::Text(value)
    }
}

/// A node of a [`Tree`](crate::tree::Tree), standing both for itself and for the edge to its parent.
///
/// Parent and child links are owned by the tree and only change through its structural edits.
#[derive(Clone)]
pub struct Node {
    pub(crate) idx: NodeIdx,
    pub name: Option<String>,
    /// Whether the name was supplied explicitly rather than synthesised.
    pub name_loaded: bool,
    pub(crate) parent: Option<NodeIdx>,
    pub(crate) children: Vec<NodeIdx>,
    pub length: Option<f64>,
    pub params: Params,
}

impl Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) => write!(f, "{} with name {}", self.idx, name),
            None => write!(f, "{}", self.idx),
        }
    }
}

impl Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let length = self
            .length
            .map(|l| l.to_string())
            .unwrap_or_else(|| "-".to_string());
        match &self.name {
            Some(name) => writeln!(
                f,
                "({}) {:?}:{}, parent: {:?}, children: {:?}",
                name, self.idx, length, self.parent, self.children,
            ),
            None => writeln!(
                f,
                "{:?}:{}, parent: {:?}, children: {:?}",
                self.idx, length, self.parent, self.children,
            ),
        }
    }
}

impl Node {
    pub(crate) fn new(idx: NodeIdx, name: Option<String>, name_loaded: bool) -> Self {
        Self {
            idx,
            name,
            name_loaded,
            parent: None,
            children: Vec::new(),
            length: None,
            params: Params::new(),
        }
    }

    /// Copies every attribute except the parent and children links.
    pub(crate) fn detached_copy(&self, idx: NodeIdx) -> Self {
        Self {
            idx,
            name: self.name.clone(),
            name_loaded: self.name_loaded,
            parent: None,
            children: Vec::new(),
            length: self.length,
            params: self.params.clone(),
        }
    }

    /// Copies only the label.
    pub(crate) fn topology_copy(&self, idx: NodeIdx) -> Self {
        Self::new(idx, self.name.clone(), true)
    }

    pub fn idx(&self) -> NodeIdx {
        self.idx
    }

    pub fn parent(&self) -> Option<NodeIdx> {
        self.parent
    }

    pub fn children(&self) -> &[NodeIdx] {
        &self.children
    }

    pub fn is_tip(&self) -> bool {
        self.children.is_empty()
    }

    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }

    /// Name of the node, or an empty string for nameless nodes.
    pub fn name_str(&self) -> &str {
        self.name.as_deref().unwrap_or_default()
    }

    pub(crate) fn has_name(&self, name: &str) -> bool {
        self.name.as_deref() == Some(name)
    }

    /// The parameter table with the branch length folded back in under [`LENGTH_KEY`].
    pub fn params_with_length(&self) -> Params {
        let mut params = self.params.clone();
        if let Some(length) = self.length {
            params.insert(LENGTH_KEY.to_string(), Param::Float(length));
        }
        params
    }

    /// Replaces all parameters, moving a [`LENGTH_KEY`] entry into the typed length.
    pub(crate) fn set_params_with_length(&mut self, mut params: Params) {
        self.length = params.remove(LENGTH_KEY).and_then(|value| match value {
            Param::Float(length) => Some(length),
            Param::Text(text) => text.trim().parse::<f64>().ok(),
        });
        self.params = params;
    }
}

#[cfg(test)]
#[cfg_attr(coverage, coverage(off))]
mod tests {
    use rstest::rstest;

    use crate::tree::tree_node::{format_float, Param};

    #[rstest]
    #[case::integral(1.0, "1.0")]
    #[case::negative_integral(-2.0, "-2.0")]
    #[case::zero(0.0, "0.0")]
    #[case::fraction(0.25, "0.25")]
    #[case::smallest_plain(0.0001, "0.0001")]
    #[case::small(1e-5, "1e-05")]
    #[case::large(2.5e16, "2.5e+16")]
    #[case::plain_large(123456.5, "123456.5")]
    fn float_text(#[case] value: f64, #[case] expected: &str) {
        assert_eq!(format_float(value), expected);
        assert_eq!(expected.parse::<f64>().unwrap(), value);
    }

    #[test]
    fn params_render_floats_with_a_decimal_point() {
        assert_eq!(Param::Float(3.0).to_string(), "3.0");
        assert_eq!(Param::Text("fast".to_string()).to_string(), "fast");
        assert_eq!(Param::parse("3.0"), Param::Float(3.0));
    }
}
