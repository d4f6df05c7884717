use std::error::Error;
use std::fmt;

/// Failures raised by tree construction, lookup, reshaping and comparison.
///
/// Carried inside `anyhow::Error`; use `err.downcast_ref::<TreeError>()` to inspect the kind.
#[derive(Debug, Clone, PartialEq)]
pub enum TreeError {
    /// Conflicting or missing construction arguments.
    Construction(String),
    /// A name-based lookup found no matching node.
    Lookup(String),
    /// The operation is invalid for the current shape of the tree.
    Topology(String),
    /// Two trees cannot be compared, e.g. they share no tip names.
    Comparison(String),
}

impl fmt::Display for TreeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TreeError::Construction(message) => write!(f, "Construction error: {message}"),
            TreeError::Lookup(message) => write!(f, "Lookup error: {message}"),
            TreeError::Topology(message) => write!(f, "Topology error: {message}"),
            TreeError::Comparison(message) => write!(f, "Comparison error: {message}"),
        }
    }
}

impl Error for TreeError {}
