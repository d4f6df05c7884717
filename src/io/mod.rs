use std::error::Error;
use std::fmt;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::bail;
use log::info;

use crate::tree::{tree_parser, xml_parser, Params, Tree, TreeBuilder, TreeError};
use crate::Result;

pub(crate) struct DataError {
    pub(crate) message: String,
}
impl fmt::Debug for DataError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}
impl fmt::Display for DataError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}
impl Error for DataError {}

/// Text formats a tree can be read from and written to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TreeFormat {
    Newick,
    Xml,
}

impl FromStr for TreeFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "newick" | "nwk" => Ok(TreeFormat::Newick),
            "xml" => Ok(TreeFormat::Xml),
            _ => bail!(DataError {
                message: format!("Unknown tree format: {s}")
            }),
        }
    }
}

impl fmt::Display for TreeFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TreeFormat::Newick => write!(f, "newick"),
            TreeFormat::Xml => write!(f, "xml"),
        }
    }
}

impl TreeFormat {
    fn from_path(path: &Path) -> TreeFormat {
        let is_xml = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("xml"));
        if is_xml {
            TreeFormat::Xml
        } else {
            TreeFormat::Newick
        }
    }

    fn from_text(text: &str) -> TreeFormat {
        if text.trim_start().starts_with('<') {
            TreeFormat::Xml
        } else {
            TreeFormat::Newick
        }
    }
}

/// Builds a [`Tree`] from exactly one of a file, a tree string or a list of tip names.
pub struct TreeLoader {
    filename: Option<PathBuf>,
    tree_string: Option<String>,
    tip_names: Option<Vec<String>>,
    format: Option<TreeFormat>,
    underscore_unmunge: bool,
}

impl Default for TreeLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl TreeLoader {
    /// Creates a loader with no tree source set.
    ///
    /// # Example
    /// ```
    /// use phylotree::io::TreeLoader;
    /// let tree = TreeLoader::new().tree_string("((A,B),C);").build().unwrap();
    /// assert_eq!(tree.tip_names(tree.root()), vec!["A", "B", "C"]);
    /// ```
    pub fn new() -> TreeLoader {
        TreeLoader {
            filename: None,
            tree_string: None,
            tip_names: None,
            format: None,
            underscore_unmunge: false,
        }
    }

    /// Reads the tree from a file. The format follows the `.xml` extension unless set.
    pub fn filename(mut self, path: impl Into<PathBuf>) -> TreeLoader {
        self.filename = Some(path.into());
        self
    }

    /// Reads the tree from a string. Text starting with `<` is read as XML unless a format is set.
    pub fn tree_string(mut self, tree_string: impl Into<String>) -> TreeLoader {
        self.tree_string = Some(tree_string.into());
        self
    }

    /// Builds a star tree: the named tips directly below a root called `root`.
    ///
    /// # Example
    /// ```
    /// use phylotree::io::TreeLoader;
    /// let tree = TreeLoader::new().tip_names(["A", "B", "C"]).build().unwrap();
    /// assert_eq!(tree.newick(false), "(A,B,C)root;");
    /// ```
    pub fn tip_names<S: Into<String>>(mut self, tip_names: impl IntoIterator<Item = S>) -> TreeLoader {
        self.tip_names = Some(tip_names.into_iter().map(Into::into).collect());
        self
    }

    pub fn format(mut self, format: Option<TreeFormat>) -> TreeLoader {
        self.format = format;
        self
    }

    /// Reads underscores in unquoted Newick labels as spaces.
    pub fn underscore_unmunge(mut self, underscore_unmunge: bool) -> TreeLoader {
        self.underscore_unmunge = underscore_unmunge;
        self
    }

    /// Loads the tree. Bails unless exactly one source was given, or if the text is malformed.
    /// A root without a label in the text is named `root`.
    pub fn build(self) -> Result<Tree> {
        let sources = [
            self.filename.is_some(),
            self.tree_string.is_some(),
            self.tip_names.is_some(),
        ];
        match sources.iter().filter(|&&given| given).count() {
            0 => bail!(TreeError::Construction(
                "Filename, tree string or tip names must be specified".to_string()
            )),
            1 => {}
            _ => bail!(TreeError::Construction(
                "Only one of filename, tree string or tip names can be specified".to_string()
            )),
        }

        if let Some(tip_names) = self.tip_names {
            return star_tree(&tip_names);
        }
        let (text, format) = match (self.filename, self.tree_string) {
            (Some(path), _) => {
                info!("Reading tree from file {}", path.display());
                let text = fs::read_to_string(&path)?;
                info!("Read file successfully");
                let format = self.format.unwrap_or_else(|| TreeFormat::from_path(&path));
                (text, format)
            }
            (None, Some(text)) => {
                let format = self.format.unwrap_or_else(|| TreeFormat::from_text(&text));
                (text, format)
            }
            (None, None) => unreachable!(),
        };
        let mut tree = match format {
            TreeFormat::Xml => xml_parser::from_xml(&text)?,
            TreeFormat::Newick => tree_parser::from_newick(&text, self.underscore_unmunge)?,
        };
        let root = tree.root();
        if !tree.node(root).name_loaded {
            tree.node_mut(root).name = Some("root".to_string());
        }
        Ok(tree)
    }
}

fn star_tree(tip_names: &[String]) -> Result<Tree> {
    if tip_names.is_empty() {
        bail!(TreeError::Construction(
            "Cannot build a tree from an empty list of tip names".to_string()
        ));
    }
    let mut builder = TreeBuilder::new();
    let tips = tip_names
        .iter()
        .map(|name| builder.create_edge(Vec::new(), Some(name), Params::new(), true))
        .collect();
    let root = builder.create_edge(tips, Some("root"), Params::new(), true);
    Ok(builder.build(root))
}

/// Loads a tree from a Newick or XML string.
///
/// # Example
/// ```
/// use phylotree::io::load_tree_from_string;
/// let tree = load_tree_from_string("((A:1.0,B:2.0):3.0,C:4.0);").unwrap();
/// assert_eq!(tree.node(tree.root()).name_str(), "root");
/// ```
pub fn load_tree_from_string(tree_string: &str) -> Result<Tree> {
    TreeLoader::new().tree_string(tree_string).build()
}

/// Reads a tree from a file, picking XML for `.xml` files and Newick otherwise.
///
/// # Arguments
/// * `path` - Path to the tree file.
pub fn read_tree_from_file(path: &Path) -> Result<Tree> {
    TreeLoader::new().filename(path).build()
}

/// Writes a tree to the given file path, replacing any existing file.
///
/// XML is written if `format` says so or, without a format, if the file name ends in `xml`.
/// XML always carries all parameters; `with_distances` only applies to Newick.
///
/// # Arguments
/// * `tree` - Tree to write.
/// * `path` - Path to the output file.
/// * `with_distances` - Whether Newick output includes branch lengths.
/// * `format` - Explicit output format, overriding the file name.
///
/// # Example
/// ```
/// # use std::fs::{read_to_string, remove_file};
/// use std::path::PathBuf;
///
/// use phylotree::io::{load_tree_from_string, write_tree_to_file};
///
/// let output_path = PathBuf::from("./doctest_tmp_output.newick");
/// let tree = load_tree_from_string("((A:1.0,B:2.0)x:1.0,C:4.0);").unwrap();
/// write_tree_to_file(&tree, &output_path, true, None).unwrap();
/// # assert_eq!(read_to_string(&output_path).unwrap(), "((A:1.0,B:2.0)x:1.0,C:4.0);");
/// # assert!(remove_file(output_path).is_ok());
/// ```
pub fn write_tree_to_file(
    tree: &Tree,
    path: &Path,
    with_distances: bool,
    format: Option<TreeFormat>,
) -> Result<()> {
    info!("Writing tree to file {}", path.display());
    let is_xml = match format {
        Some(format) => format == TreeFormat::Xml,
        None => path.to_string_lossy().to_lowercase().ends_with("xml"),
    };
    let data = if is_xml {
        tree.xml()
    } else {
        tree.newick(with_distances)
    };
    let mut writer = File::create(path)?;
    writer.write_all(data.as_bytes())?;
    info!("Finished writing successfully");
    Ok(())
}
