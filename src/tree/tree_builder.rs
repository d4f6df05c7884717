use hashbrown::HashMap;

use crate::tree::{Node, NodeIdx, Params, Tree};

const ANONYMOUS_NAME: &str = "edge";

/// Bottom-up node factory used by the parsers and by tree-to-tree transforms.
///
/// Children must be created before their parents. Every node receives a name that is unique
/// within this builder: nameless nodes become `edge.0`, `edge.1`, ..., and repeated names get a
/// numeric suffix (`mouse`, `mouse.2`, `mouse.3`, ...).
///
/// # Example
/// ```
/// use phylotree::tree::{Params, TreeBuilder};
/// let mut builder = TreeBuilder::new();
/// let a = builder.create_edge(Vec::new(), Some("A"), Params::new(), true);
/// let b = builder.create_edge(Vec::new(), Some("A"), Params::new(), true);
/// let root = builder.create_edge(vec![a, b], None, Params::new(), false);
/// let tree = builder.build(root);
/// assert_eq!(tree.node_names(tree.root(), true, false), vec!["edge.0", "A", "A.2"]);
/// ```
pub struct TreeBuilder {
    used_names: HashMap<String, i64>,
    pub(crate) tree: Tree,
}

impl Default for TreeBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl TreeBuilder {
    pub fn new() -> Self {
        Self {
            used_names: HashMap::from([(ANONYMOUS_NAME.to_string(), -1)]),
            tree: Tree::empty(),
        }
    }

    fn unique_name(&mut self, name: Option<&str>) -> String {
        let mut name = match name {
            Some(name) if !name.is_empty() => name.to_string(),
            _ => ANONYMOUS_NAME.to_string(),
        };
        while let Some(count) = self.used_names.get_mut(&name) {
            *count += 1;
            name = format!("{name}.{count}");
        }
        self.used_names.insert(name.clone(), 1);
        name
    }

    /// Creates a node above the already built `children`.
    ///
    /// `name_loaded` records whether the name was present in the source; it is only kept when a
    /// name was actually given.
    pub fn create_edge(
        &mut self,
        children: Vec<NodeIdx>,
        name: Option<&str>,
        params: Params,
        name_loaded: bool,
    ) -> NodeIdx {
        let unique = self.unique_name(name);
        let idx = self
            .tree
            .push_node(Some(unique), name_loaded && name.is_some());
        self.tree.node_mut(idx).set_params_with_length(params);
        for child in children {
            self.tree.adopt(idx, child);
        }
        idx
    }

    /// Creates a node that copies the label and parameters of `source`, or a fresh unloaded
    /// `root` node when there is no source. `params` overrides the copied parameters.
    pub fn edge_from_edge(
        &mut self,
        source: Option<&Node>,
        children: Vec<NodeIdx>,
        params: Option<Params>,
    ) -> NodeIdx {
        match source {
            None => self.create_edge(children, Some("root"), Params::new(), false),
            Some(source) => {
                let params = params.unwrap_or_else(|| source.params_with_length());
                self.create_edge(
                    children,
                    source.name.as_deref(),
                    params,
                    source.name_loaded,
                )
            }
        }
    }

    pub fn node(&self, idx: NodeIdx) -> &Node {
        self.tree.node(idx)
    }

    pub fn node_mut(&mut self, idx: NodeIdx) -> &mut Node {
        self.tree.node_mut(idx)
    }

    /// Finishes construction with `root` as the root of the resulting tree.
    pub fn build(self, root: NodeIdx) -> Tree {
        let mut tree = self.tree;
        tree.detach(root);
        tree.set_root(root);
        tree
    }
}
