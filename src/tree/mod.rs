use std::fmt::{self, Display};
use std::ops::Range;

use anyhow::bail;
use hashbrown::{HashMap, HashSet};
use log::debug;

use crate::Result;

mod phylo;
mod serialise;
mod traversal;
pub mod tree_builder;
mod tree_error;
mod tree_node;
pub mod tree_parser;
pub mod xml_parser;

pub use traversal::{PreAndPostorder, Postorder, Preorder, Tips, Traversal};
pub use tree_builder::TreeBuilder;
pub use tree_error::TreeError;
pub use tree_node::{Node, Param, Params, LENGTH_KEY};

/// Stable identity of a node within its tree's arena.
#[derive(Debug, PartialEq, Clone, Copy, PartialOrd, Eq, Ord, Hash)]
pub struct NodeIdx(pub(crate) usize);

impl From<NodeIdx> for usize {
    fn from(node_idx: NodeIdx) -> usize {
        node_idx.0
    }
}

impl Display for NodeIdx {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node {}", self.0)
    }
}

/// A mutable phylogenetic tree.
///
/// Nodes live in an arena and refer to each other by [`NodeIdx`]. Every node has at most one
/// parent and is listed exactly once in that parent's children. A node detached from its parent
/// stays in the arena as the root of a standalone subtree, so indices never dangle.
#[derive(Debug, Clone)]
pub struct Tree {
    root: NodeIdx,
    nodes: Vec<Node>,
}

impl Display for Tree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.newick(true))
    }
}

impl Tree {
    /// Creates a tree consisting of a single root node.
    pub fn new(root_name: Option<&str>) -> Self {
        let mut tree = Self::empty();
        tree.root = tree.add_node(root_name);
        tree
    }

    pub(crate) fn empty() -> Self {
        Self {
            root: NodeIdx(0),
            nodes: Vec::new(),
        }
    }

    /// Adds a new parentless node to the arena; attach it with [`Tree::append`] and friends.
    pub fn add_node(&mut self, name: Option<&str>) -> NodeIdx {
        self.push_node(name.map(str::to_string), name.is_some())
    }

    pub(crate) fn push_node(&mut self, name: Option<String>, name_loaded: bool) -> NodeIdx {
        let idx = NodeIdx(self.nodes.len());
        self.nodes.push(Node::new(idx, name, name_loaded));
        idx
    }

    pub fn root(&self) -> NodeIdx {
        self.root
    }

    pub(crate) fn set_root(&mut self, root: NodeIdx) {
        self.root = root;
    }

    pub fn node(&self, idx: NodeIdx) -> &Node {
        &self.nodes[idx.0]
    }

    pub fn node_mut(&mut self, idx: NodeIdx) -> &mut Node {
        &mut self.nodes[idx.0]
    }

    pub fn name(&self, idx: NodeIdx) -> Option<&str> {
        self.node(idx).name.as_deref()
    }

    pub fn children(&self, idx: NodeIdx) -> &[NodeIdx] {
        &self.node(idx).children
    }

    pub fn parent(&self, idx: NodeIdx) -> Option<NodeIdx> {
        self.node(idx).parent
    }

    pub fn length(&self, idx: NodeIdx) -> Option<f64> {
        self.node(idx).length
    }

    pub fn set_length(&mut self, idx: NodeIdx, length: Option<f64>) {
        self.node_mut(idx).length = length;
    }

    /// Number of nodes reachable from the root, root included.
    pub fn node_count(&self) -> usize {
        self.preorder(self.root).count()
    }

    // Structural edits

    /// Fails if attaching `child` below `parent` would make a node its own descendant.
    fn check_adoption(&self, parent: NodeIdx, child: NodeIdx) -> Result<()> {
        if self.is_ancestor_or_self(child, parent) {
            bail!(TreeError::Topology(format!(
                "Cannot attach {child} below {parent}, it would create a cycle"
            )));
        }
        Ok(())
    }

    /// True if `candidate` is `idx` or one of its ancestors.
    fn is_ancestor_or_self(&self, candidate: NodeIdx, idx: NodeIdx) -> bool {
        let mut curr = Some(idx);
        while let Some(node) = curr {
            if node == candidate {
                return true;
            }
            curr = self.parent(node);
        }
        false
    }

    /// Removes `child` from its parent's children, leaving it a standalone root.
    fn unlink(&mut self, child: NodeIdx) {
        if let Some(parent) = self.nodes[child.0].parent.take() {
            self.nodes[parent.0].children.retain(|&c| c != child);
        }
    }

    fn link(&mut self, parent: NodeIdx, child: NodeIdx, position: Option<usize>) {
        let children = &mut self.nodes[parent.0].children;
        match position {
            Some(index) => children.insert(index.min(children.len()), child),
            None => children.push(child),
        }
        self.nodes[child.0].parent = Some(parent);
    }

    /// Moves `child` under `parent` without the cycle check, for freshly built nodes.
    pub(crate) fn adopt(&mut self, parent: NodeIdx, child: NodeIdx) {
        self.unlink(child);
        self.link(parent, child, None);
    }

    /// Appends `child` to the children of `parent`, detaching it from any previous parent.
    pub fn append(&mut self, parent: NodeIdx, child: NodeIdx) -> Result<()> {
        self.check_adoption(parent, child)?;
        self.unlink(child);
        self.link(parent, child, None);
        Ok(())
    }

    /// Appends all `children` to `parent` in order. Nothing is moved if any of them would
    /// create a cycle.
    pub fn extend(&mut self, parent: NodeIdx, children: &[NodeIdx]) -> Result<()> {
        for &child in children {
            self.check_adoption(parent, child)?;
        }
        for &child in children {
            self.unlink(child);
            self.link(parent, child, None);
        }
        Ok(())
    }

    /// Inserts `child` at `index` among the children of `parent`; indices past the end append.
    pub fn insert(&mut self, parent: NodeIdx, index: usize, child: NodeIdx) -> Result<()> {
        self.check_adoption(parent, child)?;
        self.unlink(child);
        self.link(parent, child, Some(index));
        Ok(())
    }

    /// Detaches and returns the child at `index` (the last child if `None`).
    pub fn pop(&mut self, parent: NodeIdx, index: Option<usize>) -> Option<NodeIdx> {
        let children = &mut self.nodes[parent.0].children;
        let index = index.unwrap_or(children.len().checked_sub(1)?);
        if index >= children.len() {
            return None;
        }
        let child = children.remove(index);
        self.nodes[child.0].parent = None;
        Some(child)
    }

    /// Detaches the first child of `parent` named `name`. Returns whether one was found.
    pub fn remove(&mut self, parent: NodeIdx, name: &str) -> bool {
        let target = self
            .children(parent)
            .iter()
            .copied()
            .find(|&c| self.node(c).has_name(name));
        match target {
            Some(child) => self.remove_node(parent, child),
            None => false,
        }
    }

    /// Detaches `target` if it is a child of `parent`. Returns whether it was.
    pub fn remove_node(&mut self, parent: NodeIdx, target: NodeIdx) -> bool {
        if self.parent(target) != Some(parent) {
            return false;
        }
        self.unlink(target);
        true
    }

    /// Puts `child` in place of the child at `index` and returns the detached previous child.
    pub fn replace_child(
        &mut self,
        parent: NodeIdx,
        index: usize,
        child: NodeIdx,
    ) -> Result<NodeIdx> {
        let Some(&old) = self.children(parent).get(index) else {
            bail!(
                "Child index {index} out of range for {parent} with {} children",
                self.children(parent).len()
            );
        };
        if old == child {
            return Ok(old);
        }
        self.check_adoption(parent, child)?;
        self.unlink(child);
        // Detaching a sibling may have shifted the slot.
        let position = self.index_of(parent, old);
        self.nodes[parent.0].children[position] = child;
        self.nodes[old.0].parent = None;
        self.nodes[child.0].parent = Some(parent);
        Ok(old)
    }

    /// Replaces the children in `range` with `new_children`, returning the detached ones.
    ///
    /// New children are detached from wherever they were first; those already inside `range`
    /// simply stay attached.
    pub fn splice_children(
        &mut self,
        parent: NodeIdx,
        range: Range<usize>,
        new_children: &[NodeIdx],
    ) -> Result<Vec<NodeIdx>> {
        let current = self.children(parent).to_vec();
        if range.start > range.end || range.end > current.len() {
            bail!(
                "Child range {range:?} out of range for {parent} with {} children",
                current.len()
            );
        }
        let incoming: HashSet<NodeIdx> = new_children.iter().copied().collect();
        if incoming.len() != new_children.len() {
            bail!(TreeError::Topology(format!(
                "The same node cannot be attached twice below {parent}"
            )));
        }
        for &child in new_children {
            self.check_adoption(parent, child)?;
        }

        let removed: Vec<NodeIdx> = current[range.clone()]
            .iter()
            .copied()
            .filter(|c| !incoming.contains(c))
            .collect();
        let kept = |slice: &[NodeIdx]| -> Vec<NodeIdx> {
            slice
                .iter()
                .copied()
                .filter(|c| !incoming.contains(c))
                .collect()
        };
        let mut children = kept(&current[..range.start]);
        children.extend_from_slice(new_children);
        children.extend(kept(&current[range.end..]));

        for &child in new_children {
            if self.parent(child) != Some(parent) {
                self.unlink(child);
            }
            self.nodes[child.0].parent = Some(parent);
        }
        for &child in &removed {
            self.nodes[child.0].parent = None;
        }
        self.nodes[parent.0].children = children;
        Ok(removed)
    }

    /// Detaches and returns the children in `range`.
    pub fn delete_children(&mut self, parent: NodeIdx, range: Range<usize>) -> Result<Vec<NodeIdx>> {
        self.splice_children(parent, range, &[])
    }

    /// Moves `idx` below `parent`, or detaches it when `parent` is `None`.
    /// Does nothing if `idx` already hangs below `parent`.
    pub fn set_parent(&mut self, idx: NodeIdx, parent: Option<NodeIdx>) -> Result<()> {
        if self.parent(idx) == parent {
            return Ok(());
        }
        match parent {
            Some(parent) => self.append(parent, idx),
            None => {
                self.unlink(idx);
                Ok(())
            }
        }
    }

    /// Detaches `idx` from its parent; it stays valid as the root of its own subtree.
    pub fn detach(&mut self, idx: NodeIdx) {
        self.unlink(idx);
    }

    // Navigation

    fn index_of(&self, parent: NodeIdx, child: NodeIdx) -> usize {
        self.children(parent)
            .iter()
            .position(|&c| c == child)
            .unwrap_or_default()
    }

    pub fn index_in_parent(&self, idx: NodeIdx) -> Option<usize> {
        let parent = self.parent(idx)?;
        self.children(parent).iter().position(|&c| c == idx)
    }

    pub fn is_tip(&self, idx: NodeIdx) -> bool {
        self.node(idx).is_tip()
    }

    pub fn is_root(&self, idx: NodeIdx) -> bool {
        self.node(idx).is_root()
    }

    /// All ancestors of `idx`, nearest first, up to and including its root.
    pub fn ancestors(&self, idx: NodeIdx) -> Vec<NodeIdx> {
        let mut ancestors = Vec::new();
        let mut curr = self.parent(idx);
        while let Some(node) = curr {
            ancestors.push(node);
            curr = self.parent(node);
        }
        ancestors
    }

    /// The root of the (sub)tree `idx` currently belongs to.
    pub fn root_of(&self, idx: NodeIdx) -> NodeIdx {
        let mut curr = idx;
        while let Some(parent) = self.parent(curr) {
            curr = parent;
        }
        curr
    }

    /// Other children of the same parent, in order.
    pub fn siblings(&self, idx: NodeIdx) -> Vec<NodeIdx> {
        match self.parent(idx) {
            Some(parent) => self
                .children(parent)
                .iter()
                .copied()
                .filter(|&c| c != idx)
                .collect(),
            None => Vec::new(),
        }
    }

    /// Tips below `idx` in depth-first order; empty if `idx` is itself a tip.
    pub fn tips(&self, idx: NodeIdx) -> Vec<NodeIdx> {
        self.iter_tips(idx, false).collect()
    }

    /// Internal nodes below `idx` in preorder.
    pub fn nontips(&self, idx: NodeIdx, include_self: bool) -> Vec<NodeIdx> {
        self.traverse(idx, true, false, include_self)
            .filter(|&n| !self.is_tip(n))
            .collect()
    }

    pub fn tip_children(&self, idx: NodeIdx) -> Vec<NodeIdx> {
        self.children(idx)
            .iter()
            .copied()
            .filter(|&c| self.is_tip(c))
            .collect()
    }

    pub fn non_tip_children(&self, idx: NodeIdx) -> Vec<NodeIdx> {
        self.children(idx)
            .iter()
            .copied()
            .filter(|&c| !self.is_tip(c))
            .collect()
    }

    /// Children split into consecutive runs of tips and non-tips.
    pub fn child_groups(&self, idx: NodeIdx) -> Vec<Vec<NodeIdx>> {
        let mut groups: Vec<Vec<NodeIdx>> = Vec::new();
        let mut state = None;
        for &child in self.children(idx) {
            let is_tip = self.is_tip(child);
            match groups.last_mut() {
                Some(group) if state == Some(is_tip) => group.push(child),
                _ => groups.push(vec![child]),
            }
            state = Some(is_tip);
        }
        groups
    }

    /// Whether `parent` has a direct child called `name`.
    pub fn contains_child(&self, parent: NodeIdx, name: &str) -> bool {
        self.children(parent)
            .iter()
            .any(|&c| self.node(c).has_name(name))
    }

    // Identity queries

    /// Lowest common ancestor of `first` and `second`, `None` if they are not connected.
    pub fn lowest_common_ancestor(&self, first: NodeIdx, second: NodeIdx) -> Option<NodeIdx> {
        let lineage: HashSet<NodeIdx> = std::iter::once(first)
            .chain(self.ancestors(first))
            .collect();
        let mut curr = Some(second);
        while let Some(node) = curr {
            if lineage.contains(&node) {
                return Some(node);
            }
            curr = self.parent(node);
        }
        None
    }

    /// Number of edges on the path between `first` and `second`, `None` if not connected.
    pub fn separation(&self, first: NodeIdx, second: NodeIdx) -> Option<usize> {
        if first == second {
            return Some(0);
        }
        let lineage: HashSet<NodeIdx> = std::iter::once(first)
            .chain(self.ancestors(first))
            .collect();
        let mut count = 0;
        let mut curr = Some(second);
        while let Some(node) = curr {
            if lineage.contains(&node) {
                let mut up = first;
                while up != node {
                    count += 1;
                    up = self.parent(up)?;
                }
                return Some(count);
            }
            count += 1;
            curr = self.parent(node);
        }
        None
    }

    // Copies

    /// Deep copy of the subtree at `idx` as a new tree: names, flags, lengths and parameters are
    /// cloned, links are rebuilt.
    pub fn deepcopy(&self, idx: NodeIdx) -> Tree {
        self.copy_with(idx, Node::detached_copy)
    }

    /// Copy of the subtree at `idx` keeping only names and structure.
    pub fn copy_topology(&self, idx: NodeIdx) -> Tree {
        self.copy_with(idx, Node::topology_copy)
    }

    fn copy_with(&self, idx: NodeIdx, copy_node: impl Fn(&Node, NodeIdx) -> Node) -> Tree {
        let mut copy = Tree::empty();
        let mut mapping: HashMap<NodeIdx, NodeIdx> = HashMap::new();
        for old in self.preorder(idx) {
            let new = NodeIdx(copy.nodes.len());
            copy.nodes.push(copy_node(self.node(old), new));
            mapping.insert(old, new);
            if old == idx {
                continue;
            }
            if let Some(&parent) = self.parent(old).and_then(|p| mapping.get(&p)) {
                copy.link(parent, new, None);
            }
        }
        copy.root = NodeIdx(0);
        copy
    }

    // Name-indexed lookup

    /// First node named `name` below (and including) `from`, in preorder.
    pub fn find_node(&self, from: NodeIdx, name: &str) -> Option<NodeIdx> {
        self.preorder(from).find(|&n| self.node(n).has_name(name))
    }

    /// First node named `name` in the tree, in preorder.
    pub fn node_matching_name(&self, name: &str) -> Result<NodeIdx> {
        match self.find_node(self.root, name) {
            Some(idx) => Ok(idx),
            None => bail!(TreeError::Lookup(format!(
                "No node named '{}' in {:?}",
                name,
                self.tip_names(self.root)
            ))),
        }
    }

    /// Lowest common ancestor of the nodes named `first` and `second`.
    pub fn connecting_node(&self, first: &str, second: &str) -> Result<NodeIdx> {
        let first_idx = self.node_matching_name(first)?;
        let second_idx = self.node_matching_name(second)?;
        match self.lowest_common_ancestor(first_idx, second_idx) {
            Some(lca) => Ok(lca),
            None => bail!(TreeError::Topology(format!(
                "No LCA found for {first} and {second}"
            ))),
        }
    }

    /// Names of the nodes below `idx` in preorder, or only of its tips.
    pub fn node_names(&self, idx: NodeIdx, include_self: bool, tips_only: bool) -> Vec<String> {
        let nodes = if tips_only {
            self.traverse(idx, false, false, true)
        } else {
            self.traverse(idx, true, false, include_self)
        };
        nodes.map(|n| self.node(n).name_str().to_string()).collect()
    }

    /// Names of the tips below `idx`; a tip yields its own name.
    pub fn tip_names(&self, idx: NodeIdx) -> Vec<String> {
        self.node_names(idx, false, true)
    }

    /// All nodes below and including `idx`, in postorder.
    pub fn edge_vector(&self, idx: NodeIdx) -> Vec<NodeIdx> {
        self.postorder(idx).collect()
    }

    /// Parameter `key` of the node named `name`; `"length"` reads the branch length.
    pub fn param_value(&self, name: &str, key: &str) -> Result<Param> {
        let node = self.node(self.node_matching_name(name)?);
        match node.params_with_length().remove(key) {
            Some(value) => Ok(value),
            None => bail!(TreeError::Lookup(format!(
                "Node '{name}' has no parameter '{key}'"
            ))),
        }
    }

    /// Sets parameter `key` of the node named `name`; `"length"` sets the branch length.
    pub fn set_param_value(&mut self, name: &str, key: &str, value: Param) -> Result<()> {
        let idx = self.node_matching_name(name)?;
        let node = self.node_mut(idx);
        if key == LENGTH_KEY {
            match value.as_float() {
                Some(length) => node.length = Some(length),
                None => bail!(TreeError::Construction(format!(
                    "Branch length must be a number, got '{value}'"
                ))),
            }
        } else {
            node.params.insert(key.to_string(), value);
        }
        Ok(())
    }

    // Bulk edits

    /// Gives every nameless node a `node<N>` name that is not yet used in the tree.
    pub fn name_unnamed_nodes(&mut self) {
        let order: Vec<NodeIdx> = self.preorder(self.root).collect();
        let mut names_in_use: HashSet<String> = order
            .iter()
            .filter_map(|&n| self.node(n).name.clone())
            .filter(|name| !name.is_empty())
            .collect();
        let mut name_index = 1;
        for idx in order {
            if !self.node(idx).name_str().is_empty() {
                continue;
            }
            let mut new_name = format!("node{name_index}");
            while names_in_use.contains(&new_name) {
                name_index += 1;
                new_name = format!("node{name_index}");
            }
            names_in_use.insert(new_name.clone());
            self.node_mut(idx).name = Some(new_name);
            name_index += 1;
        }
    }

    /// Detaches every node matching `is_deleted`; internal nodes left without children are
    /// removed in turn, up to the root.
    pub fn remove_deleted(&mut self, is_deleted: impl Fn(&Node) -> bool) {
        let order: Vec<NodeIdx> = self.postorder(self.root).collect();
        let mut removed = 0;
        for idx in order {
            if !is_deleted(self.node(idx)) {
                continue;
            }
            let mut curr_parent = self.parent(idx);
            self.unlink(idx);
            removed += 1;
            while let Some(parent) = curr_parent {
                if !self.children(parent).is_empty() || parent == self.root {
                    break;
                }
                curr_parent = self.parent(parent);
                self.unlink(parent);
            }
        }
        debug!("Removed {} deleted node(s) from the tree", removed);
    }

    /// Splices out every non-root internal node with a single child. The child is re-attached
    /// as the last child of the removed node's parent and keeps its own length.
    pub fn prune(&mut self) {
        let single_child: Vec<NodeIdx> = self
            .preorder(self.root)
            .filter(|&n| !self.is_root(n) && self.children(n).len() == 1)
            .collect();
        for idx in single_child {
            let (Some(parent), Some(&child)) = (self.parent(idx), self.children(idx).first())
            else {
                continue;
            };
            self.unlink(idx);
            self.unlink(child);
            self.link(parent, child, None);
        }
        debug!("Pruned single-child nodes from the tree");
    }

    /// Whether the subtrees `idx` and `other_idx` have the same ordered shape and tip names,
    /// ignoring lengths. Sort both trees first to compare unordered shapes.
    pub fn same_shape(&self, idx: NodeIdx, other: &Tree, other_idx: NodeIdx) -> bool {
        let mut stack = vec![(idx, other_idx)];
        while let Some((mine, theirs)) = stack.pop() {
            let my_children = self.children(mine);
            let their_children = other.children(theirs);
            if my_children.len() != their_children.len() {
                return false;
            }
            if my_children.is_empty() && self.name(mine) != other.name(theirs) {
                return false;
            }
            stack.extend(my_children.iter().copied().zip(their_children.iter().copied()));
        }
        true
    }
}
