use anyhow::bail;
use hashbrown::{HashMap, HashSet};
use log::{debug, info};

use crate::tree::{NodeIdx, Param, Params, Tree, TreeBuilder, TreeError, LENGTH_KEY};
use crate::Result;

type EdgeCountCache = HashMap<(Option<NodeIdx>, NodeIdx), usize>;

impl Tree {
    /// Sum of branch lengths on the path between `first` and `second`, `None` if the two nodes
    /// are not connected. Missing lengths count as zero.
    pub fn distance(&self, first: NodeIdx, second: NodeIdx) -> Option<f64> {
        if first == second {
            return Some(0.0);
        }
        let lineage: HashSet<NodeIdx> = std::iter::once(first)
            .chain(self.ancestors(first))
            .collect();
        let mut total = 0.0;
        let mut other = Some(second);
        while let Some(node) = other {
            if lineage.contains(&node) {
                let mut curr = first;
                while curr != node {
                    total += self.length(curr).unwrap_or_default();
                    curr = self.parent(curr)?;
                }
                return Some(total);
            }
            total += self.length(node).unwrap_or_default();
            other = self.parent(node);
        }
        None
    }

    /// Children of `idx` followed by its parent, leaving out `except`.
    ///
    /// Walking the tree through this treats the parent link as one more neighbour, i.e. as if
    /// the tree were unrooted.
    pub(crate) fn neighbours_except(&self, idx: NodeIdx, except: Option<NodeIdx>) -> Vec<NodeIdx> {
        self.children(idx)
            .iter()
            .copied()
            .chain(self.parent(idx))
            .filter(|&n| Some(n) != except)
            .collect()
    }

    /// Copy of the whole tree re-rooted at `idx`.
    ///
    /// The former parent of `idx` becomes one of its children. Every copied edge keeps the label,
    /// length and parameters of the edge it came from, so walking up the old tree each old
    /// parent takes over the data of the node below it. The new root is called `root`.
    ///
    /// ```text
    ///      r                 x ("root")
    ///     / \               /|\
    ///    x   C     ->      A B x' (old r, carrying x's edge)
    ///   / \                     \
    ///  A   B                     C
    /// ```
    pub fn unrooted_deepcopy(&self, idx: NodeIdx) -> Tree {
        let mut builder = TreeBuilder::new();
        let root = self.unrooted_copy_into(&mut builder, idx, None);
        builder.node_mut(root).name = Some("root".to_string());
        builder.build(root)
    }

    fn unrooted_copy_into(
        &self,
        builder: &mut TreeBuilder,
        idx: NodeIdx,
        came_from: Option<NodeIdx>,
    ) -> NodeIdx {
        let children: Vec<NodeIdx> = self
            .neighbours_except(idx, came_from)
            .into_iter()
            .map(|next| self.unrooted_copy_into(builder, next, Some(idx)))
            .collect();
        let edge = match came_from {
            None => None,
            Some(from) if self.parent(from) == Some(idx) => Some(from),
            Some(_) => Some(idx),
        };
        builder.edge_from_edge(edge.map(|e| self.node(e)), children, None)
    }

    /// Copies the subtree at `idx` into `builder`, preserving labels and parameters.
    pub(crate) fn copy_into(&self, builder: &mut TreeBuilder, idx: NodeIdx) -> NodeIdx {
        let mut copies: HashMap<NodeIdx, NodeIdx> = HashMap::new();
        for node in self.traverse(idx, false, true, false) {
            let children = self.copied_children(node, &mut copies);
            let copy = builder.edge_from_edge(Some(self.node(node)), children, None);
            copies.insert(node, copy);
        }
        let children = self.copied_children(idx, &mut copies);
        builder.edge_from_edge(Some(self.node(idx)), children, None)
    }

    fn copied_children(
        &self,
        idx: NodeIdx,
        copies: &mut HashMap<NodeIdx, NodeIdx>,
    ) -> Vec<NodeIdx> {
        self.children(idx)
            .iter()
            .filter_map(|child| copies.remove(child))
            .collect()
    }

    /// Copy in which no node has more than two children.
    ///
    /// Surplus children are grouped pairwise from the right under new unloaded `root` nodes:
    /// `(A,B,C,D)` becomes `(A,(B,(C,D)))`.
    pub fn bifurcating(&self) -> Tree {
        let mut builder = TreeBuilder::new();
        let root = self.bifurcating_into(&mut builder, self.root());
        builder.build(root)
    }

    fn bifurcating_into(&self, builder: &mut TreeBuilder, idx: NodeIdx) -> NodeIdx {
        let mut children: Vec<NodeIdx> = self
            .children(idx)
            .iter()
            .map(|&child| self.bifurcating_into(builder, child))
            .collect();
        while children.len() > 2 {
            let last_two = children.split_off(children.len() - 2);
            children.push(builder.edge_from_edge(None, last_two, None));
        }
        builder.edge_from_edge(Some(self.node(idx)), children, None)
    }

    /// Copy rooted at a node where no neighbouring subtree holds a clear majority of edges.
    ///
    /// Node adjacency changes, so clades and stems of the result should be addressed with an
    /// explicit outgroup.
    pub fn balanced(&self) -> Tree {
        let mut cache = EdgeCountCache::new();
        let mut last_edge = None;
        let mut edge = self.root();
        let mut known_weight = 0;
        while let Some((max_weight, remaining_weight, next_edge)) =
            self.imbalance(edge, last_edge, &mut cache)
        {
            known_weight += remaining_weight;
            if max_weight <= known_weight + 2 {
                break;
            }
            last_edge = Some(edge);
            edge = next_edge;
            known_weight += 1;
        }
        debug!("Balanced tree rooted at {}", self.node(edge));
        self.unrooted_deepcopy(edge)
    }

    /// Number of edges beyond `from` in the direction of `idx`, walking the tree unrooted.
    fn edge_count(&self, idx: NodeIdx, from: Option<NodeIdx>, cache: &mut EdgeCountCache) -> usize {
        if let Some(&count) = cache.get(&(from, idx)) {
            return count;
        }
        let count = 1 + self
            .neighbours_except(idx, from)
            .into_iter()
            .map(|next| self.edge_count(next, Some(idx), cache))
            .sum::<usize>();
        cache.insert((from, idx), count);
        count
    }

    /// Edge count of the heaviest neighbour of `idx` (other than `from`), of the others combined,
    /// and the heaviest neighbour itself. `None` for an isolated node.
    fn imbalance(
        &self,
        idx: NodeIdx,
        from: Option<NodeIdx>,
        cache: &mut EdgeCountCache,
    ) -> Option<(usize, usize, NodeIdx)> {
        let mut biggest: Option<(usize, NodeIdx)> = None;
        let mut total_weight = 0;
        for next in self.neighbours_except(idx, from) {
            let weight = self.edge_count(next, Some(idx), cache);
            total_weight += weight;
            if biggest.map_or(true, |(max_weight, _)| weight > max_weight) {
                biggest = Some((weight, next));
            }
        }
        biggest.map(|(max_weight, branch)| (max_weight, total_weight - max_weight, branch))
    }

    /// Whether both trees describe the same unrooted topology, ignoring lengths and child order.
    pub fn same_topology(&self, other: &Tree) -> Result<bool> {
        let tip_names = self.tip_names(self.root());
        let Some(root_at) = tip_names.first() else {
            return Ok(self.same_shape(self.root(), other, other.root()));
        };
        let me = self.rooted_with_tip(root_at)?.sorted(&tip_names);
        let them = other.rooted_with_tip(root_at)?.sorted(&tip_names);
        Ok(me.same_shape(me.root(), &them, them.root()))
    }

    /// Copy with children ordered so that the subtree holding the lowest scoring tip comes
    /// first. Tips score by their position in `sort_order`, then alphabetically.
    pub fn sorted(&self, sort_order: &[String]) -> Tree {
        let mut tip_names = self.tip_names(self.root());
        tip_names.sort();
        let mut scores: HashMap<&str, usize> = HashMap::new();
        for (position, name) in sort_order.iter().chain(tip_names.iter()).enumerate() {
            scores.entry(name.as_str()).or_insert(position);
        }
        let mut builder = TreeBuilder::new();
        let (_, root) = self.sorted_into(&mut builder, self.root(), &scores);
        builder.build(root)
    }

    fn sorted_into(
        &self,
        builder: &mut TreeBuilder,
        idx: NodeIdx,
        scores: &HashMap<&str, usize>,
    ) -> (Option<usize>, NodeIdx) {
        let node = self.node(idx);
        if node.is_tip() {
            let score = scores.get(node.name_str()).copied();
            return (score, builder.edge_from_edge(Some(node), Vec::new(), None));
        }
        let mut scored: Vec<(Option<usize>, NodeIdx)> = node
            .children()
            .iter()
            .map(|&child| self.sorted_into(builder, child, scores))
            .collect();
        scored.sort_by_key(|&(score, _)| score);
        let score = scored.iter().find_map(|&(score, _)| score);
        let children = scored.into_iter().map(|(_, child)| child).collect();
        (score, builder.edge_from_edge(Some(node), children, None))
    }

    /// Copy with at least three children at the root.
    ///
    /// If the root has fewer, its first internal child is dissolved into it and that child's
    /// length is added to each promoted grandchild.
    pub fn unrooted(&self) -> Tree {
        let root = self.root();
        let mut builder = TreeBuilder::new();
        let mut need_to_expand = self.children(root).len() < 3;
        let mut new_children = Vec::new();
        for &old in self.children(root) {
            if need_to_expand && !self.is_tip(old) {
                for &sib in self.children(old) {
                    let copy = self.copy_into(&mut builder, sib);
                    if let (Some(sib_length), Some(old_length)) =
                        (builder.node(copy).length, self.length(old))
                    {
                        builder.node_mut(copy).length = Some(sib_length + old_length);
                    }
                    new_children.push(copy);
                }
                need_to_expand = false;
            } else {
                new_children.push(self.copy_into(&mut builder, old));
            }
        }
        let new_root = builder.edge_from_edge(Some(self.node(root)), new_children, None);
        builder.build(new_root)
    }

    /// Copy re-rooted at the internal node called `name`.
    pub fn rooted_at(&self, name: &str) -> Result<Tree> {
        let new_root = self.node_matching_name(name)?;
        if self.is_tip(new_root) {
            bail!(TreeError::Topology(format!(
                "Can't use a tip ({name}) as the root"
            )));
        }
        info!("Rerooting tree at {}", name);
        Ok(self.unrooted_deepcopy(new_root))
    }

    /// Copy re-rooted so that the tip called `name` hangs directly off the root.
    pub fn rooted_with_tip(&self, name: &str) -> Result<Tree> {
        let tip = self.node_matching_name(name)?;
        let Some(parent) = self.parent(tip) else {
            bail!(TreeError::Topology(format!(
                "Node {name} has no parent to root at"
            )));
        };
        info!("Rerooting tree next to tip {}", name);
        Ok(self.unrooted_deepcopy(parent))
    }

    /// Smallest sub-tree spanning the named nodes.
    ///
    /// Nodes left with a single child are dissolved: lengths are summed and other numeric
    /// parameters become length-weighted averages. The new root is called `root`, and the result
    /// is kept unrooted if this tree's root has more than two children.
    pub fn get_sub_tree(&self, names: &[&str]) -> Result<Tree> {
        let known: HashSet<String> = self
            .node_names(self.root(), true, false)
            .into_iter()
            .collect();
        if let Some(missing) = names.iter().find(|&&name| !known.contains(name)) {
            bail!(TreeError::Lookup(format!("Edge {missing} not found in tree")));
        }
        let included: HashSet<&str> = names.iter().copied().collect();

        let mut builder = TreeBuilder::new();
        let Some(new_root) = self.sub_tree_into(&mut builder, self.root(), &included) else {
            bail!(TreeError::Topology(
                "No tree created in make sub tree".to_string()
            ));
        };
        if builder.node(new_root).is_tip() {
            bail!(TreeError::Topology(
                "Only a tip was returned from selecting sub tree".to_string()
            ));
        }
        builder.node_mut(new_root).name = Some("root".to_string());
        let sub_tree = builder.build(new_root);
        if self.children(self.root()).len() > 2 {
            Ok(sub_tree.unrooted())
        } else {
            Ok(sub_tree)
        }
    }

    fn sub_tree_into(
        &self,
        builder: &mut TreeBuilder,
        idx: NodeIdx,
        included: &HashSet<&str>,
    ) -> Option<NodeIdx> {
        let node = self.node(idx);
        if included.contains(node.name_str()) {
            return Some(self.copy_into(builder, idx));
        }
        let children: Vec<NodeIdx> = node
            .children()
            .iter()
            .filter_map(|&child| self.sub_tree_into(builder, child, included))
            .collect();
        match children.as_slice() {
            [] => None,
            &[child] => {
                let params = merged_params(&node.params, node.length, builder, child);
                builder.node_mut(child).set_params_with_length(params);
                Some(child)
            }
            _ => Some(builder.edge_from_edge(Some(node), children, None)),
        }
    }

    /// Names of the stem edge and/or the clade below the lowest common ancestor of two tips.
    ///
    /// With `outgroup` the tree is first re-rooted at that tip so the clade is defined by its
    /// distance from it.
    pub fn edge_names(
        &self,
        tip1: &str,
        tip2: &str,
        clade: bool,
        stem: bool,
        outgroup: Option<&str>,
    ) -> Result<Vec<String>> {
        let rerooted;
        let tree = match outgroup {
            Some(outgroup) => {
                let outgroup_idx = self.node_matching_name(outgroup)?;
                if !self.is_tip(outgroup_idx) {
                    bail!(TreeError::Topology(format!(
                        "Outgroup ({outgroup}) must be a tip"
                    )));
                }
                rerooted = self.unrooted_deepcopy(outgroup_idx);
                &rerooted
            }
            None => self,
        };

        let join_edge = tree.connecting_node(tip1, tip2)?;
        let mut names = Vec::new();
        if stem {
            if tree.is_root(join_edge) {
                bail!(TreeError::Topology(format!(
                    "LCA({tip1},{tip2}) is the root and so has no stem"
                )));
            }
            names.push(tree.node(join_edge).name_str().to_string());
        }
        if clade {
            for &child in tree.children(join_edge) {
                names.extend(tree.node_names(child, true, false));
            }
        }
        Ok(names)
    }
}

/// Parameters for an edge formed by joining `upper` onto the already copied `child`.
fn merged_params(
    upper: &Params,
    upper_length: Option<f64>,
    builder: &TreeBuilder,
    child: NodeIdx,
) -> Params {
    let lower = builder.node(child);
    let mut params = Params::new();
    let (Some(upper_length), Some(lower_length)) = (upper_length, lower.length) else {
        return params;
    };
    let length = upper_length + lower_length;
    if length == 0.0 {
        return params;
    }
    for (key, value) in upper {
        let shared = value
            .as_float()
            .zip(lower.params.get(key).and_then(Param::as_float));
        if let Some((upper_value, lower_value)) = shared {
            let average = (upper_value * upper_length + lower_value * lower_length) / length;
            params.insert(key.clone(), Param::Float(average));
        }
    }
    params.insert(LENGTH_KEY.to_string(), Param::Float(length));
    params
}
