use std::collections::BTreeSet;

use anyhow::bail;
use hashbrown::{HashMap, HashSet};
use itertools::Itertools;
use log::{info, warn};
use nalgebra::DMatrix;

use crate::tree::{NodeIdx, Tree, TreeError};
use crate::Result;

/// Names of the tips below a node.
pub type TipSet = BTreeSet<String>;

/// How a correlation `r` between two tip distance matrices is turned into a distance.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TipDistanceMetric {
    /// `(1 - r) / 2`: perfect correlation gives 0, perfect anti-correlation gives 1.
    #[default]
    FromR,
    /// `1 - r²`: correlations of +1 and -1 both give 0.
    FromRSquared,
}

impl TipDistanceMetric {
    pub fn distance(&self, first: &DMatrix<f64>, second: &DMatrix<f64>) -> f64 {
        let r = correlation(first, second);
        match self {
            TipDistanceMetric::FromR => (1.0 - r) / 2.0,
            TipDistanceMetric::FromRSquared => 1.0 - r * r,
        }
    }
}

/// Pearson correlation over all entries of two equally shaped matrices; 0 if either is constant.
fn correlation(first: &DMatrix<f64>, second: &DMatrix<f64>) -> f64 {
    let x = first.add_scalar(-first.mean());
    let y = second.add_scalar(-second.mean());
    let denominator = x.norm() * y.norm();
    if denominator == 0.0 {
        return 0.0;
    }
    (x.dot(&y) / denominator).clamp(-1.0, 1.0)
}

impl Tree {
    /// Names of all tips below `idx`; empty for a tip.
    pub fn subset(&self, idx: NodeIdx) -> TipSet {
        self.iter_tips(idx, false)
            .map(|tip| self.node(tip).name_str().to_string())
            .collect()
    }

    /// Tip sets with more than one member of every node strictly below `idx`.
    pub fn subsets(&self, idx: NodeIdx) -> HashSet<TipSet> {
        let mut leaf_sets: HashMap<NodeIdx, TipSet> = HashMap::new();
        let mut sets = HashSet::new();
        for node in self.traverse(idx, false, true, false) {
            let leaf_set = if self.is_tip(node) {
                TipSet::from([self.node(node).name_str().to_string()])
            } else {
                let mut leaf_set = TipSet::new();
                for child in self.children(node) {
                    leaf_set.extend(leaf_sets.remove(child).unwrap_or_default());
                }
                if leaf_set.len() > 1 {
                    sets.insert(leaf_set.clone());
                }
                leaf_set
            };
            leaf_sets.insert(node, leaf_set);
        }
        sets
    }

    /// Fraction of bipartitions not shared by the two trees, from 0 (all shared) to 1.
    ///
    /// Tips present in only one tree count as mismatches unless `exclude_absent_taxa` is set,
    /// in which case both trees' bipartitions are first restricted to the common tips. If no
    /// bipartitions remain the distance is 1.
    pub fn compare_by_subsets(&self, other: &Tree, exclude_absent_taxa: bool) -> f64 {
        info!("Comparing trees by bipartitions.");
        let mut self_sets = self.subsets(self.root());
        let mut other_sets = other.subsets(other.root());
        if exclude_absent_taxa {
            let in_both: TipSet = self
                .subset(self.root())
                .intersection(&other.subset(other.root()))
                .cloned()
                .collect();
            let restrict = |sets: HashSet<TipSet>| -> HashSet<TipSet> {
                sets.into_iter()
                    .map(|set| set.intersection(&in_both).cloned().collect::<TipSet>())
                    .filter(|set| set.len() > 1)
                    .collect()
            };
            self_sets = restrict(self_sets);
            other_sets = restrict(other_sets);
        }
        let total_subsets = self_sets.len() + other_sets.len();
        if total_subsets == 0 {
            warn!("No comparable bipartitions, returning the maximal distance.");
            return 1.0;
        }
        let intersection_length = self_sets.intersection(&other_sets).count();
        1.0 - 2.0 * intersection_length as f64 / total_subsets as f64
    }

    /// Path lengths between all pairs of tips below `idx`, computed in one postorder pass.
    ///
    /// Rows and columns follow the returned tip order. A missing branch length counts as
    /// `default_length`.
    pub fn tip_to_tip_distances(
        &self,
        idx: NodeIdx,
        default_length: f64,
    ) -> (DMatrix<f64>, Vec<NodeIdx>) {
        let tip_order = self.tips(idx);
        let num_tips = tip_order.len();
        // Tips below any node occupy a contiguous range of the depth-first tip order.
        let mut ranges: HashMap<NodeIdx, (usize, usize)> = tip_order
            .iter()
            .enumerate()
            .map(|(i, &tip)| (tip, (i, i + 1)))
            .collect();
        let mut tip_distances = vec![0.0; num_tips];
        let mut result = DMatrix::<f64>::zeros(num_tips, num_tips);

        for node in self.postorder(idx) {
            let children = self.children(node);
            if children.is_empty() {
                continue;
            }
            let mut node_range = (usize::MAX, 0);
            for &child in children {
                let Some(&(start, stop)) = ranges.get(&child) else {
                    continue;
                };
                let child_length = self.length(child).unwrap_or(default_length);
                for distance in &mut tip_distances[start..stop] {
                    *distance += child_length;
                }
                node_range = (node_range.0.min(start), node_range.1.max(stop));
            }
            ranges.insert(node, node_range);

            for (first, second) in children.iter().tuple_combinations() {
                let (Some(&(start1, stop1)), Some(&(start2, stop2))) =
                    (ranges.get(first), ranges.get(second))
                else {
                    continue;
                };
                for tip1 in start1..stop1 {
                    for tip2 in start2..stop2 {
                        result[(tip1, tip2)] = tip_distances[tip1] + tip_distances[tip2];
                    }
                }
            }
        }
        (&result + result.transpose(), tip_order)
    }

    /// Distance between the two trees derived from the correlation of their tip-to-tip
    /// distance matrices over the tips they share.
    ///
    /// Fails if the trees share no tips; with two or fewer shared tips the trees agree by
    /// definition and the result is 1.
    pub fn compare_by_tip_distances(&self, other: &Tree, metric: TipDistanceMetric) -> Result<f64> {
        info!("Comparing trees by tip-to-tip distances.");
        let self_names = self.tip_names(self.root());
        let other_names = other.tip_names(other.root());
        let other_lookup: HashSet<&String> = other_names.iter().collect();
        let common_names: BTreeSet<&String> = self_names
            .iter()
            .filter(|name| other_lookup.contains(name))
            .collect();
        if common_names.is_empty() {
            bail!(TreeError::Comparison(
                "No names in common between the two trees.".to_string()
            ));
        }
        if common_names.len() <= 2 {
            warn!(
                "Only {} tip(s) in common, the trees match by definition.",
                common_names.len()
            );
            return Ok(1.0);
        }

        let order_in = |names: &[String]| -> Vec<usize> {
            common_names
                .iter()
                .filter_map(|&common| names.iter().position(|name| name == common))
                .collect()
        };
        let self_order = order_in(&self_names);
        let other_order = order_in(&other_names);
        let (self_matrix, _) = self.tip_to_tip_distances(self.root(), 1.0);
        let (other_matrix, _) = other.tip_to_tip_distances(other.root(), 1.0);
        let self_matrix = self_matrix
            .select_rows(&self_order)
            .select_columns(&self_order);
        let other_matrix = other_matrix
            .select_rows(&other_order)
            .select_columns(&other_order);
        Ok(metric.distance(&self_matrix, &other_matrix))
    }

    /// Membership matrix with the internal nodes (sorted by name) as rows and tips as columns;
    /// an entry is 1 if the tip descends from the node.
    ///
    /// Columns follow `tip_list`, or the sorted tip names when none is given.
    pub fn descendant_array(&self, tip_list: Option<&[String]>) -> (DMatrix<f64>, Vec<NodeIdx>) {
        let mut node_list = self.nontips(self.root(), true);
        node_list.sort_by(|&a, &b| self.node(a).name_str().cmp(self.node(b).name_str()));

        let tip_list = match tip_list {
            Some(tip_list) if !tip_list.is_empty() => tip_list.to_vec(),
            _ => {
                let mut tip_names = self.tip_names(self.root());
                tip_names.sort();
                tip_names
            }
        };
        let mut result = DMatrix::<f64>::zeros(node_list.len(), tip_list.len());
        for (i, &node) in node_list.iter().enumerate() {
            let below = self.subset(node);
            for (j, tip) in tip_list.iter().enumerate() {
                if below.contains(tip) {
                    result[(i, j)] = 1.0;
                }
            }
        }
        (result, node_list)
    }

    /// Path lengths between every pair of endpoint nodes (both orders), keyed by name.
    ///
    /// Endpoints default to all tips. Missing branch lengths count as zero.
    pub fn get_distances(&self, endpoints: Option<&[String]>) -> HashMap<(String, String), f64> {
        let endpoints: HashSet<String> = match endpoints {
            Some(endpoints) => endpoints.iter().cloned().collect(),
            None => self.tip_names(self.root()).into_iter().collect(),
        };
        let mut paths_below: HashMap<NodeIdx, Vec<(String, f64)>> = HashMap::new();
        let mut distances = HashMap::new();

        for node in self.postorder(self.root()) {
            let mut paths = Vec::new();
            let mut seen: Vec<(Vec<(String, f64)>, f64)> = Vec::new();
            for child in self.children(node) {
                let child_length = self.length(*child).unwrap_or_default();
                let child_paths = paths_below.remove(child).unwrap_or_default();
                for (name2, path2) in &child_paths {
                    paths.push((name2.clone(), path2 + child_length));
                    for (seen_paths, seen_length) in &seen {
                        for (name1, path1) in seen_paths {
                            let distance = path1 + seen_length + path2 + child_length;
                            distances.insert((name1.clone(), name2.clone()), distance);
                            distances.insert((name2.clone(), name1.clone()), distance);
                        }
                    }
                }
                seen.push((child_paths, child_length));
            }

            let name = self.node(node).name_str();
            if endpoints.contains(name) {
                for (other, path) in &paths {
                    distances.insert((name.to_string(), other.clone()), *path);
                    distances.insert((other.clone(), name.to_string()), *path);
                }
                paths.push((name.to_string(), 0.0));
            }
            paths_below.insert(node, paths);
        }
        distances
    }
}

#[cfg(test)]
#[cfg_attr(coverage, coverage(off))]
mod tests;
