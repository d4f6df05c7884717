use approx::assert_relative_eq;
use assert_matches::assert_matches;
use hashbrown::{HashMap, HashSet};
use nalgebra::{dmatrix, DMatrix};
use rstest::rstest;

use crate::assert_float_relative_slice_eq;
use crate::compare::{TipDistanceMetric, TipSet};
use crate::tree;
use crate::tree::TreeError;

fn tip_set(names: &[&str]) -> TipSet {
    names.iter().map(|name| name.to_string()).collect()
}

#[test]
fn subset_of_tip_is_empty() {
    let tree = tree!("((A,B)x,C);");
    let x = tree.node_matching_name("x").unwrap();
    assert_eq!(tree.subset(x), tip_set(&["A", "B"]));
    let a = tree.node_matching_name("A").unwrap();
    assert!(tree.subset(a).is_empty());
    assert_eq!(tree.subset(tree.root()), tip_set(&["A", "B", "C"]));
}

#[test]
fn subsets_skip_singletons_and_root() {
    let tree = tree!("(((A,B),C),(D,E),F);");
    let subsets: HashSet<TipSet> = tree.subsets(tree.root());
    assert_eq!(subsets.len(), 3);
    assert!(subsets.contains(&tip_set(&["A", "B"])));
    assert!(subsets.contains(&tip_set(&["A", "B", "C"])));
    assert!(subsets.contains(&tip_set(&["D", "E"])));
}

#[rstest]
#[case::identical("((A,B),(C,D));", "((A,B),(C,D));", 0.0)]
#[case::child_order("((A,B),(C,D));", "((D,C),(B,A));", 0.0)]
#[case::conflicting("((A,B),(C,D));", "((A,C),(B,D));", 1.0)]
#[case::partial("((A,B),(C,D));", "((A,B),C,D);", 1.0 / 3.0)]
#[case::disjoint("((A,B),C);", "((D,E),F);", 1.0)]
fn compare_by_subsets(#[case] first: &str, #[case] second: &str, #[case] expected: f64) {
    let first = tree!(first);
    let second = tree!(second);
    assert_relative_eq!(first.compare_by_subsets(&second, false), expected);
    assert_relative_eq!(second.compare_by_subsets(&first, false), expected);
}

#[test]
fn compare_by_subsets_excluding_absent_taxa() {
    let first = tree!("(((A,B),C),D,X);");
    let second = tree!("(((A,B),C),D,Y);");
    assert_relative_eq!(first.compare_by_subsets(&second, false), 0.0);

    let first = tree!("(((A,B),X),C,D);");
    let second = tree!("((A,B),C,D);");
    assert_relative_eq!(first.compare_by_subsets(&second, false), 1.0 / 3.0);
    assert_relative_eq!(first.compare_by_subsets(&second, true), 0.0);
}

#[test]
fn compare_by_subsets_without_bipartitions_is_maximal() {
    let first = tree!("(A,B,C);");
    let second = tree!("(A,B,C);");
    assert_relative_eq!(first.compare_by_subsets(&second, false), 1.0);
    let disjoint = tree!("((D,E),F);");
    assert_relative_eq!(tree!("((A,B),C);").compare_by_subsets(&disjoint, true), 1.0);
}

#[test]
fn tip_to_tip_distances_with_lengths() {
    let tree = tree!("((A:1.0,B:2.0):3.0,C:4.0);");
    let (distances, tips) = tree.tip_to_tip_distances(tree.root(), 1.0);
    let names: Vec<&str> = tips.iter().map(|&tip| tree.node(tip).name_str()).collect();
    assert_eq!(names, vec!["A", "B", "C"]);
    assert_eq!(
        distances,
        dmatrix![0.0, 3.0, 8.0;
                 3.0, 0.0, 9.0;
                 8.0, 9.0, 0.0]
    );
    assert_eq!(distances, distances.transpose());
}

#[test]
fn tip_to_tip_distances_default_length() {
    let tree = tree!("((A,B),(C:2.0,D));");
    let (distances, _) = tree.tip_to_tip_distances(tree.root(), 1.0);
    assert_relative_eq!(distances[(0, 1)], 2.0);
    assert_relative_eq!(distances[(0, 2)], 5.0);
    assert_relative_eq!(distances[(2, 3)], 3.0);
    assert_float_relative_slice_eq(distances.diagonal().as_slice(), &[0.0; 4], 1e-12);
    let (halved, _) = tree.tip_to_tip_distances(tree.root(), 0.5);
    assert_relative_eq!(halved[(0, 1)], 1.0);
}

#[test]
fn tip_to_tip_distances_match_path_distances() {
    let tree = tree!("(((A:0.1,B:0.2):0.3,(C:0.4,D:0.5):0.6):0.7,E:0.8,F:0.9);");
    let (distances, tips) = tree.tip_to_tip_distances(tree.root(), 1.0);
    for (i, &first) in tips.iter().enumerate() {
        for (j, &second) in tips.iter().enumerate() {
            assert_relative_eq!(
                distances[(i, j)],
                tree.distance(first, second).unwrap(),
                epsilon = 1e-12
            );
        }
    }
}

#[rstest]
#[case::identical("((A:1.0,B:1.0):1.0,(C:1.0,D:1.0):1.0);", "((A:1.0,B:1.0):1.0,(C:1.0,D:1.0):1.0);")]
#[case::scaled("((A:1.0,B:1.0):1.0,(C:1.0,D:1.0):1.0);", "((A:2.0,B:2.0):2.0,(C:2.0,D:2.0):2.0);")]
#[case::reordered("((A:1.0,B:2.0):1.0,(C:1.0,D:1.0):3.0);", "((D:1.0,C:1.0):3.0,(B:2.0,A:1.0):1.0);")]
fn compare_by_tip_distances_identical(#[case] first: &str, #[case] second: &str) {
    let first = tree!(first);
    let second = tree!(second);
    for metric in [TipDistanceMetric::FromR, TipDistanceMetric::FromRSquared] {
        assert_relative_eq!(
            first.compare_by_tip_distances(&second, metric).unwrap(),
            0.0,
            epsilon = 1e-12
        );
    }
}

#[test]
fn compare_by_tip_distances_restricts_to_common_tips() {
    let first = tree!("((A:1.0,B:1.0):1.0,(C:1.0,D:1.0):1.0,X:5.0);");
    let second = tree!("((A:1.0,B:1.0):1.0,(C:1.0,D:1.0):1.0,Y:0.1);");
    assert_relative_eq!(
        first
            .compare_by_tip_distances(&second, TipDistanceMetric::default())
            .unwrap(),
        0.0,
        epsilon = 1e-12
    );
}

#[test]
fn compare_by_tip_distances_different_topologies() {
    let first = tree!("((A:1.0,B:1.0):1.0,(C:1.0,D:1.0):1.0);");
    let second = tree!("((A:1.0,C:1.0):1.0,(B:1.0,D:1.0):1.0);");
    let distance = first
        .compare_by_tip_distances(&second, TipDistanceMetric::FromR)
        .unwrap();
    assert!(distance > 0.0);
    assert!(distance <= 1.0);
}

#[test]
fn compare_by_tip_distances_few_common_tips() {
    let first = tree!("(A,B);");
    let second = tree!("((A,B),C);");
    assert_relative_eq!(
        first
            .compare_by_tip_distances(&second, TipDistanceMetric::FromR)
            .unwrap(),
        1.0
    );
}

#[test]
fn compare_by_tip_distances_nothing_in_common() {
    let first = tree!("((A,B),C);");
    let second = tree!("((D,E),F);");
    let error = first
        .compare_by_tip_distances(&second, TipDistanceMetric::FromR)
        .unwrap_err();
    assert_matches!(
        error.downcast_ref::<TreeError>(),
        Some(TreeError::Comparison(_))
    );
}

#[test]
fn metrics_from_correlation() {
    let first = dmatrix![0.0, 1.0; 1.0, 0.0];
    let anti = dmatrix![1.0, 0.0; 0.0, 1.0];
    assert_relative_eq!(TipDistanceMetric::FromR.distance(&first, &first), 0.0);
    assert_relative_eq!(TipDistanceMetric::FromR.distance(&first, &anti), 1.0);
    assert_relative_eq!(TipDistanceMetric::FromRSquared.distance(&first, &anti), 0.0);

    let constant = DMatrix::from_element(2, 2, 3.0);
    assert_relative_eq!(TipDistanceMetric::FromR.distance(&first, &constant), 0.5);
    assert_relative_eq!(TipDistanceMetric::FromRSquared.distance(&first, &constant), 1.0);
}

#[test]
fn descendant_array_rows_and_columns() {
    let tree = tree!("((A,B)x,(C,D)y)root;");
    let (array, nodes) = tree.descendant_array(None);
    let names: Vec<&str> = nodes.iter().map(|&n| tree.node(n).name_str()).collect();
    assert_eq!(names, vec!["root", "x", "y"]);
    assert_eq!(
        array,
        dmatrix![1.0, 1.0, 1.0, 1.0;
                 1.0, 1.0, 0.0, 0.0;
                 0.0, 0.0, 1.0, 1.0]
    );

    let columns = vec!["D".to_string(), "A".to_string()];
    let (array, _) = tree.descendant_array(Some(&columns));
    assert_eq!(array, dmatrix![1.0, 1.0; 0.0, 1.0; 1.0, 0.0]);
}

#[test]
fn get_distances_between_tips() {
    let tree = tree!("((A:1.0,B:2.0):3.0,C:4.0);");
    let distances: HashMap<(String, String), f64> = tree.get_distances(None);
    assert_eq!(distances.len(), 6);
    let key = |a: &str, b: &str| (a.to_string(), b.to_string());
    assert_relative_eq!(distances[&key("A", "B")], 3.0);
    assert_relative_eq!(distances[&key("B", "A")], 3.0);
    assert_relative_eq!(distances[&key("A", "C")], 8.0);
    assert_relative_eq!(distances[&key("C", "B")], 9.0);
}

#[test]
fn get_distances_with_internal_endpoint() {
    let tree = tree!("((A:1.0,B:2.0)x:3.0,C)root;");
    let endpoints = vec!["A".to_string(), "x".to_string(), "C".to_string()];
    let distances = tree.get_distances(Some(&endpoints));
    let key = |a: &str, b: &str| (a.to_string(), b.to_string());
    assert_eq!(distances.len(), 6);
    assert_relative_eq!(distances[&key("x", "A")], 1.0);
    assert_relative_eq!(distances[&key("A", "C")], 4.0);
    assert_relative_eq!(distances[&key("C", "x")], 3.0);
    assert!(!distances.contains_key(&key("A", "B")));
}
