use std::hint::black_box;
use std::time::Duration;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use phylotree::compare::TipDistanceMetric;
use phylotree::tree::{Param, Params, Tree, TreeBuilder, LENGTH_KEY};

const SIZES: [usize; 3] = [100, 1_000, 10_000];

fn with_length(length: f64) -> Params {
    Params::from([(LENGTH_KEY.to_string(), Param::Float(length))])
}

/// Each tip hangs off the spine one level deeper than the last.
fn comb(num_tips: usize) -> Tree {
    let mut builder = TreeBuilder::new();
    let mut spine = builder.create_edge(Vec::new(), Some("t0"), with_length(1.0), true);
    for i in 1..num_tips {
        let tip = builder.create_edge(Vec::new(), Some(&format!("t{i}")), with_length(1.0), true);
        spine = builder.create_edge(vec![tip, spine], None, with_length(1.0), false);
    }
    builder.build(spine)
}

/// Joins random pairs of subtrees until one is left, so the shape and lengths vary per seed.
fn random_tree(num_tips: usize, seed: u64) -> Tree {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut builder = TreeBuilder::new();
    let mut pool: Vec<_> = (0..num_tips)
        .map(|i| {
            let length = rng.gen_range(0.01..1.0);
            builder.create_edge(Vec::new(), Some(&format!("t{i}")), with_length(length), true)
        })
        .collect();
    while pool.len() > 1 {
        let first = pool.swap_remove(rng.gen_range(0..pool.len()));
        let second = pool.swap_remove(rng.gen_range(0..pool.len()));
        let length = rng.gen_range(0.01..1.0);
        pool.push(builder.create_edge(vec![first, second], None, with_length(length), false));
    }
    builder.build(pool[0])
}

fn deep_traversal(criterion: &mut Criterion) {
    let mut group = criterion.benchmark_group("comb traversal");
    for size in SIZES {
        let tree = black_box(comb(size));
        group.bench_with_input(BenchmarkId::new("postorder", size), &tree, |bench, tree| {
            bench.iter(|| tree.postorder(tree.root()).count());
        });
        group.bench_with_input(BenchmarkId::new("newick", size), &tree, |bench, tree| {
            bench.iter(|| tree.newick(true).len());
        });
    }
    group.finish();
}

fn tip_distances(criterion: &mut Criterion) {
    let mut group = criterion.benchmark_group("tip distances");
    for size in SIZES {
        let tree = black_box(random_tree(size, 42));
        group.bench_with_input(BenchmarkId::new("matrix", size), &tree, |bench, tree| {
            bench.iter(|| tree.tip_to_tip_distances(tree.root(), 1.0));
        });
    }
    group.finish();
}

fn compare_trees(criterion: &mut Criterion) {
    let mut group = criterion.benchmark_group("tree comparison");
    for size in [100, 1_000] {
        let first = black_box(random_tree(size, 1));
        let second = black_box(random_tree(size, 2));
        group.bench_function(BenchmarkId::new("subsets", size), |bench| {
            bench.iter(|| first.compare_by_subsets(&second, false));
        });
        group.bench_function(BenchmarkId::new("tip distances", size), |bench| {
            bench.iter(|| {
                first
                    .compare_by_tip_distances(&second, TipDistanceMetric::FromR)
                    .expect("random trees share all tips")
            });
        });
    }
    group.finish();
}

criterion_group! {
name = traversal;
config = Criterion::default().measurement_time(Duration::from_secs(10)).sample_size(20);
targets = deep_traversal, tip_distances, compare_trees
}
criterion_main!(traversal);
