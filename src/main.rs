use std::path::Path;
use std::result::Result::Ok;

use anyhow::{anyhow, bail, Error};
use clap::Parser;
use ftail::Ftail;
use log::{debug, info};

use phylotree::compare::TipDistanceMetric;
use phylotree::io::{read_tree_from_file, write_tree_to_file, TreeFormat, TreeLoader};
use phylotree::tree::Tree;

mod cli;
use crate::cli::{Cli, ConfigBuilder, Rooting, Task};

type Result<T> = std::result::Result<T, Error>;

fn main() -> Result<()> {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(error) => {
            bail!("Unable to parse command line arguments: \n {}", error)
        }
    };
    let cfg_build: ConfigBuilder = cli.into();
    let cfg = cfg_build.setup()?;

    Ftail::new()
        .console(cfg.log_level)
        .init()
        .map_err(|error| anyhow!("Unable to set up logging: {:?}", error))?;

    info!("Phylotree run started.");
    info!("{}", cfg);

    let tree = TreeLoader::new()
        .filename(&cfg.tree_file)
        .underscore_unmunge(cfg.underscore_unmunge)
        .build()?;
    debug!("Loaded tree: {}", tree);

    match cfg.task {
        Task::CompareBySubsets {
            other,
            exclude_absent,
        } => {
            let other = read_tree_from_file(&other)?;
            println!("{}", tree.compare_by_subsets(&other, exclude_absent));
        }
        Task::CompareByTipDistances { other, metric } => {
            let other = read_tree_from_file(&other)?;
            compare_by_tip_distances(&tree, &other, metric)?;
        }
        Task::Reroot { rooting, output } => {
            let rerooted = match rooting {
                Rooting::At(name) => tree.rooted_at(&name)?,
                Rooting::WithTip(name) => tree.rooted_with_tip(&name)?,
                Rooting::Balanced => tree.balanced(),
            };
            emit(&rerooted, output.as_deref(), true, None)?;
        }
        Task::Convert {
            output,
            format,
            with_distances,
        } => emit(&tree, output.as_deref(), with_distances, format)?,
        Task::Draw {
            show_internal,
            compact,
        } => println!("{}", tree.ascii_art(show_internal, compact)),
    }
    info!("Phylotree run finished.");
    Ok(())
}

fn compare_by_tip_distances(tree: &Tree, other: &Tree, metric: TipDistanceMetric) -> Result<()> {
    let distance = tree.compare_by_tip_distances(other, metric)?;
    info!("Tip distance comparison with {:?}: {}", metric, distance);
    println!("{}", distance);
    Ok(())
}

fn emit(
    tree: &Tree,
    output: Option<&Path>,
    with_distances: bool,
    format: Option<TreeFormat>,
) -> Result<()> {
    match output {
        Some(path) => {
            info!("Putting resulting tree in {}", path.display());
            write_tree_to_file(tree, path, with_distances, format)
        }
        None => {
            match format {
                Some(TreeFormat::Xml) => println!("{}", tree.xml()),
                _ => println!("{}", tree.newick(with_distances)),
            }
            Ok(())
        }
    }
}
