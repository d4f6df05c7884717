use std::fmt;
use std::path::PathBuf;

use anyhow::bail;
use clap::{Parser, Subcommand, ValueEnum};
use log::LevelFilter;

use phylotree::compare::TipDistanceMetric;
use phylotree::io::TreeFormat;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub(super) struct Cli {
    /// Tree file in newick or xml format
    #[arg(short, long, value_name = "TREE_FILE")]
    pub(super) tree_file: PathBuf,

    /// Read underscores in newick labels as spaces
    #[arg(short, long)]
    pub(super) underscore_unmunge: bool,

    /// Print debug output
    #[arg(short, long)]
    pub(super) verbose: bool,

    #[command(subcommand)]
    pub(super) command: Commands,
}

#[derive(Subcommand)]
pub(super) enum Commands {
    /// Computes the distance between the tree and a second tree
    Compare {
        /// Second tree file in newick or xml format
        #[arg(short, long, value_name = "OTHER_TREE_FILE")]
        other: PathBuf,

        /// Comparison method
        #[arg(short, long, value_enum, default_value_t = CompareMethod::Subsets)]
        method: CompareMethod,

        /// Only compare bipartitions over the tips present in both trees
        #[arg(long)]
        exclude_absent: bool,

        /// Use 1 - r^2 instead of (1 - r) / 2 for tip distance comparison
        #[arg(long)]
        r_squared: bool,
    },
    /// Re-roots the tree
    Reroot {
        /// Internal node to use as the new root
        #[arg(long, value_name = "NODE")]
        at: Option<String>,

        /// Tip that should hang directly off the new root
        #[arg(long, value_name = "TIP")]
        with_tip: Option<String>,

        /// Root where no neighbouring subtree holds most of the edges
        #[arg(long)]
        balanced: bool,

        /// Output file, the tree is printed if not given
        #[arg(short, long, value_name = "OUTPUT_FILE")]
        output: Option<PathBuf>,
    },
    /// Writes the tree in another format
    Convert {
        /// Output file, the tree is printed if not given
        #[arg(short, long, value_name = "OUTPUT_FILE")]
        output: Option<PathBuf>,

        /// Output format (newick or xml), inferred from the output file name if not given
        #[arg(short, long, value_name = "FORMAT")]
        format: Option<TreeFormat>,

        /// Leave branch lengths out of newick output
        #[arg(long)]
        no_lengths: bool,
    },
    /// Prints an ascii drawing of the tree
    Draw {
        /// One line per tip
        #[arg(long)]
        compact: bool,

        /// Leave out internal node names
        #[arg(long)]
        hide_internal: bool,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub(super) enum CompareMethod {
    Subsets,
    TipDistances,
}

#[derive(Debug, PartialEq)]
pub(super) enum Rooting {
    At(String),
    WithTip(String),
    Balanced,
}

#[derive(Debug, PartialEq)]
pub(super) enum Task {
    CompareBySubsets {
        other: PathBuf,
        exclude_absent: bool,
    },
    CompareByTipDistances {
        other: PathBuf,
        metric: TipDistanceMetric,
    },
    Reroot {
        rooting: Rooting,
        output: Option<PathBuf>,
    },
    Convert {
        output: Option<PathBuf>,
        format: Option<TreeFormat>,
        with_distances: bool,
    },
    Draw {
        show_internal: bool,
        compact: bool,
    },
}

#[derive(Debug)]
pub(super) struct Config {
    pub(super) tree_file: PathBuf,
    pub(super) underscore_unmunge: bool,
    pub(super) log_level: LevelFilter,
    pub(super) task: Task,
}

impl fmt::Display for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Tree file: {}", self.tree_file.display())?;
        writeln!(f, "Underscore unmunging: {}", self.underscore_unmunge)?;
        write!(f, "Task: {:?}", self.task)
    }
}

pub(super) struct ConfigBuilder {
    cli: Cli,
}

impl From<Cli> for ConfigBuilder {
    fn from(cli: Cli) -> Self {
        ConfigBuilder { cli }
    }
}

impl ConfigBuilder {
    /// Checks option combinations the argument parser cannot express and settles defaults.
    pub(super) fn setup(self) -> anyhow::Result<Config> {
        let cli = self.cli;
        if !cli.tree_file.exists() {
            bail!("Tree file {} does not exist", cli.tree_file.display());
        }
        let task = match cli.command {
            Commands::Compare {
                other,
                method,
                exclude_absent,
                r_squared,
            } => {
                if !other.exists() {
                    bail!("Tree file {} does not exist", other.display());
                }
                match method {
                    CompareMethod::Subsets => {
                        if r_squared {
                            bail!("--r-squared only applies to tip distance comparison");
                        }
                        Task::CompareBySubsets {
                            other,
                            exclude_absent,
                        }
                    }
                    CompareMethod::TipDistances => {
                        if exclude_absent {
                            bail!("--exclude-absent only applies to subset comparison");
                        }
                        let metric = if r_squared {
                            TipDistanceMetric::FromRSquared
                        } else {
                            TipDistanceMetric::FromR
                        };
                        Task::CompareByTipDistances { other, metric }
                    }
                }
            }
            Commands::Reroot {
                at,
                with_tip,
                balanced,
                output,
            } => {
                let rooting = match (at, with_tip, balanced) {
                    (Some(node), None, false) => Rooting::At(node),
                    (None, Some(tip), false) => Rooting::WithTip(tip),
                    (None, None, true) => Rooting::Balanced,
                    _ => bail!("Exactly one of --at, --with-tip or --balanced must be given"),
                };
                Task::Reroot { rooting, output }
            }
            Commands::Convert {
                output,
                format,
                no_lengths,
            } => Task::Convert {
                output,
                format,
                with_distances: !no_lengths,
            },
            Commands::Draw {
                compact,
                hide_internal,
            } => Task::Draw {
                show_internal: !hide_internal,
                compact,
            },
        };
        Ok(Config {
            tree_file: cli.tree_file,
            underscore_unmunge: cli.underscore_unmunge,
            log_level: if cli.verbose {
                LevelFilter::Debug
            } else {
                LevelFilter::Info
            },
            task,
        })
    }
}
