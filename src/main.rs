use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use tree_incompat::incompat::{incompatibilities, incompatibilities_parallel};
use tree_incompat::io::{read_trees, write_newick_lines, write_relation_tsv};
use tree_incompat::newick::{all_reroots, to_newick, WriteOptions};
use tree_incompat::snapshot::PairSnapshot;
use tree_incompat::tree::Tree;

/// Compare the clades of two rooted trees over the same leaf labels
/// and report which node pairs cannot coexist in a single tree.
#[derive(Parser, Debug)]
#[command(
    name = "tree-incompat",
    version,
    about = "Pairwise clade incompatibility between two rooted trees"
)]
struct Cli {
    /// Quiet mode: only warnings and errors are logged (RUST_LOG overrides)
    #[arg(short = 'q', long = "quiet", global = true, default_value_t = false)]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Compute the incompatible node pairs of the first tree of each file
    Incompat {
        /// Newick or NEXUS file holding tree 1
        #[arg(short = 'a', long = "first")]
        first: PathBuf,

        /// Newick or NEXUS file holding tree 2
        #[arg(short = 'b', long = "second")]
        second: PathBuf,

        /// Output path for the TSV of incompatible pairs (`.gz` compresses, `-` is stdout)
        #[arg(short = 'o', long = "output")]
        output: Option<PathBuf>,

        /// Run on a single thread
        #[arg(long = "serial", default_value_t = false)]
        serial: bool,
    },

    /// Write the tree rooted on every edge, one Newick line per non-root node
    Reroots {
        /// Newick or NEXUS file; its first tree is used
        #[arg(short = 'i', long = "input")]
        input: PathBuf,

        /// Output path (`-` is stdout)
        #[arg(short = 'o', long = "output", default_value = "-")]
        output: PathBuf,
    },

    /// Parse every tree of a file and write it back in normalized form
    Format {
        /// Newick or NEXUS file
        #[arg(short = 'i', long = "input")]
        input: PathBuf,

        /// Output path (`-` is stdout)
        #[arg(short = 'o', long = "output", default_value = "-")]
        output: PathBuf,

        /// Write branch lengths
        #[arg(long = "branch-lengths", default_value_t = false)]
        branch_lengths: bool,

        /// Leave out the labels of internal nodes
        #[arg(long = "no-internal-labels", default_value_t = false)]
        no_internal_labels: bool,
    },
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.quiet);

    match cli.command {
        Command::Incompat { first, second, output, serial } => {
            run_incompat(&first, &second, output.as_deref(), serial)
        }
        Command::Reroots { input, output } => run_reroots(&input, &output),
        Command::Format { input, output, branch_lengths, no_internal_labels } => {
            let options = WriteOptions { branch_lengths, internal_labels: !no_internal_labels };
            run_format(&input, &output, options)
        }
    }
}

fn init_tracing(quiet: bool) {
    let default = if quiet { "warn" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn run_incompat(first_path: &Path, second_path: &Path, output: Option<&Path>, serial: bool) {
    let t0 = Instant::now();
    let first = first_tree_or_exit(first_path);
    let second = first_tree_or_exit(second_path);
    info!(
        leaves = first.num_leaves(first.root()),
        nodes_first = first.num_nodes(),
        nodes_second = second.num_nodes(),
        "Reading in trees {:.3}s",
        t0.elapsed().as_secs_f64()
    );

    let t1 = Instant::now();
    let snap = match PairSnapshot::from_trees(&first, &second) {
        Ok(s) => s,
        Err(e) => {
            error!("Failed to build clade bitmaps: {e}");
            std::process::exit(3);
        }
    };
    info!("Creating clade bitmaps {:.3}s", t1.elapsed().as_secs_f64());

    let t2 = Instant::now();
    let relation = if serial {
        incompatibilities(&snap)
    } else {
        incompatibilities_parallel(&snap)
    };
    info!(
        nb_incompat = relation.len(),
        pairs = relation.pair_count(),
        "Determining incompatibilities {:.3}s",
        t2.elapsed().as_secs_f64()
    );

    if let Some(path) = output {
        let t3 = Instant::now();
        if let Err(e) = write_relation_tsv(path, (&first, &second), &snap, &relation) {
            error!("Failed to write output {:?}: {e}", path);
            std::process::exit(4);
        }
        info!("Writing to output {:.3}s", t3.elapsed().as_secs_f64());
    }
}

fn run_reroots(input: &Path, output: &Path) {
    let tree = first_tree_or_exit(input);

    let t0 = Instant::now();
    let lines = all_reroots(&tree);
    info!(trees = lines.len(), "Rerooting {:.3}s", t0.elapsed().as_secs_f64());

    write_lines_or_exit(output, &lines);
}

fn run_format(input: &Path, output: &Path, options: WriteOptions) {
    let trees = trees_or_exit(input);
    let lines: Vec<String> = trees.iter().map(|tree| to_newick(tree, options)).collect();
    write_lines_or_exit(output, &lines);
}

fn trees_or_exit(path: &Path) -> Vec<Tree> {
    match read_trees(path) {
        Ok(trees) => trees,
        Err(e) => {
            error!("{e}");
            std::process::exit(2);
        }
    }
}

fn first_tree_or_exit(path: &Path) -> Tree {
    let mut trees = trees_or_exit(path).into_iter();
    let Some(first) = trees.next() else {
        error!("No trees parsed from {:?}.", path);
        std::process::exit(2);
    };
    let skipped = trees.count();
    if skipped > 0 {
        warn!("{:?} holds {} more trees, using the first", path, skipped);
    }
    first
}

fn write_lines_or_exit(output: &Path, lines: &[String]) {
    if let Err(e) = write_newick_lines(output, lines) {
        error!("Failed to write output {:?}: {e}", output);
        std::process::exit(4);
    }
}
