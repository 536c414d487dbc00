use clap::{Args, Parser, Subcommand, ValueEnum};
use phylolik::core::alphabet::Alphabet;
use phylolik::core::models::NucleotideModelKind;
use phylolik::core::tree::ReconstructionMethod;
use phylolik::engine::config::{DistanceMethod, NniMethod, OptimizationMethod, RateDistributionKind};
use std::path::PathBuf;

const HELP_TEMPLATE: &str = "\
{before-help}{name} {version}
{author-with-newline}{about-with-newline}
{usage-heading} {usage}

{all-args}{after-help}
";

#[derive(Parser, Debug)]
#[command(
    author = "Tony Kan, Ted Yu, William A. Goddard III, Victor Wai Tak Kam",
    version,
    about = "phylolik CLI - Maximum-likelihood phylogenetics on nucleotide alignments: likelihood evaluation, parameter and topology optimization, distance trees.",
    help_template = HELP_TEMPLATE,
)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Increase verbosity level (-v for INFO, -vv for DEBUG, -vvv for TRACE)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all log output except for errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Write logs to a specified file in addition to the console output
    #[arg(long, global = true, value_name = "PATH")]
    pub log_file: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Compute the log-likelihood of an alignment on a fixed tree.
    Likelihood(LikelihoodArgs),
    /// Optimize branch lengths, model parameters and optionally the topology.
    Optimize(OptimizeArgs),
    /// Build a tree from maximum-likelihood pairwise distances.
    DistanceTree(DistanceTreeArgs),
}

/// Sequence type of the input alignment.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SequenceType {
    #[default]
    Dna,
    Rna,
}

impl From<SequenceType> for Alphabet {
    fn from(value: SequenceType) -> Self {
        match value {
            SequenceType::Dna => Alphabet::Dna,
            SequenceType::Rna => Alphabet::Rna,
        }
    }
}

/// Inputs and model settings shared by every subcommand.
#[derive(Args, Debug)]
pub struct ModelArgs {
    /// Path to the aligned sequences in FASTA format.
    #[arg(short = 's', long, required = true, value_name = "PATH")]
    pub sequences: PathBuf,

    /// Sequence type of the alignment.
    #[arg(long, value_enum, default_value_t = SequenceType::Dna)]
    pub alphabet: SequenceType,

    /// Path to a configuration file in TOML format.
    #[arg(short, long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Override the substitution model (JCnuc, K80, T92, HKY85, TN93, GTR).
    #[arg(short, long, value_name = "NAME")]
    pub model: Option<NucleotideModelKind>,

    /// Override the rate distribution family (constant, gamma).
    #[arg(long, value_name = "KIND")]
    pub rate_distribution: Option<RateDistributionKind>,

    /// Override the shape of the gamma rate distribution.
    #[arg(long, value_name = "FLOAT")]
    pub alpha: Option<f64>,

    /// Override the number of gamma rate classes.
    #[arg(long, value_name = "INT")]
    pub classes: Option<usize>,

    /// Set a specific configuration value, overriding the config file.
    /// Can be used multiple times. Example: -S optimization.tolerance=1e-4
    #[arg(short = 'S', long = "set", value_name = "KEY=VALUE", num_args(0..))]
    pub set_values: Vec<String>,
}

/// Arguments for the `likelihood` subcommand.
#[derive(Args, Debug)]
pub struct LikelihoodArgs {
    #[command(flatten)]
    pub model: ModelArgs,

    /// Path to the tree in Newick format.
    #[arg(short, long, required = true, value_name = "PATH")]
    pub tree: PathBuf,

    /// Write per-site log-likelihoods and posterior rates to a CSV file.
    #[arg(long, value_name = "PATH")]
    pub per_site: Option<PathBuf>,
}

/// Arguments for the `optimize` subcommand.
#[derive(Args, Debug)]
pub struct OptimizeArgs {
    #[command(flatten)]
    pub model: ModelArgs,

    /// Path to the starting tree in Newick format.
    #[arg(short, long, required = true, value_name = "PATH")]
    pub tree: PathBuf,

    /// Path for the optimized tree in Newick format.
    #[arg(short, long, required = true, value_name = "PATH")]
    pub output: PathBuf,

    /// Write the estimated parameters and log-likelihoods to a TOML file.
    #[arg(long, value_name = "PATH")]
    pub report: Option<PathBuf>,

    /// Override the derivative-based optimizer (gradient, newton).
    #[arg(long, value_name = "METHOD")]
    pub method: Option<OptimizationMethod>,

    /// Override the optimization tolerance.
    #[arg(long, value_name = "FLOAT")]
    pub tolerance: Option<f64>,

    /// Override the maximum number of likelihood evaluations.
    #[arg(long, value_name = "INT")]
    pub max_evaluations: Option<usize>,

    /// Skip the initial rescaling of the tree.
    #[arg(long)]
    pub no_scale_first: bool,

    /// Search the topology with nearest-neighbor interchanges (fast, better).
    #[arg(long, value_name = "METHOD")]
    pub nni: Option<NniMethod>,

    /// Optimize all parameters with one optimizer and numerical derivatives.
    #[arg(long)]
    pub numerical_derivatives: bool,

    /// Optimize constrained parameters on an unconstrained scale.
    #[arg(long)]
    pub reparametrization: bool,

    /// Parameter to keep fixed. Can be used multiple times.
    #[arg(long = "ignore", value_name = "NAME")]
    pub ignore_parameters: Vec<String>,

    /// File receiving the diagnostic dump when the likelihood becomes NaN.
    #[arg(long, value_name = "PATH")]
    pub nan_dump: Option<PathBuf>,
}

/// Arguments for the `distance-tree` subcommand.
#[derive(Args, Debug)]
pub struct DistanceTreeArgs {
    #[command(flatten)]
    pub model: ModelArgs,

    /// Path for the reconstructed tree in Newick format.
    #[arg(short, long, required = true, value_name = "PATH")]
    pub output: PathBuf,

    /// Override how model parameters are re-estimated (init, pairwise, iterations).
    #[arg(long, value_name = "METHOD")]
    pub method: Option<DistanceMethod>,

    /// Override the reconstruction method (nj, upgma).
    #[arg(long, value_name = "METHOD", value_parser = parse_reconstruction)]
    pub reconstruction: Option<ReconstructionMethod>,

    /// Override the maximum number of trees built with `iterations`.
    #[arg(long, value_name = "INT")]
    pub max_iterations: Option<usize>,
}

pub fn parse_reconstruction(value: &str) -> std::result::Result<ReconstructionMethod, String> {
    match value.to_ascii_lowercase().as_str() {
        "nj" => Ok(ReconstructionMethod::Nj),
        "upgma" => Ok(ReconstructionMethod::Upgma),
        other => Err(format!("unknown reconstruction method '{other}', expected 'nj' or 'upgma'")),
    }
}
