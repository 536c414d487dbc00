pub mod distance_tree;
pub mod likelihood;
pub mod optimize;

use crate::cli::ModelArgs;
use crate::config::{ModelSettings, PartialConfig};
use crate::error::Result;
use crate::io;
use phylolik::core::alphabet::Alphabet;
use phylolik::core::data::Alignment;
use phylolik::core::models::{DiscreteDistribution, SubstitutionModel};
use phylolik::core::tree::Tree;
use phylolik::engine::error::EngineError;
use phylolik::engine::likelihood::PhyloLikelihood;
use tracing::info;

/// Alignment, substitution model and rate distribution shared by every
/// subcommand.
pub struct Inputs {
    pub alignment: Alignment,
    pub model: Box<dyn SubstitutionModel>,
    pub rate_distribution: Box<dyn DiscreteDistribution>,
}

impl Inputs {
    pub fn load(args: &ModelArgs, config: &PartialConfig) -> Result<Self> {
        let settings = config.model_settings(args)?;
        let alignment = io::read_fasta(&args.sequences, Alphabet::from(args.alphabet))?;
        Self::from_settings(&settings, alignment)
    }

    fn from_settings(settings: &ModelSettings, alignment: Alignment) -> Result<Self> {
        let model = settings
            .model
            .instantiate(alignment.alphabet(), Some(&alignment))
            .map_err(EngineError::from)?;
        let rate_distribution = settings
            .rate_distribution
            .instantiate()
            .map_err(EngineError::from)?;
        info!(
            model = settings.model.model.name(),
            rate_distribution = %settings.rate_distribution.kind,
            classes = rate_distribution.number_of_categories(),
            "Model instantiated."
        );
        Ok(Self {
            alignment,
            model: Box::new(model),
            rate_distribution,
        })
    }

    /// Builds a likelihood where the model serves every branch of `tree`.
    pub fn into_likelihood(self, tree: Tree) -> Result<PhyloLikelihood> {
        let likelihood = PhyloLikelihood::homogeneous(tree, self.alignment, self.model, self.rate_distribution)?;
        info!(log_likelihood = likelihood.log_likelihood(), "Likelihood computed.");
        Ok(likelihood)
    }
}

/// Prints the model and rate parameters of a likelihood.
pub fn print_parameters(likelihood: &PhyloLikelihood) {
    for parameter in likelihood
        .substitution_model_parameters()
        .iter()
        .chain(likelihood.root_frequencies_parameters().iter())
        .chain(likelihood.rate_distribution_parameters().iter())
    {
        println!("  {:<12} {:.6}", parameter.name(), parameter.value());
    }
}
