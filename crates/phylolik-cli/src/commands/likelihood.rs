use super::{Inputs, print_parameters};
use crate::cli::LikelihoodArgs;
use crate::config::PartialConfig;
use crate::error::Result;
use crate::io;
use tracing::info;

pub fn run(args: LikelihoodArgs) -> Result<()> {
    let config = PartialConfig::load(&args.model)?;
    let inputs = Inputs::load(&args.model, &config)?;
    let tree = io::read_tree(&args.tree)?;

    info!("Computing the likelihood on {:?}", &args.tree);
    let likelihood = inputs.into_likelihood(tree)?;

    println!("Log likelihood: {:.6}", likelihood.log_likelihood());
    print_parameters(&likelihood);

    if let Some(path) = &args.per_site {
        io::write_site_likelihoods(path, &likelihood)?;
        println!("✓ Per-site likelihoods written to: {}", path.display());
    }
    Ok(())
}
