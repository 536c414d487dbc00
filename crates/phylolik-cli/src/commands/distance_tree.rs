use super::Inputs;
use crate::cli::DistanceTreeArgs;
use crate::config::PartialConfig;
use crate::error::Result;
use crate::io;
use crate::utils::progress::CliProgressHandler;
use phylolik::engine::distance::DistanceEstimation;
use phylolik::engine::progress::ProgressReporter;
use phylolik::workflows;
use tracing::info;

pub fn run(args: DistanceTreeArgs, progress_handler: &CliProgressHandler) -> Result<()> {
    let config = PartialConfig::load(&args.model)?;
    let distance = config.distance_tree_config(&args)?;
    let inputs = Inputs::load(&args.model, &config)?;

    let mut estimation = DistanceEstimation::new(inputs.model, inputs.rate_distribution, inputs.alignment)
        .with_stop_condition(distance.tolerance, distance.max_evaluations);
    let reporter = ProgressReporter::with_callback(progress_handler.get_callback());

    println!(
        "Building a {} tree with the '{}' distance method...",
        format!("{:?}", distance.reconstruction).to_uppercase(),
        distance.method
    );
    let result = workflows::distance_tree::build_distance_tree(&mut estimation, &distance, &reporter)?;
    info!(
        iterations = result.iterations,
        last_distance = ?result.last_distance,
        "Workflow finished."
    );

    println!("Trees built: {}", result.iterations);
    if let Some(distance) = result.last_distance {
        println!("Robinson-Foulds distance to the previous tree: {}", distance);
    }
    for parameter in estimation
        .model()
        .parameters()
        .iter()
        .chain(estimation.rate_distribution().parameters().iter())
    {
        println!("  {:<12} {:.6}", parameter.name(), parameter.value());
    }

    io::write_tree(&args.output, &result.tree)?;
    println!("✓ Distance tree written to: {}", args.output.display());
    Ok(())
}
