use super::optimize::{NumericalOptions, optimize_numerical_parameters};
use crate::core::tree::{Tree, robinson_foulds_distance};
use crate::engine::config::{DistanceMethod, DistanceTreeConfig};
use crate::engine::distance::DistanceEstimation;
use crate::engine::error::EngineError;
use crate::engine::function::{Function, TracingListener};
use crate::engine::likelihood::PhyloLikelihood;
use crate::engine::progress::ProgressReporter;
use tracing::{info, instrument};

/// Outcome of [`build_distance_tree`].
#[derive(Debug, Clone, PartialEq)]
pub struct DistanceTreeResult {
    pub tree: Tree,
    /// Number of trees built.
    pub iterations: usize,
    /// Robinson-Foulds distance between the last two trees, if more than one
    /// was built.
    pub last_distance: Option<usize>,
}

/// Builds a tree from pairwise distances.
///
/// With [`DistanceMethod::Pairwise`], model and rate parameters that are not
/// ignored are re-estimated for every pair. With
/// [`DistanceMethod::Iterations`], the parameters are re-estimated by
/// maximum likelihood on each tree built, and the matrix and tree are
/// computed again until two successive trees have the same topology or the
/// iteration cap is reached. The estimation keeps the last parameter values.
#[instrument(skip_all, name = "distance_tree_workflow")]
pub fn build_distance_tree(
    estimation: &mut DistanceEstimation,
    config: &DistanceTreeConfig,
    reporter: &ProgressReporter,
) -> Result<DistanceTreeResult, EngineError> {
    estimation.reset_additional_parameters();
    if config.method == DistanceMethod::Pairwise {
        let mut names = estimation.model().parameters().names();
        names.extend(estimation.rate_distribution().parameters().names());
        names.retain(|n| !config.ignore_parameters.contains(n));
        estimation.set_additional_parameters(names);
    }

    let mut previous: Option<Tree> = None;
    let mut last_distance = None;
    let mut iterations = 0;
    loop {
        let matrix = reporter.phase("Estimating distance matrix", || estimation.compute_matrix(reporter))?;
        let tree = reporter.phase("Building tree", || config.reconstruction.build(&matrix))?;
        iterations += 1;

        if let Some(previous) = &previous {
            let distance = robinson_foulds_distance(previous, &tree)?;
            info!(iteration = iterations, distance, "Topological distance with previous iteration.");
            last_distance = Some(distance);
            if distance == 0 {
                return Ok(DistanceTreeResult {
                    tree,
                    iterations,
                    last_distance,
                });
            }
        }
        if config.method != DistanceMethod::Iterations || iterations >= config.max_iterations {
            return Ok(DistanceTreeResult {
                tree,
                iterations,
                last_distance,
            });
        }

        reporter.phase("Re-estimating parameters", || reestimate(estimation, &tree, config))?;
        previous = Some(tree);
    }
}

/// Fits the model and rate parameters on `tree` and stores them in the
/// estimation.
fn reestimate(estimation: &mut DistanceEstimation, tree: &Tree, config: &DistanceTreeConfig) -> Result<(), EngineError> {
    let mut likelihood = PhyloLikelihood::homogeneous(
        tree.clone(),
        estimation.data().clone(),
        estimation.model().clone_box(),
        estimation.rate_distribution().clone_box(),
    )?;
    let branches = likelihood.branch_lengths_parameters().names();
    let names: Vec<String> = likelihood
        .parameters()
        .names()
        .into_iter()
        .filter(|n| config.optimize_branch_lengths || !branches.contains(n))
        .filter(|n| !config.ignore_parameters.contains(n))
        .collect();
    let options = NumericalOptions::default()
        .with_tolerance(config.tolerance)
        .with_max_evaluations(config.max_evaluations);
    optimize_numerical_parameters(&mut likelihood, &names, &mut TracingListener, &options)?;

    estimation.update_parameters(&likelihood.substitution_model_parameters())?;
    estimation.update_parameters(&likelihood.rate_distribution_parameters())?;
    for parameter in likelihood.substitution_model_parameters().iter() {
        info!(parameter = parameter.name(), value = parameter.value(), "Re-estimated.");
    }
    for parameter in likelihood.rate_distribution_parameters().iter() {
        info!(parameter = parameter.name(), value = parameter.value(), "Re-estimated.");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::alphabet::Alphabet;
    use crate::core::models::{ConstantDistribution, NucleotideModel, NucleotideModelKind};
    use crate::core::tree::{ReconstructionMethod, parse_newick};
    use crate::engine::config::DistanceTreeConfigBuilder;
    use crate::engine::likelihood::tests::five_taxa;

    fn estimation() -> DistanceEstimation {
        DistanceEstimation::new(
            Box::new(NucleotideModel::new(NucleotideModelKind::K80, Alphabet::Dna)),
            Box::new(ConstantDistribution::new()),
            five_taxa(),
        )
    }

    fn config(method: DistanceMethod) -> DistanceTreeConfig {
        DistanceTreeConfigBuilder::new()
            .method(method)
            .reconstruction(ReconstructionMethod::Nj)
            .tolerance(1e-4)
            .max_iterations(5)
            .build()
            .unwrap()
    }

    #[test]
    fn init_builds_a_single_tree() {
        let mut estimation = estimation();
        let result = build_distance_tree(&mut estimation, &config(DistanceMethod::Init), &ProgressReporter::new()).unwrap();
        assert_eq!(result.iterations, 1);
        assert_eq!(result.last_distance, None);
        let mut names = result.tree.leaf_names();
        names.sort();
        assert_eq!(names, vec!["A", "B", "C", "D", "E"]);
        let expected = parse_newick("((A,B),C,(D,E));").unwrap();
        assert_eq!(robinson_foulds_distance(&result.tree, &expected).unwrap(), 0);
    }

    #[test]
    fn iterations_stop_on_a_stable_topology() {
        let mut estimation = estimation();
        let result =
            build_distance_tree(&mut estimation, &config(DistanceMethod::Iterations), &ProgressReporter::new()).unwrap();
        assert!(result.iterations >= 2 && result.iterations <= 5);
        if result.iterations < 5 {
            assert_eq!(result.last_distance, Some(0));
        }
        // kappa was fitted on the tree and kept.
        assert_ne!(estimation.model().parameter_value("kappa").unwrap(), 2.0);
    }

    #[test]
    fn pairwise_respects_ignored_parameters() {
        let mut estimation = estimation();
        let config = DistanceTreeConfigBuilder::new()
            .method(DistanceMethod::Pairwise)
            .reconstruction(ReconstructionMethod::Upgma)
            .ignore_parameter("kappa")
            .build()
            .unwrap();
        build_distance_tree(&mut estimation, &config, &ProgressReporter::new()).unwrap();
        assert!(estimation.additional_parameters().is_empty());
    }
}
