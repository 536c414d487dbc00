use super::optimize::{NumericalOptions, optimize_numerical_parameters, optimize_numerical_parameters2};
use crate::core::parameters::ParameterList;
use crate::engine::config::TopologyConfig;
use crate::engine::error::EngineError;
use crate::engine::function::{Function, TracingListener};
use crate::engine::likelihood::PhyloLikelihood;
use crate::engine::topology::{NniSearch, NniSummary, TopologyListener};
use tracing::{debug, info, instrument};

/// Evaluation budget of the re-optimizations run during a topology search.
const REOPTIMIZATION_MAX_EVALUATIONS: usize = 1_000_000;

/// Which numerical optimization the search interleaves with its moves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reoptimization {
    /// [`optimize_numerical_parameters`].
    Grouped,
    /// [`optimize_numerical_parameters2`].
    SingleOptimizer,
}

/// Re-optimizes numerical parameters every `every` accepted moves.
pub struct NniReoptimizer {
    parameters: ParameterList,
    options: NumericalOptions,
    every: usize,
    counter: usize,
    strategy: Reoptimization,
    runs: usize,
}

impl NniReoptimizer {
    pub fn new(parameters: ParameterList, options: NumericalOptions, every: usize, strategy: Reoptimization) -> Self {
        Self {
            parameters,
            options: options.with_max_evaluations(REOPTIMIZATION_MAX_EVALUATIONS),
            every: every.max(1),
            counter: 0,
            strategy,
            runs: 0,
        }
    }

    /// Number of re-optimizations performed so far.
    pub fn runs(&self) -> usize {
        self.runs
    }
}

impl TopologyListener for NniReoptimizer {
    fn topology_change_successful(&mut self, likelihood: &mut PhyloLikelihood) -> Result<(), EngineError> {
        self.counter += 1;
        if self.counter < self.every {
            return Ok(());
        }
        self.counter = 0;
        self.parameters.match_values(likelihood.parameters())?;
        let names = self.parameters.names();
        debug!(parameters = names.len(), "Re-optimizing numerical parameters after NNI.");
        match self.strategy {
            Reoptimization::Grouped => {
                optimize_numerical_parameters(likelihood, &names, &mut TracingListener, &self.options)?;
            }
            Reoptimization::SingleOptimizer => {
                optimize_numerical_parameters2(likelihood, &names, &mut TracingListener, &self.options)?;
            }
        }
        self.runs += 1;
        Ok(())
    }
}

fn search(
    likelihood: &mut PhyloLikelihood,
    names: &[String],
    topology: &TopologyConfig,
    options: &NumericalOptions,
    strategy: Reoptimization,
) -> Result<NniSummary, EngineError> {
    let optimize = |lik: &mut PhyloLikelihood, tolerance: f64| {
        let options = options.clone().with_tolerance(tolerance).with_max_evaluations(REOPTIMIZATION_MAX_EVALUATIONS);
        match strategy {
            Reoptimization::Grouped => optimize_numerical_parameters(lik, names, &mut TracingListener, &options),
            Reoptimization::SingleOptimizer => optimize_numerical_parameters2(lik, names, &mut TracingListener, &options),
        }
    };
    if topology.optimize_num_first {
        optimize(likelihood, topology.tol_before)?;
    }

    let parameters = likelihood.parameters().sublist(names)?;
    let mut reoptimizer = NniReoptimizer::new(
        parameters,
        options.clone().with_tolerance(topology.tol_during),
        topology.numopt_every,
        strategy,
    );
    let summary = {
        let mut search = NniSearch::new(topology.method);
        search.add_listener(&mut reoptimizer);
        search.search(likelihood)?
    };
    info!(
        accepted = summary.accepted,
        reoptimizations = reoptimizer.runs(),
        log_likelihood = likelihood.log_likelihood(),
        "Topology search complete."
    );
    Ok(summary)
}

/// NNI search where accepted moves trigger grouped numerical
/// re-optimizations; see [`optimize_numerical_parameters`].
#[instrument(skip_all, name = "nni_workflow")]
pub fn optimize_tree_nni(
    likelihood: &mut PhyloLikelihood,
    names: &[String],
    topology: &TopologyConfig,
    options: &NumericalOptions,
) -> Result<NniSummary, EngineError> {
    search(likelihood, names, topology, options, Reoptimization::Grouped)
}

/// NNI search where accepted moves trigger single-optimizer numerical
/// re-optimizations; see [`optimize_numerical_parameters2`].
#[instrument(skip_all, name = "nni2_workflow")]
pub fn optimize_tree_nni2(
    likelihood: &mut PhyloLikelihood,
    names: &[String],
    topology: &TopologyConfig,
    options: &NumericalOptions,
) -> Result<NniSummary, EngineError> {
    search(likelihood, names, topology, options, Reoptimization::SingleOptimizer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::models::NucleotideModelKind;
    use crate::engine::config::NniMethod;
    use crate::engine::likelihood::tests::{five_taxa, homogeneous};

    const WRONG: &str = "((A:0.1,D:0.1):0.1,C:0.1,(B:0.1,E:0.1):0.1);";

    fn topology(method: NniMethod, numopt_every: usize) -> TopologyConfig {
        TopologyConfig {
            method,
            numopt_every,
            optimize_num_first: true,
            tol_before: 1e-3,
            tol_during: 1e-3,
        }
    }

    #[test]
    fn search_with_reoptimization_improves_the_likelihood() {
        for strategy in [Reoptimization::Grouped, Reoptimization::SingleOptimizer] {
            let mut lik = homogeneous(WRONG, five_taxa(), NucleotideModelKind::K80);
            let start = lik.log_likelihood();
            let names = lik.parameters().names();
            let summary = search(
                &mut lik,
                &names,
                &topology(NniMethod::Fast, 1),
                &NumericalOptions::default(),
                strategy,
            )
            .unwrap();
            assert!(summary.log_likelihood > start);
            assert!((summary.log_likelihood - lik.log_likelihood()).abs() < 1e-12);
        }
    }

    #[test]
    fn reoptimizer_runs_every_n_accepted_moves() {
        let mut lik = homogeneous(WRONG, five_taxa(), NucleotideModelKind::K80);
        let parameters = lik.parameters().sublist(&["kappa"]).unwrap();
        let mut reoptimizer =
            NniReoptimizer::new(parameters, NumericalOptions::default(), 2, Reoptimization::Grouped);
        reoptimizer.topology_change_successful(&mut lik).unwrap();
        assert_eq!(reoptimizer.runs(), 0);
        assert_eq!(lik.parameter_value("kappa").unwrap(), 2.0);
        reoptimizer.topology_change_successful(&mut lik).unwrap();
        assert_eq!(reoptimizer.runs(), 1);
        assert_ne!(lik.parameter_value("kappa").unwrap(), 2.0);
    }
}
