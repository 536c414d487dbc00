use super::nni::{optimize_tree_nni, optimize_tree_nni2};
use crate::engine::config::{OptimizationConfig, OptimizationMethod};
use crate::engine::derivatives::{DerivativeScheme, NumericalDerivative};
use crate::engine::error::EngineError;
use crate::engine::function::{Function, OptimizationListener, TracingListener};
use crate::engine::likelihood::PhyloLikelihood;
use crate::engine::nan_watcher::NanWatcher;
use crate::engine::optimizers::{
    ConjugateGradient, DownhillSimplex, IterationMode, MetaOptimizer, Optimizer, OptimizerGroup, PseudoNewton,
    SimpleMultiDimensions, StopCondition,
};
use crate::engine::progress::ProgressReporter;
use crate::engine::reparametrization::Reparametrized;
use crate::engine::scale;
use crate::engine::state::OptimizationSummary;
use crate::engine::topology::NniSummary;
use crate::core::parameters::ParameterList;
use std::path::PathBuf;
use tracing::{info, instrument, warn};

/// Groups of at least this many parameters are optimized with the downhill
/// simplex instead of coordinate sweeps.
const SIMPLEX_GROUP_SIZE: usize = 10;

pub const BRANCH_LENGTH_GROUP: &str = "Branch length parameters";
pub const MODEL_GROUP: &str = "Substitution model parameter";
pub const RATE_GROUP: &str = "Rate distribution parameter";

/// Settings of one numerical optimization run.
#[derive(Debug, Clone, PartialEq)]
pub struct NumericalOptions {
    pub method: OptimizationMethod,
    pub tolerance: f64,
    pub max_evaluations: usize,
    /// Iterations per round of the model and rate groups.
    pub nstep: usize,
    pub reparametrization: bool,
    pub nan_dump_path: PathBuf,
}

impl NumericalOptions {
    pub fn from_config(config: &OptimizationConfig) -> Self {
        Self {
            method: config.method,
            tolerance: config.tolerance,
            max_evaluations: config.max_evaluations,
            nstep: config.nstep,
            reparametrization: config.reparametrization,
            nan_dump_path: config.nan_dump_path.clone(),
        }
    }

    pub fn with_tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = tolerance;
        self
    }

    pub fn with_max_evaluations(mut self, n: usize) -> Self {
        self.max_evaluations = n;
        self
    }

    fn stop_condition(&self) -> StopCondition {
        StopCondition::new(self.tolerance, self.max_evaluations)
    }
}

impl Default for NumericalOptions {
    fn default() -> Self {
        Self::from_config(&OptimizationConfig::default())
    }
}

/// Names of `names` that are also in `group`, in the order of `group`.
fn common(names: &[String], group: &ParameterList) -> Vec<String> {
    group.names().into_iter().filter(|n| names.contains(n)).collect()
}

fn derivative_optimizer(method: OptimizationMethod) -> Box<dyn Optimizer> {
    match method {
        OptimizationMethod::Gradient => Box::new(ConjugateGradient::new()),
        OptimizationMethod::Newton => Box::new(PseudoNewton::new()),
    }
}

/// Runs `run` on the likelihood behind a NaN watcher and, if requested, a
/// reparametrization of `names`.
fn with_wrappers<R>(
    likelihood: &mut PhyloLikelihood,
    names: &[String],
    options: &NumericalOptions,
    run: impl FnOnce(&mut dyn Function) -> Result<R, EngineError>,
) -> Result<R, EngineError> {
    let mut watcher = NanWatcher::new(likelihood, options.nan_dump_path.clone());
    if options.reparametrization {
        let mut reparametrized = Reparametrized::new(&mut watcher, names)?;
        run(&mut reparametrized)
    } else {
        run(&mut watcher)
    }
}

/// Optimizes `names` with a meta-optimizer: branch lengths with a
/// derivative-based method, model and rate parameters with derivative-free
/// methods, in turn.
///
/// # Return
///
/// The summary of the meta-optimizer; `evaluations` is the number of
/// likelihood evaluations.
#[instrument(skip_all, name = "numerical_optimization")]
pub fn optimize_numerical_parameters(
    likelihood: &mut PhyloLikelihood,
    names: &[String],
    listener: &mut dyn OptimizationListener,
    options: &NumericalOptions,
) -> Result<OptimizationSummary, EngineError> {
    let branches = common(names, &likelihood.branch_lengths_parameters());
    let mut model = common(names, &likelihood.substitution_model_parameters());
    model.extend(common(names, &likelihood.root_frequencies_parameters()));
    let rates = common(names, &likelihood.rate_distribution_parameters());

    let free_group = |name: &str, names: Vec<String>| {
        if names.len() >= SIMPLEX_GROUP_SIZE {
            OptimizerGroup::new(name, names, Box::new(DownhillSimplex::new()), IterationMode::Full)
        } else {
            OptimizerGroup::new(
                name,
                names,
                Box::new(SimpleMultiDimensions::new()),
                IterationMode::Step(options.nstep),
            )
        }
    };
    let mut meta = MetaOptimizer::new(vec![
        OptimizerGroup::new(
            BRANCH_LENGTH_GROUP,
            branches,
            derivative_optimizer(options.method),
            IterationMode::Full,
        ),
        free_group(MODEL_GROUP, model),
        free_group(RATE_GROUP, rates),
    ]);
    info!(
        method = %options.method,
        parameters = meta.names().len(),
        tolerance = options.tolerance,
        "Optimizing numerical parameters."
    );

    let optimized = meta.names();
    let summary = with_wrappers(likelihood, &optimized, options, |f| {
        meta.run(f, &options.stop_condition(), listener)
    })?;
    info!(
        evaluations = summary.evaluations,
        log_likelihood = likelihood.log_likelihood(),
        "Numerical optimization done."
    );
    Ok(summary)
}

/// Optimizes `names` with a single derivative-based method; parameters
/// without analytic derivatives get finite-difference ones.
#[instrument(skip_all, name = "numerical_optimization2")]
pub fn optimize_numerical_parameters2(
    likelihood: &mut PhyloLikelihood,
    names: &[String],
    listener: &mut dyn OptimizationListener,
    options: &NumericalOptions,
) -> Result<OptimizationSummary, EngineError> {
    let mut numerical = common(names, &likelihood.substitution_model_parameters());
    numerical.extend(common(names, &likelihood.root_frequencies_parameters()));
    numerical.extend(common(names, &likelihood.rate_distribution_parameters()));
    let optimized: Vec<String> = likelihood
        .parameters()
        .names()
        .into_iter()
        .filter(|n| names.contains(n))
        .collect();
    info!(
        method = %options.method,
        parameters = optimized.len(),
        numerical = numerical.len(),
        "Optimizing numerical parameters with a single optimizer."
    );

    let scheme = match options.method {
        OptimizationMethod::Gradient => DerivativeScheme::TwoPoints,
        OptimizationMethod::Newton => DerivativeScheme::ThreePoints,
    };
    let mut optimizer = derivative_optimizer(options.method);
    let summary = with_wrappers(likelihood, &optimized, options, |f| {
        let mut derivative = NumericalDerivative::new(f, scheme);
        derivative.set_parameters_to_derivate(numerical);
        optimizer.optimize(&mut derivative, &optimized, &options.stop_condition(), listener)
    })?;
    info!(
        evaluations = summary.evaluations,
        log_likelihood = likelihood.log_likelihood(),
        "Numerical optimization done."
    );
    Ok(summary)
}

/// Optimizes the branch lengths among `names` only.
#[instrument(skip_all, name = "branch_length_optimization")]
pub fn optimize_branch_lengths_parameters(
    likelihood: &mut PhyloLikelihood,
    names: &[String],
    listener: &mut dyn OptimizationListener,
    options: &NumericalOptions,
) -> Result<OptimizationSummary, EngineError> {
    let branches = common(names, &likelihood.branch_lengths_parameters());
    let mut optimizer = derivative_optimizer(options.method);
    let options = NumericalOptions {
        reparametrization: false,
        ..options.clone()
    };
    let summary = with_wrappers(likelihood, &branches, &options, |f| {
        optimizer.optimize(f, &branches, &options.stop_condition(), listener)
    })?;
    info!(
        evaluations = summary.evaluations,
        log_likelihood = likelihood.log_likelihood(),
        "Branch lengths optimized."
    );
    Ok(summary)
}

/// Scales all branch lengths by a common factor maximizing the likelihood.
pub fn optimize_tree_scale(
    likelihood: &mut PhyloLikelihood,
    tolerance: f64,
    max_evaluations: usize,
    listener: &mut dyn OptimizationListener,
    nan_dump_path: PathBuf,
) -> Result<OptimizationSummary, EngineError> {
    let branches = likelihood.branch_lengths_parameters().names();
    let mut watcher = NanWatcher::new(likelihood, nan_dump_path);
    scale::optimize_tree_scale(&mut watcher, &branches, tolerance, max_evaluations, listener)
}

/// Outcome of [`optimize_parameters`].
#[derive(Debug, Clone, PartialEq)]
pub struct OptimizationReport {
    pub initial_log_likelihood: f64,
    pub log_likelihood: f64,
    pub evaluations: usize,
    /// Set when a topology search ran.
    pub topology: Option<NniSummary>,
}

/// Parameters of `likelihood` minus the ignored ones; unknown ignored names
/// are reported and skipped.
pub fn parameters_to_optimize(likelihood: &PhyloLikelihood, ignored: &[String]) -> Vec<String> {
    let all = likelihood.parameters().names();
    for name in ignored {
        if !all.contains(name) {
            warn!(parameter = %name, "Parameter to ignore not found.");
        }
    }
    all.into_iter().filter(|n| !ignored.contains(n)).collect()
}

/// Optimizes a likelihood as described by `config`: optional tree scaling,
/// then either a numerical optimization or an NNI search interleaved with
/// numerical optimizations.
#[instrument(skip_all, name = "optimization_workflow")]
pub fn optimize_parameters(
    likelihood: &mut PhyloLikelihood,
    config: &OptimizationConfig,
    reporter: &ProgressReporter,
) -> Result<OptimizationReport, EngineError> {
    let initial = likelihood.log_likelihood();
    let mut report = OptimizationReport {
        initial_log_likelihood: initial,
        log_likelihood: initial,
        evaluations: 0,
        topology: None,
    };
    reporter.result("Initial log likelihood", initial);
    if !config.enabled {
        info!("Optimization disabled, parameters left unchanged.");
        return Ok(report);
    }

    let names = parameters_to_optimize(likelihood, &config.ignore_parameters);
    let options = NumericalOptions::from_config(config);
    let mut listener = TracingListener;

    if let Some(scale_first) = &config.scale_first {
        let summary = reporter.phase("Scaling tree", || {
            optimize_tree_scale(
                likelihood,
                scale_first.tolerance,
                scale_first.max_evaluations,
                &mut listener,
                config.nan_dump_path.clone(),
            )
        })?;
        report.evaluations += summary.evaluations;
        reporter.result("Log likelihood after scaling", likelihood.log_likelihood());
    }

    match &config.topology {
        Some(topology) => {
            let summary = reporter.phase("Topology search", || {
                if config.numerical_derivatives {
                    optimize_tree_nni2(likelihood, &names, topology, &options)
                } else {
                    optimize_tree_nni(likelihood, &names, topology, &options)
                }
            })?;
            report.topology = Some(summary);
        }
        None => {
            let summary = reporter.phase("Optimizing parameters", || {
                if config.numerical_derivatives {
                    optimize_numerical_parameters2(likelihood, &names, &mut listener, &options)
                } else {
                    optimize_numerical_parameters(likelihood, &names, &mut listener, &options)
                }
            })?;
            report.evaluations += summary.evaluations;
        }
    }

    report.log_likelihood = likelihood.log_likelihood();
    reporter.result("Log likelihood", report.log_likelihood);
    info!(
        initial = report.initial_log_likelihood,
        log_likelihood = report.log_likelihood,
        evaluations = report.evaluations,
        "Optimization workflow complete."
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::alphabet::Alphabet;
    use crate::core::models::{GammaDiscreteDistribution, NucleotideModel, NucleotideModelKind};
    use crate::core::tree::parse_newick;
    use crate::engine::config::OptimizationConfigBuilder;
    use crate::engine::likelihood::tests::{alignment, five_taxa, homogeneous};

    const TREE: &str = "((A:0.1,B:0.2):0.05,C:0.3,(D:0.1,E:0.1):0.2);";

    fn options(method: OptimizationMethod) -> NumericalOptions {
        NumericalOptions {
            method,
            ..NumericalOptions::default()
        }
        .with_tolerance(1e-10)
        .with_max_evaluations(100_000)
    }

    fn branch_names(lik: &PhyloLikelihood) -> Vec<String> {
        lik.branch_lengths_parameters().names()
    }

    fn assert_gradient_and_newton_agree(mut by_gradient: PhyloLikelihood) {
        let mut by_newton = by_gradient.clone();
        let names = branch_names(&by_gradient);
        optimize_branch_lengths_parameters(
            &mut by_gradient,
            &names,
            &mut TracingListener,
            &options(OptimizationMethod::Gradient),
        )
        .unwrap();
        optimize_branch_lengths_parameters(
            &mut by_newton,
            &names,
            &mut TracingListener,
            &options(OptimizationMethod::Newton),
        )
        .unwrap();
        assert!((by_gradient.log_likelihood() - by_newton.log_likelihood()).abs() < 1e-6);
    }

    #[test]
    fn gradient_and_newton_agree_on_branch_lengths() {
        assert_gradient_and_newton_agree(homogeneous(TREE, five_taxa(), NucleotideModelKind::Jc69));
    }

    #[test]
    fn gradient_and_newton_agree_on_a_three_leaf_star() {
        let star = homogeneous(
            "(A:1,B:1,C:1);",
            alignment(&[("A", "AAAAACCGTA"), ("B", "AAAACCGGTA"), ("C", "AAGACCTTTC")]),
            NucleotideModelKind::Jc69,
        );
        assert_gradient_and_newton_agree(star);
    }

    #[test]
    fn meta_optimizer_improves_every_group() {
        let tree = parse_newick(TREE).unwrap();
        let model = NucleotideModel::new(NucleotideModelKind::K80, Alphabet::Dna);
        let rates = GammaDiscreteDistribution::new(4, 1.0).unwrap();
        let mut lik = PhyloLikelihood::homogeneous(tree, five_taxa(), Box::new(model), Box::new(rates)).unwrap();
        let start = lik.log_likelihood();
        let names = lik.parameters().names();
        let summary =
            optimize_numerical_parameters(&mut lik, &names, &mut TracingListener, &options(OptimizationMethod::Newton))
                .unwrap();
        assert!(summary.evaluations > 0);
        assert!(lik.log_likelihood() > start);
        assert_ne!(lik.parameter_value("kappa").unwrap(), 2.0);
        assert_ne!(lik.parameter_value("alpha").unwrap(), 1.0);
    }

    #[test]
    fn single_optimizer_with_numerical_derivatives_reaches_the_same_optimum() {
        let mut grouped = homogeneous(TREE, five_taxa(), NucleotideModelKind::K80);
        let mut single = grouped.clone();
        let names = grouped.parameters().names();
        let options = options(OptimizationMethod::Newton);
        optimize_numerical_parameters(&mut grouped, &names, &mut TracingListener, &options).unwrap();
        optimize_numerical_parameters2(&mut single, &names, &mut TracingListener, &options).unwrap();
        assert!((grouped.log_likelihood() - single.log_likelihood()).abs() < 1e-3);
    }

    #[test]
    fn reparametrization_does_not_change_the_optimum() {
        let mut plain = homogeneous(TREE, five_taxa(), NucleotideModelKind::K80);
        let mut reparametrized = plain.clone();
        let names = plain.parameters().names();
        let options = options(OptimizationMethod::Newton);
        optimize_numerical_parameters(&mut plain, &names, &mut TracingListener, &options).unwrap();
        let with = NumericalOptions {
            reparametrization: true,
            ..options
        };
        optimize_numerical_parameters(&mut reparametrized, &names, &mut TracingListener, &with).unwrap();
        assert!((plain.log_likelihood() - reparametrized.log_likelihood()).abs() < 1e-4);
    }

    #[test]
    fn rescaling_an_optimized_tree_recovers_its_likelihood() {
        let mut lik = homogeneous(TREE, five_taxa(), NucleotideModelKind::Jc69);
        let names = branch_names(&lik);
        optimize_branch_lengths_parameters(&mut lik, &names, &mut TracingListener, &options(OptimizationMethod::Newton))
            .unwrap();
        let optimum = lik.log_likelihood();

        let doubled: Vec<f64> = lik.branch_lengths_parameters().values().iter().map(|v| v * 2.0).collect();
        let values = lik.branch_lengths_parameters().with_values(&doubled).unwrap();
        lik.set_parameters(&values).unwrap();
        assert!(lik.log_likelihood() < optimum);

        let dir = tempfile::tempdir().unwrap();
        optimize_tree_scale(&mut lik, 1e-8, 10_000, &mut TracingListener, dir.path().join("DEBUG.LOG")).unwrap();
        assert!((lik.log_likelihood() - optimum).abs() < 1e-4);
    }

    #[test]
    fn ignored_parameters_keep_their_value() {
        let mut lik = homogeneous(TREE, five_taxa(), NucleotideModelKind::K80);
        let config = OptimizationConfigBuilder::new()
            .ignore_parameter("kappa")
            .ignore_parameter("unknown")
            .tolerance(1e-6)
            .build()
            .unwrap();
        let report = optimize_parameters(&mut lik, &config, &ProgressReporter::new()).unwrap();
        assert_eq!(lik.parameter_value("kappa").unwrap(), 2.0);
        assert!(report.log_likelihood >= report.initial_log_likelihood);
        assert!(report.topology.is_none());
    }

    #[test]
    fn disabled_optimization_changes_nothing() {
        let mut lik = homogeneous(TREE, five_taxa(), NucleotideModelKind::K80);
        let before = lik.parameters().clone();
        let config = OptimizationConfigBuilder::new().enabled(false).build().unwrap();
        let report = optimize_parameters(&mut lik, &config, &ProgressReporter::new()).unwrap();
        assert_eq!(report.evaluations, 0);
        assert_eq!(lik.parameters(), &before);
    }
}
