use super::error::EngineError;
use super::function::{Function, OptimizationListener};
use super::likelihood::BRANCH_LENGTH_CONSTRAINT;
use super::optimizers::{BrentOneDimension, Optimizer, StopCondition};
use super::state::OptimizationSummary;
use crate::core::parameters::{Parameter, ParameterList};
use tracing::{debug, info, instrument};

/// Name of the single parameter of [`ScaleFunction`].
pub const SCALE_FACTOR: &str = "scale factor";

const INITIAL_SCALE_FACTOR: f64 = 2.718282;
const INITIAL_INTERVAL: (f64, f64) = (2.7, 2.8);
/// Interval of the second search, starting from the unscaled tree.
const UNSCALED_INTERVAL: (f64, f64) = (0.0, 0.1);

/// One-parameter view of a likelihood where all branch lengths are scaled
/// together.
///
/// With parameter `λ`, every branch length is its value at construction
/// time multiplied by `exp(λ)`.
pub struct ScaleFunction<'f> {
    function: &'f mut dyn Function,
    lengths: ParameterList,
    lambda: ParameterList,
}

impl<'f> ScaleFunction<'f> {
    /// Scales the parameters `branch_lengths` of `function`.
    pub fn new(function: &'f mut dyn Function, branch_lengths: &[String]) -> Result<Self, EngineError> {
        let lengths = function.parameters().sublist(branch_lengths)?;
        let lambda = ParameterList::from_parameters([Parameter::unconstrained(SCALE_FACTOR, INITIAL_SCALE_FACTOR)])?;
        Ok(Self {
            function,
            lengths,
            lambda,
        })
    }

    /// Multiplier currently applied to the original lengths.
    pub fn scale(&self) -> f64 {
        self.lambda[0].value().exp()
    }
}

impl Function for ScaleFunction<'_> {
    fn parameters(&self) -> &ParameterList {
        &self.lambda
    }

    fn set_parameters(&mut self, values: &ParameterList) -> Result<(), EngineError> {
        if values.len() != 1 {
            return Err(EngineError::Arity {
                expected: 1,
                found: values.len(),
            });
        }
        self.lambda.set_values(values)?;
        let scale = self.scale();
        let scaled: Vec<f64> = self
            .lengths
            .iter()
            .map(|p| BRANCH_LENGTH_CONSTRAINT.closest_feasible(p.value() * scale))
            .collect();
        let scaled = self.lengths.with_values(&scaled)?;
        self.function.set_parameters(&scaled)
    }

    fn value(&self) -> f64 {
        self.function.value()
    }
}

/// Optimizes a common scale factor of `branch_lengths` with Brent's method.
///
/// The search opens on a large factor. When its optimum is worse than the
/// unscaled tree, a second search starts from the unscaled tree, and the
/// lengths are never left worse than they came in.
///
/// # Return
///
/// The optimizer summary; the function is left with its branch lengths
/// scaled by the best factor.
#[instrument(skip_all, name = "tree_scale")]
pub fn optimize_tree_scale(
    function: &mut dyn Function,
    branch_lengths: &[String],
    tolerance: f64,
    max_evaluations: usize,
    listener: &mut dyn OptimizationListener,
) -> Result<OptimizationSummary, EngineError> {
    let mut scaled = ScaleFunction::new(function, branch_lengths)?;
    let unscaled = scaled.value();
    let names = [SCALE_FACTOR.to_string()];
    let stop = StopCondition::new(tolerance, max_evaluations);

    let (a, b) = INITIAL_INTERVAL;
    let mut summary = BrentOneDimension::with_initial_interval(a, b).optimize(&mut scaled, &names, &stop, listener)?;
    if summary.value > unscaled {
        debug!(
            scaled = summary.value,
            unscaled, "Scaling from the initial interval lost likelihood; searching from the unscaled tree."
        );
        let (a, b) = UNSCALED_INTERVAL;
        let retry = BrentOneDimension::with_initial_interval(a, b).optimize(&mut scaled, &names, &stop, listener)?;
        summary = OptimizationSummary {
            evaluations: summary.evaluations + retry.evaluations,
            ..retry
        };
    }
    if summary.value > unscaled {
        let identity = scaled.parameters().with_values(&[0.0])?;
        scaled.set_parameters(&identity)?;
        summary.value = scaled.value();
    }
    info!(scale = scaled.scale(), evaluations = summary.evaluations, "Tree scaled.");
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::models::NucleotideModelKind;
    use crate::engine::function::TracingListener;
    use crate::engine::likelihood::tests::{five_taxa, homogeneous};

    const TREE: &str = "((A:0.1,B:0.2):0.05,C:0.3,(D:0.1,E:0.1):0.2);";

    #[test]
    fn lengths_follow_the_exponential_of_the_factor() {
        let mut lik = homogeneous(TREE, five_taxa(), NucleotideModelKind::Jc69);
        let names = lik.branch_lengths_parameters().names();
        let before = lik.branch_lengths_parameters().values();
        {
            let mut scaled = ScaleFunction::new(&mut lik, &names).unwrap();
            let values = scaled.parameters().with_values(&[2.0_f64.ln()]).unwrap();
            scaled.set_parameters(&values).unwrap();
            assert!((scaled.scale() - 2.0).abs() < 1e-12);
        }
        let after = lik.branch_lengths_parameters().values();
        for (b, a) in before.iter().zip(&after) {
            assert!((a - 2.0 * b).abs() < 1e-12);
        }
    }

    #[test]
    fn wrong_arity_is_an_error() {
        let mut lik = homogeneous(TREE, five_taxa(), NucleotideModelKind::Jc69);
        let names = lik.branch_lengths_parameters().names();
        let mut scaled = ScaleFunction::new(&mut lik, &names).unwrap();
        let two = ParameterList::from_parameters([
            Parameter::unconstrained(SCALE_FACTOR, 0.0),
            Parameter::unconstrained("other", 0.0),
        ])
        .unwrap();
        assert!(matches!(
            scaled.set_parameters(&two),
            Err(EngineError::Arity { expected: 1, found: 2 })
        ));
    }

    #[test]
    fn scaling_never_lowers_the_likelihood() {
        for newick in [TREE, "((A:0.02,B:0.04):0.01,C:0.06,(D:0.02,E:0.02):0.04);"] {
            let mut lik = homogeneous(newick, five_taxa(), NucleotideModelKind::Jc69);
            let start = lik.log_likelihood();
            let names = lik.branch_lengths_parameters().names();
            let summary = optimize_tree_scale(&mut lik, &names, 1e-6, 1000, &mut TracingListener).unwrap();
            assert!(lik.log_likelihood() >= start - 1e-9, "{newick}");
            assert!((lik.value() - summary.value).abs() < 1e-12, "{newick}");
        }
    }

    #[test]
    fn scaling_improves_a_badly_scaled_tree() {
        let mut lik = homogeneous(
            "((A:1,B:2):0.5,C:3,(D:1,E:1):2);",
            five_taxa(),
            NucleotideModelKind::Jc69,
        );
        let start = lik.log_likelihood();
        let names = lik.branch_lengths_parameters().names();
        let summary = optimize_tree_scale(&mut lik, &names, 1e-6, 1000, &mut TracingListener).unwrap();
        assert!(summary.converged);
        assert!(lik.log_likelihood() > start);
        assert!((lik.value() - summary.value).abs() < 1e-12);
    }
}
