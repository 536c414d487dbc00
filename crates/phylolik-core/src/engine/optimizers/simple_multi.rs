use super::brent::{brent_minimize, interval_around};
use super::{Optimizer, Evaluator, StopCondition};
use crate::engine::error::EngineError;
use crate::engine::function::{Function, OptimizationListener};
use crate::engine::state::OptimizationSummary;
use tracing::{debug, trace, warn};

/// Cycles over the parameters, minimizing along one at a time with Brent's
/// method. One iteration is one sweep over all parameters.
#[derive(Debug, Default, Clone, Copy)]
pub struct SimpleMultiDimensions;

impl SimpleMultiDimensions {
    pub fn new() -> Self {
        Self
    }
}

impl Optimizer for SimpleMultiDimensions {
    fn name(&self) -> &'static str {
        "Simple multi-dimensions"
    }

    fn optimize(
        &mut self,
        function: &mut dyn Function,
        names: &[String],
        stop: &StopCondition,
        listener: &mut dyn OptimizationListener,
    ) -> Result<OptimizationSummary, EngineError> {
        let mut evaluator = Evaluator::new(function, names)?;
        let mut x = evaluator.point();
        let mut fx = evaluator.f(&x)?;
        let mut summary = OptimizationSummary::new(fx);

        while !stop.iterations_exhausted(summary.iterations) && evaluator.budget_left(stop) > 0 {
            let sweep_start = fx;
            for i in 0..x.len() {
                let budget = evaluator.budget_left(stop);
                if budget == 0 {
                    break;
                }
                let (a, b) = interval_around(x[i]);
                let constraint = evaluator.constraint(i);
                let base = x.clone();
                let minimum = brent_minimize(
                    |xi| evaluator.f_along(&base, i, xi),
                    |xi| constraint.closest_feasible(xi),
                    a,
                    b,
                    stop.tolerance,
                    budget,
                )?;
                if minimum.value <= fx {
                    x[i] = minimum.x;
                    fx = minimum.value;
                }
                trace!(parameter = i, value = fx, "Coordinate minimized.");
            }
            // Brent leaves the function at its last trial point.
            fx = evaluator.f(&x)?;
            summary.iterations += 1;
            listener.iteration_done(summary.iterations, fx);
            if (sweep_start - fx).abs() < stop.tolerance {
                summary.converged = true;
                break;
            }
        }

        summary.evaluations = evaluator.evaluations;
        summary.value = fx;
        if !summary.converged && evaluator.budget_left(stop) == 0 {
            warn!(
                evaluations = summary.evaluations,
                "Simple multi-dimensions stopped before convergence: evaluation budget exhausted."
            );
        }
        debug!(
            iterations = summary.iterations,
            evaluations = summary.evaluations,
            value = fx,
            "Simple multi-dimensions done."
        );
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::function::TracingListener;
    use crate::engine::optimizers::tests::{Quadratic, names};

    #[test]
    fn sweeps_converge_on_a_coupled_quadratic() {
        let mut function = Quadratic::new(-2.0, 2.0);
        let summary = SimpleMultiDimensions::new()
            .optimize(
                &mut function,
                &names(&["x", "y"]),
                &StopCondition::new(1e-12, 10_000),
                &mut TracingListener,
            )
            .unwrap();
        let (x, y) = Quadratic::minimum();
        assert!(summary.converged);
        assert!((function.parameters.value("x").unwrap() - x).abs() < 1e-4);
        assert!((function.parameters.value("y").unwrap() - y).abs() < 1e-4);
    }

    #[test]
    fn a_single_sweep_in_step_mode() {
        let mut function = Quadratic::new(-2.0, 2.0);
        let summary = SimpleMultiDimensions::new()
            .optimize(
                &mut function,
                &names(&["x", "y"]),
                &StopCondition::new(1e-12, 10_000).with_max_iterations(1),
                &mut TracingListener,
            )
            .unwrap();
        assert_eq!(summary.iterations, 1);
        assert!((function.value() - summary.value).abs() < 1e-15);
    }
}
