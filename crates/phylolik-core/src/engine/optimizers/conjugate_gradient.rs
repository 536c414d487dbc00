use super::brent::brent_minimize;
use super::{Optimizer, Evaluator, StopCondition};
use crate::engine::error::EngineError;
use crate::engine::function::{Function, OptimizationListener};
use crate::engine::state::OptimizationSummary;
use tracing::{debug, warn};

/// Relative precision of the line searches.
const LINE_SEARCH_TOLERANCE: f64 = 1e-4;

/// Polak-Ribière conjugate gradient with a Brent line search.
///
/// Requires first-order derivatives of every optimized parameter.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConjugateGradient;

impl ConjugateGradient {
    pub fn new() -> Self {
        Self
    }
}

/// Minimizes `evaluator` along `direction` from `x`, leaving it at the
/// best point found.
///
/// # Return
///
/// The new point and the objective there.
pub(crate) fn line_search(
    evaluator: &mut Evaluator<'_>,
    x: &[f64],
    direction: &[f64],
    max_evaluations: usize,
) -> Result<(Vec<f64>, f64), EngineError> {
    let norm = direction.iter().map(|d| d * d).sum::<f64>().sqrt();
    let step = 1.0 / norm.max(1.0);
    let along = |alpha: f64| -> Vec<f64> { x.iter().zip(direction).map(|(xi, di)| xi + alpha * di).collect() };
    let minimum = brent_minimize(
        |alpha| evaluator.f(&along(alpha)),
        |alpha| alpha,
        0.0,
        step,
        LINE_SEARCH_TOLERANCE,
        max_evaluations,
    )?;
    let mut best = along(minimum.x);
    evaluator.clamp(&mut best);
    let value = evaluator.f(&best)?;
    Ok((best, value))
}

impl Optimizer for ConjugateGradient {
    fn name(&self) -> &'static str {
        "Conjugate gradient"
    }

    fn optimize(
        &mut self,
        function: &mut dyn Function,
        names: &[String],
        stop: &StopCondition,
        listener: &mut dyn OptimizationListener,
    ) -> Result<OptimizationSummary, EngineError> {
        function.enable_first_order_derivatives(true);
        let mut evaluator = Evaluator::new(function, names)?;
        let mut x = evaluator.point();
        let mut fx = evaluator.f(&x)?;
        let mut gradient = evaluator.gradient()?;
        let mut direction: Vec<f64> = gradient.iter().map(|g| -g).collect();
        let mut summary = OptimizationSummary::new(fx);

        loop {
            if stop.iterations_exhausted(summary.iterations) {
                break;
            }
            let budget = evaluator.budget_left(stop);
            if budget == 0 {
                break;
            }
            let (next, f_next) = line_search(&mut evaluator, &x, &direction, budget)?;
            summary.iterations += 1;
            listener.iteration_done(summary.iterations, f_next);

            let improvement = fx - f_next;
            x = next;
            fx = f_next;
            if improvement.abs() < stop.tolerance {
                summary.converged = true;
                break;
            }

            let next_gradient = evaluator.gradient()?;
            let gg: f64 = gradient.iter().map(|g| g * g).sum();
            if gg == 0.0 {
                summary.converged = true;
                break;
            }
            let dgg: f64 = next_gradient
                .iter()
                .zip(&gradient)
                .map(|(gn, go)| (gn - go) * gn)
                .sum();
            let gamma = (dgg / gg).max(0.0);
            direction = next_gradient
                .iter()
                .zip(&direction)
                .map(|(g, d)| -g + gamma * d)
                .collect();
            // Restart on a non-descent direction.
            if direction.iter().zip(&next_gradient).map(|(d, g)| d * g).sum::<f64>() >= 0.0 {
                direction = next_gradient.iter().map(|g| -g).collect();
            }
            gradient = next_gradient;
        }

        summary.evaluations = evaluator.evaluations;
        summary.value = fx;
        if !summary.converged && evaluator.budget_left(stop) == 0 {
            warn!(
                evaluations = summary.evaluations,
                "Conjugate gradient stopped before convergence: evaluation budget exhausted."
            );
        }
        debug!(
            iterations = summary.iterations,
            evaluations = summary.evaluations,
            value = fx,
            "Conjugate gradient done."
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
    fn converges_on_a_coupled_quadratic() {
        let mut function = Quadratic::new(-2.0, 2.0);
        let summary = ConjugateGradient::new()
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
    fn respects_the_iteration_cap() {
        let mut function = Quadratic::new(-2.0, 2.0);
        let summary = ConjugateGradient::new()
            .optimize(
                &mut function,
                &names(&["x", "y"]),
                &StopCondition::new(1e-12, 10_000).with_max_iterations(1),
                &mut TracingListener,
            )
            .unwrap();
        assert_eq!(summary.iterations, 1);
        assert!(summary.value < 9.0 + 2.0 * 6.25 - 2.0);
    }
}
