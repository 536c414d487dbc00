use super::{Optimizer, Evaluator, StopCondition};
use crate::engine::error::EngineError;
use crate::engine::function::{Function, OptimizationListener};
use crate::engine::state::OptimizationSummary;
use tracing::{debug, trace, warn};

/// Maximum number of times a step is halved before giving up on it.
const MAX_HALVINGS: usize = 10;

/// Newton's method with a diagonal Hessian.
///
/// Each parameter moves by `-f'/f''` where the curvature is positive and
/// along the negative gradient otherwise. A step that does not improve the
/// objective is halved up to ten times.
#[derive(Debug, Default, Clone, Copy)]
pub struct PseudoNewton;

impl PseudoNewton {
    pub fn new() -> Self {
        Self
    }
}

impl Optimizer for PseudoNewton {
    fn name(&self) -> &'static str {
        "Pseudo-Newton"
    }

    fn optimize(
        &mut self,
        function: &mut dyn Function,
        names: &[String],
        stop: &StopCondition,
        listener: &mut dyn OptimizationListener,
    ) -> Result<OptimizationSummary, EngineError> {
        function.enable_first_order_derivatives(true);
        function.enable_second_order_derivatives(true);
        let mut evaluator = Evaluator::new(function, names)?;
        let mut x = evaluator.point();
        let mut fx = evaluator.f(&x)?;
        let mut summary = OptimizationSummary::new(fx);

        while !stop.iterations_exhausted(summary.iterations) && evaluator.budget_left(stop) > 0 {
            let first = evaluator.gradient()?;
            let second = evaluator.second_derivatives()?;
            let mut movement: Vec<f64> = first
                .iter()
                .zip(&second)
                .map(|(&d1, &d2)| if d2 > 0.0 { -d1 / d2 } else { -d1 })
                .collect();

            let mut next: Vec<f64> = x.iter().zip(&movement).map(|(xi, m)| xi + m).collect();
            evaluator.clamp(&mut next);
            let mut f_next = evaluator.f(&next)?;
            let mut halvings = 0;
            while !(f_next <= fx) && halvings < MAX_HALVINGS && evaluator.budget_left(stop) > 0 {
                movement.iter_mut().for_each(|m| *m /= 2.0);
                next = x.iter().zip(&movement).map(|(xi, m)| xi + m).collect();
                evaluator.clamp(&mut next);
                f_next = evaluator.f(&next)?;
                halvings += 1;
            }
            summary.iterations += 1;

            if !(f_next <= fx) {
                trace!(halvings, "No improving step found, staying at the current point.");
                evaluator.f(&x)?;
                summary.converged = true;
                break;
            }
            listener.iteration_done(summary.iterations, f_next);
            let improvement = fx - f_next;
            x = next;
            fx = f_next;
            if improvement < stop.tolerance {
                summary.converged = true;
                break;
            }
        }

        summary.evaluations = evaluator.evaluations;
        summary.value = fx;
        if !summary.converged && evaluator.budget_left(stop) == 0 {
            warn!(
                evaluations = summary.evaluations,
                "Pseudo-Newton stopped before convergence: evaluation budget exhausted."
            );
        }
        debug!(
            iterations = summary.iterations,
            evaluations = summary.evaluations,
            value = fx,
            "Pseudo-Newton done."
        );
        Ok(summary)
    }
}
