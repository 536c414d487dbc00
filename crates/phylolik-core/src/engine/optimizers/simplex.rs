use super::{Optimizer, Evaluator, StopCondition};
use crate::engine::error::EngineError;
use crate::engine::function::{Function, OptimizationListener};
use crate::engine::state::OptimizationSummary;
use tracing::{debug, warn};

/// Nelder-Mead downhill simplex. Needs no derivative.
#[derive(Debug, Clone, Copy)]
pub struct DownhillSimplex {
    /// Relative size of the initial simplex.
    initial_step: f64,
}

impl DownhillSimplex {
    pub fn new() -> Self {
        Self { initial_step: 0.1 }
    }
}

impl Default for DownhillSimplex {
    fn default() -> Self {
        Self::new()
    }
}

struct Vertex {
    x: Vec<f64>,
    value: f64,
}

impl DownhillSimplex {
    fn trial(
        evaluator: &mut Evaluator<'_>,
        centroid: &[f64],
        worst: &[f64],
        coefficient: f64,
    ) -> Result<Vertex, EngineError> {
        let mut x: Vec<f64> = centroid
            .iter()
            .zip(worst)
            .map(|(c, w)| c + coefficient * (w - c))
            .collect();
        evaluator.clamp(&mut x);
        let value = evaluator.f(&x)?;
        Ok(Vertex { x, value })
    }
}

impl Optimizer for DownhillSimplex {
    fn name(&self) -> &'static str {
        "Downhill simplex"
    }

    fn optimize(
        &mut self,
        function: &mut dyn Function,
        names: &[String],
        stop: &StopCondition,
        listener: &mut dyn OptimizationListener,
    ) -> Result<OptimizationSummary, EngineError> {
        let mut evaluator = Evaluator::new(function, names)?;
        let n = evaluator.dimension();
        let start = evaluator.point();

        let mut simplex = Vec::with_capacity(n + 1);
        let value = evaluator.f(&start)?;
        if n == 0 {
            let mut summary = OptimizationSummary::new(value);
            summary.evaluations = evaluator.evaluations;
            summary.converged = true;
            return Ok(summary);
        }
        simplex.push(Vertex { x: start.clone(), value });
        for i in 0..n {
            let mut x = start.clone();
            let step = (self.initial_step * x[i].abs()).max(0.05);
            x[i] += step;
            evaluator.clamp(&mut x);
            if x[i] == start[i] {
                x[i] -= step;
                evaluator.clamp(&mut x);
            }
            let value = evaluator.f(&x)?;
            simplex.push(Vertex { x, value });
        }

        let mut summary = OptimizationSummary::new(value);
        loop {
            simplex.sort_by(|a, b| a.value.total_cmp(&b.value));
            let best = simplex[0].value;
            let worst = simplex[n].value;
            if (worst - best).abs() < stop.tolerance {
                summary.converged = true;
                break;
            }
            if evaluator.budget_left(stop) == 0 || stop.iterations_exhausted(summary.iterations) {
                break;
            }
            summary.iterations += 1;

            let centroid: Vec<f64> = (0..n)
                .map(|j| simplex[..n].iter().map(|v| v.x[j]).sum::<f64>() / n as f64)
                .collect();
            let worst_x = simplex[n].x.clone();
            let reflected = Self::trial(&mut evaluator, &centroid, &worst_x, -1.0)?;
            if reflected.value < simplex[0].value {
                let expanded = Self::trial(&mut evaluator, &centroid, &worst_x, -2.0)?;
                simplex[n] = if expanded.value < reflected.value { expanded } else { reflected };
            } else if reflected.value < simplex[n - 1].value {
                simplex[n] = reflected;
            } else {
                let coefficient = if reflected.value < worst { -0.5 } else { 0.5 };
                let contracted = Self::trial(&mut evaluator, &centroid, &worst_x, coefficient)?;
                if contracted.value < worst.min(reflected.value) {
                    simplex[n] = contracted;
                } else {
                    // Shrink towards the best vertex.
                    let best_x = simplex[0].x.clone();
                    for vertex in simplex.iter_mut().skip(1) {
                        *vertex = Self::trial(&mut evaluator, &best_x, &vertex.x, 0.5)?;
                    }
                }
            }
            listener.iteration_done(summary.iterations, simplex[0].value.min(simplex[n].value));
        }

        simplex.sort_by(|a, b| a.value.total_cmp(&b.value));
        summary.value = evaluator.f(&simplex[0].x)?;
        summary.evaluations = evaluator.evaluations;
        if !summary.converged {
            warn!(
                evaluations = summary.evaluations,
                "Downhill simplex stopped before convergence."
            );
        }
        debug!(
            iterations = summary.iterations,
            evaluations = summary.evaluations,
            value = summary.value,
            "Downhill simplex done."
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
    fn converges_without_derivatives() {
        let mut function = Quadratic::new(-2.0, 2.0);
        let summary = DownhillSimplex::new()
            .optimize(
                &mut function,
                &names(&["x", "y"]),
                &StopCondition::new(1e-12, 10_000),
                &mut TracingListener,
            )
            .unwrap();
        let (x, y) = Quadratic::minimum();
        assert!(summary.converged);
        assert!((function.parameters.value("x").unwrap() - x).abs() < 1e-3);
        assert!((function.parameters.value("y").unwrap() - y).abs() < 1e-3);
    }

    #[test]
    fn stays_inside_the_domain() {
        let mut function = Quadratic::new(3.0, 10.0);
        DownhillSimplex::new()
            .optimize(&mut function, &names(&["x"]), &StopCondition::new(1e-10, 500), &mut TracingListener)
            .unwrap();
        let x = function.parameters.value("x").unwrap();
        assert!((-3.0..=3.0).contains(&x));
    }
}
