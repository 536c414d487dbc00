use super::{Evaluator, Optimizer, StopCondition};
use crate::engine::error::EngineError;
use crate::engine::function::{Function, OptimizationListener};
use crate::engine::state::OptimizationSummary;
use std::cell::Cell;
use tracing::{debug, warn};

const GOLDEN_RATIO: f64 = 1.618034;
const GOLDEN_SECTION: f64 = 0.381966;
const ZERO_EPSILON: f64 = 1e-10;

/// Result of a one-dimensional minimization.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct LineMinimum {
    pub x: f64,
    pub value: f64,
    pub evaluations: usize,
    pub iterations: usize,
    pub converged: bool,
}

/// Brackets a minimum starting from `[a, b]`, then refines it with Brent's
/// parabolic interpolation.
///
/// # Arguments
///
/// * `f` - The objective at a point.
/// * `clamp` - Projection of a trial point onto the feasible domain.
/// * `a`, `b` - Initial interval; its direction decides where the bracket
///   first expands.
/// * `tolerance` - Relative precision on the abscissa.
/// * `max_evaluations` - Evaluation budget, bracketing included.
pub(crate) fn brent_minimize(
    mut f: impl FnMut(f64) -> Result<f64, EngineError>,
    clamp: impl Fn(f64) -> f64,
    a: f64,
    b: f64,
    tolerance: f64,
    max_evaluations: usize,
) -> Result<LineMinimum, EngineError> {
    let evaluations = Cell::new(0usize);
    let mut eval = |x: f64| -> Result<f64, EngineError> {
        evaluations.set(evaluations.get() + 1);
        f(x)
    };

    // Bracketing by golden expansion.
    let (mut a, mut b) = (clamp(a), clamp(b));
    let mut fa = eval(a)?;
    let mut fb = eval(b)?;
    if fb > fa {
        std::mem::swap(&mut a, &mut b);
        std::mem::swap(&mut fa, &mut fb);
    }
    let mut c = clamp(b + GOLDEN_RATIO * (b - a));
    let mut fc = if c == b { fb } else { eval(c)? };
    while fb > fc && c != b && evaluations.get() < max_evaluations {
        a = b;
        b = c;
        fb = fc;
        c = clamp(b + GOLDEN_RATIO * (b - a));
        fc = if c == b { fb } else { eval(c)? };
    }

    let (mut lo, mut hi) = if a < c { (a, c) } else { (c, a) };
    let (mut x, mut w, mut v) = (b, b, b);
    let (mut fx, mut fw, mut fv) = (fb, fb, fb);
    let mut d: f64 = 0.0;
    let mut e: f64 = 0.0;
    let mut iterations = 0;

    while evaluations.get() < max_evaluations {
        let xm = 0.5 * (lo + hi);
        let tol1 = tolerance * x.abs() + ZERO_EPSILON;
        let tol2 = 2.0 * tol1;
        if (x - xm).abs() <= tol2 - 0.5 * (hi - lo) {
            return Ok(LineMinimum {
                x,
                value: fx,
                evaluations: evaluations.get(),
                iterations,
                converged: true,
            });
        }
        iterations += 1;

        let mut golden = true;
        if e.abs() > tol1 {
            let r = (x - w) * (fx - fv);
            let mut q = (x - v) * (fx - fw);
            let mut p = (x - v) * q - (x - w) * r;
            q = 2.0 * (q - r);
            if q > 0.0 {
                p = -p;
            }
            q = q.abs();
            let previous = e;
            e = d;
            if !(p.abs() >= (0.5 * q * previous).abs() || p <= q * (lo - x) || p >= q * (hi - x)) {
                d = p / q;
                let u = x + d;
                if u - lo < tol2 || hi - u < tol2 {
                    d = tol1.copysign(xm - x);
                }
                golden = false;
            }
        }
        if golden {
            e = if x >= xm { lo - x } else { hi - x };
            d = GOLDEN_SECTION * e;
        }

        let u = clamp(if d.abs() >= tol1 { x + d } else { x + tol1.copysign(d) });
        let fu = eval(u)?;
        if fu <= fx {
            if u >= x {
                lo = x;
            } else {
                hi = x;
            }
            (v, w, x) = (w, x, u);
            (fv, fw, fx) = (fw, fx, fu);
        } else {
            if u < x {
                lo = u;
            } else {
                hi = u;
            }
            if fu <= fw || w == x {
                (v, w) = (w, u);
                (fv, fw) = (fw, fu);
            } else if fu <= fv || v == x || v == w {
                v = u;
                fv = fu;
            }
        }
    }
    Ok(LineMinimum {
        x,
        value: fx,
        evaluations: evaluations.get(),
        iterations,
        converged: false,
    })
}

/// Brent's method on a single parameter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BrentOneDimension {
    initial_interval: Option<(f64, f64)>,
}

impl BrentOneDimension {
    pub fn new() -> Self {
        Self { initial_interval: None }
    }

    /// Starts the bracketing from `[a, b]` instead of a small interval
    /// around the current value.
    pub fn with_initial_interval(a: f64, b: f64) -> Self {
        Self {
            initial_interval: Some((a, b)),
        }
    }
}

impl Default for BrentOneDimension {
    fn default() -> Self {
        Self::new()
    }
}

/// Default initial interval around `x`.
pub(crate) fn interval_around(x: f64) -> (f64, f64) {
    (x, x + (0.1 * x.abs()).max(0.01))
}

impl Optimizer for BrentOneDimension {
    fn name(&self) -> &'static str {
        "Brent"
    }

    fn optimize(
        &mut self,
        function: &mut dyn Function,
        names: &[String],
        stop: &StopCondition,
        listener: &mut dyn OptimizationListener,
    ) -> Result<OptimizationSummary, EngineError> {
        if names.len() != 1 {
            return Err(EngineError::Arity {
                expected: 1,
                found: names.len(),
            });
        }
        let mut evaluator = Evaluator::new(function, names)?;
        let start = evaluator.point()[0];
        let (a, b) = self.initial_interval.unwrap_or_else(|| interval_around(start));
        let constraint = evaluator.constraint(0);
        let minimum = brent_minimize(
            |x| evaluator.f(&[x]),
            |x| constraint.closest_feasible(x),
            a,
            b,
            stop.tolerance,
            stop.max_evaluations,
        )?;

        // Leave the function at the best point.
        let value = evaluator.f(&[minimum.x])?;
        listener.iteration_done(minimum.iterations, value);
        if !minimum.converged {
            warn!(
                evaluations = evaluator.evaluations,
                "Brent optimization stopped before convergence: evaluation budget exhausted."
            );
        }
        debug!(x = minimum.x, value, evaluations = evaluator.evaluations, "Brent optimization done.");
        Ok(OptimizationSummary {
            evaluations: evaluator.evaluations,
            iterations: minimum.iterations,
            value,
            converged: minimum.converged,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::function::TracingListener;
    use crate::engine::optimizers::tests::{Quadratic, names};

    #[test]
    fn minimizes_a_parabola() {
        let minimum = brent_minimize(|x| Ok((x - 2.5).powi(2) + 1.0), |x| x, 0.0, 0.1, 1e-8, 200).unwrap();
        assert!(minimum.converged);
        assert!((minimum.x - 2.5).abs() < 1e-6);
        assert!((minimum.value - 1.0).abs() < 1e-10);
    }

    #[test]
    fn stops_on_the_boundary_of_the_domain() {
        let minimum =
            brent_minimize(|x| Ok(x), |x: f64| x.max(0.5), 1.0, 2.0, 1e-8, 200).unwrap();
        assert!((minimum.x - 0.5).abs() < 1e-6);
    }

    #[test]
    fn counts_every_evaluation_within_the_budget() {
        let calls = Cell::new(0usize);
        let minimum = brent_minimize(
            |x| {
                calls.set(calls.get() + 1);
                Ok((x - 40.0).powi(2))
            },
            |x| x,
            0.0,
            0.1,
            1e-12,
            7,
        )
        .unwrap();
        assert_eq!(minimum.evaluations, calls.get());
        assert!(minimum.evaluations <= 8);
        assert!(!minimum.converged);
    }

    #[test]
    fn optimizes_one_parameter_of_a_function() {
        let mut function = Quadratic::new(0.0, -0.5);
        let summary = BrentOneDimension::new()
            .optimize(&mut function, &names(&["x"]), &StopCondition::new(1e-8, 500), &mut TracingListener)
            .unwrap();
        assert!(summary.converged);
        // With y fixed at -0.5 the minimum is at x = 1.125.
        assert!((function.parameters.value("x").unwrap() - 1.125).abs() < 1e-5);
    }

    #[test]
    fn rejects_more_than_one_parameter() {
        let mut function = Quadratic::new(0.0, 0.0);
        let result = BrentOneDimension::new().optimize(
            &mut function,
            &names(&["x", "y"]),
            &StopCondition::new(1e-6, 100),
            &mut TracingListener,
        );
        assert!(matches!(result, Err(EngineError::Arity { expected: 1, found: 2 })));
    }

    #[test]
    fn reports_an_exhausted_budget() {
        let mut function = Quadratic::new(-2.0, 0.0);
        let summary = BrentOneDimension::new()
            .optimize(&mut function, &names(&["y"]), &StopCondition::new(1e-12, 4), &mut TracingListener)
            .unwrap();
        assert!(!summary.converged);
    }
}
