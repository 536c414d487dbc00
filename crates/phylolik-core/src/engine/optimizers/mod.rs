//! Local optimizers minimizing a [`Function`] over a subset of its
//! parameters.
//!
//! Every optimizer works on the point held by the function: it reads the
//! starting values from [`Function::parameters`], moves the function while
//! searching, and leaves it at the best point found. Trial points outside a
//! parameter's domain are projected onto the closest feasible value.

pub mod brent;
pub mod conjugate_gradient;
pub mod meta;
pub mod pseudo_newton;
pub mod simple_multi;
pub mod simplex;

pub use brent::BrentOneDimension;
pub use conjugate_gradient::ConjugateGradient;
pub use meta::{IterationMode, MetaOptimizer, OptimizerGroup};
pub use pseudo_newton::PseudoNewton;
pub use simple_multi::SimpleMultiDimensions;
pub use simplex::DownhillSimplex;

use super::error::EngineError;
use super::function::{Function, OptimizationListener};
use super::state::OptimizationSummary;
use crate::core::parameters::{Constraint, ParameterList};

/// When to stop an optimization.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StopCondition {
    /// Improvement of the objective below which the search has converged.
    pub tolerance: f64,
    pub max_evaluations: usize,
    pub max_iterations: Option<usize>,
}

impl StopCondition {
    pub fn new(tolerance: f64, max_evaluations: usize) -> Self {
        Self {
            tolerance,
            max_evaluations,
            max_iterations: None,
        }
    }

    pub fn with_max_iterations(mut self, iterations: usize) -> Self {
        self.max_iterations = Some(iterations);
        self
    }

    fn iterations_exhausted(&self, iterations: usize) -> bool {
        self.max_iterations.is_some_and(|max| iterations >= max)
    }
}

/// A local minimization method.
pub trait Optimizer {
    fn name(&self) -> &'static str;

    /// Minimizes `function` over `names`, starting from its current point.
    ///
    /// Exhausting the evaluation budget is not an error; the summary then
    /// reports `converged == false`.
    fn optimize(
        &mut self,
        function: &mut dyn Function,
        names: &[String],
        stop: &StopCondition,
        listener: &mut dyn OptimizationListener,
    ) -> Result<OptimizationSummary, EngineError>;
}

/// A view of a function restricted to some of its parameters, as a plain
/// vector function, counting evaluations.
pub(crate) struct Evaluator<'f> {
    function: &'f mut dyn Function,
    template: ParameterList,
    constraints: Vec<Constraint>,
    pub(crate) evaluations: usize,
}

impl<'f> Evaluator<'f> {
    pub(crate) fn new(function: &'f mut dyn Function, names: &[String]) -> Result<Self, EngineError> {
        let template = function.parameters().sublist(names)?;
        let constraints = template.iter().map(|p| p.constraint()).collect();
        Ok(Self {
            function,
            template,
            constraints,
            evaluations: 0,
        })
    }

    pub(crate) fn dimension(&self) -> usize {
        self.template.len()
    }

    pub(crate) fn names(&self) -> Vec<String> {
        self.template.names()
    }

    /// Current values of the optimized parameters.
    pub(crate) fn point(&self) -> Vec<f64> {
        self.template
            .iter()
            .map(|p| self.function.parameters().value(p.name()).unwrap_or(p.value()))
            .collect()
    }

    pub(crate) fn value(&self) -> f64 {
        self.function.value()
    }

    pub(crate) fn clamp(&self, x: &mut [f64]) {
        for (xi, constraint) in x.iter_mut().zip(&self.constraints) {
            *xi = constraint.closest_feasible(*xi);
        }
    }

    pub(crate) fn constraint(&self, index: usize) -> Constraint {
        self.constraints[index]
    }

    /// Moves the function to `x`, projected onto the feasible domain, and
    /// returns the objective there.
    pub(crate) fn f(&mut self, x: &[f64]) -> Result<f64, EngineError> {
        let mut feasible = x.to_vec();
        self.clamp(&mut feasible);
        let values = self.template.with_values(&feasible)?;
        self.evaluations += 1;
        self.function.f(&values)
    }

    /// Moves along one coordinate only.
    pub(crate) fn f_along(&mut self, base: &[f64], index: usize, xi: f64) -> Result<f64, EngineError> {
        let mut x = base.to_vec();
        x[index] = xi;
        self.f(&x)
    }

    pub(crate) fn gradient(&self) -> Result<Vec<f64>, EngineError> {
        self.template
            .iter()
            .map(|p| self.function.first_order_derivative(p.name()))
            .collect()
    }

    pub(crate) fn second_derivatives(&self) -> Result<Vec<f64>, EngineError> {
        self.template
            .iter()
            .map(|p| self.function.second_order_derivative(p.name()))
            .collect()
    }

    pub(crate) fn budget_left(&self, stop: &StopCondition) -> usize {
        stop.max_evaluations.saturating_sub(self.evaluations)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::core::parameters::Parameter;

    /// `(x - 1)² + 2 (y + 0.5)² + x y / 2`, with `x` restricted to `[-3, 3]`.
    #[derive(Debug)]
    pub(crate) struct Quadratic {
        pub(crate) parameters: ParameterList,
    }

    impl Quadratic {
        pub(crate) fn new(x: f64, y: f64) -> Self {
            Self {
                parameters: ParameterList::from_parameters([
                    Parameter::new("x", x, Constraint::closed(-3.0, 3.0)).unwrap(),
                    Parameter::unconstrained("y", y),
                ])
                .unwrap(),
            }
        }

        /// Exact minimizer: solves `2x + y/2 = 2` and `x/2 + 4y = -2`.
        pub(crate) fn minimum() -> (f64, f64) {
            let det = 2.0 * 4.0 - 0.25;
            ((2.0 * 4.0 + 0.5 * 2.0) / det, (2.0 * -2.0 - 0.5 * 2.0) / det)
        }

        fn xy(&self) -> (f64, f64) {
            (self.parameters.value("x").unwrap(), self.parameters.value("y").unwrap())
        }
    }

    impl Function for Quadratic {
        fn parameters(&self) -> &ParameterList {
            &self.parameters
        }

        fn set_parameters(&mut self, values: &ParameterList) -> Result<(), EngineError> {
            self.parameters.set_values(values)?;
            Ok(())
        }

        fn value(&self) -> f64 {
            let (x, y) = self.xy();
            (x - 1.0).powi(2) + 2.0 * (y + 0.5).powi(2) + 0.5 * x * y
        }

        fn first_order_derivative(&self, name: &str) -> Result<f64, EngineError> {
            let (x, y) = self.xy();
            match name {
                "x" => Ok(2.0 * (x - 1.0) + 0.5 * y),
                "y" => Ok(4.0 * (y + 0.5) + 0.5 * x),
                _ => Err(EngineError::NotDerivable { name: name.to_string() }),
            }
        }

        fn second_order_derivative(&self, name: &str) -> Result<f64, EngineError> {
            match name {
                "x" => Ok(2.0),
                "y" => Ok(4.0),
                _ => Err(EngineError::NotDerivable { name: name.to_string() }),
            }
        }
    }

    pub(crate) fn names(names: &[&str]) -> Vec<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    #[test]
    fn evaluator_projects_infeasible_points() {
        let mut function = Quadratic::new(0.0, 0.0);
        let mut evaluator = Evaluator::new(&mut function, &names(&["x"])).unwrap();
        evaluator.f(&[10.0]).unwrap();
        assert_eq!(evaluator.point(), vec![3.0]);
        assert_eq!(evaluator.evaluations, 1);
    }

    #[test]
    fn evaluator_rejects_unknown_names() {
        let mut function = Quadratic::new(0.0, 0.0);
        assert!(matches!(
            Evaluator::new(&mut function, &names(&["z"])),
            Err(EngineError::Parameter(_))
        ));
    }
}
