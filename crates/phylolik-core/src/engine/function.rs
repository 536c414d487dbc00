use super::error::EngineError;
use crate::core::parameters::ParameterList;

/// A real-valued objective over a named parameter list, to be minimized.
///
/// The function owns its current point: [`Function::set_parameters`] moves
/// it and [`Function::value`] reads the objective there. Derivatives are an
/// optional capability; functions that cannot differentiate with respect to
/// a parameter return [`EngineError::NotDerivable`].
pub trait Function {
    fn parameters(&self) -> &ParameterList;

    /// Moves to a new point; every name of `values` must be a parameter.
    fn set_parameters(&mut self, values: &ParameterList) -> Result<(), EngineError>;

    /// Objective at the current point.
    fn value(&self) -> f64;

    /// Moves to `values` and returns the objective there.
    fn f(&mut self, values: &ParameterList) -> Result<f64, EngineError> {
        self.set_parameters(values)?;
        Ok(self.value())
    }

    fn first_order_derivative(&self, name: &str) -> Result<f64, EngineError> {
        Err(EngineError::NotDerivable { name: name.to_string() })
    }

    fn second_order_derivative(&self, name: &str) -> Result<f64, EngineError> {
        Err(EngineError::NotDerivable { name: name.to_string() })
    }

    /// Turns on the computation of first-order derivatives at every move.
    fn enable_first_order_derivatives(&mut self, _yes: bool) {}

    /// Turns on the computation of second-order derivatives at every move.
    fn enable_second_order_derivatives(&mut self, _yes: bool) {}
}

/// Notified after every iteration of an optimizer.
pub trait OptimizationListener {
    fn iteration_done(&mut self, iteration: usize, value: f64);
}

/// Logs iterations at `debug` level.
#[derive(Debug, Default)]
pub struct TracingListener;

impl OptimizationListener for TracingListener {
    fn iteration_done(&mut self, iteration: usize, value: f64) {
        tracing::debug!(iteration, value, "Optimizer iteration done.");
    }
}
