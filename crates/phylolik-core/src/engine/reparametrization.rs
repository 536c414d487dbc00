use super::error::EngineError;
use super::function::Function;
use crate::core::parameters::{Constraint, ParameterList};
use std::collections::BTreeMap;

/// Exposes a function on unconstrained parameters.
///
/// Each reparametrized parameter `v` with a constraint is replaced by an
/// unbounded `x` with `v = g(x)` (see [`Constraint::from_unconstrained`]).
/// Names are kept; other parameters pass through unchanged. Derivatives are
/// transformed by the chain rule: `df/dx = f'·g'` and
/// `d²f/dx² = f''·g'² + f'·g''`.
pub struct Reparametrized<'f> {
    function: &'f mut dyn Function,
    parameters: ParameterList,
    constraints: BTreeMap<String, Constraint>,
}

impl<'f> Reparametrized<'f> {
    /// Reparametrizes `names`; every name must be a parameter of `function`.
    pub fn new(function: &'f mut dyn Function, names: &[String]) -> Result<Self, EngineError> {
        let mut parameters = ParameterList::new();
        let mut constraints = BTreeMap::new();
        for parameter in function.parameters() {
            if names.iter().any(|n| n == parameter.name()) {
                let constraint = parameter.constraint();
                let x = constraint.to_unconstrained(parameter.value());
                parameters.add(parameter.with_constraint(Constraint::Unbounded, x))?;
                constraints.insert(parameter.name().to_string(), constraint);
            } else {
                parameters.add(parameter.clone())?;
            }
        }
        for name in names {
            if !constraints.contains_key(name) {
                function.parameters().parameter(name)?;
            }
        }
        Ok(Self {
            function,
            parameters,
            constraints,
        })
    }

    /// Value in the original domain of the parameter `name` at `x`.
    fn original(&self, name: &str, x: f64) -> f64 {
        match self.constraints.get(name) {
            Some(constraint) => constraint.closest_feasible(constraint.from_unconstrained(x)),
            None => x,
        }
    }
}

impl Function for Reparametrized<'_> {
    fn parameters(&self) -> &ParameterList {
        &self.parameters
    }

    fn set_parameters(&mut self, values: &ParameterList) -> Result<(), EngineError> {
        self.parameters.set_values(values)?;
        let names = values.names();
        let originals = names
            .iter()
            .map(|name| Ok(self.original(name, self.parameters.value(name)?)))
            .collect::<Result<Vec<_>, EngineError>>()?;
        let inner = self.function.parameters().sublist(&names)?.with_values(&originals)?;
        self.function.set_parameters(&inner)
    }

    fn value(&self) -> f64 {
        self.function.value()
    }

    fn first_order_derivative(&self, name: &str) -> Result<f64, EngineError> {
        let d1 = self.function.first_order_derivative(name)?;
        match self.constraints.get(name) {
            Some(constraint) => {
                let x = self.parameters.value(name)?;
                Ok(d1 * constraint.from_unconstrained_first_derivative(x))
            }
            None => Ok(d1),
        }
    }

    fn second_order_derivative(&self, name: &str) -> Result<f64, EngineError> {
        let d2 = self.function.second_order_derivative(name)?;
        match self.constraints.get(name) {
            Some(constraint) => {
                let d1 = self.function.first_order_derivative(name)?;
                let x = self.parameters.value(name)?;
                let g1 = constraint.from_unconstrained_first_derivative(x);
                let g2 = constraint.from_unconstrained_second_derivative(x);
                Ok(d2 * g1 * g1 + d1 * g2)
            }
            None => Ok(d2),
        }
    }

    fn enable_first_order_derivatives(&mut self, yes: bool) {
        self.function.enable_first_order_derivatives(yes);
    }

    fn enable_second_order_derivatives(&mut self, yes: bool) {
        self.function.enable_second_order_derivatives(yes);
    }
}
