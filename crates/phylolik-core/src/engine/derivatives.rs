use super::error::EngineError;
use super::function::Function;
use crate::core::parameters::ParameterList;
use std::collections::BTreeMap;
use tracing::trace;

/// Finite-difference formula used by [`NumericalDerivative`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DerivativeScheme {
    /// Forward difference; first order only.
    TwoPoints,
    /// Central difference on `x ± h`.
    ThreePoints,
    /// Central difference on `x ± h` and `x ± 2h`.
    FivePoints,
}

impl DerivativeScheme {
    /// Interval used unless another is set.
    pub fn default_interval(&self) -> f64 {
        match self {
            DerivativeScheme::TwoPoints => 1e-7,
            DerivativeScheme::ThreePoints | DerivativeScheme::FivePoints => 1e-4,
        }
    }
}

/// Adds finite-difference derivatives to a function for a chosen set of
/// parameters.
///
/// Derivatives are computed each time the function is moved, for the
/// parameters registered with
/// [`NumericalDerivative::set_parameters_to_derivate`]; other names are
/// delegated to the wrapped function. Near a bound, one-sided formulas are
/// used.
pub struct NumericalDerivative<'f> {
    function: &'f mut dyn Function,
    scheme: DerivativeScheme,
    interval: f64,
    variables: Vec<String>,
    first: BTreeMap<String, f64>,
    second: BTreeMap<String, f64>,
    compute_first: bool,
    compute_second: bool,
}

impl<'f> NumericalDerivative<'f> {
    pub fn new(function: &'f mut dyn Function, scheme: DerivativeScheme) -> Self {
        Self {
            function,
            scheme,
            interval: scheme.default_interval(),
            variables: Vec::new(),
            first: BTreeMap::new(),
            second: BTreeMap::new(),
            compute_first: true,
            compute_second: scheme != DerivativeScheme::TwoPoints,
        }
    }

    pub fn set_interval(&mut self, interval: f64) {
        self.interval = interval;
    }

    pub fn interval(&self) -> f64 {
        self.interval
    }

    /// Restricts numerical differentiation to `names`.
    pub fn set_parameters_to_derivate(&mut self, names: Vec<String>) {
        self.first.clear();
        self.second.clear();
        self.variables = names;
    }

    fn evaluate_at(&mut self, name: &str, value: f64) -> Result<f64, EngineError> {
        let values = self.function.parameters().sublist(&[name])?.with_values(&[value])?;
        self.function.f(&values)
    }

    fn compute_derivatives(&mut self) -> Result<(), EngineError> {
        let f0 = self.function.value();
        let h = self.interval;
        for name in self.variables.clone() {
            let parameter = self.function.parameters().parameter(&name)?.clone();
            let x = parameter.value();
            let constraint = parameter.constraint();
            let feasible = |v: f64| constraint.is_satisfied(v);

            let (d1, d2) = match self.scheme {
                DerivativeScheme::TwoPoints => {
                    if feasible(x + h) {
                        ((self.evaluate_at(&name, x + h)? - f0) / h, None)
                    } else {
                        ((f0 - self.evaluate_at(&name, x - h)?) / h, None)
                    }
                }
                DerivativeScheme::ThreePoints => self.three_points(&name, x, f0, &feasible)?,
                DerivativeScheme::FivePoints => {
                    if feasible(x - 2.0 * h) && feasible(x + 2.0 * h) {
                        let fm2 = self.evaluate_at(&name, x - 2.0 * h)?;
                        let fm1 = self.evaluate_at(&name, x - h)?;
                        let fp1 = self.evaluate_at(&name, x + h)?;
                        let fp2 = self.evaluate_at(&name, x + 2.0 * h)?;
                        (
                            (fm2 - 8.0 * fm1 + 8.0 * fp1 - fp2) / (12.0 * h),
                            Some((-fm2 + 16.0 * fm1 - 30.0 * f0 + 16.0 * fp1 - fp2) / (12.0 * h * h)),
                        )
                    } else {
                        self.three_points(&name, x, f0, &feasible)?
                    }
                }
            };
            self.evaluate_at(&name, x)?;
            trace!(parameter = %name, d1, d2 = ?d2, "Numerical derivatives computed.");
            self.first.insert(name.clone(), d1);
            match d2 {
                Some(d2) => self.second.insert(name, d2),
                None => self.second.remove(&name),
            };
        }
        Ok(())
    }

    /// Central, forward or backward three-point formulas.
    fn three_points(
        &mut self,
        name: &str,
        x: f64,
        f0: f64,
        feasible: &dyn Fn(f64) -> bool,
    ) -> Result<(f64, Option<f64>), EngineError> {
        let h = self.interval;
        if feasible(x - h) && feasible(x + h) {
            let fm = self.evaluate_at(name, x - h)?;
            let fp = self.evaluate_at(name, x + h)?;
            Ok(((fp - fm) / (2.0 * h), Some((fp - 2.0 * f0 + fm) / (h * h))))
        } else {
            let s = if feasible(x + h) { 1.0 } else { -1.0 };
            let f1 = self.evaluate_at(name, x + s * h)?;
            let f2 = self.evaluate_at(name, x + 2.0 * s * h)?;
            Ok((
                s * (-3.0 * f0 + 4.0 * f1 - f2) / (2.0 * h),
                Some((f0 - 2.0 * f1 + f2) / (h * h)),
            ))
        }
    }
}

impl Function for NumericalDerivative<'_> {
    fn parameters(&self) -> &ParameterList {
        self.function.parameters()
    }

    fn set_parameters(&mut self, values: &ParameterList) -> Result<(), EngineError> {
        self.function.set_parameters(values)?;
        if self.compute_first || self.compute_second {
            self.compute_derivatives()?;
        }
        Ok(())
    }

    fn value(&self) -> f64 {
        self.function.value()
    }

    fn first_order_derivative(&self, name: &str) -> Result<f64, EngineError> {
        if self.variables.iter().any(|v| v == name) {
            return self
                .first
                .get(name)
                .copied()
                .ok_or_else(|| EngineError::NotDerivable { name: name.to_string() });
        }
        self.function.first_order_derivative(name)
    }

    fn second_order_derivative(&self, name: &str) -> Result<f64, EngineError> {
        if self.variables.iter().any(|v| v == name) {
            return self
                .second
                .get(name)
                .copied()
                .ok_or_else(|| EngineError::NotDerivable { name: name.to_string() });
        }
        self.function.second_order_derivative(name)
    }

    fn enable_first_order_derivatives(&mut self, yes: bool) {
        self.compute_first = yes;
        self.function.enable_first_order_derivatives(yes);
    }

    fn enable_second_order_derivatives(&mut self, yes: bool) {
        self.compute_second = yes && self.scheme != DerivativeScheme::TwoPoints;
        self.function.enable_second_order_derivatives(yes);
    }
}
