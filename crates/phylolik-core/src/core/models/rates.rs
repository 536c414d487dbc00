use crate::core::parameters::{Constraint, Parameter, ParameterError, ParameterList};
use statrs::distribution::{ContinuousCDF, Gamma};
use std::fmt;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum DistributionError {
    #[error("A discrete distribution needs at least one class, got {0}")]
    InvalidClassCount(usize),

    #[error("Invalid gamma distribution with shape {alpha}: {message}")]
    Gamma { alpha: f64, message: String },

    #[error(transparent)]
    Parameter(#[from] ParameterError),
}

/// A discrete distribution of relative evolutionary rates across sites.
///
/// Categories are the rate multipliers; probabilities sum to one and the
/// mean rate is one.
pub trait DiscreteDistribution: fmt::Debug {
    fn name(&self) -> &str;

    fn number_of_categories(&self) -> usize {
        self.categories().len()
    }

    fn categories(&self) -> &[f64];

    fn probabilities(&self) -> &[f64];

    fn parameters(&self) -> &ParameterList;

    fn set_parameter_values(&mut self, values: &ParameterList) -> Result<Vec<String>, DistributionError>;

    fn clone_box(&self) -> Box<dyn DiscreteDistribution>;
}

impl Clone for Box<dyn DiscreteDistribution> {
    fn clone(&self) -> Self {
        self.clone_box()
    }
}

/// A single class of rate one.
#[derive(Debug, Clone, PartialEq)]
pub struct ConstantDistribution {
    parameters: ParameterList,
    categories: Vec<f64>,
    probabilities: Vec<f64>,
}

impl ConstantDistribution {
    pub fn new() -> Self {
        Self {
            parameters: ParameterList::new(),
            categories: vec![1.0],
            probabilities: vec![1.0],
        }
    }
}

impl Default for ConstantDistribution {
    fn default() -> Self {
        Self::new()
    }
}

impl DiscreteDistribution for ConstantDistribution {
    fn name(&self) -> &str {
        "constant"
    }

    fn categories(&self) -> &[f64] {
        &self.categories
    }

    fn probabilities(&self) -> &[f64] {
        &self.probabilities
    }

    fn parameters(&self) -> &ParameterList {
        &self.parameters
    }

    fn set_parameter_values(&mut self, _values: &ParameterList) -> Result<Vec<String>, DistributionError> {
        Ok(Vec::new())
    }

    fn clone_box(&self) -> Box<dyn DiscreteDistribution> {
        Box::new(self.clone())
    }
}

/// Domain of the gamma shape. Past the upper end every class rate is within
/// a few percent of one.
pub const GAMMA_ALPHA_CONSTRAINT: Constraint = Constraint::Interval {
    lower: 0.05,
    upper: 200.0,
    lower_strict: false,
    upper_strict: false,
};

/// Gamma distribution of mean one (shape `alpha`, rate `alpha`) discretized
/// into equiprobable classes, each represented by its mean rate.
#[derive(Debug, Clone, PartialEq)]
pub struct GammaDiscreteDistribution {
    parameters: ParameterList,
    categories: Vec<f64>,
    probabilities: Vec<f64>,
}

impl GammaDiscreteDistribution {
    pub fn new(classes: usize, alpha: f64) -> Result<Self, DistributionError> {
        if classes == 0 {
            return Err(DistributionError::InvalidClassCount(classes));
        }
        let alpha = Parameter::new("alpha", alpha, GAMMA_ALPHA_CONSTRAINT)?;
        let mut dist = Self {
            parameters: ParameterList::from_parameters([alpha])?,
            categories: vec![1.0; classes],
            probabilities: vec![1.0 / classes as f64; classes],
        };
        dist.categories = dist.discretize()?;
        Ok(dist)
    }

    pub fn alpha(&self) -> f64 {
        self.parameters.at(0).map(Parameter::value).unwrap_or(1.0)
    }

    /// Mean rate of each class.
    ///
    /// With boundaries `b_k` at the `k/n` quantiles of `Γ(α, α)`, the mean
    /// over class `k` is `n · [F_{α+1}(b_{k+1}) − F_{α+1}(b_k)]` where
    /// `F_{α+1}` is the CDF of `Γ(α+1, α)`.
    fn discretize(&self) -> Result<Vec<f64>, DistributionError> {
        let n = self.probabilities.len();
        if n == 1 {
            return Ok(vec![1.0]);
        }
        let alpha = self.alpha();
        let gamma_error = |e: statrs::distribution::GammaError| DistributionError::Gamma {
            alpha,
            message: e.to_string(),
        };
        let rates = Gamma::new(alpha, alpha).map_err(gamma_error)?;
        let shifted = Gamma::new(alpha + 1.0, alpha).map_err(gamma_error)?;

        let mut cdf_at_bounds = Vec::with_capacity(n + 1);
        cdf_at_bounds.push(0.0);
        for k in 1..n {
            let bound = rates.inverse_cdf(k as f64 / n as f64);
            cdf_at_bounds.push(shifted.cdf(bound));
        }
        cdf_at_bounds.push(1.0);

        let mut means: Vec<f64> = cdf_at_bounds
            .windows(2)
            .map(|w| n as f64 * (w[1] - w[0]))
            .collect();
        let mean: f64 = means.iter().sum::<f64>() / n as f64;
        if !(mean > 0.0) || means.iter().any(|m| !m.is_finite()) {
            return Err(DistributionError::Gamma {
                alpha,
                message: "degenerate discretization".into(),
            });
        }
        means.iter_mut().for_each(|m| *m /= mean);
        Ok(means)
    }
}

impl DiscreteDistribution for GammaDiscreteDistribution {
    fn name(&self) -> &str {
        "gamma"
    }

    fn categories(&self) -> &[f64] {
        &self.categories
    }

    fn probabilities(&self) -> &[f64] {
        &self.probabilities
    }

    fn parameters(&self) -> &ParameterList {
        &self.parameters
    }

    fn set_parameter_values(&mut self, values: &ParameterList) -> Result<Vec<String>, DistributionError> {
        let previous = self.parameters.clone();
        let changed = self.parameters.match_values(values)?;
        if !changed.is_empty() {
            match self.discretize() {
                Ok(categories) => self.categories = categories,
                Err(e) => {
                    self.parameters = previous;
                    return Err(e);
                }
            }
        }
        Ok(changed)
    }

    fn clone_box(&self) -> Box<dyn DiscreteDistribution> {
        Box::new(self.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constant_distribution_has_one_unit_class() {
        let d = ConstantDistribution::new();
        assert_eq!(d.categories(), &[1.0]);
        assert_eq!(d.probabilities(), &[1.0]);
        assert!(d.parameters().is_empty());
    }

    #[test]
    fn gamma_classes_have_mean_one_and_increase() {
        for alpha in [0.3, 1.0, 5.0] {
            let d = GammaDiscreteDistribution::new(4, alpha).unwrap();
            let mean: f64 = d
                .categories()
                .iter()
                .zip(d.probabilities())
                .map(|(r, p)| r * p)
                .sum();
            assert!((mean - 1.0).abs() < 1e-10, "alpha={alpha}");
            assert!(d.categories().windows(2).all(|w| w[0] < w[1]), "alpha={alpha}");
        }
    }

    #[test]
    fn gamma_with_shape_one_matches_reference_rates() {
        // Exponential distribution split in quartiles.
        let d = GammaDiscreteDistribution::new(4, 1.0).unwrap();
        let expected = [0.1369538, 0.4767519, 1.0000000, 2.3862944];
        for (r, e) in d.categories().iter().zip(expected) {
            assert!((r - e).abs() < 1e-5, "{r} vs {e}");
        }
    }

    #[test]
    fn large_shape_concentrates_rates_near_one() {
        let d = GammaDiscreteDistribution::new(4, 200.0).unwrap();
        assert!(d.categories().iter().all(|r| (r - 1.0).abs() < 0.15));
    }

    #[test]
    fn shape_is_bounded() {
        assert!(GammaDiscreteDistribution::new(4, 1e6).is_err());
        assert!(GammaDiscreteDistribution::new(4, 0.01).is_err());

        let mut d = GammaDiscreteDistribution::new(4, 1.0).unwrap();
        let before = d.categories().to_vec();
        let values = ParameterList::from_parameters([Parameter::unconstrained("alpha", 1.3e6)]).unwrap();
        assert!(matches!(
            d.set_parameter_values(&values),
            Err(DistributionError::Parameter(ParameterError::ConstraintViolation { .. }))
        ));
        assert_eq!(d.alpha(), 1.0);
        assert_eq!(d.categories(), before.as_slice());
    }

    #[test]
    fn both_ends_of_the_shape_domain_discretize() {
        for alpha in [0.05, 200.0] {
            let d = GammaDiscreteDistribution::new(4, alpha).unwrap();
            assert!(d.categories().iter().all(|r| r.is_finite() && *r >= 0.0), "alpha={alpha}");
            let mean: f64 = d.categories().iter().sum::<f64>() / 4.0;
            assert!((mean - 1.0).abs() < 1e-9, "alpha={alpha}");
        }
    }

    #[test]
    fn alpha_updates_rediscretize() {
        let mut d = GammaDiscreteDistribution::new(4, 1.0).unwrap();
        let before = d.categories().to_vec();
        let values = ParameterList::from_parameters([Parameter::unconstrained("alpha", 0.5)]).unwrap();
        assert_eq!(d.set_parameter_values(&values).unwrap(), vec!["alpha"]);
        assert_ne!(d.categories(), before.as_slice());
    }

    #[test]
    fn zero_classes_are_rejected() {
        assert!(matches!(
            GammaDiscreteDistribution::new(0, 1.0),
            Err(DistributionError::InvalidClassCount(0))
        ));
    }
}
