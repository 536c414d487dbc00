use super::{ModelError, validate_frequencies};
use crate::core::alphabet::Alphabet;
use crate::core::parameters::{Constraint, Parameter, ParameterList};
use std::fmt;

/// A parametrized vector of equilibrium frequencies.
///
/// The vector always has non-negative entries summing to one; it is
/// recomputed from the parameters on every accepted change.
pub trait FrequenciesSet: fmt::Debug {
    fn alphabet(&self) -> Alphabet;

    /// Size of the frequency vector.
    fn number_of_states(&self) -> usize {
        self.alphabet().size()
    }

    fn frequencies(&self) -> &[f64];

    fn parameters(&self) -> &ParameterList;

    /// Copies matching parameter values and recomputes the vector.
    fn set_parameter_values(&mut self, values: &ParameterList) -> Result<Vec<String>, ModelError>;

    /// Sets the vector directly, updating the parameters accordingly.
    fn set_frequencies(&mut self, frequencies: &[f64]) -> Result<(), ModelError>;

    fn name_prefix(&self) -> &str;

    fn clone_box(&self) -> Box<dyn FrequenciesSet>;
}

impl Clone for Box<dyn FrequenciesSet> {
    fn clone(&self) -> Self {
        self.clone_box()
    }
}

/// One free parameter per state, named `prefix` + state letter, in `[0, 1]`.
///
/// The parameters are normalized to produce the frequency vector, so any
/// feasible assignment yields a valid distribution.
#[derive(Debug, Clone, PartialEq)]
pub struct FullFrequenciesSet {
    alphabet: Alphabet,
    prefix: String,
    parameters: ParameterList,
    frequencies: Vec<f64>,
}

impl FullFrequenciesSet {
    /// Creates a uniform set.
    pub fn new(alphabet: Alphabet, prefix: impl Into<String>) -> Self {
        let n = alphabet.size();
        let prefix = prefix.into();
        let parameters = alphabet
            .letters()
            .iter()
            .filter_map(|l| Parameter::new(format!("{prefix}{l}"), 1.0 / n as f64, Constraint::PROPORTION).ok())
            .collect::<Vec<_>>();
        Self {
            alphabet,
            prefix,
            parameters: ParameterList::from_parameters(parameters).unwrap_or_default(),
            frequencies: vec![1.0 / n as f64; n],
        }
    }

    /// Creates a set holding `frequencies`.
    ///
    /// # Errors
    ///
    /// Fails if the vector has the wrong size, a negative entry, or does not
    /// sum to one within [`FREQUENCY_SUM_TOLERANCE`](super::FREQUENCY_SUM_TOLERANCE).
    pub fn with_frequencies(
        alphabet: Alphabet,
        prefix: impl Into<String>,
        frequencies: &[f64],
    ) -> Result<Self, ModelError> {
        let mut set = Self::new(alphabet, prefix);
        set.set_frequencies(frequencies)?;
        Ok(set)
    }

    fn update(&mut self) {
        let values = self.parameters.values();
        let sum: f64 = values.iter().sum();
        let n = values.len();
        self.frequencies = if sum > 0.0 {
            values.into_iter().map(|v| v / sum).collect()
        } else {
            vec![1.0 / n as f64; n]
        };
    }
}

impl FrequenciesSet for FullFrequenciesSet {
    fn alphabet(&self) -> Alphabet {
        self.alphabet
    }

    fn frequencies(&self) -> &[f64] {
        &self.frequencies
    }

    fn parameters(&self) -> &ParameterList {
        &self.parameters
    }

    fn set_parameter_values(&mut self, values: &ParameterList) -> Result<Vec<String>, ModelError> {
        let changed = self.parameters.match_values(values)?;
        if !changed.is_empty() {
            self.update();
        }
        Ok(changed)
    }

    fn set_frequencies(&mut self, frequencies: &[f64]) -> Result<(), ModelError> {
        validate_frequencies(frequencies, self.alphabet.size())?;
        let updated = self.parameters.with_values(frequencies)?;
        self.parameters = updated;
        self.frequencies = frequencies.to_vec();
        Ok(())
    }

    fn name_prefix(&self) -> &str {
        &self.prefix
    }

    fn clone_box(&self) -> Box<dyn FrequenciesSet> {
        Box::new(self.clone())
    }
}

/// GC-content parametrization: `π = [(1-θ)/2, θ/2, θ/2, (1-θ)/2]`.
#[derive(Debug, Clone, PartialEq)]
pub struct GcFrequenciesSet {
    alphabet: Alphabet,
    prefix: String,
    parameters: ParameterList,
    frequencies: Vec<f64>,
}

impl GcFrequenciesSet {
    pub fn new(alphabet: Alphabet, prefix: impl Into<String>, theta: f64) -> Result<Self, ModelError> {
        let prefix = prefix.into();
        let theta_param = Parameter::new(format!("{prefix}theta"), theta, Constraint::PROPORTION)?;
        let mut set = Self {
            alphabet,
            prefix,
            parameters: ParameterList::from_parameters([theta_param])?,
            frequencies: Vec::new(),
        };
        set.update();
        Ok(set)
    }

    fn update(&mut self) {
        let theta = self.parameters.at(0).map(Parameter::value).unwrap_or(0.5);
        self.frequencies = vec![(1.0 - theta) / 2.0, theta / 2.0, theta / 2.0, (1.0 - theta) / 2.0];
    }
}

impl FrequenciesSet for GcFrequenciesSet {
    fn alphabet(&self) -> Alphabet {
        self.alphabet
    }

    fn frequencies(&self) -> &[f64] {
        &self.frequencies
    }

    fn parameters(&self) -> &ParameterList {
        &self.parameters
    }

    fn set_parameter_values(&mut self, values: &ParameterList) -> Result<Vec<String>, ModelError> {
        let changed = self.parameters.match_values(values)?;
        if !changed.is_empty() {
            self.update();
        }
        Ok(changed)
    }

    /// Keeps only the GC content of `frequencies`.
    fn set_frequencies(&mut self, frequencies: &[f64]) -> Result<(), ModelError> {
        validate_frequencies(frequencies, 4)?;
        self.parameters.set_value_at(0, frequencies[1] + frequencies[2])?;
        self.update();
        Ok(())
    }

    fn name_prefix(&self) -> &str {
        &self.prefix
    }

    fn clone_box(&self) -> Box<dyn FrequenciesSet> {
        Box::new(self.clone())
    }
}

/// Frequencies on the product space of hidden rate classes and a base state
/// space: the Kronecker product of fixed class frequencies and a base set.
#[derive(Debug, Clone)]
pub struct MarkovModulatedFrequenciesSet {
    base: Box<dyn FrequenciesSet>,
    class_frequencies: Vec<f64>,
    frequencies: Vec<f64>,
}

impl MarkovModulatedFrequenciesSet {
    pub fn new(base: Box<dyn FrequenciesSet>, class_frequencies: Vec<f64>) -> Result<Self, ModelError> {
        validate_frequencies(&class_frequencies, class_frequencies.len())?;
        let mut set = Self {
            base,
            class_frequencies,
            frequencies: Vec::new(),
        };
        set.update();
        Ok(set)
    }

    pub fn base(&self) -> &dyn FrequenciesSet {
        self.base.as_ref()
    }

    pub fn class_frequencies(&self) -> &[f64] {
        &self.class_frequencies
    }

    fn update(&mut self) {
        let base = self.base.frequencies();
        self.frequencies = self
            .class_frequencies
            .iter()
            .flat_map(|c| base.iter().map(move |b| c * b))
            .collect();
    }
}

impl FrequenciesSet for MarkovModulatedFrequenciesSet {
    fn alphabet(&self) -> Alphabet {
        self.base.alphabet()
    }

    fn number_of_states(&self) -> usize {
        self.class_frequencies.len() * self.base.number_of_states()
    }

    fn frequencies(&self) -> &[f64] {
        &self.frequencies
    }

    fn parameters(&self) -> &ParameterList {
        self.base.parameters()
    }

    fn set_parameter_values(&mut self, values: &ParameterList) -> Result<Vec<String>, ModelError> {
        let changed = self.base.set_parameter_values(values)?;
        self.update();
        Ok(changed)
    }

    /// Sets the base set to the marginal of `frequencies` over rate classes.
    fn set_frequencies(&mut self, frequencies: &[f64]) -> Result<(), ModelError> {
        validate_frequencies(frequencies, self.number_of_states())?;
        let n = self.base.number_of_states();
        let mut marginal = vec![0.0; n];
        for (i, f) in frequencies.iter().enumerate() {
            marginal[i % n] += f;
        }
        let sum: f64 = marginal.iter().sum();
        marginal.iter_mut().for_each(|m| *m /= sum);
        self.base.set_frequencies(&marginal)?;
        self.update();
        Ok(())
    }

    fn name_prefix(&self) -> &str {
        self.base.name_prefix()
    }

    fn clone_box(&self) -> Box<dyn FrequenciesSet> {
        Box::new(self.clone())
    }
}
