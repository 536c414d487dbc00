//! # Substitution Models
//!
//! Continuous-time Markov models of sequence evolution and the components
//! they are assembled from.
//!
//! ## Key Components
//!
//! - [`SubstitutionModel`] - Role trait for a generator `Q` and equilibrium
//!   frequencies `π`, exposing `P(t) = exp(Qt)` and its first two time derivatives
//! - [`nucleotide`] - The JC69, K80, T92, HKY85, TN93 and GTR family, selected
//!   by name through [`NucleotideModelKind`]
//! - [`frequencies`] - Parametrized equilibrium-frequency vectors
//! - [`mixed`] - Probability-weighted mixtures of models on one state space
//! - [`rates`] - Discrete distributions of among-site rate variation
//! - [`model_set`] - Assignment of models to tree branches with shared parameters
//!
//! All generators are reversible and normalized so that the expected number of
//! substitutions per unit of time is one: `-Σ π_i Q_ii = 1`.

pub mod frequencies;
pub mod ids;
pub mod mixed;
pub mod model_set;
pub mod nucleotide;
pub mod rates;
pub(crate) mod spectral;

pub use frequencies::{
    FrequenciesSet, FullFrequenciesSet, GcFrequenciesSet, MarkovModulatedFrequenciesSet,
};
pub use ids::ModelId;
pub use mixed::{MixedSubstitutionModel, MixtureOfModels};
pub use model_set::{ModelSetError, SubstitutionModelSet};
pub use nucleotide::{NucleotideModel, NucleotideModelKind};
pub use rates::{ConstantDistribution, DiscreteDistribution, DistributionError, GammaDiscreteDistribution};

use crate::core::alphabet::Alphabet;
use crate::core::data::Alignment;
use crate::core::parameters::{ParameterError, ParameterList};
use nalgebra::DMatrix;
use std::fmt;
use thiserror::Error;

/// Tolerance on the sum of user-supplied frequency vectors.
pub const FREQUENCY_SUM_TOLERANCE: f64 = 1e-14;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ModelError {
    #[error("Unknown substitution model: '{name}'")]
    UnknownModel { name: String },

    #[error("Equilibrium frequencies must sum to 1 (sum is {sum})")]
    FrequencySum { sum: f64 },

    #[error("Expected {expected} frequencies, found {found}")]
    FrequencySize { expected: usize, found: usize },

    #[error("Frequencies must be non-negative, found {value} for state {state}")]
    NegativeFrequency { state: usize, value: f64 },

    #[error("The alignment is over {found}, expected {expected}")]
    AlphabetMismatch { expected: Alphabet, found: Alphabet },

    #[error("A mixture needs at least one sub-model")]
    EmptyMixture,

    #[error("Sub-models of a mixture must share the same state space")]
    HeterogeneousMixture,

    #[error("A likelihood handles at most one mixture model, found {count}")]
    SeveralMixtures { count: usize },

    #[error(transparent)]
    Parameter(#[from] ParameterError),
}

/// A reversible continuous-time Markov model on a finite state space.
///
/// Implementors own their parameter list; every update goes through
/// [`SubstitutionModel::set_parameter_values`], which matches by name and
/// recomputes every derived quantity before returning.
pub trait SubstitutionModel: fmt::Debug {
    fn name(&self) -> &str;

    fn alphabet(&self) -> Alphabet;

    fn number_of_states(&self) -> usize {
        self.alphabet().size()
    }

    fn parameters(&self) -> &ParameterList;

    /// Copies the values of matching parameters and recomputes the model.
    ///
    /// Returns the names of the parameters whose value changed.
    fn set_parameter_values(&mut self, values: &ParameterList) -> Result<Vec<String>, ModelError>;

    fn parameter_value(&self, name: &str) -> Result<f64, ModelError> {
        Ok(self.parameters().value(name)?)
    }

    /// Normalized generator.
    fn generator(&self) -> &DMatrix<f64>;

    /// Rate from `i` to `j`.
    fn qij(&self, i: usize, j: usize) -> f64 {
        self.generator()[(i, j)]
    }

    /// Equilibrium frequencies.
    fn frequencies(&self) -> &[f64];

    /// `P(t) = exp(Qt)`.
    fn transition_probabilities(&self, t: f64) -> DMatrix<f64>;

    /// `dP(t)/dt`.
    fn first_derivative(&self, t: f64) -> DMatrix<f64>;

    /// `d²P(t)/dt²`.
    fn second_derivative(&self, t: f64) -> DMatrix<f64>;

    /// Replaces the equilibrium frequencies, if the model has free ones.
    fn set_frequencies(&mut self, frequencies: &[f64]) -> Result<(), ModelError>;

    /// Estimates the equilibrium frequencies from symbol counts in `alignment`.
    ///
    /// Ambiguous characters spread their count evenly over compatible states;
    /// gaps and unknown characters are ignored. `pseudo_count` is added to
    /// every state before normalization.
    fn set_freq_from_data(&mut self, alignment: &Alignment, pseudo_count: f64) -> Result<(), ModelError> {
        if alignment.alphabet() != self.alphabet() {
            return Err(ModelError::AlphabetMismatch {
                expected: self.alphabet(),
                found: alignment.alphabet(),
            });
        }
        let freqs = observed_frequencies(alignment, pseudo_count);
        self.set_frequencies(&freqs)
    }

    /// Capability query for mixtures.
    fn as_mixed(&self) -> Option<&dyn MixedSubstitutionModel> {
        None
    }

    fn clone_box(&self) -> Box<dyn SubstitutionModel>;
}

impl Clone for Box<dyn SubstitutionModel> {
    fn clone(&self) -> Self {
        self.clone_box()
    }
}

/// Symbol frequencies of `alignment`, smoothed by `pseudo_count`.
pub fn observed_frequencies(alignment: &Alignment, pseudo_count: f64) -> Vec<f64> {
    let alphabet = alignment.alphabet();
    let n = alphabet.size();
    let mut counts = vec![pseudo_count; n];
    for name in alignment.names() {
        let Some(states) = alignment.states(&name) else {
            continue;
        };
        for &set in states {
            if alphabet.is_unknown(set) {
                continue;
            }
            let share = 1.0 / set.count() as f64;
            for s in set.states() {
                counts[s] += share;
            }
        }
    }
    let total: f64 = counts.iter().sum();
    if total <= 0.0 {
        return vec![1.0 / n as f64; n];
    }
    counts.into_iter().map(|c| c / total).collect()
}

/// Checks that `frequencies` is a probability vector of size `expected`.
pub(crate) fn validate_frequencies(frequencies: &[f64], expected: usize) -> Result<(), ModelError> {
    if frequencies.len() != expected {
        return Err(ModelError::FrequencySize {
            expected,
            found: frequencies.len(),
        });
    }
    if let Some((state, &value)) = frequencies
        .iter()
        .enumerate()
        .find(|(_, f)| !(**f >= 0.0))
    {
        return Err(ModelError::NegativeFrequency { state, value });
    }
    let sum: f64 = frequencies.iter().sum();
    if (1.0 - sum).abs() > FREQUENCY_SUM_TOLERANCE {
        return Err(ModelError::FrequencySum { sum });
    }
    Ok(())
}
