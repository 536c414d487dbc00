use super::{ModelError, SubstitutionModel};
use crate::core::alphabet::Alphabet;
use crate::core::parameters::{Constraint, Parameter, ParameterList};
use nalgebra::DMatrix;
use tracing::warn;

/// A probability-weighted collection of sub-models on one state space.
pub trait MixedSubstitutionModel: SubstitutionModel {
    fn number_of_models(&self) -> usize;

    /// The `i`-th sub-model, if any.
    fn n_model(&self, i: usize) -> Option<&dyn SubstitutionModel>;

    /// Probability of the `i`-th sub-model, if any.
    fn n_probability(&self, i: usize) -> Option<f64>;

    /// Probabilities of all sub-models; they sum to one.
    fn probabilities(&self) -> &[f64];
}

/// Site-heterogeneity mixture: every site evolves under one of the sub-models,
/// chosen with the mixture probabilities.
///
/// Sub-model parameters are exposed as `"{i}_{name}"` (1-based `i`); the
/// weights use a stick-breaking parametrization `relproba1..relproba{n-1}`
/// in `]0, 1[`. The aggregate transition matrices and frequencies are the
/// probability-weighted averages of those of the sub-models, i.e. the
/// expectation for one branch taken alone. A site keeps its sub-model on every
/// branch, so [`PhyloLikelihood`](crate::engine::likelihood::PhyloLikelihood)
/// never uses the aggregate: it makes one site class per sub-model.
#[derive(Debug, Clone)]
pub struct MixtureOfModels {
    models: Vec<Box<dyn SubstitutionModel>>,
    parameters: ParameterList,
    probabilities: Vec<f64>,
    frequencies: Vec<f64>,
    generator: DMatrix<f64>,
}

impl MixtureOfModels {
    /// Creates a mixture with equal probabilities.
    pub fn new(models: Vec<Box<dyn SubstitutionModel>>) -> Result<Self, ModelError> {
        let first = models.first().ok_or(ModelError::EmptyMixture)?;
        let (alphabet, n) = (first.alphabet(), first.number_of_states());
        if models
            .iter()
            .any(|m| m.alphabet() != alphabet || m.number_of_states() != n)
        {
            return Err(ModelError::HeterogeneousMixture);
        }
        let mut parameters = ParameterList::new();
        for (i, m) in models.iter().enumerate() {
            for p in m.parameters() {
                parameters.add(p.renamed(format!("{}_{}", i + 1, p.name())))?;
            }
        }
        // Stick-breaking weights giving equal probabilities.
        let k = models.len();
        for i in 1..k {
            let relative = 1.0 / (k - i + 1) as f64;
            parameters.add(Parameter::new(
                format!("relproba{i}"),
                relative,
                Constraint::OPEN_PROPORTION,
            )?)?;
        }
        let mut mixture = Self {
            models,
            parameters,
            probabilities: Vec::new(),
            frequencies: Vec::new(),
            generator: DMatrix::zeros(n, n),
        };
        mixture.update();
        Ok(mixture)
    }

    fn update(&mut self) {
        let k = self.models.len();
        let mut remaining = 1.0;
        self.probabilities = (1..=k)
            .map(|i| {
                if i == k {
                    remaining
                } else {
                    let r = self
                        .parameters
                        .value(&format!("relproba{i}"))
                        .unwrap_or(1.0 / (k - i + 1) as f64);
                    let p = remaining * r;
                    remaining -= p;
                    p
                }
            })
            .collect();
        let n = self.number_of_states();
        let mut freqs = vec![0.0; n];
        let mut q = DMatrix::zeros(n, n);
        for (m, &w) in self.models.iter().zip(&self.probabilities) {
            for (f, mf) in freqs.iter_mut().zip(m.frequencies()) {
                *f += w * mf;
            }
            q += m.generator() * w;
        }
        self.frequencies = freqs;
        self.generator = q;
    }

    fn weighted(&self, f: impl Fn(&dyn SubstitutionModel) -> DMatrix<f64>) -> DMatrix<f64> {
        let n = self.number_of_states();
        self.models
            .iter()
            .zip(&self.probabilities)
            .fold(DMatrix::zeros(n, n), |acc, (m, &w)| acc + f(m.as_ref()) * w)
    }
}

impl SubstitutionModel for MixtureOfModels {
    fn name(&self) -> &str {
        "Mixture"
    }

    fn alphabet(&self) -> Alphabet {
        self.models[0].alphabet()
    }

    fn number_of_states(&self) -> usize {
        self.models[0].number_of_states()
    }

    fn parameters(&self) -> &ParameterList {
        &self.parameters
    }

    fn set_parameter_values(&mut self, values: &ParameterList) -> Result<Vec<String>, ModelError> {
        let changed = self.parameters.match_values(values)?;
        if changed.is_empty() {
            return Ok(changed);
        }
        for (i, model) in self.models.iter_mut().enumerate() {
            let prefix = format!("{}_", i + 1);
            let mut local = ParameterList::new();
            for name in changed.iter().filter(|n| n.starts_with(&prefix)) {
                let p = self.parameters.parameter(name)?;
                local.add(Parameter::unconstrained(&name[prefix.len()..], p.value()))?;
            }
            if !local.is_empty() {
                model.set_parameter_values(&local)?;
            }
        }
        self.update();
        Ok(changed)
    }

    fn generator(&self) -> &DMatrix<f64> {
        &self.generator
    }

    /// A mixture has no single rate matrix.
    fn qij(&self, _i: usize, _j: usize) -> f64 {
        0.0
    }

    fn frequencies(&self) -> &[f64] {
        &self.frequencies
    }

    fn transition_probabilities(&self, t: f64) -> DMatrix<f64> {
        self.weighted(|m| m.transition_probabilities(t))
    }

    fn first_derivative(&self, t: f64) -> DMatrix<f64> {
        self.weighted(|m| m.first_derivative(t))
    }

    fn second_derivative(&self, t: f64) -> DMatrix<f64> {
        self.weighted(|m| m.second_derivative(t))
    }

    fn set_frequencies(&mut self, _frequencies: &[f64]) -> Result<(), ModelError> {
        warn!("Frequencies of a mixture are defined by its sub-models; ignoring new ones.");
        Ok(())
    }

    fn as_mixed(&self) -> Option<&dyn MixedSubstitutionModel> {
        Some(self)
    }

    fn clone_box(&self) -> Box<dyn SubstitutionModel> {
        Box::new(self.clone())
    }
}

impl MixedSubstitutionModel for MixtureOfModels {
    fn number_of_models(&self) -> usize {
        self.models.len()
    }

    fn n_model(&self, i: usize) -> Option<&dyn SubstitutionModel> {
        self.models.get(i).map(|m| m.as_ref())
    }

    fn n_probability(&self, i: usize) -> Option<f64> {
        self.probabilities.get(i).copied()
    }

    fn probabilities(&self) -> &[f64] {
        &self.probabilities
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::models::nucleotide::{NucleotideModel, NucleotideModelKind};

    fn mixture() -> MixtureOfModels {
        MixtureOfModels::new(vec![
            Box::new(NucleotideModel::new(NucleotideModelKind::K80, Alphabet::Dna)),
            Box::new(NucleotideModel::new(NucleotideModelKind::Hky85, Alphabet::Dna)),
            Box::new(NucleotideModel::new(NucleotideModelKind::Jc69, Alphabet::Dna)),
        ])
        .unwrap()
    }

    #[test]
    fn default_probabilities_are_equal_and_sum_to_one() {
        let m = mixture();
        assert_eq!(m.number_of_models(), 3);
        for p in m.probabilities() {
            assert!((p - 1.0 / 3.0).abs() < 1e-12);
        }
    }

    #[test]
    fn sub_model_parameters_are_prefixed() {
        let m = mixture();
        let names = m.parameters().names();
        assert!(names.contains(&"1_kappa".to_string()));
        assert!(names.contains(&"2_piG".to_string()));
        assert!(names.contains(&"relproba2".to_string()));
    }

    #[test]
    fn updates_reach_the_sub_models() {
        let mut m = mixture();
        let values = ParameterList::from_parameters([
            Parameter::unconstrained("1_kappa", 6.0),
            Parameter::unconstrained("relproba1", 0.5),
        ])
        .unwrap();
        m.set_parameter_values(&values).unwrap();
        assert_eq!(m.n_model(0).unwrap().parameter_value("kappa").unwrap(), 6.0);
        assert!((m.n_probability(0).unwrap() - 0.5).abs() < 1e-12);
        let total: f64 = m.probabilities().iter().sum();
        assert!((total - 1.0).abs() < 1e-12);
    }

    #[test]
    fn aggregate_matrices_are_stochastic_and_qij_is_zero() {
        let m = mixture();
        let p = m.transition_probabilities(0.4);
        for i in 0..4 {
            let row: f64 = (0..4).map(|j| p[(i, j)]).sum();
            assert!((row - 1.0).abs() < 1e-9);
        }
        assert_eq!(m.qij(0, 1), 0.0);
        assert!(m.as_mixed().is_some());
    }

    #[test]
    fn empty_mixture_is_rejected() {
        assert!(matches!(
            MixtureOfModels::new(Vec::new()),
            Err(ModelError::EmptyMixture)
        ));
    }
}
