use super::spectral::SpectralDecomposition;
use super::{ModelError, SubstitutionModel, validate_frequencies};
use crate::core::alphabet::Alphabet;
use crate::core::parameters::{Constraint, Parameter, ParameterList};
use nalgebra::DMatrix;
use phf::{Map, phf_map};
use serde::Deserialize;
use std::fmt;
use std::str::FromStr;

/// Name → kind registry used by configuration.
static MODEL_REGISTRY: Map<&'static str, NucleotideModelKind> = phf_map! {
    "JCnuc" => NucleotideModelKind::Jc69,
    "K80" => NucleotideModelKind::K80,
    "T92" => NucleotideModelKind::T92,
    "HKY85" => NucleotideModelKind::Hky85,
    "TN93" => NucleotideModelKind::Tn93,
    "GTR" => NucleotideModelKind::Gtr,
};

const FREQUENCY_NAMES: [&str; 4] = ["piA", "piC", "piG", "piT"];
const EXCHANGEABILITY_NAMES: [&str; 6] = ["a", "b", "c", "d", "e", "f"];
/// State pairs of the GTR exchangeabilities `a` to `f`.
const EXCHANGEABILITY_PAIRS: [(usize, usize); 6] = [(0, 1), (0, 2), (0, 3), (1, 2), (1, 3), (2, 3)];

const DEFAULT_KAPPA: f64 = 2.0;
const DEFAULT_THETA: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(try_from = "String")]
pub enum NucleotideModelKind {
    Jc69,
    K80,
    T92,
    Hky85,
    Tn93,
    Gtr,
}

impl NucleotideModelKind {
    /// Configuration name of the model.
    pub fn name(&self) -> &'static str {
        match self {
            NucleotideModelKind::Jc69 => "JCnuc",
            NucleotideModelKind::K80 => "K80",
            NucleotideModelKind::T92 => "T92",
            NucleotideModelKind::Hky85 => "HKY85",
            NucleotideModelKind::Tn93 => "TN93",
            NucleotideModelKind::Gtr => "GTR",
        }
    }

    /// Whether the equilibrium frequencies are free parameters (`piA`..`piT`).
    pub fn has_free_frequencies(&self) -> bool {
        matches!(
            self,
            NucleotideModelKind::Hky85 | NucleotideModelKind::Tn93 | NucleotideModelKind::Gtr
        )
    }

    fn default_parameters(&self) -> Vec<Parameter> {
        let positive = |name: &str, v: f64| Parameter::new(name, v, Constraint::POSITIVE);
        let mut params: Vec<Result<Parameter, _>> = match self {
            NucleotideModelKind::Jc69 => vec![],
            NucleotideModelKind::K80 | NucleotideModelKind::Hky85 => {
                vec![positive("kappa", DEFAULT_KAPPA)]
            }
            NucleotideModelKind::T92 => vec![
                positive("kappa", DEFAULT_KAPPA),
                Parameter::new("theta", DEFAULT_THETA, Constraint::OPEN_PROPORTION),
            ],
            NucleotideModelKind::Tn93 => vec![
                positive("kappa1", DEFAULT_KAPPA),
                positive("kappa2", DEFAULT_KAPPA),
            ],
            NucleotideModelKind::Gtr => EXCHANGEABILITY_NAMES
                .iter()
                .map(|n| positive(*n, 1.0))
                .collect(),
        };
        if self.has_free_frequencies() {
            params.extend(
                FREQUENCY_NAMES
                    .iter()
                    .map(|n| Parameter::new(*n, 0.25, Constraint::OPEN_PROPORTION)),
            );
        }
        // Defaults are feasible by construction.
        params.into_iter().filter_map(Result::ok).collect()
    }
}

impl FromStr for NucleotideModelKind {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MODEL_REGISTRY
            .get(s)
            .copied()
            .ok_or_else(|| ModelError::UnknownModel {
                name: s.to_string(),
            })
    }
}

impl TryFrom<String> for NucleotideModelKind {
    type Error = ModelError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl fmt::Display for NucleotideModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Solver {
    /// Uniform-frequency models with closed-form `P(t)`: the transition/transversion
    /// ratio (1 for JC69) and the normalizing rate.
    ClosedForm { kappa: f64, beta: f64 },
    Spectral(SpectralDecomposition),
}

/// A time-reversible model on nucleotides.
#[derive(Debug, Clone, PartialEq)]
pub struct NucleotideModel {
    kind: NucleotideModelKind,
    alphabet: Alphabet,
    parameters: ParameterList,
    frequencies: Vec<f64>,
    generator: DMatrix<f64>,
    solver: Solver,
}

impl NucleotideModel {
    /// Creates a model with default parameter values (`kappa = 2`,
    /// `theta = 0.5`, exchangeabilities 1, uniform frequencies).
    pub fn new(kind: NucleotideModelKind, alphabet: Alphabet) -> Self {
        let parameters = ParameterList::from_parameters(kind.default_parameters()).unwrap_or_default();
        let mut model = Self {
            kind,
            alphabet,
            parameters,
            frequencies: vec![0.25; 4],
            generator: DMatrix::zeros(4, 4),
            solver: Solver::ClosedForm {
                kappa: 1.0,
                beta: 1.0,
            },
        };
        model.update();
        model
    }

    /// Creates a model and applies `values` over the defaults.
    ///
    /// # Errors
    ///
    /// If any of `piA`..`piT` is given, all four frequencies must sum to one
    /// within [`FREQUENCY_SUM_TOLERANCE`](super::FREQUENCY_SUM_TOLERANCE);
    /// otherwise [`ModelError::FrequencySum`] is returned.
    pub fn with_parameters(
        kind: NucleotideModelKind,
        alphabet: Alphabet,
        values: &ParameterList,
    ) -> Result<Self, ModelError> {
        let mut model = Self::new(kind, alphabet);
        if kind.has_free_frequencies() && FREQUENCY_NAMES.iter().any(|n| values.contains(n)) {
            let freqs: Vec<f64> = FREQUENCY_NAMES
                .iter()
                .map(|n| values.value(n).unwrap_or(0.25))
                .collect();
            validate_frequencies(&freqs, 4)?;
        }
        model.set_parameter_values(values)?;
        Ok(model)
    }

    pub fn kind(&self) -> NucleotideModelKind {
        self.kind
    }

    fn value_or(&self, name: &str, default: f64) -> f64 {
        self.parameters.value(name).unwrap_or(default)
    }

    /// Recomputes frequencies, generator and decomposition from the parameters.
    fn update(&mut self) {
        self.frequencies = match self.kind {
            NucleotideModelKind::Jc69 | NucleotideModelKind::K80 => vec![0.25; 4],
            NucleotideModelKind::T92 => {
                let theta = self.value_or("theta", DEFAULT_THETA);
                vec![(1.0 - theta) / 2.0, theta / 2.0, theta / 2.0, (1.0 - theta) / 2.0]
            }
            _ => {
                let raw: Vec<f64> = FREQUENCY_NAMES.iter().map(|n| self.value_or(n, 0.25)).collect();
                let sum: f64 = raw.iter().sum();
                raw.into_iter().map(|p| p / sum).collect()
            }
        };

        let mut exchangeability = DMatrix::from_element(4, 4, 1.0);
        let mut set = |i: usize, j: usize, v: f64| {
            exchangeability[(i, j)] = v;
            exchangeability[(j, i)] = v;
        };
        match self.kind {
            NucleotideModelKind::Jc69 => {}
            NucleotideModelKind::K80 | NucleotideModelKind::T92 | NucleotideModelKind::Hky85 => {
                let kappa = self.value_or("kappa", DEFAULT_KAPPA);
                set(0, 2, kappa);
                set(1, 3, kappa);
            }
            NucleotideModelKind::Tn93 => {
                set(0, 2, self.value_or("kappa1", DEFAULT_KAPPA));
                set(1, 3, self.value_or("kappa2", DEFAULT_KAPPA));
            }
            NucleotideModelKind::Gtr => {
                for (name, &(i, j)) in EXCHANGEABILITY_NAMES.iter().zip(EXCHANGEABILITY_PAIRS.iter()) {
                    set(i, j, self.value_or(name, 1.0));
                }
            }
        }

        let mut q = DMatrix::zeros(4, 4);
        for i in 0..4 {
            let mut row = 0.0;
            for j in 0..4 {
                if i != j {
                    q[(i, j)] = exchangeability[(i, j)] * self.frequencies[j];
                    row += q[(i, j)];
                }
            }
            q[(i, i)] = -row;
        }
        let rate: f64 = -(0..4).map(|i| self.frequencies[i] * q[(i, i)]).sum::<f64>();
        if rate > 0.0 {
            q /= rate;
        }
        self.generator = q;

        self.solver = match self.kind {
            NucleotideModelKind::Jc69 => Solver::ClosedForm {
                kappa: 1.0,
                beta: 1.0 / 3.0,
            },
            NucleotideModelKind::K80 => {
                let kappa = self.value_or("kappa", DEFAULT_KAPPA);
                Solver::ClosedForm {
                    kappa,
                    beta: 1.0 / (kappa + 2.0),
                }
            }
            _ => Solver::Spectral(SpectralDecomposition::new(&self.generator, &self.frequencies)),
        };
    }

    /// Closed-form `d^order P / dt^order` for uniform-frequency models.
    ///
    /// With transversion rate `β` and transition rate `κβ`, the eigenvalues
    /// are `-4β` and `-2(κ+1)β`.
    fn closed_form(kappa: f64, beta: f64, t: f64, order: i32) -> DMatrix<f64> {
        let l1 = -4.0 * beta;
        let l2 = -2.0 * (kappa + 1.0) * beta;
        let term = |l: f64| l.powi(order) * (l * t).exp();
        let (e1, e2) = (term(l1), term(l2));
        let constant = if order == 0 { 0.25 } else { 0.0 };
        let same = constant + 0.25 * e1 + 0.5 * e2;
        let transition = constant + 0.25 * e1 - 0.5 * e2;
        let transversion = constant - 0.25 * e1;
        DMatrix::from_fn(4, 4, |i, j| {
            if i == j {
                same
            } else if (i + j) % 2 == 0 {
                transition
            } else {
                transversion
            }
        })
    }

    fn derivative(&self, t: f64, order: i32) -> DMatrix<f64> {
        match &self.solver {
            Solver::ClosedForm { kappa, beta } => Self::closed_form(*kappa, *beta, t, order),
            Solver::Spectral(s) => match order {
                0 => s.transition_probabilities(t),
                1 => s.first_derivative(t),
                _ => s.second_derivative(t),
            },
        }
    }
}

impl SubstitutionModel for NucleotideModel {
    fn name(&self) -> &str {
        self.kind.name()
    }

    fn alphabet(&self) -> Alphabet {
        self.alphabet
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

    fn generator(&self) -> &DMatrix<f64> {
        &self.generator
    }

    fn frequencies(&self) -> &[f64] {
        &self.frequencies
    }

    fn transition_probabilities(&self, t: f64) -> DMatrix<f64> {
        self.derivative(t, 0)
    }

    fn first_derivative(&self, t: f64) -> DMatrix<f64> {
        self.derivative(t, 1)
    }

    fn second_derivative(&self, t: f64) -> DMatrix<f64> {
        self.derivative(t, 2)
    }

    /// Sets `piA`..`piT` (or `theta` for T92, from the GC content).
    ///
    /// Models with fixed uniform frequencies leave the call without effect.
    fn set_frequencies(&mut self, frequencies: &[f64]) -> Result<(), ModelError> {
        validate_frequencies(frequencies, 4)?;
        let mut values = ParameterList::new();
        match self.kind {
            NucleotideModelKind::Jc69 | NucleotideModelKind::K80 => {
                tracing::debug!(model = self.name(), "Model has fixed frequencies; ignoring new ones.");
                return Ok(());
            }
            NucleotideModelKind::T92 => {
                let theta = Constraint::OPEN_PROPORTION.closest_feasible(frequencies[1] + frequencies[2]);
                values.add(Parameter::unconstrained("theta", theta))?;
            }
            _ => {
                for (name, &f) in FREQUENCY_NAMES.iter().zip(frequencies) {
                    let f = Constraint::OPEN_PROPORTION.closest_feasible(f);
                    values.add(Parameter::unconstrained(*name, f))?;
                }
            }
        }
        self.set_parameter_values(&values)?;
        Ok(())
    }

    fn clone_box(&self) -> Box<dyn SubstitutionModel> {
        Box::new(self.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::data::Alignment;

    const ALL_KINDS: [NucleotideModelKind; 6] = [
        NucleotideModelKind::Jc69,
        NucleotideModelKind::K80,
        NucleotideModelKind::T92,
        NucleotideModelKind::Hky85,
        NucleotideModelKind::Tn93,
        NucleotideModelKind::Gtr,
    ];

    fn skewed(kind: NucleotideModelKind) -> NucleotideModel {
        let mut model = NucleotideModel::new(kind, Alphabet::Dna);
        let values = ParameterList::from_parameters([
            Parameter::unconstrained("kappa", 3.5),
            Parameter::unconstrained("kappa1", 4.0),
            Parameter::unconstrained("kappa2", 1.5),
            Parameter::unconstrained("theta", 0.62),
            Parameter::unconstrained("a", 0.7),
            Parameter::unconstrained("b", 2.1),
            Parameter::unconstrained("e", 3.3),
            Parameter::unconstrained("piA", 0.1),
            Parameter::unconstrained("piC", 0.2),
            Parameter::unconstrained("piG", 0.3),
            Parameter::unconstrained("piT", 0.4),
        ])
        .unwrap();
        model.set_parameter_values(&values).unwrap();
        model
    }

    #[test]
    fn registry_resolves_every_configuration_name() {
        for kind in ALL_KINDS {
            assert_eq!(kind.name().parse::<NucleotideModelKind>().unwrap(), kind);
        }
        assert!(matches!(
            "WAG".parse::<NucleotideModelKind>(),
            Err(ModelError::UnknownModel { name }) if name == "WAG"
        ));
    }

    #[test]
    fn generators_are_normalized_with_zero_row_sums() {
        for kind in ALL_KINDS {
            let m = skewed(kind);
            let q = m.generator();
            let pi = m.frequencies();
            assert!((pi.iter().sum::<f64>() - 1.0).abs() < 1e-12, "{kind}");
            for i in 0..4 {
                let row: f64 = (0..4).map(|j| q[(i, j)]).sum();
                assert!(row.abs() < 1e-9, "{kind}");
            }
            let rate: f64 = -(0..4).map(|i| pi[i] * q[(i, i)]).sum::<f64>();
            assert!((rate - 1.0).abs() < 1e-12, "{kind}");
        }
    }

    #[test]
    fn transition_matrices_are_stochastic_and_start_at_identity() {
        for kind in ALL_KINDS {
            let m = skewed(kind);
            let p0 = m.transition_probabilities(0.0);
            assert!((p0 - DMatrix::identity(4, 4)).abs().max() < 1e-9, "{kind}");
            for &t in &[0.01, 0.3, 2.0, 50.0] {
                let p = m.transition_probabilities(t);
                for i in 0..4 {
                    let row: f64 = (0..4).map(|j| p[(i, j)]).sum();
                    assert!((row - 1.0).abs() < 1e-9, "{kind} t={t}");
                    assert!((0..4).all(|j| p[(i, j)] >= 0.0), "{kind} t={t}");
                }
            }
        }
    }

    #[test]
    fn random_gtr_parameters_keep_transition_matrices_stochastic() {
        use rand::{Rng, SeedableRng, rngs::StdRng};

        let mut rng = StdRng::seed_from_u64(0x5eed);
        for _ in 0..20 {
            let mut pi: Vec<f64> = (0..4).map(|_| rng.gen_range(0.05..1.0)).collect();
            let total: f64 = pi.iter().sum();
            pi.iter_mut().for_each(|p| *p /= total);
            let mut values: Vec<Parameter> = EXCHANGEABILITY_NAMES
                .iter()
                .map(|n| Parameter::unconstrained(*n, rng.gen_range(0.1..10.0)))
                .collect();
            values.extend(FREQUENCY_NAMES.iter().zip(&pi).map(|(n, p)| Parameter::unconstrained(*n, *p)));
            let values = ParameterList::from_parameters(values).unwrap();
            let m = NucleotideModel::with_parameters(NucleotideModelKind::Gtr, Alphabet::Dna, &values).unwrap();

            let t = rng.gen_range(0.001..5.0);
            let p = m.transition_probabilities(t);
            for i in 0..4 {
                let row: f64 = (0..4).map(|j| p[(i, j)]).sum();
                assert!((row - 1.0).abs() < 1e-9, "t={t}");
                assert!((0..4).all(|j| p[(i, j)] >= 0.0), "t={t}");
            }
            // Detailed balance.
            let q = m.generator();
            let f = m.frequencies();
            assert!((f[0] * q[(0, 2)] - f[2] * q[(2, 0)]).abs() < 1e-12);
        }
    }

    #[test]
    fn derivatives_match_finite_differences() {
        let h = 1e-6;
        for kind in ALL_KINDS {
            let m = skewed(kind);
            let t = 0.37;
            let numeric = (m.transition_probabilities(t + h) - m.transition_probabilities(t - h)) / (2.0 * h);
            assert!((numeric - m.first_derivative(t)).abs().max() < 1e-6, "{kind}");
            let numeric2 = (m.first_derivative(t + h) - m.first_derivative(t - h)) / (2.0 * h);
            assert!((numeric2 - m.second_derivative(t)).abs().max() < 1e-6, "{kind}");
        }
    }

    #[test]
    fn closed_form_k80_agrees_with_the_generator() {
        let m = skewed(NucleotideModelKind::K80);
        let as_hky = skewed(NucleotideModelKind::Hky85);
        // HKY85 with uniform frequencies is K80.
        let mut uniform = as_hky.clone();
        uniform.set_frequencies(&[0.25; 4]).unwrap();
        let diff = m.transition_probabilities(0.8) - uniform.transition_probabilities(0.8);
        assert!(diff.abs().max() < 1e-9);
    }

    #[test]
    fn construction_rejects_frequencies_not_summing_to_one() {
        let values = ParameterList::from_parameters([
            Parameter::unconstrained("piA", 0.3),
            Parameter::unconstrained("piC", 0.3),
            Parameter::unconstrained("piG", 0.3),
            Parameter::unconstrained("piT", 0.3),
        ])
        .unwrap();
        let result = NucleotideModel::with_parameters(NucleotideModelKind::Hky85, Alphabet::Dna, &values);
        assert!(matches!(result, Err(ModelError::FrequencySum { .. })));
    }

    #[test]
    fn frequencies_are_estimated_from_data() {
        let data = Alignment::from_pairs(Alphabet::Dna, [("x", "AACG"), ("y", "GGCT")]).unwrap();
        let mut m = NucleotideModel::new(NucleotideModelKind::Hky85, Alphabet::Dna);
        m.set_freq_from_data(&data, 0.0).unwrap();
        let expected = [0.25, 0.25, 0.375, 0.125];
        for (x, y) in m.frequencies().iter().zip(expected) {
            assert!((x - y).abs() < 1e-12);
        }

        let mut t92 = NucleotideModel::new(NucleotideModelKind::T92, Alphabet::Dna);
        t92.set_freq_from_data(&data, 0.0).unwrap();
        assert!((t92.parameter_value("theta").unwrap() - 0.625).abs() < 1e-12);
    }

    #[test]
    fn set_parameter_values_reports_only_changed_names() {
        let mut m = NucleotideModel::new(NucleotideModelKind::K80, Alphabet::Dna);
        let same = ParameterList::from_parameters([Parameter::unconstrained("kappa", 2.0)]).unwrap();
        assert!(m.set_parameter_values(&same).unwrap().is_empty());
        let other = ParameterList::from_parameters([Parameter::unconstrained("kappa", 5.0)]).unwrap();
        assert_eq!(m.set_parameter_values(&other).unwrap(), vec!["kappa"]);
    }
}
