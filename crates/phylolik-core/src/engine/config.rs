use crate::core::alphabet::Alphabet;
use crate::core::data::Alignment;
use crate::core::models::{
    ConstantDistribution, DiscreteDistribution, DistributionError, GammaDiscreteDistribution, ModelError,
    NucleotideModel, NucleotideModelKind, SubstitutionModel,
};
use crate::core::parameters::{Parameter, ParameterList};
use crate::core::tree::ReconstructionMethod;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum ConfigError {
    #[error("Missing required parameter: {0}")]
    MissingParameter(&'static str),

    #[error("Unknown optimization method: '{0}'")]
    UnknownMethod(String),

    #[error("Unknown value '{value}' for '{key}'")]
    UnknownValue { key: &'static str, value: String },

    #[error("Invalid value for '{key}': {reason}")]
    InvalidValue { key: &'static str, reason: String },
}

/// Default file receiving the diagnostic dump of a NaN likelihood.
pub const DEFAULT_NAN_DUMP_PATH: &str = "DEBUG.LOG";

macro_rules! named_enum {
    ($(#[$meta:meta])* $name:ident, $err:expr, { $($variant:ident => $text:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
        #[serde(try_from = "String")]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub fn name(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl FromStr for $name {
            type Err = ConfigError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($name::$variant),)+
                    other => Err($err(other.to_string())),
                }
            }
        }

        impl TryFrom<String> for $name {
            type Error = ConfigError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                value.parse()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.name())
            }
        }
    };
}

named_enum!(
    /// Derivative-based optimizer used for branch lengths.
    OptimizationMethod, ConfigError::UnknownMethod, {
        Gradient => "gradient",
        Newton => "newton",
    }
);

named_enum!(
    /// How far model parameters are re-estimated while building a distance tree.
    DistanceMethod, |value| ConfigError::UnknownValue { key: "distance.method", value }, {
        Init => "init",
        Pairwise => "pairwise",
        Iterations => "iterations",
    }
);

named_enum!(
    /// Nearest-neighbor interchange search strategy.
    NniMethod, |value| ConfigError::UnknownValue { key: "optimization.topology.algorithm_nni.method", value }, {
        Fast => "fast",
        Better => "better",
    }
);

named_enum!(
    /// Family of the among-site rate distribution.
    RateDistributionKind, |value| ConfigError::UnknownValue { key: "rate_distribution", value }, {
        Constant => "constant",
        Gamma => "gamma",
    }
);

/// A substitution model by name with explicit parameter values.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelConfig {
    pub model: NucleotideModelKind,
    /// Values overriding the model defaults, by local parameter name.
    pub values: BTreeMap<String, f64>,
    /// Replace the equilibrium frequencies by those observed in the data.
    pub use_observed_freq: bool,
    pub pseudo_count: f64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            model: NucleotideModelKind::Jc69,
            values: BTreeMap::new(),
            use_observed_freq: false,
            pseudo_count: 0.0,
        }
    }
}

impl ModelConfig {
    /// Builds the model for `alphabet`, estimating frequencies from
    /// `alignment` when requested.
    pub fn instantiate(&self, alphabet: Alphabet, alignment: Option<&Alignment>) -> Result<NucleotideModel, ModelError> {
        let values = ParameterList::from_parameters(
            self.values
                .iter()
                .map(|(name, value)| Parameter::unconstrained(name.clone(), *value)),
        )?;
        let mut model = NucleotideModel::with_parameters(self.model, alphabet, &values)?;
        if self.use_observed_freq {
            if let Some(alignment) = alignment {
                model.set_freq_from_data(alignment, self.pseudo_count)?;
            }
        }
        Ok(model)
    }
}

#[derive(Default)]
pub struct ModelConfigBuilder {
    model: Option<NucleotideModelKind>,
    values: BTreeMap<String, f64>,
    use_observed_freq: Option<bool>,
    pseudo_count: Option<f64>,
}

impl ModelConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn model(mut self, model: NucleotideModelKind) -> Self {
        self.model = Some(model);
        self
    }
    pub fn value(mut self, name: impl Into<String>, value: f64) -> Self {
        self.values.insert(name.into(), value);
        self
    }
    pub fn use_observed_freq(mut self, yes: bool) -> Self {
        self.use_observed_freq = Some(yes);
        self
    }
    pub fn pseudo_count(mut self, count: f64) -> Self {
        self.pseudo_count = Some(count);
        self
    }

    pub fn build(self) -> Result<ModelConfig, ConfigError> {
        let defaults = ModelConfig::default();
        let pseudo_count = self.pseudo_count.unwrap_or(defaults.pseudo_count);
        if !(pseudo_count >= 0.0) {
            return Err(ConfigError::InvalidValue {
                key: "model.pseudo_count",
                reason: format!("must be non-negative, got {pseudo_count}"),
            });
        }
        Ok(ModelConfig {
            model: self.model.unwrap_or(defaults.model),
            values: self.values,
            use_observed_freq: self.use_observed_freq.unwrap_or(defaults.use_observed_freq),
            pseudo_count,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RateDistributionConfig {
    pub kind: RateDistributionKind,
    pub alpha: f64,
    pub classes: usize,
}

impl Default for RateDistributionConfig {
    fn default() -> Self {
        Self {
            kind: RateDistributionKind::Constant,
            alpha: 1.0,
            classes: 4,
        }
    }
}

impl RateDistributionConfig {
    pub fn instantiate(&self) -> Result<Box<dyn DiscreteDistribution>, DistributionError> {
        let distribution: Box<dyn DiscreteDistribution> = match self.kind {
            RateDistributionKind::Constant => Box::new(ConstantDistribution::new()),
            RateDistributionKind::Gamma => Box::new(GammaDiscreteDistribution::new(self.classes, self.alpha)?),
        };
        Ok(distribution)
    }
}

#[derive(Default)]
pub struct RateDistributionConfigBuilder {
    kind: Option<RateDistributionKind>,
    alpha: Option<f64>,
    classes: Option<usize>,
}

impl RateDistributionConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn kind(mut self, kind: RateDistributionKind) -> Self {
        self.kind = Some(kind);
        self
    }
    pub fn alpha(mut self, alpha: f64) -> Self {
        self.alpha = Some(alpha);
        self
    }
    pub fn classes(mut self, classes: usize) -> Self {
        self.classes = Some(classes);
        self
    }

    pub fn build(self) -> Result<RateDistributionConfig, ConfigError> {
        let defaults = RateDistributionConfig::default();
        let alpha = self.alpha.unwrap_or(defaults.alpha);
        if !(alpha > 0.0) {
            return Err(ConfigError::InvalidValue {
                key: "rate_distribution_gamma.alpha",
                reason: format!("must be positive, got {alpha}"),
            });
        }
        let classes = self.classes.unwrap_or(defaults.classes);
        if classes == 0 {
            return Err(ConfigError::InvalidValue {
                key: "rate_distribution.classes_number",
                reason: "at least one class is required".into(),
            });
        }
        Ok(RateDistributionConfig {
            kind: self.kind.unwrap_or(defaults.kind),
            alpha,
            classes,
        })
    }
}

/// Tree-scale pre-optimization settings.
#[derive(Debug, Clone, PartialEq)]
pub struct ScaleFirstConfig {
    pub tolerance: f64,
    pub max_evaluations: usize,
}

impl Default for ScaleFirstConfig {
    fn default() -> Self {
        Self {
            tolerance: 1e-4,
            max_evaluations: 1_000_000,
        }
    }
}

/// Topology search interleaved with numerical optimization.
#[derive(Debug, Clone, PartialEq)]
pub struct TopologyConfig {
    pub method: NniMethod,
    /// Number of accepted moves between two numerical re-optimizations.
    pub numopt_every: usize,
    pub optimize_num_first: bool,
    pub tol_before: f64,
    pub tol_during: f64,
}

impl Default for TopologyConfig {
    fn default() -> Self {
        Self {
            method: NniMethod::Fast,
            numopt_every: 1,
            optimize_num_first: true,
            tol_before: 100.0,
            tol_during: 100.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OptimizationConfig {
    /// When false, parameters are left at their initial values.
    pub enabled: bool,
    pub method: OptimizationMethod,
    pub tolerance: f64,
    pub max_evaluations: usize,
    pub scale_first: Option<ScaleFirstConfig>,
    pub ignore_parameters: Vec<String>,
    pub reparametrization: bool,
    pub nstep: usize,
    /// Use a single optimizer with numerical derivatives instead of the
    /// grouped meta-optimizer.
    pub numerical_derivatives: bool,
    pub topology: Option<TopologyConfig>,
    pub nan_dump_path: PathBuf,
}

impl Default for OptimizationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            method: OptimizationMethod::Newton,
            tolerance: 1e-6,
            max_evaluations: 1_000_000,
            scale_first: Some(ScaleFirstConfig::default()),
            ignore_parameters: Vec::new(),
            reparametrization: false,
            nstep: 1,
            numerical_derivatives: false,
            topology: None,
            nan_dump_path: PathBuf::from(DEFAULT_NAN_DUMP_PATH),
        }
    }
}

#[derive(Default)]
pub struct OptimizationConfigBuilder {
    enabled: Option<bool>,
    method: Option<OptimizationMethod>,
    tolerance: Option<f64>,
    max_evaluations: Option<usize>,
    scale_first: Option<Option<ScaleFirstConfig>>,
    ignore_parameters: Vec<String>,
    reparametrization: Option<bool>,
    nstep: Option<usize>,
    numerical_derivatives: Option<bool>,
    topology: Option<TopologyConfig>,
    nan_dump_path: Option<PathBuf>,
}

impl OptimizationConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enabled(mut self, yes: bool) -> Self {
        self.enabled = Some(yes);
        self
    }
    pub fn method(mut self, method: OptimizationMethod) -> Self {
        self.method = Some(method);
        self
    }
    pub fn tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = Some(tolerance);
        self
    }
    pub fn max_evaluations(mut self, n: usize) -> Self {
        self.max_evaluations = Some(n);
        self
    }
    pub fn scale_first(mut self, scale: Option<ScaleFirstConfig>) -> Self {
        self.scale_first = Some(scale);
        self
    }
    pub fn ignore_parameter(mut self, name: impl Into<String>) -> Self {
        self.ignore_parameters.push(name.into());
        self
    }
    pub fn reparametrization(mut self, yes: bool) -> Self {
        self.reparametrization = Some(yes);
        self
    }
    pub fn nstep(mut self, n: usize) -> Self {
        self.nstep = Some(n);
        self
    }
    pub fn numerical_derivatives(mut self, yes: bool) -> Self {
        self.numerical_derivatives = Some(yes);
        self
    }
    pub fn topology(mut self, topology: TopologyConfig) -> Self {
        self.topology = Some(topology);
        self
    }
    pub fn nan_dump_path(mut self, path: PathBuf) -> Self {
        self.nan_dump_path = Some(path);
        self
    }

    pub fn build(self) -> Result<OptimizationConfig, ConfigError> {
        let defaults = OptimizationConfig::default();
        let tolerance = self.tolerance.unwrap_or(defaults.tolerance);
        if !(tolerance > 0.0) {
            return Err(ConfigError::InvalidValue {
                key: "optimization.tolerance",
                reason: format!("must be positive, got {tolerance}"),
            });
        }
        if let Some(topology) = &self.topology {
            if topology.numopt_every == 0 {
                return Err(ConfigError::InvalidValue {
                    key: "optimization.topology.numopt_every",
                    reason: "must be at least 1".into(),
                });
            }
        }
        Ok(OptimizationConfig {
            enabled: self.enabled.unwrap_or(defaults.enabled),
            method: self.method.unwrap_or(defaults.method),
            tolerance,
            max_evaluations: self.max_evaluations.unwrap_or(defaults.max_evaluations),
            scale_first: self.scale_first.unwrap_or(defaults.scale_first),
            ignore_parameters: self.ignore_parameters,
            reparametrization: self.reparametrization.unwrap_or(defaults.reparametrization),
            nstep: self.nstep.unwrap_or(defaults.nstep).max(1),
            numerical_derivatives: self.numerical_derivatives.unwrap_or(defaults.numerical_derivatives),
            topology: self.topology,
            nan_dump_path: self.nan_dump_path.unwrap_or(defaults.nan_dump_path),
        })
    }
}

/// Settings of the iterative distance-tree builder.
#[derive(Debug, Clone, PartialEq)]
pub struct DistanceTreeConfig {
    pub method: DistanceMethod,
    pub reconstruction: ReconstructionMethod,
    pub optimize_branch_lengths: bool,
    pub ignore_parameters: Vec<String>,
    pub tolerance: f64,
    pub max_evaluations: usize,
    pub max_iterations: usize,
}

#[derive(Default)]
pub struct DistanceTreeConfigBuilder {
    method: Option<DistanceMethod>,
    reconstruction: Option<ReconstructionMethod>,
    optimize_branch_lengths: Option<bool>,
    ignore_parameters: Vec<String>,
    tolerance: Option<f64>,
    max_evaluations: Option<usize>,
    max_iterations: Option<usize>,
}

impl DistanceTreeConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn method(mut self, method: DistanceMethod) -> Self {
        self.method = Some(method);
        self
    }
    pub fn reconstruction(mut self, method: ReconstructionMethod) -> Self {
        self.reconstruction = Some(method);
        self
    }
    pub fn optimize_branch_lengths(mut self, yes: bool) -> Self {
        self.optimize_branch_lengths = Some(yes);
        self
    }
    pub fn ignore_parameter(mut self, name: impl Into<String>) -> Self {
        self.ignore_parameters.push(name.into());
        self
    }
    pub fn tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = Some(tolerance);
        self
    }
    pub fn max_evaluations(mut self, n: usize) -> Self {
        self.max_evaluations = Some(n);
        self
    }
    pub fn max_iterations(mut self, n: usize) -> Self {
        self.max_iterations = Some(n);
        self
    }

    pub fn build(self) -> Result<DistanceTreeConfig, ConfigError> {
        Ok(DistanceTreeConfig {
            method: self.method.ok_or(ConfigError::MissingParameter("method"))?,
            reconstruction: self
                .reconstruction
                .ok_or(ConfigError::MissingParameter("reconstruction"))?,
            optimize_branch_lengths: self.optimize_branch_lengths.unwrap_or(false),
            ignore_parameters: self.ignore_parameters,
            tolerance: self.tolerance.unwrap_or(1e-6),
            max_evaluations: self.max_evaluations.unwrap_or(1_000_000),
            max_iterations: self.max_iterations.unwrap_or(20).max(1),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn optimization_defaults_match_the_documented_values() {
        let config = OptimizationConfigBuilder::new().build().unwrap();
        assert!(config.enabled);
        assert_eq!(config.method, OptimizationMethod::Newton);
        assert_eq!(config.tolerance, 1e-6);
        assert_eq!(config.max_evaluations, 1_000_000);
        assert_eq!(config.scale_first, Some(ScaleFirstConfig::default()));
        assert!(!config.reparametrization);
        assert_eq!(config.nstep, 1);
        assert_eq!(config.nan_dump_path, PathBuf::from("DEBUG.LOG"));
    }

    #[test]
    fn unknown_method_names_are_configuration_errors() {
        assert_eq!(
            "simplex".parse::<OptimizationMethod>(),
            Err(ConfigError::UnknownMethod("simplex".into()))
        );
        assert!(matches!(
            "nearest".parse::<DistanceMethod>(),
            Err(ConfigError::UnknownValue { key: "distance.method", .. })
        ));
        assert_eq!("gradient".parse::<OptimizationMethod>().unwrap(), OptimizationMethod::Gradient);
    }

    #[test]
    fn builders_reject_invalid_values() {
        assert!(matches!(
            OptimizationConfigBuilder::new().tolerance(0.0).build(),
            Err(ConfigError::InvalidValue { key: "optimization.tolerance", .. })
        ));
        assert!(matches!(
            RateDistributionConfigBuilder::new().classes(0).build(),
            Err(ConfigError::InvalidValue { .. })
        ));
    }

    #[test]
    fn distance_tree_builder_requires_methods() {
        assert_eq!(
            DistanceTreeConfigBuilder::new().build(),
            Err(ConfigError::MissingParameter("method"))
        );
        let config = DistanceTreeConfigBuilder::new()
            .method(DistanceMethod::Iterations)
            .reconstruction(ReconstructionMethod::Nj)
            .build()
            .unwrap();
        assert_eq!(config.max_iterations, 20);
    }

    #[test]
    fn model_config_applies_values_and_observed_frequencies() {
        let alignment = Alignment::from_pairs(Alphabet::Dna, [("a", "AAAC"), ("b", "AAGT")]).unwrap();
        let config = ModelConfigBuilder::new()
            .model(NucleotideModelKind::Hky85)
            .value("kappa", 3.5)
            .use_observed_freq(true)
            .build()
            .unwrap();
        let model = config.instantiate(Alphabet::Dna, Some(&alignment)).unwrap();
        assert_eq!(model.parameter_value("kappa").unwrap(), 3.5);
        assert!((model.frequencies()[0] - 5.0 / 8.0).abs() < 1e-12);
    }

    #[test]
    fn gamma_config_instantiates_requested_classes() {
        let config = RateDistributionConfigBuilder::new()
            .kind(RateDistributionKind::Gamma)
            .alpha(0.5)
            .classes(6)
            .build()
            .unwrap();
        let dist = config.instantiate().unwrap();
        assert_eq!(dist.number_of_categories(), 6);
        assert_eq!(dist.name(), "gamma");
    }
}
