use crate::cli::{DistanceTreeArgs, ModelArgs, OptimizeArgs, parse_reconstruction};
use crate::error::{CliError, Result};
use phylolik::core::models::NucleotideModelKind;
use phylolik::core::tree::ReconstructionMethod;
use phylolik::engine::config as core_config;
use phylolik::engine::config::{DistanceMethod, NniMethod, OptimizationMethod, RateDistributionKind};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::debug;

/// Parameter names accepted as bare `-S` keys and as `[model.values]` entries.
const MODEL_PARAMETER_KEYS: [&str; 14] = [
    "kappa", "kappa1", "kappa2", "theta", "a", "b", "c", "d", "e", "f", "piA", "piC", "piG", "piT",
];

#[derive(Deserialize, Debug, Default)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
struct PartialModelConfig {
    name: Option<NucleotideModelKind>,
    use_observed_freq: Option<bool>,
    pseudo_count: Option<f64>,
    #[serde(default)]
    values: BTreeMap<String, f64>,
}

#[derive(Deserialize, Debug, Default)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
struct PartialRateDistributionConfig {
    kind: Option<RateDistributionKind>,
    alpha: Option<f64>,
    classes: Option<usize>,
}

#[derive(Deserialize, Debug, Default)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
struct PartialScaleFirstConfig {
    enabled: Option<bool>,
    tolerance: Option<f64>,
    max_evaluations: Option<usize>,
}

#[derive(Deserialize, Debug, Default)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
struct PartialTopologyConfig {
    enabled: Option<bool>,
    method: Option<NniMethod>,
    numopt_every: Option<usize>,
    optimize_num_first: Option<bool>,
    tol_before: Option<f64>,
    tol_during: Option<f64>,
}

#[derive(Deserialize, Debug, Default)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
struct PartialOptimizationConfig {
    enabled: Option<bool>,
    method: Option<OptimizationMethod>,
    tolerance: Option<f64>,
    max_evaluations: Option<usize>,
    #[serde(default)]
    ignore_parameters: Vec<String>,
    reparametrization: Option<bool>,
    nstep: Option<usize>,
    numerical_derivatives: Option<bool>,
    nan_dump_path: Option<PathBuf>,
    scale_first: Option<PartialScaleFirstConfig>,
    topology: Option<PartialTopologyConfig>,
}

#[derive(Deserialize, Debug, Default)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
struct PartialDistanceConfig {
    method: Option<DistanceMethod>,
    reconstruction: Option<ReconstructionMethod>,
    optimize_branch_lengths: Option<bool>,
    #[serde(default)]
    ignore_parameters: Vec<String>,
    tolerance: Option<f64>,
    max_evaluations: Option<usize>,
    max_iterations: Option<usize>,
}

/// The configuration file as written by the user; every field is optional.
#[derive(Deserialize, Debug, Default)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
pub struct PartialConfig {
    model: Option<PartialModelConfig>,
    rate_distribution: Option<PartialRateDistributionConfig>,
    optimization: Option<PartialOptimizationConfig>,
    distance: Option<PartialDistanceConfig>,
}

/// Model and rate settings resolved from the file, `-S` values and flags.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelSettings {
    pub model: core_config::ModelConfig,
    pub rate_distribution: core_config::RateDistributionConfig,
}

fn parse_value<T: FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| CliError::Config(format!("Invalid value for {}: '{}'", key, value)))
}

fn parse_named<T>(value: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value.trim().parse().map_err(|e: T::Err| CliError::Config(e.to_string()))
}

/// Booleans in the textual option format: `true`/`false`, `yes`/`no`, and
/// `none` for a disabled step.
fn parse_switch(key: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "yes" => Ok(true),
        "false" | "no" | "none" => Ok(false),
        _ => Err(CliError::Config(format!("Invalid boolean value for {}: '{}'", key, value))),
    }
}

fn parse_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

impl PartialConfig {
    pub fn from_file(path: &Path) -> Result<Self> {
        debug!("Loading configuration from file: {:?}", path);
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content).map_err(|e| CliError::FileParsing {
            path: path.to_path_buf(),
            source: e.into(),
        })
    }

    fn from_toml(content: &str) -> std::result::Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Reads the file named on the command line, if any, and applies the
    /// `-S` overrides.
    pub fn load(args: &ModelArgs) -> Result<Self> {
        let mut config = match &args.config {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_set_values(&args.set_values)?;
        Ok(config)
    }

    pub fn model_settings(&self, args: &ModelArgs) -> Result<ModelSettings> {
        let default_model = PartialModelConfig::default();
        let file_model = self.model.as_ref().unwrap_or(&default_model);
        let mut model = core_config::ModelConfigBuilder::new();
        if let Some(name) = args.model.or(file_model.name) {
            model = model.model(name);
        }
        if let Some(yes) = file_model.use_observed_freq {
            model = model.use_observed_freq(yes);
        }
        if let Some(count) = file_model.pseudo_count {
            model = model.pseudo_count(count);
        }
        for (name, value) in &file_model.values {
            if !MODEL_PARAMETER_KEYS.contains(&name.as_str()) {
                return Err(CliError::Config(format!("Unknown model parameter: '{}'", name)));
            }
            model = model.value(name.clone(), *value);
        }

        let default_rates = PartialRateDistributionConfig::default();
        let file_rates = self.rate_distribution.as_ref().unwrap_or(&default_rates);
        let mut rates = core_config::RateDistributionConfigBuilder::new();
        if let Some(kind) = args.rate_distribution.or(file_rates.kind) {
            rates = rates.kind(kind);
        }
        if let Some(alpha) = args.alpha.or(file_rates.alpha) {
            rates = rates.alpha(alpha);
        }
        if let Some(classes) = args.classes.or(file_rates.classes) {
            rates = rates.classes(classes);
        }

        Ok(ModelSettings {
            model: model.build().map_err(|e| CliError::Config(e.to_string()))?,
            rate_distribution: rates.build().map_err(|e| CliError::Config(e.to_string()))?,
        })
    }

    pub fn optimization_config(&self, args: &OptimizeArgs) -> Result<core_config::OptimizationConfig> {
        let default_file = PartialOptimizationConfig::default();
        let file = self.optimization.as_ref().unwrap_or(&default_file);
        let defaults = core_config::OptimizationConfig::default();

        let mut builder = core_config::OptimizationConfigBuilder::new()
            .enabled(file.enabled.unwrap_or(defaults.enabled))
            .method(args.method.or(file.method).unwrap_or(defaults.method))
            .tolerance(args.tolerance.or(file.tolerance).unwrap_or(defaults.tolerance))
            .max_evaluations(
                args.max_evaluations
                    .or(file.max_evaluations)
                    .unwrap_or(defaults.max_evaluations),
            )
            .reparametrization(args.reparametrization || file.reparametrization.unwrap_or(defaults.reparametrization))
            .nstep(file.nstep.unwrap_or(defaults.nstep))
            .numerical_derivatives(
                args.numerical_derivatives || file.numerical_derivatives.unwrap_or(defaults.numerical_derivatives),
            )
            .nan_dump_path(
                args.nan_dump
                    .clone()
                    .or_else(|| file.nan_dump_path.clone())
                    .unwrap_or(defaults.nan_dump_path),
            );
        for name in file.ignore_parameters.iter().chain(&args.ignore_parameters) {
            builder = builder.ignore_parameter(name.clone());
        }

        builder = builder.scale_first(Self::merge_scale_first(args.no_scale_first, file.scale_first.as_ref()));
        if let Some(topology) = Self::merge_topology(args.nni, file.topology.as_ref()) {
            builder = builder.topology(topology);
        }

        builder.build().map_err(|e| CliError::Config(e.to_string()))
    }

    pub fn distance_tree_config(&self, args: &DistanceTreeArgs) -> Result<core_config::DistanceTreeConfig> {
        let default_file = PartialDistanceConfig::default();
        let file = self.distance.as_ref().unwrap_or(&default_file);

        let mut builder = core_config::DistanceTreeConfigBuilder::new()
            .method(args.method.or(file.method).unwrap_or(DistanceMethod::Init))
            .reconstruction(
                args.reconstruction
                    .or(file.reconstruction)
                    .unwrap_or(ReconstructionMethod::Nj),
            )
            .optimize_branch_lengths(file.optimize_branch_lengths.unwrap_or(false));
        if let Some(tolerance) = file.tolerance {
            builder = builder.tolerance(tolerance);
        }
        if let Some(n) = file.max_evaluations {
            builder = builder.max_evaluations(n);
        }
        if let Some(n) = args.max_iterations.or(file.max_iterations) {
            builder = builder.max_iterations(n);
        }
        for name in &file.ignore_parameters {
            builder = builder.ignore_parameter(name.clone());
        }

        builder.build().map_err(|e| CliError::Config(e.to_string()))
    }

    fn merge_scale_first(
        cli_no_scale_first: bool,
        partial: Option<&PartialScaleFirstConfig>,
    ) -> Option<core_config::ScaleFirstConfig> {
        if cli_no_scale_first {
            return None;
        }
        let defaults = core_config::ScaleFirstConfig::default();
        match partial {
            Some(p) if p.enabled == Some(false) => None,
            Some(p) => Some(core_config::ScaleFirstConfig {
                tolerance: p.tolerance.unwrap_or(defaults.tolerance),
                max_evaluations: p.max_evaluations.unwrap_or(defaults.max_evaluations),
            }),
            None => Some(defaults),
        }
    }

    fn merge_topology(
        cli_method: Option<NniMethod>,
        partial: Option<&PartialTopologyConfig>,
    ) -> Option<core_config::TopologyConfig> {
        let enabled = cli_method.is_some() || partial.is_some_and(|p| p.enabled != Some(false));
        if !enabled {
            return None;
        }
        let defaults = core_config::TopologyConfig::default();
        let p = partial;
        Some(core_config::TopologyConfig {
            method: cli_method
                .or(p.and_then(|p| p.method))
                .unwrap_or(defaults.method),
            numopt_every: p.and_then(|p| p.numopt_every).unwrap_or(defaults.numopt_every),
            optimize_num_first: p
                .and_then(|p| p.optimize_num_first)
                .unwrap_or(defaults.optimize_num_first),
            tol_before: p.and_then(|p| p.tol_before).unwrap_or(defaults.tol_before),
            tol_during: p.and_then(|p| p.tol_during).unwrap_or(defaults.tol_during),
        })
    }

    /// Applies `KEY=VALUE` overrides written with the textual option keys,
    /// e.g. `optimization.max_number_f_eval=5000` or `kappa=4`.
    fn apply_set_values(&mut self, set_values: &[String]) -> Result<()> {
        for kv_pair in set_values {
            let Some((key, value)) = kv_pair.split_once('=') else {
                return Err(CliError::Config(format!(
                    "Invalid --set format: '{}'. Expected KEY=VALUE.",
                    kv_pair
                )));
            };
            let key = key.trim();
            self.apply(key, value)?;
        }
        Ok(())
    }

    fn apply(&mut self, key: &str, value: &str) -> Result<()> {
        if MODEL_PARAMETER_KEYS.contains(&key) {
            self.model
                .get_or_insert_with(Default::default)
                .values
                .insert(key.to_string(), parse_value(key, value)?);
            return Ok(());
        }

        match key {
            "model" => self.model.get_or_insert_with(Default::default).name = Some(parse_named(value)?),
            "model.use_observed_freq" => {
                self.model.get_or_insert_with(Default::default).use_observed_freq = Some(parse_switch(key, value)?)
            }
            "model.pseudo_count" => {
                self.model.get_or_insert_with(Default::default).pseudo_count = Some(parse_value(key, value)?)
            }
            "rate_distribution" => {
                self.rate_distribution.get_or_insert_with(Default::default).kind = Some(parse_named(value)?)
            }
            "rate_distribution_gamma.alpha" => {
                self.rate_distribution.get_or_insert_with(Default::default).alpha = Some(parse_value(key, value)?)
            }
            "rate_distribution.classes_number" => {
                self.rate_distribution.get_or_insert_with(Default::default).classes = Some(parse_value(key, value)?)
            }
            "optimization" => self.optimization().enabled = Some(parse_switch(key, value)?),
            "optimization.method" => self.optimization().method = Some(parse_named(value)?),
            "optimization.tolerance" => self.optimization().tolerance = Some(parse_value(key, value)?),
            "optimization.max_number_f_eval" => self.optimization().max_evaluations = Some(parse_value(key, value)?),
            "optimization.ignore_parameter" => self.optimization().ignore_parameters.extend(parse_list(value)),
            "optimization.reparametrization" => {
                self.optimization().reparametrization = Some(parse_switch(key, value)?)
            }
            "optimization.nstep" => self.optimization().nstep = Some(parse_value(key, value)?),
            "optimization.numerical_derivatives" => {
                self.optimization().numerical_derivatives = Some(parse_switch(key, value)?)
            }
            "optimization.nan_dump" => self.optimization().nan_dump_path = Some(PathBuf::from(value.trim())),
            "optimization.scale_first" => self.scale_first().enabled = Some(parse_switch(key, value)?),
            "optimization.scale_first.tolerance" => self.scale_first().tolerance = Some(parse_value(key, value)?),
            "optimization.scale_first.max_number_f_eval" => {
                self.scale_first().max_evaluations = Some(parse_value(key, value)?)
            }
            "optimization.topology" => self.topology().enabled = Some(parse_switch(key, value)?),
            "optimization.topology.algorithm_nni.method" => self.topology().method = Some(parse_named(value)?),
            "optimization.topology.numopt_every" => self.topology().numopt_every = Some(parse_value(key, value)?),
            "optimization.topology.numfirst" => self.topology().optimize_num_first = Some(parse_switch(key, value)?),
            "optimization.topology.tolerance.before" => self.topology().tol_before = Some(parse_value(key, value)?),
            "optimization.topology.tolerance.during" => self.topology().tol_during = Some(parse_value(key, value)?),
            "distance.method" => self.distance().method = Some(parse_named(value)?),
            "distance.reconstruction" => {
                self.distance().reconstruction = Some(parse_reconstruction(value.trim()).map_err(CliError::Config)?)
            }
            "distance.optimize_branch_lengths" => {
                self.distance().optimize_branch_lengths = Some(parse_switch(key, value)?)
            }
            "distance.ignore_parameter" => self.distance().ignore_parameters.extend(parse_list(value)),
            "distance.max_iterations" => self.distance().max_iterations = Some(parse_value(key, value)?),
            _ => {
                return Err(CliError::Config(format!(
                    "Unsupported configuration key for --set: '{}'",
                    key
                )));
            }
        }
        Ok(())
    }

    fn optimization(&mut self) -> &mut PartialOptimizationConfig {
        self.optimization.get_or_insert_with(Default::default)
    }

    fn scale_first(&mut self) -> &mut PartialScaleFirstConfig {
        self.optimization().scale_first.get_or_insert_with(Default::default)
    }

    fn topology(&mut self) -> &mut PartialTopologyConfig {
        self.optimization().topology.get_or_insert_with(Default::default)
    }

    fn distance(&mut self) -> &mut PartialDistanceConfig {
        self.distance.get_or_insert_with(Default::default)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::{Cli, Commands};
    use clap::Parser;
    use std::fs;
    use tempfile::tempdir;

    fn optimize_args(extra: &[&str]) -> OptimizeArgs {
        let mut args = vec!["phylolik", "optimize", "-s", "seqs.fa", "-t", "start.dnd", "-o", "out.dnd"];
        args.extend_from_slice(extra);
        match Cli::parse_from(args).command {
            Commands::Optimize(args) => args,
            _ => panic!("Expected 'optimize' subcommand"),
        }
    }

    fn distance_args(extra: &[&str]) -> DistanceTreeArgs {
        let mut args = vec!["phylolik", "distance-tree", "-s", "seqs.fa", "-o", "out.dnd"];
        args.extend_from_slice(extra);
        match Cli::parse_from(args).command {
            Commands::DistanceTree(args) => args,
            _ => panic!("Expected 'distance-tree' subcommand"),
        }
    }

    #[test]
    fn empty_configuration_yields_documented_defaults() {
        let args = optimize_args(&[]);
        let config = PartialConfig::load(&args.model).unwrap();

        let settings = config.model_settings(&args.model).unwrap();
        assert_eq!(settings.model.model, NucleotideModelKind::Jc69);
        assert!(!settings.model.use_observed_freq);
        assert_eq!(settings.rate_distribution.kind, RateDistributionKind::Constant);
        assert_eq!(settings.rate_distribution.alpha, 1.0);
        assert_eq!(settings.rate_distribution.classes, 4);

        let optimization = config.optimization_config(&args).unwrap();
        assert!(optimization.enabled);
        assert_eq!(optimization.method, OptimizationMethod::Newton);
        assert_eq!(optimization.tolerance, 1e-6);
        assert_eq!(optimization.max_evaluations, 1_000_000);
        let scale = optimization.scale_first.unwrap();
        assert_eq!(scale.tolerance, 1e-4);
        assert!(optimization.topology.is_none());
        assert!(!optimization.reparametrization);
        assert_eq!(optimization.nstep, 1);
    }

    #[test]
    fn file_values_are_loaded_and_cli_flags_take_precedence() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("phylolik.toml");
        fs::write(
            &path,
            r#"
            [model]
            name = "HKY85"
            use-observed-freq = true
            [model.values]
            kappa = 3.5

            [rate-distribution]
            kind = "gamma"
            alpha = 0.5

            [optimization]
            method = "newton"
            tolerance = 1e-3
            ignore-parameters = ["piA"]

            [optimization.scale-first]
            enabled = false

            [optimization.topology]
            method = "better"
            numopt-every = 3
            "#,
        )
        .unwrap();
        let config_path = path.to_str().unwrap();
        let args = optimize_args(&["-c", config_path, "--method", "gradient", "--ignore", "kappa"]);
        let config = PartialConfig::load(&args.model).unwrap();

        let settings = config.model_settings(&args.model).unwrap();
        assert_eq!(settings.model.model, NucleotideModelKind::Hky85);
        assert!(settings.model.use_observed_freq);
        assert_eq!(settings.model.values.get("kappa"), Some(&3.5));
        assert_eq!(settings.rate_distribution.kind, RateDistributionKind::Gamma);
        assert_eq!(settings.rate_distribution.alpha, 0.5);

        let optimization = config.optimization_config(&args).unwrap();
        assert_eq!(optimization.method, OptimizationMethod::Gradient);
        assert_eq!(optimization.tolerance, 1e-3);
        assert_eq!(optimization.ignore_parameters, vec!["piA".to_string(), "kappa".to_string()]);
        assert!(optimization.scale_first.is_none());
        let topology = optimization.topology.unwrap();
        assert_eq!(topology.method, NniMethod::Better);
        assert_eq!(topology.numopt_every, 3);
    }

    #[test]
    fn set_values_accept_textual_option_keys() {
        let args = optimize_args(&[
            "-S",
            "model=TN93",
            "-S",
            "kappa1=4",
            "-S",
            "rate_distribution=gamma",
            "-S",
            "rate_distribution_gamma.alpha=0.25",
            "-S",
            "rate_distribution.classes_number=8",
            "-S",
            "optimization.max_number_f_eval=500",
            "-S",
            "optimization.ignore_parameter=kappa2, piG",
            "-S",
            "optimization.scale_first.tolerance=0.01",
            "-S",
            "optimization.topology=yes",
            "-S",
            "optimization.topology.numopt_every=2",
        ]);
        let config = PartialConfig::load(&args.model).unwrap();

        let settings = config.model_settings(&args.model).unwrap();
        assert_eq!(settings.model.model, NucleotideModelKind::Tn93);
        assert_eq!(settings.model.values.get("kappa1"), Some(&4.0));
        assert_eq!(settings.rate_distribution.alpha, 0.25);
        assert_eq!(settings.rate_distribution.classes, 8);

        let optimization = config.optimization_config(&args).unwrap();
        assert_eq!(optimization.max_evaluations, 500);
        assert_eq!(optimization.ignore_parameters, vec!["kappa2".to_string(), "piG".to_string()]);
        assert_eq!(optimization.scale_first.unwrap().tolerance, 0.01);
        assert_eq!(optimization.topology.unwrap().numopt_every, 2);
    }

    #[test]
    fn disabled_steps_are_switched_off() {
        let args = optimize_args(&["-S", "optimization=none", "-S", "optimization.scale_first=no"]);
        let config = PartialConfig::load(&args.model).unwrap();
        let optimization = config.optimization_config(&args).unwrap();
        assert!(!optimization.enabled);
        assert!(optimization.scale_first.is_none());
    }

    #[test]
    fn unknown_keys_and_names_are_configuration_errors() {
        let mut config = PartialConfig::default();
        assert!(matches!(config.apply_set_values(&["foo.bar=1".into()]), Err(CliError::Config(_))));
        assert!(matches!(config.apply_set_values(&["kappa".into()]), Err(CliError::Config(_))));
        assert!(matches!(config.apply_set_values(&["model=WAG".into()]), Err(CliError::Config(_))));
        assert!(matches!(
            config.apply_set_values(&["optimization.method=bfgs".into()]),
            Err(CliError::Config(_))
        ));
        assert!(matches!(config.apply_set_values(&["kappa=abc".into()]), Err(CliError::Config(_))));
    }

    #[test]
    fn unknown_file_fields_are_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        fs::write(&path, "[optimization]\nmax-iterations = 5\n").unwrap();
        let result = PartialConfig::from_file(&path);
        assert!(matches!(result, Err(CliError::FileParsing { .. })));
    }

    #[test]
    fn distance_tree_settings_merge_file_and_flags() {
        let mut config = PartialConfig::from_toml(
            r#"
            [distance]
            method = "iterations"
            reconstruction = "upgma"
            max-iterations = 7
            ignore-parameters = ["kappa"]
            "#,
        )
        .unwrap();
        config.apply_set_values(&["distance.optimize_branch_lengths=true".into()]).unwrap();

        let args = distance_args(&["--reconstruction", "nj"]);
        let distance = config.distance_tree_config(&args).unwrap();
        assert_eq!(distance.method, DistanceMethod::Iterations);
        assert_eq!(distance.reconstruction, ReconstructionMethod::Nj);
        assert_eq!(distance.max_iterations, 7);
        assert!(distance.optimize_branch_lengths);
        assert_eq!(distance.ignore_parameters, vec!["kappa".to_string()]);
    }
}
