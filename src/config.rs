//! Service configuration.
//!
//! Loaded from a TOML file with four tables, all optional:
//!
//! ```toml
//! [selector]
//! parameters = ["ph_value", "tds_ppm", "turbidity_ntu"]
//! acquisition = "ucb"          # ucb | ei | pi | hybrid
//! exploration_weight = 2.0
//!
//! [training]
//! n_restarts = 5
//! seed = 42
//! kernel = "rbf_matern"        # rbf_matern | rbf | matern
//!
//! [thresholds]
//! tds_ppm = { min = 0.0, max = 500.0 }
//! dissolved_oxygen_mg_l = { min = 5.0 }   # omitted bound = unbounded
//!
//! [logging]
//! level = "info"
//! file = "wflow.log"
//! ```
//!
//! Thresholds are merged over the built-in parameter registry and validated
//! at load time, so a bad interval fails the run before any model is fit.
//! Loading never logs: the logger is configured from the loaded file, so
//! callers report `log_warnings` once it is installed.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::acquisition::Acquisition;
use crate::logging::{self, Component, LogLevel};
use crate::model::{Result, WflowError};
use crate::parameters::{ContaminationThresholds, DEFAULT_PARAMETERS};
use crate::surrogate::kernel::KernelKind;

/// Environment variable naming the config file for `Config::from_env`.
pub const CONFIG_ENV_VAR: &str = "WFLOW_CONFIG";

// ---------------------------------------------------------------------------
// Sections
// ---------------------------------------------------------------------------

/// Which parameters to model and how candidates are scored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SelectorConfig {
    pub parameters: Vec<String>,
    pub acquisition: Acquisition,
    /// UCB κ; EI/PI use `0.01 ×` this as ξ.
    pub exploration_weight: f64,
}

impl Default for SelectorConfig {
    fn default() -> Self {
        Self {
            parameters: DEFAULT_PARAMETERS.iter().map(|p| p.to_string()).collect(),
            acquisition: Acquisition::Ucb,
            exploration_weight: 2.0,
        }
    }
}

/// Surrogate fitting settings shared by every parameter's model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TrainingConfig {
    /// Optimizer restarts per parameter (restart 0 starts from kernel defaults).
    pub n_restarts: usize,
    pub seed: u64,
    /// Fewer valid examples than this is a training-data error.
    pub min_training_samples: usize,
    /// Larger data sets are subsampled (seeded) down to this size.
    pub max_training_samples: usize,
    /// Fraction of valid examples held out for reported metrics.
    pub test_fraction: f64,
    pub kernel: KernelKind,
    /// Gradient steps per restart.
    pub max_iterations: usize,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            n_restarts: 5,
            seed: 42,
            min_training_samples: 5,
            max_training_samples: 5000,
            test_fraction: 0.2,
            kernel: KernelKind::RbfMatern,
            max_iterations: 100,
        }
    }
}

/// One `[thresholds]` entry. A missing bound means unbounded on that side.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ThresholdEntry {
    #[serde(default)]
    pub min: Option<f64>,
    #[serde(default)]
    pub max: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingConfig {
    pub level: String,
    pub file: Option<String>,
    pub console_timestamps: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
            console_timestamps: true,
        }
    }
}

impl LoggingConfig {
    pub fn log_level(&self) -> Result<LogLevel> {
        LogLevel::parse(&self.level)
            .ok_or_else(|| WflowError::Config(format!("unknown log level '{}'", self.level)))
    }
}

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub selector: SelectorConfig,
    pub training: TrainingConfig,
    pub thresholds: BTreeMap<String, ThresholdEntry>,
    pub logging: LoggingConfig,
}

impl Config {
    /// Reads and validates a TOML config file.
    pub fn load(path: &Path) -> Result<Config> {
        let contents =
            std::fs::read_to_string(path).map_err(|e| WflowError::io(path, e))?;
        Self::from_toml_str(&contents)
    }

    /// Parses and validates TOML text.
    pub fn from_toml_str(contents: &str) -> Result<Config> {
        let config: Config = toml::from_str(contents)
            .map_err(|e| WflowError::Config(format!("invalid config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Loads `.env` if present and returns the file named by `WFLOW_CONFIG`.
    pub fn env_path() -> Option<PathBuf> {
        dotenv::dotenv().ok();
        std::env::var_os(CONFIG_ENV_VAR).map(PathBuf::from)
    }

    /// The file named by `WFLOW_CONFIG`, or the defaults when it is unset.
    pub fn from_env() -> Result<Config> {
        match Self::env_path() {
            Some(path) => Self::load(&path),
            None => {
                let config = Config::default();
                config.validate()?;
                Ok(config)
            }
        }
    }

    /// Registry defaults overlaid with the `[thresholds]` table.
    pub fn contamination_thresholds(&self) -> Result<ContaminationThresholds> {
        let mut thresholds = ContaminationThresholds::from_registry();
        for (parameter, entry) in &self.thresholds {
            thresholds.insert(
                parameter,
                entry.min.unwrap_or(f64::NEG_INFINITY),
                entry.max.unwrap_or(f64::INFINITY),
            )?;
        }
        Ok(thresholds)
    }

    pub fn validate(&self) -> Result<()> {
        if self.selector.parameters.is_empty() {
            return Err(WflowError::Config(
                "selector.parameters must list at least one parameter".to_string(),
            ));
        }
        if !self.selector.exploration_weight.is_finite() || self.selector.exploration_weight < 0.0
        {
            return Err(WflowError::Config(format!(
                "selector.exploration_weight must be a non-negative number, got {}",
                self.selector.exploration_weight
            )));
        }

        let t = &self.training;
        if t.n_restarts == 0 {
            return Err(WflowError::Config("training.n_restarts must be at least 1".to_string()));
        }
        if t.min_training_samples < 2 {
            return Err(WflowError::Config(
                "training.min_training_samples must be at least 2 so a held-out split exists"
                    .to_string(),
            ));
        }
        if t.max_training_samples < t.min_training_samples {
            return Err(WflowError::Config(format!(
                "training.max_training_samples ({}) is below min_training_samples ({})",
                t.max_training_samples, t.min_training_samples
            )));
        }
        if !(t.test_fraction > 0.0 && t.test_fraction < 1.0) {
            return Err(WflowError::Config(format!(
                "training.test_fraction must be in (0, 1), got {}",
                t.test_fraction
            )));
        }
        if t.max_iterations == 0 {
            return Err(WflowError::Config(
                "training.max_iterations must be at least 1".to_string(),
            ));
        }

        self.logging.log_level()?;
        self.contamination_thresholds()?;
        Ok(())
    }

    /// Selected parameters with no safe interval in the registry or the
    /// `[thresholds]` table. They are scored with the unknown risk.
    pub fn unscored_parameters(&self) -> Vec<&str> {
        let thresholds = match self.contamination_thresholds() {
            Ok(thresholds) => thresholds,
            Err(_) => return Vec::new(),
        };
        self.selector
            .parameters
            .iter()
            .filter(|p| !thresholds.contains(p))
            .map(String::as_str)
            .collect()
    }

    /// Logs load-time warnings. Call after `logging::init_logger`.
    pub fn log_warnings(&self) {
        for parameter in self.unscored_parameters() {
            logging::warn(
                Component::Config,
                Some(parameter),
                "no safe interval configured; risk will be scored as unknown (50)",
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = Config::from_toml_str("").expect("empty config is valid");
        assert_eq!(config, Config::default());
        assert_eq!(config.selector.acquisition, Acquisition::Ucb);
        assert_eq!(config.selector.exploration_weight, 2.0);
        assert_eq!(config.training.n_restarts, 5);
        assert_eq!(config.training.kernel, KernelKind::RbfMatern);
    }

    #[test]
    fn test_full_config_parses() {
        let toml = r#"
            [selector]
            parameters = ["ph_value", "dissolved_oxygen_mg_l"]
            acquisition = "ei"
            exploration_weight = 1.5

            [training]
            n_restarts = 3
            seed = 7
            kernel = "matern"

            [thresholds]
            dissolved_oxygen_mg_l = { min = 4.0 }
            nitrate_mg_l = { min = 0.0, max = 45.0 }

            [logging]
            level = "debug"
            console_timestamps = false
        "#;
        let config = Config::from_toml_str(toml).expect("config should parse");
        assert_eq!(config.selector.acquisition, Acquisition::Ei);
        assert_eq!(config.training.seed, 7);
        assert_eq!(config.training.kernel, KernelKind::Matern);
        assert_eq!(config.training.test_fraction, 0.2, "unset fields keep defaults");

        let thresholds = config.contamination_thresholds().unwrap();
        let oxygen = thresholds.get("dissolved_oxygen_mg_l").unwrap();
        assert_eq!(oxygen.min, 4.0);
        assert!(oxygen.max.is_infinite(), "omitted max should be unbounded");
        assert_eq!(thresholds.get("nitrate_mg_l").map(|r| r.max), Some(45.0));
        assert_eq!(thresholds.get("ph_value").map(|r| r.min), Some(6.5), "registry kept");
    }

    #[test]
    fn test_inverted_threshold_is_rejected_at_load() {
        let toml = r#"
            [thresholds]
            ph_value = { min = 9.0, max = 6.0 }
        "#;
        let err = Config::from_toml_str(toml).expect_err("inverted range must fail");
        assert!(matches!(err, WflowError::Config(_)), "got {:?}", err);
        assert!(err.to_string().contains("ph_value"));
    }

    #[test]
    fn test_unknown_acquisition_is_rejected() {
        let toml = r#"
            [selector]
            acquisition = "thompson"
        "#;
        assert!(Config::from_toml_str(toml).is_err());
    }

    #[test]
    fn test_invalid_training_settings_are_rejected() {
        assert!(Config::from_toml_str("[training]\nn_restarts = 0").is_err());
        assert!(Config::from_toml_str("[training]\ntest_fraction = 1.0").is_err());
        assert!(Config::from_toml_str("[training]\nmin_training_samples = 1").is_err());
        assert!(Config::from_toml_str("[selector]\nparameters = []").is_err());
        assert!(Config::from_toml_str("[logging]\nlevel = \"loud\"").is_err());
    }

    #[test]
    fn test_parameter_without_threshold_is_allowed() {
        let toml = r#"
            [selector]
            parameters = ["ph_value", "chloride_mg_l"]
        "#;
        let config = Config::from_toml_str(toml).expect("unknown parameter only warns");
        let thresholds = config.contamination_thresholds().unwrap();
        assert!(!thresholds.contains("chloride_mg_l"));
        assert_eq!(
            config.unscored_parameters(),
            vec!["chloride_mg_l"],
            "the parameter without a threshold is reported for the load-time warning"
        );
    }

    #[test]
    fn test_configured_threshold_clears_unscored_warning() {
        let toml = r#"
            [selector]
            parameters = ["ph_value", "chloride_mg_l"]

            [thresholds]
            chloride_mg_l = { max = 250.0 }
        "#;
        let config = Config::from_toml_str(toml).unwrap();
        assert!(config.unscored_parameters().is_empty());
        assert!(Config::default().unscored_parameters().is_empty());
    }

    #[test]
    fn test_load_reports_missing_file() {
        let err = Config::load(Path::new("/nonexistent/wflow.toml")).unwrap_err();
        assert!(matches!(err, WflowError::Io { .. }));
    }
}
