//! On-disk model artifact.
//!
//! An artifact holds everything needed to rebuild a fitted posterior without
//! re-optimizing: kernel hyperparameters, both scalers, the standardized
//! training set and the fitted LML. Loading refactorizes the Gram matrix and
//! checks that it reproduces the stored LML.

use std::path::Path;

use chrono::{DateTime, Utc};
use nalgebra::DVector;
use serde::{Deserialize, Serialize};

use super::gp::{FeatureRow, GaussianProcess};
use super::kernel::Kernel;
use super::scaler::StandardScaler;
use crate::model::{FEATURE_COUNT, FEATURE_NAMES, Result, TrainingStats, WflowError};

/// Bumped whenever the artifact layout changes incompatibly.
pub const ARTIFACT_FORMAT_VERSION: u32 = 1;

/// Relative tolerance when checking the recomputed LML against the stored one.
const LML_TOLERANCE: f64 = 1e-6;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelArtifact {
    pub format_version: u32,
    pub parameter: String,
    pub feature_names: Vec<String>,
    pub kernel: Kernel,
    pub input_scaler: StandardScaler,
    pub output_scaler: StandardScaler,
    /// Standardized training inputs.
    pub x_train: Vec<FeatureRow>,
    /// Standardized training targets.
    pub y_train: Vec<f64>,
    pub log_marginal_likelihood: f64,
    pub trained_at: DateTime<Utc>,
    #[serde(default)]
    pub training_stats: Option<TrainingStats>,
}

impl ModelArtifact {
    pub fn new(
        parameter: &str,
        gp: &GaussianProcess,
        input_scaler: &StandardScaler,
        output_scaler: &StandardScaler,
        training_stats: Option<TrainingStats>,
    ) -> Self {
        Self {
            format_version: ARTIFACT_FORMAT_VERSION,
            parameter: parameter.to_string(),
            feature_names: FEATURE_NAMES.iter().map(|s| s.to_string()).collect(),
            kernel: gp.kernel().clone(),
            input_scaler: input_scaler.clone(),
            output_scaler: output_scaler.clone(),
            x_train: gp.x_train().to_vec(),
            y_train: gp.y_train().iter().copied().collect(),
            log_marginal_likelihood: gp.log_marginal_likelihood(),
            trained_at: Utc::now(),
            training_stats,
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| WflowError::Serialization(format!("encoding artifact: {}", e)))?;
        std::fs::write(path, json).map_err(|e| WflowError::io(path, e))
    }

    /// Reads and validates an artifact. Corrupt or incompatible files are
    /// `Serialization` errors; an unreadable path is `Io`.
    pub fn load(path: &Path) -> Result<ModelArtifact> {
        let contents = std::fs::read_to_string(path).map_err(|e| WflowError::io(path, e))?;
        let artifact: ModelArtifact = serde_json::from_str(&contents).map_err(|e| {
            WflowError::Serialization(format!("corrupt artifact {}: {}", path.display(), e))
        })?;
        artifact.validate()?;
        Ok(artifact)
    }

    fn validate(&self) -> Result<()> {
        let fail = |reason: String| {
            Err(WflowError::Serialization(format!(
                "artifact for '{}': {}",
                self.parameter, reason
            )))
        };
        if self.format_version != ARTIFACT_FORMAT_VERSION {
            return fail(format!(
                "format version {} is not supported (expected {})",
                self.format_version, ARTIFACT_FORMAT_VERSION
            ));
        }
        if self.feature_names.iter().map(String::as_str).ne(FEATURE_NAMES) {
            return fail(format!("unexpected feature layout {:?}", self.feature_names));
        }
        if !self.input_scaler.is_valid(FEATURE_COUNT) || !self.output_scaler.is_valid(1) {
            return fail("invalid scaler".to_string());
        }
        if !self.kernel.is_within_bounds() {
            return fail(format!("kernel hyperparameters out of bounds: {}", self.kernel));
        }
        if self.x_train.is_empty() || self.x_train.len() != self.y_train.len() {
            return fail(format!(
                "{} training inputs but {} targets",
                self.x_train.len(),
                self.y_train.len()
            ));
        }
        let finite = self.x_train.iter().flatten().chain(&self.y_train).all(|v| v.is_finite());
        if !finite {
            return fail("non-finite training data".to_string());
        }
        Ok(())
    }

    /// Rebuilds the posterior from the stored hyperparameters and data.
    pub fn to_process(&self) -> Result<GaussianProcess> {
        let y = DVector::from_vec(self.y_train.clone());
        let gp = GaussianProcess::fit(self.kernel.clone(), self.x_train.clone(), y).ok_or_else(
            || {
                WflowError::Serialization(format!(
                    "artifact for '{}' does not yield a positive-definite Gram matrix",
                    self.parameter
                ))
            },
        )?;
        let stored = self.log_marginal_likelihood;
        let recomputed = gp.log_marginal_likelihood();
        if (recomputed - stored).abs() > LML_TOLERANCE * (1.0 + stored.abs()) {
            return Err(WflowError::Serialization(format!(
                "artifact for '{}' is inconsistent: stored LML {} but data gives {}",
                self.parameter, stored, recomputed
            )));
        }
        Ok(gp)
    }
}
