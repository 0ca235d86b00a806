//! Core data types for the monthly test-site selection service.
//!
//! This module defines the shared domain model imported by all other modules:
//! raw water samples, candidate and scored sites, the monthly testing plan,
//! evaluation results and the error taxonomy. It contains no numerics and no
//! I/O, only types and a couple of formatting helpers.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

// ---------------------------------------------------------------------------
// Feature layout
// ---------------------------------------------------------------------------

/// Ordered names of the surrogate input features.
pub const FEATURE_NAMES: [&str; 5] = [
    "latitude",
    "longitude",
    "month",
    "distance_to_source",
    "elevation",
];

/// Number of input features per training example.
pub const FEATURE_COUNT: usize = FEATURE_NAMES.len();

/// Month assumed for samples without a collection date (mid-year).
pub const DEFAULT_MONTH: u32 = 6;

// ---------------------------------------------------------------------------
// Raw samples
// ---------------------------------------------------------------------------

/// One historical water-quality record as supplied by ingestion.
///
/// Parameter readings are kept as loose JSON values keyed by parameter name
/// (`ph_value`, `tds_ppm`, ...). A `null` or non-numeric reading counts as
/// missing for that parameter only; any other field a record carries, such
/// as a sample id, lands in `values` and is ignored.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WaterSample {
    #[serde(default)]
    pub latitude: Option<f64>,
    #[serde(default)]
    pub longitude: Option<f64>,
    /// ISO 8601 date (`2024-05-01`) or datetime (`2024-05-01T12:00:00`).
    #[serde(default)]
    pub collection_date: Option<String>,
    /// Distance to the nearest known pollution source, in km.
    #[serde(default)]
    pub distance_to_source: Option<f64>,
    /// Elevation in meters.
    #[serde(default)]
    pub elevation: Option<f64>,
    #[serde(flatten)]
    pub values: BTreeMap<String, serde_json::Value>,
}

impl WaterSample {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude: Some(latitude),
            longitude: Some(longitude),
            ..Self::default()
        }
    }

    pub fn with_date(mut self, date: &str) -> Self {
        self.collection_date = Some(date.to_string());
        self
    }

    pub fn with_value(mut self, parameter: &str, value: f64) -> Self {
        self.values
            .insert(parameter.to_string(), serde_json::Value::from(value));
        self
    }

    pub fn with_environment(mut self, distance_to_source: f64, elevation: f64) -> Self {
        self.distance_to_source = Some(distance_to_source);
        self.elevation = Some(elevation);
        self
    }

    /// Numeric reading for `parameter`, or `None` when absent, null or not a number.
    pub fn value(&self, parameter: &str) -> Option<f64> {
        self.values.get(parameter).and_then(serde_json::Value::as_f64)
    }
}

// ---------------------------------------------------------------------------
// Candidate and scored sites
// ---------------------------------------------------------------------------

/// A location considered for testing in a selection run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateSite {
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default)]
    pub name: Option<String>,
}

impl CandidateSite {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
            name: None,
        }
    }

    pub fn named(latitude: f64, longitude: f64, name: &str) -> Self {
        Self {
            latitude,
            longitude,
            name: Some(name.to_string()),
        }
    }

    /// Name used in plans; unnamed candidates become `Site_<index + 1>`.
    pub fn display_name(&self, index: usize) -> String {
        match &self.name {
            Some(name) => name.clone(),
            None => format!("Site_{}", index + 1),
        }
    }
}

/// A single parameter's contribution to a scored site.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterPrediction {
    pub predicted: f64,
    pub uncertainty: f64,
    pub acquisition: f64,
    pub risk: f64,
}

/// A candidate after scoring against every trained model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredSite {
    /// 1-based position in the ranked selection.
    pub rank: usize,
    pub latitude: f64,
    pub longitude: f64,
    pub location_name: String,
    /// Mean risk across trained parameters, 0–100.
    pub risk_score: f64,
    /// Ranking key. Currently identical to `risk_score`.
    pub combined_score: f64,
    pub month: u32,
    pub parameter_predictions: BTreeMap<String, ParameterPrediction>,
}

// ---------------------------------------------------------------------------
// Plans and evaluation
// ---------------------------------------------------------------------------

/// Risk-tier counts over the selected sites.
///
/// Tiers: high `> 50`, medium `30..=50`, low `< 30`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanStatistics {
    pub high_risk_sites: usize,
    pub medium_risk_sites: usize,
    pub low_risk_sites: usize,
    pub avg_risk_score: f64,
}

/// The monthly decision artifact handed to reporting and notification layers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestingPlan {
    pub month: u32,
    pub total_sites: usize,
    pub tested_sites: usize,
    pub untested_sites: usize,
    pub reduction_percent: f64,
    /// Planning-time heuristic only. It is not derived from ground truth and
    /// must not be read as a measured detection rate; see
    /// [`EvaluationResult::detection_rate`] for that.
    pub estimated_detection_rate: f64,
    pub selected_sites: Vec<ScoredSite>,
    pub statistics: PlanStatistics,
}

/// Observed contamination status of a site, available after the fact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroundTruthOutcome {
    pub location_name: String,
    pub is_contaminated: bool,
}

impl GroundTruthOutcome {
    pub fn new(location_name: &str, is_contaminated: bool) -> Self {
        Self {
            location_name: location_name.to_string(),
            is_contaminated,
        }
    }
}

/// Confusion counts and derived rates of a plan against ground truth.
/// Rates are percentages rounded to 2 decimals.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationResult {
    pub true_positives: usize,
    pub false_positives: usize,
    pub true_negatives: usize,
    pub false_negatives: usize,
    pub total_contaminated: usize,
    pub detection_rate: f64,
    pub precision: f64,
    pub recall: f64,
    pub f1_score: f64,
}

/// Held-out metrics of one surrogate fit, in original target units.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingStats {
    pub parameter: String,
    pub n_train: usize,
    pub n_test: usize,
    pub mae: f64,
    pub rmse: f64,
    pub r2_score: f64,
    pub log_likelihood: f64,
    pub kernel: String,
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors raised by training, prediction, selection and artifact handling.
#[derive(Debug, Error)]
pub enum WflowError {
    /// Not enough usable data to fit a parameter, or every optimizer restart
    /// failed. Recoverable by skipping that parameter.
    #[error("training data error for {parameter}: {reason}")]
    TrainingData { parameter: String, reason: String },
    /// A prediction was requested from a model that was never trained or loaded.
    #[error("model for {0} is not trained")]
    ModelNotTrained(String),
    /// The selector has no usable models; the selection run cannot proceed.
    #[error("no trained models available - train or load models before selecting test sites")]
    NoTrainedModels,
    /// A model artifact or plan file is corrupt or has an unsupported version.
    #[error("serialization error: {0}")]
    Serialization(String),
    /// Invalid configuration detected at load time.
    #[error("configuration error: {0}")]
    Config(String),
    #[error("I/O error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl WflowError {
    pub fn training_data(parameter: &str, reason: impl Into<String>) -> Self {
        WflowError::TrainingData {
            parameter: parameter.to_string(),
            reason: reason.into(),
        }
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        WflowError::Io {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, WflowError>;

// ---------------------------------------------------------------------------
// Formatting helpers
// ---------------------------------------------------------------------------

/// Rounds to a fixed number of decimal places for stable report output.
pub fn round_to(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (value * factor).round() / factor
}
