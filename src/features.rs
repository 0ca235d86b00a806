//! Feature extraction from raw water samples.
//!
//! Each surrogate model sees samples through a [`FeatureBuilder`] bound to a
//! single parameter. Rows are `[latitude, longitude, month,
//! distance_to_source, elevation]`, see [`FEATURE_NAMES`].

use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime};

use crate::logging::{self, Component};
use crate::model::{DEFAULT_MONTH, FEATURE_COUNT, FEATURE_NAMES, WaterSample};

/// One observation of one parameter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrainingExample {
    pub features: [f64; FEATURE_COUNT],
    pub target: f64,
}

/// The usable rows for one parameter plus a count of what was dropped.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureSet {
    pub parameter: String,
    pub examples: Vec<TrainingExample>,
    /// Records without the target or with malformed fields.
    pub dropped: usize,
}

impl FeatureSet {
    pub fn feature_names(&self) -> &'static [&'static str] {
        &FEATURE_NAMES
    }

    pub fn len(&self) -> usize {
        self.examples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.examples.is_empty()
    }

    pub fn rows(&self) -> Vec<[f64; FEATURE_COUNT]> {
        self.examples.iter().map(|e| e.features).collect()
    }

    pub fn targets(&self) -> Vec<f64> {
        self.examples.iter().map(|e| e.target).collect()
    }
}

/// Builds feature rows and targets for a single parameter.
#[derive(Debug, Clone)]
pub struct FeatureBuilder {
    parameter: String,
}

impl FeatureBuilder {
    pub fn new(parameter: &str) -> Self {
        Self {
            parameter: parameter.to_string(),
        }
    }

    /// Converts `samples` into training rows, skipping any record that lacks
    /// the target or cannot be read. Input order is preserved.
    pub fn build(&self, samples: &[WaterSample]) -> FeatureSet {
        let examples: Vec<TrainingExample> =
            samples.iter().filter_map(|s| self.example(s)).collect();
        let dropped = samples.len() - examples.len();

        logging::debug(
            Component::Features,
            Some(&self.parameter),
            &format!(
                "Prepared {} samples with {} features ({} dropped)",
                examples.len(),
                FEATURE_COUNT,
                dropped
            ),
        );

        FeatureSet {
            parameter: self.parameter.clone(),
            examples,
            dropped,
        }
    }

    fn example(&self, sample: &WaterSample) -> Option<TrainingExample> {
        let target = sample.value(&self.parameter).filter(|v| v.is_finite())?;
        let latitude = sample.latitude.filter(|v| v.is_finite())?;
        let longitude = sample.longitude.filter(|v| v.is_finite())?;

        let month = match sample.collection_date.as_deref() {
            Some(date) => parse_month(date)?,
            None => DEFAULT_MONTH,
        };

        let distance_to_source = optional_feature(sample.distance_to_source)?;
        if distance_to_source < 0.0 {
            return None;
        }
        let elevation = optional_feature(sample.elevation)?;

        Some(TrainingExample {
            features: [
                latitude,
                longitude,
                f64::from(month),
                distance_to_source,
                elevation,
            ],
            target,
        })
    }
}

/// Missing environmental fields default to 0; present but non-finite ones
/// make the record unusable.
fn optional_feature(value: Option<f64>) -> Option<f64> {
    match value {
        None => Some(0.0),
        Some(v) if v.is_finite() => Some(v),
        Some(_) => None,
    }
}

/// Month (1–12) of an ISO 8601 date or datetime string.
pub fn parse_month(value: &str) -> Option<u32> {
    let value = value.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.month());
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(value, format) {
            return Some(dt.month());
        }
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .map(|d| d.month())
}
