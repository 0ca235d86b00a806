//! Water-quality parameter registry and contamination thresholds.
//!
//! Defines the parameters the selector knows how to score, along with their
//! units and default safe intervals (WHO drinking-water guidelines / BIS
//! IS 10500). The registry is the default threshold table; deployments can
//! override or extend it through the `[thresholds]` table of the config file,
//! and every entry is validated before the selector sees it.

use std::collections::BTreeMap;

use crate::model::{Result, WflowError};

// ---------------------------------------------------------------------------
// Parameter metadata
// ---------------------------------------------------------------------------

/// Metadata for a single water-quality parameter.
pub struct WaterParameter {
    /// Field name in sample records and model artifacts.
    pub key: &'static str,
    /// Human-readable name.
    pub name: &'static str,
    pub unit: &'static str,
    /// Lower bound of the safe interval; `f64::NEG_INFINITY` if unbounded.
    pub safe_min: f64,
    /// Upper bound of the safe interval; `f64::INFINITY` if unbounded.
    pub safe_max: f64,
}

/// Parameters scored by default.
pub static PARAMETER_REGISTRY: &[WaterParameter] = &[
    WaterParameter {
        key: "ph_value",
        name: "pH",
        unit: "pH",
        safe_min: 6.5,
        safe_max: 8.5,
    },
    WaterParameter {
        key: "tds_ppm",
        name: "Total dissolved solids",
        unit: "ppm",
        safe_min: 0.0,
        safe_max: 500.0,
    },
    WaterParameter {
        key: "turbidity_ntu",
        name: "Turbidity",
        unit: "NTU",
        safe_min: 0.0,
        safe_max: 5.0,
    },
    WaterParameter {
        key: "dissolved_oxygen_mg_l",
        name: "Dissolved oxygen",
        unit: "mg/L",
        safe_min: 5.0,
        safe_max: f64::INFINITY, // more oxygen is never a contamination signal
    },
];

/// Parameters trained when the config does not list any.
pub const DEFAULT_PARAMETERS: [&str; 3] = ["ph_value", "tds_ppm", "turbidity_ntu"];

/// Looks up a parameter by key. Returns `None` if not registered.
pub fn find_parameter(key: &str) -> Option<&'static WaterParameter> {
    PARAMETER_REGISTRY.iter().find(|p| p.key == key)
}

// ---------------------------------------------------------------------------
// Safe intervals
// ---------------------------------------------------------------------------

/// Closed safe interval `[min, max]`; either bound may be infinite.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SafeRange {
    pub min: f64,
    pub max: f64,
}

impl SafeRange {
    /// Builds a validated interval. NaN bounds and `min > max` are rejected.
    pub fn new(min: f64, max: f64) -> Result<SafeRange> {
        if min.is_nan() || max.is_nan() {
            return Err(WflowError::Config(
                "safe range bounds must not be NaN".to_string(),
            ));
        }
        if min > max {
            return Err(WflowError::Config(format!(
                "safe range minimum {} exceeds maximum {}",
                min, max
            )));
        }
        Ok(SafeRange { min, max })
    }

    pub fn contains(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }

    /// Value the EI/PI acquisitions measure improvement against: the upper
    /// bound. An unbounded upper side yields no improvement at all.
    pub fn reference_value(&self) -> f64 {
        self.max
    }
}

/// Explicit parameter → safe interval mapping.
///
/// Parameters with no entry are scored with the neutral unknown-parameter
/// risk (see `acquisition::UNKNOWN_PARAMETER_RISK`), never silently zeroed.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ContaminationThresholds {
    ranges: BTreeMap<String, SafeRange>,
}

impl ContaminationThresholds {
    pub fn empty() -> Self {
        Self::default()
    }

    /// The registry defaults.
    pub fn from_registry() -> Self {
        let ranges = PARAMETER_REGISTRY
            .iter()
            .map(|p| {
                (
                    p.key.to_string(),
                    SafeRange {
                        min: p.safe_min,
                        max: p.safe_max,
                    },
                )
            })
            .collect();
        Self { ranges }
    }

    /// Adds or replaces the interval for `parameter`, validating it first.
    pub fn insert(&mut self, parameter: &str, min: f64, max: f64) -> Result<()> {
        let range = SafeRange::new(min, max).map_err(|e| {
            WflowError::Config(format!("threshold for {}: {}", parameter, e))
        })?;
        self.ranges.insert(parameter.to_string(), range);
        Ok(())
    }

    pub fn get(&self, parameter: &str) -> Option<&SafeRange> {
        self.ranges.get(parameter)
    }

    pub fn contains(&self, parameter: &str) -> bool {
        self.ranges.contains_key(parameter)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
