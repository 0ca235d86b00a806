//! Monthly testing plan assembly and persistence.
//!
//! A plan is the ranked selection plus summary numbers for reporting:
//! how many sites are skipped this month, how the selected sites split into
//! risk tiers, and a planning-time estimate of the detection rate.
//!
//! The estimate is a heuristic, `min(95, 80 + 15 × high_risk / tested)`.
//! It is not calibrated and does not come from ground truth. Only
//! `evaluation::evaluate_plan_performance` measures a detection rate.

use std::path::Path;

use crate::logging::{self, Component};
use crate::model::{PlanStatistics, Result, ScoredSite, TestingPlan, WflowError, round_to};

/// Risk score above which a selected site counts as high risk.
pub const HIGH_RISK_THRESHOLD: f64 = 50.0;
/// Lower edge (inclusive) of the medium tier; medium ends at `HIGH_RISK_THRESHOLD`.
pub const MEDIUM_RISK_THRESHOLD: f64 = 30.0;

// Detection-rate heuristic terms, in percent.
const DETECTION_BASELINE: f64 = 80.0;
const DETECTION_HIGH_RISK_BONUS: f64 = 15.0;
const DETECTION_CAP: f64 = 95.0;

// ---------------------------------------------------------------------------
// Statistics
// ---------------------------------------------------------------------------

impl PlanStatistics {
    /// Tier counts and mean risk over `sites`; an empty selection averages 0.
    pub fn from_sites(sites: &[ScoredSite]) -> Self {
        let high = sites
            .iter()
            .filter(|s| s.risk_score > HIGH_RISK_THRESHOLD)
            .count();
        let medium = sites
            .iter()
            .filter(|s| (MEDIUM_RISK_THRESHOLD..=HIGH_RISK_THRESHOLD).contains(&s.risk_score))
            .count();
        let low = sites
            .iter()
            .filter(|s| s.risk_score < MEDIUM_RISK_THRESHOLD)
            .count();
        let avg = if sites.is_empty() {
            0.0
        } else {
            sites.iter().map(|s| s.risk_score).sum::<f64>() / sites.len() as f64
        };
        PlanStatistics {
            high_risk_sites: high,
            medium_risk_sites: medium,
            low_risk_sites: low,
            avg_risk_score: round_to(avg, 2),
        }
    }
}

/// Planning heuristic for the share of contamination the plan should catch.
/// Returns 0 when nothing is tested.
pub fn estimated_detection_rate(high_risk_sites: usize, tested_sites: usize) -> f64 {
    if tested_sites == 0 {
        return 0.0;
    }
    let share = high_risk_sites as f64 / tested_sites as f64;
    (DETECTION_BASELINE + share * DETECTION_HIGH_RISK_BONUS).min(DETECTION_CAP)
}

/// `(1 − tested / total) × 100`, 0 for an empty candidate list.
pub fn reduction_percent(tested_sites: usize, total_sites: usize) -> f64 {
    if total_sites == 0 {
        return 0.0;
    }
    (1.0 - tested_sites as f64 / total_sites as f64) * 100.0
}

// ---------------------------------------------------------------------------
// Plan
// ---------------------------------------------------------------------------

impl TestingPlan {
    /// Builds a plan from an already ranked selection out of `total_sites`
    /// candidates.
    pub fn from_selection(month: u32, total_sites: usize, selected_sites: Vec<ScoredSite>) -> Self {
        let statistics = PlanStatistics::from_sites(&selected_sites);
        let tested_sites = selected_sites.len();
        TestingPlan {
            month,
            total_sites,
            tested_sites,
            untested_sites: total_sites.saturating_sub(tested_sites),
            reduction_percent: round_to(reduction_percent(tested_sites, total_sites), 1),
            estimated_detection_rate: round_to(
                estimated_detection_rate(statistics.high_risk_sites, tested_sites),
                1,
            ),
            selected_sites,
            statistics,
        }
    }

    /// Writes the plan as pretty-printed JSON, creating parent directories.
    pub fn save_json(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| WflowError::io(parent, e))?;
        }
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| WflowError::Serialization(format!("encoding plan: {}", e)))?;
        std::fs::write(path, json).map_err(|e| WflowError::io(path, e))?;
        logging::info(
            Component::Selector,
            None,
            &format!("Testing plan saved to {}", path.display()),
        );
        Ok(())
    }

    pub fn load_json(path: &Path) -> Result<TestingPlan> {
        let contents = std::fs::read_to_string(path).map_err(|e| WflowError::io(path, e))?;
        serde_json::from_str(&contents).map_err(|e| {
            WflowError::Serialization(format!("corrupt plan {}: {}", path.display(), e))
        })
    }
}
