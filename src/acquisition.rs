//! Acquisition functions and contamination-risk scoring.
//!
//! Pure functions over a surrogate prediction `(μ, σ)`. The acquisitions
//! trade off testing where contamination is predicted (high μ) against
//! testing where the model knows least (high σ); the risk score is the
//! bounded 0–100 number the selector ranks by.
//!
//! # References
//!
//! - Srinivas et al. 2010 (GP-UCB)
//! - Jones, Schonlau & Welch 1998 (expected improvement)
//! - Abramowitz & Stegun 7.1.26 (error function approximation)

use serde::{Deserialize, Serialize};

use crate::parameters::SafeRange;

/// Risk assigned to a parameter with no configured safe interval: neither
/// confidently safe nor confidently unsafe.
pub const UNKNOWN_PARAMETER_RISK: f64 = 50.0;

/// Cap on the uncertainty contribution to the risk score.
pub const MAX_UNCERTAINTY_PENALTY: f64 = 30.0;

/// Reference value for EI/PI when a parameter has no safe interval.
pub const UNKNOWN_PARAMETER_REFERENCE: f64 = 100.0;

/// Scheme used to compute each candidate's acquisition value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Acquisition {
    /// Upper confidence bound, `μ + κσ`.
    #[default]
    Ucb,
    /// Expected improvement over the parameter's reference value.
    Ei,
    /// Probability of improvement over the parameter's reference value.
    Pi,
    /// Currently scored exactly like `Ucb`.
    Hybrid,
}

impl Acquisition {
    /// Acquisition value for one parameter's prediction.
    ///
    /// `exploration_weight` is κ for UCB; EI and PI use `0.01 ×` it as ξ.
    pub fn score(
        self,
        mean: f64,
        std: f64,
        range: Option<&SafeRange>,
        exploration_weight: f64,
    ) -> f64 {
        let xi = exploration_weight * 0.01;
        let reference = range.map_or(UNKNOWN_PARAMETER_REFERENCE, SafeRange::reference_value);
        match self {
            Acquisition::Ucb | Acquisition::Hybrid => ucb(mean, std, exploration_weight),
            Acquisition::Ei => expected_improvement(mean, std, reference, xi),
            Acquisition::Pi => probability_of_improvement(mean, std, reference, xi),
        }
    }
}

impl std::fmt::Display for Acquisition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Acquisition::Ucb => write!(f, "ucb"),
            Acquisition::Ei => write!(f, "ei"),
            Acquisition::Pi => write!(f, "pi"),
            Acquisition::Hybrid => write!(f, "hybrid"),
        }
    }
}

// ---------------------------------------------------------------------------
// Acquisition functions
// ---------------------------------------------------------------------------

/// Upper confidence bound `μ + κσ`.
#[must_use]
pub fn ucb(mean: f64, std: f64, kappa: f64) -> f64 {
    kappa.mul_add(std, mean)
}

/// Expected improvement `(μ − b − ξ)Φ(z) + σφ(z)` with `z = (μ − b − ξ)/σ`,
/// clamped to be non-negative. Zero when `σ = 0` or `b` is not finite.
#[must_use]
pub fn expected_improvement(mean: f64, std: f64, best_observed: f64, xi: f64) -> f64 {
    if std <= 0.0 || !best_observed.is_finite() {
        return 0.0;
    }
    let improvement = mean - best_observed - xi;
    let z = improvement / std;
    let ei = improvement * normal_cdf(z) + std * normal_pdf(z);
    ei.max(0.0)
}

/// Probability of improvement `Φ(z)`, in `[0, 1]`. Zero when `σ = 0` or `b`
/// is not finite.
#[must_use]
pub fn probability_of_improvement(mean: f64, std: f64, best_observed: f64, xi: f64) -> f64 {
    if std <= 0.0 || !best_observed.is_finite() {
        return 0.0;
    }
    let z = (mean - best_observed - xi) / std;
    normal_cdf(z).clamp(0.0, 1.0)
}

// ---------------------------------------------------------------------------
// Risk scoring
// ---------------------------------------------------------------------------

/// Contamination risk in `[0, 100]`.
///
/// Distance outside the safe interval, as a percentage of the violated bound
/// (saturating at 100), plus an uncertainty penalty `min(30, 10σ)`. A zero
/// bound is treated as a scale of 1. `None` means the parameter has no
/// configured interval and yields [`UNKNOWN_PARAMETER_RISK`].
#[must_use]
pub fn risk_score(range: Option<&SafeRange>, mean: f64, std: f64) -> f64 {
    let Some(range) = range else {
        return UNKNOWN_PARAMETER_RISK;
    };

    let normalized_distance = if range.contains(mean) {
        0.0
    } else if mean < range.min {
        bound_violation(range.min - mean, range.min)
    } else {
        bound_violation(mean - range.max, range.max)
    };

    let uncertainty_penalty = (std.max(0.0) * 10.0).min(MAX_UNCERTAINTY_PENALTY);
    let risk = normalized_distance + uncertainty_penalty;
    if risk.is_nan() {
        return 100.0;
    }
    risk.clamp(0.0, 100.0)
}

fn bound_violation(distance: f64, bound: f64) -> f64 {
    let scale = if bound == 0.0 { 1.0 } else { bound.abs() };
    (distance / scale * 100.0).min(100.0)
}

// ---------------------------------------------------------------------------
// Standard normal
// ---------------------------------------------------------------------------

/// Error function approximation (Abramowitz & Stegun 7.1.26).
///
/// Maximum absolute error < 1.5 × 10⁻⁷.
#[must_use]
pub fn erf(x: f64) -> f64 {
    let sign = x.signum();
    let x = x.abs();
    let t = 1.0 / 0.327_591_1_f64.mul_add(x, 1.0);
    let poly = 1.061_405_429_f64
        .mul_add(t, -1.453_152_027)
        .mul_add(t, 1.421_413_741)
        .mul_add(t, -0.284_496_736)
        .mul_add(t, 0.254_829_592);
    let y = (poly * t).mul_add(-(-x * x).exp(), 1.0);
    sign * y
}

/// Φ(x) = 0.5 × (1 + erf(x / √2)).
#[must_use]
pub fn normal_cdf(x: f64) -> f64 {
    0.5 * (1.0 + erf(x / std::f64::consts::SQRT_2))
}

/// φ(x) = exp(−x²/2) / √(2π).
#[must_use]
pub fn normal_pdf(x: f64) -> f64 {
    const INV_SQRT_2PI: f64 = 0.398_942_280_401_432_7;
    INV_SQRT_2PI * (-0.5 * x * x).exp()
}
