//! Composite covariance kernels.
//!
//! A kernel is a sum of amplitude-scaled stationary terms over standardized
//! features plus independent white noise:
//!
//! - RBF: `a · exp(−r² / 2ℓ²)`, infinitely smooth;
//! - Matérn ν = 1.5: `a · (1 + √3 r/ℓ) · exp(−√3 r/ℓ)`, once differentiable;
//! - White: `σₙ²` on the diagonal only.
//!
//! Hyperparameters are optimized in log space; `theta()`/`with_theta()` and
//! `log_bounds()` share one ordering: each present term contributes
//! `(ln a, ln ℓ)`, RBF before Matérn, then `ln σₙ²`.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Amplitude (signal variance) bounds.
pub const AMPLITUDE_BOUNDS: (f64, f64) = (1e-3, 1e3);
/// Length-scale bounds, in standardized feature units.
pub const LENGTH_SCALE_BOUNDS: (f64, f64) = (1e-2, 1e2);
/// White-noise level bounds; the lower bound keeps the Gram matrix invertible.
pub const NOISE_BOUNDS: (f64, f64) = (1e-10, 1e-1);
/// Initial white-noise level.
pub const DEFAULT_NOISE_LEVEL: f64 = 1e-5;

const SQRT_3: f64 = 1.732_050_807_568_877_2;

/// Which smooth terms the kernel contains. White noise is always present.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KernelKind {
    /// `C·RBF + C·Matérn(ν=1.5) + White`
    #[default]
    RbfMatern,
    /// `C·RBF + White`
    Rbf,
    /// `C·Matérn(ν=1.5) + White`
    Matern,
}

impl fmt::Display for KernelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KernelKind::RbfMatern => write!(f, "rbf_matern"),
            KernelKind::Rbf => write!(f, "rbf"),
            KernelKind::Matern => write!(f, "matern"),
        }
    }
}

/// An amplitude-scaled stationary term.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScaledTerm {
    pub amplitude: f64,
    pub length_scale: f64,
}

impl ScaledTerm {
    const UNIT: ScaledTerm = ScaledTerm {
        amplitude: 1.0,
        length_scale: 1.0,
    };
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Kernel {
    pub kind: KernelKind,
    pub rbf: Option<ScaledTerm>,
    pub matern: Option<ScaledTerm>,
    pub noise_level: f64,
}

impl Kernel {
    /// Kernel with unit amplitudes and length scales, the first restart's
    /// starting point.
    pub fn new(kind: KernelKind) -> Self {
        let (rbf, matern) = match kind {
            KernelKind::RbfMatern => (Some(ScaledTerm::UNIT), Some(ScaledTerm::UNIT)),
            KernelKind::Rbf => (Some(ScaledTerm::UNIT), None),
            KernelKind::Matern => (None, Some(ScaledTerm::UNIT)),
        };
        Self {
            kind,
            rbf,
            matern,
            noise_level: DEFAULT_NOISE_LEVEL,
        }
    }

    /// Number of optimized hyperparameters.
    pub fn n_params(&self) -> usize {
        2 * (usize::from(self.rbf.is_some()) + usize::from(self.matern.is_some())) + 1
    }

    /// Hyperparameters in log space.
    pub fn theta(&self) -> Vec<f64> {
        let mut theta = Vec::with_capacity(self.n_params());
        for term in self.terms() {
            theta.push(term.amplitude.ln());
            theta.push(term.length_scale.ln());
        }
        theta.push(self.noise_level.ln());
        theta
    }

    /// Copy of this kernel with hyperparameters taken from `theta`.
    pub fn with_theta(&self, theta: &[f64]) -> Kernel {
        debug_assert_eq!(theta.len(), self.n_params());
        let mut values = theta.iter().map(|t| t.exp());
        let mut next_term = |present: bool| {
            if present {
                Some(ScaledTerm {
                    amplitude: values.next().unwrap_or(1.0),
                    length_scale: values.next().unwrap_or(1.0),
                })
            } else {
                None
            }
        };
        let rbf = next_term(self.rbf.is_some());
        let matern = next_term(self.matern.is_some());
        let noise_level = values.next().unwrap_or(DEFAULT_NOISE_LEVEL);
        Kernel {
            kind: self.kind,
            rbf,
            matern,
            noise_level,
        }
    }

    /// Log-space bounds, aligned with `theta()`.
    pub fn log_bounds(&self) -> Vec<(f64, f64)> {
        let log = |(lo, hi): (f64, f64)| (lo.ln(), hi.ln());
        let mut bounds = Vec::with_capacity(self.n_params());
        for _ in self.terms() {
            bounds.push(log(AMPLITUDE_BOUNDS));
            bounds.push(log(LENGTH_SCALE_BOUNDS));
        }
        bounds.push(log(NOISE_BOUNDS));
        bounds
    }

    /// True when every hyperparameter is finite, positive and within bounds.
    pub fn is_within_bounds(&self) -> bool {
        let tolerance = 1e-9;
        self.theta()
            .iter()
            .zip(self.log_bounds())
            .all(|(t, (lo, hi))| t.is_finite() && *t >= lo - tolerance && *t <= hi + tolerance)
    }

    fn terms(&self) -> impl Iterator<Item = &ScaledTerm> {
        self.rbf.iter().chain(self.matern.iter())
    }

    /// Covariance between two distinct inputs at squared distance `sq_dist`.
    /// White noise is excluded.
    pub fn covariance(&self, sq_dist: f64) -> f64 {
        let rbf = self.rbf.map_or(0.0, |t| rbf_value(t, sq_dist));
        let matern = self.matern.map_or(0.0, |t| matern_value(t, sq_dist));
        rbf + matern
    }

    /// Prior variance at a single input, including white noise.
    pub fn prior_variance(&self) -> f64 {
        self.covariance(0.0) + self.noise_level
    }

    /// ∂k/∂θ for every hyperparameter, at squared distance `sq_dist`.
    ///
    /// `diagonal` marks the `i == j` entries, the only ones the noise term
    /// touches.
    pub fn gradient(&self, sq_dist: f64, diagonal: bool, out: &mut [f64]) {
        let mut idx = 0;
        if let Some(t) = self.rbf {
            let k = rbf_value(t, sq_dist);
            out[idx] = k;
            out[idx + 1] = k * sq_dist / (t.length_scale * t.length_scale);
            idx += 2;
        }
        if let Some(t) = self.matern {
            let u = SQRT_3 * sq_dist.sqrt() / t.length_scale;
            let decay = (-u).exp();
            out[idx] = t.amplitude * (1.0 + u) * decay;
            out[idx + 1] = t.amplitude * u * u * decay;
            idx += 2;
        }
        out[idx] = if diagonal { self.noise_level } else { 0.0 };
    }
}

impl fmt::Display for Kernel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(t) = self.rbf {
            write!(f, "{:.4} * RBF(length_scale={:.4}) + ", t.amplitude, t.length_scale)?;
        }
        if let Some(t) = self.matern {
            write!(
                f,
                "{:.4} * Matern(length_scale={:.4}, nu=1.5) + ",
                t.amplitude, t.length_scale
            )?;
        }
        write!(f, "WhiteKernel(noise_level={:.3e})", self.noise_level)
    }
}

fn rbf_value(t: ScaledTerm, sq_dist: f64) -> f64 {
    t.amplitude * (-0.5 * sq_dist / (t.length_scale * t.length_scale)).exp()
}

fn matern_value(t: ScaledTerm, sq_dist: f64) -> f64 {
    let u = SQRT_3 * sq_dist.sqrt() / t.length_scale;
    t.amplitude * (1.0 + u) * (-u).exp()
}

/// Squared Euclidean distance.
pub fn squared_distance(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
}
