//! Exact Gaussian-process regression on standardized data.
//!
//! With `K = k(X, X) + σₙ²I + jitter·I = LLᵀ` and `α = K⁻¹y`:
//!
//! - log marginal likelihood `−½ yᵀα − Σ ln Lᵢᵢ − ½ n ln 2π`;
//! - its gradient `½ tr((ααᵀ − K⁻¹) ∂K/∂θⱼ)`;
//! - posterior mean `k*ᵀα`, variance `k** − vᵀv` with `v = L⁻¹k*`.

use nalgebra::{Cholesky, DMatrix, DVector, Dyn};

use super::kernel::{Kernel, squared_distance};
use crate::model::FEATURE_COUNT;

/// A standardized feature row.
pub type FeatureRow = [f64; FEATURE_COUNT];

/// Fixed diagonal regularization added on top of the white-noise term.
pub const JITTER: f64 = 1e-10;

const LN_2PI: f64 = 1.837_877_066_409_345_5;

/// A fitted posterior: kernel, training inputs and the factorized Gram matrix.
#[derive(Debug, Clone)]
pub struct GaussianProcess {
    kernel: Kernel,
    x_train: Vec<FeatureRow>,
    y_train: DVector<f64>,
    cholesky: Cholesky<f64, Dyn>,
    alpha: DVector<f64>,
    log_marginal_likelihood: f64,
}

impl GaussianProcess {
    /// Conditions the prior on `(x_train, y_train)` with fixed hyperparameters.
    ///
    /// Returns `None` if the Gram matrix is not numerically positive definite.
    pub fn fit(kernel: Kernel, x_train: Vec<FeatureRow>, y_train: DVector<f64>) -> Option<Self> {
        if x_train.is_empty() || x_train.len() != y_train.len() {
            return None;
        }
        let gram = gram_matrix(&kernel, &x_train);
        let cholesky = gram.cholesky()?;
        let alpha = cholesky.solve(&y_train);
        let log_marginal_likelihood = lml_from_factor(&cholesky, &y_train, &alpha);
        if !log_marginal_likelihood.is_finite() {
            return None;
        }
        Some(Self {
            kernel,
            x_train,
            y_train,
            cholesky,
            alpha,
            log_marginal_likelihood,
        })
    }

    pub fn kernel(&self) -> &Kernel {
        &self.kernel
    }

    pub fn x_train(&self) -> &[FeatureRow] {
        &self.x_train
    }

    pub fn y_train(&self) -> &DVector<f64> {
        &self.y_train
    }

    pub fn log_marginal_likelihood(&self) -> f64 {
        self.log_marginal_likelihood
    }

    /// Posterior mean and standard deviation at a standardized input.
    pub fn predict(&self, x: &FeatureRow) -> (f64, f64) {
        let k_star = DVector::from_iterator(
            self.x_train.len(),
            self.x_train
                .iter()
                .map(|xi| self.kernel.covariance(squared_distance(xi, x))),
        );
        let mean = k_star.dot(&self.alpha);
        let explained = self
            .cholesky
            .l_dirty()
            .solve_lower_triangular(&k_star)
            .map_or(0.0, |v| v.norm_squared());
        let variance = (self.kernel.prior_variance() - explained).max(0.0);
        (mean, variance.sqrt())
    }
}

/// `k(X, X) + (σₙ² + jitter)·I`.
pub fn gram_matrix(kernel: &Kernel, x: &[FeatureRow]) -> DMatrix<f64> {
    let n = x.len();
    let mut gram = DMatrix::zeros(n, n);
    for i in 0..n {
        gram[(i, i)] = kernel.covariance(0.0) + kernel.noise_level + JITTER;
        for j in 0..i {
            let value = kernel.covariance(squared_distance(&x[i], &x[j]));
            gram[(i, j)] = value;
            gram[(j, i)] = value;
        }
    }
    gram
}

fn lml_from_factor(cholesky: &Cholesky<f64, Dyn>, y: &DVector<f64>, alpha: &DVector<f64>) -> f64 {
    let l = cholesky.l_dirty();
    let log_det_half: f64 = (0..y.len()).map(|i| l[(i, i)].ln()).sum();
    -0.5 * y.dot(alpha) - log_det_half - 0.5 * y.len() as f64 * LN_2PI
}

/// Log marginal likelihood and its gradient with respect to `kernel.theta()`.
///
/// Returns `None` when the Gram matrix cannot be factorized.
pub fn log_marginal_likelihood_with_gradient(
    kernel: &Kernel,
    x: &[FeatureRow],
    y: &DVector<f64>,
) -> Option<(f64, Vec<f64>)> {
    let gram = gram_matrix(kernel, x);
    let cholesky = gram.cholesky()?;
    let alpha = cholesky.solve(y);
    let lml = lml_from_factor(&cholesky, y, &alpha);
    if !lml.is_finite() {
        return None;
    }

    let k_inv = cholesky.inverse();
    let n = x.len();
    let p = kernel.n_params();
    let mut gradient = vec![0.0; p];
    let mut dk = vec![0.0; p];
    for i in 0..n {
        for j in 0..=i {
            let weight = alpha[i] * alpha[j] - k_inv[(i, j)];
            let diagonal = i == j;
            let sq_dist = if diagonal {
                0.0
            } else {
                squared_distance(&x[i], &x[j])
            };
            kernel.gradient(sq_dist, diagonal, &mut dk);
            // Off-diagonal entries appear twice in the symmetric trace.
            let multiplicity = if diagonal { 1.0 } else { 2.0 };
            for (g, d) in gradient.iter_mut().zip(&dk) {
                *g += multiplicity * weight * d;
            }
        }
    }
    gradient.iter_mut().for_each(|g| *g *= 0.5);

    if gradient.iter().any(|g| !g.is_finite()) {
        return None;
    }
    Some((lml, gradient))
}
