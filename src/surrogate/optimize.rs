//! Multi-restart hyperparameter optimization.
//!
//! Each restart runs bounded Adam ascent on the log marginal likelihood in
//! log-hyperparameter space. Restart 0 starts from the template kernel;
//! restart `i > 0` draws its start log-uniformly within the bounds from a
//! ChaCha stream `i` of the caller's seed. Restarts run on the rayon pool
//! and the winner is chosen by an ordered fold (highest likelihood, ties to
//! the lowest restart index), so scheduling never changes the result.

use nalgebra::DVector;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha20Rng;
use rayon::prelude::*;

use super::gp::{FeatureRow, GaussianProcess, log_marginal_likelihood_with_gradient};
use super::kernel::Kernel;

const LEARNING_RATE: f64 = 0.1;
const BETA1: f64 = 0.9;
const BETA2: f64 = 0.999;
const EPSILON: f64 = 1e-8;
/// Stop once no coordinate moves more than this in log space.
const STEP_TOLERANCE: f64 = 1e-6;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OptimizerSettings {
    pub n_restarts: usize,
    pub max_iterations: usize,
    pub seed: u64,
}

/// Best hyperparameters found by one restart.
#[derive(Debug, Clone, PartialEq)]
pub struct RestartOutcome {
    pub restart: usize,
    pub theta: Vec<f64>,
    pub log_marginal_likelihood: f64,
}

/// Fits `template`'s hyperparameters and returns the conditioned process
/// together with the winning restart index.
///
/// Returns `None` only if every restart fails numerically.
pub fn fit_with_restarts(
    template: &Kernel,
    x: &[FeatureRow],
    y: &DVector<f64>,
    settings: OptimizerSettings,
) -> Option<(GaussianProcess, usize)> {
    let outcomes: Vec<Option<RestartOutcome>> = (0..settings.n_restarts.max(1))
        .into_par_iter()
        .map(|restart| {
            let start = starting_point(template, restart, settings.seed);
            run_restart(template, x, y, start, settings.max_iterations).map(|(theta, lml)| {
                RestartOutcome {
                    restart,
                    theta,
                    log_marginal_likelihood: lml,
                }
            })
        })
        .collect();

    let best = select_best(outcomes)?;
    let kernel = template.with_theta(&best.theta);
    let gp = GaussianProcess::fit(kernel, x.to_vec(), y.clone())?;
    Some((gp, best.restart))
}

/// Highest likelihood wins; on ties the earlier restart is kept.
pub fn select_best(outcomes: Vec<Option<RestartOutcome>>) -> Option<RestartOutcome> {
    outcomes.into_iter().flatten().fold(None, |best, outcome| match best {
        Some(b) if b.log_marginal_likelihood >= outcome.log_marginal_likelihood => Some(b),
        _ => Some(outcome),
    })
}

fn starting_point(template: &Kernel, restart: usize, seed: u64) -> Vec<f64> {
    if restart == 0 {
        return clamp(template.theta(), &template.log_bounds());
    }
    let mut rng = ChaCha20Rng::seed_from_u64(seed);
    rng.set_stream(restart as u64);
    template
        .log_bounds()
        .iter()
        .map(|&(lo, hi)| rng.gen_range(lo..=hi))
        .collect()
}

fn clamp(theta: Vec<f64>, bounds: &[(f64, f64)]) -> Vec<f64> {
    theta
        .into_iter()
        .zip(bounds)
        .map(|(t, &(lo, hi))| t.clamp(lo, hi))
        .collect()
}

/// Bounded Adam ascent from `start`. Returns the best point visited.
fn run_restart(
    template: &Kernel,
    x: &[FeatureRow],
    y: &DVector<f64>,
    start: Vec<f64>,
    max_iterations: usize,
) -> Option<(Vec<f64>, f64)> {
    let bounds = template.log_bounds();
    let mut theta = start;
    let mut best: Option<(Vec<f64>, f64)> = None;
    let mut m = vec![0.0; theta.len()];
    let mut v = vec![0.0; theta.len()];

    for iteration in 1..=max_iterations {
        let Some((lml, gradient)) =
            log_marginal_likelihood_with_gradient(&template.with_theta(&theta), x, y)
        else {
            // Step landed somewhere ill-conditioned; keep what we had.
            break;
        };
        if best.as_ref().is_none_or(|(_, b)| lml > *b) {
            best = Some((theta.clone(), lml));
        }

        let t = iteration as i32;
        let mut max_step: f64 = 0.0;
        let next: Vec<f64> = theta
            .iter()
            .zip(&gradient)
            .zip(m.iter_mut().zip(v.iter_mut()))
            .zip(&bounds)
            .map(|(((&th, &g), (mi, vi)), &(lo, hi))| {
                *mi = BETA1 * *mi + (1.0 - BETA1) * g;
                *vi = BETA2 * *vi + (1.0 - BETA2) * g * g;
                let m_hat = *mi / (1.0 - BETA1.powi(t));
                let v_hat = *vi / (1.0 - BETA2.powi(t));
                let updated = (th + LEARNING_RATE * m_hat / (v_hat.sqrt() + EPSILON)).clamp(lo, hi);
                max_step = max_step.max((updated - th).abs());
                updated
            })
            .collect();

        theta = next;
        if max_step < STEP_TOLERANCE {
            break;
        }
    }

    // The last step has not been scored yet.
    let last = log_marginal_likelihood_with_gradient(&template.with_theta(&theta), x, y);
    match (last, &best) {
        (Some((lml, _)), Some((_, b))) if lml <= *b => best,
        (Some((lml, _)), _) => Some((theta, lml)),
        (None, _) => best,
    }
}
