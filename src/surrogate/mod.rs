//! Gaussian-process surrogate for one water-quality parameter.
//!
//! A `SurrogateModel` predicts a parameter's value and uncertainty at any
//! location and month. It owns its kernel, the input and target scalers and
//! the conditioned posterior. Training standardizes on the training split
//! only, fits hyperparameters with seeded multi-restart optimization, and
//! reports held-out metrics in original units.
//!
//! ```text
//!   samples ──► FeatureBuilder ──► shuffle/split ──► StandardScaler (X, y)
//!                                                     │
//!                                 fit_with_restarts ◄─┘
//!                                        │
//!                                 GaussianProcess ──► predict (mean, std)
//! ```
pub mod gp;
pub mod kernel;
pub mod scaler;

mod artifact;
mod optimize;

pub use artifact::{ARTIFACT_FORMAT_VERSION, ModelArtifact};

use std::path::Path;

use chrono::Datelike;
use nalgebra::DVector;
use rand::SeedableRng;
use rand::seq::SliceRandom;
use rand_chacha::ChaCha20Rng;
use serde::{Deserialize, Serialize};

use crate::config::TrainingConfig;
use crate::features::FeatureBuilder;
use crate::logging::{self, Component};
use crate::model::{FEATURE_COUNT, Result, TrainingStats, WaterSample, WflowError, round_to};
use gp::{FeatureRow, GaussianProcess};
use kernel::Kernel;
use optimize::{OptimizerSettings, fit_with_restarts};
use scaler::StandardScaler;

// ---------------------------------------------------------------------------
// Queries and results
// ---------------------------------------------------------------------------

/// A single prediction request. `month` falls back to the current calendar
/// month; the environmental fields default to 0 as in training.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PredictionQuery {
    pub latitude: f64,
    pub longitude: f64,
    pub month: Option<u32>,
    pub distance_to_source: f64,
    pub elevation: f64,
}

impl PredictionQuery {
    pub fn at(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
            month: None,
            distance_to_source: 0.0,
            elevation: 0.0,
        }
    }

    pub fn in_month(mut self, month: u32) -> Self {
        self.month = Some(month);
        self
    }

    pub fn with_environment(mut self, distance_to_source: f64, elevation: f64) -> Self {
        self.distance_to_source = distance_to_source;
        self.elevation = elevation;
        self
    }

    fn features(&self) -> FeatureRow {
        let month = self.month.unwrap_or_else(current_month);
        [
            self.latitude,
            self.longitude,
            f64::from(month),
            self.distance_to_source,
            self.elevation,
        ]
    }
}

/// Month used when a query or selection run does not name one.
pub fn current_month() -> u32 {
    chrono::Local::now().month()
}

/// Posterior mean and standard deviation in original target units.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Prediction {
    pub mean: f64,
    pub std: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationPrediction {
    pub latitude: f64,
    pub longitude: f64,
    pub predicted_value: f64,
    pub uncertainty: f64,
    pub parameter: String,
}

// ---------------------------------------------------------------------------
// Model state
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct TrainedState {
    gp: GaussianProcess,
    input_scaler: StandardScaler,
    output_scaler: StandardScaler,
    stats: Option<TrainingStats>,
}

#[derive(Debug, Clone, Default)]
pub enum ModelState {
    #[default]
    Untrained,
    Trained(Box<TrainedState>),
}

#[derive(Debug, Clone)]
pub struct SurrogateModel {
    parameter: String,
    config: TrainingConfig,
    state: ModelState,
}

impl SurrogateModel {
    pub fn new(parameter: &str, config: TrainingConfig) -> Self {
        Self {
            parameter: parameter.to_string(),
            config,
            state: ModelState::Untrained,
        }
    }

    pub fn parameter(&self) -> &str {
        &self.parameter
    }

    pub fn training_config(&self) -> &TrainingConfig {
        &self.config
    }

    pub fn state(&self) -> &ModelState {
        &self.state
    }

    pub fn is_trained(&self) -> bool {
        matches!(self.state, ModelState::Trained(_))
    }

    /// Fitted kernel, if trained.
    pub fn kernel(&self) -> Option<&Kernel> {
        self.trained().ok().map(|t| t.gp.kernel())
    }

    pub fn training_stats(&self) -> Option<&TrainingStats> {
        self.trained().ok().and_then(|t| t.stats.as_ref())
    }

    fn trained(&self) -> Result<&TrainedState> {
        match &self.state {
            ModelState::Trained(state) => Ok(state),
            ModelState::Untrained => Err(WflowError::ModelNotTrained(self.parameter.clone())),
        }
    }

    // -----------------------------------------------------------------------
    // Training
    // -----------------------------------------------------------------------

    /// Fits the model on `samples` and returns held-out metrics.
    ///
    /// Re-training on a trained model refits in place. On error the previous
    /// state is kept.
    pub fn train(
        &mut self,
        samples: &[WaterSample],
        n_restarts: usize,
        seed: u64,
    ) -> Result<TrainingStats> {
        logging::info(
            Component::Surrogate,
            Some(&self.parameter),
            &format!("Training on {} samples", samples.len()),
        );

        let features = FeatureBuilder::new(&self.parameter).build(samples);
        if features.is_empty() {
            return Err(WflowError::training_data(&self.parameter, "no valid samples"));
        }
        let required = self.config.min_training_samples.max(2);
        if features.len() < required {
            return Err(WflowError::training_data(
                &self.parameter,
                format!(
                    "{} valid samples, at least {} required",
                    features.len(),
                    required
                ),
            ));
        }

        let parameter_seed = parameter_seed(seed, &self.parameter);
        let mut rng = ChaCha20Rng::seed_from_u64(parameter_seed);
        let mut order: Vec<usize> = (0..features.len()).collect();
        order.shuffle(&mut rng);
        if order.len() > self.config.max_training_samples {
            logging::debug(
                Component::Surrogate,
                Some(&self.parameter),
                &format!(
                    "Subsampling {} examples down to {}",
                    order.len(),
                    self.config.max_training_samples
                ),
            );
            order.truncate(self.config.max_training_samples);
        }

        let n = order.len();
        let n_test = held_out_size(n, self.config.test_fraction);
        let (test_idx, train_idx) = order.split_at(n_test);
        let rows = features.rows();
        let targets = features.targets();
        let x_train: Vec<FeatureRow> = train_idx.iter().map(|&i| rows[i]).collect();
        let y_train: Vec<f64> = train_idx.iter().map(|&i| targets[i]).collect();

        let input_scaler = StandardScaler::fit(&x_train)
            .ok_or_else(|| WflowError::training_data(&self.parameter, "empty training split"))?;
        let output_scaler = StandardScaler::fit_values(&y_train)
            .ok_or_else(|| WflowError::training_data(&self.parameter, "empty training split"))?;

        let x_scaled: Vec<FeatureRow> = x_train.iter().map(|r| input_scaler.transform(r)).collect();
        let y_scaled = DVector::from_iterator(
            y_train.len(),
            y_train.iter().map(|&v| output_scaler.transform_value(v)),
        );

        let template = Kernel::new(self.config.kernel);
        let settings = OptimizerSettings {
            n_restarts,
            max_iterations: self.config.max_iterations,
            seed: parameter_seed,
        };
        let (gp, best_restart) = fit_with_restarts(&template, &x_scaled, &y_scaled, settings)
            .ok_or_else(|| {
                WflowError::training_data(
                    &self.parameter,
                    format!("every optimizer restart failed ({} attempted)", n_restarts.max(1)),
                )
            })?;
        logging::debug(
            Component::Surrogate,
            Some(&self.parameter),
            &format!(
                "Best of {} restarts was #{}: {}",
                n_restarts.max(1),
                best_restart,
                gp.kernel()
            ),
        );

        let mut state = TrainedState {
            gp,
            input_scaler,
            output_scaler,
            stats: None,
        };

        let held_out: Vec<(f64, f64)> = test_idx
            .iter()
            .map(|&i| (targets[i], state.predict(&rows[i]).mean))
            .collect();
        let (mae, rmse, r2) = regression_metrics(&held_out);
        let stats = TrainingStats {
            parameter: self.parameter.clone(),
            n_train: train_idx.len(),
            n_test,
            mae: round_to(mae, 4),
            rmse: round_to(rmse, 4),
            r2_score: round_to(r2, 4),
            log_likelihood: round_to(state.gp.log_marginal_likelihood(), 2),
            kernel: state.gp.kernel().to_string(),
        };
        state.stats = Some(stats.clone());
        self.state = ModelState::Trained(Box::new(state));

        logging::info(
            Component::Surrogate,
            Some(&self.parameter),
            &format!(
                "Training complete: MAE={:.4}, RMSE={:.4}, R²={:.4}",
                stats.mae, stats.rmse, stats.r2_score
            ),
        );
        Ok(stats)
    }

    // -----------------------------------------------------------------------
    // Prediction
    // -----------------------------------------------------------------------

    pub fn predict(&self, query: &PredictionQuery) -> Result<Prediction> {
        Ok(self.trained()?.predict(&query.features()))
    }

    pub fn predict_mean(&self, query: &PredictionQuery) -> Result<f64> {
        self.predict(query).map(|p| p.mean)
    }

    /// Predicts at each `(latitude, longitude)` for one month, in input order.
    pub fn predict_batch(
        &self,
        locations: &[(f64, f64)],
        month: Option<u32>,
    ) -> Result<Vec<LocationPrediction>> {
        let state = self.trained()?;
        let month = month.unwrap_or_else(current_month);
        Ok(locations
            .iter()
            .map(|&(latitude, longitude)| {
                let query = PredictionQuery::at(latitude, longitude).in_month(month);
                let prediction = state.predict(&query.features());
                LocationPrediction {
                    latitude,
                    longitude,
                    predicted_value: prediction.mean,
                    uncertainty: prediction.std,
                    parameter: self.parameter.clone(),
                }
            })
            .collect())
    }

    /// The `top_k` candidates the model is least sure about, most uncertain
    /// first. Equal uncertainties keep input order.
    pub fn find_high_uncertainty_locations(
        &self,
        candidates: &[(f64, f64)],
        top_k: usize,
        month: Option<u32>,
    ) -> Result<Vec<LocationPrediction>> {
        let mut predictions = self.predict_batch(candidates, month)?;
        predictions.sort_by(|a, b| b.uncertainty.total_cmp(&a.uncertainty));
        predictions.truncate(top_k);
        Ok(predictions)
    }

    // -----------------------------------------------------------------------
    // Persistence
    // -----------------------------------------------------------------------

    pub fn to_artifact(&self) -> Result<ModelArtifact> {
        let state = self.trained()?;
        Ok(ModelArtifact::new(
            &self.parameter,
            &state.gp,
            &state.input_scaler,
            &state.output_scaler,
            state.stats.clone(),
        ))
    }

    pub fn from_artifact(artifact: &ModelArtifact, config: TrainingConfig) -> Result<Self> {
        let gp = artifact.to_process()?;
        let config = TrainingConfig {
            kernel: artifact.kernel.kind,
            ..config
        };
        Ok(Self {
            parameter: artifact.parameter.clone(),
            config,
            state: ModelState::Trained(Box::new(TrainedState {
                gp,
                input_scaler: artifact.input_scaler.clone(),
                output_scaler: artifact.output_scaler.clone(),
                stats: artifact.training_stats.clone(),
            })),
        })
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        self.to_artifact()?.save(path)?;
        logging::info(
            Component::Surrogate,
            Some(&self.parameter),
            &format!("Model saved to {}", path.display()),
        );
        Ok(())
    }

    /// Loads a saved model with default training settings.
    pub fn load(path: &Path) -> Result<Self> {
        Self::load_with(path, TrainingConfig::default())
    }

    /// Loads a saved model that retrains with `config`. The posterior is
    /// rebuilt from the stored hyperparameters; nothing is re-optimized.
    pub fn load_with(path: &Path, config: TrainingConfig) -> Result<Self> {
        let artifact = ModelArtifact::load(path)?;
        let model = Self::from_artifact(&artifact, config)?;
        logging::info(
            Component::Surrogate,
            Some(&model.parameter),
            &format!("Model loaded from {}", path.display()),
        );
        Ok(model)
    }
}

impl TrainedState {
    fn predict(&self, features: &[f64; FEATURE_COUNT]) -> Prediction {
        let scaled = self.input_scaler.transform(features);
        let (mean, std) = self.gp.predict(&scaled);
        Prediction {
            mean: self.output_scaler.inverse_value(mean),
            std: self.output_scaler.inverse_std(std),
        }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// `ceil(n · fraction)`, kept within `1..=n-1` so both splits are non-empty.
fn held_out_size(n: usize, fraction: f64) -> usize {
    let raw = (n as f64 * fraction).ceil() as usize;
    raw.clamp(1, n.saturating_sub(1).max(1))
}

/// MAE, RMSE and R² over `(actual, predicted)` pairs. R² is 0 when the
/// actual values have no spread.
fn regression_metrics(pairs: &[(f64, f64)]) -> (f64, f64, f64) {
    if pairs.is_empty() {
        return (0.0, 0.0, 0.0);
    }
    let n = pairs.len() as f64;
    let mae = pairs.iter().map(|(a, p)| (a - p).abs()).sum::<f64>() / n;
    let ss_res: f64 = pairs.iter().map(|(a, p)| (a - p) * (a - p)).sum();
    let mean_actual = pairs.iter().map(|(a, _)| a).sum::<f64>() / n;
    let ss_tot: f64 = pairs
        .iter()
        .map(|(a, _)| (a - mean_actual) * (a - mean_actual))
        .sum();
    let r2 = if ss_tot > 0.0 { 1.0 - ss_res / ss_tot } else { 0.0 };
    (mae, (ss_res / n).sqrt(), r2)
}

/// Mixes the run seed with a stable FNV-1a hash of the parameter name, so
/// each parameter gets its own reproducible stream regardless of which
/// worker trains it.
pub fn parameter_seed(seed: u64, parameter: &str) -> u64 {
    const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;
    let hash = parameter
        .bytes()
        .fold(FNV_OFFSET, |h, b| (h ^ u64::from(b)).wrapping_mul(FNV_PRIME));
    hash ^ seed.wrapping_mul(0x9e37_79b9_7f4a_7c15)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quick_config() -> TrainingConfig {
        TrainingConfig {
            max_iterations: 30,
            ..TrainingConfig::default()
        }
    }

    /// 30 May samples in a one-degree cell around (20.5, 78.5).
    fn clustered_samples() -> Vec<WaterSample> {
        (0..30)
            .map(|i| {
                let lat = 20.0 + f64::from(i % 6) * 0.2;
                let lon = 78.0 + f64::from(i / 6) * 0.25;
                let ph = 7.0 + 0.4 * (lat * 3.0).sin() + 0.2 * (lon * 2.0).cos();
                WaterSample::new(lat, lon)
                    .with_date("2024-05-10")
                    .with_value("ph_value", ph)
            })
            .collect()
    }

    #[test]
    fn test_untrained_model_refuses_to_predict() {
        let model = SurrogateModel::new("ph_value", quick_config());
        assert!(!model.is_trained());
        let err = model.predict(&PredictionQuery::at(20.0, 78.0)).unwrap_err();
        assert!(matches!(err, WflowError::ModelNotTrained(ref p) if p == "ph_value"));
        assert!(model.predict_batch(&[(20.0, 78.0)], Some(5)).is_err());
        assert!(model.save(Path::new("/tmp/never-written.json")).is_err());
    }

    #[test]
    fn test_training_without_target_is_a_data_error() {
        let mut model = SurrogateModel::new("tds_ppm", quick_config());
        let err = model.train(&clustered_samples(), 2, 42).unwrap_err();
        assert!(matches!(err, WflowError::TrainingData { .. }), "got {:?}", err);
        assert!(!model.is_trained(), "failed training must leave the model untrained");
    }

    #[test]
    fn test_too_few_samples_is_a_data_error() {
        let mut model = SurrogateModel::new("ph_value", quick_config());
        let samples: Vec<WaterSample> = clustered_samples().into_iter().take(4).collect();
        let err = model.train(&samples, 1, 42).unwrap_err();
        assert!(err.to_string().contains("at least 5"), "got {}", err);
    }

    #[test]
    fn test_training_reports_split_and_metrics() {
        let mut model = SurrogateModel::new("ph_value", quick_config());
        let stats = model.train(&clustered_samples(), 2, 42).expect("training should succeed");
        assert!(model.is_trained());
        assert_eq!(stats.n_test, 6, "ceil(30 * 0.2) held out");
        assert_eq!(stats.n_train, 24);
        assert!(stats.mae.is_finite() && stats.mae >= 0.0);
        assert!(stats.rmse >= stats.mae);
        assert!(stats.log_likelihood.is_finite());
        assert!(stats.kernel.contains("RBF") && stats.kernel.contains("Matern"));
        assert_eq!(model.training_stats(), Some(&stats));
    }

    #[test]
    fn test_training_is_deterministic_for_a_seed() {
        let samples = clustered_samples();
        let mut a = SurrogateModel::new("ph_value", quick_config());
        let mut b = SurrogateModel::new("ph_value", quick_config());
        let stats_a = a.train(&samples, 3, 7).unwrap();
        let stats_b = b.train(&samples, 3, 7).unwrap();
        assert_eq!(stats_a, stats_b);
        let query = PredictionQuery::at(20.3, 78.6).in_month(5);
        assert_eq!(a.predict(&query).unwrap(), b.predict(&query).unwrap());
    }

    #[test]
    fn test_uncertainty_is_lower_near_the_data() {
        let mut model = SurrogateModel::new("ph_value", quick_config());
        model.train(&clustered_samples(), 2, 42).unwrap();
        let near = model
            .predict(&PredictionQuery::at(20.5, 78.5).in_month(5))
            .unwrap();
        let far = model
            .predict(&PredictionQuery::at(34.0, 95.0).in_month(5))
            .unwrap();
        assert!(
            near.std < far.std,
            "near std {} should be below far std {}",
            near.std,
            far.std
        );
    }

    #[test]
    fn test_batch_matches_single_predictions() {
        let mut model = SurrogateModel::new("ph_value", quick_config());
        model.train(&clustered_samples(), 2, 42).unwrap();
        let locations = [(20.1, 78.2), (25.0, 80.0), (20.9, 78.9)];
        let batch = model.predict_batch(&locations, Some(5)).unwrap();
        assert_eq!(batch.len(), locations.len());
        for (row, &(lat, lon)) in batch.iter().zip(&locations) {
            let single = model
                .predict(&PredictionQuery::at(lat, lon).in_month(5))
                .unwrap();
            assert_eq!((row.latitude, row.longitude), (lat, lon), "order preserved");
            assert!((row.predicted_value - single.mean).abs() < 1e-12);
            assert!((row.uncertainty - single.std).abs() < 1e-12);
        }
    }

    #[test]
    fn test_high_uncertainty_locations_sorted_descending() {
        let mut model = SurrogateModel::new("ph_value", quick_config());
        model.train(&clustered_samples(), 2, 42).unwrap();
        let candidates = [(20.5, 78.5), (33.0, 96.0), (22.0, 79.0), (9.0, 70.0)];
        let top = model
            .find_high_uncertainty_locations(&candidates, 2, Some(5))
            .unwrap();
        assert_eq!(top.len(), 2);
        assert!(top[0].uncertainty >= top[1].uncertainty);
        assert!(
            top.iter().all(|p| p.latitude != 20.5),
            "the in-cluster point should not be among the most uncertain"
        );
    }

    #[test]
    fn test_scalers_are_fitted_on_training_split_only() {
        let mut samples = clustered_samples();
        // Extreme readings; wherever the split puts them, the scalers
        // must describe exactly the training rows.
        for (i, sample) in samples.iter_mut().enumerate().take(6) {
            *sample = sample.clone().with_value("ph_value", 40.0 + i as f64);
        }
        let mut model = SurrogateModel::new("ph_value", quick_config());
        let stats = model.train(&samples, 1, 42).unwrap();
        let artifact = model.to_artifact().unwrap();
        assert_eq!(artifact.x_train.len(), stats.n_train);
        assert_eq!(artifact.y_train.len(), stats.n_train);

        let input = &artifact.input_scaler;
        let raw_rows: Vec<[f64; FEATURE_COUNT]> = artifact
            .x_train
            .iter()
            .map(|row| {
                let mut raw = [0.0; FEATURE_COUNT];
                for (j, r) in raw.iter_mut().enumerate() {
                    *r = row[j] * input.scale[j] + input.mean[j];
                }
                raw
            })
            .collect();
        let raw_targets: Vec<f64> = artifact
            .y_train
            .iter()
            .map(|&v| artifact.output_scaler.inverse_value(v))
            .collect();

        let refit_input = StandardScaler::fit(&raw_rows).unwrap();
        let refit_output = StandardScaler::fit_values(&raw_targets).unwrap();
        for (a, b) in input.mean.iter().zip(&refit_input.mean) {
            assert!((a - b).abs() < 1e-9, "input mean {} vs training-rows mean {}", a, b);
        }
        for (a, b) in input.scale.iter().zip(&refit_input.scale) {
            assert!((a - b).abs() < 1e-9, "input scale {} vs training-rows scale {}", a, b);
        }
        assert!((artifact.output_scaler.mean[0] - refit_output.mean[0]).abs() < 1e-9);
        assert!((artifact.output_scaler.scale[0] - refit_output.scale[0]).abs() < 1e-9);

        let all_targets: Vec<f64> = samples.iter().filter_map(|s| s.value("ph_value")).collect();
        let all = StandardScaler::fit_values(&all_targets).unwrap();
        assert_ne!(
            artifact.output_scaler, all,
            "held-out targets must not contribute to the target scaler"
        );
    }

    #[test]
    fn test_retraining_refits_in_place_and_keeps_state_on_failure() {
        let query = PredictionQuery::at(20.5, 78.5).in_month(5);
        let mut model = SurrogateModel::new("ph_value", quick_config());
        model.train(&clustered_samples(), 1, 42).unwrap();
        let first = model.predict(&query).unwrap();

        let shifted: Vec<WaterSample> = clustered_samples()
            .into_iter()
            .map(|s| {
                let ph = s.value("ph_value").unwrap_or(7.0) + 1.5;
                s.with_value("ph_value", ph)
            })
            .collect();
        let retrained_stats = model.train(&shifted, 1, 42).unwrap();
        assert!(model.is_trained());
        let second = model.predict(&query).unwrap();
        assert!(
            (second.mean - first.mean).abs() > 0.5,
            "retraining on shifted data should move the prediction: {} -> {}",
            first.mean,
            second.mean
        );

        let no_target: Vec<WaterSample> = (0..10)
            .map(|i| WaterSample::new(20.0 + f64::from(i) * 0.1, 78.0).with_value("tds_ppm", 300.0))
            .collect();
        assert!(model.train(&no_target, 1, 42).is_err());
        assert!(model.is_trained(), "a failed retrain keeps the previous fit");
        assert_eq!(model.predict(&query).unwrap(), second);
        assert_eq!(model.training_stats(), Some(&retrained_stats));
    }

    #[test]
    fn test_held_out_size_bounds() {
        assert_eq!(held_out_size(30, 0.2), 6);
        assert_eq!(held_out_size(5, 0.2), 1);
        assert_eq!(held_out_size(2, 0.9), 1, "at least one training example remains");
        assert_eq!(held_out_size(11, 0.2), 3);
    }

    #[test]
    fn test_metrics_with_constant_actuals() {
        let (mae, rmse, r2) = regression_metrics(&[(1.0, 1.5), (1.0, 0.5)]);
        assert_eq!(mae, 0.5);
        assert_eq!(rmse, 0.5);
        assert_eq!(r2, 0.0, "no spread in actuals gives R² of 0");
    }

    #[test]
    fn test_parameter_seed_separates_parameters() {
        assert_ne!(parameter_seed(42, "ph_value"), parameter_seed(42, "tds_ppm"));
        assert_ne!(parameter_seed(42, "ph_value"), parameter_seed(43, "ph_value"));
        assert_eq!(parameter_seed(42, "ph_value"), parameter_seed(42, "ph_value"));
    }
}
