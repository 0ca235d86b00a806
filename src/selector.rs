//! Budget-constrained test-site selection (WFLOW-OPT).
//!
//! The selector owns one trained `SurrogateModel` per parameter. Training
//! runs per parameter on the rayon pool; a parameter with no or unusable
//! data is logged and skipped, so the remaining parameters still contribute.
//! Selection scores every candidate against every trained model, averages
//! per-parameter risk into one combined score, and keeps the top `n` by a
//! stable sort so ties follow candidate order.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use rayon::prelude::*;

use crate::acquisition::risk_score;
use crate::config::{Config, SelectorConfig, TrainingConfig};
use crate::logging::{self, Component, FailureType};
use crate::model::{
    CandidateSite, ParameterPrediction, Result, ScoredSite, TestingPlan, TrainingStats,
    WaterSample, WflowError, round_to,
};
use crate::parameters::ContaminationThresholds;
use crate::surrogate::{PredictionQuery, SurrogateModel, current_month};

/// Prefix of every model artifact written by `save_models`.
pub const MODEL_FILE_PREFIX: &str = "wflow_ml_";

/// Artifact file name for one parameter, e.g. `wflow_ml_ph_value.json`.
pub fn model_file_name(parameter: &str) -> String {
    format!("{}{}.json", MODEL_FILE_PREFIX, parameter)
}

// ---------------------------------------------------------------------------
// Training report
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct TrainingFailure {
    pub parameter: String,
    pub reason: String,
    pub failure_type: FailureType,
}

/// Outcome of `train_models`, in configured parameter order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrainingReport {
    pub trained: Vec<TrainingStats>,
    pub failures: Vec<TrainingFailure>,
}

impl TrainingReport {
    pub fn total(&self) -> usize {
        self.trained.len() + self.failures.len()
    }

    pub fn all_succeeded(&self) -> bool {
        self.failures.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Selector
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct SiteSelector {
    config: SelectorConfig,
    training: TrainingConfig,
    thresholds: ContaminationThresholds,
    models: BTreeMap<String, SurrogateModel>,
}

impl SiteSelector {
    pub fn new(
        config: SelectorConfig,
        training: TrainingConfig,
        thresholds: ContaminationThresholds,
    ) -> Self {
        logging::info(
            Component::Selector,
            None,
            &format!(
                "Initialized with {} parameters, acquisition {} (weight={})",
                config.parameters.len(),
                config.acquisition,
                config.exploration_weight
            ),
        );
        Self {
            config,
            training,
            thresholds,
            models: BTreeMap::new(),
        }
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self::new(
            config.selector.clone(),
            config.training.clone(),
            config.contamination_thresholds()?,
        ))
    }

    pub fn config(&self) -> &SelectorConfig {
        &self.config
    }

    pub fn thresholds(&self) -> &ContaminationThresholds {
        &self.thresholds
    }

    /// Parameters with a usable model, in sorted order.
    pub fn trained_parameters(&self) -> Vec<&str> {
        self.models.keys().map(String::as_str).collect()
    }

    pub fn model(&self, parameter: &str) -> Option<&SurrogateModel> {
        self.models.get(parameter)
    }

    /// Adds (or replaces) a model. Untrained models are ignored.
    pub fn insert_model(&mut self, model: SurrogateModel) -> bool {
        if !model.is_trained() {
            logging::warn(
                Component::Selector,
                Some(model.parameter()),
                "ignoring untrained model",
            );
            return false;
        }
        self.models.insert(model.parameter().to_string(), model);
        true
    }

    // -----------------------------------------------------------------------
    // Training
    // -----------------------------------------------------------------------

    /// Trains every configured parameter from `training_data`.
    ///
    /// Parameters are independent and train in parallel. Missing, empty and
    /// failed parameters end up in `failures`; their previous model, if any,
    /// is kept.
    pub fn train_models(
        &mut self,
        training_data: &BTreeMap<String, Vec<WaterSample>>,
    ) -> TrainingReport {
        logging::info(Component::Selector, None, "Training models for all parameters");

        let outcomes: Vec<(String, Result<(SurrogateModel, TrainingStats)>)> = self
            .config
            .parameters
            .par_iter()
            .map(|parameter| {
                let samples = training_data.get(parameter).map(Vec::as_slice).unwrap_or(&[]);
                let outcome = if samples.is_empty() {
                    Err(WflowError::training_data(parameter, "no training data"))
                } else {
                    let mut model = SurrogateModel::new(parameter, self.training.clone());
                    model
                        .train(samples, self.training.n_restarts, self.training.seed)
                        .map(|stats| (model, stats))
                };
                (parameter.clone(), outcome)
            })
            .collect();

        let mut report = TrainingReport::default();
        for (parameter, outcome) in outcomes {
            match outcome {
                Ok((model, stats)) => {
                    logging::info(
                        Component::Selector,
                        Some(&parameter),
                        &format!("R²={:.3}, RMSE={:.3}", stats.r2_score, stats.rmse),
                    );
                    self.models.insert(parameter, model);
                    report.trained.push(stats);
                }
                Err(err) => {
                    logging::log_training_failure(&parameter, "train", &err);
                    report.failures.push(TrainingFailure {
                        failure_type: logging::classify_training_failure(&err),
                        reason: err.to_string(),
                        parameter,
                    });
                }
            }
        }

        logging::log_training_summary(
            report.total(),
            report.trained.len(),
            report.failures.len(),
        );
        report
    }

    // -----------------------------------------------------------------------
    // Persistence
    // -----------------------------------------------------------------------

    /// Writes every trained model to `dir` and returns the written paths.
    pub fn save_models(&self, dir: &Path) -> Result<Vec<PathBuf>> {
        std::fs::create_dir_all(dir).map_err(|e| WflowError::io(dir, e))?;
        let mut written = Vec::with_capacity(self.models.len());
        for (parameter, model) in &self.models {
            let path = dir.join(model_file_name(parameter));
            model.save(&path)?;
            written.push(path);
        }
        Ok(written)
    }

    /// Loads every `wflow_ml_*.json` artifact in `dir` and returns the loaded
    /// parameter names. A corrupt artifact fails the whole load.
    pub fn load_models(&mut self, dir: &Path) -> Result<Vec<String>> {
        let entries = std::fs::read_dir(dir).map_err(|e| WflowError::io(dir, e))?;
        let mut paths = Vec::new();
        for entry in entries {
            let path = entry.map_err(|e| WflowError::io(dir, e))?.path();
            let is_artifact = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with(MODEL_FILE_PREFIX) && n.ends_with(".json"));
            if is_artifact {
                paths.push(path);
            }
        }
        paths.sort();

        let mut loaded = Vec::with_capacity(paths.len());
        for path in paths {
            let model = SurrogateModel::load_with(&path, self.training.clone())?;
            let parameter = model.parameter().to_string();
            if !self.config.parameters.contains(&parameter) {
                logging::debug(
                    Component::Selector,
                    Some(&parameter),
                    "loaded a model for a parameter outside the configured list",
                );
            }
            self.models.insert(parameter.clone(), model);
            loaded.push(parameter);
        }
        logging::info(
            Component::Selector,
            None,
            &format!("Loaded {} models from {}", loaded.len(), dir.display()),
        );
        Ok(loaded)
    }

    // -----------------------------------------------------------------------
    // Selection
    // -----------------------------------------------------------------------

    /// Scores all candidates and returns the `n_sites` highest-risk ones,
    /// ranked from 1.
    ///
    /// Fails with `NoTrainedModels` rather than returning an empty selection.
    pub fn select_test_sites(
        &self,
        candidates: &[CandidateSite],
        n_sites: usize,
        month: Option<u32>,
    ) -> Result<Vec<ScoredSite>> {
        if self.models.is_empty() {
            logging::error(
                Component::Selector,
                None,
                "No trained models available - train models first",
            );
            return Err(WflowError::NoTrainedModels);
        }
        let month = month.unwrap_or_else(current_month);
        logging::info(
            Component::Selector,
            None,
            &format!(
                "Selecting {} test sites from {} candidates (month {})",
                n_sites,
                candidates.len(),
                month
            ),
        );

        let mut scored: Vec<ScoredSite> = candidates
            .par_iter()
            .enumerate()
            .map(|(index, candidate)| self.score_candidate(index, candidate, month))
            .collect::<Result<Vec<_>>>()?;

        // `sort_by` is stable: equal scores keep candidate order.
        scored.sort_by(|a, b| b.combined_score.total_cmp(&a.combined_score));
        scored.truncate(n_sites.min(candidates.len()));
        for (position, site) in scored.iter_mut().enumerate() {
            site.rank = position + 1;
        }

        if let (Some(first), Some(last)) = (scored.first(), scored.last()) {
            logging::info(
                Component::Selector,
                None,
                &format!(
                    "Selected {} test sites, risk score range {:.1} - {:.1}",
                    scored.len(),
                    last.risk_score,
                    first.risk_score
                ),
            );
        }
        Ok(scored)
    }

    fn score_candidate(
        &self,
        index: usize,
        candidate: &CandidateSite,
        month: u32,
    ) -> Result<ScoredSite> {
        let query = PredictionQuery::at(candidate.latitude, candidate.longitude).in_month(month);
        let mut parameter_predictions = BTreeMap::new();
        let mut total_risk = 0.0;

        for (parameter, model) in &self.models {
            let prediction = model.predict(&query)?;
            let range = self.thresholds.get(parameter);
            let acquisition = self.config.acquisition.score(
                prediction.mean,
                prediction.std,
                range,
                self.config.exploration_weight,
            );
            let risk = risk_score(range, prediction.mean, prediction.std);
            total_risk += risk;
            parameter_predictions.insert(
                parameter.clone(),
                ParameterPrediction {
                    predicted: round_to(prediction.mean, 4),
                    uncertainty: round_to(prediction.std, 4),
                    acquisition: round_to(acquisition, 4),
                    risk: round_to(risk, 2),
                },
            );
        }

        let avg_risk = total_risk / self.models.len() as f64;
        Ok(ScoredSite {
            rank: 0,
            latitude: candidate.latitude,
            longitude: candidate.longitude,
            location_name: candidate.display_name(index),
            risk_score: round_to(avg_risk, 2),
            combined_score: round_to(avg_risk, 2),
            month,
            parameter_predictions,
        })
    }

    /// Selects `monthly_budget_sites` sites and summarizes them as a plan.
    ///
    /// The plan's `estimated_detection_rate` is a planning heuristic, see
    /// [`crate::plan`].
    pub fn generate_monthly_testing_plan(
        &self,
        all_locations: &[CandidateSite],
        monthly_budget_sites: usize,
        month: Option<u32>,
    ) -> Result<TestingPlan> {
        let month = month.unwrap_or_else(current_month);
        let selected = self.select_test_sites(all_locations, monthly_budget_sites, Some(month))?;
        let plan = TestingPlan::from_selection(month, all_locations.len(), selected);

        logging::info(
            Component::Selector,
            None,
            &format!(
                "Monthly plan: {} of {} sites tested, {:.1}% reduction, estimated detection {:.1}% (heuristic)",
                plan.tested_sites,
                plan.total_sites,
                plan.reduction_percent,
                plan.estimated_detection_rate
            ),
        );
        Ok(plan)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acquisition::UNKNOWN_PARAMETER_RISK;

    fn training_config() -> TrainingConfig {
        TrainingConfig {
            n_restarts: 2,
            max_iterations: 25,
            ..TrainingConfig::default()
        }
    }

    fn selector(parameters: &[&str]) -> SiteSelector {
        let config = SelectorConfig {
            parameters: parameters.iter().map(|p| p.to_string()).collect(),
            ..SelectorConfig::default()
        };
        SiteSelector::new(config, training_config(), ContaminationThresholds::from_registry())
    }

    fn samples(parameter: &str, base: f64) -> Vec<WaterSample> {
        (0..20)
            .map(|i| {
                let lat = 18.0 + f64::from(i % 5) * 0.5;
                let lon = 75.0 + f64::from(i / 5) * 0.5;
                WaterSample::new(lat, lon)
                    .with_date("2024-03-15")
                    .with_value(parameter, base + 0.1 * lat - 0.05 * lon)
            })
            .collect()
    }

    #[test]
    fn test_selection_without_models_is_an_error() {
        let selector = selector(&["ph_value"]);
        let candidates = vec![CandidateSite::new(20.0, 78.0)];
        let err = selector.select_test_sites(&candidates, 1, Some(3)).unwrap_err();
        assert!(matches!(err, WflowError::NoTrainedModels));
        assert!(
            selector
                .generate_monthly_testing_plan(&candidates, 1, Some(3))
                .is_err(),
            "a plan without models must not look successful"
        );
    }

    #[test]
    fn test_missing_parameter_data_is_skipped() {
        let mut selector = selector(&["ph_value", "tds_ppm"]);
        let mut data = BTreeMap::new();
        data.insert("ph_value".to_string(), samples("ph_value", 5.0));
        let report = selector.train_models(&data);
        assert_eq!(report.trained.len(), 1);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].parameter, "tds_ppm");
        assert_eq!(report.failures[0].failure_type, FailureType::Expected);
        assert_eq!(selector.trained_parameters(), vec!["ph_value"]);
    }

    #[test]
    fn test_selection_respects_budget_and_ranks() {
        let mut selector = selector(&["ph_value"]);
        let mut data = BTreeMap::new();
        data.insert("ph_value".to_string(), samples("ph_value", 5.0));
        selector.train_models(&data);

        let candidates: Vec<CandidateSite> = (0..12)
            .map(|i| CandidateSite::new(17.0 + f64::from(i) * 0.4, 75.5))
            .collect();
        for n in [0, 1, 5, 12, 50] {
            let sites = selector.select_test_sites(&candidates, n, Some(3)).unwrap();
            assert_eq!(sites.len(), n.min(candidates.len()), "budget {}", n);
            for (i, site) in sites.iter().enumerate() {
                assert_eq!(site.rank, i + 1);
                assert_eq!(site.month, 3);
            }
            for pair in sites.windows(2) {
                assert!(pair[0].combined_score >= pair[1].combined_score);
            }
        }
    }

    #[test]
    fn test_selection_is_deterministic() {
        let mut data = BTreeMap::new();
        data.insert("ph_value".to_string(), samples("ph_value", 6.0));
        data.insert("turbidity_ntu".to_string(), samples("turbidity_ntu", 4.0));
        let candidates: Vec<CandidateSite> = (0..8)
            .map(|i| CandidateSite::new(16.0 + f64::from(i), 74.0 + 0.3 * f64::from(i)))
            .collect();

        let run = || {
            let mut s = selector(&["ph_value", "turbidity_ntu"]);
            s.train_models(&data);
            s.select_test_sites(&candidates, 5, Some(3)).unwrap()
        };
        assert_eq!(run(), run());
    }

    #[test]
    fn test_unknown_parameter_scores_neutral_risk() {
        let config = SelectorConfig {
            parameters: vec!["chloride_mg_l".to_string()],
            ..SelectorConfig::default()
        };
        let mut selector =
            SiteSelector::new(config, training_config(), ContaminationThresholds::from_registry());
        let mut data = BTreeMap::new();
        data.insert("chloride_mg_l".to_string(), samples("chloride_mg_l", 120.0));
        selector.train_models(&data);

        let sites = selector
            .select_test_sites(&[CandidateSite::new(19.0, 76.0)], 1, Some(3))
            .unwrap();
        assert_eq!(sites[0].risk_score, UNKNOWN_PARAMETER_RISK);
        assert_eq!(sites[0].parameter_predictions["chloride_mg_l"].risk, 50.0);
    }

    #[test]
    fn test_ties_keep_candidate_order() {
        let config = SelectorConfig {
            parameters: vec!["chloride_mg_l".to_string()],
            ..SelectorConfig::default()
        };
        let mut selector =
            SiteSelector::new(config, training_config(), ContaminationThresholds::empty());
        let mut data = BTreeMap::new();
        data.insert("chloride_mg_l".to_string(), samples("chloride_mg_l", 80.0));
        selector.train_models(&data);

        // Every candidate scores the neutral 50, so ranking is candidate order.
        let candidates = vec![
            CandidateSite::named(30.0, 90.0, "first"),
            CandidateSite::named(18.5, 75.5, "second"),
            CandidateSite::named(10.0, 70.0, "third"),
        ];
        let sites = selector.select_test_sites(&candidates, 3, Some(3)).unwrap();
        let names: Vec<&str> = sites.iter().map(|s| s.location_name.as_str()).collect();
        assert_eq!(names, vec!["first", "second", "third"]);
    }

    #[test]
    fn test_insert_model_rejects_untrained() {
        let mut selector = selector(&["ph_value"]);
        assert!(!selector.insert_model(SurrogateModel::new("ph_value", training_config())));
        assert!(selector.trained_parameters().is_empty());
    }

    #[test]
    fn test_loaded_models_carry_selector_training_config() {
        let mut original = selector(&["ph_value"]);
        let mut data = BTreeMap::new();
        data.insert("ph_value".to_string(), samples("ph_value", 7.0));
        assert!(original.train_models(&data).all_succeeded());
        let dir = tempfile::tempdir().unwrap();
        original.save_models(dir.path()).unwrap();

        let mut restored = selector(&["ph_value"]);
        restored.load_models(dir.path()).unwrap();
        let model = restored.model("ph_value").expect("model loaded");
        assert_eq!(
            model.training_config(),
            &training_config(),
            "a reloaded model retrains with the selector's settings, not the defaults"
        );
    }

    #[test]
    fn test_model_file_name() {
        assert_eq!(model_file_name("ph_value"), "wflow_ml_ph_value.json");
    }
}
