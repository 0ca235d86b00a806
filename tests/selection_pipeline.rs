//! End-to-end tests for the monthly selection pipeline
//!
//! These tests verify:
//! 1. Synthetic samples train every configured parameter
//! 2. Surrogate uncertainty is lower inside the sampled region than far from it
//! 3. Plans respect the budget and report consistent statistics
//! 4. Identical inputs and seeds give identical plans
//! 5. A plan scored against ground truth yields the expected confusion counts
//!
//! Everything runs offline on `DevMode` data; no files outside a temp dir.

use std::collections::BTreeMap;

use wflow_service::config::{Config, SelectorConfig, TrainingConfig};
use wflow_service::dev_mode::DevMode;
use wflow_service::evaluation::evaluate_plan_performance;
use wflow_service::model::{CandidateSite, GroundTruthOutcome, WaterSample, WflowError};
use wflow_service::parameters::ContaminationThresholds;
use wflow_service::selector::SiteSelector;
use wflow_service::surrogate::{PredictionQuery, SurrogateModel};

// ---------------------------------------------------------------------------
// Test Helpers
// ---------------------------------------------------------------------------

fn fast_training() -> TrainingConfig {
    TrainingConfig {
        n_restarts: 2,
        max_iterations: 25,
        ..TrainingConfig::default()
    }
}

fn trained_selector(parameters: &[&str], samples_per_parameter: usize) -> SiteSelector {
    let config = SelectorConfig {
        parameters: parameters.iter().map(|p| p.to_string()).collect(),
        ..SelectorConfig::default()
    };
    let data = DevMode::new(42).generate_training_data(&config.parameters, samples_per_parameter);
    let mut selector =
        SiteSelector::new(config, fast_training(), ContaminationThresholds::from_registry());
    let report = selector.train_models(&data);
    assert!(report.all_succeeded(), "synthetic data should train: {:?}", report.failures);
    selector
}

/// Samples packed into a small box around (21, 79).
fn clustered_samples() -> Vec<WaterSample> {
    (0..40)
        .map(|i| {
            let lat = 20.0 + f64::from(i % 8) * 0.25;
            let lon = 78.0 + f64::from(i / 8) * 0.4;
            let tds = 320.0 + 40.0 * (lat * 2.0).sin() - 25.0 * (lon * 1.5).cos();
            WaterSample::new(lat, lon)
                .with_date("2024-06-01")
                .with_value("tds_ppm", tds)
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Surrogate behavior
// ---------------------------------------------------------------------------

#[test]
fn test_uncertainty_shrinks_near_training_cluster() {
    let mut model = SurrogateModel::new("tds_ppm", fast_training());
    model
        .train(&clustered_samples(), 2, 42)
        .expect("clustered samples should train");

    let inside = model
        .predict(&PredictionQuery::at(20.9, 78.7).in_month(6))
        .unwrap();
    for (lat, lon) in [(32.0, 92.0), (9.0, 70.0), (28.0, 78.5)] {
        let outside = model
            .predict(&PredictionQuery::at(lat, lon).in_month(6))
            .unwrap();
        assert!(
            inside.std < outside.std,
            "std at ({}, {}) = {} should exceed in-cluster std {}",
            lat,
            lon,
            outside.std,
            inside.std
        );
    }
}

// ---------------------------------------------------------------------------
// Selection and plans
// ---------------------------------------------------------------------------

#[test]
fn test_monthly_plan_respects_budget() {
    let selector = trained_selector(&["ph_value", "tds_ppm"], 120);
    let candidates = DevMode::new(42).generate_candidate_sites(150);

    let plan = selector
        .generate_monthly_testing_plan(&candidates, 20, Some(6))
        .expect("plan with trained models");
    assert_eq!(plan.total_sites, 150);
    assert_eq!(plan.tested_sites, 20);
    assert_eq!(plan.untested_sites, 130);
    assert_eq!(plan.selected_sites.len(), 20);
    assert!((plan.reduction_percent - 86.7).abs() < 1e-9);
    assert_eq!(
        plan.statistics.high_risk_sites
            + plan.statistics.medium_risk_sites
            + plan.statistics.low_risk_sites,
        20,
        "every selected site falls in exactly one tier"
    );
    assert!((80.0..=95.0).contains(&plan.estimated_detection_rate));

    for site in &plan.selected_sites {
        assert!((0.0..=100.0).contains(&site.risk_score));
        assert_eq!(site.parameter_predictions.len(), 2);
        assert!(site.location_name.starts_with("Amrit_Sarovar_"));
    }
}

#[test]
fn test_budget_larger_than_candidates_selects_all() {
    let selector = trained_selector(&["ph_value"], 80);
    let candidates = DevMode::new(1).generate_candidate_sites(7);
    let plan = selector
        .generate_monthly_testing_plan(&candidates, 100, Some(2))
        .unwrap();
    assert_eq!(plan.tested_sites, 7);
    assert_eq!(plan.untested_sites, 0);
    assert_eq!(plan.reduction_percent, 0.0);
}

#[test]
fn test_plans_are_deterministic() {
    let candidates = DevMode::new(9).generate_candidate_sites(60);
    let a = trained_selector(&["ph_value", "turbidity_ntu"], 100)
        .generate_monthly_testing_plan(&candidates, 10, Some(4))
        .unwrap();
    let b = trained_selector(&["ph_value", "turbidity_ntu"], 100)
        .generate_monthly_testing_plan(&candidates, 10, Some(4))
        .unwrap();
    assert_eq!(a, b, "same data, seed and candidates must give the same plan");
}

#[test]
fn test_failed_parameter_degrades_instead_of_aborting() {
    let config = SelectorConfig {
        parameters: vec!["ph_value".to_string(), "tds_ppm".to_string()],
        ..SelectorConfig::default()
    };
    let mut data = BTreeMap::new();
    data.insert(
        "ph_value".to_string(),
        DevMode::new(42).generate_samples("ph_value", 80),
    );
    // Too few records for tds.
    data.insert(
        "tds_ppm".to_string(),
        DevMode::new(42).generate_samples("tds_ppm", 3),
    );

    let mut selector =
        SiteSelector::new(config, fast_training(), ContaminationThresholds::from_registry());
    let report = selector.train_models(&data);
    assert_eq!(report.trained.len(), 1);
    assert_eq!(report.failures[0].parameter, "tds_ppm");

    let sites = selector
        .select_test_sites(&[CandidateSite::new(20.0, 80.0)], 1, Some(6))
        .expect("one trained model is enough to select");
    assert_eq!(
        sites[0].parameter_predictions.keys().collect::<Vec<_>>(),
        vec!["ph_value"]
    );
}

#[test]
fn test_selection_without_models_reports_clear_error() {
    let config = Config::default();
    let selector = SiteSelector::from_config(&config).unwrap();
    let err = selector
        .generate_monthly_testing_plan(&[CandidateSite::new(20.0, 80.0)], 1, Some(6))
        .unwrap_err();
    assert!(matches!(err, WflowError::NoTrainedModels));
    assert!(err.to_string().contains("train or load models"));
}

// ---------------------------------------------------------------------------
// Evaluation
// ---------------------------------------------------------------------------

#[test]
fn test_plan_evaluation_against_ground_truth() {
    let selector = trained_selector(&["ph_value"], 80);
    let candidates = vec![
        CandidateSite::named(12.0, 75.0, "A"),
        CandidateSite::named(20.0, 80.0, "B"),
        CandidateSite::named(28.0, 85.0, "C"),
        CandidateSite::named(33.0, 95.0, "D"),
    ];
    let plan = selector
        .generate_monthly_testing_plan(&candidates, 2, Some(6))
        .unwrap();
    let tested: Vec<&str> = plan
        .selected_sites
        .iter()
        .map(|s| s.location_name.as_str())
        .collect();

    // Every site was contaminated: the plan catches exactly its two picks.
    let truth: Vec<GroundTruthOutcome> = ["A", "B", "C", "D"]
        .iter()
        .map(|name| GroundTruthOutcome::new(name, true))
        .collect();
    let result = evaluate_plan_performance(&plan, &truth);
    assert_eq!(tested.len(), 2);
    assert_eq!(result.true_positives, 2);
    assert_eq!(result.false_negatives, 2);
    assert_eq!(result.false_positives, 0);
    assert_eq!(result.detection_rate, 50.0);
    assert_eq!(result.precision, 100.0);
    assert_eq!(result.f1_score, 66.67);
}
