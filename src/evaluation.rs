//! Plan evaluation against observed outcomes.
//!
//! Joins a plan's selected names with ground truth gathered after the month
//! and tallies the confusion matrix. This is the only measured detection
//! rate in the system; compare it with the plan's heuristic estimate, never
//! substitute one for the other.

use std::collections::HashSet;

use crate::logging::{self, Component};
use crate::model::{EvaluationResult, GroundTruthOutcome, TestingPlan, round_to};

/// Scores `plan` against `actual_outcomes`.
///
/// Sites are matched by name. Outcomes for sites outside the plan count as
/// untested; selected sites with no outcome are not counted at all.
pub fn evaluate_plan_performance(
    plan: &TestingPlan,
    actual_outcomes: &[GroundTruthOutcome],
) -> EvaluationResult {
    let tested: HashSet<&str> = plan
        .selected_sites
        .iter()
        .map(|s| s.location_name.as_str())
        .collect();

    let (mut tp, mut fp, mut tn, mut fn_) = (0usize, 0usize, 0usize, 0usize);
    for outcome in actual_outcomes {
        let was_tested = tested.contains(outcome.location_name.as_str());
        match (outcome.is_contaminated, was_tested) {
            (true, true) => tp += 1,
            (true, false) => fn_ += 1,
            (false, false) => tn += 1,
            (false, true) => fp += 1,
        }
    }

    let recall = ratio(tp, tp + fn_);
    let precision = ratio(tp, tp + fp);
    let f1 = if precision + recall > 0.0 {
        2.0 * precision * recall / (precision + recall)
    } else {
        0.0
    };

    let result = EvaluationResult {
        true_positives: tp,
        false_positives: fp,
        true_negatives: tn,
        false_negatives: fn_,
        total_contaminated: tp + fn_,
        detection_rate: round_to(recall * 100.0, 2),
        precision: round_to(precision * 100.0, 2),
        recall: round_to(recall * 100.0, 2),
        f1_score: round_to(f1 * 100.0, 2),
    };

    logging::info(
        Component::Evaluator,
        None,
        &format!(
            "Detection {:.2}% ({}/{} contaminated sites tested), precision {:.2}%, F1 {:.2}%",
            result.detection_rate,
            tp,
            result.total_contaminated,
            result.precision,
            result.f1_score
        ),
    );
    result
}

fn ratio(numerator: usize, denominator: usize) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        numerator as f64 / denominator as f64
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::model::ScoredSite;

    fn plan_with(names: &[&str]) -> TestingPlan {
        let sites = names
            .iter()
            .enumerate()
            .map(|(i, name)| ScoredSite {
                rank: i + 1,
                latitude: 20.0,
                longitude: 78.0,
                location_name: name.to_string(),
                risk_score: 40.0,
                combined_score: 40.0,
                month: 6,
                parameter_predictions: BTreeMap::new(),
            })
            .collect();
        TestingPlan::from_selection(6, 4, sites)
    }

    #[test]
    fn test_three_of_four_scenario() {
        let plan = plan_with(&["A", "B", "C"]);
        let truth = [
            GroundTruthOutcome::new("A", true),
            GroundTruthOutcome::new("B", false),
            GroundTruthOutcome::new("C", true),
            GroundTruthOutcome::new("D", true),
        ];
        let result = evaluate_plan_performance(&plan, &truth);
        assert_eq!(result.true_positives, 2, "A and C");
        assert_eq!(result.false_positives, 1);
        assert_eq!(result.false_negatives, 1);
        assert_eq!(result.true_negatives, 0);
        assert_eq!(result.total_contaminated, 3);
        assert_eq!(result.detection_rate, 66.67);
        assert_eq!(result.precision, 66.67);
        assert_eq!(result.recall, 66.67);
        assert_eq!(result.f1_score, 66.67);
    }

    #[test]
    fn test_no_contamination_gives_zero_rates() {
        let plan = plan_with(&["A"]);
        let truth = [
            GroundTruthOutcome::new("A", false),
            GroundTruthOutcome::new("B", false),
        ];
        let result = evaluate_plan_performance(&plan, &truth);
        assert_eq!(result.false_positives, 1);
        assert_eq!(result.true_negatives, 1);
        assert_eq!(result.detection_rate, 0.0);
        assert_eq!(result.precision, 0.0);
        assert_eq!(result.f1_score, 0.0);
    }

    #[test]
    fn test_perfect_plan() {
        let plan = plan_with(&["A", "B"]);
        let truth = [
            GroundTruthOutcome::new("A", true),
            GroundTruthOutcome::new("B", true),
            GroundTruthOutcome::new("C", false),
        ];
        let result = evaluate_plan_performance(&plan, &truth);
        assert_eq!(result.detection_rate, 100.0);
        assert_eq!(result.precision, 100.0);
        assert_eq!(result.f1_score, 100.0);
        assert_eq!(result.true_negatives, 1);
    }

    #[test]
    fn test_empty_ground_truth() {
        let result = evaluate_plan_performance(&plan_with(&["A"]), &[]);
        assert_eq!(result.true_positives + result.false_positives, 0);
        assert_eq!(result.detection_rate, 0.0);
    }
}
