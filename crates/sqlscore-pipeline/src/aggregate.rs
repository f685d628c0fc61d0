use std::collections::BTreeMap;

use serde::Serialize;

use sqlscore_metrics::ErrorOrigin;

use crate::evaluate::{EvaluationOutcome, ExampleRecord};

/// Run-level agent statistics.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunSummary {
    pub total_questions: usize,
    pub agent_success_count: usize,
    pub agent_failure_count: usize,
    pub agent_success_rate: f64,
    pub agent_failure_rate: f64,
    pub total_prediction_ms: f64,
    pub avg_prediction_ms: f64,
}

/// Statistics of one metric over examples with a non-empty prediction.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MetricSummary {
    pub average_score: f64,
    /// Fraction of evaluated examples the metric judged correct.
    pub accuracy: f64,
    pub perfect_matches: usize,
    pub total_evaluated: usize,
    /// Examples whose reference statement itself failed.
    pub reference_failures: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DifficultyMetric {
    pub correct: usize,
    pub total: usize,
    pub average_score: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DifficultyBreakdown {
    pub total: usize,
    pub agent_success: usize,
    pub metrics: BTreeMap<String, DifficultyMetric>,
}

/// Summary statistics of one evaluation run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Aggregate {
    pub summary: RunSummary,
    pub metrics: BTreeMap<String, MetricSummary>,
    pub difficulty_breakdown: BTreeMap<String, DifficultyBreakdown>,
}

#[derive(Default)]
struct Accumulator {
    sum: f64,
    correct: usize,
    perfect: usize,
    total: usize,
    reference_failures: usize,
}

impl Accumulator {
    fn average(&self) -> f64 {
        ratio(self.sum, self.total)
    }
}

fn ratio(numerator: f64, denominator: usize) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        numerator / denominator as f64
    }
}

/// Aggregate per-example records. Every name in `metric_names` gets an
/// entry, even when nothing was evaluated.
pub fn aggregate(outcome: &EvaluationOutcome, metric_names: &[&str]) -> Aggregate {
    let total = outcome.total();
    let stats = &outcome.stats;
    let total_prediction_ms = stats.total_time.as_secs_f64() * 1000.0;

    let summary = RunSummary {
        total_questions: total,
        agent_success_count: stats.success_count,
        agent_failure_count: stats.failure_count,
        agent_success_rate: ratio(stats.success_count as f64, total),
        agent_failure_rate: ratio(stats.failure_count as f64, total),
        total_prediction_ms,
        avg_prediction_ms: ratio(total_prediction_ms, total),
    };

    let mut overall: BTreeMap<String, Accumulator> = metric_names
        .iter()
        .map(|name| (name.to_string(), Accumulator::default()))
        .collect();
    let mut per_difficulty: BTreeMap<String, (usize, usize, BTreeMap<String, Accumulator>)> =
        BTreeMap::new();

    for record in &outcome.records {
        let bucket = per_difficulty
            .entry(record.difficulty.clone())
            .or_insert_with(|| (0, 0, BTreeMap::new()));
        bucket.0 += 1;
        if !counts_toward_metrics(record) {
            continue;
        }
        bucket.1 += 1;

        for (name, metric) in &record.metrics {
            for acc in [
                overall.entry(name.clone()).or_default(),
                bucket.2.entry(name.clone()).or_default(),
            ] {
                acc.sum += metric.score;
                acc.total += 1;
                if metric.is_correct {
                    acc.correct += 1;
                }
                if metric.score >= 1.0 {
                    acc.perfect += 1;
                }
                if metric.error_origin == Some(ErrorOrigin::Reference) {
                    acc.reference_failures += 1;
                }
            }
        }
    }

    let metrics = overall
        .into_iter()
        .map(|(name, acc)| {
            let summary = MetricSummary {
                average_score: acc.average(),
                accuracy: ratio(acc.correct as f64, acc.total),
                perfect_matches: acc.perfect,
                total_evaluated: acc.total,
                reference_failures: acc.reference_failures,
            };
            (name, summary)
        })
        .collect();

    let difficulty_breakdown = per_difficulty
        .into_iter()
        .map(|(difficulty, (total, agent_success, metrics))| {
            let metrics = metrics
                .into_iter()
                .map(|(name, acc)| {
                    let entry = DifficultyMetric {
                        correct: acc.correct,
                        total: acc.total,
                        average_score: acc.average(),
                    };
                    (name, entry)
                })
                .collect();
            let breakdown = DifficultyBreakdown {
                total,
                agent_success,
                metrics,
            };
            (difficulty, breakdown)
        })
        .collect();

    Aggregate {
        summary,
        metrics,
        difficulty_breakdown,
    }
}

/// Only examples where the agent produced a statement are scored.
fn counts_toward_metrics(record: &ExampleRecord) -> bool {
    record.agent_success
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;

    use super::*;
    use crate::evaluate::{AgentStats, MetricRecord};

    fn metric(score: f64, is_correct: bool, origin: Option<ErrorOrigin>) -> MetricRecord {
        MetricRecord {
            score,
            is_correct,
            error: origin.map(|_| "failed".to_string()),
            error_origin: origin,
            details: json!({}),
        }
    }

    fn record(id: &str, difficulty: &str, predicted: &str, scores: Vec<(&str, MetricRecord)>) -> ExampleRecord {
        ExampleRecord {
            question_id: id.to_string(),
            difficulty: difficulty.to_string(),
            question: String::new(),
            reference_sql: "SELECT 1".to_string(),
            predicted_sql: predicted.to_string(),
            prediction_error: None,
            agent_success: !predicted.is_empty(),
            prediction_ms: 0.0,
            metrics: scores
                .into_iter()
                .map(|(name, metric)| (name.to_string(), metric))
                .collect(),
        }
    }

    #[test]
    fn aggregates_only_examples_with_predictions() {
        let outcome = EvaluationOutcome {
            records: vec![
                record("a", "easy", "SELECT 1", vec![("component_matching", metric(1.0, true, None))]),
                record("b", "easy", "SELECT 2", vec![("component_matching", metric(0.5, false, None))]),
                record("c", "hard", "SELECT 3", vec![("component_matching", metric(0.8, true, None))]),
                record("d", "hard", "", vec![("component_matching", metric(0.0, false, None))]),
            ],
            stats: AgentStats {
                success_count: 3,
                failure_count: 1,
                total_time: Duration::from_millis(400),
            },
            workers: 1,
        };

        let result = aggregate(&outcome, &["component_matching", "exact_match"]);

        assert_eq!(result.summary.total_questions, 4);
        assert_eq!(result.summary.agent_success_rate, 0.75);
        assert_eq!(result.summary.agent_failure_rate, 0.25);
        assert!((result.summary.avg_prediction_ms - 100.0).abs() < 1e-9);

        let component = &result.metrics["component_matching"];
        assert_eq!(component.total_evaluated, 3);
        assert_eq!(component.perfect_matches, 1);
        assert!((component.average_score - 2.3 / 3.0).abs() < 1e-12);
        assert!((component.accuracy - 2.0 / 3.0).abs() < 1e-12);

        let exact = &result.metrics["exact_match"];
        assert_eq!(exact.total_evaluated, 0);
        assert_eq!(exact.average_score, 0.0);

        let hard = &result.difficulty_breakdown["hard"];
        assert_eq!(hard.total, 2);
        assert_eq!(hard.agent_success, 1);
        assert_eq!(hard.metrics["component_matching"].correct, 1);
        assert_eq!(hard.metrics["component_matching"].total, 1);

        let easy = &result.difficulty_breakdown["easy"];
        assert_eq!(easy.metrics["component_matching"].average_score, 0.75);
    }

    #[test]
    fn counts_reference_failures_separately() {
        let outcome = EvaluationOutcome {
            records: vec![
                record(
                    "a",
                    "easy",
                    "SELECT 1",
                    vec![("execution_accuracy", metric(0.0, false, Some(ErrorOrigin::Reference)))],
                ),
                record(
                    "b",
                    "easy",
                    "SELECT 2",
                    vec![("execution_accuracy", metric(0.0, false, Some(ErrorOrigin::Prediction)))],
                ),
            ],
            stats: AgentStats {
                success_count: 2,
                ..AgentStats::default()
            },
            workers: 1,
        };

        let result = aggregate(&outcome, &["execution_accuracy"]);
        let execution = &result.metrics["execution_accuracy"];
        assert_eq!(execution.reference_failures, 1);
        assert_eq!(execution.total_evaluated, 2);
        assert_eq!(execution.accuracy, 0.0);
    }

    #[test]
    fn empty_outcome_has_zero_rates() {
        let result = aggregate(&EvaluationOutcome::default(), &["exact_match"]);
        assert_eq!(result.summary.agent_success_rate, 0.0);
        assert_eq!(result.metrics["exact_match"].total_evaluated, 0);
        assert!(result.difficulty_breakdown.is_empty());
    }
}
