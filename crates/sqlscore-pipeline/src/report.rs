use sqlscore_metrics::ErrorOrigin;

use crate::aggregate::Aggregate;
use crate::evaluate::EvaluationOutcome;

/// Render a deterministic markdown summary of one run.
pub fn render_report(aggregate: &Aggregate, outcome: &EvaluationOutcome, max_examples: usize) -> String {
    let mut lines = Vec::new();
    let summary = &aggregate.summary;

    lines.push("# Text-to-SQL Evaluation Report".to_string());
    lines.push(String::new());
    lines.push("## Run summary".to_string());
    lines.push(format!("- questions: {}", summary.total_questions));
    lines.push(format!(
        "- agent_success: {}/{} ({})",
        summary.agent_success_count,
        summary.total_questions,
        percent(summary.agent_success_rate)
    ));
    lines.push(format!(
        "- prediction_time: {:.1} ms total, {:.1} ms avg",
        summary.total_prediction_ms, summary.avg_prediction_ms
    ));
    lines.push(format!("- workers: {}", outcome.workers));
    lines.push(String::new());

    lines.push("## Metrics".to_string());
    lines.push("| metric | avg_score | accuracy | perfect | evaluated | reference_failures |".to_string());
    lines.push("| --- | --- | --- | --- | --- | --- |".to_string());
    for (name, stats) in &aggregate.metrics {
        lines.push(format!(
            "| {} | {:.3} | {} | {}/{} | {} | {} |",
            name,
            stats.average_score,
            percent(stats.accuracy),
            stats.perfect_matches,
            stats.total_evaluated,
            stats.total_evaluated,
            stats.reference_failures
        ));
    }
    lines.push(String::new());

    lines.push("## Difficulty breakdown".to_string());
    lines.push("| difficulty | questions | agent_success | metric | avg_score | correct |".to_string());
    lines.push("| --- | --- | --- | --- | --- | --- |".to_string());
    for (difficulty, breakdown) in &aggregate.difficulty_breakdown {
        if breakdown.metrics.is_empty() {
            lines.push(format!(
                "| {} | {} | {} | - | - | - |",
                difficulty, breakdown.total, breakdown.agent_success
            ));
            continue;
        }
        for (name, metric) in &breakdown.metrics {
            lines.push(format!(
                "| {} | {} | {} | {} | {:.3} | {}/{} |",
                difficulty,
                breakdown.total,
                breakdown.agent_success,
                name,
                metric.average_score,
                metric.correct,
                metric.total
            ));
        }
    }
    lines.push(String::new());

    let broken_references: Vec<_> = outcome
        .records
        .iter()
        .filter_map(|record| {
            record
                .metrics
                .values()
                .find(|metric| metric.error_origin == Some(ErrorOrigin::Reference))
                .map(|metric| (record, metric))
        })
        .collect();
    if !broken_references.is_empty() {
        lines.push("## Broken reference queries".to_string());
        for (record, metric) in broken_references.iter().take(max_examples) {
            lines.push(format!(
                "- {}: {}",
                record.question_id,
                metric.error.as_deref().unwrap_or("unknown error")
            ));
        }
        lines.push(String::new());
    }

    let failed_predictions: Vec<_> = outcome
        .records
        .iter()
        .filter(|record| !record.agent_success)
        .collect();
    if !failed_predictions.is_empty() {
        lines.push("## Missing predictions".to_string());
        for record in failed_predictions.iter().take(max_examples) {
            let reason = record.prediction_error.as_deref().unwrap_or("empty statement");
            lines.push(format!("- {}: {}", record.question_id, reason));
        }
        if failed_predictions.len() > max_examples {
            lines.push(format!(
                "- ... {} more",
                failed_predictions.len() - max_examples
            ));
        }
        lines.push(String::new());
    }

    lines.join("\n")
}

fn percent(value: f64) -> String {
    format!("{:.1}%", value * 100.0)
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::aggregate::{DifficultyBreakdown, MetricSummary, RunSummary};

    #[test]
    fn renders_metric_table_and_missing_predictions() {
        let aggregate = Aggregate {
            summary: RunSummary {
                total_questions: 2,
                agent_success_count: 1,
                agent_failure_count: 1,
                agent_success_rate: 0.5,
                agent_failure_rate: 0.5,
                total_prediction_ms: 10.0,
                avg_prediction_ms: 5.0,
            },
            metrics: BTreeMap::from([(
                "exact_match".to_string(),
                MetricSummary {
                    average_score: 1.0,
                    accuracy: 1.0,
                    perfect_matches: 1,
                    total_evaluated: 1,
                    reference_failures: 0,
                },
            )]),
            difficulty_breakdown: BTreeMap::from([(
                "easy".to_string(),
                DifficultyBreakdown {
                    total: 2,
                    agent_success: 1,
                    metrics: BTreeMap::new(),
                },
            )]),
        };
        let outcome = EvaluationOutcome {
            records: vec![crate::evaluate::ExampleRecord {
                question_id: "q9".to_string(),
                difficulty: "easy".to_string(),
                question: String::new(),
                reference_sql: "SELECT 1".to_string(),
                predicted_sql: String::new(),
                prediction_error: Some("no prediction recorded".to_string()),
                agent_success: false,
                prediction_ms: 0.0,
                metrics: BTreeMap::new(),
            }],
            ..EvaluationOutcome::default()
        };

        let report = render_report(&aggregate, &outcome, 5);
        assert!(report.starts_with("# Text-to-SQL Evaluation Report"));
        assert!(report.contains("- agent_success: 1/2 (50.0%)"));
        assert!(report.contains("| exact_match | 1.000 | 100.0% | 1/1 | 1 | 0 |"));
        assert!(report.contains("| easy | 2 | 1 | - | - | - |"));
        assert!(report.contains("- q9: no prediction recorded"));
        assert!(!report.contains("## Broken reference queries"));
    }
}
