use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::Arc;

use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::{json, Map, Value as JsonValue};

use sqlscore_core::{ExecutionError, ExecutionHandle, Row, Value};

use crate::errors::MetricError;
use crate::metric::Metric;
use crate::model::{ErrorOrigin, EvaluationContext, MetricResult};

/// Knobs for result-set comparison.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionOptions {
    /// Decimal places kept when comparing non-integral numbers.
    pub float_precision: u32,
    /// Missing/extra rows reported on a mismatch.
    pub sample_rows: usize,
    /// Extra attempts for transient (connection) failures.
    pub retries: u32,
}

impl Default for ExecutionOptions {
    fn default() -> Self {
        Self {
            float_precision: 10,
            sample_rows: 5,
            retries: 0,
        }
    }
}

/// Result-set equivalence: both statements are run and their rows compared
/// as multisets. Scores are exactly 1.0 or 0.0.
#[derive(Debug, Clone, Default)]
pub struct ExecutionAccuracy {
    options: ExecutionOptions,
}

/// A column value reduced to the form used for equality.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(untagged)]
pub enum NormalizedValue {
    Null,
    Bool(bool),
    Int(i64),
    /// Non-integral number, rounded and without trailing zeros.
    Decimal(String),
    Text(String),
    Temporal(String),
    Array(Vec<NormalizedValue>),
}

pub type NormalizedRow = Vec<NormalizedValue>;

impl ExecutionAccuracy {
    pub fn new(options: ExecutionOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &ExecutionOptions {
        &self.options
    }

    fn run(&self, handle: &Arc<dyn ExecutionHandle>, sql: &str) -> Result<Vec<Row>, ExecutionError> {
        let mut attempt = 0;
        loop {
            match handle.execute(sql) {
                Err(err) if err.kind.is_transient() && attempt < self.options.retries => {
                    attempt += 1;
                    tracing::warn!(
                        event = "statement_retry",
                        backend = handle.backend(),
                        attempt,
                        error = %err,
                    );
                }
                outcome => return outcome,
            }
        }
    }

    pub fn normalize_value(&self, value: &Value) -> NormalizedValue {
        normalize_value(value, self.options.float_precision)
    }

    fn normalize_rows(&self, rows: &[Row]) -> Vec<NormalizedRow> {
        rows.iter()
            .map(|row| row.iter().map(|value| self.normalize_value(value)).collect())
            .collect()
    }
}

impl Metric for ExecutionAccuracy {
    fn name(&self) -> &'static str {
        "execution_accuracy"
    }

    fn score(&self, context: &EvaluationContext) -> Result<MetricResult, MetricError> {
        let handle = context
            .execution_handle
            .as_ref()
            .ok_or(MetricError::MissingHandle("execution_accuracy"))?;
        if context.reference_sql.trim().is_empty() {
            return Err(MetricError::EmptyReference);
        }
        if context.predicted_sql.trim().is_empty() {
            return Err(MetricError::EmptyPrediction);
        }

        let reference = self.run(handle, &context.reference_sql);
        let predicted = self.run(handle, &context.predicted_sql);

        let (reference_rows, predicted_rows) = match (reference, predicted) {
            (Err(err), predicted) => {
                tracing::warn!(
                    event = "reference_query_failed",
                    question_id = %context.question_id,
                    error = %err,
                );
                let mut details = Map::new();
                details.insert("reference_error".into(), serde_json::to_value(&err)?);
                if let Err(predicted_err) = &predicted {
                    details.insert("predicted_error".into(), serde_json::to_value(predicted_err)?);
                }
                return Ok(MetricResult::failed(
                    self.name(),
                    ErrorOrigin::Reference,
                    MetricError::Reference(err).to_string(),
                    details,
                ));
            }
            (Ok(_), Err(err)) => {
                let mut details = Map::new();
                details.insert("predicted_error".into(), serde_json::to_value(&err)?);
                return Ok(MetricResult::failed(
                    self.name(),
                    ErrorOrigin::Prediction,
                    MetricError::Prediction(err).to_string(),
                    details,
                ));
            }
            (Ok(reference), Ok(predicted)) => (reference, predicted),
        };

        let comparison = compare_results(
            &self.normalize_rows(&reference_rows),
            &self.normalize_rows(&predicted_rows),
            self.options.sample_rows,
        );
        let score = if comparison.matches { 1.0 } else { 0.0 };
        Ok(MetricResult::scored(self.name(), score, comparison.matches, comparison.details))
    }
}

/// Canonical comparison form of one value.
///
/// Integral numbers of any type compare equal to the same integer; other
/// numbers are rounded to `precision` places. Text is trimmed.
pub fn normalize_value(value: &Value, precision: u32) -> NormalizedValue {
    match value {
        Value::Null => NormalizedValue::Null,
        Value::Bool(flag) => NormalizedValue::Bool(*flag),
        Value::Int(number) => NormalizedValue::Int(*number),
        Value::Float(number) => normalize_float(*number, precision),
        Value::Numeric(text) => match Decimal::from_str(text.trim()) {
            Ok(decimal) => normalize_decimal(decimal, precision),
            Err(_) => NormalizedValue::Text(text.trim().to_string()),
        },
        Value::Text(text) | Value::Other(text) => NormalizedValue::Text(text.trim().to_string()),
        Value::Uuid(text) => NormalizedValue::Text(text.trim().to_ascii_lowercase()),
        Value::Date(text) | Value::Time(text) | Value::Timestamp(text) | Value::TimestampTz(text) => {
            NormalizedValue::Temporal(text.trim().to_string())
        }
        Value::Interval { .. } => NormalizedValue::Temporal(value.to_string()),
        Value::Array(items) => NormalizedValue::Array(
            items
                .iter()
                .map(|item| normalize_value(item, precision))
                .collect(),
        ),
    }
}

fn normalize_float(number: f64, precision: u32) -> NormalizedValue {
    if !number.is_finite() {
        return NormalizedValue::Text(number.to_string());
    }
    if number.fract() == 0.0 && number.abs() < i64::MAX as f64 {
        return NormalizedValue::Int(number as i64);
    }
    let rendered = format!("{number:.prec$}", prec = precision as usize);
    let trimmed = trim_decimal(&rendered);
    match trimmed.parse::<i64>() {
        Ok(integer) => NormalizedValue::Int(integer),
        Err(_) => NormalizedValue::Decimal(trimmed),
    }
}

fn normalize_decimal(decimal: Decimal, precision: u32) -> NormalizedValue {
    let rounded = decimal.round_dp(precision).normalize();
    if rounded.fract().is_zero() {
        if let Ok(integer) = i64::try_from(rounded) {
            return NormalizedValue::Int(integer);
        }
    }
    NormalizedValue::Decimal(trim_decimal(&rounded.to_string()))
}

fn trim_decimal(text: &str) -> String {
    let trimmed = if text.contains('.') {
        text.trim_end_matches('0').trim_end_matches('.')
    } else {
        text
    };
    if trimmed == "-0" {
        "0".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Outcome of comparing two normalized result sets.
#[derive(Debug, Clone)]
pub struct Comparison {
    pub matches: bool,
    pub details: Map<String, JsonValue>,
}

fn multiset(rows: &[NormalizedRow]) -> BTreeMap<&NormalizedRow, usize> {
    let mut counts = BTreeMap::new();
    for row in rows {
        *counts.entry(row).or_insert(0) += 1;
    }
    counts
}

/// Rows of `left` not matched in `right`, with multiplicity, first `limit`.
fn difference_sample(
    left: &BTreeMap<&NormalizedRow, usize>,
    right: &BTreeMap<&NormalizedRow, usize>,
    limit: usize,
) -> (usize, Vec<JsonValue>) {
    let mut total = 0;
    let mut sample = Vec::new();
    for (row, count) in left {
        let surplus = count.saturating_sub(right.get(row).copied().unwrap_or(0));
        total += surplus;
        for _ in 0..surplus {
            if sample.len() < limit {
                sample.push(json!(row));
            }
        }
    }
    (total, sample)
}

/// Order-insensitive, duplicate-sensitive row comparison.
pub fn compare_results(
    reference: &[NormalizedRow],
    predicted: &[NormalizedRow],
    sample_rows: usize,
) -> Comparison {
    let mut details = Map::new();
    details.insert("reference_rows".into(), json!(reference.len()));
    details.insert("predicted_rows".into(), json!(predicted.len()));

    if reference.len() != predicted.len() {
        details.insert("reason".into(), json!("row_count_mismatch"));
        return Comparison {
            matches: false,
            details,
        };
    }
    if reference.is_empty() {
        details.insert("reason".into(), json!("both_empty"));
        return Comparison {
            matches: true,
            details,
        };
    }

    let left = multiset(reference);
    let right = multiset(predicted);
    if left == right {
        return Comparison {
            matches: true,
            details,
        };
    }

    let (missing, missing_sample) = difference_sample(&left, &right, sample_rows);
    let (extra, extra_sample) = difference_sample(&right, &left, sample_rows);
    let intersection = reference.len() - missing;
    let union = intersection + missing + extra;
    let overlap = if union == 0 {
        0.0
    } else {
        intersection as f64 / union as f64
    };

    details.insert("reason".into(), json!("row_content_mismatch"));
    details.insert("missing_rows".into(), json!(missing));
    details.insert("extra_rows".into(), json!(extra));
    details.insert("missing_sample".into(), JsonValue::Array(missing_sample));
    details.insert("extra_sample".into(), JsonValue::Array(extra_sample));
    details.insert("overlap".into(), json!(overlap));
    Comparison {
        matches: false,
        details,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rows(values: &[&[Value]]) -> Vec<NormalizedRow> {
        values
            .iter()
            .map(|row| row.iter().map(|value| normalize_value(value, 10)).collect())
            .collect()
    }

    #[test]
    fn numbers_of_different_types_compare_equal() {
        assert_eq!(normalize_value(&Value::Float(3.0), 10), NormalizedValue::Int(3));
        assert_eq!(
            normalize_value(&Value::Numeric("3.000".into()), 10),
            NormalizedValue::Int(3)
        );
        assert_eq!(
            normalize_value(&Value::Float(0.1), 10),
            normalize_value(&Value::Numeric("0.10".into()), 10)
        );
        assert_eq!(
            normalize_value(&Value::Float(1.0 / 3.0), 4),
            NormalizedValue::Decimal("0.3333".into())
        );
    }

    #[test]
    fn arrays_and_intervals_compare_by_content() {
        let one_day = Value::Interval {
            months: 0,
            days: -1,
            microseconds: 0,
        };
        let two_days = Value::Interval {
            months: 0,
            days: -2,
            microseconds: 0,
        };
        assert_ne!(normalize_value(&one_day, 10), normalize_value(&two_days, 10));

        let floats = Value::Array(vec![Value::Float(1.5), Value::Float(2.0)]);
        let numerics = Value::Array(vec![Value::Numeric("1.50".into()), Value::Int(2)]);
        assert_eq!(normalize_value(&floats, 10), normalize_value(&numerics, 10));
        assert_ne!(
            normalize_value(&Value::Array(vec![Value::Float(1.5)]), 10),
            normalize_value(&Value::Array(vec![Value::Float(2.5)]), 10)
        );
    }

    #[test]
    fn text_is_trimmed() {
        assert_eq!(
            normalize_value(&Value::Text("  SP ".into()), 10),
            NormalizedValue::Text("SP".into())
        );
    }

    #[test]
    fn duplicates_matter_but_order_does_not() {
        let reference = rows(&[&[Value::Int(1)], &[Value::Int(1)], &[Value::Int(2)]]);
        let reordered = rows(&[&[Value::Int(2)], &[Value::Int(1)], &[Value::Int(1)]]);
        let deduplicated = rows(&[&[Value::Int(1)], &[Value::Int(2)], &[Value::Int(2)]]);

        assert!(compare_results(&reference, &reordered, 5).matches);

        let comparison = compare_results(&reference, &deduplicated, 5);
        assert!(!comparison.matches);
        assert_eq!(comparison.details["missing_rows"], json!(1));
        assert_eq!(comparison.details["extra_rows"], json!(1));
        assert_eq!(comparison.details["overlap"], json!(0.5));
        assert_eq!(comparison.details["missing_sample"], json!([[1]]));
    }

    #[test]
    fn row_count_mismatch_short_circuits() {
        let comparison = compare_results(&rows(&[&[Value::Int(1)]]), &[], 5);
        assert!(!comparison.matches);
        assert_eq!(comparison.details["reason"], json!("row_count_mismatch"));
    }

    #[test]
    fn empty_results_match() {
        assert!(compare_results(&[], &[], 5).matches);
    }
}
