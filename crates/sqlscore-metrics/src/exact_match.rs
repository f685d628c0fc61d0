use std::sync::OnceLock;

use regex::Regex;
use serde_json::{json, Map, Value as JsonValue};

use sqlscore_sql::normalize_detailed;

use crate::errors::MetricError;
use crate::metric::Metric;
use crate::model::{EvaluationContext, MetricResult};

const CONTEXT_CHARS: usize = 10;
const MAX_WORD_DIFFS: usize = 5;

const CLAUSE_KEYWORDS: [(&str, &str); 7] = [
    ("SELECT", r"(?i)\bSELECT\b"),
    ("FROM", r"(?i)\bFROM\b"),
    ("WHERE", r"(?i)\bWHERE\b"),
    ("GROUP BY", r"(?i)\bGROUP\s+BY\b"),
    ("ORDER BY", r"(?i)\bORDER\s+BY\b"),
    ("HAVING", r"(?i)\bHAVING\b"),
    ("LIMIT", r"(?i)\bLIMIT\b"),
];

const AGGREGATES: [&str; 5] = ["COUNT", "SUM", "AVG", "MIN", "MAX"];

/// Whole-statement equality after normalization.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExactMatch;

impl Metric for ExactMatch {
    fn name(&self) -> &'static str {
        "exact_match"
    }

    fn score(&self, context: &EvaluationContext) -> Result<MetricResult, MetricError> {
        if context.reference_sql.trim().is_empty() {
            return Err(MetricError::EmptyReference);
        }
        if context.predicted_sql.trim().is_empty() {
            return Err(MetricError::EmptyPrediction);
        }

        let reference = normalize_detailed(&context.reference_sql);
        let predicted = normalize_detailed(&context.predicted_sql);
        let matches = !reference.text.is_empty() && reference.text == predicted.text;

        let mut details = Map::new();
        details.insert("normalized_reference".into(), json!(reference.text));
        details.insert("normalized_predicted".into(), json!(predicted.text));
        details.insert(
            "normalization".into(),
            json!({ "reference": reference.strategy, "predicted": predicted.strategy }),
        );
        if !matches {
            details.insert(
                "differences".into(),
                JsonValue::Object(describe_differences(&reference.text, &predicted.text)),
            );
        }

        let score = if matches { 1.0 } else { 0.0 };
        Ok(MetricResult::scored(self.name(), score, matches, details))
    }
}

/// Diagnostics for two normalized statements that differ. None of this
/// affects the score.
fn describe_differences(reference: &str, predicted: &str) -> Map<String, JsonValue> {
    let mut diff = Map::new();
    let ref_chars: Vec<char> = reference.chars().collect();
    let pred_chars: Vec<char> = predicted.chars().collect();

    diff.insert(
        "length_difference".into(),
        json!(pred_chars.len() as i64 - ref_chars.len() as i64),
    );

    let offset = ref_chars
        .iter()
        .zip(&pred_chars)
        .position(|(left, right)| left != right)
        .unwrap_or_else(|| ref_chars.len().min(pred_chars.len()));
    diff.insert(
        "first_difference".into(),
        json!({
            "offset": offset,
            "reference_context": context_window(&ref_chars, offset),
            "predicted_context": context_window(&pred_chars, offset),
        }),
    );

    let word_diffs = differing_words(reference, predicted);
    if !word_diffs.is_empty() {
        diff.insert("differing_words".into(), JsonValue::Array(word_diffs));
    }

    let (missing, extra) = clause_presence(reference, predicted);
    if !missing.is_empty() {
        diff.insert("missing_clauses".into(), json!(missing));
    }
    if !extra.is_empty() {
        diff.insert("extra_clauses".into(), json!(extra));
    }

    let aggregate_mismatches = aggregate_mismatches(reference, predicted);
    if !aggregate_mismatches.is_empty() {
        diff.insert("aggregate_mismatches".into(), JsonValue::Array(aggregate_mismatches));
    }

    let ref_join = has_join(reference);
    let pred_join = has_join(predicted);
    if ref_join != pred_join {
        let label = if ref_join { "missing" } else { "unexpected" };
        diff.insert("join".into(), json!(label));
    }

    diff
}

fn context_window(chars: &[char], offset: usize) -> String {
    let start = offset.saturating_sub(CONTEXT_CHARS);
    let end = (offset + CONTEXT_CHARS).min(chars.len());
    if start >= end {
        return String::new();
    }
    chars[start..end].iter().collect()
}

/// Position-aligned word differences, first few only.
fn differing_words(reference: &str, predicted: &str) -> Vec<JsonValue> {
    let ref_words: Vec<&str> = reference.split_whitespace().collect();
    let pred_words: Vec<&str> = predicted.split_whitespace().collect();
    let longest = ref_words.len().max(pred_words.len());

    (0..longest)
        .filter_map(|idx| {
            let left = ref_words.get(idx).copied();
            let right = pred_words.get(idx).copied();
            (left != right).then(|| {
                json!({
                    "position": idx,
                    "reference": left,
                    "predicted": right,
                })
            })
        })
        .take(MAX_WORD_DIFFS)
        .collect()
}

fn clause_regexes() -> &'static [(&'static str, Option<Regex>)] {
    static RES: OnceLock<Vec<(&'static str, Option<Regex>)>> = OnceLock::new();
    RES.get_or_init(|| {
        CLAUSE_KEYWORDS
            .iter()
            .map(|(label, pattern)| (*label, Regex::new(pattern).ok()))
            .collect()
    })
}

fn clause_presence(reference: &str, predicted: &str) -> (Vec<&'static str>, Vec<&'static str>) {
    let mut missing = Vec::new();
    let mut extra = Vec::new();
    for (label, re) in clause_regexes() {
        let Some(re) = re else { continue };
        match (re.is_match(reference), re.is_match(predicted)) {
            (true, false) => missing.push(*label),
            (false, true) => extra.push(*label),
            _ => {}
        }
    }
    (missing, extra)
}

fn aggregate_re() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\b(COUNT|SUM|AVG|MIN|MAX)\s*\(").ok())
        .as_ref()
}

fn aggregate_counts(sql: &str) -> [usize; AGGREGATES.len()] {
    let mut counts = [0; AGGREGATES.len()];
    let Some(re) = aggregate_re() else {
        return counts;
    };
    for caps in re.captures_iter(sql) {
        let name = caps[1].to_ascii_uppercase();
        if let Some(idx) = AGGREGATES.iter().position(|aggregate| *aggregate == name) {
            counts[idx] += 1;
        }
    }
    counts
}

fn aggregate_mismatches(reference: &str, predicted: &str) -> Vec<JsonValue> {
    let ref_counts = aggregate_counts(reference);
    let pred_counts = aggregate_counts(predicted);
    AGGREGATES
        .iter()
        .zip(ref_counts.iter().zip(pred_counts.iter()))
        .filter(|(_, (left, right))| left != right)
        .map(|(name, (left, right))| {
            json!({ "function": name, "reference": left, "predicted": right })
        })
        .collect()
}

fn has_join(sql: &str) -> bool {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\bJOIN\b").ok())
        .as_ref()
        .is_some_and(|re| re.is_match(sql))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn evaluate(reference: &str, predicted: &str) -> MetricResult {
        ExactMatch.evaluate(&EvaluationContext::new("q", reference, predicted))
    }

    #[test]
    fn ignores_case_whitespace_and_terminator() {
        let result = evaluate("SELECT COUNT(*) FROM mortes;", "select   count(*)   from mortes");
        assert_eq!(result.score, 1.0);
        assert!(result.is_correct);
        assert!(result.details.get("differences").is_none());
    }

    #[test]
    fn identifier_case_still_matters() {
        let result = evaluate("SELECT nome FROM Pessoas", "SELECT nome FROM pessoas");
        assert_eq!(result.score, 0.0);
        let first = &result.details["differences"]["first_difference"];
        assert_eq!(first["offset"], json!(17));
    }

    #[test]
    fn reports_clause_aggregate_and_join_differences() {
        let result = evaluate(
            "SELECT uf, COUNT(*) FROM mortes m JOIN municipios mu ON mu.id = m.mun GROUP BY uf",
            "SELECT uf, SUM(total) FROM mortes ORDER BY uf",
        );
        let diff = &result.details["differences"];
        assert_eq!(diff["missing_clauses"], json!(["GROUP BY"]));
        assert_eq!(diff["extra_clauses"], json!(["ORDER BY"]));
        assert_eq!(diff["join"], json!("missing"));
        let aggregates = diff["aggregate_mismatches"].as_array().unwrap();
        assert_eq!(aggregates.len(), 2);
        assert_eq!(aggregates[0]["function"], json!("COUNT"));
    }

    #[test]
    fn prefix_mismatch_points_at_end_of_shorter_statement() {
        let result = evaluate("SELECT a FROM t", "SELECT a FROM t WHERE b = 1");
        let diff = &result.details["differences"];
        assert_eq!(diff["first_difference"]["offset"], json!(15));
        assert_eq!(diff["length_difference"], json!(12));
        assert_eq!(diff["differing_words"][0]["reference"], JsonValue::Null);
    }

    #[test]
    fn empty_input_scores_zero_without_failing() {
        let result = evaluate("SELECT 1", "   ");
        assert_eq!(result.score, 0.0);
        assert!(!result.is_correct);
        assert_eq!(result.error_message.as_deref(), Some("predicted SQL is empty"));

        let result = evaluate("", "SELECT 1");
        assert!(result.is_reference_failure());
    }
}
