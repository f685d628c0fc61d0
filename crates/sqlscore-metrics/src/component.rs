use std::collections::BTreeSet;

use serde_json::{json, Map, Value as JsonValue};

use sqlscore_sql::{extract_components, split_conditions, split_items, tokenize, ClauseKind, ClauseSet, TokenKind};

use crate::canonical::{
    join_bounds, join_target, parse_table_ref, projection_items, ProjectionItem, Scope,
};
use crate::errors::MetricError;
use crate::metric::Metric;
use crate::model::{EvaluationContext, MetricResult};

/// Clause weights in basis points; they sum to 10 000.
pub const CLAUSE_WEIGHTS: [(ClauseKind, u32); 8] = [
    (ClauseKind::Projection, 2500),
    (ClauseKind::Source, 2000),
    (ClauseKind::Filter, 2000),
    (ClauseKind::Joins, 1500),
    (ClauseKind::Grouping, 1000),
    (ClauseKind::Ordering, 500),
    (ClauseKind::Having, 300),
    (ClauseKind::Limit, 200),
];

const WEIGHT_SCALE: f64 = 10_000.0;

/// Credit for a projection item whose expression matches but only one side
/// names it.
pub const ONE_SIDED_ALIAS_CREDIT: f64 = 0.7;

/// Weighted per-clause similarity.
#[derive(Debug, Clone, Copy)]
pub struct ComponentMatching {
    pub threshold: f64,
}

impl Default for ComponentMatching {
    fn default() -> Self {
        Self { threshold: 0.8 }
    }
}

/// One side of the comparison: extracted clauses plus their name scope.
struct Statement {
    clauses: ClauseSet,
    scope: Scope,
}

impl Statement {
    fn parse(sql: &str) -> Self {
        let clauses = extract_components(sql);
        let scope = Scope::for_statement(&clauses);
        Self { clauses, scope }
    }

    fn projection(&self) -> Vec<ProjectionItem> {
        projection_items(&self.clauses.projection, &self.scope)
    }

    fn tables(&self) -> BTreeSet<String> {
        split_items(&self.clauses.source)
            .iter()
            .filter_map(|item| parse_table_ref(item))
            .map(|table| table.name)
            .collect()
    }

    fn joins(&self) -> BTreeSet<String> {
        self.clauses
            .joins
            .iter()
            .map(|join| canonical_join(join, &self.scope))
            .collect()
    }

    fn conditions(&self, text: &str, substitute_aliases: bool) -> BTreeSet<String> {
        split_conditions(text)
            .iter()
            .map(|condition| self.canonical(strip_outer_parens(condition), substitute_aliases))
            .collect()
    }

    fn items(&self, text: &str) -> BTreeSet<String> {
        split_items(text)
            .iter()
            .map(|item| self.canonical(item, true))
            .collect()
    }

    fn ordering(&self) -> BTreeSet<String> {
        split_items(&self.clauses.ordering)
            .iter()
            .map(|item| {
                let canonical = self.canonical(item, true);
                match canonical.strip_suffix(" ASC") {
                    Some(stripped) => stripped.to_string(),
                    None => canonical,
                }
            })
            .collect()
    }

    fn canonical(&self, text: &str, substitute_aliases: bool) -> String {
        if substitute_aliases {
            self.scope.canonical_with_aliases(text)
        } else {
            self.scope.canonical(text)
        }
    }
}

impl Metric for ComponentMatching {
    fn name(&self) -> &'static str {
        "component_matching"
    }

    fn score(&self, context: &EvaluationContext) -> Result<MetricResult, MetricError> {
        if context.reference_sql.trim().is_empty() {
            return Err(MetricError::EmptyReference);
        }
        if context.predicted_sql.trim().is_empty() {
            return Err(MetricError::EmptyPrediction);
        }

        let reference = Statement::parse(&context.reference_sql);
        let predicted = Statement::parse(&context.predicted_sql);

        let mut weighted = 0.0;
        let mut components = Map::new();
        for (kind, weight) in CLAUSE_WEIGHTS {
            let score = clause_score(kind, &reference, &predicted);
            weighted += f64::from(weight) * score;
            components.insert(
                kind.as_str().to_string(),
                json!({
                    "score": score,
                    "weight": f64::from(weight) / WEIGHT_SCALE,
                    "reference": reference.clauses.text(kind),
                    "predicted": predicted.clauses.text(kind),
                }),
            );
        }
        let total = weighted / WEIGHT_SCALE;
        let is_correct = total >= self.threshold;

        let mut details = Map::new();
        details.insert("components".into(), JsonValue::Object(components));
        details.insert("threshold".into(), json!(self.threshold));
        details.insert(
            "extraction".into(),
            json!({
                "reference": reference.clauses.strategy,
                "predicted": predicted.clauses.strategy,
            }),
        );
        Ok(MetricResult::scored(self.name(), total, is_correct, details))
    }
}

fn clause_score(kind: ClauseKind, reference: &Statement, predicted: &Statement) -> f64 {
    let ref_present = reference.clauses.is_present(kind);
    let pred_present = predicted.clauses.is_present(kind);
    match (ref_present, pred_present) {
        (false, false) => return 1.0,
        (true, false) | (false, true) => return 0.0,
        (true, true) => {}
    }

    match kind {
        ClauseKind::Projection => projection_score(&reference.projection(), &predicted.projection()),
        ClauseKind::Source => jaccard(&reference.tables(), &predicted.tables()),
        ClauseKind::Joins => jaccard(&reference.joins(), &predicted.joins()),
        ClauseKind::Filter => jaccard(
            &reference.conditions(&reference.clauses.filter, false),
            &predicted.conditions(&predicted.clauses.filter, false),
        ),
        ClauseKind::Having => jaccard(
            &reference.conditions(&reference.clauses.having, true),
            &predicted.conditions(&predicted.clauses.having, true),
        ),
        ClauseKind::Grouping => jaccard(
            &reference.items(&reference.clauses.grouping),
            &predicted.items(&predicted.clauses.grouping),
        ),
        ClauseKind::Ordering => jaccard(&reference.ordering(), &predicted.ordering()),
        ClauseKind::Limit => limit_score(&reference.clauses.limit, &predicted.clauses.limit),
    }
}

/// Intersection over union; two empty sets are identical.
pub fn jaccard(left: &BTreeSet<String>, right: &BTreeSet<String>) -> f64 {
    let union = left.union(right).count();
    if union == 0 {
        return 1.0;
    }
    left.intersection(right).count() as f64 / union as f64
}

fn pair_score(reference: &ProjectionItem, predicted: &ProjectionItem) -> f64 {
    if reference.expression != predicted.expression {
        return 0.0;
    }
    match (&reference.alias, &predicted.alias) {
        (Some(_), None) | (None, Some(_)) => ONE_SIDED_ALIAS_CREDIT,
        _ => 1.0,
    }
}

/// Greedy best-match pairing when item counts agree, Jaccard otherwise.
fn projection_score(reference: &[ProjectionItem], predicted: &[ProjectionItem]) -> f64 {
    if reference.len() != predicted.len() {
        let left: BTreeSet<String> = reference.iter().map(ProjectionItem::token).collect();
        let right: BTreeSet<String> = predicted.iter().map(ProjectionItem::token).collect();
        return jaccard(&left, &right);
    }
    if reference.is_empty() {
        return 1.0;
    }

    let mut used = vec![false; predicted.len()];
    let mut total = 0.0;
    for item in reference {
        let best = predicted
            .iter()
            .enumerate()
            .filter(|(idx, _)| !used[*idx])
            .map(|(idx, candidate)| (idx, pair_score(item, candidate)))
            .fold(None, |best: Option<(usize, f64)>, (idx, score)| match best {
                Some((_, best_score)) if best_score >= score => best,
                _ => Some((idx, score)),
            });
        if let Some((idx, score)) = best {
            if score > 0.0 {
                used[idx] = true;
                total += score;
            }
        }
    }
    total / reference.len() as f64
}

/// Joins compare on type, target table and condition; `JOIN` and
/// `INNER JOIN` are the same, as are `LEFT JOIN` and `LEFT OUTER JOIN`.
fn canonical_join(join: &str, scope: &Scope) -> String {
    let Some((keyword_end, target_end)) = join_bounds(join) else {
        return scope.canonical(join);
    };
    let modifiers: Vec<String> = join[..keyword_end]
        .split_whitespace()
        .map(str::to_ascii_uppercase)
        .filter(|word| word != "JOIN" && word != "OUTER")
        .collect();
    let join_type = if modifiers.is_empty() {
        "INNER".to_string()
    } else {
        modifiers.join(" ")
    };

    let target = join_target(join)
        .and_then(parse_table_ref)
        .map(|table| table.name)
        .unwrap_or_default();
    let condition = scope.canonical(join[target_end..].trim());

    format!("{join_type} JOIN {target} {condition}").trim_end().to_string()
}

/// `(a = 1)` and `a = 1` are the same condition.
fn strip_outer_parens(condition: &str) -> &str {
    let trimmed = condition.trim();
    if !(trimmed.starts_with('(') && trimmed.ends_with(')')) {
        return trimmed;
    }
    let inner = &trimmed[1..trimmed.len() - 1];
    let Ok(tokens) = tokenize(inner) else {
        return trimmed;
    };
    let mut depth = 0_i32;
    for token in &tokens {
        match token.kind {
            TokenKind::LParen => depth += 1,
            TokenKind::RParen => {
                depth -= 1;
                if depth < 0 {
                    return trimmed;
                }
            }
            _ => {}
        }
    }
    // Only strip a single pair wrapping a lone condition.
    if split_conditions(inner).len() == 1 {
        inner.trim()
    } else {
        trimmed
    }
}

/// Compare the first number of each LIMIT clause; clauses without a number
/// (`LIMIT ALL`) compare as text.
fn limit_score(reference: &str, predicted: &str) -> f64 {
    let first_number = |text: &str| {
        tokenize(text).ok().and_then(|tokens| {
            tokens
                .into_iter()
                .find(|token| token.kind == TokenKind::Number)
                .map(|token| token.text)
        })
    };
    let matched = match (first_number(reference), first_number(predicted)) {
        (Some(left), Some(right)) => left == right,
        (None, None) => reference.eq_ignore_ascii_case(predicted),
        _ => false,
    };
    if matched { 1.0 } else { 0.0 }
}
