use std::sync::OnceLock;

use regex::Regex;
use serde::Serialize;

use crate::normalize::{regex_normalize, Strategy};
use crate::tokenizer::{render, split_top_level, tokenize, Token, TokenKind};

/// The clause kinds scored independently by component matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ClauseKind {
    Projection,
    Source,
    Filter,
    Joins,
    Grouping,
    Ordering,
    Having,
    Limit,
}

impl ClauseKind {
    pub const ALL: [ClauseKind; 8] = [
        ClauseKind::Projection,
        ClauseKind::Source,
        ClauseKind::Filter,
        ClauseKind::Joins,
        ClauseKind::Grouping,
        ClauseKind::Ordering,
        ClauseKind::Having,
        ClauseKind::Limit,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Projection => "projection",
            Self::Source => "source",
            Self::Filter => "filter",
            Self::Joins => "joins",
            Self::Grouping => "grouping",
            Self::Ordering => "ordering",
            Self::Having => "having",
            Self::Limit => "limit",
        }
    }
}

/// Clause texts of one statement. Missing clauses are empty.
///
/// Texts are taken from the statement with comments removed and whitespace
/// collapsed; the introducing keywords (`SELECT`, `GROUP BY`, ...) are not
/// included, except for joins, which keep their join keywords.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ClauseSet {
    pub projection: String,
    pub source: String,
    pub filter: String,
    pub joins: Vec<String>,
    pub grouping: String,
    pub ordering: String,
    pub having: String,
    pub limit: String,
    pub strategy: Option<Strategy>,
}

impl ClauseSet {
    /// Text of one clause kind; joins are joined with a single space.
    pub fn text(&self, kind: ClauseKind) -> String {
        match kind {
            ClauseKind::Projection => self.projection.clone(),
            ClauseKind::Source => self.source.clone(),
            ClauseKind::Filter => self.filter.clone(),
            ClauseKind::Joins => self.joins.join(" "),
            ClauseKind::Grouping => self.grouping.clone(),
            ClauseKind::Ordering => self.ordering.clone(),
            ClauseKind::Having => self.having.clone(),
            ClauseKind::Limit => self.limit.clone(),
        }
    }

    pub fn is_present(&self, kind: ClauseKind) -> bool {
        match kind {
            ClauseKind::Joins => !self.joins.is_empty(),
            other => !self.text(other).is_empty(),
        }
    }

    fn has_core_content(&self) -> bool {
        !(self.projection.is_empty() && self.source.is_empty() && self.filter.is_empty())
    }

    fn slot(&mut self, kind: ClauseKind) -> Option<&mut String> {
        match kind {
            ClauseKind::Projection => Some(&mut self.projection),
            ClauseKind::Source => Some(&mut self.source),
            ClauseKind::Filter => Some(&mut self.filter),
            ClauseKind::Grouping => Some(&mut self.grouping),
            ClauseKind::Ordering => Some(&mut self.ordering),
            ClauseKind::Having => Some(&mut self.having),
            ClauseKind::Limit => Some(&mut self.limit),
            ClauseKind::Joins => None,
        }
    }

    fn record(&mut self, kind: ClauseKind, text: String) {
        if text.is_empty() {
            return;
        }
        if kind == ClauseKind::Joins {
            self.joins.push(text);
        } else if let Some(slot) = self.slot(kind) {
            if slot.is_empty() {
                *slot = text;
            }
        }
    }
}

/// Split a statement into its top-level clauses.
///
/// Keywords nested in parentheses (subqueries, function calls, window
/// specs) never start a clause. When the structural pass finds no
/// projection, source or filter, keyword-anchored regex extraction is used.
/// Never fails.
pub fn extract_components(sql: &str) -> ClauseSet {
    if let Ok(tokens) = tokenize(sql) {
        let clauses = extract_structural(&tokens);
        if clauses.has_core_content() {
            return clauses;
        }
    }
    tracing::debug!("structural clause extraction found nothing, using regex extraction");
    extract_with_regex(sql)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Section {
    Clause(ClauseKind),
    /// Top-level text that is not scored (e.g. a `WINDOW` clause).
    Ignored,
}

const JOIN_MODIFIERS: [&str; 7] = ["INNER", "LEFT", "RIGHT", "FULL", "CROSS", "NATURAL", "OUTER"];

/// Length of the boundary starting at `idx` and the section it opens.
fn boundary_at(tokens: &[Token], idx: usize, current: Option<Section>) -> Option<(usize, Section, bool)> {
    let token = &tokens[idx];
    if token.kind != TokenKind::Word {
        return None;
    }
    let next_is = |word: &str| tokens.get(idx + 1).is_some_and(|next| next.is_word(word));
    let in_from = matches!(
        current,
        Some(Section::Clause(ClauseKind::Source)) | Some(Section::Clause(ClauseKind::Joins))
    );
    let clause = |kind| Some(Section::Clause(kind));

    // (tokens consumed by the keyword, section, keep keyword in clause text)
    let found = match token.upper().as_str() {
        "SELECT" if current.is_none() => (1, clause(ClauseKind::Projection), false),
        "FROM" => (1, clause(ClauseKind::Source), false),
        "WHERE" => (1, clause(ClauseKind::Filter), false),
        "GROUP" if next_is("BY") => (2, clause(ClauseKind::Grouping), false),
        "HAVING" => (1, clause(ClauseKind::Having), false),
        "ORDER" if next_is("BY") => (2, clause(ClauseKind::Ordering), false),
        "LIMIT" => (1, clause(ClauseKind::Limit), false),
        "OFFSET" | "FETCH" if current != Some(Section::Clause(ClauseKind::Limit)) => {
            (0, clause(ClauseKind::Limit), true)
        }
        "WINDOW" => (1, Some(Section::Ignored), false),
        word if in_from && JOIN_MODIFIERS.contains(&word) || word == "JOIN" => {
            // Modifiers and JOIN open one clause together.
            (join_keyword_len(tokens, idx)?, clause(ClauseKind::Joins), true)
        }
        _ => return None,
    };
    let (consumed, section, keep) = found;
    section.map(|section| (consumed, section, keep))
}

/// Number of tokens in `[modifiers...] JOIN` starting at `idx`, if the words
/// there form one.
fn join_keyword_len(tokens: &[Token], idx: usize) -> Option<usize> {
    let offset = tokens[idx..]
        .iter()
        .position(|token| !JOIN_MODIFIERS.iter().any(|modifier| token.is_word(modifier)))?;
    tokens[idx + offset].is_word("JOIN").then_some(offset + 1)
}

fn is_statement_end(token: &Token) -> bool {
    (token.kind == TokenKind::Symbol && token.text == ";")
        || ["UNION", "INTERSECT", "EXCEPT"]
            .iter()
            .any(|word| token.is_word(word))
}

fn extract_structural(tokens: &[Token]) -> ClauseSet {
    let mut clauses = ClauseSet {
        strategy: Some(Strategy::Tokenized),
        ..ClauseSet::default()
    };
    let mut depth = 0_usize;
    let mut current: Option<(Section, usize)> = None;
    let mut idx = 0;

    let close = |clauses: &mut ClauseSet, current: Option<(Section, usize)>, end: usize| {
        if let Some((Section::Clause(kind), start)) = current {
            clauses.record(kind, render(&tokens[start..end], false));
        }
    };

    while idx < tokens.len() {
        let token = &tokens[idx];
        match token.kind {
            TokenKind::LParen => depth += 1,
            TokenKind::RParen => depth = depth.saturating_sub(1),
            _ if depth == 0 => {
                // Only text after the first top-level SELECT belongs to clauses.
                if current.is_some() && is_statement_end(token) {
                    break;
                }
                if let Some((consumed, section, keep)) =
                    boundary_at(tokens, idx, current.map(|(section, _)| section))
                {
                    close(&mut clauses, current, idx);
                    let start = if keep { idx } else { idx + consumed };
                    current = Some((section, start));
                    idx += consumed.max(1);
                    continue;
                }
            }
            _ => {}
        }
        idx += 1;
    }
    close(&mut clauses, current, idx.min(tokens.len()));
    clauses
}

fn boundary_re() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?i)\b(SELECT|FROM|WHERE|GROUP\s+BY|HAVING|ORDER\s+BY|LIMIT|(?:(?:INNER|LEFT|RIGHT|FULL|CROSS|NATURAL)\s+)?(?:OUTER\s+)?JOIN)\b",
        )
        .ok()
    })
    .as_ref()
}

fn kind_for_keyword(keyword: &str) -> ClauseKind {
    let upper = keyword.to_ascii_uppercase();
    match upper.split_whitespace().next().unwrap_or_default() {
        "SELECT" => ClauseKind::Projection,
        "FROM" => ClauseKind::Source,
        "WHERE" => ClauseKind::Filter,
        "GROUP" => ClauseKind::Grouping,
        "HAVING" => ClauseKind::Having,
        "ORDER" => ClauseKind::Ordering,
        "LIMIT" => ClauseKind::Limit,
        _ => ClauseKind::Joins,
    }
}

/// Keyword-anchored extraction: each clause runs from its keyword to the
/// next clause keyword. Subqueries are not understood.
fn extract_with_regex(sql: &str) -> ClauseSet {
    let text = regex_normalize(sql);
    let mut clauses = ClauseSet {
        strategy: Some(Strategy::Regex),
        ..ClauseSet::default()
    };
    let Some(re) = boundary_re() else {
        return clauses;
    };

    let matches: Vec<_> = re.find_iter(&text).collect();
    for (position, found) in matches.iter().enumerate() {
        let end = matches
            .get(position + 1)
            .map_or(text.len(), |next| next.start());
        let kind = kind_for_keyword(found.as_str());
        let start = if kind == ClauseKind::Joins {
            found.start()
        } else {
            found.end()
        };
        clauses.record(kind, text[start..end].trim().to_string());
    }
    clauses
}

/// Top-level comma-separated items of a clause (projection, grouping, ...).
pub fn split_items(text: &str) -> Vec<String> {
    match tokenize(text) {
        Ok(tokens) => split_top_level(&tokens, |token| token.kind == TokenKind::Comma)
            .into_iter()
            .map(|piece| render(piece, false))
            .collect(),
        Err(_) => split_commas_by_scan(text),
    }
}

fn split_commas_by_scan(text: &str) -> Vec<String> {
    let mut items = Vec::new();
    let mut depth = 0_i32;
    let mut quote: Option<char> = None;
    let mut current = String::new();
    for ch in text.chars() {
        match (quote, ch) {
            (Some(open), ch) if ch == open => quote = None,
            (Some(_), _) => {}
            (None, '\'' | '"') => quote = Some(ch),
            (None, '(') => depth += 1,
            (None, ')') => depth -= 1,
            (None, ',') if depth == 0 => {
                items.push(std::mem::take(&mut current));
                continue;
            }
            _ => {}
        }
        current.push(ch);
    }
    items.push(current);
    items
        .into_iter()
        .map(|item| item.trim().to_string())
        .filter(|item| !item.is_empty())
        .collect()
}

fn and_or_re() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\s+(?:AND|OR)\s+").ok())
        .as_ref()
}

/// Conditions of a WHERE/HAVING clause split on top-level AND/OR.
/// The AND of a `BETWEEN x AND y` stays inside its condition.
pub fn split_conditions(text: &str) -> Vec<String> {
    match tokenize(text) {
        Ok(tokens) => {
            let mut in_between = false;
            split_top_level(&tokens, |token| {
                if token.is_word("BETWEEN") {
                    in_between = true;
                    false
                } else if token.is_word("AND") && in_between {
                    in_between = false;
                    false
                } else {
                    token.is_word("AND") || token.is_word("OR")
                }
            })
            .into_iter()
            .map(|piece| render(piece, false))
            .collect()
        }
        Err(_) => match and_or_re() {
            Some(re) => re
                .split(text)
                .map(|part| part.trim().to_string())
                .filter(|part| !part.is_empty())
                .collect(),
            None => vec![text.trim().to_string()],
        },
    }
}
