use std::sync::OnceLock;

use regex::{Captures, Regex};
use serde::Serialize;

use crate::keywords;
use crate::tokenizer::{render, tokenize, Token, TokenKind, TokenizeError};

/// Which normalization path produced a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    Tokenized,
    Regex,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Normalized {
    pub text: String,
    pub strategy: Strategy,
}

/// Canonical form of `sql` for literal comparison.
///
/// Comments are removed, keywords and built-in function names upper-cased,
/// whitespace runs collapsed to one space and trailing `;` dropped.
/// Identifiers, quoted identifiers and string literals keep their case.
/// Never fails: input the tokenizer rejects goes through a regex pass.
pub fn normalize(sql: &str) -> String {
    normalize_detailed(sql).text
}

pub fn normalize_detailed(sql: &str) -> Normalized {
    match try_normalize(sql) {
        Ok(text) => Normalized {
            text,
            strategy: Strategy::Tokenized,
        },
        Err(err) => {
            tracing::debug!(error = %err, "tokenizer rejected statement, using regex normalization");
            Normalized {
                text: regex_normalize(sql),
                strategy: Strategy::Regex,
            }
        }
    }
}

/// Token-based normalization; fails only when the statement cannot be lexed.
pub fn try_normalize(sql: &str) -> Result<String, TokenizeError> {
    let mut tokens = tokenize(sql)?;
    strip_terminators(&mut tokens);
    Ok(render(&tokens, true))
}

pub(crate) fn strip_terminators(tokens: &mut Vec<Token>) {
    while tokens
        .last()
        .is_some_and(|token| token.kind == TokenKind::Symbol && token.text == ";")
    {
        tokens.pop();
    }
}

fn cached(cell: &'static OnceLock<Option<Regex>>, pattern: impl FnOnce() -> String) -> Option<&'static Regex> {
    cell.get_or_init(|| Regex::new(&pattern()).ok()).as_ref()
}

fn block_comment_re() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    cached(&RE, || r"(?s)/\*.*?\*/".to_string())
}

fn line_comment_re() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    cached(&RE, || r"--[^\n]*".to_string())
}

fn whitespace_re() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    cached(&RE, || r"\s+".to_string())
}

fn keyword_re() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    cached(&RE, || {
        let words: Vec<&str> = keywords::all_foldable().collect();
        format!(r"(?i)\b(?:{})\b", words.join("|"))
    })
}

fn replace_with(re: Option<&Regex>, text: String, replacement: &str) -> String {
    match re {
        Some(re) => re.replace_all(&text, replacement).into_owned(),
        None => text,
    }
}

/// Regex-only normalization for statements the tokenizer cannot lex.
pub fn regex_normalize(sql: &str) -> String {
    let text = replace_with(block_comment_re(), sql.to_string(), " ");
    let text = replace_with(line_comment_re(), text, " ");
    let text = replace_with(whitespace_re(), text, " ");
    let text = text
        .trim()
        .trim_end_matches(|ch: char| ch == ';' || ch.is_whitespace())
        .to_string();
    match keyword_re() {
        Some(re) => re
            .replace_all(&text, |caps: &Captures<'_>| caps[0].to_ascii_uppercase())
            .into_owned(),
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn folds_keywords_and_whitespace() {
        assert_eq!(
            normalize("select   count(*)   from mortes"),
            "SELECT COUNT(*) FROM mortes"
        );
        assert_eq!(
            normalize("SELECT COUNT(*) FROM mortes;"),
            normalize("select   count(*)   from mortes")
        );
    }

    #[test]
    fn preserves_identifier_and_literal_case() {
        assert_eq!(
            normalize("select \"Nome\", cidade from Pessoas where uf = 'Sp'"),
            "SELECT \"Nome\", cidade FROM Pessoas WHERE uf = 'Sp'"
        );
    }

    #[test]
    fn strips_comments_and_every_trailing_terminator() {
        assert_eq!(
            normalize("-- header\nselect a /* inline */ from t ; ;"),
            "SELECT a FROM t"
        );
    }

    #[test]
    fn is_idempotent() {
        for sql in [
            "select a,b from t where x>=1 and y<>'q;' ;",
            "SELECT  extract(year from d) AS y FROM t GROUP BY 1",
            "select 'open",
            "select a -- note\n from /* x */ t;;",
            "",
        ] {
            let once = normalize(sql);
            assert_eq!(normalize(&once), once, "not idempotent for {sql:?}");
        }
    }

    #[test]
    fn falls_back_to_regex_for_unterminated_literals() {
        let normalized = normalize_detailed("select  name from t where a = 'x ;");
        assert_eq!(normalized.strategy, Strategy::Regex);
        assert_eq!(normalized.text, "SELECT name FROM t WHERE a = 'x");
    }
}
