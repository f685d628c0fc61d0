use thiserror::Error;

use crate::keywords;

/// Lexical category of a SQL token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    /// Unquoted identifier or keyword.
    Word,
    /// `"double quoted"` identifier, quotes included.
    QuotedIdent,
    /// `'single quoted'` string literal, quotes included.
    StringLit,
    Number,
    LParen,
    RParen,
    Comma,
    /// Operators and any other punctuation.
    Symbol,
}

/// One token plus whether whitespace or a comment preceded it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub text: String,
    pub spaced: bool,
}

impl Token {
    /// True for an unquoted word equal (ignoring case) to `keyword`.
    pub fn is_word(&self, keyword: &str) -> bool {
        self.kind == TokenKind::Word && self.text.eq_ignore_ascii_case(keyword)
    }

    pub fn is_keyword(&self) -> bool {
        self.kind == TokenKind::Word && keywords::is_keyword(&self.text)
    }

    pub fn upper(&self) -> String {
        self.text.to_ascii_uppercase()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TokenizeError {
    #[error("unterminated string literal starting at byte {0}")]
    UnterminatedString(usize),
    #[error("unterminated quoted identifier starting at byte {0}")]
    UnterminatedIdentifier(usize),
    #[error("unterminated block comment starting at byte {0}")]
    UnterminatedComment(usize),
}

const MULTI_CHAR_OPERATORS: [&str; 8] = ["<>", "<=", ">=", "!=", "||", "::", "->>", "->"];

/// Split `sql` into tokens, dropping comments and whitespace.
///
/// Unterminated quotes and block comments are errors; callers fall back to
/// regex handling in that case.
pub fn tokenize(sql: &str) -> Result<Vec<Token>, TokenizeError> {
    let bytes = sql.as_bytes();
    let mut tokens = Vec::new();
    let mut pos = 0;
    let mut spaced = false;

    while pos < bytes.len() {
        let byte = bytes[pos];

        if byte.is_ascii_whitespace() {
            spaced = true;
            pos += 1;
            continue;
        }
        if sql[pos..].starts_with("--") {
            pos = sql[pos..].find('\n').map_or(bytes.len(), |idx| pos + idx + 1);
            spaced = true;
            continue;
        }
        if sql[pos..].starts_with("/*") {
            let end = sql[pos + 2..]
                .find("*/")
                .ok_or(TokenizeError::UnterminatedComment(pos))?;
            pos += 2 + end + 2;
            spaced = true;
            continue;
        }

        let start = pos;
        let kind = match byte {
            b'\'' => {
                pos = quoted_end(bytes, pos, b'\'')
                    .ok_or(TokenizeError::UnterminatedString(start))?;
                TokenKind::StringLit
            }
            b'"' => {
                pos = quoted_end(bytes, pos, b'"')
                    .ok_or(TokenizeError::UnterminatedIdentifier(start))?;
                TokenKind::QuotedIdent
            }
            b'(' => {
                pos += 1;
                TokenKind::LParen
            }
            b')' => {
                pos += 1;
                TokenKind::RParen
            }
            b',' => {
                pos += 1;
                TokenKind::Comma
            }
            b if b.is_ascii_digit()
                || (b == b'.' && bytes.get(pos + 1).is_some_and(u8::is_ascii_digit)) =>
            {
                pos = number_end(bytes, pos);
                TokenKind::Number
            }
            b if b.is_ascii_alphabetic() || b == b'_' || !b.is_ascii() => {
                pos = word_end(sql, pos);
                TokenKind::Word
            }
            _ => {
                let operator = MULTI_CHAR_OPERATORS
                    .iter()
                    .find(|op| sql[pos..].starts_with(**op));
                pos += operator.map_or(1, |op| op.len());
                TokenKind::Symbol
            }
        };

        tokens.push(Token {
            kind,
            text: sql[start..pos].to_string(),
            spaced,
        });
        spaced = false;
    }

    Ok(tokens)
}

/// Position just past the closing quote; doubled quotes are escapes.
fn quoted_end(bytes: &[u8], start: usize, quote: u8) -> Option<usize> {
    let mut pos = start + 1;
    while pos < bytes.len() {
        if bytes[pos] == quote {
            if bytes.get(pos + 1) == Some(&quote) {
                pos += 2;
                continue;
            }
            return Some(pos + 1);
        }
        pos += 1;
    }
    None
}

fn number_end(bytes: &[u8], start: usize) -> usize {
    let mut pos = start;
    let mut seen_dot = false;
    while pos < bytes.len() {
        match bytes[pos] {
            b'0'..=b'9' => pos += 1,
            b'.' if !seen_dot => {
                seen_dot = true;
                pos += 1;
            }
            b'e' | b'E' => {
                let mut next = pos + 1;
                if matches!(bytes.get(next), Some(b'+') | Some(b'-')) {
                    next += 1;
                }
                if bytes.get(next).is_some_and(u8::is_ascii_digit) {
                    pos = next;
                    seen_dot = true;
                } else {
                    break;
                }
            }
            _ => break,
        }
    }
    pos
}

/// End of the word starting at `start`; always consumes at least one char.
fn word_end(sql: &str, start: usize) -> usize {
    let mut chars = sql[start..].char_indices();
    let first_len = chars.next().map_or(1, |(_, ch)| ch.len_utf8());
    chars
        .find(|(_, ch)| !(ch.is_alphanumeric() || *ch == '_' || *ch == '$'))
        .map_or(sql.len(), |(idx, _)| start + idx)
        .max(start + first_len)
}

/// Render tokens back to text, one space wherever the source had whitespace
/// or a comment. Keywords are upper-cased when `fold_keywords` is set.
pub fn render(tokens: &[Token], fold_keywords: bool) -> String {
    let mut out = String::new();
    for token in tokens {
        if token.spaced && !out.is_empty() {
            out.push(' ');
        }
        if fold_keywords && token.kind == TokenKind::Word && keywords::is_foldable(&token.text) {
            out.push_str(&token.upper());
        } else {
            out.push_str(&token.text);
        }
    }
    out
}

/// Split a token slice on tokens matching `is_separator` at parenthesis
/// depth zero. Empty pieces are dropped.
pub fn split_top_level<'a, F>(tokens: &'a [Token], mut is_separator: F) -> Vec<&'a [Token]>
where
    F: FnMut(&Token) -> bool,
{
    let mut pieces = Vec::new();
    let mut depth = 0_usize;
    let mut start = 0;
    for (idx, token) in tokens.iter().enumerate() {
        match token.kind {
            TokenKind::LParen => depth += 1,
            TokenKind::RParen => depth = depth.saturating_sub(1),
            _ if depth == 0 && is_separator(token) => {
                if start < idx {
                    pieces.push(&tokens[start..idx]);
                }
                start = idx + 1;
            }
            _ => {}
        }
    }
    if start < tokens.len() {
        pieces.push(&tokens[start..]);
    }
    pieces
}
