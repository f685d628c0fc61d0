//! SQL text handling for sqlscore: a small lexer, the normalizer used by
//! exact matching and the clause extractor used by component matching.

pub mod clauses;
pub mod keywords;
pub mod normalize;
pub mod tokenizer;

pub use clauses::{extract_components, split_conditions, split_items, ClauseKind, ClauseSet};
pub use normalize::{normalize, normalize_detailed, regex_normalize, Normalized, Strategy};
pub use tokenizer::{tokenize, Token, TokenKind, TokenizeError};
