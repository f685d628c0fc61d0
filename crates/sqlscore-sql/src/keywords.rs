//! Word lists used for case folding and alias detection.

/// Reserved words. A bare trailing word from this list is never an alias.
const KEYWORDS: &[&str] = &[
    "ALL", "AND", "ANY", "ARRAY", "AS", "ASC", "BETWEEN", "BY", "CASE", "CAST", "COLLATE",
    "CROSS", "CURRENT_DATE", "CURRENT_TIME", "CURRENT_TIMESTAMP", "DESC", "DISTINCT", "ELSE",
    "END", "ESCAPE", "EXCEPT", "EXISTS", "FALSE", "FETCH", "FILTER", "FIRST", "FOLLOWING",
    "FOR", "FROM", "FULL", "GROUP", "HAVING", "ILIKE", "IN", "INNER", "INTERSECT", "INTERVAL",
    "INTO", "IS", "JOIN", "LAST", "LATERAL", "LEFT", "LIKE", "LIMIT", "NATURAL", "NEXT", "NOT",
    "NULL", "NULLS", "OFFSET", "ON", "ONLY", "OR", "ORDER", "OUTER", "OVER", "PARTITION",
    "PRECEDING", "RANGE", "RECURSIVE", "RIGHT", "ROW", "ROWS", "SELECT", "SIMILAR", "SOME",
    "THEN", "TIES", "TO", "TRUE", "UNBOUNDED", "UNION", "USING", "VALUES", "WHEN", "WHERE",
    "WINDOW", "WITH", "WITHIN",
];

/// Built-in function names folded like keywords so `count(*)` equals `COUNT(*)`.
const FUNCTIONS: &[&str] = &[
    "ABS", "AGE", "ARRAY_AGG", "AVG", "BOOL_AND", "BOOL_OR", "CEIL", "CEILING", "COALESCE",
    "CONCAT", "COUNT", "DATE_PART", "DATE_TRUNC", "DENSE_RANK", "EXTRACT", "FLOOR", "GREATEST",
    "LAG", "LEAD", "LEAST", "LENGTH", "LOWER", "MAX", "MEDIAN", "MIN", "MODE", "NOW", "NTILE",
    "NULLIF", "PERCENTILE_CONT", "PERCENTILE_DISC", "POSITION", "RANK", "REPLACE", "ROUND",
    "ROW_NUMBER", "STDDEV", "STRING_AGG", "SUBSTR", "SUBSTRING", "SUM", "TO_CHAR", "TO_DATE",
    "TO_TIMESTAMP", "TRIM", "TRUNC", "UPPER", "VARIANCE",
];

/// Date parts and type names that only appear inside expressions.
const EXPRESSION_WORDS: &[&str] = &[
    "BIGINT", "BOOLEAN", "CHAR", "DATE", "DAY", "DECIMAL", "DOUBLE", "DOW", "DOY", "EPOCH",
    "FLOAT", "HOUR", "INT", "INTEGER", "MINUTE", "MONTH", "NUMERIC", "PRECISION", "QUARTER",
    "REAL", "SECOND", "SMALLINT", "TEXT", "TIME", "TIMESTAMP", "VARCHAR", "WEEK", "YEAR",
];

fn contains(list: &[&str], word: &str) -> bool {
    list.iter().any(|item| item.eq_ignore_ascii_case(word))
}

pub fn is_keyword(word: &str) -> bool {
    contains(KEYWORDS, word)
}

pub fn is_function(word: &str) -> bool {
    contains(FUNCTIONS, word)
}

/// Words whose case the normalizer folds to upper case.
pub fn is_foldable(word: &str) -> bool {
    is_keyword(word) || is_function(word) || contains(EXPRESSION_WORDS, word)
}

/// Every foldable word, for the regex fallback.
pub(crate) fn all_foldable() -> impl Iterator<Item = &'static str> {
    KEYWORDS
        .iter()
        .chain(FUNCTIONS)
        .chain(EXPRESSION_WORDS)
        .copied()
}
