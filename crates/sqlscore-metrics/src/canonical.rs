//! Canonical clause fragments for component matching.
//!
//! Fragments are re-rendered from tokens with fixed spacing, upper-cased
//! keywords and table aliases resolved, so cosmetic differences between two
//! statements disappear before their clause items are compared.

use std::collections::HashMap;

use sqlscore_sql::keywords::{is_foldable, is_function, is_keyword};
use sqlscore_sql::{normalize, split_items, tokenize, ClauseSet, Token, TokenKind};

/// Placeholder that replaces every projection alias name.
pub const ALIAS_PLACEHOLDER: &str = "<alias>";

/// Name resolution context for one statement.
#[derive(Debug, Default, Clone)]
pub struct Scope {
    /// Lower-cased alias or table name -> table name.
    qualifiers: HashMap<String, String>,
    /// Only one table in FROM and no joins: qualifiers carry no information.
    single_table: bool,
    /// Lower-cased projection alias -> canonical expression.
    projection_aliases: HashMap<String, String>,
}

impl Scope {
    pub fn for_statement(clauses: &ClauseSet) -> Self {
        let mut scope = Scope::default();
        let mut table_count = 0;

        let sources = split_items(&clauses.source);
        let joined = clauses.joins.iter().filter_map(|join| join_target(join));
        for item in sources.iter().map(String::as_str).chain(joined) {
            let Some(table_ref) = parse_table_ref(item) else {
                continue;
            };
            table_count += 1;
            scope
                .qualifiers
                .insert(last_name_part(&table_ref.name).to_lowercase(), table_ref.name.clone());
            if let Some(alias) = table_ref.alias {
                scope.qualifiers.insert(alias.to_lowercase(), table_ref.name);
            }
        }
        scope.single_table = table_count == 1 && clauses.joins.is_empty();

        let items = projection_items(&clauses.projection, &scope);
        for item in items {
            if let Some(alias) = item.alias {
                scope
                    .projection_aliases
                    .insert(alias.to_lowercase(), item.expression);
            }
        }
        scope
    }

    /// Canonical text of a fragment with qualifiers resolved.
    pub fn canonical(&self, text: &str) -> String {
        self.render(text, false)
    }

    /// Like [`Scope::canonical`], also replacing references to projection
    /// aliases with the aliased expression.
    pub fn canonical_with_aliases(&self, text: &str) -> String {
        self.render(text, true)
    }

    fn render(&self, text: &str, substitute_aliases: bool) -> String {
        match tokenize(text) {
            Ok(tokens) => self.render_tokens(&tokens, substitute_aliases),
            Err(_) => normalize(text),
        }
    }

    fn render_tokens(&self, tokens: &[Token], substitute_aliases: bool) -> String {
        let mut pieces: Vec<Piece> = Vec::with_capacity(tokens.len());
        let mut idx = 0;
        while idx < tokens.len() {
            let token = &tokens[idx];
            let next = tokens.get(idx + 1);
            let prev = idx.checked_sub(1).map(|prev| &tokens[prev]);
            let followed_by_dot = next.is_some_and(|next| next.text == ".");
            let after_dot = prev.is_some_and(|prev| prev.text == ".");

            if token.kind == TokenKind::Word && followed_by_dot && !after_dot {
                if let Some(table) = self.qualifiers.get(&token.text.to_lowercase()) {
                    if self.single_table {
                        // Drop the qualifier and its dot.
                        idx += 2;
                        continue;
                    }
                    pieces.push(Piece::word(table.clone()));
                    idx += 1;
                    continue;
                }
            }

            if substitute_aliases
                && token.kind == TokenKind::Word
                && !followed_by_dot
                && !after_dot
                && next.is_none_or(|next| next.kind != TokenKind::LParen)
            {
                if let Some(expression) = self.projection_aliases.get(&token.text.to_lowercase()) {
                    pieces.push(Piece::word(expression.clone()));
                    idx += 1;
                    continue;
                }
            }

            pieces.push(Piece::from_token(token));
            idx += 1;
        }
        join_pieces(&pieces)
    }
}

struct Piece {
    kind: TokenKind,
    text: String,
}

impl Piece {
    fn word(text: String) -> Self {
        Self {
            kind: TokenKind::Word,
            text,
        }
    }

    fn from_token(token: &Token) -> Self {
        let text = if token.kind == TokenKind::Word && is_foldable(&token.text) {
            token.upper()
        } else {
            token.text.clone()
        };
        Self {
            kind: token.kind,
            text,
        }
    }
}

fn tight_after(piece: &Piece) -> bool {
    matches!(piece.text.as_str(), "." | "::") || piece.kind == TokenKind::LParen
}

fn tight_before(prev: &Piece, piece: &Piece) -> bool {
    match piece.kind {
        TokenKind::RParen | TokenKind::Comma => true,
        TokenKind::LParen => prev.kind == TokenKind::Word && !is_keyword(&prev.text),
        _ => matches!(piece.text.as_str(), "." | "::"),
    }
}

/// Join pieces with single spaces, except inside qualified names, casts,
/// parentheses and before commas.
fn join_pieces(pieces: &[Piece]) -> String {
    let mut out = String::new();
    for (idx, piece) in pieces.iter().enumerate() {
        if idx > 0 {
            let prev = &pieces[idx - 1];
            if !(tight_after(prev) || tight_before(prev, piece)) {
                out.push(' ');
            }
        }
        out.push_str(&piece.text);
    }
    out
}

/// A table reference from FROM or JOIN.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableRef {
    /// Table name (possibly schema-qualified) or canonical subquery text.
    pub name: String,
    pub alias: Option<String>,
}

fn last_name_part(name: &str) -> &str {
    name.rsplit('.').next().unwrap_or(name)
}

/// Parse `schema.table [AS] alias` or `(subquery) [AS] alias`.
pub fn parse_table_ref(text: &str) -> Option<TableRef> {
    let tokens = tokenize(text).ok()?;
    if tokens.is_empty() {
        return None;
    }
    let (body, alias) = split_trailing_alias(&tokens);
    let name = if body.first().is_some_and(|token| token.kind == TokenKind::LParen) {
        Scope::default().render_tokens(body, false)
    } else {
        let name = body.iter().map(|token| token.text.as_str()).collect::<String>();
        strip_default_schema(&name).to_string()
    };
    Some(TableRef { name, alias })
}

/// `public.mortes` names the same table as `mortes`.
fn strip_default_schema(name: &str) -> &str {
    ["public.", "\"public\"."]
        .iter()
        .find_map(|prefix| {
            name.get(..prefix.len())
                .filter(|head| head.eq_ignore_ascii_case(prefix))
                .map(|_| &name[prefix.len()..])
        })
        .filter(|rest| !rest.is_empty())
        .unwrap_or(name)
}

/// Byte ranges of a join: end of the `... JOIN` keywords and end of the
/// `table [alias]` target, i.e. where ON/USING begins.
pub fn join_bounds(join: &str) -> Option<(usize, usize)> {
    let upper = join.to_ascii_uppercase();
    let keyword_end = upper.find("JOIN")? + "JOIN".len();
    let rest = &upper[keyword_end..];
    let target_end = [" ON ", " USING ", " ON(", " USING("]
        .iter()
        .filter_map(|marker| rest.find(marker))
        .min()
        .map_or(join.len(), |offset| keyword_end + offset);
    Some((keyword_end, target_end))
}

/// The `table [alias]` part of a join, between the JOIN keyword and ON/USING.
pub fn join_target(join: &str) -> Option<&str> {
    let (start, end) = join_bounds(join)?;
    join.get(start..end).map(str::trim)
}

/// One projection item: canonical expression plus optional alias.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectionItem {
    pub expression: String,
    pub alias: Option<String>,
}

impl ProjectionItem {
    /// Comparison token: aliases are replaced by a fixed placeholder so only
    /// their presence counts.
    pub fn token(&self) -> String {
        match self.alias {
            Some(_) => format!("{} AS {ALIAS_PLACEHOLDER}", self.expression),
            None => self.expression.clone(),
        }
    }
}

/// Split a projection into items. A leading `DISTINCT` becomes an item of
/// its own so that it counts towards the projection score.
pub fn projection_items(projection: &str, scope: &Scope) -> Vec<ProjectionItem> {
    let mut text = projection.trim();
    let mut items = Vec::new();
    if let Some(rest) = strip_leading_word(text, "DISTINCT") {
        items.push(ProjectionItem {
            expression: "DISTINCT".to_string(),
            alias: None,
        });
        text = rest;
    } else if let Some(rest) = strip_leading_word(text, "ALL") {
        text = rest;
    }

    for item in split_items(text) {
        let parsed = match tokenize(&item) {
            Ok(tokens) => {
                let (body, alias) = split_trailing_alias(&tokens);
                ProjectionItem {
                    expression: scope.render_tokens(body, false),
                    alias,
                }
            }
            Err(_) => ProjectionItem {
                expression: normalize(&item),
                alias: None,
            },
        };
        items.push(parsed);
    }
    items
}

fn strip_leading_word<'a>(text: &'a str, word: &str) -> Option<&'a str> {
    let head = text.get(..word.len())?;
    let rest = &text[word.len()..];
    (head.eq_ignore_ascii_case(word) && rest.starts_with(char::is_whitespace)).then(|| rest.trim_start())
}

/// Split `expr [AS] alias` into the expression tokens and the alias.
///
/// A bare trailing word counts as an alias only when it is not a keyword or
/// function name and the token before it can end an expression.
fn split_trailing_alias(tokens: &[Token]) -> (&[Token], Option<String>) {
    let len = tokens.len();
    let Some(last) = tokens.last() else {
        return (tokens, None);
    };
    let alias_like = matches!(last.kind, TokenKind::Word | TokenKind::QuotedIdent);
    if !alias_like || len < 2 {
        return (tokens, None);
    }

    let prev = &tokens[len - 2];
    if prev.is_word("AS") && len >= 3 {
        return (&tokens[..len - 2], Some(alias_name(last)));
    }

    let last_is_plain = last.kind == TokenKind::QuotedIdent
        || !(is_keyword(&last.text) || is_function(&last.text));
    let prev_ends_expression = match prev.kind {
        TokenKind::Word => !is_keyword(&prev.text) || prev.is_word("END"),
        TokenKind::QuotedIdent | TokenKind::StringLit | TokenKind::Number | TokenKind::RParen => {
            true
        }
        _ => false,
    };
    if last_is_plain && prev_ends_expression {
        return (&tokens[..len - 1], Some(alias_name(last)));
    }
    (tokens, None)
}

fn alias_name(token: &Token) -> String {
    match token.kind {
        TokenKind::QuotedIdent => token.text.trim_matches('"').to_string(),
        _ => token.text.to_lowercase(),
    }
}

#[cfg(test)]
mod tests {
    use sqlscore_sql::extract_components;

    use super::*;

    #[test]
    fn canonical_spacing_is_fixed() {
        let scope = Scope::default();
        assert_eq!(scope.canonical("count( * )"), "COUNT(*)");
        assert_eq!(scope.canonical("a>=1 and b=ANY(x)"), "a >= 1 AND b = ANY (x)");
        assert_eq!(scope.canonical("x::int , y"), "x::INT, y");
    }

    #[test]
    fn detects_explicit_and_bare_aliases() {
        let scope = Scope::default();
        let items = projection_items(
            "DISTINCT uf, count(*) AS total, sum(x) soma, t.col, CASE WHEN a THEN 1 END flag",
            &scope,
        );
        let tokens: Vec<String> = items.iter().map(ProjectionItem::token).collect();
        assert_eq!(
            tokens,
            vec![
                "DISTINCT",
                "uf",
                "COUNT(*) AS <alias>",
                "SUM(x) AS <alias>",
                "t.col",
                "CASE WHEN a THEN 1 END AS <alias>",
            ]
        );
        assert_eq!(items[3].alias.as_deref(), Some("soma"));
    }

    #[test]
    fn keywords_are_not_aliases() {
        let items = projection_items("a DESC, b", &Scope::default());
        assert_eq!(items[0].alias, None);
    }

    #[test]
    fn resolves_table_aliases_in_multi_table_statements() {
        let clauses = extract_components(
            "SELECT m.id FROM mortes m JOIN municipios AS mu ON mu.id = m.municipio_id",
        );
        let scope = Scope::for_statement(&clauses);
        assert_eq!(scope.canonical("mu.id = m.municipio_id"), "municipios.id = mortes.municipio_id");
        assert_eq!(join_target(&clauses.joins[0]), Some("municipios AS mu"));
    }

    #[test]
    fn default_schema_is_dropped_from_table_names() {
        let table = parse_table_ref("public.mortes m").unwrap();
        assert_eq!(table.name, "mortes");
        assert_eq!(table.alias.as_deref(), Some("m"));
        assert_eq!(parse_table_ref("\"public\".mortes").unwrap().name, "mortes");
        assert_eq!(parse_table_ref("sih.mortes").unwrap().name, "sih.mortes");
    }

    #[test]
    fn drops_qualifiers_when_only_one_table_is_read() {
        let clauses = extract_components("SELECT p.nome FROM pessoas p WHERE p.idade > 30");
        let scope = Scope::for_statement(&clauses);
        assert_eq!(scope.canonical(&clauses.filter), "idade > 30");
        assert_eq!(scope.canonical("pessoas.nome"), "nome");
    }

    #[test]
    fn substitutes_projection_aliases() {
        let clauses = extract_components("SELECT a, COUNT(*) AS total FROM t ORDER BY total DESC");
        let scope = Scope::for_statement(&clauses);
        assert_eq!(scope.canonical_with_aliases(&clauses.ordering), "COUNT(*) DESC");
        assert_eq!(scope.canonical(&clauses.ordering), "total DESC");
    }
}
