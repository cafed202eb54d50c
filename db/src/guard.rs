//! Read-only enforcement for model supplied SQL.
//!
//! The check runs before any connection is touched. The text is tokenized and
//! parsed with the SQLite dialect of `sqlparser`: it must be exactly one
//! statement, and that statement must be a `SELECT`/`WITH` query. Unquoted
//! words are also matched against a configurable keyword denylist, so a write
//! nested inside an otherwise valid query is refused too. Literals, quoted
//! identifiers and comments are separate tokens and never match. The
//! connection itself is opened read-only, so anything slipping past this check
//! still fails in the engine.

use sqlparser::ast::{SetExpr, Statement};
use sqlparser::dialect::SQLiteDialect;
use sqlparser::parser::Parser;
use sqlparser::tokenizer::{Token, Tokenizer};

use crate::DbError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadOnlyGuard {
    denied: Vec<String>,
}

impl ReadOnlyGuard {
    pub fn new<I, S>(denied: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            denied: denied
                .into_iter()
                .map(|keyword| keyword.as_ref().trim().to_ascii_uppercase())
                .filter(|keyword| !keyword.is_empty())
                .collect(),
        }
    }

    pub fn denied_keywords(&self) -> &[String] {
        &self.denied
    }

    pub fn check(&self, sql: &str) -> Result<(), DbError> {
        if sql.trim().is_empty() {
            return Err(empty());
        }

        let dialect = SQLiteDialect {};
        let tokens = Tokenizer::new(&dialect, sql)
            .tokenize()
            .map_err(|err| DbError::Syntax(format!("could not read query: {err}")))?;

        // a denied keyword wins over a parse failure, `SELECT 1 DELETE ..` does not parse
        let parsed = Parser::parse_sql(&dialect, sql);
        if let Some(keyword) = self.denied_keyword(&tokens) {
            return Err(forbidden(keyword));
        }
        let statements =
            parsed.map_err(|err| DbError::Syntax(format!("could not parse query: {err}")))?;

        let separators = tokens
            .iter()
            .filter(|token| matches!(token, Token::SemiColon))
            .count();

        match statements.as_slice() {
            [] => Err(empty()),
            [statement] if separators <= 1 => match statement {
                Statement::Query(query) => match non_retrieval(&query.body) {
                    None => Ok(()),
                    Some(found) => Err(not_a_query(&found)),
                },
                _ => Err(not_a_query(&leading_word(&tokens))),
            },
            _ => Err(DbError::Validation(
                "multiple statements are not allowed; remove the `;` separator and send one query"
                    .to_string(),
            )),
        }
    }

    /// First unquoted word that is on the denylist
    fn denied_keyword(&self, tokens: &[Token]) -> Option<String> {
        tokens.iter().find_map(|token| match token {
            Token::Word(word) if word.quote_style.is_none() => {
                let upper = word.value.to_ascii_uppercase();
                self.denied.contains(&upper).then_some(upper)
            }
            _ => None,
        })
    }
}

/// Name of the first construct in a query body that is not a plain `SELECT`
fn non_retrieval(body: &SetExpr) -> Option<String> {
    match body {
        SetExpr::Select(_) => None,
        SetExpr::Query(query) => non_retrieval(&query.body),
        SetExpr::SetOperation { left, right, .. } => {
            non_retrieval(left).or_else(|| non_retrieval(right))
        }
        SetExpr::Values(_) => Some("VALUES".to_string()),
        other => Some(
            other
                .to_string()
                .split_whitespace()
                .next()
                .unwrap_or_default()
                .to_ascii_uppercase(),
        ),
    }
}

fn leading_word(tokens: &[Token]) -> String {
    tokens
        .iter()
        .find_map(|token| match token {
            Token::Word(word) => Some(word.value.to_ascii_uppercase()),
            _ => None,
        })
        .unwrap_or_default()
}

fn empty() -> DbError {
    DbError::Validation("query is empty".to_string())
}

fn forbidden(keyword: String) -> DbError {
    DbError::Validation(format!(
        "query contains forbidden keyword {keyword}; only read-only SELECT queries are allowed"
    ))
}

fn not_a_query(found: &str) -> DbError {
    DbError::Validation(format!(
        "only SELECT or WITH queries are allowed, found {}",
        if found.is_empty() { "no keyword" } else { found }
    ))
}
