//! Compared row sources: a table reference or an arbitrary query.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::dialect::SqlDialect;

static SELECT_FROM: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)\bselect\b.*\bfrom\b").expect("Invalid select/from regex"));

/// One side of a comparison.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "value")]
pub enum Source {
    /// A table or view reference.
    Table(String),
    /// A query whose result is compared.
    Query(String),
}

impl Source {
    /// Classifies user input: anything with a `select ... from` is a query,
    /// everything else a table reference.
    #[must_use]
    pub fn parse(input: &str) -> Self {
        let trimmed = input.trim().trim_matches(|c| c == '\r' || c == '\n');
        if SELECT_FROM.is_match(trimmed) {
            Self::Query(trimmed.trim_end_matches(';').trim_end().to_string())
        } else {
            Self::Table(trimmed.to_string())
        }
    }

    /// Returns whether this source is a query.
    #[must_use]
    pub fn is_query(&self) -> bool {
        matches!(self, Self::Query(_))
    }

    /// Returns the table reference, if any.
    #[must_use]
    pub fn table(&self) -> Option<&str> {
        match self {
            Self::Table(table) => Some(table),
            Self::Query(_) => None,
        }
    }

    /// Returns the raw text given by the user.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Table(text) | Self::Query(text) => text,
        }
    }

    /// Returns a query producing every row of this source.
    #[must_use]
    pub fn to_query(&self, dialect: &dyn SqlDialect) -> String {
        match self {
            Self::Table(table) => format!("select * from {}", dialect.quote_table(table)),
            Self::Query(query) => query.clone(),
        }
    }
}

impl std::fmt::Display for Source {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
