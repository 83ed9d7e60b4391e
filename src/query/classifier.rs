use once_cell::sync::Lazy;
use regex::Regex;
use std::fmt;
use tracing::debug;

use super::normalize::normalize_sql;

const WRITE_KEYWORDS: [&str; 8] = [
    "INSERT", "UPDATE", "DELETE", "REPLACE", "TRUNCATE", "DROP", "CREATE", "ALTER",
];

const READ_KEYWORDS: [&str; 5] = ["SELECT", "SHOW", "DESCRIBE", "EXPLAIN", "USE"];

static FROM_TABLE: Lazy<Regex> = Lazy::new(|| table_after(r"FROM"));
static JOIN_TABLE: Lazy<Regex> = Lazy::new(|| table_after(r"JOIN"));
static INTO_TABLE: Lazy<Regex> = Lazy::new(|| table_after(r"INTO"));
static UPDATE_TABLE: Lazy<Regex> = Lazy::new(|| table_after(r"UPDATE"));
static DDL_TABLE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\bTABLE\s+(?:IF\s+(?:NOT\s+)?EXISTS\s+)?`?(\w+)`?").expect("static regex")
});

static WHERE_CLAUSE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)\bWHERE\s+(.+?)(?:\s+ORDER\s+BY\b|\s+GROUP\s+BY\b|\s+LIMIT\b|\s+HAVING\b|$)")
        .expect("static regex")
});

fn table_after(keyword: &str) -> Regex {
    Regex::new(&format!(r"(?i)\b{keyword}\s+`?(\w+)`?")).expect("static regex")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueryType {
    Read,
    Write,
    Unknown,
}

impl fmt::Display for QueryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueryType::Read => f.write_str("READ"),
            QueryType::Write => f.write_str("WRITE"),
            QueryType::Unknown => f.write_str("UNKNOWN"),
        }
    }
}

/// A statement with its intent and the tables it names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassifiedQuery {
    pub query_type: QueryType,
    /// Deduplicated, in order of first appearance, case as written.
    pub table_names: Vec<String>,
    /// The statement exactly as received.
    pub original: String,
}

/// Seam between routing and however statements get classified.
pub trait StatementClassifier: Send + Sync {
    fn classify(&self, sql: &str) -> ClassifiedQuery;
}

/// Keyword-driven classifier. Not a SQL parser: it looks at the first word
/// and at identifiers following a handful of keywords.
#[derive(Debug, Default, Clone, Copy)]
pub struct LexicalClassifier;

impl StatementClassifier for LexicalClassifier {
    fn classify(&self, sql: &str) -> ClassifiedQuery {
        classify(sql)
    }
}

pub fn classify(sql: &str) -> ClassifiedQuery {
    let normalized = normalize_sql(sql);
    let upper = normalized.to_uppercase();
    let tokens: Vec<&str> = upper.split_whitespace().map(bare_word).collect();

    let query_type = classify_tokens(&tokens);
    let first = tokens.first().copied().unwrap_or_default();
    let table_names = extract_table_names(&normalized, first, query_type);

    debug!("Classified {} statement touching {:?}", query_type, table_names);

    ClassifiedQuery {
        query_type,
        table_names,
        original: sql.to_string(),
    }
}

fn bare_word(token: &str) -> &str {
    token.trim_matches(|c: char| !(c.is_alphanumeric() || c == '_'))
}

fn classify_tokens(tokens: &[&str]) -> QueryType {
    let Some(first) = tokens.first() else {
        return QueryType::Unknown;
    };

    if WRITE_KEYWORDS.contains(first) {
        return QueryType::Write;
    }
    if READ_KEYWORDS.contains(first) {
        return QueryType::Read;
    }

    if tokens.iter().any(|t| *t == "INTO" || *t == "SET") {
        QueryType::Write
    } else if tokens.iter().any(|t| *t == "FROM" || *t == "JOIN") {
        QueryType::Read
    } else {
        QueryType::Unknown
    }
}

fn extract_table_names(normalized: &str, first: &str, query_type: QueryType) -> Vec<String> {
    let patterns: Vec<&Regex> = match query_type {
        QueryType::Read => vec![&*FROM_TABLE, &*JOIN_TABLE],
        QueryType::Write => match first {
            "INSERT" | "REPLACE" => vec![&*INTO_TABLE],
            "UPDATE" => vec![&*UPDATE_TABLE],
            "DELETE" => vec![&*FROM_TABLE],
            "TRUNCATE" | "DROP" | "CREATE" | "ALTER" => vec![&*DDL_TABLE],
            _ => Vec::new(),
        },
        QueryType::Unknown => Vec::new(),
    };

    let mut names: Vec<String> = Vec::new();
    for pattern in patterns {
        for cap in pattern.captures_iter(normalized) {
            if let Some(name) = cap.get(1).map(|m| m.as_str()) {
                if !name.is_empty() && !names.iter().any(|n| n == name) {
                    names.push(name.to_string());
                }
            }
        }
    }
    names
}

/// WHERE clause of a statement, for logging.
pub fn extract_where_conditions(sql: &str) -> Option<String> {
    WHERE_CLAUSE
        .captures(sql)
        .and_then(|cap| cap.get(1))
        .map(|m| m.as_str().trim().to_string())
        .filter(|s| !s.is_empty())
}
