//! SQL data model shared by the database proxy and its sandbox clients.
//!
//! Parameters and row values are plain JSON values so the same shapes
//! travel unchanged over the DB channel.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Leading keywords whose statements produce rows.
const READ_KEYWORDS: &[&str] = &["SELECT", "WITH", "VALUES", "EXPLAIN", "PRAGMA"];

/// How result rows are shaped.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RowMode {
    /// One JSON object per row, keyed by column name.
    #[default]
    Object,
    /// One JSON array per row, in column order.
    Array,
}

/// Whether a statement is routed as a row-returning query or as an exec.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepKind {
    Query,
    Exec,
}

impl StepKind {
    /// Classifies a statement by its leading keyword, skipping whitespace,
    /// `--` / `/* */` comments and opening parentheses. A write with a
    /// `RETURNING` clause produces rows and is a query too.
    pub fn classify(sql: &str) -> Self {
        match leading_keyword(sql) {
            Some(word) if READ_KEYWORDS.iter().any(|k| k.eq_ignore_ascii_case(word)) => {
                Self::Query
            }
            _ if has_returning_clause(sql) => Self::Query,
            _ => Self::Exec,
        }
    }
}

/// Looks for a bare `RETURNING` word outside literals, quoted names and
/// comments.
fn has_returning_clause(sql: &str) -> bool {
    let bytes = sql.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            quote @ (b'\'' | b'"' | b'`') => {
                i = skip_past(bytes, i + 1, &[quote]);
            }
            b'[' => i = skip_past(bytes, i + 1, b"]"),
            b'-' if bytes.get(i + 1) == Some(&b'-') => i = skip_past(bytes, i + 2, b"\n"),
            b'/' if bytes.get(i + 1) == Some(&b'*') => i = skip_past(bytes, i + 2, b"*/"),
            b if b.is_ascii_alphanumeric() || b == b'_' => {
                let start = i;
                while i < bytes.len() && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'_') {
                    i += 1;
                }
                if sql[start..i].eq_ignore_ascii_case("RETURNING") {
                    return true;
                }
            }
            _ => i += 1,
        }
    }
    false
}

/// Index just past the next `end` at or after `from`, or the end of input.
fn skip_past(bytes: &[u8], from: usize, end: &[u8]) -> usize {
    bytes[from.min(bytes.len())..]
        .windows(end.len())
        .position(|w| w == end)
        .map_or(bytes.len(), |at| from + at + end.len())
}

fn leading_keyword(sql: &str) -> Option<&str> {
    let mut rest = sql;
    loop {
        rest = rest.trim_start_matches(|c: char| c.is_whitespace() || c == '(');
        if let Some(comment) = rest.strip_prefix("--") {
            rest = comment.split_once('\n').map_or("", |(_, tail)| tail);
        } else if let Some(comment) = rest.strip_prefix("/*") {
            rest = comment.split_once("*/").map_or("", |(_, tail)| tail);
        } else {
            break;
        }
    }
    let end = rest
        .find(|c: char| !c.is_ascii_alphabetic())
        .unwrap_or(rest.len());
    (end > 0).then(|| &rest[..end])
}

/// One statement of a batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DbStep {
    pub sql: String,
    #[serde(default)]
    pub params: Vec<Value>,
    pub kind: StepKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub row_mode: Option<RowMode>,
}

impl DbStep {
    /// Creates a step, classifying it by its leading keyword.
    pub fn new(sql: impl Into<String>, params: Vec<Value>) -> Self {
        let sql = sql.into();
        Self {
            kind: StepKind::classify(&sql),
            sql,
            params,
            row_mode: None,
        }
    }

    /// Requests array-shaped rows for this step.
    pub fn with_row_mode(mut self, mode: RowMode) -> Self {
        self.row_mode = Some(mode);
        self
    }
}

/// Rows returned by a query.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryResult {
    pub columns: Vec<String>,
    pub rows: Vec<Value>,
}

/// Outcome of a statement that does not return rows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecResult {
    pub changes: u64,
    pub last_insert_id: i64,
}

/// Result of one batch step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum StepResult {
    Query(QueryResult),
    Exec(ExecResult),
}

impl StepResult {
    /// Returns the rows when this step was a query.
    pub fn as_query(&self) -> Option<&QueryResult> {
        match self {
            Self::Query(result) => Some(result),
            Self::Exec(_) => None,
        }
    }

    /// Returns the exec summary when this step was an exec.
    pub fn as_exec(&self) -> Option<&ExecResult> {
        match self {
            Self::Exec(result) => Some(result),
            Self::Query(_) => None,
        }
    }
}
