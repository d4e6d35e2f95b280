//! Pipeline error model.
//! Every failure the pipeline can observe maps into [`PipelineError`]; collaborator
//! seams speak `anyhow` and are folded in through `From<anyhow::Error>`.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PipelineError {
    #[error("schema_load_error: could not load schema for '{database}': {message}")]
    SchemaLoad { database: String, message: String },
    #[error("parse_error: {message}")]
    Parse { message: String },
    #[error("execution_error: {message}")]
    Execution { message: String },
    #[error("rejected: statement starts with disallowed keyword {keyword}")]
    Rejected { keyword: String },
    #[error("render_error: {message}")]
    Render { message: String },
}

impl PipelineError {
    pub fn code_str(&self) -> &'static str {
        match self {
            PipelineError::SchemaLoad { .. } => "schema_load_error",
            PipelineError::Parse { .. } => "parse_error",
            PipelineError::Execution { .. } => "execution_error",
            PipelineError::Rejected { .. } => "rejected",
            PipelineError::Render { .. } => "render_error",
        }
    }

    /// Human-readable reason without the code prefix.
    pub fn reason(&self) -> String {
        match self {
            PipelineError::SchemaLoad { database, message } => format!("could not load schema for '{}': {}", database, message),
            PipelineError::Parse { message }
            | PipelineError::Execution { message }
            | PipelineError::Render { message } => message.clone(),
            PipelineError::Rejected { keyword } => format!("statements starting with {} are not allowed", keyword),
        }
    }

    pub fn schema_load<D: Into<String>, M: Into<String>>(database: D, msg: M) -> Self { PipelineError::SchemaLoad { database: database.into(), message: msg.into() } }
    pub fn parse<S: Into<String>>(msg: S) -> Self { PipelineError::Parse { message: msg.into() } }
    pub fn execution<S: Into<String>>(msg: S) -> Self { PipelineError::Execution { message: msg.into() } }
    pub fn rejected<S: Into<String>>(keyword: S) -> Self { PipelineError::Rejected { keyword: keyword.into() } }
    pub fn render<S: Into<String>>(msg: S) -> Self { PipelineError::Render { message: msg.into() } }

    pub fn category(&self) -> ErrorCategory {
        match self {
            PipelineError::Execution { message } => ErrorCategory::classify(message),
            PipelineError::Rejected { .. } => ErrorCategory::Permission,
            PipelineError::Parse { .. } => ErrorCategory::Syntax,
            PipelineError::SchemaLoad { .. } => ErrorCategory::Connection,
            PipelineError::Render { .. } => ErrorCategory::General,
        }
    }
}

pub type PipelineResult<T> = Result<T, PipelineError>;

impl From<anyhow::Error> for PipelineError {
    fn from(err: anyhow::Error) -> Self {
        // Collaborator failures surface while executing unless mapped explicitly
        PipelineError::Execution { message: format!("{:#}", err) }
    }
}

/// Coarse classification of an execution failure message, used to pick hints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    ColumnReference,
    Syntax,
    Connection,
    Permission,
    Timeout,
    General,
}

impl ErrorCategory {
    pub fn classify(message: &str) -> Self {
        let m = message.to_ascii_lowercase();
        if m.contains("unknown column") || m.contains("no such column") || m.contains("column") && (m.contains("does not exist") || m.contains("not found")) {
            ErrorCategory::ColumnReference
        } else if m.contains("timed out") || m.contains("timeout") {
            ErrorCategory::Timeout
        } else if m.contains("syntax") || m.contains("parse error") {
            ErrorCategory::Syntax
        } else if m.contains("connection") || m.contains("connect") || m.contains("network") {
            ErrorCategory::Connection
        } else if m.contains("permission") || m.contains("access denied") || m.contains("not allowed") {
            ErrorCategory::Permission
        } else {
            ErrorCategory::General
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ErrorCategory::ColumnReference => "Column Reference Error",
            ErrorCategory::Syntax => "SQL Syntax Error",
            ErrorCategory::Connection => "Database Connection Error",
            ErrorCategory::Permission => "Permission Error",
            ErrorCategory::Timeout => "Query Timeout",
            ErrorCategory::General => "Execution Error",
        }
    }

    /// Generic quick-fix hints shown next to a failure.
    pub fn hints(&self) -> &'static [&'static str] {
        match self {
            ErrorCategory::ColumnReference => &[
                "Check that every column exists in the table its alias points to",
                "Confirm the table aliases used in the SELECT list match the FROM/JOIN clauses",
            ],
            ErrorCategory::Syntax => &[
                "Check for missing commas, parentheses or quotes",
                "Verify keywords and functions are valid for this database",
            ],
            ErrorCategory::Connection => &[
                "Verify the database is reachable",
                "Retry once the connection is restored",
            ],
            ErrorCategory::Permission => &[
                "Only read-only queries can be executed",
                "Ask an administrator for access to the referenced tables",
            ],
            ErrorCategory::Timeout => &[
                "Narrow the query with additional filters or a LIMIT",
                "Avoid unbounded joins across large tables",
            ],
            ErrorCategory::General => &[
                "Rephrase the question with more specific table or column names",
            ],
        }
    }
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod error_tests;
