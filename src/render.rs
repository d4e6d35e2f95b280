//! Response rendering in the two output modes.
//! Markdown ("simple") is always available; the chart-view ("enhanced") form falls
//! back to Markdown when its payload cannot be produced.

use tracing::warn;

use crate::analysis::AnalysisReport;
use crate::config::RenderMode;
use crate::error::{ErrorCategory, PipelineError};
use crate::result::QueryResult;
use crate::validate::ValidationIssue;

pub mod chart_view;
pub mod markdown;

pub const EMPTY_RESULT_NOTICE: &str = "The query executed successfully but no matching data was found.";

/// Everything needed to render a successful execution.
#[derive(Debug, Clone)]
pub struct SuccessView<'a> {
    pub sql: &'a str,
    pub result: &'a QueryResult,
    pub report: Option<&'a AnalysisReport>,
    /// Display hint from the model, e.g. `response_table`.
    pub display: &'a str,
    pub lead: &'a str,
    pub fixes: &'a [String],
    pub warnings: &'a [String],
    pub max_rows: usize,
}

/// Everything needed to render a failed execution.
#[derive(Debug, Clone)]
pub struct FailureView<'a> {
    pub sql: &'a str,
    pub original_sql: &'a str,
    pub error: &'a PipelineError,
    pub issues: &'a [ValidationIssue],
    pub fixes: &'a [String],
    pub warnings: &'a [String],
}

impl<'a> FailureView<'a> {
    pub fn category(&self) -> ErrorCategory { self.error.category() }
}

pub fn render_success(view: &SuccessView<'_>, mode: RenderMode, max_payload_bytes: usize) -> String {
    match mode {
        RenderMode::Simple => markdown::render_success(view),
        RenderMode::Enhanced => match chart_view::render_success(view, max_payload_bytes) {
            Ok(s) => s,
            Err(e) => {
                warn!(target: "chatsql::render", "enhanced rendering failed, falling back to simple: {}", e);
                markdown::render_success(view)
            }
        },
    }
}

pub fn render_failure(view: &FailureView<'_>, mode: RenderMode) -> String {
    let text = markdown::render_failure(view);
    match mode {
        RenderMode::Simple => text,
        RenderMode::Enhanced => match chart_view::render_failure(view) {
            Ok(tag) => format!("{}\n\n{}", text, tag),
            Err(e) => {
                warn!(target: "chatsql::render", "could not attach chart-view to failure: {}", e);
                text
            }
        },
    }
}

pub fn render_report_only(report: &AnalysisReport, lead: &str) -> String {
    let mut out = String::new();
    if !lead.trim().is_empty() {
        out.push_str(lead.trim());
        out.push_str("\n\n");
    }
    out.push_str(&markdown::render_report(report));
    out
}

/// Diagnostic when the model produced neither SQL, a report nor a direct answer.
pub fn render_no_sql(thoughts: &str, missing_info: &str) -> String {
    let mut out = String::from("### No SQL Generated\n\nThe model did not produce a SQL query for this request.\n");
    if !thoughts.trim().is_empty() {
        out.push_str(&format!("\n**Model reasoning:**\n\n{}\n", thoughts.trim()));
    }
    if !missing_info.trim().is_empty() {
        out.push_str(&format!("\n**Missing information:** {}\n", missing_info.trim()));
    }
    out.push_str("\nTry rephrasing the question with the table or metric you are interested in.\n");
    out
}

/// Last-resort message that still carries the statements and the raw model text.
/// `original_sql` is shown separately when it differs from the executed `sql`.
pub fn render_unexpected(sql: &str, original_sql: &str, model_text: &str, detail: &str) -> String {
    let mut out = String::from("### Unexpected Condition\n\nThe response could not be rendered normally.\n");
    if !detail.trim().is_empty() {
        out.push_str(&format!("\n**Detail:** {}\n", detail.trim()));
    }
    if !sql.trim().is_empty() {
        out.push_str(&format!("\n**SQL**\n\n```sql\n{}\n```\n", sql.trim()));
    }
    if !original_sql.trim().is_empty() && original_sql.trim() != sql.trim() {
        out.push_str(&format!("\n**Original SQL**\n\n```sql\n{}\n```\n", original_sql.trim()));
    }
    if !model_text.trim().is_empty() {
        out.push_str(&format!("\n**Model output**\n\n```\n{}\n```\n", model_text.trim()));
    }
    out
}

#[cfg(test)]
#[path = "render_tests.rs"]
mod render_tests;
