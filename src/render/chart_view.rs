//! `<chart-view>` rendering. The payload travels as an escaped JSON attribute so a
//! front end can draw a table or chart from it directly.

use serde_json::{json, Map, Value};

use crate::error::{PipelineError, PipelineResult};
use crate::render::markdown;
use crate::render::{FailureView, SuccessView, EMPTY_RESULT_NOTICE};

const DEFAULT_DISPLAY: &str = "response_table";

pub fn render_success(view: &SuccessView<'_>, max_payload_bytes: usize) -> PipelineResult<String> {
    let mut payload = Map::new();
    let display = if view.display.trim().is_empty() { DEFAULT_DISPLAY } else { view.display.trim() };
    payload.insert("type".into(), Value::String(display.to_string()));
    payload.insert("sql".into(), Value::String(view.sql.trim().to_string()));
    let records: Vec<Value> = view
        .result
        .to_records()
        .into_iter()
        .take(view.max_rows.max(1))
        .map(Value::Object)
        .collect();
    payload.insert("data".into(), Value::Array(records));
    if let Some(report) = view.report {
        let v = serde_json::to_value(report).map_err(|e| PipelineError::render(e.to_string()))?;
        payload.insert("analysis_report".into(), v);
    }
    let tag = chart_tag(&Value::Object(payload), max_payload_bytes)?;

    let mut out = String::new();
    if !view.lead.trim().is_empty() {
        out.push_str(view.lead.trim());
        out.push_str("\n\n");
    }
    for w in view.warnings {
        out.push_str(&format!("> **Warning:** {}\n\n", w));
    }
    if !view.fixes.is_empty() {
        out.push_str("**Automatic fixes applied:** ");
        out.push_str(&view.fixes.join("; "));
        out.push_str("\n\n");
    }
    if view.result.is_empty() {
        out.push_str(EMPTY_RESULT_NOTICE);
        out.push_str("\n\n");
    }
    out.push_str(&tag);
    out.push('\n');
    if let Some(report) = view.report {
        out.push('\n');
        out.push_str(&markdown::render_report(report));
    }
    Ok(out)
}

/// Tag carrying the attempted statement and the classified error.
pub fn render_failure(view: &FailureView<'_>) -> PipelineResult<String> {
    let category = view.category();
    let payload = json!({
        "type": DEFAULT_DISPLAY,
        "sql": view.sql.trim(),
        "data": [],
        "error": {
            "code": view.error.code_str(),
            "category": category,
            "reason": view.error.reason(),
        },
    });
    chart_tag(&payload, usize::MAX)
}

fn chart_tag(payload: &Value, max_payload_bytes: usize) -> PipelineResult<String> {
    let body = serde_json::to_string(payload).map_err(|e| PipelineError::render(e.to_string()))?;
    if body.len() > max_payload_bytes {
        return Err(PipelineError::render(format!(
            "chart-view payload is {} bytes, limit is {}",
            body.len(),
            max_payload_bytes
        )));
    }
    Ok(format!("<chart-view content=\"{}\"/>", escape_attr(&body)))
}

/// XML attribute escaping.
pub fn escape_attr(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + s.len() / 8);
    for ch in s.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '"' => out.push_str("&quot;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '\'' => out.push_str("&apos;"),
            '\n' => out.push_str("&#10;"),
            c => out.push(c),
        }
    }
    out
}
