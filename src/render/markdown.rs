use serde_json::Value;

use crate::analysis::AnalysisReport;
use crate::render::{FailureView, SuccessView, EMPTY_RESULT_NOTICE};
use crate::result::QueryResult;

// per-cell character cap in rendered tables
const MAX_CELL_CHARS: usize = 200;

pub fn render_success(view: &SuccessView<'_>) -> String {
    let mut out = String::new();
    if !view.lead.trim().is_empty() {
        out.push_str(view.lead.trim());
        out.push_str("\n\n");
    }
    for w in view.warnings {
        out.push_str(&format!("> **Warning:** {}\n\n", w));
    }
    out.push_str("### Query Results\n\n");
    if view.result.is_empty() {
        out.push_str(EMPTY_RESULT_NOTICE);
        out.push_str("\n\n");
    } else {
        out.push_str(&render_table(view.result, view.max_rows));
        out.push('\n');
    }
    out.push_str(&sql_block("Executed SQL", view.sql));
    if !view.fixes.is_empty() {
        out.push_str("\n**Automatic fixes applied**\n\n");
        out.push_str(&numbered(view.fixes));
    }
    if let Some(report) = view.report {
        out.push('\n');
        out.push_str(&render_report(report));
    }
    out
}

pub fn render_failure(view: &FailureView<'_>) -> String {
    let category = view.category();
    let mut out = String::from("### Query Failed\n\n");
    out.push_str(&format!("**Error type:** {}\n\n", category.label()));
    out.push_str(&format!("**Reason:** {}\n\n", single_line(&view.error.reason())));
    for w in view.warnings {
        out.push_str(&format!("> **Warning:** {}\n\n", w));
    }
    out.push_str(&sql_block("Attempted SQL", view.sql));
    if !view.original_sql.trim().is_empty() && view.original_sql.trim() != view.sql.trim() {
        out.push('\n');
        out.push_str(&sql_block("Original SQL", view.original_sql));
    }
    if !view.fixes.is_empty() {
        out.push_str("\n**Automatic fixes attempted**\n\n");
        out.push_str(&numbered(view.fixes));
    }
    if !view.issues.is_empty() {
        out.push_str("\n**Validation issues**\n\n");
        let lines: Vec<String> = view.issues.iter().map(|i| i.to_string()).collect();
        out.push_str(&numbered(&lines));
    }
    out.push_str("\n**Suggestions**\n\n");
    let hints: Vec<String> = category.hints().iter().map(|h| h.to_string()).collect();
    out.push_str(&numbered(&hints));
    out
}

pub fn render_report(report: &AnalysisReport) -> String {
    let mut out = String::from("## Analysis Report\n");
    if !report.summary.trim().is_empty() {
        out.push_str(&format!("\n### Summary\n\n{}\n", report.summary.trim()));
    }
    for (title, items) in [
        ("Key Findings", &report.key_findings),
        ("Insights", &report.insights),
        ("Recommendations", &report.recommendations),
    ] {
        if !items.is_empty() {
            out.push_str(&format!("\n### {}\n\n", title));
            out.push_str(&numbered(items));
        }
    }
    if !report.methodology.trim().is_empty() {
        out.push_str(&format!("\n### Methodology\n\n{}\n", report.methodology.trim()));
    }
    out
}

/// Markdown table of at most `max_rows` rows with unique headers.
pub fn render_table(result: &QueryResult, max_rows: usize) -> String {
    let headers = result.dedup_columns();
    let shown = result.rows.len().min(max_rows.max(1));
    let rows: Vec<Vec<String>> = result.rows[..shown]
        .iter()
        .map(|r| (0..headers.len()).map(|i| r.get(i).map(to_cell_string).unwrap_or_else(|| "NULL".to_string())).collect())
        .collect();
    let right: Vec<bool> = (0..headers.len())
        .map(|i| {
            let mut any = false;
            let all = rows.iter().all(|r| {
                let c = &r[i];
                if c == "NULL" { return true; }
                any = true;
                is_numeric_like(c)
            });
            any && all
        })
        .collect();

    let mut out = String::new();
    out.push_str(&build_row(&headers.iter().map(|h| escape_cell(h)).collect::<Vec<_>>()));
    out.push_str(&build_separator(&right));
    for r in &rows {
        out.push_str(&build_row(&r.iter().map(|c| escape_cell(&truncate(c, MAX_CELL_CHARS))).collect::<Vec<_>>()));
    }
    if shown < result.rows.len() {
        out.push_str(&format!("\n_Showing {} of {} rows._\n", shown, result.rows.len()));
    }
    out
}

fn build_row(cells: &[String]) -> String {
    let mut s = String::from("|");
    for c in cells {
        s.push(' ');
        s.push_str(c);
        s.push_str(" |");
    }
    s.push('\n');
    s
}

fn build_separator(right_align: &[bool]) -> String {
    let mut s = String::from("|");
    for r in right_align {
        s.push_str(if *r { " ---: |" } else { " --- |" });
    }
    s.push('\n');
    s
}

fn to_cell_string(v: &Value) -> String {
    match v {
        Value::Null => String::from("NULL"),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.clone(),
        // keep objects/arrays compact
        other => other.to_string(),
    }
}

fn escape_cell(s: &str) -> String {
    s.replace('\\', "\\\\").replace('|', "\\|").replace("\r\n", "<br>").replace(|c| c == '\n' || c == '\r', "<br>")
}

fn truncate(s: &str, max: usize) -> String {
    let len = s.chars().count();
    if len <= max { return s.to_string(); }
    if max <= 1 { return "…".to_string(); }
    s.chars().take(max - 1).collect::<String>() + "…"
}

fn is_numeric_like(s: &str) -> bool {
    // crude detection for aligning numbers to the right
    let st = s.trim();
    if st.is_empty() { return false; }
    let mut has_digit = false;
    for ch in st.chars() {
        if ch.is_ascii_digit() { has_digit = true; continue; }
        if ".-+eE,_%".contains(ch) { continue; }
        return false;
    }
    has_digit
}

fn sql_block(title: &str, sql: &str) -> String {
    format!("**{}**\n\n```sql\n{}\n```\n", title, sql.trim())
}

fn numbered(items: &[String]) -> String {
    let mut s = String::new();
    for (i, item) in items.iter().enumerate() {
        s.push_str(&format!("{}. {}\n", i + 1, single_line(item)));
    }
    s
}

fn single_line(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}
