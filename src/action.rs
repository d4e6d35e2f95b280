//! Typed action parsed from a model turn.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::analysis::AnalysisReport;
use crate::sql_text::looks_like_sql;

/// Route of an action, decided once at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    DirectAnswer,
    SqlQuery,
    SqlQueryWithReport,
    ReportOnly,
    Empty,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SqlAction {
    sql: String,
    thoughts: String,
    display: String,
    direct_response: String,
    missing_info: String,
    analysis_report: Option<AnalysisReport>,
    user_input: String,
    /// Raw model turn the action was parsed from; empty for hand-built actions.
    model_text: String,
    kind: ActionKind,
}

impl SqlAction {
    pub fn new(
        sql: impl Into<String>,
        thoughts: impl Into<String>,
        display: impl Into<String>,
        direct_response: impl Into<String>,
        missing_info: impl Into<String>,
        analysis_report: Option<AnalysisReport>,
        user_input: impl Into<String>,
    ) -> Self {
        let sql = sql.into().trim().to_string();
        let direct_response = direct_response.into();
        let analysis_report = analysis_report.filter(|r| !r.is_empty());
        let kind = match (sql.is_empty(), analysis_report.is_some(), direct_response.trim().is_empty()) {
            (false, true, _) => ActionKind::SqlQueryWithReport,
            (false, false, _) => ActionKind::SqlQuery,
            (true, true, _) => ActionKind::ReportOnly,
            (true, false, false) => ActionKind::DirectAnswer,
            (true, false, true) => ActionKind::Empty,
        };
        Self {
            sql,
            thoughts: thoughts.into(),
            display: display.into(),
            direct_response,
            missing_info: missing_info.into(),
            analysis_report,
            user_input: user_input.into(),
            model_text: String::new(),
            kind,
        }
    }

    /// An action carrying only a statement.
    pub fn from_sql(sql: impl Into<String>, user_input: impl Into<String>) -> Self {
        Self::new(sql, "", "", "", "", None, user_input)
    }

    pub fn with_model_text(mut self, text: impl Into<String>) -> Self {
        self.model_text = text.into();
        self
    }

    pub fn sql(&self) -> &str { &self.sql }
    pub fn thoughts(&self) -> &str { &self.thoughts }
    pub fn display(&self) -> &str { &self.display }
    pub fn direct_response(&self) -> &str { &self.direct_response }
    pub fn missing_info(&self) -> &str { &self.missing_info }
    pub fn analysis_report(&self) -> Option<&AnalysisReport> { self.analysis_report.as_ref() }
    pub fn user_input(&self) -> &str { &self.user_input }
    pub fn model_text(&self) -> &str { &self.model_text }
    pub fn kind(&self) -> ActionKind { self.kind }
}

static CODE_FENCE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)^```[A-Za-z]*\s*(.*?)\s*```$").expect("valid regex"));

/// Trim, drop a surrounding code fence and cut to the outer JSON object when present.
pub fn clean_model_text(text: &str) -> String {
    let mut s = text.trim();
    if let Some(c) = CODE_FENCE.captures(s) {
        s = c.get(1).map(|m| m.as_str()).unwrap_or(s);
    }
    let s = s.trim();
    if looks_like_sql(s) {
        return s.to_string();
    }
    match (s.find('{'), s.rfind('}')) {
        (Some(a), Some(b)) if a < b => s[a..=b].to_string(),
        _ => s.to_string(),
    }
}

/// Escape raw control characters that appear inside JSON string literals.
pub fn escape_control_chars_in_strings(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut in_string = false;
    let mut escaped = false;
    for ch in s.chars() {
        if in_string {
            if escaped {
                escaped = false;
                out.push(ch);
                continue;
            }
            match ch {
                '\\' => { escaped = true; out.push(ch); }
                '"' => { in_string = false; out.push(ch); }
                '\n' => out.push_str("\\n"),
                '\r' => out.push_str("\\r"),
                '\t' => out.push_str("\\t"),
                c if (c as u32) < 0x20 => out.push_str(&format!("\\u{:04x}", c as u32)),
                c => out.push(c),
            }
        } else {
            if ch == '"' { in_string = true; }
            out.push(ch);
        }
    }
    out
}

fn field_text(v: &Value) -> String {
    match v {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Parse one model turn into an action. Never fails: unparsable text becomes an
/// action whose thoughts hold the raw text.
pub fn parse_model_output(text: &str, user_input: &str) -> SqlAction {
    parse_turn(text, user_input).with_model_text(text)
}

fn parse_turn(text: &str, user_input: &str) -> SqlAction {
    let clean = clean_model_text(text);
    if looks_like_sql(&clean) {
        debug!(target: "chatsql::action", "model output is a bare SQL statement");
        return SqlAction::from_sql(clean.trim_end_matches(';').trim(), user_input);
    }
    let parsed = serde_json::from_str::<Value>(&clean)
        .or_else(|_| serde_json::from_str::<Value>(&escape_control_chars_in_strings(&clean)));
    let obj = match parsed {
        Ok(Value::Object(map)) => map,
        Ok(_) | Err(_) => {
            warn!(target: "chatsql::action", "model output is neither SQL nor a JSON object ({} chars)", text.len());
            return SqlAction::new("", text.trim(), "", "", "", None, user_input);
        }
    };
    let mut sql = String::new();
    let mut thoughts = String::new();
    let mut display = String::new();
    let mut direct = String::new();
    let mut missing = String::new();
    let mut report = None;
    for (key, value) in &obj {
        match key.trim() {
            "sql" => sql = field_text(value),
            "thoughts" => thoughts = field_text(value),
            "display_type" => display = field_text(value),
            "direct_response" => direct = field_text(value),
            "missing_info" => missing = field_text(value),
            "analysis_report" => report = AnalysisReport::from_value(value),
            _ => {}
        }
    }
    let sql = sql.trim().trim_end_matches(';').trim().to_string();
    if !sql.is_empty() && is_descriptive_text(&sql) {
        match recover_sql_from_input(user_input) {
            Some(recovered) => {
                info!(target: "chatsql::action", "sql field held prose; recovered statement from user input");
                thoughts = format!("Recovered the SQL statement from the user input: {}", recovered);
                return SqlAction::new(recovered, thoughts, display, "", missing, report, user_input);
            }
            None => {
                warn!(target: "chatsql::action", "sql field held prose and no statement could be recovered");
                let direct = "Sorry, no valid SQL query could be identified. Please check your input.";
                return SqlAction::new("", thoughts, display, direct, missing, report, user_input);
            }
        }
    }
    SqlAction::new(sql, thoughts, display, direct, missing, report, user_input)
}

/// Whether a non-empty `sql` field holds an explanation ("您提供的查询已经正确编写",
/// "The query above is correct") rather than a statement.
pub fn is_descriptive_text(sql: &str) -> bool {
    let t = sql.trim();
    !t.is_empty() && !looks_like_sql(t)
}

const STOP_PHRASES: &[&str] = &[
    "执行代码", "并分析", "生成报告", "请执行", "运行这个", " and analyze", " and analyse",
    " then generate", " please execute", " run this", " and generate a report",
];

static SQL_START: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\b(WITH|SELECT|SHOW|DESCRIBE|EXPLAIN)\b").expect("valid regex"));
static CTE_HEAD: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)^WITH\s+(RECURSIVE\s+)?\S+\s*(\([^)]*\)\s*)?AS\s*\(").expect("valid regex"));

/// Statement embedded in the user's own message, cut before trailing instructions.
pub fn recover_sql_from_input(user_input: &str) -> Option<String> {
    for m in SQL_START.find_iter(user_input) {
        let mut part = &user_input[m.start()..];
        if m.as_str().eq_ignore_ascii_case("WITH") && !CTE_HEAD.is_match(part) {
            continue;
        }
        for phrase in STOP_PHRASES {
            if let Some(pos) = part.find(phrase) {
                part = &part[..pos];
            }
        }
        let part = part.trim().trim_end_matches(|c| matches!(c, ';' | '，' | ',' | '。')).trim();
        if looks_like_sql(part) {
            return Some(part.to_string());
        }
    }
    None
}

#[cfg(test)]
#[path = "action_tests.rs"]
mod action_tests;
