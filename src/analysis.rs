//! Analysis reports: the structured report a model may attach to its answer, the
//! predicate deciding whether the user asked for one, and a report derived from
//! the executed result when the model supplied none.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::config::DEFAULT_ANALYSIS_KEYWORDS;
use crate::result::QueryResult;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalysisReport {
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub key_findings: Vec<String>,
    #[serde(default)]
    pub insights: Vec<String>,
    #[serde(default)]
    pub recommendations: Vec<String>,
    #[serde(default)]
    pub methodology: String,
}

impl AnalysisReport {
    pub fn is_empty(&self) -> bool {
        self.summary.trim().is_empty()
            && self.key_findings.is_empty()
            && self.insights.is_empty()
            && self.recommendations.is_empty()
            && self.methodology.trim().is_empty()
    }

    /// Lenient conversion from model JSON: a bare string is the summary, a scalar
    /// where a list is expected becomes a one-element list. Empty reports are `None`.
    pub fn from_value(v: &Value) -> Option<Self> {
        let report = match v {
            Value::String(s) => AnalysisReport { summary: s.trim().to_string(), ..Default::default() },
            Value::Object(map) => {
                let mut r = AnalysisReport::default();
                for (k, val) in map {
                    match k.trim() {
                        "summary" => r.summary = text_of(val),
                        "key_findings" | "findings" => r.key_findings = list_of(val),
                        "insights" => r.insights = list_of(val),
                        "recommendations" => r.recommendations = list_of(val),
                        "methodology" => r.methodology = text_of(val),
                        _ => {}
                    }
                }
                r
            }
            _ => return None,
        };
        if report.is_empty() { None } else { Some(report) }
    }
}

fn text_of(v: &Value) -> String {
    match v {
        Value::Null => String::new(),
        Value::String(s) => s.trim().to_string(),
        Value::Array(items) => items.iter().map(text_of).filter(|s| !s.is_empty()).collect::<Vec<_>>().join(" "),
        other => other.to_string(),
    }
}

fn list_of(v: &Value) -> Vec<String> {
    match v {
        Value::Null => Vec::new(),
        Value::Array(items) => items.iter().map(text_of).filter(|s| !s.is_empty()).collect(),
        other => {
            let s = text_of(other);
            if s.is_empty() { Vec::new() } else { vec![s] }
        }
    }
}

/// Decides whether the user's question asks for analysis.
pub trait AnalysisIntent: Send + Sync {
    fn wants_analysis(&self, user_input: &str) -> bool;
}

/// Case-insensitive keyword match.
#[derive(Debug, Clone)]
pub struct KeywordIntent {
    keywords: Vec<String>,
}

impl Default for KeywordIntent {
    fn default() -> Self {
        Self::new(DEFAULT_ANALYSIS_KEYWORDS.iter().map(|s| s.to_string()))
    }
}

impl KeywordIntent {
    pub fn new<I: IntoIterator<Item = String>>(keywords: I) -> Self {
        Self { keywords: keywords.into_iter().map(|k| k.to_lowercase()).filter(|k| !k.is_empty()).collect() }
    }
}

impl AnalysisIntent for KeywordIntent {
    fn wants_analysis(&self, user_input: &str) -> bool {
        let lower = user_input.to_lowercase();
        self.keywords.iter().any(|k| lower.contains(k.as_str()))
    }
}

#[derive(Debug, Clone, PartialEq)]
struct ColumnStats {
    name: String,
    count: usize,
    mean: f64,
    min: f64,
    max: f64,
    std: f64,
    first: f64,
    last: f64,
}

// beyond ±5% first-to-last counts as a trend
const TREND_THRESHOLD_PCT: f64 = 5.0;

fn numeric(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().trim_end_matches('%').parse::<f64>().ok(),
        _ => None,
    }
}

fn is_missing(v: &Value) -> bool {
    match v {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        _ => false,
    }
}

fn is_identifier_column(name: &str) -> bool {
    let n = name.to_ascii_lowercase();
    n == "id" || n.ends_with("_id")
}

fn column_stats(result: &QueryResult, idx: usize, name: &str) -> Option<ColumnStats> {
    let mut values = Vec::new();
    for v in result.column_values(idx) {
        if is_missing(v) { continue; }
        values.push(numeric(v)?);
    }
    if values.is_empty() {
        return None;
    }
    let count = values.len();
    let mean = values.iter().sum::<f64>() / count as f64;
    let min = values.iter().cloned().fold(f64::INFINITY, f64::min);
    let max = values.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / count as f64;
    Some(ColumnStats { name: name.to_string(), count, mean, min, max, std: var.sqrt(), first: values[0], last: values[count - 1] })
}

fn trend(s: &ColumnStats) -> Option<(&'static str, f64)> {
    if s.count < 2 || s.first == 0.0 {
        return None;
    }
    let pct = (s.last - s.first) / s.first.abs() * 100.0;
    let dir = if pct > TREND_THRESHOLD_PCT {
        "upward"
    } else if pct < -TREND_THRESHOLD_PCT {
        "downward"
    } else {
        "stable"
    };
    Some((dir, pct))
}

/// Report computed from the executed result: counts, numeric statistics,
/// first-to-last trends and completeness.
pub fn data_driven_report(result: &QueryResult, user_input: &str, sql: &str) -> AnalysisReport {
    if result.is_empty() {
        return empty_data_report(user_input, sql);
    }
    let names = result.dedup_columns();
    let mut stats = Vec::new();
    let mut categorical = 0usize;
    for (i, name) in names.iter().enumerate() {
        match column_stats(result, i, name) {
            Some(s) if !is_identifier_column(name) => stats.push(s),
            Some(_) => {}
            None => categorical += 1,
        }
    }
    let total_cells = result.len() * names.len().max(1);
    let missing: usize = (0..names.len()).map(|i| result.column_values(i).filter(|v| is_missing(v)).count()).sum();
    let completeness = if total_cells == 0 { 100.0 } else { (total_cells - missing) as f64 / total_cells as f64 * 100.0 };

    let mut key_findings = vec![format!(
        "The result contains {} record(s) across {} column(s): {} numeric, {} categorical.",
        result.len(),
        names.len(),
        stats.len(),
        categorical
    )];
    for s in stats.iter().take(5) {
        key_findings.push(format!(
            "{}: mean {:.2}, range {:.2} to {:.2}, standard deviation {:.2}.",
            s.name, s.mean, s.min, s.max, s.std
        ));
    }
    let trends: Vec<(&ColumnStats, &'static str, f64)> =
        stats.iter().filter_map(|s| trend(s).map(|(d, p)| (s, d, p))).collect();
    for (s, dir, pct) in trends.iter().filter(|(_, d, _)| *d != "stable").take(3) {
        key_findings.push(format!("{} shows a {} trend ({:+.1}% from first to last record).", s.name, dir, pct));
    }
    key_findings.push(format!("Data completeness is {:.1}%.", completeness));

    let mut insights = Vec::new();
    for s in &stats {
        if s.mean != 0.0 && s.std / s.mean.abs() > 1.0 {
            insights.push(format!("{} varies widely relative to its mean; a few records dominate the total.", s.name));
        }
    }
    for (s, dir, _) in &trends {
        if *dir == "upward" {
            insights.push(format!("{} is rising over the returned records.", s.name));
        } else if *dir == "downward" {
            insights.push(format!("{} is falling over the returned records.", s.name));
        }
    }
    if insights.is_empty() {
        insights.push("No strong variation or trend stands out in the returned data.".to_string());
    }

    let mut recommendations = Vec::new();
    if completeness < 90.0 {
        recommendations.push("Investigate missing values before drawing conclusions from this data.".to_string());
    }
    if trends.iter().any(|(_, d, _)| *d != "stable") {
        recommendations.push("Review the drivers behind the detected trends over a longer period.".to_string());
    }
    if stats.is_empty() {
        recommendations.push("Add numeric measures to the query to enable quantitative analysis.".to_string());
    }
    if recommendations.is_empty() {
        recommendations.push("Keep monitoring these figures and compare them against previous periods.".to_string());
    }

    debug!(target: "chatsql::analysis", "data-driven report: rows={} numeric={} completeness={:.1}", result.len(), stats.len(), completeness);
    AnalysisReport {
        summary: format!(
            "Analysis of {} record(s) and {} field(s) returned for '{}'.",
            result.len(),
            names.len(),
            user_input.trim()
        ),
        key_findings,
        insights,
        recommendations,
        methodology: format!(
            "Descriptive statistics (mean, min, max, standard deviation) over {} record(s), first-to-last trend detection with a {:.0}% threshold and a completeness check.",
            result.len(),
            TREND_THRESHOLD_PCT
        ),
    }
}

/// Report for a query that ran fine but matched nothing.
pub fn empty_data_report(user_input: &str, sql: &str) -> AnalysisReport {
    AnalysisReport {
        summary: format!(
            "The query for '{}' executed successfully but returned no data; the filter conditions may be too strict or the data may not exist.",
            user_input.trim()
        ),
        key_findings: vec!["The query returned 0 rows.".to_string()],
        insights: vec!["An empty result usually points to filter values (dates, codes, statuses) that do not match stored data.".to_string()],
        recommendations: vec![
            "Check the date range and filter values used in the query.".to_string(),
            "Relax one condition at a time to find which one excludes all rows.".to_string(),
        ],
        methodology: format!("Executed: {}", sql.trim()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn lenient_report_parsing() {
        let r = AnalysisReport::from_value(&json!("just a summary")).unwrap();
        assert_eq!(r.summary, "just a summary");
        let r = AnalysisReport::from_value(&json!({
            "summary": "S",
            " key_findings ": "one finding",
            "insights": ["a", "", 3],
            "recommendations": null,
            "extra": 1
        }))
        .unwrap();
        assert_eq!(r.key_findings, vec!["one finding"]);
        assert_eq!(r.insights, vec!["a", "3"]);
        assert!(r.recommendations.is_empty());
        assert!(AnalysisReport::from_value(&json!({})).is_none());
        assert!(AnalysisReport::from_value(&json!(42)).is_none());
    }

    #[test]
    fn keyword_intent() {
        let k = KeywordIntent::default();
        assert!(k.wants_analysis("请分析今年的逾期率"));
        assert!(k.wants_analysis("Give me a Root Cause report"));
        assert!(!k.wants_analysis("list all customers"));
        let custom = KeywordIntent::new(vec!["deep dive".to_string()]);
        assert!(custom.wants_analysis("a Deep Dive please"));
        assert!(!custom.wants_analysis("analysis"));
    }

    #[test]
    fn data_driven_report_stats_and_trends() {
        let r = QueryResult::new(
            vec!["id".into(), "month".into(), "amount".into(), "note".into()],
            vec![
                vec![json!(1), json!("2025-01"), json!(100.0), json!("a")],
                vec![json!(2), json!("2025-02"), json!(150.0), Value::Null],
                vec![json!(3), json!("2025-03"), json!("200"), json!("c")],
            ],
        );
        let rep = data_driven_report(&r, "analyze amount", "SELECT ...");
        assert!(rep.summary.contains("3 record(s)"));
        assert!(rep.key_findings.iter().any(|f| f.starts_with("amount: mean 150.00")));
        assert!(rep.key_findings.iter().any(|f| f.contains("upward trend (+100.0%")));
        assert!(!rep.key_findings.iter().any(|f| f.starts_with("id:")));
        assert!(rep.key_findings.iter().any(|f| f.contains("completeness is 91.7%")));
    }

    #[test]
    fn empty_result_report() {
        let rep = data_driven_report(&QueryResult::empty(["a"]), "q", "SELECT 1");
        assert!(rep.summary.contains("returned no data"));
        assert_eq!(rep.methodology, "Executed: SELECT 1");
    }
}
