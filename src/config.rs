//! Pipeline configuration.
//! Defaults are usable as-is; `from_env` overlays `CHATSQL_*` variables.

use std::time::Duration;

use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RenderMode {
    #[default]
    Simple,
    Enhanced,
}

impl RenderMode {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "simple" | "markdown" => Some(RenderMode::Simple),
            "enhanced" | "chart" | "chart-view" => Some(RenderMode::Enhanced),
            _ => None,
        }
    }
}

/// When prior-year date literals are moved to the current year.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum YearFix {
    Off,
    /// Only when the user's question refers to the current year ("this year", "今年").
    #[default]
    WhenRelative,
    Always,
}

impl YearFix {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "off" | "false" | "0" | "never" => Some(YearFix::Off),
            "relative" | "when_relative" | "auto" => Some(YearFix::WhenRelative),
            "always" | "on" | "true" | "1" => Some(YearFix::Always),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Dialect {
    #[default]
    MySql,
    Postgres,
}

impl Dialect {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mysql" | "mariadb" => Some(Dialect::MySql),
            "postgres" | "postgresql" | "pg" => Some(Dialect::Postgres),
            _ => None,
        }
    }

    pub fn identifier_quote(&self) -> char {
        match self {
            Dialect::MySql => '`',
            Dialect::Postgres => '"',
        }
    }
}

pub const DEFAULT_FUNCTION_PREFIXES: &[&str] = &[
    "DATE_FORMAT", "DATE_SUB", "DATE_ADD", "YEAR", "MONTH", "DAY", "DATE", "INTERVAL",
];

pub const DEFAULT_ANALYSIS_KEYWORDS: &[&str] = &[
    "分析", "报告", "总结", "根因", "原因分析", "趋势", "analysis", "analyze", "analyse", "report",
    "summary", "summarize", "root cause", "insight",
];

pub const DEFAULT_RELATIVE_YEAR_PHRASES: &[&str] = &[
    "今年", "本年", "当年", "this year", "current year",
];

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Logical database whose schema is used for validation.
    pub database: String,
    pub render_mode: RenderMode,
    pub validation_enabled: bool,
    pub max_rows: usize,
    pub max_payload_bytes: usize,
    pub exec_timeout: Option<Duration>,
    pub year_fix: YearFix,
    pub dialect: Dialect,
    /// Prefixes that look like `alias.column` but are function names.
    pub function_prefixes: Vec<String>,
    pub analysis_keywords: Vec<String>,
    pub relative_year_phrases: Vec<String>,
    /// Overrides the clock for year repairs.
    pub current_year: Option<i32>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            database: "default".to_string(),
            render_mode: RenderMode::Simple,
            validation_enabled: true,
            max_rows: 200,
            max_payload_bytes: 4 * 1024 * 1024,
            exec_timeout: None,
            year_fix: YearFix::WhenRelative,
            dialect: Dialect::MySql,
            function_prefixes: DEFAULT_FUNCTION_PREFIXES.iter().map(|s| s.to_string()).collect(),
            analysis_keywords: DEFAULT_ANALYSIS_KEYWORDS.iter().map(|s| s.to_string()).collect(),
            relative_year_phrases: DEFAULT_RELATIVE_YEAR_PHRASES.iter().map(|s| s.to_string()).collect(),
            current_year: None,
        }
    }
}

impl PipelineConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|k| std::env::var(k).ok())
    }

    /// Build from an arbitrary variable source; unparsable values keep the default.
    pub fn from_lookup<F: Fn(&str) -> Option<String>>(get: F) -> Self {
        let mut cfg = Self::default();
        if let Some(db) = get("CHATSQL_DATABASE").filter(|s| !s.trim().is_empty()) {
            cfg.database = db.trim().to_string();
        }
        if let Some(v) = get("CHATSQL_RENDER_MODE") {
            match RenderMode::parse(&v) {
                Some(m) => cfg.render_mode = m,
                None => warn!(target: "chatsql::config", "ignoring CHATSQL_RENDER_MODE='{}'", v),
            }
        }
        if let Some(v) = get("CHATSQL_VALIDATION") {
            match v.trim().to_ascii_lowercase().as_str() {
                "on" | "true" | "1" | "yes" => cfg.validation_enabled = true,
                "off" | "false" | "0" | "no" => cfg.validation_enabled = false,
                _ => warn!(target: "chatsql::config", "ignoring CHATSQL_VALIDATION='{}'", v),
            }
        }
        cfg.max_rows = parse_or_warn(&get, "CHATSQL_MAX_ROWS", cfg.max_rows);
        cfg.max_payload_bytes = parse_or_warn(&get, "CHATSQL_MAX_PAYLOAD_BYTES", cfg.max_payload_bytes);
        let timeout_ms: u64 = parse_or_warn(&get, "CHATSQL_EXEC_TIMEOUT_MS", 0);
        cfg.exec_timeout = if timeout_ms > 0 { Some(Duration::from_millis(timeout_ms)) } else { None };
        if let Some(v) = get("CHATSQL_YEAR_FIX") {
            match YearFix::parse(&v) {
                Some(y) => cfg.year_fix = y,
                None => warn!(target: "chatsql::config", "ignoring CHATSQL_YEAR_FIX='{}'", v),
            }
        }
        if let Some(v) = get("CHATSQL_DIALECT") {
            match Dialect::parse(&v) {
                Some(d) => cfg.dialect = d,
                None => warn!(target: "chatsql::config", "ignoring CHATSQL_DIALECT='{}'", v),
            }
        }
        cfg
    }

    pub fn with_render_mode(mut self, mode: RenderMode) -> Self { self.render_mode = mode; self }
    pub fn with_database(mut self, db: impl Into<String>) -> Self { self.database = db.into(); self }
    pub fn with_current_year(mut self, year: i32) -> Self { self.current_year = Some(year); self }
    pub fn with_year_fix(mut self, fix: YearFix) -> Self { self.year_fix = fix; self }
    pub fn with_exec_timeout(mut self, t: Duration) -> Self { self.exec_timeout = Some(t); self }
}

fn parse_or_warn<T, F>(get: &F, key: &str, default: T) -> T
where
    T: std::str::FromStr + Copy,
    F: Fn(&str) -> Option<String>,
{
    match get(key) {
        None => default,
        Some(raw) => raw.trim().parse::<T>().unwrap_or_else(|_| {
            warn!(target: "chatsql::config", "ignoring {}='{}'", key, raw);
            default
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |k| map.get(k).cloned()
    }

    #[test]
    fn defaults() {
        let c = PipelineConfig::default();
        assert_eq!(c.render_mode, RenderMode::Simple);
        assert!(c.validation_enabled);
        assert_eq!(c.year_fix, YearFix::WhenRelative);
        assert!(c.function_prefixes.iter().any(|p| p == "DATE_FORMAT"));
        assert!(c.exec_timeout.is_none());
    }

    #[test]
    fn env_overrides() {
        let c = PipelineConfig::from_lookup(lookup(&[
            ("CHATSQL_RENDER_MODE", "enhanced"),
            ("CHATSQL_VALIDATION", "off"),
            ("CHATSQL_MAX_ROWS", "5"),
            ("CHATSQL_EXEC_TIMEOUT_MS", "1500"),
            ("CHATSQL_YEAR_FIX", "always"),
            ("CHATSQL_DIALECT", "postgres"),
            ("CHATSQL_DATABASE", "lending"),
        ]));
        assert_eq!(c.render_mode, RenderMode::Enhanced);
        assert!(!c.validation_enabled);
        assert_eq!(c.max_rows, 5);
        assert_eq!(c.exec_timeout, Some(Duration::from_millis(1500)));
        assert_eq!(c.year_fix, YearFix::Always);
        assert_eq!(c.dialect.identifier_quote(), '"');
        assert_eq!(c.database, "lending");
    }

    #[test]
    fn bad_values_keep_defaults() {
        let c = PipelineConfig::from_lookup(lookup(&[("CHATSQL_MAX_ROWS", "lots"), ("CHATSQL_RENDER_MODE", "fancy")]));
        assert_eq!(c.max_rows, 200);
        assert_eq!(c.render_mode, RenderMode::Simple);
    }
}
