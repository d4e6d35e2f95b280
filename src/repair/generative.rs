use std::sync::Arc;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, warn};

use crate::catalog::SchemaCatalog;
use crate::extract::extract_aliases;
use crate::repair::{FixMethod, RepairCandidate, RepairStrategy};
use crate::sql_text::strip_sql_comments;
use crate::validate::ValidationIssue;

/// External text generator (typically a language model endpoint).
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, prompt: &str) -> anyhow::Result<String>;
}

/// Asks a [`TextGenerator`] to fix the statement given the validation errors.
pub struct GenerativeRepair {
    generator: Arc<dyn TextGenerator>,
}

impl GenerativeRepair {
    pub fn new(generator: Arc<dyn TextGenerator>) -> Self {
        Self { generator }
    }
}

#[async_trait]
impl RepairStrategy for GenerativeRepair {
    fn method(&self) -> FixMethod { FixMethod::Generative }

    async fn attempt(&self, sql: &str, issues: &[ValidationIssue], catalog: &SchemaCatalog) -> Option<RepairCandidate> {
        let prompt = build_fix_prompt(sql, issues, catalog);
        let reply = match self.generator.generate(&prompt).await {
            Ok(r) => r,
            Err(e) => {
                warn!(target: "chatsql::repair", "generator failed: {:#}", e);
                return None;
            }
        };
        let parsed = parse_fix_response(&reply);
        if parsed.is_none() {
            debug!(target: "chatsql::repair", "no SQL found in generator reply ({} chars)", reply.len());
        }
        parsed
    }
}

/// Prompt listing the statement, its errors and the schema of the tables it uses.
/// Comments are dropped from the statement text.
pub fn build_fix_prompt(sql: &str, issues: &[ValidationIssue], catalog: &SchemaCatalog) -> String {
    let errors = issues.iter().map(|i| format!("- {}", i)).collect::<Vec<_>>().join("\n");
    let mut schema = String::new();
    let mut seen: Vec<String> = Vec::new();
    for (alias, table) in extract_aliases(sql).table_aliases() {
        let Some(cols) = catalog.columns(table) else { continue };
        let key = table.to_lowercase();
        if seen.contains(&key) {
            continue;
        }
        seen.push(key);
        schema.push_str(&format!("{} (alias: {}):\n", table, alias));
        for c in cols {
            let key_info = if c.key { " (KEY)" } else { "" };
            let null_info = if c.nullable { " (NULL)" } else { " (NOT NULL)" };
            schema.push_str(&format!("  - {}: {}{}{}\n", c.name, c.data_type, key_info, null_info));
        }
    }
    if schema.is_empty() {
        schema.push_str("(no schema information available)\n");
    }
    format!(
        "The following SQL query has validation errors that need to be fixed:\n\n\
         === ORIGINAL SQL ===\n{}\n\n\
         === VALIDATION ERRORS ===\n{}\n\n\
         === TABLE SCHEMA ===\n{}\n\
         === INSTRUCTIONS ===\n\
         Please fix the SQL query by correcting the field references based on the validation errors above.\n\
         Each error message includes a suggestion for the correct field reference.\n\n\
         === RESPONSE FORMAT ===\n\
         Please provide your response in JSON format:\n\
         {{\n    \"fixed_sql\": \"The corrected SQL query\",\n    \"changes_made\": [\"List of specific changes made\"],\n    \"explanation\": \"Brief explanation of the fixes applied\"\n}}\n\n\
         Focus on correcting the field references while maintaining the original query logic and structure.\n",
        strip_sql_comments(sql).trim(), errors, schema
    )
}

static SQL_FENCE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?is)```sql\s*(.*?)```").expect("valid regex"));
static FIXED_SQL_FIELD: Lazy<Regex> = Lazy::new(|| Regex::new(r#"(?s)"fixed_sql"\s*:\s*"((?:[^"\\]|\\.)*)""#).expect("valid regex"));
static JSON_OBJECT: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)\{.*\}").expect("valid regex"));

/// Pull the fixed statement out of a generator reply: JSON `fixed_sql`, then a
/// fenced `sql` block, then an inline `"fixed_sql": "..."` fragment.
pub fn parse_fix_response(reply: &str) -> Option<RepairCandidate> {
    if let Some(m) = JSON_OBJECT.find(reply) {
        if let Ok(v) = serde_json::from_str::<serde_json::Value>(m.as_str()) {
            if let Some(sql) = v.get("fixed_sql").and_then(|s| s.as_str()).map(str::trim).filter(|s| !s.is_empty()) {
                let mut changes: Vec<String> = v
                    .get("changes_made")
                    .and_then(|c| c.as_array())
                    .map(|a| a.iter().filter_map(|x| x.as_str().map(|s| s.to_string())).collect())
                    .unwrap_or_default();
                if changes.is_empty() {
                    if let Some(expl) = v.get("explanation").and_then(|e| e.as_str()).filter(|e| !e.trim().is_empty()) {
                        changes.push(expl.trim().to_string());
                    }
                }
                return Some(candidate(sql, changes));
            }
        }
    }
    if let Some(c) = SQL_FENCE.captures(reply) {
        let sql = c.get(1).map(|m| m.as_str().trim()).unwrap_or("");
        if !sql.is_empty() {
            return Some(candidate(sql, Vec::new()));
        }
    }
    if let Some(c) = FIXED_SQL_FIELD.captures(reply) {
        let raw = c.get(1).map(|m| m.as_str()).unwrap_or("");
        let sql = serde_json::from_str::<String>(&format!("\"{}\"", raw)).unwrap_or_else(|_| raw.replace("\\n", "\n"));
        if !sql.trim().is_empty() {
            return Some(candidate(sql.trim(), Vec::new()));
        }
    }
    None
}

fn candidate(sql: &str, mut changes: Vec<String>) -> RepairCandidate {
    if changes.is_empty() {
        changes.push("SQL regenerated from validation errors".to_string());
    }
    RepairCandidate { sql: sql.trim_end_matches(';').trim().to_string(), changes }
}
