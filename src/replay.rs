//! Replaying a recorded model turn against canned collaborators.
//!
//! A fixture is a JSON document holding the schema, the results the database
//! would return for specific statements, and the model turn itself:
//!
//! ```json
//! {
//!   "database": "sales",
//!   "tables": {"orders": [{"table": "orders", "name": "id", "type": "bigint"}]},
//!   "results": {"SELECT id FROM orders o": {"columns": ["id"], "rows": [[1]]}},
//!   "default": {"error": "Table 'sales.x' doesn't exist"},
//!   "model_text": "{\"sql\": \"SELECT o.id FROM orders o\"}",
//!   "user_input": "list order ids"
//! }
//! ```

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::catalog::{CatalogCache, ColumnMeta, MemoryIntrospector};
use crate::config::PipelineConfig;
use crate::pipeline::{QueryExecutor, RenderOutcome, ResponsePipeline};
use crate::result::QueryResult;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CannedResponse {
    Failure { error: String },
    Rows(QueryResult),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReplayFixture {
    #[serde(default)]
    pub database: Option<String>,
    #[serde(default)]
    pub tables: BTreeMap<String, Vec<ColumnMeta>>,
    /// Keyed by statement text; whitespace differences are ignored on lookup.
    #[serde(default)]
    pub results: BTreeMap<String, CannedResponse>,
    #[serde(default)]
    pub default: Option<CannedResponse>,
    #[serde(default)]
    pub model_text: String,
    #[serde(default)]
    pub user_input: String,
}

impl ReplayFixture {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path).with_context(|| format!("reading fixture {}", path.display()))?;
        serde_json::from_str(&text).with_context(|| format!("parsing fixture {}", path.display()))
    }

    pub fn executor(&self) -> FixtureExecutor {
        FixtureExecutor {
            results: self.results.iter().map(|(k, v)| (squash_ws(k), v.clone())).collect(),
            default: self.default.clone(),
        }
    }

    pub fn introspector(&self) -> MemoryIntrospector {
        MemoryIntrospector { tables: self.tables.clone() }
    }

    /// Run the recorded turn through a pipeline built from `config`.
    pub async fn replay(&self, mut config: PipelineConfig) -> RenderOutcome {
        if let Some(db) = &self.database {
            config.database = db.clone();
        }
        let cache = CatalogCache::new(Arc::new(self.introspector()));
        let pipeline = ResponsePipeline::new(config).with_catalog_cache(Arc::new(cache));
        let executor = self.executor();
        pipeline.respond(&self.model_text, &self.user_input, &executor).await
    }
}

/// Answers statements from a fixture's canned results.
pub struct FixtureExecutor {
    results: BTreeMap<String, CannedResponse>,
    default: Option<CannedResponse>,
}

#[async_trait]
impl QueryExecutor for FixtureExecutor {
    async fn execute(&self, sql: &str) -> anyhow::Result<QueryResult> {
        let key = squash_ws(sql.trim().trim_end_matches(';'));
        let hit = self.results.get(&key).or(self.default.as_ref());
        debug!(target: "chatsql::replay", matched = self.results.contains_key(&key), "replaying {}", key);
        match hit {
            Some(CannedResponse::Rows(r)) => Ok(r.clone()),
            Some(CannedResponse::Failure { error }) => Err(anyhow::anyhow!("{}", error)),
            None => anyhow::bail!("no recorded result for statement: {}", key),
        }
    }
}

fn squash_ws(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canned_responses_deserialize_both_shapes() {
        let rows: CannedResponse = serde_json::from_str(r#"{"columns": ["a"], "rows": [[1]]}"#).unwrap();
        assert!(matches!(rows, CannedResponse::Rows(ref r) if r.len() == 1));
        let fail: CannedResponse = serde_json::from_str(r#"{"error": "boom"}"#).unwrap();
        assert_eq!(fail, CannedResponse::Failure { error: "boom".into() });
    }

    #[tokio::test]
    async fn lookup_ignores_whitespace_and_semicolon() {
        let mut fx = ReplayFixture::default();
        fx.results.insert("SELECT a\n  FROM t".into(), CannedResponse::Rows(QueryResult::empty(["a"])));
        let exec = fx.executor();
        assert!(exec.execute("SELECT a FROM t;").await.is_ok());
        let err = exec.execute("SELECT b FROM t").await.unwrap_err();
        assert!(err.to_string().contains("no recorded result"));
    }
}
