//! Schema catalog: per-database table and column metadata with a reverse index
//! from column name to the tables that carry it.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{PipelineError, PipelineResult};
use crate::ident::{last_segment, normalize_qualified};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnMeta {
    #[serde(default)]
    pub table: String,
    pub name: String,
    #[serde(default, rename = "type")]
    pub data_type: String,
    #[serde(default = "default_nullable")]
    pub nullable: bool,
    #[serde(default)]
    pub key: bool,
}

fn default_nullable() -> bool { true }

impl ColumnMeta {
    pub fn new(table: impl Into<String>, name: impl Into<String>, data_type: impl Into<String>) -> Self {
        Self { table: table.into(), name: name.into(), data_type: data_type.into(), nullable: true, key: false }
    }

    pub fn key(mut self) -> Self { self.key = true; self.nullable = false; self }
}

/// Source of schema metadata for one logical database.
#[async_trait]
pub trait SchemaIntrospector: Send + Sync {
    async fn list_tables(&self, database: &str) -> anyhow::Result<Vec<String>>;
    async fn list_columns(&self, database: &str, table: &str) -> anyhow::Result<Vec<ColumnMeta>>;
}

/// Column lookups fold case; quoting is stripped before the fold.
pub(crate) fn fold(name: &str) -> String {
    normalize_qualified(name).to_lowercase()
}

#[derive(Debug, Clone, Default)]
pub struct SchemaCatalog {
    database: String,
    tables: BTreeMap<String, Vec<ColumnMeta>>,
    reverse: HashMap<String, BTreeSet<String>>,
}

impl SchemaCatalog {
    pub fn new(database: impl Into<String>) -> Self {
        Self { database: database.into(), tables: BTreeMap::new(), reverse: HashMap::new() }
    }

    /// Builder used by fixtures and tests.
    pub fn with_table<I, S>(mut self, table: &str, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let cols = columns.into_iter().map(|c| ColumnMeta::new(table, c, "")).collect();
        self.insert_table(table, cols);
        self
    }

    pub fn insert_table(&mut self, table: &str, mut columns: Vec<ColumnMeta>) {
        let key = fold(table);
        for c in columns.iter_mut() {
            if c.table.is_empty() { c.table = table.to_string(); }
            self.reverse.entry(fold(&c.name)).or_default().insert(key.clone());
        }
        if let Some(old) = self.tables.insert(key.clone(), columns) {
            // replaced table: drop stale reverse entries
            for c in old {
                let col = fold(&c.name);
                let still_there = self.tables.get(&key).map(|cs| cs.iter().any(|n| fold(&n.name) == col)).unwrap_or(false);
                if !still_there {
                    if let Some(set) = self.reverse.get_mut(&col) { set.remove(&key); }
                }
            }
        }
    }

    /// Enumerate tables, then columns per table. Per-table failures are skipped.
    pub async fn load(introspector: &dyn SchemaIntrospector, database: &str) -> PipelineResult<SchemaCatalog> {
        let tables = introspector
            .list_tables(database)
            .await
            .map_err(|e| PipelineError::schema_load(database, format!("{:#}", e)))?;
        let mut catalog = SchemaCatalog::new(database);
        let mut skipped = 0usize;
        for table in tables {
            match introspector.list_columns(database, &table).await {
                Ok(cols) => {
                    debug!(target: "chatsql::catalog", "loaded {}.{} ({} columns)", database, table, cols.len());
                    catalog.insert_table(&table, cols);
                }
                Err(e) => {
                    skipped += 1;
                    warn!(target: "chatsql::catalog", "skipping table {}.{}: {:#}", database, table, e);
                }
            }
        }
        info!(target: "chatsql::catalog", "schema loaded: database='{}' tables={} skipped={}", database, catalog.tables.len(), skipped);
        Ok(catalog)
    }

    pub fn database(&self) -> &str { &self.database }
    pub fn len(&self) -> usize { self.tables.len() }
    pub fn is_empty(&self) -> bool { self.tables.is_empty() }
    pub fn table_names(&self) -> impl Iterator<Item = &str> { self.tables.keys().map(|k| k.as_str()) }

    /// Catalog key for a table reference: exact, `<database>.<name>`, or a unique last-segment match.
    pub fn resolve_table(&self, name: &str) -> Option<String> {
        let key = fold(name);
        if self.tables.contains_key(&key) { return Some(key); }
        let with_db = format!("{}.{}", fold(&self.database), key);
        if self.tables.contains_key(&with_db) { return Some(with_db); }
        let last = last_segment(name).to_lowercase();
        let mut hits = self.tables.keys().filter(|k| last_segment(k).to_lowercase() == last);
        match (hits.next(), hits.next()) {
            (Some(only), None) => Some(only.clone()),
            _ => None,
        }
    }

    pub fn columns(&self, table: &str) -> Option<&[ColumnMeta]> {
        self.resolve_table(table).and_then(|k| self.tables.get(&k)).map(|v| v.as_slice())
    }

    /// Folded column names of a table; empty when the table is unknown.
    pub fn columns_of(&self, table: &str) -> BTreeSet<String> {
        self.columns(table)
            .map(|cols| cols.iter().map(|c| fold(&c.name)).collect())
            .unwrap_or_default()
    }

    pub fn has_table(&self, table: &str) -> bool {
        self.resolve_table(table).is_some()
    }

    pub fn has_column(&self, table: &str, column: &str) -> bool {
        let col = fold(column);
        self.columns(table).map(|cols| cols.iter().any(|c| fold(&c.name) == col)).unwrap_or(false)
    }

    /// Catalog keys of every table that has `column`, sorted.
    pub fn tables_with_column(&self, column: &str) -> Vec<String> {
        self.reverse.get(&fold(column)).map(|s| s.iter().cloned().collect()).unwrap_or_default()
    }
}

/// Per-database catalog cache owned by a session. Readers share `Arc`s; a racing
/// first load for the same database keeps whichever finishes last.
pub struct CatalogCache {
    introspector: Arc<dyn SchemaIntrospector>,
    entries: RwLock<HashMap<String, Arc<SchemaCatalog>>>,
}

impl CatalogCache {
    pub fn new(introspector: Arc<dyn SchemaIntrospector>) -> Self {
        Self { introspector, entries: RwLock::new(HashMap::new()) }
    }

    pub fn cached(&self, database: &str) -> Option<Arc<SchemaCatalog>> {
        self.entries.read().get(database).cloned()
    }

    pub async fn get_or_load(&self, database: &str) -> PipelineResult<Arc<SchemaCatalog>> {
        if let Some(hit) = self.cached(database) {
            return Ok(hit);
        }
        let loaded = Arc::new(SchemaCatalog::load(self.introspector.as_ref(), database).await?);
        self.entries.write().insert(database.to_string(), loaded.clone());
        Ok(loaded)
    }

    pub fn invalidate(&self, database: &str) {
        if self.entries.write().remove(database).is_some() {
            debug!(target: "chatsql::catalog", "invalidated schema cache for '{}'", database);
        }
    }

    pub fn clear(&self) {
        self.entries.write().clear();
        debug!(target: "chatsql::catalog", "cleared schema cache");
    }
}

/// Introspector over tables held in memory, e.g. from a JSON fixture.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MemoryIntrospector {
    pub tables: BTreeMap<String, Vec<ColumnMeta>>,
}

impl MemoryIntrospector {
    pub fn from_catalog(catalog: &SchemaCatalog) -> Self {
        Self { tables: catalog.tables.clone() }
    }
}

#[async_trait]
impl SchemaIntrospector for MemoryIntrospector {
    async fn list_tables(&self, _database: &str) -> anyhow::Result<Vec<String>> {
        Ok(self.tables.keys().cloned().collect())
    }

    async fn list_columns(&self, _database: &str, table: &str) -> anyhow::Result<Vec<ColumnMeta>> {
        self.tables
            .get(table)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("table '{}' not found", table))
    }
}

#[cfg(test)]
#[path = "catalog_tests.rs"]
mod catalog_tests;
