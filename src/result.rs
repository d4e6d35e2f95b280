//! Tabular query results as handed back by the execution collaborator.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    /// Column names in result order; duplicates are allowed.
    pub columns: Vec<String>,
    #[serde(default)]
    pub rows: Vec<Vec<Value>>,
}

impl QueryResult {
    pub fn new(columns: Vec<String>, rows: Vec<Vec<Value>>) -> Self {
        Self { columns, rows }
    }

    pub fn empty<S: Into<String>>(columns: impl IntoIterator<Item = S>) -> Self {
        Self { columns: columns.into_iter().map(Into::into).collect(), rows: Vec::new() }
    }

    pub fn len(&self) -> usize { self.rows.len() }
    pub fn is_empty(&self) -> bool { self.rows.is_empty() }
    pub fn column_count(&self) -> usize { self.columns.len() }

    /// Unique column names: the second `x` becomes `x_1`, the third `x_2`, skipping
    /// any name already present in the result.
    pub fn dedup_columns(&self) -> Vec<String> {
        let originals: HashSet<&str> = self.columns.iter().map(|c| c.as_str()).collect();
        let mut emitted: HashSet<String> = HashSet::new();
        let mut out = Vec::with_capacity(self.columns.len());
        for name in &self.columns {
            if emitted.insert(name.clone()) {
                out.push(name.clone());
                continue;
            }
            let mut n = 1usize;
            let unique = loop {
                let candidate = format!("{}_{}", name, n);
                if !originals.contains(candidate.as_str()) && !emitted.contains(&candidate) {
                    break candidate;
                }
                n += 1;
            };
            emitted.insert(unique.clone());
            out.push(unique);
        }
        out
    }

    pub fn has_duplicate_columns(&self) -> bool {
        let mut seen = HashSet::new();
        self.columns.iter().any(|c| !seen.insert(c.as_str()))
    }

    /// Row objects keyed by the de-duplicated column names.
    pub fn to_records(&self) -> Vec<Map<String, Value>> {
        let names = self.dedup_columns();
        self.rows
            .iter()
            .map(|row| {
                let mut m = Map::with_capacity(names.len());
                for (i, name) in names.iter().enumerate() {
                    m.insert(name.clone(), row.get(i).cloned().unwrap_or(Value::Null));
                }
                m
            })
            .collect()
    }

    /// Values of column `idx`, one per row (missing cells read as null).
    pub fn column_values(&self, idx: usize) -> impl Iterator<Item = &Value> {
        self.rows.iter().map(move |r| r.get(idx).unwrap_or(&Value::Null))
    }

    /// Build from row objects, taking the column order of the first record.
    pub fn from_records(records: &[Map<String, Value>]) -> Self {
        let columns: Vec<String> = records.first().map(|r| r.keys().cloned().collect()).unwrap_or_default();
        let rows = records
            .iter()
            .map(|r| columns.iter().map(|c| r.get(c).cloned().unwrap_or(Value::Null)).collect())
            .collect();
        Self { columns, rows }
    }
}

#[cfg(feature = "dataframe")]
mod dataframe {
    use super::QueryResult;
    use polars::prelude::*;
    use serde_json::Value;

    impl QueryResult {
        pub fn from_dataframe(df: &DataFrame) -> anyhow::Result<Self> {
            let columns: Vec<String> = df.get_column_names().iter().map(|s| s.to_string()).collect();
            let mut rows = Vec::with_capacity(df.height());
            for row_idx in 0..df.height() {
                let mut row = Vec::with_capacity(columns.len());
                for c in &columns {
                    let col = df.column(c)?;
                    let v = match col.get(row_idx)? {
                        AnyValue::Int64(v) => serde_json::json!(v),
                        AnyValue::Int32(v) => serde_json::json!(v as i64),
                        AnyValue::Int16(v) => serde_json::json!(v as i64),
                        AnyValue::Int8(v) => serde_json::json!(v as i64),
                        AnyValue::UInt64(v) => serde_json::json!(v),
                        AnyValue::UInt32(v) => serde_json::json!(v as u64),
                        AnyValue::Float64(v) => serde_json::json!(v),
                        AnyValue::Float32(v) => serde_json::json!(v as f64),
                        AnyValue::Boolean(v) => serde_json::json!(v),
                        AnyValue::String(v) => serde_json::json!(v),
                        AnyValue::StringOwned(v) => serde_json::json!(v.as_str()),
                        AnyValue::Null => Value::Null,
                        other => Value::String(other.to_string()),
                    };
                    row.push(v);
                }
                rows.push(row);
            }
            Ok(QueryResult { columns, rows })
        }
    }

    impl TryFrom<&DataFrame> for QueryResult {
        type Error = anyhow::Error;

        fn try_from(df: &DataFrame) -> anyhow::Result<Self> {
            QueryResult::from_dataframe(df)
        }
    }
}
