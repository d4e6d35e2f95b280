use super::*;
use std::sync::atomic::{AtomicUsize, Ordering};

struct FlakyIntrospector {
    calls: AtomicUsize,
    fail_tables: bool,
}

#[async_trait]
impl SchemaIntrospector for FlakyIntrospector {
    async fn list_tables(&self, _database: &str) -> anyhow::Result<Vec<String>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_tables {
            anyhow::bail!("connection refused");
        }
        Ok(vec!["orders".into(), "credit".into(), "broken".into()])
    }

    async fn list_columns(&self, _database: &str, table: &str) -> anyhow::Result<Vec<ColumnMeta>> {
        match table {
            "orders" => Ok(vec![
                ColumnMeta::new("orders", "id", "bigint").key(),
                ColumnMeta::new("orders", "total_amount", "decimal"),
                ColumnMeta::new("orders", "credit_id", "bigint"),
            ]),
            "credit" => Ok(vec![
                ColumnMeta::new("credit", "id", "bigint").key(),
                ColumnMeta::new("credit", "strategy", "varchar"),
            ]),
            _ => anyhow::bail!("permission denied on {}", table),
        }
    }
}

fn flaky(fail_tables: bool) -> FlakyIntrospector {
    FlakyIntrospector { calls: AtomicUsize::new(0), fail_tables }
}

#[tokio::test]
async fn load_skips_failing_tables() {
    let cat = SchemaCatalog::load(&flaky(false), "sales").await.unwrap();
    assert_eq!(cat.len(), 2);
    assert!(!cat.has_table("broken"));
    assert!(cat.has_column("orders", "total_amount"));
    assert!(cat.has_column("ORDERS", "Total_Amount"));
    assert_eq!(cat.tables_with_column("strategy"), vec!["credit".to_string()]);
    assert_eq!(cat.tables_with_column("id"), vec!["credit".to_string(), "orders".to_string()]);
    assert!(cat.columns_of("nope").is_empty());
}

#[tokio::test]
async fn load_fails_without_table_list() {
    let err = SchemaCatalog::load(&flaky(true), "sales").await.unwrap_err();
    assert_eq!(err.code_str(), "schema_load_error");
    assert!(err.to_string().contains("connection refused"));
}

#[test]
fn resolve_qualified_and_bare_names() {
    let cat = SchemaCatalog::new("sales")
        .with_table("sales.orders", ["id", "total_amount"])
        .with_table("`Credit`", ["id", "strategy"]);
    assert_eq!(cat.resolve_table("orders").as_deref(), Some("sales.orders"));
    assert_eq!(cat.resolve_table("Sales.Orders").as_deref(), Some("sales.orders"));
    assert_eq!(cat.resolve_table("other.credit").as_deref(), Some("credit"));
    assert!(cat.resolve_table("missing_table").is_none());
}

#[test]
fn ambiguous_last_segment_does_not_resolve() {
    let cat = SchemaCatalog::new("x")
        .with_table("a.orders", ["id"])
        .with_table("b.orders", ["id"]);
    assert!(cat.resolve_table("orders").is_none());
    assert!(cat.resolve_table("a.orders").is_some());
}

#[test]
fn replacing_a_table_updates_reverse_index() {
    let mut cat = SchemaCatalog::new("x").with_table("t", ["a", "b"]);
    cat.insert_table("t", vec![ColumnMeta::new("t", "a", "int")]);
    assert!(cat.tables_with_column("b").is_empty());
    assert_eq!(cat.tables_with_column("a"), vec!["t".to_string()]);
}

#[tokio::test]
async fn cache_loads_once_until_invalidated() {
    let intro = Arc::new(flaky(false));
    let cache = CatalogCache::new(intro.clone());
    let a = cache.get_or_load("sales").await.unwrap();
    let b = cache.get_or_load("sales").await.unwrap();
    assert!(Arc::ptr_eq(&a, &b));
    assert_eq!(intro.calls.load(Ordering::SeqCst), 1);
    cache.invalidate("sales");
    let _ = cache.get_or_load("sales").await.unwrap();
    assert_eq!(intro.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn clear_drops_every_database() {
    let intro = Arc::new(flaky(false));
    let cache = CatalogCache::new(intro.clone());
    cache.get_or_load("sales").await.unwrap();
    cache.get_or_load("archive").await.unwrap();
    assert_eq!(intro.calls.load(Ordering::SeqCst), 2);
    cache.clear();
    assert!(cache.cached("sales").is_none());
    assert!(cache.cached("archive").is_none());
    cache.get_or_load("sales").await.unwrap();
    assert_eq!(intro.calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn concurrent_first_loads_settle() {
    let cache = Arc::new(CatalogCache::new(Arc::new(flaky(false))));
    let tasks = (0..4).map(|_| {
        let c = cache.clone();
        tokio::spawn(async move { c.get_or_load("sales").await.map(|cat| cat.len()) })
    });
    for r in futures::future::join_all(tasks).await {
        assert_eq!(r.unwrap().unwrap(), 2);
    }
    assert!(cache.cached("sales").is_some());
}

#[tokio::test]
async fn memory_introspector_round_trips_catalog() {
    let cat = SchemaCatalog::new("m").with_table("orders", ["id"]);
    let intro = MemoryIntrospector::from_catalog(&cat);
    let loaded = SchemaCatalog::load(&intro, "m").await.unwrap();
    assert!(loaded.has_column("orders", "id"));
}
