use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::json;

use chatsql::repair::{GenerativeRepair, TextGenerator};
use chatsql::{
    parse_model_output, rewrite, suggest, tprintln, validate, CatalogCache, FnExecutor, MemoryIntrospector,
    PipelineConfig, QueryResult, RenderMode, RepairEngine, ResponsePipeline, SchemaCatalog, Suggestion,
};

fn catalog() -> SchemaCatalog {
    SchemaCatalog::new("default")
        .with_table("orders", ["id", "total_amount", "credit_id", "created_at"])
        .with_table("credit", ["id", "strategy", "limit_amount"])
}

fn pipeline() -> ResponsePipeline {
    let cache = CatalogCache::new(Arc::new(MemoryIntrospector::from_catalog(&catalog())));
    ResponsePipeline::new(PipelineConfig::default().with_current_year(2025)).with_catalog_cache(Arc::new(cache))
}

#[test]
fn known_reference_is_valid() {
    let (ok, issues) = validate("SELECT b.total_amount FROM orders b", &catalog());
    assert!(ok);
    assert!(issues.is_empty());
}

#[test]
fn misplaced_column_is_suggested_and_rewritten() {
    let sql = "SELECT b.total_amount, b.strategy FROM orders b JOIN credit t1 ON b.credit_id = t1.id";
    let (ok, issues) = validate(sql, &catalog());
    assert!(!ok);
    assert_eq!(issues.len(), 1);
    assert_eq!(issues[0].suggestion.as_deref(), Some("t1.strategy"));

    let aliases = chatsql::extract_aliases(sql);
    assert_eq!(suggest("strategy", "b", &aliases, &catalog()), Suggestion::InStatement(vec!["t1.strategy".into()]));

    let fixed = rewrite(sql, &issues);
    assert_eq!(fixed, "SELECT b.total_amount, t1.strategy FROM orders b JOIN credit t1 ON b.credit_id = t1.id");
    assert!(validate(&fixed, &catalog()).0);
    assert_eq!(rewrite(&fixed, &[]), fixed);
}

#[tokio::test]
async fn repaired_failure_falls_back_to_original_result() {
    let p = pipeline();
    let exec = FnExecutor(|sql: String| async move {
        if sql.contains("t1.strategy") {
            anyhow::bail!("Unknown column 't1.strategy' in 'field list'")
        }
        Ok(QueryResult::new(vec!["total_amount".into(), "strategy".into()], vec![vec![json!(10), json!("legacy")]]))
    });
    let action = parse_model_output(
        r#"{"sql": "SELECT b.total_amount, b.strategy FROM orders b JOIN credit t1 ON b.credit_id = t1.id", "thoughts": "join credit"}"#,
        "orders with strategy",
    );
    let text = p.render(&action, &exec, RenderMode::Simple).await;
    tprintln!("{}", text);
    assert!(text.contains("| 10 | legacy |"));
    assert!(text.contains("auto-fix was abandoned"));
}

#[tokio::test]
async fn empty_result_with_summary() {
    let p = pipeline();
    let exec = FnExecutor(|_sql: String| async { Ok::<_, anyhow::Error>(QueryResult::empty(["id"])) });
    let action = parse_model_output(
        r#"{"sql": "SELECT o.id FROM orders o WHERE o.total_amount > 1e9", "analysis_report": {"summary": "X"}}"#,
        "big orders",
    );
    for mode in [RenderMode::Simple, RenderMode::Enhanced] {
        let text = p.render(&action, &exec, mode).await;
        assert!(text.contains("no matching data"), "{:?}: {}", mode, text);
        assert!(text.contains("X"));
    }
}

#[tokio::test]
async fn missing_table_failure_shows_sql_and_reason() {
    let p = pipeline();
    let exec = FnExecutor(|_sql: String| async {
        Err::<QueryResult, _>(anyhow::anyhow!("Table 'default.missing_table' doesn't exist"))
    });
    let action = parse_model_output("SELECT * FROM missing_table", "show me the missing table");
    for mode in [RenderMode::Simple, RenderMode::Enhanced] {
        let out = p.run(&action, &exec, mode).await;
        assert!(out.text.contains("SELECT * FROM missing_table"), "{:?}: {}", mode, out.text);
        assert!(out.text.contains("doesn't exist"));
        assert!(!out.succeeded());
    }
}

#[tokio::test]
async fn duplicate_columns_render_unique_headers() {
    let p = pipeline();
    let exec = FnExecutor(|_sql: String| async {
        Ok::<_, anyhow::Error>(QueryResult::new(
            vec!["id".into(), "id".into(), "id_1".into()],
            vec![vec![json!(1), json!(2), json!(3)]],
        ))
    });
    let action = parse_model_output("SELECT o.id, c.id, o.credit_id AS id_1 FROM orders o JOIN credit c ON o.credit_id = c.id", "");
    let text = p.render(&action, &exec, RenderMode::Simple).await;
    assert!(text.contains("| id | id_2 | id_1 |"), "{}", text);
}

struct ScriptedModel {
    reply: String,
    prompts: Mutex<usize>,
}

#[async_trait]
impl TextGenerator for ScriptedModel {
    async fn generate(&self, _prompt: &str) -> anyhow::Result<String> {
        *self.prompts.lock() += 1;
        Ok(self.reply.clone())
    }
}

#[tokio::test]
async fn generative_repair_runs_when_rules_cannot_fix() {
    let model = Arc::new(ScriptedModel {
        reply: r#"{"fixed_sql": "SELECT c.limit_amount FROM orders o JOIN credit c ON o.credit_id = c.id", "changes_made": ["o.credit_limit -> c.limit_amount"]}"#.into(),
        prompts: Mutex::new(0),
    });
    let engine = RepairEngine::default().with_strategy(Box::new(GenerativeRepair::new(model.clone())));
    let p = pipeline().with_repair_engine(engine);
    let exec = FnExecutor(|sql: String| async move {
        Ok::<_, anyhow::Error>(QueryResult::new(vec!["limit_amount".into()], vec![vec![json!(sql.len())]]))
    });
    let action = parse_model_output("SELECT o.credit_limit FROM orders o JOIN credit c ON o.credit_id = c.id", "credit limits");
    let out = p.run(&action, &exec, RenderMode::Simple).await;
    assert_eq!(*model.prompts.lock(), 1);
    assert_eq!(
        out.sql_executed.as_deref(),
        Some("SELECT c.limit_amount FROM orders o JOIN credit c ON o.credit_id = c.id")
    );
    assert_eq!(out.fix.unwrap().method, chatsql::FixMethod::Generative);
}
