use super::*;
use crate::validate::validate;
use parking_lot::Mutex;
use std::sync::Arc;

fn catalog() -> SchemaCatalog {
    SchemaCatalog::new("sales")
        .with_table("orders", ["id", "total_amount", "credit_id"])
        .with_table("credit", ["id", "strategy"])
        .with_table("audit_log", ["id", "approver"])
}

const BAD: &str = "SELECT b.total_amount, b.strategy FROM orders b JOIN credit t1 ON b.credit_id = t1.id WHERE b.strategy = 'A'";

struct CannedGenerator {
    reply: anyhow::Result<String>,
    prompts: Mutex<Vec<String>>,
}

impl CannedGenerator {
    fn ok(reply: &str) -> Arc<Self> {
        Arc::new(Self { reply: Ok(reply.to_string()), prompts: Mutex::new(Vec::new()) })
    }
    fn failing() -> Arc<Self> {
        Arc::new(Self { reply: Err(anyhow::anyhow!("model offline")), prompts: Mutex::new(Vec::new()) })
    }
}

#[async_trait]
impl TextGenerator for CannedGenerator {
    async fn generate(&self, prompt: &str) -> anyhow::Result<String> {
        self.prompts.lock().push(prompt.to_string());
        match &self.reply {
            Ok(s) => Ok(s.clone()),
            Err(e) => Err(anyhow::anyhow!("{}", e)),
        }
    }
}

#[test]
fn suggest_within_statement() {
    let cat = catalog();
    let aliases = crate::extract::extract_aliases(BAD);
    assert_eq!(suggest("strategy", "b", &aliases, &cat), Suggestion::InStatement(vec!["t1.strategy".into()]));
    assert_eq!(suggest("approver", "b", &aliases, &cat), Suggestion::ElsewhereInCatalog(vec!["audit_log".into()]));
    assert_eq!(suggest("nothing", "b", &aliases, &cat), Suggestion::NotFound);
}

#[test]
fn self_join_is_ambiguous() {
    let cat = catalog();
    let sql = "SELECT x.strategy FROM orders x JOIN credit c1 ON 1=1 JOIN credit c2 ON 1=1";
    let aliases = crate::extract::extract_aliases(sql);
    let s = suggest("strategy", "x", &aliases, &cat);
    assert_eq!(s.candidates(), &["c1.strategy".to_string(), "c2.strategy".to_string()]);
    assert!(s.concrete().is_none());
    assert!(s.describe("strategy").contains("c1.strategy, c2.strategy"));
}

#[test]
fn self_aliases_collapse_to_shortest() {
    let cat = SchemaCatalog::new("sales").with_table("sales.credit", ["strategy"]).with_table("orders", ["id"]);
    let sql = "SELECT o.strategy FROM orders o, sales.credit";
    let aliases = crate::extract::extract_aliases(sql);
    assert_eq!(suggest("strategy", "o", &aliases, &cat).concrete(), Some("credit.strategy"));
}

#[test]
fn rewrite_replaces_every_occurrence() {
    let (_, issues) = validate(BAD, &catalog());
    assert_eq!(issues.len(), 2);
    let fixed = rewrite(BAD, &issues);
    assert_eq!(
        fixed,
        "SELECT b.total_amount, t1.strategy FROM orders b JOIN credit t1 ON b.credit_id = t1.id WHERE t1.strategy = 'A'"
    );
    assert!(validate(&fixed, &catalog()).0);
}

#[test]
fn rewrite_is_identity_on_valid_sql() {
    let sql = "SELECT b.total_amount FROM orders b";
    let (_, issues) = validate(sql, &catalog());
    assert_eq!(rewrite(sql, &issues), sql);
    let (_, issues) = validate(BAD, &catalog());
    let once = rewrite(BAD, &issues);
    let (_, again) = validate(&once, &catalog());
    assert_eq!(rewrite(&once, &again), once);
}

#[test]
fn rewrite_conflict_first_wins() {
    let (_, mut issues) = validate(BAD, &catalog());
    issues[1].suggestion = Some("zz.strategy".into());
    let (fixed, changes) = rewrite_with_changes(BAD, &issues);
    assert_eq!(changes, vec!["b.strategy -> t1.strategy".to_string()]);
    assert!(!fixed.contains("zz.strategy"));
    assert!(!fixed.contains("b.strategy"));
}

#[test]
fn rewrite_leaves_literals_alone() {
    let sql = "SELECT b.strategy, 'b.strategy' FROM orders b JOIN credit t1 ON 1=1";
    let (_, issues) = validate(sql, &catalog());
    assert_eq!(rewrite(sql, &issues), "SELECT t1.strategy, 'b.strategy' FROM orders b JOIN credit t1 ON 1=1");
}

#[tokio::test]
async fn engine_rule_based_fix() {
    let cat = catalog();
    let v = Validator::new(&cat);
    let out = RepairEngine::default().repair(BAD, &v).await;
    assert_eq!(out.method, FixMethod::RuleBased);
    assert!(out.is_valid());
    assert_eq!(out.fixes_applied, vec!["b.strategy -> t1.strategy".to_string()]);
    assert!(out.sql.contains("t1.strategy"));
}

#[tokio::test]
async fn engine_leaves_valid_sql_untouched() {
    let cat = catalog();
    let v = Validator::new(&cat);
    let sql = "SELECT b.total_amount FROM orders b";
    let out = RepairEngine::default().repair(sql, &v).await;
    assert_eq!(out.method, FixMethod::None);
    assert_eq!(out.sql, sql);
    assert!(out.fixes_applied.is_empty());
}

#[tokio::test]
async fn engine_escalates_to_generator() {
    let cat = catalog();
    let v = Validator::new(&cat);
    let gen = CannedGenerator::ok(r#"{"fixed_sql": "SELECT o.total_amount FROM orders o", "changes_made": ["dropped o.approver"]}"#);
    let engine = RepairEngine::default().with_strategy(Box::new(GenerativeRepair::new(gen.clone())));
    let out = engine.repair("SELECT o.total_amount, o.approver FROM orders o", &v).await;
    assert_eq!(out.method, FixMethod::Generative);
    assert!(out.is_valid());
    assert_eq!(out.sql, "SELECT o.total_amount FROM orders o");
    let prompts = gen.prompts.lock();
    assert_eq!(prompts.len(), 1);
    assert!(prompts[0].contains("Field 'approver' does not exist in table 'orders'"));
}

#[tokio::test]
async fn engine_returns_best_effort_when_nothing_validates() {
    let cat = catalog();
    let v = Validator::new(&cat);
    let engine = RepairEngine::default().with_strategy(Box::new(GenerativeRepair::new(CannedGenerator::failing())));
    let sql = "SELECT o.approver FROM orders o";
    let out = engine.repair(sql, &v).await;
    assert_eq!(out.method, FixMethod::None);
    assert_eq!(out.sql, sql);
    assert_eq!(out.outstanding.len(), 1);

    let gen = CannedGenerator::ok("```sql\nSELECT o.still_wrong FROM orders o\n```");
    let engine = RepairEngine::default().with_strategy(Box::new(GenerativeRepair::new(gen)));
    let out = engine.repair(sql, &v).await;
    assert_eq!(out.method, FixMethod::Generative);
    assert_eq!(out.sql, "SELECT o.still_wrong FROM orders o");
    assert_eq!(out.outstanding[0].column, "still_wrong");
}
