//! Response pipeline: one model turn in, one user-facing response out.
//!
//! The flow is `ReceivedText -> Parsed -> {DirectAnswer | Validating} ->
//! {Executing | Rejected} -> {Rendered | Failed}`. Every visited state is recorded
//! in the returned [`RenderOutcome`].

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::action::{parse_model_output, ActionKind, SqlAction};
use crate::analysis::{data_driven_report, empty_data_report, AnalysisIntent, AnalysisReport, KeywordIntent};
use crate::catalog::{CatalogCache, SchemaCatalog};
use crate::config::{PipelineConfig, RenderMode};
use crate::error::{PipelineError, PipelineResult};
use crate::extract::ReferenceExtractor;
use crate::render::{self, FailureView, SuccessView};
use crate::repair::{FixMethod, RepairEngine, RepairOutcome, ShapeRepairs};
use crate::result::QueryResult;
use crate::sql_text::first_keyword;
use crate::validate::{ValidationIssue, Validator};

/// Executes a statement against the live database.
#[async_trait]
pub trait QueryExecutor: Send + Sync {
    async fn execute(&self, sql: &str) -> anyhow::Result<QueryResult>;
}

/// Adapts an async closure taking the statement text.
pub struct FnExecutor<F>(pub F);

#[async_trait]
impl<F, Fut> QueryExecutor for FnExecutor<F>
where
    F: Fn(String) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<QueryResult>> + Send + 'static,
{
    async fn execute(&self, sql: &str) -> anyhow::Result<QueryResult> {
        (self.0)(sql.to_string()).await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    ReceivedText,
    Parsed,
    DirectAnswer,
    Validating,
    Executing,
    Rejected,
    Rendered,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Route {
    /// Return the model's direct response verbatim.
    DirectAnswer,
    ReportOnly,
    /// Neither SQL, report nor direct response.
    NoSql,
    Execute,
}

pub fn decide_route(action: &SqlAction) -> Route {
    match action.kind() {
        ActionKind::DirectAnswer => Route::DirectAnswer,
        ActionKind::ReportOnly => Route::ReportOnly,
        ActionKind::Empty => Route::NoSql,
        ActionKind::SqlQuery | ActionKind::SqlQueryWithReport => Route::Execute,
    }
}

const ALLOWED_LEADING: &[&str] = &["SELECT", "WITH", "SHOW", "DESCRIBE", "DESC", "EXPLAIN"];
const REJECTED_LEADING: &[&str] = &[
    "DROP", "DELETE", "TRUNCATE", "ALTER", "CREATE", "INSERT", "UPDATE", "REPLACE", "MERGE", "GRANT", "REVOKE",
];

/// Advisory read-only check on the leading keyword. Not a security boundary:
/// the executing connection must enforce its own permissions.
pub fn check_read_only(sql: &str) -> PipelineResult<()> {
    let Some(kw) = first_keyword(sql) else {
        return Err(PipelineError::parse("statement has no leading keyword"));
    };
    if ALLOWED_LEADING.contains(&kw.as_str()) {
        return Ok(());
    }
    if REJECTED_LEADING.contains(&kw.as_str()) {
        return Err(PipelineError::rejected(kw));
    }
    debug!(target: "chatsql::pipeline", "unrecognized leading keyword {}, letting the database decide", kw);
    Ok(())
}

/// How the executed statement came about.
#[derive(Debug, Clone, Serialize)]
pub struct FixMetadata {
    pub original_sql: String,
    /// Statement after shape and reference repairs.
    pub repaired_sql: String,
    pub method: FixMethod,
    pub fixes_applied: Vec<String>,
    pub outstanding: Vec<ValidationIssue>,
    pub validation_skipped: bool,
    /// The repaired statement failed and the original was executed instead.
    pub fallback_used: bool,
}

impl FixMetadata {
    fn has_fixes(&self) -> bool {
        !self.fixes_applied.is_empty() && self.repaired_sql.trim() != self.original_sql.trim()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RenderOutcome {
    pub text: String,
    pub route: Route,
    pub states: Vec<PipelineState>,
    pub sql_executed: Option<String>,
    pub fix: Option<FixMetadata>,
    pub error: Option<PipelineError>,
}

impl RenderOutcome {
    pub fn succeeded(&self) -> bool {
        self.states.last() == Some(&PipelineState::Rendered)
    }
}

pub struct ResponsePipeline {
    config: PipelineConfig,
    catalogs: Option<Arc<CatalogCache>>,
    repair: RepairEngine,
    shape: ShapeRepairs,
    extractor: ReferenceExtractor,
    intent: Box<dyn AnalysisIntent>,
}

impl ResponsePipeline {
    pub fn new(config: PipelineConfig) -> Self {
        let shape = ShapeRepairs::from_config(&config);
        let extractor = ReferenceExtractor::new(config.function_prefixes.iter().cloned());
        let intent = Box::new(KeywordIntent::new(config.analysis_keywords.iter().cloned()));
        Self { config, catalogs: None, repair: RepairEngine::default(), shape, extractor, intent }
    }

    pub fn with_catalog_cache(mut self, cache: Arc<CatalogCache>) -> Self {
        self.catalogs = Some(cache);
        self
    }

    pub fn with_repair_engine(mut self, engine: RepairEngine) -> Self {
        self.repair = engine;
        self
    }

    pub fn with_intent(mut self, intent: Box<dyn AnalysisIntent>) -> Self {
        self.intent = intent;
        self
    }

    pub fn config(&self) -> &PipelineConfig { &self.config }

    pub fn parse(&self, model_text: &str, user_input: &str) -> SqlAction {
        parse_model_output(model_text, user_input)
    }

    /// Parse and answer one model turn in the configured render mode.
    pub async fn respond(&self, model_text: &str, user_input: &str, executor: &dyn QueryExecutor) -> RenderOutcome {
        let action = self.parse(model_text, user_input);
        let mut states = vec![PipelineState::ReceivedText];
        self.drive(&action, executor, self.config.render_mode, &mut states).await
    }

    pub async fn render(&self, action: &SqlAction, executor: &dyn QueryExecutor, mode: RenderMode) -> String {
        self.run(action, executor, mode).await.text
    }

    pub async fn run(&self, action: &SqlAction, executor: &dyn QueryExecutor, mode: RenderMode) -> RenderOutcome {
        let mut states = Vec::new();
        self.drive(action, executor, mode, &mut states).await
    }

    async fn drive(
        &self,
        action: &SqlAction,
        executor: &dyn QueryExecutor,
        mode: RenderMode,
        states: &mut Vec<PipelineState>,
    ) -> RenderOutcome {
        states.push(PipelineState::Parsed);
        let route = decide_route(action);
        debug!(target: "chatsql::pipeline", "route {:?} for action {:?}", route, action.kind());
        let text = match route {
            Route::DirectAnswer => {
                states.push(PipelineState::DirectAnswer);
                action.direct_response().to_string()
            }
            Route::ReportOnly => {
                states.push(PipelineState::Rendered);
                match action.analysis_report() {
                    Some(report) => render::render_report_only(report, action.direct_response()),
                    None => render::render_unexpected("", "", action.model_text(), "report route without a report"),
                }
            }
            Route::NoSql => {
                states.push(PipelineState::Rendered);
                render::render_no_sql(action.thoughts(), action.missing_info())
            }
            Route::Execute => return self.execute(action, executor, mode, states).await,
        };
        RenderOutcome { text, route, states: std::mem::take(states), sql_executed: None, fix: None, error: None }
    }

    async fn execute(
        &self,
        action: &SqlAction,
        executor: &dyn QueryExecutor,
        mode: RenderMode,
        states: &mut Vec<PipelineState>,
    ) -> RenderOutcome {
        let original = action.sql();
        states.push(PipelineState::Validating);
        let mut fix = self.prepare(original, action.user_input()).await;
        let mut warnings: Vec<String> = Vec::new();

        if let Err(err) = check_read_only(&fix.repaired_sql) {
            warn!(target: "chatsql::pipeline", "statement rejected: {}", err);
            states.push(PipelineState::Rejected);
            states.push(PipelineState::Failed);
            let view = FailureView {
                sql: &fix.repaired_sql,
                original_sql: original,
                error: &err,
                issues: &fix.outstanding,
                fixes: &fix.fixes_applied,
                warnings: &warnings,
            };
            let text = render::render_failure(&view, mode);
            return self.outcome(text, states, None, fix, Some(err));
        }

        states.push(PipelineState::Executing);
        let first = self.execute_once(executor, &fix.repaired_sql).await;
        let (executed, result) = match first {
            Ok(result) => (fix.repaired_sql.clone(), result),
            Err(err) if fix.has_fixes() && check_read_only(original).is_ok() => {
                warn!(target: "chatsql::pipeline", "repaired statement failed ({}), retrying the original", err);
                match self.execute_once(executor, original).await {
                    Ok(result) => {
                        fix.fallback_used = true;
                        warnings.push(format!(
                            "The auto-fix was abandoned: the repaired query failed ({}). Showing results of the original query.",
                            err.reason()
                        ));
                        (original.to_string(), result)
                    }
                    Err(retry_err) => {
                        warnings.push(format!("The original query also failed: {}", retry_err.reason()));
                        return self.fail(&fix, err, &warnings, mode, states);
                    }
                }
            }
            Err(err) => return self.fail(&fix, err, &warnings, mode, states),
        };

        if let Err(err) = check_shape(&result) {
            warn!(target: "chatsql::pipeline", "unusable result: {}", err);
            states.push(PipelineState::Failed);
            let text = render::render_unexpected(&executed, original, action.model_text(), &err.reason());
            return self.outcome(text, states, Some(executed), fix, Some(err));
        }

        info!(target: "chatsql::pipeline", rows = result.len(), columns = result.column_count(), "query executed");
        let report = self.report_for(action, &result, &executed);
        let applied: &[String] = if fix.fallback_used { &[] } else { &fix.fixes_applied };
        let view = SuccessView {
            sql: &executed,
            result: &result,
            report: report.as_ref(),
            display: action.display(),
            lead: action.direct_response(),
            fixes: applied,
            warnings: &warnings,
            max_rows: self.config.max_rows,
        };
        let text = render::render_success(&view, mode, self.config.max_payload_bytes);
        states.push(PipelineState::Rendered);
        self.outcome(text, states, Some(executed), fix, None)
    }

    /// Shape repairs, then validation and the repair chain. A catalog that
    /// cannot be loaded degrades to skipped validation.
    async fn prepare(&self, sql: &str, user_input: &str) -> FixMetadata {
        let catalog = self.load_catalog().await;
        let (shaped, mut notes) = self.shape.apply(sql, user_input, catalog.as_deref());
        let outcome = match catalog.as_deref() {
            Some(cat) => {
                let validator = Validator::with_extractor(cat, self.extractor.clone());
                self.repair.repair(&shaped, &validator).await
            }
            None => RepairOutcome::skipped(&shaped),
        };
        if outcome.validation_skipped {
            debug!(target: "chatsql::pipeline", "validation skipped");
        }
        notes.extend(outcome.fixes_applied);
        let method = if outcome.method == FixMethod::None && !notes.is_empty() { FixMethod::RuleBased } else { outcome.method };
        FixMetadata {
            original_sql: sql.to_string(),
            repaired_sql: outcome.sql,
            method,
            fixes_applied: notes,
            outstanding: outcome.outstanding,
            validation_skipped: outcome.validation_skipped,
            fallback_used: false,
        }
    }

    async fn load_catalog(&self) -> Option<Arc<SchemaCatalog>> {
        if !self.config.validation_enabled {
            return None;
        }
        let cache = self.catalogs.as_ref()?;
        match cache.get_or_load(&self.config.database).await {
            Ok(cat) => Some(cat),
            Err(e) => {
                warn!(target: "chatsql::pipeline", "{}; continuing without validation", e);
                None
            }
        }
    }

    async fn execute_once(&self, executor: &dyn QueryExecutor, sql: &str) -> PipelineResult<QueryResult> {
        let fut = executor.execute(sql);
        let res = match self.config.exec_timeout {
            Some(limit) => match tokio::time::timeout(limit, fut).await {
                Ok(r) => r,
                Err(_) => {
                    return Err(PipelineError::execution(format!("query timed out after {} ms", limit.as_millis())));
                }
            },
            None => fut.await,
        };
        res.map_err(PipelineError::from)
    }

    fn report_for(&self, action: &SqlAction, result: &QueryResult, sql: &str) -> Option<AnalysisReport> {
        if let Some(r) = action.analysis_report() {
            return Some(r.clone());
        }
        if !self.intent.wants_analysis(action.user_input()) {
            return None;
        }
        debug!(target: "chatsql::pipeline", "analysis requested without a model report, deriving one");
        Some(if result.is_empty() {
            empty_data_report(action.user_input(), sql)
        } else {
            data_driven_report(result, action.user_input(), sql)
        })
    }

    fn fail(
        &self,
        fix: &FixMetadata,
        err: PipelineError,
        warnings: &[String],
        mode: RenderMode,
        states: &mut Vec<PipelineState>,
    ) -> RenderOutcome {
        warn!(target: "chatsql::pipeline", "query failed: {}", err);
        states.push(PipelineState::Failed);
        let view = FailureView {
            sql: &fix.repaired_sql,
            original_sql: &fix.original_sql,
            error: &err,
            issues: &fix.outstanding,
            fixes: &fix.fixes_applied,
            warnings,
        };
        let text = render::render_failure(&view, mode);
        self.outcome(text, states, None, fix.clone(), Some(err))
    }

    fn outcome(
        &self,
        text: String,
        states: &mut Vec<PipelineState>,
        sql_executed: Option<String>,
        fix: FixMetadata,
        error: Option<PipelineError>,
    ) -> RenderOutcome {
        RenderOutcome { text, route: Route::Execute, states: std::mem::take(states), sql_executed, fix: Some(fix), error }
    }
}

fn check_shape(result: &QueryResult) -> PipelineResult<()> {
    let width = result.column_count();
    match result.rows.iter().position(|r| r.len() > width) {
        Some(i) => Err(PipelineError::render(format!(
            "row {} has {} cells but the result has {} columns",
            i,
            result.rows[i].len(),
            width
        ))),
        None => Ok(()),
    }
}

#[cfg(test)]
#[path = "pipeline_tests.rs"]
mod pipeline_tests;
