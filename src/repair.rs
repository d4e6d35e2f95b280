//! Auto-repair of invalid field references.
//! Strategies are tried in order; each sees the original statement and the original
//! issues, and the engine re-validates whatever they produce.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::catalog::SchemaCatalog;
use crate::extract::AliasMap;
use crate::ident::last_segment;
use crate::validate::{ValidationIssue, Validator};

pub mod generative;
pub mod shape;

pub use generative::{GenerativeRepair, TextGenerator};
pub use shape::ShapeRepairs;

/// Outcome of looking up where a misplaced column actually lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Suggestion {
    /// `alias.column` candidates among the statement's own tables.
    InStatement(Vec<String>),
    /// Catalog tables that have the column but are not part of the statement.
    ElsewhereInCatalog(Vec<String>),
    NotFound,
}

impl Suggestion {
    /// The replacement when exactly one candidate exists.
    pub fn concrete(&self) -> Option<&str> {
        match self {
            Suggestion::InStatement(c) if c.len() == 1 => Some(c[0].as_str()),
            _ => None,
        }
    }

    pub fn candidates(&self) -> &[String] {
        match self {
            Suggestion::InStatement(c) => c,
            _ => &[],
        }
    }

    pub fn describe(&self, column: &str) -> String {
        match self {
            Suggestion::InStatement(c) if c.len() == 1 => format!("Use {} instead.", c[0]),
            Suggestion::InStatement(c) => format!("Possible replacements: {}.", c.join(", ")),
            Suggestion::ElsewhereInCatalog(t) => format!(
                "Column '{}' is available in: {} (not joined in this query).",
                column,
                t.join(", ")
            ),
            Suggestion::NotFound => format!("Column '{}' does not exist in any loaded table.", column),
        }
    }
}

/// Tables of the statement that have `column`, as `alias.column` candidates.
/// `offending_alias` itself is never proposed.
pub fn suggest(column: &str, offending_alias: &str, aliases: &AliasMap, catalog: &SchemaCatalog) -> Suggestion {
    let holders: BTreeSet<String> = catalog.tables_with_column(column).into_iter().collect();
    if holders.is_empty() {
        return Suggestion::NotFound;
    }
    // catalog key -> (explicit aliases, self aliases)
    let mut per_table: BTreeMap<String, (Vec<&str>, Vec<&str>)> = BTreeMap::new();
    let mut order: Vec<String> = Vec::new();
    for (alias, table) in aliases.table_aliases() {
        if alias.eq_ignore_ascii_case(offending_alias) {
            continue;
        }
        let Some(key) = catalog.resolve_table(table) else { continue };
        if !holders.contains(&key) {
            continue;
        }
        let is_self = alias.eq_ignore_ascii_case(table) || alias.eq_ignore_ascii_case(&last_segment(table));
        if !per_table.contains_key(&key) {
            order.push(key.clone());
        }
        let entry = per_table.entry(key).or_default();
        if is_self { entry.1.push(alias) } else { entry.0.push(alias) }
    }
    let mut candidates = Vec::new();
    for key in order {
        let (explicit, selfs) = &per_table[&key];
        if !explicit.is_empty() {
            candidates.extend(explicit.iter().map(|a| format!("{}.{}", a, column)));
        } else if let Some(short) = selfs.iter().min_by_key(|a| a.len()) {
            candidates.push(format!("{}.{}", short, column));
        }
    }
    candidates.dedup();
    if candidates.is_empty() {
        Suggestion::ElsewhereInCatalog(holders.into_iter().collect())
    } else {
        Suggestion::InStatement(candidates)
    }
}

/// Substitute every issue carrying a concrete suggestion, in one pass.
/// When two issues disagree on the replacement for the same reference the first wins.
pub fn rewrite(sql: &str, issues: &[ValidationIssue]) -> String {
    rewrite_with_changes(sql, issues).0
}

/// Like [`rewrite`], also returning one line per distinct substitution.
pub fn rewrite_with_changes(sql: &str, issues: &[ValidationIssue]) -> (String, Vec<String>) {
    let mut chosen: HashMap<String, String> = HashMap::new();
    let mut changes = Vec::new();
    for issue in issues {
        let Some(replacement) = issue.suggestion.as_deref() else { continue };
        let key = issue.reference().to_lowercase();
        match chosen.get(&key) {
            Some(existing) if existing != replacement => {
                warn!(target: "chatsql::repair", "conflicting replacements for {}: keeping {}, dropping {}", key, existing, replacement);
            }
            Some(_) => {}
            None => {
                chosen.insert(key, replacement.to_string());
                changes.push(format!("{} -> {}", issue.reference(), replacement));
            }
        }
    }
    if chosen.is_empty() {
        return (sql.to_string(), changes);
    }
    let mut spans: Vec<(usize, usize, &str)> = issues
        .iter()
        .filter(|i| i.suggestion.is_some())
        .filter_map(|i| chosen.get(&i.reference().to_lowercase()).map(|r| (i.start, i.end, r.as_str())))
        .filter(|(s, e, _)| s < e && *e <= sql.len() && sql.is_char_boundary(*s) && sql.is_char_boundary(*e))
        .collect();
    spans.sort_by_key(|(s, _, _)| *s);
    spans.dedup_by_key(|(s, _, _)| *s);
    let mut out = String::with_capacity(sql.len());
    let mut cursor = 0usize;
    for (start, end, replacement) in spans {
        if start < cursor {
            continue;
        }
        out.push_str(&sql[cursor..start]);
        out.push_str(replacement);
        cursor = end;
    }
    out.push_str(&sql[cursor..]);
    (out, changes)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FixMethod {
    None,
    RuleBased,
    Generative,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepairCandidate {
    pub sql: String,
    pub changes: Vec<String>,
}

/// One link of the repair chain.
#[async_trait]
pub trait RepairStrategy: Send + Sync {
    fn method(&self) -> FixMethod;
    async fn attempt(&self, sql: &str, issues: &[ValidationIssue], catalog: &SchemaCatalog) -> Option<RepairCandidate>;
}

/// Applies the validator's concrete suggestions.
#[derive(Debug, Default, Clone, Copy)]
pub struct RuleBasedRepair;

#[async_trait]
impl RepairStrategy for RuleBasedRepair {
    fn method(&self) -> FixMethod { FixMethod::RuleBased }

    async fn attempt(&self, sql: &str, issues: &[ValidationIssue], _catalog: &SchemaCatalog) -> Option<RepairCandidate> {
        let (fixed, changes) = rewrite_with_changes(sql, issues);
        if changes.is_empty() || fixed == sql {
            return None;
        }
        Some(RepairCandidate { sql: fixed, changes })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RepairOutcome {
    pub sql: String,
    pub method: FixMethod,
    pub fixes_applied: Vec<String>,
    pub outstanding: Vec<ValidationIssue>,
    pub validation_skipped: bool,
}

impl RepairOutcome {
    pub fn unchanged(sql: &str) -> Self {
        Self { sql: sql.to_string(), method: FixMethod::None, fixes_applied: Vec::new(), outstanding: Vec::new(), validation_skipped: false }
    }

    pub fn skipped(sql: &str) -> Self {
        Self { validation_skipped: true, ..Self::unchanged(sql) }
    }

    pub fn is_valid(&self) -> bool { self.outstanding.is_empty() }
}

/// Chain of repair strategies. Never fails: when nothing validates, the latest
/// candidate is returned with its outstanding issues.
pub struct RepairEngine {
    strategies: Vec<Box<dyn RepairStrategy>>,
}

impl Default for RepairEngine {
    fn default() -> Self {
        Self { strategies: vec![Box::new(RuleBasedRepair)] }
    }
}

impl RepairEngine {
    pub fn empty() -> Self { Self { strategies: Vec::new() } }

    pub fn with_strategy(mut self, s: Box<dyn RepairStrategy>) -> Self {
        self.strategies.push(s);
        self
    }

    pub fn len(&self) -> usize { self.strategies.len() }
    pub fn is_empty(&self) -> bool { self.strategies.is_empty() }

    pub async fn repair(&self, sql: &str, validator: &Validator<'_>) -> RepairOutcome {
        let report = validator.validate(sql);
        if report.is_valid() {
            return RepairOutcome::unchanged(sql);
        }
        let issues = report.issues;
        let mut outcome = RepairOutcome { outstanding: issues.clone(), ..RepairOutcome::unchanged(sql) };
        for strategy in &self.strategies {
            let Some(candidate) = strategy.attempt(sql, &issues, validator.catalog()).await else {
                debug!(target: "chatsql::repair", "{:?} produced nothing", strategy.method());
                continue;
            };
            let fixed = candidate.sql.trim().to_string();
            if fixed.is_empty() || fixed == sql.trim() {
                continue;
            }
            let check = validator.validate(&fixed);
            outcome.sql = fixed;
            outcome.method = strategy.method();
            outcome.fixes_applied = candidate.changes;
            outcome.outstanding = check.issues;
            if outcome.outstanding.is_empty() {
                info!(target: "chatsql::repair", "repaired via {:?}: {}", outcome.method, outcome.fixes_applied.join("; "));
                return outcome;
            }
            info!(target: "chatsql::repair", "{:?} left {} issue(s)", outcome.method, outcome.outstanding.len());
        }
        outcome
    }
}

#[cfg(test)]
#[path = "repair_tests.rs"]
mod repair_tests;
