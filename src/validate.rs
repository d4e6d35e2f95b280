//! Reference validation: every `alias.column` must name a column of the table the
//! alias is bound to.

use std::fmt::{Display, Formatter};

use serde::Serialize;
use tracing::{debug, info};

use crate::catalog::SchemaCatalog;
use crate::extract::{FieldReference, ReferenceExtractor, StatementRefs};
use crate::repair::{suggest, Suggestion};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
    UnknownAlias,
    MissingColumn,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationIssue {
    pub kind: IssueKind,
    pub alias: String,
    pub column: String,
    /// Table the alias resolved to, as written in the statement.
    pub table: Option<String>,
    pub message: String,
    /// Single concrete replacement reference, when one exists.
    pub suggestion: Option<String>,
    pub candidates: Vec<String>,
    /// Human-readable advice derived from the suggestion lookup.
    pub hint: String,
    pub start: usize,
    pub end: usize,
}

impl ValidationIssue {
    pub fn reference(&self) -> String {
        format!("{}.{}", self.alias, self.column)
    }
}

impl Display for ValidationIssue {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} Suggestion: {}", self.message, self.hint)
    }
}

#[derive(Debug, Clone, Default)]
pub struct ValidationReport {
    pub issues: Vec<ValidationIssue>,
    pub references: usize,
    pub refs: StatementRefs,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool { self.issues.is_empty() }
}

/// Validates statements against one catalog.
pub struct Validator<'a> {
    catalog: &'a SchemaCatalog,
    extractor: ReferenceExtractor,
}

impl<'a> Validator<'a> {
    pub fn new(catalog: &'a SchemaCatalog) -> Self {
        Self { catalog, extractor: ReferenceExtractor::default() }
    }

    pub fn with_extractor(catalog: &'a SchemaCatalog, extractor: ReferenceExtractor) -> Self {
        Self { catalog, extractor }
    }

    pub fn catalog(&self) -> &SchemaCatalog { self.catalog }

    pub fn validate(&self, sql: &str) -> ValidationReport {
        let refs = self.extractor.scan(sql);
        let mut issues = Vec::new();
        for r in &refs.references {
            if let Some(issue) = self.check_reference(r, &refs) {
                issues.push(issue);
            }
        }
        if issues.is_empty() {
            debug!(target: "chatsql::validate", "valid: {} references checked", refs.references.len());
        } else {
            info!(target: "chatsql::validate", "{} of {} references invalid", issues.len(), refs.references.len());
        }
        ValidationReport { issues, references: refs.references.len(), refs }
    }

    fn check_reference(&self, r: &FieldReference, refs: &StatementRefs) -> Option<ValidationIssue> {
        let aliases = &refs.aliases;
        if !aliases.contains(&r.alias) {
            let s = suggest(&r.column, &r.alias, aliases, self.catalog);
            return Some(issue(
                IssueKind::UnknownAlias,
                r,
                None,
                format!("Unknown table alias '{}' in reference '{}'.", r.alias, r.qualified()),
                s,
            ));
        }
        if aliases.is_derived(&r.alias) {
            return None;
        }
        let known: Vec<&str> = aliases
            .tables_for(&r.alias)
            .into_iter()
            .filter(|t| self.catalog.has_table(t))
            .collect();
        if known.is_empty() {
            debug!(target: "chatsql::validate", "no catalog entry behind alias '{}', skipping {}", r.alias, r.qualified());
            return None;
        }
        if known.iter().any(|t| self.catalog.has_column(t, &r.column)) {
            return None;
        }
        let table = known[0].to_string();
        let s = suggest(&r.column, &r.alias, aliases, self.catalog);
        let message = format!(
            "Field '{}' does not exist in table '{}' (alias: {}).",
            r.column, table, r.alias
        );
        Some(issue(IssueKind::MissingColumn, r, Some(table), message, s))
    }
}

fn issue(kind: IssueKind, r: &FieldReference, table: Option<String>, message: String, s: Suggestion) -> ValidationIssue {
    ValidationIssue {
        kind,
        alias: r.alias.clone(),
        column: r.column.clone(),
        table,
        message,
        suggestion: s.concrete().map(|c| c.to_string()),
        hint: s.describe(&r.column),
        candidates: s.candidates().to_vec(),
        start: r.start,
        end: r.end,
    }
}

/// `(is_valid, issues)` for `sql` against `catalog`.
pub fn validate(sql: &str, catalog: &SchemaCatalog) -> (bool, Vec<ValidationIssue>) {
    let report = Validator::new(catalog).validate(sql);
    (report.is_valid(), report.issues)
}
