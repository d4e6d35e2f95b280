//! Alias and field-reference extraction.
//! Works on the token stream from [`crate::sql_text::tokenize`]; no full parse is
//! attempted, so the results are best effort by construction.

use std::ops::Range;

use tracing::debug;

use crate::config::DEFAULT_FUNCTION_PREFIXES;
use crate::ident::last_segment;
use crate::sql_text::{matching_paren, tokenize, Token, TokenKind};

/// What an alias stands for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AliasBinding {
    /// Normalized (possibly schema-qualified) table name.
    Table(String),
    /// Subquery or CTE: columns are unknown.
    Derived,
}

/// Alias → binding map for one statement, in discovery order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AliasMap {
    entries: Vec<(String, AliasBinding)>,
}

impl AliasMap {
    pub fn bind(&mut self, alias: impl Into<String>, binding: AliasBinding) {
        let alias = alias.into();
        if self.entries.iter().any(|(a, b)| a.eq_ignore_ascii_case(&alias) && *b == binding) {
            return;
        }
        self.entries.push((alias, binding));
    }

    /// Bind a table under its own name (and its last segment, when qualified).
    fn bind_self(&mut self, name: &str) {
        self.bind(name, AliasBinding::Table(name.to_string()));
        if name.contains('.') {
            let short = last_segment(name);
            if !self.contains(&short) {
                self.bind(short, AliasBinding::Table(name.to_string()));
            }
        }
    }

    pub fn contains(&self, alias: &str) -> bool {
        self.entries.iter().any(|(a, _)| a.eq_ignore_ascii_case(alias))
    }

    pub fn lookup(&self, alias: &str) -> Vec<&AliasBinding> {
        self.entries.iter().filter(|(a, _)| a.eq_ignore_ascii_case(alias)).map(|(_, b)| b).collect()
    }

    pub fn is_derived(&self, alias: &str) -> bool {
        self.lookup(alias).iter().any(|b| matches!(b, AliasBinding::Derived))
    }

    /// Table names bound to `alias`, in discovery order.
    pub fn tables_for(&self, alias: &str) -> Vec<&str> {
        self.lookup(alias)
            .into_iter()
            .filter_map(|b| match b {
                AliasBinding::Table(t) => Some(t.as_str()),
                AliasBinding::Derived => None,
            })
            .collect()
    }

    /// (alias, table) pairs for every table binding.
    pub fn table_aliases(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().filter_map(|(a, b)| match b {
            AliasBinding::Table(t) => Some((a.as_str(), t.as_str())),
            AliasBinding::Derived => None,
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &AliasBinding)> {
        self.entries.iter().map(|(a, b)| (a.as_str(), b))
    }

    pub fn len(&self) -> usize { self.entries.len() }
    pub fn is_empty(&self) -> bool { self.entries.is_empty() }
}

/// A dotted `alias.column` occurrence with its byte span in the statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldReference {
    pub alias: String,
    pub column: String,
    pub start: usize,
    pub end: usize,
}

impl FieldReference {
    pub fn qualified(&self) -> String {
        format!("{}.{}", self.alias, self.column)
    }

    pub fn span(&self) -> Range<usize> { self.start..self.end }
}

/// Everything the validator needs from one statement.
#[derive(Debug, Clone, Default)]
pub struct StatementRefs {
    pub aliases: AliasMap,
    pub references: Vec<FieldReference>,
    /// Spans of table names in FROM/JOIN/INTO/UPDATE position.
    pub table_spans: Vec<Range<usize>>,
}

const NOT_AN_ALIAS: &[&str] = &[
    "WHERE", "ON", "USING", "JOIN", "INNER", "LEFT", "RIGHT", "FULL", "OUTER", "CROSS", "NATURAL",
    "STRAIGHT_JOIN", "GROUP", "ORDER", "HAVING", "LIMIT", "OFFSET", "UNION", "EXCEPT", "INTERSECT",
    "WINDOW", "FOR", "LATERAL", "SET", "VALUES", "SELECT", "FROM", "WITH", "FETCH", "PARTITION",
    "USE", "FORCE", "IGNORE", "INTO", "RETURNING", "QUALIFY", "AS", "LOCK", "TABLESAMPLE", "MINUS",
];

// FROM inside these calls is not a table clause: EXTRACT(YEAR FROM d), TRIM(x FROM y)
const FROM_TAKING_FUNCTIONS: &[&str] = &["EXTRACT", "TRIM", "SUBSTRING", "SUBSTR", "POSITION", "OVERLAY"];

fn is_alias_candidate(t: &Token<'_>) -> bool {
    match t.kind {
        TokenKind::QuotedIdent => true,
        TokenKind::Ident => !NOT_AN_ALIAS.iter().any(|k| t.text.eq_ignore_ascii_case(k)),
        _ => false,
    }
}

/// Extracts aliases and field references. The denylist holds function-like
/// prefixes (`DATE_FORMAT.x`) that must not be read as aliases.
#[derive(Debug, Clone)]
pub struct ReferenceExtractor {
    function_prefixes: Vec<String>,
}

impl Default for ReferenceExtractor {
    fn default() -> Self {
        Self::new(DEFAULT_FUNCTION_PREFIXES.iter().map(|s| s.to_string()))
    }
}

impl ReferenceExtractor {
    pub fn new<I: IntoIterator<Item = String>>(function_prefixes: I) -> Self {
        Self { function_prefixes: function_prefixes.into_iter().map(|s| s.to_ascii_uppercase()).collect() }
    }

    pub fn scan(&self, sql: &str) -> StatementRefs {
        let toks = tokenize(sql);
        let mut out = StatementRefs::default();
        scan_tables(&toks, &mut out);
        out.references = self.field_references(&toks, &out.table_spans);
        debug!(target: "chatsql::extract", "aliases={} references={}", out.aliases.len(), out.references.len());
        out
    }

    pub fn aliases(&self, sql: &str) -> AliasMap {
        let toks = tokenize(sql);
        let mut out = StatementRefs::default();
        scan_tables(&toks, &mut out);
        out.aliases
    }

    pub fn field_references(&self, toks: &[Token<'_>], table_spans: &[Range<usize>]) -> Vec<FieldReference> {
        let mut refs = Vec::new();
        let n = toks.len();
        let mut i = 0usize;
        while i < n {
            if !toks[i].is_identifier() || (i > 0 && toks[i - 1].kind == TokenKind::Dot) {
                i += 1;
                continue;
            }
            let mut parts = vec![i];
            let mut j = i + 1;
            while j + 1 < n && toks[j].kind == TokenKind::Dot && (toks[j + 1].is_identifier() || toks[j + 1].kind == TokenKind::Star) {
                parts.push(j + 1);
                j += 2;
                if toks[j - 1].kind == TokenKind::Star { break; }
            }
            let next = j;
            i = j.max(i + 1);
            if parts.len() < 2 || parts.len() > 3 { continue; }
            let last = &toks[parts[parts.len() - 1]];
            if last.kind == TokenKind::Star { continue; }
            if next < n && toks[next].kind == TokenKind::LParen { continue; }
            let start = toks[parts[0]].start;
            let end = last.end;
            if table_spans.iter().any(|s| s.start <= start && end <= s.end) { continue; }
            let first = &toks[parts[0]];
            if first.kind == TokenKind::Ident && self.function_prefixes.iter().any(|p| first.text.eq_ignore_ascii_case(p)) {
                continue;
            }
            let alias = parts[..parts.len() - 1].iter().map(|&p| toks[p].ident()).collect::<Vec<_>>().join(".");
            refs.push(FieldReference { alias, column: last.ident(), start, end });
        }
        refs
    }
}

/// Alias map of the statement using the default denylist.
pub fn extract_aliases(sql: &str) -> AliasMap {
    ReferenceExtractor::default().aliases(sql)
}

/// Field references of the statement using the default denylist.
pub fn extract_field_references(sql: &str) -> Vec<FieldReference> {
    ReferenceExtractor::default().scan(sql).references
}

fn scan_tables(toks: &[Token<'_>], out: &mut StatementRefs) {
    // one entry per open paren: does it belong to a FROM-taking function
    let mut parens: Vec<bool> = Vec::new();
    let mut i = 0usize;
    while i < toks.len() {
        let t = &toks[i];
        match t.kind {
            TokenKind::LParen => {
                let in_fn = i > 0 && toks[i - 1].kind == TokenKind::Ident
                    && FROM_TAKING_FUNCTIONS.iter().any(|f| toks[i - 1].text.eq_ignore_ascii_case(f));
                parens.push(in_fn);
            }
            TokenKind::RParen => { parens.pop(); }
            TokenKind::Ident => {
                let in_fn = parens.last().copied().unwrap_or(false);
                if t.is_keyword("FROM") && !in_fn {
                    scan_factor_list(toks, i + 1, true, out);
                } else if t.is_keyword("JOIN") || t.is_keyword("STRAIGHT_JOIN") || t.is_keyword("UPDATE") {
                    scan_factor_list(toks, i + 1, false, out);
                } else if t.is_keyword("INTO") {
                    if let Some((name, span, _)) = qualified_name(toks, i + 1) {
                        out.table_spans.push(span);
                        out.aliases.bind_self(&name);
                    }
                } else if t.is_keyword("WITH") {
                    scan_ctes(toks, i + 1, out);
                }
            }
            _ => {}
        }
        i += 1;
    }
}

fn scan_factor_list(toks: &[Token<'_>], mut k: usize, comma_list: bool, out: &mut StatementRefs) {
    loop {
        let Some(next) = scan_factor(toks, k, out) else { return };
        if comma_list && next < toks.len() && toks[next].kind == TokenKind::Comma {
            k = next + 1;
            continue;
        }
        return;
    }
}

/// One table factor at `k`; returns the index after it.
fn scan_factor(toks: &[Token<'_>], mut k: usize, out: &mut StatementRefs) -> Option<usize> {
    while k < toks.len() && (toks[k].is_keyword("LATERAL") || toks[k].is_keyword("ONLY")) {
        k += 1;
    }
    let t = toks.get(k)?;
    if t.kind == TokenKind::LParen {
        let close = matching_paren(toks, k)?;
        let (alias, next) = read_alias(toks, close + 1);
        if let Some(a) = alias {
            out.aliases.bind(a, AliasBinding::Derived);
        }
        return Some(next);
    }
    if !is_alias_candidate(t) {
        return None;
    }
    let (name, span, after) = qualified_name(toks, k)?;
    if after < toks.len() && toks[after].kind == TokenKind::LParen {
        // table-valued function
        let close = matching_paren(toks, after)?;
        let (alias, next) = read_alias(toks, close + 1);
        if let Some(a) = alias {
            out.aliases.bind(a, AliasBinding::Derived);
        }
        return Some(next);
    }
    out.table_spans.push(span);
    let (alias, next) = read_alias(toks, after);
    if out.aliases.is_derived(&name) {
        // reading from a CTE
        if let Some(a) = alias {
            out.aliases.bind(a, AliasBinding::Derived);
        }
        return Some(next);
    }
    match alias {
        Some(a) => out.aliases.bind(a, AliasBinding::Table(name)),
        None => out.aliases.bind_self(&name),
    }
    Some(next)
}

fn qualified_name(toks: &[Token<'_>], k: usize) -> Option<(String, Range<usize>, usize)> {
    let first = toks.get(k)?;
    if !first.is_identifier() {
        return None;
    }
    let mut parts = vec![first.ident()];
    let mut j = k + 1;
    while j + 1 < toks.len() && toks[j].kind == TokenKind::Dot && toks[j + 1].is_identifier() {
        parts.push(toks[j + 1].ident());
        j += 2;
    }
    Some((parts.join("."), first.start..toks[j - 1].end, j))
}

fn read_alias(toks: &[Token<'_>], j: usize) -> (Option<String>, usize) {
    match toks.get(j) {
        Some(t) if t.is_keyword("AS") => match toks.get(j + 1) {
            Some(a) if a.is_identifier() => (Some(a.ident()), j + 2),
            _ => (None, j + 1),
        },
        Some(t) if is_alias_candidate(t) => (Some(t.ident()), j + 1),
        _ => (None, j),
    }
}

fn scan_ctes(toks: &[Token<'_>], mut k: usize, out: &mut StatementRefs) {
    if toks.get(k).map(|t| t.is_keyword("RECURSIVE")).unwrap_or(false) {
        k += 1;
    }
    loop {
        let Some(name_tok) = toks.get(k).filter(|t| t.is_identifier()) else { return };
        let name = name_tok.ident();
        k += 1;
        if toks.get(k).map(|t| t.kind == TokenKind::LParen).unwrap_or(false) {
            let Some(close) = matching_paren(toks, k) else { return };
            k = close + 1;
        }
        if !toks.get(k).map(|t| t.is_keyword("AS")).unwrap_or(false) { return; }
        k += 1;
        while toks.get(k).map(|t| t.is_keyword("NOT") || t.is_keyword("MATERIALIZED")).unwrap_or(false) {
            k += 1;
        }
        if !toks.get(k).map(|t| t.kind == TokenKind::LParen).unwrap_or(false) { return; }
        let Some(close) = matching_paren(toks, k) else { return };
        out.aliases.bind(name, AliasBinding::Derived);
        k = close + 1;
        if toks.get(k).map(|t| t.kind == TokenKind::Comma).unwrap_or(false) {
            k += 1;
            continue;
        }
        return;
    }
}

#[cfg(test)]
#[path = "extract_tests.rs"]
mod extract_tests;
