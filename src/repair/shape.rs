//! Statement-shape repairs that do not depend on field validation: star
//! expansion across joins, stale year literals and non-ASCII aliases.

use std::collections::HashMap;
use std::ops::Range;

use chrono::Datelike;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

use crate::catalog::SchemaCatalog;
use crate::config::{PipelineConfig, YearFix};
use crate::extract::{extract_aliases, AliasBinding};
use crate::ident::{is_ident_char, last_segment, quote_identifier};
use crate::sql_text::{tokenize, Token, TokenKind};

static DATE_LITERAL: Lazy<Regex> = Lazy::new(|| Regex::new(r"^'(\d{4})-(\d{2})(-\d{2})?'$").expect("valid regex"));

#[derive(Debug, Clone)]
pub struct ShapeRepairs {
    pub year_fix: YearFix,
    pub current_year: i32,
    pub quote: char,
    pub relative_year_phrases: Vec<String>,
}

impl ShapeRepairs {
    pub fn from_config(cfg: &PipelineConfig) -> Self {
        Self {
            year_fix: cfg.year_fix,
            current_year: cfg.current_year.unwrap_or_else(|| chrono::Local::now().year()),
            quote: cfg.dialect.identifier_quote(),
            relative_year_phrases: cfg.relative_year_phrases.clone(),
        }
    }

    /// Run every shape repair; returns the statement and a note per change.
    pub fn apply(&self, sql: &str, user_input: &str, catalog: Option<&SchemaCatalog>) -> (String, Vec<String>) {
        let mut notes = Vec::new();
        let mut current = sql.to_string();
        if let Some(cat) = catalog {
            if let Some((next, note)) = self.expand_join_stars(&current, cat) {
                current = next;
                notes.push(note);
            }
        }
        let (next, mut year_notes) = self.fix_stale_years(&current, user_input);
        current = next;
        notes.append(&mut year_notes);
        let (next, mut alias_notes) = self.quote_non_ascii_aliases(&current);
        current = next;
        notes.append(&mut alias_notes);
        if !notes.is_empty() {
            debug!(target: "chatsql::repair", "shape repairs: {}", notes.join("; "));
        }
        (current, notes)
    }

    /// Replace `a.*, b.*` (or `*`) over a multi-table join with explicit columns,
    /// aliasing colliding names as `alias_column`.
    pub fn expand_join_stars(&self, sql: &str, catalog: &SchemaCatalog) -> Option<(String, String)> {
        let toks = tokenize(sql);
        if toks.iter().filter(|t| t.is_keyword("SELECT")).count() != 1 {
            return None;
        }
        let select = toks.iter().position(|t| t.is_keyword("SELECT"))?;
        let from = toks.iter().position(|t| t.is_keyword("FROM"))?;
        if from <= select + 1 {
            return None;
        }
        let aliases = extract_aliases(sql);
        if aliases.iter().any(|(_, b)| matches!(b, AliasBinding::Derived)) {
            return None;
        }
        let tables = joined_tables(&aliases, catalog)?;
        if tables.len() < 2 {
            return None;
        }

        let mut start = select + 1;
        while start < from && (toks[start].is_keyword("DISTINCT") || toks[start].is_keyword("ALL")) {
            start += 1;
        }
        let items = split_items(&toks[start..from]);
        // (span, aliases the star expands to)
        let mut stars: Vec<(Range<usize>, Vec<usize>)> = Vec::new();
        for item in &items {
            match item {
                [t] if t.kind == TokenKind::Star => stars.push((t.start..t.end, (0..tables.len()).collect())),
                [a, d, s] if a.is_identifier() && d.kind == TokenKind::Dot && s.kind == TokenKind::Star => {
                    let alias = a.ident();
                    let idx = tables.iter().position(|(al, _)| al.eq_ignore_ascii_case(&alias))?;
                    stars.push((a.start..s.end, vec![idx]));
                }
                _ => {}
            }
        }
        if stars.is_empty() {
            return None;
        }

        let mut counts: HashMap<String, usize> = HashMap::new();
        for (_, idxs) in &stars {
            for &i in idxs {
                for c in catalog.columns(&tables[i].1)? {
                    *counts.entry(c.name.to_lowercase()).or_default() += 1;
                }
            }
        }
        // output names already taken by non-colliding columns
        let mut used: Vec<String> = counts.iter().filter(|(_, n)| **n == 1).map(|(k, _)| k.clone()).collect();
        let mut renamed: Vec<String> = Vec::new();
        let mut edits: Vec<(Range<usize>, String)> = Vec::new();
        for (span, idxs) in &stars {
            let mut cols = Vec::new();
            for &i in idxs {
                let alias = &tables[i].0;
                for c in catalog.columns(&tables[i].1)? {
                    let col = self.maybe_quote(&c.name);
                    if counts.get(&c.name.to_lowercase()).copied().unwrap_or(0) > 1 {
                        let base = format!("{}_{}", last_segment(alias), c.name);
                        let mut name = base.clone();
                        let mut n = 1;
                        while used.contains(&name.to_lowercase()) {
                            name = format!("{}_{}", base, n);
                            n += 1;
                        }
                        used.push(name.to_lowercase());
                        cols.push(format!("{}.{} AS {}", alias, col, self.maybe_quote(&name)));
                        if !renamed.contains(&c.name) { renamed.push(c.name.clone()); }
                    } else {
                        cols.push(format!("{}.{}", alias, col));
                    }
                }
            }
            edits.push((span.clone(), cols.join(", ")));
        }
        let expanded: Vec<&str> = stars.iter().map(|(s, _)| &sql[s.clone()]).collect();
        let mut note = format!("Expanded {} into an explicit column list", expanded.join(", "));
        if !renamed.is_empty() {
            note.push_str(&format!(" (renamed duplicate columns: {})", renamed.join(", ")));
        }
        Some((splice(sql, edits), note))
    }

    /// Move prior-year `'YYYY-MM[-DD]'` literals to the current year, per policy.
    pub fn fix_stale_years(&self, sql: &str, user_input: &str) -> (String, Vec<String>) {
        let applies = match self.year_fix {
            YearFix::Off => false,
            YearFix::Always => true,
            YearFix::WhenRelative => {
                let lower = user_input.to_lowercase();
                self.relative_year_phrases.iter().any(|p| lower.contains(&p.to_lowercase()))
            }
        };
        if !applies {
            return (sql.to_string(), Vec::new());
        }
        let mut edits = Vec::new();
        let mut notes = Vec::new();
        for t in tokenize(sql).iter().filter(|t| t.kind == TokenKind::Literal) {
            let Some(c) = DATE_LITERAL.captures(t.text) else { continue };
            let Ok(year) = c[1].parse::<i32>() else { continue };
            if year >= self.current_year {
                continue;
            }
            let replaced = format!("'{}-{}{}'", self.current_year, &c[2], c.get(3).map(|m| m.as_str()).unwrap_or(""));
            notes.push(format!("Date literal {} -> {}", t.text, replaced));
            edits.push((t.start..t.end, replaced));
        }
        (splice(sql, edits), notes)
    }

    /// Quote unquoted non-ASCII aliases that follow `AS`.
    pub fn quote_non_ascii_aliases(&self, sql: &str) -> (String, Vec<String>) {
        let toks = tokenize(sql);
        let mut edits = Vec::new();
        let mut notes = Vec::new();
        for w in toks.windows(2) {
            if w[0].is_keyword("AS") && w[1].kind == TokenKind::Ident && !w[1].text.is_ascii() {
                let quoted = quote_identifier(w[1].text, self.quote);
                notes.push(format!("Quoted alias {}", w[1].text));
                edits.push((w[1].start..w[1].end, quoted));
            }
        }
        (splice(sql, edits), notes)
    }

    fn maybe_quote(&self, name: &str) -> String {
        let plain = name.chars().next().map(|c| c.is_ascii_alphabetic() || c == '_').unwrap_or(false)
            && name.chars().all(|c| c.is_ascii() && is_ident_char(c));
        if plain { name.to_string() } else { quote_identifier(name, self.quote) }
    }
}

/// Distinct (alias, table) pairs of the statement; `None` when any table is unknown.
fn joined_tables(aliases: &crate::extract::AliasMap, catalog: &SchemaCatalog) -> Option<Vec<(String, String)>> {
    let mut out: Vec<(String, String, bool)> = Vec::new();
    for (alias, table) in aliases.table_aliases() {
        let key = catalog.resolve_table(table)?;
        let is_self = alias.eq_ignore_ascii_case(table) || alias.eq_ignore_ascii_case(&last_segment(table));
        match out.iter_mut().find(|(_, k, s)| *k == key && (*s || is_self)) {
            Some(existing) => {
                // keep the explicit alias, else the shortest self alias
                if existing.2 && (!is_self || alias.len() < existing.0.len()) {
                    *existing = (alias.to_string(), key, is_self);
                }
            }
            None => out.push((alias.to_string(), key, is_self)),
        }
    }
    Some(out.into_iter().map(|(a, k, _)| (a, k)).collect())
}

fn split_items<'t, 'a>(toks: &'t [Token<'a>]) -> Vec<&'t [Token<'a>]> {
    let mut items = Vec::new();
    let mut depth = 0i32;
    let mut start = 0usize;
    for (i, t) in toks.iter().enumerate() {
        match t.kind {
            TokenKind::LParen => depth += 1,
            TokenKind::RParen => depth -= 1,
            TokenKind::Comma if depth == 0 => {
                items.push(&toks[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    items.push(&toks[start..]);
    items
}

/// Apply non-overlapping edits (any order) to `sql`.
fn splice(sql: &str, mut edits: Vec<(Range<usize>, String)>) -> String {
    if edits.is_empty() {
        return sql.to_string();
    }
    edits.sort_by_key(|(r, _)| r.start);
    let mut out = String::with_capacity(sql.len());
    let mut cursor = 0usize;
    for (r, text) in edits {
        if r.start < cursor {
            continue;
        }
        out.push_str(&sql[cursor..r.start]);
        out.push_str(&text);
        cursor = r.end;
    }
    out.push_str(&sql[cursor..]);
    out
}
