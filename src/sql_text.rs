//! Lexical helpers over raw SQL text.
//! Nothing here parses SQL into a tree; callers work on byte offsets into the
//! original statement so that rewrites can splice text back in place.

use crate::ident::{is_ident_char, is_ident_start, normalize_identifier};

/// Strip SQL comments from the input while preserving content inside string literals.
/// Supported comment styles:
/// - Line comments starting with `--` or `#` until end of line
/// - Block comments delimited by `/* ... */`, nested
/// Newlines inside comments are preserved to keep line numbers stable.
pub fn strip_sql_comments(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for (piece, kind) in Segments::new(input) {
        match kind {
            SegmentKind::Comment => {
                for ch in piece.chars() {
                    if ch == '\n' || ch == '\r' { out.push(ch); }
                }
            }
            _ => out.push_str(piece),
        }
    }
    out
}

/// Replace string literals and comments with spaces, byte for byte.
/// Offsets in the result address the same text as in `input`.
pub fn mask_literals_and_comments(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for (piece, kind) in Segments::new(input) {
        match kind {
            SegmentKind::Code | SegmentKind::QuotedIdent => out.push_str(piece),
            SegmentKind::Literal | SegmentKind::Comment => {
                for ch in piece.chars() {
                    if ch == '\n' { out.push('\n'); continue; }
                    for _ in 0..ch.len_utf8() { out.push(' '); }
                }
            }
        }
    }
    out
}

/// Find `kw` at parenthesis depth 0, outside literals and comments, on word boundaries.
pub fn find_keyword_ci_depth0(s: &str, kw: &str) -> Option<usize> {
    find_keyword_ci_depth0_from(s, kw, 0)
}

pub fn find_keyword_ci_depth0_from(s: &str, kw: &str, from: usize) -> Option<usize> {
    let masked = mask_literals_and_comments(s);
    let klen = kw.len();
    let sb = masked.as_bytes();
    let mut quote: Option<u8> = None;
    let mut depth: i32 = 0;
    let mut i = 0usize;
    while i < sb.len() {
        let ch = sb[i];
        if let Some(q) = quote {
            if ch == q { quote = None; }
            i += 1;
            continue;
        }
        match ch {
            b'`' | b'"' => { quote = Some(ch); i += 1; continue; }
            b'(' => { depth += 1; i += 1; continue; }
            b')' => { depth -= 1; i += 1; continue; }
            _ => {}
        }
        if depth == 0 && i >= from && i + klen <= sb.len() && masked.is_char_boundary(i) && masked.is_char_boundary(i + klen) {
            let slice = &masked[i..i + klen];
            if slice.eq_ignore_ascii_case(kw) {
                let prev_ok = i == 0 || !is_word_byte(sb[i - 1]);
                let next_ok = i + klen >= sb.len() || !is_word_byte(sb[i + klen]);
                if prev_ok && next_ok { return Some(i); }
            }
        }
        i += 1;
    }
    None
}

fn is_word_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_' || b >= 0x80
}

/// First keyword of the statement after comments and leading parentheses, uppercased.
pub fn first_keyword(sql: &str) -> Option<String> {
    tokenize(sql)
        .into_iter()
        .find(|t| t.kind != TokenKind::LParen)
        .filter(|t| t.kind == TokenKind::Ident)
        .map(|t| t.text.to_ascii_uppercase())
}

/// Whether the text reads as a SQL statement rather than prose or JSON.
/// The leading keyword must be followed by the clause it introduces, so
/// "Show me the totals" or "Explain: no table matched" stay prose.
pub fn looks_like_sql(text: &str) -> bool {
    let t = text.trim_start();
    if t.starts_with('{') || t.starts_with('[') { return false; }
    let toks = tokenize(t);
    let lead = toks.iter().take_while(|t| t.kind == TokenKind::LParen).count();
    statement_shape(&toks[lead..])
}

const SELECT_LEAD: &[&str] = &[
    "DISTINCT", "ALL", "TOP", "CASE", "NOT", "NULL", "EXISTS", "TRUE", "FALSE", "INTERVAL",
    "SQL_CALC_FOUND_ROWS", "SQL_NO_CACHE", "STRAIGHT_JOIN", "HIGH_PRIORITY",
];
const SELECT_FOLLOW: &[&str] = &[
    "FROM", "AS", "INTO", "WHERE", "UNION", "ORDER", "GROUP", "HAVING", "LIMIT", "OVER", "DIV", "MOD",
];
const SHOW_OBJECTS: &[&str] = &[
    "TABLES", "DATABASES", "SCHEMAS", "COLUMNS", "FIELDS", "CREATE", "INDEX", "INDEXES", "KEYS",
    "FULL", "VARIABLES", "STATUS", "PROCESSLIST", "GRANTS", "TRIGGERS", "VIEWS", "TABLE", "GLOBAL",
    "SESSION", "WARNINGS", "ERRORS", "ENGINES", "CHARSET", "COLLATION", "FUNCTION", "PROCEDURE",
    "EVENTS", "PLUGINS", "PRIVILEGES", "OPEN",
];
const SCHEMA_OBJECTS: &[&str] = &[
    "TABLE", "VIEW", "INDEX", "UNIQUE", "FULLTEXT", "DATABASE", "SCHEMA", "FUNCTION", "PROCEDURE",
    "TRIGGER", "EVENT", "USER", "ROLE", "SEQUENCE", "TEMPORARY", "OR", "MATERIALIZED", "TABLESPACE",
];
const EXPLAIN_OPTIONS: &[&str] = &["ANALYZE", "EXTENDED", "VERBOSE", "PARTITIONS"];

fn keyword_in(t: &Token<'_>, set: &[&str]) -> bool {
    t.kind == TokenKind::Ident && set.iter().any(|k| t.text.eq_ignore_ascii_case(k))
}

fn is_op(t: Option<&Token<'_>>, op: &str) -> bool {
    t.is_some_and(|t| t.kind == TokenKind::Op && t.text == op)
}

/// Tokens taken by a dotted name such as `db.orders`; zero when none starts here.
fn qualified_name_len(toks: &[Token<'_>]) -> usize {
    if !toks.first().is_some_and(|t| t.is_identifier()) { return 0; }
    let mut n = 1;
    while toks.get(n).is_some_and(|t| t.kind == TokenKind::Dot)
        && toks.get(n + 1).is_some_and(|t| t.is_identifier() || t.kind == TokenKind::Star)
    {
        n += 2;
    }
    n
}

fn without_semicolon<'t, 'a>(toks: &'t [Token<'a>]) -> &'t [Token<'a>] {
    match toks.split_last() {
        Some((last, body)) if last.kind == TokenKind::Semicolon => body,
        _ => toks,
    }
}

fn statement_shape(toks: &[Token<'_>]) -> bool {
    let Some(head) = toks.first().filter(|t| t.kind == TokenKind::Ident) else { return false };
    let rest = &toks[1..];
    let Some(next) = rest.first() else { return false };
    if is_op(Some(next), ":") { return false; }
    match head.text.to_ascii_uppercase().as_str() {
        "SELECT" => select_shape(rest),
        "WITH" => with_shape(rest),
        "SHOW" => keyword_in(next, SHOW_OBJECTS),
        "DESC" | "DESCRIBE" => describe_shape(rest),
        "EXPLAIN" => explain_shape(rest),
        "INSERT" | "REPLACE" => rest.iter().take(3).any(|t| t.is_keyword("INTO")),
        "MERGE" => next.is_keyword("INTO"),
        "UPDATE" => update_shape(rest),
        "DELETE" => rest.iter().take(4).any(|t| t.is_keyword("FROM")),
        "CREATE" | "DROP" | "ALTER" => keyword_in(next, SCHEMA_OBJECTS) && rest.len() > 1,
        "TRUNCATE" => {
            let body = without_semicolon(rest);
            next.is_keyword("TABLE") || (!body.is_empty() && qualified_name_len(body) == body.len())
        }
        "GRANT" | "REVOKE" => {
            let to = if head.is_keyword("GRANT") { "TO" } else { "FROM" };
            rest.iter()
                .position(|t| t.is_keyword("ON"))
                .is_some_and(|on| rest[on + 1..].iter().any(|t| t.is_keyword(to)))
        }
        _ => false,
    }
}

fn select_shape(rest: &[Token<'_>]) -> bool {
    let Some(first) = rest.first() else { return false };
    match first.kind {
        TokenKind::Star | TokenKind::Number | TokenKind::Literal | TokenKind::LParen => true,
        TokenKind::Op => matches!(first.text, "-" | "+" | "@"),
        TokenKind::Ident if keyword_in(first, SELECT_LEAD) => true,
        TokenKind::Ident | TokenKind::QuotedIdent => {
            let n = qualified_name_len(rest);
            match rest.get(n) {
                None => true,
                Some(t) => match t.kind {
                    TokenKind::Comma | TokenKind::LParen | TokenKind::RParen | TokenKind::Semicolon => true,
                    TokenKind::Op => t.text != ":",
                    TokenKind::Ident if keyword_in(t, SELECT_FOLLOW) => true,
                    // bare alias: `SELECT total t FROM ...`
                    TokenKind::Ident | TokenKind::QuotedIdent => match rest.get(n + 1) {
                        None => true,
                        Some(after) => {
                            matches!(after.kind, TokenKind::Comma | TokenKind::Semicolon | TokenKind::RParen)
                                || keyword_in(after, SELECT_FOLLOW)
                        }
                    },
                    _ => false,
                },
            }
        }
        _ => false,
    }
}

/// `WITH [RECURSIVE] name [(cols)] AS (` and a SELECT somewhere after.
fn with_shape(rest: &[Token<'_>]) -> bool {
    let mut i = usize::from(rest.first().is_some_and(|t| t.is_keyword("RECURSIVE")));
    if !rest.get(i).is_some_and(|t| t.is_identifier()) { return false; }
    i += 1;
    if rest.get(i).is_some_and(|t| t.kind == TokenKind::LParen) {
        let Some(close) = matching_paren(rest, i) else { return false };
        i = close + 1;
    }
    rest.get(i).is_some_and(|t| t.is_keyword("AS"))
        && rest.get(i + 1).is_some_and(|t| t.kind == TokenKind::LParen)
        && rest.iter().any(|t| t.is_keyword("SELECT"))
}

/// A statement, or a table name optionally followed by a quoted column or pattern.
fn describe_shape(rest: &[Token<'_>]) -> bool {
    if statement_shape(rest) { return true; }
    let body = without_semicolon(rest);
    let n = qualified_name_len(body);
    n > 0
        && (n == body.len()
            || (n + 1 == body.len() && matches!(body[n].kind, TokenKind::QuotedIdent | TokenKind::Literal)))
}

fn explain_shape(rest: &[Token<'_>]) -> bool {
    let mut i = 0;
    while let Some(t) = rest.get(i) {
        if keyword_in(t, EXPLAIN_OPTIONS) {
            i += 1;
        } else if t.is_keyword("FORMAT") && is_op(rest.get(i + 1), "=") {
            i += 3;
        } else if t.is_keyword("QUERY") && rest.get(i + 1).is_some_and(|t| t.is_keyword("PLAN")) {
            i += 2;
        } else {
            break;
        }
    }
    rest.get(i..).is_some_and(describe_shape)
}

/// `UPDATE target ... SET col =`.
fn update_shape(rest: &[Token<'_>]) -> bool {
    let Some(set) = rest.iter().position(|t| t.is_keyword("SET")) else { return false };
    let skip = rest[..set]
        .iter()
        .take_while(|t| keyword_in(t, &["LOW_PRIORITY", "IGNORE", "ONLY"]))
        .count();
    if qualified_name_len(&rest[skip..set]) == 0 { return false; }
    let assign = &rest[set + 1..];
    let n = qualified_name_len(assign);
    n > 0 && is_op(assign.get(n), "=")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentKind {
    Code,
    Literal,
    QuotedIdent,
    Comment,
}

/// Splits SQL text into code, literal, quoted identifier and comment runs.
pub struct Segments<'a> {
    src: &'a str,
    pos: usize,
}

impl<'a> Segments<'a> {
    pub fn new(src: &'a str) -> Self { Self { src, pos: 0 } }

    fn scan_quoted(&self, start: usize, q: u8) -> usize {
        let b = self.src.as_bytes();
        let mut i = start + 1;
        while i < b.len() {
            if q == b'\'' && b[i] == b'\\' { i += 2; continue; }
            if b[i] == q {
                // doubled quote is an escape
                if i + 1 < b.len() && b[i + 1] == q { i += 2; continue; }
                return i + 1;
            }
            i += 1;
        }
        b.len()
    }

    fn scan_block_comment(&self, start: usize) -> usize {
        let b = self.src.as_bytes();
        let mut depth = 0i32;
        let mut i = start;
        while i < b.len() {
            if b[i] == b'/' && i + 1 < b.len() && b[i + 1] == b'*' { depth += 1; i += 2; continue; }
            if b[i] == b'*' && i + 1 < b.len() && b[i + 1] == b'/' {
                depth -= 1;
                i += 2;
                if depth == 0 { return i; }
                continue;
            }
            i += 1;
        }
        b.len()
    }

    fn scan_line_comment(&self, start: usize) -> usize {
        match self.src[start..].find('\n') {
            Some(off) => start + off,
            None => self.src.len(),
        }
    }

    fn special_at(&self, i: usize) -> Option<(SegmentKind, usize)> {
        let b = self.src.as_bytes();
        match b[i] {
            b'\'' => Some((SegmentKind::Literal, self.scan_quoted(i, b'\''))),
            b'"' | b'`' => Some((SegmentKind::QuotedIdent, self.scan_quoted(i, b[i]))),
            b'-' if i + 1 < b.len() && b[i + 1] == b'-' => Some((SegmentKind::Comment, self.scan_line_comment(i))),
            b'#' => Some((SegmentKind::Comment, self.scan_line_comment(i))),
            b'/' if i + 1 < b.len() && b[i + 1] == b'*' => Some((SegmentKind::Comment, self.scan_block_comment(i))),
            _ => None,
        }
    }
}

impl<'a> Iterator for Segments<'a> {
    type Item = (&'a str, SegmentKind);

    fn next(&mut self) -> Option<Self::Item> {
        if self.pos >= self.src.len() { return None; }
        let start = self.pos;
        if let Some((kind, end)) = self.special_at(start) {
            self.pos = end;
            return Some((&self.src[start..end], kind));
        }
        let mut i = start;
        while i < self.src.len() && self.special_at(i).is_none() {
            i += 1;
        }
        // specials are ASCII so `i` always lands on a char boundary
        self.pos = i;
        Some((&self.src[start..i], SegmentKind::Code))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Ident,
    QuotedIdent,
    Literal,
    Number,
    Dot,
    Comma,
    LParen,
    RParen,
    Star,
    Semicolon,
    Op,
}

/// A lexical token with its byte span in the original statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Token<'a> {
    pub kind: TokenKind,
    pub text: &'a str,
    pub start: usize,
    pub end: usize,
}

impl<'a> Token<'a> {
    pub fn is_keyword(&self, kw: &str) -> bool {
        self.kind == TokenKind::Ident && self.text.eq_ignore_ascii_case(kw)
    }

    pub fn is_identifier(&self) -> bool {
        matches!(self.kind, TokenKind::Ident | TokenKind::QuotedIdent)
    }

    /// Normalized identifier text; empty for non-identifiers.
    pub fn ident(&self) -> String {
        if self.is_identifier() { normalize_identifier(self.text) } else { String::new() }
    }
}

/// Tokenize SQL, dropping whitespace and comments.
pub fn tokenize(sql: &str) -> Vec<Token<'_>> {
    let mut out = Vec::new();
    let mut base = 0usize;
    for (piece, kind) in Segments::new(sql) {
        match kind {
            SegmentKind::Comment => {}
            SegmentKind::Literal => out.push(Token { kind: TokenKind::Literal, text: piece, start: base, end: base + piece.len() }),
            SegmentKind::QuotedIdent => out.push(Token { kind: TokenKind::QuotedIdent, text: piece, start: base, end: base + piece.len() }),
            SegmentKind::Code => lex_code(piece, base, &mut out),
        }
        base += piece.len();
    }
    out
}

fn lex_code<'a>(code: &'a str, base: usize, out: &mut Vec<Token<'a>>) {
    let mut chars = code.char_indices().peekable();
    while let Some((i, ch)) = chars.next() {
        if ch.is_whitespace() { continue; }
        let single = |kind| Token { kind, text: &code[i..i + ch.len_utf8()], start: base + i, end: base + i + ch.len_utf8() };
        if is_ident_start(ch) {
            let mut end = i + ch.len_utf8();
            while let Some(&(j, c)) = chars.peek() {
                if is_ident_char(c) { end = j + c.len_utf8(); chars.next(); } else { break; }
            }
            out.push(Token { kind: TokenKind::Ident, text: &code[i..end], start: base + i, end: base + end });
            continue;
        }
        if ch.is_ascii_digit() {
            let mut end = i + 1;
            while let Some(&(j, c)) = chars.peek() {
                if c.is_ascii_alphanumeric() || c == '.' || c == '_' { end = j + c.len_utf8(); chars.next(); } else { break; }
            }
            out.push(Token { kind: TokenKind::Number, text: &code[i..end], start: base + i, end: base + end });
            continue;
        }
        let kind = match ch {
            '.' => TokenKind::Dot,
            ',' => TokenKind::Comma,
            '(' => TokenKind::LParen,
            ')' => TokenKind::RParen,
            '*' => TokenKind::Star,
            ';' => TokenKind::Semicolon,
            _ => TokenKind::Op,
        };
        out.push(single(kind));
    }
}

/// Index of the token closing the parenthesis opened at `open`.
pub fn matching_paren(tokens: &[Token<'_>], open: usize) -> Option<usize> {
    let mut depth = 0i32;
    for (i, t) in tokens.iter().enumerate().skip(open) {
        match t.kind {
            TokenKind::LParen => depth += 1,
            TokenKind::RParen => {
                depth -= 1;
                if depth == 0 { return Some(i); }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn masks_preserve_offsets() {
        let sql = "SELECT a.x -- a.y\nFROM t a WHERE a.z = 'a.w 金额' /* b.q */";
        let masked = mask_literals_and_comments(sql);
        assert_eq!(masked.len(), sql.len());
        assert!(!masked.contains("a.y"));
        assert!(!masked.contains("a.w"));
        assert!(!masked.contains("b.q"));
        assert_eq!(&masked[..10], "SELECT a.x");
    }

    #[test]
    fn strip_comments_keeps_strings() {
        let s = strip_sql_comments("SELECT '--not' -- gone\nFROM t /* x /* y */ z */");
        assert!(s.contains("'--not'"));
        assert!(!s.contains("gone"));
        assert!(!s.contains('z'));
        assert!(s.contains('\n'));
    }

    #[test]
    fn keyword_at_depth_zero() {
        let sql = "SELECT (SELECT 1 FROM x) AS v, 'FROM' FROM t";
        let pos = find_keyword_ci_depth0(sql, "from").unwrap();
        assert_eq!(&sql[pos..], "FROM t");
        assert!(find_keyword_ci_depth0("SELECT fromage FROM", "FROM").is_some());
        assert!(find_keyword_ci_depth0("SELECT fromage", "FROM").is_none());
    }

    #[test]
    fn tokens_and_spans() {
        let sql = "SELECT `b`.strategy, 1.5 FROM t";
        let toks = tokenize(sql);
        assert_eq!(toks[1].kind, TokenKind::QuotedIdent);
        assert_eq!(toks[1].ident(), "b");
        assert_eq!(toks[2].kind, TokenKind::Dot);
        assert_eq!(&sql[toks[3].start..toks[3].end], "strategy");
        assert_eq!(toks[5].kind, TokenKind::Number);
        assert_eq!(toks[5].text, "1.5");
    }

    #[test]
    fn statement_detection() {
        assert!(looks_like_sql("SELECT 1"));
        assert!(looks_like_sql("  -- note\n with x as (select 1) select * from x"));
        assert!(looks_like_sql("(SELECT a FROM t)"));
        assert!(!looks_like_sql("{\"sql\": \"SELECT 1\"}"));
        assert!(!looks_like_sql("Selecting the best option"));
        assert!(!looks_like_sql("I think the answer is 42"));
        assert!(looks_like_sql("SHOW TABLES"));
        assert!(looks_like_sql("show full columns from orders"));
        assert!(looks_like_sql("DESC orders"));
        assert!(looks_like_sql("describe sales.orders 'total%';"));
        assert!(looks_like_sql("EXPLAIN FORMAT = JSON SELECT a FROM t"));
        assert!(looks_like_sql("SELECT DISTINCT o.id FROM orders o"));
        assert!(looks_like_sql("SELECT total t, id FROM orders"));
        assert!(looks_like_sql("UPDATE orders o SET o.total = 0"));
        assert!(looks_like_sql("GRANT SELECT ON sales.* TO analyst"));
    }

    #[test]
    fn prose_under_statement_keywords() {
        assert!(!looks_like_sql("Show me what you need: the year and the region"));
        assert!(!looks_like_sql("Explain: I could not find a matching table for this question"));
        assert!(!looks_like_sql("Explain the results"));
        assert!(!looks_like_sql("Update: the requested column does not exist"));
        assert!(!looks_like_sql("Update the report so it covers March"));
        assert!(!looks_like_sql("Describe the table layout"));
        assert!(!looks_like_sql("Create a chart of monthly sales"));
        assert!(!looks_like_sql("Select the best option for your budget"));
        assert!(!looks_like_sql("Select everything."));
        assert!(!looks_like_sql("With pleasure, here is the query"));
        assert!(!looks_like_sql("SELECT"));
        assert_eq!(first_keyword("/* hi */ drop table x").as_deref(), Some("DROP"));
    }
}
