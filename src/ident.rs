//! Identifier normalization shared by the catalog, the extractor and the validator.
//! Unquoted identifiers compare case-insensitively; quoted ones keep their case.

/// Normalize an identifier according to SQL rules:
/// - If enclosed in backticks or double-quotes, strip quotes and preserve case
/// - Otherwise, convert to lowercase for case-insensitive matching
pub fn normalize_identifier(ident: &str) -> String {
    let trimmed = ident.trim();
    if trimmed.len() >= 2
        && ((trimmed.starts_with('"') && trimmed.ends_with('"'))
            || (trimmed.starts_with('`') && trimmed.ends_with('`'))
            || (trimmed.starts_with('[') && trimmed.ends_with(']')))
    {
        trimmed[1..trimmed.len() - 1].to_string()
    } else {
        trimmed.to_ascii_lowercase()
    }
}

/// Normalize every segment of a dotted name: `Sales."Orders"` -> `sales.Orders`.
pub fn normalize_qualified(name: &str) -> String {
    split_qualified(name)
        .iter()
        .map(|p| normalize_identifier(p))
        .collect::<Vec<_>>()
        .join(".")
}

/// Split a dotted identifier on dots that are not inside quotes.
pub fn split_qualified(name: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut start = 0usize;
    let mut quote: Option<char> = None;
    for (i, ch) in name.char_indices() {
        match quote {
            Some(q) => {
                if ch == q { quote = None; }
            }
            None => match ch {
                '"' | '`' => quote = Some(ch),
                '[' => quote = Some(']'),
                '.' => {
                    parts.push(name[start..i].trim());
                    start = i + 1;
                }
                _ => {}
            },
        }
    }
    parts.push(name[start..].trim());
    parts
}

/// Last segment of a dotted name, normalized.
pub fn last_segment(name: &str) -> String {
    let parts = split_qualified(name);
    parts.last().map(|p| normalize_identifier(p)).unwrap_or_default()
}

/// Quote an identifier with the given quote char unless it is already quoted.
pub fn quote_identifier(ident: &str, quote: char) -> String {
    let t = ident.trim();
    if t.len() >= 2 && (t.starts_with('`') || t.starts_with('"')) {
        return t.to_string();
    }
    let escaped = t.replace(quote, &format!("{}{}", quote, quote));
    format!("{}{}{}", quote, escaped, quote)
}

pub fn is_ident_start(ch: char) -> bool {
    ch == '_' || ch.is_alphabetic()
}

pub fn is_ident_char(ch: char) -> bool {
    ch == '_' || ch == '$' || ch.is_alphanumeric()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_variants() {
        assert_eq!(normalize_identifier("Orders"), "orders");
        assert_eq!(normalize_identifier("`Orders`"), "Orders");
        assert_eq!(normalize_identifier("\"Orders\""), "Orders");
        assert_eq!(normalize_identifier("  t1 "), "t1");
    }

    #[test]
    fn qualified_names() {
        assert_eq!(normalize_qualified("Sales.`Lending Orders`"), "sales.Lending Orders");
        assert_eq!(split_qualified("a.\"b.c\".d"), vec!["a", "\"b.c\"", "d"]);
        assert_eq!(last_segment("db.Orders"), "orders");
    }

    #[test]
    fn quoting() {
        assert_eq!(quote_identifier("金额", '`'), "`金额`");
        assert_eq!(quote_identifier("`x`", '"'), "`x`");
        assert_eq!(quote_identifier("a\"b", '"'), "\"a\"\"b\"");
    }
}
