//! `url(...)` references in stylesheet text.
//!
//! A reference is `url(`, an optional quote, one or more characters that are
//! neither quotes nor `)`, an optional quote, then `)`.

use std::collections::HashSet;
use std::ops::Range;

/// One `url(...)` occurrence; `span` covers the reference text only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrlRef<'a> {
    pub raw: &'a str,
    pub span: Range<usize>,
}

pub fn scan(css: &str) -> Vec<UrlRef<'_>> {
    const OPEN: &str = "url(";
    let mut refs = Vec::new();
    let mut pos = 0;

    while let Some(found) = css[pos..].find(OPEN) {
        let start = pos + found + OPEN.len();
        match reference_at(css, start) {
            Some((span, end)) => {
                refs.push(UrlRef {
                    raw: &css[span.clone()],
                    span,
                });
                pos = end;
            }
            None => pos = start,
        }
    }
    refs
}

/// Match the remainder of a reference starting just after `url(`. Returns the
/// span of the reference and the index after the closing paren.
fn reference_at(css: &str, start: usize) -> Option<(Range<usize>, usize)> {
    let is_quote = |c: char| c == '"' || c == '\'';
    let rest = &css[start..];
    let body_start = match rest.chars().next() {
        Some(c) if is_quote(c) => start + 1,
        _ => start,
    };

    let body = &css[body_start..];
    let len = body
        .find(|c: char| is_quote(c) || c == ')')
        .unwrap_or(body.len());
    if len == 0 {
        return None;
    }

    let mut end = body_start + len;
    if css[end..].starts_with(is_quote) {
        end += 1;
    }
    if !css[end..].starts_with(')') {
        return None;
    }
    Some((body_start..body_start + len, end + 1))
}

/// Distinct reference strings in first-seen order.
pub fn extract_urls(css: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    scan(css)
        .into_iter()
        .filter(|r| seen.insert(r.raw))
        .map(|r| r.raw.to_string())
        .collect()
}

/// Substitute every reference for which `replace` returns a value; others are
/// left as written.
pub fn rewrite_urls<F>(css: &str, mut replace: F) -> String
where
    F: FnMut(&str) -> Option<String>,
{
    let mut out = String::with_capacity(css.len());
    let mut copied = 0;
    for r in scan(css) {
        if let Some(new) = replace(r.raw) {
            out.push_str(&css[copied..r.span.start]);
            out.push_str(&new);
            copied = r.span.end;
        }
    }
    out.push_str(&css[copied..]);
    out
}

/// References that point at bytes already in the document.
pub fn is_inline(raw: &str) -> bool {
    let raw = raw.trim_start();
    raw.starts_with("data:") || raw.starts_with("blob:")
}
