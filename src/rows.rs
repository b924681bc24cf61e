//! Lifts block placeholders out of table rows.
//!
//! A row whose only placeholder is `{{range …}}` or `{{end}}` is replaced by
//! that placeholder, so the block repeats whole `<w:tr>` elements instead of
//! cutting a row in half. Any other text in such a row is dropped; authors are
//! expected to keep marker rows free of content.

use log::debug;
use regex::Regex;
use std::sync::LazyLock;
use std::time::{Duration, Instant};
use thiserror::Error;

use crate::defrag::text_content;

static PLACEHOLDER_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)\{\{.*?\}\}").unwrap());

const ROW_OPEN: &str = "<w:tr";
const ROW_CLOSE: &str = "</w:tr>";

/// Keywords whose placeholder may stand in for a whole row.
const LIFTABLE: &[&str] = &["range", "end", "if", "else", "with"];

#[derive(Error, Debug)]
pub enum RowScanError {
    #[error("row-range rewrite exceeded {limit:?} after {rows} rows")]
    Timeout { limit: Duration, rows: usize },
}

/// Rewrites every marker row until none is left.
pub fn lift_range_rows(xml: &str, limit: Duration) -> Result<String, RowScanError> {
    let deadline = Instant::now() + limit;
    let mut current = xml.to_string();
    loop {
        let (next, lifted) = lift_once(&current, deadline, limit)?;
        if lifted == 0 {
            return Ok(next);
        }
        debug!("lifted {} block placeholders out of table rows", lifted);
        current = next;
    }
}

/// Returns true when `xml[pos..]` starts a `<w:tr>` element (not `<w:trPr>` etc).
fn is_row_open(xml: &str, pos: usize) -> bool {
    match xml[pos + ROW_OPEN.len()..].chars().next() {
        Some('>') => true,
        Some(c) if c.is_whitespace() => {
            let tag_end = xml[pos..].find('>').map(|i| pos + i);
            tag_end.map_or(false, |end| !xml[..end].ends_with('/'))
        }
        _ => false,
    }
}

/// Byte ranges of rows that contain no nested row, in document order.
fn leaf_rows(xml: &str, deadline: Instant, limit: Duration) -> Result<Vec<(usize, usize)>, RowScanError> {
    // (start offset, has nested row)
    let mut stack: Vec<(usize, bool)> = Vec::new();
    let mut rows = Vec::new();
    let mut pos = 0;
    let mut next_open = xml.find(ROW_OPEN);

    loop {
        if Instant::now() >= deadline {
            return Err(RowScanError::Timeout { limit, rows: rows.len() });
        }
        let next_close = xml[pos..].find(ROW_CLOSE).map(|i| pos + i);
        match (next_open, next_close) {
            (Some(open), close) if close.map_or(true, |c| open < c) => {
                if is_row_open(xml, open) {
                    if let Some(parent) = stack.last_mut() {
                        parent.1 = true;
                    }
                    stack.push((open, false));
                }
                pos = open + ROW_OPEN.len();
                next_open = xml[pos..].find(ROW_OPEN).map(|i| pos + i);
            }
            (_, Some(close)) => {
                let end = close + ROW_CLOSE.len();
                if let Some((start, false)) = stack.pop() {
                    rows.push((start, end));
                }
                pos = end;
            }
            _ => break,
        }
    }

    rows.sort_unstable();
    Ok(rows)
}

fn keyword(placeholder: &str) -> &str {
    let inner = placeholder
        .trim_start_matches("{{")
        .trim_end_matches("}}")
        .trim_start_matches('-')
        .trim_end_matches('-')
        .trim();
    inner
        .split(|c: char| c.is_whitespace())
        .next()
        .unwrap_or("")
}

/// The placeholder that should replace the row, if the row is a marker row.
fn marker(row: &str) -> Option<String> {
    let text = text_content(row);
    let mut found = PLACEHOLDER_RE.find_iter(&text);
    let only = found.next()?;
    if found.next().is_some() {
        return None;
    }
    LIFTABLE
        .contains(&keyword(only.as_str()))
        .then(|| only.as_str().to_string())
}

fn lift_once(xml: &str, deadline: Instant, limit: Duration) -> Result<(String, usize), RowScanError> {
    let rows = leaf_rows(xml, deadline, limit)?;
    let mut out = String::with_capacity(xml.len());
    let mut last = 0;
    let mut lifted = 0;
    for (start, end) in rows {
        if let Some(placeholder) = marker(&xml[start..end]) {
            out.push_str(&xml[last..start]);
            out.push_str(&placeholder);
            last = end;
            lifted += 1;
        }
    }
    out.push_str(&xml[last..]);
    Ok((out, lifted))
}
