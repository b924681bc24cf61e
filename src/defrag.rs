//! Reassembles placeholders that Word split across several `<w:t>` elements.
//!
//! Word starts a new run whenever formatting, spell-check state or revision
//! marks change, so `{{.FirstName}}` can arrive as `{{.First` and `Name}}` in
//! two text elements. The merged text is written into the first element of the
//! group; the others keep their tags and become empty.

use log::debug;
use regex::Regex;
use std::sync::LazyLock;

static TEXT_ELEMENT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(<w:t(?:\s[^>]*)?>)([^<]*)(</w:t>)").unwrap());

/// A `<w:t>` element located in the source: byte range of its content plus the content itself.
struct TextSpan {
    start: usize,
    end: usize,
    content: String,
}

/// Delimiter balance of a piece of text.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Balance {
    pub opens: usize,
    pub closes: usize,
}

/// Counts non-overlapping `{{` and `}}` pairs, scanning left to right.
pub(crate) fn balance(text: &str) -> Balance {
    let bytes = text.as_bytes();
    let mut b = Balance::default();
    let mut i = 0;
    while i + 1 < bytes.len() {
        match (bytes[i], bytes[i + 1]) {
            (b'{', b'{') => {
                b.opens += 1;
                i += 2;
            }
            (b'}', b'}') => {
                b.closes += 1;
                i += 2;
            }
            _ => i += 1,
        }
    }
    b
}

/// True when the text ends in a lone `{` that may pair with a `{` in the next span.
fn ends_with_bare_open(text: &str) -> bool {
    let run = text.bytes().rev().take_while(|&c| c == b'{').count();
    run % 2 == 1
}

fn is_incomplete(text: &str) -> bool {
    let b = balance(text);
    b.opens > b.closes || ends_with_bare_open(text)
}

fn collect_spans(xml: &str) -> Vec<TextSpan> {
    TEXT_ELEMENT_RE
        .captures_iter(xml)
        .filter_map(|cap| {
            let open = cap.get(1)?;
            if open.as_str().ends_with("/>") {
                return None;
            }
            let content = cap.get(2)?;
            Some(TextSpan {
                start: content.start(),
                end: content.end(),
                content: content.as_str().to_string(),
            })
        })
        .collect()
}

/// Merges placeholders fragmented across text elements.
///
/// Never fails. A group of spans that is still unbalanced at the end of the
/// input is left untouched.
pub fn defragment(xml: &str) -> String {
    let spans = collect_spans(xml);
    if spans.is_empty() {
        return xml.to_string();
    }

    // (span index, replacement content)
    let mut rewrites: Vec<(usize, String)> = Vec::new();
    let mut group: Vec<usize> = Vec::new();
    let mut acc = String::new();

    for (i, span) in spans.iter().enumerate() {
        if group.is_empty() {
            if is_incomplete(&span.content) {
                group.push(i);
                acc.clear();
                acc.push_str(&span.content);
            }
            continue;
        }

        group.push(i);
        acc.push_str(&span.content);
        let b = balance(&acc);
        if b.closes >= b.opens && !ends_with_bare_open(&acc) {
            debug!("merged {} text elements into {:?}", group.len(), acc);
            rewrites.push((group[0], std::mem::take(&mut acc)));
            for &j in &group[1..] {
                rewrites.push((j, String::new()));
            }
            group.clear();
        }
    }

    if rewrites.is_empty() {
        return xml.to_string();
    }

    let mut out = String::with_capacity(xml.len());
    let mut last = 0;
    for (idx, content) in rewrites {
        let span = &spans[idx];
        out.push_str(&xml[last..span.start]);
        out.push_str(&content);
        last = span.end;
    }
    out.push_str(&xml[last..]);
    out
}

/// Concatenated contents of all text elements, in document order.
pub fn text_content(xml: &str) -> String {
    collect_spans(xml).into_iter().map(|s| s.content).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_merges_split_placeholder() {
        let xml = "<w:r><w:t>{{.First</w:t></w:r><w:r><w:t>Name}}</w:t></w:r>";
        assert_eq!(
            defragment(xml),
            "<w:r><w:t>{{.FirstName}}</w:t></w:r><w:r><w:t></w:t></w:r>"
        );
    }

    #[test]
    fn test_merges_across_three_runs_and_keeps_attributes() {
        let xml = concat!(
            r#"<w:r><w:t xml:space="preserve">Dear {</w:t></w:r>"#,
            r#"<w:r><w:rPr><w:b/></w:rPr><w:t>{ .Na</w:t></w:r>"#,
            r#"<w:r><w:t>me }} ,</w:t></w:r>"#,
        );
        assert_eq!(
            defragment(xml),
            concat!(
                r#"<w:r><w:t xml:space="preserve">Dear {{ .Name }} ,</w:t></w:r>"#,
                r#"<w:r><w:rPr><w:b/></w:rPr><w:t></w:t></w:r>"#,
                r#"<w:r><w:t></w:t></w:r>"#,
            )
        );
    }

    #[test]
    fn test_trim_markers_are_not_split() {
        let xml = "<w:t>{{-</w:t><w:t> .X -</w:t><w:t>}}</w:t>";
        assert_eq!(defragment(xml), "<w:t>{{- .X -}}</w:t><w:t></w:t><w:t></w:t>");
    }

    #[test]
    fn test_complete_spans_unchanged() {
        let xml = "<w:t>{{.A}}</w:t><w:t>plain</w:t><w:t>{{if .B}}x{{end}}</w:t>";
        assert_eq!(defragment(xml), xml);
    }

    #[test]
    fn test_unbalanced_tail_left_alone() {
        let xml = "<w:t>ok</w:t><w:t>{{.Broken</w:t><w:t>more</w:t>";
        assert_eq!(defragment(xml), xml);
    }

    #[test]
    fn test_no_text_elements() {
        let xml = "<w:p><w:tab/><w:tbl><w:tr/></w:tbl></w:p>";
        assert_eq!(defragment(xml), xml);
    }

    #[test]
    fn test_does_not_confuse_table_tags() {
        let xml = "<w:tbl><w:tr><w:tc><w:t>{{.</w:t><w:t>A}}</w:t></w:tc></w:tr></w:tbl>";
        assert_eq!(
            defragment(xml),
            "<w:tbl><w:tr><w:tc><w:t>{{.A}}</w:t><w:t></w:t></w:tc></w:tr></w:tbl>"
        );
    }

    fn fragment_strategy() -> impl Strategy<Value = Vec<String>> {
        prop::collection::vec("[a-c{} .-]{0,6}", 1..8)
    }

    fn wrap(fragments: &[String]) -> String {
        fragments
            .iter()
            .map(|f| format!("<w:r><w:t>{}</w:t></w:r>", f))
            .collect()
    }

    proptest! {
        #[test]
        fn prop_defragment_is_idempotent(fragments in fragment_strategy()) {
            let xml = wrap(&fragments);
            let once = defragment(&xml);
            prop_assert_eq!(defragment(&once), once);
        }

        #[test]
        fn prop_defragment_preserves_text(fragments in fragment_strategy()) {
            let xml = wrap(&fragments);
            prop_assert_eq!(text_content(&defragment(&xml)), text_content(&xml));
        }
    }
}
