//! Decodes character entities inside placeholders, and only there.
//!
//! Word writes `"` as `&quot;` (or `&#34;`) and `&` as `&amp;`, which the
//! template parser cannot read as string literals or operators.

use std::borrow::Cow;

/// Decodes entities inside every `{{ … }}` span of `xml`.
///
/// Span boundaries are found with a depth counter on `{{`/`}}`, so a
/// placeholder whose string literal contains braces is still treated as one
/// span. An unterminated span is copied through undecoded.
pub fn decode_placeholders(xml: &str, normalize_quotes: bool) -> String {
    let bytes = xml.as_bytes();
    let mut out = String::with_capacity(xml.len());
    let mut last = 0;
    let mut i = 0;

    while i + 1 < bytes.len() {
        if !(bytes[i] == b'{' && bytes[i + 1] == b'{') {
            i += 1;
            continue;
        }
        let start = i;
        let mut depth = 0usize;
        let mut j = i;
        let mut end = None;
        while j + 1 < bytes.len() {
            match (bytes[j], bytes[j + 1]) {
                (b'{', b'{') => {
                    depth += 1;
                    j += 2;
                }
                (b'}', b'}') => {
                    depth -= 1;
                    j += 2;
                    if depth == 0 {
                        end = Some(j);
                        break;
                    }
                }
                _ => j += 1,
            }
        }
        let Some(end) = end else {
            break;
        };
        out.push_str(&xml[last..start]);
        out.push_str(&decode_span(&xml[start..end], normalize_quotes));
        last = end;
        i = end;
    }

    out.push_str(&xml[last..]);
    out
}

fn decode_span(span: &str, normalize_quotes: bool) -> Cow<'_, str> {
    let decoded = html_escape::decode_html_entities(span);
    if !normalize_quotes {
        return decoded;
    }
    if decoded.contains(['\u{201C}', '\u{201D}', '\u{2018}', '\u{2019}']) {
        Cow::Owned(
            decoded
                .replace(['\u{201C}', '\u{201D}'], "\"")
                .replace(['\u{2018}', '\u{2019}'], "'"),
        )
    } else {
        decoded
    }
}
