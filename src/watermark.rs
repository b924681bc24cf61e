//! Placeholders inside VML watermark text.
//!
//! A header watermark keeps its text in the `string` attribute of a
//! `<v:textpath>` element. Those values are swapped for sentinels before the
//! header goes through the main pipeline, then rendered on their own with
//! attribute escaping and written back into the same slot.

use log::debug;
use regex::{Captures, Regex};
use std::sync::LazyLock;

use crate::data::Value;
use crate::engine::{Escape, TemplateEngine, NO_VALUE};
use crate::entities::decode_placeholders;
use crate::error::Result;
use crate::relationships::HyperlinkRegistry;

static TEXTPATH_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(<v:textpath\b[^>]*?\sstring=")([^"]*)(")"#).unwrap());

const SENTINEL_OPEN: char = '\u{E000}';
const SENTINEL_CLOSE: char = '\u{E001}';

fn sentinel(index: usize) -> String {
    format!("{}{}{}", SENTINEL_OPEN, index, SENTINEL_CLOSE)
}

/// Replaces every textpath `string` value with a sentinel.
///
/// Returns the shielded XML and the original values, indexed by sentinel.
pub fn shield_textpaths(xml: &str) -> (String, Vec<String>) {
    let mut slots = Vec::new();
    let shielded = TEXTPATH_RE.replace_all(xml, |caps: &Captures| {
        let marker = sentinel(slots.len());
        slots.push(caps[2].to_string());
        format!("{}{}{}", &caps[1], marker, &caps[3])
    });
    (shielded.into_owned(), slots)
}

/// Renders each shielded value as a template and puts it back in its slot.
///
/// Entities are decoded inside placeholders only, so literal text keeps its
/// attribute encoding. Values without a placeholder are restored untouched.
pub fn render_textpaths(
    xml: &str,
    slots: &[String],
    engine: &TemplateEngine,
    data: &Value,
    links: &HyperlinkRegistry,
) -> Result<String> {
    let mut out = xml.to_string();
    for (i, slot) in slots.iter().enumerate() {
        let value = if slot.contains("{{") {
            let source = decode_placeholders(slot, true);
            let template = engine.parse("watermark", &source)?;
            let rendered = engine.execute_with(&template, data, links, Escape::Attribute)?;
            debug!("rendered watermark text {:?}", rendered);
            rendered.replace(NO_VALUE, "")
        } else {
            slot.clone()
        };
        out = out.replace(&sentinel(i), &value);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const HEADER: &str = r#"<w:hdr><w:p><w:r><w:t>{{.Title}}</w:t></w:r><w:r><w:pict><v:shape id="PowerPlusWaterMarkObject"><v:textpath style="font-family:&quot;Calibri&quot;" string="{{ upper .Status }}" trim="t"/></v:shape></w:pict></w:r></w:p></w:hdr>"#;

    #[test]
    fn test_shield_keeps_surrounding_markup() {
        let (shielded, slots) = shield_textpaths(HEADER);
        assert_eq!(slots, vec!["{{ upper .Status }}"]);
        assert!(!shielded.contains("upper"));
        assert!(shielded.contains(r#"style="font-family:&quot;Calibri&quot;" string=""#));
        assert!(shielded.contains("{{.Title}}"));
    }

    #[test]
    fn test_render_replaces_only_the_slot() {
        let (shielded, slots) = shield_textpaths(HEADER);
        let data = Value::from(json!({"Status": "draft <v2>"}));
        let out = render_textpaths(&shielded, &slots, &TemplateEngine::new(), &data, &HyperlinkRegistry::new()).unwrap();
        assert!(out.contains(r#"string="DRAFT &lt;V2&gt;" trim="t"/>"#));
        assert_eq!(out.replace(r#"DRAFT &lt;V2&gt;"#, "{{ upper .Status }}"), HEADER);
    }

    #[test]
    fn test_entities_decoded_before_parsing() {
        let xml = r#"<v:textpath string="{{ default &quot;CONFIDENTIAL&quot; .Mark }}"/>"#;
        let (shielded, slots) = shield_textpaths(xml);
        let data = Value::from(json!({}));
        let out = render_textpaths(&shielded, &slots, &TemplateEngine::new(), &data, &HyperlinkRegistry::new()).unwrap();
        assert_eq!(out, r#"<v:textpath string="CONFIDENTIAL"/>"#);
    }

    #[test]
    fn test_plain_values_restored() {
        let xml = r#"<v:textpath string="ASAP &amp; SECRET"/>"#;
        let (shielded, slots) = shield_textpaths(xml);
        let out = render_textpaths(&shielded, &slots, &TemplateEngine::new(), &Value::from(json!({})), &HyperlinkRegistry::new())
            .unwrap();
        assert_eq!(out, xml);
    }
}
