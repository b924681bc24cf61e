//! Helpers that emit WordprocessingML run fragments.
//!
//! Every rich-text wrapper closes the run it is printed into, opens a
//! formatted run holding the payload, and reopens a plain run so the
//! surrounding `</w:t></w:r>` still has something to close. The empty runs
//! this leaves behind are removed by the post-fixer.

use super::{int_arg, text_arg, Arity, HelperContext, HelperError, HelperRegistry};
use crate::data::Value;

pub const LINE_BREAK: &str = r#"</w:t><w:br/><w:t xml:space="preserve">"#;
pub const TAB: &str = r#"</w:t><w:tab/><w:t xml:space="preserve">"#;
pub const PAGE_BREAK: &str =
    r#"</w:t></w:r><w:r><w:br w:type="page"/></w:r><w:r><w:t xml:space="preserve">"#;
pub const SECTION_BREAK: &str = concat!(
    r#"</w:t></w:r></w:p>"#,
    r#"<w:p><w:pPr><w:sectPr><w:type w:val="nextPage"/></w:sectPr></w:pPr></w:p>"#,
    r#"<w:p><w:r><w:t xml:space="preserve">"#,
);

/// Payload text, escaped unless it is already markup.
fn payload(value: &Value) -> String {
    match value {
        Value::Markup(raw) => raw.clone(),
        other => html_escape::encode_text(&text_arg(other)).into_owned(),
    }
}

fn attr(value: &Value) -> String {
    html_escape::encode_double_quoted_attribute(&text_arg(value)).into_owned()
}

fn hex(value: &Value) -> String {
    attr(value).trim_start_matches('#').to_string()
}

/// Wraps `text` in a run with the given run properties.
pub fn styled_run(props: &str, text: &Value) -> Value {
    Value::Markup(format!(
        "</w:t></w:r><w:r><w:rPr>{}</w:rPr><w:t>{}</w:t></w:r><w:r><w:t>",
        props,
        payload(text)
    ))
}

fn toggle(registry: &mut HelperRegistry, name: &str, props: &'static str) {
    registry.register(name, Arity::exact(1), move |_, args| Ok(styled_run(props, &args[0])));
}

fn fixed(registry: &mut HelperRegistry, name: &str, fragment: &'static str) {
    registry.register(name, Arity::exact(0), move |_, _| Ok(Value::Markup(fragment.to_string())));
}

pub(super) fn register(registry: &mut HelperRegistry) {
    toggle(registry, "bold", "<w:b/>");
    toggle(registry, "italic", "<w:i/>");
    toggle(registry, "underline", r#"<w:u w:val="single"/>"#);
    toggle(registry, "strikethrough", "<w:strike/>");
    toggle(registry, "doubleStrike", "<w:dstrike/>");
    toggle(registry, "subscript", r#"<w:vertAlign w:val="subscript"/>"#);
    toggle(registry, "superscript", r#"<w:vertAlign w:val="superscript"/>"#);
    toggle(registry, "smallCaps", "<w:smallCaps/>");
    toggle(registry, "allCaps", "<w:caps/>");
    toggle(registry, "shadow", "<w:shadow/>");
    toggle(registry, "outline", "<w:outline/>");
    toggle(registry, "emboss", "<w:emboss/>");
    toggle(registry, "imprint", "<w:imprint/>");

    registry.register("color", Arity::exact(2), |_, args| {
        Ok(styled_run(&format!(r#"<w:color w:val="{}"/>"#, hex(&args[0])), &args[1]))
    });
    registry.register("bgColor", Arity::exact(2), |_, args| {
        let props = format!(r#"<w:shd w:val="clear" w:color="auto" w:fill="{}"/>"#, hex(&args[0]));
        Ok(styled_run(&props, &args[1]))
    });
    registry.register("highlight", Arity::exact(2), |_, args| {
        Ok(styled_run(&format!(r#"<w:highlight w:val="{}"/>"#, attr(&args[0])), &args[1]))
    });
    registry.register("fontSize", Arity::exact(2), |_, args| {
        let size = int_arg("fontSize", &args[0])?;
        Ok(styled_run(&size_props(size), &args[1]))
    });
    registry.register("fontFamily", Arity::exact(2), |_, args| {
        Ok(styled_run(&fonts_props(&attr(&args[0])), &args[1]))
    });
    registry.register("font", Arity::exact(4), |_, args| {
        let size = int_arg("font", &args[1])?;
        let props = format!(
            r#"{}<w:color w:val="{}"/>{}"#,
            fonts_props(&attr(&args[0])),
            hex(&args[2]),
            size_props(size)
        );
        Ok(styled_run(&props, &args[3]))
    });

    fixed(registry, "br", LINE_BREAK);
    fixed(registry, "tab", TAB);
    fixed(registry, "pageBreak", PAGE_BREAK);
    fixed(registry, "sectionBreak", SECTION_BREAK);

    registry.register("link", Arity::exact(2), link);
    registry.register("wordwrap", Arity::exact(2), wordwrap);
}

fn size_props(half_points: i64) -> String {
    format!(r#"<w:sz w:val="{0}"/><w:szCs w:val="{0}"/>"#, half_points)
}

fn fonts_props(name: &str) -> String {
    format!(r#"<w:rFonts w:ascii="{0}" w:hAnsi="{0}" w:cs="{0}"/>"#, name)
}

/// External hyperlink; the URL is registered so its sidecar entry can be written.
fn link(ctx: &HelperContext<'_>, args: &[Value]) -> Result<Value, HelperError> {
    let url = text_arg(&args[0]);
    if url.is_empty() {
        return Err(HelperError::invalid("link", "empty URL"));
    }
    let id = ctx.links.register(&url);
    Ok(Value::Markup(format!(
        concat!(
            r#"</w:t></w:r><w:hyperlink r:id="{}" w:history="1">"#,
            r#"<w:r><w:rPr><w:rStyle w:val="Hyperlink"/><w:color w:val="0563C1"/><w:u w:val="single"/></w:rPr>"#,
            r#"<w:t>{}</w:t></w:r></w:hyperlink><w:r><w:t>"#,
        ),
        id,
        payload(&args[1])
    )))
}

/// Wraps text at `width` characters, breaking lines with `<w:br/>`.
fn wordwrap(_: &HelperContext<'_>, args: &[Value]) -> Result<Value, HelperError> {
    let (text, width) = if args[0].is_number() && !args[1].is_number() {
        (&args[1], &args[0])
    } else {
        (&args[0], &args[1])
    };
    let width = int_arg("wordwrap", width)?;
    if width <= 0 {
        return Err(HelperError::invalid("wordwrap", "width must be positive"));
    }
    let width = width as usize;

    let mut lines: Vec<String> = Vec::new();
    let mut line = String::new();
    for word in text_arg(text).split_whitespace() {
        if !line.is_empty() && line.chars().count() + 1 + word.chars().count() > width {
            lines.push(std::mem::take(&mut line));
        }
        if !line.is_empty() {
            line.push(' ');
        }
        line.push_str(word);
    }
    if !line.is_empty() {
        lines.push(line);
    }

    let escaped: Vec<String> = lines
        .iter()
        .map(|l| html_escape::encode_text(l).into_owned())
        .collect();
    Ok(Value::Markup(escaped.join(LINE_BREAK)))
}

#[cfg(test)]
mod tests {
    use super::super::testing::*;
    use super::*;
    use crate::relationships::HyperlinkRegistry;

    fn markup(value: Value) -> String {
        match value {
            Value::Markup(raw) => raw,
            other => panic!("expected markup, got {:?}", other),
        }
    }

    #[test]
    fn test_bold_fragment_shape() {
        let out = markup(call("bold", &[s("Total")]).unwrap());
        assert_eq!(
            out,
            "</w:t></w:r><w:r><w:rPr><w:b/></w:rPr><w:t>Total</w:t></w:r><w:r><w:t>"
        );
    }

    #[test]
    fn test_payload_escaped() {
        let out = markup(call("italic", &[s("A & <B>")]).unwrap());
        assert!(out.contains(">A &amp; &lt;B&gt;</w:t>"));
    }

    #[test]
    fn test_color_strips_hash() {
        let out = markup(call("color", &[s("#FF0000"), s("red")]).unwrap());
        assert!(out.contains(r#"<w:color w:val="FF0000"/>"#));
        let out = markup(call("bgColor", &[s("00FF00"), s("x")]).unwrap());
        assert!(out.contains(r#"w:fill="00FF00""#));
    }

    #[test]
    fn test_font_combines_properties() {
        let out = markup(call("font", &[s("Arial"), Value::Int(28), s("#0000FF"), s("x")]).unwrap());
        assert!(out.contains(
            r#"<w:rPr><w:rFonts w:ascii="Arial" w:hAnsi="Arial" w:cs="Arial"/><w:color w:val="0000FF"/><w:sz w:val="28"/><w:szCs w:val="28"/></w:rPr>"#
        ));
        assert!(call("fontSize", &[s("big"), s("x")]).is_err());
    }

    #[test]
    fn test_link_registers_url() {
        let links = HyperlinkRegistry::new();
        let out = markup(call_with("link", &[s("https://example.com"), s("Home")], &links, false).unwrap());
        assert!(out.contains(r#"<w:hyperlink r:id="rIdLink100" w:history="1">"#));
        assert!(out.contains(">Home</w:t>"));
        assert_eq!(links.url_for("rIdLink100").as_deref(), Some("https://example.com"));
    }

    #[test]
    fn test_structure_helpers() {
        assert_eq!(markup(call("br", &[]).unwrap()), LINE_BREAK);
        assert!(markup(call("pageBreak", &[]).unwrap()).contains(r#"<w:br w:type="page"/>"#));
        assert!(markup(call("sectionBreak", &[]).unwrap()).contains("<w:sectPr>"));
    }

    #[test]
    fn test_wordwrap() {
        let out = markup(call("wordwrap", &[s("the quick brown fox & co"), Value::Int(10)]).unwrap());
        assert_eq!(
            out,
            format!("the quick{br}brown fox{br}&amp; co", br = LINE_BREAK)
        );
    }
}
