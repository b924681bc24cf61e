//! Decides which package parts take part in templating.

use regex::Regex;
use std::fmt;
use std::sync::LazyLock;

static HEADER_FOOTER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^word/(header|footer)[0-9]+\.xml$").unwrap());

/// What a part is for, as far as templating is concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PartRole {
    Body,
    Header,
    Footer,
    Footnotes,
    Endnotes,
    Props,
    Relationship,
    Other,
}

impl PartRole {
    /// Whether parts with this role are run through the template pipeline.
    pub fn is_processable(&self) -> bool {
        !matches!(self, PartRole::Relationship | PartRole::Other)
    }

    /// Location label used in errors and validator diagnostics.
    pub fn label(&self) -> &'static str {
        match self {
            PartRole::Body => "document body",
            PartRole::Header => "header",
            PartRole::Footer => "footer",
            PartRole::Footnotes => "footnotes",
            PartRole::Endnotes => "endnotes",
            PartRole::Props => "document properties",
            PartRole::Relationship => "relationships",
            PartRole::Other => "other",
        }
    }
}

impl fmt::Display for PartRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Classifies a part by its path inside the package.
pub fn classify(path: &str) -> PartRole {
    match path {
        "word/document.xml" => PartRole::Body,
        "word/footnotes.xml" => PartRole::Footnotes,
        "word/endnotes.xml" => PartRole::Endnotes,
        "docProps/core.xml" | "docProps/app.xml" => PartRole::Props,
        _ if path.ends_with(".rels") => PartRole::Relationship,
        _ => match HEADER_FOOTER_RE.captures(path) {
            Some(caps) if &caps[1] == "header" => PartRole::Header,
            Some(_) => PartRole::Footer,
            None => PartRole::Other,
        },
    }
}

/// Path of the relationship sidecar belonging to `part_path`.
///
/// `word/document.xml` maps to `word/_rels/document.xml.rels`.
pub fn sidecar_path(part_path: &str) -> String {
    match part_path.rsplit_once('/') {
        Some((dir, base)) => format!("{}/_rels/{}.rels", dir, base),
        None => format!("_rels/{}.rels", part_path),
    }
}
