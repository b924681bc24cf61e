//! Static checks over template parts, without executing them.
//!
//! Unlike rendering, validation does not stop at the first problem: every
//! part is checked and all diagnostics are returned together.

use log::{debug, warn};
use regex::Regex;
use std::path::Path;
use std::sync::LazyLock;
use std::time::Duration;

use crate::config::{ConfigError, RenderConfig};
use crate::data::Value;
use crate::engine::TemplateEngine;
use crate::entities::decode_placeholders;
use crate::error::{Error, ErrorCode};
use crate::generator::prepare_part;
use crate::package::Package;
use crate::parts::PartRole;

static PLACEHOLDER_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)\{\{(.*?)\}\}").unwrap());

const BLOCK_OPENERS: &[&str] = &["if", "range", "with", "block", "define"];

/// One problem found in a template.
#[derive(Debug, Clone, PartialEq)]
pub struct Diagnostic {
    pub code: ErrorCode,
    /// Part label such as `document body`, or the file path for file checks.
    pub location: String,
    pub message: String,
    pub placeholder: Option<String>,
    /// Data path for `UNDEFINED_FIELD`.
    pub field: Option<String>,
    pub suggestions: Vec<String>,
}

impl Diagnostic {
    pub fn new(code: ErrorCode, location: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code,
            location: location.into(),
            message: message.into(),
            placeholder: None,
            field: None,
            suggestions: code.suggestions(),
        }
    }

    pub fn with_placeholder(mut self, placeholder: impl Into<String>) -> Self {
        self.placeholder = Some(placeholder.into());
        self
    }

    fn from_error(err: &Error, location: &str) -> Self {
        Self {
            code: err.code,
            location: err.location.clone().unwrap_or_else(|| location.to_string()),
            message: err.message.clone(),
            placeholder: err.placeholder.clone(),
            field: None,
            suggestions: err.suggestions.clone(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ValidationResult {
    pub diagnostics: Vec<Diagnostic>,
}

impl ValidationResult {
    pub fn is_valid(&self) -> bool {
        self.diagnostics.is_empty()
    }

    /// Diagnostics grouped by location, in order of first appearance.
    pub fn by_location(&self) -> Vec<(&str, Vec<&Diagnostic>)> {
        let mut groups: Vec<(&str, Vec<&Diagnostic>)> = Vec::new();
        for diagnostic in &self.diagnostics {
            match groups.iter_mut().find(|(loc, _)| *loc == diagnostic.location) {
                Some((_, group)) => group.push(diagnostic),
                None => groups.push((diagnostic.location.as_str(), vec![diagnostic])),
            }
        }
        groups
    }

    pub fn with_code(&self, code: ErrorCode) -> impl Iterator<Item = &Diagnostic> {
        self.diagnostics.iter().filter(move |d| d.code == code)
    }
}

/// First word of a placeholder body, without trim markers.
fn keyword(body: &str) -> &str {
    let body = body.strip_prefix('-').unwrap_or(body);
    let body = body.strip_suffix('-').unwrap_or(body).trim();
    body.split(|c: char| c.is_whitespace() || c == '(')
        .next()
        .unwrap_or("")
}

/// Checks delimiter balance and block nesting of prepared content.
pub fn check_structure(location: &str, content: &str) -> Vec<Diagnostic> {
    let mut diagnostics = Vec::new();

    let opens = content.matches("{{").count();
    let closes = content.matches("}}").count();
    if opens != closes {
        diagnostics.push(Diagnostic::new(
            ErrorCode::UnclosedTag,
            location,
            format!("found {} opening and {} closing delimiters", opens, closes),
        ));
    }

    let mut stack: Vec<&str> = Vec::new();
    for caps in PLACEHOLDER_RE.captures_iter(content) {
        let tag = caps.get(0).map_or("", |m| m.as_str());
        let body = &caps[1];
        if body.trim_start_matches('-').trim_start().starts_with("/*") {
            continue;
        }
        match keyword(body) {
            "end" => {
                if stack.pop().is_none() {
                    diagnostics.push(
                        Diagnostic::new(
                            ErrorCode::UnmatchedEnd,
                            location,
                            "{{end}} without a matching block opener",
                        )
                        .with_placeholder(tag),
                    );
                }
            }
            word if BLOCK_OPENERS.contains(&word) => stack.push(tag),
            _ => {}
        }
    }
    if let Some(innermost) = stack.last() {
        diagnostics.push(
            Diagnostic::new(
                ErrorCode::UnclosedTag,
                location,
                format!("{} block(s) never closed", stack.len()),
            )
            .with_placeholder(*innermost),
        );
    }
    diagnostics
}

/// Runs structural, parse and data checks over template packages.
pub struct Validator {
    engine: TemplateEngine,
    row_scan_timeout: Duration,
    normalize_quotes: bool,
}

impl Validator {
    pub fn new(engine: TemplateEngine) -> Self {
        let defaults = RenderConfig::default();
        Self {
            engine,
            row_scan_timeout: defaults.row_scan_timeout(),
            normalize_quotes: defaults.normalize_smart_quotes,
        }
    }

    pub fn from_config(config: &RenderConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            engine: config.build_engine()?,
            row_scan_timeout: config.row_scan_timeout(),
            normalize_quotes: config.normalize_smart_quotes,
        })
    }

    /// Validates a template file, including the checks on the file itself.
    pub fn validate_file(&self, path: &Path, data: Option<&Value>) -> ValidationResult {
        let location = path.display().to_string();
        let is_docx = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map_or(false, |ext| ext.eq_ignore_ascii_case("docx"));
        let diagnostic = if !is_docx {
            Diagnostic::new(ErrorCode::InvalidFile, location, "template must be a .docx file")
        } else {
            match Package::open(path) {
                Ok(package) => return self.validate_package(&package, data),
                Err(err) => Diagnostic::from_error(&err, &location),
            }
        };
        warn!("{}: {}", diagnostic.code, diagnostic.message);
        ValidationResult {
            diagnostics: vec![diagnostic],
        }
    }

    /// Validates every processable part of a package.
    pub fn validate_package(&self, package: &Package, data: Option<&Value>) -> ValidationResult {
        let mut result = ValidationResult::default();
        for part in package.parts().iter().filter(|p| p.role.is_processable()) {
            let location = part.role.label();
            match part.text() {
                Ok(xml) => result
                    .diagnostics
                    .extend(self.validate_part(&part.path, part.role, &xml, data)),
                Err(err) => result.diagnostics.push(Diagnostic::from_error(&err, location)),
            }
        }
        debug!("validation found {} diagnostics", result.diagnostics.len());
        result
    }

    /// Checks one part's raw XML.
    pub fn validate_part(&self, name: &str, role: PartRole, xml: &str, data: Option<&Value>) -> Vec<Diagnostic> {
        let location = role.label();
        let prepared = match prepare_part(xml, role, self.row_scan_timeout, self.normalize_quotes) {
            Ok(prepared) => prepared,
            Err(err) => return vec![Diagnostic::from_error(&Error::from(err), location)],
        };

        let mut diagnostics = Vec::new();
        let mut sources = vec![(name.to_string(), prepared.xml)];
        for (i, slot) in prepared.textpaths.iter().enumerate() {
            if slot.contains("{{") {
                let decoded = decode_placeholders(slot, self.normalize_quotes);
                sources.push((format!("{}#watermark{}", name, i + 1), decoded));
            }
        }

        for (source_name, content) in &sources {
            let structural = check_structure(location, content);
            if !structural.is_empty() {
                diagnostics.extend(structural);
                diagnostics.extend(self.check_placeholders(source_name, location, content));
                continue;
            }
            let template = match self.engine.parse(source_name, content) {
                Ok(template) => template,
                Err(err) => {
                    diagnostics.push(Diagnostic::from_error(&Error::from(err), location));
                    continue;
                }
            };
            let Some(data) = data else {
                continue;
            };
            for path in template.field_paths() {
                if !path.resolves_in(data) {
                    let mut diagnostic = Diagnostic::new(
                        ErrorCode::UndefinedField,
                        location,
                        format!("field {} is not present in the data", path),
                    );
                    diagnostic.field = Some(path.to_string());
                    diagnostics.push(diagnostic);
                }
            }
        }
        diagnostics
    }

    /// Parses each well-formed placeholder on its own.
    ///
    /// Used when the block structure is broken, so syntax and function
    /// errors are still reported in the same pass.
    fn check_placeholders(&self, source_name: &str, location: &str, content: &str) -> Vec<Diagnostic> {
        let mut diagnostics = Vec::new();
        for caps in PLACEHOLDER_RE.captures_iter(content) {
            let whole = caps.get(0).map_or("", |m| m.as_str());
            // An unclosed `{{` swallows up to the next `}}`.
            let tag = whole.rfind("{{").map_or(whole, |start| &whole[start..]);
            let body = &tag[2..tag.len() - 2];
            if body.trim_start_matches('-').trim_start().starts_with("/*") {
                continue;
            }
            let Some(source) = standalone(body, tag) else {
                continue;
            };
            if let Err(err) = self.engine.parse(source_name, &source) {
                let mut diagnostic = Diagnostic::from_error(&Error::from(err), location);
                diagnostic.placeholder = Some(tag.to_string());
                diagnostics.push(diagnostic);
            }
        }
        diagnostics
    }
}

/// Wraps a lone block keyword so it parses without its partners.
fn standalone(body: &str, tag: &str) -> Option<String> {
    let words: Vec<&str> = body.trim_matches('-').split_whitespace().collect();
    match keyword(body) {
        "end" => None,
        "if" | "range" | "with" | "block" | "define" => Some(format!("{}{{{{end}}}}", tag)),
        "else" if words.get(1) == Some(&"with") => Some(format!("{{{{with 1}}}}{}{{{{end}}}}", tag)),
        "else" => Some(format!("{{{{if 1}}}}{}{{{{end}}}}", tag)),
        "break" | "continue" => Some(format!("{{{{range 1}}}}{}{{{{end}}}}", tag)),
        _ => Some(tag.to_string()),
    }
}

impl Default for Validator {
    fn default() -> Self {
        Self::new(TemplateEngine::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn body(inner: &str) -> String {
        format!("<w:document><w:body><w:p><w:r><w:t>{}</w:t></w:r></w:p></w:body></w:document>", inner)
    }

    fn validate(inner: &str, data: Option<serde_json::Value>) -> Vec<Diagnostic> {
        let data = data.map(Value::from);
        Validator::default().validate_part("word/document.xml", PartRole::Body, &body(inner), data.as_ref())
    }

    #[test]
    fn test_unmatched_end() {
        let diagnostics = validate("{{if .X}}hello{{end}}{{end}}", None);
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].code, ErrorCode::UnmatchedEnd);
        assert_eq!(diagnostics[0].location, "document body");
        assert_eq!(diagnostics[0].placeholder.as_deref(), Some("{{end}}"));
    }

    #[test]
    fn test_unbalanced_delimiters() {
        let diagnostics = validate("{{.Name}", None);
        assert_eq!(diagnostics[0].code, ErrorCode::UnclosedTag);
    }

    #[test]
    fn test_unclosed_block() {
        let diagnostics = validate("{{range .Items}}{{- if .A }}x{{end}}", None);
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].code, ErrorCode::UnclosedTag);
        assert_eq!(diagnostics[0].placeholder.as_deref(), Some("{{range .Items}}"));
    }

    #[test]
    fn test_parse_errors_reported() {
        let diagnostics = validate("{{ shout .Name }}", None);
        assert_eq!(diagnostics[0].code, ErrorCode::InvalidFunction);
        assert!(diagnostics[0].message.contains("\"shout\""));

        let diagnostics = validate("{{ .A .B }}", None);
        assert_eq!(diagnostics[0].code, ErrorCode::SyntaxError);
        assert_eq!(diagnostics[0].placeholder.as_deref(), Some("{{ .A .B }}"));
    }

    #[test]
    fn test_undefined_fields() {
        let data = json!({"Name": "x", "Items": [{"Price": 1}]});
        let diagnostics = validate("{{.Name}}{{.Nmae}}{{range .Items}}{{.Price}}{{.Qty}}{{end}}", Some(data));
        let fields: Vec<_> = diagnostics.iter().filter_map(|d| d.field.as_deref()).collect();
        assert_eq!(fields, vec!["Nmae", "Items[].Qty"]);
        assert!(diagnostics.iter().all(|d| d.code == ErrorCode::UndefinedField));
    }

    #[test]
    fn test_nil_parent_is_undefined() {
        let diagnostics = validate("{{.Customer.Email}}", Some(json!({"Customer": null})));
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].code, ErrorCode::UndefinedField);
        assert_eq!(diagnostics[0].field.as_deref(), Some("Customer.Email"));

        assert!(validate("{{.Customer}}", Some(json!({"Customer": null}))).is_empty());
    }

    #[test]
    fn test_placeholders_checked_despite_broken_structure() {
        let diagnostics = validate("{{.A and {{nosuchfn .B}} then {{ .C .D }}{{if .E}}", None);
        let codes: Vec<_> = diagnostics.iter().map(|d| d.code).collect();
        assert_eq!(
            codes,
            vec![
                ErrorCode::UnclosedTag,
                ErrorCode::UnclosedTag,
                ErrorCode::InvalidFunction,
                ErrorCode::SyntaxError,
            ]
        );
        assert_eq!(diagnostics[2].placeholder.as_deref(), Some("{{nosuchfn .B}}"));
        assert_eq!(diagnostics[3].placeholder.as_deref(), Some("{{ .C .D }}"));
    }

    #[test]
    fn test_block_keywords_checked_alone() {
        let diagnostics = validate("{{end}}{{if nosuchfn .A}}x{{else if .B}}y{{end}}", None);
        let codes: Vec<_> = diagnostics.iter().map(|d| d.code).collect();
        assert_eq!(codes, vec![ErrorCode::UnmatchedEnd, ErrorCode::InvalidFunction]);
        assert_eq!(diagnostics[1].placeholder.as_deref(), Some("{{if nosuchfn .A}}"));
    }

    #[test]
    fn test_comments_and_trim_markers() {
        assert!(validate("{{/* {{end}} */}}{{- if .A -}}x{{- end -}}", None).is_empty());
    }

    #[test]
    fn test_watermark_checked() {
        let header = r#"<w:hdr><v:textpath string="{{ upper .Mark }"/></w:hdr>"#;
        let diagnostics = Validator::default().validate_part("word/header1.xml", PartRole::Header, header, None);
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].code, ErrorCode::UnclosedTag);
        assert_eq!(diagnostics[0].location, "header");
    }

    #[test]
    fn test_file_checks() {
        let validator = Validator::default();
        let result = validator.validate_file(Path::new("template.txt"), None);
        assert_eq!(result.diagnostics[0].code, ErrorCode::InvalidFile);

        let result = validator.validate_file(Path::new("missing.docx"), None);
        assert_eq!(result.diagnostics[0].code, ErrorCode::FileNotFound);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.docx");
        std::fs::write(&path, b"not a zip").unwrap();
        let result = validator.validate_file(&path, None);
        assert_eq!(result.diagnostics[0].code, ErrorCode::CorruptedDocx);
    }

    #[test]
    fn test_grouping() {
        let result = ValidationResult {
            diagnostics: vec![
                Diagnostic::new(ErrorCode::SyntaxError, "header", "a"),
                Diagnostic::new(ErrorCode::UnmatchedEnd, "document body", "b"),
                Diagnostic::new(ErrorCode::UnclosedTag, "header", "c"),
            ],
        };
        let groups = result.by_location();
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].0, "header");
        assert_eq!(groups[0].1.len(), 2);
        assert!(!result.is_valid());
        assert_eq!(result.with_code(ErrorCode::UnmatchedEnd).count(), 1);
    }
}
