use log::{debug, error, info, warn};
use serde::Serialize;
use std::path::Path;
use std::time::Duration;

use crate::config::{ConfigError, RenderConfig};
use crate::data::{self, Value};
use crate::defrag::defragment;
use crate::engine::TemplateEngine;
use crate::entities::decode_placeholders;
use crate::error::{Error, ErrorCode, Result};
use crate::package::Package;
use crate::parts::{sidecar_path, PartRole};
use crate::postfix::post_fix;
use crate::relationships::{rewrite_sidecar, HyperlinkRegistry, Sidecar, RELATIONSHIPS_CONTENT_TYPE};
use crate::rows::{lift_range_rows, RowScanError};
use crate::watermark::{render_textpaths, shield_textpaths};

/// A part's XML after defragmenting, row lifting and entity decoding.
#[derive(Debug, Clone, PartialEq)]
pub struct Prepared {
    pub xml: String,
    /// Watermark values shielded out of a header, by sentinel index.
    pub textpaths: Vec<String>,
}

/// Turns raw part XML into the template source the engine parses.
pub fn prepare_part(
    xml: &str,
    role: PartRole,
    row_scan_timeout: Duration,
    normalize_quotes: bool,
) -> std::result::Result<Prepared, RowScanError> {
    let (xml, textpaths) = match role {
        PartRole::Header => shield_textpaths(xml),
        _ => (xml.to_string(), Vec::new()),
    };
    let xml = defragment(&xml);
    let xml = lift_range_rows(&xml, row_scan_timeout)?;
    let xml = decode_placeholders(&xml, normalize_quotes);
    Ok(Prepared { xml, textpaths })
}

impl From<RowScanError> for Error {
    fn from(err: RowScanError) -> Self {
        Error::new(ErrorCode::SyntaxError, err.to_string()).with_source(err)
    }
}

/// Renders DOCX templates part by part.
pub struct DocumentGenerator {
    engine: TemplateEngine,
    config: RenderConfig,
}

impl DocumentGenerator {
    pub fn new(engine: TemplateEngine) -> Self {
        Self {
            engine,
            config: RenderConfig::default(),
        }
    }

    pub fn from_config(config: RenderConfig) -> std::result::Result<Self, ConfigError> {
        Ok(Self {
            engine: config.build_engine()?,
            config,
        })
    }

    pub fn engine(&self) -> &TemplateEngine {
        &self.engine
    }

    /// Gives access to the engine, e.g. to register extra helpers.
    pub fn engine_mut(&mut self) -> &mut TemplateEngine {
        &mut self.engine
    }

    pub fn config(&self) -> &RenderConfig {
        &self.config
    }

    /// Renders the template at `template_path` and writes the result to `output_path`.
    ///
    /// Nothing is written when any part fails to render.
    pub fn render_file<T: Serialize + ?Sized>(&self, template_path: &Path, data: &T, output_path: &Path) -> Result<()> {
        let package = Package::open(template_path)?;
        let rendered = self.render(&package, data)?;
        rendered.save(output_path)?;
        info!("Generated document: {:?}", output_path);
        Ok(())
    }

    /// Renders an in-memory DOCX archive.
    pub fn render_bytes<T: Serialize + ?Sized>(&self, template: &[u8], data: &T) -> Result<Vec<u8>> {
        let package = Package::from_bytes(template.to_vec())?;
        self.render(&package, data)?.to_bytes()
    }

    /// Renders every processable part of `package` into a new package.
    pub fn render<T: Serialize + ?Sized>(&self, package: &Package, data: &T) -> Result<Package> {
        let mut data = data::normalize(data)?;
        self.config.merge_globals(&mut data);

        let links = HyperlinkRegistry::new();
        let paths = package.processable_paths();
        for path in &paths {
            self.reserve_existing_ids(package, path, &links);
        }

        let mut output = package.clone();
        let mut synthesised_sidecar = false;
        for path in &paths {
            let Some(part) = package.part(path) else {
                continue;
            };
            let role = part.role;
            info!("Processing {} ({})", path, role);
            let xml = part.text()?;
            let rendered = self
                .render_part(path, role, &xml, &data, &links)
                .map_err(|err| {
                    let err = err.with_location(role.label());
                    error!("Failed to render {}: {}", path, err);
                    err
                })?;

            let part_links = links.links_in(&rendered);
            if !part_links.is_empty() {
                let rels_path = sidecar_path(path);
                let existing = match package.part(&rels_path) {
                    Some(rels) => Some(rels.text()?),
                    None => {
                        synthesised_sidecar = true;
                        None
                    }
                };
                let sidecar = rewrite_sidecar(existing.as_deref(), &part_links)
                    .map_err(|err| err.with_location(role.label()))?;
                debug!("{} hyperlink relationships added to {}", part_links.len(), rels_path);
                output.set_part(&rels_path, sidecar.into_bytes());
            }
            output.set_part(path, rendered.into_bytes());
        }

        if synthesised_sidecar {
            output.ensure_default_content_type("rels", RELATIONSHIPS_CONTENT_TYPE)?;
        }
        Ok(output)
    }

    fn reserve_existing_ids(&self, package: &Package, path: &str, links: &HyperlinkRegistry) {
        let Some(rels) = package.part(&sidecar_path(path)) else {
            return;
        };
        match rels.text().and_then(|xml| Sidecar::parse(&xml)) {
            Ok(sidecar) => links.reserve(sidecar.ids()),
            Err(err) => warn!("Ignoring unreadable sidecar {}: {}", rels.path, err),
        }
    }

    fn render_part(&self, path: &str, role: PartRole, xml: &str, data: &Value, links: &HyperlinkRegistry) -> Result<String> {
        let prepared = prepare_part(
            xml,
            role,
            self.config.row_scan_timeout(),
            self.config.normalize_smart_quotes,
        )?;
        let template = self.engine.parse(path, &prepared.xml)?;
        let rendered = self.engine.execute(&template, data, links)?;
        let fixed = post_fix(&rendered);
        if prepared.textpaths.is_empty() {
            return Ok(fixed);
        }
        render_textpaths(&fixed, &prepared.textpaths, &self.engine, data, links)
    }
}

impl Default for DocumentGenerator {
    fn default() -> Self {
        Self::new(TemplateEngine::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::package::{CONTENT_TYPES_PATH, DOCUMENT_PATH};
    use serde_json::json;
    use std::io::{Cursor, Read, Write};
    use zip::write::SimpleFileOptions;
    use zip::{ZipArchive, ZipWriter};

    fn docx(entries: &[(&str, &str)]) -> Vec<u8> {
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        for (name, body) in entries {
            writer.start_file(*name, SimpleFileOptions::default()).unwrap();
            writer.write_all(body.as_bytes()).unwrap();
        }
        writer.finish().unwrap().into_inner()
    }

    fn entry(bytes: &[u8], name: &str) -> Option<String> {
        let mut archive = ZipArchive::new(Cursor::new(bytes)).unwrap();
        let mut file = archive.by_name(name).ok()?;
        let mut out = String::new();
        file.read_to_string(&mut out).unwrap();
        Some(out)
    }

    fn body(inner: &str) -> String {
        format!(r#"<w:document><w:body><w:p>{}</w:p></w:body></w:document>"#, inner)
    }

    #[test]
    fn test_prepare_part_pipeline() {
        let xml = "<w:r><w:t>{{ default &quot;x</w:t></w:r><w:r><w:t>&quot; .A }}</w:t></w:r>";
        let prepared = prepare_part(xml, PartRole::Body, Duration::from_millis(500), true).unwrap();
        assert_eq!(prepared.xml, "<w:r><w:t>{{ default \"x\" .A }}</w:t></w:r><w:r><w:t></w:t></w:r>");
        assert!(prepared.textpaths.is_empty());
    }

    #[test]
    fn test_render_body_and_passthrough() {
        let styles = "<w:styles>{{.NotTouched}}</w:styles>";
        let template = docx(&[
            (DOCUMENT_PATH, &body("<w:r><w:t>Dear {{.Name}},</w:t></w:r>")),
            ("word/styles.xml", styles),
        ]);
        let out = DocumentGenerator::default().render_bytes(&template, &json!({"Name": "Ada & Co"})).unwrap();
        assert_eq!(
            entry(&out, DOCUMENT_PATH).unwrap(),
            body("<w:r><w:t>Dear Ada &amp; Co,</w:t></w:r>")
        );
        assert_eq!(entry(&out, "word/styles.xml").unwrap(), styles);
    }

    #[test]
    fn test_error_carries_part_location() {
        let template = docx(&[
            (DOCUMENT_PATH, &body("<w:r><w:t>ok</w:t></w:r>")),
            ("word/footer1.xml", "<w:ftr>{{ .A | shout }}</w:ftr>"),
        ]);
        let err = DocumentGenerator::default().render_bytes(&template, &json!({})).unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidFunction);
        assert_eq!(err.location.as_deref(), Some("footer"));
    }

    #[test]
    fn test_links_get_sidecar_and_content_type() {
        let template = docx(&[
            (
                CONTENT_TYPES_PATH,
                r#"<Types><Default Extension="xml" ContentType="application/xml"/></Types>"#,
            ),
            (DOCUMENT_PATH, &body(r#"<w:r><w:t>{{link .Url "site"}}</w:t></w:r>"#)),
        ]);
        let out = DocumentGenerator::default()
            .render_bytes(&template, &json!({"Url": "https://example.com"}))
            .unwrap();
        let rels = entry(&out, "word/_rels/document.xml.rels").unwrap();
        assert!(rels.contains(r#"Id="rIdLink100""#));
        assert!(entry(&out, CONTENT_TYPES_PATH).unwrap().contains(r#"Extension="rels""#));
    }

    #[test]
    fn test_globals_and_strict_math() {
        let template = docx(&[(DOCUMENT_PATH, &body("<w:r><w:t>{{.Company}} {{div 1 .Zero}}</w:t></w:r>"))]);
        let config = RenderConfig::from_yaml("globals:\n  Company: ACME").unwrap();
        let out = DocumentGenerator::from_config(config).unwrap().render_bytes(&template, &json!({"Zero": 0})).unwrap();
        assert!(entry(&out, DOCUMENT_PATH).unwrap().contains("ACME 0"));

        let strict = RenderConfig::from_yaml("strict_math: true").unwrap();
        let err = DocumentGenerator::from_config(strict).unwrap().render_bytes(&template, &json!({"Zero": 0})).unwrap_err();
        assert_eq!(err.code, ErrorCode::ExecutionError);
    }

    #[test]
    fn test_render_file_writes_nothing_on_failure() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in.docx");
        let output = dir.path().join("out.docx");
        std::fs::write(&input, docx(&[(DOCUMENT_PATH, &body("<w:r><w:t>{{if .A}}</w:t></w:r>"))])).unwrap();
        let err = DocumentGenerator::default().render_file(&input, &json!({"A": true}), &output).unwrap_err();
        assert_eq!(err.code, ErrorCode::UnclosedTag);
        assert!(!output.exists());
    }
}
