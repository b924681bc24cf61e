//! Reading and writing the zip container of a DOCX package.
//!
//! Parts that the pipeline does not touch are copied into the output with
//! their original compressed bytes, so they stay byte-identical and keep their
//! central-directory position.

use log::{debug, error};
use std::io::{Cursor, Read, Write};
use std::path::Path;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::error::{Error, ErrorCode, Result};
use crate::parts::{classify, PartRole};

pub const CONTENT_TYPES_PATH: &str = "[Content_Types].xml";
pub const DOCUMENT_PATH: &str = "word/document.xml";

/// A named blob inside the package.
#[derive(Debug, Clone)]
pub struct Part {
    pub path: String,
    pub role: PartRole,
    data: Vec<u8>,
    compression: CompressionMethod,
    /// Position in the source archive; `None` for parts added after reading.
    index: Option<usize>,
    modified: bool,
}

impl Part {
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn is_modified(&self) -> bool {
        self.modified
    }

    /// Part contents as UTF-8 text, with any byte order mark removed.
    pub fn text(&self) -> Result<String> {
        let bytes = self.data.strip_prefix(&[0xEF, 0xBB, 0xBF]).unwrap_or(&self.data);
        String::from_utf8(bytes.to_vec())
            .map_err(|e| Error::from(e).with_location(self.path.clone()))
    }
}

/// The set of parts of a DOCX package, in archive order.
#[derive(Debug, Clone)]
pub struct Package {
    source: Vec<u8>,
    parts: Vec<Part>,
}

impl Package {
    /// Reads a package from disk.
    pub fn open(path: &Path) -> Result<Self> {
        if !path.exists() {
            error!("Template file does not exist: {:?}", path);
            return Err(Error::new(
                ErrorCode::FileNotFound,
                format!("template file does not exist: {}", path.display()),
            ));
        }
        let bytes = std::fs::read(path)
            .map_err(|e| Error::io(ErrorCode::ReadError, path.display(), e))?;
        Self::from_bytes(bytes)
    }

    /// Reads a package from an in-memory archive.
    pub fn from_bytes(source: Vec<u8>) -> Result<Self> {
        let parts = read_parts(&source)?;
        if !parts.iter().any(|p| p.path == DOCUMENT_PATH) {
            return Err(Error::new(
                ErrorCode::CorruptedDocx,
                format!("package has no {}", DOCUMENT_PATH),
            ));
        }
        Ok(Self { source, parts })
    }

    pub fn parts(&self) -> &[Part] {
        &self.parts
    }

    pub fn part(&self, path: &str) -> Option<&Part> {
        self.parts.iter().find(|p| p.path == path)
    }

    /// Paths of the parts that participate in templating, in archive order.
    pub fn processable_paths(&self) -> Vec<String> {
        self.parts
            .iter()
            .filter(|p| p.role.is_processable())
            .map(|p| p.path.clone())
            .collect()
    }

    /// Replaces the contents of a part, or appends a new part.
    pub fn set_part(&mut self, path: &str, data: Vec<u8>) {
        if let Some(part) = self.parts.iter_mut().find(|p| p.path == path) {
            if part.data != data {
                part.data = data;
                part.modified = true;
            }
            return;
        }
        self.parts.push(Part {
            path: path.to_string(),
            role: classify(path),
            data,
            compression: CompressionMethod::Deflated,
            index: None,
            modified: true,
        });
    }

    /// Serialises the package into a new archive.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut archive = ZipArchive::new(Cursor::new(self.source.as_slice()))?;
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));

        for part in &self.parts {
            match part.index {
                Some(i) if !part.modified => {
                    let raw = archive.by_index_raw(i)?;
                    writer.raw_copy_file(raw)?;
                }
                _ => {
                    let options = SimpleFileOptions::default().compression_method(part.compression);
                    writer.start_file(part.path.as_str(), options)?;
                    writer
                        .write_all(&part.data)
                        .map_err(|e| Error::io(ErrorCode::ZipError, &part.path, e))?;
                }
            }
        }

        let cursor = writer.finish()?;
        Ok(cursor.into_inner())
    }

    /// Writes the package to disk. Nothing is written if serialisation fails.
    pub fn save(&self, path: &Path) -> Result<()> {
        let bytes = self.to_bytes()?;
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| Error::io(ErrorCode::WriteError, parent.display(), e))?;
            }
        }
        std::fs::write(path, bytes).map_err(|e| {
            error!("Failed to write package: {:?}", path);
            Error::io(ErrorCode::WriteError, path.display(), e)
        })
    }

    /// Adds a `<Default Extension=…>` entry to the content-type manifest when missing.
    pub fn ensure_default_content_type(&mut self, extension: &str, content_type: &str) -> Result<()> {
        let Some(part) = self.part(CONTENT_TYPES_PATH) else {
            return Ok(());
        };
        let manifest = part.text()?;
        let needle = format!("Extension=\"{}\"", extension);
        if manifest.contains(&needle) {
            return Ok(());
        }
        let Some(pos) = manifest.find("</Types>") else {
            return Ok(());
        };
        let entry = format!(
            "<Default Extension=\"{}\" ContentType=\"{}\"/>",
            extension, content_type
        );
        let updated = format!("{}{}{}", &manifest[..pos], entry, &manifest[pos..]);
        self.set_part(CONTENT_TYPES_PATH, updated.into_bytes());
        Ok(())
    }
}

fn read_parts(source: &[u8]) -> Result<Vec<Part>> {
    let mut archive = ZipArchive::new(Cursor::new(source)).map_err(|e| {
        Error::new(ErrorCode::CorruptedDocx, format!("not a zip archive: {}", e)).with_source(e)
    })?;

    let mut parts = Vec::with_capacity(archive.len());
    for i in 0..archive.len() {
        let mut file = archive.by_index(i).map_err(|e| {
            Error::new(ErrorCode::CorruptedDocx, format!("unreadable zip entry {}: {}", i, e))
                .with_source(e)
        })?;
        let path = file.name().to_string();
        let mut data = Vec::new();
        if !file.is_dir() {
            file.read_to_end(&mut data)
                .map_err(|e| Error::io(ErrorCode::CorruptedDocx, &path, e))?;
        }
        let role = classify(&path);
        debug!("{} -> {:?}", path, role);
        parts.push(Part {
            role,
            compression: file.compression(),
            path,
            data,
            index: Some(i),
            modified: false,
        });
    }
    Ok(parts)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build(entries: &[(&str, &str)]) -> Vec<u8> {
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
        for (name, body) in entries {
            writer.start_file(*name, options).unwrap();
            writer.write_all(body.as_bytes()).unwrap();
        }
        writer.finish().unwrap().into_inner()
    }

    fn read_entry(bytes: &[u8], name: &str) -> String {
        let mut archive = ZipArchive::new(Cursor::new(bytes)).unwrap();
        let mut out = String::new();
        archive.by_name(name).unwrap().read_to_string(&mut out).unwrap();
        out
    }

    #[test]
    fn test_roundtrip_preserves_order_and_content() {
        let bytes = build(&[
            (CONTENT_TYPES_PATH, "<Types></Types>"),
            (DOCUMENT_PATH, "<w:document/>"),
            ("word/styles.xml", "<w:styles/>"),
        ]);
        let package = Package::from_bytes(bytes).unwrap();
        let out = package.to_bytes().unwrap();

        let archive = ZipArchive::new(Cursor::new(out.as_slice())).unwrap();
        let names: Vec<_> = archive.file_names().collect();
        assert_eq!(names.len(), 3);
        assert_eq!(read_entry(&out, "word/styles.xml"), "<w:styles/>");
    }

    #[test]
    fn test_set_part_replaces_and_appends() {
        let bytes = build(&[(DOCUMENT_PATH, "<a/>")]);
        let mut package = Package::from_bytes(bytes).unwrap();
        package.set_part(DOCUMENT_PATH, b"<b/>".to_vec());
        package.set_part("word/_rels/document.xml.rels", b"<Relationships/>".to_vec());
        assert!(package.part(DOCUMENT_PATH).unwrap().is_modified());

        let out = package.to_bytes().unwrap();
        assert_eq!(read_entry(&out, DOCUMENT_PATH), "<b/>");
        assert_eq!(read_entry(&out, "word/_rels/document.xml.rels"), "<Relationships/>");
    }

    #[test]
    fn test_missing_document_is_corrupted() {
        let bytes = build(&[("word/styles.xml", "<w:styles/>")]);
        let err = Package::from_bytes(bytes).unwrap_err();
        assert_eq!(err.code, ErrorCode::CorruptedDocx);
    }

    #[test]
    fn test_not_a_zip() {
        let err = Package::from_bytes(b"plain text".to_vec()).unwrap_err();
        assert_eq!(err.code, ErrorCode::CorruptedDocx);
    }

    #[test]
    fn test_open_missing_file() {
        let err = Package::open(Path::new("does-not-exist.docx")).unwrap_err();
        assert_eq!(err.code, ErrorCode::FileNotFound);
    }

    #[test]
    fn test_ensure_default_content_type() {
        let bytes = build(&[
            (CONTENT_TYPES_PATH, "<Types><Default Extension=\"xml\" ContentType=\"application/xml\"/></Types>"),
            (DOCUMENT_PATH, "<a/>"),
        ]);
        let mut package = Package::from_bytes(bytes).unwrap();
        package
            .ensure_default_content_type("rels", "application/vnd.openxmlformats-package.relationships+xml")
            .unwrap();
        let manifest = package.part(CONTENT_TYPES_PATH).unwrap().text().unwrap();
        assert!(manifest.contains("Extension=\"rels\""));
        assert!(manifest.ends_with("</Types>"));
    }
}
