//! Relationship sidecars and the hyperlink registry.
//!
//! Helpers that point at external resources register the target here while a
//! part renders. Afterwards the orchestrator appends one relationship per
//! referenced target to the part's `_rels/<part>.rels` sidecar.

use log::warn;
use quick_xml::events::Event;
use quick_xml::Reader;
use regex::Regex;
use std::collections::{HashMap, HashSet};
use std::sync::{LazyLock, Mutex};

use crate::error::Result;

pub const HYPERLINK_TYPE: &str =
    "http://schemas.openxmlformats.org/officeDocument/2006/relationships/hyperlink";
pub const RELATIONSHIPS_NS: &str = "http://schemas.openxmlformats.org/package/2006/relationships";
pub const RELATIONSHIPS_CONTENT_TYPE: &str = "application/vnd.openxmlformats-package.relationships+xml";

const XML_HEADER: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>"#;
const LINK_ID_PREFIX: &str = "rIdLink";
const FIRST_LINK_ID: u32 = 100;

static LINK_REF_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"r:id="(rIdLink[0-9]+)""#).unwrap());

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Relationship {
    pub id: String,
    pub rel_type: String,
    pub target: String,
    pub target_mode: Option<String>,
}

impl Relationship {
    pub fn external_hyperlink(id: &str, url: &str) -> Self {
        Self {
            id: id.to_string(),
            rel_type: HYPERLINK_TYPE.to_string(),
            target: url.to_string(),
            target_mode: Some("External".to_string()),
        }
    }
}

/// The relationships of one part, in file order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Sidecar {
    pub relationships: Vec<Relationship>,
}

impl Sidecar {
    pub fn parse(xml: &str) -> Result<Self> {
        let mut reader = Reader::from_str(xml);
        reader.config_mut().trim_text(true);
        let mut relationships = Vec::new();

        loop {
            match reader.read_event()? {
                Event::Empty(e) | Event::Start(e) if e.local_name().as_ref() == b"Relationship" => {
                    let mut rel = Relationship {
                        id: String::new(),
                        rel_type: String::new(),
                        target: String::new(),
                        target_mode: None,
                    };
                    for attr in e.attributes().flatten() {
                        let raw = String::from_utf8_lossy(&attr.value);
                        let value = html_escape::decode_html_entities(&raw).into_owned();
                        match attr.key.as_ref() {
                            b"Id" => rel.id = value,
                            b"Type" => rel.rel_type = value,
                            b"Target" => rel.target = value,
                            b"TargetMode" => rel.target_mode = Some(value),
                            _ => {}
                        }
                    }
                    relationships.push(rel);
                }
                Event::Eof => break,
                _ => {}
            }
        }

        Ok(Self { relationships })
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.relationships.iter().map(|r| r.id.as_str())
    }

    pub fn contains_id(&self, id: &str) -> bool {
        self.ids().any(|existing| existing == id)
    }

    /// Appends a relationship unless its id is already present.
    pub fn push(&mut self, rel: Relationship) -> bool {
        if self.contains_id(&rel.id) {
            return false;
        }
        self.relationships.push(rel);
        true
    }

    pub fn to_xml(&self) -> String {
        let mut xml = String::new();
        xml.push_str(XML_HEADER);
        xml.push('\n');
        xml.push_str(&format!("<Relationships xmlns=\"{}\">", RELATIONSHIPS_NS));
        for rel in &self.relationships {
            xml.push_str(&format!(
                "<Relationship Id=\"{}\" Type=\"{}\" Target=\"{}\"",
                html_escape::encode_double_quoted_attribute(&rel.id),
                html_escape::encode_double_quoted_attribute(&rel.rel_type),
                html_escape::encode_double_quoted_attribute(&rel.target),
            ));
            if let Some(mode) = &rel.target_mode {
                xml.push_str(&format!(
                    " TargetMode=\"{}\"",
                    html_escape::encode_double_quoted_attribute(mode)
                ));
            }
            xml.push_str("/>");
        }
        xml.push_str("</Relationships>");
        xml
    }
}

#[derive(Debug)]
struct LinkTable {
    by_url: HashMap<String, String>,
    by_id: HashMap<String, String>,
    reserved: HashSet<String>,
    next: u32,
}

/// URL to relationship-id mapping shared by all parts of one render.
///
/// Registration is idempotent per URL, and ids skip anything reserved from
/// the sidecars that already exist in the package.
#[derive(Debug)]
pub struct HyperlinkRegistry {
    table: Mutex<LinkTable>,
}

impl HyperlinkRegistry {
    pub fn new() -> Self {
        Self {
            table: Mutex::new(LinkTable {
                by_url: HashMap::new(),
                by_id: HashMap::new(),
                reserved: HashSet::new(),
                next: FIRST_LINK_ID,
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, LinkTable> {
        self.table.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Marks ids that already exist so they are never minted.
    pub fn reserve<'a>(&self, ids: impl IntoIterator<Item = &'a str>) {
        let mut table = self.lock();
        table.reserved.extend(ids.into_iter().map(str::to_string));
    }

    /// Returns the id for `url`, minting one on first use.
    pub fn register(&self, url: &str) -> String {
        let mut table = self.lock();
        if let Some(id) = table.by_url.get(url) {
            return id.clone();
        }
        let id = loop {
            let candidate = format!("{}{}", LINK_ID_PREFIX, table.next);
            table.next += 1;
            if !table.reserved.contains(&candidate) {
                break candidate;
            }
        };
        table.by_url.insert(url.to_string(), id.clone());
        table.by_id.insert(id.clone(), url.to_string());
        id
    }

    pub fn url_for(&self, id: &str) -> Option<String> {
        self.lock().by_id.get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.lock().by_url.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Registered links referenced by `xml`, in order of first appearance.
    pub fn links_in(&self, xml: &str) -> Vec<(String, String)> {
        let mut seen = HashSet::new();
        let mut links = Vec::new();
        for cap in LINK_REF_RE.captures_iter(xml) {
            let id = &cap[1];
            if !seen.insert(id.to_string()) {
                continue;
            }
            if let Some(url) = self.url_for(id) {
                links.push((id.to_string(), url));
            }
        }
        links
    }
}

impl Default for HyperlinkRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Appends hyperlink relationships to a sidecar, synthesising one when absent.
pub fn rewrite_sidecar(existing: Option<&str>, links: &[(String, String)]) -> Result<String> {
    let mut sidecar = match existing {
        Some(xml) => Sidecar::parse(xml)?,
        None => Sidecar::default(),
    };
    for (id, url) in links {
        if !sidecar.push(Relationship::external_hyperlink(id, url)) {
            warn!("relationship {} already present, keeping existing entry", id);
        }
    }
    Ok(sidecar.to_xml())
}
