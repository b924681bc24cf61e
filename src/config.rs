use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::data::Value;
use crate::engine::{EngineOptions, Escape, TemplateEngine};
use crate::helpers::HelperRegistry;

/// Render settings, usually read from a YAML file.
#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct RenderConfig {
    /// Division or modulo by zero fails instead of yielding zero.
    pub strict_math: bool,
    /// XML-escape plain values printed by actions.
    pub escape_values: bool,
    /// Straighten typographic quotes inside placeholders.
    pub normalize_smart_quotes: bool,
    pub row_scan_timeout_ms: u64,
    pub max_template_depth: usize,
    /// Merged into the root data mapping for keys the data does not set.
    pub globals: BTreeMap<String, serde_json::Value>,
    pub disabled_helpers: Vec<String>,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            strict_math: false,
            escape_values: true,
            normalize_smart_quotes: true,
            row_scan_timeout_ms: 500,
            max_template_depth: 100,
            globals: BTreeMap::new(),
            disabled_helpers: Vec::new(),
        }
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("Unknown helper in disabled_helpers: {0}")]
    UnknownHelper(String),
}

impl RenderConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        // An empty file deserialises to unit, not to a mapping.
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        let config: RenderConfig = serde_yaml::from_str(content)?;
        Ok(config)
    }

    pub fn row_scan_timeout(&self) -> Duration {
        Duration::from_millis(self.row_scan_timeout_ms)
    }

    /// Builds a template engine with the standard helpers minus the disabled ones.
    pub fn build_engine(&self) -> Result<TemplateEngine, ConfigError> {
        let mut helpers = HelperRegistry::standard();
        for name in &self.disabled_helpers {
            if helpers.remove(name).is_none() {
                return Err(ConfigError::UnknownHelper(name.clone()));
            }
        }
        let mut engine = TemplateEngine::with_helpers(helpers);
        *engine.options_mut() = EngineOptions {
            escape: if self.escape_values { Escape::Text } else { Escape::None },
            max_template_depth: self.max_template_depth,
            strict_math: self.strict_math,
        };
        Ok(engine)
    }

    /// Adds the globals to a root mapping without overriding its own keys.
    pub fn merge_globals(&self, data: &mut Value) {
        if let Value::Map(map) = data {
            for (key, value) in &self.globals {
                map.entry(key.clone())
                    .or_insert_with(|| Value::from(value.clone()));
            }
        }
    }
}
