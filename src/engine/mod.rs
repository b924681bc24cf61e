//! A curly-brace template engine in the Go `text/template` family.
//!
//! Supports `{{ expr }}` substitution, pipelines, variables, `if`/`else`,
//! `range`/`else`, `with`, `define`/`block`/`template`, `break`/`continue`,
//! comments and `{{- -}}` trim markers. Helpers are resolved from a
//! [`HelperRegistry`] when the template is parsed.

use serde::Serialize;
use thiserror::Error;

use crate::data::{self, Value};
use crate::error::{Error, ErrorCode};
use crate::helpers::{HelperContext, HelperRegistry};
use crate::relationships::HyperlinkRegistry;

mod exec;
mod fields;
mod lexer;
mod parser;

pub(crate) use exec::NO_VALUE;
pub use fields::FieldPath;
pub use parser::Template;

/// How plain-text values are escaped when printed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Escape {
    /// Print values verbatim.
    None,
    /// Escape `&`, `<` and `>` for element content.
    #[default]
    Text,
    /// Also escape `"`, for values printed inside a double-quoted attribute.
    Attribute,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseErrorKind {
    Syntax,
    UnexpectedEnd,
    UnclosedAction,
    UnclosedBlock,
    UndefinedFunction,
}

#[derive(Error, Debug, Clone, PartialEq)]
#[error("template: {name}:{line}: {message}")]
pub struct ParseError {
    pub name: String,
    pub line: usize,
    pub message: String,
    /// The placeholder the parser stopped at.
    pub placeholder: Option<String>,
    pub kind: ParseErrorKind,
}

impl ParseError {
    pub fn code(&self) -> ErrorCode {
        match self.kind {
            ParseErrorKind::UnexpectedEnd => ErrorCode::UnmatchedEnd,
            ParseErrorKind::UnclosedAction | ParseErrorKind::UnclosedBlock => ErrorCode::UnclosedTag,
            ParseErrorKind::UndefinedFunction => ErrorCode::InvalidFunction,
            ParseErrorKind::Syntax => ErrorCode::SyntaxError,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
#[error("template: {name}:{line}: executing {placeholder}: {message}")]
pub struct ExecError {
    pub name: String,
    pub line: usize,
    pub placeholder: String,
    pub message: String,
}

impl From<ParseError> for Error {
    fn from(err: ParseError) -> Self {
        let code = err.code();
        let placeholder = err.placeholder.clone();
        Error::new(code, err.to_string())
            .with_placeholder(placeholder)
            .with_source(err)
    }
}

impl From<ExecError> for Error {
    fn from(err: ExecError) -> Self {
        let placeholder = Some(err.placeholder.clone());
        Error::new(ErrorCode::ExecutionError, err.to_string())
            .with_placeholder(placeholder)
            .with_source(err)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineOptions {
    pub escape: Escape,
    /// Nesting limit for `{{template}}` calls.
    pub max_template_depth: usize,
    pub strict_math: bool,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            escape: Escape::Text,
            max_template_depth: 100,
            strict_math: false,
        }
    }
}

/// Parses and executes templates against a helper registry.
#[derive(Debug, Clone)]
pub struct TemplateEngine {
    helpers: HelperRegistry,
    options: EngineOptions,
}

impl TemplateEngine {
    /// Creates an engine with the standard helpers and default options.
    pub fn new() -> Self {
        Self::with_helpers(HelperRegistry::standard())
    }

    pub fn with_helpers(helpers: HelperRegistry) -> Self {
        Self {
            helpers,
            options: EngineOptions::default(),
        }
    }

    pub fn helpers(&self) -> &HelperRegistry {
        &self.helpers
    }

    pub fn helpers_mut(&mut self) -> &mut HelperRegistry {
        &mut self.helpers
    }

    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    pub fn options_mut(&mut self) -> &mut EngineOptions {
        &mut self.options
    }

    /// Parses `src`, resolving every helper name against the registry.
    pub fn parse(&self, name: &str, src: &str) -> Result<Template, ParseError> {
        parser::parse(name, src, &self.helpers)
    }

    /// Executes a parsed template with `data` as dot.
    pub fn execute(&self, template: &Template, data: &Value, links: &HyperlinkRegistry) -> Result<String, ExecError> {
        self.execute_with(template, data, links, self.options.escape)
    }

    /// Like [`execute`](Self::execute) but with an explicit escape mode.
    pub fn execute_with(
        &self,
        template: &Template,
        data: &Value,
        links: &HyperlinkRegistry,
        escape: Escape,
    ) -> Result<String, ExecError> {
        let ctx = HelperContext {
            links,
            strict_math: self.options.strict_math,
        };
        exec::execute(template, data, &self.helpers, ctx, escape, self.options.max_template_depth)
    }

    /// Parses and executes a template string in one step.
    pub fn render_string<T: Serialize + ?Sized>(&self, name: &str, src: &str, data: &T) -> crate::error::Result<String> {
        let template = self.parse(name, src)?;
        let data = data::normalize(data)?;
        let links = HyperlinkRegistry::new();
        Ok(self.execute(&template, &data, &links)?)
    }
}

impl Default for TemplateEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_render_string() {
        let engine = TemplateEngine::new();
        let context = HashMap::from([("Name", "World")]);
        let result = engine.render_string("t", "Hello, {{ .Name }}!", &context).unwrap();
        assert_eq!(result, "Hello, World!");
    }

    #[test]
    fn test_render_string_missing_key_is_empty() {
        let engine = TemplateEngine::new();
        let context: HashMap<String, String> = HashMap::new();
        let result = engine.render_string("t", "Hello, {{ .Name }}!", &context).unwrap();
        assert_eq!(result, "Hello, <no value>!");
    }

    #[test]
    fn test_unknown_helper_is_invalid_function() {
        let engine = TemplateEngine::new();
        let err = engine.parse("t", "{{ shout .Name }}").unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidFunction);
        assert_eq!(err.to_string(), "template: t:1: function \"shout\" not defined");
    }

    #[test]
    fn test_error_conversion_keeps_placeholder() {
        let engine = TemplateEngine::new();
        let err = engine.render_string("body", "a\n{{ end }}", &HashMap::<String, String>::new()).unwrap_err();
        assert_eq!(err.code, ErrorCode::UnmatchedEnd);
        assert_eq!(err.placeholder.as_deref(), Some("{{ end }}"));
        assert!(err.message.contains("body:2"));
    }

    #[test]
    fn test_escape_modes() {
        let engine = TemplateEngine::new();
        let template = engine.parse("t", "{{ .V }}").unwrap();
        let data = data::normalize(&HashMap::from([("V", "a<b & \"c\"")])).unwrap();
        let links = HyperlinkRegistry::new();
        assert_eq!(engine.execute(&template, &data, &links).unwrap(), "a&lt;b &amp; \"c\"");
        assert_eq!(
            engine.execute_with(&template, &data, &links, Escape::Attribute).unwrap(),
            "a&lt;b &amp; &quot;c&quot;"
        );
        assert_eq!(engine.execute_with(&template, &data, &links, Escape::None).unwrap(), "a<b & \"c\"");
    }
}
