//! Fill Word (`.docx`) templates from a data tree.
//!
//! Templates use curly-brace placeholders in the Go `text/template` style:
//!
//! ```text
//! Dear {{ .Customer.Name | title }},
//! {{ range .Items }}{{ .Name }}: {{ formatMoney .Price "$" }}{{ end }}
//! ```
//!
//! Word tends to split a placeholder across several runs when it is typed,
//! corrected or partly formatted. Each processable part is therefore
//! defragmented, range rows of tables are lifted, and entities inside
//! placeholders are decoded before the part is parsed and executed.
//!
//! ```no_run
//! use docxtmpl::DocumentGenerator;
//! use std::path::Path;
//!
//! let data = serde_json::json!({"Customer": {"Name": "ada lovelace"}, "Items": []});
//! DocumentGenerator::default()
//!     .render_file(Path::new("invoice.docx"), &data, Path::new("out.docx"))
//!     .unwrap();
//! ```

pub mod config;
pub mod data;
pub mod defrag;
pub mod engine;
pub mod entities;
pub mod error;
pub mod generator;
pub mod helpers;
pub mod package;
pub mod parts;
pub mod postfix;
pub mod relationships;
pub mod rows;
pub mod validator;
pub mod watermark;

pub use config::{ConfigError, RenderConfig};
pub use data::Value;
pub use engine::{Escape, TemplateEngine};
pub use error::{Error, ErrorCode, Result};
pub use generator::DocumentGenerator;
pub use helpers::{Arity, HelperError, HelperRegistry};
pub use package::Package;
pub use validator::{Diagnostic, ValidationResult, Validator};
