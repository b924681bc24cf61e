use std::fmt;
use thiserror::Error;

/// Machine-readable classification shared by render errors and validator diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ErrorCode {
    InvalidFile,
    CorruptedDocx,
    FileNotFound,
    ReadError,
    SyntaxError,
    UnclosedTag,
    UnmatchedEnd,
    UndefinedField,
    InvalidFunction,
    ExecutionError,
    DataConversion,
    ImageError,
    MarshalError,
    WriteError,
    ZipError,
    MergeError,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::InvalidFile => "INVALID_FILE",
            ErrorCode::CorruptedDocx => "CORRUPTED_DOCX",
            ErrorCode::FileNotFound => "FILE_NOT_FOUND",
            ErrorCode::ReadError => "READ_ERROR",
            ErrorCode::SyntaxError => "SYNTAX_ERROR",
            ErrorCode::UnclosedTag => "UNCLOSED_TAG",
            ErrorCode::UnmatchedEnd => "UNMATCHED_END",
            ErrorCode::UndefinedField => "UNDEFINED_FIELD",
            ErrorCode::InvalidFunction => "INVALID_FUNCTION",
            ErrorCode::ExecutionError => "EXECUTION_ERROR",
            ErrorCode::DataConversion => "DATA_CONVERSION",
            ErrorCode::ImageError => "IMAGE_ERROR",
            ErrorCode::MarshalError => "MARSHAL_ERROR",
            ErrorCode::WriteError => "WRITE_ERROR",
            ErrorCode::ZipError => "ZIP_ERROR",
            ErrorCode::MergeError => "MERGE_ERROR",
        }
    }

    /// Remediation hints attached to errors and diagnostics of this code.
    pub fn suggestions(&self) -> Vec<String> {
        let hints: &[&str] = match self {
            ErrorCode::InvalidFile => &["make sure the input is a .docx file saved by Word or a compatible editor"],
            ErrorCode::CorruptedDocx => &[
                "re-save the document from Word to repair the package",
                "check that word/document.xml is present in the archive",
            ],
            ErrorCode::FileNotFound => &["check the template path"],
            ErrorCode::ReadError => &["check file permissions"],
            ErrorCode::SyntaxError => &[
                "check the placeholder syntax, e.g. {{.Field}} or {{range .Items}}",
                "string literals inside placeholders must use straight double quotes",
            ],
            ErrorCode::UnclosedTag => &["every {{ must be closed by a matching }}"],
            ErrorCode::UnmatchedEnd => &[
                "ensure every {{end}} has a matching {{if}}, {{range}}, {{with}}, or {{define}}",
            ],
            ErrorCode::UndefinedField => &[
                "check the spelling and capitalisation of the field name",
                "make sure the data contains the field at this path",
            ],
            ErrorCode::InvalidFunction => &["check the helper name against the list of registered helpers"],
            ErrorCode::ExecutionError => &[
                "check that helper arguments have the expected types",
                "check the data for values that cannot be iterated or indexed",
            ],
            ErrorCode::DataConversion => &["the top-level data must be a mapping or a record"],
            ErrorCode::ImageError => &["check that the image exists and is a supported format"],
            ErrorCode::MarshalError => &["check that the rendered part is well-formed XML"],
            ErrorCode::WriteError => &["check that the output location is writable"],
            ErrorCode::ZipError => &["check that the output location is writable and has free space"],
            ErrorCode::MergeError => &["check the documents being merged are valid packages"],
        };
        hints.iter().map(|h| h.to_string()).collect()
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured failure surfaced by the render pipeline.
#[derive(Error, Debug)]
#[error("[{code}] {}{message}", location_prefix(.location))]
pub struct Error {
    pub code: ErrorCode,
    /// Human-readable part label, e.g. `document body`.
    pub location: Option<String>,
    pub message: String,
    /// The offending placeholder when it can be recovered.
    pub placeholder: Option<String>,
    pub suggestions: Vec<String>,
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

fn location_prefix(location: &Option<String>) -> String {
    match location {
        Some(loc) => format!("{}: ", loc),
        None => String::new(),
    }
}

impl Error {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            location: None,
            message: message.into(),
            placeholder: None,
            suggestions: code.suggestions(),
            source: None,
        }
    }

    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    pub fn with_placeholder(mut self, placeholder: Option<String>) -> Self {
        self.placeholder = placeholder;
        self
    }

    pub fn with_source<E>(mut self, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        self.source = Some(Box::new(source));
        self
    }

    pub fn io(code: ErrorCode, context: impl fmt::Display, err: std::io::Error) -> Self {
        Self::new(code, format!("{}: {}", context, err)).with_source(err)
    }
}

impl From<zip::result::ZipError> for Error {
    fn from(e: zip::result::ZipError) -> Self {
        Error::new(ErrorCode::ZipError, e.to_string()).with_source(e)
    }
}

impl From<quick_xml::Error> for Error {
    fn from(e: quick_xml::Error) -> Self {
        Error::new(ErrorCode::CorruptedDocx, format!("malformed XML: {}", e)).with_source(e)
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::new(ErrorCode::DataConversion, e.to_string()).with_source(e)
    }
}

impl From<std::string::FromUtf8Error> for Error {
    fn from(e: std::string::FromUtf8Error) -> Self {
        Error::new(ErrorCode::CorruptedDocx, format!("part is not valid UTF-8: {}", e)).with_source(e)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_includes_code_and_location() {
        let err = Error::new(ErrorCode::UnmatchedEnd, "unexpected {{end}}").with_location("document body");
        assert_eq!(err.to_string(), "[UNMATCHED_END] document body: unexpected {{end}}");
    }

    #[test]
    fn test_suggestions_attached() {
        let err = Error::new(ErrorCode::UnmatchedEnd, "x");
        assert!(err.suggestions.iter().any(|s| s.contains("{{end}}")));
    }

    #[test]
    fn test_code_names() {
        assert_eq!(ErrorCode::ZipError.as_str(), "ZIP_ERROR");
        assert_eq!(ErrorCode::UndefinedField.to_string(), "UNDEFINED_FIELD");
    }
}
