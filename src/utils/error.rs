//! Error handling for manuscript conversion
//!
//! Fatal conditions abort the run before any output is produced and are
//! represented by [`ManuscriptError`]. Recoverable conditions are collected as
//! diagnostics instead (see [`crate::utils::diagnostics`]).

use thiserror::Error;

/// Fatal conversion error
#[derive(Debug, Clone, Error)]
pub enum ManuscriptError {
    /// Parse error - input could not be parsed
    #[error("{}", format_parse_error(.message, .line, .column))]
    ParseError {
        message: String,
        line: Option<usize>,
        column: Option<usize>,
    },
    /// A mandatory config field is absent or empty
    #[error("Missing mandatory config field '{field}'")]
    MissingConfigField { field: String },
    /// Invalid input
    #[error("Invalid input: {message}")]
    InvalidInput { message: String },
    /// Shielded text and span table disagree; output would be corrupted
    #[error("Protection imbalance: {message}")]
    ProtectionImbalance { message: String },
    /// The same label is declared twice
    #[error("Duplicate label '{label}' declared in '{first}' and again in '{second}'")]
    DuplicateLabel {
        label: String,
        first: String,
        second: String,
    },
    /// Template is missing a required insertion point or names an unknown one
    #[error("Invalid template: {message}")]
    InvalidTemplate { message: String },
    /// IO error (for file operations)
    #[error("IO error: {message}")]
    IoError { message: String },
    /// Internal error
    #[error("Internal error: {message}")]
    InternalError { message: String },
}

fn format_parse_error(message: &str, line: &Option<usize>, column: &Option<usize>) -> String {
    match (line, column) {
        (Some(l), Some(c)) => format!("Parse error at line {}, column {}: {}", l, c, message),
        (Some(l), None) => format!("Parse error at line {}: {}", l, message),
        _ => format!("Parse error: {}", message),
    }
}

impl From<std::io::Error> for ManuscriptError {
    fn from(err: std::io::Error) -> Self {
        ManuscriptError::IoError {
            message: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for ManuscriptError {
    fn from(err: serde_json::Error) -> Self {
        ManuscriptError::InternalError {
            message: format!("JSON error: {}", err),
        }
    }
}

/// Result type for conversion operations
pub type ManuscriptResult<T> = Result<T, ManuscriptError>;

// Convenience constructors for errors
impl ManuscriptError {
    pub fn parse(message: impl Into<String>) -> Self {
        ManuscriptError::ParseError {
            message: message.into(),
            line: None,
            column: None,
        }
    }

    pub fn parse_at(message: impl Into<String>, line: usize, column: usize) -> Self {
        ManuscriptError::ParseError {
            message: message.into(),
            line: Some(line),
            column: Some(column),
        }
    }

    pub fn parse_at_line(message: impl Into<String>, line: usize) -> Self {
        ManuscriptError::ParseError {
            message: message.into(),
            line: Some(line),
            column: None,
        }
    }

    pub fn missing_field(field: impl Into<String>) -> Self {
        ManuscriptError::MissingConfigField {
            field: field.into(),
        }
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        ManuscriptError::InvalidInput {
            message: message.into(),
        }
    }

    pub fn imbalance(message: impl Into<String>) -> Self {
        ManuscriptError::ProtectionImbalance {
            message: message.into(),
        }
    }

    pub fn template(message: impl Into<String>) -> Self {
        ManuscriptError::InvalidTemplate {
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        ManuscriptError::InternalError {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_error_display() {
        let err = ManuscriptError::parse("unexpected token");
        assert!(err.to_string().contains("Parse error"));
        assert!(err.to_string().contains("unexpected token"));
    }

    #[test]
    fn test_parse_error_with_location() {
        let err = ManuscriptError::parse_at("unterminated entry", 10, 5);
        let msg = err.to_string();
        assert!(msg.contains("line 10"));
        assert!(msg.contains("column 5"));

        let msg = ManuscriptError::parse_at_line("bad field", 3).to_string();
        assert!(msg.contains("line 3"));
        assert!(!msg.contains("column"));
    }

    #[test]
    fn test_duplicate_label_names_both_sections() {
        let err = ManuscriptError::DuplicateLabel {
            label: "fig:overview".to_string(),
            first: "Results".to_string(),
            second: "Methods".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("fig:overview"));
        assert!(msg.contains("Results"));
        assert!(msg.contains("Methods"));
    }

    #[test]
    fn test_io_error_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: ManuscriptError = io.into();
        assert!(matches!(err, ManuscriptError::IoError { .. }));
    }
}
