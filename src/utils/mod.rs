//! Utility modules
//!
//! This module contains utilities and helpers:
//! - Fatal error types and result types
//! - Non-fatal diagnostics and the diagnostics report
//! - File resolution for multi-file manuscripts
//! - LaTeX escaping

pub mod diagnostics;
pub mod error;
pub mod files;
pub mod latex;

// Re-export commonly used items
pub use diagnostics::{Diagnostic, DiagnosticKind, DiagnosticSeverity, DiagnosticsReport};
pub use error::{ManuscriptError, ManuscriptResult};
pub use files::{FileResolveError, FileResolver, MemoryFileResolver, StdFileResolver};
pub use latex::{escape_latex, escape_url};
