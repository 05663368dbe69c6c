//! # manutex
//!
//! Scientific manuscript conversion from extended Markdown to LaTeX.
//!
//! A manuscript is a YAML config, one or more Markdown bodies and a BibTeX
//! bibliography. The conversion:
//! - shields math, code and raw LaTeX behind placeholder tokens
//! - resolves `@key` / `[@a; @b]` citations in numbered or author-date style
//! - numbers figures, tables, equations and sections and resolves `@fig:x`
//!   references declared anywhere in the manuscript
//! - generates figures from scripts through a content-addressed cache
//! - moves the Methods section according to the configured placement
//!
//! ## Example
//!
//! ```no_run
//! use std::path::Path;
//! use manutex::{convert_directory, ConversionOptions, FigureCache};
//!
//! let cache = FigureCache::open(".manutex-cache").unwrap();
//! let options = ConversionOptions::new("build", cache);
//! let output = convert_directory(Path::new("paper"), &options).unwrap();
//! output.write(Path::new("build")).unwrap();
//! for line in output.diagnostics.format_lines() {
//!     eprintln!("{}", line);
//! }
//! ```

pub mod core;
pub mod pipeline;
pub mod utils;

pub use manutex_ir as ir;

pub use crate::core::citations::{MetadataEnricher, NoopEnricher};
pub use crate::core::figures::{FigureArtifact, FigureCache, FigureRecord, FigureStats, FigureToolchain};
pub use crate::core::parser::{BodySource, Config, ManuscriptSources, MethodsPlacement};
pub use crate::core::protect::{protect, restore, SpanTable};
pub use crate::pipeline::{convert_directory, convert_manuscript, ConversionOptions, ConversionOutput};
pub use crate::utils::diagnostics::{Diagnostic, DiagnosticKind, DiagnosticSeverity, DiagnosticsReport};
pub use crate::utils::error::{ManuscriptError, ManuscriptResult};
