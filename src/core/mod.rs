//! Core conversion stages
//!
//! Leaf-first: span protection, parsing, citations, cross-references,
//! figures, tables, markup, section assembly and template rendering.

pub mod assembler;
pub mod citations;
pub mod crossref;
pub mod figures;
pub mod markup;
pub mod parser;
pub mod protect;
pub mod render;
pub mod tables;
