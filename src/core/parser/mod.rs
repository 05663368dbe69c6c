//! Manuscript parsing
//!
//! Turns [`ManuscriptSources`] into a [`Manuscript`]: validated config,
//! protected sections in authored order, and the bibliography.

pub mod attributes;
pub mod bibtex;
pub mod config;
pub mod sections;
pub mod sources;

use manutex_ir::Section;

use crate::core::protect::{protect_into, SpanTable};
use crate::utils::error::{ManuscriptError, ManuscriptResult};

pub use attributes::{parse_attribute_block, split_trailing_attributes, Attributes};
pub use bibtex::{parse_bibliography, Bibliography};
pub use config::{parse_config, split_front_matter, Author, CitationStyle, Config, FigureSettings, MethodsPlacement};
pub use sections::{clean_body, split_sections};
pub use sources::{BodySource, ManuscriptSources};

/// A parsed manuscript. All section text is protected against `spans`.
#[derive(Debug, Clone)]
pub struct Manuscript {
    pub config: Config,
    /// Main sections first, then supplementary ones, each in authored order.
    pub sections: Vec<Section>,
    pub bibliography: Bibliography,
    pub spans: SpanTable,
}

impl Manuscript {
    pub fn main_sections(&self) -> impl Iterator<Item = &Section> {
        self.sections.iter().filter(|s| !s.supplementary)
    }

    pub fn supplementary_sections(&self) -> impl Iterator<Item = &Section> {
        self.sections.iter().filter(|s| s.supplementary)
    }
}

/// Parse config, bodies and bibliography.
///
/// The bibliography text is taken from `sources`; when it is absent the file
/// named by the config is read relative to `sources.root`.
pub fn parse_manuscript(sources: &ManuscriptSources) -> ManuscriptResult<Manuscript> {
    if sources.bodies.is_empty() {
        return Err(ManuscriptError::invalid("manuscript has no Markdown body"));
    }

    let mut cleaned: Vec<(String, bool)> = Vec::with_capacity(sources.bodies.len());
    let mut front_matter: Option<String> = None;
    for (idx, body) in sources.bodies.iter().enumerate() {
        let mut text = body.text.as_str();
        if idx == 0 {
            let (yaml, rest) = split_front_matter(text);
            front_matter = yaml.map(str::to_string);
            text = rest;
        }
        cleaned.push((clean_body(text), body.supplementary));
    }

    let yaml = sources
        .config
        .clone()
        .or(front_matter)
        .ok_or_else(|| ManuscriptError::invalid("manuscript has no configuration"))?;
    let config = parse_config(&yaml)?;

    // Main bodies first, so ordinals and numbering see main text before
    // supplementary text regardless of the order bodies were supplied in.
    cleaned.sort_by_key(|(_, supplementary)| *supplementary);

    let mut spans = SpanTable::new();
    let mut sections: Vec<Section> = Vec::new();
    for (text, supplementary) in &cleaned {
        let protected = protect_into(text, &mut spans)?;
        sections.extend(split_sections(&protected, sections.len(), *supplementary));
    }

    let bibliography = match &sources.bibliography {
        Some(text) => parse_bibliography(text)?,
        None => {
            let path = sources.root.join(&config.bibliography);
            let text = std::fs::read_to_string(&path).map_err(|e| ManuscriptError::IoError {
                message: format!("{}: {}", path.display(), e),
            })?;
            parse_bibliography(&text)?
        }
    };

    log::debug!(
        "parsed manuscript '{}': {} sections, {} protected spans, {} bibliography entries",
        config.title,
        sections.len(),
        spans.len(),
        bibliography.len()
    );

    Ok(Manuscript {
        config,
        sections,
        bibliography,
        spans,
    })
}
