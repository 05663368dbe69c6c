//! Per-manuscript configuration
//!
//! The config is YAML, either a standalone file or a `---` front-matter block
//! at the top of the main body. `title`, `authors` and `bibliography` are
//! mandatory; everything else has a default.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::utils::error::{ManuscriptError, ManuscriptResult};

/// Where the designated (Methods) section ends up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MethodsPlacement {
    #[default]
    Inline,
    AfterIntroduction,
    AfterResults,
    AfterDiscussion,
    AfterBibliography,
}

impl MethodsPlacement {
    pub const ALL: [MethodsPlacement; 5] = [
        MethodsPlacement::Inline,
        MethodsPlacement::AfterIntroduction,
        MethodsPlacement::AfterResults,
        MethodsPlacement::AfterDiscussion,
        MethodsPlacement::AfterBibliography,
    ];

    /// Name of the section the designated section follows, for the policies
    /// that anchor on a section.
    pub fn anchor(&self) -> Option<&'static str> {
        match self {
            MethodsPlacement::AfterIntroduction => Some("introduction"),
            MethodsPlacement::AfterResults => Some("results"),
            MethodsPlacement::AfterDiscussion => Some("discussion"),
            MethodsPlacement::Inline | MethodsPlacement::AfterBibliography => None,
        }
    }
}

impl fmt::Display for MethodsPlacement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MethodsPlacement::Inline => "inline",
            MethodsPlacement::AfterIntroduction => "after_introduction",
            MethodsPlacement::AfterResults => "after_results",
            MethodsPlacement::AfterDiscussion => "after_discussion",
            MethodsPlacement::AfterBibliography => "after_bibliography",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CitationStyle {
    /// `[1]`, numbered by first appearance.
    #[default]
    #[serde(alias = "numeric")]
    Numbered,
    /// `(Smith et al., 2023)`.
    #[serde(alias = "author-year", alias = "author_year", alias = "author_date")]
    AuthorDate,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Author {
    pub name: String,
    pub affiliation: Option<String>,
    pub email: Option<String>,
    pub orcid: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum AuthorSpec {
    Name(String),
    Full {
        name: String,
        #[serde(default, alias = "affiliations")]
        affiliation: Option<String>,
        #[serde(default)]
        email: Option<String>,
        #[serde(default)]
        orcid: Option<String>,
    },
}

impl From<AuthorSpec> for Author {
    fn from(spec: AuthorSpec) -> Self {
        match spec {
            AuthorSpec::Name(name) => Author {
                name,
                affiliation: None,
                email: None,
                orcid: None,
            },
            AuthorSpec::Full {
                name,
                affiliation,
                email,
                orcid,
            } => Author {
                name,
                affiliation,
                email,
                orcid,
            },
        }
    }
}

/// Figure generation parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FigureSettings {
    /// Output format requested from generators (`pdf`, `png`, `svg`).
    pub format: String,
    pub dpi: u32,
    pub timeout_secs: u64,
    /// Parallel generation workers. `None` uses all cores.
    pub workers: Option<usize>,
    pub force_regenerate: bool,
}

impl Default for FigureSettings {
    fn default() -> Self {
        Self {
            format: "pdf".to_string(),
            dpi: 300,
            timeout_secs: 120,
            workers: None,
            force_regenerate: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Config {
    pub title: String,
    pub authors: Vec<Author>,
    pub bibliography: PathBuf,
    pub methods_placement: MethodsPlacement,
    /// Identifier of the section the placement policy moves.
    pub methods_section: String,
    pub citation_style: CitationStyle,
    pub date: Option<String>,
    pub keywords: Vec<String>,
    pub template: Option<PathBuf>,
    pub figures: FigureSettings,
}

#[derive(Debug, Deserialize)]
struct RawConfig {
    #[serde(default)]
    title: Option<String>,
    #[serde(default, alias = "author")]
    authors: Option<Vec<AuthorSpec>>,
    #[serde(default)]
    bibliography: Option<PathBuf>,
    #[serde(default)]
    methods_placement: MethodsPlacement,
    #[serde(default)]
    methods_section: Option<String>,
    #[serde(default)]
    citation_style: CitationStyle,
    #[serde(default)]
    date: Option<String>,
    #[serde(default)]
    keywords: Vec<String>,
    #[serde(default)]
    template: Option<PathBuf>,
    #[serde(default)]
    figures: FigureSettings,
}

/// Parse and validate a YAML config.
pub fn parse_config(yaml: &str) -> ManuscriptResult<Config> {
    let raw: RawConfig = serde_yaml::from_str(yaml).map_err(|e| match e.location() {
        Some(loc) => ManuscriptError::parse_at(
            format!("config: {}", e),
            loc.line(),
            loc.column(),
        ),
        None => ManuscriptError::parse(format!("config: {}", e)),
    })?;

    let title = raw
        .title
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .ok_or_else(|| ManuscriptError::missing_field("title"))?;
    let authors: Vec<Author> = raw
        .authors
        .unwrap_or_default()
        .into_iter()
        .map(Author::from)
        .filter(|a| !a.name.trim().is_empty())
        .collect();
    if authors.is_empty() {
        return Err(ManuscriptError::missing_field("authors"));
    }
    let bibliography = raw
        .bibliography
        .filter(|p| !p.as_os_str().is_empty())
        .ok_or_else(|| ManuscriptError::missing_field("bibliography"))?;
    if raw.figures.timeout_secs == 0 {
        return Err(ManuscriptError::invalid("figures.timeout_secs must be positive"));
    }

    Ok(Config {
        title,
        authors,
        bibliography,
        methods_placement: raw.methods_placement,
        methods_section: raw
            .methods_section
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| "Methods".to_string()),
        citation_style: raw.citation_style,
        date: raw.date,
        keywords: raw.keywords,
        template: raw.template,
        figures: raw.figures,
    })
}

/// Split a `---` YAML front-matter block off the top of a body.
pub fn split_front_matter(body: &str) -> (Option<&str>, &str) {
    let Some(rest) = body
        .strip_prefix("---\n")
        .or_else(|| body.strip_prefix("---\r\n"))
    else {
        return (None, body);
    };
    let mut offset = 0usize;
    for line in rest.split_inclusive('\n') {
        if line.trim_end() == "---" {
            let yaml = &rest[..offset];
            let after = &rest[offset + line.len()..];
            return (Some(yaml), after);
        }
        offset += line.len();
    }
    (None, body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const FULL: &str = r#"
title: "Cell growth under stress"
authors:
  - name: Ada Lovelace
    affiliation: Analytical Engines Ltd
    email: ada@example.org
  - Charles Babbage
bibliography: 03_REFERENCES.bib
methods_placement: after_results
citation_style: author-date
keywords: [growth, stress]
figures:
  format: png
  dpi: 150
"#;

    #[test]
    fn parses_full_config() {
        let config = parse_config(FULL).unwrap();
        assert_eq!(config.title, "Cell growth under stress");
        assert_eq!(config.authors.len(), 2);
        assert_eq!(config.authors[0].email.as_deref(), Some("ada@example.org"));
        assert_eq!(config.authors[1].name, "Charles Babbage");
        assert_eq!(config.methods_placement, MethodsPlacement::AfterResults);
        assert_eq!(config.citation_style, CitationStyle::AuthorDate);
        assert_eq!(config.figures.format, "png");
        assert_eq!(config.figures.dpi, 150);
        assert_eq!(config.figures.timeout_secs, 120);
        assert_eq!(config.methods_section, "Methods");
    }

    #[test]
    fn defaults_for_optional_fields() {
        let config =
            parse_config("title: T\nauthors: [A]\nbibliography: refs.bib\n").unwrap();
        assert_eq!(config.methods_placement, MethodsPlacement::Inline);
        assert_eq!(config.citation_style, CitationStyle::Numbered);
        assert_eq!(config.figures, FigureSettings::default());
        assert!(config.keywords.is_empty());
    }

    #[test]
    fn missing_mandatory_fields() {
        let err = parse_config("authors: [A]\nbibliography: r.bib\n").unwrap_err();
        assert!(matches!(err, ManuscriptError::MissingConfigField { ref field } if field == "title"));

        let err = parse_config("title: T\nauthors: []\nbibliography: r.bib\n").unwrap_err();
        assert!(matches!(err, ManuscriptError::MissingConfigField { ref field } if field == "authors"));

        let err = parse_config("title: T\nauthors: [A]\n").unwrap_err();
        assert!(
            matches!(err, ManuscriptError::MissingConfigField { ref field } if field == "bibliography")
        );
    }

    #[test]
    fn unknown_placement_is_a_parse_error() {
        let err = parse_config("title: T\nauthors: [A]\nbibliography: r.bib\nmethods_placement: sideways\n")
            .unwrap_err();
        assert!(matches!(err, ManuscriptError::ParseError { .. }));
    }

    #[test]
    fn front_matter_split() {
        let body = "---\ntitle: T\n---\n## Introduction\n";
        let (yaml, rest) = split_front_matter(body);
        assert_eq!(yaml, Some("title: T\n"));
        assert_eq!(rest, "## Introduction\n");

        let (yaml, rest) = split_front_matter("## Intro\n");
        assert!(yaml.is_none());
        assert_eq!(rest, "## Intro\n");
    }
}
