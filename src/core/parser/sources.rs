//! Manuscript inputs, in memory or loaded from a manuscript directory.

use std::path::{Path, PathBuf};

use super::config::{parse_config, split_front_matter};
use crate::utils::error::{ManuscriptError, ManuscriptResult};
use crate::utils::files::FileResolver;

pub const CONFIG_FILE: &str = "00_CONFIG.yml";
pub const MAIN_FILE: &str = "01_MAIN.md";
pub const SUPPLEMENTARY_FILE: &str = "02_SUPPLEMENTARY_INFO.md";
pub const FIGURES_DIR: &str = "FIGURES";

/// One Markdown body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BodySource {
    /// File name or other short identifier used in messages.
    pub name: String,
    pub text: String,
    pub supplementary: bool,
}

impl BodySource {
    pub fn main(name: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            text: text.into(),
            supplementary: false,
        }
    }

    pub fn supplementary(name: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            text: text.into(),
            supplementary: true,
        }
    }
}

/// Everything a conversion reads.
///
/// `root` is the manuscript directory: figure paths in the Markdown are
/// resolved against it.
#[derive(Debug, Clone, Default)]
pub struct ManuscriptSources {
    pub root: PathBuf,
    /// Standalone YAML config. When absent, the first body must carry a
    /// front-matter block.
    pub config: Option<String>,
    pub bodies: Vec<BodySource>,
    pub bibliography: Option<String>,
    /// Custom template text, overriding the built-in one.
    pub template: Option<String>,
}

impl ManuscriptSources {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            ..Default::default()
        }
    }

    pub fn with_config(mut self, yaml: impl Into<String>) -> Self {
        self.config = Some(yaml.into());
        self
    }

    pub fn with_body(mut self, body: BodySource) -> Self {
        self.bodies.push(body);
        self
    }

    pub fn with_bibliography(mut self, bibtex: impl Into<String>) -> Self {
        self.bibliography = Some(bibtex.into());
        self
    }

    pub fn with_template(mut self, template: impl Into<String>) -> Self {
        self.template = Some(template.into());
        self
    }

    pub fn figures_dir(&self) -> PathBuf {
        self.root.join(FIGURES_DIR)
    }

    /// Load the conventional layout: `00_CONFIG.yml`, `01_MAIN.md`, optional
    /// `02_SUPPLEMENTARY_INFO.md`, plus the bibliography and template files
    /// the config names.
    pub fn from_dir(dir: &Path, resolver: &dyn FileResolver) -> ManuscriptResult<Self> {
        let mut sources = ManuscriptSources::new(dir);

        let config_path = dir.join(CONFIG_FILE);
        if resolver.exists(&config_path) {
            sources.config = Some(resolver.read_text(&config_path)?);
        }

        let main = resolver.read_text(&dir.join(MAIN_FILE))?;
        sources.bodies.push(BodySource::main(MAIN_FILE, main));

        let supplementary_path = dir.join(SUPPLEMENTARY_FILE);
        if resolver.exists(&supplementary_path) {
            let text = resolver.read_text(&supplementary_path)?;
            sources
                .bodies
                .push(BodySource::supplementary(SUPPLEMENTARY_FILE, text));
        }

        let yaml = match &sources.config {
            Some(yaml) => yaml.clone(),
            None => split_front_matter(&sources.bodies[0].text)
                .0
                .map(str::to_string)
                .ok_or_else(|| {
                    ManuscriptError::invalid(format!(
                        "{} not found and {} has no front matter",
                        CONFIG_FILE, MAIN_FILE
                    ))
                })?,
        };
        let config = parse_config(&yaml)?;

        sources.bibliography = Some(resolver.read_text(&dir.join(&config.bibliography))?);
        if let Some(template) = &config.template {
            sources.template = Some(resolver.read_text(&dir.join(template))?);
        }

        log::debug!(
            "loaded manuscript from {} ({} bodies)",
            dir.display(),
            sources.bodies.len()
        );
        Ok(sources)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::files::MemoryFileResolver;

    const CONFIG: &str = "title: T\nauthors: [A]\nbibliography: refs.bib\n";

    #[test]
    fn loads_conventional_layout() {
        let resolver = MemoryFileResolver::new()
            .with_file("ms/00_CONFIG.yml", CONFIG)
            .with_file("ms/01_MAIN.md", "## Intro\n")
            .with_file("ms/02_SUPPLEMENTARY_INFO.md", "## Extra\n")
            .with_file("ms/refs.bib", "@misc{a, title={A}}");
        let sources = ManuscriptSources::from_dir(Path::new("ms"), &resolver).unwrap();
        assert_eq!(sources.bodies.len(), 2);
        assert!(sources.bodies[1].supplementary);
        assert!(sources.bibliography.unwrap().contains("@misc"));
        assert_eq!(sources.root, PathBuf::from("ms"));
    }

    #[test]
    fn front_matter_stands_in_for_config_file() {
        let main = format!("---\n{}---\n## Intro\n", CONFIG);
        let resolver = MemoryFileResolver::new()
            .with_file("ms/01_MAIN.md", main)
            .with_file("ms/refs.bib", "");
        let sources = ManuscriptSources::from_dir(Path::new("ms"), &resolver).unwrap();
        assert!(sources.config.is_none());
        assert_eq!(sources.bodies.len(), 1);
    }

    #[test]
    fn missing_main_body_is_io_error() {
        let resolver = MemoryFileResolver::new().with_file("ms/00_CONFIG.yml", CONFIG);
        let err = ManuscriptSources::from_dir(Path::new("ms"), &resolver).unwrap_err();
        assert!(matches!(err, ManuscriptError::IoError { .. }));
    }
}
