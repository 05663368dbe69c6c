//! End-to-end conversion
//!
//! [`convert_manuscript`] runs every stage in order over one manuscript and
//! returns the LaTeX source together with the diagnostics report. Fatal
//! errors stop the run before any LaTeX is produced; everything else is
//! reported and the best-effort document is returned.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::core::assembler::assemble;
use crate::core::citations::{
    collect_cited_keys, enrich_bibliography, render_bibliography, CitationProcessor,
    MetadataEnricher,
};
use crate::core::crossref::{resolve_references, LabelTable};
use crate::core::figures::{FigureCache, FigureProcessor, FigureRecord, FigureStats, FigureToolchain};
use crate::core::markup::convert_sections;
use crate::core::parser::{parse_manuscript, Manuscript, ManuscriptSources};
use crate::core::render::{render_document, RenderInputs};
use crate::core::tables::process_tables;
use crate::utils::diagnostics::DiagnosticsReport;
use crate::utils::error::{ManuscriptError, ManuscriptResult};
use crate::utils::files::StdFileResolver;

/// File name used by [`ConversionOutput::write`].
pub const OUTPUT_TEX_FILE: &str = "manuscript.tex";

const DEFAULT_ENRICHMENT_TIMEOUT: Duration = Duration::from_secs(10);

/// Everything the caller decides about a run.
pub struct ConversionOptions {
    /// Receives `Figures/` and, through [`ConversionOutput::write`], the
    /// LaTeX source.
    pub output_dir: PathBuf,
    pub cache: FigureCache,
    pub toolchain: FigureToolchain,
    pub enricher: Option<Arc<dyn MetadataEnricher>>,
    pub enrichment_timeout: Duration,
}

impl ConversionOptions {
    pub fn new(output_dir: impl Into<PathBuf>, cache: FigureCache) -> Self {
        Self {
            output_dir: output_dir.into(),
            cache,
            toolchain: FigureToolchain::default(),
            enricher: None,
            enrichment_timeout: DEFAULT_ENRICHMENT_TIMEOUT,
        }
    }

    pub fn with_toolchain(mut self, toolchain: FigureToolchain) -> Self {
        self.toolchain = toolchain;
        self
    }

    pub fn with_enricher(mut self, enricher: Arc<dyn MetadataEnricher>, timeout: Duration) -> Self {
        self.enricher = Some(enricher);
        self.enrichment_timeout = timeout;
        self
    }
}

#[derive(Debug, Clone)]
pub struct ConversionOutput {
    pub latex: String,
    pub diagnostics: DiagnosticsReport,
    pub figures: Vec<FigureRecord>,
    pub figure_stats: FigureStats,
}

impl ConversionOutput {
    /// Write the LaTeX source into `dir`, returning its path.
    pub fn write(&self, dir: &Path) -> ManuscriptResult<PathBuf> {
        fs::create_dir_all(dir)?;
        let path = dir.join(OUTPUT_TEX_FILE);
        fs::write(&path, &self.latex)?;
        Ok(path)
    }
}

/// Convert one manuscript.
pub fn convert_manuscript(
    sources: &ManuscriptSources,
    options: &ConversionOptions,
) -> ManuscriptResult<ConversionOutput> {
    let mut report = DiagnosticsReport::new();
    let Manuscript {
        config,
        mut sections,
        mut bibliography,
        mut spans,
    } = parse_manuscript(sources)?;

    let template = match (&sources.template, &config.template) {
        (Some(text), _) => Some(text.clone()),
        (None, Some(path)) => {
            let path = sources.root.join(path);
            let text = fs::read_to_string(&path).map_err(|e| ManuscriptError::IoError {
                message: format!("{}: {}", path.display(), e),
            })?;
            Some(text)
        }
        (None, None) => None,
    };

    let labels = LabelTable::collect(&sections)?;
    log::debug!("collected {} labels", labels.len());

    if let Some(enricher) = &options.enricher {
        let keys = collect_cited_keys(&sections);
        let updated = enrich_bibliography(
            &mut bibliography,
            &keys,
            enricher,
            options.enrichment_timeout,
            &mut report,
        );
        log::debug!("enriched {} bibliography entries", updated);
    }

    let bibliography_latex = {
        let mut citations = CitationProcessor::new(&bibliography, config.citation_style, &sections);
        citations.process(&mut sections, &mut spans, &mut report);
        render_bibliography(&citations)
    };

    resolve_references(&mut sections, &labels, &mut spans, &mut report);

    fs::create_dir_all(&options.output_dir)?;
    let figure_processor = FigureProcessor {
        root: &sources.root,
        output_dir: &options.output_dir,
        cache: &options.cache,
        toolchain: &options.toolchain,
        settings: &config.figures,
    };
    let (figures, figure_stats) =
        figure_processor.process(&mut sections, &labels, &mut spans, &mut report)?;

    process_tables(&mut sections, &labels, &mut spans);
    convert_sections(&mut sections, &spans, &labels);

    let document = assemble(
        sections,
        config.methods_placement,
        &config.methods_section,
        &mut report,
    );
    let latex = render_document(
        &RenderInputs {
            config: &config,
            document: &document,
            bibliography: &bibliography_latex,
            template: template.as_deref(),
        },
        &mut spans,
        &labels,
    )?;

    log::info!(
        "converted '{}': {} figures ({} cached, {} generated, {} failed), {} diagnostics",
        config.title,
        figures.len(),
        figure_stats.hits,
        figure_stats.generated,
        figure_stats.failed,
        report.len()
    );

    Ok(ConversionOutput {
        latex,
        diagnostics: report,
        figures,
        figure_stats,
    })
}

/// Load a manuscript directory with the conventional layout and convert it.
pub fn convert_directory(dir: &Path, options: &ConversionOptions) -> ManuscriptResult<ConversionOutput> {
    let sources = ManuscriptSources::from_dir(dir, &StdFileResolver)?;
    convert_manuscript(&sources, options)
}
