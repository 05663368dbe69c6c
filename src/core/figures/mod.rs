//! Figure processing
//!
//! Figure lines look like
//! `![Caption](FIGURES/plot.py){#fig:plot width="0.8\linewidth" position=t}`.
//! Script and diagram sources are generated through the [`FigureCache`];
//! static images are copied. Independent sources are generated in parallel
//! on a bounded rayon pool. A failing figure is reported and replaced by a
//! visible notice; everything else renders normally.

pub mod cache;
pub mod hash;
pub mod runner;

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use fxhash::FxHashMap;
use lazy_static::lazy_static;
use manutex_ir::{LabelKind, Section};
use rayon::prelude::*;
use regex::Regex;

use crate::core::crossref::LabelTable;
use crate::core::parser::attributes::{parse_attribute_block, Attributes};
use crate::core::parser::FigureSettings;
use crate::core::protect::SpanTable;
use crate::utils::diagnostics::{Diagnostic, DiagnosticKind, DiagnosticsReport};
use crate::utils::error::{ManuscriptError, ManuscriptResult};
use crate::utils::latex::escape_latex;

pub use cache::{CacheOutcome, FigureArtifact, FigureCache};
pub use hash::{figure_hash, referenced_data_files, FigureInputs};
pub use runner::{FigureToolchain, SourceKind};

/// Directory (under the output directory) receiving figure files.
pub const OUTPUT_FIGURES_DIR: &str = "Figures";

lazy_static! {
    static ref FIGURE_RE: Regex =
        Regex::new(r"^\s*!\[(.*)\]\(([^)\s]+)\)\s*(\{[^}]*\})?\s*$").unwrap();
}

/// What happened to one figure source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FigureRecord {
    /// Source path as written in the manuscript.
    pub source: String,
    /// Content hash, for generated sources.
    pub hash: Option<String>,
    /// Path relative to the output directory, when the figure is available.
    pub output: Option<PathBuf>,
    /// Served from the cache without running the generator.
    pub cached: bool,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FigureStats {
    pub hits: usize,
    pub generated: usize,
    pub copied: usize,
    pub failed: usize,
    pub races: usize,
}

/// A figure line found in a section.
#[derive(Debug, Clone)]
struct FigureLine {
    caption: String,
    source: String,
    attrs: Attributes,
}

fn parse_figure_line(line: &str) -> Option<FigureLine> {
    let caps = FIGURE_RE.captures(line)?;
    let attrs = match caps.get(3) {
        Some(block) => parse_attribute_block(block.as_str())?,
        None => Attributes::default(),
    };
    Some(FigureLine {
        caption: caps[1].trim().to_string(),
        source: caps[2].to_string(),
        attrs,
    })
}

pub struct FigureProcessor<'a> {
    /// Manuscript directory; figure paths are relative to it.
    pub root: &'a Path,
    pub output_dir: &'a Path,
    pub cache: &'a FigureCache,
    pub toolchain: &'a FigureToolchain,
    pub settings: &'a FigureSettings,
}

/// Result of one source, before LaTeX is emitted.
struct SourceResult {
    record: FigureRecord,
    outcome: Option<CacheOutcome>,
}

impl<'a> FigureProcessor<'a> {
    /// Generate every referenced figure and replace figure lines with LaTeX.
    pub fn process(
        &self,
        sections: &mut [Section],
        labels: &LabelTable,
        spans: &mut SpanTable,
        report: &mut DiagnosticsReport,
    ) -> ManuscriptResult<(Vec<FigureRecord>, FigureStats)> {
        let mut sources: Vec<String> = Vec::new();
        for section in sections.iter() {
            for line in section.body.lines() {
                if let Some(figure) = parse_figure_line(line) {
                    if !sources.contains(&figure.source) {
                        sources.push(figure.source);
                    }
                }
            }
        }
        if sources.is_empty() {
            return Ok((Vec::new(), FigureStats::default()));
        }
        log::debug!("processing {} figure sources", sources.len());

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.settings.workers.unwrap_or(0))
            .build()
            .map_err(|e| ManuscriptError::internal(format!("figure worker pool: {}", e)))?;
        let results: Vec<SourceResult> =
            pool.install(|| sources.par_iter().map(|source| self.produce(source)).collect());

        let mut stats = FigureStats::default();
        let mut records: Vec<FigureRecord> = Vec::with_capacity(results.len());
        let mut used_names: FxHashMap<String, String> = FxHashMap::default();
        for SourceResult { mut record, outcome } in results {
            if record.error.is_none() {
                if let Err(reason) = self.publish(&mut record, outcome.as_ref(), &mut used_names) {
                    record.error = Some(reason);
                    record.output = None;
                }
            }
            match &outcome {
                Some(CacheOutcome::Hit(_)) => stats.hits += 1,
                Some(CacheOutcome::Generated(_)) => stats.generated += 1,
                Some(CacheOutcome::RaceHit(_)) => {
                    stats.races += 1;
                    report.push(
                        Diagnostic::new(
                            DiagnosticKind::CacheWriteRace,
                            "Cache entry written concurrently; reused the existing entry",
                        )
                        .with_subject(record.source.as_str()),
                    );
                }
                None if record.error.is_none() => stats.copied += 1,
                None => {}
            }
            if let Some(reason) = &record.error {
                stats.failed += 1;
                log::warn!("figure {} failed: {}", record.source, reason);
                report.push(Diagnostic::figure_generation(&record.source, reason.clone()));
            }
            records.push(record);
        }

        let by_source: FxHashMap<&str, &FigureRecord> =
            records.iter().map(|r| (r.source.as_str(), r)).collect();
        for section in sections.iter_mut() {
            section.body = replace_figure_lines(&section.body, &by_source, labels, spans);
        }

        log::info!(
            "figures: {} cached, {} generated, {} copied, {} failed",
            stats.hits,
            stats.generated,
            stats.copied,
            stats.failed
        );
        Ok((records, stats))
    }

    /// Generate or locate one source. Runs on a pool worker.
    fn produce(&self, source: &str) -> SourceResult {
        let mut record = FigureRecord {
            source: source.to_string(),
            hash: None,
            output: None,
            cached: false,
            error: None,
        };
        let path = self.root.join(source);
        let kind = match SourceKind::from_path(&path) {
            Some(kind) => kind,
            None => {
                record.error = Some("unsupported figure source type".to_string());
                return SourceResult { record, outcome: None };
            }
        };
        if !path.is_file() {
            record.error = Some(format!("figure source not found: {}", path.display()));
            return SourceResult { record, outcome: None };
        }
        if kind == SourceKind::Static {
            return SourceResult { record, outcome: None };
        }

        match self.generate(source, &path, kind) {
            Ok((hash, outcome)) => {
                record.hash = Some(hash);
                record.cached = !matches!(outcome, CacheOutcome::Generated(_));
                SourceResult {
                    record,
                    outcome: Some(outcome),
                }
            }
            Err(reason) => {
                record.error = Some(reason);
                SourceResult { record, outcome: None }
            }
        }
    }

    fn generate(
        &self,
        source: &str,
        path: &Path,
        kind: SourceKind,
    ) -> Result<(String, CacheOutcome), String> {
        let bytes = fs::read(path).map_err(|e| format!("cannot read {}: {}", path.display(), e))?;
        let script_dir = path.parent().unwrap_or(self.root).to_path_buf();
        let data_files: Vec<(String, Vec<u8>)> =
            referenced_data_files(&String::from_utf8_lossy(&bytes), &script_dir)
                .into_iter()
                .map(|name| {
                    let data = fs::read(script_dir.join(&name)).unwrap_or_default();
                    (name, data)
                })
                .collect();
        let template = self
            .toolchain
            .template(kind)
            .ok_or_else(|| "no generator for this source type".to_string())?;
        let format = self.settings.format.as_str();
        let hash = figure_hash(&FigureInputs {
            relative_path: source,
            source: &bytes,
            data_files: &data_files,
            format,
            dpi: self.settings.dpi,
            command: &template,
        });

        let stem = file_stem(source);
        let file_name = format!("{}.{}", stem, format);
        let source_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or(source)
            .to_string();

        let outcome = self.cache.get_or_generate(
            &hash,
            source,
            self.settings.force_regenerate,
            |scratch| {
                let output = scratch.join(&file_name);
                let output_str = output.to_string_lossy().to_string();
                let argv = self
                    .toolchain
                    .command_line(kind, &source_name, &output_str)
                    .ok_or_else(|| "no generator for this source type".to_string())?;
                let env = [
                    ("MANUTEX_FIGURE_OUTPUT", output_str.clone()),
                    ("MANUTEX_FIGURE_FORMAT", format.to_string()),
                    ("MANUTEX_FIGURE_DPI", self.settings.dpi.to_string()),
                ];
                let stderr_log = scratch.join(".stderr.log");
                log::debug!("running {:?} for {}", argv, source);
                let result = runner::run_generator(&runner::GeneratorRun {
                    argv: &argv,
                    working_dir: &script_dir,
                    env: &env,
                    timeout: Duration::from_secs(self.settings.timeout_secs),
                    stderr_log: &stderr_log,
                });
                let _ = fs::remove_file(&stderr_log);
                result?;
                let written = fs::metadata(&output).map(|m| m.len()).unwrap_or(0);
                if written == 0 {
                    return Err(format!("generator did not write {}", file_name));
                }
                Ok(cache::Produced {
                    files: vec![file_name.clone()],
                    format: format.to_string(),
                    dpi: self.settings.dpi,
                })
            },
        )?;
        Ok((hash, outcome))
    }

    /// Copy the artifact into `<output>/Figures/` and record its path.
    fn publish(
        &self,
        record: &mut FigureRecord,
        outcome: Option<&CacheOutcome>,
        used_names: &mut FxHashMap<String, String>,
    ) -> Result<(), String> {
        let (from, ext) = match outcome {
            Some(outcome) => {
                let artifact = outcome.artifact();
                let file = artifact
                    .primary_file()
                    .ok_or_else(|| "cache entry has no files".to_string())?;
                (
                    self.cache.entry_dir(&artifact.hash).join(file),
                    extension(file),
                )
            }
            None => (self.root.join(&record.source), extension(&record.source)),
        };

        let stem = file_stem(&record.source);
        let tag = record.hash.as_deref().map(|h| &h[..h.len().min(8)]);
        let mut name = format!("{}.{}", stem, ext);
        let mut attempt = 1usize;
        while used_names.get(&name).map_or(false, |owner| owner != &record.source) {
            name = match (tag, attempt) {
                (Some(tag), 1) => format!("{}-{}.{}", stem, tag, ext),
                (Some(tag), n) => format!("{}-{}-{}.{}", stem, tag, n, ext),
                (None, n) => format!("{}-{}.{}", stem, n, ext),
            };
            attempt += 1;
        }
        used_names.insert(name.clone(), record.source.clone());

        let dir = self.output_dir.join(OUTPUT_FIGURES_DIR);
        fs::create_dir_all(&dir).map_err(|e| format!("cannot create {}: {}", dir.display(), e))?;
        fs::copy(&from, dir.join(&name))
            .map_err(|e| format!("cannot copy {}: {}", from.display(), e))?;
        record.output = Some(Path::new(OUTPUT_FIGURES_DIR).join(name));
        Ok(())
    }
}

fn file_stem(source: &str) -> String {
    Path::new(source)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("figure")
        .to_string()
}

fn extension(file: &str) -> String {
    Path::new(file)
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("pdf")
        .to_lowercase()
}

fn replace_figure_lines(
    body: &str,
    records: &FxHashMap<&str, &FigureRecord>,
    labels: &LabelTable,
    spans: &mut SpanTable,
) -> String {
    let mut out: Vec<String> = Vec::new();
    for line in body.lines() {
        match parse_figure_line(line) {
            Some(figure) => match records.get(figure.source.as_str()) {
                Some(record) => out.push(render_figure(&figure, record, labels, spans)),
                None => out.push(line.to_string()),
            },
            None => out.push(line.to_string()),
        }
    }
    out.join("\n")
}

/// The caption stays as open text between two generated spans so the later
/// reference and markup passes still see it.
fn render_figure(
    figure: &FigureLine,
    record: &FigureRecord,
    labels: &LabelTable,
    spans: &mut SpanTable,
) -> String {
    let position = figure.attrs.get("position").unwrap_or("htbp");
    let width = figure.attrs.get("width").unwrap_or("\\linewidth");
    let label = figure.attrs.label.as_deref().filter(|l| {
        matches!(
            labels.get(l).map(|r| r.kind),
            Some(LabelKind::Figure | LabelKind::SupplementaryFigure)
        )
    });

    let mut head = format!("\\begin{{figure}}[{}]\n\\centering\n", position);
    if let Some(numbering) = label.and_then(|l| labels.supplementary_numbering(l)) {
        head.push_str(&numbering);
        head.push('\n');
    }
    match &record.output {
        Some(path) => head.push_str(&format!(
            "\\includegraphics[width={}]{{{}}}\n",
            width,
            path.to_string_lossy().replace('\\', "/")
        )),
        None => head.push_str(&format!(
            "\\fbox{{\\parbox{{0.8\\linewidth}}{{\\centering Figure unavailable: \\texttt{{{}}}}}}}\n",
            escape_latex(&figure.source)
        )),
    }
    if let Some(counter) = label.and_then(|l| labels.counter_command(l)) {
        head.push_str(&counter);
        head.push('\n');
    }

    let mut tail = String::new();
    match (label, figure.caption.is_empty()) {
        (Some(label), _) => {
            head.push_str("\\caption{");
            tail.push_str(&format!("}}\\label{{{}}}\n", label));
        }
        (None, false) => {
            head.push_str("\\caption*{");
            tail.push('}');
            tail.push('\n');
        }
        (None, true) => {}
    }
    tail.push_str("\\end{figure}");

    format!(
        "{}{}{}",
        spans.insert_generated(head),
        figure.caption,
        spans.insert_generated(tail)
    )
}
