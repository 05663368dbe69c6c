//! Citation resolution
//!
//! Markers:
//! - `@key` narrative citation (the `@` must not follow a word character)
//! - `[@a; @b]` bracketed group, `,` also separates
//! - `[-@key]` suppressed author
//!
//! Keys whose prefix is a cross-reference kind (`@fig:x`) are left for the
//! reference resolver. Every rendering is shielded as a generated span.

mod bibliography;
mod enrich;

use std::ops::Range;

use fxhash::FxHashMap;
use indexmap::IndexMap;
use lazy_static::lazy_static;
use manutex_ir::{BibliographyEntry, LabelKind, Section};
use regex::Regex;

use crate::core::crossref::section_name;
use crate::core::parser::{Bibliography, CitationStyle};
use crate::core::protect::SpanTable;
use crate::utils::diagnostics::{Diagnostic, DiagnosticsReport};

pub use bibliography::render_bibliography;
pub use enrich::{enrich_bibliography, MetadataEnricher, NoopEnricher};

lazy_static! {
    static ref KEY_RE: Regex = Regex::new(r"^@([A-Za-z0-9_][A-Za-z0-9_:.\-]*)").unwrap();
    static ref ITEM_RE: Regex = Regex::new(r"-?@[A-Za-z0-9_][A-Za-z0-9_:.\-]*").unwrap();
    static ref GROUP_RE: Regex = Regex::new(
        r"^\[\s*(-?@[A-Za-z0-9_][A-Za-z0-9_:.\-]*(?:\s*[;,]\s*-?@[A-Za-z0-9_][A-Za-z0-9_:.\-]*)*)\s*\]"
    )
    .unwrap();
}

/// One key inside a marker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CiteItem {
    pub key: String,
    pub suppress_author: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CitationMarker {
    /// `@key` in running text.
    Narrative(String),
    /// `[@a; -@b]`.
    Bracketed(Vec<CiteItem>),
    /// One citation inside a bracket that also holds cross-references,
    /// `[@fig:a; @smith]`. Rendered without brackets of its own.
    Grouped(CiteItem),
}

impl CitationMarker {
    pub fn keys(&self) -> Vec<&str> {
        match self {
            CitationMarker::Narrative(key) => vec![key.as_str()],
            CitationMarker::Bracketed(items) => items.iter().map(|i| i.key.as_str()).collect(),
            CitationMarker::Grouped(item) => vec![item.key.as_str()],
        }
    }
}

fn is_reference_key(key: &str) -> bool {
    key.split_once(':')
        .map(|(prefix, _)| LabelKind::from_prefix(prefix).is_some())
        .unwrap_or(false)
}

fn trim_key(key: &str) -> &str {
    key.trim_end_matches(|c| matches!(c, '.' | ':' | '-'))
}

/// Find every citation marker in `text`, in order.
pub fn scan_markers(text: &str) -> Vec<(Range<usize>, CitationMarker)> {
    let mut markers = Vec::new();
    let mut prev: Option<char> = None;
    let mut iter = text.char_indices();

    while let Some((i, ch)) = iter.next() {
        let mut skip_to = None;
        if ch == '[' {
            if let Some(caps) = GROUP_RE.captures(&text[i..]) {
                let end = i + caps[0].len();
                let items: Vec<CiteItem> = caps[1]
                    .split(|c| c == ';' || c == ',')
                    .map(|raw| {
                        let raw = raw.trim();
                        let suppress_author = raw.starts_with('-');
                        let key = trim_key(raw.trim_start_matches('-').trim_start_matches('@'));
                        CiteItem {
                            key: key.to_string(),
                            suppress_author,
                        }
                    })
                    .collect();
                let is_link = text[end..].starts_with('(');
                let has_references = items.iter().any(|item| is_reference_key(&item.key));
                if !is_link && !has_references {
                    markers.push((i..end, CitationMarker::Bracketed(items)));
                    skip_to = Some(end);
                } else if !is_link {
                    // Cross-references stay in place for the reference pass.
                    let base = i + caps.get(1).map_or(0, |g| g.start());
                    for m in ITEM_RE.find_iter(&caps[1]) {
                        let raw = m.as_str();
                        let suppress_author = raw.starts_with('-');
                        let prefix = if suppress_author { 2 } else { 1 };
                        let key = trim_key(&raw[prefix..]);
                        if key.is_empty() || is_reference_key(key) {
                            continue;
                        }
                        let start = base + m.start();
                        let item = CiteItem {
                            key: key.to_string(),
                            suppress_author,
                        };
                        markers.push((start..start + prefix + key.len(), CitationMarker::Grouped(item)));
                    }
                    skip_to = Some(end);
                }
            }
        } else if ch == '@' && !prev.map(|c| c.is_alphanumeric() || c == '_').unwrap_or(false) {
            if let Some(caps) = KEY_RE.captures(&text[i..]) {
                let key = trim_key(&caps[1]);
                if !key.is_empty() && !is_reference_key(key) {
                    let end = i + 1 + key.len();
                    markers.push((i..end, CitationMarker::Narrative(key.to_string())));
                    skip_to = Some(end);
                }
            }
        }

        prev = Some(ch);
        if let Some(end) = skip_to {
            while let Some((j, c)) = iter.clone().next() {
                if j >= end {
                    break;
                }
                prev = Some(c);
                iter.next();
            }
        }
    }
    markers
}

/// Distinct cited keys in order of first appearance.
pub fn collect_cited_keys(sections: &[Section]) -> Vec<String> {
    let mut keys: IndexMap<String, ()> = IndexMap::new();
    for section in sections {
        for (_, marker) in scan_markers(&section.body) {
            for key in marker.keys() {
                keys.entry(key.to_string()).or_insert(());
            }
        }
    }
    keys.into_keys().collect()
}

/// Author-date label of one entry: `Smith et al.` and `2023a`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorDateLabel {
    pub names: String,
    pub year: String,
}

pub fn author_names(entry: &BibliographyEntry) -> String {
    let surnames = entry.surnames();
    match surnames.len() {
        0 => entry
            .title
            .clone()
            .unwrap_or_else(|| entry.key.clone()),
        1 => surnames[0].clone(),
        2 => format!("{} and {}", surnames[0], surnames[1]),
        _ => format!("{} et al.", surnames[0]),
    }
}

pub struct CitationProcessor<'a> {
    bibliography: &'a Bibliography,
    style: CitationStyle,
    /// Resolved keys in first-citation order.
    cited: Vec<String>,
    numbers: FxHashMap<String, usize>,
    labels: FxHashMap<String, AuthorDateLabel>,
    /// Unresolved key → (occurrences, first section).
    unresolved: IndexMap<String, (usize, String)>,
}

impl<'a> CitationProcessor<'a> {
    /// Number and label every key cited anywhere in `sections`.
    pub fn new(bibliography: &'a Bibliography, style: CitationStyle, sections: &[Section]) -> Self {
        let cited: Vec<String> = collect_cited_keys(sections)
            .into_iter()
            .filter(|key| bibliography.contains(key))
            .collect();
        let numbers = cited
            .iter()
            .enumerate()
            .map(|(idx, key)| (key.clone(), idx + 1))
            .collect();
        let labels = author_date_labels(bibliography, &cited);
        Self {
            bibliography,
            style,
            cited,
            numbers,
            labels,
            unresolved: IndexMap::new(),
        }
    }

    pub fn number(&self, key: &str) -> Option<usize> {
        self.numbers.get(key).copied()
    }

    pub fn label(&self, key: &str) -> Option<&AuthorDateLabel> {
        self.labels.get(key)
    }

    pub fn style(&self) -> CitationStyle {
        self.style
    }

    /// Cited entries in bibliography order for the configured style.
    pub fn cited_entries(&self) -> Vec<&'a BibliographyEntry> {
        let mut entries: Vec<&BibliographyEntry> = self
            .cited
            .iter()
            .filter_map(|key| self.bibliography.get(key))
            .collect();
        if self.style == CitationStyle::AuthorDate {
            entries.sort_by_cached_key(|e| {
                (
                    e.first_author_surname().unwrap_or_default().to_lowercase(),
                    e.year.clone().unwrap_or_default(),
                    e.title.clone().unwrap_or_default().to_lowercase(),
                )
            });
        }
        entries
    }

    /// Replace the markers of every section body.
    pub fn process(
        &mut self,
        sections: &mut [Section],
        spans: &mut SpanTable,
        report: &mut DiagnosticsReport,
    ) {
        for section in sections.iter_mut() {
            let name = section_name(section).to_string();
            section.body = self.process_text(&section.body, &name, spans);
        }
        for (key, (count, section)) in std::mem::take(&mut self.unresolved) {
            log::warn!("citation key '{}' not in bibliography ({} uses)", key, count);
            report.push(Diagnostic::unresolved_citation(&key, count).with_location(section));
        }
    }

    fn process_text(&mut self, text: &str, section: &str, spans: &mut SpanTable) -> String {
        let markers = scan_markers(text);
        if markers.is_empty() {
            return text.to_string();
        }
        let mut out = String::with_capacity(text.len());
        let mut last = 0usize;
        for (range, marker) in markers {
            out.push_str(&text[last..range.start]);
            let latex = self.render_marker(&marker, section);
            out.push_str(&spans.insert_generated(latex));
            last = range.end;
        }
        out.push_str(&text[last..]);
        out
    }

    fn note_unresolved(&mut self, key: &str, section: &str) -> String {
        let slot = self
            .unresolved
            .entry(key.to_string())
            .or_insert_with(|| (0, section.to_string()));
        slot.0 += 1;
        unresolved_marker(key)
    }

    /// LaTeX for one marker.
    pub fn render_marker(&mut self, marker: &CitationMarker, section: &str) -> String {
        match marker {
            CitationMarker::Narrative(key) => {
                let item = CiteItem {
                    key: key.clone(),
                    suppress_author: false,
                };
                match self.style {
                    CitationStyle::Numbered => self.render_numbered(&[item], section),
                    CitationStyle::AuthorDate => match self.labels.get(key) {
                        Some(label) => format!("{} ({})", label.names, label.year),
                        None => self.note_unresolved(key, section),
                    },
                }
            }
            CitationMarker::Bracketed(items) => {
                let mut seen: Vec<&str> = Vec::new();
                let items: Vec<CiteItem> = items
                    .iter()
                    .filter(|item| {
                        let fresh = !seen.contains(&item.key.as_str());
                        seen.push(&item.key);
                        fresh
                    })
                    .cloned()
                    .collect();
                match self.style {
                    CitationStyle::Numbered => self.render_numbered(&items, section),
                    CitationStyle::AuthorDate => self.render_author_date_group(&items, section),
                }
            }
            CitationMarker::Grouped(item) => match self.style {
                CitationStyle::Numbered => match self.numbers.get(&item.key) {
                    Some(n) => n.to_string(),
                    None => self.note_unresolved(&item.key, section),
                },
                CitationStyle::AuthorDate => match self.labels.get(&item.key).cloned() {
                    Some(label) if item.suppress_author => label.year,
                    Some(label) => format!("{}, {}", label.names, label.year),
                    None => self.note_unresolved(&item.key, section),
                },
            },
        }
    }

    fn render_numbered(&mut self, items: &[CiteItem], section: &str) -> String {
        let mut numbers = Vec::new();
        let mut missing = Vec::new();
        for item in items {
            match self.numbers.get(&item.key) {
                Some(n) => numbers.push(*n),
                None => missing.push(self.note_unresolved(&item.key, section)),
            }
        }
        let mut parts = Vec::new();
        if !numbers.is_empty() {
            parts.push(format!("[{}]", compress_numbers(&numbers)));
        }
        parts.extend(missing);
        parts.join(" ")
    }

    fn render_author_date_group(&mut self, items: &[CiteItem], section: &str) -> String {
        let mut parts = Vec::new();
        for item in items {
            match self.labels.get(&item.key).cloned() {
                Some(label) if item.suppress_author => parts.push(label.year),
                Some(label) => parts.push(format!("{}, {}", label.names, label.year)),
                None => parts.push(self.note_unresolved(&item.key, section)),
            }
        }
        format!("({})", parts.join("; "))
    }
}

pub fn unresolved_marker(key: &str) -> String {
    format!("\\textbf{{[?{}]}}", crate::utils::latex::escape_latex(key))
}

/// `1, 2, 3, 5` → `1--3, 5`. Only runs of three or more collapse.
pub fn compress_numbers(numbers: &[usize]) -> String {
    let mut parts: Vec<String> = Vec::new();
    let mut idx = 0usize;
    while idx < numbers.len() {
        let mut end = idx;
        while end + 1 < numbers.len() && numbers[end + 1] == numbers[end] + 1 {
            end += 1;
        }
        if end - idx >= 2 {
            parts.push(format!("{}--{}", numbers[idx], numbers[end]));
        } else {
            parts.extend(numbers[idx..=end].iter().map(|n| n.to_string()));
        }
        idx = end + 1;
    }
    parts.join(", ")
}

/// Labels for cited entries, with `a`/`b` suffixes where two entries would
/// otherwise read the same.
fn author_date_labels(
    bibliography: &Bibliography,
    cited: &[String],
) -> FxHashMap<String, AuthorDateLabel> {
    let mut groups: IndexMap<(String, String), Vec<&BibliographyEntry>> = IndexMap::new();
    for key in cited {
        if let Some(entry) = bibliography.get(key) {
            let year = entry.year.clone().unwrap_or_else(|| "n.d.".to_string());
            groups
                .entry((author_names(entry), year))
                .or_default()
                .push(entry);
        }
    }

    let mut labels = FxHashMap::default();
    for ((names, year), mut entries) in groups {
        if entries.len() == 1 {
            labels.insert(
                entries[0].key.clone(),
                AuthorDateLabel { names, year },
            );
            continue;
        }
        entries.sort_by(|a, b| {
            let ta = a.title.as_deref().unwrap_or_default().to_lowercase();
            let tb = b.title.as_deref().unwrap_or_default().to_lowercase();
            ta.cmp(&tb).then_with(|| a.key.cmp(&b.key))
        });
        for (idx, entry) in entries.into_iter().enumerate() {
            let suffix = (b'a' + (idx % 26) as u8) as char;
            labels.insert(
                entry.key.clone(),
                AuthorDateLabel {
                    names: names.clone(),
                    year: format!("{}{}", year, suffix),
                },
            );
        }
    }
    labels
}
