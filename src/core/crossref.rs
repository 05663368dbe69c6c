//! Two-pass cross-reference resolution
//!
//! Pass 1 ([`LabelTable::collect`]) walks every section in authored order and
//! numbers each declared label per kind. Pass 2 ([`resolve_references`])
//! replaces `@kind:name` markers with hyperlinked renderings. Because numbers
//! are fixed in pass 1, a reference may appear before its declaration and
//! section reordering never changes a number.

use fxhash::FxHashMap;
use indexmap::IndexMap;
use lazy_static::lazy_static;
use manutex_ir::{CrossReference, LabelKind, Section};
use regex::Regex;

use crate::core::parser::attributes::label_kind;
use crate::core::protect::SpanTable;
use crate::utils::diagnostics::{Diagnostic, DiagnosticsReport};
use crate::utils::error::{ManuscriptError, ManuscriptResult};
use crate::utils::latex::escape_latex;

lazy_static! {
    static ref DECLARATION_RE: Regex =
        Regex::new(r"\{#([a-z]+:[A-Za-z0-9_-]+)(?:\s[^}\n]*)?\}").unwrap();
    static ref REFERENCE_RE: Regex =
        Regex::new(r"@((?:fig|sfig|table|stable|eq|sec|snote):[A-Za-z0-9_-]+)").unwrap();
}

/// Symbol table of declared labels.
#[derive(Debug, Clone, Default)]
pub struct LabelTable {
    labels: IndexMap<String, CrossReference>,
    counters: FxHashMap<LabelKind, usize>,
}

impl LabelTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a declaration. Declaring the same label twice is fatal.
    pub fn declare(
        &mut self,
        label: &str,
        kind: LabelKind,
        section: &str,
    ) -> ManuscriptResult<&CrossReference> {
        if let Some(existing) = self.labels.get(label) {
            return Err(ManuscriptError::DuplicateLabel {
                label: label.to_string(),
                first: existing.section.clone(),
                second: section.to_string(),
            });
        }
        let counter = self.counters.entry(kind).or_insert(0);
        *counter += 1;
        let reference = CrossReference {
            label: label.to_string(),
            kind,
            sequence: *counter,
            section: section.to_string(),
        };
        let (idx, _) = self.labels.insert_full(label.to_string(), reference);
        Ok(&self.labels[idx])
    }

    /// Collection pass over all sections, in the order given.
    pub fn collect(sections: &[Section]) -> ManuscriptResult<Self> {
        let mut table = LabelTable::new();
        for section in sections {
            let name = section_name(section);
            if let Some(label) = &section.label {
                if let Some(kind) = label_kind(label) {
                    table.declare(label, kind, name)?;
                }
            }
            for caps in DECLARATION_RE.captures_iter(&section.raw) {
                let label = &caps[1];
                if let Some(kind) = label_kind(label) {
                    table.declare(label, kind, name)?;
                }
            }
        }
        log::debug!("collected {} labels", table.len());
        Ok(table)
    }

    pub fn get(&self, label: &str) -> Option<&CrossReference> {
        self.labels.get(label)
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &CrossReference> {
        self.labels.values()
    }

    /// `\setcounter{figure}{N-1}` for a numbered float or equation label, so
    /// the element that follows gets number N wherever it ends up.
    pub fn counter_command(&self, label: &str) -> Option<String> {
        let reference = self.get(label)?;
        let counter = reference.kind.counter()?;
        Some(format!(
            "\\setcounter{{{}}}{{{}}}",
            counter,
            reference.sequence - 1
        ))
    }

    /// `\theX` and hyperref's `\theHX` overrides for a supplementary float,
    /// so "Figure S1" prints with its prefix and does not share the anchor
    /// of "Figure 1".
    pub fn supplementary_numbering(&self, label: &str) -> Option<String> {
        let reference = self.get(label)?;
        if !reference.kind.is_supplementary() {
            return None;
        }
        let counter = reference.kind.counter()?;
        Some(format!(
            "\\renewcommand{{\\the{c}}}{{S\\arabic{{{c}}}}}\n\\renewcommand{{\\theH{c}}}{{S\\arabic{{{c}}}}}",
            c = counter
        ))
    }

    /// Replace every reference marker in `text`. Each rendering is shielded as
    /// a generated span. Unresolved labels are counted into `unresolved`
    /// together with the first section they appeared in.
    pub fn substitute(
        &self,
        text: &str,
        section: &str,
        spans: &mut SpanTable,
        unresolved: &mut IndexMap<String, (String, usize)>,
    ) -> String {
        let mut out = String::with_capacity(text.len());
        let mut last = 0usize;
        for m in REFERENCE_RE.find_iter(text) {
            let preceded_by_word = text[..m.start()]
                .chars()
                .next_back()
                .map(|c| c.is_alphanumeric() || c == '_')
                .unwrap_or(false);
            if preceded_by_word || m.start() < last {
                continue;
            }
            let label = &m.as_str()[1..];
            let (panel, consumed) = panel_suffix(&text[m.end()..]);
            out.push_str(&text[last..m.start()]);

            let latex = match self.get(label) {
                Some(reference) => format!(
                    "\\hyperref[{}]{{{}{}}}",
                    label,
                    reference.rendering(),
                    panel.map(String::from).unwrap_or_default()
                ),
                None => {
                    unresolved
                        .entry(label.to_string())
                        .or_insert_with(|| (section.to_string(), 0))
                        .1 += 1;
                    let panel = panel.map(|p| format!(" {}", p)).unwrap_or_default();
                    format!("\\textbf{{[??{}]}}{}", escape_latex(label), panel)
                }
            };
            out.push_str(&spans.insert_generated(latex));
            last = m.end() + consumed;
        }
        out.push_str(&text[last..]);
        out
    }
}

/// Display name of a section in messages.
pub fn section_name(section: &Section) -> &str {
    if section.is_preamble() {
        "(preamble)"
    } else {
        &section.identifier
    }
}

/// A panel suffix: one space, one uppercase letter, not followed by a letter.
/// `A` and `I` followed by another word are read as the English words.
fn panel_suffix(rest: &str) -> (Option<char>, usize) {
    let mut chars = rest.chars();
    if chars.next() != Some(' ') {
        return (None, 0);
    }
    let Some(letter) = chars.next().filter(char::is_ascii_uppercase) else {
        return (None, 0);
    };
    let after: String = chars.take(2).collect();
    let mut after = after.chars();
    match after.next() {
        Some(c) if c.is_alphabetic() => (None, 0),
        Some(c) if c.is_whitespace()
            && matches!(letter, 'A' | 'I')
            && after.next().map_or(false, char::is_alphabetic) =>
        {
            (None, 0)
        }
        _ => (Some(letter), 2),
    }
}

/// Substitution pass over every section body. One diagnostic per
/// unresolved label.
pub fn resolve_references(
    sections: &mut [Section],
    labels: &LabelTable,
    spans: &mut SpanTable,
    report: &mut DiagnosticsReport,
) {
    let mut unresolved: IndexMap<String, (String, usize)> = IndexMap::new();
    for section in sections.iter_mut() {
        let name = section_name(section).to_string();
        section.body = labels.substitute(&section.body, &name, spans, &mut unresolved);
    }
    for (label, (section, count)) in unresolved {
        log::warn!("unresolved reference '{}' in {} ({} uses)", label, section, count);
        report.push(Diagnostic::unresolved_reference(&label, count).with_location(section));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::diagnostics::DiagnosticKind;
    use pretty_assertions::assert_eq;

    fn section(identifier: &str, body: &str) -> Section {
        Section::new(identifier, 0, body)
    }

    #[test]
    fn supplementary_numbering_overrides_hyperref_anchor() {
        let mut labels = LabelTable::new();
        labels.declare("fig:main", LabelKind::Figure, "Results").unwrap();
        labels.declare("sfig:extra", LabelKind::SupplementaryFigure, "Supplementary").unwrap();
        labels.declare("snote:one", LabelKind::SupplementaryNote, "Supplementary").unwrap();
        assert_eq!(
            labels.supplementary_numbering("sfig:extra").as_deref(),
            Some("\\renewcommand{\\thefigure}{S\\arabic{figure}}\n\\renewcommand{\\theHfigure}{S\\arabic{figure}}")
        );
        assert_eq!(labels.supplementary_numbering("fig:main"), None);
        assert_eq!(labels.supplementary_numbering("snote:one"), None);
    }

    fn resolve(sections: &mut [Section]) -> (SpanTable, DiagnosticsReport) {
        let labels = LabelTable::collect(sections).unwrap();
        let mut spans = SpanTable::new();
        let mut report = DiagnosticsReport::new();
        resolve_references(sections, &labels, &mut spans, &mut report);
        (spans, report)
    }

    #[test]
    fn numbers_per_kind_in_declaration_order() {
        let sections = vec![
            section("Intro", "![A](FIGURES/a.py){#fig:a}\n\n$$x$$ {#eq:first}"),
            section("Results", "![B](FIGURES/b.py){#fig:b width=\"0.5\\linewidth\"}")
                .with_label("sec:results"),
        ];
        let labels = LabelTable::collect(&sections).unwrap();
        assert_eq!(labels.get("fig:a").unwrap().sequence, 1);
        assert_eq!(labels.get("fig:b").unwrap().sequence, 2);
        assert_eq!(labels.get("eq:first").unwrap().sequence, 1);
        assert_eq!(labels.get("sec:results").unwrap().section, "Results");
        assert_eq!(
            labels.counter_command("fig:b").as_deref(),
            Some("\\setcounter{figure}{1}")
        );
        assert_eq!(labels.counter_command("sec:results"), None);
    }

    #[test]
    fn duplicate_label_names_both_sections() {
        let sections = vec![
            section("Results", "{#table:t} caption"),
            section("Methods", "Table: other {#table:t}"),
        ];
        match LabelTable::collect(&sections).unwrap_err() {
            ManuscriptError::DuplicateLabel { label, first, second } => {
                assert_eq!(label, "table:t");
                assert_eq!(first, "Results");
                assert_eq!(second, "Methods");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn forward_and_backward_references_agree() {
        let mut sections = vec![
            section("Intro", "As @fig:late shows."),
            section("Results", "![Late](FIGURES/l.py){#fig:late}\nAgain @fig:late."),
        ];
        let (spans, _) = resolve(&mut sections);
        assert!(sections[0].body.starts_with("As \u{E000}0\u{E001}"));
        let rendered: Vec<&str> = spans.spans().iter().map(|s| s.original.as_str()).collect();
        assert_eq!(
            rendered,
            vec!["\\hyperref[fig:late]{Figure 1}", "\\hyperref[fig:late]{Figure 1}"]
        );
    }

    #[test]
    fn panel_suffix_is_cosmetic() {
        let mut sections = vec![section("R", "{#sfig:x} see @sfig:x B, and @sfig:x Also.")];
        let (spans, _) = resolve(&mut sections);
        assert_eq!(spans.get(0).unwrap().original, "\\hyperref[sfig:x]{Figure S1B}");
        assert_eq!(spans.get(1).unwrap().original, "\\hyperref[sfig:x]{Figure S1}");
        assert!(sections[0].body.contains(", and "));
        assert!(sections[0].body.ends_with(" Also."));
    }

    #[test]
    fn unresolved_reference_is_visible_and_reported_once() {
        let mut sections = vec![section("Discussion", "@eq:nope and @eq:nope")];
        let (spans, report) = resolve(&mut sections);
        assert_eq!(spans.get(0).unwrap().original, "\\textbf{[??eq:nope]}");
        assert_eq!(report.count(DiagnosticKind::UnresolvedReference), 1);
        let diag = report.diagnostics.first().unwrap();
        assert_eq!(diag.location.as_deref(), Some("Discussion"));
        assert!(diag.message.contains("2 occurrences"), "{}", diag.message);
    }

    #[test]
    fn single_letter_words_are_not_panels() {
        let mut sections = vec![section(
            "R",
            "{#fig:a} see @fig:a I think, @fig:a A similar one, @fig:a A) and @fig:a I.",
        )];
        let (spans, _) = resolve(&mut sections);
        let rendered: Vec<&str> = spans.spans().iter().map(|s| s.original.as_str()).collect();
        assert_eq!(
            rendered,
            vec![
                "\\hyperref[fig:a]{Figure 1}",
                "\\hyperref[fig:a]{Figure 1}",
                "\\hyperref[fig:a]{Figure 1A}",
                "\\hyperref[fig:a]{Figure 1I}",
            ]
        );
        assert!(sections[0].body.contains(" I think, "));
        assert!(sections[0].body.contains(" A similar one, "));
    }

    #[test]
    fn email_like_text_is_not_a_reference() {
        let mut sections = vec![section("S", "mail me at someone@fig:x please")];
        let (spans, report) = resolve(&mut sections);
        assert!(spans.is_empty());
        assert!(report.is_empty());
    }
}
