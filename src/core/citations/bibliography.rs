//! `thebibliography` rendering for cited entries.

use manutex_ir::BibliographyEntry;

use super::CitationProcessor;
use crate::core::parser::CitationStyle;
use crate::utils::latex::escape_url;

/// Render the cited entries. Empty when nothing was cited.
pub fn render_bibliography(processor: &CitationProcessor<'_>) -> String {
    let entries = processor.cited_entries();
    if entries.is_empty() {
        return String::new();
    }

    let mut out = String::new();
    out.push_str(&format!("\\begin{{thebibliography}}{{{}}}\n", entries.len()));
    for entry in entries {
        match processor.style() {
            CitationStyle::Numbered => out.push_str(&format!("\\bibitem{{{}}}\n", entry.key)),
            CitationStyle::AuthorDate => {
                let short = processor
                    .label(&entry.key)
                    .map(|l| format!("{}({})", l.names, l.year))
                    .unwrap_or_default();
                out.push_str(&format!("\\bibitem[{}]{{{}}}\n", short, entry.key));
            }
        }
        out.push_str(&format_entry(entry, processor.label(&entry.key).map(|l| l.year.as_str())));
        out.push('\n');
    }
    out.push_str("\\end{thebibliography}\n");
    out
}

/// One reference, e.g.
/// `Smith, J., Doe, J. (2023). Title. \textit{Journal}, \textbf{12}(3), 1--10. \url{...}`
pub fn format_entry(entry: &BibliographyEntry, year_label: Option<&str>) -> String {
    let mut parts: Vec<String> = Vec::new();

    let authors = join_authors(&entry.authors);
    let year = year_label
        .map(str::to_string)
        .or_else(|| entry.year.clone())
        .unwrap_or_else(|| "n.d.".to_string());
    if authors.is_empty() {
        parts.push(format!("({}).", year));
    } else {
        parts.push(format!("{} ({}).", escape_bib_text(&authors), year));
    }

    if let Some(title) = &entry.title {
        parts.push(format!("{}.", escape_bib_text(title.trim_end_matches('.'))));
    }

    let container = entry.journal.as_ref().or(entry.booktitle.as_ref());
    let mut venue = String::new();
    if let Some(container) = container {
        venue.push_str(&format!("\\textit{{{}}}", escape_bib_text(container)));
    }
    if let Some(volume) = &entry.volume {
        if !venue.is_empty() {
            venue.push_str(", ");
        }
        venue.push_str(&format!("\\textbf{{{}}}", escape_bib_text(volume)));
        if let Some(number) = &entry.number {
            venue.push_str(&format!("({})", escape_bib_text(number)));
        }
    }
    if let Some(pages) = &entry.pages {
        if !venue.is_empty() {
            venue.push_str(", ");
        }
        venue.push_str(&escape_bib_text(pages));
    }
    if venue.is_empty() {
        if let Some(publisher) = &entry.publisher {
            venue.push_str(&escape_bib_text(publisher));
        }
    }
    if !venue.is_empty() {
        parts.push(format!("{}.", venue));
    }

    if let Some(doi) = &entry.identifier {
        let doi = doi
            .trim()
            .trim_start_matches("https://doi.org/")
            .trim_start_matches("doi:");
        parts.push(format!("\\url{{https://doi.org/{}}}", escape_url(doi)));
    } else if let Some(url) = &entry.url {
        parts.push(format!("\\url{{{}}}", escape_url(url.trim())));
    }

    parts.join(" ")
}

fn join_authors(authors: &[String]) -> String {
    let names: Vec<&str> = authors.iter().map(|a| a.trim()).collect();
    match names.len() {
        0 => String::new(),
        1 => names[0].to_string(),
        n => format!("{} and {}", names[..n - 1].join("; "), names[n - 1]),
    }
}

/// BibTeX values are already LaTeX; only escape the characters authors
/// routinely leave bare.
fn escape_bib_text(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut prev = None;
    for ch in text.chars() {
        if matches!(ch, '&' | '%' | '#') && prev != Some('\\') {
            out.push('\\');
        }
        out.push(ch);
        prev = Some(ch);
    }
    out
}
