//! Template rendering and final restoration
//!
//! The assembled sections are poured into a LaTeX template with named
//! insertion points (`<<MAIN_CONTENT>>` and friends). The filled template is
//! the only text ever restored, and it is restored exactly once.

use lazy_static::lazy_static;
use manutex_ir::{ProtectedSpan, Section, SpanKind, SpanOrigin};
use regex::{Captures, Regex};

use crate::core::assembler::AssembledDocument;
use crate::core::crossref::LabelTable;
use crate::core::markup::{is_fenced, MarkupConverter};
use crate::core::parser::{Author, Config};
use crate::core::protect::{protect_into, SpanTable};
use crate::utils::error::{ManuscriptError, ManuscriptResult};
use crate::utils::latex::{escape_latex, escape_url};

lazy_static! {
    static ref INSERTION_RE: Regex = Regex::new(r"<<([A-Za-z_]+)>>").unwrap();
    static ref BLANK_RUN_RE: Regex = Regex::new(r"\n{3,}").unwrap();
}

pub const DEFAULT_TEMPLATE: &str = r"\documentclass[11pt]{article}
\usepackage[utf8]{inputenc}
\usepackage[T1]{fontenc}
\usepackage{lmodern}
\usepackage[margin=1in]{geometry}
\usepackage{amsmath,amssymb}
\usepackage{graphicx}
\usepackage{booktabs}
\usepackage{placeins}
\usepackage{hyperref}

\title{<<TITLE>>}
\author{<<AUTHORS>>}
\date{<<DATE>>}

\begin{document}
\maketitle

<<ABSTRACT>>

<<KEYWORDS>>

<<MAIN_CONTENT>>

<<BIBLIOGRAPHY>>

<<POST_BIBLIOGRAPHY>>

<<SUPPLEMENTARY>>

\end{document}
";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InsertionPoint {
    Title,
    Authors,
    Date,
    Abstract,
    Keywords,
    MainContent,
    Bibliography,
    PostBibliography,
    Supplementary,
}

impl InsertionPoint {
    pub const ALL: [InsertionPoint; 9] = [
        InsertionPoint::Title,
        InsertionPoint::Authors,
        InsertionPoint::Date,
        InsertionPoint::Abstract,
        InsertionPoint::Keywords,
        InsertionPoint::MainContent,
        InsertionPoint::Bibliography,
        InsertionPoint::PostBibliography,
        InsertionPoint::Supplementary,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            InsertionPoint::Title => "TITLE",
            InsertionPoint::Authors => "AUTHORS",
            InsertionPoint::Date => "DATE",
            InsertionPoint::Abstract => "ABSTRACT",
            InsertionPoint::Keywords => "KEYWORDS",
            InsertionPoint::MainContent => "MAIN_CONTENT",
            InsertionPoint::Bibliography => "BIBLIOGRAPHY",
            InsertionPoint::PostBibliography => "POST_BIBLIOGRAPHY",
            InsertionPoint::Supplementary => "SUPPLEMENTARY",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|p| p.name() == name)
    }
}

/// Insertion points used by `template`, in order of first use. Fails on an
/// unknown point or a missing `<<MAIN_CONTENT>>`.
pub fn validate_template(template: &str) -> ManuscriptResult<Vec<InsertionPoint>> {
    let mut used = Vec::new();
    for caps in INSERTION_RE.captures_iter(template) {
        let point = InsertionPoint::from_name(&caps[1]).ok_or_else(|| {
            ManuscriptError::template(format!("unknown insertion point <<{}>>", &caps[1]))
        })?;
        if !used.contains(&point) {
            used.push(point);
        }
    }
    if !used.contains(&InsertionPoint::MainContent) {
        return Err(ManuscriptError::template(
            "template has no <<MAIN_CONTENT>> insertion point",
        ));
    }
    Ok(used)
}

/// Final LaTeX for one protected span.
pub fn present_span(span: &ProtectedSpan) -> String {
    let original = span.original.as_str();
    if span.origin == SpanOrigin::Generated {
        return original.to_string();
    }
    match span.kind {
        SpanKind::MathInline => original.to_string(),
        SpanKind::MathDisplay => original
            .trim_start_matches('$')
            .trim_end_matches('$')
            .trim()
            .to_string(),
        SpanKind::CodeBlock if is_fenced(original) => {
            format!("\\begin{{verbatim}}\n{}\n\\end{{verbatim}}", fence_body(original))
        }
        SpanKind::CodeBlock => {
            let inner = original.trim_matches('`');
            let inner = inner
                .strip_prefix(' ')
                .and_then(|s| s.strip_suffix(' '))
                .unwrap_or(inner);
            format!("\\texttt{{{}}}", escape_latex(inner))
        }
        SpanKind::RawInjection => match original.strip_prefix("{{tex:") {
            Some(rest) => rest.strip_suffix("}}").unwrap_or(rest).trim().to_string(),
            None => fence_body(original),
        },
    }
}

/// Lines between the opening and closing fence.
fn fence_body(original: &str) -> String {
    let mut lines: Vec<&str> = original.lines().skip(1).collect();
    let fence_char = original.trim_start().chars().next().unwrap_or('`');
    if lines
        .last()
        .map(|l| {
            let t = l.trim();
            t.len() >= 3 && t.chars().all(|c| c == fence_char)
        })
        .unwrap_or(false)
    {
        lines.pop();
    }
    lines.join("\n")
}

pub struct RenderInputs<'a> {
    pub config: &'a Config,
    pub document: &'a AssembledDocument,
    /// Rendered `thebibliography` environment (may be empty).
    pub bibliography: &'a str,
    /// Custom template text; the default template otherwise.
    pub template: Option<&'a str>,
}

/// Fill the template and restore every span.
pub fn render_document(
    inputs: &RenderInputs<'_>,
    spans: &mut SpanTable,
    labels: &LabelTable,
) -> ManuscriptResult<String> {
    let template = inputs.template.unwrap_or(DEFAULT_TEMPLATE);
    let points = validate_template(template)?;
    let has = |p: InsertionPoint| points.contains(&p);

    // Title and author names may carry math; protect them like body text.
    let title = if has(InsertionPoint::Title) {
        Some(protect_into(&inputs.config.title, spans)?)
    } else {
        None
    };
    let authors: Vec<(String, &Author)> = if has(InsertionPoint::Authors) {
        inputs
            .config
            .authors
            .iter()
            .map(|a| Ok((protect_into(&a.name, spans)?, a)))
            .collect::<ManuscriptResult<_>>()?
    } else {
        Vec::new()
    };

    let converter = MarkupConverter::new(spans, labels);
    let doc = inputs.document;

    let abstract_text = doc
        .abstract_section
        .as_ref()
        .map(|s| format!("\\begin{{abstract}}\n{}\n\\end{{abstract}}", s.body.trim()))
        .unwrap_or_default();
    let post_bibliography = render_sections(&doc.post_bibliography, &converter);
    let supplementary = if doc.supplementary.is_empty() {
        String::new()
    } else {
        format!(
            "\\clearpage\n\\section*{{Supplementary Information}}\n\n{}",
            render_sections(&doc.supplementary, &converter)
        )
    };

    // Section content whose slot the template lacks still has to be emitted.
    let mut main = String::new();
    if !has(InsertionPoint::Abstract) && !abstract_text.is_empty() {
        main.push_str(&abstract_text);
        main.push_str("\n\n");
    }
    main.push_str(&render_sections(&doc.main, &converter));
    for (point, text) in [
        (InsertionPoint::Bibliography, inputs.bibliography),
        (InsertionPoint::PostBibliography, post_bibliography.as_str()),
        (InsertionPoint::Supplementary, supplementary.as_str()),
    ] {
        if !has(point) && !text.trim().is_empty() {
            main.push_str("\n\n");
            main.push_str(text);
        }
    }

    let slot_text = |point: InsertionPoint| -> String {
        let text = match point {
            InsertionPoint::Title => title
                .as_deref()
                .map(|t| converter.convert_inline(t))
                .unwrap_or_default(),
            InsertionPoint::Authors => render_authors(&authors, &converter),
            InsertionPoint::Date => inputs
                .config
                .date
                .as_deref()
                .map(escape_latex)
                .unwrap_or_else(|| "\\today".to_string()),
            InsertionPoint::Abstract => abstract_text.clone(),
            InsertionPoint::Keywords => render_keywords(&inputs.config.keywords),
            InsertionPoint::MainContent => main.clone(),
            InsertionPoint::Bibliography => inputs.bibliography.to_string(),
            InsertionPoint::PostBibliography => post_bibliography.clone(),
            InsertionPoint::Supplementary => supplementary.clone(),
        };
        BLANK_RUN_RE
            .replace_all(text.trim_matches('\n'), "\n\n")
            .into_owned()
    };

    // Each slot is restored once; a slot used twice in the template gets the
    // same restored text at every occurrence.
    let shielded: Vec<String> = points.iter().map(|p| slot_text(*p)).collect();
    let parts: Vec<&str> = shielded.iter().map(String::as_str).collect();
    let restored = spans.restore_parts_with(&parts, present_span)?;

    let slot_index = |caps: &Captures<'_>| {
        InsertionPoint::from_name(&caps[1]).and_then(|p| points.iter().position(|used| *used == p))
    };
    // Empty slots go first so the blank lines around them can be collapsed
    // without touching restored content.
    let shaped = INSERTION_RE.replace_all(template, |caps: &Captures<'_>| {
        match slot_index(caps) {
            Some(idx) if !restored[idx].is_empty() => caps[0].to_string(),
            _ => String::new(),
        }
    });
    let shaped = BLANK_RUN_RE.replace_all(&shaped, "\n\n");
    let latex = INSERTION_RE
        .replace_all(&shaped, |caps: &Captures<'_>| {
            slot_index(caps)
                .map(|idx| restored[idx].clone())
                .unwrap_or_default()
        })
        .into_owned();
    log::debug!("rendered {} bytes of LaTeX", latex.len());
    Ok(latex)
}

fn render_sections(sections: &[Section], converter: &MarkupConverter<'_>) -> String {
    sections
        .iter()
        .map(|s| render_section(s, converter))
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Heading plus body. The preamble has no heading.
pub fn render_section(section: &Section, converter: &MarkupConverter<'_>) -> String {
    let body = section.body.trim();
    if section.is_preamble() {
        return body.to_string();
    }
    let mut out = format!(
        "\\phantomsection\\section*{{{}}}",
        converter.convert_inline(section.identifier.trim())
    );
    if let Some(label) = &section.label {
        out.push_str(&format!("\\label{{{}}}", label));
    }
    if !body.is_empty() {
        out.push_str("\n\n");
        out.push_str(body);
    }
    out
}

fn render_authors(authors: &[(String, &Author)], converter: &MarkupConverter<'_>) -> String {
    authors
        .iter()
        .map(|(name, author)| {
            let mut out = converter.convert_inline(name);
            if let Some(affiliation) = &author.affiliation {
                out.push_str(&format!(" \\\\ {}", escape_latex(affiliation)));
            }
            if let Some(email) = &author.email {
                out.push_str(&format!(" \\\\ \\texttt{{{}}}", escape_latex(email)));
            }
            if let Some(orcid) = &author.orcid {
                out.push_str(&format!(
                    " \\\\ \\href{{https://orcid.org/{}}}{{ORCID {}}}",
                    escape_url(orcid),
                    escape_latex(orcid)
                ));
            }
            out
        })
        .collect::<Vec<_>>()
        .join(" \\and\n")
}

fn render_keywords(keywords: &[String]) -> String {
    if keywords.is_empty() {
        return String::new();
    }
    let list: Vec<String> = keywords.iter().map(|k| escape_latex(k)).collect();
    format!("\\noindent\\textbf{{Keywords:}} {}", list.join(", "))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::parser::parse_config;
    use pretty_assertions::assert_eq;

    fn config() -> Config {
        parse_config(
            "title: Growth of $E. coli$\nauthors:\n  - name: Ada Lovelace\n    affiliation: Analytical Society\n  - Alan Turing\nbibliography: refs.bib\ndate: March 2024\nkeywords: [bacteria, growth_rate]\n",
        )
        .unwrap()
    }

    #[test]
    fn template_validation() {
        assert!(validate_template(DEFAULT_TEMPLATE).is_ok());
        assert!(validate_template("<<TITLE>>").is_err());
        assert!(validate_template("<<MAIN_CONTENT>> <<FOOTER>>").is_err());
        assert_eq!(
            validate_template("<<MAIN_CONTENT>><<MAIN_CONTENT>>").unwrap(),
            vec![InsertionPoint::MainContent]
        );
    }

    #[test]
    fn span_presentation() {
        let span = |original: &str, kind| ProtectedSpan {
            id: 0,
            original: original.to_string(),
            kind,
            origin: SpanOrigin::Source,
        };
        assert_eq!(present_span(&span("$$ x^2 $$", SpanKind::MathDisplay)), "x^2");
        assert_eq!(present_span(&span("`a_b`", SpanKind::CodeBlock)), "\\texttt{a\\_b}");
        assert_eq!(
            present_span(&span("```rust\nfn f() {}\n```", SpanKind::CodeBlock)),
            "\\begin{verbatim}\nfn f() {}\n\\end{verbatim}"
        );
        assert_eq!(
            present_span(&span("{{tex: \\vspace{1em}}}", SpanKind::RawInjection)),
            "\\vspace{1em}"
        );
        assert_eq!(
            present_span(&span("```{=latex}\n\\clearpage\n```", SpanKind::RawInjection)),
            "\\clearpage"
        );
    }

    #[test]
    fn renders_default_template() {
        let config = config();
        let mut spans = SpanTable::new();
        let body = protect_into("Cells grow as $e^t$.", &mut spans).unwrap();
        let mut intro = Section::new("Introduction", 0, body.clone()).with_label("sec:intro");
        intro.body = body;
        let document = AssembledDocument {
            main: vec![intro],
            ..AssembledDocument::default()
        };
        let labels = LabelTable::new();
        let latex = render_document(
            &RenderInputs {
                config: &config,
                document: &document,
                bibliography: "",
                template: None,
            },
            &mut spans,
            &labels,
        )
        .unwrap();
        assert!(latex.contains("\\title{Growth of $E. coli$}"));
        assert!(latex.contains("\\author{Ada Lovelace \\\\ Analytical Society \\and\nAlan Turing}"));
        assert!(latex.contains("\\date{March 2024}"));
        assert!(latex.contains("\\textbf{Keywords:} bacteria, growth\\_rate"));
        assert!(latex.contains(
            "\\phantomsection\\section*{Introduction}\\label{sec:intro}\n\nCells grow as $e^t$."
        ));
        assert!(!latex.contains("<<"));
        assert!(!latex.contains("\n\n\n"));
    }

    #[test]
    fn repeated_slot_gets_the_same_text() {
        let config = config();
        let mut spans = SpanTable::new();
        let latex = render_document(
            &RenderInputs {
                config: &config,
                document: &AssembledDocument::default(),
                bibliography: "",
                template: Some("\\title{<<TITLE>>}\\hypersetup{pdftitle={<<TITLE>>}}\n<<MAIN_CONTENT>>"),
            },
            &mut spans,
            &LabelTable::new(),
        )
        .unwrap();
        assert!(latex.starts_with(
            "\\title{Growth of $E. coli$}\\hypersetup{pdftitle={Growth of $E. coli$}}"
        ));
    }

    #[test]
    fn bibliography_without_slot_follows_main_content() {
        let config = config();
        let mut spans = SpanTable::new();
        let body = protect_into("Body text.", &mut spans).unwrap();
        let mut intro = Section::new("Introduction", 0, body.clone());
        intro.body = body;
        let document = AssembledDocument {
            main: vec![intro],
            ..AssembledDocument::default()
        };
        let bibliography = "\\begin{thebibliography}{1}\n\\bibitem{a}\nA.\n\\end{thebibliography}\n";
        let latex = render_document(
            &RenderInputs {
                config: &config,
                document: &document,
                bibliography,
                template: Some("<<MAIN_CONTENT>>\nEND"),
            },
            &mut spans,
            &LabelTable::new(),
        )
        .unwrap();
        let body_at = latex.find("Body text.").unwrap();
        let bib_at = latex.find("\\begin{thebibliography}").unwrap();
        assert!(body_at < bib_at);
        assert!(latex.ends_with("\\end{thebibliography}\nEND"));
    }

    #[test]
    fn custom_template_without_supplementary_slot_keeps_content() {
        let config = config();
        let mut spans = SpanTable::new();
        let body = protect_into("See $x$.", &mut spans).unwrap();
        let mut note = Section::new("Note", 0, body.clone()).supplementary(true);
        note.body = body;
        let document = AssembledDocument {
            supplementary: vec![note],
            ..AssembledDocument::default()
        };
        let latex = render_document(
            &RenderInputs {
                config: &config,
                document: &document,
                bibliography: "",
                template: Some("BEGIN\n<<MAIN_CONTENT>>\nEND"),
            },
            &mut spans,
            &LabelTable::new(),
        )
        .unwrap();
        assert!(latex.contains("See $x$."));
        assert!(latex.starts_with("BEGIN\n"));
    }
}
