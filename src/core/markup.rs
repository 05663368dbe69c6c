//! Markdown text → LaTeX
//!
//! Runs after every processor has replaced its constructs by placeholder
//! tokens, so what is left is prose: paragraphs, sub-headings, lists,
//! quotes, page-break tags and inline emphasis. Tokens pass through
//! untouched; everything else is escaped.

use lazy_static::lazy_static;
use manutex_ir::{LabelKind, ProtectedSpan, Section, SpanKind, SpanOrigin};
use phf::phf_map;
use regex::Regex;

use crate::core::crossref::LabelTable;
use crate::core::parser::attributes::split_trailing_attributes;
use crate::core::protect::{token_at, token_id, SpanTable, TOKEN_OPEN};
use crate::utils::latex::{escape_char_into, escape_url};

lazy_static! {
    static ref LIST_ITEM_RE: Regex = Regex::new(r"^([ \t]*)([-*+]|\d{1,9}[.)])[ \t]+(.*)$").unwrap();
    static ref HEADING_RE: Regex = Regex::new(r"^(#{3,6})[ \t]+(.+?)[ \t]*#*$").unwrap();
    static ref RULE_RE: Regex = Regex::new(r"^(?:-{3,}|\*{3,}|_{3,})$").unwrap();
    static ref AUTOLINK_RE: Regex =
        Regex::new(r"^<((?:https?|ftp)://[^\s<>]+|mailto:[^\s<>]+)>").unwrap();
}

/// Page-layout tags allowed on a line of their own.
static PAGE_TAGS: phf::Map<&'static str, &'static str> = phf_map! {
    "<newpage>" => "\\newpage",
    "<clearpage>" => "\\clearpage",
    "<pagebreak>" => "\\pagebreak",
    "<float-barrier>" => "\\FloatBarrier",
};

/// LaTeX for a page tag line such as `<newpage>` or `<clearpage/>`.
pub fn page_tag(line: &str) -> Option<&'static str> {
    let normalized: String = line
        .trim()
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '/')
        .collect::<String>()
        .to_ascii_lowercase();
    PAGE_TAGS.get(normalized.as_str()).copied()
}

/// A fenced block (as opposed to an inline code span).
pub fn is_fenced(original: &str) -> bool {
    original.starts_with("~~~") || (original.starts_with("```") && original.contains('\n'))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ListKind {
    Itemize,
    Enumerate,
}

impl ListKind {
    fn environment(&self) -> &'static str {
        match self {
            ListKind::Itemize => "itemize",
            ListKind::Enumerate => "enumerate",
        }
    }
}

/// Nested list state: one entry per open environment.
#[derive(Default)]
struct ListBuilder {
    stack: Vec<(usize, ListKind)>,
    out: String,
    item: Option<String>,
}

impl ListBuilder {
    fn is_open(&self) -> bool {
        !self.stack.is_empty()
    }

    fn push_item(&mut self, conv: &MarkupConverter<'_>, indent: usize, kind: ListKind, text: &str) {
        self.flush_item(conv);
        while let Some(&(top, top_kind)) = self.stack.last() {
            if indent < top || (indent == top && top_kind != kind) {
                self.close_one();
            } else {
                break;
            }
        }
        if self.stack.last().map(|&(top, _)| top) != Some(indent) {
            self.pad();
            self.out.push_str(&format!("\\begin{{{}}}\n", kind.environment()));
            self.stack.push((indent, kind));
        }
        self.item = Some(text.to_string());
    }

    fn continue_item(&mut self, text: &str) {
        if let Some(item) = self.item.as_mut() {
            item.push('\n');
            item.push_str(text);
        }
    }

    fn pad(&mut self) {
        for _ in 0..self.stack.len() {
            self.out.push_str("  ");
        }
    }

    fn flush_item(&mut self, conv: &MarkupConverter<'_>) {
        if let Some(text) = self.item.take() {
            self.pad();
            self.out.push_str("\\item ");
            self.out.push_str(&conv.convert_inline(&text));
            self.out.push('\n');
        }
    }

    fn close_one(&mut self) {
        if let Some((_, kind)) = self.stack.pop() {
            self.pad();
            self.out.push_str(&format!("\\end{{{}}}\n", kind.environment()));
        }
    }

    fn finish(&mut self, conv: &MarkupConverter<'_>) -> Option<String> {
        if !self.is_open() {
            return None;
        }
        self.flush_item(conv);
        while self.is_open() {
            self.close_one();
        }
        let out = std::mem::take(&mut self.out);
        Some(out.trim_end().to_string())
    }
}

fn indent_width(prefix: &str) -> usize {
    prefix.chars().map(|c| if c == '\t' { 4 } else { 1 }).sum()
}

fn next_nonblank_is_item(lines: &[&str]) -> bool {
    lines
        .iter()
        .find(|l| !l.trim().is_empty())
        .map(|l| LIST_ITEM_RE.is_match(l))
        .unwrap_or(false)
}

/// Converts section bodies. Borrowing the span table lets it tell display
/// math and block-level spans apart from inline ones.
pub struct MarkupConverter<'a> {
    spans: &'a SpanTable,
    labels: &'a LabelTable,
}

impl<'a> MarkupConverter<'a> {
    pub fn new(spans: &'a SpanTable, labels: &'a LabelTable) -> Self {
        Self { spans, labels }
    }

    fn span_at(&self, text: &str) -> Option<(&'a ProtectedSpan, usize)> {
        let (id, len) = token_at(text)?;
        Some((self.spans.get(id)?, len))
    }

    /// Convert a whole body into LaTeX blocks separated by blank lines.
    pub fn convert_blocks(&self, body: &str) -> String {
        let lines: Vec<&str> = body.lines().collect();
        let mut blocks: Vec<String> = Vec::new();
        let mut paragraph: Vec<&str> = Vec::new();
        let mut quote: Vec<&str> = Vec::new();
        let mut list = ListBuilder::default();

        for (i, line) in lines.iter().enumerate() {
            let trimmed = line.trim();

            if trimmed.is_empty() {
                self.flush_paragraph(&mut paragraph, &mut blocks);
                self.flush_quote(&mut quote, &mut blocks);
                if list.is_open() && !next_nonblank_is_item(&lines[i + 1..]) {
                    blocks.extend(list.finish(self));
                }
                continue;
            }

            if let Some(caps) = LIST_ITEM_RE.captures(line) {
                self.flush_paragraph(&mut paragraph, &mut blocks);
                self.flush_quote(&mut quote, &mut blocks);
                let kind = if caps[2].chars().all(|c| "-*+".contains(c)) {
                    ListKind::Itemize
                } else {
                    ListKind::Enumerate
                };
                list.push_item(self, indent_width(&caps[1]), kind, &caps[3]);
                continue;
            }

            let block = self.standalone_block(trimmed);
            if list.is_open() {
                if block.is_none() && !trimmed.starts_with('>') {
                    list.continue_item(trimmed);
                    continue;
                }
                blocks.extend(list.finish(self));
            }

            if let Some(rest) = trimmed.strip_prefix('>') {
                self.flush_paragraph(&mut paragraph, &mut blocks);
                quote.push(rest.strip_prefix(' ').unwrap_or(rest));
                continue;
            }
            self.flush_quote(&mut quote, &mut blocks);

            match block {
                Some(latex) => {
                    self.flush_paragraph(&mut paragraph, &mut blocks);
                    blocks.push(latex);
                }
                None => paragraph.push(trimmed),
            }
        }

        self.flush_paragraph(&mut paragraph, &mut blocks);
        self.flush_quote(&mut quote, &mut blocks);
        blocks.extend(list.finish(self));
        blocks.join("\n\n")
    }

    /// A line that forms a block on its own.
    fn standalone_block(&self, trimmed: &str) -> Option<String> {
        if let Some(latex) = page_tag(trimmed) {
            return Some(latex.to_string());
        }
        if RULE_RE.is_match(trimmed) {
            return Some("\\par\\noindent\\rule{\\linewidth}{0.4pt}\\par".to_string());
        }
        if let Some(caps) = HEADING_RE.captures(trimmed) {
            return Some(self.heading(caps[1].len(), &caps[2]));
        }
        if let Some(latex) = self.equation_block(trimmed) {
            return Some(latex);
        }
        let (span, _) = self.span_at(trimmed)?;
        let block = match span.origin {
            SpanOrigin::Generated => span.original.starts_with("\\begin{"),
            SpanOrigin::Source => {
                matches!(span.kind, SpanKind::CodeBlock | SpanKind::RawInjection)
                    && is_fenced(&span.original)
                    && token_id(trimmed).is_some()
            }
        };
        block.then(|| self.convert_inline(trimmed))
    }

    fn heading(&self, level: usize, text: &str) -> String {
        let command = match level {
            3 => "subsection*",
            4 => "subsubsection*",
            _ => "paragraph*",
        };
        let (title, attrs) = split_trailing_attributes(text);
        let label = attrs.and_then(|a| a.label);
        match label {
            Some(label) => format!(
                "\\phantomsection\\{}{{{}}}\\label{{{}}}",
                command,
                self.convert_inline(title.trim()),
                label
            ),
            None => format!("\\{}{{{}}}", command, self.convert_inline(title.trim())),
        }
    }

    /// `TOKEN` or `TOKEN {#eq:x}` where the token is display math.
    fn equation_block(&self, trimmed: &str) -> Option<String> {
        let (head, attrs) = split_trailing_attributes(trimmed);
        let token = head.trim();
        let id = token_id(token)?;
        if self.spans.get(id)?.kind != SpanKind::MathDisplay {
            return None;
        }
        let label = attrs
            .and_then(|a| a.label)
            .filter(|l| self.labels.get(l).map(|r| r.kind) == Some(LabelKind::Equation));
        Some(match label {
            Some(label) => {
                let counter = self
                    .labels
                    .counter_command(&label)
                    .map(|c| format!("{}\n", c))
                    .unwrap_or_default();
                format!(
                    "{}\\begin{{equation}}\\label{{{}}}\n{}\n\\end{{equation}}",
                    counter, label, token
                )
            }
            None => format!("\\[\n{}\n\\]", token),
        })
    }

    fn flush_paragraph(&self, paragraph: &mut Vec<&str>, blocks: &mut Vec<String>) {
        if paragraph.is_empty() {
            return;
        }
        blocks.push(self.convert_inline(&paragraph.join("\n")));
        paragraph.clear();
    }

    fn flush_quote(&self, quote: &mut Vec<&str>, blocks: &mut Vec<String>) {
        if quote.is_empty() {
            return;
        }
        let text = quote.join("\n");
        let inner: Vec<String> = text
            .split("\n\n")
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(|p| self.convert_inline(p))
            .collect();
        blocks.push(format!("\\begin{{quote}}\n{}\n\\end{{quote}}", inner.join("\n\n")));
        quote.clear();
    }

    /// Inline markup and escaping for one run of text.
    pub fn convert_inline(&self, text: &str) -> String {
        let mut out = String::with_capacity(text.len() + 16);
        self.inline_into(text, &mut out);
        out
    }

    fn inline_into(&self, text: &str, out: &mut String) {
        let mut i = 0usize;
        while let Some(ch) = text[i..].chars().next() {
            let rest = &text[i..];
            let step = match ch {
                TOKEN_OPEN => self.token(rest, out),
                '\\' => {
                    match rest[1..].chars().next() {
                        Some(next) if next.is_ascii_punctuation() => {
                            escape_char_into(next, out);
                            1 + next.len_utf8()
                        }
                        _ => {
                            escape_char_into('\\', out);
                            1
                        }
                    }
                }
                '*' | '_' => self.emphasis(text, i, ch, out),
                '~' | '^' => self.script(rest, ch, out),
                '[' => self.link(rest, out),
                '<' => match AUTOLINK_RE.captures(rest) {
                    Some(caps) => {
                        out.push_str(&format!("\\url{{{}}}", escape_url(&caps[1])));
                        caps[0].len()
                    }
                    None => {
                        out.push('<');
                        1
                    }
                },
                _ => {
                    escape_char_into(ch, out);
                    ch.len_utf8()
                }
            };
            i += step;
        }
    }

    fn token(&self, rest: &str, out: &mut String) -> usize {
        match self.span_at(rest) {
            Some((span, len)) if span.kind == SpanKind::MathDisplay => {
                out.push_str("\\[");
                out.push_str(&rest[..len]);
                out.push_str("\\]");
                len
            }
            Some((_, len)) => {
                out.push_str(&rest[..len]);
                len
            }
            None => {
                out.push(TOKEN_OPEN);
                TOKEN_OPEN.len_utf8()
            }
        }
    }

    /// `**strong**`, `__strong__`, `*emphasis*`, `_emphasis_`. Underscores
    /// inside words stay literal.
    fn emphasis(&self, text: &str, at: usize, ch: char, out: &mut String) -> usize {
        let rest = &text[at..];
        let prev = text[..at].chars().next_back();
        if ch == '_' && prev.map(|p| p.is_alphanumeric()).unwrap_or(false) {
            escape_char_into(ch, out);
            return 1;
        }

        let double = if ch == '*' { "**" } else { "__" };
        if rest.starts_with(double) {
            if let Some(end) = find_closing(rest, 2, double, ch) {
                out.push_str("\\textbf{");
                self.inline_into(&rest[2..end], out);
                out.push('}');
                return end + 2;
            }
        } else if let Some(end) = find_closing(rest, 1, &rest[..1], ch) {
            out.push_str("\\textit{");
            self.inline_into(&rest[1..end], out);
            out.push('}');
            return end + 1;
        }
        escape_char_into(ch, out);
        1
    }

    /// `H~2~O` and `x^2^`: no whitespace allowed inside.
    fn script(&self, rest: &str, ch: char, out: &mut String) -> usize {
        let command = if ch == '~' { "textsubscript" } else { "textsuperscript" };
        if !rest[1..].starts_with(ch) {
            if let Some(len) = rest[1..].find(ch) {
                let inner = &rest[1..1 + len];
                if !inner.is_empty() && !inner.contains(char::is_whitespace) {
                    out.push_str(&format!("\\{}{{", command));
                    self.inline_into(inner, out);
                    out.push('}');
                    return len + 2;
                }
            }
        }
        escape_char_into(ch, out);
        1
    }

    /// `[text](url)`. Anything else is a literal bracket.
    fn link(&self, rest: &str, out: &mut String) -> usize {
        let mut depth = 0usize;
        let mut close = None;
        for (idx, c) in rest.char_indices() {
            match c {
                '[' => depth += 1,
                ']' => {
                    depth -= 1;
                    if depth == 0 {
                        close = Some(idx);
                        break;
                    }
                }
                _ => {}
            }
        }
        let parsed = close.and_then(|close| {
            let after = rest[close + 1..].strip_prefix('(')?;
            let end = after.find(')')?;
            let url = after[..end].trim();
            (!url.is_empty() && !url.contains(char::is_whitespace))
                .then_some((close, url, close + 2 + end + 1))
        });
        match parsed {
            Some((close, url, consumed)) => {
                out.push_str(&format!("\\href{{{}}}{{", escape_url(url)));
                self.inline_into(&rest[1..close], out);
                out.push('}');
                consumed
            }
            None => {
                out.push('[');
                1
            }
        }
    }
}

/// Byte offset of the closing delimiter in `text`, searching from `from`.
/// The closer must follow non-whitespace; a single `*`/`_` must not be half
/// of a double one, and `_` must not continue into a word.
fn find_closing(text: &str, from: usize, delim: &str, ch: char) -> Option<usize> {
    let first = text[from..].chars().next()?;
    if first.is_whitespace() || (first == ch && delim.len() == 1) {
        return None;
    }
    let single = delim.len() == 1;
    let mut search = from + first.len_utf8();
    while let Some(pos) = text[search..].find(delim) {
        let at = search + pos;
        let before = text[..at].chars().next_back();
        let after = text[at + delim.len()..].chars().next();
        let doubled = single && (after == Some(ch) || before == Some(ch));
        let into_word = ch == '_' && after.map(|c| c.is_alphanumeric()).unwrap_or(false);
        let closes = before.map(|c| !c.is_whitespace()).unwrap_or(false) && !doubled && !into_word;
        if closes {
            return Some(at);
        }
        search = at + delim.len();
    }
    None
}

/// Convert every section body in place.
pub fn convert_sections(sections: &mut [Section], spans: &SpanTable, labels: &LabelTable) {
    let converter = MarkupConverter::new(spans, labels);
    for section in sections.iter_mut() {
        section.body = converter.convert_blocks(&section.body);
    }
    log::debug!("converted markup of {} sections", sections.len());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::protect::protect;
    use pretty_assertions::assert_eq;

    fn convert(markdown: &str) -> String {
        let (shielded, spans) = protect(markdown).unwrap();
        let sections = vec![Section::new("Results", 0, shielded.clone())];
        let labels = LabelTable::collect(&sections).unwrap();
        let body = MarkupConverter::new(&spans, &labels).convert_blocks(&shielded);
        spans.restore(&body).unwrap()
    }

    #[test]
    fn inline_emphasis_and_escaping() {
        assert_eq!(
            convert("**Bold** and *it* and _also_ with snake_case 50% & more"),
            "\\textbf{Bold} and \\textit{it} and \\textit{also} with snake\\_case 50\\% \\& more"
        );
        assert_eq!(convert("H~2~O and x^2^"), "H\\textsubscript{2}O and x\\textsuperscript{2}");
        assert_eq!(convert("a * b * c"), "a * b * c");
        assert_eq!(convert("\\*not emphasis\\*"), "*not emphasis*");
    }

    #[test]
    fn links_and_autolinks() {
        assert_eq!(
            convert("See [the site](https://x.org/a_b#c) or <https://y.org>."),
            "See \\href{https://x.org/a_b\\#c}{the site} or \\url{https://y.org}."
        );
        assert_eq!(convert("[not a link] here"), "[not a link] here");
    }

    #[test]
    fn math_passes_through() {
        assert_eq!(convert("Energy $E = mc^2$ holds."), "Energy $E = mc^2$ holds.");
        assert_eq!(convert("$$a_1$$"), "\\[\n$$a_1$$\n\\]");
    }

    #[test]
    fn labeled_equation_gets_environment() {
        assert_eq!(
            convert("Text.\n\n$$x = 1$$ {#eq:one}"),
            "Text.\n\n\\setcounter{equation}{0}\n\\begin{equation}\\label{eq:one}\n$$x = 1$$\n\\end{equation}"
        );
    }

    #[test]
    fn nested_lists() {
        let latex = convert("- one\n- two\n  1. inner\n  2. more\n- three\n\nAfter.");
        assert_eq!(
            latex,
            "\\begin{itemize}\n  \\item one\n  \\item two\n  \\begin{enumerate}\n    \\item inner\n    \\item more\n  \\end{enumerate}\n  \\item three\n\\end{itemize}\n\nAfter."
        );
    }

    #[test]
    fn headings_tags_rules_and_quotes() {
        let latex = convert("### Setup {#sec:setup}\nText\n<newpage>\n---\n> quoted\n> line");
        assert_eq!(
            latex,
            "\\phantomsection\\subsection*{Setup}\\label{sec:setup}\n\nText\n\n\\newpage\n\n\
             \\par\\noindent\\rule{\\linewidth}{0.4pt}\\par\n\n\\begin{quote}\nquoted\nline\n\\end{quote}"
        );
    }

    #[test]
    fn page_tag_forms() {
        assert_eq!(page_tag(" <ClearPage/> "), Some("\\clearpage"));
        assert_eq!(page_tag("<float-barrier>"), Some("\\FloatBarrier"));
        assert_eq!(page_tag("<div>"), None);
    }

    #[test]
    fn fences_stay_blocks() {
        let latex = convert("Before\n```\nlet x = 1;\n```\nAfter");
        assert_eq!(latex, "Before\n\n```\nlet x = 1;\n```\n\nAfter");
    }
}
