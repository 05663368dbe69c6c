//! Pipe tables → booktabs `table` floats
//!
//! ```text
//! | Gene | Fold change |
//! |:-----|------------:|
//! | abc1 | 2.5         |
//!
//! Table: Differential expression {#table:de}
//! ```
//!
//! A caption line may also lead with the attribute block:
//! `{#table:de} Differential expression`. Structural LaTeX is emitted as
//! generated spans; caption and cell text stay open for the reference and
//! markup passes.

use manutex_ir::{Alignment, LabelKind, Section};

use crate::core::crossref::LabelTable;
use crate::core::parser::attributes::{split_leading_attributes, split_trailing_attributes};
use crate::core::protect::SpanTable;

/// A parsed pipe table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipeTable {
    pub alignments: Vec<Alignment>,
    pub header: Vec<String>,
    pub rows: Vec<Vec<String>>,
    pub caption: Option<String>,
    pub label: Option<String>,
}

impl PipeTable {
    pub fn column_count(&self) -> usize {
        self.rows
            .iter()
            .map(Vec::len)
            .chain([self.header.len(), self.alignments.len()])
            .max()
            .unwrap_or(0)
    }

    /// `lcr` column spec, padded with `l`.
    pub fn column_spec(&self) -> String {
        (0..self.column_count())
            .map(|i| self.alignments.get(i).copied().unwrap_or_default().to_latex())
            .collect()
    }
}

fn looks_like_row(line: &str) -> bool {
    let t = line.trim();
    !t.is_empty() && t.contains('|')
}

/// Split a row into cells. `\|` stays inside a cell.
pub fn split_row(line: &str) -> Vec<String> {
    let t = line.trim();
    let t = t.strip_prefix('|').unwrap_or(t);
    let t = if t.ends_with('|') && !t.ends_with("\\|") {
        &t[..t.len() - 1]
    } else {
        t
    };
    let mut cells = Vec::new();
    let mut current = String::new();
    let mut chars = t.chars().peekable();
    while let Some(ch) = chars.next() {
        match ch {
            '\\' if chars.peek() == Some(&'|') => {
                current.push_str("\\|");
                chars.next();
            }
            '|' => cells.push(std::mem::take(&mut current).trim().to_string()),
            _ => current.push(ch),
        }
    }
    cells.push(current.trim().to_string());
    cells
}

/// Alignments from a delimiter row, or `None` if the line is not one.
pub fn parse_delimiter_row(line: &str) -> Option<Vec<Alignment>> {
    if !looks_like_row(line) && !line.trim().starts_with('-') {
        return None;
    }
    let cells = split_row(line);
    let mut alignments = Vec::with_capacity(cells.len());
    for cell in &cells {
        let left = cell.starts_with(':');
        let right = cell.ends_with(':');
        let dashes = cell.trim_matches(':');
        if dashes.is_empty() || !dashes.chars().all(|c| c == '-') {
            return None;
        }
        alignments.push(match (left, right) {
            (true, true) => Alignment::Center,
            (false, true) => Alignment::Right,
            _ => Alignment::Left,
        });
    }
    Some(alignments)
}

/// Parse a caption line in either supported form.
fn parse_caption(line: &str) -> Option<(String, Option<String>)> {
    let t = line.trim();
    if let Some(rest) = t.strip_prefix("Table:") {
        let (text, attrs) = split_trailing_attributes(rest.trim());
        return Some((text.trim().to_string(), attrs.and_then(|a| a.label)));
    }
    if let (Some(attrs), rest) = split_leading_attributes(t) {
        if matches!(
            attrs.label_kind(),
            Some(LabelKind::Table | LabelKind::SupplementaryTable)
        ) {
            return Some((rest.trim().to_string(), attrs.label));
        }
    }
    None
}

/// Find the table starting at `lines[start]`. Returns it with the number of
/// lines it spans (caption included).
pub fn parse_table_at(lines: &[&str], start: usize) -> Option<(PipeTable, usize)> {
    let header_line = lines.get(start)?;
    if !looks_like_row(header_line) {
        return None;
    }
    let alignments = parse_delimiter_row(lines.get(start + 1)?)?;
    let header = split_row(header_line);

    let mut end = start + 2;
    let mut rows = Vec::new();
    while end < lines.len() && looks_like_row(lines[end]) {
        rows.push(split_row(lines[end]));
        end += 1;
    }

    let mut table = PipeTable {
        alignments,
        header,
        rows,
        caption: None,
        label: None,
    };

    let caption_at = match lines.get(end) {
        Some(l) if l.trim().is_empty() => end + 1,
        _ => end,
    };
    if let Some((caption, label)) = lines.get(caption_at).and_then(|l| parse_caption(l)) {
        table.caption = Some(caption).filter(|c| !c.is_empty());
        table.label = label;
        end = caption_at + 1;
    }
    Some((table, end - start))
}

/// Replace every table in every section body.
pub fn process_tables(sections: &mut [Section], labels: &LabelTable, spans: &mut SpanTable) -> usize {
    let mut count = 0usize;
    for section in sections.iter_mut() {
        let lines: Vec<&str> = section.body.lines().collect();
        let mut out: Vec<String> = Vec::with_capacity(lines.len());
        let mut i = 0usize;
        while i < lines.len() {
            match parse_table_at(&lines, i) {
                Some((table, consumed)) => {
                    out.push(render_table(&table, labels, spans));
                    count += 1;
                    i += consumed;
                }
                None => {
                    out.push(lines[i].to_string());
                    i += 1;
                }
            }
        }
        section.body = out.join("\n");
    }
    if count > 0 {
        log::debug!("converted {} tables", count);
    }
    count
}

/// One line: generated structure spans with the open caption and cell text
/// between them.
pub fn render_table(table: &PipeTable, labels: &LabelTable, spans: &mut SpanTable) -> String {
    let label = table.label.as_deref().filter(|l| {
        matches!(
            labels.get(l).map(|r| r.kind),
            Some(LabelKind::Table | LabelKind::SupplementaryTable)
        )
    });
    let columns = table.column_count();
    let mut out = String::new();

    let mut head = String::from("\\begin{table}[htbp]\n\\centering\n");
    if let Some(numbering) = label.and_then(|l| labels.supplementary_numbering(l)) {
        head.push_str(&numbering);
        head.push('\n');
    }
    if let Some(counter) = label.and_then(|l| labels.counter_command(l)) {
        head.push_str(&counter);
        head.push('\n');
    }

    let mut open = String::new();
    match (label, &table.caption) {
        (Some(label), caption) => {
            head.push_str("\\caption{");
            out.push_str(&spans.insert_generated(head));
            out.push_str(caption.as_deref().unwrap_or_default());
            open.push_str(&format!("}}\\label{{{}}}\n", label));
        }
        (None, Some(caption)) => {
            head.push_str("\\caption*{");
            out.push_str(&spans.insert_generated(head));
            out.push_str(caption);
            open.push_str("}\n");
        }
        (None, None) => open = head,
    }
    open.push_str(&format!(
        "\\begin{{tabular}}{{{}}}\n\\toprule\n",
        table.column_spec()
    ));
    out.push_str(&spans.insert_generated(open));

    push_row(&mut out, &table.header, columns, spans);
    out.push_str(&spans.insert_generated(" \\\\\n\\midrule\n"));
    for row in &table.rows {
        push_row(&mut out, row, columns, spans);
        out.push_str(&spans.insert_generated(" \\\\\n"));
    }
    out.push_str(&spans.insert_generated("\\bottomrule\n\\end{tabular}\n\\end{table}"));
    out
}

fn push_row(out: &mut String, cells: &[String], columns: usize, spans: &mut SpanTable) {
    for idx in 0..columns {
        if idx > 0 {
            out.push_str(&spans.insert_generated(" & "));
        }
        if let Some(cell) = cells.get(idx) {
            let mut parts = cell.split("\\|");
            if let Some(first) = parts.next() {
                out.push_str(first);
            }
            for part in parts {
                out.push_str(&spans.insert_generated("\\textbar{}"));
                out.push_str(part);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const TABLE: &str = "| Gene | Fold |\n|:-----|-----:|\n| abc1 | 2.5 |\n| xyz | \n\nTable: Expression {#table:de}";

    #[test]
    fn parses_alignment_and_caption() {
        let lines: Vec<&str> = TABLE.lines().collect();
        let (table, consumed) = parse_table_at(&lines, 0).unwrap();
        assert_eq!(consumed, 6);
        assert_eq!(table.alignments, vec![Alignment::Left, Alignment::Right]);
        assert_eq!(table.header, vec!["Gene", "Fold"]);
        assert_eq!(table.rows[1], vec!["xyz"]);
        assert_eq!(table.caption.as_deref(), Some("Expression"));
        assert_eq!(table.label.as_deref(), Some("table:de"));
        assert_eq!(table.column_spec(), "lr");
    }

    #[test]
    fn leading_label_caption_form() {
        let lines = vec!["| a |", "|:-:|", "| 1 |", "{#stable:s} Supplementary counts"];
        let (table, consumed) = parse_table_at(&lines, 0).unwrap();
        assert_eq!(consumed, 4);
        assert_eq!(table.label.as_deref(), Some("stable:s"));
        assert_eq!(table.alignments, vec![Alignment::Center]);
    }

    #[test]
    fn escaped_pipe_stays_in_cell() {
        assert_eq!(split_row("| a \\| b | c |"), vec!["a \\| b", "c"]);
    }

    #[test]
    fn not_a_table_without_delimiter_row() {
        let lines = vec!["a | b", "c | d"];
        assert!(parse_table_at(&lines, 0).is_none());
    }

    #[test]
    fn supplementary_table_gets_its_own_anchor() {
        let body = "| a |\n|---|\n| 1 |\n\nTable: Extra {#stable:extra}";
        let sections = vec![Section::new("Supplementary Tables", 0, body).supplementary(true)];
        let labels = LabelTable::collect(&sections).unwrap();
        let mut sections = sections;
        let mut spans = SpanTable::new();
        process_tables(&mut sections, &labels, &mut spans);
        let latex = spans.restore(&sections[0].body).unwrap();
        assert!(latex.starts_with(
            "\\begin{table}[htbp]\n\\centering\n\\renewcommand{\\thetable}{S\\arabic{table}}\n\
             \\renewcommand{\\theHtable}{S\\arabic{table}}\n\\setcounter{table}{0}\n"
        ));
    }

    #[test]
    fn renders_booktabs_with_padding() {
        let sections = vec![Section::new("R", 0, TABLE)];
        let labels = LabelTable::collect(&sections).unwrap();
        let mut sections = sections;
        let mut spans = SpanTable::new();
        assert_eq!(process_tables(&mut sections, &labels, &mut spans), 1);
        let latex = spans.restore(&sections[0].body).unwrap();
        assert_eq!(
            latex,
            "\\begin{table}[htbp]\n\\centering\n\\setcounter{table}{0}\n\\caption{Expression}\\label{table:de}\n\
             \\begin{tabular}{lr}\n\\toprule\nGene & Fold \\\\\n\\midrule\nabc1 & 2.5 \\\\\nxyz &  \\\\\n\
             \\bottomrule\n\\end{tabular}\n\\end{table}"
        );
    }
}
