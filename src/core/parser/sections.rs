//! Body preprocessing and section splitting.

use manutex_ir::{LabelKind, Section};

use super::attributes::split_trailing_attributes;

/// Remove HTML comments and level-1 title lines from a Markdown body.
///
/// Runs before protection, so it tracks code and math itself: a comment
/// marker inside a fence, a code span or a formula is text, not a comment.
pub fn clean_body(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut fence: Option<(char, usize)> = None;
    let mut in_comment = false;
    let mut in_display = false;

    for line in text.split_inclusive('\n') {
        let trimmed = line.trim_start_matches(' ');

        if let Some((ch, len)) = fence {
            let run = trimmed.chars().take_while(|c| *c == ch).count();
            if run >= len && trimmed[run..].trim().is_empty() {
                fence = None;
            }
            out.push_str(line);
            continue;
        }

        if !in_comment && !in_display {
            if let Some(open) = fence_open(trimmed) {
                fence = Some(open);
                out.push_str(line);
                continue;
            }
            if is_title_line(line) {
                continue;
            }
        }

        let mut rest = line;
        let mut kept = String::new();
        loop {
            if in_comment {
                match rest.find("-->") {
                    Some(end) => {
                        rest = &rest[end + 3..];
                        in_comment = false;
                    }
                    None => {
                        rest = "";
                        break;
                    }
                }
            } else {
                match find_comment_open(rest, &mut in_display) {
                    Some(start) => {
                        kept.push_str(&rest[..start]);
                        rest = &rest[start + 4..];
                        in_comment = true;
                    }
                    None => break,
                }
            }
        }
        kept.push_str(rest);

        // A line that held nothing but a comment disappears entirely.
        if kept.trim().is_empty() && !line.trim().is_empty() {
            continue;
        }
        out.push_str(&kept);
    }
    out
}

/// Offset of the first `<!--` in `line` outside code spans and math.
/// `display` carries a `$$` block that is still open at the end of a line.
fn find_comment_open(line: &str, display: &mut bool) -> Option<usize> {
    let bytes = line.as_bytes();
    let mut i = 0usize;
    while i < bytes.len() {
        if *display {
            let close = line[i..].find("$$")?;
            i += close + 2;
            *display = false;
            continue;
        }
        match bytes[i] {
            b'\\' => i += 2,
            b'`' => {
                let run = bytes[i..].iter().take_while(|b| **b == b'`').count();
                let ticks = &line[i..i + run];
                let mut from = i + run;
                i = from;
                while let Some(pos) = line[from..].find(ticks) {
                    let at = from + pos;
                    let len = bytes[at..].iter().take_while(|b| **b == b'`').count();
                    if len == run {
                        i = at + run;
                        break;
                    }
                    from = at + len;
                }
            }
            b'$' if bytes.get(i + 1) == Some(&b'$') => {
                match line[i + 2..].find("$$") {
                    Some(close) => i += close + 4,
                    None => {
                        *display = true;
                        return None;
                    }
                }
            }
            b'$' => match closing_dollar(&line[i + 1..]) {
                Some(close) => i += close + 2,
                None => i += 1,
            },
            b'<' if line[i..].starts_with("<!--") => return Some(i),
            _ => i += 1,
        }
    }
    None
}

/// Offset of the next unescaped `$` on the same line.
fn closing_dollar(rest: &str) -> Option<usize> {
    let bytes = rest.as_bytes();
    let mut i = 0usize;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' => i += 2,
            b'\n' => return None,
            b'$' => return Some(i),
            _ => i += 1,
        }
    }
    None
}

fn fence_open(trimmed: &str) -> Option<(char, usize)> {
    let ch = trimmed.chars().next()?;
    if ch != '`' && ch != '~' {
        return None;
    }
    let len = trimmed.chars().take_while(|c| *c == ch).count();
    (len >= 3).then_some((ch, len))
}

fn is_title_line(line: &str) -> bool {
    line.starts_with("# ") || line.trim_end() == "#"
}

/// Split a protected body into sections at `## ` headings.
///
/// Text before the first heading becomes a preamble section with an empty
/// identifier. Ordinals start at `start_ordinal`.
pub fn split_sections(text: &str, start_ordinal: usize, supplementary: bool) -> Vec<Section> {
    let mut sections = Vec::new();
    let mut heading: Option<(String, Option<String>)> = None;
    let mut lines: Vec<&str> = Vec::new();

    let mut flush = |heading: Option<(String, Option<String>)>, lines: &mut Vec<&str>| {
        let body = lines.join("\n").trim_matches('\n').to_string();
        lines.clear();
        let (identifier, label) = match heading {
            Some(h) => h,
            None if body.trim().is_empty() => return,
            None => (String::new(), None),
        };
        let mut section =
            Section::new(identifier, start_ordinal + sections.len(), body).supplementary(supplementary);
        section.label = label;
        sections.push(section);
    };

    for line in text.lines() {
        if let Some(rest) = line.strip_prefix("## ") {
            flush(heading.take(), &mut lines);
            heading = Some(parse_heading(rest));
        } else {
            lines.push(line);
        }
    }
    flush(heading, &mut lines);
    sections
}

fn parse_heading(text: &str) -> (String, Option<String>) {
    let (title, attrs) = split_trailing_attributes(text);
    let label = attrs.and_then(|a| match a.label_kind() {
        Some(LabelKind::Section | LabelKind::SupplementaryNote) => a.label,
        _ => None,
    });
    (title.trim().to_string(), label)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn splits_on_level_two_headings() {
        let text = "Lead text.\n\n## Introduction {#sec:intro}\nHello.\n\n## Methods\nWe did.\n";
        let sections = split_sections(text, 0, false);
        let ids: Vec<&str> = sections.iter().map(|s| s.identifier.as_str()).collect();
        assert_eq!(ids, vec!["", "Introduction", "Methods"]);
        assert!(sections[0].is_preamble());
        assert_eq!(sections[1].label.as_deref(), Some("sec:intro"));
        assert_eq!(sections[1].raw, "Hello.");
        assert_eq!(sections[2].ordinal, 2);
    }

    #[test]
    fn ordinals_continue_and_flag_supplementary() {
        let sections = split_sections("## Supplementary Note 1 {#snote:one}\nx\n", 4, true);
        assert_eq!(sections.len(), 1);
        assert_eq!(sections[0].ordinal, 4);
        assert!(sections[0].supplementary);
        assert_eq!(sections[0].label.as_deref(), Some("snote:one"));
    }

    #[test]
    fn blank_preamble_is_skipped() {
        let sections = split_sections("\n\n## Results\nx", 0, false);
        assert_eq!(sections.len(), 1);
        assert_eq!(sections[0].identifier, "Results");
    }

    #[test]
    fn comment_markers_in_code_and_math_are_text() {
        let text = "Use `<!--` here.\n## Results\nKeep me.\n";
        assert_eq!(clean_body(text), text);

        let math = "Arrow $a <!-- b$ and $$x --> y$$ stay. <!-- gone -->\n## Next\n";
        assert_eq!(clean_body(math), "Arrow $a <!-- b$ and $$x --> y$$ stay. \n## Next\n");

        let display = "$$\na <!-- b\n$$\n<!-- note -->\nText.\n";
        assert_eq!(clean_body(display), "$$\na <!-- b\n$$\nText.\n");

        let double = "Run ``a ` <!-- b`` now.\n";
        assert_eq!(clean_body(double), double);
    }

    #[test]
    fn clean_body_strips_comments_and_title() {
        let text = "# My Paper\n<!-- draft note -->\n## Intro\nKeep <!-- inline --> this.\n<!--\nmulti\nline\n-->\nEnd.\n";
        assert_eq!(clean_body(text), "## Intro\nKeep  this.\nEnd.\n");
    }

    #[test]
    fn clean_body_leaves_fences_alone() {
        let text = "```python\n# a comment\nx = '<!-- y -->'\n```\n";
        assert_eq!(clean_body(text), text);
    }
}
