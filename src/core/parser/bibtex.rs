//! BibTeX bibliography parsing
//!
//! Handles `@string` abbreviations, `#` concatenation, braced, quoted and
//! bare values. `@comment` and `@preamble` blocks are skipped.

use std::collections::HashMap;

use indexmap::IndexMap;
use manutex_ir::BibliographyEntry;

use crate::utils::error::{ManuscriptError, ManuscriptResult};

/// Citation key → entry, in file order.
#[derive(Debug, Clone, Default)]
pub struct Bibliography {
    entries: IndexMap<String, BibliographyEntry>,
}

impl Bibliography {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&BibliographyEntry> {
        self.entries.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Insert an entry. An existing key is kept and `false` is returned.
    pub fn insert(&mut self, entry: BibliographyEntry) -> bool {
        if self.entries.contains_key(&entry.key) {
            return false;
        }
        self.entries.insert(entry.key.clone(), entry);
        true
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut BibliographyEntry> {
        self.entries.get_mut(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &BibliographyEntry> {
        self.entries.values()
    }
}

/// Parse a BibTeX file.
pub fn parse_bibliography(input: &str) -> ManuscriptResult<Bibliography> {
    if input.contains(|c| c == '\u{E000}' || c == '\u{E001}') {
        return Err(ManuscriptError::invalid(
            "bibliography contains reserved private-use characters U+E000/U+E001",
        ));
    }
    let mut bibliography = Bibliography::new();
    let mut string_map: HashMap<String, String> = HashMap::new();
    let bytes = input.as_bytes();
    let mut i = 0usize;

    while i < bytes.len() {
        if bytes[i] != b'@' {
            i += 1;
            continue;
        }
        let start = i;
        i += 1;
        let type_start = i;
        while i < bytes.len() && bytes[i].is_ascii_alphabetic() {
            i += 1;
        }
        let entry_type = input[type_start..i].to_lowercase();
        if entry_type.is_empty() {
            continue;
        }
        while i < bytes.len() && bytes[i].is_ascii_whitespace() {
            i += 1;
        }
        if i >= bytes.len() || (bytes[i] != b'{' && bytes[i] != b'(') {
            return Err(ManuscriptError::parse_at_line(
                format!("bibliography: expected '{{' after '@{}'", entry_type),
                line_of(input, start),
            ));
        }
        let open = bytes[i];
        let close = if open == b'{' { b'}' } else { b')' };
        i += 1;
        let body_start = i;

        let mut depth = 1i32;
        let mut in_quote = false;
        while i < bytes.len() && depth > 0 {
            let b = bytes[i];
            if b == b'"' && depth == 1 && bytes[i - 1] != b'\\' {
                in_quote = !in_quote;
            }
            if !in_quote {
                if b == open {
                    depth += 1;
                } else if b == close {
                    depth -= 1;
                }
            }
            i += 1;
        }
        if depth != 0 {
            return Err(ManuscriptError::parse_at_line(
                format!("bibliography: unterminated '@{}' entry", entry_type),
                line_of(input, start),
            ));
        }
        let body = &input[body_start..i - 1];

        match entry_type.as_str() {
            "comment" | "preamble" => {}
            "string" => parse_string_entry(body, &mut string_map),
            _ => {
                let entry = parse_regular_entry(&entry_type, body, &string_map)
                    .map_err(|msg| ManuscriptError::parse_at_line(msg, line_of(input, start)))?;
                let key = entry.key.clone();
                if !bibliography.insert(entry) {
                    log::warn!("duplicate bibliography key '{}' ignored", key);
                }
            }
        }
    }

    log::debug!("parsed {} bibliography entries", bibliography.len());
    Ok(bibliography)
}

fn line_of(input: &str, byte: usize) -> usize {
    input[..byte].matches('\n').count() + 1
}

fn parse_string_entry(body: &str, string_map: &mut HashMap<String, String>) {
    let Some((key, value)) = body.split_once('=') else {
        return;
    };
    let (value, _) = parse_bibtex_value(value, 0);
    let normalized = normalize_bibtex_value(&value, string_map);
    let key = key.trim().to_lowercase();
    if !key.is_empty() {
        string_map.insert(key, normalized);
    }
}

fn parse_regular_entry(
    entry_type: &str,
    body: &str,
    string_map: &HashMap<String, String>,
) -> Result<BibliographyEntry, String> {
    let (key, fields_src) = match body.find(',') {
        Some(comma) => (body[..comma].trim(), &body[comma + 1..]),
        None => (body.trim(), ""),
    };
    if key.is_empty() || key.contains(char::is_whitespace) || key.contains('=') {
        return Err(format!("bibliography: '@{}' entry has no valid key", entry_type));
    }

    let mut entry = BibliographyEntry::new(entry_type, key);
    let bytes = fields_src.as_bytes();
    let mut idx = 0usize;
    while idx < bytes.len() {
        while idx < bytes.len() && (bytes[idx].is_ascii_whitespace() || bytes[idx] == b',') {
            idx += 1;
        }
        if idx >= bytes.len() {
            break;
        }
        let field_start = idx;
        while idx < bytes.len()
            && (bytes[idx].is_ascii_alphanumeric() || matches!(bytes[idx], b'_' | b'-' | b':'))
        {
            idx += 1;
        }
        let field = fields_src[field_start..idx].trim().to_lowercase();
        while idx < bytes.len() && bytes[idx].is_ascii_whitespace() {
            idx += 1;
        }
        if field.is_empty() || idx >= bytes.len() || bytes[idx] != b'=' {
            return Err(format!("bibliography: malformed field in entry '{}'", key));
        }
        idx += 1;
        let (value, next) = parse_bibtex_value(fields_src, idx);
        idx = next;
        let value = normalize_bibtex_value(&value, string_map);
        if value.trim().is_empty() {
            continue;
        }
        assign_field(&mut entry, &field, value);
    }
    Ok(entry)
}

fn assign_field(entry: &mut BibliographyEntry, field: &str, value: String) {
    // Author names keep their braces: `{World Health Organization}` is one name.
    if field == "author" {
        entry.authors = split_authors(&value);
        return;
    }
    let value = strip_protective_braces(&value);
    match field {
        "year" => entry.year = Some(value),
        "date" => {
            if entry.year.is_none() {
                entry.year = Some(value.chars().take(4).collect());
            }
        }
        "title" => entry.title = Some(value),
        "doi" => entry.identifier = Some(value),
        "journal" | "journaltitle" => entry.journal = Some(value),
        "booktitle" => entry.booktitle = Some(value),
        "volume" => entry.volume = Some(value),
        "number" | "issue" => entry.number = Some(value),
        "pages" => entry.pages = Some(value),
        "publisher" => entry.publisher = Some(value),
        "url" => entry.url = Some(value),
        _ => {}
    }
}

/// Split an author field on top-level ` and `.
fn split_authors(value: &str) -> Vec<String> {
    let mut authors = Vec::new();
    let mut depth = 0i32;
    let mut last = 0usize;
    let bytes = value.as_bytes();
    let mut i = 0usize;
    while i < bytes.len() {
        match bytes[i] {
            b'{' => depth += 1,
            b'}' => depth -= 1,
            _ => {}
        }
        let separator = bytes[i..]
            .get(..5)
            .map_or(false, |w| w.eq_ignore_ascii_case(b" and "));
        if depth == 0 && separator {
            authors.push(value[last..i].trim().to_string());
            i += 5;
            last = i;
            continue;
        }
        i += 1;
    }
    authors.push(value[last..].trim().to_string());
    authors.retain(|a| !a.is_empty());
    authors
}

fn parse_bibtex_value(body: &str, start: usize) -> (String, usize) {
    let bytes = body.as_bytes();
    let mut idx = start;
    while idx < bytes.len() && bytes[idx].is_ascii_whitespace() {
        idx += 1;
    }
    let mut depth = 0i32;
    let mut in_quote = false;
    let value_start = idx;
    while idx < bytes.len() {
        let ch = bytes[idx] as char;
        if ch == '"' && depth == 0 && (idx == 0 || bytes[idx - 1] != b'\\') {
            in_quote = !in_quote;
        }
        if !in_quote {
            if ch == '{' {
                depth += 1;
            } else if ch == '}' {
                if depth > 0 {
                    depth -= 1;
                }
            } else if ch == ',' && depth == 0 {
                break;
            }
        }
        idx += 1;
    }
    let value = body[value_start..idx].trim().to_string();
    if idx < bytes.len() && bytes[idx] == b',' {
        idx += 1;
    }
    (value, idx)
}

fn normalize_bibtex_value(value: &str, string_map: &HashMap<String, String>) -> String {
    let mut out = String::new();
    for part in split_bibtex_concat(value) {
        let trimmed = part.trim();
        if trimmed.is_empty() {
            continue;
        }
        let unwrapped = if trimmed.starts_with('{') && trimmed.ends_with('}') && trimmed.len() >= 2
        {
            &trimmed[1..trimmed.len() - 1]
        } else if trimmed.starts_with('"') && trimmed.ends_with('"') && trimmed.len() >= 2 {
            &trimmed[1..trimmed.len() - 1]
        } else {
            string_map
                .get(&trimmed.to_lowercase())
                .map(String::as_str)
                .unwrap_or(trimmed)
        };
        out.push_str(unwrapped);
    }
    out.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn split_bibtex_concat(value: &str) -> Vec<String> {
    let mut parts: Vec<String> = Vec::new();
    let mut depth = 0i32;
    let mut in_quote = false;
    let mut last = 0usize;
    for (idx, ch) in value.char_indices() {
        if ch == '"' && depth == 0 && (idx == 0 || value.as_bytes()[idx - 1] != b'\\') {
            in_quote = !in_quote;
        }
        if !in_quote {
            if ch == '{' {
                depth += 1;
            } else if ch == '}' {
                if depth > 0 {
                    depth -= 1;
                }
            } else if ch == '#' && depth == 0 {
                parts.push(value[last..idx].to_string());
                last = idx + 1;
            }
        }
    }
    parts.push(value[last..].to_string());
    parts
}

/// Drop case-protecting braces (`{DNA}` → `DNA`) but keep groups that carry
/// a command (`{\"o}`).
fn strip_protective_braces(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut rest = value;
    while let Some(open) = rest.find('{') {
        if open > 0 && rest.as_bytes()[open - 1] == b'\\' {
            out.push_str(&rest[..=open]);
            rest = &rest[open + 1..];
            continue;
        }
        out.push_str(&rest[..open]);
        let Some(len) = matching_brace(&rest[open..]) else {
            out.push_str(&rest[open..]);
            return out;
        };
        let inner = &rest[open + 1..open + len - 1];
        if inner.contains('\\') {
            out.push_str(&rest[open..open + len]);
        } else {
            out.push_str(&strip_protective_braces(inner));
        }
        rest = &rest[open + len..];
    }
    out.push_str(rest);
    out
}

/// Byte length of the brace group at the start of `s`, braces included.
fn matching_brace(s: &str) -> Option<usize> {
    let mut depth = 0i32;
    for (idx, ch) in s.char_indices() {
        match ch {
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(idx + 1);
                }
            }
            _ => {}
        }
    }
    None
}
