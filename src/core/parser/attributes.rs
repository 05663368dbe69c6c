//! Trailing attribute blocks: `{#fig:overview width="0.8\linewidth" position=t}`.

use indexmap::IndexMap;
use lazy_static::lazy_static;
use manutex_ir::LabelKind;
use regex::Regex;

lazy_static! {
    /// Full label: known kind prefix plus a name.
    static ref LABEL_RE: Regex = Regex::new(r"^([a-z]+):([A-Za-z0-9_-]+)$").unwrap();
    static ref PAIR_RE: Regex =
        Regex::new(r#"([A-Za-z_][A-Za-z0-9_-]*)\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\s"']+))"#).unwrap();
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Attributes {
    /// Full label including the kind prefix (`fig:overview`).
    pub label: Option<String>,
    pub pairs: IndexMap<String, String>,
}

impl Attributes {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.pairs.get(key).map(String::as_str)
    }

    pub fn label_kind(&self) -> Option<LabelKind> {
        self.label.as_deref().and_then(label_kind)
    }
}

/// Kind of a full label, if its prefix is a known one and the name is valid.
pub fn label_kind(label: &str) -> Option<LabelKind> {
    let caps = LABEL_RE.captures(label)?;
    LabelKind::from_prefix(caps.get(1)?.as_str())
}

/// Parse `{...}` (braces included). Returns `None` when the text is not a
/// well-formed attribute block.
pub fn parse_attribute_block(block: &str) -> Option<Attributes> {
    let inner = block.trim().strip_prefix('{')?.strip_suffix('}')?.trim();
    let mut attrs = Attributes::default();
    let mut rest = inner;

    if let Some(after_hash) = rest.strip_prefix('#') {
        let end = after_hash
            .find(char::is_whitespace)
            .unwrap_or(after_hash.len());
        let label = &after_hash[..end];
        label_kind(label)?;
        attrs.label = Some(label.to_string());
        rest = after_hash[end..].trim_start();
    }

    let mut consumed = 0usize;
    for caps in PAIR_RE.captures_iter(rest) {
        let whole = caps.get(0)?;
        if !rest[consumed..whole.start()].trim().is_empty() {
            return None;
        }
        consumed = whole.end();
        let value = caps
            .get(2)
            .or_else(|| caps.get(3))
            .or_else(|| caps.get(4))
            .map(|m| m.as_str())
            .unwrap_or_default();
        attrs.pairs.insert(caps[1].to_string(), value.to_string());
    }
    if !rest[consumed..].trim().is_empty() {
        return None;
    }
    if attrs.label.is_none() && attrs.pairs.is_empty() {
        return None;
    }
    Some(attrs)
}

/// Split a trailing attribute block off a line: `Heading {#sec:x}` →
/// (`Heading`, attrs). Lines without a valid trailing block come back whole.
pub fn split_trailing_attributes(line: &str) -> (&str, Option<Attributes>) {
    let trimmed = line.trim_end();
    if !trimmed.ends_with('}') {
        return (line, None);
    }
    let Some(open) = trimmed.rfind('{') else {
        return (line, None);
    };
    match parse_attribute_block(&trimmed[open..]) {
        Some(attrs) => (trimmed[..open].trim_end(), Some(attrs)),
        None => (line, None),
    }
}

/// Split a leading attribute block off a line: `{#table:x} Caption` →
/// (attrs, `Caption`).
pub fn split_leading_attributes(line: &str) -> (Option<Attributes>, &str) {
    let trimmed = line.trim_start();
    if !trimmed.starts_with("{#") {
        return (None, line);
    }
    let Some(close) = trimmed.find('}') else {
        return (None, line);
    };
    match parse_attribute_block(&trimmed[..=close]) {
        Some(attrs) => (Some(attrs), trimmed[close + 1..].trim_start()),
        None => (None, line),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_label_and_pairs() {
        let attrs =
            parse_attribute_block(r#"{#fig:flow width="0.8\linewidth" position=t}"#).unwrap();
        assert_eq!(attrs.label.as_deref(), Some("fig:flow"));
        assert_eq!(attrs.get("width"), Some("0.8\\linewidth"));
        assert_eq!(attrs.get("position"), Some("t"));
        assert_eq!(attrs.label_kind(), Some(LabelKind::Figure));
    }

    #[test]
    fn rejects_unknown_kind_and_garbage() {
        assert!(parse_attribute_block("{#foo:bar}").is_none());
        assert!(parse_attribute_block("{not attributes}").is_none());
        assert!(parse_attribute_block("{}").is_none());
    }

    #[test]
    fn splits_trailing_block() {
        let (text, attrs) = split_trailing_attributes("Methods {#sec:methods}");
        assert_eq!(text, "Methods");
        assert_eq!(attrs.unwrap().label.as_deref(), Some("sec:methods"));

        let (text, attrs) = split_trailing_attributes("Set {a, b}");
        assert_eq!(text, "Set {a, b}");
        assert!(attrs.is_none());
    }

    #[test]
    fn splits_leading_block() {
        let (attrs, rest) = split_leading_attributes("{#stable:params} **Parameters** used.");
        assert_eq!(attrs.unwrap().label.as_deref(), Some("stable:params"));
        assert_eq!(rest, "**Parameters** used.");
    }
}
