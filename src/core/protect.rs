//! Reversible shielding of fragile text spans
//!
//! Math, code and raw LaTeX injections are cut out of the Markdown before any
//! text substitution runs and replaced by placeholder tokens. Every later
//! stage only ever sees the tokens, so no regex can corrupt a formula or a
//! code listing. Processing stages register their own LaTeX output the same
//! way ([`SpanTable::insert_generated`]) so that escaping passes leave it
//! alone.
//!
//! A token is `U+E000`, the decimal span id, `U+E001`. The private-use
//! characters are rejected in author input, so tokens cannot collide with
//! user text.
//!
//! Restoration must see every span exactly once. Anything else means some
//! stage duplicated or dropped a token, and the run is aborted rather than
//! emitting a corrupted document.

use manutex_ir::{ProtectedSpan, SpanKind, SpanOrigin};

use crate::utils::error::{ManuscriptError, ManuscriptResult};

pub const TOKEN_OPEN: char = '\u{E000}';
pub const TOKEN_CLOSE: char = '\u{E001}';

/// Arena of protected spans, indexed by token id.
#[derive(Debug, Clone, Default)]
pub struct SpanTable {
    spans: Vec<ProtectedSpan>,
}

impl SpanTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.spans.len()
    }

    pub fn is_empty(&self) -> bool {
        self.spans.is_empty()
    }

    pub fn get(&self, id: usize) -> Option<&ProtectedSpan> {
        self.spans.get(id)
    }

    pub fn spans(&self) -> &[ProtectedSpan] {
        &self.spans
    }

    /// Span addressed by a token string, if it is exactly one token.
    pub fn span_for_token(&self, token: &str) -> Option<&ProtectedSpan> {
        token_id(token).and_then(|id| self.get(id))
    }

    fn insert(&mut self, original: String, kind: SpanKind, origin: SpanOrigin) -> String {
        let id = self.spans.len();
        self.spans.push(ProtectedSpan {
            id,
            original,
            kind,
            origin,
        });
        make_token(id)
    }

    /// Shield LaTeX produced by a processing stage. Returns the token to put
    /// into the text in its place.
    pub fn insert_generated(&mut self, latex: impl Into<String>) -> String {
        self.insert(latex.into(), SpanKind::RawInjection, SpanOrigin::Generated)
    }

    /// Put back the original text of every span.
    pub fn restore(&self, text: &str) -> ManuscriptResult<String> {
        self.restore_with(text, |span| span.original.clone())
    }

    /// Replace every token by `present(span)`, recursively. Fails without
    /// partial output if a token is unknown, repeated, or never reached.
    pub fn restore_with<F>(&self, text: &str, present: F) -> ManuscriptResult<String>
    where
        F: FnMut(&ProtectedSpan) -> String,
    {
        let mut restored = self.restore_parts_with(&[text], present)?;
        Ok(restored.pop().unwrap_or_default())
    }

    /// [`restore_with`](Self::restore_with) over several texts that together
    /// hold every token exactly once.
    pub fn restore_parts_with<F>(&self, parts: &[&str], mut present: F) -> ManuscriptResult<Vec<String>>
    where
        F: FnMut(&ProtectedSpan) -> String,
    {
        let mut used = vec![false; self.spans.len()];
        let mut restored = Vec::with_capacity(parts.len());
        for part in parts {
            let mut out = String::with_capacity(part.len());
            self.restore_into(part, &mut present, &mut used, &mut out)?;
            restored.push(out);
        }

        let missing: Vec<usize> = used
            .iter()
            .enumerate()
            .filter(|(_, seen)| !**seen)
            .map(|(id, _)| id)
            .collect();
        if !missing.is_empty() {
            let shown: Vec<String> = missing.iter().take(5).map(|id| id.to_string()).collect();
            return Err(ManuscriptError::imbalance(format!(
                "{} protected span(s) missing from text (ids {}{})",
                missing.len(),
                shown.join(", "),
                if missing.len() > 5 { ", ..." } else { "" }
            )));
        }
        Ok(restored)
    }

    fn restore_into<F>(
        &self,
        text: &str,
        present: &mut F,
        used: &mut [bool],
        out: &mut String,
    ) -> ManuscriptResult<()>
    where
        F: FnMut(&ProtectedSpan) -> String,
    {
        let mut rest = text;
        while let Some(pos) = rest.find(TOKEN_OPEN) {
            out.push_str(&rest[..pos]);
            let after_open = &rest[pos + TOKEN_OPEN.len_utf8()..];
            let close = after_open
                .find(TOKEN_CLOSE)
                .ok_or_else(|| ManuscriptError::imbalance("unterminated placeholder token"))?;
            let digits = &after_open[..close];
            let id: usize = digits.parse().map_err(|_| {
                ManuscriptError::imbalance(format!("malformed placeholder token '{}'", digits))
            })?;
            let span = self.spans.get(id).ok_or_else(|| {
                ManuscriptError::imbalance(format!("placeholder {} is not in the span table", id))
            })?;
            if used[id] {
                return Err(ManuscriptError::imbalance(format!(
                    "placeholder {} ({}) appears more than once",
                    id,
                    span.kind.as_str()
                )));
            }
            used[id] = true;
            let presented = present(span);
            self.restore_into(&presented, present, used, out)?;
            rest = &after_open[close + TOKEN_CLOSE.len_utf8()..];
        }
        if rest.contains(TOKEN_CLOSE) {
            return Err(ManuscriptError::imbalance("stray placeholder terminator"));
        }
        out.push_str(rest);
        Ok(())
    }
}

pub fn make_token(id: usize) -> String {
    format!("{}{}{}", TOKEN_OPEN, id, TOKEN_CLOSE)
}

/// Id of `s` if `s` (ignoring surrounding whitespace) is exactly one token.
pub fn token_id(s: &str) -> Option<usize> {
    let (id, len) = token_at(s.trim())?;
    (len == s.trim().len()).then_some(id)
}

/// Parse a token at the very start of `s`, returning its id and byte length.
pub fn token_at(s: &str) -> Option<(usize, usize)> {
    let rest = s.strip_prefix(TOKEN_OPEN)?;
    let close = rest.find(TOKEN_CLOSE)?;
    let id = rest[..close].parse().ok()?;
    Some((id, TOKEN_OPEN.len_utf8() + close + TOKEN_CLOSE.len_utf8()))
}

/// Protect `text` into a fresh span table.
pub fn protect(text: &str) -> ManuscriptResult<(String, SpanTable)> {
    let mut table = SpanTable::new();
    let shielded = protect_into(text, &mut table)?;
    Ok((shielded, table))
}

/// Restore `shielded` to the exact original text.
pub fn restore(shielded: &str, table: &SpanTable) -> ManuscriptResult<String> {
    table.restore(shielded)
}

/// Protect `text`, appending spans to an existing table so ids stay unique
/// across every body of a manuscript.
pub fn protect_into(text: &str, table: &mut SpanTable) -> ManuscriptResult<String> {
    if let Some((line, _)) = text
        .lines()
        .enumerate()
        .find(|(_, l)| l.contains(TOKEN_OPEN) || l.contains(TOKEN_CLOSE))
    {
        return Err(ManuscriptError::invalid(format!(
            "line {} contains reserved private-use characters U+E000/U+E001",
            line + 1
        )));
    }

    let mut out = String::with_capacity(text.len());
    let mut i = 0usize;
    let mut plain_start = 0usize;

    while i < text.len() {
        let rest = &text[i..];
        let at_line_start = i == 0 || text.as_bytes()[i - 1] == b'\n';

        // An escaped dollar never opens math.
        if rest.starts_with("\\$") {
            i += 2;
            continue;
        }

        if let Some((len, kind)) = match_span(text, i, at_line_start) {
            out.push_str(&text[plain_start..i]);
            let token = table.insert(text[i..i + len].to_string(), kind, SpanOrigin::Source);
            out.push_str(&token);
            i += len;
            plain_start = i;
            continue;
        }

        i += rest.chars().next().map(char::len_utf8).unwrap_or(1);
    }
    out.push_str(&text[plain_start..]);
    Ok(out)
}

/// Try every construct at `i` in priority order.
fn match_span(text: &str, i: usize, at_line_start: bool) -> Option<(usize, SpanKind)> {
    let rest = &text[i..];
    if let Some(len) = match_raw_inline(rest) {
        return Some((len, SpanKind::RawInjection));
    }
    if at_line_start {
        if let Some(len) = match_fence(rest, true) {
            return Some((len, SpanKind::RawInjection));
        }
    }
    if let Some(len) = match_display_math(rest) {
        return Some((len, SpanKind::MathDisplay));
    }
    if let Some(len) = match_inline_math(rest) {
        return Some((len, SpanKind::MathInline));
    }
    if at_line_start {
        if let Some(len) = match_fence(rest, false) {
            return Some((len, SpanKind::CodeBlock));
        }
    }
    if let Some(len) = match_code_span(rest) {
        return Some((len, SpanKind::CodeBlock));
    }
    None
}

/// `{{tex: ...}}` with balanced braces.
fn match_raw_inline(rest: &str) -> Option<usize> {
    if !rest.starts_with("{{tex:") {
        return None;
    }
    let mut depth = 0i32;
    for (idx, ch) in rest.char_indices() {
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

/// A fenced block starting at a line start. With `raw`, only ```` ```{=latex} ````
/// fences match; otherwise any backtick or tilde fence does. An unclosed
/// fence runs to the end of the text.
fn match_fence(rest: &str, raw: bool) -> Option<usize> {
    let indent = rest.len() - rest.trim_start_matches(' ').len();
    if indent > 3 {
        return None;
    }
    let line_end = rest.find('\n').unwrap_or(rest.len());
    let first_line = &rest[indent..line_end];
    let fence_char = first_line.chars().next()?;
    if fence_char != '`' && fence_char != '~' {
        return None;
    }
    let fence_len = first_line.chars().take_while(|c| *c == fence_char).count();
    if fence_len < 3 {
        return None;
    }
    let info = first_line[fence_len..].trim();
    let is_raw = info == "{=latex}" || info == "{=tex}";
    if raw != is_raw {
        return None;
    }
    if fence_char == '`' && info.contains('`') {
        return None;
    }

    let mut pos = line_end;
    while pos < rest.len() {
        // pos sits on a '\n'
        let start = pos + 1;
        let end = rest[start..].find('\n').map(|e| start + e).unwrap_or(rest.len());
        let line = rest[start..end].trim_start_matches(' ');
        let run = line.chars().take_while(|c| *c == fence_char).count();
        if run >= fence_len && line[run..].trim().is_empty() {
            return Some(end);
        }
        pos = end;
    }
    Some(rest.len())
}

fn match_display_math(rest: &str) -> Option<usize> {
    if !rest.starts_with("$$") {
        return None;
    }
    let body = &rest[2..];
    let mut search = 0usize;
    while let Some(pos) = body[search..].find("$$") {
        let at = search + pos;
        if at > 0 && body.as_bytes()[at - 1] == b'\\' {
            search = at + 1;
            continue;
        }
        if body[..at].trim().is_empty() {
            return None;
        }
        return Some(2 + at + 2);
    }
    None
}

/// `$...$` on one line. The opening `$` must be followed by a non-space,
/// the closing one preceded by a non-space and not followed by a digit.
fn match_inline_math(rest: &str) -> Option<usize> {
    let body = rest.strip_prefix('$')?;
    let first = body.chars().next()?;
    if first.is_whitespace() || first == '$' {
        return None;
    }
    let mut prev: Option<char> = None;
    for (idx, ch) in body.char_indices() {
        match ch {
            '\n' => return None,
            '$' if prev != Some('\\') => {
                if prev.map(char::is_whitespace).unwrap_or(true) {
                    return None;
                }
                let next = body[idx + 1..].chars().next();
                if next.map(|c| c.is_ascii_digit()).unwrap_or(false) {
                    return None;
                }
                return Some(1 + idx + 1);
            }
            _ => {}
        }
        prev = Some(ch);
    }
    None
}

/// Backtick code span: a run of n backticks closed by a run of exactly n.
fn match_code_span(rest: &str) -> Option<usize> {
    let n = rest.chars().take_while(|c| *c == '`').count();
    if n == 0 {
        return None;
    }
    let bytes = rest.as_bytes();
    let mut idx = n;
    while idx < bytes.len() {
        if bytes[idx] == b'`' {
            let run = rest[idx..].chars().take_while(|c| *c == '`').count();
            if run == n {
                return Some(idx + run);
            }
            idx += run;
        } else {
            idx += 1;
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn kinds(table: &SpanTable) -> Vec<SpanKind> {
        table.spans().iter().map(|s| s.kind).collect()
    }

    #[test]
    fn test_roundtrip_mixed_content() {
        let text = "Energy $E = mc^2$ and\n\n$$\n\\int_0^1 x\\,dx\n$$ {#eq:int}\n\nUse `x_1` or {{tex: \\newpage}}.\n\n```python\nprint('$5')\n```\n";
        let (shielded, table) = protect(text).unwrap();
        assert_eq!(table.len(), 5);
        assert!(!shielded.contains("mc^2"));
        assert!(shielded.contains("{#eq:int}"));
        assert_eq!(restore(&shielded, &table).unwrap(), text);
    }

    #[test]
    fn test_priority_raw_before_math() {
        let (shielded, table) = protect("{{tex: $\\alpha$ }} and $b$").unwrap();
        assert_eq!(kinds(&table), vec![SpanKind::RawInjection, SpanKind::MathInline]);
        assert_eq!(table.get(0).unwrap().original, "{{tex: $\\alpha$ }}");
        assert_eq!(shielded.matches(TOKEN_OPEN).count(), 2);
    }

    #[test]
    fn test_display_before_inline() {
        let (_, table) = protect("$$a+b$$").unwrap();
        assert_eq!(kinds(&table), vec![SpanKind::MathDisplay]);
    }

    #[test]
    fn test_code_fence_shields_dollars() {
        let text = "```\ncost = $5 and $6\n```";
        let (shielded, table) = protect(text).unwrap();
        assert_eq!(kinds(&table), vec![SpanKind::CodeBlock]);
        assert_eq!(token_id(&shielded), Some(0));
    }

    #[test]
    fn test_inline_math_not_across_currency() {
        let text = "It costs $5 and $10 today.";
        let (shielded, table) = protect(text).unwrap();
        assert!(table.is_empty());
        assert_eq!(shielded, text);
    }

    #[test]
    fn test_escaped_dollar_is_not_math() {
        let text = r"Price \$x$ here";
        let (_, table) = protect(text).unwrap();
        assert!(table.is_empty());
    }

    #[test]
    fn test_raw_latex_fence() {
        let text = "Before\n```{=latex}\n\\clearpage\n```\nAfter";
        let (_, table) = protect(text).unwrap();
        assert_eq!(kinds(&table), vec![SpanKind::RawInjection]);
        assert_eq!(table.get(0).unwrap().original, "```{=latex}\n\\clearpage\n```");
    }

    #[test]
    fn test_unclosed_fence_runs_to_end() {
        let text = "```\nno end $x$";
        let (shielded, table) = protect(text).unwrap();
        assert_eq!(table.len(), 1);
        assert_eq!(token_id(&shielded), Some(0));
    }

    #[test]
    fn test_ids_continue_across_bodies() {
        let mut table = SpanTable::new();
        let a = protect_into("$a$", &mut table).unwrap();
        let b = protect_into("$b$", &mut table).unwrap();
        assert_eq!(token_id(&a), Some(0));
        assert_eq!(token_id(&b), Some(1));
    }

    #[test]
    fn test_rejects_private_use_input() {
        let err = protect("bad \u{E000}1\u{E001} text").unwrap_err();
        assert!(matches!(err, ManuscriptError::InvalidInput { .. }));
    }

    #[test]
    fn test_missing_token_is_imbalance() {
        let (shielded, table) = protect("a $x$ b $y$").unwrap();
        let damaged = shielded.replacen(&make_token(1), "", 1);
        let err = table.restore(&damaged).unwrap_err();
        assert!(matches!(err, ManuscriptError::ProtectionImbalance { .. }));
    }

    #[test]
    fn test_duplicated_token_is_imbalance() {
        let (shielded, table) = protect("a $x$").unwrap();
        let doubled = format!("{}{}", shielded, make_token(0));
        assert!(table.restore(&doubled).is_err());
    }

    #[test]
    fn test_unknown_token_is_imbalance() {
        let (_, table) = protect("a $x$").unwrap();
        let text = format!("{}{}", make_token(0), make_token(9));
        assert!(table.restore(&text).is_err());
    }

    #[test]
    fn test_generated_spans_nest() {
        let (shielded, mut table) = protect("caption $x$").unwrap();
        let figure = table.insert_generated(format!("\\caption{{{}}}", shielded));
        let restored = table.restore(&figure).unwrap();
        assert_eq!(restored, "\\caption{caption $x$}");
    }

    #[test]
    fn test_restore_with_presents_spans() {
        let (shielded, table) = protect("see `a_b`").unwrap();
        let out = table
            .restore_with(&shielded, |span| format!("<{}>", span.kind.as_str()))
            .unwrap();
        assert_eq!(out, "see <code-block>");
    }

    #[test]
    fn test_restore_parts_share_the_balance_check() {
        let (first, mut table) = protect("a $x$").unwrap();
        let second = protect_into("b `y`", &mut table).unwrap();
        let parts = table
            .restore_parts_with(&[first.as_str(), second.as_str()], |s| s.original.clone())
            .unwrap();
        assert_eq!(parts, vec!["a $x$", "b `y`"]);
        assert!(table.restore_parts_with(&[first.as_str()], |s| s.original.clone()).is_err());
        assert!(table
            .restore_parts_with(&[first.as_str(), first.as_str()], |s| s.original.clone())
            .is_err());
    }

    #[test]
    fn test_token_helpers() {
        assert_eq!(token_id(" \u{E000}12\u{E001} "), Some(12));
        assert_eq!(token_id("\u{E000}12\u{E001}x"), None);
        assert_eq!(token_at("\u{E000}3\u{E001}rest"), Some((3, 7)));
    }
}
