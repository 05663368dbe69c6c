//! LaTeX text helpers shared by the rendering stages.

/// Escape LaTeX special characters in plain text.
pub fn escape_latex(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    escape_latex_into(input, &mut out);
    out
}

pub fn escape_latex_into(input: &str, out: &mut String) {
    for ch in input.chars() {
        escape_char_into(ch, out);
    }
}

pub fn escape_char_into(ch: char, out: &mut String) {
    match ch {
        '\\' => out.push_str("\\textbackslash{}"),
        '{' => out.push_str("\\{"),
        '}' => out.push_str("\\}"),
        '$' => out.push_str("\\$"),
        '&' => out.push_str("\\&"),
        '%' => out.push_str("\\%"),
        '#' => out.push_str("\\#"),
        '_' => out.push_str("\\_"),
        '^' => out.push_str("\\^{}"),
        '~' => out.push_str("\\~{}"),
        _ => out.push(ch),
    }
}

/// Escape a string for use inside `\url{}` / `\href{}{}`.
pub fn escape_url(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for ch in input.chars() {
        match ch {
            '%' | '#' | '\\' | '{' | '}' => {
                out.push('\\');
                out.push(ch);
            }
            _ => out.push(ch),
        }
    }
    out
}
