//! LaTeX normalization pre-pass
//!
//! Rewrites common notational variants into the forms the grammar accepts:
//! fraction and accent aliases, dot derivatives, sizing commands, bracket
//! aliases, legacy matrix wrappers and `\det` applied to a bare matrix
//! environment. The compiler itself never calls this; callers opt in.

use lazy_static::lazy_static;
use regex::{Captures, Regex};

lazy_static! {
    static ref COMMENT: Regex = Regex::new(r"(?m)(^|[^\\])%[^\n]*").unwrap();

    /// Plain textual rewrites, applied in order
    static ref REWRITES: Vec<(Regex, &'static str)> = vec![
        (r"\\operatorname\s*\{\s*det\s*\}", r"\det"),
        (r"\\bmod\b", r"\operatorname{mod}"),
        // Legacy matrix wrappers go before `\left`/`\right` are touched
        (r"\\left\s*\[\s*\\begin\{matrix\}", r"\begin{bmatrix}"),
        (r"\\end\{matrix\}\s*\\right\s*\]", r"\end{bmatrix}"),
        (r"\\left\s*\(\s*\\begin\{matrix\}", r"\begin{pmatrix}"),
        (r"\\end\{matrix\}\s*\\right\s*\)", r"\end{pmatrix}"),
        (r"\\(begin|end)\{Bmatrix\}", r"\${1}{bmatrix}"),
        (r"\\[Bb]igg?[lrm]?\b\*?\s*", ""),
        (r"\\left\s*\.", ""),
        (r"\\right\s*\.", ""),
        (r"\\lparen\b", "("),
        (r"\\rparen\b", ")"),
        (r"\\lbrack\b", "["),
        (r"\\rbrack\b", "]"),
        (r"\\lbrace\b", r"\{"),
        (r"\\rbrace\b", r"\}"),
        (r"\\[dt]frac\b", r"\frac"),
        (r"\\mathrm\s*\{\s*d\s*\}", "d"),
        (r"\\overline\b", r"\bar"),
        (r"\\widehat\b", r"\hat"),
        (r"\\widetilde\b", r"\tilde"),
        (r"\\overrightarrow\b", r"\vec"),
    ]
    .into_iter()
    .map(|(pattern, replacement)| (Regex::new(pattern).unwrap(), replacement))
    .collect();

    static ref DOT_GROUP: Regex = Regex::new(r"\\(d{0,3})dot\s*\{([^{}]*)\}").unwrap();
    static ref DOT_LETTER: Regex = Regex::new(r"\\(d{0,3})dot\s+([A-Za-z])\b").unwrap();
}

/// Matrix environments `\det` may be applied to without parentheses
const MATRIX_ENVIRONMENTS: &[&str] = &["matrix", "pmatrix", "bmatrix", "Bmatrix", "vmatrix", "Vmatrix"];

/// Variable of dot-notation time derivatives
const TIME_VARIABLE: &str = "t";

/// Normalize LaTeX source before parsing
pub fn normalize(source: &str) -> String {
    let mut text = COMMENT.replace_all(source, "${1}").into_owned();
    for (pattern, replacement) in REWRITES.iter() {
        text = pattern.replace_all(&text, *replacement).into_owned();
    }
    text = DOT_GROUP.replace_all(&text, dot_derivative).into_owned();
    text = DOT_LETTER.replace_all(&text, dot_derivative).into_owned();
    wrap_determinant_matrices(&text)
}

/// `\ddot{x}` -> `\frac{d^{2}}{dt^{2}} (x)`
fn dot_derivative(caps: &Captures) -> String {
    let order = caps[1].len() + 1;
    let body = caps[2].trim();
    if order == 1 {
        format!(r"\frac{{d}}{{d{}}} ({})", TIME_VARIABLE, body)
    } else {
        format!(
            r"\frac{{d^{{{n}}}}}{{d{t}^{{{n}}}}} ({b})",
            n = order,
            t = TIME_VARIABLE,
            b = body
        )
    }
}

/// `\det \begin{pmatrix}...\end{pmatrix}` -> `\det(\begin{pmatrix}...\end{pmatrix})`
fn wrap_determinant_matrices(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(at) = rest.find(r"\det") {
        let after = &rest[at + 4..];
        out.push_str(&rest[..at + 4]);
        rest = after;

        // `\detail` is some other command
        if after.starts_with(|c: char| c.is_ascii_alphabetic()) {
            continue;
        }
        let start = after.len() - after.trim_start().len();
        if let Some(len) = environment_extent(&after[start..]) {
            out.push_str(&after[..start]);
            out.push('(');
            out.push_str(&after[start..start + len]);
            out.push(')');
            rest = &after[start + len..];
        }
    }

    out.push_str(rest);
    out
}

/// Byte length of a matrix environment at the start of `text`, nesting aware
fn environment_extent(text: &str) -> Option<usize> {
    let name = text.strip_prefix(r"\begin{")?.split('}').next()?;
    if !MATRIX_ENVIRONMENTS.contains(&name) {
        return None;
    }

    let begin = format!(r"\begin{{{}}}", name);
    let end = format!(r"\end{{{}}}", name);
    let mut depth = 0usize;
    let mut pos = 0;
    while pos < text.len() {
        let tail = &text[pos..];
        if tail.starts_with(&begin) {
            depth += 1;
            pos += begin.len();
        } else if tail.starts_with(&end) {
            depth -= 1;
            pos += end.len();
            if depth == 0 {
                return Some(pos);
            }
        } else {
            pos += tail.chars().next().map_or(1, char::len_utf8);
        }
    }
    None
}
