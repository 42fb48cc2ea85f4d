//! Line-level editing helpers shared by the fixers

use super::FixError;
use crate::analysis::layout::{leading_whitespace, SourceLayout};
use crate::analysis::lexer::MaskedSource;
use crate::analysis::{DetectionRule, SourceView};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;

/// Upper bound on rewrite steps per fixer run
pub const MAX_STEPS: usize = 256;

static ASSIGN_TARGETS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^([A-Za-z_][\w.]*(?:\s*,\s*[A-Za-z_][\w.]*)*)\s*(?::[^=]+)?=[^=]")
        .expect("valid assignment pattern")
});

const CLAUSES: &[&str] = &["elif", "else", "except", "finally"];

/// 0-based lines that begin inside a multi-line string
pub fn string_interior(masked: &MaskedSource) -> HashSet<usize> {
    masked.interior_lines()
}

/// Lines `s..=e` spanning the whole statement that contains `line`
///
/// Clauses (`elif`, `else`, `except`, `finally`) resolve to the statement
/// that opens them, decorators to the definition they decorate, and the span
/// covers multi-line strings to their closing quote.
pub fn statement_bounds(view: &SourceView, line: usize) -> (usize, usize) {
    let layout = &view.layout;
    let mut s = view.statement_of(line);

    while matches!(layout.header_keyword(s), Some(kw) if CLAUSES.contains(&kw)) {
        match clause_owner(layout, s) {
            Some(owner) => s = owner,
            None => break,
        }
    }

    let mut head = s;
    while head > 0 && layout.trimmed(head - 1).starts_with('@') && layout.indent(head - 1) == layout.indent(s) {
        head = layout.statement_start(head - 1);
    }

    let mut body = s;
    while layout.trimmed(body).starts_with('@') {
        let next = layout.logical_end(body) + 1;
        if next >= layout.len() {
            break;
        }
        body = next;
        while body + 1 < layout.len() && layout.is_blank(body) {
            body += 1;
        }
    }

    let e = if layout.header_keyword(body).is_some() {
        layout.block_end(body)
    } else {
        layout.logical_end(body)
    };
    (head, extend_for_strings(view, head, e))
}

/// Grow `e` until no string opened in `s..=e` closes after it
pub fn extend_for_strings(view: &SourceView, s: usize, mut e: usize) -> usize {
    loop {
        let next = view
            .masked
            .strings
            .iter()
            .filter(|lit| lit.line - 1 >= s && lit.line - 1 <= e && lit.end_line - 1 > e)
            .map(|lit| lit.end_line - 1)
            .max();
        match next {
            Some(n) => e = view.layout.logical_end(n),
            None => return e,
        }
    }
}

/// Line of the `if`/`for`/`while`/`try` that a clause at `s` belongs to
fn clause_owner(layout: &SourceLayout, s: usize) -> Option<usize> {
    let base = layout.indent(s);
    let mut j = s;
    while j > 0 {
        j -= 1;
        if layout.is_blank(j) || layout.is_continuation(j) || layout.indent(j) > base {
            continue;
        }
        if layout.indent(j) < base {
            return None;
        }
        match layout.header_keyword(j) {
            Some(kw) if CLAUSES.contains(&kw) => continue,
            Some(_) => return Some(j),
            None => return None,
        }
    }
    None
}

/// Statement to run when the wrapped statement on lines `s..=e` fails
///
/// Keeps names bound and functions returning: `return None` for a return,
/// `target = None` for every assignment in the statement, `pass` otherwise.
pub fn fallback_statement(layout: &SourceLayout, s: usize, e: usize) -> String {
    if layout.header_keyword(s).is_some() || layout.trimmed(s).starts_with('@') {
        return "pass".to_string();
    }

    let text = (s..=e.min(layout.len() - 1))
        .map(|k| layout.trimmed(k))
        .collect::<Vec<_>>()
        .join(" ");
    let parts: Vec<&str> = text.split(';').map(str::trim).filter(|p| !p.is_empty()).collect();
    if parts
        .iter()
        .any(|part| crate::analysis::layout::starts_with_word(part, "return"))
    {
        return "return None".to_string();
    }

    let mut targets: Vec<&str> = Vec::new();
    for caps in parts.iter().filter_map(|part| ASSIGN_TARGETS.captures(part)) {
        let Some(names) = caps.get(1) else { continue };
        for name in names.as_str().split(',').map(str::trim) {
            if !targets.contains(&name) {
                targets.push(name);
            }
        }
    }

    if targets.is_empty() {
        return "pass".to_string();
    }
    let values = vec!["None"; targets.len()].join(", ");
    format!("{} = {}", targets.join(", "), values)
}

/// Lines `s..=e` with `prefix` added, leaving blank lines and string interiors alone
pub fn indent_block(
    lines: &[&str],
    s: usize,
    e: usize,
    prefix: &str,
    interior: &HashSet<usize>,
) -> Vec<String> {
    (s..=e)
        .filter_map(|k| lines.get(k).map(|line| (k, *line)))
        .map(|(k, line)| {
            if interior.contains(&k) || line.trim().is_empty() {
                line.to_string()
            } else {
                format!("{}{}", prefix, line)
            }
        })
        .collect()
}

/// `try:` around `body`, with one handler running `fallback`
pub fn render_try(indent: &str, unit: &str, body: Vec<String>, handler: &str, fallback: &str) -> Vec<String> {
    let mut out = Vec::with_capacity(body.len() + 3);
    out.push(format!("{}try:", indent));
    out.extend(body);
    out.push(format!("{}except {}:", indent, handler));
    out.push(format!("{}{}{}", indent, unit, fallback));
    out
}

/// Replace lines `s..=e` of `code`
pub fn replace_lines(code: &str, s: usize, e: usize, replacement: Vec<String>) -> Result<String, FixError> {
    let lines: Vec<&str> = code.split('\n').collect();
    if s > e || e >= lines.len() {
        return Err(FixError::InvalidSpan(s, e));
    }

    let mut out: Vec<String> = Vec::with_capacity(lines.len() + replacement.len());
    out.extend(lines[..s].iter().map(|l| l.to_string()));
    out.extend(replacement);
    out.extend(lines[e + 1..].iter().map(|l| l.to_string()));
    Ok(out.join("\n"))
}

/// Move the body of one-line compound statements (`if x: y`) holding a site
/// of `rule` onto its own line, so the body can be wrapped on its own
pub fn split_inline_suites(source: &str, rule: &DetectionRule) -> Result<String, FixError> {
    let mut code = source.to_string();

    for _ in 0..MAX_STEPS {
        let masked = MaskedSource::new(&code);
        let view = SourceView::new(&code, &masked);

        let target = rule.sites(&view).into_iter().find_map(|site| {
            let s = view.layout.statement_start(site.line);
            let colon = view.layout.inline_suite_colon(s)?;
            (view.layout.line_start(s) + colon < site.offset).then_some((s, colon))
        });

        let Some((line, colon)) = target else {
            return Ok(code);
        };

        let unit = view.layout.indent_unit();
        let text = code
            .split('\n')
            .nth(line)
            .ok_or(FixError::InvalidSpan(line, line))?;
        let head = text.get(..=colon).ok_or(FixError::InvalidSpan(line, line))?;
        let body = text.get(colon + 1..).ok_or(FixError::InvalidSpan(line, line))?.trim();
        let indent = leading_whitespace(text);

        let split = vec![head.trim_end().to_string(), format!("{}{}{}", indent, unit, body)];
        code = replace_lines(&code, line, line, split)?;
    }

    Err(FixError::NoProgress(MAX_STEPS))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::{kinds, RuleRegistry};

    fn bounds(src: &str, line: usize) -> (usize, usize) {
        let masked = MaskedSource::new(src);
        let view = SourceView::new(src, &masked);
        statement_bounds(&view, line)
    }

    fn fallback(src: &str) -> String {
        let masked = MaskedSource::new(src);
        let layout = SourceLayout::new(&masked.code);
        fallback_statement(&layout, 0, layout.len() - 1)
    }

    #[test]
    fn test_bounds_of_simple_and_compound_statements() {
        let src = "x = 1\nif a:\n    y = b / c\nelse:\n    y = 0\nz = 2";
        assert_eq!(bounds(src, 0), (0, 0));
        assert_eq!(bounds(src, 1), (1, 4));
        assert_eq!(bounds(src, 3), (1, 4));
        assert_eq!(bounds(src, 2), (2, 2));
    }

    #[test]
    fn test_bounds_cover_multiline_strings_and_decorators() {
        let src = "x = \"\"\"\nbody\n\"\"\" + a / b\ny = 1";
        assert_eq!(bounds(src, 2), (0, 2));

        let src = "@cache(size=a / b)\ndef f():\n    return 1\nz = 0";
        assert_eq!(bounds(src, 0), (0, 2));
    }

    #[test]
    fn test_fallback_statements() {
        assert_eq!(fallback("return a / b"), "return None");
        assert_eq!(fallback("x = a / b"), "x = None");
        assert_eq!(fallback("x, self.y = a / b, 2"), "x, self.y = None, None");
        assert_eq!(fallback("ratio: float = a / b"), "ratio = None");
        assert_eq!(fallback("x /= b"), "pass");
        assert_eq!(fallback("print(a / b)"), "pass");
        assert_eq!(fallback("if a / b > 1:"), "pass");
        assert_eq!(fallback("x == a / b"), "pass");
    }

    #[test]
    fn test_fallback_binds_every_assignment_on_the_line() {
        assert_eq!(fallback("x = 1; y = a / b"), "x, y = None, None");
        assert_eq!(fallback("x = 1; x = a / b"), "x = None");
        assert_eq!(fallback("log(a); return a / b"), "return None");
        assert_eq!(fallback("log(a); print(a / b)"), "pass");
        assert_eq!(fallback("s = \"\"\"doc\n\"\"\"; x = a / b"), "s, x = None, None");
    }

    #[test]
    fn test_bounds_of_decorator_continued_to_last_line() {
        assert_eq!(bounds("@dec \\\n(a / b)", 1), (0, 1));
        assert_eq!(bounds("@dec", 0), (0, 0));
    }

    #[test]
    fn test_bounds_of_statement_after_multiline_string() {
        let src = "s = \"\"\"doc\n\"\"\"; x = a / b\n";
        assert_eq!(bounds(src, 1), (0, 1));
    }

    #[test]
    fn test_replace_lines() {
        let out = replace_lines("a\nb\nc", 1, 1, vec!["x".to_string(), "y".to_string()]).unwrap();
        assert_eq!(out, "a\nx\ny\nc");
        assert!(replace_lines("a", 0, 3, Vec::new()).is_err());
    }

    #[test]
    fn test_split_inline_suite() {
        let rules = RuleRegistry::builtin();
        let rule = rules.get(kinds::DIVISION_BY_ZERO).unwrap();

        let out = split_inline_suites("def ratio(a,b): return a/b", rule).unwrap();
        assert_eq!(out, "def ratio(a,b):\n    return a/b");

        // Site in the header itself stays put
        let out = split_inline_suites("if a / b: pass", rule).unwrap();
        assert_eq!(out, "if a / b: pass");
    }

    #[test]
    fn test_indent_block_skips_string_interior() {
        let src = "s = \"\"\"\ntext\n\"\"\"";
        let masked = MaskedSource::new(src);
        let interior = string_interior(&masked);
        let lines: Vec<&str> = src.split('\n').collect();
        let out = indent_block(&lines, 0, 2, "    ", &interior);
        assert_eq!(out, vec!["    s = \"\"\"", "text", "\"\"\""]);
    }
}
