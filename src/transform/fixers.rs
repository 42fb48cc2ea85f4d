//! Built-in fixers for the Python rules

use super::edit::{
    extend_for_strings, fallback_statement, indent_block, render_try, replace_lines,
    split_inline_suites, statement_bounds, string_interior, MAX_STEPS,
};
use super::{FixError, Fixer};
use crate::analysis::layout::{leading_whitespace, SourceLayout};
use crate::analysis::lexer::MaskedSource;
use crate::analysis::{DetectionRule, Site, SourceView};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;

const FILE_ERRORS: &str = "(FileNotFoundError, PermissionError)";

static HANDLE_BINDING: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*([A-Za-z_]\w*)\s*=\s*$").expect("valid binding pattern"));

static AST_IMPORT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^[ \t]*import[ \t]+(?:[\w.]+[ \t]*,[ \t]*)*ast[ \t]*(?:,|$)")
        .expect("valid import pattern")
});

static ENCODING_LINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[ \t]*#.*coding[:=]").expect("valid encoding pattern"));

/// Last site before `limit`, on freshly lexed code
fn last_site_before(rule: &DetectionRule, view: &SourceView, limit: usize) -> Option<Site> {
    rule.sites(view)
        .into_iter()
        .filter(|site| site.offset < limit)
        .max_by_key(|site| site.offset)
}

/// Wraps each statement holding an unguarded division in
/// `try`/`except ZeroDivisionError`
pub struct GuardDivision;

impl Fixer for GuardDivision {
    fn name(&self) -> &'static str {
        "guard_division"
    }

    fn description(&self) -> &'static str {
        "Wrap unguarded divisions in ZeroDivisionError handling"
    }

    fn apply(&self, source: &str, rule: &DetectionRule) -> Result<String, FixError> {
        let mut code = split_inline_suites(source, rule)?;
        let mut limit = usize::MAX;

        for _ in 0..MAX_STEPS {
            let masked = MaskedSource::new(&code);
            let view = SourceView::new(&code, &masked);
            let Some(site) = last_site_before(rule, &view, limit) else {
                return Ok(code);
            };

            let (s, e) = statement_bounds(&view, site.line);
            let lines: Vec<&str> = code.split('\n').collect();
            let indent = lines.get(s).map(|l| leading_whitespace(l)).unwrap_or("");
            let unit = view.layout.indent_unit();

            let body = indent_block(&lines, s, e, unit, &string_interior(&masked));
            let fallback = fallback_statement(&view.layout, s, e);
            let wrapped = render_try(indent, unit, body, "ZeroDivisionError", &fallback);

            limit = view.layout.line_start(s);
            code = replace_lines(&code, s, e, wrapped)?;
        }

        Err(FixError::NoProgress(MAX_STEPS))
    }
}

/// Moves `open()` calls into `with` blocks guarded against missing or
/// unreadable files
///
/// `f = open(...)` becomes `with open(...) as f:` around the statements that
/// use `f` (dropping `f.close()`); any other statement gets a fresh handle
/// name. Where a `with` cannot be introduced without changing when the file
/// is opened, the statement is only wrapped in `try`.
pub struct ScopedOpen;

enum OpenRewrite {
    /// `name = open(...)` alone on its line
    Binding(String),
    /// Call replaced by a fresh handle inside a new `with`
    Handle,
    /// `try` around the statement only
    Guard,
}

impl ScopedOpen {
    fn classify(view: &SourceView, site: &Site, s: usize, e: usize) -> OpenRewrite {
        let layout = &view.layout;
        let first = layout.statement_start(site.line);

        if first != s {
            return OpenRewrite::Guard;
        }

        match layout.header_keyword(s) {
            None => {}
            Some("for") | Some("if") if site.line <= layout.logical_end(s) => return OpenRewrite::Handle,
            Some(_) => return OpenRewrite::Guard,
        }

        let line_end = if s + 1 < layout.len() {
            layout.line_start(s + 1) - 1
        } else {
            view.masked.code.len()
        };
        let code = &view.masked.code;
        let prefix = &code[layout.line_start(s)..site.offset];
        let suffix = code.get(site.end..line_end).unwrap_or("");

        if e == s && suffix.trim().is_empty() {
            if let Some(caps) = HANDLE_BINDING.captures(prefix) {
                return OpenRewrite::Binding(caps[1].to_string());
            }
        }
        OpenRewrite::Handle
    }

    fn fresh_handle(code: &str) -> String {
        let mut n = 0;
        loop {
            let candidate = if n == 0 { "_fh".to_string() } else { format!("_fh{}", n) };
            if !code.contains(&candidate) {
                return candidate;
            }
            n += 1;
        }
    }

    /// Rewrite for `name = open(...)` at line `s`
    fn bind(
        view: &SourceView,
        lines: &[&str],
        interior: &HashSet<usize>,
        s: usize,
        name: &str,
        call: &str,
    ) -> Result<(usize, Vec<String>), FixError> {
        let layout = &view.layout;
        let base = layout.indent(s);
        let indent = leading_whitespace(lines[s]);
        let unit = layout.indent_unit();

        let uses = Regex::new(&format!(r"\b{}\b", regex::escape(name)))
            .map_err(|e| FixError::Pattern(e.to_string()))?;

        let mut block_last = s;
        let mut j = s + 1;
        while j < layout.len() {
            let inside = layout.is_blank(j)
                || interior.contains(&j)
                || layout.is_continuation(j)
                || layout.indent(j) >= base;
            if !inside {
                break;
            }
            if !layout.is_blank(j) {
                block_last = j;
            }
            j += 1;
        }

        // Still needed after the block: keep the handle, just guard the open
        if (block_last + 1..layout.len()).any(|k| uses.is_match(layout.text(k))) {
            let body = indent_block(lines, s, s, unit, interior);
            let fallback = format!("{} = None", name);
            return Ok((s, render_try(indent, unit, body, FILE_ERRORS, &fallback)));
        }

        let mut body_end = s;
        for k in s + 1..=block_last {
            if !uses.is_match(layout.text(k)) {
                continue;
            }
            let mut owner = k;
            while owner > s + 1
                && (layout.is_blank(owner)
                    || layout.is_continuation(owner)
                    || interior.contains(&owner)
                    || layout.indent(owner) > base)
            {
                owner -= 1;
            }
            let end = if layout.header_keyword(owner).is_some() {
                layout.block_end(owner)
            } else {
                layout.logical_end(owner)
            };
            body_end = body_end.max(extend_for_strings(view, owner, end).min(block_last));
        }

        let close = format!("{}.close()", name);
        let inner = format!("{}{}", unit, unit);
        let mut body: Vec<String> = vec![format!("{}{}with {} as {}:", indent, unit, call, name)];
        let kept: Vec<String> = if body_end > s {
            indent_block(lines, s + 1, body_end, &inner, interior)
                .into_iter()
                .zip(s + 1..=body_end)
                .filter(|(_, k)| !(layout.indent(*k) == base && layout.trimmed(*k) == close))
                .map(|(line, _)| line)
                .collect()
        } else {
            Vec::new()
        };

        if kept.iter().all(|l| l.trim().is_empty()) {
            body.push(format!("{}{}pass", indent, inner));
        }
        body.extend(kept);

        Ok((body_end, render_try(indent, unit, body, FILE_ERRORS, "pass")))
    }
}

impl Fixer for ScopedOpen {
    fn name(&self) -> &'static str {
        "scoped_open"
    }

    fn description(&self) -> &'static str {
        "Open files in with blocks guarded against file errors"
    }

    fn apply(&self, source: &str, rule: &DetectionRule) -> Result<String, FixError> {
        let mut code = split_inline_suites(source, rule)?;
        let mut limit = usize::MAX;

        for _ in 0..MAX_STEPS {
            let masked = MaskedSource::new(&code);
            let view = SourceView::new(&code, &masked);
            let Some(site) = last_site_before(rule, &view, limit) else {
                return Ok(code);
            };

            let (s, e) = statement_bounds(&view, site.line);
            let lines: Vec<&str> = code.split('\n').collect();
            if s >= lines.len() {
                return Err(FixError::InvalidSpan(s, e));
            }
            let interior = string_interior(&masked);
            let indent = leading_whitespace(lines[s]);
            let unit = view.layout.indent_unit();
            let call = code
                .get(site.offset..site.end)
                .ok_or(FixError::InvalidSpan(site.line, site.line))?;

            let (end, replacement) = match Self::classify(&view, &site, s, e) {
                OpenRewrite::Binding(name) => Self::bind(&view, &lines, &interior, s, &name, call)?,
                OpenRewrite::Handle => {
                    let handle = Self::fresh_handle(&code);
                    let substituted = format!("{}{}{}", &code[..site.offset], handle, &code[site.end..]);
                    let shift = call.matches('\n').count();
                    let new_lines: Vec<&str> = substituted.split('\n').collect();
                    let new_masked = MaskedSource::new(&substituted);
                    let inner = format!("{}{}", unit, unit);

                    let mut body = vec![format!("{}{}with {} as {}:", indent, unit, call, handle)];
                    body.extend(indent_block(&new_lines, s, e - shift, &inner, &string_interior(&new_masked)));
                    let fallback = fallback_statement(&view.layout, s, e);
                    let wrapped = render_try(indent, unit, body, FILE_ERRORS, &fallback);

                    limit = view.layout.line_start(s);
                    code = replace_lines(&substituted, s, e - shift, wrapped)?;
                    continue;
                }
                OpenRewrite::Guard => {
                    let body = indent_block(&lines, s, e, unit, &interior);
                    let fallback = fallback_statement(&view.layout, s, e);
                    (e, render_try(indent, unit, body, FILE_ERRORS, &fallback))
                }
            };

            limit = view.layout.line_start(s);
            code = replace_lines(&code, s, end, replacement)?;
        }

        Err(FixError::NoProgress(MAX_STEPS))
    }
}

/// Replaces `eval(...)` with `ast.literal_eval(...)` and imports `ast`
pub struct LiteralEval;

impl LiteralEval {
    /// Add `import ast` after any shebang, encoding line, module docstring
    /// and `__future__` imports, unless already imported
    fn ensure_import(code: &str) -> String {
        let masked = MaskedSource::new(code);
        if AST_IMPORT.is_match(&masked.code) {
            return code.to_string();
        }

        let layout = SourceLayout::new(&masked.code);
        let mut lines: Vec<&str> = code.split('\n').collect();

        let mut at = 0;
        while at < 2
            && at < lines.len()
            && (lines[at].starts_with("#!") || ENCODING_LINE.is_match(lines[at]))
        {
            at += 1;
        }

        let next_code = |from: usize| (from..layout.len()).find(|&j| !layout.is_blank(j));

        if let Some(first) = next_code(at) {
            if let Some(doc) = masked
                .strings
                .iter()
                .find(|lit| lit.statement && lit.line - 1 == first)
            {
                at = layout.logical_end(doc.end_line - 1) + 1;
            }
        }

        while let Some(j) = next_code(at) {
            if !layout.trimmed(j).starts_with("from __future__") {
                break;
            }
            at = layout.logical_end(j) + 1;
        }

        let indent = next_code(at)
            .and_then(|j| lines.get(j))
            .map(|l| leading_whitespace(l).to_string())
            .unwrap_or_default();
        let import = format!("{}import ast", indent);

        lines.insert(at.min(lines.len()), &import);
        lines.join("\n")
    }
}

impl Fixer for LiteralEval {
    fn name(&self) -> &'static str {
        "literal_eval"
    }

    fn description(&self) -> &'static str {
        "Evaluate literals only"
    }

    fn apply(&self, source: &str, rule: &DetectionRule) -> Result<String, FixError> {
        let masked = MaskedSource::new(source);
        let view = SourceView::new(source, &masked);
        let mut sites = rule.sites(&view);
        if sites.is_empty() {
            return Ok(source.to_string());
        }

        sites.sort_by_key(|site| site.offset);
        let mut code = source.to_string();
        for site in sites.iter().rev() {
            if code.get(site.offset..site.end) != Some("eval") {
                return Err(FixError::InvalidSpan(site.line, site.line));
            }
            code.replace_range(site.offset..site.end, "ast.literal_eval");
        }

        Ok(Self::ensure_import(&code))
    }
}

/// Narrows bare `except:` to `except Exception:`
pub struct TypedExcept;

impl Fixer for TypedExcept {
    fn name(&self) -> &'static str {
        "typed_except"
    }

    fn description(&self) -> &'static str {
        "Catch Exception instead of everything"
    }

    fn apply(&self, source: &str, rule: &DetectionRule) -> Result<String, FixError> {
        let masked = MaskedSource::new(source);
        let view = SourceView::new(source, &masked);
        let mut sites = rule.sites(&view);
        sites.sort_by_key(|site| site.offset);

        let mut code = source.to_string();
        for site in sites.iter().rev() {
            if code.get(site.offset..site.end).is_none() {
                return Err(FixError::InvalidSpan(site.line, site.line));
            }
            code.replace_range(site.offset..site.end, "except Exception:");
        }
        Ok(code)
    }
}
