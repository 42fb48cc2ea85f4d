//! Declarative detection rules
//!
//! Every rule is data: an issue kind, a severity, a message, a matcher and the
//! name of the fixer that repairs it. Matchers run on masked source, so text
//! inside strings and comments never triggers a rule.

use super::layout::SourceLayout;
use super::lexer::MaskedSource;
use super::models::{kinds, Issue, Severity};
use once_cell::sync::Lazy;
use regex::Regex;

const MAX_MATCHED_TEXT: usize = 120;

static EVAL_CALL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(eval)\s*\(").expect("valid eval pattern"));

static OPEN_CALL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(open)\s*\(").expect("valid open pattern"));

static BARE_EXCEPT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^[ \t]*(except\s*:)").expect("valid except pattern"));

static ARITHMETIC_HANDLER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(?:ZeroDivisionError|ArithmeticError|Exception|BaseException)\b")
        .expect("valid handler pattern")
});

static FILE_HANDLER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"\b(?:FileNotFoundError|PermissionError|OSError|IOError|EnvironmentError|Exception|BaseException)\b",
    )
    .expect("valid handler pattern")
});

/// Source text paired with its masked form and line table
pub struct SourceView<'a> {
    pub source: &'a str,
    pub masked: &'a MaskedSource,
    pub layout: SourceLayout<'a>,
}

impl<'a> SourceView<'a> {
    pub fn new(source: &'a str, masked: &'a MaskedSource) -> Self {
        Self {
            source,
            masked,
            layout: SourceLayout::new(&masked.code).with_string_interior(masked.interior_lines()),
        }
    }

    fn code(&self) -> &'a str {
        &self.masked.code
    }

    /// First line of the statement holding `line`
    ///
    /// A line that begins inside a multi-line string belongs to the statement
    /// where that string opened.
    pub fn statement_of(&self, line: usize) -> usize {
        let mut s = self.layout.statement_start(line);
        loop {
            let opening = self
                .masked
                .strings
                .iter()
                .filter(|lit| lit.line - 1 < s && lit.end_line - 1 >= s)
                .map(|lit| lit.line - 1)
                .min();
            match opening {
                Some(o) => s = self.layout.statement_start(o),
                None => return s,
            }
        }
    }
}

/// A construct matched by a rule
#[derive(Debug, Clone, PartialEq)]
pub struct Site {
    /// Byte offset of the construct
    pub offset: usize,
    /// Byte offset one past its end
    pub end: usize,
    /// 0-based line
    pub line: usize,
}

/// How a rule finds its sites
pub enum Matcher {
    /// Regex over masked source; capture group 1, when present, is the site
    Pattern {
        regex: &'static Lazy<Regex>,
        exempt: Option<fn(&SourceView, &Site) -> bool>,
    },
    /// Hand-written structural predicate
    Structural(fn(&SourceView) -> Vec<Site>),
}

/// One entry of the rule registry
pub struct DetectionRule {
    pub kind: &'static str,
    pub severity: Severity,
    pub description: &'static str,
    pub matcher: Matcher,
    /// Name of the registered fixer for this kind
    pub fixer: Option<&'static str>,
}

impl DetectionRule {
    /// All sites this rule matches in `view`
    pub fn sites(&self, view: &SourceView) -> Vec<Site> {
        match &self.matcher {
            Matcher::Pattern { regex, exempt } => regex
                .captures_iter(view.code())
                .filter_map(|caps| caps.get(1).or_else(|| caps.get(0)))
                .map(|m| Site {
                    offset: m.start(),
                    end: m.end(),
                    line: view.layout.line_at(m.start()),
                })
                .filter(|site| !exempt.map_or(false, |f| f(view, site)))
                .collect(),
            Matcher::Structural(find) => find(view),
        }
    }

    fn issue(&self, view: &SourceView, site: &Site) -> Issue {
        let matched = if self.kind == kinds::DIVISION_BY_ZERO {
            let (s, e) = (
                view.layout.statement_start(site.line),
                view.layout.logical_end(site.line),
            );
            let end = if e + 1 < view.layout.len() {
                view.layout.line_start(e + 1) - 1
            } else {
                view.source.len()
            };
            &view.source[view.layout.line_start(s)..end]
        } else {
            &view.source[site.offset..site.end]
        };

        Issue {
            kind: self.kind.to_string(),
            severity: self.severity,
            description: self.description.to_string(),
            line: site.line + 1,
            matched_text: clip(matched.trim(), MAX_MATCHED_TEXT),
        }
    }
}

/// Ordered collection of detection rules
pub struct RuleRegistry {
    rules: Vec<DetectionRule>,
}

impl RuleRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self { rules: Vec::new() }
    }

    /// The four built-in Python rules
    pub fn builtin() -> Self {
        let mut registry = Self::new();

        registry.register(DetectionRule {
            kind: kinds::DIVISION_BY_ZERO,
            severity: Severity::High,
            description: "Potential division by zero",
            matcher: Matcher::Structural(find_unguarded_divisions),
            fixer: Some("guard_division"),
        });

        registry.register(DetectionRule {
            kind: kinds::NO_EXCEPTION_HANDLING,
            severity: Severity::Medium,
            description: "File operation without exception handling",
            matcher: Matcher::Structural(find_unhandled_opens),
            fixer: Some("scoped_open"),
        });

        registry.register(DetectionRule {
            kind: kinds::EVAL_USAGE,
            severity: Severity::Critical,
            description: "Dangerous eval() usage",
            matcher: Matcher::Pattern {
                regex: &EVAL_CALL,
                exempt: Some(is_attribute_or_definition),
            },
            fixer: Some("literal_eval"),
        });

        registry.register(DetectionRule {
            kind: kinds::BARE_EXCEPT,
            severity: Severity::Medium,
            description: "Bare except clause",
            matcher: Matcher::Pattern {
                regex: &BARE_EXCEPT,
                exempt: None,
            },
            fixer: Some("typed_except"),
        });

        registry
    }

    /// Add a rule, replacing any existing rule of the same kind
    pub fn register(&mut self, rule: DetectionRule) {
        match self.rules.iter_mut().find(|r| r.kind == rule.kind) {
            Some(existing) => *existing = rule,
            None => self.rules.push(rule),
        }
    }

    pub fn get(&self, kind: &str) -> Option<&DetectionRule> {
        self.rules.iter().find(|r| r.kind == kind)
    }

    pub fn rules(&self) -> &[DetectionRule] {
        &self.rules
    }

    pub fn kinds(&self) -> Vec<&'static str> {
        self.rules.iter().map(|r| r.kind).collect()
    }

    /// Run every rule, returning issues ordered by line
    pub fn detect(&self, view: &SourceView) -> Vec<Issue> {
        let mut issues: Vec<Issue> = self
            .rules
            .iter()
            .flat_map(|rule| {
                rule.sites(view)
                    .into_iter()
                    .map(move |site| rule.issue(view, &site))
            })
            .collect();

        issues.sort_by_key(|issue| issue.line);
        issues
    }
}

impl Default for RuleRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

/// `obj.eval(...)` is a method and `def eval(...)` defines the name
fn is_attribute_or_definition(view: &SourceView, site: &Site) -> bool {
    let before = view.code()[..site.offset].trim_end();
    if before.ends_with('.') {
        return true;
    }
    before.ends_with("def")
        && before[..before.len() - 3]
            .chars()
            .next_back()
            .map_or(true, |c| !(c.is_alphanumeric() || c == '_'))
}

/// True if a `try` around line `line` has a handler matching `names`
pub fn is_handled(view: &SourceView, line: usize, names: &Regex) -> bool {
    let s = view.statement_of(line);
    view.layout.enclosing_handlers(s).iter().any(|handler| {
        let clause = handler.trim_start_matches("except").trim_start();
        clause.starts_with(':') || names.is_match(clause)
    })
}

/// `open(...)` calls outside a `try` that handles file errors
pub fn find_unhandled_opens(view: &SourceView) -> Vec<Site> {
    let code = view.code();

    OPEN_CALL
        .captures_iter(code)
        .filter_map(|caps| caps.get(1))
        .map(|m| Site {
            offset: m.start(),
            end: call_end(code, m.end()),
            line: view.layout.line_at(m.start()),
        })
        .filter(|site| !is_attribute_or_definition(view, site))
        .filter(|site| !is_handled(view, site.line, &FILE_HANDLER))
        .collect()
}

/// Byte offset just past the `)` closing the call whose name ends at `from`
pub fn call_end(code: &str, from: usize) -> usize {
    let bytes = code.as_bytes();
    let mut depth = 0usize;
    for (i, b) in bytes.iter().enumerate().skip(from) {
        match b {
            b'(' | b'[' | b'{' => depth += 1,
            b')' | b']' | b'}' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return i + 1;
                }
            }
            _ => {}
        }
    }
    bytes.len()
}

#[derive(Debug, PartialEq)]
enum Operand {
    NonZeroLiteral,
    ZeroLiteral(usize),
    Text(usize),
    StringLiteral,
}

/// Division operators whose divisor may be zero and is neither guarded nor
/// inside a `try` that handles `ZeroDivisionError`
pub fn find_unguarded_divisions(view: &SourceView) -> Vec<Site> {
    let code = view.code();
    let bytes = code.as_bytes();
    let mut sites = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] != b'/' {
            i += 1;
            continue;
        }

        let op_start = i;
        let mut j = i + 1;
        if bytes.get(j) == Some(&b'/') {
            j += 1;
        }
        if bytes.get(j) == Some(&b'=') {
            j += 1;
        }
        i = j;

        while matches!(bytes.get(j), Some(b' ') | Some(b'\t')) {
            j += 1;
        }

        let (end, zero) = match read_operand(code, j) {
            Some(Operand::Text(end)) => (end, false),
            Some(Operand::ZeroLiteral(end)) => (end, true),
            _ => continue,
        };

        let line = view.layout.line_at(op_start);
        if is_handled(view, line, &ARITHMETIC_HANDLER) {
            continue;
        }

        if !zero {
            let stmt_end = view.layout.logical_end(line);
            let limit = if stmt_end + 1 < view.layout.len() {
                view.layout.line_start(stmt_end + 1)
            } else {
                code.len()
            };
            if is_guarded(&code[..limit], code[j..end].trim()) {
                continue;
            }
        }

        sites.push(Site {
            offset: op_start,
            end,
            line,
        });
    }

    sites
}

fn read_operand(code: &str, start: usize) -> Option<Operand> {
    let bytes = code.as_bytes();
    let first = *bytes.get(start)?;

    match first {
        b'+' | b'-' => read_operand(code, start + 1),
        b'"' | b'\'' => Some(Operand::StringLiteral),
        b'0'..=b'9' | b'.' if is_number_start(bytes, start) => {
            let mut k = start;
            while k < bytes.len() {
                let b = bytes[k];
                let exponent_sign = (b == b'+' || b == b'-')
                    && k > start
                    && matches!(bytes[k - 1], b'e' | b'E')
                    && !code[start..k].starts_with("0x");
                if b.is_ascii_alphanumeric() || b == b'_' || b == b'.' || exponent_sign {
                    k += 1;
                } else {
                    break;
                }
            }
            match literal_is_zero(&code[start..k]) {
                Some(true) => Some(Operand::ZeroLiteral(k)),
                Some(false) => Some(Operand::NonZeroLiteral),
                None => Some(Operand::Text(k)),
            }
        }
        b'(' => {
            let end = call_end(code, start);
            let close = if bytes.get(end - 1) == Some(&b')') { end - 1 } else { end };
            let inner = code[start + 1..close.max(start + 1)].trim();
            match literal_is_zero(inner) {
                Some(true) => Some(Operand::ZeroLiteral(end)),
                Some(false) => Some(Operand::NonZeroLiteral),
                None => Some(Operand::Text(end)),
            }
        }
        b if is_ident_byte(b) && !b.is_ascii_digit() => {
            let mut k = start;
            while k < bytes.len() && (is_ident_byte(bytes[k]) || bytes[k] == b'.') {
                k += 1;
            }
            let word = &code[start..k];
            if matches!(bytes.get(k), Some(b'"') | Some(b'\'')) && is_string_prefix(word) {
                return Some(Operand::StringLiteral);
            }
            while matches!(bytes.get(k), Some(b'(') | Some(b'[')) {
                k = call_end(code, k);
            }
            Some(Operand::Text(k))
        }
        _ => None,
    }
}

fn is_number_start(bytes: &[u8], at: usize) -> bool {
    bytes[at].is_ascii_digit() || bytes.get(at + 1).map_or(false, |b| b.is_ascii_digit())
}

fn is_ident_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_' || b >= 0x80
}

fn is_string_prefix(word: &str) -> bool {
    matches!(
        word.to_ascii_lowercase().as_str(),
        "r" | "b" | "u" | "f" | "rb" | "br" | "fr" | "rf"
    )
}

/// `Some(true)` for a numeric literal equal to zero, `None` if not a literal
fn literal_is_zero(text: &str) -> Option<bool> {
    let cleaned: String = text.chars().filter(|c| *c != '_').collect();
    let lower = cleaned.to_ascii_lowercase();

    for (prefix, radix) in [("0x", 16), ("0o", 8), ("0b", 2)] {
        if let Some(digits) = lower.strip_prefix(prefix) {
            return u128::from_str_radix(digits, radix).ok().map(|v| v == 0);
        }
    }

    let numeric = lower.strip_suffix('j').unwrap_or(&lower);
    numeric.parse::<f64>().ok().map(|v| v == 0.0)
}

/// A comparison or truthiness test on `divisor` somewhere in `preceding`
fn is_guarded(preceding: &str, divisor: &str) -> bool {
    if divisor.is_empty() {
        return false;
    }

    let key = regex::escape(divisor);
    let before = r"(?:^|[^\w.])";
    let after = r"(?:[^\w.(\[]|$)";
    let cmp = r"(?:==|!=|<=|>=|<|>|is\s+not|is)";
    let zero = r"0(?:\.0*)?";

    let pattern = format!(
        r"(?m){before}{key}\s*{cmp}\s*{zero}{after}|{before}{zero}\s*{cmp}\s*{key}{after}|\bnot\s+{key}{after}|\b(?:if|elif|while|and|or)\s+{key}\s*(?::|\band\b|\bor\b|\belse\b)|{before}{key}\s+(?:and|if)\b"
    );

    Regex::new(&pattern)
        .map(|re| re.is_match(preceding))
        .unwrap_or(false)
}

fn clip(text: &str, max: usize) -> String {
    if text.len() <= max {
        return text.to_string();
    }
    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &text[..end])
}
