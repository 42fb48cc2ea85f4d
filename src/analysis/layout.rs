//! Line and block structure of masked Python source
//!
//! Works on the output of [`MaskedSource`](super::lexer::MaskedSource) so that
//! brackets, colons and keywords inside strings or comments are never seen.
//! Line indices are 0-based and agree with `text.split('\n')`.

use std::collections::HashSet;

const COMPOUND_KEYWORDS: &[&str] = &[
    "if", "elif", "else", "for", "while", "with", "try", "except", "finally", "def", "class",
    "async",
];

const CONTINUATION_CLAUSES: &[&str] = &["elif", "else", "except", "finally"];

#[derive(Debug, Clone, Copy)]
struct LineInfo {
    start: usize,
    end: usize,
    indent: usize,
    /// Open bracket depth at the start of the line
    depth: usize,
}

/// Line table over a masked source
#[derive(Debug)]
pub struct SourceLayout<'a> {
    text: &'a str,
    lines: Vec<LineInfo>,
    /// Lines that begin inside a multi-line string
    interior: HashSet<usize>,
}

impl<'a> SourceLayout<'a> {
    pub fn new(masked: &'a str) -> Self {
        let bytes = masked.as_bytes();
        let mut lines = Vec::new();
        let mut depth = 0usize;
        let mut line_depth = 0usize;
        let mut start = 0usize;

        for (i, b) in bytes.iter().enumerate() {
            match b {
                b'(' | b'[' | b'{' => depth += 1,
                b')' | b']' | b'}' => depth = depth.saturating_sub(1),
                b'\n' => {
                    lines.push(LineInfo {
                        start,
                        end: i,
                        indent: measure_indent(&masked[start..i]),
                        depth: line_depth,
                    });
                    start = i + 1;
                    line_depth = depth;
                }
                _ => {}
            }
        }

        lines.push(LineInfo {
            start,
            end: bytes.len(),
            indent: measure_indent(&masked[start..]),
            depth: line_depth,
        });

        Self {
            text: masked,
            lines,
            interior: HashSet::new(),
        }
    }

    /// Mark lines that begin inside multi-line strings so handler lookups
    /// step over them
    pub fn with_string_interior(mut self, interior: HashSet<usize>) -> Self {
        self.interior = interior;
        self
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    /// Masked text of line `i`
    pub fn text(&self, i: usize) -> &'a str {
        let info = self.lines[i];
        &self.text[info.start..info.end]
    }

    pub fn trimmed(&self, i: usize) -> &'a str {
        self.text(i).trim()
    }

    pub fn is_blank(&self, i: usize) -> bool {
        self.trimmed(i).is_empty()
    }

    pub fn indent(&self, i: usize) -> usize {
        self.lines[i].indent
    }

    /// Byte offset where line `i` starts
    pub fn line_start(&self, i: usize) -> usize {
        self.lines[i].start
    }

    /// 0-based line containing byte `offset`
    pub fn line_at(&self, offset: usize) -> usize {
        match self.lines.binary_search_by(|l| l.start.cmp(&offset)) {
            Ok(i) => i,
            Err(i) => i.saturating_sub(1),
        }
    }

    /// True when line `i` continues the statement of the line above it
    pub fn is_continuation(&self, i: usize) -> bool {
        i > 0 && (self.lines[i].depth > 0 || self.text(i - 1).trim_end().ends_with('\\'))
    }

    pub fn statement_start(&self, i: usize) -> usize {
        let mut s = i;
        while self.is_continuation(s) {
            s -= 1;
        }
        s
    }

    /// Last physical line of the logical line starting at `s`
    pub fn logical_end(&self, s: usize) -> usize {
        let mut e = s;
        while e + 1 < self.len() && self.is_continuation(e + 1) {
            e += 1;
        }
        e
    }

    /// Leading keyword of a compound statement header, if line `i` is one
    pub fn header_keyword(&self, i: usize) -> Option<&'static str> {
        let trimmed = self.trimmed(i);
        COMPOUND_KEYWORDS.iter().copied().find(|kw| starts_with_word(trimmed, kw))
    }

    /// Last line of the compound statement headed at `s`, including its
    /// block and any `elif`/`else`/`except`/`finally` clauses
    pub fn block_end(&self, s: usize) -> usize {
        let base = self.indent(s);
        let mut last = self.logical_end(s);
        let mut j = last + 1;

        while j < self.len() {
            if self.is_blank(j) {
                j += 1;
                continue;
            }
            if self.is_continuation(j) || self.indent(j) > base {
                last = j;
            } else if self.indent(j) == base
                && CONTINUATION_CLAUSES.iter().any(|kw| starts_with_word(self.trimmed(j), kw))
            {
                last = j;
            } else {
                break;
            }
            j += 1;
        }

        last
    }

    /// `(first, last)` lines of the whole statement containing line `i`
    pub fn statement_span(&self, i: usize) -> (usize, usize) {
        let s = self.statement_start(i);
        let e = if self.header_keyword(s).is_some() {
            self.block_end(s)
        } else {
            self.logical_end(s)
        };
        (s, e)
    }

    /// Handler clauses of every `try` whose body lexically contains line `i`
    pub fn enclosing_handlers(&self, i: usize) -> Vec<&'a str> {
        let mut handlers = Vec::new();
        let s = self.statement_start(i);

        if is_try_header(self.trimmed(s)) {
            handlers.extend(self.handlers_of(s));
        }

        let mut min_indent = self.indent(s);
        let mut j = s;
        while j > 0 && min_indent > 0 {
            j -= 1;
            if self.is_blank(j) || self.is_continuation(j) || self.interior.contains(&j) {
                continue;
            }
            let indent = self.indent(j);
            if indent < min_indent {
                min_indent = indent;
                if is_try_header(self.trimmed(j)) {
                    handlers.extend(self.handlers_of(j));
                }
            }
        }

        handlers
    }

    fn handlers_of(&self, try_line: usize) -> Vec<&'a str> {
        let base = self.indent(try_line);
        let mut handlers = Vec::new();

        for k in (try_line + 1)..self.len() {
            if self.is_blank(k)
                || self.is_continuation(k)
                || self.interior.contains(&k)
                || self.indent(k) > base
            {
                continue;
            }
            if self.indent(k) < base {
                break;
            }
            let trimmed = self.trimmed(k);
            if starts_with_word(trimmed, "except") {
                handlers.push(trimmed);
            } else if !starts_with_word(trimmed, "else") && !starts_with_word(trimmed, "finally") {
                break;
            }
        }

        handlers
    }

    /// Byte index within line `i` of the colon ending a single-line compound
    /// header that has its body on the same line
    pub fn inline_suite_colon(&self, i: usize) -> Option<usize> {
        if self.header_keyword(i).is_none()
            || self.lines[i].depth > 0
            || self.logical_end(i) != i
        {
            return None;
        }

        let text = self.text(i);
        let mut depth = 0usize;
        for (idx, b) in text.bytes().enumerate() {
            match b {
                b'(' | b'[' | b'{' => depth += 1,
                b')' | b']' | b'}' => depth = depth.saturating_sub(1),
                b':' if depth == 0 => {
                    if text.as_bytes().get(idx + 1) == Some(&b'=') {
                        continue;
                    }
                    let rest = text[idx + 1..].trim();
                    return if rest.is_empty() { None } else { Some(idx) };
                }
                _ => {}
            }
        }
        None
    }

    /// Indentation unit used by the source
    pub fn indent_unit(&self) -> &'static str {
        let tabbed = (0..self.len()).any(|i| !self.is_blank(i) && self.text(i).starts_with('\t'));
        if tabbed {
            "\t"
        } else {
            "    "
        }
    }
}

/// Leading whitespace of a raw line
pub fn leading_whitespace(line: &str) -> &str {
    let end = line.len() - line.trim_start_matches(|c| c == ' ' || c == '\t').len();
    &line[..end]
}

/// True if `text` starts with `word` followed by a non-identifier character
pub fn starts_with_word(text: &str, word: &str) -> bool {
    text.strip_prefix(word)
        .map(|rest| {
            rest.chars()
                .next()
                .map_or(true, |c| !(c.is_alphanumeric() || c == '_'))
        })
        .unwrap_or(false)
}

fn is_try_header(trimmed: &str) -> bool {
    starts_with_word(trimmed, "try") && trimmed[3..].trim_start().starts_with(':')
}

fn measure_indent(line: &str) -> usize {
    let mut width = 0;
    for c in line.chars() {
        match c {
            ' ' => width += 1,
            '\t' => width = (width / 8 + 1) * 8,
            _ => break,
        }
    }
    width
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_continuations_follow_brackets_and_backslashes() {
        let src = "x = foo(a,\n        b)\ny = 1 + \\\n    2\nz = 3";
        let layout = SourceLayout::new(src);
        assert_eq!(layout.len(), 5);
        assert!(layout.is_continuation(1));
        assert!(layout.is_continuation(3));
        assert!(!layout.is_continuation(4));
        assert_eq!(layout.statement_start(1), 0);
        assert_eq!(layout.logical_end(2), 3);
    }

    #[test]
    fn test_block_end_includes_clauses() {
        let src = "if a:\n    x = 1\n\nelse:\n    x = 2\ny = 3\n";
        let layout = SourceLayout::new(src);
        assert_eq!(layout.statement_span(0), (0, 4));
        assert_eq!(layout.statement_span(5), (5, 5));
    }

    #[test]
    fn test_enclosing_handlers() {
        let src = "def f(a, b):\n    try:\n        return a / b\n    except ZeroDivisionError:\n        return 0\n";
        let layout = SourceLayout::new(src);
        assert_eq!(layout.enclosing_handlers(2), vec!["except ZeroDivisionError:"]);
        assert!(layout.enclosing_handlers(4).is_empty());
        assert!(layout.enclosing_handlers(0).is_empty());
    }

    #[test]
    fn test_enclosing_handlers_step_over_string_interior() {
        let src = "try:\n    s = \"\"\"doc\n\"\"\"; x = a / b\nexcept ZeroDivisionError:\n    x = None\n";
        let interior: HashSet<usize> = [2].into_iter().collect();
        let layout = SourceLayout::new(src).with_string_interior(interior);
        assert_eq!(layout.enclosing_handlers(1), vec!["except ZeroDivisionError:"]);
    }

    #[test]
    fn test_inline_suite_colon() {
        let layout = SourceLayout::new("def ratio(a: int, b: int) -> float: return a / b");
        let colon = layout.inline_suite_colon(0).unwrap();
        assert_eq!(&layout.text(0)[colon + 1..], " return a / b");

        let layout = SourceLayout::new("if x:\n    pass");
        assert!(layout.inline_suite_colon(0).is_none());

        let layout = SourceLayout::new("x = {1: 2}");
        assert!(layout.inline_suite_colon(0).is_none());
    }

    #[test]
    fn test_line_at_offset() {
        let layout = SourceLayout::new("ab\ncd\n");
        assert_eq!(layout.line_at(0), 0);
        assert_eq!(layout.line_at(3), 1);
        assert_eq!(layout.line_at(4), 1);
        assert_eq!(layout.line_at(6), 2);
    }

    #[test]
    fn test_indent_unit() {
        assert_eq!(SourceLayout::new("if a:\n\tb = 1").indent_unit(), "\t");
        assert_eq!(SourceLayout::new("if a:\n  b = 1").indent_unit(), "    ");
    }

    #[test]
    fn test_starts_with_word() {
        assert!(starts_with_word("try:", "try"));
        assert!(!starts_with_word("trying = 1", "try"));
        assert!(starts_with_word("else", "else"));
    }
}
