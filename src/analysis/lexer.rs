//! Minimal Python lexer used by the detection rules
//!
//! Produces a copy of the source in which string contents and comments are
//! blanked out with spaces. Byte offsets and line breaks are preserved, so a
//! match in the masked text maps straight back to the original.

use std::collections::HashSet;

/// A `#` comment
#[derive(Debug, Clone, PartialEq)]
pub struct Comment {
    /// 1-based line number
    pub line: usize,
    pub text: String,
}

/// A string literal
#[derive(Debug, Clone, PartialEq)]
pub struct StringLiteral {
    /// 1-based line of the opening quote
    pub line: usize,
    /// 1-based line of the closing quote
    pub end_line: usize,
    pub triple_quoted: bool,
    /// First token on its line, i.e. a bare string statement
    pub statement: bool,
}

/// Source text with non-code regions masked
#[derive(Debug, Clone)]
pub struct MaskedSource {
    pub code: String,
    pub comments: Vec<Comment>,
    pub strings: Vec<StringLiteral>,
}

impl MaskedSource {
    /// Lex `source`
    pub fn new(source: &str) -> Self {
        let bytes = source.as_bytes();
        let mut out = bytes.to_vec();
        let mut comments = Vec::new();
        let mut strings = Vec::new();

        let mut i = 0;
        let mut line = 1;
        let mut line_start = 0;

        while i < bytes.len() {
            match bytes[i] {
                b'\n' => {
                    line += 1;
                    i += 1;
                    line_start = i;
                }
                b'#' => {
                    let start = i;
                    while i < bytes.len() && bytes[i] != b'\n' {
                        i += 1;
                    }
                    comments.push(Comment {
                        line,
                        text: String::from_utf8_lossy(&bytes[start..i]).into_owned(),
                    });
                    blank(&mut out, start, i);
                }
                quote @ (b'\'' | b'"') => {
                    let triple = bytes.len() >= i + 3
                        && bytes[i + 1] == quote
                        && bytes[i + 2] == quote;
                    let statement = is_statement_start(bytes, line_start, i);
                    let start_line = line;
                    let open_len = if triple { 3 } else { 1 };
                    let body_start = i + open_len;
                    let mut j = body_start;
                    let mut closed_at = None;

                    while j < bytes.len() {
                        let b = bytes[j];
                        if b == b'\\' {
                            if j + 1 < bytes.len() && bytes[j + 1] == b'\n' {
                                line += 1;
                                line_start = j + 2;
                            }
                            j += 2;
                            continue;
                        }
                        if b == b'\n' {
                            if !triple {
                                break;
                            }
                            line += 1;
                            line_start = j + 1;
                            j += 1;
                            continue;
                        }
                        if b == quote {
                            if !triple {
                                closed_at = Some(j);
                                break;
                            }
                            if j + 2 < bytes.len() && bytes[j + 1] == quote && bytes[j + 2] == quote {
                                closed_at = Some(j);
                                break;
                            }
                        }
                        j += 1;
                    }

                    let body_end = closed_at.unwrap_or(j.min(bytes.len()));
                    blank(&mut out, body_start.min(bytes.len()), body_end);
                    strings.push(StringLiteral {
                        line: start_line,
                        end_line: line,
                        triple_quoted: triple,
                        statement,
                    });

                    i = match closed_at {
                        Some(end) => end + open_len,
                        None => body_end,
                    };
                }
                _ => i += 1,
            }
        }

        let code = match String::from_utf8(out) {
            Ok(code) => code,
            Err(e) => String::from_utf8_lossy(e.as_bytes()).into_owned(),
        };

        Self {
            code,
            comments,
            strings,
        }
    }

    /// Masked text of one 1-based line
    pub fn line(&self, number: usize) -> &str {
        self.code.lines().nth(number.saturating_sub(1)).unwrap_or("")
    }

    pub fn has_comments(&self) -> bool {
        self.comments
            .iter()
            .any(|c| !c.text.starts_with("#!") && c.text.trim_start_matches('#').trim().len() > 0)
    }

    pub fn has_docstring(&self) -> bool {
        self.strings.iter().any(|s| s.triple_quoted && s.statement)
    }

    /// 0-based lines that begin inside a multi-line string
    pub fn interior_lines(&self) -> HashSet<usize> {
        self.strings
            .iter()
            .filter(|lit| lit.end_line > lit.line)
            .flat_map(|lit| lit.line..lit.end_line)
            .collect()
    }
}

/// 1-based line number of a byte offset
pub fn line_of(text: &str, offset: usize) -> usize {
    let end = offset.min(text.len());
    text.as_bytes()[..end].iter().filter(|b| **b == b'\n').count() + 1
}

fn blank(out: &mut [u8], start: usize, end: usize) {
    for b in &mut out[start..end] {
        if *b != b'\n' {
            *b = b' ';
        }
    }
}

fn is_statement_start(bytes: &[u8], line_start: usize, quote_at: usize) -> bool {
    bytes[line_start..quote_at]
        .iter()
        .all(|b| b.is_ascii_whitespace() || matches!(b, b'r' | b'R' | b'u' | b'U' | b'b' | b'B' | b'f' | b'F'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_masks_comments_and_strings() {
        let src = "x = \"a/b\"  # ratio / total\ny = x / 2\n";
        let masked = MaskedSource::new(src);
        assert_eq!(masked.code.len(), src.len());
        assert!(!masked.line(1).contains('/'));
        assert!(masked.line(2).contains('/'));
        assert_eq!(masked.comments.len(), 1);
        assert_eq!(masked.comments[0].line, 1);
    }

    #[test]
    fn test_triple_quoted_docstring_spans_lines() {
        let src = "def f():\n    \"\"\"Return a/b.\n\n    eval( is fine here\n    \"\"\"\n    return 1\n";
        let masked = MaskedSource::new(src);
        assert!(masked.has_docstring());
        assert_eq!(masked.strings[0].line, 2);
        assert_eq!(masked.strings[0].end_line, 5);
        assert!(!masked.code.contains("eval("));
        assert!(masked.line(6).contains("return 1"));
    }

    #[test]
    fn test_unterminated_string_stops_at_newline() {
        let src = "x = 'open(\ny = eval(z)\n";
        let masked = MaskedSource::new(src);
        assert!(!masked.line(1).contains("open("));
        assert!(masked.line(2).contains("eval("));
    }

    #[test]
    fn test_escaped_quote_does_not_close() {
        let src = r#"s = "say \"a/b\"" ; t = a / b"#;
        let masked = MaskedSource::new(src);
        assert_eq!(masked.code.matches('/').count(), 1);
    }

    #[test]
    fn test_non_ascii_is_preserved_outside_strings() {
        let src = "变量 = 'ü' # ç\n";
        let masked = MaskedSource::new(src);
        assert!(masked.code.starts_with("变量"));
        assert_eq!(masked.code.len(), src.len());
    }

    #[test]
    fn test_shebang_is_not_an_inline_comment() {
        let masked = MaskedSource::new("#!/usr/bin/env python\nx = 1\n");
        assert!(!masked.has_comments());
        let masked = MaskedSource::new("x = 1  # counter\n");
        assert!(masked.has_comments());
    }

    #[test]
    fn test_line_of() {
        assert_eq!(line_of("a\nb\nc", 0), 1);
        assert_eq!(line_of("a\nb\nc", 2), 2);
        assert_eq!(line_of("a\nb\nc", 100), 3);
    }
}
