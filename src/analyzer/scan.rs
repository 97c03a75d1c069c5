//! Lexical scanning of single hint lines.
//!
//! Hint bodies are Python. Only four things are recognized: comments,
//! `ids.<root>(.<field>)*` reference chains, the assignment operator of the
//! line, and the argument span of `pack(...)` calls.

use regex::Regex;
use std::ops::Range;
use std::sync::LazyLock;

/// Namespace through which hints reach Cairo references.
pub const REFERENCE_NAMESPACE: &str = "ids";

static REFERENCE_CHAIN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\bids((?:\.[A-Za-z_][A-Za-z0-9_]*)+)").expect("reference pattern is valid")
});

static PACK_CALL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\bpack\s*\(").expect("pack pattern is valid"));

/// Operator characters that turn a following `=` into an augmented assignment.
const AUGMENTED_OPERATORS: &[u8] = b"+-*/%&|^@:";

/// One `ids.<root>.<fields>` occurrence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceMatch {
    pub root: String,
    pub fields: Vec<String>,
    pub span: Range<usize>,
}

/// How a byte of a hint line is read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lexeme {
    Code,
    /// Inside a plain string literal.
    Text,
    /// Inside an f-string, whose `{...}` fields may still hold references.
    Format,
}

/// A hint line with its trailing comment removed and string literals marked.
///
/// Python calls may span several lines, so a line is scanned from the
/// bracket depth left open by the lines before it.
#[derive(Debug)]
pub struct ScannedLine<'a> {
    pub code: &'a str,
    lexemes: Vec<Lexeme>,
    depth: usize,
}

impl<'a> ScannedLine<'a> {
    pub fn new(line: &'a str) -> Self {
        Self::with_depth(line, 0)
    }

    /// Scans `line` as the continuation of a bracket opened `depth` levels
    /// deep on earlier lines.
    pub fn with_depth(line: &'a str, depth: usize) -> Self {
        let bytes = line.as_bytes();
        let mut lexemes = Vec::with_capacity(bytes.len());
        let mut quote: Option<(u8, Lexeme)> = None;
        let mut escaped = false;
        let mut end = bytes.len();

        for (i, &b) in bytes.iter().enumerate() {
            match quote {
                Some((q, kind)) => {
                    lexemes.push(kind);
                    if escaped {
                        escaped = false;
                    } else if b == b'\\' {
                        escaped = true;
                    } else if b == q {
                        quote = None;
                    }
                }
                None => {
                    if b == b'#' {
                        end = i;
                        break;
                    }
                    if b == b'\'' || b == b'"' {
                        let kind = if has_format_prefix(&bytes[..i]) {
                            Lexeme::Format
                        } else {
                            Lexeme::Text
                        };
                        quote = Some((b, kind));
                        lexemes.push(kind);
                    } else {
                        lexemes.push(Lexeme::Code);
                    }
                }
            }
        }

        Self {
            code: &line[..end],
            lexemes,
            depth,
        }
    }

    fn lexeme(&self, index: usize) -> Lexeme {
        self.lexemes.get(index).copied().unwrap_or(Lexeme::Code)
    }

    fn is_code(&self, index: usize) -> bool {
        self.lexeme(index) == Lexeme::Code
    }

    /// Bracket depth still open at the end of the line.
    pub fn closing_depth(&self) -> usize {
        let mut depth = self.depth;
        for (i, &b) in self.code.as_bytes().iter().enumerate() {
            if !self.is_code(i) {
                continue;
            }
            match b {
                b'(' | b'[' | b'{' => depth += 1,
                b')' | b']' | b'}' => depth = depth.saturating_sub(1),
                _ => {}
            }
        }
        depth
    }

    /// Every reference chain on the line, in order of appearance.
    pub fn references(&self) -> Vec<ReferenceMatch> {
        let bytes = self.code.as_bytes();
        REFERENCE_CHAIN
            .captures_iter(self.code)
            .filter_map(|caps| {
                let whole = caps.get(0)?;
                // `foo.ids.x` is an attribute of something else
                if whole.start() > 0 && bytes[whole.start() - 1] == b'.' {
                    return None;
                }
                if self.lexeme(whole.start()) == Lexeme::Text {
                    return None;
                }
                let mut parts = caps.get(1)?.as_str()[1..].split('.').map(str::to_owned);
                let root = parts.next()?;
                Some(ReferenceMatch {
                    root,
                    fields: parts.collect(),
                    span: whole.range(),
                })
            })
            .collect()
    }

    /// Byte range of the assignment operator, if the line is an assignment.
    ///
    /// With chained assignments the last operator is returned, so every
    /// target lies to its left.
    pub fn assignment_operator(&self) -> Option<Range<usize>> {
        let bytes = self.code.as_bytes();
        let mut depth = self.depth;
        let mut found = None;
        let mut i = 0;

        while i < bytes.len() {
            if !self.is_code(i) {
                i += 1;
                continue;
            }
            match bytes[i] {
                b'(' | b'[' | b'{' => depth += 1,
                b')' | b']' | b'}' => depth = depth.saturating_sub(1),
                b'=' if depth == 0 => {
                    if bytes.get(i + 1) == Some(&b'=') {
                        // equality comparison
                        i += 2;
                        continue;
                    }
                    let prev = i.checked_sub(1).map(|p| bytes[p]);
                    match prev {
                        Some(b'!') | Some(b'=') => {}
                        Some(op @ (b'<' | b'>')) => {
                            if i >= 2 && bytes[i - 2] == op {
                                found = Some(i - 2..i + 1);
                            }
                        }
                        Some(op) if AUGMENTED_OPERATORS.contains(&op) => {
                            let doubled =
                                (op == b'/' || op == b'*') && i >= 2 && bytes[i - 2] == op;
                            let start = if doubled { i - 2 } else { i - 1 };
                            found = Some(start..i + 1);
                        }
                        _ => found = Some(i..i + 1),
                    }
                }
                _ => {}
            }
            i += 1;
        }
        found
    }

    /// Argument spans of every `pack(...)` call on the line.
    ///
    /// An unterminated call extends to the end of the line.
    pub fn pack_arguments(&self) -> Vec<Range<usize>> {
        let bytes = self.code.as_bytes();
        PACK_CALL
            .find_iter(self.code)
            .filter(|m| self.is_code(m.start()))
            .map(|m| {
                let open = m.end();
                let mut depth = 1;
                let mut close = bytes.len();
                for (offset, &b) in bytes[open..].iter().enumerate() {
                    if !self.is_code(open + offset) {
                        continue;
                    }
                    match b {
                        b'(' => depth += 1,
                        b')' => {
                            depth -= 1;
                            if depth == 0 {
                                close = open + offset;
                                break;
                            }
                        }
                        _ => {}
                    }
                }
                open..close
            })
            .collect()
    }
}

/// True when the string literal starting after `before` carries an `f`
/// prefix (`f"..."`, `rf'...'`).
fn has_format_prefix(before: &[u8]) -> bool {
    let prefix_len = before
        .iter()
        .rev()
        .take_while(|b| b.is_ascii_alphanumeric() || **b == b'_')
        .count();
    let prefix = &before[before.len() - prefix_len..];
    prefix.len() <= 2
        && prefix.iter().all(|b| b"fFrRbBuU".contains(b))
        && prefix.iter().any(|b| matches!(*b, b'f' | b'F'))
}
