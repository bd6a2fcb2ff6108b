//! Source location tracking

use serde::{Deserialize, Serialize};

/// A span in the source code
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    pub fn merge(self, other: Span) -> Span {
        Span {
            start: self.start.min(other.start),
            end: self.end.max(other.end),
        }
    }
}

impl std::fmt::Display for Span {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}..{}", self.start, self.end)
    }
}

impl From<Span> for std::ops::Range<usize> {
    fn from(span: Span) -> Self {
        span.start..span.end
    }
}

impl From<std::ops::Range<usize>> for Span {
    fn from(range: std::ops::Range<usize>) -> Self {
        Span::new(range.start, range.end)
    }
}

/// A value with source location
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Spanned<T> {
    pub node: T,
    pub span: Span,
}

impl<T> Spanned<T> {
    pub fn new(node: T, span: Span) -> Self {
        Self { node, span }
    }

    pub fn map<U, F: FnOnce(T) -> U>(self, f: F) -> Spanned<U> {
        Spanned {
            node: f(self.node),
            span: self.span,
        }
    }
}

/// Byte offsets of line starts, used to turn spans into `line:column`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineIndex {
    line_starts: Vec<usize>,
}

impl LineIndex {
    pub fn new(source: &str) -> Self {
        let mut line_starts = vec![0];
        for (offset, byte) in source.bytes().enumerate() {
            if byte == b'\n' {
                line_starts.push(offset + 1);
            }
        }
        Self { line_starts }
    }

    /// 1-based line and column of a byte offset; `(0, 0)` when no source was indexed.
    pub fn line_col(&self, offset: usize) -> (usize, usize) {
        if self.line_starts.is_empty() {
            return (0, 0);
        }
        let line = match self.line_starts.binary_search(&offset) {
            Ok(line) => line,
            Err(next) => next - 1,
        };
        (line + 1, offset - self.line_starts[line] + 1)
    }
}

/// A span resolved against its file.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SourceLocation {
    pub file: String,
    pub line: usize,
    pub column: usize,
    pub span: Span,
}

impl SourceLocation {
    pub fn new(file: impl Into<String>, lines: &LineIndex, span: Span) -> Self {
        let (line, column) = lines.line_col(span.start);
        Self {
            file: file.into(),
            line,
            column,
            span,
        }
    }
}

impl std::fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.line == 0 {
            write!(f, "{}@{}", self.file, self.span)
        } else {
            write!(f, "{}:{}:{}", self.file, self.line, self.column)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_span_merge_non_overlapping() {
        let merged = Span::new(0, 5).merge(Span::new(10, 15));
        assert_eq!(merged, Span::new(0, 15));
    }

    #[test]
    fn test_span_merge_commutative() {
        let a = Span::new(10, 20);
        let b = Span::new(5, 15);
        assert_eq!(a.merge(b), b.merge(a));
    }

    #[test]
    fn test_span_display() {
        assert_eq!(format!("{}", Span::new(42, 99)), "42..99");
    }

    #[test]
    fn test_spanned_map_preserves_span() {
        let s = Spanned::new(2, Span::new(0, 1));
        let mapped = s.map(|n| n * 3);
        assert_eq!(mapped.node, 6);
        assert_eq!(mapped.span, Span::new(0, 1));
    }

    #[test]
    fn test_line_index_first_line() {
        let lines = LineIndex::new("package pkg\nfunc f() {}\n");
        assert_eq!(lines.line_col(0), (1, 1));
        assert_eq!(lines.line_col(8), (1, 9));
    }

    #[test]
    fn test_line_index_later_lines() {
        let lines = LineIndex::new("a\nbc\nd");
        assert_eq!(lines.line_col(2), (2, 1));
        assert_eq!(lines.line_col(3), (2, 2));
        assert_eq!(lines.line_col(5), (3, 1));
    }

    #[test]
    fn test_line_index_empty_is_unknown() {
        assert_eq!(LineIndex::default().line_col(10), (0, 0));
    }

    #[test]
    fn test_location_display() {
        let lines = LineIndex::new("x\nassert y\n");
        let loc = SourceLocation::new("main.go", &lines, Span::new(2, 8));
        assert_eq!(loc.to_string(), "main.go:2:1");

        let unknown = SourceLocation::new("gen.go", &LineIndex::default(), Span::new(3, 4));
        assert_eq!(unknown.to_string(), "gen.go@3..4");
    }
}
