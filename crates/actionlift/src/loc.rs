use std::fmt;

use ruff_text_size::TextSize;

/// Source code location for error reporting.
///
/// Lines are 1-based and columns 0-based, matching how Python tracebacks and
/// the `ast` module report positions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct CodeLoc {
    /// 1-based line number in the assembled source.
    pub line: u32,
    /// 0-based column offset within the line.
    pub column: u32,
}

impl CodeLoc {
    /// Creates a new location from a 1-based line and 0-based column.
    #[must_use]
    pub const fn new(line: u32, column: u32) -> Self {
        Self { line, column }
    }
}

impl fmt::Display for CodeLoc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {}, column {}", self.line, self.column)
    }
}

/// Byte-offset to line/column index over the assembled source.
///
/// Built once per analysis; both passes share the same source text so ranges
/// taken from the tree can always be located here.
#[derive(Debug)]
pub(crate) struct LineIndex {
    /// Byte offset of the first character of each line.
    line_starts: Vec<usize>,
}

impl LineIndex {
    pub(crate) fn new(source: &str) -> Self {
        let mut line_starts = vec![0];
        for (i, c) in source.char_indices() {
            if c == '\n' {
                line_starts.push(i + 1);
            }
        }
        Self { line_starts }
    }

    /// Converts a byte offset into a line/column location.
    pub(crate) fn locate(&self, offset: TextSize) -> CodeLoc {
        let offset = offset.to_usize();
        // Number of line starts at or before the offset is the 1-based line.
        let line = self.line_starts.partition_point(|start| *start <= offset);
        let line_start = self.line_starts[line - 1];
        let line = u32::try_from(line).expect("line number exceeds u32");
        let column = u32::try_from(offset - line_start).expect("column exceeds u32");
        CodeLoc::new(line, column)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn locates_offsets_across_lines() {
        let index = LineIndex::new("ab\ncd\n");
        assert_eq!(index.locate(TextSize::new(0)), CodeLoc::new(1, 0));
        assert_eq!(index.locate(TextSize::new(1)), CodeLoc::new(1, 1));
        assert_eq!(index.locate(TextSize::new(3)), CodeLoc::new(2, 0));
        assert_eq!(index.locate(TextSize::new(4)), CodeLoc::new(2, 1));
    }

    #[test]
    fn locates_offset_past_trailing_newline() {
        let index = LineIndex::new("ab\n");
        assert_eq!(index.locate(TextSize::new(3)), CodeLoc::new(2, 0));
    }
}
