//! Line/column addressing
//!
//! Editors address text by line and UTF-16 code unit; the engine stores
//! UTF-8 strings. `LineIndex` converts between the two.

use crate::diagnostics::{Position, Range};

/// Line start offsets for one text snapshot
pub struct LineIndex<'a> {
    text: &'a str,
    line_starts: Vec<usize>,
}

impl<'a> LineIndex<'a> {
    pub fn new(text: &'a str) -> Self {
        let mut line_starts = vec![0];
        line_starts.extend(
            text.bytes()
                .enumerate()
                .filter(|(_, b)| *b == b'\n')
                .map(|(i, _)| i + 1),
        );
        Self { text, line_starts }
    }

    pub fn line_count(&self) -> usize {
        self.line_starts.len()
    }

    /// Byte bounds of a line, excluding its terminator.
    fn line_bounds(&self, line: usize) -> Option<(usize, usize)> {
        let start = *self.line_starts.get(line)?;
        let mut end = self
            .line_starts
            .get(line + 1)
            .map_or(self.text.len(), |next| next - 1);
        if end > start && self.text.as_bytes()[end - 1] == b'\r' {
            end -= 1;
        }
        Some((start, end))
    }

    /// Position of a byte offset. Offsets past the end clamp to the end.
    pub fn position_at(&self, offset: usize) -> Position {
        let offset = offset.min(self.text.len());
        let line = match self.line_starts.binary_search(&offset) {
            Ok(line) => line,
            Err(next) => next - 1,
        };
        let start = self.line_starts[line];
        let character = self
            .text
            .get(start..offset)
            .map_or(0, |prefix| prefix.encode_utf16().count());

        Position::new(line as u32, character as u32)
    }

    /// Byte offset of a position. A line past the last one maps to the end
    /// of the text and a character past the end of its line maps to the line
    /// end. `None` only when the position falls inside a surrogate pair.
    pub fn offset_at(&self, position: Position) -> Option<usize> {
        let Some((start, end)) = self.line_bounds(position.line as usize) else {
            return Some(self.text.len());
        };
        let target = position.character as usize;

        let mut units = 0;
        for (idx, ch) in self.text[start..end].char_indices() {
            if units == target {
                return Some(start + idx);
            }
            units += ch.len_utf16();
            if units > target {
                return None;
            }
        }

        Some(end)
    }

    /// Byte span covered by a range.
    pub fn span(&self, range: Range) -> Option<(usize, usize)> {
        let start = self.offset_at(range.start)?;
        let end = self.offset_at(range.end)?;
        (start <= end).then_some((start, end))
    }

    /// Text covered by a range.
    pub fn slice(&self, range: Range) -> Option<&'a str> {
        let (start, end) = self.span(range)?;
        self.text.get(start..end)
    }

    pub fn range_of(&self, start: usize, end: usize) -> Range {
        Range::new(self.position_at(start), self.position_at(end))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_positions_on_multiple_lines() {
        let index = LineIndex::new("abc\ndef\r\nghi");

        assert_eq!(index.line_count(), 3);
        assert_eq!(index.position_at(0), Position::new(0, 0));
        assert_eq!(index.position_at(5), Position::new(1, 1));
        assert_eq!(index.position_at(9), Position::new(2, 0));
        assert_eq!(index.position_at(100), Position::new(2, 3));

        assert_eq!(index.offset_at(Position::new(1, 3)), Some(7));
        assert_eq!(index.offset_at(Position::new(2, 3)), Some(12));
    }

    #[test]
    fn test_out_of_range_positions_clamp() {
        let index = LineIndex::new("abc\ndef\r\nghi");

        // Past the line end stops before the terminator, CRLF included
        assert_eq!(index.offset_at(Position::new(0, 99)), Some(3));
        assert_eq!(index.offset_at(Position::new(1, 4)), Some(7));
        assert_eq!(index.offset_at(Position::new(1, 99)), Some(7));
        // Lines past the last one mean the end of the text
        assert_eq!(index.offset_at(Position::new(3, 0)), Some(12));
        assert_eq!(index.offset_at(Position::new(40, 7)), Some(12));

        assert_eq!(index.span(Range::multi_line(0, 0, 1, 0)), Some((0, 4)));
        assert_eq!(index.slice(Range::single_line(0, 1, 99)), Some("bc"));
        assert_eq!(index.slice(Range::multi_line(2, 1, 5, 0)), Some("hi"));
        // An offset between '\r' and '\n' resolves back to the line end
        assert_eq!(index.slice(index.range_of(4, 8)), Some("def"));
    }

    #[test]
    fn test_end_of_single_line_document() {
        let index = LineIndex::new("abc");

        assert_eq!(index.span(Range::multi_line(0, 0, 1, 0)), Some((0, 3)));
        assert_eq!(index.span(Range::single_line(0, 1, 99)), Some((1, 3)));
    }

    #[test]
    fn test_utf16_columns() {
        // 'é' is one UTF-16 unit and two bytes; the emoji is two units and four bytes
        let text = "é😀AB";
        let index = LineIndex::new(text);

        assert_eq!(index.position_at(6), Position::new(0, 3));
        assert_eq!(index.offset_at(Position::new(0, 3)), Some(6));
        assert_eq!(index.offset_at(Position::new(0, 2)), None);
        assert_eq!(index.offset_at(Position::new(0, 9)), Some(8));
        assert_eq!(index.slice(Range::single_line(0, 3, 5)), Some("AB"));
    }

    #[test]
    fn test_slice_rejects_inverted_range() {
        let index = LineIndex::new("hello world");

        assert_eq!(index.slice(Range::single_line(0, 0, 5)), Some("hello"));
        assert_eq!(index.slice(Range::single_line(0, 5, 0)), None);
    }

    #[test]
    fn test_empty_text_has_one_line() {
        let index = LineIndex::new("");

        assert_eq!(index.line_count(), 1);
        assert_eq!(index.offset_at(Position::new(0, 0)), Some(0));
        assert_eq!(index.range_of(0, 0), Range::single_line(0, 0, 0));
    }
}
