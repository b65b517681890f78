//! Row/column coordinates for replicated text buffers.
//!
//! All portal messages address text by `Point` (zero-based row and column)
//! and `Range`. Columns count characters, not bytes.

use serde::{Deserialize, Serialize};

/// A zero-based position in a text buffer.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Point {
    pub row: u32,
    pub column: u32,
}

impl Point {
    pub fn new(row: u32, column: u32) -> Self {
        Self { row, column }
    }

    pub fn zero() -> Self {
        Self::default()
    }

    /// The position reached by walking `extent` forward from `self`.
    pub fn traverse(self, extent: Point) -> Point {
        if extent.row == 0 {
            Point::new(self.row, self.column + extent.column)
        } else {
            Point::new(self.row + extent.row, extent.column)
        }
    }

    /// The extent from `start` up to `self`. `start` must not exceed `self`.
    pub fn traversal(self, start: Point) -> Point {
        if self.row == start.row {
            Point::new(0, self.column - start.column)
        } else {
            Point::new(self.row - start.row, self.column)
        }
    }
}

impl std::fmt::Display for Point {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {})", self.row, self.column)
    }
}

/// A start/end pair of points. `start <= end` for all ranges produced by
/// this crate; an empty range encodes a pure insertion point.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Range {
    pub start: Point,
    pub end: Point,
}

impl Range {
    pub fn new(start: Point, end: Point) -> Self {
        Self { start, end }
    }

    /// A zero-width range at `point`.
    pub fn collapsed(point: Point) -> Self {
        Self {
            start: point,
            end: point,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

/// The extent of a piece of text, as a point: rows spanned and the column
/// reached on the final row.
pub fn extent_of(text: &str) -> Point {
    let mut extent = Point::zero();
    for ch in text.chars() {
        if ch == '\n' {
            extent.row += 1;
            extent.column = 0;
        } else {
            extent.column += 1;
        }
    }
    extent
}

/// Convert a point to a character index over `chars`. Returns `None` when
/// the point lies outside the text. The end-of-text position is valid.
pub fn index_for_point(chars: &[char], point: Point) -> Option<usize> {
    let mut cursor = Point::zero();
    for (i, &ch) in chars.iter().enumerate() {
        if cursor == point {
            return Some(i);
        }
        if cursor > point {
            return None;
        }
        if ch == '\n' {
            cursor.row += 1;
            cursor.column = 0;
        } else {
            cursor.column += 1;
        }
    }
    (cursor == point).then_some(chars.len())
}

/// Convert a character index to a point. `index` may equal `chars.len()`.
pub fn point_for_index(chars: &[char], index: usize) -> Point {
    let mut cursor = Point::zero();
    for &ch in chars.iter().take(index) {
        if ch == '\n' {
            cursor.row += 1;
            cursor.column = 0;
        } else {
            cursor.column += 1;
        }
    }
    cursor
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_point_ordering() {
        assert!(Point::new(0, 5) < Point::new(1, 0));
        assert!(Point::new(1, 0) < Point::new(1, 3));
        assert_eq!(Point::new(2, 2), Point::new(2, 2));
    }

    #[test]
    fn test_extent() {
        assert_eq!(extent_of(""), Point::zero());
        assert_eq!(extent_of("abc"), Point::new(0, 3));
        assert_eq!(extent_of("ab\ncd"), Point::new(1, 2));
        assert_eq!(extent_of("ab\n"), Point::new(1, 0));
    }

    #[test]
    fn test_traverse_and_traversal() {
        let base = Point::new(2, 4);
        assert_eq!(base.traverse(Point::new(0, 3)), Point::new(2, 7));
        assert_eq!(base.traverse(Point::new(1, 1)), Point::new(3, 1));

        let end = Point::new(3, 1);
        assert_eq!(end.traversal(base), Point::new(1, 1));
        assert_eq!(Point::new(2, 7).traversal(base), Point::new(0, 3));
    }

    #[test]
    fn test_index_point_round_trip() {
        let chars: Vec<char> = "ab\ncde\nf".chars().collect();
        for i in 0..=chars.len() {
            let p = point_for_index(&chars, i);
            assert_eq!(index_for_point(&chars, p), Some(i));
        }
        assert_eq!(index_for_point(&chars, Point::new(5, 0)), None);
        assert_eq!(index_for_point(&chars, Point::new(0, 9)), None);
    }
}
