//! Per-site cursor and selection state, and its transformation under edits.
//!
//! Selections are replicated alongside buffer edits: whenever the buffer
//! mutates, every site's selections are rewritten so they keep pointing at
//! the same logical text.

use crate::buffer::TextChange;
use crate::point::{Point, Range};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Marker identifier local to the site that owns the selection.
pub type MarkerId = u32;

/// All of one site's selections on an editor, keyed by marker id.
pub type SelectionSet = HashMap<MarkerId, Selection>;

/// One cursor or selection.
///
/// `tailed == false` denotes a collapsed cursor with no persisted end
/// anchor. `exclusive` decides whether an anchor sitting exactly at an
/// insertion point is pushed past the inserted text. `reversed` records
/// which end is the head for future extension; it only changes through
/// explicit updates, never through edits.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Selection {
    pub range: Range,
    #[serde(default)]
    pub exclusive: bool,
    #[serde(default)]
    pub reversed: bool,
    #[serde(default = "default_tailed")]
    pub tailed: bool,
}

fn default_tailed() -> bool {
    true
}

impl Selection {
    /// A tailed selection spanning `range`.
    pub fn spanning(range: Range) -> Self {
        Self {
            range,
            exclusive: false,
            reversed: false,
            tailed: true,
        }
    }

    /// A collapsed cursor at `point`.
    pub fn cursor(point: Point) -> Self {
        Self {
            range: Range::collapsed(point),
            exclusive: false,
            reversed: false,
            tailed: false,
        }
    }

    pub fn is_cursor(&self) -> bool {
        !self.tailed
    }

    /// Rewrite this selection for a buffer change. Flags are preserved
    /// verbatim; only the range moves.
    pub fn apply_change(&mut self, change: &TextChange) {
        let new_end = change.new_range().end;
        let start = transform_point(self.range.start, &change.old_range, new_end, self.exclusive);
        let end = transform_point(self.range.end, &change.old_range, new_end, self.exclusive);
        self.range = Range {
            start: start.min(end),
            end: start.max(end),
        };
        if !self.tailed {
            self.range.end = self.range.start;
        }
    }
}

/// Map a point through an edit that replaced `old_range` with text ending
/// at `new_end`.
///
/// A point before the edit is untouched; a point exactly at the edit start
/// is pushed past the replacement only when `exclusive`; a point inside the
/// replaced region collapses to the end of the replacement (the deletion
/// point, for a pure delete); a point past the edit is re-anchored by its
/// distance from the old end.
fn transform_point(point: Point, old_range: &Range, new_end: Point, exclusive: bool) -> Point {
    if point < old_range.start {
        point
    } else if point == old_range.start {
        if exclusive {
            new_end
        } else {
            point
        }
    } else if point <= old_range.end {
        new_end
    } else {
        new_end.traverse(point.traversal(old_range.end))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn change(old_range: Range, new_text: &str) -> TextChange {
        TextChange {
            old_range,
            new_text: new_text.to_string(),
        }
    }

    fn range(start: (u32, u32), end: (u32, u32)) -> Range {
        Range::new(Point::new(start.0, start.1), Point::new(end.0, end.1))
    }

    #[test]
    fn test_insert_after_selection_leaves_it_unchanged() {
        let mut selection = Selection::spanning(range((0, 2), (0, 5)));
        selection.apply_change(&change(Range::collapsed(Point::new(0, 7)), "zzz"));
        assert_eq!(selection.range, range((0, 2), (0, 5)));
    }

    #[test]
    fn test_insert_before_selection_shifts_it() {
        let mut selection = Selection::spanning(range((0, 2), (0, 5)));
        selection.apply_change(&change(Range::collapsed(Point::new(0, 0)), "ab"));
        assert_eq!(selection.range, range((0, 4), (0, 7)));
    }

    #[test]
    fn test_insert_at_start_respects_exclusive() {
        let mut pinned = Selection::spanning(range((0, 2), (0, 5)));
        pinned.apply_change(&change(Range::collapsed(Point::new(0, 2)), "xy"));
        assert_eq!(pinned.range, range((0, 2), (0, 7)));

        let mut pushed = Selection::spanning(range((0, 2), (0, 5)));
        pushed.exclusive = true;
        pushed.apply_change(&change(Range::collapsed(Point::new(0, 2)), "xy"));
        assert_eq!(pushed.range, range((0, 4), (0, 7)));
    }

    #[test]
    fn test_delete_containing_selection_collapses_it() {
        let mut selection = Selection::spanning(range((0, 3), (0, 6)));
        selection.apply_change(&change(range((0, 1), (0, 8)), ""));
        assert_eq!(selection.range, range((0, 1), (0, 1)));
        assert!(selection.tailed);
    }

    #[test]
    fn test_delete_before_selection_shifts_it() {
        let mut selection = Selection::spanning(range((0, 6), (0, 9)));
        selection.apply_change(&change(range((0, 0), (0, 3)), ""));
        assert_eq!(selection.range, range((0, 3), (0, 6)));
    }

    #[test]
    fn test_multiline_edit_reanchors_following_selection() {
        let mut selection = Selection::spanning(range((2, 1), (2, 4)));
        // Replace rows 0-1 with a single shorter row.
        selection.apply_change(&change(range((0, 0), (1, 3)), "x"));
        assert_eq!(selection.range, range((1, 1), (1, 4)));
    }

    #[test]
    fn test_cursor_stays_collapsed() {
        let mut cursor = Selection::cursor(Point::new(0, 4));
        cursor.apply_change(&change(range((0, 0), (0, 2)), "longer"));
        assert!(cursor.range.is_empty());
        assert!(cursor.is_cursor());
    }

    #[test]
    fn test_reversed_flag_survives_edits() {
        let mut selection = Selection::spanning(range((0, 2), (0, 5)));
        selection.reversed = true;
        selection.apply_change(&change(Range::collapsed(Point::new(0, 0)), "ab"));
        assert!(selection.reversed);
    }

    #[test]
    fn test_replacement_overlapping_selection_end() {
        let mut selection = Selection::spanning(range((0, 2), (0, 6)));
        // Replace columns 4-8 with "Q": end falls inside the replaced
        // region and collapses to the end of the replacement.
        selection.apply_change(&change(range((0, 4), (0, 8)), "Q"));
        assert_eq!(selection.range, range((0, 2), (0, 5)));
    }
}
