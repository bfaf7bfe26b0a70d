use std::ops::Range;

use serde::{Deserialize, Serialize};

/// Caret or selection in render-offset space.
///
/// `anchor` is where the selection started, `head` is the end that moves.
/// `column_lock` remembers the horizontal position a run of vertical moves
/// started from, so moving through a short line does not lose the column.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Cursor {
    pub anchor: usize,
    pub head: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column_lock: Option<f32>,
}

impl Cursor {
    pub fn new(anchor: usize, head: usize) -> Self {
        Self {
            anchor,
            head,
            column_lock: None,
        }
    }

    pub fn collapsed(at: usize) -> Self {
        Self::new(at, at)
    }

    pub fn with_column_lock(mut self, x: f32) -> Self {
        self.column_lock = Some(x);
        self
    }

    pub fn is_collapsed(&self) -> bool {
        self.anchor == self.head
    }

    pub fn start(&self) -> usize {
        self.anchor.min(self.head)
    }

    pub fn end(&self) -> usize {
        self.anchor.max(self.head)
    }

    pub fn range(&self) -> Range<usize> {
        self.start()..self.end()
    }

    /// Moves the head to `head`, keeping the anchor when `extend` is set.
    /// Drops the column lock.
    pub fn moved_to(&self, head: usize, extend: bool) -> Self {
        let anchor = if extend { self.anchor } else { head };
        Self::new(anchor, head)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backward_selection_range() {
        let cursor = Cursor::new(9, 4);
        assert!(!cursor.is_collapsed());
        assert_eq!(cursor.range(), 4..9);
    }

    #[test]
    fn test_moved_to_extend_keeps_anchor() {
        let cursor = Cursor::collapsed(3).with_column_lock(12.0);
        let extended = cursor.moved_to(7, true);
        assert_eq!(extended, Cursor::new(3, 7));

        let moved = cursor.moved_to(7, false);
        assert_eq!(moved, Cursor::collapsed(7));
        assert_eq!(moved.column_lock, None);
    }
}
