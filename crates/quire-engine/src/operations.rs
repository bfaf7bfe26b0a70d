//! Edit algebra over the token stream.
//!
//! An [`Operation`] is an edit request expressed against the buffer as it
//! was before the enclosing [`Transformation`] started. Operations of one
//! transformation are applied in order, each one shifted by the
//! [`Adjustment`]s of those before it. Applying an operation yields an
//! [`AppliedOperation`] holding the literal tokens it added or removed,
//! which is exactly what is needed to invert it.

use std::ops::Range;

use serde::{Deserialize, Serialize};

use crate::cursor::Cursor;
use crate::tokens::Token;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operation {
    Insert { at: usize, tokens: Vec<Token> },
    Delete { from: usize, to: usize },
}

impl Operation {
    pub fn insert(at: usize, tokens: Vec<Token>) -> Self {
        Operation::Insert { at, tokens }
    }

    pub fn delete(from: usize, to: usize) -> Self {
        Operation::Delete { from, to }
    }

    pub fn is_noop(&self) -> bool {
        match self {
            Operation::Insert { tokens, .. } => tokens.is_empty(),
            Operation::Delete { from, to } => from >= to,
        }
    }

    /// Shift this operation past the effect of `adjustments`, applied in order.
    pub fn adjusted(&self, adjustments: &[Adjustment]) -> Operation {
        let shift = |p: usize| adjustments.iter().fold(p, |p, adj| adj.apply(p));
        match self {
            Operation::Insert { at, tokens } => Operation::Insert {
                at: shift(*at),
                tokens: tokens.clone(),
            },
            Operation::Delete { from, to } => Operation::Delete {
                from: shift(*from),
                to: shift(*to),
            },
        }
    }
}

/// Positional effect of one applied operation: `delta` tokens appeared
/// (positive) or vanished (negative) at `at`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Adjustment {
    pub at: usize,
    pub delta: isize,
}

impl Adjustment {
    /// Maps a position from before the operation to after it. Positions
    /// inside a deleted span collapse onto its start.
    pub fn apply(&self, position: usize) -> usize {
        if self.delta >= 0 {
            if position >= self.at {
                position + self.delta.unsigned_abs()
            } else {
                position
            }
        } else {
            let removed = self.delta.unsigned_abs();
            if position >= self.at + removed {
                position - removed
            } else if position > self.at {
                self.at
            } else {
                position
            }
        }
    }

    /// Maps a position from after the operation back to before it.
    /// `upper` selects which side of a re-expanded deletion a position
    /// sitting exactly on it lands on.
    pub fn revert(&self, position: usize, upper: bool) -> usize {
        let amount = self.delta.unsigned_abs();
        if self.delta >= 0 {
            if position >= self.at + amount {
                position - amount
            } else if position > self.at {
                self.at
            } else {
                position
            }
        } else if position > self.at || (upper && position == self.at) {
            position + amount
        } else {
            position
        }
    }
}

/// An operation as it actually happened, with literal tokens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AppliedOperation {
    Inserted { at: usize, tokens: Vec<Token> },
    Deleted { at: usize, tokens: Vec<Token> },
}

impl AppliedOperation {
    pub fn at(&self) -> usize {
        match self {
            AppliedOperation::Inserted { at, .. } | AppliedOperation::Deleted { at, .. } => *at,
        }
    }

    pub fn tokens(&self) -> &[Token] {
        match self {
            AppliedOperation::Inserted { tokens, .. } | AppliedOperation::Deleted { tokens, .. } => {
                tokens
            }
        }
    }

    pub fn inverse(&self) -> AppliedOperation {
        match self {
            AppliedOperation::Inserted { at, tokens } => AppliedOperation::Deleted {
                at: *at,
                tokens: tokens.clone(),
            },
            AppliedOperation::Deleted { at, tokens } => AppliedOperation::Inserted {
                at: *at,
                tokens: tokens.clone(),
            },
        }
    }

    pub fn adjustment(&self) -> Adjustment {
        let len = self.tokens().len() as isize;
        match self {
            AppliedOperation::Inserted { at, .. } => Adjustment { at: *at, delta: len },
            AppliedOperation::Deleted { at, .. } => Adjustment { at: *at, delta: -len },
        }
    }

    /// Span touched in the buffer this operation was applied to.
    pub fn before_range(&self) -> Range<usize> {
        match self {
            AppliedOperation::Inserted { at, .. } => *at..*at,
            AppliedOperation::Deleted { at, tokens } => *at..*at + tokens.len(),
        }
    }

    /// Span touched in the buffer this operation produced.
    pub fn after_range(&self) -> Range<usize> {
        match self {
            AppliedOperation::Inserted { at, tokens } => *at..*at + tokens.len(),
            AppliedOperation::Deleted { at, .. } => *at..*at,
        }
    }
}

/// Union of the token spans one transformation touched.
///
/// `before` is in the coordinates of the buffer before the transformation,
/// `after` in the coordinates of the buffer after it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateUpdate {
    pub before: Range<usize>,
    pub after: Range<usize>,
    pub old_len: usize,
    pub new_len: usize,
}

impl StateUpdate {
    /// Summarizes `applied`, a sequence whose positions are each relative to
    /// the buffer left by the previous entry. `None` when nothing changed.
    pub fn from_applied(applied: &[AppliedOperation], old_len: usize) -> Option<StateUpdate> {
        if applied.is_empty() {
            return None;
        }
        let adjustments: Vec<Adjustment> = applied.iter().map(|op| op.adjustment()).collect();

        let mut before: Option<Range<usize>> = None;
        let mut after: Option<Range<usize>> = None;
        for (i, op) in applied.iter().enumerate() {
            let range = op.before_range();
            let mut start = range.start;
            let mut end = range.end;
            for adj in adjustments[..i].iter().rev() {
                start = adj.revert(start, false);
                end = adj.revert(end, true);
            }
            before = Some(union(before, start..end));

            let range = op.after_range();
            let mut start = range.start;
            let mut end = range.end;
            for adj in &adjustments[i + 1..] {
                start = adj.apply(start);
                end = adj.apply(end);
            }
            after = Some(union(after, start..end.max(start)));
        }

        let delta: isize = adjustments.iter().map(|adj| adj.delta).sum();
        let new_len = old_len.checked_add_signed(delta)?;
        Some(StateUpdate {
            before: before?,
            after: after?,
            old_len,
            new_len,
        })
    }
}

fn union(acc: Option<Range<usize>>, range: Range<usize>) -> Range<usize> {
    match acc {
        Some(acc) => acc.start.min(range.start)..acc.end.max(range.end),
        None => range,
    }
}

/// Edit intent produced by a command, independent of how it gets applied.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Transformation {
    pub operations: Vec<Operation>,
    /// Cursor to adopt afterwards. `None` leaves the cursor unchanged.
    pub cursor: Option<Cursor>,
}

impl Transformation {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn new(operations: Vec<Operation>) -> Self {
        Self {
            operations,
            cursor: None,
        }
    }

    pub fn cursor_only(cursor: Cursor) -> Self {
        Self {
            operations: Vec::new(),
            cursor: Some(cursor),
        }
    }

    pub fn with_cursor(mut self, cursor: Cursor) -> Self {
        self.cursor = Some(cursor);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty() && self.cursor.is_none()
    }
}

/// A transformation after it ran: enough to undo or replay it exactly.
#[derive(Debug, Clone, PartialEq)]
pub struct AppliedTransformation {
    pub operations: Vec<AppliedOperation>,
    pub cursor_before: Option<Cursor>,
    pub cursor_after: Option<Cursor>,
    pub update: Option<StateUpdate>,
}

impl AppliedTransformation {
    pub fn changed_tokens(&self) -> bool {
        !self.operations.is_empty()
    }
}
