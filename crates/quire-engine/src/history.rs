//! Linear undo history with stroke coalescing.
//!
//! Applied transformations are grouped into [`Change`]s. A new change starts
//! when the current one has been idle for longer than the idle threshold,
//! when it has been open for longer than the maximum duration, or after an
//! undo or redo. Recording anything truncates the redo tail.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use log::debug;
use quire_config::HistorySettings;

use crate::cursor::Cursor;
use crate::operations::AppliedTransformation;

/// One undo step.
#[derive(Debug, Clone, PartialEq)]
pub struct Change {
    transformations: Vec<AppliedTransformation>,
    started_at: Instant,
    last_at: Instant,
}

impl Change {
    fn new(applied: AppliedTransformation, now: Instant) -> Self {
        Self {
            transformations: vec![applied],
            started_at: now,
            last_at: now,
        }
    }

    pub fn transformations(&self) -> &[AppliedTransformation] {
        &self.transformations
    }

    pub fn len(&self) -> usize {
        self.transformations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transformations.is_empty()
    }

    /// Cursor to restore after undoing the whole change.
    pub fn cursor_before(&self) -> Option<Cursor> {
        self.transformations.first().and_then(|t| t.cursor_before)
    }

    /// Cursor to restore after redoing the whole change.
    pub fn cursor_after(&self) -> Option<Cursor> {
        self.transformations.last().and_then(|t| t.cursor_after)
    }
}

#[derive(Debug, Clone)]
pub struct History {
    changes: VecDeque<Change>,
    /// Changes `[0, current)` are applied; the rest can be redone.
    current: usize,
    idle_threshold: Duration,
    max_change_duration: Duration,
    max_changes: usize,
    /// The next record starts a new change.
    sealed: bool,
}

impl Default for History {
    fn default() -> Self {
        Self::new(&HistorySettings::default())
    }
}

impl History {
    pub fn new(settings: &HistorySettings) -> Self {
        Self {
            changes: VecDeque::new(),
            current: 0,
            idle_threshold: Duration::from_millis(settings.idle_threshold_ms),
            max_change_duration: Duration::from_millis(settings.max_change_duration_ms),
            max_changes: settings.max_changes.max(1),
            sealed: false,
        }
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn changes(&self) -> impl Iterator<Item = &Change> {
        self.changes.iter()
    }

    pub fn can_undo(&self) -> bool {
        self.current > 0
    }

    pub fn can_redo(&self) -> bool {
        self.current < self.changes.len()
    }

    /// Makes the next record start a new change.
    pub fn seal(&mut self) {
        self.sealed = true;
    }

    /// Records `applied`, coalescing it into the current change when it
    /// arrives soon enough. Transformations that changed no tokens are
    /// ignored.
    pub fn record(&mut self, applied: AppliedTransformation, now: Instant) {
        if !applied.changed_tokens() {
            return;
        }
        if self.changes.len() > self.current {
            debug!("history: dropping {} redo step(s)", self.changes.len() - self.current);
            self.changes.truncate(self.current);
        }

        let coalesce = match self.changes.back() {
            Some(change) if !self.sealed => {
                now.saturating_duration_since(change.started_at) <= self.max_change_duration
                    && now.saturating_duration_since(change.last_at) <= self.idle_threshold
            }
            _ => false,
        };
        self.sealed = false;

        match self.changes.back_mut() {
            Some(change) if coalesce => {
                change.transformations.push(applied);
                change.last_at = now;
            }
            _ => {
                self.changes.push_back(Change::new(applied, now));
                if self.changes.len() > self.max_changes {
                    self.changes.pop_front();
                }
                self.current = self.changes.len();
            }
        }
    }

    /// The change an undo would revert.
    pub fn undo_target(&self) -> Option<&Change> {
        self.current.checked_sub(1).and_then(|i| self.changes.get(i))
    }

    /// The change a redo would re-apply.
    pub fn redo_target(&self) -> Option<&Change> {
        self.changes.get(self.current)
    }

    /// Moves the pointer back over the undo target once it was reverted.
    pub fn step_back(&mut self) {
        if self.can_undo() {
            self.current -= 1;
            self.sealed = true;
        }
    }

    /// Moves the pointer past the redo target once it was re-applied.
    pub fn step_forward(&mut self) {
        if self.can_redo() {
            self.current += 1;
            self.sealed = true;
        }
    }
}
