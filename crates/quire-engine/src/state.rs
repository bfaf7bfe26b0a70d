use log::debug;

use crate::cursor::Cursor;
use crate::error::{EditorError, Result};
use crate::operations::{
    Adjustment, AppliedOperation, AppliedTransformation, Operation, StateUpdate, Transformation,
};
use crate::tokens::{Token, validate_nesting};

/// The token stream, mutated only through operations.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TokenBuffer {
    tokens: Vec<Token>,
}

impl TokenBuffer {
    pub fn new(tokens: Vec<Token>) -> Result<Self> {
        validate_nesting(&tokens)?;
        Ok(Self { tokens })
    }

    pub fn tokens(&self) -> &[Token] {
        &self.tokens
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Token> {
        self.tokens.get(index)
    }

    pub fn slice(&self, from: usize, to: usize) -> Result<&[Token]> {
        self.tokens.get(from..to).ok_or(EditorError::RangeOutOfRange {
            from,
            to,
            len: self.tokens.len(),
        })
    }

    /// Applies `operations` in order, each shifted by the ones before it.
    ///
    /// All or nothing: when an operation is out of range, the ones already
    /// spliced are rolled back before the error is returned.
    pub fn apply(&mut self, operations: &[Operation]) -> Result<Vec<AppliedOperation>> {
        let mut applied: Vec<AppliedOperation> = Vec::with_capacity(operations.len());
        let mut adjustments: Vec<Adjustment> = Vec::with_capacity(operations.len());
        for operation in operations {
            if operation.is_noop() {
                continue;
            }
            match self.splice(&operation.adjusted(&adjustments)) {
                Ok(done) => {
                    adjustments.push(done.adjustment());
                    applied.push(done);
                }
                Err(err) => {
                    self.unapply(&applied)?;
                    return Err(err);
                }
            }
        }
        Ok(applied)
    }

    /// Reverts `applied` (as returned by [`TokenBuffer::apply`]). All or
    /// nothing, like [`TokenBuffer::apply`].
    pub fn unapply(&mut self, applied: &[AppliedOperation]) -> Result<()> {
        for (done, op) in applied.iter().rev().enumerate() {
            if let Err(err) = self.replay_one(&op.inverse()) {
                for op in &applied[applied.len() - done..] {
                    self.replay_one(op)?;
                }
                return Err(err);
            }
        }
        Ok(())
    }

    /// Re-applies `applied` literally, in order. All or nothing.
    pub fn replay(&mut self, applied: &[AppliedOperation]) -> Result<()> {
        for (done, op) in applied.iter().enumerate() {
            if let Err(err) = self.replay_one(op) {
                for op in applied[..done].iter().rev() {
                    self.replay_one(&op.inverse())?;
                }
                return Err(err);
            }
        }
        Ok(())
    }

    fn splice(&mut self, operation: &Operation) -> Result<AppliedOperation> {
        let len = self.tokens.len();
        match operation {
            Operation::Insert { at, tokens } => {
                if *at > len {
                    return Err(EditorError::OffsetOutOfRange { offset: *at, len });
                }
                self.tokens.splice(*at..*at, tokens.iter().cloned());
                Ok(AppliedOperation::Inserted {
                    at: *at,
                    tokens: tokens.clone(),
                })
            }
            Operation::Delete { from, to } => {
                if from > to || *to > len {
                    return Err(EditorError::RangeOutOfRange {
                        from: *from,
                        to: *to,
                        len,
                    });
                }
                let removed: Vec<Token> = self.tokens.drain(*from..*to).collect();
                Ok(AppliedOperation::Deleted {
                    at: *from,
                    tokens: removed,
                })
            }
        }
    }

    fn replay_one(&mut self, op: &AppliedOperation) -> Result<()> {
        let len = self.tokens.len();
        match op {
            AppliedOperation::Inserted { at, tokens } => {
                if *at > len {
                    return Err(EditorError::OffsetOutOfRange { offset: *at, len });
                }
                self.tokens.splice(*at..*at, tokens.iter().cloned());
            }
            AppliedOperation::Deleted { at, tokens } => {
                let to = at + tokens.len();
                if self.tokens.get(*at..to) != Some(tokens.as_slice()) {
                    return Err(EditorError::RangeOutOfRange { from: *at, to, len });
                }
                self.tokens.drain(*at..to);
            }
        }
        Ok(())
    }
}

/// Token buffer plus the cursor: everything undo has to restore.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct EditorState {
    pub buffer: TokenBuffer,
    pub cursor: Option<Cursor>,
}

impl EditorState {
    pub fn new(buffer: TokenBuffer) -> Self {
        Self {
            buffer,
            cursor: None,
        }
    }

    pub fn apply(&mut self, transformation: &Transformation) -> Result<AppliedTransformation> {
        let old_len = self.buffer.len();
        let cursor_before = self.cursor;
        let operations = self.buffer.apply(&transformation.operations)?;
        if let Some(cursor) = transformation.cursor {
            self.cursor = Some(cursor);
        }
        let update = StateUpdate::from_applied(&operations, old_len);
        if let Some(update) = &update {
            debug!(
                "applied {} operation(s): {:?} -> {:?}",
                operations.len(),
                update.before,
                update.after
            );
        }
        Ok(AppliedTransformation {
            operations,
            cursor_before,
            cursor_after: self.cursor,
            update,
        })
    }

    /// Restores the buffer and cursor to what they were before `applied`.
    /// Returns the update describing the reverse edit.
    pub fn unapply(&mut self, applied: &AppliedTransformation) -> Result<Option<StateUpdate>> {
        let old_len = self.buffer.len();
        self.buffer.unapply(&applied.operations)?;
        self.cursor = applied.cursor_before;
        let inverse: Vec<AppliedOperation> = applied
            .operations
            .iter()
            .rev()
            .map(AppliedOperation::inverse)
            .collect();
        Ok(StateUpdate::from_applied(&inverse, old_len))
    }

    /// Re-runs `applied` on a buffer that is back in its pre-state.
    pub fn replay(&mut self, applied: &AppliedTransformation) -> Result<Option<StateUpdate>> {
        let old_len = self.buffer.len();
        self.buffer.replay(&applied.operations)?;
        self.cursor = applied.cursor_after;
        Ok(StateUpdate::from_applied(&applied.operations, old_len))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tokens::{TokenBuilder, debug_string};
    use pretty_assertions::assert_eq;

    fn ab_state() -> EditorState {
        let tokens = TokenBuilder::new().paragraph("ab").build();
        EditorState::new(TokenBuffer::new(tokens).unwrap())
    }

    #[test]
    fn test_insert_inside_text() {
        let mut state = ab_state();
        let t = Transformation::new(vec![Operation::insert(3, Token::chars("c"))])
            .with_cursor(Cursor::collapsed(2));

        let applied = state.apply(&t).unwrap();

        assert_eq!(
            debug_string(state.buffer.tokens()),
            "<paragraph#1><text#2>acb</></>"
        );
        assert_eq!(applied.cursor_before, None);
        assert_eq!(state.cursor, Some(Cursor::collapsed(2)));
        let update = applied.update.unwrap();
        assert_eq!(update.before, 3..3);
        assert_eq!(update.after, 3..4);
    }

    #[test]
    fn test_unapply_restores_tokens_and_cursor() {
        let mut state = ab_state();
        state.cursor = Some(Cursor::collapsed(1));
        let before = state.clone();
        let t = Transformation::new(vec![
            Operation::delete(2, 4),
            Operation::insert(2, Token::chars("xyz")),
        ])
        .with_cursor(Cursor::collapsed(4));

        let applied = state.apply(&t).unwrap();
        assert_eq!(
            debug_string(state.buffer.tokens()),
            "<paragraph#1><text#2>xyz</></>"
        );

        state.unapply(&applied).unwrap();
        assert_eq!(state, before);

        state.replay(&applied).unwrap();
        assert_eq!(
            debug_string(state.buffer.tokens()),
            "<paragraph#1><text#2>xyz</></>"
        );
        assert_eq!(state.cursor, Some(Cursor::collapsed(4)));
    }

    #[test]
    fn test_later_operations_see_earlier_ones() {
        let mut buffer = TokenBuffer::new(Token::chars("abcdef")).unwrap();
        // both positions are relative to the original "abcdef"
        let applied = buffer
            .apply(&[Operation::insert(1, Token::chars("XX")), Operation::delete(4, 6)])
            .unwrap();

        assert_eq!(debug_string(buffer.tokens()), "aXXbcd");
        assert_eq!(
            applied[1],
            AppliedOperation::Deleted {
                at: 6,
                tokens: Token::chars("ef"),
            }
        );
    }

    #[test]
    fn test_out_of_range_rolls_back() {
        let mut buffer = TokenBuffer::new(Token::chars("abc")).unwrap();
        let err = buffer
            .apply(&[Operation::insert(0, Token::chars("z")), Operation::delete(2, 9)])
            .unwrap_err();

        assert!(matches!(err, EditorError::RangeOutOfRange { .. }));
        assert_eq!(debug_string(buffer.tokens()), "abc");
    }

    #[test]
    fn test_failed_unapply_leaves_buffer_untouched() {
        let mut buffer = TokenBuffer::new(Token::chars("abc")).unwrap();
        let applied = buffer
            .apply(&[Operation::insert(0, Token::chars("z")), Operation::delete(1, 2)])
            .unwrap();
        // the inserted "z" no longer matches, so its inverse cannot run
        let mut tampered = buffer.tokens().to_vec();
        tampered[0] = Token::Char('y');
        let mut buffer = TokenBuffer::new(tampered.clone()).unwrap();

        let err = buffer.unapply(&applied).unwrap_err();

        assert!(matches!(err, EditorError::RangeOutOfRange { .. }));
        assert_eq!(buffer.tokens(), tampered.as_slice());
    }

    #[test]
    fn test_insert_past_end_rejected() {
        let mut buffer = TokenBuffer::new(Vec::new()).unwrap();
        let err = buffer
            .apply(&[Operation::insert(1, Token::chars("z"))])
            .unwrap_err();
        assert_eq!(err, EditorError::OffsetOutOfRange { offset: 1, len: 0 });
    }

    #[test]
    fn test_empty_transformation_has_no_update() {
        let mut state = ab_state();
        let applied = state.apply(&Transformation::empty()).unwrap();
        assert!(!applied.changed_tokens());
        assert_eq!(applied.update, None);
    }

    #[test]
    fn test_buffer_rejects_malformed_stream() {
        assert!(matches!(
            TokenBuffer::new(vec![Token::Close]),
            Err(EditorError::Malformed(_))
        ));
    }
}
