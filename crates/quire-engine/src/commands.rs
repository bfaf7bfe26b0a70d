//! Editing commands.
//!
//! A command reads the current trees and produces a [`Transformation`]; it
//! never mutates anything itself. Cursors live in render offsets, token
//! operations in buffer offsets, so every command translates between the
//! two through the render tree.
//!
//! Every inline sits at the same depth (document → block → inline), so a
//! deletion between two text positions is balanced: the inline and block
//! the range starts in absorb whatever remains of the ones it ends in.
//! Blocks without inlines are the exception and get the missing tag back.

use crate::cursor::Cursor;
use crate::error::{EditorError, Result};
use crate::ids::IdGenerator;
use crate::layout::LayoutTree;
use crate::model::{Element, ModelTree};
use crate::operations::{Operation, Transformation};
use crate::registry::NodeRegistry;
use crate::render::{RenderKind, RenderTree};
use crate::tokens::Token;

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    InsertText(String),
    DeleteBackward,
    DeleteForward,
    /// Splits the block at the caret (Enter).
    SplitBlock,
    MoveLeft { extend: bool },
    MoveRight { extend: bool },
    MoveUp { extend: bool },
    MoveDown { extend: bool },
    MoveLineStart { extend: bool },
    MoveLineEnd { extend: bool },
    SelectAll,
    SetCursor(Cursor),
}

/// Read access to the editor a command compiles against.
pub struct CommandContext<'a> {
    pub cursor: Option<Cursor>,
    pub model: &'a ModelTree,
    pub render: &'a RenderTree,
    pub layout: &'a LayoutTree,
    pub registry: &'a NodeRegistry,
    /// Source of ids for tags the command creates.
    pub ids: &'a mut IdGenerator,
}

/// Buffer index where text typed at a render offset goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct TextPosition {
    at: usize,
    /// False when the enclosing block has no inline to hold the text.
    in_inline: bool,
}

impl Command {
    pub fn compile(&self, ctx: &mut CommandContext<'_>) -> Result<Transformation> {
        if let Command::SetCursor(cursor) = self {
            return Ok(Transformation::cursor_only(ctx.clamp(*cursor)?));
        }
        let Some(cursor) = ctx.cursor else {
            return Ok(Transformation::empty());
        };
        match self {
            Command::InsertText(text) => ctx.insert_text(cursor, text),
            Command::DeleteBackward => ctx.delete_backward(cursor),
            Command::DeleteForward => ctx.delete_forward(cursor),
            Command::SplitBlock => ctx.split_block(cursor),
            Command::MoveLeft { extend } => {
                let head = if !cursor.is_collapsed() && !extend {
                    cursor.start()
                } else {
                    cursor.head.saturating_sub(1)
                };
                ctx.move_to(cursor, head, *extend)
            }
            Command::MoveRight { extend } => {
                let head = if !cursor.is_collapsed() && !extend {
                    cursor.end()
                } else {
                    cursor.head + 1
                };
                ctx.move_to(cursor, head, *extend)
            }
            Command::MoveUp { extend } => ctx.move_vertically(cursor, false, *extend),
            Command::MoveDown { extend } => ctx.move_vertically(cursor, true, *extend),
            Command::MoveLineStart { extend } => {
                let line = ctx.layout.line_range(cursor.head)?;
                ctx.move_to(cursor, line.start, *extend)
            }
            Command::MoveLineEnd { extend } => {
                let line = ctx.layout.line_range(cursor.head)?;
                ctx.move_to(cursor, line.end.saturating_sub(1), *extend)
            }
            Command::SelectAll => Ok(Transformation::cursor_only(Cursor::new(
                0,
                ctx.max_caret()?,
            ))),
            Command::SetCursor(_) => Ok(Transformation::empty()),
        }
    }
}

impl CommandContext<'_> {
    /// Last caret position: before the final line break.
    fn max_caret(&self) -> Result<usize> {
        Ok(self.render.size(self.render.root())?.saturating_sub(1))
    }

    fn clamp(&self, cursor: Cursor) -> Result<Cursor> {
        let max = self.max_caret()?;
        Ok(Cursor {
            anchor: cursor.anchor.min(max),
            head: cursor.head.min(max),
            column_lock: cursor.column_lock,
        })
    }

    fn move_to(&self, cursor: Cursor, head: usize, extend: bool) -> Result<Transformation> {
        let moved = cursor.moved_to(head.min(self.max_caret()?), extend);
        if moved == cursor {
            return Ok(Transformation::empty());
        }
        Ok(Transformation::cursor_only(moved))
    }

    fn move_vertically(&self, cursor: Cursor, down: bool, extend: bool) -> Result<Transformation> {
        let x = match cursor.column_lock {
            Some(x) => x,
            None => self.layout.caret_column(cursor.head)?,
        };
        let target = if down {
            self.layout.offset_below(cursor.head, x)?
        } else {
            self.layout.offset_above(cursor.head, x)?
        };
        let Some(target) = target else {
            return Ok(Transformation::empty());
        };
        let moved = cursor
            .moved_to(target.min(self.max_caret()?), extend)
            .with_column_lock(x);
        Ok(Transformation::cursor_only(moved))
    }

    fn is_line_break(&self, offset: usize) -> Result<bool> {
        let chain = self.render.resolve_position(offset)?;
        Ok(matches!(
            self.render.kind(chain.leaf().key)?,
            RenderKind::LineBreak
        ))
    }

    fn text_position(&self, offset: usize) -> Result<TextPosition> {
        if let Some(at) = self.render.convert_offset_to_model_offset(offset)? {
            return Ok(TextPosition { at, in_inline: true });
        }
        // a line break: the end of its block's text
        let chain = self.render.resolve_position(offset)?;
        let render_block = chain
            .get(1)
            .ok_or_else(|| EditorError::Structure(format!("no block at offset {offset}")))?;
        let block = self.model.tree().lookup(render_block.id)?;
        let (container, in_inline) = match self.model.tree().children(block)?.last() {
            Some(&inline) => (inline, true),
            None => (block, false),
        };
        let at = self.model.start_offset(container)? + self.model.size(container)? - 1;
        Ok(TextPosition { at, in_inline })
    }

    /// Deletes everything between two text positions. When only one end
    /// sits in an inline, the tag the range cut off is put back. Text that
    /// replaces the range must be inserted before these operations run.
    fn delete_between(&self, from: usize, to: usize) -> Result<Vec<Operation>> {
        let start = self.text_position(from)?;
        let end = self.text_position(to)?;
        let mut operations = vec![Operation::delete(start.at, end.at)];
        match (start.in_inline, end.in_inline) {
            (true, false) => operations.push(Operation::insert(start.at, vec![Token::Close])),
            (false, true) => {
                let chain = self.model.resolve_position(end.at)?;
                let inline = chain
                    .get(2)
                    .ok_or_else(|| EditorError::Structure(format!("no inline at offset {to}")))?;
                let element = self
                    .model
                    .kind(inline.key)?
                    .element()
                    .ok_or_else(|| EditorError::Structure("inline without element".into()))?;
                operations.push(Operation::insert(
                    start.at,
                    vec![Token::Open(element.to_open(inline.id))],
                ));
            }
            _ => {}
        }
        Ok(operations)
    }

    fn delete_selection(&self, cursor: Cursor) -> Result<Vec<Operation>> {
        if cursor.is_collapsed() {
            return Ok(Vec::new());
        }
        self.delete_between(cursor.start(), cursor.end())
    }

    fn new_block(&mut self, text: &str) -> Vec<Token> {
        let block = Element::new(self.registry.default_block()).to_open(self.ids.next_id());
        let mut tokens = vec![Token::Open(block)];
        tokens.extend(self.new_inline(text));
        tokens.push(Token::Close);
        tokens
    }

    fn new_inline(&mut self, text: &str) -> Vec<Token> {
        let inline = Element::new(self.registry.default_inline()).to_open(self.ids.next_id());
        let mut tokens = vec![Token::Open(inline)];
        tokens.extend(Token::chars(text));
        tokens.push(Token::Close);
        tokens
    }

    fn insert_text(&mut self, cursor: Cursor, text: &str) -> Result<Transformation> {
        if text.is_empty() {
            return Ok(Transformation::empty());
        }
        let start = cursor.start();
        let mut operations = Vec::new();
        if self.model.blocks()?.is_empty() {
            operations.push(Operation::insert(0, self.new_block(text)));
        } else {
            let position = self.text_position(start)?;
            let tokens = if position.in_inline {
                Token::chars(text)
            } else {
                self.new_inline(text)
            };
            operations.push(Operation::insert(position.at, tokens));
        }
        operations.extend(self.delete_selection(cursor)?);
        let caret = start + text.chars().count();
        Ok(Transformation::new(operations).with_cursor(Cursor::collapsed(caret)))
    }

    fn delete_backward(&self, cursor: Cursor) -> Result<Transformation> {
        if !cursor.is_collapsed() {
            return Ok(Transformation::new(self.delete_selection(cursor)?)
                .with_cursor(Cursor::collapsed(cursor.start())));
        }
        let Some(previous) = cursor.head.checked_sub(1) else {
            return Ok(Transformation::empty());
        };
        let operations = self.delete_unit(previous)?;
        Ok(Transformation::new(operations).with_cursor(Cursor::collapsed(previous)))
    }

    fn delete_forward(&self, cursor: Cursor) -> Result<Transformation> {
        if !cursor.is_collapsed() {
            return Ok(Transformation::new(self.delete_selection(cursor)?)
                .with_cursor(Cursor::collapsed(cursor.start())));
        }
        if cursor.head >= self.max_caret()? {
            return Ok(Transformation::empty());
        }
        let operations = self.delete_unit(cursor.head)?;
        Ok(Transformation::new(operations).with_cursor(Cursor::collapsed(cursor.head)))
    }

    /// Deletes the render unit at `offset`: a character, or a line break,
    /// which joins its block with the next one.
    fn delete_unit(&self, offset: usize) -> Result<Vec<Operation>> {
        if self.is_line_break(offset)? {
            return self.delete_between(offset, offset + 1);
        }
        let at = self
            .render
            .convert_offset_to_model_offset(offset)?
            .ok_or_else(|| EditorError::Structure(format!("no character at offset {offset}")))?;
        Ok(vec![Operation::delete(at, at + 1)])
    }

    fn split_block(&mut self, cursor: Cursor) -> Result<Transformation> {
        let start = cursor.start();
        if self.model.blocks()?.is_empty() {
            let mut tokens = self.new_block("");
            tokens.extend(self.new_block(""));
            return Ok(Transformation::new(vec![Operation::insert(0, tokens)])
                .with_cursor(Cursor::collapsed(1)));
        }

        let position = self.text_position(start)?;
        let chain = self.model.resolve_position(position.at)?;
        let block = chain
            .get(1)
            .ok_or_else(|| EditorError::Structure("no block to split".into()))?;
        let block = self
            .model
            .kind(block.key)?
            .element()
            .cloned()
            .ok_or_else(|| EditorError::NotSplittable("document".into()))?;

        let mut tokens = Vec::new();
        match chain.get(2) {
            Some(inline) if position.in_inline => {
                let inline = self
                    .model
                    .kind(inline.key)?
                    .element()
                    .cloned()
                    .ok_or_else(|| EditorError::Structure("inline without element".into()))?;
                tokens.push(Token::Close);
                tokens.push(Token::Close);
                tokens.push(Token::Open(block.to_open(self.ids.next_id())));
                tokens.push(Token::Open(inline.to_open(self.ids.next_id())));
            }
            _ => {
                tokens.push(Token::Close);
                tokens.push(Token::Open(block.to_open(self.ids.next_id())));
            }
        }
        let mut operations = vec![Operation::insert(position.at, tokens)];
        operations.extend(self.delete_selection(cursor)?);
        Ok(Transformation::new(operations).with_cursor(Cursor::collapsed(start + 1)))
    }
}
