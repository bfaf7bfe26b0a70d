use std::rc::Rc;
use std::time::Instant;

use log::{debug, error, warn};
use quire_config::{Config, HistorySettings, PageSettings};

use crate::commands::{Command, CommandContext};
use crate::cursor::Cursor;
use crate::error::Result;
use crate::history::{Change, History};
use crate::ids::IdGenerator;
use crate::layout::{LayoutTree, LayoutUpdate, MonospaceMeasurer, TextMeasurer};
use crate::model::ModelTree;
use crate::operations::{StateUpdate, Transformation};
use crate::registry::NodeRegistry;
use crate::render::RenderTree;
use crate::state::{EditorState, TokenBuffer};
use crate::tokens::{Token, open_ids};

/// Receives every layout update, after the layout has absorbed it.
pub trait LayoutObserver {
    fn layout_updated(&mut self, update: &LayoutUpdate);
}

impl<F: FnMut(&LayoutUpdate)> LayoutObserver for F {
    fn layout_updated(&mut self, update: &LayoutUpdate) {
        self(update)
    }
}

/// Owns the token buffer, the three derived trees and the undo history,
/// and keeps them in sync.
pub struct Editor {
    state: EditorState,
    model: ModelTree,
    render: RenderTree,
    layout: LayoutTree,
    history: History,
    ids: IdGenerator,
    registry: Rc<NodeRegistry>,
    observers: Vec<Box<dyn LayoutObserver>>,
    version: u64,
}

impl Editor {
    /// Editor over `tokens` with the default configuration.
    pub fn new(tokens: Vec<Token>) -> Result<Self> {
        Self::with_config(tokens, &Config::default())
    }

    pub fn with_config(tokens: Vec<Token>, config: &Config) -> Result<Self> {
        Self::with_parts(
            tokens,
            config.page,
            NodeRegistry::from_typography(&config.typography),
            Box::new(MonospaceMeasurer::from_typography(&config.typography)),
            &config.history,
        )
    }

    pub fn with_parts(
        tokens: Vec<Token>,
        page: PageSettings,
        registry: NodeRegistry,
        measurer: Box<dyn TextMeasurer>,
        history: &HistorySettings,
    ) -> Result<Self> {
        let registry = Rc::new(registry);
        let mut ids = IdGenerator::after(open_ids(&tokens));
        let buffer = TokenBuffer::new(tokens)?;
        let model = ModelTree::build(buffer.tokens(), &registry)?;
        let render = RenderTree::build(&model, &mut ids)?;
        let layout = LayoutTree::build(&render, page, Rc::clone(&registry), measurer, &mut ids)?;
        debug!(
            "editor: opened {} token(s) on {} page(s)",
            buffer.len(),
            layout.pages()?.len()
        );

        let mut state = EditorState::new(buffer);
        state.cursor = Some(Cursor::collapsed(0));
        Ok(Self {
            state,
            model,
            render,
            layout,
            history: History::new(history),
            ids,
            registry,
            observers: Vec::new(),
            version: 0,
        })
    }

    pub fn tokens(&self) -> &[Token] {
        self.state.buffer.tokens()
    }

    pub fn cursor(&self) -> Option<Cursor> {
        self.state.cursor
    }

    pub fn state(&self) -> &EditorState {
        &self.state
    }

    pub fn model(&self) -> &ModelTree {
        &self.model
    }

    pub fn render(&self) -> &RenderTree {
        &self.render
    }

    pub fn layout(&self) -> &LayoutTree {
        &self.layout
    }

    pub fn history(&self) -> &History {
        &self.history
    }

    pub fn registry(&self) -> &NodeRegistry {
        &self.registry
    }

    /// Bumped by every edit, undo and redo that changed tokens.
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn subscribe(&mut self, observer: impl LayoutObserver + 'static) {
        self.observers.push(Box::new(observer));
    }

    pub fn dispatch(&mut self, command: Command) -> Result<Option<LayoutUpdate>> {
        self.dispatch_at(command, Instant::now())
    }

    /// Compiles `command` against the current trees and applies it as if
    /// it happened at `now` (which only matters for undo coalescing).
    pub fn dispatch_at(&mut self, command: Command, now: Instant) -> Result<Option<LayoutUpdate>> {
        let mut ctx = CommandContext {
            cursor: self.state.cursor,
            model: &self.model,
            render: &self.render,
            layout: &self.layout,
            registry: &self.registry,
            ids: &mut self.ids,
        };
        let transformation = command.compile(&mut ctx)?;
        self.apply_at(&transformation, now)
    }

    /// Applies `transformation` and runs the edit pipeline.
    ///
    /// ## Pipeline
    ///
    /// 1. The token buffer applies the operations and reports the touched span
    /// 2. The model re-parses the smallest node enclosing that span
    /// 3. The render tree mirrors the rebuilt model subtree
    /// 4. The layout rebuilds the affected block and reflows lines and pages
    /// 5. Observers are notified and the history records the transformation
    ///
    /// If any stage rejects the edit, the buffer is rolled back, the trees
    /// are rebuilt from it and the error is returned.
    pub fn apply_at(&mut self, transformation: &Transformation, now: Instant) -> Result<Option<LayoutUpdate>> {
        if transformation.is_empty() {
            return Ok(None);
        }
        let applied = self.state.apply(transformation)?;
        let Some(update) = applied.update.clone() else {
            // caret moved without an edit: typing after it starts a new undo step
            self.history.seal();
            return Ok(None);
        };

        match self.propagate(&update) {
            Ok(layout_update) => {
                self.version += 1;
                self.history.record(applied, now);
                Ok(Some(layout_update))
            }
            Err(err) => {
                warn!("editor: rolling back edit: {err}");
                self.state.unapply(&applied)?;
                self.resync()?;
                Err(err)
            }
        }
    }

    /// Reverts the last undo step. Returns false when there is none.
    pub fn undo(&mut self) -> Result<bool> {
        let Some(change) = self.history.undo_target().cloned() else {
            return Ok(false);
        };
        if let Err(err) = self.revert(&change) {
            warn!("editor: undo failed, rebuilding trees: {err}");
            self.resync()?;
            return Err(err);
        }
        self.state.cursor = change.cursor_before();
        self.history.step_back();
        self.version += 1;
        debug!("editor: undid {} transformation(s)", change.len());
        Ok(true)
    }

    /// Re-applies the last undone step. Returns false when there is none.
    pub fn redo(&mut self) -> Result<bool> {
        let Some(change) = self.history.redo_target().cloned() else {
            return Ok(false);
        };
        if let Err(err) = self.replay(&change) {
            warn!("editor: redo failed, rebuilding trees: {err}");
            self.resync()?;
            return Err(err);
        }
        self.state.cursor = change.cursor_after();
        self.history.step_forward();
        self.version += 1;
        debug!("editor: redid {} transformation(s)", change.len());
        Ok(true)
    }

    /// Reverts every transformation of `change`, last first. On failure
    /// the buffer is rolled forward to where it was, so the change stays
    /// undoable; the trees are left for the caller to resync.
    fn revert(&mut self, change: &Change) -> Result<()> {
        let transformations = change.transformations();
        let mut reverted = 0;
        for applied in transformations.iter().rev() {
            let step = match self.state.unapply(applied) {
                Ok(update) => {
                    reverted += 1;
                    self.propagate_state(update)
                }
                Err(err) => Err(err),
            };
            if let Err(err) = step {
                for applied in &transformations[transformations.len() - reverted..] {
                    if let Err(rollback) = self.state.replay(applied) {
                        error!("editor: could not restore the buffer after a failed undo: {rollback}");
                        break;
                    }
                }
                return Err(err);
            }
        }
        Ok(())
    }

    /// Replays every transformation of `change` in order, rolling the
    /// buffer back on failure.
    fn replay(&mut self, change: &Change) -> Result<()> {
        let transformations = change.transformations();
        let mut replayed = 0;
        for applied in transformations {
            let step = match self.state.replay(applied) {
                Ok(update) => {
                    replayed += 1;
                    self.propagate_state(update)
                }
                Err(err) => Err(err),
            };
            if let Err(err) = step {
                for applied in transformations[..replayed].iter().rev() {
                    if let Err(rollback) = self.state.unapply(applied) {
                        error!("editor: could not restore the buffer after a failed redo: {rollback}");
                        break;
                    }
                }
                return Err(err);
            }
        }
        Ok(())
    }

    fn propagate_state(&mut self, update: Option<StateUpdate>) -> Result<()> {
        if let Some(update) = update {
            self.propagate(&update)?;
        }
        Ok(())
    }

    /// Changes the page size and reflows everything.
    pub fn resize(&mut self, width: f32, height: f32) -> Result<LayoutUpdate> {
        let update = self.layout.resize(width, height, &mut self.ids)?;
        self.notify(&update);
        Ok(update)
    }

    fn propagate(&mut self, update: &StateUpdate) -> Result<LayoutUpdate> {
        let model_update = self
            .model
            .rebuild(self.state.buffer.tokens(), update, &self.registry)?;
        let render_update = self
            .render
            .on_model_updated(&self.model, &model_update, &mut self.ids)?;
        let layout_update = self
            .layout
            .on_render_updated(&self.render, &render_update, &mut self.ids)?;
        self.notify(&layout_update);
        Ok(layout_update)
    }

    /// Rebuilds every tree from the buffer.
    fn resync(&mut self) -> Result<()> {
        let model_update = self
            .model
            .rebuild_all(self.state.buffer.tokens(), &self.registry)?;
        self.render
            .on_model_updated(&self.model, &model_update, &mut self.ids)?;
        let layout_update = self.layout.rebuild_all(&self.render, &mut self.ids)?;
        self.notify(&layout_update);
        Ok(())
    }

    fn notify(&mut self, update: &LayoutUpdate) {
        for observer in &mut self.observers {
            observer.layout_updated(update);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EditorError;
    use crate::ids::NodeId;
    use crate::operations::Operation;
    use crate::tokens::{TokenBuilder, debug_string};
    use pretty_assertions::assert_eq;
    use quire_config::Padding;
    use std::cell::RefCell;
    use std::time::Duration;

    fn editor(tokens: Vec<Token>, width: f32, height: f32) -> Editor {
        Editor::with_parts(
            tokens,
            PageSettings {
                width,
                height,
                padding: Padding::default(),
            },
            NodeRegistry::with_block_spacing(0.0),
            Box::new(MonospaceMeasurer::new(1.0, 10.0)),
            &HistorySettings::default(),
        )
        .unwrap()
    }

    fn type_text(editor: &mut Editor, text: &str, at: Instant) {
        editor
            .dispatch_at(Command::InsertText(text.into()), at)
            .unwrap();
    }

    #[test]
    fn test_insert_then_delete_restores_text() {
        let mut editor = editor(TokenBuilder::new().paragraph("ab").build(), 100.0, 100.0);
        editor.dispatch(Command::SetCursor(Cursor::collapsed(1))).unwrap();

        editor.dispatch(Command::InsertText("c".into())).unwrap();
        assert_eq!(debug_string(editor.tokens()), "<paragraph#1><text#2>acb</></>");
        assert_eq!(editor.render().text(), "acb¶");
        assert_eq!(editor.render().convert_offset_to_model_offset(2).unwrap(), Some(4));
        assert_eq!(editor.layout().line_texts().unwrap(), vec!["acb"]);

        editor.dispatch(Command::DeleteBackward).unwrap();
        assert_eq!(debug_string(editor.tokens()), "<paragraph#1><text#2>ab</></>");
        assert_eq!(editor.cursor(), Some(Cursor::collapsed(1)));
    }

    #[test]
    fn test_quick_keystrokes_undo_together() {
        let start = Instant::now();
        let mut editor = editor(TokenBuilder::new().paragraph("").build(), 100.0, 100.0);
        type_text(&mut editor, "a", start);
        type_text(&mut editor, "b", start + Duration::from_millis(150));
        type_text(&mut editor, "c", start + Duration::from_secs(3));
        assert_eq!(editor.render().text(), "abc¶");

        assert!(editor.undo().unwrap());
        assert_eq!(editor.render().text(), "ab¶");
        assert_eq!(editor.cursor(), Some(Cursor::collapsed(2)));

        assert!(editor.undo().unwrap());
        assert_eq!(editor.render().text(), "¶");
        assert_eq!(editor.cursor(), Some(Cursor::collapsed(0)));
        assert!(!editor.undo().unwrap());
    }

    #[test]
    fn test_redo_replays_and_restores_cursor() {
        let start = Instant::now();
        let mut editor = editor(TokenBuilder::new().paragraph("").build(), 100.0, 100.0);
        type_text(&mut editor, "hi", start);
        editor.dispatch_at(Command::SplitBlock, start + Duration::from_secs(5)).unwrap();
        let after = debug_string(editor.tokens());

        editor.undo().unwrap();
        editor.undo().unwrap();
        assert!(editor.history().can_redo());
        assert!(editor.redo().unwrap());
        assert!(editor.redo().unwrap());
        assert!(!editor.redo().unwrap());

        assert_eq!(debug_string(editor.tokens()), after);
        assert_eq!(editor.cursor(), Some(Cursor::collapsed(3)));
        assert_eq!(editor.layout().line_texts().unwrap(), vec!["hi", ""]);
    }

    #[test]
    fn test_failed_edit_rolls_back() {
        let mut editor = editor(TokenBuilder::new().paragraph("ab").build(), 100.0, 100.0);
        let before = editor.tokens().to_vec();
        // drops the paragraph's open tag: unbalanced stream
        let broken = Transformation::new(vec![Operation::delete(0, 1)]);

        let err = editor.apply_at(&broken, Instant::now()).unwrap_err();

        assert!(matches!(err, EditorError::Malformed(_) | EditorError::Structure(_)));
        assert_eq!(editor.tokens(), before.as_slice());
        assert_eq!(editor.render().text(), "ab¶");
        assert!(!editor.history().can_undo());
        assert_eq!(editor.version(), 0);
    }

    #[test]
    fn test_failed_undo_keeps_change_undoable() {
        let start = Instant::now();
        let mut editor = editor(TokenBuilder::new().paragraph("").build(), 100.0, 100.0);
        type_text(&mut editor, "a", start);
        type_text(&mut editor, "b", start + Duration::from_millis(100));
        assert_eq!(editor.history().len(), 1);
        let typed = editor.tokens().to_vec();

        // "b" can still be taken out, the "a" under it cannot
        let tampered: Vec<Token> = typed
            .iter()
            .map(|token| match token {
                Token::Char('a') => Token::Char('z'),
                other => other.clone(),
            })
            .collect();
        editor.state.buffer = TokenBuffer::new(tampered.clone()).unwrap();

        assert!(editor.undo().is_err());
        assert_eq!(editor.tokens(), tampered.as_slice());
        assert_eq!(editor.render().text(), "zb¶");
        assert!(editor.history().can_undo());

        editor.state.buffer = TokenBuffer::new(typed).unwrap();
        editor.resync().unwrap();
        assert!(editor.undo().unwrap());
        assert_eq!(editor.render().text(), "¶");
        assert_eq!(editor.cursor(), Some(Cursor::collapsed(0)));
    }

    #[test]
    fn test_out_of_range_edit_rejected() {
        let mut editor = editor(TokenBuilder::new().paragraph("ab").build(), 100.0, 100.0);
        let err = editor
            .apply_at(&Transformation::new(vec![Operation::delete(3, 40)]), Instant::now())
            .unwrap_err();
        assert!(matches!(err, EditorError::RangeOutOfRange { .. }));
        assert_eq!(editor.render().text(), "ab¶");
    }

    #[test]
    fn test_observers_see_layout_updates() {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let mut editor = editor(TokenBuilder::new().paragraph("aa").build(), 3.0, 20.0);
        let sink = Rc::clone(&seen);
        editor.subscribe(move |update: &LayoutUpdate| sink.borrow_mut().push(update.pages));

        editor.dispatch(Command::SetCursor(Cursor::collapsed(2))).unwrap();
        // cursor moves reach no tree
        assert!(seen.borrow().is_empty());

        // "aa bb cc" wraps into three lines: two pages
        editor.dispatch(Command::InsertText(" bb cc".into())).unwrap();
        editor.resize(100.0, 100.0).unwrap();

        assert_eq!(*seen.borrow(), vec![2, 1]);
    }

    #[test]
    fn test_typing_reflows_incrementally() {
        let tokens = TokenBuilder::new().paragraph("one").paragraph("two").build();
        let mut editor = editor(tokens, 8.0, 100.0);
        editor.dispatch(Command::SetCursor(Cursor::collapsed(3))).unwrap();

        let update = editor
            .dispatch(Command::InsertText(" more words".into()))
            .unwrap()
            .unwrap();

        assert_eq!(update.id, NodeId(1));
        assert!(update.stats.breaks > 0);
        assert_eq!(
            editor.layout().line_texts().unwrap(),
            vec!["one more ", "words", "two"]
        );
        assert_eq!(editor.version(), 1);
    }
}
