/*!
 * # quire engine
 *
 * Edit pipeline for a structured document editor.
 *
 * ## Architecture Overview
 *
 * ### 1. Single Source of Truth: the Token Buffer
 * - The document is a flat, well-nested stream of open-tag, close-tag and
 *   character tokens
 * - It only changes through `Insert`/`Delete` operations grouped into
 *   **Transformations**, which makes every edit exactly reversible
 *
 * ### 2. Three Derived Trees
 * - **Model**: document → block → inline, parsed from the buffer
 * - **Render**: the model with inline text cut into words and a line break
 *   closing every block
 * - **Layout**: document → page → block → line → inline → atom, packed to
 *   the page size by reflow
 *
 * ### 3. Incremental Propagation
 * - After an edit each tree rebuilds only the smallest damaged subtree and
 *   merges it into the live tree by keyed reconciliation on stable ids
 * - Layout then reflows only the lines and pages that changed
 *
 * ### 4. Undo with Coalescing
 * - Applied transformations are grouped into undo steps by time windows
 *
 * ## Module Structure
 *
 * - **`tree`**: arena tree with parent links and keyed `reconcile`
 * - **`tokens`**, **`operations`**, **`state`**: the buffer and its edit algebra
 * - **`model`**, **`render`**, **`layout`**: the derived trees
 * - **`position`**, **`cursor`**: offset resolution and caret state
 * - **`commands`**, **`history`**, **`editor`**: the editing surface
 *
 * ## Usage Pattern
 *
 * ```rust
 * use quire_engine::{Command, Cursor, Editor, TokenBuilder};
 *
 * let tokens = TokenBuilder::new().paragraph("ab").build();
 * let mut editor = Editor::new(tokens).unwrap();
 *
 * editor.dispatch(Command::SetCursor(Cursor::collapsed(1))).unwrap();
 * editor.dispatch(Command::InsertText("c".into())).unwrap();
 * assert_eq!(editor.render().text(), "acb¶");
 *
 * editor.undo().unwrap();
 * assert_eq!(editor.render().text(), "ab¶");
 * ```
 */

pub mod commands;
pub mod cursor;
pub mod editor;
pub mod error;
pub mod history;
pub mod ids;
pub mod layout;
pub mod model;
pub mod operations;
pub mod position;
pub mod registry;
pub mod render;
pub mod state;
pub mod tokens;
pub mod tree;

// Re-export key types for easier usage
pub use commands::{Command, CommandContext};
pub use cursor::Cursor;
pub use editor::{Editor, LayoutObserver};
pub use error::{EditorError, Result};
pub use history::{Change, History};
pub use ids::{IdGenerator, NodeId};
pub use layout::{LayoutTree, LayoutUpdate, MonospaceMeasurer, PageRect, Rect, ReflowStats, TextMeasurer};
pub use model::{ModelTree, ModelUpdate};
pub use operations::{AppliedTransformation, Operation, StateUpdate, Transformation};
pub use position::{ChainLink, PositionChain};
pub use registry::{NodeRegistry, NodeSpec, Role};
pub use render::{RenderTree, RenderUpdate};
pub use state::{EditorState, TokenBuffer};
pub use tokens::{OpenTag, Token, TokenBuilder};
