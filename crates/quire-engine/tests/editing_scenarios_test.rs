//! End-to-end editing sessions through the public [`Editor`] surface.

use std::cell::RefCell;
use std::rc::Rc;
use std::time::{Duration, Instant};

use pretty_assertions::assert_eq;
use quire_config::{Config, HistorySettings, Padding, PageSettings};
use quire_engine::tokens::debug_string;
use quire_engine::{
    Command, Cursor, Editor, LayoutUpdate, MonospaceMeasurer, NodeRegistry, Token, TokenBuilder,
};
use rstest::rstest;
use tempfile::TempDir;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// One unit per character, ten per line, no block spacing or margins.
fn editor(tokens: Vec<Token>, width: f32) -> Editor {
    init_logging();
    Editor::with_parts(
        tokens,
        PageSettings {
            width,
            height: 1000.0,
            padding: Padding::default(),
        },
        NodeRegistry::with_block_spacing(0.0),
        Box::new(MonospaceMeasurer::new(1.0, 10.0)),
        &HistorySettings::default(),
    )
    .unwrap()
}

#[test]
fn test_type_then_undo_and_redo() {
    let tokens = TokenBuilder::new().paragraph("ab").build();
    let mut editor = editor(tokens.clone(), 100.0);

    editor.dispatch(Command::SetCursor(Cursor::collapsed(1))).unwrap();
    editor.dispatch(Command::InsertText("c".into())).unwrap();
    assert_eq!(editor.render().text(), "acb¶");
    assert_eq!(editor.cursor(), Some(Cursor::collapsed(2)));

    assert!(editor.undo().unwrap());
    assert_eq!(editor.tokens(), tokens.as_slice());
    assert_eq!(editor.render().text(), "ab¶");
    assert_eq!(editor.cursor(), Some(Cursor::collapsed(1)));

    assert!(editor.redo().unwrap());
    assert_eq!(editor.render().text(), "acb¶");
    assert_eq!(editor.cursor(), Some(Cursor::collapsed(2)));
    assert!(!editor.redo().unwrap());
}

// 95 units of word plus a space, then a 10 unit word, on a 100 unit page.
// Each forward delete shortens the first word by one unit.
#[rstest]
#[case::no_deletes(0, false)]
#[case::still_one_too_wide(5, false)]
#[case::fits_exactly(6, true)]
fn test_long_word_pushes_next_word_down(#[case] deletes: usize, #[case] joined: bool) {
    let text = format!("{} {}", "a".repeat(95), "b".repeat(10));
    let mut editor = editor(TokenBuilder::new().paragraph(&text).build(), 100.0);

    for _ in 0..deletes {
        editor.dispatch(Command::DeleteForward).unwrap();
    }

    let first = format!("{} ", "a".repeat(95 - deletes));
    let expected = if joined {
        vec![format!("{first}{}", "b".repeat(10))]
    } else {
        vec![first, "b".repeat(10)]
    };
    assert_eq!(editor.layout().line_texts().unwrap(), expected);
}

#[test]
fn test_quick_keystrokes_undo_together() {
    let mut editor = editor(TokenBuilder::new().paragraph("").build(), 100.0);
    let start = Instant::now();

    editor.dispatch_at(Command::InsertText("a".into()), start).unwrap();
    editor
        .dispatch_at(Command::InsertText("b".into()), start + Duration::from_millis(200))
        .unwrap();
    editor
        .dispatch_at(Command::InsertText("c".into()), start + Duration::from_millis(3200))
        .unwrap();
    assert_eq!(editor.render().text(), "abc¶");
    assert_eq!(editor.history().len(), 2);

    assert!(editor.undo().unwrap());
    assert_eq!(editor.render().text(), "ab¶");
    assert!(editor.undo().unwrap());
    assert_eq!(editor.render().text(), "¶");
    assert!(!editor.undo().unwrap());
}

#[test]
fn test_split_then_undo() {
    let tokens = TokenBuilder::new().paragraph("hello world").build();
    let mut editor = editor(tokens.clone(), 100.0);

    editor.dispatch(Command::SetCursor(Cursor::collapsed(5))).unwrap();
    editor.dispatch(Command::SplitBlock).unwrap();

    assert_eq!(editor.render().text(), "hello¶ world¶");
    assert_eq!(editor.model().blocks().unwrap().len(), 2);
    assert_eq!(editor.cursor(), Some(Cursor::collapsed(6)));

    assert!(editor.undo().unwrap());
    assert_eq!(debug_string(editor.tokens()), debug_string(&tokens));
    assert_eq!(editor.layout().line_texts().unwrap(), vec!["hello world"]);
}

#[test]
fn test_select_all_and_replace() {
    let tokens = TokenBuilder::new()
        .paragraph("first")
        .open("paragraph")
        .close()
        .paragraph("third")
        .build();
    let mut editor = editor(tokens, 100.0);

    editor.dispatch(Command::SelectAll).unwrap();
    editor.dispatch(Command::InsertText("x".into())).unwrap();

    assert_eq!(editor.render().text(), "x¶");
    assert_eq!(
        debug_string(editor.tokens()),
        "<paragraph#1><text#2>x</></>"
    );
}

#[test]
fn test_observers_follow_every_edit() {
    let mut editor = editor(TokenBuilder::new().paragraph("one two").build(), 100.0);
    let seen: Rc<RefCell<Vec<LayoutUpdate>>> = Rc::default();
    let sink = Rc::clone(&seen);
    editor.subscribe(move |update: &LayoutUpdate| sink.borrow_mut().push(*update));

    editor.dispatch(Command::InsertText("x".into())).unwrap();
    editor.dispatch(Command::MoveRight { extend: false }).unwrap();
    editor.undo().unwrap();

    // cursor moves do not touch the layout
    assert_eq!(seen.borrow().len(), 2);
    assert!(seen.borrow().iter().all(|update| update.pages == 1));
}

#[test]
fn test_editor_from_config_file() {
    init_logging();
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("config.toml");
    std::fs::write(
        &path,
        r#"
[page]
width = 120.0
height = 400.0

[page.padding]
top = 10.0
right = 10.0
bottom = 10.0
left = 10.0

[typography]
char_width = 10.0
line_height = 20.0
block_spacing = 0.0

[history]
idle_threshold_ms = 50
"#,
    )
    .unwrap();

    let config = Config::load_from_path(&path).unwrap().unwrap();
    assert_eq!(config.history.max_changes, HistorySettings::default().max_changes);

    let tokens = TokenBuilder::new().paragraph("hello world again").build();
    let mut editor = Editor::with_config(tokens, &config).unwrap();

    // 100 units of inner width, ten per character
    assert_eq!(
        editor.layout().line_texts().unwrap(),
        vec!["hello ", "world ", "again"]
    );
    let rect = editor.layout().caret_rect(0).unwrap();
    assert_eq!((rect.page, rect.rect.left, rect.rect.top), (0, 10.0, 10.0));

    editor.resize(220.0, 400.0).unwrap();
    assert_eq!(
        editor.layout().line_texts().unwrap(),
        vec!["hello world again"]
    );
}
