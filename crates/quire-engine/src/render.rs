//! # Render tree
//!
//! Presentation projection of the model. Blocks and inlines are copied
//! with their ids, inline text is exploded into word atoms and every block
//! ends with a synthetic line-break atom.
//!
//! Render offsets count one position per character plus one per line
//! break. Tags take no render positions. A node owns the half-open range
//! `[start, start + size)`, so a caret at offset `o` sits right before the
//! atom holding position `o`.

use std::fmt::Write as _;

use log::debug;

use crate::error::{EditorError, Result};
use crate::ids::{IdGenerator, NodeId};
use crate::model::{Element, ModelKind, ModelTree, ModelUpdate};
use crate::position::PositionChain;
use crate::tree::{NodeKey, Tree};

/// A run of non-whitespace followed by the whitespace after it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Word {
    pub text: String,
    /// The run ends in whitespace, so a line may end after it.
    pub breakable: bool,
}

impl Word {
    pub fn len(&self) -> usize {
        self.text.chars().count()
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }
}

pub fn is_break_whitespace(c: char) -> bool {
    matches!(c, ' ' | '\n' | '\t')
}

/// Splits `text` into words. Concatenating the result gives back `text`.
pub fn segment_words(text: &str) -> Vec<Word> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut in_trailing_space = false;
    for c in text.chars() {
        let space = is_break_whitespace(c);
        if !space && in_trailing_space {
            words.push(Word {
                text: std::mem::take(&mut current),
                breakable: true,
            });
            in_trailing_space = false;
        }
        in_trailing_space |= space;
        current.push(c);
    }
    if !current.is_empty() {
        words.push(Word {
            text: current,
            breakable: in_trailing_space,
        });
    }
    words
}

#[derive(Debug, Clone, PartialEq)]
pub enum RenderKind {
    Document,
    Block(Element),
    Inline(Element),
    Word(Word),
    /// End-of-block marker: one render position, no model position.
    LineBreak,
}

impl RenderKind {
    pub fn is_atomic(&self) -> bool {
        matches!(self, RenderKind::Word(_) | RenderKind::LineBreak)
    }

    fn model_content_start(&self) -> usize {
        match self {
            RenderKind::Block(_) | RenderKind::Inline(_) => 1,
            _ => 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderUpdate {
    pub id: NodeId,
    pub key: NodeKey,
}

#[derive(Debug)]
pub struct RenderTree {
    tree: Tree<RenderKind>,
}

impl RenderTree {
    pub fn build(model: &ModelTree, ids: &mut IdGenerator) -> Result<Self> {
        let tree = build_subtree(model, model.root(), ids)?;
        Ok(Self { tree })
    }

    pub fn tree(&self) -> &Tree<RenderKind> {
        &self.tree
    }

    pub fn root(&self) -> NodeKey {
        self.tree.root()
    }

    pub fn kind(&self, key: NodeKey) -> Result<&RenderKind> {
        self.tree.data(key)
    }

    pub fn blocks(&self) -> Result<&[NodeKey]> {
        self.tree.children(self.tree.root())
    }

    /// Render positions spanned by `key`. Memoized.
    pub fn size(&self, key: NodeKey) -> Result<usize> {
        let metrics = self.tree.metrics(key)?;
        if let Some(size) = metrics.size() {
            return Ok(size);
        }
        let size = match self.tree.data(key)? {
            RenderKind::Word(word) => word.len(),
            RenderKind::LineBreak => 1,
            _ => self
                .tree
                .children(key)?
                .iter()
                .map(|&child| self.size(child))
                .sum::<Result<usize>>()?,
        };
        metrics.set_size(size);
        Ok(size)
    }

    /// Model positions spanned by `key`. Memoized.
    pub fn model_size(&self, key: NodeKey) -> Result<usize> {
        let metrics = self.tree.metrics(key)?;
        if let Some(size) = metrics.model_size() {
            return Ok(size);
        }
        let kind = self.tree.data(key)?;
        let size = match kind {
            RenderKind::Word(word) => word.len(),
            RenderKind::LineBreak => 0,
            _ => {
                let content = self
                    .tree
                    .children(key)?
                    .iter()
                    .map(|&child| self.model_size(child))
                    .sum::<Result<usize>>()?;
                content + 2 * kind.model_content_start()
            }
        };
        metrics.set_model_size(size);
        Ok(size)
    }

    /// Absolute render offset where `key` starts.
    pub fn start_offset(&self, key: NodeKey) -> Result<usize> {
        let Some(parent) = self.tree.parent(key)? else {
            return Ok(0);
        };
        let mut offset = self.start_offset(parent)?;
        for &sibling in self.tree.children(parent)? {
            if sibling == key {
                return Ok(offset);
            }
            offset += self.size(sibling)?;
        }
        Err(EditorError::StaleKey)
    }

    pub fn resolve_position(&self, offset: usize) -> Result<PositionChain> {
        let len = self.size(self.root())?;
        if offset > len {
            return Err(EditorError::OffsetOutOfRange { offset, len });
        }
        PositionChain::resolve(&self.tree, offset, |tree, key, local| {
            let mut start = 0;
            for &child in tree.children(key)? {
                let size = self.size(child)?;
                if local < start + size {
                    return Ok(Some((child, local - start)));
                }
                start += size;
            }
            Ok(None)
        })
    }

    /// Translates a render offset to the buffer index of the character it
    /// sits before. Line breaks have no token and yield `None`. The end of
    /// the document maps to the end of the buffer.
    pub fn convert_offset_to_model_offset(&self, offset: usize) -> Result<Option<usize>> {
        let len = self.size(self.root())?;
        if offset > len {
            return Err(EditorError::OffsetOutOfRange { offset, len });
        }
        let mut key = self.root();
        let mut local = offset;
        let mut model = 0;
        'descend: loop {
            let kind = self.tree.data(key)?;
            match kind {
                RenderKind::Word(_) => return Ok(Some(model + local)),
                RenderKind::LineBreak => return Ok(None),
                _ => {}
            }
            model += kind.model_content_start();
            for &child in self.tree.children(key)? {
                let size = self.size(child)?;
                if local < size {
                    key = child;
                    continue 'descend;
                }
                local -= size;
                model += self.model_size(child)?;
            }
            return Ok(Some(model));
        }
    }

    /// Translates a buffer index to the nearest render offset at or after
    /// it. Positions on tags snap to the next character or line break.
    pub fn convert_model_offset_to_offset(&self, model_offset: usize) -> Result<usize> {
        let len = self.model_size(self.root())?;
        if model_offset > len {
            return Err(EditorError::OffsetOutOfRange {
                offset: model_offset,
                len,
            });
        }
        self.model_to_render(self.root(), model_offset)
    }

    fn model_to_render(&self, key: NodeKey, model_local: usize) -> Result<usize> {
        let kind = self.tree.data(key)?;
        if let RenderKind::Word(word) = kind {
            return Ok(model_local.min(word.len()));
        }
        let mut remaining = model_local.saturating_sub(kind.model_content_start());
        let mut render = 0;
        for &child in self.tree.children(key)? {
            if matches!(self.tree.data(child)?, RenderKind::LineBreak) {
                return Ok(render);
            }
            let model_size = self.model_size(child)?;
            if remaining < model_size {
                return Ok(render + self.model_to_render(child, remaining)?);
            }
            remaining -= model_size;
            render += self.size(child)?;
        }
        Ok(render)
    }

    /// Mirrors the model subtree named by `update`, then reconciles it
    /// into the live tree. Atoms are always rebuilt with fresh ids.
    pub fn on_model_updated(
        &mut self,
        model: &ModelTree,
        update: &ModelUpdate,
        ids: &mut IdGenerator,
    ) -> Result<RenderUpdate> {
        let (live, source) = match self.tree.find(update.id) {
            Some(live) => (live, update.key),
            None => (self.tree.root(), model.root()),
        };
        let fresh = build_subtree(model, source, ids)?;
        let stats = self.tree.reconcile(live, &fresh, fresh.root())?;
        let id = self.tree.id(live)?;
        debug!(
            "render: rebuilt {id} ({} matched, {} inserted, {} removed)",
            stats.matched, stats.inserted, stats.removed
        );
        Ok(RenderUpdate { id, key: live })
    }

    /// Concatenated text of all words, a `¶` standing for each line break.
    pub fn text(&self) -> String {
        let mut out = String::new();
        if let Ok(keys) = self.tree.descendants(self.root()) {
            for key in keys {
                match self.tree.data(key) {
                    Ok(RenderKind::Word(word)) => out.push_str(&word.text),
                    Ok(RenderKind::LineBreak) => out.push('¶'),
                    _ => {}
                }
            }
        }
        out
    }

    pub fn dump(&self) -> String {
        let mut out = String::new();
        if let Ok(keys) = self.tree.descendants(self.root()) {
            for key in keys {
                let (Ok(depth), Ok(kind), Ok(id)) =
                    (self.tree.depth(key), self.tree.data(key), self.tree.id(key))
                else {
                    continue;
                };
                let indent = "  ".repeat(depth);
                let _ = match kind {
                    RenderKind::Document => writeln!(out, "{indent}document"),
                    RenderKind::Block(e) | RenderKind::Inline(e) => {
                        writeln!(out, "{indent}{}{id}", e.tag)
                    }
                    RenderKind::Word(word) => writeln!(out, "{indent}word {:?}", word.text),
                    RenderKind::LineBreak => writeln!(out, "{indent}linebreak"),
                };
            }
        }
        out
    }
}

/// Render subtree for the model node at `key`.
fn build_subtree(model: &ModelTree, key: NodeKey, ids: &mut IdGenerator) -> Result<Tree<RenderKind>> {
    let node = model.tree().node(key)?;
    let kind = render_kind(node.data());
    let mut tree = Tree::new(node.id(), kind);
    let root = tree.root();
    fill(model, key, &mut tree, root, ids)?;
    Ok(tree)
}

fn render_kind(kind: &ModelKind) -> RenderKind {
    match kind {
        ModelKind::Document => RenderKind::Document,
        ModelKind::Block(element) => RenderKind::Block(element.clone()),
        ModelKind::Inline { element, .. } => RenderKind::Inline(element.clone()),
    }
}

fn fill(
    model: &ModelTree,
    model_key: NodeKey,
    tree: &mut Tree<RenderKind>,
    parent: NodeKey,
    ids: &mut IdGenerator,
) -> Result<()> {
    let node = model.tree().node(model_key)?;
    match node.data() {
        ModelKind::Inline { text, .. } => {
            for word in segment_words(text) {
                tree.push_child(parent, ids.next_id(), RenderKind::Word(word))?;
            }
        }
        ModelKind::Block(_) | ModelKind::Document => {
            for &child in node.children() {
                let child_node = model.tree().node(child)?;
                let key = tree.push_child(parent, child_node.id(), render_kind(child_node.data()))?;
                fill(model, child, tree, key, ids)?;
            }
            if matches!(node.data(), ModelKind::Block(_)) {
                tree.push_child(parent, ids.next_id(), RenderKind::LineBreak)?;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::NodeRegistry;
    use crate::tokens::{Token, TokenBuilder, open_ids};
    use insta::assert_snapshot;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    fn render_of(tokens: &[Token]) -> (ModelTree, RenderTree, IdGenerator) {
        let model = ModelTree::build(tokens, &NodeRegistry::default()).unwrap();
        let mut ids = IdGenerator::after(open_ids(tokens));
        let render = RenderTree::build(&model, &mut ids).unwrap();
        (model, render, ids)
    }

    #[rstest]
    #[case("", vec![])]
    #[case("ab", vec![("ab", false)])]
    #[case("ab cd", vec![("ab ", true), ("cd", false)])]
    #[case("ab  cd ", vec![("ab  ", true), ("cd ", true)])]
    #[case(" x", vec![(" ", true), ("x", false)])]
    #[case("a\tb\nc", vec![("a\t", true), ("b\n", true), ("c", false)])]
    fn test_segment_words(#[case] text: &str, #[case] expected: Vec<(&str, bool)>) {
        let words: Vec<(String, bool)> = segment_words(text)
            .into_iter()
            .map(|w| (w.text, w.breakable))
            .collect();
        let expected: Vec<(String, bool)> = expected
            .into_iter()
            .map(|(t, b)| (t.to_string(), b))
            .collect();
        assert_eq!(words, expected);
    }

    #[test]
    fn test_build_dump() {
        let tokens = TokenBuilder::new()
            .paragraph("hello big world")
            .paragraph("")
            .build();
        let (_, render, _) = render_of(&tokens);

        assert_snapshot!(render.dump(), @r#"
        document
          paragraph#1
            text#2
              word "hello "
              word "big "
              word "world"
            linebreak
          paragraph#3
            text#4
            linebreak
        "#);
        assert_eq!(render.text(), "hello big world¶¶");
    }

    #[test]
    fn test_sizes() {
        let tokens = TokenBuilder::new().paragraph("ab cd").paragraph("e").build();
        let (model, render, _) = render_of(&tokens);
        let blocks = render.blocks().unwrap().to_vec();

        assert_eq!(render.size(render.root()).unwrap(), 8);
        assert_eq!(render.size(blocks[0]).unwrap(), 6);
        assert_eq!(render.start_offset(blocks[1]).unwrap(), 6);
        assert_eq!(render.model_size(render.root()).unwrap(), model.size(model.root()).unwrap());
        assert_eq!(render.model_size(blocks[0]).unwrap(), 9);
    }

    #[rstest]
    #[case(0, Some(2))]
    #[case(1, Some(3))]
    #[case(3, Some(5))]
    #[case(4, Some(6))]
    #[case(5, None)]
    #[case(6, Some(11))]
    #[case(7, None)]
    #[case(8, Some(14))]
    fn test_convert_offset_to_model_offset(#[case] offset: usize, #[case] expected: Option<usize>) {
        // <p><t>ab cd</></><p><t>e</></>
        let tokens = TokenBuilder::new().paragraph("ab cd").paragraph("e").build();
        let (_, render, _) = render_of(&tokens);
        assert_eq!(render.convert_offset_to_model_offset(offset).unwrap(), expected);
    }

    #[rstest]
    #[case::before_paragraph(0, 0)]
    #[case::before_inline(1, 0)]
    #[case::first_char(2, 0)]
    #[case::inside_second_word(6, 4)]
    #[case::inline_close(7, 5)]
    #[case::block_close(8, 5)]
    #[case::second_block(9, 6)]
    #[case::end(14, 8)]
    fn test_convert_model_offset_to_offset(#[case] model_offset: usize, #[case] expected: usize) {
        let tokens = TokenBuilder::new().paragraph("ab cd").paragraph("e").build();
        let (_, render, _) = render_of(&tokens);
        assert_eq!(render.convert_model_offset_to_offset(model_offset).unwrap(), expected);
    }

    #[test]
    fn test_offset_conversion_round_trip_on_characters() {
        let tokens = TokenBuilder::new()
            .open("paragraph")
            .inline("text", "one ")
            .inline("strong", "two")
            .close()
            .paragraph("three")
            .build();
        let (_, render, _) = render_of(&tokens);
        let len = render.size(render.root()).unwrap();
        for offset in 0..len {
            if let Some(model) = render.convert_offset_to_model_offset(offset).unwrap() {
                assert_eq!(render.convert_model_offset_to_offset(model).unwrap(), offset);
                assert!(matches!(tokens[model], Token::Char(_)));
            }
        }
    }

    #[test]
    fn test_resolve_position_half_open() {
        let tokens = TokenBuilder::new().paragraph("ab cd").build();
        let (_, render, _) = render_of(&tokens);

        let chain = render.resolve_position(3).unwrap();
        assert_eq!(chain.len(), 4);
        assert_eq!(chain.leaf().offset, 0);
        assert_eq!(
            render.kind(chain.leaf().key).unwrap(),
            &RenderKind::Word(Word {
                text: "cd".into(),
                breakable: false,
            })
        );

        let chain = render.resolve_position(5).unwrap();
        assert_eq!(render.kind(chain.leaf().key).unwrap(), &RenderKind::LineBreak);

        let chain = render.resolve_position(6).unwrap();
        assert_eq!(chain.len(), 1);
    }

    #[test]
    fn test_on_model_updated_rebuilds_inline() {
        let mut tokens = TokenBuilder::new().paragraph("ab").paragraph("x").build();
        let (mut model, mut render, mut ids) = render_of(&tokens);
        let block_key = render.tree().find(NodeId(1)).unwrap();

        tokens.insert(3, Token::Char(' '));
        let update = crate::operations::StateUpdate {
            before: 3..3,
            after: 3..4,
            old_len: 11,
            new_len: 12,
        };
        let model_update = model.rebuild(&tokens, &update, &NodeRegistry::default()).unwrap();
        let render_update = render.on_model_updated(&model, &model_update, &mut ids).unwrap();

        assert_eq!(render_update.id, NodeId(2));
        assert_eq!(render.tree().find(NodeId(1)), Some(block_key));
        assert_eq!(render.text(), "a b¶x¶");
        assert_eq!(render.size(render.root()).unwrap(), 6);
    }
}
