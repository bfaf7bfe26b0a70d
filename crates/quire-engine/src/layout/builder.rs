use crate::error::{EditorError, Result};
use crate::ids::{IdGenerator, NodeId};
use crate::render::{RenderKind, RenderTree};
use crate::tree::{NodeKey, Tree};

use super::{Atom, LayoutKind, WordFragment};

/// Document → one page → every render block with a single line.
pub(super) fn build_document(
    render: &RenderTree,
    page_id: NodeId,
    ids: &mut IdGenerator,
) -> Result<Tree<LayoutKind>> {
    let mut tree = Tree::new(NodeId::DOCUMENT, LayoutKind::Document);
    let root = tree.root();
    let page = tree.push_child(root, page_id, LayoutKind::Page)?;
    for &block in render.blocks()? {
        let kind = block_kind(render, block)?;
        let key = tree.push_child(page, render.tree().id(block)?, kind)?;
        fill_block(render, block, &mut tree, key, ids)?;
    }
    Ok(tree)
}

/// Layout subtree of one render block, all content on a single line.
pub(super) fn build_block(
    render: &RenderTree,
    block: NodeKey,
    ids: &mut IdGenerator,
) -> Result<Tree<LayoutKind>> {
    let mut tree = Tree::new(render.tree().id(block)?, block_kind(render, block)?);
    let root = tree.root();
    fill_block(render, block, &mut tree, root, ids)?;
    Ok(tree)
}

fn block_kind(render: &RenderTree, block: NodeKey) -> Result<LayoutKind> {
    match render.kind(block)? {
        RenderKind::Block(element) => Ok(LayoutKind::Block {
            source: render.tree().id(block)?,
            element: element.clone(),
        }),
        other => Err(EditorError::Structure(format!(
            "expected a render block, found {other:?}"
        ))),
    }
}

fn fill_block(
    render: &RenderTree,
    block: NodeKey,
    tree: &mut Tree<LayoutKind>,
    parent: NodeKey,
    ids: &mut IdGenerator,
) -> Result<()> {
    let line = tree.push_child(parent, ids.next_id(), LayoutKind::Line)?;
    for &child in render.tree().children(block)? {
        let id = render.tree().id(child)?;
        match render.kind(child)? {
            RenderKind::Inline(element) => {
                let words = render.tree().children(child)?;
                if words.is_empty() {
                    continue;
                }
                let inline = tree.push_child(
                    line,
                    id,
                    LayoutKind::Inline {
                        source: id,
                        element: element.clone(),
                    },
                )?;
                for &word_key in words {
                    let RenderKind::Word(word) = render.kind(word_key)? else {
                        return Err(EditorError::Structure(
                            "inline holds a non-word render node".into(),
                        ));
                    };
                    let source = render.tree().id(word_key)?;
                    let fragment = WordFragment {
                        source,
                        text: word.text.clone(),
                        start: 0,
                        source_len: word.len(),
                        breakable: word.breakable,
                    };
                    tree.push_child(inline, source, LayoutKind::Atomic(Atom::Word(fragment)))?;
                }
            }
            RenderKind::LineBreak => {
                tree.push_child(line, id, LayoutKind::Atomic(Atom::LineBreak { source: id }))?;
            }
            other => {
                return Err(EditorError::Structure(format!(
                    "unexpected {other:?} inside a render block"
                )));
            }
        }
    }
    Ok(())
}
