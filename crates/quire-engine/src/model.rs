//! # Model tree
//!
//! Semantic projection of the token buffer: document → block → inline,
//! characters living only inside inlines.
//!
//! ## Offsets
//!
//! Model offsets are buffer indices. A block or inline spans its open tag,
//! its content and its close tag, so its size is `2 + content`. The
//! document root is implicit and spans exactly its blocks.
//!
//! A child owns offset `o` (relative to its parent) when `start < o <
//! start + size`: strictly after its open tag, up to and including the
//! position of its close tag. Offsets sitting between two children belong
//! to the parent.
//!
//! ## Incremental rebuild
//!
//! After an edit only the smallest node that fully encloses the touched
//! range is re-parsed from the buffer and reconciled into the live tree.
//! If the re-parsed span no longer forms exactly one node of the same
//! identity, the next ancestor is tried, ending at the whole document.

use std::fmt::Write as _;

use log::{debug, trace};

use crate::error::{EditorError, Result};
use crate::ids::NodeId;
use crate::operations::StateUpdate;
use crate::position::PositionChain;
use crate::registry::{NodeRegistry, Role};
use crate::tokens::{Attributes, OpenTag, Token};
use crate::tree::{NodeKey, Tree};

/// Type tag plus attributes, as carried by an open tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Element {
    pub tag: String,
    pub attributes: Attributes,
}

impl Element {
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            attributes: Attributes::new(),
        }
    }

    fn from_open(open: &OpenTag) -> Self {
        Self {
            tag: open.tag.clone(),
            attributes: open.attributes.clone(),
        }
    }

    pub fn to_open(&self, id: NodeId) -> OpenTag {
        OpenTag {
            tag: self.tag.clone(),
            id,
            attributes: self.attributes.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ModelKind {
    Document,
    Block(Element),
    Inline { element: Element, text: String },
}

impl ModelKind {
    pub fn element(&self) -> Option<&Element> {
        match self {
            ModelKind::Document => None,
            ModelKind::Block(element) | ModelKind::Inline { element, .. } => Some(element),
        }
    }

    pub fn tag(&self) -> &str {
        self.element().map_or("document", |e| e.tag.as_str())
    }

    /// Offset of the first child relative to the node's own start.
    fn content_start(&self) -> usize {
        match self {
            ModelKind::Document => 0,
            ModelKind::Block(_) | ModelKind::Inline { .. } => 1,
        }
    }

    fn role(&self) -> Role {
        match self {
            ModelKind::Document => Role::Document,
            ModelKind::Block(_) => Role::Block,
            ModelKind::Inline { .. } => Role::Inline,
        }
    }
}

/// Emitted after the model absorbed an edit: `id` is the root of the
/// rebuilt subtree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModelUpdate {
    pub id: NodeId,
    pub key: NodeKey,
}

#[derive(Debug)]
pub struct ModelTree {
    tree: Tree<ModelKind>,
}

impl ModelTree {
    /// Parses a whole token stream.
    pub fn build(tokens: &[Token], registry: &NodeRegistry) -> Result<Self> {
        let mut tree = Tree::new(NodeId::DOCUMENT, ModelKind::Document);
        let mut parser = Parser::new(tokens, registry);
        let root = tree.root();
        while !parser.at_end() {
            parser.parse_node(&mut tree, root, Role::Block)?;
        }
        Ok(Self { tree })
    }

    pub fn tree(&self) -> &Tree<ModelKind> {
        &self.tree
    }

    pub fn root(&self) -> NodeKey {
        self.tree.root()
    }

    pub fn kind(&self, key: NodeKey) -> Result<&ModelKind> {
        self.tree.data(key)
    }

    pub fn blocks(&self) -> Result<&[NodeKey]> {
        self.tree.children(self.tree.root())
    }

    /// Number of buffer positions spanned by `key`. Memoized.
    pub fn size(&self, key: NodeKey) -> Result<usize> {
        let metrics = self.tree.metrics(key)?;
        if let Some(size) = metrics.size() {
            return Ok(size);
        }
        let size = match self.tree.data(key)? {
            ModelKind::Document => self.children_size(key)?,
            ModelKind::Block(_) => 2 + self.children_size(key)?,
            ModelKind::Inline { text, .. } => 2 + text.chars().count(),
        };
        metrics.set_size(size);
        Ok(size)
    }

    fn children_size(&self, key: NodeKey) -> Result<usize> {
        self.tree
            .children(key)?
            .iter()
            .map(|&child| self.size(child))
            .sum()
    }

    /// Absolute offset of the open tag of `key` (0 for the document).
    pub fn start_offset(&self, key: NodeKey) -> Result<usize> {
        let Some(parent) = self.tree.parent(key)? else {
            return Ok(0);
        };
        let mut offset = self.start_offset(parent)? + self.tree.data(parent)?.content_start();
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
            let mut start = tree.data(key)?.content_start();
            for &child in tree.children(key)? {
                let size = self.size(child)?;
                if start < local && local < start + size {
                    return Ok(Some((child, local - start)));
                }
                start += size;
            }
            Ok(None)
        })
    }

    /// Serializes `key` and its subtree back to tokens. The document
    /// yields only its content.
    pub fn to_tokens(&self, key: NodeKey) -> Result<Vec<Token>> {
        let mut out = Vec::with_capacity(self.size(key)?);
        self.write_tokens(key, &mut out)?;
        Ok(out)
    }

    fn write_tokens(&self, key: NodeKey, out: &mut Vec<Token>) -> Result<()> {
        let node = self.tree.node(key)?;
        match node.data() {
            ModelKind::Document => {
                for &child in node.children() {
                    self.write_tokens(child, out)?;
                }
            }
            ModelKind::Block(element) => {
                out.push(Token::Open(element.to_open(node.id())));
                for &child in node.children() {
                    self.write_tokens(child, out)?;
                }
                out.push(Token::Close);
            }
            ModelKind::Inline { element, text } => {
                out.push(Token::Open(element.to_open(node.id())));
                out.extend(text.chars().map(Token::Char));
                out.push(Token::Close);
            }
        }
        Ok(())
    }

    /// Brings the tree in line with `tokens` after the edit described by
    /// `update`, re-parsing as little as possible.
    pub fn rebuild(
        &mut self,
        tokens: &[Token],
        update: &StateUpdate,
        registry: &NodeRegistry,
    ) -> Result<ModelUpdate> {
        let chain = self.resolve_position(update.before.start)?;
        let growth = update.new_len as isize - update.old_len as isize;

        for link in chain.links()[1..].iter().rev() {
            let start = self.start_offset(link.key)?;
            let end = start + self.size(link.key)?;
            if !(start < update.before.start && update.before.end < end) {
                continue;
            }
            let Some(new_end) = end.checked_add_signed(growth) else {
                continue;
            };
            let Some(span) = tokens.get(start..new_end) else {
                continue;
            };
            let kind = self.tree.data(link.key)?;
            match parse_single(span, link.id, kind.role(), registry) {
                Ok(fresh) => {
                    let stats = self.tree.reconcile(link.key, &fresh, fresh.root())?;
                    debug!(
                        "model: rebuilt {} {} ({} matched, {} inserted, {} removed)",
                        kind_tag(&fresh, fresh.root()),
                        link.id,
                        stats.matched,
                        stats.inserted,
                        stats.removed
                    );
                    return Ok(ModelUpdate {
                        id: link.id,
                        key: link.key,
                    });
                }
                Err(err) => trace!("model: {} cannot absorb edit: {err}", link.id),
            }
        }

        self.rebuild_all(tokens, registry)
    }

    /// Re-parses the whole buffer and reconciles it into the live tree.
    pub fn rebuild_all(&mut self, tokens: &[Token], registry: &NodeRegistry) -> Result<ModelUpdate> {
        let fresh = ModelTree::build(tokens, registry)?;
        let root = self.tree.root();
        let stats = self.tree.reconcile(root, &fresh.tree, fresh.tree.root())?;
        debug!(
            "model: rebuilt document ({} matched, {} inserted, {} removed)",
            stats.matched, stats.inserted, stats.removed
        );
        Ok(ModelUpdate {
            id: NodeId::DOCUMENT,
            key: root,
        })
    }

    /// Indented outline, one node per line.
    pub fn dump(&self) -> String {
        let mut out = String::new();
        let _ = self.dump_node(self.root(), 0, &mut out);
        out
    }

    fn dump_node(&self, key: NodeKey, depth: usize, out: &mut String) -> Result<()> {
        let node = self.tree.node(key)?;
        let indent = "  ".repeat(depth);
        match node.data() {
            ModelKind::Document => {
                let _ = writeln!(out, "{indent}document");
            }
            ModelKind::Block(element) => {
                let _ = writeln!(out, "{indent}{}{}", element.tag, node.id());
            }
            ModelKind::Inline { element, text } => {
                let _ = writeln!(out, "{indent}{}{} {text:?}", element.tag, node.id());
            }
        }
        for &child in node.children() {
            self.dump_node(child, depth + 1, out)?;
        }
        Ok(())
    }
}

fn kind_tag(tree: &Tree<ModelKind>, key: NodeKey) -> &str {
    tree.data(key).map_or("?", |kind| kind.tag())
}

/// Parses `span` as exactly one node with identity `id` and role `role`.
fn parse_single(
    span: &[Token],
    id: NodeId,
    role: Role,
    registry: &NodeRegistry,
) -> Result<Tree<ModelKind>> {
    let open = match span.first() {
        Some(Token::Open(open)) if open.id == id => open,
        _ => {
            return Err(EditorError::Structure(format!(
                "span does not start with {id}"
            )));
        }
    };
    let mut parser = Parser::new(span, registry);
    let kind = parser.open_node(open, role)?;
    let mut tree = Tree::new(id, kind);
    let root = tree.root();
    parser.parse_content(&mut tree, root, role)?;
    if !parser.at_end() {
        return Err(EditorError::Structure(format!(
            "span holds more than {id}"
        )));
    }
    Ok(tree)
}

struct Parser<'a> {
    tokens: &'a [Token],
    position: usize,
    registry: &'a NodeRegistry,
}

impl<'a> Parser<'a> {
    fn new(tokens: &'a [Token], registry: &'a NodeRegistry) -> Self {
        Self {
            tokens,
            position: 0,
            registry,
        }
    }

    fn at_end(&self) -> bool {
        self.position >= self.tokens.len()
    }

    fn next(&mut self) -> Result<&'a Token> {
        let token = self.tokens.get(self.position).ok_or_else(|| {
            EditorError::Malformed(format!("unexpected end of tokens at {}", self.position))
        })?;
        self.position += 1;
        Ok(token)
    }

    /// Consumes `open` (already peeked) and checks it has `role`.
    fn open_node(&mut self, open: &OpenTag, role: Role) -> Result<ModelKind> {
        self.position += 1;
        let spec = self.registry.lookup(&open.tag)?;
        if spec.role != role {
            return Err(EditorError::Structure(format!(
                "`{}` {} appears where a {role:?} belongs",
                open.tag, open.id
            )));
        }
        let element = Element::from_open(open);
        Ok(match role {
            Role::Document => ModelKind::Document,
            Role::Block => ModelKind::Block(element),
            Role::Inline => ModelKind::Inline {
                element,
                text: String::new(),
            },
        })
    }

    /// Parses one node of `role` starting at the current position and
    /// appends it to `parent`.
    fn parse_node(&mut self, tree: &mut Tree<ModelKind>, parent: NodeKey, role: Role) -> Result<()> {
        let at = self.position;
        let open = match self.tokens.get(at) {
            Some(Token::Open(open)) => open,
            Some(Token::Char(c)) => {
                return Err(EditorError::Structure(format!(
                    "character {c:?} at {at} is outside an inline"
                )));
            }
            Some(Token::Close) => {
                return Err(EditorError::Malformed(format!("unmatched close tag at {at}")));
            }
            None => return Err(EditorError::Malformed("unexpected end of tokens".into())),
        };
        let kind = self.open_node(open, role)?;
        let key = tree.push_child(parent, open.id, kind)?;
        self.parse_content(tree, key, role)
    }

    /// Parses the content of the node at `key` up to and including its
    /// close tag.
    fn parse_content(&mut self, tree: &mut Tree<ModelKind>, key: NodeKey, role: Role) -> Result<()> {
        match role {
            Role::Inline => {
                let mut text = String::new();
                loop {
                    match self.next()? {
                        Token::Char(c) => text.push(*c),
                        Token::Close => break,
                        Token::Open(open) => {
                            return Err(EditorError::Structure(format!(
                                "`{}` {} nested inside an inline",
                                open.tag, open.id
                            )));
                        }
                    }
                }
                if let ModelKind::Inline { text: slot, .. } = tree.data_mut(key)? {
                    *slot = text;
                }
                Ok(())
            }
            Role::Block => loop {
                match self.tokens.get(self.position) {
                    Some(Token::Close) => {
                        self.position += 1;
                        return Ok(());
                    }
                    _ => self.parse_node(tree, key, Role::Inline)?,
                }
            },
            Role::Document => Err(EditorError::Structure(
                "document tag inside the token stream".into(),
            )),
        }
    }
}
