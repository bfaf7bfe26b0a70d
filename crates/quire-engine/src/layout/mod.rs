//! # Layout tree
//!
//! Paginated box tree: document → page → block → line → inline → atomic.
//! Built from the render tree with one page and one line per block, then
//! packed by [reflow](self::reflow) into lines that fit the page width and
//! pages that fit the page height.
//!
//! ## Fragments
//!
//! Reflow splits render nodes into fragments: an inline or a word can span
//! several lines, a block can span several pages. The first fragment (the
//! head) keeps the id of the render node; fragments created by a break get
//! fresh ids and remember their render node in `source`. When fragments are
//! joined again the absorbing one keeps its id.
//!
//! The line-break atom of a block sits directly in the block's last line,
//! after the inlines. Empty inlines take no render positions and get no
//! layout node.
//!
//! ## Offsets
//!
//! Layout shares render offsets. Every node owns the half-open range
//! `[start, start + size)`.

use std::fmt;
use std::fmt::Write as _;
use std::rc::Rc;

use log::debug;
use quire_config::{Padding, PageSettings};

use crate::error::{EditorError, Result};
use crate::ids::{IdGenerator, NodeId};
use crate::model::Element;
use crate::position::PositionChain;
use crate::registry::NodeRegistry;
use crate::render::{RenderKind, RenderTree, RenderUpdate, is_break_whitespace};
use crate::tree::{NodeKey, Tree};

mod builder;
pub mod geometry;
pub mod measure;
mod reflow;

pub use geometry::{PageRect, Rect};
pub use measure::{MonospaceMeasurer, TextMeasurer};
pub use reflow::ReflowStats;

/// A piece of a render word.
#[derive(Debug, Clone, PartialEq)]
pub struct WordFragment {
    /// Id of the render word this piece belongs to.
    pub source: NodeId,
    pub text: String,
    /// Character offset of this piece inside the render word.
    pub start: usize,
    /// Character length of the whole render word.
    pub source_len: usize,
    pub breakable: bool,
}

impl WordFragment {
    pub fn len(&self) -> usize {
        self.text.chars().count()
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    /// This piece ends where its render word ends.
    pub fn is_word_end(&self) -> bool {
        self.start + self.len() >= self.source_len
    }

    pub fn trimmed(&self) -> &str {
        self.text.trim_end_matches(is_break_whitespace)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Atom {
    Word(WordFragment),
    LineBreak { source: NodeId },
}

#[derive(Debug, Clone, PartialEq)]
pub enum LayoutKind {
    Document,
    Page,
    Block { source: NodeId, element: Element },
    Line,
    Inline { source: NodeId, element: Element },
    Atomic(Atom),
}

impl LayoutKind {
    pub fn source(&self) -> Option<NodeId> {
        match self {
            LayoutKind::Block { source, .. } | LayoutKind::Inline { source, .. } => Some(*source),
            LayoutKind::Atomic(Atom::Word(fragment)) => Some(fragment.source),
            LayoutKind::Atomic(Atom::LineBreak { source }) => Some(*source),
            LayoutKind::Document | LayoutKind::Page | LayoutKind::Line => None,
        }
    }

    pub fn word(&self) -> Option<&WordFragment> {
        match self {
            LayoutKind::Atomic(Atom::Word(fragment)) => Some(fragment),
            _ => None,
        }
    }
}

/// Emitted after the layout absorbed a render update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LayoutUpdate {
    /// Render node whose layout was rebuilt.
    pub id: NodeId,
    pub pages: usize,
    pub stats: ReflowStats,
}

pub struct LayoutTree {
    tree: Tree<LayoutKind>,
    page: PageSettings,
    registry: Rc<NodeRegistry>,
    measurer: Box<dyn TextMeasurer>,
}

impl fmt::Debug for LayoutTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LayoutTree")
            .field("tree", &self.tree)
            .field("page", &self.page)
            .finish_non_exhaustive()
    }
}

impl LayoutTree {
    /// Builds and fully reflows the layout of `render`.
    pub fn build(
        render: &RenderTree,
        page: PageSettings,
        registry: Rc<NodeRegistry>,
        measurer: Box<dyn TextMeasurer>,
        ids: &mut IdGenerator,
    ) -> Result<Self> {
        let page_id = ids.next_id();
        let tree = builder::build_document(render, page_id, ids)?;
        let mut layout = Self {
            tree,
            page,
            registry,
            measurer,
        };
        let stats = layout.reflow_all(ids)?;
        debug!(
            "layout: built {} page(s) ({} joins, {} breaks)",
            layout.pages()?.len(),
            stats.joins,
            stats.breaks
        );
        Ok(layout)
    }

    pub fn tree(&self) -> &Tree<LayoutKind> {
        &self.tree
    }

    pub fn root(&self) -> NodeKey {
        self.tree.root()
    }

    pub fn kind(&self, key: NodeKey) -> Result<&LayoutKind> {
        self.tree.data(key)
    }

    pub fn pages(&self) -> Result<&[NodeKey]> {
        self.tree.children(self.tree.root())
    }

    pub fn page_settings(&self) -> &PageSettings {
        &self.page
    }

    pub fn measurer(&self) -> &dyn TextMeasurer {
        self.measurer.as_ref()
    }

    /// Render positions spanned by `key`. Memoized.
    pub fn size(&self, key: NodeKey) -> Result<usize> {
        let metrics = self.tree.metrics(key)?;
        if let Some(size) = metrics.size() {
            return Ok(size);
        }
        let size = match self.tree.data(key)? {
            LayoutKind::Atomic(Atom::Word(fragment)) => fragment.len(),
            LayoutKind::Atomic(Atom::LineBreak { .. }) => 1,
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

    /// Tag used to measure the atom or inline at `key`.
    fn measure_tag(&self, key: NodeKey) -> Result<&str> {
        let mut current = Some(key);
        while let Some(k) = current {
            match self.tree.data(k)? {
                LayoutKind::Inline { element, .. } | LayoutKind::Block { element, .. } => {
                    return Ok(&element.tag);
                }
                _ => current = self.tree.parent(k)?,
            }
        }
        Ok("document")
    }

    /// Advance width of `key`, trailing whitespace included. Memoized.
    pub fn width(&self, key: NodeKey) -> Result<f32> {
        let metrics = self.tree.metrics(key)?;
        if let Some(width) = metrics.width() {
            return Ok(width);
        }
        let width = match self.tree.data(key)? {
            LayoutKind::Atomic(Atom::Word(fragment)) => {
                self.measurer.measure(&fragment.text, self.measure_tag(key)?)
            }
            LayoutKind::Atomic(Atom::LineBreak { .. }) => 0.0,
            LayoutKind::Inline { .. } | LayoutKind::Line => {
                let mut sum = 0.0;
                for &child in self.tree.children(key)? {
                    sum += self.width(child)?;
                }
                sum
            }
            LayoutKind::Block { .. } | LayoutKind::Page | LayoutKind::Document => {
                let mut max: f32 = 0.0;
                for &child in self.tree.children(key)? {
                    max = max.max(self.width(child)?);
                }
                max
            }
        };
        metrics.set_width(width);
        Ok(width)
    }

    /// Width of an atom without its trailing whitespace.
    pub fn trimmed_width(&self, key: NodeKey) -> Result<f32> {
        match self.tree.data(key)? {
            LayoutKind::Atomic(Atom::Word(fragment)) if fragment.breakable => {
                Ok(self.measurer.measure(fragment.trimmed(), self.measure_tag(key)?))
            }
            _ => self.width(key),
        }
    }

    /// Box height of `key`, padding included for blocks. Memoized.
    pub fn height(&self, key: NodeKey) -> Result<f32> {
        let metrics = self.tree.metrics(key)?;
        if let Some(height) = metrics.height() {
            return Ok(height);
        }
        let height = match self.tree.data(key)? {
            LayoutKind::Atomic(_) | LayoutKind::Inline { .. } => {
                self.measurer.line_height(self.measure_tag(key)?)
            }
            LayoutKind::Line => {
                let mut max: Option<f32> = None;
                for &child in self.tree.children(key)? {
                    if matches!(self.tree.data(child)?, LayoutKind::Inline { .. }) {
                        let h = self.height(child)?;
                        max = Some(max.map_or(h, |m| m.max(h)));
                    }
                }
                match max {
                    Some(h) => h,
                    None => self.measurer.line_height(self.measure_tag(key)?),
                }
            }
            LayoutKind::Block { .. } => {
                let mut sum = self.block_padding(key)?.vertical();
                for &child in self.tree.children(key)? {
                    sum += self.height(child)?;
                }
                sum
            }
            LayoutKind::Page | LayoutKind::Document => {
                let mut sum = 0.0;
                for &child in self.tree.children(key)? {
                    sum += self.height(child)?;
                }
                sum
            }
        };
        metrics.set_height(height);
        Ok(height)
    }

    pub fn block_padding(&self, block: NodeKey) -> Result<Padding> {
        match self.tree.data(block)? {
            LayoutKind::Block { element, .. } => Ok(self.registry.lookup(&element.tag)?.padding),
            _ => Ok(Padding::default()),
        }
    }

    fn block_source(&self, block: NodeKey) -> Result<NodeId> {
        match self.tree.data(block)? {
            LayoutKind::Block { source, .. } => Ok(*source),
            other => Err(EditorError::Structure(format!(
                "expected a block, found {other:?}"
            ))),
        }
    }

    /// Width available to the lines of `block`.
    fn line_budget(&self, block: NodeKey) -> Result<f32> {
        Ok((self.page.inner_width() - self.block_padding(block)?.horizontal()).max(0.0))
    }

    /// Every block fragment, in document order.
    pub fn blocks(&self) -> Result<Vec<NodeKey>> {
        let mut out = Vec::new();
        for &page in self.pages()? {
            out.extend_from_slice(self.tree.children(page)?);
        }
        Ok(out)
    }

    /// Every line, in document order.
    pub fn lines(&self) -> Result<Vec<NodeKey>> {
        let mut out = Vec::new();
        for block in self.blocks()? {
            out.extend_from_slice(self.tree.children(block)?);
        }
        Ok(out)
    }

    /// Line holding render position `offset`; the end of the document
    /// belongs to the last line.
    pub fn line_at(&self, offset: usize) -> Result<NodeKey> {
        let lines = self.lines()?;
        let mut start = 0;
        for &line in &lines {
            let size = self.size(line)?;
            if offset < start + size {
                return Ok(line);
            }
            start += size;
        }
        match lines.last() {
            Some(&line) if offset == start => Ok(line),
            _ => Err(EditorError::OffsetOutOfRange { offset, len: start }),
        }
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

    /// Absorbs a render update: rebuilds the layout of the affected block
    /// (or of the whole document) and reflows what it touched.
    pub fn on_render_updated(
        &mut self,
        render: &RenderTree,
        update: &RenderUpdate,
        ids: &mut IdGenerator,
    ) -> Result<LayoutUpdate> {
        let render_block = enclosing_block(render, update.key)?;
        let head = match render_block {
            Some(block) => self.tree.find(render.tree().id(block)?).map(|head| (block, head)),
            None => None,
        };
        let Some((render_block, head)) = head else {
            return self.rebuild_all(render, ids);
        };

        self.collapse_block(head)?;
        let fresh = builder::build_block(render, render_block, ids)?;
        self.tree.reconcile(head, &fresh, fresh.root())?;

        let mut stats = self.reflow_lines(head, ids)?;
        let page = self
            .tree
            .parent(head)?
            .ok_or_else(|| EditorError::Structure("block outside a page".into()))?;
        let from = self.tree.index_in_parent(page)?.saturating_sub(1);
        stats.absorb(self.reflow_pages(from, ids)?);

        let id = self.tree.id(head)?;
        debug!(
            "layout: rebuilt block {id} ({} joins, {} breaks)",
            stats.joins, stats.breaks
        );
        Ok(LayoutUpdate {
            id,
            pages: self.pages()?.len(),
            stats,
        })
    }

    /// Rebuilds every block from `render` and reflows everything.
    pub fn rebuild_all(&mut self, render: &RenderTree, ids: &mut IdGenerator) -> Result<LayoutUpdate> {
        let page_id = match self.pages()?.first() {
            Some(&page) => self.tree.id(page)?,
            None => ids.next_id(),
        };
        let fresh = builder::build_document(render, page_id, ids)?;
        let root = self.tree.root();
        self.tree.reconcile(root, &fresh, fresh.root())?;
        let stats = self.reflow_all(ids)?;
        debug!(
            "layout: rebuilt document ({} joins, {} breaks)",
            stats.joins, stats.breaks
        );
        Ok(LayoutUpdate {
            id: NodeId::DOCUMENT,
            pages: self.pages()?.len(),
            stats,
        })
    }

    /// Changes the page size and reflows in place.
    pub fn resize(&mut self, width: f32, height: f32, ids: &mut IdGenerator) -> Result<LayoutUpdate> {
        self.page.width = width;
        self.page.height = height;
        let root = self.tree.root();
        self.tree.invalidate(root);
        let stats = self.reflow_all(ids)?;
        debug!(
            "layout: resized to {width}x{height} ({} joins, {} breaks)",
            stats.joins, stats.breaks
        );
        Ok(LayoutUpdate {
            id: NodeId::DOCUMENT,
            pages: self.pages()?.len(),
            stats,
        })
    }

    /// Text of every line in document order, line breaks left out.
    pub fn line_texts(&self) -> Result<Vec<String>> {
        self.lines()?
            .into_iter()
            .map(|line| self.line_text(line))
            .collect()
    }

    /// Text of every line, grouped by page.
    pub fn page_texts(&self) -> Result<Vec<Vec<String>>> {
        let mut pages = Vec::new();
        for &page in self.pages()? {
            let mut lines = Vec::new();
            for &block in self.tree.children(page)? {
                for &line in self.tree.children(block)? {
                    lines.push(self.line_text(line)?);
                }
            }
            pages.push(lines);
        }
        Ok(pages)
    }

    fn line_text(&self, line: NodeKey) -> Result<String> {
        let mut text = String::new();
        for key in self.tree.descendants(line)? {
            if let LayoutKind::Atomic(Atom::Word(fragment)) = self.tree.data(key)? {
                text.push_str(&fragment.text);
            }
        }
        Ok(text)
    }

    pub fn dump(&self) -> String {
        let mut out = String::new();
        let Ok(keys) = self.tree.descendants(self.root()) else {
            return out;
        };
        for key in keys {
            let (Ok(depth), Ok(kind), Ok(id)) =
                (self.tree.depth(key), self.tree.data(key), self.tree.id(key))
            else {
                continue;
            };
            let indent = "  ".repeat(depth);
            let _ = match kind {
                LayoutKind::Document => writeln!(out, "{indent}document"),
                LayoutKind::Page => writeln!(out, "{indent}page"),
                LayoutKind::Line => writeln!(out, "{indent}line"),
                LayoutKind::Block { source, element } | LayoutKind::Inline { source, element } => {
                    if *source == id {
                        writeln!(out, "{indent}{}{id}", element.tag)
                    } else {
                        writeln!(out, "{indent}{}{source} (cont.)", element.tag)
                    }
                }
                LayoutKind::Atomic(Atom::Word(fragment)) => {
                    writeln!(out, "{indent}word {:?}", fragment.text)
                }
                LayoutKind::Atomic(Atom::LineBreak { .. }) => writeln!(out, "{indent}linebreak"),
            };
        }
        out
    }
}

/// The render block containing `key`, or `None` for the document.
fn enclosing_block(render: &RenderTree, key: NodeKey) -> Result<Option<NodeKey>> {
    let mut current = key;
    loop {
        match render.tree().data(current)? {
            RenderKind::Document => return Ok(None),
            RenderKind::Block(_) => return Ok(Some(current)),
            _ => {}
        }
        match render.tree().parent(current)? {
            Some(parent) => current = parent,
            None => return Ok(None),
        }
    }
}
