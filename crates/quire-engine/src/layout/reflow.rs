//! Line and page packing.
//!
//! Both levels run the same loop over siblings in order: first pull leading
//! content of the next sibling in while it fits the budget (join), then, if
//! the node overflows, move everything past the last fitting child into a
//! new sibling right after it (break). The new sibling is visited next, so
//! overflow cascades forward until everything fits.
//!
//! A line ending in a breakable word is measured without the word's
//! trailing whitespace. A page is measured without the bottom padding of
//! its last block.
//!
//! A word is split inside only when it alone is wider than an empty line.
//! Its first piece then stays at the start of its line: joins never pull a
//! piece that has more of its word after it, unless it glues back onto the
//! previous piece of the same word. A full reflow first puts every block
//! back on a single line with its pieces glued, so a wider page packs the
//! same way a fresh build does.

use log::trace;

use crate::error::{EditorError, Result};
use crate::ids::IdGenerator;
use crate::render::is_break_whitespace;
use crate::tree::NodeKey;

use super::{Atom, LayoutKind, LayoutTree, WordFragment};

const EPSILON: f32 = 1e-3;

/// Joins and breaks performed by one reflow pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReflowStats {
    pub joins: usize,
    pub breaks: usize,
}

impl ReflowStats {
    pub fn absorb(&mut self, other: ReflowStats) {
        self.joins += other.joins;
        self.breaks += other.breaks;
    }

    /// Nothing moved: the tree was already packed.
    pub fn is_settled(&self) -> bool {
        self.joins == 0 && self.breaks == 0
    }
}

/// An atom with the inline holding it (`None` for a line break, which
/// sits directly in its line).
type Placed = (NodeKey, Option<NodeKey>);

impl LayoutTree {
    /// Reflows every line and page where it stands. On a packed tree this
    /// moves nothing.
    pub fn reflow(&mut self, ids: &mut IdGenerator) -> Result<ReflowStats> {
        let mut stats = ReflowStats::default();
        for block in self.blocks()? {
            stats.absorb(self.reflow_lines(block, ids)?);
        }
        stats.absorb(self.reflow_pages(0, ids)?);
        Ok(stats)
    }

    /// Gathers every block back into a single line of its head fragment,
    /// then reflows all lines and pages.
    pub(crate) fn reflow_all(&mut self, ids: &mut IdGenerator) -> Result<ReflowStats> {
        let mut heads = Vec::new();
        for block in self.blocks()? {
            if self.tree.id(block)? == self.block_source(block)? {
                heads.push(block);
            }
        }
        let mut stats = ReflowStats::default();
        for &head in &heads {
            self.collapse_block(head)?;
            self.regather_lines(head)?;
        }
        for &head in &heads {
            stats.absorb(self.reflow_lines(head, ids)?);
        }
        stats.absorb(self.reflow_pages(0, ids)?);
        Ok(stats)
    }

    /// Moves the lines of every continuation fragment of `head` back into
    /// `head` and drops the emptied fragments and pages.
    pub(crate) fn collapse_block(&mut self, head: NodeKey) -> Result<()> {
        let source = self.block_source(head)?;
        let page = self.page_of(head)?;
        while let Some(next_page) = self.tree.next_sibling(page)? {
            let Some(&first) = self.tree.children(next_page)?.first() else {
                self.tree.remove(next_page)?;
                continue;
            };
            if self.block_source(first)? != source {
                break;
            }
            for line in self.tree.children(first)?.to_vec() {
                let end = self.tree.children(head)?.len();
                self.tree.move_node(line, head, end)?;
            }
            self.tree.remove(first)?;
            if self.tree.children(next_page)?.is_empty() {
                self.tree.remove(next_page)?;
            }
        }
        Ok(())
    }

    /// Moves every line of `block` into its first line, merging inline
    /// fragments and word pieces that share a source.
    fn regather_lines(&mut self, block: NodeKey) -> Result<()> {
        let lines = self.tree.children(block)?.to_vec();
        let Some((&first, rest)) = lines.split_first() else {
            return Ok(());
        };
        for &line in rest {
            for child in self.tree.children(line)?.to_vec() {
                self.append_to_line(first, child)?;
            }
            self.tree.remove(line)?;
        }
        Ok(())
    }

    fn append_to_line(&mut self, line: NodeKey, child: NodeKey) -> Result<()> {
        let source = self.inline_source(child)?;
        let target = match (source, self.tree.children(line)?.last()) {
            (Some(_), Some(&last)) if self.inline_source(last)? == source => Some(last),
            _ => None,
        };
        let Some(target) = target else {
            let end = self.tree.children(line)?.len();
            return self.tree.move_node(child, line, end);
        };
        for atom in self.tree.children(child)?.to_vec() {
            let last = self.tree.children(target)?.last().copied();
            let glues = match (last, self.word_source(atom)?) {
                (Some(last), Some(word)) => self.word_source(last)? == Some(word),
                _ => false,
            };
            match last {
                Some(last) if glues => self.glue_words(last, atom)?,
                _ => {
                    let end = self.tree.children(target)?.len();
                    self.tree.move_node(atom, target, end)?;
                }
            }
        }
        self.tree.remove(child)
    }

    fn page_of(&self, block: NodeKey) -> Result<NodeKey> {
        self.tree
            .parent(block)?
            .ok_or_else(|| EditorError::Structure("block outside a page".into()))
    }

    /// Packs the lines of a single-fragment block into the line budget.
    pub(crate) fn reflow_lines(&mut self, block: NodeKey, ids: &mut IdGenerator) -> Result<ReflowStats> {
        let budget = self.line_budget(block)?;
        let mut stats = ReflowStats::default();
        let mut index = 0;
        while let Some(&line) = self.tree.children(block)?.get(index) {
            stats.joins += self.join_lines(line, budget, ids)?;
            if self.break_line(block, line, budget, ids)? {
                stats.breaks += 1;
            }
            index += 1;
        }
        Ok(stats)
    }

    fn line_atoms(&self, line: NodeKey) -> Result<Vec<Placed>> {
        let mut atoms = Vec::new();
        for &child in self.tree.children(line)? {
            match self.tree.data(child)? {
                LayoutKind::Inline { .. } => {
                    for &atom in self.tree.children(child)? {
                        atoms.push((atom, Some(child)));
                    }
                }
                LayoutKind::Atomic(_) => atoms.push((child, None)),
                other => {
                    return Err(EditorError::Structure(format!(
                        "unexpected {other:?} inside a line"
                    )));
                }
            }
        }
        Ok(atoms)
    }

    fn first_atom(&self, line: NodeKey) -> Result<Option<Placed>> {
        let Some(&child) = self.tree.children(line)?.first() else {
            return Ok(None);
        };
        match self.tree.data(child)? {
            LayoutKind::Inline { .. } => Ok(self
                .tree
                .children(child)?
                .first()
                .map(|&atom| (atom, Some(child)))),
            _ => Ok(Some((child, None))),
        }
    }

    fn inline_source(&self, key: NodeKey) -> Result<Option<crate::ids::NodeId>> {
        match self.tree.data(key)? {
            LayoutKind::Inline { source, .. } => Ok(Some(*source)),
            _ => Ok(None),
        }
    }

    fn is_line_break(&self, key: NodeKey) -> Result<bool> {
        Ok(matches!(
            self.tree.data(key)?,
            LayoutKind::Atomic(Atom::LineBreak { .. })
        ))
    }

    fn word_source(&self, key: NodeKey) -> Result<Option<crate::ids::NodeId>> {
        Ok(self.tree.data(key)?.word().map(|w| w.source))
    }

    /// Pulls leading atoms of the following lines into `line` while they
    /// fit. Returns how many were pulled.
    fn join_lines(&mut self, line: NodeKey, budget: f32, ids: &mut IdGenerator) -> Result<usize> {
        let mut joins = 0;
        while let Some(next) = self.tree.next_sibling(line)? {
            let Some((atom, inline)) = self.first_atom(next)? else {
                self.tree.remove(next)?;
                continue;
            };
            if !self.is_line_break(atom)?
                && self.width(line)? + self.trimmed_width(atom)? > budget + EPSILON
            {
                break;
            }
            let last_atom = self.line_atoms(line)?.last().map(|&(key, _)| key);
            let glues = match (last_atom, self.word_source(atom)?) {
                (Some(last), Some(source)) => self.word_source(last)? == Some(source),
                _ => false,
            };
            let word_end = self.tree.data(atom)?.word().is_none_or(WordFragment::is_word_end);
            if !word_end && !glues {
                break;
            }

            self.pull_atom(line, atom, inline, glues, ids)?;
            joins += 1;
            if self.tree.children(next)?.is_empty() {
                self.tree.remove(next)?;
            }
        }
        if joins > 0 {
            trace!("reflow: joined {joins} atom(s) into line {}", self.tree.id(line)?);
        }
        Ok(joins)
    }

    fn pull_atom(
        &mut self,
        line: NodeKey,
        atom: NodeKey,
        inline: Option<NodeKey>,
        glues: bool,
        ids: &mut IdGenerator,
    ) -> Result<()> {
        let Some(inline) = inline else {
            let end = self.tree.children(line)?.len();
            return self.tree.move_node(atom, line, end);
        };
        let source = self.inline_source(inline)?;
        let target = match self.tree.children(line)?.last() {
            Some(&last) if self.inline_source(last)? == source => Some(last),
            _ => None,
        };

        match target {
            Some(target) => {
                let last_word = self.tree.children(target)?.last().copied();
                match last_word {
                    Some(last_word) if glues => self.glue_words(last_word, atom)?,
                    _ => {
                        let end = self.tree.children(target)?.len();
                        self.tree.move_node(atom, target, end)?;
                    }
                }
                if self.tree.children(inline)?.is_empty() {
                    self.tree.remove(inline)?;
                }
            }
            None => {
                let end = self.tree.children(line)?.len();
                if self.tree.children(inline)?.len() == 1 {
                    self.tree.move_node(inline, line, end)?;
                } else {
                    let kind = self.tree.data(inline)?.clone();
                    let fragment = self.tree.insert_child(line, end, ids.next_id(), kind)?;
                    self.tree.move_node(atom, fragment, 0)?;
                }
            }
        }
        Ok(())
    }

    /// Appends the word piece `tail` to `head` and drops `tail`.
    fn glue_words(&mut self, head: NodeKey, tail: NodeKey) -> Result<()> {
        let Some(piece) = self.tree.data(tail)?.word().cloned() else {
            return Err(EditorError::NotSplittable("line break".into()));
        };
        if let LayoutKind::Atomic(Atom::Word(fragment)) = self.tree.data_mut(head)? {
            fragment.text.push_str(&piece.text);
            fragment.breakable = piece.breakable;
        }
        self.tree.remove(tail)
    }

    /// Moves everything after the last fitting atom of `line` to a new
    /// line right after it. Returns whether a break happened.
    fn break_line(
        &mut self,
        block: NodeKey,
        line: NodeKey,
        budget: f32,
        ids: &mut IdGenerator,
    ) -> Result<bool> {
        let mut atoms = self.line_atoms(line)?;
        let mut width = 0.0;
        let mut cut = None;
        for (index, &(atom, _)) in atoms.iter().enumerate() {
            if !self.is_line_break(atom)? && width + self.trimmed_width(atom)? > budget + EPSILON {
                cut = Some(index);
                break;
            }
            width += self.width(atom)?;
        }
        let Some(mut cut) = cut else {
            return Ok(false);
        };
        if cut == 0 {
            // Nothing fits: keep at least the first atom, splitting it if it
            // is a word that can be cut.
            let (first, _) = atoms[0];
            if self.split_word(first, budget, ids)? {
                atoms = self.line_atoms(line)?;
            }
            cut = 1;
        }
        // the line break stays with the atom before it
        match atoms.get(cut) {
            Some(&(atom, _)) if !self.is_line_break(atom)? => {}
            _ => return Ok(false),
        }

        let position = self.tree.index_in_parent(line)?;
        let new_line = self
            .tree
            .insert_child(block, position + 1, ids.next_id(), LayoutKind::Line)?;
        let mut moved_inline: Option<(NodeKey, NodeKey)> = None;
        for &(atom, inline) in &atoms[cut..] {
            let end = self.tree.children(new_line)?.len();
            let Some(inline) = inline else {
                self.tree.move_node(atom, new_line, end)?;
                continue;
            };
            match moved_inline {
                // moved along with its inline
                Some((src, dest)) if src == inline && dest == inline => continue,
                Some((src, dest)) if src == inline => {
                    let last = self.tree.children(dest)?.len();
                    self.tree.move_node(atom, dest, last)?;
                }
                _ => {
                    if self.tree.children(inline)?.first() == Some(&atom) {
                        self.tree.move_node(inline, new_line, end)?;
                        moved_inline = Some((inline, inline));
                    } else {
                        let kind = self.tree.data(inline)?.clone();
                        let fragment = self.tree.insert_child(new_line, end, ids.next_id(), kind)?;
                        self.tree.move_node(atom, fragment, 0)?;
                        moved_inline = Some((inline, fragment));
                    }
                }
            }
        }
        trace!(
            "reflow: broke line {} after {cut} atom(s)",
            self.tree.id(line)?
        );
        Ok(true)
    }

    /// Cuts the word at `atom` after the longest prefix that fits `budget`
    /// (at least one character). The rest becomes a new piece right after
    /// it. Returns false when `atom` cannot be cut.
    fn split_word(&mut self, atom: NodeKey, budget: f32, ids: &mut IdGenerator) -> Result<bool> {
        let Some(fragment) = self.tree.data(atom)?.word().cloned() else {
            return Ok(false);
        };
        let chars: Vec<char> = fragment.text.chars().collect();
        if chars.len() < 2 {
            return Ok(false);
        }
        let tag = self.measure_tag(atom)?.to_string();
        let fits = |len: usize| {
            let prefix: String = chars[..len].iter().collect();
            self.measurer
                .measure(prefix.trim_end_matches(is_break_whitespace), &tag)
                <= budget + EPSILON
        };
        let (mut low, mut high) = (1, chars.len() - 1);
        while low < high {
            let mid = (low + high).div_ceil(2);
            if fits(mid) {
                low = mid;
            } else {
                high = mid - 1;
            }
        }

        let head: String = chars[..low].iter().collect();
        let rest = WordFragment {
            source: fragment.source,
            text: chars[low..].iter().collect(),
            start: fragment.start + low,
            source_len: fragment.source_len,
            breakable: fragment.breakable,
        };
        if let LayoutKind::Atomic(Atom::Word(piece)) = self.tree.data_mut(atom)? {
            piece.breakable = head.ends_with(is_break_whitespace);
            piece.text = head;
        }
        let parent = self
            .tree
            .parent(atom)?
            .ok_or_else(|| EditorError::Structure("word outside an inline".into()))?;
        let position = self.tree.index_in_parent(atom)?;
        self.tree.insert_child(
            parent,
            position + 1,
            ids.next_id(),
            LayoutKind::Atomic(Atom::Word(rest)),
        )?;
        trace!("reflow: split word {} after {low} char(s)", fragment.source);
        Ok(true)
    }

    /// Packs lines into pages, starting with page `from`.
    pub(crate) fn reflow_pages(&mut self, from: usize, ids: &mut IdGenerator) -> Result<ReflowStats> {
        let budget = self.page.inner_height();
        let root = self.tree.root();
        let mut stats = ReflowStats::default();
        let mut index = from;
        while let Some(&page) = self.tree.children(root)?.get(index) {
            stats.joins += self.join_pages(page, budget, ids)?;
            if self.break_page(page, budget, ids)? {
                stats.breaks += 1;
            }
            index += 1;
        }
        self.drop_empty_pages(ids)?;
        Ok(stats)
    }

    /// Height `page` takes, not counting the bottom padding of its last block.
    fn used_height(&self, page: NodeKey) -> Result<f32> {
        let mut used = 0.0;
        for &block in self.tree.children(page)? {
            used += self.height(block)?;
        }
        if let Some(&last) = self.tree.children(page)?.last() {
            used -= self.block_padding(last)?.bottom;
        }
        Ok(used)
    }

    fn join_pages(&mut self, page: NodeKey, budget: f32, ids: &mut IdGenerator) -> Result<usize> {
        let mut joins = 0;
        while let Some(next) = self.tree.next_sibling(page)? {
            let Some(&first) = self.tree.children(next)?.first() else {
                self.tree.remove(next)?;
                continue;
            };
            let Some(&line) = self.tree.children(first)?.first() else {
                self.tree.remove(first)?;
                continue;
            };
            let line_height = self.height(line)?;
            let last = self.tree.children(page)?.last().copied();
            let continues = match last {
                Some(last) => self.block_source(last)? == self.block_source(first)?,
                None => false,
            };
            if let Some(last) = last {
                let used = self.used_height(page)?;
                let needed = if continues {
                    used + line_height
                } else {
                    used + self.block_padding(last)?.bottom
                        + self.block_padding(first)?.top
                        + line_height
                };
                if needed > budget + EPSILON {
                    break;
                }
            }

            match last {
                Some(last) if continues => {
                    let end = self.tree.children(last)?.len();
                    self.tree.move_node(line, last, end)?;
                    if self.tree.children(first)?.is_empty() {
                        self.tree.remove(first)?;
                    }
                }
                _ => {
                    let end = self.tree.children(page)?.len();
                    self.tree.move_node(first, page, end)?;
                    let rest = self.tree.children(first)?[1..].to_vec();
                    if !rest.is_empty() {
                        let kind = self.tree.data(first)?.clone();
                        let fragment = self.tree.insert_child(next, 0, ids.next_id(), kind)?;
                        for line in rest {
                            let end = self.tree.children(fragment)?.len();
                            self.tree.move_node(line, fragment, end)?;
                        }
                    }
                }
            }
            joins += 1;
            if self.tree.children(next)?.is_empty() {
                self.tree.remove(next)?;
            }
        }
        Ok(joins)
    }

    fn break_page(&mut self, page: NodeKey, budget: f32, ids: &mut IdGenerator) -> Result<bool> {
        let blocks = self.tree.children(page)?.to_vec();
        let mut used = 0.0;
        let mut placed = false;
        for (block_index, &block) in blocks.iter().enumerate() {
            let padding = self.block_padding(block)?;
            used += padding.top;
            for (line_index, &line) in self.tree.children(block)?.iter().enumerate() {
                let height = self.height(line)?;
                if placed && used + height > budget + EPSILON {
                    self.split_page(page, &blocks, block_index, line_index, ids)?;
                    return Ok(true);
                }
                used += height;
                placed = true;
            }
            used += padding.bottom;
        }
        Ok(false)
    }

    /// Moves lines from (`block_index`, `line_index`) on to a new page
    /// right after `page`.
    fn split_page(
        &mut self,
        page: NodeKey,
        blocks: &[NodeKey],
        block_index: usize,
        line_index: usize,
        ids: &mut IdGenerator,
    ) -> Result<()> {
        let root = self.tree.root();
        let position = self.tree.index_in_parent(page)?;
        let new_page = self
            .tree
            .insert_child(root, position + 1, ids.next_id(), LayoutKind::Page)?;

        let mut moved = blocks[block_index..].iter();
        let mut insert_at = 0;
        if line_index > 0 {
            let Some(&block) = moved.next() else {
                return Ok(());
            };
            let kind = self.tree.data(block)?.clone();
            let fragment = self.tree.insert_child(new_page, 0, ids.next_id(), kind)?;
            for line in self.tree.children(block)?[line_index..].to_vec() {
                let end = self.tree.children(fragment)?.len();
                self.tree.move_node(line, fragment, end)?;
            }
            insert_at = 1;
        }
        for &block in moved {
            self.tree.move_node(block, new_page, insert_at)?;
            insert_at += 1;
        }
        trace!("reflow: new page after page {position}");
        Ok(())
    }

    fn drop_empty_pages(&mut self, ids: &mut IdGenerator) -> Result<()> {
        let root = self.tree.root();
        for page in self.tree.children(root)?.to_vec() {
            if self.tree.children(page)?.is_empty() && self.tree.children(root)?.len() > 1 {
                self.tree.remove(page)?;
            }
        }
        if self.tree.children(root)?.is_empty() {
            self.tree.push_child(root, ids.next_id(), LayoutKind::Page)?;
        }
        Ok(())
    }
}
