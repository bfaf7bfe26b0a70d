//! Rectangles and hit testing for the presentation surface.
//!
//! All coordinates are relative to the top-left corner of the page a line
//! sits on. Lines are stacked inside their block's padding, blocks inside
//! the page padding.

use std::ops::Range;

use quire_config::Padding;

use crate::error::Result;
use crate::tree::NodeKey;

use super::{Atom, LayoutKind, LayoutTree};

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Rect {
    pub left: f32,
    pub top: f32,
    pub width: f32,
    pub height: f32,
    pub right: f32,
    pub bottom: f32,
    /// Padding of the block the rect belongs to.
    pub padding: Padding,
}

impl Rect {
    pub fn new(left: f32, top: f32, width: f32, height: f32) -> Self {
        Self {
            left,
            top,
            width,
            height,
            right: left + width,
            bottom: top + height,
            padding: Padding::default(),
        }
    }

    pub fn with_padding(mut self, padding: Padding) -> Self {
        self.padding = padding;
        self
    }

    pub fn contains_y(&self, y: f32) -> bool {
        y >= self.top && y < self.bottom
    }
}

/// A rect together with the index of its page.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageRect {
    pub page: usize,
    pub rect: Rect,
}

/// Where a line sits: its page, its render offsets and its box.
#[derive(Debug, Clone, Copy)]
struct Placement {
    line: NodeKey,
    page: usize,
    start: usize,
    size: usize,
    rect: Rect,
}

impl Placement {
    fn end(&self) -> usize {
        self.start + self.size
    }

    /// Last caret position on the line: before its final unit.
    fn last_caret(&self) -> usize {
        self.end().saturating_sub(1).max(self.start)
    }
}

impl LayoutTree {
    fn placements(&self) -> Result<Vec<Placement>> {
        let page_padding = self.page.padding;
        let mut out = Vec::new();
        let mut start = 0;
        for (page_index, &page) in self.pages()?.iter().enumerate() {
            let mut top = page_padding.top;
            for &block in self.tree.children(page)? {
                let padding = self.block_padding(block)?;
                top += padding.top;
                for &line in self.tree.children(block)? {
                    let height = self.height(line)?;
                    let size = self.size(line)?;
                    let rect = Rect::new(
                        page_padding.left + padding.left,
                        top,
                        self.width(line)?,
                        height,
                    )
                    .with_padding(padding);
                    out.push(Placement {
                        line,
                        page: page_index,
                        start,
                        size,
                        rect,
                    });
                    top += height;
                    start += size;
                }
                top += padding.bottom;
            }
        }
        Ok(out)
    }

    /// Index of the placement holding `offset`; the end of the document
    /// belongs to the last line.
    fn placement_index(placements: &[Placement], offset: usize) -> Option<usize> {
        placements
            .iter()
            .position(|p| offset < p.end())
            .or_else(|| placements.len().checked_sub(1))
    }

    /// Horizontal distance from the start of `line` to the caret at
    /// line-local render position `local`.
    pub fn caret_x(&self, line: NodeKey, local: usize) -> Result<f32> {
        let mut x = 0.0;
        let mut remaining = local;
        for key in self.tree.descendants(line)? {
            let LayoutKind::Atomic(atom) = self.tree.data(key)? else {
                continue;
            };
            let size = self.size(key)?;
            if remaining < size {
                if let Atom::Word(fragment) = atom {
                    let prefix: String = fragment.text.chars().take(remaining).collect();
                    x += self.measurer.measure(&prefix, self.measure_tag(key)?);
                }
                return Ok(x);
            }
            remaining -= size;
            x += self.width(key)?;
        }
        Ok(x)
    }

    /// Line-local position whose caret is closest to `x`.
    fn local_at_x(&self, placement: &Placement, x: f32) -> Result<usize> {
        let last = placement.last_caret() - placement.start;
        let mut best = 0;
        let mut best_distance = x.abs();
        let mut local = 0;
        let mut left = 0.0;
        for key in self.tree.descendants(placement.line)? {
            let LayoutKind::Atomic(atom) = self.tree.data(key)? else {
                continue;
            };
            if let Atom::Word(fragment) = atom {
                let tag = self.measure_tag(key)?;
                let mut prefix = String::new();
                for (n, c) in fragment.text.chars().enumerate() {
                    prefix.push(c);
                    let position = local + n + 1;
                    if position > last {
                        break;
                    }
                    let distance = (left + self.measurer.measure(&prefix, tag) - x).abs();
                    if distance < best_distance {
                        best = position;
                        best_distance = distance;
                    }
                }
            }
            left += self.width(key)?;
            local += self.size(key)?;
        }
        Ok(best)
    }

    /// Zero-width rect of the caret at render offset `offset`.
    pub fn caret_rect(&self, offset: usize) -> Result<PageRect> {
        let placements = self.placements()?;
        let Some(index) = Self::placement_index(&placements, offset) else {
            let padding = self.page.padding;
            let height = self.measurer.line_height("document");
            return Ok(PageRect {
                page: 0,
                rect: Rect::new(padding.left, padding.top, 0.0, height),
            });
        };
        let placement = &placements[index];
        let local = offset.clamp(placement.start, placement.end()) - placement.start;
        let x = self.caret_x(placement.line, local)?;
        let line = placement.rect;
        Ok(PageRect {
            page: placement.page,
            rect: Rect::new(line.left + x, line.top, 0.0, line.height).with_padding(line.padding),
        })
    }

    /// One rect per line covering the render range `from..to`.
    pub fn resolve_rects(&self, from: usize, to: usize) -> Result<Vec<PageRect>> {
        let (from, to) = (from.min(to), from.max(to));
        let mut rects = Vec::new();
        if from == to {
            return Ok(rects);
        }
        for placement in self.placements()? {
            if placement.end() <= from || placement.start >= to {
                continue;
            }
            let local_from = from.max(placement.start) - placement.start;
            let local_to = to.min(placement.end()) - placement.start;
            let x0 = self.caret_x(placement.line, local_from)?;
            let x1 = self.caret_x(placement.line, local_to)?;
            let line = placement.rect;
            rects.push(PageRect {
                page: placement.page,
                rect: Rect::new(line.left + x0, line.top, x1 - x0, line.height)
                    .with_padding(line.padding),
            });
        }
        Ok(rects)
    }

    /// Render offset closest to the point (`x`, `y`) on page `page`.
    /// Points above or below every line snap to the first or last line.
    pub fn hit_test(&self, page: usize, x: f32, y: f32) -> Result<usize> {
        let placements = self.placements()?;
        let on_page: Vec<&Placement> = placements.iter().filter(|p| p.page == page).collect();
        let target = on_page
            .iter()
            .find(|p| p.rect.contains_y(y))
            .or_else(|| match on_page.first() {
                Some(first) if y < first.rect.top => Some(first),
                _ => on_page.last(),
            });
        let Some(target) = target else {
            // past the last page: the end of whatever comes before
            return Ok(placements
                .iter()
                .filter(|p| p.page < page)
                .last()
                .map_or(0, Placement::last_caret));
        };
        Ok(target.start + self.local_at_x(target, x - target.rect.left)?)
    }

    /// Render offsets `[start, end)` of the line holding `offset`.
    pub fn line_range(&self, offset: usize) -> Result<Range<usize>> {
        let placements = self.placements()?;
        Ok(match Self::placement_index(&placements, offset) {
            Some(index) => placements[index].start..placements[index].end(),
            None => 0..0,
        })
    }

    /// Offset on the line above the one holding `offset`, closest to
    /// horizontal position `x`. `None` on the first line.
    pub fn offset_above(&self, offset: usize, x: f32) -> Result<Option<usize>> {
        self.offset_on_adjacent_line(offset, x, false)
    }

    /// Offset on the line below the one holding `offset`, closest to
    /// horizontal position `x`. `None` on the last line.
    pub fn offset_below(&self, offset: usize, x: f32) -> Result<Option<usize>> {
        self.offset_on_adjacent_line(offset, x, true)
    }

    fn offset_on_adjacent_line(&self, offset: usize, x: f32, down: bool) -> Result<Option<usize>> {
        let placements = self.placements()?;
        let Some(index) = Self::placement_index(&placements, offset) else {
            return Ok(None);
        };
        let adjacent = if down {
            index.checked_add(1).filter(|&i| i < placements.len())
        } else {
            index.checked_sub(1)
        };
        let Some(adjacent) = adjacent else {
            return Ok(None);
        };
        let placement = &placements[adjacent];
        Ok(Some(placement.start + self.local_at_x(placement, x)?))
    }

    /// Horizontal position of the caret at `offset`, relative to its
    /// line's left edge.
    pub fn caret_column(&self, offset: usize) -> Result<f32> {
        let placements = self.placements()?;
        let Some(index) = Self::placement_index(&placements, offset) else {
            return Ok(0.0);
        };
        let placement = &placements[index];
        let local = offset.clamp(placement.start, placement.end()) - placement.start;
        self.caret_x(placement.line, local)
    }
}
