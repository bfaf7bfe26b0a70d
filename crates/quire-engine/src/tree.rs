//! # Tree primitive
//!
//! Arena-backed ordered tree shared by the model, render and layout
//! projections. Nodes live in a [`SlotMap`] and refer to each other by
//! [`NodeKey`]: children are owned through the parent's child list and the
//! parent link is a plain back-reference, so there are no reference cycles.
//!
//! Every node carries a stable [`NodeId`] next to its arena key. Keys are
//! arena handles and change when a node is rebuilt; ids persist and are
//! what [`Tree::reconcile`] matches on.
//!
//! Derived metrics (size, width, height) are memoized per node in
//! [`Metrics`]. Any structural or data mutation clears the memo of the
//! touched node and of every ancestor up to the root.

use std::cell::Cell;
use std::collections::HashMap;

use slotmap::{SlotMap, new_key_type};

use crate::error::{EditorError, Result};
use crate::ids::NodeId;

new_key_type! {
    /// Handle to a node slot inside one [`Tree`] arena.
    pub struct NodeKey;
}

/// Memoized derived values of a node.
#[derive(Debug, Default)]
pub struct Metrics {
    size: Cell<Option<usize>>,
    model_size: Cell<Option<usize>>,
    width: Cell<Option<f32>>,
    height: Cell<Option<f32>>,
}

impl Metrics {
    pub fn clear(&self) {
        self.size.set(None);
        self.model_size.set(None);
        self.width.set(None);
        self.height.set(None);
    }

    pub fn size(&self) -> Option<usize> {
        self.size.get()
    }

    pub fn set_size(&self, size: usize) {
        self.size.set(Some(size));
    }

    pub fn model_size(&self) -> Option<usize> {
        self.model_size.get()
    }

    pub fn set_model_size(&self, size: usize) {
        self.model_size.set(Some(size));
    }

    pub fn width(&self) -> Option<f32> {
        self.width.get()
    }

    pub fn set_width(&self, width: f32) {
        self.width.set(Some(width));
    }

    pub fn height(&self) -> Option<f32> {
        self.height.get()
    }

    pub fn set_height(&self, height: f32) {
        self.height.set(Some(height));
    }

    #[cfg(test)]
    fn is_empty(&self) -> bool {
        self.size.get().is_none()
            && self.model_size.get().is_none()
            && self.width.get().is_none()
            && self.height.get().is_none()
    }
}

#[derive(Debug)]
pub struct Node<T> {
    id: NodeId,
    parent: Option<NodeKey>,
    children: Vec<NodeKey>,
    data: T,
    metrics: Metrics,
}

impl<T> Node<T> {
    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn parent(&self) -> Option<NodeKey> {
        self.parent
    }

    pub fn children(&self) -> &[NodeKey] {
        &self.children
    }

    pub fn data(&self) -> &T {
        &self.data
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }
}

/// Counts reported by [`Tree::reconcile`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileStats {
    /// Live nodes kept because a rebuilt node had the same id.
    pub matched: usize,
    /// Rebuilt nodes grafted in because nothing live matched them.
    pub inserted: usize,
    /// Live nodes dropped because the rebuilt tree no longer has them.
    pub removed: usize,
}

#[derive(Debug)]
pub struct Tree<T> {
    nodes: SlotMap<NodeKey, Node<T>>,
    index: HashMap<NodeId, NodeKey>,
    root: NodeKey,
}

impl<T> Tree<T> {
    pub fn new(id: NodeId, data: T) -> Self {
        let mut nodes = SlotMap::with_key();
        let root = nodes.insert(Node {
            id,
            parent: None,
            children: Vec::new(),
            data,
            metrics: Metrics::default(),
        });
        let mut index = HashMap::new();
        index.insert(id, root);
        Self { nodes, index, root }
    }

    pub fn root(&self) -> NodeKey {
        self.root
    }

    /// Number of live nodes, root included.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, key: NodeKey) -> bool {
        self.nodes.contains_key(key)
    }

    pub fn node(&self, key: NodeKey) -> Result<&Node<T>> {
        self.nodes.get(key).ok_or(EditorError::StaleKey)
    }

    pub fn id(&self, key: NodeKey) -> Result<NodeId> {
        Ok(self.node(key)?.id)
    }

    pub fn data(&self, key: NodeKey) -> Result<&T> {
        Ok(&self.node(key)?.data)
    }

    /// Mutable access to a node's data. Clears memoized metrics up to the root.
    pub fn data_mut(&mut self, key: NodeKey) -> Result<&mut T> {
        self.invalidate(key);
        self.nodes
            .get_mut(key)
            .map(|node| &mut node.data)
            .ok_or(EditorError::StaleKey)
    }

    pub fn children(&self, key: NodeKey) -> Result<&[NodeKey]> {
        Ok(&self.node(key)?.children)
    }

    pub fn parent(&self, key: NodeKey) -> Result<Option<NodeKey>> {
        Ok(self.node(key)?.parent)
    }

    pub fn metrics(&self, key: NodeKey) -> Result<&Metrics> {
        Ok(&self.node(key)?.metrics)
    }

    pub fn find(&self, id: NodeId) -> Option<NodeKey> {
        self.index.get(&id).copied()
    }

    /// Like [`Tree::find`] but a missing id is an error.
    pub fn lookup(&self, id: NodeId) -> Result<NodeKey> {
        self.find(id).ok_or(EditorError::UnknownNode(id))
    }

    pub fn index_in_parent(&self, key: NodeKey) -> Result<usize> {
        let parent = self
            .parent(key)?
            .ok_or_else(|| EditorError::Structure("root has no parent".into()))?;
        self.children(parent)?
            .iter()
            .position(|&child| child == key)
            .ok_or(EditorError::StaleKey)
    }

    pub fn next_sibling(&self, key: NodeKey) -> Result<Option<NodeKey>> {
        let Some(parent) = self.parent(key)? else {
            return Ok(None);
        };
        let index = self.index_in_parent(key)?;
        Ok(self.children(parent)?.get(index + 1).copied())
    }

    pub fn previous_sibling(&self, key: NodeKey) -> Result<Option<NodeKey>> {
        let Some(parent) = self.parent(key)? else {
            return Ok(None);
        };
        let index = self.index_in_parent(key)?;
        if index == 0 {
            return Ok(None);
        }
        Ok(self.children(parent)?.get(index - 1).copied())
    }

    /// Parent chain of `key`, nearest first. `key` itself is not included.
    pub fn ancestors(&self, key: NodeKey) -> Result<Vec<NodeKey>> {
        let mut chain = Vec::new();
        let mut current = self.parent(key)?;
        while let Some(parent) = current {
            chain.push(parent);
            current = self.parent(parent)?;
        }
        Ok(chain)
    }

    pub fn depth(&self, key: NodeKey) -> Result<usize> {
        Ok(self.ancestors(key)?.len())
    }

    /// Pre-order walk of the subtree rooted at `key`, `key` first.
    pub fn descendants(&self, key: NodeKey) -> Result<Vec<NodeKey>> {
        let mut out = Vec::new();
        let mut stack = vec![key];
        while let Some(current) = stack.pop() {
            out.push(current);
            for &child in self.children(current)?.iter().rev() {
                stack.push(child);
            }
        }
        Ok(out)
    }

    /// Clears the metrics memo of `key` and all of its ancestors.
    pub fn invalidate(&self, key: NodeKey) {
        let mut current = Some(key);
        while let Some(k) = current {
            match self.nodes.get(k) {
                Some(node) => {
                    node.metrics.clear();
                    current = node.parent;
                }
                None => break,
            }
        }
    }

    pub fn push_child(&mut self, parent: NodeKey, id: NodeId, data: T) -> Result<NodeKey> {
        let index = self.children(parent)?.len();
        self.insert_child(parent, index, id, data)
    }

    pub fn insert_child(
        &mut self,
        parent: NodeKey,
        index: usize,
        id: NodeId,
        data: T,
    ) -> Result<NodeKey> {
        if self.index.contains_key(&id) {
            return Err(EditorError::DuplicateId(id));
        }
        let len = self.children(parent)?.len();
        if index > len {
            return Err(EditorError::OffsetOutOfRange { offset: index, len });
        }
        let key = self.nodes.insert(Node {
            id,
            parent: Some(parent),
            children: Vec::new(),
            data,
            metrics: Metrics::default(),
        });
        self.index.insert(id, key);
        self.nodes[parent].children.insert(index, key);
        self.invalidate(parent);
        Ok(key)
    }

    /// Re-parents `key` (with its subtree) under `new_parent` at `index`.
    ///
    /// `index` is interpreted after `key` has been detached from its old
    /// parent.
    pub fn move_node(&mut self, key: NodeKey, new_parent: NodeKey, index: usize) -> Result<()> {
        if key == self.root {
            return Err(EditorError::Structure("cannot move the root".into()));
        }
        if key == new_parent || self.ancestors(new_parent)?.contains(&key) {
            return Err(EditorError::Structure(
                "cannot move a node beneath itself".into(),
            ));
        }
        self.detach(key)?;
        let len = self.children(new_parent)?.len();
        if index > len {
            return Err(EditorError::OffsetOutOfRange { offset: index, len });
        }
        self.nodes[new_parent].children.insert(index, key);
        self.nodes[key].parent = Some(new_parent);
        self.invalidate(key);
        Ok(())
    }

    /// Removes `key` and its whole subtree from the arena.
    pub fn remove(&mut self, key: NodeKey) -> Result<()> {
        if key == self.root {
            return Err(EditorError::Structure("cannot remove the root".into()));
        }
        self.detach(key)?;
        self.drop_subtree(key)
    }

    fn detach(&mut self, key: NodeKey) -> Result<()> {
        let parent = self.parent(key)?;
        if let Some(parent) = parent {
            self.invalidate(parent);
            self.nodes[parent].children.retain(|&child| child != key);
        }
        self.nodes[key].parent = None;
        Ok(())
    }

    fn drop_subtree(&mut self, key: NodeKey) -> Result<()> {
        for k in self.descendants(key)? {
            if let Some(node) = self.nodes.remove(k) {
                if self.index.get(&node.id) == Some(&k) {
                    self.index.remove(&node.id);
                }
            }
        }
        Ok(())
    }
}

impl<T: Clone> Tree<T> {
    /// Copies the subtree rooted at `src_key` of `src` under `parent` at
    /// `index`. A live node already using one of the copied ids is
    /// removed first, since the copy supersedes it.
    pub fn graft(
        &mut self,
        parent: NodeKey,
        index: usize,
        src: &Tree<T>,
        src_key: NodeKey,
    ) -> Result<NodeKey> {
        let source = src.node(src_key)?;
        if let Some(existing) = self.find(source.id) {
            if existing == self.root
                || existing == parent
                || self.ancestors(parent)?.contains(&existing)
            {
                return Err(EditorError::DuplicateId(source.id));
            }
            log::trace!("graft supersedes live node {}", source.id);
            self.remove(existing)?;
        }
        let key = self.insert_child(parent, index, source.id, source.data.clone())?;
        for (position, &child) in source.children.iter().enumerate() {
            self.graft(key, position, src, child)?;
        }
        Ok(key)
    }

    /// Brings the live subtree at `live` in line with the authoritative
    /// rebuilt subtree at `updated_key` of `updated`.
    ///
    /// Both roots must carry the same id. Children are matched by id in two
    /// passes: the live children are indexed first, then the rebuilt
    /// children are walked in order, recursing into matches and grafting
    /// copies of everything unmatched. Live children left over are
    /// removed. The resulting child order is the rebuilt order.
    pub fn reconcile(
        &mut self,
        live: NodeKey,
        updated: &Tree<T>,
        updated_key: NodeKey,
    ) -> Result<ReconcileStats> {
        let live_id = self.id(live)?;
        let updated_id = updated.id(updated_key)?;
        if live_id != updated_id {
            return Err(EditorError::ReconcileMismatch {
                live: live_id,
                updated: updated_id,
            });
        }
        let mut stats = ReconcileStats::default();
        self.reconcile_node(live, updated, updated_key, &mut stats)?;
        self.invalidate(live);
        Ok(stats)
    }

    fn reconcile_node(
        &mut self,
        live: NodeKey,
        updated: &Tree<T>,
        updated_key: NodeKey,
        stats: &mut ReconcileStats,
    ) -> Result<()> {
        let source = updated.node(updated_key)?;
        {
            let node = self.nodes.get_mut(live).ok_or(EditorError::StaleKey)?;
            node.data = source.data.clone();
            node.metrics.clear();
        }

        // Pass one: index the live children by id.
        let mut live_children: HashMap<NodeId, NodeKey> = HashMap::new();
        for &child in self.children(live)? {
            live_children.insert(self.nodes[child].id, child);
        }

        // Pass two: walk the rebuilt children in order.
        let mut next_children = Vec::with_capacity(source.children.len());
        for &updated_child in &source.children {
            let child_id = updated.id(updated_child)?;
            match live_children.remove(&child_id) {
                Some(live_child) => {
                    log::trace!("reconcile: keep {child_id}");
                    self.reconcile_node(live_child, updated, updated_child, stats)?;
                    next_children.push(live_child);
                    stats.matched += 1;
                }
                None => {
                    log::trace!("reconcile: insert {child_id}");
                    let end = self.children(live)?.len();
                    let grafted = self.graft(live, end, updated, updated_child)?;
                    next_children.push(grafted);
                    stats.inserted += 1;
                }
            }
        }

        for (child_id, leftover) in live_children {
            if self.contains(leftover) {
                log::trace!("reconcile: remove {child_id}");
                self.remove(leftover)?;
                stats.removed += 1;
            }
        }

        self.nodes[live].children = next_children;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn labels(tree: &Tree<&'static str>, key: NodeKey) -> Vec<&'static str> {
        tree.children(key)
            .unwrap()
            .iter()
            .map(|&k| *tree.data(k).unwrap())
            .collect()
    }

    fn sample() -> (Tree<&'static str>, NodeKey, NodeKey) {
        let mut tree = Tree::new(NodeId(0), "root");
        let a = tree.push_child(tree.root(), NodeId(1), "a").unwrap();
        let b = tree.push_child(tree.root(), NodeId(2), "b").unwrap();
        tree.push_child(a, NodeId(3), "a1").unwrap();
        tree.push_child(a, NodeId(4), "a2").unwrap();
        (tree, a, b)
    }

    #[test]
    fn test_insert_and_lookup() {
        let (tree, a, _) = sample();

        assert_eq!(tree.len(), 5);
        assert_eq!(tree.find(NodeId(1)), Some(a));
        assert_eq!(tree.lookup(NodeId(9)), Err(EditorError::UnknownNode(NodeId(9))));
        assert_eq!(labels(&tree, a), vec!["a1", "a2"]);
        assert_eq!(tree.depth(tree.find(NodeId(4)).unwrap()).unwrap(), 2);
    }

    #[test]
    fn test_duplicate_id_rejected() {
        let (mut tree, a, _) = sample();
        let err = tree.push_child(a, NodeId(2), "dup").unwrap_err();
        assert_eq!(err, EditorError::DuplicateId(NodeId(2)));
    }

    #[test]
    fn test_remove_drops_subtree_and_index() {
        let (mut tree, a, _) = sample();
        tree.remove(a).unwrap();

        assert_eq!(tree.len(), 2);
        assert_eq!(tree.find(NodeId(3)), None);
        assert_eq!(labels(&tree, tree.root()), vec!["b"]);
    }

    #[test]
    fn test_move_node_reparents() {
        let (mut tree, a, b) = sample();
        let a2 = tree.find(NodeId(4)).unwrap();
        tree.move_node(a2, b, 0).unwrap();

        assert_eq!(labels(&tree, a), vec!["a1"]);
        assert_eq!(labels(&tree, b), vec!["a2"]);
        assert_eq!(tree.parent(a2).unwrap(), Some(b));
    }

    #[test]
    fn test_move_node_beneath_itself_rejected() {
        let (mut tree, a, _) = sample();
        let a1 = tree.find(NodeId(3)).unwrap();
        assert!(matches!(
            tree.move_node(a, a1, 0),
            Err(EditorError::Structure(_))
        ));
    }

    #[test]
    fn test_mutation_clears_metrics_up_to_root() {
        let (mut tree, a, b) = sample();
        let a1 = tree.find(NodeId(3)).unwrap();
        for key in tree.descendants(tree.root()).unwrap() {
            tree.metrics(key).unwrap().set_size(1);
        }

        tree.data_mut(a1).unwrap();

        assert!(tree.metrics(a1).unwrap().is_empty());
        assert!(tree.metrics(a).unwrap().is_empty());
        assert!(tree.metrics(tree.root()).unwrap().is_empty());
        assert_eq!(tree.metrics(b).unwrap().size(), Some(1));
    }

    #[test]
    fn test_reconcile_keeps_matched_and_replaces_unmatched() {
        let (mut live, a, _) = sample();
        let a1 = live.find(NodeId(3)).unwrap();

        let mut updated = Tree::new(NodeId(0), "root*");
        let ua = updated.push_child(updated.root(), NodeId(1), "a*").unwrap();
        updated.push_child(ua, NodeId(3), "a1*").unwrap();
        updated.push_child(ua, NodeId(5), "a3").unwrap();
        updated.push_child(updated.root(), NodeId(6), "c").unwrap();

        let stats = live.reconcile(live.root(), &updated, updated.root()).unwrap();

        assert_eq!(
            stats,
            ReconcileStats {
                matched: 2,
                inserted: 2,
                removed: 2,
            }
        );
        // Matched nodes keep their arena slot.
        assert_eq!(live.find(NodeId(1)), Some(a));
        assert_eq!(live.find(NodeId(3)), Some(a1));
        assert_eq!(labels(&live, live.root()), vec!["a*", "c"]);
        assert_eq!(labels(&live, a), vec!["a1*", "a3"]);
        assert_eq!(live.find(NodeId(2)), None);
        assert_eq!(live.find(NodeId(4)), None);
        assert_eq!(live.len(), 5);
    }

    #[test]
    fn test_reconcile_follows_rebuilt_order() {
        let (mut live, _, _) = sample();
        let mut updated = Tree::new(NodeId(0), "root");
        updated.push_child(updated.root(), NodeId(2), "b").unwrap();
        let ua = updated.push_child(updated.root(), NodeId(1), "a").unwrap();
        updated.push_child(ua, NodeId(3), "a1").unwrap();
        updated.push_child(ua, NodeId(4), "a2").unwrap();

        let stats = live.reconcile(live.root(), &updated, updated.root()).unwrap();

        assert_eq!(stats.inserted, 0);
        assert_eq!(stats.removed, 0);
        assert_eq!(labels(&live, live.root()), vec!["b", "a"]);
    }

    #[test]
    fn test_reconcile_moved_node_across_parents() {
        let (mut live, _, _) = sample();
        let mut updated = Tree::new(NodeId(0), "root");
        updated.push_child(updated.root(), NodeId(1), "a").unwrap();
        let ub = updated.push_child(updated.root(), NodeId(2), "b").unwrap();
        updated.push_child(ub, NodeId(4), "a2").unwrap();

        live.reconcile(live.root(), &updated, updated.root()).unwrap();

        let b = live.find(NodeId(2)).unwrap();
        let a = live.find(NodeId(1)).unwrap();
        assert_eq!(labels(&live, b), vec!["a2"]);
        assert!(labels(&live, a).is_empty());
        assert_eq!(live.len(), 4);
    }

    #[test]
    fn test_reconcile_id_mismatch() {
        let (mut live, a, _) = sample();
        let updated = Tree::new(NodeId(2), "b");
        let err = live.reconcile(a, &updated, updated.root()).unwrap_err();
        assert_eq!(
            err,
            EditorError::ReconcileMismatch {
                live: NodeId(1),
                updated: NodeId(2),
            }
        );
    }
}
