use crate::error::{EditorError, Result};
use crate::ids::NodeId;
use crate::tree::{NodeKey, Tree};

/// One step of a resolved position: `offset` is local to `key`'s node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChainLink {
    pub key: NodeKey,
    pub id: NodeId,
    pub depth: usize,
    pub offset: usize,
}

/// Root-to-leaf path produced by resolving an offset in one tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PositionChain {
    links: Vec<ChainLink>,
}

impl PositionChain {
    pub fn links(&self) -> &[ChainLink] {
        &self.links
    }

    pub fn root(&self) -> &ChainLink {
        &self.links[0]
    }

    pub fn leaf(&self) -> &ChainLink {
        &self.links[self.links.len() - 1]
    }

    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    pub fn get(&self, depth: usize) -> Option<&ChainLink> {
        self.links.get(depth)
    }

    pub fn find(&self, id: NodeId) -> Option<&ChainLink> {
        self.links.iter().find(|link| link.id == id)
    }

    /// Walks `tree` from the root towards the leaves.
    ///
    /// `descend` is handed a node and the offset local to it; it returns the
    /// child owning that offset together with the offset local to the
    /// child, or `None` when the node itself is the deepest owner.
    pub fn resolve<T, F>(tree: &Tree<T>, offset: usize, mut descend: F) -> Result<PositionChain>
    where
        F: FnMut(&Tree<T>, NodeKey, usize) -> Result<Option<(NodeKey, usize)>>,
    {
        let mut key = tree.root();
        let mut local = offset;
        let mut links = Vec::new();
        loop {
            links.push(ChainLink {
                key,
                id: tree.id(key)?,
                depth: links.len(),
                offset: local,
            });
            match descend(tree, key, local)? {
                Some((child, child_offset)) => {
                    if tree.parent(child)? != Some(key) {
                        return Err(EditorError::Structure(
                            "position resolver left the current subtree".into(),
                        ));
                    }
                    key = child;
                    local = child_offset;
                }
                None => return Ok(PositionChain { links }),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_first_child_chain() {
        let mut tree = Tree::new(NodeId(0), ());
        let a = tree.push_child(tree.root(), NodeId(1), ()).unwrap();
        let b = tree.push_child(a, NodeId(2), ()).unwrap();

        let chain = PositionChain::resolve(&tree, 5, |tree, key, offset| {
            Ok(tree
                .children(key)?
                .first()
                .map(|&child| (child, offset.saturating_sub(1))))
        })
        .unwrap();

        assert_eq!(chain.len(), 3);
        assert_eq!(chain.root().offset, 5);
        assert_eq!(chain.leaf().key, b);
        assert_eq!(chain.leaf().offset, 3);
        assert_eq!(chain.leaf().depth, 2);
        assert_eq!(chain.find(NodeId(1)).map(|l| l.offset), Some(4));
    }

    #[test]
    fn test_resolve_rejects_foreign_child() {
        let mut tree = Tree::new(NodeId(0), ());
        let a = tree.push_child(tree.root(), NodeId(1), ()).unwrap();
        let b = tree.push_child(a, NodeId(2), ()).unwrap();

        // b is a grandchild of the root
        let result = PositionChain::resolve(&tree, 0, |_, _, _| Ok(Some((b, 0))));
        assert!(matches!(result, Err(EditorError::Structure(_))));
    }
}
