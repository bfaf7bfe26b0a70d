use std::fmt;

use serde::{Deserialize, Serialize};

/// Opaque stable node identity.
///
/// Ids are carried by open-tag tokens and survive every rebuild of the
/// derived trees, which is what lets reconciliation match a rebuilt node
/// against its live counterpart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub u64);

impl NodeId {
    /// The implicit document root shared by every tree.
    pub const DOCUMENT: NodeId = NodeId(0);
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Monotonic id source owned by the editor and handed to whoever needs
/// fresh ids (commands creating tags, render words, layout fragments).
#[derive(Debug, Clone)]
pub struct IdGenerator {
    next: u64,
}

impl IdGenerator {
    pub fn new() -> Self {
        Self { next: 1 }
    }

    /// Generator whose ids never collide with `used`.
    pub fn after<I: IntoIterator<Item = NodeId>>(used: I) -> Self {
        let mut generator = Self::new();
        for id in used {
            generator.observe(id);
        }
        generator
    }

    /// Make sure `id` is never handed out.
    pub fn observe(&mut self, id: NodeId) {
        if id.0 >= self.next {
            self.next = id.0 + 1;
        }
    }

    pub fn next_id(&mut self) -> NodeId {
        let id = NodeId(self.next);
        self.next += 1;
        id
    }
}

impl Default for IdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generator_skips_document_id() {
        let mut ids = IdGenerator::new();
        assert_eq!(ids.next_id(), NodeId(1));
        assert_eq!(ids.next_id(), NodeId(2));
    }

    #[test]
    fn test_generator_after_used_ids() {
        let mut ids = IdGenerator::after([NodeId(4), NodeId(17), NodeId(2)]);
        assert_eq!(ids.next_id(), NodeId(18));
    }

    #[test]
    fn test_observe_lower_id_is_ignored() {
        let mut ids = IdGenerator::after([NodeId(10)]);
        ids.observe(NodeId(3));
        assert_eq!(ids.next_id(), NodeId(11));
    }
}
