use std::collections::HashMap;

use quire_config::{Padding, TypographySettings};

use crate::error::{EditorError, Result};

/// Where a node type may appear in the document tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Document,
    /// Direct child of the document; holds inlines.
    Block,
    /// Child of a block; holds characters.
    Inline,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NodeSpec {
    pub role: Role,
    /// Box padding of the layout node built for this type.
    pub padding: Padding,
}

/// Maps tag names to node specs. Builders fail on tags it does not know.
#[derive(Debug, Clone)]
pub struct NodeRegistry {
    specs: HashMap<String, NodeSpec>,
    default_block: String,
    default_inline: String,
}

impl NodeRegistry {
    /// Registry with nothing but the document type.
    pub fn empty() -> Self {
        let mut specs = HashMap::new();
        specs.insert(
            "document".to_string(),
            NodeSpec {
                role: Role::Document,
                padding: Padding::default(),
            },
        );
        Self {
            specs,
            default_block: "paragraph".to_string(),
            default_inline: "text".to_string(),
        }
    }

    /// The built-in types, with blocks spaced by `block_spacing`.
    pub fn with_block_spacing(block_spacing: f32) -> Self {
        let spacing = Padding::bottom(block_spacing);
        let mut registry = Self::empty();
        registry.register_block("paragraph", spacing);
        registry.register_block("heading", spacing);
        registry.register_inline("text");
        registry.register_inline("strong");
        registry.register_inline("emphasis");
        registry
    }

    pub fn from_typography(typography: &TypographySettings) -> Self {
        Self::with_block_spacing(typography.block_spacing)
    }

    pub fn register_block(&mut self, tag: &str, padding: Padding) {
        self.specs.insert(
            tag.to_string(),
            NodeSpec {
                role: Role::Block,
                padding,
            },
        );
    }

    pub fn register_inline(&mut self, tag: &str) {
        self.specs.insert(
            tag.to_string(),
            NodeSpec {
                role: Role::Inline,
                padding: Padding::default(),
            },
        );
    }

    pub fn lookup(&self, tag: &str) -> Result<&NodeSpec> {
        self.specs
            .get(tag)
            .ok_or_else(|| EditorError::UnregisteredType(tag.to_string()))
    }

    /// Tag used when an edit has to create a block from scratch.
    pub fn default_block(&self) -> &str {
        &self.default_block
    }

    /// Tag used when an edit has to create an inline from scratch.
    pub fn default_inline(&self) -> &str {
        &self.default_inline
    }
}

impl Default for NodeRegistry {
    fn default() -> Self {
        Self::from_typography(&TypographySettings::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("paragraph", Role::Block)]
    #[case("heading", Role::Block)]
    #[case("text", Role::Inline)]
    #[case("strong", Role::Inline)]
    #[case("emphasis", Role::Inline)]
    #[case("document", Role::Document)]
    fn test_builtin_roles(#[case] tag: &str, #[case] role: Role) {
        let registry = NodeRegistry::default();
        assert_eq!(registry.lookup(tag).unwrap().role, role);
    }

    #[test]
    fn test_unregistered_tag() {
        let registry = NodeRegistry::default();
        assert_eq!(
            registry.lookup("table").unwrap_err(),
            EditorError::UnregisteredType("table".into())
        );
    }

    #[test]
    fn test_block_spacing_is_bottom_padding() {
        let registry = NodeRegistry::with_block_spacing(5.0);
        let spec = registry.lookup("paragraph").unwrap();
        assert_eq!(spec.padding, Padding::bottom(5.0));
    }
}
