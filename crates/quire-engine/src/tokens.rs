//! Document tokens.
//!
//! The token stream is the single source of truth for a document: a flat,
//! well-nested sequence of open tags, close tags and characters. The
//! document root is implicit, so index `i` in the stream is model offset
//! `i`.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use serde::{Deserialize, Serialize};

use crate::error::{EditorError, Result};
use crate::ids::{IdGenerator, NodeId};

/// Attribute storage of an open tag. Ordered so equal attribute sets
/// compare and serialize identically.
pub type Attributes = BTreeMap<String, String>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenTag {
    pub tag: String,
    pub id: NodeId,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: Attributes,
}

impl OpenTag {
    pub fn new(tag: impl Into<String>, id: NodeId) -> Self {
        Self {
            tag: tag.into(),
            id,
            attributes: Attributes::new(),
        }
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// Same tag and attributes under a different id.
    pub fn copy_with_id(&self, id: NodeId) -> Self {
        Self {
            tag: self.tag.clone(),
            id,
            attributes: self.attributes.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Token {
    Open(OpenTag),
    Close,
    Char(char),
}

impl Token {
    pub fn open(tag: impl Into<String>, id: NodeId) -> Self {
        Token::Open(OpenTag::new(tag, id))
    }

    pub fn chars(text: &str) -> Vec<Token> {
        text.chars().map(Token::Char).collect()
    }

    pub fn is_open(&self) -> bool {
        matches!(self, Token::Open(_))
    }

    pub fn is_close(&self) -> bool {
        matches!(self, Token::Close)
    }

    pub fn as_open(&self) -> Option<&OpenTag> {
        match self {
            Token::Open(open) => Some(open),
            _ => None,
        }
    }

    pub fn as_char(&self) -> Option<char> {
        match self {
            Token::Char(c) => Some(*c),
            _ => None,
        }
    }
}

/// Checks that `tokens` closes every tag it opens and never closes one it
/// did not open.
pub fn validate_nesting(tokens: &[Token]) -> Result<()> {
    let mut depth = 0usize;
    for (index, token) in tokens.iter().enumerate() {
        match token {
            Token::Open(_) => depth += 1,
            Token::Close => {
                depth = depth.checked_sub(1).ok_or_else(|| {
                    EditorError::Malformed(format!("close tag at {index} has no open tag"))
                })?;
            }
            Token::Char(_) => {}
        }
    }
    if depth != 0 {
        return Err(EditorError::Malformed(format!(
            "{depth} tag(s) left open at end of stream"
        )));
    }
    Ok(())
}

/// Every id carried by an open tag in `tokens`.
pub fn open_ids(tokens: &[Token]) -> impl Iterator<Item = NodeId> + '_ {
    tokens.iter().filter_map(|t| t.as_open().map(|open| open.id))
}

/// Compact one-line rendering, e.g. `<paragraph#1><text#2>ab</></>`.
pub fn debug_string(tokens: &[Token]) -> String {
    let mut out = String::new();
    for token in tokens {
        match token {
            Token::Open(open) => {
                let _ = write!(out, "<{}{}", open.tag, open.id);
                for (key, value) in &open.attributes {
                    let _ = write!(out, " {key}={value:?}");
                }
                out.push('>');
            }
            Token::Close => out.push_str("</>"),
            Token::Char(c) => out.push(*c),
        }
    }
    out
}

/// Convenience builder for well-nested token streams.
///
/// ```
/// use quire_engine::tokens::TokenBuilder;
///
/// let tokens = TokenBuilder::new().paragraph("hello").build();
/// assert_eq!(tokens.len(), 9);
/// ```
#[derive(Debug, Default)]
pub struct TokenBuilder {
    ids: IdGenerator,
    tokens: Vec<Token>,
}

impl TokenBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open(mut self, tag: &str) -> Self {
        let id = self.ids.next_id();
        self.tokens.push(Token::open(tag, id));
        self
    }

    pub fn open_tag(mut self, open: OpenTag) -> Self {
        self.ids.observe(open.id);
        self.tokens.push(Token::Open(open));
        self
    }

    pub fn close(mut self) -> Self {
        self.tokens.push(Token::Close);
        self
    }

    pub fn text(mut self, text: &str) -> Self {
        self.tokens.extend(Token::chars(text));
        self
    }

    /// `tag` inline holding `text`.
    pub fn inline(self, tag: &str, text: &str) -> Self {
        self.open(tag).text(text).close()
    }

    /// A paragraph with one plain text run.
    pub fn paragraph(self, text: &str) -> Self {
        self.open("paragraph").inline("text", text).close()
    }

    pub fn build(self) -> Vec<Token> {
        self.tokens
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_builder_assigns_sequential_ids() {
        let tokens = TokenBuilder::new().paragraph("ab").paragraph("c").build();
        assert_eq!(
            debug_string(&tokens),
            "<paragraph#1><text#2>ab</></><paragraph#3><text#4>c</></>"
        );
        assert_eq!(
            open_ids(&tokens).collect::<Vec<_>>(),
            vec![NodeId(1), NodeId(2), NodeId(3), NodeId(4)]
        );
    }

    #[test]
    fn test_debug_string_with_attributes() {
        let tokens = TokenBuilder::new()
            .open_tag(OpenTag::new("heading", NodeId(7)).with_attribute("level", "2"))
            .inline("text", "T")
            .close()
            .build();
        assert_eq!(
            debug_string(&tokens),
            "<heading#7 level=\"2\"><text#8>T</></>"
        );
    }

    #[test]
    fn test_validate_nesting_accepts_balanced() {
        let tokens = TokenBuilder::new().paragraph("x").build();
        assert!(validate_nesting(&tokens).is_ok());
        assert!(validate_nesting(&[]).is_ok());
    }

    #[test]
    fn test_validate_nesting_rejects_stray_close() {
        let mut tokens = TokenBuilder::new().paragraph("x").build();
        tokens.push(Token::Close);
        assert!(matches!(
            validate_nesting(&tokens),
            Err(EditorError::Malformed(_))
        ));
    }

    #[test]
    fn test_validate_nesting_rejects_unclosed() {
        let tokens = TokenBuilder::new().open("paragraph").build();
        assert!(matches!(
            validate_nesting(&tokens),
            Err(EditorError::Malformed(_))
        ));
    }

    #[test]
    fn test_copy_with_id_keeps_attributes() {
        let open = OpenTag::new("heading", NodeId(1)).with_attribute("level", "1");
        let copy = open.copy_with_id(NodeId(9));
        assert_eq!(copy.id, NodeId(9));
        assert_eq!(copy.tag, "heading");
        assert_eq!(copy.attributes, open.attributes);
    }
}
