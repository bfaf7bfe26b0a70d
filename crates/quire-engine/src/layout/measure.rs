use quire_config::TypographySettings;

/// Text measurement hook used by reflow and geometry.
///
/// `tag` is the type tag of the inline the text belongs to (or of the
/// block, for an empty line), so measurers can style per node type.
pub trait TextMeasurer {
    /// Advance width of `text`.
    fn measure(&self, text: &str, tag: &str) -> f32;

    /// Height of one line of `tag` content.
    fn line_height(&self, tag: &str) -> f32;
}

/// Fixed advance per character, one line height for every tag.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MonospaceMeasurer {
    pub char_width: f32,
    pub line_height: f32,
}

impl MonospaceMeasurer {
    pub fn new(char_width: f32, line_height: f32) -> Self {
        Self {
            char_width,
            line_height,
        }
    }

    pub fn from_typography(typography: &TypographySettings) -> Self {
        Self::new(typography.char_width, typography.line_height)
    }
}

impl Default for MonospaceMeasurer {
    fn default() -> Self {
        Self::from_typography(&TypographySettings::default())
    }
}

impl TextMeasurer for MonospaceMeasurer {
    fn measure(&self, text: &str, _tag: &str) -> f32 {
        text.chars().count() as f32 * self.char_width
    }

    fn line_height(&self, _tag: &str) -> f32 {
        self.line_height
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_monospace_counts_chars_not_bytes() {
        let measurer = MonospaceMeasurer::new(2.0, 10.0);
        assert_eq!(measurer.measure("héllo", "text"), 10.0);
        assert_eq!(measurer.measure("", "text"), 0.0);
        assert_eq!(measurer.line_height("heading"), 10.0);
    }

    #[test]
    fn test_defaults_follow_typography() {
        let measurer = MonospaceMeasurer::default();
        assert_eq!(measurer.char_width, 7.0);
        assert_eq!(measurer.line_height, 16.0);
    }
}
