use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {config_path}: {source}")]
    ConfigReadError {
        config_path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file at {config_path}: {source}")]
    ConfigParseError {
        config_path: PathBuf,
        source: toml::de::Error,
    },
}

/// Box padding in layout units, clockwise from the top edge.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Padding {
    pub top: f32,
    pub right: f32,
    pub bottom: f32,
    pub left: f32,
}

impl Padding {
    pub fn uniform(value: f32) -> Self {
        Self {
            top: value,
            right: value,
            bottom: value,
            left: value,
        }
    }

    pub fn bottom(value: f32) -> Self {
        Self {
            bottom: value,
            ..Self::default()
        }
    }

    pub fn horizontal(&self) -> f32 {
        self.left + self.right
    }

    pub fn vertical(&self) -> f32 {
        self.top + self.bottom
    }
}

/// Page geometry used by the paginated layout.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PageSettings {
    pub width: f32,
    pub height: f32,
    pub padding: Padding,
}

impl PageSettings {
    /// Width available to block boxes.
    pub fn inner_width(&self) -> f32 {
        (self.width - self.padding.horizontal()).max(0.0)
    }

    /// Height available to block boxes.
    pub fn inner_height(&self) -> f32 {
        (self.height - self.padding.vertical()).max(0.0)
    }
}

impl Default for PageSettings {
    fn default() -> Self {
        // US Letter in points with one-inch margins
        Self {
            width: 612.0,
            height: 792.0,
            padding: Padding::uniform(72.0),
        }
    }
}

/// Defaults for the built-in fixed-advance text measurer.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TypographySettings {
    pub char_width: f32,
    pub line_height: f32,
    /// Bottom padding given to block types registered without explicit padding.
    pub block_spacing: f32,
}

impl Default for TypographySettings {
    fn default() -> Self {
        Self {
            char_width: 7.0,
            line_height: 16.0,
            block_spacing: 8.0,
        }
    }
}

/// Undo coalescing thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HistorySettings {
    /// A pause longer than this closes the current undo step.
    pub idle_threshold_ms: u64,
    /// An undo step never spans more than this from its first edit.
    pub max_change_duration_ms: u64,
    /// Oldest undo steps are dropped beyond this count.
    pub max_changes: usize,
}

impl Default for HistorySettings {
    fn default() -> Self {
        Self {
            idle_threshold_ms: 500,
            max_change_duration_ms: 2000,
            max_changes: 100,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub page: PageSettings,
    pub typography: TypographySettings,
    pub history: HistorySettings,
}

impl Config {
    pub fn load_from_path<P: AsRef<Path>>(config_path: P) -> Result<Option<Self>, ConfigError> {
        let config_path = config_path.as_ref();
        if !config_path.exists() {
            return Ok(None);
        }

        let content = std::fs::read_to_string(config_path).map_err(|source| {
            ConfigError::ConfigReadError {
                config_path: config_path.to_path_buf(),
                source,
            }
        })?;

        let config: Config =
            toml::from_str(&content).map_err(|source| ConfigError::ConfigParseError {
                config_path: config_path.to_path_buf(),
                source,
            })?;

        Ok(Some(config))
    }

    pub fn load() -> Result<Option<Self>, ConfigError> {
        let config_path = Self::config_path();
        Self::load_from_path(&config_path)
    }

    pub fn save_to_path<P: AsRef<Path>>(&self, config_path: P) -> anyhow::Result<()> {
        let config_path = config_path.as_ref();
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(config_path, content)?;
        Ok(())
    }

    pub fn save(&self) -> anyhow::Result<()> {
        let config_path = Self::config_path();
        self.save_to_path(&config_path)
    }

    pub fn config_path() -> PathBuf {
        let config_dir = shellexpand::tilde("~/.config/quire");
        PathBuf::from(config_dir.as_ref()).join("config.toml")
    }
}
