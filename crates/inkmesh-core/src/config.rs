//! Engine configuration.

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::shapes::DEFAULT_ARROW_HEAD_LENGTH;

/// Errors raised while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Result type for configuration loading.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Tunables for an [`Engine`](crate::Engine). Every field has a default, so a
/// JSON file only needs the keys it overrides.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Undo entries kept before the oldest is evicted.
    pub history_capacity: usize,
    /// Extra reach, in document units, granted to point hit tests.
    pub hit_tolerance: f64,
    /// Length of each arrowhead barb.
    pub arrow_head_length: f64,
    /// Side length of the fill tool's stamp.
    pub fill_size: f64,
    /// Font size given to text placed by the text tool.
    pub text_font_size: f64,
    /// Text box width when none is given.
    pub text_width: f64,
    /// Text box height when none is given.
    pub text_height: f64,
    /// Vertex count of the regular polygon tool.
    pub polygon_sides: usize,
    pub min_zoom: f64,
    pub max_zoom: f64,
    /// Upper bound on scene repair passes per drained notification batch.
    pub max_repair_passes: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            history_capacity: 100,
            hit_tolerance: 4.0,
            arrow_head_length: DEFAULT_ARROW_HEAD_LENGTH,
            fill_size: 100.0,
            text_font_size: 20.0,
            text_width: crate::shapes::DEFAULT_TEXT_WIDTH,
            text_height: crate::shapes::DEFAULT_TEXT_HEIGHT,
            polygon_sides: 6,
            min_zoom: 0.1,
            max_zoom: 10.0,
            max_repair_passes: 8,
        }
    }
}

impl EngineConfig {
    /// Parse and validate a JSON document.
    pub fn from_json_str(json: &str) -> ConfigResult<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    /// Reject values the engine cannot work with.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.history_capacity == 0 {
            return Err(ConfigError::Invalid {
                field: "history_capacity",
                reason: "must be at least 1".into(),
            });
        }
        if self.polygon_sides < 3 {
            return Err(ConfigError::Invalid {
                field: "polygon_sides",
                reason: format!("{} sides cannot close a polygon", self.polygon_sides),
            });
        }
        if !(self.min_zoom > 0.0 && self.min_zoom <= self.max_zoom) {
            return Err(ConfigError::Invalid {
                field: "min_zoom",
                reason: format!("range {}..{} is empty", self.min_zoom, self.max_zoom),
            });
        }
        if self.max_repair_passes == 0 {
            return Err(ConfigError::Invalid {
                field: "max_repair_passes",
                reason: "must be at least 1".into(),
            });
        }
        if !(self.arrow_head_length.is_finite() && self.arrow_head_length >= 0.0) {
            return Err(ConfigError::Invalid {
                field: "arrow_head_length",
                reason: format!("{} is not a usable length", self.arrow_head_length),
            });
        }
        if self.hit_tolerance < 0.0 || self.fill_size <= 0.0 {
            return Err(ConfigError::Invalid {
                field: "hit_tolerance",
                reason: "tolerance must be non-negative and fill size positive".into(),
            });
        }
        Ok(())
    }
}
