//! Canvas configuration.
//!
//! Everything here is fixed for the lifetime of a session. There is no config
//! file and no environment lookup; hosts build a [`CanvasConfig`] in code (the
//! CLI maps its flags onto one) and call [`CanvasConfig::validate`].

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;

use serde::{Deserialize, Serialize};

use crate::consts::{DEFAULT_SUPERSAMPLE, EXPORT_FILE_NAME, MAX_SCENE_SIDE, MAX_SUPERSAMPLE};
use crate::ingest::PlacementOrder;
use crate::viewport::SceneSize;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("scene size {width}x{height} out of range (1..={max})")]
    SceneSize { width: u32, height: u32, max: u32 },

    #[error("supersample {value} out of range (1..={max})")]
    Supersample { value: u32, max: u32 },

    #[error("export file name is empty")]
    EmptyFileName,
}

impl ConfigError {
    #[must_use]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::SceneSize { .. } => "E_SCENE_SIZE",
            Self::Supersample { .. } => "E_SUPERSAMPLE",
            Self::EmptyFileName => "E_FILE_NAME",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanvasConfig {
    pub scene: SceneSize,
    pub supersample: u32,
    pub export_file_name: String,
    pub order: PlacementOrder,
}

impl Default for CanvasConfig {
    fn default() -> Self {
        Self {
            scene: SceneSize::default(),
            supersample: DEFAULT_SUPERSAMPLE,
            export_file_name: EXPORT_FILE_NAME.to_string(),
            order: PlacementOrder::default(),
        }
    }
}

impl CanvasConfig {
    #[must_use]
    pub fn with_scene(mut self, scene: SceneSize) -> Self {
        self.scene = scene;
        self
    }

    #[must_use]
    pub fn with_supersample(mut self, supersample: u32) -> Self {
        self.supersample = supersample;
        self
    }

    #[must_use]
    pub fn with_order(mut self, order: PlacementOrder) -> Self {
        self.order = order;
        self
    }

    #[must_use]
    pub fn with_export_file_name(mut self, name: impl Into<String>) -> Self {
        self.export_file_name = name.into();
        self
    }

    /// Check every field is in range.
    ///
    /// With scene sides capped at 8192 and supersample at 8 the export size
    /// always fits `u32`.
    ///
    /// # Errors
    ///
    /// The first out-of-range field as a [`ConfigError`].
    pub fn validate(&self) -> Result<(), ConfigError> {
        let SceneSize { width, height } = self.scene;
        if !(1..=MAX_SCENE_SIDE).contains(&width) || !(1..=MAX_SCENE_SIDE).contains(&height) {
            return Err(ConfigError::SceneSize { width, height, max: MAX_SCENE_SIDE });
        }
        if !(1..=MAX_SUPERSAMPLE).contains(&self.supersample) {
            return Err(ConfigError::Supersample { value: self.supersample, max: MAX_SUPERSAMPLE });
        }
        if self.export_file_name.trim().is_empty() {
            return Err(ConfigError::EmptyFileName);
        }
        Ok(())
    }
}
