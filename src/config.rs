// SPDX-License-Identifier: GPL-3.0-only

//! Persistent capture settings
//!
//! Stored as JSON under the platform configuration directory
//! (`~/.config/camera-session/config.json` on Linux).

use crate::backends::camera::types::{DeviceDescriptor, Format, Rotation};
use crate::constants::{
    CONFIG_DIR_NAME, CONFIG_FILE_NAME, DEFAULT_FPS_DENOM, DEFAULT_FPS_NUM, DEFAULT_HEIGHT,
    DEFAULT_LOG_FILTER, DEFAULT_WIDTH,
};
use crate::errors::ConfigError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// User-level capture defaults
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Resolution width
    pub width: u32,
    /// Resolution height
    pub height: u32,
    /// Frame rate numerator
    pub fps_num: u32,
    /// Frame rate denominator
    pub fps_denom: u32,
    /// Decode on the GPU and share textures with the renderer
    pub hardware_accelerated: bool,
    /// Clockwise preview rotation in degrees (multiple of 90)
    pub rotation_degrees: i32,
    /// Start streaming as soon as the engine is initialized
    pub auto_start: bool,
    /// Last used device id
    pub last_device_id: Option<String>,
    /// `tracing` filter used when `RUST_LOG` is unset
    pub log_filter: String,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            width: DEFAULT_WIDTH,
            height: DEFAULT_HEIGHT,
            fps_num: DEFAULT_FPS_NUM,
            fps_denom: DEFAULT_FPS_DENOM,
            hardware_accelerated: true,
            rotation_degrees: 0,
            auto_start: true,
            last_device_id: None,
            log_filter: DEFAULT_LOG_FILTER.to_string(),
        }
    }
}

impl CaptureConfig {
    /// Default location of the configuration file
    pub fn path() -> Result<PathBuf, ConfigError> {
        let dir = dirs::config_dir().ok_or(ConfigError::NoConfigDir)?;
        Ok(dir.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME))
    }

    /// Load from the default location, falling back to defaults if the file
    /// does not exist
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            debug!(path = %path.display(), "No config file, using defaults");
            return Ok(Self::default());
        }
        let contents = fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&contents)?;
        debug!(path = %path.display(), "Loaded config");
        Ok(config)
    }

    pub fn save(&self) -> Result<(), ConfigError> {
        self.save_to(&Self::path()?)
    }

    /// Write as pretty JSON, creating parent directories as needed
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        info!(path = %path.display(), "Saved config");
        Ok(())
    }

    /// Remember `device` as the one to reopen next time
    pub fn remember_device(&mut self, device: &DeviceDescriptor) {
        self.last_device_id = Some(device.id.clone());
    }

    /// Build a capture format from these settings.
    ///
    /// The last used device is selected if it appears in `devices`;
    /// otherwise the device is left unset so the first one is used.
    pub fn format(&self, devices: &[DeviceDescriptor]) -> Result<Format, ConfigError> {
        let rotation =
            Rotation::from_degrees(self.rotation_degrees).ok_or(ConfigError::InvalidValue {
                field: "rotation_degrees",
                value: self.rotation_degrees.to_string(),
            })?;
        if self.width == 0 || self.height == 0 {
            return Err(ConfigError::InvalidValue {
                field: "size",
                value: format!("{}x{}", self.width, self.height),
            });
        }

        let mut format = Format::new()
            .size(self.width, self.height)
            .fps_ratio(self.fps_num, self.fps_denom)
            .hardware_accelerated(self.hardware_accelerated)
            .rotation(rotation)
            .auto_start(self.auto_start);

        if let Some(id) = &self.last_device_id
            && let Some(device) = devices.iter().find(|d| &d.id == id)
        {
            format = format.device(device.clone());
        }
        Ok(format)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_json_fills_defaults() {
        let config: CaptureConfig = serde_json::from_str(r#"{ "width": 1280, "height": 720 }"#).unwrap();
        assert_eq!(config.width, 1280);
        assert_eq!(config.fps_num, DEFAULT_FPS_NUM);
        assert!(config.hardware_accelerated);
        assert_eq!(config.log_filter, DEFAULT_LOG_FILTER);
    }

    #[test]
    fn test_invalid_rotation() {
        let config = CaptureConfig {
            rotation_degrees: 45,
            ..Default::default()
        };
        assert!(matches!(
            config.format(&[]),
            Err(ConfigError::InvalidValue { field: "rotation_degrees", .. })
        ));
    }
}
