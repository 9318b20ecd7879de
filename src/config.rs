// =============================================================================
// CONFIGURATION - Load settings from config.toml
// =============================================================================
//
// This module handles loading and parsing configuration from config.toml.
// Provides sensible defaults if config file is missing or has errors.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

/// Root configuration structure
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub window: WindowConfig,
    pub graphics: GraphicsConfig,
    pub debug: DebugConfig,
    pub shaders: ShaderConfig,
}

/// Window settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    pub title: String,
    pub width: u32,
    pub height: u32,
    pub fullscreen: bool,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            title: "triangular".to_string(),
            width: 800,
            height: 600,
            fullscreen: false,
        }
    }
}

/// Graphics settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct GraphicsConfig {
    pub clear_color: [f32; 4],
    pub max_frames_in_flight: usize,
}

impl Default for GraphicsConfig {
    fn default() -> Self {
        Self {
            clear_color: [0.0, 0.0, 0.0, 1.0],
            max_frames_in_flight: 2,
        }
    }
}

/// Debug settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct DebugConfig {
    pub validation_layers: bool,
    pub show_fps: bool,
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            validation_layers: true,
            show_fps: true,
        }
    }
}

/// Paths to precompiled SPIR-V shader artifacts, loaded at startup
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ShaderConfig {
    pub vertex: String,
    pub fragment: String,
}

impl Default for ShaderConfig {
    fn default() -> Self {
        Self {
            vertex: "shaders/triangle.vert.spv".to_string(),
            fragment: "shaders/triangle.frag.spv".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from file, falling back to defaults if not found
    pub fn load() -> Self {
        Self::load_from_path("config.toml").unwrap_or_else(|e| {
            log::warn!("Failed to load config.toml: {}. Using defaults.", e);
            Config::default()
        })
    }

    /// Load configuration from a specific path
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            log::info!("Config file not found at {:?}, using defaults", path);
            return Ok(Config::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;

        log::info!("Loaded configuration from {:?}", path);
        log::debug!("Config: {:?}", config);

        Ok(config)
    }

    /// In-flight frame count, floored at one slot
    pub fn frames_in_flight(&self) -> usize {
        self.graphics.max_frames_in_flight.max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = Config::default();
        assert_eq!(config.window.width, 800);
        assert_eq!(config.window.height, 600);
        assert!(!config.window.fullscreen);
        assert_eq!(config.frames_in_flight(), 2);
        assert_eq!(config.shaders.vertex, "shaders/triangle.vert.spv");
    }

    #[test]
    fn partial_toml_keeps_defaults_for_missing_keys() {
        let config: Config = toml::from_str(
            r#"
            [window]
            width = 1920
            height = 1080

            [graphics]
            max_frames_in_flight = 3
            "#,
        )
        .unwrap();

        assert_eq!(config.window.width, 1920);
        assert_eq!(config.window.title, "triangular");
        assert_eq!(config.frames_in_flight(), 3);
        assert!(config.debug.validation_layers);
    }

    #[test]
    fn zero_frames_in_flight_is_clamped_to_one() {
        let config: Config = toml::from_str(
            r#"
            [graphics]
            max_frames_in_flight = 0
            "#,
        )
        .unwrap();
        assert_eq!(config.frames_in_flight(), 1);
    }
}
