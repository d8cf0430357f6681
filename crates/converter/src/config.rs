use std::path::{Path, PathBuf};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::device::DeviceClass;
use crate::params::{EncodingLimits, SelectionPolicy};

/// Configuration for the image + audio converter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConverterConfig {
    /// Path to the ffmpeg binary
    pub ffmpeg_bin: PathBuf,
    /// Path to the ffprobe binary
    pub ffprobe_bin: PathBuf,
    /// Placeholder still used when no image is supplied
    pub default_image: PathBuf,
    /// Directory used by the fallback save sink
    pub output_dir: PathBuf,
    /// Device class override (`auto` inspects the host)
    pub device_class: DeviceClass,
    /// Output width used when the caller does not pick one
    pub default_width: u32,
    /// Width forced on constrained devices
    pub safe_width: u32,
    /// Longest audio accepted on constrained devices, in seconds
    pub max_duration_secs: f64,
    /// Largest audio file accepted on constrained devices, in bytes
    pub max_audio_bytes: u64,
}

impl Default for ConverterConfig {
    fn default() -> Self {
        Self::default_config()
    }
}

impl ConverterConfig {
    /// Create a default configuration with sensible values
    pub fn default_config() -> Self {
        Self {
            ffmpeg_bin: PathBuf::from("ffmpeg"),
            ffprobe_bin: PathBuf::from("ffprobe"),
            default_image: PathBuf::from("assets/default.png"),
            output_dir: PathBuf::from("."),
            device_class: DeviceClass::Auto,
            default_width: 1920,
            safe_width: 1280,
            max_duration_secs: 3.0 * 60.0 * 60.0, // 3 hours
            max_audio_bytes: 200 * 1024 * 1024,   // 200MB
        }
    }

    /// Load configuration from a file, or return defaults if path is None or file doesn't exist
    pub fn load_config(path: Option<&Path>) -> Result<Self> {
        let mut config = Self::default_config();

        if let Some(config_path) = path {
            if config_path.exists() {
                let content = std::fs::read_to_string(config_path)
                    .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

                // TOML by extension, JSON otherwise
                if config_path.extension().and_then(|s| s.to_str()) == Some("toml") {
                    config = toml::from_str(&content)
                        .with_context(|| format!("Failed to parse TOML config: {}", config_path.display()))?;
                } else {
                    config = serde_json::from_str(&content)
                        .with_context(|| format!("Failed to parse JSON config: {}", config_path.display()))?;
                }
            }
        }

        Ok(config)
    }

    /// Limits applied to constrained devices
    pub fn limits(&self) -> EncodingLimits {
        EncodingLimits {
            max_duration_secs: self.max_duration_secs,
            max_audio_bytes: self.max_audio_bytes,
        }
    }

    pub fn selection_policy(&self) -> SelectionPolicy {
        SelectionPolicy {
            limits: self.limits(),
            safe_width: self.safe_width,
        }
    }
}
