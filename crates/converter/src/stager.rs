use std::path::{Path, PathBuf};
use std::sync::Arc;
use anyhow::Context;
use log::{debug, warn};

use crate::command::OUTPUT_NAME;
use crate::engine::EncodingEngine;
use crate::error::ConversionError;
use crate::params::{file_extension, EncodingConfig};
use crate::resize::ImageResizer;

/// Name of a resampled still inside the engine namespace
pub const IMAGE_NAME: &str = "image.jpg";
const AUDIO_STEM: &str = "input";

/// A user-supplied file: its bytes plus the name it was declared with
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamedAsset {
    pub name: String,
    pub bytes: Vec<u8>,
}

impl NamedAsset {
    pub fn new(name: impl Into<String>, bytes: Vec<u8>) -> Self {
        NamedAsset { name: name.into(), bytes }
    }
}

/// Inputs of one session; dropped once staged
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaInputs {
    pub audio: NamedAsset,
    pub image: Option<NamedAsset>,
}

/// Names of everything placed in the engine namespace for one session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedAssets {
    pub audio_name: String,
    pub image_name: String,
}

impl StagedAssets {
    /// Every name the session may leave behind, output included
    pub fn names(&self) -> [&str; 3] {
        [&self.audio_name, &self.image_name, OUTPUT_NAME]
    }

    /// Best-effort removal; failures are logged and never surface
    pub async fn cleanup(&self, engine: &mut dyn EncodingEngine) {
        for name in self.names() {
            if let Err(e) = engine.unlink(name).await {
                warn!("Failed to remove {} from engine namespace: {:#}", name, e);
            }
        }
    }
}

/// Normalized namespace name for the audio, keeping its original extension
pub fn audio_namespace_name(declared: &str) -> String {
    match file_extension(declared) {
        Some(ext) => format!("{}.{}", AUDIO_STEM, ext),
        None => AUDIO_STEM.to_string(),
    }
}

/// Places session inputs into the engine namespace
pub struct MediaStager {
    resizer: Arc<dyn ImageResizer>,
    default_image: PathBuf,
}

impl MediaStager {
    pub fn new(resizer: Arc<dyn ImageResizer>, default_image: impl Into<PathBuf>) -> Self {
        MediaStager {
            resizer,
            default_image: default_image.into(),
        }
    }

    /// Namespace name used for the bundled placeholder
    fn default_image_name(&self) -> String {
        let ext = self
            .default_image
            .file_name()
            .and_then(|n| n.to_str())
            .and_then(file_extension)
            .unwrap_or_else(|| "png".to_string());
        format!("image.{}", ext)
    }

    /// Stage audio verbatim and the image resampled to the target width (or
    /// the placeholder). On failure, whatever was already written is removed
    /// before the error is returned.
    pub async fn stage(
        &self,
        engine: &mut dyn EncodingEngine,
        inputs: &MediaInputs,
        config: &EncodingConfig,
    ) -> Result<StagedAssets, ConversionError> {
        let staged = StagedAssets {
            audio_name: audio_namespace_name(&inputs.audio.name),
            image_name: match inputs.image {
                Some(_) => IMAGE_NAME.to_string(),
                None => self.default_image_name(),
            },
        };

        let result = self.write_assets(engine, inputs, config, &staged).await;
        match result {
            Ok(()) => {
                debug!("Staged {} and {}", staged.audio_name, staged.image_name);
                Ok(staged)
            }
            Err(e) => {
                staged.cleanup(engine).await;
                Err(ConversionError::staging(e))
            }
        }
    }

    async fn write_assets(
        &self,
        engine: &mut dyn EncodingEngine,
        inputs: &MediaInputs,
        config: &EncodingConfig,
        staged: &StagedAssets,
    ) -> anyhow::Result<()> {
        engine
            .write_file(&staged.audio_name, &inputs.audio.bytes)
            .await
            .with_context(|| format!("Failed to stage audio {}", inputs.audio.name))?;

        let image_bytes = match &inputs.image {
            Some(image) => self
                .resizer
                .resize(&image.bytes, config.target_width)
                .await
                .with_context(|| format!("Failed to resample image {}", image.name))?,
            None => fetch_default_image(&self.default_image).await?,
        };

        engine
            .write_file(&staged.image_name, &image_bytes)
            .await
            .context("Failed to stage image")?;

        Ok(())
    }
}

async fn fetch_default_image(path: &Path) -> anyhow::Result<Vec<u8>> {
    tokio::fs::read(path)
        .await
        .with_context(|| format!("Failed to read default image: {}", path.display()))
}
