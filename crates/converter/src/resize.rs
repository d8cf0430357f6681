use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use log::debug;

/// Output quality of resampled stills
pub const JPEG_QUALITY: u8 = 85;

/// Resamples a still image to a maximum width, preserving aspect ratio
#[async_trait]
pub trait ImageResizer: Send + Sync {
    async fn resize(&self, image: &[u8], max_width: u32) -> Result<Vec<u8>>;
}

/// Resizer backed by the `image` crate; always emits JPEG
pub struct JpegResizer {
    quality: u8,
}

impl JpegResizer {
    pub fn new() -> Self {
        JpegResizer { quality: JPEG_QUALITY }
    }
}

impl Default for JpegResizer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ImageResizer for JpegResizer {
    async fn resize(&self, image: &[u8], max_width: u32) -> Result<Vec<u8>> {
        if max_width == 0 {
            return Err(anyhow!("Target width must be positive"));
        }

        let data = image.to_vec();
        let quality = self.quality;
        tokio::task::spawn_blocking(move || resize_to_jpeg(&data, max_width, quality))
            .await
            .context("Image resize task panicked")?
    }
}

/// Decode, shrink to `max_width` if wider (never enlarge), and encode as JPEG
pub fn resize_to_jpeg(data: &[u8], max_width: u32, quality: u8) -> Result<Vec<u8>> {
    let img = image::load_from_memory(data).context("Failed to decode image data")?;

    let resized = if img.width() > max_width {
        img.resize(max_width, u32::MAX, FilterType::Lanczos3)
    } else {
        img
    };
    debug!("Resampled still to {}x{}", resized.width(), resized.height());

    // JPEG has no alpha channel
    let rgb = resized.to_rgb8();
    let mut buf = Vec::new();
    JpegEncoder::new_with_quality(&mut buf, quality)
        .encode_image(&rgb)
        .context("Failed to encode resized image as JPEG")?;

    Ok(buf)
}
