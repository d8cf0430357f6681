use std::cmp::Ordering;
use std::fmt;
use serde::Serialize;
use log::info;

use crate::device::DeviceProfile;
use crate::error::ConversionError;

/// Audio containers that can be muxed into the output without re-encoding
const PASS_THROUGH_EXTENSIONS: &[&str] = &["mp3", "aac", "m4a"];
/// Still-image families the encoder cannot decode
const UNSUPPORTED_IMAGE_EXTENSIONS: &[&str] = &["heic", "heif"];

/// Codec and bitrate used when the source audio has to be re-encoded
pub const TRANSCODE_AUDIO_CODEC: &str = "aac";
pub const TRANSCODE_AUDIO_BITRATE: &str = "96k";

const ONE_HOUR_SECS: f64 = 3600.0;
const TWO_HOURS_SECS: f64 = 7200.0;

/// Output frame rate as an exact fraction of one frame per second
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FrameRate {
    num: u32,
    den: u32,
}

impl FrameRate {
    /// 0.8 fps, used for audio under an hour
    pub const SHORT: FrameRate = FrameRate::new(4, 5);
    /// 0.4 fps, used for audio under two hours and as the constrained-device cap
    pub const LONG: FrameRate = FrameRate::new(2, 5);
    /// 0.25 fps, used for everything longer
    pub const VERY_LONG: FrameRate = FrameRate::new(1, 4);

    pub const fn new(num: u32, den: u32) -> Self {
        FrameRate { num, den }
    }

    pub fn as_f64(&self) -> f64 {
        self.num as f64 / self.den as f64
    }
}

impl Ord for FrameRate {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.num as u64 * other.den as u64).cmp(&(other.num as u64 * self.den as u64))
    }
}

impl PartialOrd for FrameRate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for FrameRate {
    // Decimal form, which is what the encoder's -framerate / -r flags expect
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_f64())
    }
}

/// How the source audio ends up in the output container
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AudioCodecMode {
    PassThrough,
    Transcode,
}

/// Validated encoding parameters for one session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct EncodingConfig {
    pub frame_rate: FrameRate,
    pub target_width: u32,
    pub audio_codec_mode: AudioCodecMode,
}

/// Ceilings applied to constrained devices only
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct EncodingLimits {
    pub max_duration_secs: f64,
    pub max_audio_bytes: u64,
}

/// Everything the selector needs besides the per-session inputs
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SelectionPolicy {
    pub limits: EncodingLimits,
    pub safe_width: u32,
}

/// Lower-cased extension of a declared file name, if it has one
pub(crate) fn file_extension(name: &str) -> Option<String> {
    let (stem, ext) = name.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

/// Frame rate for a given audio duration, before any device cap.
/// Non-increasing in duration.
pub fn frame_rate_for_duration(duration_secs: f64) -> FrameRate {
    if duration_secs < ONE_HOUR_SECS {
        FrameRate::SHORT
    } else if duration_secs < TWO_HOURS_SECS {
        FrameRate::LONG
    } else {
        FrameRate::VERY_LONG
    }
}

/// Pass-through when the audio is already in a container the output accepts
pub fn audio_codec_mode(audio_name: &str) -> AudioCodecMode {
    match file_extension(audio_name) {
        Some(ext) if PASS_THROUGH_EXTENSIONS.contains(&ext.as_str()) => AudioCodecMode::PassThrough,
        _ => AudioCodecMode::Transcode,
    }
}

/// Reject still-image families the encoder cannot read
pub fn check_image_format(image_name: &str) -> Result<(), ConversionError> {
    match file_extension(image_name) {
        Some(ext) if UNSUPPORTED_IMAGE_EXTENSIONS.contains(&ext.as_str()) => {
            Err(ConversionError::UnsupportedImageFormat {
                extension: ext.to_ascii_uppercase(),
            })
        }
        _ => Ok(()),
    }
}

/// Derives encoding parameters from input characteristics and device class
pub struct ParameterSelector {
    policy: SelectionPolicy,
}

impl ParameterSelector {
    pub fn new(policy: SelectionPolicy) -> Self {
        ParameterSelector { policy }
    }

    /// Select parameters, or reject when a constrained device's limits are exceeded
    pub fn select(
        &self,
        duration_secs: f64,
        device: DeviceProfile,
        audio_bytes: u64,
        audio_name: &str,
        requested_width: u32,
    ) -> Result<EncodingConfig, ConversionError> {
        if device.is_constrained {
            self.enforce_limits(duration_secs, audio_bytes)?;
        }

        let mut frame_rate = frame_rate_for_duration(duration_secs);
        let mut target_width = requested_width;

        if device.is_constrained {
            frame_rate = frame_rate.min(FrameRate::LONG);
            target_width = self.policy.safe_width;
        }

        let config = EncodingConfig {
            frame_rate,
            target_width,
            audio_codec_mode: audio_codec_mode(audio_name),
        };

        self.log_decisions(duration_secs, device, requested_width, &config);

        Ok(config)
    }

    fn enforce_limits(&self, duration_secs: f64, audio_bytes: u64) -> Result<(), ConversionError> {
        let limits = &self.policy.limits;

        if duration_secs > limits.max_duration_secs {
            return Err(ConversionError::DurationExceeded {
                actual_secs: duration_secs,
                max_secs: limits.max_duration_secs,
            });
        }

        if audio_bytes > limits.max_audio_bytes {
            return Err(ConversionError::SizeExceeded {
                actual_bytes: audio_bytes,
                max_bytes: limits.max_audio_bytes,
            });
        }

        Ok(())
    }

    fn log_decisions(
        &self,
        duration_secs: f64,
        device: DeviceProfile,
        requested_width: u32,
        config: &EncodingConfig,
    ) {
        let base_rate = frame_rate_for_duration(duration_secs);
        info!("Encoding decisions for {:.1}s of audio:", duration_secs);
        info!("  Frame rate: {} fps (duration tier {} fps)", config.frame_rate, base_rate);
        if device.is_constrained {
            if config.frame_rate != base_rate {
                info!("  Constrained device: frame rate capped at {} fps", FrameRate::LONG);
            }
            if requested_width != config.target_width {
                info!("  Constrained device: width forced from {} to {}", requested_width, config.target_width);
            }
        }
        info!("  Target width: {}", config.target_width);
        match config.audio_codec_mode {
            AudioCodecMode::PassThrough => info!("  Audio: pass-through"),
            AudioCodecMode::Transcode => info!(
                "  Audio: transcode to {} at {}",
                TRANSCODE_AUDIO_CODEC, TRANSCODE_AUDIO_BITRATE
            ),
        }
    }
}
