use std::io::Write;
use std::path::PathBuf;
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use log::debug;
use serde::Deserialize;
use tokio::process::Command;

/// Reads the playback duration of an audio asset
#[async_trait]
pub trait DurationProbe: Send + Sync {
    async fn probe_duration(&self, audio: &[u8]) -> Result<f64>;
}

/// Subset of ffprobe's JSON output that the converter reads
#[derive(Debug, Clone, Deserialize)]
pub struct FFProbeData {
    pub format: FFProbeFormat,
}

/// Format-level metadata from ffprobe
#[derive(Debug, Clone, Deserialize)]
pub struct FFProbeFormat {
    pub format_name: Option<String>,
    pub duration: Option<String>,
    pub bit_rate: Option<String>,
}

impl FFProbeData {
    /// Container duration in seconds; must be finite and positive
    pub fn duration_secs(&self) -> Result<f64> {
        let raw = self
            .format
            .duration
            .as_deref()
            .ok_or_else(|| anyhow!("ffprobe reported no duration"))?;
        let secs: f64 = raw
            .trim()
            .parse()
            .with_context(|| format!("Invalid duration from ffprobe: {}", raw))?;
        if !secs.is_finite() || secs <= 0.0 {
            return Err(anyhow!("Invalid duration from ffprobe: {}", raw));
        }
        Ok(secs)
    }
}

/// Parse ffprobe `-print_format json -show_format` output
pub fn parse_probe_output(json_str: &str) -> Result<FFProbeData> {
    serde_json::from_str(json_str).context("Failed to parse ffprobe JSON")
}

/// Duration probe that runs the ffprobe binary on a temporary copy of the audio
pub struct FfprobeDurationProbe {
    ffprobe_bin: PathBuf,
}

impl FfprobeDurationProbe {
    pub fn new(ffprobe_bin: impl Into<PathBuf>) -> Self {
        FfprobeDurationProbe {
            ffprobe_bin: ffprobe_bin.into(),
        }
    }
}

#[async_trait]
impl DurationProbe for FfprobeDurationProbe {
    async fn probe_duration(&self, audio: &[u8]) -> Result<f64> {
        let mut file = tempfile::Builder::new()
            .prefix("audio2tube-probe-")
            .tempfile()
            .context("Failed to create temporary file for probing")?;
        file.write_all(audio)
            .context("Failed to write audio for probing")?;
        file.flush()?;

        debug!("Executing FFprobe for: {}", file.path().display());

        let output = Command::new(&self.ffprobe_bin)
            .arg("-v")
            .arg("error")
            .arg("-print_format")
            .arg("json")
            .arg("-show_format")
            .arg(file.path())
            .output()
            .await
            .with_context(|| format!(
                "Failed to execute FFprobe. Ensure FFprobe is installed and accessible at: {}",
                self.ffprobe_bin.display()
            ))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let exit_code = output.status.code().unwrap_or(-1);
            return Err(anyhow!(
                "FFprobe failed (exit code {}):\nSTDERR: {}",
                exit_code,
                stderr.trim()
            ));
        }

        let json_str = String::from_utf8(output.stdout)
            .context("FFprobe output is not valid UTF-8")?;

        let data = parse_probe_output(&json_str)?;
        debug!(
            "Probed format {:?}, duration {:?}, bit rate {:?}",
            data.format.format_name, data.format.duration, data.format.bit_rate
        );
        data.duration_secs()
    }
}
