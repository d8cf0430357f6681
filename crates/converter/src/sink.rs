use std::path::{Path, PathBuf};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use log::info;

/// Name used when the audio file name has no usable stem
const FALLBACK_STEM: &str = "audio2tube";

/// Commits a finished video to user-controlled storage
#[async_trait]
pub trait ArtifactSink: Send + Sync {
    /// Store `bytes` under (or close to) `name`; returns where it ended up
    async fn save(&self, name: &str, bytes: &[u8]) -> Result<PathBuf>;
}

/// Suggested file name for the video made from `audio_name`
pub fn suggested_output_name(audio_name: &str) -> String {
    let file_name = Path::new(audio_name)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("");
    let stem = match file_name.rsplit_once('.') {
        Some((stem, _)) => stem,
        None => file_name,
    };
    let stem = if stem.trim().is_empty() { FALLBACK_STEM } else { stem };
    format!("{}_video.mp4", stem)
}

/// Writes to a path the user picked up front
pub struct FileSink {
    path: PathBuf,
}

impl FileSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        FileSink { path: path.into() }
    }
}

#[async_trait]
impl ArtifactSink for FileSink {
    async fn save(&self, _name: &str, bytes: &[u8]) -> Result<PathBuf> {
        tokio::fs::write(&self.path, bytes)
            .await
            .with_context(|| format!("Failed to write video to {}", self.path.display()))?;
        info!("Saved video to {}", self.path.display());
        Ok(self.path.clone())
    }
}

/// Drops the video into a directory under its suggested name, never
/// overwriting: `name.mp4`, `name (1).mp4`, `name (2).mp4`, ...
pub struct DownloadDirSink {
    dir: PathBuf,
}

impl DownloadDirSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        DownloadDirSink { dir: dir.into() }
    }

    fn candidate(&self, name: &str, attempt: u32) -> PathBuf {
        if attempt == 0 {
            return self.dir.join(name);
        }
        let (stem, ext) = match name.rsplit_once('.') {
            Some((stem, ext)) => (stem, format!(".{}", ext)),
            None => (name, String::new()),
        };
        self.dir.join(format!("{} ({}){}", stem, attempt, ext))
    }
}

#[async_trait]
impl ArtifactSink for DownloadDirSink {
    async fn save(&self, name: &str, bytes: &[u8]) -> Result<PathBuf> {
        if name.contains('/') || name.contains('\\') || name.is_empty() {
            return Err(anyhow!("Invalid output file name: {:?}", name));
        }
        tokio::fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("Failed to create output directory: {}", self.dir.display()))?;

        for attempt in 0..1000 {
            let path = self.candidate(name, attempt);
            let file = tokio::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
                .await;
            match file {
                Ok(mut file) => {
                    use tokio::io::AsyncWriteExt;
                    file.write_all(bytes)
                        .await
                        .with_context(|| format!("Failed to write video to {}", path.display()))?;
                    file.flush().await?;
                    info!("Saved video to {}", path.display());
                    return Ok(path);
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => continue,
                Err(e) => {
                    return Err(e).with_context(|| format!("Failed to create {}", path.display()));
                }
            }
        }

        Err(anyhow!("Too many files named like {} in {}", name, self.dir.display()))
    }
}
