use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use log::{debug, info};
use tempfile::TempDir;
use tokio::io::AsyncReadExt;
use tokio::process::Command;

use crate::engine::{EncodingEngine, EngineFactory, LogSender};

/// Oldest FFmpeg major version known to handle the still-image encode
const MIN_FFMPEG_MAJOR: u32 = 4;
/// Stderr lines kept for error reports
const STDERR_TAIL_LINES: usize = 20;

/// FFmpeg version information
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FFmpegVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl FFmpegVersion {
    pub fn meets_requirement(&self) -> bool {
        self.major >= MIN_FFMPEG_MAJOR
    }

    /// Parse version from FFmpeg version string
    /// Example: "ffmpeg version 6.1.1-3ubuntu5" -> FFmpegVersion { major: 6, minor: 1, patch: 1 }
    pub fn parse(version_str: &str) -> Result<Self> {
        let version_part = version_str
            .split_whitespace()
            .find(|s| s.chars().next().map(|c| c.is_ascii_digit()).unwrap_or(false))
            .ok_or_else(|| anyhow!("No version number found in: {}", version_str))?;

        // Distro builds append suffixes such as "-3ubuntu5" or "-static"
        let numeric = version_part
            .split(|c: char| c != '.' && !c.is_ascii_digit())
            .next()
            .unwrap_or(version_part);

        let mut parts = numeric.split('.').filter(|p| !p.is_empty());
        let major = parts
            .next()
            .ok_or_else(|| anyhow!("Invalid version format: {}", version_part))?
            .parse::<u32>()
            .with_context(|| format!("Invalid major version: {}", version_part))?;
        let minor = parts.next().and_then(|p| p.parse().ok()).unwrap_or(0);
        let patch = parts.next().and_then(|p| p.parse().ok()).unwrap_or(0);

        Ok(FFmpegVersion { major, minor, patch })
    }
}

/// Splits a byte stream into lines on both `\n` and `\r`.
///
/// FFmpeg rewrites its status line in place with carriage returns, so a
/// newline-only reader would see progress only when the run ends.
#[derive(Debug, Default)]
pub struct LineSplitter {
    pending: Vec<u8>,
}

impl LineSplitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk and return every line it completes, skipping blank ones
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        let mut lines = Vec::new();
        for &byte in chunk {
            if byte == b'\n' || byte == b'\r' {
                self.flush_into(&mut lines);
            } else {
                self.pending.push(byte);
            }
        }
        lines
    }

    /// Return the trailing partial line, if any
    pub fn finish(&mut self) -> Option<String> {
        let mut lines = Vec::new();
        self.flush_into(&mut lines);
        lines.pop()
    }

    fn flush_into(&mut self, lines: &mut Vec<String>) {
        if self.pending.is_empty() {
            return;
        }
        let line = String::from_utf8_lossy(&self.pending).trim().to_string();
        self.pending.clear();
        if !line.is_empty() {
            lines.push(line);
        }
    }
}

/// Encoding engine backed by the ffmpeg binary and a private temp directory
pub struct FfmpegEngine {
    ffmpeg_bin: PathBuf,
    workspace: Option<TempDir>,
    logger: Option<LogSender>,
}

impl FfmpegEngine {
    pub fn new(ffmpeg_bin: impl Into<PathBuf>) -> Self {
        FfmpegEngine {
            ffmpeg_bin: ffmpeg_bin.into(),
            workspace: None,
            logger: None,
        }
    }

    /// Detect FFmpeg version
    async fn detect_version(ffmpeg_bin: &Path) -> Result<FFmpegVersion> {
        let output = Command::new(ffmpeg_bin)
            .arg("-version")
            .output()
            .await
            .with_context(|| format!("Failed to execute FFmpeg at: {}", ffmpeg_bin.display()))?;

        if !output.status.success() {
            return Err(anyhow!("FFmpeg version check failed"));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let first_line = stdout.lines().next()
            .ok_or_else(|| anyhow!("Empty output from FFmpeg -version"))?;

        FFmpegVersion::parse(first_line)
    }

    fn workspace_dir(&self) -> Result<&Path> {
        self.workspace
            .as_ref()
            .map(|dir| dir.path())
            .ok_or_else(|| anyhow!("FFmpeg engine is not loaded"))
    }

    /// Resolve a namespace name to a path, refusing anything but plain file names
    fn resolve(&self, name: &str) -> Result<PathBuf> {
        let is_plain = !name.is_empty()
            && name != "."
            && name != ".."
            && !name.contains('/')
            && !name.contains('\\');
        if !is_plain {
            return Err(anyhow!("Invalid file name in engine namespace: {:?}", name));
        }
        Ok(self.workspace_dir()?.join(name))
    }

    fn log_line(&self, line: String) {
        debug!("FFmpeg: {}", line);
        if let Some(logger) = &self.logger {
            // Receiver gone means nobody is watching progress anymore
            let _ = logger.send(line);
        }
    }
}

#[async_trait]
impl EncodingEngine for FfmpegEngine {
    fn is_loaded(&self) -> bool {
        self.workspace.is_some()
    }

    async fn load(&mut self) -> Result<()> {
        if self.is_loaded() {
            return Ok(());
        }

        let version = Self::detect_version(&self.ffmpeg_bin).await?;
        if !version.meets_requirement() {
            return Err(anyhow!(
                "FFmpeg version {}.{}.{} does not meet requirement (>= {}.0). \
                 Please install a newer FFmpeg.",
                version.major, version.minor, version.patch, MIN_FFMPEG_MAJOR
            ));
        }

        let workspace = tempfile::Builder::new()
            .prefix("audio2tube-")
            .tempdir()
            .context("Failed to create engine working directory")?;
        info!(
            "FFmpeg {}.{}.{} loaded, working directory {}",
            version.major, version.minor, version.patch,
            workspace.path().display()
        );
        self.workspace = Some(workspace);
        Ok(())
    }

    async fn write_file(&mut self, name: &str, bytes: &[u8]) -> Result<()> {
        let path = self.resolve(name)?;
        tokio::fs::write(&path, bytes)
            .await
            .with_context(|| format!("Failed to write {}", path.display()))
    }

    async fn read_file(&mut self, name: &str) -> Result<Vec<u8>> {
        let path = self.resolve(name)?;
        tokio::fs::read(&path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))
    }

    async fn unlink(&mut self, name: &str) -> Result<()> {
        let path = self.resolve(name)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("Failed to remove {}", path.display())),
        }
    }

    async fn run(&mut self, args: &[String]) -> Result<()> {
        let dir = self.workspace_dir()?.to_path_buf();
        debug!("Executing FFmpeg: {} {}", self.ffmpeg_bin.display(), args.join(" "));

        let mut child = Command::new(&self.ffmpeg_bin)
            .arg("-hide_banner")
            .arg("-y")
            .args(args)
            .current_dir(&dir)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            // Dropping an in-flight run (cancellation) must not leave ffmpeg behind
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!(
                "Failed to spawn FFmpeg process at: {}. Ensure FFmpeg is installed and accessible.",
                self.ffmpeg_bin.display()
            ))?;

        let mut stderr = child.stderr.take()
            .ok_or_else(|| anyhow!("Failed to capture FFmpeg stderr"))?;

        let mut splitter = LineSplitter::new();
        let mut tail: VecDeque<String> = VecDeque::with_capacity(STDERR_TAIL_LINES);
        let mut chunk = [0u8; 4096];
        loop {
            let n = stderr.read(&mut chunk).await.context("Failed to read FFmpeg stderr")?;
            if n == 0 {
                break;
            }
            for line in splitter.push(&chunk[..n]) {
                if tail.len() == STDERR_TAIL_LINES {
                    tail.pop_front();
                }
                tail.push_back(line.clone());
                self.log_line(line);
            }
        }
        if let Some(line) = splitter.finish() {
            tail.push_back(line.clone());
            self.log_line(line);
        }

        let status = child.wait().await.context("Failed to wait for FFmpeg process")?;
        if !status.success() {
            let exit = status
                .code()
                .map(|c| c.to_string())
                .unwrap_or_else(|| "killed by signal".to_string());
            return Err(anyhow!(
                "FFmpeg exited with {}\n{}",
                exit,
                tail.into_iter().collect::<Vec<_>>().join("\n")
            ));
        }

        info!("FFmpeg execution completed successfully");
        Ok(())
    }

    fn set_logger(&mut self, logger: Option<LogSender>) {
        self.logger = logger;
    }

    async fn exit(&mut self) -> Result<()> {
        self.logger = None;
        if let Some(workspace) = self.workspace.take() {
            let path = workspace.path().to_path_buf();
            workspace
                .close()
                .with_context(|| format!("Failed to remove engine working directory {}", path.display()))?;
            debug!("FFmpeg engine torn down, removed {}", path.display());
        }
        Ok(())
    }
}

/// Creates unloaded [`FfmpegEngine`] instances for one binary
pub struct FfmpegEngineFactory {
    ffmpeg_bin: PathBuf,
}

impl FfmpegEngineFactory {
    pub fn new(ffmpeg_bin: impl Into<PathBuf>) -> Self {
        FfmpegEngineFactory {
            ffmpeg_bin: ffmpeg_bin.into(),
        }
    }
}

impl EngineFactory for FfmpegEngineFactory {
    fn create(&self) -> Box<dyn EncodingEngine> {
        Box::new(FfmpegEngine::new(self.ffmpeg_bin.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    #[test]
    fn test_version_parsing() {
        let v = FFmpegVersion::parse("ffmpeg version 6.1.1 Copyright (c) 2000-2023").unwrap();
        assert_eq!(v, FFmpegVersion { major: 6, minor: 1, patch: 1 });

        let v = FFmpegVersion::parse("ffmpeg version 4.4.2-0ubuntu0.22.04.1 Copyright").unwrap();
        assert_eq!(v, FFmpegVersion { major: 4, minor: 4, patch: 2 });

        let v = FFmpegVersion::parse("ffmpeg version 7.0-static https://johnvansickle.com").unwrap();
        assert_eq!(v, FFmpegVersion { major: 7, minor: 0, patch: 0 });

        assert!(FFmpegVersion::parse("ffmpeg version N/A").is_err());
    }

    #[test]
    fn test_version_requirement() {
        assert!(FFmpegVersion { major: 4, minor: 0, patch: 0 }.meets_requirement());
        assert!(!FFmpegVersion { major: 3, minor: 4, patch: 8 }.meets_requirement());
    }

    #[test]
    fn test_line_splitter_handles_carriage_returns() {
        let mut splitter = LineSplitter::new();
        let lines = splitter.push(b"Input #0, mp3\nframe=1 time=00:00:01.00 speed=1x\rframe=2 time=00:0");
        assert_eq!(lines, vec!["Input #0, mp3", "frame=1 time=00:00:01.00 speed=1x"]);

        let lines = splitter.push(b"0:02.00 speed=1x\r\n\r\n");
        assert_eq!(lines, vec!["frame=2 time=00:00:02.00 speed=1x"]);
        assert_eq!(splitter.finish(), None);

        splitter.push(b"trailing");
        assert_eq!(splitter.finish(), Some("trailing".to_string()));
    }

    #[tokio::test]
    async fn test_namespace_requires_load() {
        let mut engine = FfmpegEngine::new("ffmpeg");
        assert!(!engine.is_loaded());
        assert!(engine.write_file("input.mp3", b"x").await.is_err());
    }

    #[tokio::test]
    async fn test_namespace_round_trip() {
        // Bypass load() so the test does not depend on an installed ffmpeg
        let mut engine = FfmpegEngine::new("ffmpeg");
        engine.workspace = Some(tempfile::tempdir().unwrap());

        engine.write_file("input.mp3", b"ID3data").await.unwrap();
        assert_eq!(engine.read_file("input.mp3").await.unwrap(), b"ID3data");

        engine.unlink("input.mp3").await.unwrap();
        assert!(engine.read_file("input.mp3").await.is_err());
        // Unlinking again tolerates the missing file
        engine.unlink("input.mp3").await.unwrap();

        assert!(engine.write_file("../escape.mp3", b"x").await.is_err());
        assert!(engine.write_file("", b"x").await.is_err());

        engine.exit().await.unwrap();
        assert!(!engine.is_loaded());
    }

    #[tokio::test]
    async fn test_run_streams_log_lines() {
        let mut engine = FfmpegEngine::new("ffmpeg");
        if engine.load().await.is_err() {
            println!("FFmpeg not available, skipping integration test");
            return;
        }

        let (tx, mut rx) = mpsc::unbounded_channel();
        engine.set_logger(Some(tx));
        let args: Vec<String> = ["-f", "lavfi", "-i", "anullsrc", "-t", "1", "-f", "null", "-"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        engine.run(&args).await.unwrap();

        let mut saw_time = false;
        while let Ok(line) = rx.try_recv() {
            saw_time |= line.contains("time=");
        }
        assert!(saw_time, "expected at least one status line");

        let bad: Vec<String> = vec!["-i".to_string(), "missing-input.wav".to_string(), "out.mp4".to_string()];
        assert!(engine.run(&bad).await.is_err());

        engine.exit().await.unwrap();
    }
}
