//! In-memory collaborators for exercising the session without ffmpeg.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use anyhow::{anyhow, Result};
use async_trait::async_trait;

use crate::engine::{EncodingEngine, EngineFactory, LogSender};
use crate::ffprobe::DurationProbe;
use crate::resize::ImageResizer;
use crate::sink::ArtifactSink;

/// What a scripted engine does when asked to run
#[derive(Debug, Clone)]
pub enum RunScript {
    /// Emit the lines, write `output` as output.mp4, exit 0
    Succeed { lines: Vec<String>, output: Vec<u8> },
    /// Emit the lines, then fail
    Fail { lines: Vec<String>, message: String },
    /// Emit the lines, then never finish
    Hang { lines: Vec<String> },
}

/// Everything observable about one engine instance
#[derive(Debug, Default)]
pub struct EngineRecord {
    pub calls: Vec<String>,
    pub files: HashMap<String, Vec<u8>>,
    pub runs: Vec<Vec<String>>,
    pub exited: bool,
}

pub struct MemoryEngine {
    record: Arc<Mutex<EngineRecord>>,
    script: RunScript,
    loaded: bool,
    logger: Option<LogSender>,
    fail_writes_for: Option<String>,
    fail_load: bool,
}

impl MemoryEngine {
    fn note(&self, call: impl Into<String>) {
        self.record.lock().unwrap().calls.push(call.into());
    }

    fn emit(&self, lines: &[String]) {
        if let Some(logger) = &self.logger {
            for line in lines {
                let _ = logger.send(line.clone());
            }
        }
    }
}

#[async_trait]
impl EncodingEngine for MemoryEngine {
    fn is_loaded(&self) -> bool {
        self.loaded
    }

    async fn load(&mut self) -> Result<()> {
        self.note("load");
        if self.fail_load {
            return Err(anyhow!("FFmpeg not found"));
        }
        self.loaded = true;
        Ok(())
    }

    async fn write_file(&mut self, name: &str, bytes: &[u8]) -> Result<()> {
        self.note(format!("write {}", name));
        if self.fail_writes_for.as_deref() == Some(name) {
            return Err(anyhow!("disk full"));
        }
        self.record.lock().unwrap().files.insert(name.to_string(), bytes.to_vec());
        Ok(())
    }

    async fn read_file(&mut self, name: &str) -> Result<Vec<u8>> {
        self.note(format!("read {}", name));
        self.record
            .lock()
            .unwrap()
            .files
            .get(name)
            .cloned()
            .ok_or_else(|| anyhow!("{} not found", name))
    }

    async fn unlink(&mut self, name: &str) -> Result<()> {
        self.note(format!("unlink {}", name));
        self.record.lock().unwrap().files.remove(name);
        Ok(())
    }

    async fn run(&mut self, args: &[String]) -> Result<()> {
        self.note("run");
        self.record.lock().unwrap().runs.push(args.to_vec());
        match self.script.clone() {
            RunScript::Succeed { lines, output } => {
                self.emit(&lines);
                self.record.lock().unwrap().files.insert("output.mp4".to_string(), output);
                Ok(())
            }
            RunScript::Fail { lines, message } => {
                self.emit(&lines);
                Err(anyhow!(message))
            }
            RunScript::Hang { lines } => {
                self.emit(&lines);
                std::future::pending::<()>().await;
                Ok(())
            }
        }
    }

    fn set_logger(&mut self, logger: Option<LogSender>) {
        self.logger = logger;
    }

    async fn exit(&mut self) -> Result<()> {
        self.note("exit");
        let mut record = self.record.lock().unwrap();
        record.exited = true;
        record.files.clear();
        self.loaded = false;
        Ok(())
    }
}

/// Hands out scripted engines and remembers every instance it created
#[derive(Clone)]
pub struct MemoryEngineFactory {
    pub script: RunScript,
    pub fail_writes_for: Option<String>,
    pub fail_load: bool,
    pub engines: Arc<Mutex<Vec<Arc<Mutex<EngineRecord>>>>>,
}

impl MemoryEngineFactory {
    pub fn new(script: RunScript) -> Self {
        MemoryEngineFactory {
            script,
            fail_writes_for: None,
            fail_load: false,
            engines: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn engine(&self, index: usize) -> Arc<Mutex<EngineRecord>> {
        self.engines.lock().unwrap()[index].clone()
    }

    pub fn created(&self) -> usize {
        self.engines.lock().unwrap().len()
    }

    pub fn total_calls(&self) -> usize {
        self.engines
            .lock()
            .unwrap()
            .iter()
            .map(|e| e.lock().unwrap().calls.len())
            .sum()
    }

    /// A standalone engine for tests that do not go through the session
    pub fn create_memory(&self) -> (MemoryEngine, Arc<Mutex<EngineRecord>>) {
        let record = Arc::new(Mutex::new(EngineRecord::default()));
        self.engines.lock().unwrap().push(record.clone());
        let engine = MemoryEngine {
            record: record.clone(),
            script: self.script.clone(),
            loaded: false,
            logger: None,
            fail_writes_for: self.fail_writes_for.clone(),
            fail_load: self.fail_load,
        };
        (engine, record)
    }
}

impl EngineFactory for MemoryEngineFactory {
    fn create(&self) -> Box<dyn EncodingEngine> {
        Box::new(self.create_memory().0)
    }
}

/// Probe that reports a fixed duration (or a fixed failure)
pub struct FixedProbe {
    pub result: Result<f64, String>,
    pub calls: Mutex<usize>,
    /// Time spent "probing" before answering
    pub delay: Option<Duration>,
}

impl FixedProbe {
    pub fn secs(duration: f64) -> Self {
        FixedProbe { result: Ok(duration), calls: Mutex::new(0), delay: None }
    }

    pub fn failing(message: &str) -> Self {
        FixedProbe { result: Err(message.to_string()), calls: Mutex::new(0), delay: None }
    }

    pub fn slow(duration: f64, delay: Duration) -> Self {
        FixedProbe { delay: Some(delay), ..Self::secs(duration) }
    }
}

#[async_trait]
impl DurationProbe for FixedProbe {
    async fn probe_duration(&self, _audio: &[u8]) -> Result<f64> {
        *self.calls.lock().unwrap() += 1;
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.result.clone().map_err(|e| anyhow!(e))
    }
}

/// Resizer that tags its output with the requested width
#[derive(Default)]
pub struct TaggingResizer {
    pub widths: Mutex<Vec<u32>>,
    pub fail: bool,
}

#[async_trait]
impl ImageResizer for TaggingResizer {
    async fn resize(&self, _image: &[u8], max_width: u32) -> Result<Vec<u8>> {
        self.widths.lock().unwrap().push(max_width);
        if self.fail {
            return Err(anyhow!("corrupt image"));
        }
        Ok(format!("jpeg@{}", max_width).into_bytes())
    }
}

/// Sink that keeps saved artifacts in memory
#[derive(Default)]
pub struct MemorySink {
    pub saved: Mutex<Vec<(String, Vec<u8>)>>,
    pub fail: bool,
}

#[async_trait]
impl ArtifactSink for MemorySink {
    async fn save(&self, name: &str, bytes: &[u8]) -> Result<PathBuf> {
        if self.fail {
            return Err(anyhow!("permission denied"));
        }
        self.saved.lock().unwrap().push((name.to_string(), bytes.to_vec()));
        Ok(PathBuf::from(name))
    }
}
