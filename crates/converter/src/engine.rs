//! Contract of the encoding engine the session drives.
//!
//! An engine owns a private file namespace, runs one encode at a time, and
//! streams its textual log through a channel. It offers no fine-grained
//! abort: cancellation means tearing the whole instance down with
//! [`EncodingEngine::exit`] and creating a fresh one from an
//! [`EngineFactory`].

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::mpsc;

/// Receives engine log lines in the order the engine produced them
pub type LogSender = mpsc::UnboundedSender<String>;

#[async_trait]
pub trait EncodingEngine: Send {
    fn is_loaded(&self) -> bool;

    /// Suspends until the engine is ready to accept files and runs
    async fn load(&mut self) -> Result<()>;

    async fn write_file(&mut self, name: &str, bytes: &[u8]) -> Result<()>;

    async fn read_file(&mut self, name: &str) -> Result<Vec<u8>>;

    /// Remove a file from the namespace. Missing files are not an error.
    async fn unlink(&mut self, name: &str) -> Result<()>;

    /// Run one encode; fails on nonzero or aborted exit
    async fn run(&mut self, args: &[String]) -> Result<()>;

    fn set_logger(&mut self, logger: Option<LogSender>);

    /// Tear down the instance, discarding its namespace
    async fn exit(&mut self) -> Result<()>;
}

/// Creates fresh engine instances
pub trait EngineFactory: Send + Sync {
    fn create(&self) -> Box<dyn EncodingEngine>;
}
