pub mod config;
pub mod device;
pub mod error;
pub mod params;
pub mod progress;
pub mod engine;
pub mod command;
pub mod resize;
pub mod ffprobe;
pub mod ffmpeg;
pub mod sink;
pub mod stager;
pub mod session;

#[cfg(test)]
mod testing;

pub use config::ConverterConfig;
pub use device::{DeviceClass, DeviceProfile};
pub use error::{ConversionError, ErrorKind};
pub use params::{EncodingConfig, FrameRate, ParameterSelector};
pub use progress::{ProgressMonitor, ProgressSample};
pub use sink::{ArtifactSink, DownloadDirSink, FileSink};
pub use stager::{MediaInputs, NamedAsset};
pub use session::{
    Collaborators, Command, ConversionRequest, Orchestrator, OutputArtifact, SessionEvent,
    SessionState, StateKind,
};
