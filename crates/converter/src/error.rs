use serde::Serialize;
use thiserror::Error;

/// Coarse classification of a conversion failure, reported alongside the message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    UnsupportedImageFormat,
    DurationExceeded,
    SizeExceeded,
    ProbeFailed,
    StagingError,
    EngineError,
    Canceled,
    SaveFailed,
}

/// Errors that end a conversion session (or a save attempt)
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConversionError {
    #[error("{extension} images are not supported. Please convert the image to JPG or PNG before uploading.")]
    UnsupportedImageFormat { extension: String },

    #[error("On constrained devices, maximum supported duration is {} hours (audio is {:.0}s).", .max_secs / 3600.0, .actual_secs)]
    DurationExceeded { actual_secs: f64, max_secs: f64 },

    #[error("Audio file too large for constrained device ({actual_bytes} bytes, limit {max_bytes}).")]
    SizeExceeded { actual_bytes: u64, max_bytes: u64 },

    #[error("Could not determine audio duration: {0}")]
    ProbeFailed(String),

    #[error("Failed to prepare inputs: {0}")]
    Staging(String),

    #[error("Encoding failed: {0}")]
    Engine(String),

    #[error("Processing canceled.")]
    Canceled,

    #[error("Failed to save video: {0}")]
    SaveFailed(String),
}

impl ConversionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ConversionError::UnsupportedImageFormat { .. } => ErrorKind::UnsupportedImageFormat,
            ConversionError::DurationExceeded { .. } => ErrorKind::DurationExceeded,
            ConversionError::SizeExceeded { .. } => ErrorKind::SizeExceeded,
            ConversionError::ProbeFailed(_) => ErrorKind::ProbeFailed,
            ConversionError::Staging(_) => ErrorKind::StagingError,
            ConversionError::Engine(_) => ErrorKind::EngineError,
            ConversionError::Canceled => ErrorKind::Canceled,
            ConversionError::SaveFailed(_) => ErrorKind::SaveFailed,
        }
    }

    /// Validation-class errors are raised before any engine work begins
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            ConversionError::UnsupportedImageFormat { .. }
                | ConversionError::DurationExceeded { .. }
                | ConversionError::SizeExceeded { .. }
                | ConversionError::ProbeFailed(_)
        )
    }

    /// Wrap a collaborator failure, keeping the whole context chain in the message
    pub fn staging(err: anyhow::Error) -> Self {
        ConversionError::Staging(format!("{:#}", err))
    }

    pub fn engine(err: anyhow::Error) -> Self {
        ConversionError::Engine(format!("{:#}", err))
    }

    pub fn probe(err: anyhow::Error) -> Self {
        ConversionError::ProbeFailed(format!("{:#}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn test_validation_class() {
        let heic = ConversionError::UnsupportedImageFormat { extension: "HEIC".to_string() };
        assert!(heic.is_validation());
        assert_eq!(heic.kind(), ErrorKind::UnsupportedImageFormat);

        let size = ConversionError::SizeExceeded { actual_bytes: 2, max_bytes: 1 };
        assert!(size.is_validation());

        assert!(ConversionError::ProbeFailed("no duration".to_string()).is_validation());
        assert!(!ConversionError::Engine("exit 1".to_string()).is_validation());
        assert!(!ConversionError::Canceled.is_validation());
    }

    #[test]
    fn test_duration_message_is_in_hours() {
        let err = ConversionError::DurationExceeded { actual_secs: 12000.0, max_secs: 10800.0 };
        let msg = err.to_string();
        assert!(msg.contains("3 hours"), "unexpected message: {}", msg);
    }

    #[test]
    fn test_collaborator_context_is_kept() {
        let err: anyhow::Result<()> = Err(anyhow::anyhow!("no such file")).context("Failed to read default image");
        let wrapped = ConversionError::staging(err.unwrap_err());
        assert_eq!(wrapped.kind(), ErrorKind::StagingError);
        let msg = wrapped.to_string();
        assert!(msg.contains("Failed to read default image"));
        assert!(msg.contains("no such file"));
    }
}
