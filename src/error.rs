//! Error taxonomy shared by the slideshow components.
//!
//! None of these cross a component boundary as a hard failure: loaders turn
//! them into "no artifact", the thumbnail path turns backend trouble into a
//! placeholder, and the video coordinator swallows them after logging.

use std::path::PathBuf;

/// Failures the slideshow core can observe.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MediaError {
    /// The file does not exist (or vanished between scan and load).
    #[error("media file not found: {0}")]
    NotFound(PathBuf),

    /// The file exists but its content could not be decoded.
    #[error("failed to decode {path}: {reason}")]
    DecodeFailure { path: PathBuf, reason: String },

    /// The native video frame backend is missing or incompatible.
    #[error("video frame backend unavailable: {0}")]
    BackendUnavailable(String),

    /// An operation reached a coordinator or surface after teardown.
    #[error("resource already torn down")]
    ResourceTornDown,

    /// A navigation or deferred play lost a race and was dropped.
    #[error("operation superseded by a concurrent call")]
    ConcurrencyRejected,
}

impl MediaError {
    /// Build a decode failure from any displayable error.
    pub fn decode(path: impl Into<PathBuf>, err: impl std::fmt::Display) -> Self {
        MediaError::DecodeFailure {
            path: path.into(),
            reason: err.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, MediaError>;
