//! Application-wide error types.
//!
//! The `Display` text of the per-task variants is what ends up in the status
//! table, so operators see e.g. `unknown video codec: vp9` verbatim.

use std::path::{Path, PathBuf};

use pipeline_common::PipelineError;
use process_utils::ProcessError;
use thiserror::Error;

/// Application-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Application-wide error type.
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{op} {}: {source}", path.display())]
    IoPath {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid task descriptor {}: {reason}", path.display())]
    Descriptor { path: PathBuf, reason: String },

    #[error("src file not exist: {0}")]
    SourceMissing(String),

    #[error("unknown video codec: {0}")]
    UnknownVideoCodec(String),

    #[error("unknown audio codec for track {track}: {codec}")]
    UnknownAudioCodec { track: u32, codec: String },

    #[error("unknown mux format: {0}")]
    UnknownMuxFormat(String),

    #[error("indexing failed: {0}")]
    Indexing(String),

    #[error("{0}")]
    Encode(String),

    #[error("failed to generate script: {0}")]
    Template(String),

    #[error("failed to move {}", path.display())]
    Move {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to delete {}", path.display())]
    Delete {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Process(ProcessError),

    #[error("invalid active time: {0}")]
    InvalidActiveTime(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    #[error("operation cancelled")]
    Cancelled,

    #[error("{0}")]
    Other(String),
}

impl Error {
    pub fn io_path(op: &'static str, path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::IoPath {
            op,
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    pub fn descriptor(path: impl AsRef<Path>, reason: impl Into<String>) -> Self {
        Self::Descriptor {
            path: path.as_ref().to_path_buf(),
            reason: reason.into(),
        }
    }

    pub fn encode(msg: impl Into<String>) -> Self {
        Self::Encode(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled | Self::Pipeline(PipelineError::Cancelled))
    }
}

impl From<ProcessError> for Error {
    fn from(err: ProcessError) -> Self {
        match err {
            ProcessError::Cancelled => Self::Cancelled,
            other => Self::Process(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_descriptions_are_verbatim() {
        assert_eq!(
            Error::UnknownVideoCodec("vp9".into()).to_string(),
            "unknown video codec: vp9"
        );
        assert_eq!(
            Error::SourceMissing("a.mkv".into()).to_string(),
            "src file not exist: a.mkv"
        );
        assert_eq!(
            Error::UnknownAudioCodec {
                track: 2,
                codec: "mp3".into()
            }
            .to_string(),
            "unknown audio codec for track 2: mp3"
        );
        assert_eq!(
            Error::UnknownMuxFormat("avi".into()).to_string(),
            "unknown mux format: avi"
        );
        let err = Error::Move {
            path: PathBuf::from("work/a.vpy"),
            source: std::io::Error::other("denied"),
        };
        assert_eq!(err.to_string(), "failed to move work/a.vpy");
    }

    #[test]
    fn cancelled_process_maps_to_cancelled() {
        let err: Error = ProcessError::Cancelled.into();
        assert!(err.is_cancelled());
    }
}
