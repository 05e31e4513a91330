//! Error types for auralis-demux.

use std::io;
use thiserror::Error;

/// Result type for auralis-demux operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for auralis-demux operations.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The container structure could not be parsed.
    #[error("Invalid container: {0}")]
    InvalidContainer(String),

    /// No decodable audio track was found.
    #[error("No decodable audio track")]
    NoAudioTrack,

    /// A track was found but its tables or configuration are beyond repair.
    #[error("Track {track_id} is undecodable")]
    TrackUndecodable { track_id: u32 },

    /// A required byte range never became available in a streaming source.
    #[error("Streaming: {0}")]
    Streaming(String),
}

impl Error {
    /// Create an invalid container error.
    pub fn invalid_container(msg: impl Into<String>) -> Self {
        Self::InvalidContainer(msg.into())
    }

    /// Create a streaming error.
    pub fn streaming(msg: impl Into<String>) -> Self {
        Self::Streaming(msg.into())
    }
}
