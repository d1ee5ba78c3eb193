//! Error types for pianovis.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// Where inside an event source a parse failure happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourcePosition {
    /// The file header (or the file could not be read at all).
    Header,
    /// A track chunk, before any of its events could be decoded.
    Track(usize),
    /// A specific event within a track.
    Event { track: usize, event: usize },
}

impl fmt::Display for SourcePosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourcePosition::Header => write!(f, "header"),
            SourcePosition::Track(t) => write!(f, "track {t}"),
            SourcePosition::Event { track, event } => write!(f, "track {track}, event {event}"),
        }
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to parse {} at {position}: {message}", path.display())]
    Parse {
        path: PathBuf,
        position: SourcePosition,
        message: String,
    },
    #[error("invalid render configuration: {0}")]
    RenderFault(String),
    #[error("export worker for chunk {chunk} failed: {reason}")]
    WorkerFailure { chunk: usize, reason: String },
    #[error("synthesis unavailable for {}: {reason}", path.display())]
    SynthesisUnavailable { path: PathBuf, reason: String },
    #[error("frame sink error: {0}")]
    FrameSink(String),
    #[error("audio error: {0}")]
    Audio(String),
    #[error("mux failed: {0}")]
    MuxFailure(String),
    #[error("export cancelled")]
    Cancelled,
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("config error: {0}")]
    Config(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
