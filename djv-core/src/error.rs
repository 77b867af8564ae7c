//! Error taxonomy of the decode pipeline.
//!
//! Only [`OpenError`] ever reaches the consumer. Everything that goes wrong
//! once the worker is streaming is a [`StreamError`], handled inside the
//! worker by throttling the queue.

use crate::media::MediaKind;
use thiserror::Error;

/// Fatal startup errors (Opening/Probing).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OpenError {
    #[error("{source_name}: cannot open: {reason}")]
    Open { source_name: String, reason: String },
    #[error("{0}: cannot find any streams")]
    NoStreams(String),
    #[error("{source_name}: cannot find {kind} codec")]
    CodecNotFound { source_name: String, kind: MediaKind },
    #[error("{source_name}: cannot open {kind} decoder: {reason}")]
    DecoderOpen {
        source_name: String,
        kind: MediaKind,
        reason: String,
    },
    #[error("{source_name}: unsupported audio format: {format}")]
    UnsupportedAudioFormat { source_name: String, format: String },
    #[error("decode worker exited before stream information was available")]
    Abandoned,
    #[error("cannot start decode worker: {0}")]
    Spawn(String),
}

/// Result of the decoder submit/retrieve convention.
///
/// `Again` and `Eof` are not failures: the decoder wants more input, or has
/// been fully drained after a null packet.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    #[error("decoder needs more input")]
    Again,
    #[error("decoder drained")]
    Eof,
    #[error("decode failed: {0}")]
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReadError {
    #[error("end of file")]
    EndOfFile,
    #[error("read failed: {0}")]
    Io(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("seek to {target} failed: {reason}")]
pub struct SeekError {
    pub target: i64,
    pub reason: String,
}

/// Recoverable failure inside the Streaming/Seeking loop.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StreamError {
    #[error(transparent)]
    Read(#[from] ReadError),
    #[error("{kind} {source}")]
    Decode {
        kind: MediaKind,
        #[source]
        source: CodecError,
    },
    #[error(transparent)]
    Seek(#[from] SeekError),
}

impl StreamError {
    pub fn decode(kind: MediaKind, source: CodecError) -> Self {
        Self::Decode { kind, source }
    }

    pub fn is_end_of_file(&self) -> bool {
        matches!(self, Self::Read(ReadError::EndOfFile))
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("cannot parse {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid options in {path}: {reason}")]
    Invalid { path: String, reason: String },
}
