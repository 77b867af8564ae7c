//! # DJV Core
//!
//! Background decode pipeline for the DJV viewer: a worker thread demuxes and
//! decodes a media source into RGBA video frames and interleaved audio blocks,
//! feeding a bounded two-lane queue that the playback thread drains.

// ============================================================================
// Time & Buffers
// ============================================================================
pub mod time;
pub mod buffer;

// ============================================================================
// Pipeline
// ============================================================================
pub mod error;
pub mod options;
pub mod info;
pub mod queue;
pub mod worker;
pub mod reader;

// ============================================================================
// Backends
// ============================================================================
pub mod media;
pub mod synthetic;
#[cfg(feature = "ffmpeg")]
pub mod ffmpeg;

pub use buffer::{AudioBlock, AudioShape, PixelShape, VideoFrame};
pub use error::{OpenError, StreamError};
pub use info::{AudioInfo, Info, InfoFuture, VideoInfo};
pub use options::ReaderOptions;
pub use queue::DecodeQueue;
pub use reader::Reader;
pub use time::{Rational, Timestamp};
pub use worker::{DecodeWorker, WorkerState};

// ============================================================================
// Version
// ============================================================================
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
