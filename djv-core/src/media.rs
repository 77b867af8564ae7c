//! # Media Backend Interface
//!
//! The container/codec library seen from the decode worker: open a source,
//! demux packets, submit them to decoders and retrieve raw frames, seek, and
//! convert pixels to RGBA.
//!
//! All handles returned from a [`MediaBackend`] live on the worker thread, so
//! only the backend itself has to be `Send`.
//!
//! ## Decoder Convention
//! ```text
//!   send_packet(Some(p)) ──► receive_frame() ─┬─ Ok(frame)      keep pulling
//!                                             ├─ Err(Again)     need more input
//!   send_packet(None)    ──► receive_frame() ─┼─ Err(Eof)       fully drained
//!                                             └─ Err(Failed(_)) decode error
//! ```

use crate::buffer::SampleFormat;
use crate::error::{CodecError, OpenError, ReadError, SeekError};
use crate::options::ReaderOptions;
use crate::time::{Rational, Timestamp};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MediaKind {
    Video,
    Audio,
    Other,
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Video => f.write_str("video"),
            Self::Audio => f.write_str("audio"),
            Self::Other => f.write_str("other"),
        }
    }
}

/// Codec parameters copied from a stream at probe time.
#[derive(Debug, Clone, PartialEq)]
pub enum CodecParams {
    Video {
        width: u32,
        height: u32,
        frame_rate: Rational,
        /// Sample aspect ratio; 0/1 when the container does not say.
        pixel_aspect: Rational,
    },
    Audio {
        channels: u16,
        sample_rate: u32,
        /// `None` when the backend reports a layout the pipeline cannot carry.
        format: Option<SampleFormat>,
        format_name: String,
    },
    Other,
}

/// A demuxed stream as reported by the container.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamDesc {
    pub index: usize,
    pub kind: MediaKind,
    pub time_base: Rational,
    /// Duration in `time_base` ticks, if the container knows it.
    pub duration: Option<i64>,
    pub codec_name: String,
    pub params: CodecParams,
}

/// What the worker needs to know about a packet; the payload stays with the
/// backend.
pub trait MediaPacket {
    fn stream_index(&self) -> usize;
}

/// A plain in-memory packet.
#[derive(Debug, Clone, PartialEq)]
pub struct Packet {
    pub stream_index: usize,
    /// Presentation timestamp in the stream's time base.
    pub pts: Option<i64>,
    pub keyframe: bool,
    pub data: Bytes,
}

impl MediaPacket for Packet {
    fn stream_index(&self) -> usize {
        self.stream_index
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeekFlags {
    /// Land on the nearest keyframe at or before the target.
    Backward,
}

/// Decoder settings forwarded from [`ReaderOptions`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecoderOptions {
    pub thread_count: usize,
}

impl From<&ReaderOptions> for DecoderOptions {
    fn from(options: &ReaderOptions) -> Self {
        Self {
            thread_count: options.thread_count,
        }
    }
}

/// Opens containers by source identifier.
pub trait MediaBackend: Send + 'static {
    type Container: Container;

    fn open(&self, source: &str) -> Result<Self::Container, OpenError>;
}

/// An open container plus the ability to create decoders for its streams.
pub trait Container {
    type Packet: MediaPacket;
    type Video: VideoDecoder<Packet = Self::Packet>;
    type Audio: AudioDecoder<Packet = Self::Packet>;

    fn streams(&self) -> &[StreamDesc];

    /// Container-level duration in internal ticks.
    fn duration(&self) -> Option<Timestamp>;

    fn metadata(&self) -> BTreeMap<String, String> {
        BTreeMap::new()
    }

    fn open_video_decoder(
        &mut self,
        stream: usize,
        options: &DecoderOptions,
    ) -> Result<Self::Video, OpenError>;

    fn open_audio_decoder(
        &mut self,
        stream: usize,
        options: &DecoderOptions,
    ) -> Result<Self::Audio, OpenError>;

    /// Demux the next packet of any stream.
    fn read_packet(&mut self) -> Result<Self::Packet, ReadError>;

    /// Seek `stream` to `timestamp`, expressed in that stream's time base.
    fn seek(&mut self, stream: usize, timestamp: i64, flags: SeekFlags) -> Result<(), SeekError>;
}

pub trait VideoDecoder {
    type Packet;

    /// Submit a packet; `None` signals end of stream and starts draining.
    fn send_packet(&mut self, packet: Option<&Self::Packet>) -> Result<(), CodecError>;

    /// Retrieve one decoded frame into the decoder's scratch frame and return
    /// its presentation timestamp in the stream's time base.
    fn receive_frame(&mut self) -> Result<Option<i64>, CodecError>;

    /// Convert the last retrieved frame into packed 8-bit RGBA, top row first.
    /// `dst` is exactly `width * height * 4` bytes.
    fn convert_rgba(&mut self, dst: &mut [u8]) -> Result<(), CodecError>;

    /// Drop all buffered state; the decoder accepts packets again afterwards.
    fn flush(&mut self);
}

/// One retrieved block of raw audio, borrowed from the decoder.
#[derive(Debug, Clone)]
pub struct RawAudio<'a> {
    pub pts: Option<i64>,
    /// Samples per channel.
    pub sample_count: usize,
    pub format: SampleFormat,
    /// One slice when packed; one slice per channel when planar.
    pub planes: Vec<&'a [u8]>,
}

pub trait AudioDecoder {
    type Packet;

    fn send_packet(&mut self, packet: Option<&Self::Packet>) -> Result<(), CodecError>;

    fn receive_frame(&mut self) -> Result<RawAudio<'_>, CodecError>;

    fn flush(&mut self);
}
