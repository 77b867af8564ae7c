//! # Decode Worker
//!
//! The producer side of the pipeline as an explicit state machine:
//!
//! ```text
//! Opening ──► Probing ──► Streaming ◄──► Seeking(t)
//!    │           │            │
//!    └─ fatal ───┴─► Stopped ◄┘ running cleared
//! ```
//!
//! [`DecodeWorker::step`] performs exactly one transition, so tests can drive
//! the machine without a thread. [`crate::reader::Reader`] runs it on a
//! dedicated thread until `running` is cleared.
//!
//! Decoding never happens while the queue lock is held: the worker only takes
//! the guard to wait for work and to push a finished buffer.

use crate::buffer::{
    planar_interleave, AudioBlock, AudioShape, Mirror, PixelShape, SampleFormat, VideoFrameMut,
};
use crate::error::{CodecError, OpenError, StreamError};
use crate::info::{info_channel, AudioInfo, Info, InfoFuture, InfoPromise, VideoInfo};
use crate::media::{
    AudioDecoder, CodecParams, Container, DecoderOptions, MediaBackend, MediaKind, MediaPacket,
    SeekFlags, StreamDesc, VideoDecoder,
};
use crate::options::ReaderOptions;
use crate::queue::{DecodeQueue, Wake};
use crate::time::{from_internal, stream_duration, to_internal, Rational, Timestamp};
use bytes::Bytes;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

// ============================================================================
// States
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Opening,
    Probing,
    Streaming,
    /// Roll forward to the contained target.
    Seeking(Timestamp),
    Stopped,
}

/// What a decode call does with the frames it retrieves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeMode {
    Enqueue,
    /// Discard frames before the timestamp, enqueue the rest.
    EnqueueFrom(Timestamp),
}

impl DecodeMode {
    fn keeps(self, ts: Timestamp) -> bool {
        match self {
            Self::Enqueue => true,
            Self::EnqueueFrom(from) => ts >= from,
        }
    }
}

// ============================================================================
// Selected Streams
// ============================================================================

struct VideoLane<D> {
    stream: usize,
    time_base: Rational,
    shape: PixelShape,
    last: Option<Timestamp>,
    decoder: D,
}

struct AudioLane<D> {
    stream: usize,
    time_base: Rational,
    shape: AudioShape,
    format: SampleFormat,
    last: Option<Timestamp>,
    decoder: D,
}

/// An opened and probed source.
struct Session<C: Container> {
    container: C,
    video: Option<VideoLane<C::Video>>,
    audio: Option<AudioLane<C::Audio>>,
}

impl<C: Container> Session<C> {
    /// Stream used for seeking: video when present, audio otherwise.
    fn seek_stream(&self) -> Option<(usize, Rational)> {
        self.video
            .as_ref()
            .map(|v| (v.stream, v.time_base))
            .or_else(|| self.audio.as_ref().map(|a| (a.stream, a.time_base)))
    }

    fn flush_decoders(&mut self) {
        if let Some(video) = self.video.as_mut() {
            video.decoder.flush();
            video.last = None;
        }
        if let Some(audio) = self.audio.as_mut() {
            audio.decoder.flush();
            audio.last = None;
        }
    }
}

// ============================================================================
// Decode Steps
// ============================================================================

/// Submit `packet` (or end of stream) to the video decoder and retrieve
/// everything it has ready.
///
/// Returns the timestamp of the last frame retrieved in this call, `None`
/// when the decoder produced nothing.
fn decode_video<D: VideoDecoder>(
    lane: &mut VideoLane<D>,
    queue: &DecodeQueue,
    packet: Option<&D::Packet>,
    mode: DecodeMode,
) -> Result<Option<Timestamp>, StreamError> {
    let failed = |e| StreamError::decode(MediaKind::Video, e);
    lane.decoder.send_packet(packet).map_err(failed)?;
    let mut last = None;
    loop {
        let pts = match lane.decoder.receive_frame() {
            Ok(pts) => pts,
            Err(CodecError::Again | CodecError::Eof) => return Ok(last),
            Err(e) => return Err(failed(e)),
        };
        // Frames without a pts inherit the previous one.
        let ts = pts
            .map(|pts| to_internal(pts, lane.time_base))
            .or(lane.last)
            .unwrap_or(0);
        lane.last = Some(ts);
        last = Some(ts);

        if mode.keeps(ts) {
            let mut frame = VideoFrameMut::new(lane.shape);
            lane.decoder
                .convert_rgba(frame.data_mut())
                .map_err(failed)?;
            queue.push_video(ts, frame.freeze());
        }
    }
}

/// Audio counterpart of [`decode_video`]. Planar blocks are interleaved
/// before they are queued.
fn decode_audio<D: AudioDecoder>(
    lane: &mut AudioLane<D>,
    queue: &DecodeQueue,
    packet: Option<&D::Packet>,
    mode: DecodeMode,
) -> Result<Option<Timestamp>, StreamError> {
    let failed = |e| StreamError::decode(MediaKind::Audio, e);
    lane.decoder.send_packet(packet).map_err(failed)?;
    let channels = lane.shape.channels as usize;
    let sample_size = lane.shape.sample_type.byte_count();
    let mut last = None;
    loop {
        let raw = match lane.decoder.receive_frame() {
            Ok(raw) => raw,
            Err(CodecError::Again | CodecError::Eof) => return Ok(last),
            Err(e) => return Err(failed(e)),
        };
        let ts = raw
            .pts
            .map(|pts| to_internal(pts, lane.time_base))
            .or(lane.last)
            .unwrap_or(0);
        lane.last = Some(ts);
        last = Some(ts);
        if !mode.keeps(ts) {
            continue;
        }

        if raw.format.sample_type != lane.format.sample_type {
            return Err(failed(CodecError::Failed(format!(
                "sample type changed from {:?} to {:?}",
                lane.format.sample_type, raw.format.sample_type
            ))));
        }
        let plane_len = raw.sample_count * sample_size;
        let data = if raw.format.planar {
            if raw.planes.len() < channels || raw.planes.iter().any(|p| p.len() < plane_len) {
                return Err(failed(CodecError::Failed("short audio plane".into())));
            }
            let mut planar = Vec::with_capacity(plane_len * channels);
            for plane in raw.planes.iter().take(channels) {
                planar.extend_from_slice(&plane[..plane_len]);
            }
            planar_interleave(&planar, channels, sample_size)
        } else {
            let len = plane_len * channels;
            match raw.planes.first() {
                Some(plane) if plane.len() >= len => plane[..len].to_vec(),
                _ => return Err(failed(CodecError::Failed("short audio buffer".into()))),
            }
        };
        let block = AudioBlock::from_bytes(lane.shape, raw.sample_count, Bytes::from(data))
            .ok_or_else(|| failed(CodecError::Failed("audio block size mismatch".into())))?;
        queue.push_audio(ts, block);
    }
}

// ============================================================================
// Worker
// ============================================================================

pub struct DecodeWorker<B: MediaBackend> {
    backend: B,
    source: String,
    options: ReaderOptions,
    queue: Arc<DecodeQueue>,
    running: Arc<AtomicBool>,
    promise: Option<InfoPromise>,
    state: WorkerState,
    container: Option<B::Container>,
    session: Option<Session<B::Container>>,
    info: Option<Info>,
}

impl<B: MediaBackend> DecodeWorker<B> {
    /// Create a worker in the Opening state together with the future that
    /// receives its [`Info`].
    pub fn new(backend: B, source: impl Into<String>, options: ReaderOptions) -> (Self, InfoFuture) {
        let (promise, future) = info_channel();
        let queue = Arc::new(DecodeQueue::new(options.queue_capacity));
        let running = Arc::new(AtomicBool::new(true));
        let worker = Self::from_parts(backend, source.into(), options, queue, running, promise);
        (worker, future)
    }

    /// Assemble a worker around shared state created elsewhere. Containers
    /// need not be `Send`, so a threaded worker is built on its own thread.
    pub(crate) fn from_parts(
        backend: B,
        source: String,
        options: ReaderOptions,
        queue: Arc<DecodeQueue>,
        running: Arc<AtomicBool>,
        promise: InfoPromise,
    ) -> Self {
        Self {
            backend,
            source,
            options,
            queue,
            running,
            promise: Some(promise),
            state: WorkerState::Opening,
            container: None,
            session: None,
            info: None,
        }
    }

    pub fn state(&self) -> WorkerState {
        self.state
    }

    pub fn queue(&self) -> &Arc<DecodeQueue> {
        &self.queue
    }

    /// Shared stop flag; clearing it ends the worker within one wait timeout.
    pub fn running(&self) -> Arc<AtomicBool> {
        self.running.clone()
    }

    pub fn info(&self) -> Option<&Info> {
        self.info.as_ref()
    }

    /// Step until Stopped.
    pub fn run(mut self) {
        while self.step() != WorkerState::Stopped {}
        debug!("decode worker stopped");
    }

    /// Perform one state transition and return the new state.
    pub fn step(&mut self) -> WorkerState {
        if !self.running.load(Ordering::SeqCst) {
            self.state = WorkerState::Stopped;
        }
        self.state = match self.state {
            WorkerState::Opening => self.open(),
            WorkerState::Probing => self.probe(),
            WorkerState::Streaming => self.stream(),
            WorkerState::Seeking(target) => self.seek(target),
            WorkerState::Stopped => {
                self.running.store(false, Ordering::SeqCst);
                WorkerState::Stopped
            }
        };
        self.state
    }

    fn fail(&mut self, err: OpenError) -> WorkerState {
        error!(source = %self.source, error = %err, "cannot start decoding");
        if let Some(promise) = self.promise.take() {
            promise.fulfill(Err(err));
        }
        self.running.store(false, Ordering::SeqCst);
        WorkerState::Stopped
    }

    // ------------------------------------------------------------------------
    // Opening / Probing
    // ------------------------------------------------------------------------

    fn open(&mut self) -> WorkerState {
        match self.backend.open(&self.source) {
            Ok(container) => {
                debug!(source = %self.source, "container opened");
                self.container = Some(container);
                WorkerState::Probing
            }
            Err(err) => self.fail(err),
        }
    }

    fn probe(&mut self) -> WorkerState {
        let Some(container) = self.container.take() else {
            return self.fail(OpenError::Open {
                source_name: self.source.clone(),
                reason: "container not open".into(),
            });
        };
        match self.build_session(container) {
            Ok((session, info)) => {
                self.queue
                    .set_lanes(session.video.is_some(), session.audio.is_some());
                info!(
                    source = %self.source,
                    video = ?info.video.as_ref().map(|v| (v.shape.width, v.shape.height, v.speed.to_string())),
                    audio = ?info.audio.as_ref().map(|a| (a.shape.channels, a.shape.sample_rate)),
                    duration = info.duration(),
                    "probed"
                );
                self.session = Some(session);
                self.info = Some(info.clone());
                if let Some(promise) = self.promise.take() {
                    promise.fulfill(Ok(info));
                }
                WorkerState::Streaming
            }
            Err(err) => self.fail(err),
        }
    }

    fn build_session(
        &self,
        mut container: B::Container,
    ) -> Result<(Session<B::Container>, Info), OpenError> {
        let first = |kind: MediaKind| {
            container
                .streams()
                .iter()
                .find(|s| s.kind == kind)
                .cloned()
        };
        let video_desc: Option<StreamDesc> = first(MediaKind::Video);
        let audio_desc: Option<StreamDesc> = first(MediaKind::Audio);
        if video_desc.is_none() && audio_desc.is_none() {
            return Err(OpenError::NoStreams(self.source.clone()));
        }

        let decoder_options = DecoderOptions::from(&self.options);
        let container_duration = container.duration();
        let mut info = Info {
            source: self.source.clone(),
            tags: container.metadata(),
            ..Info::default()
        };

        let video = match video_desc {
            Some(desc) => {
                let decoder = container.open_video_decoder(desc.index, &decoder_options)?;
                let CodecParams::Video {
                    width,
                    height,
                    frame_rate,
                    pixel_aspect,
                } = desc.params
                else {
                    return Err(self.decoder_error(MediaKind::Video, "missing video parameters"));
                };
                if width == 0 || height == 0 {
                    return Err(self.decoder_error(MediaKind::Video, "empty frame size"));
                }
                let shape = PixelShape::rgba(width, height)
                    .with_mirror(Mirror {
                        x: false,
                        y: self.options.flip_y,
                    })
                    .with_pixel_aspect(pixel_aspect);
                info.video = Some(VideoInfo {
                    stream: desc.index,
                    shape,
                    speed: frame_rate,
                    duration: stream_duration(desc.duration, desc.time_base, container_duration),
                    codec: desc.codec_name.clone(),
                });
                Some(VideoLane {
                    stream: desc.index,
                    time_base: desc.time_base,
                    shape,
                    last: None,
                    decoder,
                })
            }
            None => None,
        };

        let audio = match audio_desc {
            Some(desc) => {
                let decoder = container.open_audio_decoder(desc.index, &decoder_options)?;
                let CodecParams::Audio {
                    channels,
                    sample_rate,
                    format,
                    ref format_name,
                } = desc.params
                else {
                    return Err(self.decoder_error(MediaKind::Audio, "missing audio parameters"));
                };
                let format = format.ok_or_else(|| OpenError::UnsupportedAudioFormat {
                    source_name: self.source.clone(),
                    format: format_name.clone(),
                })?;
                if channels == 0 {
                    return Err(self.decoder_error(MediaKind::Audio, "no channels"));
                }
                let shape = AudioShape::new(channels, format.sample_type, sample_rate);
                info.audio = Some(AudioInfo {
                    stream: desc.index,
                    shape,
                    duration: stream_duration(desc.duration, desc.time_base, container_duration),
                    codec: desc.codec_name.clone(),
                });
                Some(AudioLane {
                    stream: desc.index,
                    time_base: desc.time_base,
                    shape,
                    format,
                    last: None,
                    decoder,
                })
            }
            None => None,
        };

        Ok((
            Session {
                container,
                video,
                audio,
            },
            info,
        ))
    }

    fn decoder_error(&self, kind: MediaKind, reason: &str) -> OpenError {
        OpenError::DecoderOpen {
            source_name: self.source.clone(),
            kind,
            reason: reason.into(),
        }
    }

    // ------------------------------------------------------------------------
    // Streaming / Seeking
    // ------------------------------------------------------------------------

    fn stream(&mut self) -> WorkerState {
        match self.queue.wait_for_work(self.options.wait_timeout()) {
            Wake::Seek(target) => WorkerState::Seeking(target),
            Wake::Idle => WorkerState::Streaming,
            Wake::Capacity => {
                if let Err(err) = self.read_and_decode(DecodeMode::Enqueue) {
                    self.recover(err, DecodeMode::Enqueue);
                }
                WorkerState::Streaming
            }
        }
    }

    /// Read one packet and route it to its decoder. Returns the timestamps
    /// of the last video and audio frames retrieved.
    fn read_and_decode(
        &mut self,
        mode: DecodeMode,
    ) -> Result<(Option<Timestamp>, Option<Timestamp>), StreamError> {
        let Some(session) = self.session.as_mut() else {
            return Ok((None, None));
        };
        let packet = session.container.read_packet()?;
        let index = packet.stream_index();
        if let Some(video) = session.video.as_mut().filter(|v| v.stream == index) {
            return Ok((decode_video(video, &self.queue, Some(&packet), mode)?, None));
        }
        if let Some(audio) = session.audio.as_mut().filter(|a| a.stream == index) {
            return Ok((None, decode_audio(audio, &self.queue, Some(&packet), mode)?));
        }
        Ok((None, None))
    }

    /// End of stream or a broken stream: drain what the decoders still hold,
    /// reset them and stop production until the next seek.
    fn recover(&mut self, err: StreamError, mode: DecodeMode) {
        if err.is_end_of_file() {
            debug!(source = %self.source, "end of stream");
        } else {
            warn!(source = %self.source, error = %err, "stream error, throttling");
        }
        if let Some(session) = self.session.as_mut() {
            if let Some(video) = session.video.as_mut() {
                if let Err(e) = decode_video(video, &self.queue, None, mode) {
                    debug!(error = %e, "video drain failed");
                }
            }
            if let Some(audio) = session.audio.as_mut() {
                if let Err(e) = decode_audio(audio, &self.queue, None, mode) {
                    debug!(error = %e, "audio drain failed");
                }
            }
            session.flush_decoders();
        }
        self.queue.throttle();
    }

    fn seek(&mut self, target: Timestamp) -> WorkerState {
        // Tolerate one tick of rounding between time bases.
        let mode = DecodeMode::EnqueueFrom(target - 1);
        match self.roll_forward(target) {
            Ok(()) => {}
            // Decoders were flushed before the container seek; there is
            // nothing valid left to drain.
            Err(StreamError::Seek(err)) => {
                warn!(source = %self.source, error = %err, "seek failed, throttling");
                self.queue.throttle();
            }
            Err(err) => self.recover(err, mode),
        }
        WorkerState::Streaming
    }

    /// Seek to the keyframe at or before `target`, then decode forward,
    /// discarding frames before it, until the seek stream reaches the target.
    ///
    /// Stops early when a newer seek is pending; the next wait picks it up.
    fn roll_forward(&mut self, target: Timestamp) -> Result<(), StreamError> {
        let Some(session) = self.session.as_mut() else {
            return Ok(());
        };
        let Some((stream, time_base)) = session.seek_stream() else {
            return Ok(());
        };
        let native = from_internal(target, time_base);
        debug!(target, stream, native, "seeking");
        session.flush_decoders();
        session.container.seek(stream, native, SeekFlags::Backward)?;

        let threshold = target - 1;
        let mode = DecodeMode::EnqueueFrom(threshold);
        let by_video = session.video.is_some();
        while self.running.load(Ordering::SeqCst) {
            if let Some(next) = self.queue.lock().pending_seek() {
                debug!(target, next, "seek superseded");
                break;
            }
            let (video, audio) = self.read_and_decode(mode)?;
            let reached = if by_video { video } else { audio };
            if reached.is_some_and(|ts| ts >= threshold) {
                debug!(target, "seek target reached");
                break;
            }
        }
        Ok(())
    }
}
