//! # Synthetic Media Backend
//!
//! An in-memory container and codec pair that behaves like a real one where
//! it matters to the decode worker: interleaved packets in presentation
//! order, keyframe-only random access, decoder latency (frames come out
//! `delay` packets late, so `Again` is the normal case), null-packet drain,
//! and injectable failures.
//!
//! Sources are described by a compact `key=value` list, e.g.
//! `frames=48,fps=24,gop=12,delay=2,audio=s16p`.
//!
//! Every video frame converts to a solid RGBA image whose first two bytes hold
//! the frame index (little endian), so tests can tell frames apart.

use crate::buffer::{SampleFormat, SampleType};
use crate::error::{CodecError, OpenError, ReadError, SeekError};
use crate::media::{
    AudioDecoder, CodecParams, Container, DecoderOptions, MediaBackend, MediaKind, Packet,
    RawAudio, SeekFlags, StreamDesc, VideoDecoder,
};
use crate::time::{rescale, to_internal, Rational, Timestamp};
use bytes::Bytes;
use std::collections::{BTreeMap, VecDeque};
use std::str::FromStr;
use std::time::Duration;

// ============================================================================
// Source Description
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DurationReport {
    /// Streams carry their own duration.
    Stream,
    /// Only the container knows the duration.
    Container,
    None,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SyntheticAudio {
    pub channels: u16,
    pub sample_rate: u32,
    /// `None` models a sample layout the pipeline does not support.
    pub format: Option<SampleFormat>,
    pub block_samples: usize,
    /// Blocks to generate when the source has no video to follow.
    pub blocks: usize,
}

impl Default for SyntheticAudio {
    fn default() -> Self {
        Self {
            channels: 2,
            sample_rate: 48_000,
            format: Some(SampleFormat::planar(SampleType::S16)),
            block_samples: 1024,
            blocks: 10,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SyntheticSource {
    /// Video frame count; 0 means no video stream.
    pub frames: usize,
    pub frame_rate: Rational,
    /// Video time base; defaults to one tick per frame.
    pub time_base: Option<Rational>,
    pub width: u32,
    pub height: u32,
    pub pixel_aspect: Rational,
    /// Keyframe interval in frames.
    pub gop: usize,
    /// Decoder latency in packets.
    pub delay: usize,
    pub audio: Option<SyntheticAudio>,
    /// Put a data stream in front of the media streams.
    pub data_stream: bool,
    pub duration: DurationReport,
    /// Fail every read after this many successful reads.
    pub fail_read_after: Option<usize>,
    /// Video frame index whose packet fails to decode.
    pub corrupt_frame: Option<usize>,
    pub fail_open: bool,
    pub fail_seek: bool,
    pub missing_codec: Option<MediaKind>,
    pub open_delay: Duration,
    pub tags: BTreeMap<String, String>,
}

impl Default for SyntheticSource {
    fn default() -> Self {
        Self {
            frames: 10,
            frame_rate: Rational::new(24, 1),
            time_base: None,
            width: 16,
            height: 8,
            pixel_aspect: Rational::new(1, 1),
            gop: 1,
            delay: 0,
            audio: None,
            data_stream: false,
            duration: DurationReport::Stream,
            fail_read_after: None,
            corrupt_frame: None,
            fail_open: false,
            fail_seek: false,
            missing_codec: None,
            open_delay: Duration::ZERO,
            tags: BTreeMap::new(),
        }
    }
}

fn parse_rational(value: &str) -> Result<Rational, String> {
    let (num, den) = value.split_once('/').unwrap_or((value, "1"));
    let num = num.trim().parse::<i32>().map_err(|e| format!("{}: {}", value, e))?;
    let den = den.trim().parse::<i32>().map_err(|e| format!("{}: {}", value, e))?;
    if num <= 0 || den <= 0 {
        return Err(format!("{}: must be positive", value));
    }
    Ok(Rational::new(num, den))
}

fn parse_number<T: FromStr>(key: &str, value: &str) -> Result<T, String>
where
    T::Err: std::fmt::Display,
{
    value
        .parse::<T>()
        .map_err(|e| format!("{}={}: {}", key, value, e))
}

fn parse_sample_format(value: &str) -> Result<Option<SampleFormat>, String> {
    let (name, planar) = match value.strip_suffix('p') {
        Some(name) if name != "dbl" => (name, true),
        _ => (value, false),
    };
    let sample_type = match name {
        "u8" => SampleType::U8,
        "s16" => SampleType::S16,
        "s32" => SampleType::S32,
        "f32" | "flt" => SampleType::F32,
        "f64" | "dbl" => return Ok(None),
        other => return Err(format!("unknown sample format {}", other)),
    };
    Ok(Some(SampleFormat {
        sample_type,
        planar,
    }))
}

impl FromStr for SyntheticSource {
    type Err = String;

    fn from_str(desc: &str) -> Result<Self, Self::Err> {
        let mut source = SyntheticSource::default();
        let desc = desc.strip_prefix("synthetic:").unwrap_or(desc);
        for item in desc.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            let (key, value) = item.split_once('=').unwrap_or((item, "1"));
            match key {
                "frames" => source.frames = parse_number(key, value)?,
                "fps" => source.frame_rate = parse_rational(value)?,
                "tb" => source.time_base = Some(parse_rational(value)?),
                "size" => {
                    let (w, h) = value
                        .split_once('x')
                        .ok_or_else(|| format!("size={}: expected WxH", value))?;
                    source.width = parse_number(key, w)?;
                    source.height = parse_number(key, h)?;
                }
                "aspect" => source.pixel_aspect = parse_rational(value)?,
                "gop" => source.gop = parse_number::<usize>(key, value)?.max(1),
                "delay" => source.delay = parse_number(key, value)?,
                "audio" => {
                    let audio = source.audio.get_or_insert_with(SyntheticAudio::default);
                    audio.format = parse_sample_format(value)?;
                }
                "channels" => {
                    source
                        .audio
                        .get_or_insert_with(SyntheticAudio::default)
                        .channels = parse_number(key, value)?
                }
                "rate" => {
                    source
                        .audio
                        .get_or_insert_with(SyntheticAudio::default)
                        .sample_rate = parse_number(key, value)?
                }
                "block" => {
                    source
                        .audio
                        .get_or_insert_with(SyntheticAudio::default)
                        .block_samples = parse_number::<usize>(key, value)?.max(1)
                }
                "blocks" => {
                    source
                        .audio
                        .get_or_insert_with(SyntheticAudio::default)
                        .blocks = parse_number(key, value)?
                }
                "data" => source.data_stream = value != "0",
                "duration" => {
                    source.duration = match value {
                        "stream" => DurationReport::Stream,
                        "container" => DurationReport::Container,
                        "none" => DurationReport::None,
                        other => return Err(format!("duration={}: unknown", other)),
                    }
                }
                "fail_read" => source.fail_read_after = Some(parse_number(key, value)?),
                "corrupt" => source.corrupt_frame = Some(parse_number(key, value)?),
                "fail_open" => source.fail_open = value != "0",
                "fail_seek" => source.fail_seek = value != "0",
                "missing" => {
                    source.missing_codec = Some(match value {
                        "video" => MediaKind::Video,
                        "audio" => MediaKind::Audio,
                        other => return Err(format!("missing={}: unknown", other)),
                    })
                }
                "open_delay" => {
                    source.open_delay = Duration::from_millis(parse_number(key, value)?)
                }
                other => return Err(format!("unknown key {}", other)),
            }
        }
        Ok(source)
    }
}

impl SyntheticSource {
    fn video_time_base(&self) -> Rational {
        self.time_base.unwrap_or(self.frame_rate.invert())
    }

    /// Presentation timestamp of frame `index` in the video time base.
    pub fn frame_pts(&self, index: usize) -> i64 {
        rescale(index as i64, self.frame_rate.invert(), self.video_time_base())
    }

    /// Presentation time of frame `index` in internal ticks.
    pub fn frame_time(&self, index: usize) -> Timestamp {
        to_internal(self.frame_pts(index), self.video_time_base())
    }

    fn audio_block_count(&self, audio: &SyntheticAudio) -> usize {
        if self.frames == 0 {
            return audio.blocks;
        }
        // Enough blocks to cover the video.
        let total = rescale(
            self.frames as i64,
            self.frame_rate.invert(),
            Rational::new(1, audio.sample_rate as i32),
        ) as usize;
        total.div_ceil(audio.block_samples)
    }
}

// ============================================================================
// Backend
// ============================================================================

/// Opens synthetic sources: either a fixed preset, or one parsed from the
/// source identifier.
#[derive(Debug, Clone, Default)]
pub struct SyntheticBackend {
    preset: Option<SyntheticSource>,
}

impl SyntheticBackend {
    pub fn new(source: SyntheticSource) -> Self {
        Self {
            preset: Some(source),
        }
    }
}

impl MediaBackend for SyntheticBackend {
    type Container = SyntheticContainer;

    fn open(&self, source: &str) -> Result<SyntheticContainer, OpenError> {
        let desc = match &self.preset {
            Some(preset) => preset.clone(),
            None => source.parse().map_err(|reason| OpenError::Open {
                source_name: source.to_string(),
                reason,
            })?,
        };
        if !desc.open_delay.is_zero() {
            std::thread::sleep(desc.open_delay);
        }
        if desc.fail_open {
            return Err(OpenError::Open {
                source_name: source.to_string(),
                reason: "No such file or directory".into(),
            });
        }
        Ok(SyntheticContainer::new(desc))
    }
}

// ============================================================================
// Container
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Payload {
    Video { index: usize },
    Audio { block: usize },
    Data,
}

pub struct SyntheticContainer {
    desc: SyntheticSource,
    streams: Vec<StreamDesc>,
    packets: Vec<(Payload, Packet)>,
    cursor: usize,
    reads: usize,
    video_stream: Option<usize>,
    audio_stream: Option<usize>,
}

impl SyntheticContainer {
    fn new(desc: SyntheticSource) -> Self {
        let mut streams = Vec::new();
        let data_stream = desc.data_stream.then(|| {
            streams.push(StreamDesc {
                index: 0,
                kind: MediaKind::Other,
                time_base: Rational::new(1, 1000),
                duration: None,
                codec_name: "bin_data".into(),
                params: CodecParams::Other,
            });
            0
        });

        let stream_duration = |ticks: i64| match desc.duration {
            DurationReport::Stream => Some(ticks),
            _ => None,
        };

        let video_stream = (desc.frames > 0).then(|| {
            let index = streams.len();
            streams.push(StreamDesc {
                index,
                kind: MediaKind::Video,
                time_base: desc.video_time_base(),
                duration: stream_duration(desc.frame_pts(desc.frames)),
                codec_name: "synthetic video".into(),
                params: CodecParams::Video {
                    width: desc.width,
                    height: desc.height,
                    frame_rate: desc.frame_rate,
                    pixel_aspect: desc.pixel_aspect,
                },
            });
            index
        });

        let audio_stream = desc.audio.as_ref().map(|audio| {
            let index = streams.len();
            let blocks = desc.audio_block_count(audio);
            streams.push(StreamDesc {
                index,
                kind: MediaKind::Audio,
                time_base: Rational::new(1, audio.sample_rate as i32),
                duration: stream_duration((blocks * audio.block_samples) as i64),
                codec_name: "synthetic audio".into(),
                params: CodecParams::Audio {
                    channels: audio.channels,
                    sample_rate: audio.sample_rate,
                    format: audio.format,
                    format_name: audio
                        .format
                        .map_or_else(|| "dbl".to_string(), |f| format!("{:?}", f)),
                },
            });
            index
        });

        // Interleave by presentation time, video first on ties.
        let mut timeline: Vec<(Timestamp, u8, Payload, Packet)> = Vec::new();
        if let Some(stream) = video_stream {
            for index in 0..desc.frames {
                let pts = desc.frame_pts(index);
                let keyframe = index % desc.gop == 0;
                timeline.push((
                    desc.frame_time(index),
                    0,
                    Payload::Video { index },
                    Packet {
                        stream_index: stream,
                        pts: Some(pts),
                        keyframe,
                        data: Bytes::copy_from_slice(&(index as u32).to_le_bytes()),
                    },
                ));
                if let Some(data) = data_stream {
                    timeline.push((
                        desc.frame_time(index),
                        2,
                        Payload::Data,
                        Packet {
                            stream_index: data,
                            pts: Some(desc.frame_time(index) / 1000),
                            keyframe: true,
                            data: Bytes::from_static(b"meta"),
                        },
                    ));
                }
            }
        }
        if let (Some(stream), Some(audio)) = (audio_stream, desc.audio.as_ref()) {
            let tb = Rational::new(1, audio.sample_rate as i32);
            for block in 0..desc.audio_block_count(audio) {
                let pts = (block * audio.block_samples) as i64;
                timeline.push((
                    to_internal(pts, tb),
                    1,
                    Payload::Audio { block },
                    Packet {
                        stream_index: stream,
                        pts: Some(pts),
                        keyframe: true,
                        data: Bytes::copy_from_slice(&(block as u32).to_le_bytes()),
                    },
                ));
            }
        }
        timeline.sort_by_key(|(time, order, _, _)| (*time, *order));
        let packets = timeline
            .into_iter()
            .map(|(_, _, payload, packet)| (payload, packet))
            .collect();

        Self {
            desc,
            streams,
            packets,
            cursor: 0,
            reads: 0,
            video_stream,
            audio_stream,
        }
    }
}

impl Container for SyntheticContainer {
    type Packet = Packet;
    type Video = SyntheticVideoDecoder;
    type Audio = SyntheticAudioDecoder;

    fn streams(&self) -> &[StreamDesc] {
        &self.streams
    }

    fn duration(&self) -> Option<Timestamp> {
        match self.desc.duration {
            DurationReport::None => None,
            _ => {
                let video = self.desc.frame_time(self.desc.frames);
                let audio = self.desc.audio.as_ref().map_or(0, |audio| {
                    let samples = self.desc.audio_block_count(audio) * audio.block_samples;
                    to_internal(samples as i64, Rational::new(1, audio.sample_rate as i32))
                });
                Some(video.max(audio))
            }
        }
    }

    fn metadata(&self) -> BTreeMap<String, String> {
        let mut tags = self.desc.tags.clone();
        tags.entry("encoder".into())
            .or_insert_with(|| "djv synthetic".into());
        tags
    }

    fn open_video_decoder(
        &mut self,
        stream: usize,
        _options: &DecoderOptions,
    ) -> Result<SyntheticVideoDecoder, OpenError> {
        if self.desc.missing_codec == Some(MediaKind::Video) || Some(stream) != self.video_stream {
            return Err(OpenError::CodecNotFound {
                source_name: "synthetic".into(),
                kind: MediaKind::Video,
            });
        }
        Ok(SyntheticVideoDecoder {
            delay: self.desc.delay,
            corrupt_frame: self.desc.corrupt_frame,
            width: self.desc.width,
            height: self.desc.height,
            pending: VecDeque::new(),
            current: None,
            draining: false,
            have_keyframe: false,
        })
    }

    fn open_audio_decoder(
        &mut self,
        stream: usize,
        _options: &DecoderOptions,
    ) -> Result<SyntheticAudioDecoder, OpenError> {
        let audio = match (&self.desc.audio, self.desc.missing_codec) {
            (Some(audio), missing) if missing != Some(MediaKind::Audio) => audio.clone(),
            _ => {
                return Err(OpenError::CodecNotFound {
                    source_name: "synthetic".into(),
                    kind: MediaKind::Audio,
                })
            }
        };
        if Some(stream) != self.audio_stream {
            return Err(OpenError::CodecNotFound {
                source_name: "synthetic".into(),
                kind: MediaKind::Audio,
            });
        }
        Ok(SyntheticAudioDecoder {
            format: audio.format.unwrap_or(SampleFormat::packed(SampleType::F32)),
            channels: audio.channels as usize,
            block_samples: audio.block_samples,
            pending: VecDeque::new(),
            planes: Vec::new(),
            pts: None,
            draining: false,
        })
    }

    fn read_packet(&mut self) -> Result<Packet, ReadError> {
        if let Some(limit) = self.desc.fail_read_after {
            if self.reads >= limit {
                return Err(ReadError::Io("injected read failure".into()));
            }
        }
        let (_, packet) = self.packets.get(self.cursor).ok_or(ReadError::EndOfFile)?;
        self.cursor += 1;
        self.reads += 1;
        Ok(packet.clone())
    }

    fn seek(&mut self, stream: usize, timestamp: i64, flags: SeekFlags) -> Result<(), SeekError> {
        if self.desc.fail_seek {
            return Err(SeekError {
                target: timestamp,
                reason: "injected seek failure".into(),
            });
        }
        let SeekFlags::Backward = flags;
        // Before the first keyframe: start of file.
        self.cursor = self
            .packets
            .iter()
            .enumerate()
            .filter(|(_, (_, p))| p.stream_index == stream && p.keyframe)
            .filter(|(_, (_, p))| p.pts.is_some_and(|pts| pts <= timestamp))
            .last()
            .map_or(0, |(position, _)| position);
        Ok(())
    }
}

// ============================================================================
// Decoders
// ============================================================================

pub struct SyntheticVideoDecoder {
    delay: usize,
    corrupt_frame: Option<usize>,
    width: u32,
    height: u32,
    pending: VecDeque<(i64, usize)>,
    current: Option<usize>,
    draining: bool,
    have_keyframe: bool,
}

impl VideoDecoder for SyntheticVideoDecoder {
    type Packet = Packet;

    fn send_packet(&mut self, packet: Option<&Packet>) -> Result<(), CodecError> {
        let Some(packet) = packet else {
            self.draining = true;
            return Ok(());
        };
        if self.draining {
            return Err(CodecError::Failed("packet sent after end of stream".into()));
        }
        let index = packet
            .data
            .get(..4)
            .and_then(|b| b.try_into().ok())
            .map(u32::from_le_bytes)
            .ok_or_else(|| CodecError::Failed("truncated packet".into()))? as usize;
        if self.corrupt_frame == Some(index) {
            return Err(CodecError::Failed(format!("corrupt frame {}", index)));
        }
        // Inter frames without a reference are dropped, like a real decoder
        // entering a stream mid-GOP.
        if packet.keyframe {
            self.have_keyframe = true;
        } else if !self.have_keyframe {
            return Ok(());
        }
        self.pending.push_back((packet.pts.unwrap_or(0), index));
        Ok(())
    }

    fn receive_frame(&mut self) -> Result<Option<i64>, CodecError> {
        if self.pending.len() > self.delay || (self.draining && !self.pending.is_empty()) {
            if let Some((pts, index)) = self.pending.pop_front() {
                self.current = Some(index);
                return Ok(Some(pts));
            }
        }
        if self.draining {
            Err(CodecError::Eof)
        } else {
            Err(CodecError::Again)
        }
    }

    fn convert_rgba(&mut self, dst: &mut [u8]) -> Result<(), CodecError> {
        let index = self
            .current
            .ok_or_else(|| CodecError::Failed("no frame to convert".into()))?;
        let expected = self.width as usize * self.height as usize * 4;
        if dst.len() != expected {
            return Err(CodecError::Failed(format!(
                "destination is {} bytes, expected {}",
                dst.len(),
                expected
            )));
        }
        let pixel = [index as u8, (index >> 8) as u8, 0x80, 0xff];
        for chunk in dst.chunks_exact_mut(4) {
            chunk.copy_from_slice(&pixel);
        }
        Ok(())
    }

    fn flush(&mut self) {
        self.pending.clear();
        self.current = None;
        self.draining = false;
        self.have_keyframe = false;
    }
}

/// Value of sample `i` of channel `c` in block `block`, before conversion to
/// the stream's sample type.
pub fn synthetic_sample(block: usize, block_samples: usize, channel: usize, i: usize) -> i32 {
    ((block * block_samples + i) % 100) as i32 + channel as i32 * 100
}

pub struct SyntheticAudioDecoder {
    format: SampleFormat,
    channels: usize,
    block_samples: usize,
    pending: VecDeque<(i64, usize)>,
    planes: Vec<Vec<u8>>,
    pts: Option<i64>,
    draining: bool,
}

impl SyntheticAudioDecoder {
    fn encode(&self, values: &[i32]) -> Vec<u8> {
        match self.format.sample_type {
            SampleType::U8 => values.iter().map(|v| *v as u8).collect(),
            SampleType::S16 => {
                let samples: Vec<i16> = values.iter().map(|v| *v as i16).collect();
                bytemuck::cast_slice(&samples).to_vec()
            }
            SampleType::S32 => bytemuck::cast_slice(values).to_vec(),
            SampleType::F32 => {
                let samples: Vec<f32> = values.iter().map(|v| *v as f32).collect();
                bytemuck::cast_slice(&samples).to_vec()
            }
        }
    }

    fn render(&mut self, block: usize) {
        let n = self.block_samples;
        let channels = self.channels;
        self.planes = if self.format.planar {
            (0..channels)
                .map(|c| {
                    let values: Vec<i32> = (0..n)
                        .map(|i| synthetic_sample(block, n, c, i))
                        .collect();
                    self.encode(&values)
                })
                .collect()
        } else {
            let values: Vec<i32> = (0..n)
                .flat_map(|i| (0..channels).map(move |c| synthetic_sample(block, n, c, i)))
                .collect();
            vec![self.encode(&values)]
        };
    }
}

impl AudioDecoder for SyntheticAudioDecoder {
    type Packet = Packet;

    fn send_packet(&mut self, packet: Option<&Packet>) -> Result<(), CodecError> {
        let Some(packet) = packet else {
            self.draining = true;
            return Ok(());
        };
        if self.draining {
            return Err(CodecError::Failed("packet sent after end of stream".into()));
        }
        let block = packet
            .data
            .get(..4)
            .and_then(|b| b.try_into().ok())
            .map(u32::from_le_bytes)
            .ok_or_else(|| CodecError::Failed("truncated packet".into()))? as usize;
        self.pending.push_back((packet.pts.unwrap_or(0), block));
        Ok(())
    }

    fn receive_frame(&mut self) -> Result<RawAudio<'_>, CodecError> {
        let Some((pts, block)) = self.pending.pop_front() else {
            return Err(if self.draining {
                CodecError::Eof
            } else {
                CodecError::Again
            });
        };
        self.render(block);
        self.pts = Some(pts);
        Ok(RawAudio {
            pts: self.pts,
            sample_count: self.block_samples,
            format: self.format,
            planes: self.planes.iter().map(Vec::as_slice).collect(),
        })
    }

    fn flush(&mut self) {
        self.pending.clear();
        self.draining = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn container(desc: &str) -> SyntheticContainer {
        SyntheticBackend::default().open(desc).unwrap()
    }

    #[test]
    fn test_parse_description() {
        let desc: SyntheticSource = "synthetic:frames=48,fps=30000/1001,gop=12,delay=2,audio=f32p,channels=6"
            .parse()
            .unwrap();
        assert_eq!(desc.frames, 48);
        assert_eq!(desc.frame_rate, Rational::new(30000, 1001));
        assert_eq!(desc.gop, 12);
        let audio = desc.audio.unwrap();
        assert_eq!(audio.channels, 6);
        assert_eq!(audio.format, Some(SampleFormat::planar(SampleType::F32)));

        assert_eq!(desc.pixel_aspect, Rational::new(1, 1));
        assert_eq!(
            "aspect=4/3".parse::<SyntheticSource>().unwrap().pixel_aspect,
            Rational::new(4, 3)
        );

        assert!("frames=x".parse::<SyntheticSource>().is_err());
        assert!("bogus=1".parse::<SyntheticSource>().is_err());
        assert_eq!(
            "audio=dbl".parse::<SyntheticSource>().unwrap().audio.unwrap().format,
            None
        );
    }

    #[test]
    fn test_packets_interleaved_in_time() {
        let mut c = container("frames=24,fps=24,audio=s16,block=4800,rate=48000");
        let mut last = i64::MIN;
        let mut video = 0;
        let mut audio = 0;
        while let Ok(packet) = c.read_packet() {
            let tb = c.streams()[packet.stream_index].time_base;
            let time = to_internal(packet.pts.unwrap(), tb);
            assert!(time >= last);
            last = time;
            match c.streams()[packet.stream_index].kind {
                MediaKind::Video => video += 1,
                MediaKind::Audio => audio += 1,
                MediaKind::Other => {}
            }
        }
        assert_eq!(video, 24);
        assert_eq!(audio, 10);
    }

    #[test]
    fn test_seek_lands_on_keyframe() {
        let mut c = container("frames=30,fps=24,gop=10");
        c.seek(0, 15, SeekFlags::Backward).unwrap();
        let packet = c.read_packet().unwrap();
        assert_eq!(packet.pts, Some(10));
        assert!(packet.keyframe);

        c.seek(0, -5, SeekFlags::Backward).unwrap();
        assert_eq!(c.read_packet().unwrap().pts, Some(0));
    }

    #[test]
    fn test_decoder_latency_and_drain() {
        let mut c = container("frames=3,delay=2");
        let mut decoder = c.open_video_decoder(0, &DecoderOptions { thread_count: 1 }).unwrap();
        let mut out = Vec::new();
        while let Ok(packet) = c.read_packet() {
            decoder.send_packet(Some(&packet)).unwrap();
            loop {
                match decoder.receive_frame() {
                    Ok(pts) => out.push(pts),
                    Err(CodecError::Again) => break,
                    Err(e) => panic!("{}", e),
                }
            }
        }
        assert_eq!(out, vec![Some(0)]);
        decoder.send_packet(None).unwrap();
        assert_eq!(decoder.receive_frame(), Ok(Some(1)));
        assert_eq!(decoder.receive_frame(), Ok(Some(2)));
        assert_eq!(decoder.receive_frame(), Err(CodecError::Eof));

        decoder.flush();
        assert_eq!(decoder.receive_frame(), Err(CodecError::Again));
    }

    #[test]
    fn test_inter_frames_need_reference() {
        let mut c = container("frames=4,gop=4");
        let mut decoder = c.open_video_decoder(0, &DecoderOptions { thread_count: 1 }).unwrap();
        c.seek(0, 0, SeekFlags::Backward).unwrap();
        let key = c.read_packet().unwrap();
        let inter = c.read_packet().unwrap();
        decoder.send_packet(Some(&inter)).unwrap();
        assert_eq!(decoder.receive_frame(), Err(CodecError::Again));
        decoder.send_packet(Some(&key)).unwrap();
        assert_eq!(decoder.receive_frame(), Ok(Some(0)));
    }

    #[test]
    fn test_injected_failures() {
        let mut c = container("frames=10,fail_read=5");
        for _ in 0..5 {
            assert!(c.read_packet().is_ok());
        }
        assert!(matches!(c.read_packet(), Err(ReadError::Io(_))));

        assert!(SyntheticBackend::default().open("fail_open").is_err());
        let mut c = container("missing=video");
        assert!(c.open_video_decoder(0, &DecoderOptions { thread_count: 0 }).is_err());
    }

    #[test]
    fn test_planar_audio_planes() {
        let mut c = container("frames=0,audio=s16p,channels=3,block=4,blocks=1");
        let mut decoder = c.open_audio_decoder(0, &DecoderOptions { thread_count: 0 }).unwrap();
        let packet = c.read_packet().unwrap();
        decoder.send_packet(Some(&packet)).unwrap();
        let raw = decoder.receive_frame().unwrap();
        assert_eq!(raw.planes.len(), 3);
        assert_eq!(raw.sample_count, 4);
        let plane2: Vec<i16> = raw.planes[2]
            .chunks_exact(2)
            .map(|b| i16::from_ne_bytes([b[0], b[1]]))
            .collect();
        assert_eq!(plane2, vec![200, 201, 202, 203]);
    }
}
