//! FFmpeg-backed container and codecs (`ffmpeg` feature).

use crate::buffer::{SampleFormat, SampleType};
use crate::error::{CodecError, OpenError, ReadError, SeekError};
use crate::media::{
    AudioDecoder, CodecParams, Container, DecoderOptions, MediaBackend, MediaKind, MediaPacket,
    RawAudio, SeekFlags, StreamDesc, VideoDecoder,
};
use crate::time::{to_internal, Rational, Timestamp};
use ffmpeg_next as ffmpeg;
use ffmpeg::format::Pixel;
use ffmpeg::software::scaling;
use once_cell::sync::OnceCell;
use std::collections::BTreeMap;
use tracing::debug;

static INIT: OnceCell<Result<(), String>> = OnceCell::new();

fn init() -> Result<(), String> {
    INIT.get_or_init(|| ffmpeg::init().map_err(|e| e.to_string()))
        .clone()
}

fn rational(r: ffmpeg::Rational) -> Rational {
    Rational::new(r.numerator(), r.denominator())
}

fn codec_error(err: ffmpeg::Error) -> CodecError {
    match err {
        ffmpeg::Error::Eof => CodecError::Eof,
        ffmpeg::Error::Other { errno } if errno == ffmpeg::error::EAGAIN => CodecError::Again,
        other => CodecError::Failed(other.to_string()),
    }
}

fn sample_format(format: ffmpeg::format::Sample) -> Option<SampleFormat> {
    use ffmpeg::format::sample::Type;
    use ffmpeg::format::Sample;
    let (sample_type, layout) = match format {
        Sample::U8(layout) => (SampleType::U8, layout),
        Sample::I16(layout) => (SampleType::S16, layout),
        Sample::I32(layout) => (SampleType::S32, layout),
        Sample::F32(layout) => (SampleType::F32, layout),
        _ => return None,
    };
    Some(SampleFormat {
        sample_type,
        planar: layout == Type::Planar,
    })
}

impl MediaPacket for ffmpeg::Packet {
    fn stream_index(&self) -> usize {
        self.stream()
    }
}

/// Opens files and URLs through libavformat.
#[derive(Debug, Clone, Copy, Default)]
pub struct FfmpegBackend;

impl MediaBackend for FfmpegBackend {
    type Container = FfmpegContainer;

    fn open(&self, source: &str) -> Result<FfmpegContainer, OpenError> {
        let open_error = |reason: String| OpenError::Open {
            source_name: source.to_string(),
            reason,
        };
        init().map_err(open_error)?;
        let input = ffmpeg::format::input(&source).map_err(|e| open_error(e.to_string()))?;
        let streams = input.streams().map(|stream| describe(&stream)).collect();
        Ok(FfmpegContainer {
            source: source.to_string(),
            input,
            streams,
        })
    }
}

/// Probe a stream's codec parameters by opening a throwaway decoder.
fn describe(stream: &ffmpeg::format::stream::Stream) -> StreamDesc {
    let parameters = stream.parameters();
    let id = parameters.id();
    let duration = Some(stream.duration()).filter(|d| *d >= 0);
    let context = ffmpeg::codec::context::Context::from_parameters(parameters);
    let (kind, params) = match stream.parameters().medium() {
        ffmpeg::media::Type::Video => {
            let frame_rate = match stream.avg_frame_rate() {
                r if r.numerator() > 0 && r.denominator() > 0 => rational(r),
                _ => rational(stream.rate()),
            };
            // Sample aspect is 0/1 when unknown; the worker treats that as square.
            let (width, height, pixel_aspect) = context
                .and_then(|c| c.decoder().video())
                .map(|d| (d.width(), d.height(), rational(d.aspect_ratio())))
                .unwrap_or((0, 0, Rational::default()));
            (
                MediaKind::Video,
                CodecParams::Video {
                    width,
                    height,
                    frame_rate,
                    pixel_aspect,
                },
            )
        }
        ffmpeg::media::Type::Audio => {
            let params = match context.and_then(|c| c.decoder().audio()) {
                Ok(decoder) => CodecParams::Audio {
                    channels: decoder.ch_layout().channels() as u16,
                    sample_rate: decoder.rate(),
                    format: sample_format(decoder.format()),
                    format_name: decoder.format().name().to_string(),
                },
                Err(_) => CodecParams::Audio {
                    channels: 0,
                    sample_rate: 0,
                    format: None,
                    format_name: "unknown".into(),
                },
            };
            (MediaKind::Audio, params)
        }
        _ => (MediaKind::Other, CodecParams::Other),
    };
    StreamDesc {
        index: stream.index(),
        kind,
        time_base: rational(stream.time_base()),
        duration,
        codec_name: id.name().to_string(),
        params,
    }
}

pub struct FfmpegContainer {
    source: String,
    input: ffmpeg::format::context::Input,
    streams: Vec<StreamDesc>,
}

impl FfmpegContainer {
    fn decoder_context(
        &self,
        stream: usize,
        kind: MediaKind,
        options: &DecoderOptions,
    ) -> Result<ffmpeg::codec::decoder::Decoder, OpenError> {
        let not_found = || OpenError::CodecNotFound {
            source_name: self.source.clone(),
            kind,
        };
        let stream = self.input.stream(stream).ok_or_else(not_found)?;
        if ffmpeg::codec::decoder::find(stream.parameters().id()).is_none() {
            return Err(not_found());
        }
        let mut context = ffmpeg::codec::context::Context::from_parameters(stream.parameters())
            .map_err(|e| OpenError::DecoderOpen {
                source_name: self.source.clone(),
                kind,
                reason: e.to_string(),
            })?;
        if options.thread_count > 0 {
            context.set_threading(ffmpeg::threading::Config {
                count: options.thread_count,
                ..ffmpeg::threading::Config::default()
            });
        }
        Ok(context.decoder())
    }

    fn open_error(&self, kind: MediaKind, err: ffmpeg::Error) -> OpenError {
        OpenError::DecoderOpen {
            source_name: self.source.clone(),
            kind,
            reason: err.to_string(),
        }
    }
}

impl Container for FfmpegContainer {
    type Packet = ffmpeg::Packet;
    type Video = FfmpegVideoDecoder;
    type Audio = FfmpegAudioDecoder;

    fn streams(&self) -> &[StreamDesc] {
        &self.streams
    }

    fn duration(&self) -> Option<Timestamp> {
        // AV_TIME_BASE is microseconds, like internal ticks.
        Some(self.input.duration()).filter(|d| *d >= 0)
    }

    fn metadata(&self) -> BTreeMap<String, String> {
        self.input
            .metadata()
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn open_video_decoder(
        &mut self,
        stream: usize,
        options: &DecoderOptions,
    ) -> Result<FfmpegVideoDecoder, OpenError> {
        let decoder = self
            .decoder_context(stream, MediaKind::Video, options)?
            .video()
            .map_err(|e| self.open_error(MediaKind::Video, e))?;
        Ok(FfmpegVideoDecoder {
            decoder,
            frame: ffmpeg::frame::Video::empty(),
            rgba: ffmpeg::frame::Video::empty(),
            scaler: None,
        })
    }

    fn open_audio_decoder(
        &mut self,
        stream: usize,
        options: &DecoderOptions,
    ) -> Result<FfmpegAudioDecoder, OpenError> {
        let decoder = self
            .decoder_context(stream, MediaKind::Audio, options)?
            .audio()
            .map_err(|e| self.open_error(MediaKind::Audio, e))?;
        Ok(FfmpegAudioDecoder {
            decoder,
            frame: ffmpeg::frame::Audio::empty(),
        })
    }

    fn read_packet(&mut self) -> Result<ffmpeg::Packet, ReadError> {
        let mut packet = ffmpeg::Packet::empty();
        match packet.read(&mut self.input) {
            Ok(()) => Ok(packet),
            Err(ffmpeg::Error::Eof) => Err(ReadError::EndOfFile),
            Err(e) => Err(ReadError::Io(e.to_string())),
        }
    }

    fn seek(&mut self, stream: usize, timestamp: i64, flags: SeekFlags) -> Result<(), SeekError> {
        let time_base = self
            .streams
            .get(stream)
            .map(|s| s.time_base)
            .ok_or_else(|| SeekError {
                target: timestamp,
                reason: format!("no stream {}", stream),
            })?;
        // Stream index -1 seeks in AV_TIME_BASE units.
        let us = to_internal(timestamp, time_base);
        debug!(stream, timestamp, us, "ffmpeg seek");
        let result = match flags {
            SeekFlags::Backward => self.input.seek(us, ..=us),
        };
        result.map_err(|e| SeekError {
            target: timestamp,
            reason: e.to_string(),
        })
    }
}

pub struct FfmpegVideoDecoder {
    decoder: ffmpeg::decoder::Video,
    frame: ffmpeg::frame::Video,
    rgba: ffmpeg::frame::Video,
    scaler: Option<scaling::Context>,
}

impl VideoDecoder for FfmpegVideoDecoder {
    type Packet = ffmpeg::Packet;

    fn send_packet(&mut self, packet: Option<&ffmpeg::Packet>) -> Result<(), CodecError> {
        match packet {
            Some(packet) => self.decoder.send_packet(packet),
            None => self.decoder.send_eof(),
        }
        .map_err(codec_error)
    }

    fn receive_frame(&mut self) -> Result<Option<i64>, CodecError> {
        self.decoder
            .receive_frame(&mut self.frame)
            .map_err(codec_error)?;
        Ok(self.frame.timestamp().or(self.frame.pts()))
    }

    fn convert_rgba(&mut self, dst: &mut [u8]) -> Result<(), CodecError> {
        let (format, width, height) = (self.frame.format(), self.frame.width(), self.frame.height());
        let stale = self.scaler.as_ref().map_or(true, |s| {
            s.input().format != format || s.input().width != width || s.input().height != height
        });
        if stale {
            self.scaler = Some(
                scaling::Context::get(
                    format,
                    width,
                    height,
                    Pixel::RGBA,
                    width,
                    height,
                    scaling::Flags::BILINEAR,
                )
                .map_err(|e| CodecError::Failed(e.to_string()))?,
            );
        }
        let scaler = self
            .scaler
            .as_mut()
            .ok_or_else(|| CodecError::Failed("no scaler".into()))?;
        scaler
            .run(&self.frame, &mut self.rgba)
            .map_err(|e| CodecError::Failed(e.to_string()))?;

        let row = width as usize * 4;
        if dst.len() < row * height as usize {
            return Err(CodecError::Failed("destination too small".into()));
        }
        let stride = self.rgba.stride(0);
        let src = self.rgba.data(0);
        for (y, out) in dst.chunks_exact_mut(row).take(height as usize).enumerate() {
            let start = y * stride;
            out.copy_from_slice(&src[start..start + row]);
        }
        Ok(())
    }

    fn flush(&mut self) {
        self.decoder.flush();
    }
}

pub struct FfmpegAudioDecoder {
    decoder: ffmpeg::decoder::Audio,
    frame: ffmpeg::frame::Audio,
}

impl AudioDecoder for FfmpegAudioDecoder {
    type Packet = ffmpeg::Packet;

    fn send_packet(&mut self, packet: Option<&ffmpeg::Packet>) -> Result<(), CodecError> {
        match packet {
            Some(packet) => self.decoder.send_packet(packet),
            None => self.decoder.send_eof(),
        }
        .map_err(codec_error)
    }

    fn receive_frame(&mut self) -> Result<RawAudio<'_>, CodecError> {
        self.decoder
            .receive_frame(&mut self.frame)
            .map_err(codec_error)?;
        let format = sample_format(self.frame.format()).ok_or_else(|| {
            CodecError::Failed(format!("sample format {}", self.frame.format().name()))
        })?;
        let frame = &self.frame;
        Ok(RawAudio {
            pts: frame.timestamp().or(frame.pts()),
            sample_count: frame.samples(),
            format,
            planes: (0..frame.planes()).map(|i| frame.data(i)).collect(),
        })
    }

    fn flush(&mut self) {
        self.decoder.flush();
    }
}
