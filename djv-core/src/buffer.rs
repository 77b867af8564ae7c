//! # Shaped Buffers
//!
//! Decoded video frames and audio blocks: a shape descriptor plus owned,
//! contiguous storage. Buffers are built mutably by the decode step and
//! frozen into [`Bytes`] before they enter the queue, so the consumer only
//! ever sees immutable data.

use crate::time::Rational;
use bytes::{Bytes, BytesMut};
use serde::{Deserialize, Serialize};

// ============================================================================
// Video
// ============================================================================

/// Pixel layout of decoded frames. The pipeline always converts to packed
/// 8-bit RGBA.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PixelFormat {
    Rgba8,
}

impl PixelFormat {
    pub fn channels(&self) -> usize {
        match self {
            Self::Rgba8 => 4,
        }
    }
}

/// Axes along which rows/columns are stored mirrored relative to display.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Mirror {
    pub x: bool,
    pub y: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PixelShape {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub mirror: Mirror,
    /// Width of one pixel relative to its height; 1/1 for square pixels.
    pub pixel_aspect: Rational,
}

impl PixelShape {
    pub fn rgba(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            format: PixelFormat::Rgba8,
            mirror: Mirror::default(),
            pixel_aspect: Rational::new(1, 1),
        }
    }

    pub fn with_mirror(mut self, mirror: Mirror) -> Self {
        self.mirror = mirror;
        self
    }

    /// Anamorphic sources store pixels wider or narrower than tall. An
    /// unknown ratio (zero or negative) is treated as square.
    pub fn with_pixel_aspect(mut self, aspect: Rational) -> Self {
        self.pixel_aspect = if aspect.num > 0 && aspect.den > 0 {
            aspect
        } else {
            Rational::new(1, 1)
        };
        self
    }

    /// Bytes per row, no padding.
    pub fn stride(&self) -> usize {
        self.width as usize * self.format.channels()
    }

    pub fn byte_count(&self) -> usize {
        self.stride() * self.height as usize
    }
}

/// A decoded video frame.
#[derive(Debug, Clone, PartialEq)]
pub struct VideoFrame {
    shape: PixelShape,
    data: Bytes,
}

impl VideoFrame {
    /// Wrap existing storage. Returns `None` when the length does not match
    /// the shape.
    pub fn from_bytes(shape: PixelShape, data: Bytes) -> Option<Self> {
        (data.len() == shape.byte_count()).then_some(Self { shape, data })
    }

    pub fn shape(&self) -> &PixelShape {
        &self.shape
    }

    pub fn width(&self) -> u32 {
        self.shape.width
    }

    pub fn height(&self) -> u32 {
        self.shape.height
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }
}

/// Zeroed, writable storage for one frame; frozen with [`VideoFrameMut::freeze`].
pub struct VideoFrameMut {
    shape: PixelShape,
    data: BytesMut,
}

impl VideoFrameMut {
    pub fn new(shape: PixelShape) -> Self {
        Self {
            shape,
            data: BytesMut::zeroed(shape.byte_count()),
        }
    }

    pub fn shape(&self) -> &PixelShape {
        &self.shape
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    pub fn freeze(self) -> VideoFrame {
        VideoFrame {
            shape: self.shape,
            data: self.data.freeze(),
        }
    }
}

// ============================================================================
// Audio
// ============================================================================

/// Sample type of an audio buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SampleType {
    U8,
    S16,
    S32,
    F32,
}

impl SampleType {
    pub fn byte_count(&self) -> usize {
        match self {
            Self::U8 => 1,
            Self::S16 => 2,
            Self::S32 | Self::F32 => 4,
        }
    }
}

/// Sample type plus plane layout, as reported by a decoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SampleFormat {
    pub sample_type: SampleType,
    pub planar: bool,
}

impl SampleFormat {
    pub fn packed(sample_type: SampleType) -> Self {
        Self {
            sample_type,
            planar: false,
        }
    }

    pub fn planar(sample_type: SampleType) -> Self {
        Self {
            sample_type,
            planar: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AudioShape {
    pub channels: u16,
    pub sample_type: SampleType,
    pub sample_rate: u32,
}

impl AudioShape {
    pub fn new(channels: u16, sample_type: SampleType, sample_rate: u32) -> Self {
        Self {
            channels,
            sample_type,
            sample_rate,
        }
    }

    /// Bytes per sample frame (one sample for every channel).
    pub fn frame_byte_count(&self) -> usize {
        self.channels as usize * self.sample_type.byte_count()
    }
}

/// A decoded block of audio. Samples are always interleaved.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioBlock {
    shape: AudioShape,
    sample_count: usize,
    data: Bytes,
}

impl AudioBlock {
    /// Wrap interleaved storage holding `sample_count` samples per channel.
    pub fn from_bytes(shape: AudioShape, sample_count: usize, data: Bytes) -> Option<Self> {
        (data.len() == sample_count * shape.frame_byte_count()).then_some(Self {
            shape,
            sample_count,
            data,
        })
    }

    pub fn shape(&self) -> &AudioShape {
        &self.shape
    }

    /// Samples per channel.
    pub fn sample_count(&self) -> usize {
        self.sample_count
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }
}

/// Interleave a buffer whose channels are stored one after another
/// (`[c0 s0..sN][c1 s0..sN]...`) into `[s0 c0..cC][s1 c0..cC]...`.
///
/// `sample_size` is the byte width of one sample. Trailing bytes that do not
/// form a whole sample frame are dropped.
pub fn planar_interleave(planar: &[u8], channels: usize, sample_size: usize) -> Vec<u8> {
    if channels <= 1 || sample_size == 0 {
        return planar.to_vec();
    }
    let samples = planar.len() / (channels * sample_size);
    let plane_len = samples * sample_size;
    let mut out = vec![0u8; samples * channels * sample_size];
    for (c, plane) in planar.chunks_exact(plane_len).take(channels).enumerate() {
        for (i, sample) in plane.chunks_exact(sample_size).enumerate() {
            let at = (i * channels + c) * sample_size;
            out[at..at + sample_size].copy_from_slice(sample);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pixel_shape() {
        let shape = PixelShape::rgba(1920, 1080);
        assert_eq!(shape.stride(), 7680);
        assert_eq!(shape.byte_count(), 1920 * 1080 * 4);
        assert_eq!(
            shape.with_mirror(Mirror { x: false, y: true }).mirror,
            Mirror { x: false, y: true }
        );
        assert_eq!(shape.pixel_aspect, Rational::new(1, 1));
    }

    #[test]
    fn test_pixel_aspect() {
        let shape = PixelShape::rgba(720, 576).with_pixel_aspect(Rational::new(16, 15));
        assert_eq!(shape.pixel_aspect, Rational::new(16, 15));
        // Byte layout does not depend on the aspect.
        assert_eq!(shape.byte_count(), 720 * 576 * 4);

        let unknown = PixelShape::rgba(4, 4).with_pixel_aspect(Rational::new(0, 1));
        assert_eq!(unknown.pixel_aspect, Rational::new(1, 1));
    }

    #[test]
    fn test_video_frame_freeze() {
        let mut frame = VideoFrameMut::new(PixelShape::rgba(2, 2));
        frame.data_mut()[0] = 255;
        let frame = frame.freeze();
        assert_eq!(frame.data().len(), 16);
        assert_eq!(frame.data()[0], 255);
        assert!(VideoFrame::from_bytes(PixelShape::rgba(2, 2), Bytes::from_static(&[0; 15])).is_none());
    }

    #[test]
    fn test_planar_interleave_pattern() {
        // C channels of N 16-bit samples, plane[c][i] = c * 1000 + i
        for channels in 1..=6usize {
            let n = 37usize;
            let mut planar = Vec::new();
            for c in 0..channels {
                for i in 0..n {
                    planar.extend_from_slice(&((c * 1000 + i) as i16).to_ne_bytes());
                }
            }
            let out = planar_interleave(&planar, channels, 2);
            assert_eq!(out.len(), planar.len());
            for i in 0..n {
                for c in 0..channels {
                    let at = (i * channels + c) * 2;
                    let sample = i16::from_ne_bytes([out[at], out[at + 1]]);
                    assert_eq!(sample as usize, c * 1000 + i, "i={} c={}", i, c);
                }
            }
        }
    }

    #[test]
    fn test_planar_interleave_float() {
        let left = [0.25f32, 0.5];
        let right = [-0.25f32, -0.5];
        let mut planar = Vec::new();
        for s in left.iter().chain(right.iter()) {
            planar.extend_from_slice(&s.to_ne_bytes());
        }
        let out = planar_interleave(&planar, 2, 4);
        let samples: Vec<f32> = out
            .chunks_exact(4)
            .map(|b| f32::from_ne_bytes([b[0], b[1], b[2], b[3]]))
            .collect();
        assert_eq!(samples, vec![0.25, -0.25, 0.5, -0.5]);
    }

    #[test]
    fn test_audio_block_shape() {
        let shape = AudioShape::new(2, SampleType::S16, 48_000);
        assert_eq!(shape.frame_byte_count(), 4);
        assert!(AudioBlock::from_bytes(shape, 3, Bytes::from(vec![0u8; 12])).is_some());
        assert!(AudioBlock::from_bytes(shape, 3, Bytes::from(vec![0u8; 11])).is_none());
    }
}
