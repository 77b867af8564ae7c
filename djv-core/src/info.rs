//! # Stream Information
//!
//! Immutable description of an opened source, handed from the worker to the
//! consumer exactly once through an [`InfoPromise`] / [`InfoFuture`] pair.

use crate::buffer::{AudioShape, PixelShape};
use crate::error::OpenError;
use crate::time::{rescale, Rational, Timestamp, INTERNAL_TIME_BASE};
use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

// ============================================================================
// Info
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoInfo {
    /// Index of the selected stream in the container.
    pub stream: usize,
    pub shape: PixelShape,
    /// Frames per second.
    pub speed: Rational,
    pub duration: Timestamp,
    pub codec: String,
}

impl VideoInfo {
    /// Number of frames covered by `duration` at `speed`.
    pub fn frame_count(&self) -> i64 {
        if !self.speed.is_valid() {
            return 0;
        }
        rescale(self.duration, INTERNAL_TIME_BASE, self.speed.invert())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioInfo {
    pub stream: usize,
    pub shape: AudioShape,
    pub duration: Timestamp,
    pub codec: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Info {
    pub source: String,
    pub video: Option<VideoInfo>,
    pub audio: Option<AudioInfo>,
    pub tags: BTreeMap<String, String>,
}

impl Info {
    pub fn video_stream(&self) -> Option<usize> {
        self.video.as_ref().map(|v| v.stream)
    }

    pub fn audio_stream(&self) -> Option<usize> {
        self.audio.as_ref().map(|a| a.stream)
    }

    /// Longest of the stream durations.
    pub fn duration(&self) -> Timestamp {
        let video = self.video.as_ref().map_or(0, |v| v.duration);
        let audio = self.audio.as_ref().map_or(0, |a| a.duration);
        video.max(audio)
    }
}

// ============================================================================
// One-shot handshake
// ============================================================================

type Slot = Option<Result<Info, OpenError>>;

struct Shared {
    slot: Mutex<Slot>,
    ready: Condvar,
}

/// Producer side. Consumed by [`InfoPromise::fulfill`], so it can only be
/// completed once; dropping it unfulfilled completes it with
/// [`OpenError::Abandoned`].
pub struct InfoPromise {
    shared: Option<Arc<Shared>>,
}

/// Consumer side. Cloneable; every clone observes the same single value.
#[derive(Clone)]
pub struct InfoFuture {
    shared: Arc<Shared>,
}

/// Create a connected promise/future pair.
pub fn info_channel() -> (InfoPromise, InfoFuture) {
    let shared = Arc::new(Shared {
        slot: Mutex::new(None),
        ready: Condvar::new(),
    });
    (
        InfoPromise {
            shared: Some(shared.clone()),
        },
        InfoFuture { shared },
    )
}

impl InfoPromise {
    pub fn fulfill(mut self, value: Result<Info, OpenError>) {
        if let Some(shared) = self.shared.take() {
            Self::complete(&shared, value);
        }
    }

    fn complete(shared: &Shared, value: Result<Info, OpenError>) {
        let mut slot = shared.slot.lock();
        if slot.is_none() {
            *slot = Some(value);
        }
        shared.ready.notify_all();
    }
}

impl Drop for InfoPromise {
    fn drop(&mut self) {
        if let Some(shared) = self.shared.take() {
            Self::complete(&shared, Err(OpenError::Abandoned));
        }
    }
}

impl InfoFuture {
    /// Block until the worker has probed the source.
    pub fn get(&self) -> Result<Info, OpenError> {
        let mut slot = self.shared.slot.lock();
        self.shared.ready.wait_while(&mut slot, |slot| slot.is_none());
        slot.clone().unwrap_or(Err(OpenError::Abandoned))
    }

    /// Like [`InfoFuture::get`], giving up after `timeout`.
    pub fn get_timeout(&self, timeout: Duration) -> Option<Result<Info, OpenError>> {
        let mut slot = self.shared.slot.lock();
        self.shared
            .ready
            .wait_while_for(&mut slot, |slot| slot.is_none(), timeout);
        slot.clone()
    }

    pub fn try_get(&self) -> Option<Result<Info, OpenError>> {
        self.shared.slot.lock().clone()
    }

    pub fn is_ready(&self) -> bool {
        self.shared.slot.lock().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::SampleType;
    use std::thread;

    fn sample_info() -> Info {
        Info {
            source: "test".into(),
            video: Some(VideoInfo {
                stream: 0,
                shape: PixelShape::rgba(64, 32),
                speed: Rational::new(24, 1),
                duration: 2_000_000,
                codec: "raw".into(),
            }),
            audio: Some(AudioInfo {
                stream: 1,
                shape: AudioShape::new(2, SampleType::S16, 48_000),
                duration: 1_000_000,
                codec: "pcm".into(),
            }),
            tags: BTreeMap::new(),
        }
    }

    #[test]
    fn test_frame_count() {
        let info = sample_info();
        assert_eq!(info.video.as_ref().unwrap().frame_count(), 48);
        assert_eq!(info.duration(), 2_000_000);
        assert_eq!(info.video_stream(), Some(0));
        assert_eq!(info.audio_stream(), Some(1));
    }

    #[test]
    fn test_get_twice_returns_same_value() {
        let (promise, future) = info_channel();
        promise.fulfill(Ok(sample_info()));
        let a = future.get().unwrap();
        let b = future.clone().get().unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_get_blocks_until_fulfilled() {
        let (promise, future) = info_channel();
        assert!(future.try_get().is_none());
        assert!(future.get_timeout(Duration::from_millis(5)).is_none());

        let producer = thread::spawn(move || {
            thread::sleep(Duration::from_millis(30));
            promise.fulfill(Ok(sample_info()));
        });
        let info = future.get().unwrap();
        assert_eq!(info.source, "test");
        producer.join().unwrap();
        assert!(future.is_ready());
    }

    #[test]
    fn test_error_is_delivered_to_every_caller() {
        let (promise, future) = info_channel();
        promise.fulfill(Err(OpenError::NoStreams("x".into())));
        assert_eq!(future.get(), Err(OpenError::NoStreams("x".into())));
        assert_eq!(future.get(), Err(OpenError::NoStreams("x".into())));
    }

    #[test]
    fn test_dropped_promise_abandons() {
        let (promise, future) = info_channel();
        drop(promise);
        assert_eq!(future.get(), Err(OpenError::Abandoned));
    }
}
