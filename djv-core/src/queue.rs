//! # Decode Queue - Producer/Consumer Buffer
//!
//! Two lanes of `(timestamp, buffer)` pairs plus the pending seek request,
//! all behind one mutex:
//!
//! ```text
//! ┌──────────┐  push_*   ┌─────────────┐  pop_*    ┌──────────┐
//! │ Decode   │──────────►│ DecodeQueue │──────────►│ Playback │
//! │ Worker   │◄──────────│  video lane │◄──────────│ Thread   │
//! └──────────┘  notify   │  audio lane │  seek     └──────────┘
//!                        │  seek       │
//!                        └─────────────┘
//! ```
//!
//! Only the worker waits on the condition variable; the consumer notifies it
//! whenever it frees capacity or requests a seek. Requesting a seek empties
//! both lanes, and pushes are dropped until the worker accepts it. Accepting
//! clears again and re-arms the high-water marks under the same lock
//! acquisition, so the consumer never sees stale frames next to a new
//! target.

use crate::buffer::{AudioBlock, VideoFrame};
use crate::time::{Timestamp, NO_TIMESTAMP};
use parking_lot::{Condvar, Mutex, MutexGuard};
use std::collections::VecDeque;
use std::time::Duration;
use tracing::debug;

// ============================================================================
// Queue State
// ============================================================================

/// Everything guarded by the queue mutex.
#[derive(Debug)]
pub struct QueueState {
    video: VecDeque<(Timestamp, VideoFrame)>,
    audio: VecDeque<(Timestamp, AudioBlock)>,
    seek: Timestamp,
    capacity: usize,
    video_max: usize,
    audio_max: usize,
    video_enabled: bool,
    audio_enabled: bool,
    frames_pushed: u64,
    blocks_pushed: u64,
}

impl QueueState {
    fn new(capacity: usize) -> Self {
        Self {
            video: VecDeque::with_capacity(capacity),
            audio: VecDeque::with_capacity(capacity),
            seek: NO_TIMESTAMP,
            capacity,
            video_max: capacity,
            audio_max: capacity,
            video_enabled: true,
            audio_enabled: true,
            frames_pushed: 0,
            blocks_pushed: 0,
        }
    }

    pub fn video_count(&self) -> usize {
        self.video.len()
    }

    pub fn audio_count(&self) -> usize {
        self.audio.len()
    }

    /// Append a frame. Dropped while a seek is pending, since it was decoded
    /// for a position the consumer has already left. Returns whether it was
    /// queued.
    pub fn push_video(&mut self, ts: Timestamp, frame: VideoFrame) -> bool {
        if self.seek != NO_TIMESTAMP {
            return false;
        }
        self.video.push_back((ts, frame));
        self.frames_pushed += 1;
        true
    }

    /// Append an audio block; same rule as [`QueueState::push_video`].
    pub fn push_audio(&mut self, ts: Timestamp, block: AudioBlock) -> bool {
        if self.seek != NO_TIMESTAMP {
            return false;
        }
        self.audio.push_back((ts, block));
        self.blocks_pushed += 1;
        true
    }

    pub fn pop_video(&mut self) -> Option<(Timestamp, VideoFrame)> {
        self.video.pop_front()
    }

    pub fn pop_audio(&mut self) -> Option<(Timestamp, AudioBlock)> {
        self.audio.pop_front()
    }

    pub fn peek_video(&self) -> Option<Timestamp> {
        self.video.front().map(|(ts, _)| *ts)
    }

    pub fn clear(&mut self) {
        self.video.clear();
        self.audio.clear();
    }

    /// Seek target not yet taken by the worker.
    pub fn pending_seek(&self) -> Option<Timestamp> {
        (self.seek != NO_TIMESTAMP).then_some(self.seek)
    }

    /// `(video, audio)` high-water marks.
    pub fn high_water_marks(&self) -> (usize, usize) {
        (self.video_max, self.audio_max)
    }

    /// Stop production: no lane is ever below a zero mark.
    pub fn throttle(&mut self) {
        self.video_max = 0;
        self.audio_max = 0;
    }

    pub fn unthrottle(&mut self) {
        self.video_max = self.capacity;
        self.audio_max = self.capacity;
    }

    /// True once the worker has stopped producing because the stream ended
    /// or failed; cleared by the next accepted seek.
    pub fn is_finished(&self) -> bool {
        self.video_max == 0 && self.audio_max == 0
    }

    fn has_video_room(&self) -> bool {
        self.video_enabled && self.video.len() < self.video_max
    }

    fn has_audio_room(&self) -> bool {
        self.audio_enabled && self.audio.len() < self.audio_max
    }

    fn has_work(&self) -> bool {
        self.has_video_room() || self.has_audio_room() || self.seek != NO_TIMESTAMP
    }
}

/// Why the worker woke up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wake {
    /// A seek was accepted; the lanes are already cleared.
    Seek(Timestamp),
    /// At least one lane is below its high-water mark.
    Capacity,
    /// The wait timed out with nothing to do.
    Idle,
}

// ============================================================================
// Decode Queue
// ============================================================================

/// Bounded hand-off between one decode worker and one consumer.
///
/// Each lane holds up to its high-water mark; the worker only decodes while
/// some lane has room. Dropping the queue drops whatever is still buffered.
pub struct DecodeQueue {
    state: Mutex<QueueState>,
    cond: Condvar,
}

impl DecodeQueue {
    /// Create an empty queue whose lanes each hold up to `capacity` entries.
    /// A capacity of 0 is raised to 1, otherwise the worker would never wake.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            state: Mutex::new(QueueState::new(capacity)),
            cond: Condvar::new(),
        }
    }

    /// Acquire the guard for compound operations.
    pub fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock()
    }

    // ========================================================================
    // Producer API (Decode Worker)
    // ========================================================================

    /// Restrict the wait predicate to the lanes that have a stream behind
    /// them.
    pub fn set_lanes(&self, video: bool, audio: bool) {
        let mut state = self.state.lock();
        state.video_enabled = video;
        state.audio_enabled = audio;
    }

    /// Wait up to `timeout` for capacity or a seek request.
    ///
    /// A pending seek is taken, the marks are re-armed and both lanes are
    /// cleared before the guard is released.
    pub fn wait_for_work(&self, timeout: Duration) -> Wake {
        let mut state = self.state.lock();
        let result = self
            .cond
            .wait_while_for(&mut state, |state| !state.has_work(), timeout);
        if result.timed_out() && !state.has_work() {
            return Wake::Idle;
        }
        if state.seek != NO_TIMESTAMP {
            let seek = std::mem::replace(&mut state.seek, NO_TIMESTAMP);
            state.unthrottle();
            state.clear();
            debug!(seek, "seek accepted, queue cleared");
            return Wake::Seek(seek);
        }
        Wake::Capacity
    }

    /// Queue a decoded frame. Returns false if a pending seek made it stale.
    pub fn push_video(&self, ts: Timestamp, frame: VideoFrame) -> bool {
        self.state.lock().push_video(ts, frame)
    }

    /// Queue a decoded audio block. Returns false if a pending seek made it
    /// stale.
    pub fn push_audio(&self, ts: Timestamp, block: AudioBlock) -> bool {
        self.state.lock().push_audio(ts, block)
    }

    /// Set both marks to 0 after end of stream or a failure. The worker then
    /// idles until the next seek re-arms it.
    pub fn throttle(&self) {
        self.state.lock().throttle();
    }

    // ========================================================================
    // Consumer API (Playback Thread)
    // ========================================================================

    /// Take the oldest frame and wake the worker, which may now have room.
    pub fn pop_video(&self) -> Option<(Timestamp, VideoFrame)> {
        let item = self.state.lock().pop_video();
        if item.is_some() {
            self.cond.notify_one();
        }
        item
    }

    /// Take the oldest audio block and wake the worker.
    pub fn pop_audio(&self) -> Option<(Timestamp, AudioBlock)> {
        let item = self.state.lock().pop_audio();
        if item.is_some() {
            self.cond.notify_one();
        }
        item
    }

    /// Record a seek target; a newer request overwrites an older one. Both
    /// lanes are emptied at once so nothing from the old position can be
    /// popped in the meantime.
    pub fn request_seek(&self, ts: Timestamp) {
        let mut state = self.state.lock();
        state.seek = ts;
        state.clear();
        drop(state);
        self.cond.notify_one();
    }

    /// Restore both marks to the configured capacity.
    pub fn unthrottle(&self) {
        self.state.lock().unthrottle();
        self.cond.notify_one();
    }

    /// Empty both lanes; the marks are left as they are.
    pub fn clear(&self) {
        self.state.lock().clear();
        self.cond.notify_one();
    }

    // ========================================================================
    // Status API
    // ========================================================================

    /// Frames waiting to be popped.
    pub fn video_count(&self) -> usize {
        self.state.lock().video_count()
    }

    /// Audio blocks waiting to be popped.
    pub fn audio_count(&self) -> usize {
        self.state.lock().audio_count()
    }

    /// `(video, audio)` marks; both 0 while throttled.
    pub fn high_water_marks(&self) -> (usize, usize) {
        self.state.lock().high_water_marks()
    }

    /// See [`QueueState::is_finished`].
    pub fn is_finished(&self) -> bool {
        self.state.lock().is_finished()
    }

    /// Snapshot taken under one lock.
    pub fn stats(&self) -> QueueStats {
        let state = self.state.lock();
        QueueStats {
            video_frames: state.video.len(),
            audio_blocks: state.audio.len(),
            video_max: state.video_max,
            audio_max: state.audio_max,
            frames_pushed: state.frames_pushed,
            blocks_pushed: state.blocks_pushed,
            pending_seek: state.pending_seek(),
            buffered_us: buffered_span(&state.video),
        }
    }
}

fn buffered_span(lane: &VecDeque<(Timestamp, VideoFrame)>) -> i64 {
    match (lane.front(), lane.back()) {
        (Some((first, _)), Some((last, _))) => last - first,
        _ => 0,
    }
}

/// Queue statistics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueStats {
    pub video_frames: usize,
    pub audio_blocks: usize,
    pub video_max: usize,
    pub audio_max: usize,
    pub frames_pushed: u64,
    pub blocks_pushed: u64,
    pub pending_seek: Option<Timestamp>,
    pub buffered_us: i64,
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::{AudioShape, PixelShape, SampleType, VideoFrameMut};
    use bytes::Bytes;
    use std::sync::Arc;
    use std::thread;
    use std::time::Instant;

    fn frame() -> VideoFrame {
        VideoFrameMut::new(PixelShape::rgba(2, 2)).freeze()
    }

    fn block() -> AudioBlock {
        let shape = AudioShape::new(1, SampleType::S16, 48_000);
        AudioBlock::from_bytes(shape, 1, Bytes::from_static(&[0, 0])).unwrap()
    }

    #[test]
    fn test_fifo_order() {
        let queue = DecodeQueue::new(4);
        for ts in [10, 20, 30] {
            queue.push_video(ts, frame());
        }
        assert_eq!(queue.video_count(), 3);
        assert_eq!(queue.lock().peek_video(), Some(10));
        assert_eq!(queue.pop_video().map(|(ts, _)| ts), Some(10));
        assert_eq!(queue.pop_video().map(|(ts, _)| ts), Some(20));
        assert_eq!(queue.pop_video().map(|(ts, _)| ts), Some(30));
        assert!(queue.pop_video().is_none());
    }

    #[test]
    fn test_wait_reports_capacity() {
        let queue = DecodeQueue::new(2);
        queue.set_lanes(true, false);
        assert_eq!(queue.wait_for_work(Duration::from_millis(1)), Wake::Capacity);

        queue.push_video(0, frame());
        queue.push_video(1, frame());
        assert_eq!(queue.wait_for_work(Duration::from_millis(1)), Wake::Idle);

        queue.pop_video();
        assert_eq!(queue.wait_for_work(Duration::from_millis(1)), Wake::Capacity);
    }

    #[test]
    fn test_disabled_lane_does_not_wake() {
        let queue = DecodeQueue::new(1);
        queue.set_lanes(true, false);
        queue.push_video(0, frame());
        // Audio lane is empty but has no stream behind it.
        assert_eq!(queue.wait_for_work(Duration::from_millis(1)), Wake::Idle);
    }

    #[test]
    fn test_seek_clears_and_rearms_atomically() {
        let queue = DecodeQueue::new(3);
        queue.push_video(0, frame());
        queue.push_video(1, frame());
        queue.throttle();
        assert!(queue.is_finished());
        assert_eq!(queue.wait_for_work(Duration::from_millis(1)), Wake::Idle);

        queue.request_seek(500);
        queue.request_seek(700);
        assert_eq!(queue.stats().pending_seek, Some(700));

        assert_eq!(queue.wait_for_work(Duration::from_millis(1)), Wake::Seek(700));
        let stats = queue.stats();
        assert_eq!(stats.video_frames, 0);
        assert_eq!((stats.video_max, stats.audio_max), (3, 3));
        assert_eq!(stats.pending_seek, None);
        assert!(!queue.is_finished());
    }

    #[test]
    fn test_seek_wakes_waiting_worker() {
        let queue = Arc::new(DecodeQueue::new(1));
        queue.throttle();

        let worker = {
            let queue = queue.clone();
            thread::spawn(move || {
                let start = Instant::now();
                loop {
                    if let Wake::Seek(ts) = queue.wait_for_work(Duration::from_millis(500)) {
                        return (ts, start.elapsed());
                    }
                }
            })
        };
        thread::sleep(Duration::from_millis(20));
        queue.request_seek(42);
        let (ts, elapsed) = worker.join().unwrap();
        assert_eq!(ts, 42);
        assert!(elapsed < Duration::from_millis(500));
    }

    #[test]
    fn test_backpressure_bound() {
        // A producer that only pushes after a Capacity wake never exceeds
        // the mark by more than what one wake produces.
        let queue = Arc::new(DecodeQueue::new(5));
        queue.set_lanes(true, false);
        let producer = {
            let queue = queue.clone();
            thread::spawn(move || {
                let mut produced = 0;
                while produced < 200 {
                    if queue.wait_for_work(Duration::from_millis(10)) == Wake::Capacity {
                        queue.push_video(produced, frame());
                        produced += 1;
                    }
                }
            })
        };
        let mut seen = 0;
        let mut max_depth = 0;
        while seen < 200 {
            max_depth = max_depth.max(queue.video_count());
            if let Some((ts, _)) = queue.pop_video() {
                assert_eq!(ts, seen);
                seen += 1;
            } else {
                thread::yield_now();
            }
        }
        producer.join().unwrap();
        assert!(max_depth <= 5, "depth {}", max_depth);
    }

    #[test]
    fn test_push_dropped_while_seek_pending() {
        let queue = DecodeQueue::new(4);
        assert!(queue.push_video(0, frame()));
        queue.request_seek(1_000);
        // The request itself empties the lanes.
        assert_eq!(queue.video_count(), 0);
        assert!(queue.pop_video().is_none());

        assert!(!queue.push_video(10, frame()));
        assert!(!queue.push_audio(10, block()));
        let stats = queue.stats();
        assert_eq!((stats.video_frames, stats.audio_blocks), (0, 0));
        assert_eq!(stats.frames_pushed, 1);
        assert_eq!(stats.blocks_pushed, 0);

        assert_eq!(queue.wait_for_work(Duration::from_millis(1)), Wake::Seek(1_000));
        assert!(queue.push_video(1_000, frame()));
        assert_eq!(queue.pop_video().map(|(ts, _)| ts), Some(1_000));
    }

    #[test]
    fn test_zero_capacity_raised_to_one() {
        let queue = DecodeQueue::new(0);
        queue.set_lanes(true, false);
        assert_eq!(queue.high_water_marks(), (1, 1));
        assert_eq!(queue.wait_for_work(Duration::from_millis(1)), Wake::Capacity);
    }

    #[test]
    fn test_clear_keeps_marks() {
        let queue = DecodeQueue::new(2);
        queue.push_video(0, frame());
        queue.throttle();
        queue.clear();
        assert_eq!(queue.video_count(), 0);
        assert!(queue.is_finished());
        queue.unthrottle();
        assert_eq!(queue.high_water_marks(), (2, 2));
    }
}
