//! Consumer-side handle: owns the decode thread and its queue.

use crate::error::OpenError;
use crate::info::{info_channel, Info, InfoFuture};
use crate::media::MediaBackend;
use crate::options::ReaderOptions;
use crate::queue::DecodeQueue;
use crate::time::Timestamp;
use crate::worker::DecodeWorker;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{error, info_span};

pub struct Reader {
    source: String,
    queue: Arc<DecodeQueue>,
    info: InfoFuture,
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl Reader {
    /// Start decoding `source` on a background thread and return at once.
    /// Startup errors arrive through [`Reader::info`].
    pub fn spawn<B: MediaBackend>(
        backend: B,
        source: impl Into<String>,
        options: ReaderOptions,
    ) -> Result<Self, OpenError> {
        let source = source.into();
        let (promise, info) = info_channel();
        let queue = Arc::new(DecodeQueue::new(options.queue_capacity));
        let running = Arc::new(AtomicBool::new(true));

        let span = info_span!("decode", source = %source);
        let thread = thread::Builder::new()
            .name("djv-decode".into())
            .spawn({
                let source = source.clone();
                let queue = queue.clone();
                let running = running.clone();
                move || {
                    let _enter = span.enter();
                    DecodeWorker::from_parts(backend, source, options, queue, running, promise)
                        .run();
                }
            })
            .map_err(|e| OpenError::Spawn(e.to_string()))?;

        Ok(Self {
            source,
            queue,
            info,
            running,
            thread: Some(thread),
        })
    }

    /// Start decoding and wait until the source has been probed, so a source
    /// that cannot be opened fails here rather than later.
    pub fn open<B: MediaBackend>(
        backend: B,
        source: impl Into<String>,
        options: ReaderOptions,
    ) -> Result<(Self, Info), OpenError> {
        let reader = Self::spawn(backend, source, options)?;
        let info = reader.info.get()?;
        Ok((reader, info))
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn info(&self) -> InfoFuture {
        self.info.clone()
    }

    pub fn queue(&self) -> &Arc<DecodeQueue> {
        &self.queue
    }

    /// Request a seek; a newer request replaces a pending one.
    pub fn seek(&self, target: Timestamp) {
        self.queue.request_seek(target.max(0));
    }

    /// False once the worker has stopped, e.g. after a startup error.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.thread.take() {
            if handle.join().is_err() {
                error!(source = %self.source, "decode thread panicked");
            }
        }
    }
}

impl Drop for Reader {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::synthetic::{SyntheticBackend, SyntheticSource};
    use std::time::{Duration, Instant};

    fn wait_until(mut done: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !done() {
            assert!(Instant::now() < deadline, "timed out");
            thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn test_open_and_drain() {
        let (reader, info) =
            Reader::open(SyntheticBackend::default(), "frames=10,fps=24", ReaderOptions::default())
                .unwrap();
        assert!(info.audio.is_none());
        let queue = reader.queue().clone();
        wait_until(|| queue.is_finished());

        let mut last = -1;
        let mut count = 0;
        while let Some((ts, _)) = queue.pop_video() {
            assert!(ts > last);
            last = ts;
            count += 1;
        }
        assert_eq!(count, 10);
        assert!(reader.is_running());
    }

    #[test]
    fn test_open_error_is_synchronous() {
        let result = Reader::open(
            SyntheticBackend::default(),
            "missing=video",
            ReaderOptions::default(),
        );
        assert!(matches!(result, Err(OpenError::CodecNotFound { .. })));
    }

    #[test]
    fn test_info_blocks_until_probed() {
        let source = SyntheticSource {
            open_delay: Duration::from_millis(50),
            ..SyntheticSource::default()
        };
        let reader = Reader::spawn(
            SyntheticBackend::new(source),
            "delayed",
            ReaderOptions::default(),
        )
        .unwrap();
        let future = reader.info();
        assert!(future.try_get().is_none());
        let first = future.get().unwrap();
        let second = reader.info().get().unwrap();
        assert_eq!(first, second);
        assert_eq!(first.source, "delayed");
    }

    #[test]
    fn test_failed_worker_stops() {
        let reader = Reader::spawn(
            SyntheticBackend::default(),
            "fail_open",
            ReaderOptions::default(),
        )
        .unwrap();
        assert!(reader.info().get().is_err());
        wait_until(|| !reader.is_running());
    }

    #[test]
    fn test_seek_while_streaming() {
        let desc = "frames=96,gop=24,delay=1";
        let source: SyntheticSource = desc.parse().unwrap();
        let mut options = ReaderOptions::default();
        options.queue_capacity = 8;
        let (reader, _) = Reader::open(SyntheticBackend::default(), desc, options).unwrap();
        let queue = reader.queue().clone();
        wait_until(|| queue.video_count() >= 8);

        let target = source.frame_time(50);
        reader.seek(target);
        wait_until(|| queue.lock().peek_video().is_some_and(|ts| ts >= target - 1));
        let (ts, _) = queue.pop_video().unwrap();
        assert!((ts - target).abs() <= 1);
    }

    #[test]
    fn test_drop_joins_worker() {
        let reader = Reader::spawn(
            SyntheticBackend::default(),
            "frames=1000",
            ReaderOptions::default(),
        )
        .unwrap();
        let running = reader.running.clone();
        drop(reader);
        assert!(!running.load(Ordering::SeqCst));
    }
}
