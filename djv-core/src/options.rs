//! Reader configuration, persisted as JSON.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Default high-water mark of each queue lane.
pub const DEFAULT_QUEUE_CAPACITY: usize = 100;

/// Default bound on the worker's condition-variable wait.
pub const DEFAULT_WAIT_TIMEOUT_MS: u64 = 10;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReaderOptions {
    /// High-water mark shared by the video and audio lanes.
    pub queue_capacity: usize,
    /// Worker wait timeout; also bounds shutdown and seek pickup latency.
    pub wait_timeout_ms: u64,
    /// Decoder thread count hint, 0 lets the codec decide.
    pub thread_count: usize,
    /// Mark RGBA frames as mirrored on Y (rows stored top-down).
    pub flip_y: bool,
}

impl Default for ReaderOptions {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            wait_timeout_ms: DEFAULT_WAIT_TIMEOUT_MS,
            thread_count: 4,
            flip_y: true,
        }
    }
}

impl ReaderOptions {
    pub fn wait_timeout(&self) -> Duration {
        Duration::from_millis(self.wait_timeout_ms.max(1))
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let options: Self =
            serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
                path: path.display().to_string(),
                source,
            })?;
        if options.queue_capacity == 0 {
            return Err(ConfigError::Invalid {
                path: path.display().to_string(),
                reason: "queue_capacity must be at least 1".into(),
            });
        }
        Ok(options)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let io_err = |source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        };
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(io_err)?;
            }
        }
        let content = serde_json::to_string_pretty(self).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })?;
        std::fs::write(path, content).map_err(io_err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let options = ReaderOptions::default();
        assert_eq!(options.queue_capacity, 100);
        assert_eq!(options.wait_timeout(), Duration::from_millis(10));
        assert!(options.flip_y);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reader.json");
        std::fs::write(&path, r#"{ "queue_capacity": 8 }"#).unwrap();

        let options = ReaderOptions::load(&path).unwrap();
        assert_eq!(options.queue_capacity, 8);
        assert_eq!(options.wait_timeout_ms, DEFAULT_WAIT_TIMEOUT_MS);
    }

    #[test]
    fn test_save_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("reader.json");
        let options = ReaderOptions {
            thread_count: 1,
            flip_y: false,
            ..Default::default()
        };
        options.save(&path).unwrap();
        assert_eq!(ReaderOptions::load(&path).unwrap(), options);
    }

    #[test]
    fn test_load_errors() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.json");
        assert!(matches!(ReaderOptions::load(&missing), Err(ConfigError::Io { .. })));

        let bad = dir.path().join("bad.json");
        std::fs::write(&bad, "{ not json").unwrap();
        assert!(matches!(ReaderOptions::load(&bad), Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reader.json");
        std::fs::write(&path, r#"{ "queue_capacity": 0 }"#).unwrap();
        let err = ReaderOptions::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));
        assert!(err.to_string().contains("queue_capacity"));
    }
}
