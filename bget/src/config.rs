//! Runtime configuration for the download pipeline.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Default per-request timeout for stream fetches.
const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(15 * 60);

/// How long a finished task snapshot stays queryable.
const DEFAULT_TASK_RETENTION: Duration = Duration::from_secs(5 * 60);

/// Delay before temp files of a delivered task are swept.
const DEFAULT_CLEANUP_DELAY: Duration = Duration::from_secs(5);

/// Pipeline configuration with sensible defaults for every field.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Scratch directory for in-flight stream files.
    pub work_dir: PathBuf,

    /// ffmpeg executable, resolved through PATH when relative.
    pub ffmpeg_path: PathBuf,

    /// yt-dlp executable used for the metadata probe fallback.
    pub ytdlp_path: PathBuf,

    /// Hard ceiling on a single stream fetch.
    #[serde(with = "duration_secs")]
    pub fetch_timeout: Duration,

    /// Retention window for finished task snapshots.
    #[serde(with = "duration_secs")]
    pub task_retention: Duration,

    /// Grace period before deleting a delivered task's temp files.
    #[serde(with = "duration_secs")]
    pub cleanup_delay: Duration,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            work_dir: std::env::temp_dir().join("bget-downloads"),
            ffmpeg_path: PathBuf::from("ffmpeg"),
            ytdlp_path: PathBuf::from("yt-dlp"),
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
            task_retention: DEFAULT_TASK_RETENTION,
            cleanup_delay: DEFAULT_CLEANUP_DELAY,
        }
    }
}

impl AppConfig {
    /// Ensure the scratch directory exists.
    pub fn prepare(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.work_dir)
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(d)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_point_at_temp_dir() {
        let cfg = AppConfig::default();
        assert!(cfg.work_dir.ends_with("bget-downloads"));
        assert_eq!(cfg.task_retention, Duration::from_secs(300));
    }

    #[test]
    fn partial_config_fills_defaults() {
        let cfg: AppConfig = serde_json::from_str(r#"{"fetch_timeout": 60}"#).unwrap();
        assert_eq!(cfg.fetch_timeout, Duration::from_secs(60));
        assert_eq!(cfg.ffmpeg_path, PathBuf::from("ffmpeg"));
    }
}
