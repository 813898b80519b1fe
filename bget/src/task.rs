//! Task identity, lifecycle states, and progress snapshots.

use bget_extractor::QualityTier;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle of a download task.
///
/// Stages advance monotonically; `Error` and `Cancelled` are terminal.
/// `Unknown` is what a query for a retired or never-seen id reports, so
/// pollers cannot distinguish "expired" from "never existed".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum TaskStatus {
    Starting,
    DownloadingVideo,
    DownloadingAudio,
    Merging,
    Completed,
    Error { message: String },
    Cancelled,
    Unknown,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Error { .. } | Self::Cancelled | Self::Unknown
        )
    }

    /// Human-readable stage label for progress reporting.
    pub fn stage_label(&self) -> &'static str {
        match self {
            Self::Starting => "starting",
            Self::DownloadingVideo => "downloading video",
            Self::DownloadingAudio => "downloading audio",
            Self::Merging => "merging",
            Self::Completed => "completed",
            Self::Error { .. } => "error",
            Self::Cancelled => "cancelled",
            Self::Unknown => "unknown",
        }
    }
}

/// Point-in-time view of a task, safe to hand to pollers.
#[derive(Debug, Clone, Serialize)]
pub struct TaskSnapshot {
    pub id: String,
    #[serde(flatten)]
    pub status: TaskStatus,
    pub requested_tier: QualityTier,
    /// Per-stage completion, 0.0 to 100.0.
    pub video_percent: f64,
    pub audio_percent: f64,
    pub downloaded_bytes: u64,
    pub total_bytes: Option<u64>,
    pub bytes_per_sec: f64,
    pub title: Option<String>,
    /// Set when the task completes.
    pub file_name: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl TaskSnapshot {
    pub fn starting(id: String, requested_tier: QualityTier) -> Self {
        Self {
            id,
            status: TaskStatus::Starting,
            requested_tier,
            video_percent: 0.0,
            audio_percent: 0.0,
            downloaded_bytes: 0,
            total_bytes: None,
            bytes_per_sec: 0.0,
            title: None,
            file_name: None,
            updated_at: Utc::now(),
        }
    }

    /// Neutral snapshot for ids the registry no longer tracks.
    pub fn unknown(id: &str) -> Self {
        Self {
            status: TaskStatus::Unknown,
            ..Self::starting(id.to_string(), QualityTier(0))
        }
    }

    /// Completion of the stage the task is currently in.
    pub fn stage_percent(&self) -> f64 {
        match self.status {
            TaskStatus::DownloadingVideo => self.video_percent,
            TaskStatus::DownloadingAudio => self.audio_percent,
            TaskStatus::Completed => 100.0,
            _ => 0.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states() {
        assert!(TaskStatus::Completed.is_terminal());
        assert!(TaskStatus::Cancelled.is_terminal());
        assert!(
            TaskStatus::Error {
                message: "boom".into()
            }
            .is_terminal()
        );
        assert!(!TaskStatus::DownloadingAudio.is_terminal());
    }

    #[test]
    fn snapshot_serializes_with_flat_status() {
        let snap = TaskSnapshot::unknown("download_1_abc");
        let json = serde_json::to_value(&snap).unwrap();
        assert_eq!(json["status"], "unknown");
        assert_eq!(json["video_percent"], 0.0);
        assert_eq!(json["audio_percent"], 0.0);
    }

    #[test]
    fn stage_percent_follows_the_stage() {
        let mut snap = TaskSnapshot::starting("t".into(), QualityTier(80));
        snap.video_percent = 40.0;
        snap.status = TaskStatus::DownloadingVideo;
        assert_eq!(snap.stage_percent(), 40.0);
        snap.status = TaskStatus::DownloadingAudio;
        assert_eq!(snap.stage_percent(), 0.0);
        snap.status = TaskStatus::Completed;
        assert_eq!(snap.stage_percent(), 100.0);
    }
}
