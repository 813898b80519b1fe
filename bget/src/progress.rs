//! Progress reporting seam between the fetcher and the task registry.

/// One progress observation from a byte transfer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProgressUpdate {
    /// 0.0 to 100.0, or an indeterminate 0.0 when the total is unknown.
    pub percent: f64,
    pub downloaded_bytes: u64,
    pub total_bytes: Option<u64>,
    pub bytes_per_sec: f64,
}

impl ProgressUpdate {
    pub fn new(downloaded: u64, total: Option<u64>, bytes_per_sec: f64) -> Self {
        let percent = match total {
            Some(t) if t > 0 => (downloaded as f64 / t as f64) * 100.0,
            _ => 0.0,
        };
        Self {
            percent,
            downloaded_bytes: downloaded,
            total_bytes: total,
            bytes_per_sec,
        }
    }
}

/// Receives throttled progress updates. Implementations must be cheap;
/// they run on the transfer path.
pub trait ProgressSink: Send + Sync {
    fn publish(&self, update: ProgressUpdate);
}

/// Sink that drops everything, for callers that do not care.
pub struct NullSink;

impl ProgressSink for NullSink {
    fn publish(&self, _update: ProgressUpdate) {}
}

impl<F: Fn(ProgressUpdate) + Send + Sync> ProgressSink for F {
    fn publish(&self, update: ProgressUpdate) {
        self(update)
    }
}
