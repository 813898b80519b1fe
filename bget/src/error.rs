//! Application-wide error types.

use thiserror::Error;

/// Application-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Application-wide error type.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Extractor error: {0}")]
    Extractor(#[from] bget_extractor::ExtractorError),

    #[error("Download failed: {0}")]
    DownloadFailed(String),

    #[error("Download cancelled")]
    DownloadCancelled,

    #[error("Mux failed: {0}")]
    MuxFailed(String),

    #[error("Mux cancelled")]
    MuxCancelled,

    #[error("Probe failed: {0}")]
    ProbeFailed(String),

    #[error("Task not found: {0}")]
    TaskNotFound(String),

    #[error("Task {0} has not produced its file yet")]
    OutputNotReady(String),

    #[error("Output already taken for task {0}")]
    ResponseAlreadyStarted(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl Error {
    pub fn download(msg: impl Into<String>) -> Self {
        Self::DownloadFailed(msg.into())
    }

    pub fn mux(msg: impl Into<String>) -> Self {
        Self::MuxFailed(msg.into())
    }

    pub fn probe(msg: impl Into<String>) -> Self {
        Self::ProbeFailed(msg.into())
    }
}
