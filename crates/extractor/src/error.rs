use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExtractorError {
    /// No platform asset id could be extracted from the caller's input.
    /// Terminal, never retried and never preceded by a network call.
    #[error("no recognizable asset reference in input: {0}")]
    InvalidAssetReference(String),
    /// The upstream API answered with a non-success business code.
    #[error("upstream rejected request (code {code}): {message}")]
    UpstreamRejected { code: i64, message: String },
    /// Transport-level failure: connect error, timeout, bad gateway.
    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(String),
    /// Every negotiation strategy was exhausted without a usable manifest.
    #[error("no playback manifest could be negotiated")]
    NoPlaybackManifest,
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("other: {0}")]
    Other(String),
}

impl From<reqwest::Error> for ExtractorError {
    fn from(e: reqwest::Error) -> Self {
        ExtractorError::UpstreamUnavailable(e.to_string())
    }
}

impl ExtractorError {
    pub fn rejected(code: i64, message: impl Into<String>) -> Self {
        ExtractorError::UpstreamRejected {
            code,
            message: message.into(),
        }
    }

    /// Whether the next strategy in a fallback chain may still be tried.
    pub fn is_fallthrough(&self) -> bool {
        matches!(
            self,
            ExtractorError::UpstreamRejected { .. } | ExtractorError::UpstreamUnavailable(_)
        )
    }
}
