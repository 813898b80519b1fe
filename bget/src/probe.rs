//! yt-dlp metadata probe.
//!
//! Fallback path for inputs the native resolver cannot handle, and a
//! second opinion when the upstream API is misbehaving. One subprocess
//! invocation, JSON on stdout.

use serde::Deserialize;
use std::ffi::OsString;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::debug;

use crate::error::{Error, Result};
use crate::process::ProcessRunner;

/// Subset of yt-dlp's dump-json output the pipeline cares about.
#[derive(Debug, Clone, Deserialize)]
pub struct ProbedInfo {
    pub title: Option<String>,
    pub uploader: Option<String>,
    pub channel: Option<String>,
    pub duration: Option<f64>,
    pub thumbnail: Option<String>,
    #[serde(default)]
    pub formats: Vec<ProbedFormat>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProbedFormat {
    pub format_id: Option<String>,
    pub ext: Option<String>,
    pub height: Option<u32>,
    pub vcodec: Option<String>,
    pub acodec: Option<String>,
}

impl ProbedInfo {
    pub fn author(&self) -> Option<&str> {
        self.uploader.as_deref().or(self.channel.as_deref())
    }
}

pub struct MetadataProbe {
    ytdlp: PathBuf,
    runner: Arc<dyn ProcessRunner>,
}

impl MetadataProbe {
    pub fn new(ytdlp: PathBuf, runner: Arc<dyn ProcessRunner>) -> Self {
        Self { ytdlp, runner }
    }

    pub async fn probe(&self, url: &str) -> Result<ProbedInfo> {
        let args: Vec<OsString> = vec![
            "--dump-json".into(),
            "--no-playlist".into(),
            url.into(),
        ];
        debug!(url = %url, "probing metadata");
        let mut handle = self.runner.spawn(&self.ytdlp, &args).await?;
        let output = handle.wait().await?;
        if !output.success {
            return Err(Error::probe(output.stderr_tail()));
        }
        serde_json::from_str(&output.stdout)
            .map_err(|e| Error::probe(format!("malformed probe output: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::{ProcessHandle, ProcessOutput};
    use async_trait::async_trait;
    use std::path::Path;

    struct CannedRunner {
        output: ProcessOutput,
    }

    struct CannedHandle(Option<ProcessOutput>);

    #[async_trait]
    impl ProcessHandle for CannedHandle {
        async fn wait(&mut self) -> Result<ProcessOutput> {
            Ok(self.0.take().expect("waited twice"))
        }

        async fn kill(&mut self) -> Result<()> {
            Ok(())
        }
    }

    #[async_trait]
    impl ProcessRunner for CannedRunner {
        async fn spawn(
            &self,
            _program: &Path,
            _args: &[OsString],
        ) -> Result<Box<dyn ProcessHandle>> {
            Ok(Box::new(CannedHandle(Some(self.output.clone()))))
        }
    }

    fn probe_with(output: ProcessOutput) -> MetadataProbe {
        MetadataProbe::new(PathBuf::from("yt-dlp"), Arc::new(CannedRunner { output }))
    }

    #[tokio::test]
    async fn parses_dump_json_output() {
        let stdout = r#"{
            "title": "Sample",
            "uploader": "someone",
            "duration": 61.5,
            "thumbnail": "https://i.example/cover.jpg",
            "formats": [{"format_id": "30080", "ext": "mp4", "height": 1080, "vcodec": "avc1", "acodec": "none"}]
        }"#;
        let info = probe_with(ProcessOutput {
            success: true,
            exit_code: Some(0),
            stderr: String::new(),
            stdout: stdout.to_string(),
        })
        .probe("https://example.com/v")
        .await
        .unwrap();

        assert_eq!(info.title.as_deref(), Some("Sample"));
        assert_eq!(info.author(), Some("someone"));
        assert_eq!(info.formats.len(), 1);
    }

    #[tokio::test]
    async fn nonzero_exit_is_a_probe_failure() {
        let err = probe_with(ProcessOutput {
            success: false,
            exit_code: Some(1),
            stderr: "ERROR: Unsupported URL".to_string(),
            stdout: String::new(),
        })
        .probe("https://example.com/v")
        .await
        .unwrap_err();

        match err {
            Error::ProbeFailed(msg) => assert!(msg.contains("Unsupported URL")),
            other => panic!("unexpected error: {other}"),
        }
    }
}
