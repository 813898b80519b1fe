//! ffmpeg-based merge and conversion.
//!
//! Video and audio arrive as separate DASH segments and need one ffmpeg
//! pass to become a playable file. Cancellation kills the subprocess and
//! waits for it so no orphan keeps the output file locked.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::process::{ProcessHandle, ProcessRunner};

/// Target container for a merge. Codec choices follow what each container
/// plays well with; mp4 re-encodes audio to AAC because DASH audio often
/// arrives in a flavor mp4 players reject.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Container {
    Mp4,
    Mkv,
    Flv,
    Webm,
}

impl Container {
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "mp4" => Some(Self::Mp4),
            "mkv" => Some(Self::Mkv),
            "flv" => Some(Self::Flv),
            "webm" => Some(Self::Webm),
            _ => None,
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            Self::Mp4 => "mp4",
            Self::Mkv => "mkv",
            Self::Flv => "flv",
            Self::Webm => "webm",
        }
    }

    fn codec_args(&self) -> &'static [&'static str] {
        match self {
            Self::Mp4 => &["-c:v", "copy", "-c:a", "aac"],
            Self::Mkv | Self::Flv => &["-c:v", "copy", "-c:a", "copy"],
            Self::Webm => &["-c:v", "libvpx-vp9", "-c:a", "libopus"],
        }
    }
}

impl Default for Container {
    fn default() -> Self {
        Self::Mp4
    }
}

pub struct Muxer {
    ffmpeg: PathBuf,
    runner: Arc<dyn ProcessRunner>,
}

impl Muxer {
    pub fn new(ffmpeg: PathBuf, runner: Arc<dyn ProcessRunner>) -> Self {
        Self { ffmpeg, runner }
    }

    /// Merge separate video and audio streams into `output`.
    pub async fn merge(
        &self,
        video: &Path,
        audio: &Path,
        output: &Path,
        container: Container,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let mut args = vec![
            os("-y"),
            os("-i"),
            video.into(),
            os("-i"),
            audio.into(),
        ];
        args.extend(container.codec_args().iter().map(|s| os(*s)));
        args.push(output.into());
        self.run(args, cancel).await?;
        info!(output = %output.display(), "merged streams");
        Ok(())
    }

    /// Rewrap a single stream into `output` without touching the codec.
    pub async fn remux(
        &self,
        input: &Path,
        output: &Path,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let args = vec![
            os("-y"),
            os("-i"),
            input.into(),
            os("-c"),
            os("copy"),
            output.into(),
        ];
        self.run(args, cancel).await
    }

    /// Convert an audio stream to mp3 at a fixed bitrate.
    pub async fn to_mp3(
        &self,
        input: &Path,
        output: &Path,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let args = vec![
            os("-y"),
            os("-i"),
            input.into(),
            os("-vn"),
            os("-acodec"),
            os("libmp3lame"),
            os("-ab"),
            os("192k"),
            output.into(),
        ];
        self.run(args, cancel).await
    }

    async fn run(&self, args: Vec<OsString>, cancel: &CancellationToken) -> Result<()> {
        if cancel.is_cancelled() {
            return Err(Error::MuxCancelled);
        }
        debug!(?args, "running ffmpeg");
        let handle = self.runner.spawn(&self.ffmpeg, &args).await?;
        wait_or_kill(handle, cancel).await
    }
}

async fn wait_or_kill(
    mut handle: Box<dyn ProcessHandle>,
    cancel: &CancellationToken,
) -> Result<()> {
    tokio::select! {
        result = handle.wait() => {
            let output = result?;
            if output.success {
                Ok(())
            } else {
                warn!(code = ?output.exit_code, "ffmpeg exited with failure");
                Err(Error::MuxFailed(output.stderr_tail()))
            }
        }
        _ = cancel.cancelled() => {
            if let Err(e) = handle.kill().await {
                warn!(error = %e, "failed to kill cancelled ffmpeg");
            }
            Err(Error::MuxCancelled)
        }
    }
}

fn os(s: impl Into<OsString>) -> OsString {
    s.into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::ProcessOutput;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct FakeHandle {
        output: ProcessOutput,
        block_forever: bool,
        killed: Arc<AtomicBool>,
    }

    #[async_trait]
    impl ProcessHandle for FakeHandle {
        async fn wait(&mut self) -> Result<ProcessOutput> {
            if self.block_forever {
                std::future::pending::<()>().await;
            }
            Ok(self.output.clone())
        }

        async fn kill(&mut self) -> Result<()> {
            self.killed.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    struct FakeRunner {
        success: bool,
        stderr: String,
        block_forever: bool,
        killed: Arc<AtomicBool>,
        spawned_args: parking_lot::Mutex<Vec<Vec<OsString>>>,
    }

    impl FakeRunner {
        fn succeeding() -> Self {
            Self {
                success: true,
                stderr: String::new(),
                block_forever: false,
                killed: Arc::new(AtomicBool::new(false)),
                spawned_args: parking_lot::Mutex::new(Vec::new()),
            }
        }

        fn failing(stderr: &str) -> Self {
            Self {
                stderr: stderr.to_string(),
                success: false,
                ..Self::succeeding()
            }
        }

        fn hanging() -> Self {
            Self {
                block_forever: true,
                ..Self::succeeding()
            }
        }
    }

    #[async_trait]
    impl ProcessRunner for FakeRunner {
        async fn spawn(
            &self,
            _program: &Path,
            args: &[OsString],
        ) -> Result<Box<dyn ProcessHandle>> {
            self.spawned_args.lock().push(args.to_vec());
            Ok(Box::new(FakeHandle {
                output: ProcessOutput {
                    success: self.success,
                    exit_code: if self.success { Some(0) } else { Some(1) },
                    stderr: self.stderr.clone(),
                    stdout: String::new(),
                },
                block_forever: self.block_forever,
                killed: self.killed.clone(),
            }))
        }
    }

    fn muxer(runner: Arc<FakeRunner>) -> Muxer {
        Muxer::new(PathBuf::from("ffmpeg"), runner)
    }

    #[tokio::test]
    async fn merge_passes_container_codecs() {
        let runner = Arc::new(FakeRunner::succeeding());
        let m = muxer(runner.clone());
        let cancel = CancellationToken::new();
        m.merge(
            Path::new("v.m4s"),
            Path::new("a.m4s"),
            Path::new("out.mp4"),
            Container::Mp4,
            &cancel,
        )
        .await
        .unwrap();
        let args = runner.spawned_args.lock()[0].clone();
        assert!(args.contains(&OsString::from("aac")));
        assert!(args.contains(&OsString::from("copy")));
    }

    #[tokio::test]
    async fn failure_surfaces_stderr_tail() {
        let runner = Arc::new(FakeRunner::failing("line1\nmoov atom not found"));
        let m = muxer(runner);
        let cancel = CancellationToken::new();
        let err = m
            .remux(Path::new("in.m4s"), Path::new("out.mp4"), &cancel)
            .await
            .unwrap_err();
        match err {
            Error::MuxFailed(tail) => assert!(tail.contains("moov atom not found")),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn cancellation_kills_a_hung_process() {
        let runner = Arc::new(FakeRunner::hanging());
        let m = muxer(runner.clone());
        let cancel = CancellationToken::new();
        let c2 = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            c2.cancel();
        });
        let err = m
            .remux(Path::new("in.m4s"), Path::new("out.mp4"), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::MuxCancelled));
        assert!(runner.killed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn already_cancelled_token_short_circuits() {
        let runner = Arc::new(FakeRunner::succeeding());
        let m = muxer(runner.clone());
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = m
            .remux(Path::new("in.m4s"), Path::new("out.mp4"), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::MuxCancelled));
        assert!(runner.spawned_args.lock().is_empty());
    }

    #[rstest::rstest]
    #[case("mp4", Some(Container::Mp4))]
    #[case("MKV", Some(Container::Mkv))]
    #[case("webm", Some(Container::Webm))]
    #[case("avi", None)]
    fn container_parsing(#[case] name: &str, #[case] expected: Option<Container>) {
        assert_eq!(Container::from_name(name), expected);
    }
}
