//! Subprocess seam for external tools.
//!
//! Muxing and probing shell out to ffmpeg and yt-dlp. The trait keeps the
//! pipeline testable with in-process fakes and gives one place to enforce
//! the kill-on-cancel contract.

use async_trait::async_trait;
use std::ffi::OsString;
use std::path::Path;
use std::process::Stdio;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, Command};
use tracing::debug;

use crate::error::{Error, Result};

/// Outcome of a finished subprocess.
#[derive(Debug, Clone)]
pub struct ProcessOutput {
    pub success: bool,
    pub exit_code: Option<i32>,
    pub stderr: String,
    pub stdout: String,
}

impl ProcessOutput {
    /// Last few stderr lines for error messages.
    pub fn stderr_tail(&self) -> String {
        let lines: Vec<&str> = self.stderr.lines().rev().take(5).collect();
        lines.into_iter().rev().collect::<Vec<_>>().join("\n")
    }
}

/// A spawned subprocess that can be awaited or killed.
#[async_trait]
pub trait ProcessHandle: Send {
    async fn wait(&mut self) -> Result<ProcessOutput>;
    async fn kill(&mut self) -> Result<()>;
}

/// Spawns external tools. One implementation wraps tokio's process API;
/// tests substitute fakes.
#[async_trait]
pub trait ProcessRunner: Send + Sync {
    async fn spawn(
        &self,
        program: &Path,
        args: &[OsString],
    ) -> Result<Box<dyn ProcessHandle>>;
}

/// Production runner backed by `tokio::process`.
pub struct TokioProcessRunner;

struct TokioHandle {
    child: Child,
}

#[async_trait]
impl ProcessHandle for TokioHandle {
    async fn wait(&mut self) -> Result<ProcessOutput> {
        let mut stderr = String::new();
        if let Some(mut pipe) = self.child.stderr.take() {
            pipe.read_to_string(&mut stderr).await?;
        }
        let mut stdout = String::new();
        if let Some(mut pipe) = self.child.stdout.take() {
            pipe.read_to_string(&mut stdout).await?;
        }

        let status = self.child.wait().await?;
        Ok(ProcessOutput {
            success: status.success(),
            exit_code: status.code(),
            stderr,
            stdout,
        })
    }

    async fn kill(&mut self) -> Result<()> {
        // start_kill + wait avoids leaving a zombie behind.
        self.child.start_kill()?;
        let _ = self.child.wait().await;
        Ok(())
    }
}

#[async_trait]
impl ProcessRunner for TokioProcessRunner {
    async fn spawn(
        &self,
        program: &Path,
        args: &[OsString],
    ) -> Result<Box<dyn ProcessHandle>> {
        debug!(program = %program.display(), ?args, "spawning subprocess");
        let child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => {
                    Error::Other(format!("executable not found: {}", program.display()))
                }
                _ => Error::Io(e),
            })?;
        Ok(Box::new(TokioHandle { child }))
    }
}
