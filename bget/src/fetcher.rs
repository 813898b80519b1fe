//! Streamed byte transfer from CDN edge nodes to local temp files.
//!
//! The CDN rejects requests without the site referer, so every fetch
//! carries the same browser-shaped headers the API client uses. Progress
//! is observed per chunk but published at most twice a second to keep
//! pollers cheap. Cancellation aborts the transfer and removes the
//! partial file.

use futures::StreamExt;
use reqwest::Client;
use std::path::Path;
use std::time::{Duration, Instant};
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::progress::{ProgressSink, ProgressUpdate};

/// Minimum interval between published progress updates.
const PROGRESS_INTERVAL: Duration = Duration::from_millis(500);

/// Whole-transfer ceiling when the caller does not supply one.
const DEFAULT_STREAM_TIMEOUT: Duration = Duration::from_secs(15 * 60);

const SITE_REFERER: &str = "https://www.bilibili.com";

pub struct StreamFetcher {
    client: Client,
    user_agent: String,
    timeout: Duration,
}

impl StreamFetcher {
    pub fn new(client: Client, user_agent: impl Into<String>) -> Self {
        Self {
            client,
            user_agent: user_agent.into(),
            timeout: DEFAULT_STREAM_TIMEOUT,
        }
    }

    /// Replace the whole-transfer ceiling. A healthy stream can run for
    /// minutes; this bounds the pathological one that never finishes.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Stream `url` into `dest`, publishing throttled progress.
    ///
    /// On cancellation the partial file is removed before returning
    /// `DownloadCancelled`. On success a final 100% update is published
    /// regardless of throttling.
    pub async fn fetch(
        &self,
        url: &str,
        dest: &Path,
        cancel: &CancellationToken,
        sink: &dyn ProgressSink,
    ) -> Result<u64> {
        if cancel.is_cancelled() {
            return Err(Error::DownloadCancelled);
        }

        let response = self
            .client
            .get(url)
            .header(reqwest::header::REFERER, SITE_REFERER)
            .header(reqwest::header::USER_AGENT, &self.user_agent)
            .send()
            .await
            .map_err(|e| Error::download(format!("request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::download(format!("upstream returned {status}")));
        }

        let total = response.content_length();
        debug!(url = %url, ?total, dest = %dest.display(), "starting stream fetch");

        let mut file = File::create(dest).await?;
        let mut stream = response.bytes_stream();

        let started = Instant::now();
        let mut last_publish = Instant::now();
        let mut downloaded: u64 = 0;
        let deadline = tokio::time::Instant::now() + self.timeout;

        let result: Result<()> = loop {
            tokio::select! {
                chunk = stream.next() => {
                    match chunk {
                        Some(Ok(bytes)) => {
                            file.write_all(&bytes).await?;
                            downloaded += bytes.len() as u64;
                            if last_publish.elapsed() >= PROGRESS_INTERVAL {
                                last_publish = Instant::now();
                                sink.publish(ProgressUpdate::new(
                                    downloaded,
                                    total,
                                    rate(downloaded, started),
                                ));
                            }
                        }
                        Some(Err(e)) => {
                            break Err(Error::download(format!("stream interrupted: {e}")));
                        }
                        None => break Ok(()),
                    }
                }
                _ = cancel.cancelled() => {
                    break Err(Error::DownloadCancelled);
                }
                _ = tokio::time::sleep_until(deadline) => {
                    break Err(Error::download(format!(
                        "fetch exceeded the {:?} limit",
                        self.timeout
                    )));
                }
            }
        };

        file.flush().await?;
        drop(file);

        match result {
            Ok(()) => {
                sink.publish(ProgressUpdate::new(
                    downloaded,
                    total.or(Some(downloaded)),
                    rate(downloaded, started),
                ));
                info!(bytes = downloaded, dest = %dest.display(), "fetch complete");
                Ok(downloaded)
            }
            Err(e) => {
                if let Err(rm) = tokio::fs::remove_file(dest).await {
                    warn!(dest = %dest.display(), error = %rm, "failed to remove partial file");
                }
                Err(e)
            }
        }
    }
}

impl StreamFetcher {
    /// Headers any out-of-process fetch of these URLs must carry.
    pub fn required_headers(&self) -> Vec<(String, String)> {
        vec![
            ("Referer".to_string(), SITE_REFERER.to_string()),
            ("User-Agent".to_string(), self.user_agent.clone()),
        ]
    }

    /// Small whole-body fetch for covers and other side assets.
    pub async fn fetch_bytes(&self, url: &str) -> Result<Vec<u8>> {
        let response = self
            .client
            .get(url)
            .header(reqwest::header::REFERER, SITE_REFERER)
            .header(reqwest::header::USER_AGENT, &self.user_agent)
            .send()
            .await
            .map_err(|e| Error::download(format!("request failed: {e}")))?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::download(format!("upstream returned {status}")));
        }
        let bytes = response
            .bytes()
            .await
            .map_err(|e| Error::download(format!("body read failed: {e}")))?;
        Ok(bytes.to_vec())
    }
}

fn rate(downloaded: u64, started: Instant) -> f64 {
    let elapsed = started.elapsed().as_secs_f64();
    if elapsed > 0.0 {
        downloaded as f64 / elapsed
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    struct Recording(Mutex<Vec<ProgressUpdate>>);

    impl ProgressSink for Recording {
        fn publish(&self, update: ProgressUpdate) {
            self.0.lock().push(update);
        }
    }

    async fn serve_once(body_chunks: Vec<Vec<u8>>, chunk_delay: Duration) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let total: usize = body_chunks.iter().map(|c| c.len()).sum();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 1024];
            let _ = socket.read(&mut buf).await;
            let header = format!(
                "HTTP/1.1 200 OK\r\nContent-Length: {total}\r\nConnection: close\r\n\r\n"
            );
            socket.write_all(header.as_bytes()).await.unwrap();
            for chunk in body_chunks {
                socket.write_all(&chunk).await.unwrap();
                socket.flush().await.unwrap();
                tokio::time::sleep(chunk_delay).await;
            }
        });
        format!("http://{addr}/stream.m4s")
    }

    fn fetcher() -> StreamFetcher {
        StreamFetcher::new(bget_extractor::default_client(), "test-agent")
    }

    #[tokio::test]
    async fn fetch_writes_all_bytes_and_finishes_at_full_percent() {
        let url = serve_once(vec![vec![7u8; 512]; 4], Duration::ZERO).await;
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("out.m4s");
        let sink = Recording(Mutex::new(Vec::new()));

        let n = fetcher()
            .fetch(&url, &dest, &CancellationToken::new(), &sink)
            .await
            .unwrap();

        assert_eq!(n, 2048);
        assert_eq!(std::fs::metadata(&dest).unwrap().len(), 2048);
        let updates = sink.0.lock();
        let last = updates.last().unwrap();
        assert_eq!(last.downloaded_bytes, 2048);
        assert!((last.percent - 100.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn cancellation_removes_the_partial_file() {
        let url = serve_once(vec![vec![0u8; 256]; 50], Duration::from_millis(50)).await;
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("partial.m4s");
        let cancel = CancellationToken::new();

        let c2 = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(120)).await;
            c2.cancel();
        });

        let err = fetcher()
            .fetch(&url, &dest, &cancel, &crate::progress::NullSink)
            .await
            .unwrap_err();

        assert!(matches!(err, Error::DownloadCancelled));
        assert!(!dest.exists());
    }

    #[tokio::test]
    async fn slow_streams_outlive_short_request_timeouts() {
        // Dribbles 1 KiB over ~1.5s; a whole-request deadline shorter
        // than the transfer must not cut it off while bytes still flow.
        let url = serve_once(vec![vec![1u8; 64]; 16], Duration::from_millis(90)).await;
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("slow.m4s");

        let n = fetcher()
            .fetch(&url, &dest, &CancellationToken::new(), &crate::progress::NullSink)
            .await
            .unwrap();

        assert_eq!(n, 1024);
    }

    #[tokio::test]
    async fn stream_timeout_aborts_and_removes_the_partial_file() {
        let url = serve_once(vec![vec![0u8; 128]; 100], Duration::from_millis(100)).await;
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("stalled.m4s");

        let err = fetcher()
            .with_timeout(Duration::from_millis(250))
            .fetch(&url, &dest, &CancellationToken::new(), &crate::progress::NullSink)
            .await
            .unwrap_err();

        match err {
            Error::DownloadFailed(msg) => assert!(msg.contains("exceeded")),
            other => panic!("unexpected error: {other}"),
        }
        assert!(!dest.exists());
    }

    #[tokio::test]
    async fn http_error_status_is_a_download_failure() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 1024];
            let _ = socket.read(&mut buf).await;
            socket
                .write_all(b"HTTP/1.1 403 Forbidden\r\nContent-Length: 0\r\n\r\n")
                .await
                .unwrap();
        });

        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("denied.m4s");
        let err = fetcher()
            .fetch(
                &format!("http://{addr}/x"),
                &dest,
                &CancellationToken::new(),
                &crate::progress::NullSink,
            )
            .await
            .unwrap_err();

        assert!(matches!(err, Error::DownloadFailed(_)));
        assert!(!dest.exists());
    }
}
