//! Task registry and the download pipeline.
//!
//! Each accepted request becomes a background task with a public id.
//! Pollers read snapshots from the registry; the pipeline owns the only
//! mutable path into each entry. A terminal task stays queryable for a
//! retention window, then retires and reports the same neutral snapshot
//! as an id that never existed.

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use bget_extractor::{
    AssetIdentity, AssetMetadata, AssetResolver, Credential, ExtractorError, PlaybackManifest,
    PlaybackNegotiator, QualityTier, TierAvailability,
};

use crate::config::AppConfig;
use crate::error::{Error, Result};
use crate::fetcher::StreamFetcher;
use crate::muxer::{Container, Muxer};
use crate::probe::MetadataProbe;
use crate::progress::ProgressUpdate;
use crate::task::{TaskSnapshot, TaskStatus};
use crate::utils::sanitize_filename;

/// What the caller wants delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryKind {
    /// Video and audio merged into one container.
    Merged(Container),
    /// Audio only, converted to mp3.
    AudioOnly,
    /// Video elementary stream rewrapped without audio.
    VideoOnly,
}

/// How the finished file is named.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum NamingPolicy {
    /// Sanitized asset title.
    #[default]
    Title,
    /// Caller-supplied stem, sanitized the same way.
    Fixed(String),
}

impl NamingPolicy {
    fn stem(&self, title: &str) -> String {
        match self {
            NamingPolicy::Title => sanitize_filename(title),
            NamingPolicy::Fixed(stem) => sanitize_filename(stem),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DownloadRequest {
    pub input: String,
    pub requested_tier: QualityTier,
    pub delivery: DeliveryKind,
    pub credential: Option<Credential>,
    pub naming: NamingPolicy,
}

/// Finished artifact of a completed task.
#[derive(Debug, Clone)]
pub struct TaskOutput {
    pub path: PathBuf,
    pub filename: String,
}

/// Resolved direct stream URLs, for callers that fetch themselves.
/// The URLs expire on the upstream's schedule; use them promptly, and send
/// `required_headers` with every request or the CDN refuses the transfer.
#[derive(Debug, Clone)]
pub struct DirectLinks {
    pub title: String,
    pub tier: QualityTier,
    pub video_url: String,
    pub audio_url: Option<String>,
    pub availability: Vec<TierAvailability>,
    pub required_headers: Vec<(String, String)>,
}

/// Displayable metadata for an input, from either the native resolver or
/// the external probe fallback.
#[derive(Debug, Clone, Serialize)]
pub struct MediaDescription {
    pub title: String,
    pub author: Option<String>,
    pub duration_secs: Option<u64>,
    pub cover_url: Option<String>,
}

impl MediaDescription {
    fn from_resolved(metadata: &AssetMetadata) -> Self {
        Self {
            title: metadata.title.clone(),
            author: Some(metadata.author.clone()),
            duration_secs: Some(metadata.duration_secs),
            cover_url: Some(metadata.cover_url.clone()),
        }
    }

    fn from_probed(info: &crate::probe::ProbedInfo) -> Self {
        Self {
            title: info.title.clone().unwrap_or_else(|| "unknown".to_string()),
            author: info.author().map(str::to_string),
            duration_secs: info.duration.map(|d| d as u64),
            cover_url: info.thumbnail.clone(),
        }
    }
}

/// Metadata resolution and playback negotiation behind one seam, so the
/// pipeline can be exercised without the upstream.
#[async_trait]
pub trait MediaSource: Send + Sync {
    async fn resolve(
        &self,
        input: &str,
        credential: Option<&Credential>,
    ) -> Result<AssetMetadata>;

    async fn negotiate(
        &self,
        identity: &AssetIdentity,
        stream_cid: u64,
        credential: Option<&Credential>,
    ) -> Result<PlaybackManifest>;
}

/// Production source backed by the extractor crate.
pub struct BiliSource {
    resolver: AssetResolver,
    negotiator: PlaybackNegotiator,
}

impl BiliSource {
    pub fn new(resolver: AssetResolver, negotiator: PlaybackNegotiator) -> Self {
        Self {
            resolver,
            negotiator,
        }
    }
}

#[async_trait]
impl MediaSource for BiliSource {
    async fn resolve(
        &self,
        input: &str,
        credential: Option<&Credential>,
    ) -> Result<AssetMetadata> {
        Ok(self.resolver.resolve(input, credential).await?)
    }

    async fn negotiate(
        &self,
        identity: &AssetIdentity,
        stream_cid: u64,
        credential: Option<&Credential>,
    ) -> Result<PlaybackManifest> {
        Ok(self
            .negotiator
            .negotiate(identity, stream_cid, credential)
            .await?)
    }
}

struct TaskEntry {
    snapshot: TaskSnapshot,
    cancel: CancellationToken,
    output: Option<TaskOutput>,
    output_taken: bool,
    terminal_at: Option<Instant>,
}

struct Inner {
    config: AppConfig,
    source: Arc<dyn MediaSource>,
    fetcher: StreamFetcher,
    muxer: Muxer,
    probe: MetadataProbe,
    tasks: DashMap<String, TaskEntry>,
}

/// Public face of the pipeline: start, poll, cancel, collect.
#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

impl Orchestrator {
    /// Build the pipeline and spawn its background sweep. Must be called
    /// from within a tokio runtime.
    pub fn new(
        config: AppConfig,
        source: Arc<dyn MediaSource>,
        fetcher: StreamFetcher,
        muxer: Muxer,
        probe: MetadataProbe,
    ) -> Self {
        let inner = Arc::new(Inner {
            config,
            source,
            fetcher,
            muxer,
            probe,
            tasks: DashMap::new(),
        });

        // Callers that stop polling would otherwise pin their entries in
        // the registry forever.
        let weak = Arc::downgrade(&inner);
        let period = inner.config.task_retention.max(Duration::from_millis(100));
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(period);
            loop {
                tick.tick().await;
                let Some(inner) = weak.upgrade() else { break };
                sweep_expired(&inner);
            }
        });

        Self { inner }
    }

    /// Register a task and kick off the pipeline. Returns immediately
    /// with the task id.
    pub fn start(&self, request: DownloadRequest) -> String {
        let id = new_task_id();
        let cancel = CancellationToken::new();
        self.inner.tasks.insert(
            id.clone(),
            TaskEntry {
                snapshot: TaskSnapshot::starting(id.clone(), request.requested_tier),
                cancel: cancel.clone(),
                output: None,
                output_taken: false,
                terminal_at: None,
            },
        );

        let inner = self.inner.clone();
        let task_id = id.clone();
        tokio::spawn(async move {
            let outcome = run_pipeline(&inner, &task_id, request, &cancel).await;
            finish(&inner, &task_id, outcome, &cancel);
        });

        info!(task = %id, "download task accepted");
        id
    }

    /// Snapshot for pollers. Retired and unknown ids both report the
    /// neutral `Unknown` snapshot.
    pub fn progress(&self, id: &str) -> TaskSnapshot {
        self.retire_if_expired(id);
        match self.inner.tasks.get(id) {
            Some(entry) => entry.snapshot.clone(),
            None => TaskSnapshot::unknown(id),
        }
    }

    /// Request cancellation. Returns `true` only the first time it lands
    /// on a live task; terminal and unknown tasks report `false`.
    pub fn cancel(&self, id: &str) -> bool {
        let Some(entry) = self.inner.tasks.get(id) else {
            return false;
        };
        if entry.snapshot.status.is_terminal() || entry.cancel.is_cancelled() {
            return false;
        }
        entry.cancel.cancel();
        info!(task = %id, "cancellation requested");
        true
    }

    /// Hand over the finished file exactly once. The second call reports
    /// the output as already claimed; a still-running task reports its
    /// output as not ready. Temp cleanup is scheduled after a grace
    /// period so the caller can stream the file out first.
    pub fn take_output(&self, id: &str) -> Result<TaskOutput> {
        self.retire_if_expired(id);
        let mut entry = self
            .inner
            .tasks
            .get_mut(id)
            .ok_or_else(|| Error::TaskNotFound(id.to_string()))?;
        if entry.output_taken {
            return Err(Error::ResponseAlreadyStarted(id.to_string()));
        }
        let Some(output) = entry.output.clone() else {
            // Terminal without an output means the task failed or was
            // cancelled; there is no file and never will be.
            return Err(if entry.snapshot.status.is_terminal() {
                Error::TaskNotFound(id.to_string())
            } else {
                Error::OutputNotReady(id.to_string())
            });
        };
        entry.output_taken = true;
        drop(entry);

        let delay = self.inner.config.cleanup_delay;
        let path = output.path.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Err(e) = tokio::fs::remove_file(&path).await {
                warn!(path = %path.display(), error = %e, "delivered file cleanup failed");
            }
        });

        Ok(output)
    }

    /// Resolve and negotiate without downloading anything.
    pub async fn direct_links(
        &self,
        input: &str,
        requested: QualityTier,
        credential: Option<&Credential>,
    ) -> Result<DirectLinks> {
        let metadata = self.inner.source.resolve(input, credential).await?;
        let manifest = self
            .inner
            .source
            .negotiate(&metadata.identity, metadata.stream_cid, credential)
            .await?;
        let video = manifest
            .select_video(requested)
            .ok_or_else(|| Error::download("manifest contains no video stream"))?;
        Ok(DirectLinks {
            title: metadata.title,
            tier: video.tier,
            video_url: video.url.clone(),
            audio_url: manifest.best_audio().map(|a| a.url.clone()),
            availability: manifest.availability(requested),
            required_headers: self.inner.fetcher.required_headers(),
        })
    }

    /// Fetch the cover image for an asset.
    pub async fn fetch_cover(&self, input: &str, credential: Option<&Credential>) -> Result<Vec<u8>> {
        let metadata = self.inner.source.resolve(input, credential).await?;
        self.inner.fetcher.fetch_bytes(&metadata.cover_url).await
    }

    /// Drop every terminal task whose retention window has passed. Runs
    /// periodically in the background; exposed for callers that want an
    /// immediate pass.
    pub fn sweep(&self) {
        sweep_expired(&self.inner);
    }

    /// Number of tasks currently in the registry, retained terminal ones
    /// included.
    pub fn task_count(&self) -> usize {
        self.inner.tasks.len()
    }

    /// Resolve an input to displayable metadata. Inputs the native
    /// resolver rejects fall back to the external probe when they are
    /// plain URLs, so off-platform links still describe themselves.
    pub async fn describe(
        &self,
        input: &str,
        credential: Option<&Credential>,
    ) -> Result<MediaDescription> {
        match self.inner.source.resolve(input, credential).await {
            Ok(metadata) => Ok(MediaDescription::from_resolved(&metadata)),
            Err(Error::Extractor(
                e @ (ExtractorError::InvalidAssetReference(_)
                | ExtractorError::UpstreamRejected { .. }),
            )) if input.starts_with("http") => {
                debug!(input = %input, error = %e, "native resolve failed, probing");
                let info = self.inner.probe.probe(input).await?;
                Ok(MediaDescription::from_probed(&info))
            }
            Err(e) => Err(e),
        }
    }

    fn retire_if_expired(&self, id: &str) {
        let expired = self
            .inner
            .tasks
            .get(id)
            .and_then(|entry| entry.terminal_at)
            .map(|t| t.elapsed() >= self.inner.config.task_retention)
            .unwrap_or(false);
        if expired {
            self.inner.tasks.remove(id);
        }
    }
}

fn sweep_expired(inner: &Inner) {
    let retention = inner.config.task_retention;
    let now = Instant::now();
    inner.tasks.retain(|_, entry| {
        entry
            .terminal_at
            .map(|t| now.duration_since(t) < retention)
            .unwrap_or(true)
    });
}

fn new_task_id() -> String {
    let unique = Uuid::new_v4().simple().to_string();
    format!("download_{}_{}", Utc::now().timestamp_millis(), &unique[..8])
}

fn set_status(inner: &Inner, id: &str, status: TaskStatus) {
    if let Some(mut entry) = inner.tasks.get_mut(id) {
        entry.snapshot.status = status;
        entry.snapshot.updated_at = Utc::now();
    }
}

fn apply_progress(inner: &Inner, id: &str, update: ProgressUpdate) {
    if let Some(mut entry) = inner.tasks.get_mut(id) {
        match entry.snapshot.status {
            TaskStatus::DownloadingAudio => entry.snapshot.audio_percent = update.percent,
            _ => entry.snapshot.video_percent = update.percent,
        }
        entry.snapshot.downloaded_bytes = update.downloaded_bytes;
        entry.snapshot.total_bytes = update.total_bytes;
        entry.snapshot.bytes_per_sec = update.bytes_per_sec;
        entry.snapshot.updated_at = Utc::now();
    }
}

fn finish(inner: &Inner, id: &str, outcome: Result<TaskOutput>, cancel: &CancellationToken) {
    let status = match &outcome {
        Ok(_) => TaskStatus::Completed,
        Err(Error::DownloadCancelled) | Err(Error::MuxCancelled) => TaskStatus::Cancelled,
        Err(_) if cancel.is_cancelled() => TaskStatus::Cancelled,
        Err(e) => TaskStatus::Error {
            message: e.to_string(),
        },
    };
    match &status {
        TaskStatus::Completed => info!(task = %id, "download completed"),
        TaskStatus::Cancelled => info!(task = %id, "download cancelled"),
        TaskStatus::Error { message } => error!(task = %id, error = %message, "download failed"),
        _ => {}
    }
    if let Some(mut entry) = inner.tasks.get_mut(id) {
        if let TaskStatus::Completed = status {
            entry.snapshot.video_percent = 100.0;
            entry.snapshot.audio_percent = 100.0;
            let output = outcome.ok();
            entry.snapshot.file_name = output.as_ref().map(|o| o.filename.clone());
            entry.output = output;
        }
        entry.snapshot.status = status;
        entry.snapshot.updated_at = Utc::now();
        entry.terminal_at = Some(Instant::now());
    }
}

async fn run_pipeline(
    inner: &Arc<Inner>,
    id: &str,
    request: DownloadRequest,
    cancel: &CancellationToken,
) -> Result<TaskOutput> {
    inner.config.prepare()?;

    // Resolution and negotiation are network calls too; a cancel landing
    // here must not wait for the first byte transfer to notice it.
    let metadata = tokio::select! {
        r = inner.source.resolve(&request.input, request.credential.as_ref()) => r?,
        _ = cancel.cancelled() => return Err(Error::DownloadCancelled),
    };
    if let Some(mut entry) = inner.tasks.get_mut(id) {
        entry.snapshot.title = Some(metadata.title.clone());
    }

    let manifest = tokio::select! {
        r = inner.source.negotiate(
            &metadata.identity,
            metadata.stream_cid,
            request.credential.as_ref(),
        ) => r?,
        _ = cancel.cancelled() => return Err(Error::DownloadCancelled),
    };

    let work_dir = &inner.config.work_dir;
    let video_tmp = work_dir.join(format!("{id}_video.m4s"));
    let audio_tmp = work_dir.join(format!("{id}_audio.m4s"));
    let stem = request.naming.stem(&metadata.title);

    let result = build_artifact(
        inner,
        id,
        &request,
        &manifest,
        &stem,
        &video_tmp,
        &audio_tmp,
        cancel,
    )
    .await;

    // Temp streams are dead weight whether the merge worked or not.
    for tmp in [&video_tmp, &audio_tmp] {
        let _ = tokio::fs::remove_file(tmp).await;
    }

    result
}

#[allow(clippy::too_many_arguments)]
async fn build_artifact(
    inner: &Arc<Inner>,
    id: &str,
    request: &DownloadRequest,
    manifest: &PlaybackManifest,
    stem: &str,
    video_tmp: &std::path::Path,
    audio_tmp: &std::path::Path,
    cancel: &CancellationToken,
) -> Result<TaskOutput> {
    let work_dir = &inner.config.work_dir;
    let sink = {
        let inner = inner.clone();
        let id = id.to_string();
        move |update: ProgressUpdate| apply_progress(&inner, &id, update)
    };

    let audio = manifest.best_audio();

    let video = match request.delivery {
        DeliveryKind::AudioOnly => None,
        _ => Some(
            manifest
                .select_video(request.requested_tier)
                .ok_or_else(|| Error::download("manifest contains no video stream"))?,
        ),
    };

    if let Some(video) = video {
        set_status(inner, id, TaskStatus::DownloadingVideo);
        inner
            .fetcher
            .fetch(&video.url, video_tmp, cancel, &sink)
            .await?;
    }

    let fetch_audio = !matches!(request.delivery, DeliveryKind::VideoOnly);
    let audio_available = if fetch_audio {
        match audio {
            Some(audio) => {
                set_status(inner, id, TaskStatus::DownloadingAudio);
                inner
                    .fetcher
                    .fetch(&audio.url, audio_tmp, cancel, &sink)
                    .await?;
                true
            }
            None => false,
        }
    } else {
        false
    };

    set_status(inner, id, TaskStatus::Merging);
    let filename = match request.delivery {
        DeliveryKind::Merged(container) => format!("{stem}.{}", container.extension()),
        DeliveryKind::AudioOnly => {
            if !audio_available {
                return Err(Error::download("manifest contains no audio stream"));
            }
            format!("{stem}.mp3")
        }
        DeliveryKind::VideoOnly => format!("{stem}.mp4"),
    };
    let path = work_dir.join(format!("{id}_{filename}"));

    let mux = match request.delivery {
        DeliveryKind::Merged(container) if audio_available => {
            inner
                .muxer
                .merge(video_tmp, audio_tmp, &path, container, cancel)
                .await
        }
        // Some manifests ship video with embedded or no audio.
        DeliveryKind::Merged(_) | DeliveryKind::VideoOnly => {
            inner.muxer.remux(video_tmp, &path, cancel).await
        }
        DeliveryKind::AudioOnly => inner.muxer.to_mp3(audio_tmp, &path, cancel).await,
    };

    if let Err(e) = mux {
        // ffmpeg may have written part of the output before dying.
        let _ = tokio::fs::remove_file(&path).await;
        return Err(e);
    }
    Ok(TaskOutput { path, filename })
}
