//! Client side of the download flow.
//!
//! [`DownloadController`] owns the only copy of the client state and
//! publishes immutable [`ViewState`] snapshots on a watch channel. Renderers
//! read snapshots and call the command methods; nothing else mutates state.
//! One transfer may be active at a time: a second start is rejected with
//! [`ClientError::Busy`].

use std::{
    path::{Path, PathBuf},
    sync::{
        Arc, LazyLock,
        atomic::{AtomicU64, Ordering},
    },
    time::{Duration, Instant},
};

use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::Mutex;
use regex::Regex;
use reqwest::{StatusCode, header};
use thiserror::Error;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::{
    api::{DOWNLOAD_PATH, ErrorBody, FormatOption, INFO_PATH, InfoRequest, VideoMetadata},
    progress::{ProgressSnapshot, TransferSession},
    resolver::{self, ResolveError, resolution_of},
};

pub const TOAST_LIFETIME: Duration = Duration::from_secs(5);
const DEFAULT_FILENAME: &str = "video.mp4";
const STANDARD_QUALITIES: &[&str] = &["144p", "240p", "360p", "480p", "720p", "1080p"];
// Cap on the up-front buffer reservation; larger bodies grow as they arrive.
const MAX_PREALLOC: u64 = 64 * 1024 * 1024;

static FILENAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"filename="(.+?)""#).expect("static regex"));

#[derive(Debug, Error)]
pub enum ClientError {
    /// Bad input, never reached the network.
    #[error("{0}")]
    Validation(String),
    /// Request or extraction failure reported before any body byte.
    #[error("{0}")]
    Upstream(String),
    /// Transfer broke after the body started.
    #[error("{0}")]
    Stream(String),
    #[error("could not save download: {0}")]
    Save(String),
    #[error("Download cancelled")]
    Cancelled,
    #[error("A download is already in progress")]
    Busy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransferPhase {
    #[default]
    Idle,
    Active,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferOutcome {
    Completed { path: PathBuf },
    Cancelled,
    Failed { message: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToastKind {
    Success,
    Info,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Toast {
    pub message: String,
    pub kind: ToastKind,
    id: u64,
    raised_at: Instant,
}

impl Toast {
    fn new(id: u64, kind: ToastKind, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            kind,
            id,
            raised_at: Instant::now(),
        }
    }

    pub fn is_expired_at(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.raised_at) >= TOAST_LIFETIME
    }
}

/// Everything a renderer needs. Replaced, never patched from outside.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ViewState {
    pub video: Option<VideoMetadata>,
    pub loading: bool,
    pub phase: TransferPhase,
    pub progress: Option<ProgressSnapshot>,
    pub last_outcome: Option<TransferOutcome>,
    pub toast: Option<Toast>,
}

/// Destination for a finished transfer.
#[async_trait]
pub trait ArtifactSink: Send {
    /// Hands the complete payload to the user, returning where it landed.
    async fn save(&mut self, filename: &str, data: Vec<u8>) -> anyhow::Result<PathBuf>;

    /// Frees anything staged for the transfer. Called exactly once per
    /// started transfer that runs to completion, whatever the outcome.
    async fn release(&mut self);
}

/// Writes artifacts into a directory through a `.part` staging file.
#[derive(Debug, Clone)]
pub struct DirectorySink {
    dir: PathBuf,
    staged: Option<PathBuf>,
}

impl DirectorySink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            staged: None,
        }
    }

    fn target_for(&self, filename: &str) -> PathBuf {
        let name = Path::new(filename)
            .file_name()
            .and_then(|name| name.to_str())
            .filter(|name| !name.is_empty())
            .unwrap_or(DEFAULT_FILENAME);
        let candidate = self.dir.join(name);
        if !candidate.exists() {
            return candidate;
        }
        let path = Path::new(name);
        let stem = path
            .file_stem()
            .and_then(|stem| stem.to_str())
            .unwrap_or("video");
        let extension = path.extension().and_then(|ext| ext.to_str());
        (1..)
            .map(|n| match extension {
                Some(ext) => self.dir.join(format!("{stem} ({n}).{ext}")),
                None => self.dir.join(format!("{stem} ({n})")),
            })
            .find(|candidate| !candidate.exists())
            .unwrap_or(candidate)
    }
}

#[async_trait]
impl ArtifactSink for DirectorySink {
    async fn save(&mut self, filename: &str, data: Vec<u8>) -> anyhow::Result<PathBuf> {
        use anyhow::Context;

        tokio::fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("creating {}", self.dir.display()))?;
        let target = self.target_for(filename);
        let mut part = target.clone().into_os_string();
        part.push(".part");
        let part = PathBuf::from(part);
        self.staged = Some(part.clone());

        tokio::fs::write(&part, data)
            .await
            .with_context(|| format!("writing {}", part.display()))?;
        tokio::fs::rename(&part, &target)
            .await
            .with_context(|| format!("finalizing {}", target.display()))?;
        Ok(target)
    }

    async fn release(&mut self) {
        if let Some(part) = self.staged.take()
            && tokio::fs::try_exists(&part).await.unwrap_or(false)
            && let Err(err) = tokio::fs::remove_file(&part).await
        {
            tracing::warn!(path = %part.display(), "could not remove staging file: {err}");
        }
    }
}

/// Owner of the client state and the single transfer slot.
pub struct DownloadController {
    http: reqwest::Client,
    base_url: String,
    state: Arc<watch::Sender<ViewState>>,
    active: Mutex<Option<CancellationToken>>,
    toast_seq: AtomicU64,
}

/// Frees the transfer slot even when the download future is dropped. An
/// abandoned transfer is published as cancelled.
struct ActiveSlot<'a> {
    slot: &'a Mutex<Option<CancellationToken>>,
    state: &'a watch::Sender<ViewState>,
}

impl Drop for ActiveSlot<'_> {
    fn drop(&mut self) {
        self.slot.lock().take();
        self.state.send_if_modified(|state| {
            if state.phase != TransferPhase::Active {
                return false;
            }
            state.phase = TransferPhase::Idle;
            state.progress = None;
            state.last_outcome = Some(TransferOutcome::Cancelled);
            true
        });
    }
}

struct Artifact {
    filename: String,
    data: Vec<u8>,
}

impl DownloadController {
    pub fn new(base_url: impl Into<String>) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("tubegrab/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self::with_client(http, base_url))
    }

    pub fn with_client(http: reqwest::Client, base_url: impl Into<String>) -> Self {
        let (state, _) = watch::channel(ViewState::default());
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            state: Arc::new(state),
            active: Mutex::new(None),
            toast_seq: AtomicU64::new(0),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<ViewState> {
        self.state.subscribe()
    }

    pub fn view(&self) -> ViewState {
        self.view_at(Instant::now())
    }

    /// Snapshot as seen at `now`; expired toasts are dropped first.
    pub fn view_at(&self, now: Instant) -> ViewState {
        self.state.send_if_modified(|state| match &state.toast {
            Some(toast) if toast.is_expired_at(now) => {
                state.toast = None;
                true
            }
            _ => false,
        });
        self.state.borrow().clone()
    }

    pub fn dismiss_toast(&self) {
        self.state.send_if_modified(|state| state.toast.take().is_some());
    }

    /// Shows a toast and schedules its removal after [`TOAST_LIFETIME`].
    /// The timer only clears the toast it was started for.
    fn raise_toast(&self, kind: ToastKind, message: impl Into<String>) {
        let id = self.toast_seq.fetch_add(1, Ordering::Relaxed);
        let toast = Toast::new(id, kind, message);
        self.state.send_modify(|state| state.toast = Some(toast));

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let state = Arc::downgrade(&self.state);
        runtime.spawn(async move {
            tokio::time::sleep(TOAST_LIFETIME).await;
            if let Some(state) = state.upgrade() {
                state.send_if_modified(|view| match &view.toast {
                    Some(toast) if toast.id == id => {
                        view.toast = None;
                        true
                    }
                    _ => false,
                });
            }
        });
    }

    pub fn is_active(&self) -> bool {
        self.active.lock().is_some()
    }

    /// Trips the active transfer's token. The transfer notices at its next
    /// suspension point and returns to `Idle` by itself.
    pub fn cancel(&self) -> bool {
        match self.active.lock().as_ref() {
            Some(token) => {
                tracing::info!("cancellation requested");
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Resolves `url` through the server. The previous metadata is discarded
    /// as soon as a new URL is submitted.
    pub async fn fetch_video_info(&self, url: &str) -> Result<VideoMetadata, ClientError> {
        self.state.send_modify(|state| {
            state.video = None;
            state.loading = true;
        });

        let result = self.request_video_info(url).await;

        self.state.send_modify(|state| {
            state.loading = false;
            state.video = result.as_ref().ok().cloned();
        });
        if let Err(err) = &result {
            self.raise_toast(
                ToastKind::Error,
                format!("Failed to fetch video information: {err}"),
            );
        }
        result
    }

    async fn request_video_info(&self, url: &str) -> Result<VideoMetadata, ClientError> {
        resolver::validate_url(url).map_err(|err| match err {
            ResolveError::Validation(message) => ClientError::Validation(message.to_string()),
            other => ClientError::Upstream(other.to_string()),
        })?;

        let response = self
            .http
            .post(format!("{}{INFO_PATH}", self.base_url))
            .json(&InfoRequest {
                url: url.to_string(),
            })
            .send()
            .await
            .map_err(|err| ClientError::Upstream(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let message = error_message(response).await;
            return Err(if status == StatusCode::BAD_REQUEST {
                ClientError::Validation(message)
            } else {
                ClientError::Upstream(message)
            });
        }

        response
            .json::<VideoMetadata>()
            .await
            .map_err(|err| ClientError::Upstream(err.to_string()))
    }

    /// Streams one rendition into `sink`, publishing throttled progress.
    ///
    /// Use [`cancel`](Self::cancel) to stop a transfer. Dropping this future
    /// early frees the slot and resets the view, but skips
    /// [`ArtifactSink::release`].
    pub async fn download(
        &self,
        video_id: &str,
        format_selector: u32,
        sink: &mut dyn ArtifactSink,
    ) -> Result<PathBuf, ClientError> {
        let token = {
            let mut active = self.active.lock();
            if active.is_some() {
                drop(active);
                tracing::warn!("rejected download start while another transfer is active");
                self.raise_toast(ToastKind::Error, ClientError::Busy.to_string());
                return Err(ClientError::Busy);
            }
            let token = CancellationToken::new();
            *active = Some(token.clone());
            token
        };
        let _slot = ActiveSlot {
            slot: &self.active,
            state: &self.state,
        };

        self.state.send_modify(|state| {
            state.phase = TransferPhase::Active;
            state.progress = None;
            state.last_outcome = None;
        });
        tracing::info!(video_id, format_selector, "download started");

        let result = match self.stream_body(video_id, format_selector, &token).await {
            Ok(artifact) => {
                let saved = sink.save(&artifact.filename, artifact.data).await;
                sink.release().await;
                saved.map_err(|err| ClientError::Save(format!("{err:#}")))
            }
            Err(err) => {
                sink.release().await;
                Err(err)
            }
        };

        self.finish(&result);
        result
    }

    async fn stream_body(
        &self,
        video_id: &str,
        format_selector: u32,
        token: &CancellationToken,
    ) -> Result<Artifact, ClientError> {
        let request = self
            .http
            .get(format!("{}{DOWNLOAD_PATH}", self.base_url))
            .query(&[
                ("videoId", video_id.to_string()),
                ("formatSelector", format_selector.to_string()),
            ])
            .send();

        let response = tokio::select! {
            biased;
            _ = token.cancelled() => return Err(ClientError::Cancelled),
            response = request => response.map_err(|err| ClientError::Upstream(err.to_string()))?,
        };

        if !response.status().is_success() {
            return Err(ClientError::Upstream(error_message(response).await));
        }

        let filename = response
            .headers()
            .get(header::CONTENT_DISPOSITION)
            .and_then(|value| value.to_str().ok())
            .and_then(filename_from_disposition)
            .unwrap_or_else(|| DEFAULT_FILENAME.to_string());
        let total = response.content_length().filter(|len| *len > 0);

        let mut session = TransferSession::start(total, Instant::now());
        let mut data = Vec::with_capacity(total.unwrap_or(0).min(MAX_PREALLOC) as usize);
        let mut body = response.bytes_stream();

        loop {
            let next = tokio::select! {
                biased;
                _ = token.cancelled() => return Err(ClientError::Cancelled),
                next = body.next() => next,
            };
            match next {
                Some(Ok(chunk)) => {
                    data.extend_from_slice(&chunk);
                    if let Some(snapshot) = session.record_chunk(chunk.len(), Instant::now())
                        && !token.is_cancelled()
                    {
                        self.state
                            .send_modify(|state| state.progress = Some(snapshot));
                    }
                }
                Some(Err(err)) => return Err(ClientError::Stream(err.to_string())),
                None => break,
            }
        }

        tracing::debug!(bytes = session.bytes_received(), "body complete");
        Ok(Artifact { filename, data })
    }

    fn finish(&self, result: &Result<PathBuf, ClientError>) {
        let (outcome, (kind, message)) = match result {
            Ok(path) => {
                tracing::info!(path = %path.display(), "download completed");
                (
                    TransferOutcome::Completed { path: path.clone() },
                    (ToastKind::Success, "Video downloaded successfully!".to_string()),
                )
            }
            Err(ClientError::Cancelled) => {
                tracing::info!("download cancelled");
                (
                    TransferOutcome::Cancelled,
                    (ToastKind::Info, "Download cancelled".to_string()),
                )
            }
            Err(err) => {
                tracing::warn!("download failed: {err}");
                (
                    TransferOutcome::Failed {
                        message: err.to_string(),
                    },
                    (ToastKind::Error, format!("Download failed: {err}")),
                )
            }
        };

        self.state.send_modify(|state| {
            state.phase = TransferPhase::Idle;
            state.progress = None;
            state.last_outcome = Some(outcome);
        });
        self.raise_toast(kind, message);
    }
}

async fn error_message(response: reqwest::Response) -> String {
    let status = response.status();
    match response.json::<ErrorBody>().await {
        Ok(body) if !body.message.trim().is_empty() => body.message,
        _ => format!("HTTP error! status: {}", status.as_u16()),
    }
}

pub fn filename_from_disposition(value: &str) -> Option<String> {
    FILENAME_RE
        .captures(value)
        .and_then(|captures| captures.get(1))
        .map(|name| name.as_str().to_string())
}

/// Options offered for selection: standard mp4 resolutions, highest first.
/// Falls back to the first listed format when none qualify.
pub fn quality_options(metadata: &VideoMetadata) -> Vec<FormatOption> {
    let mut options: Vec<FormatOption> = metadata
        .formats
        .iter()
        .filter(|format| {
            format.container == "mp4"
                && STANDARD_QUALITIES.contains(&format.quality_label.as_str())
        })
        .cloned()
        .collect();
    options.sort_by_key(|option| std::cmp::Reverse(resolution_of(&option.quality_label)));
    if options.is_empty()
        && let Some(first) = metadata.formats.first()
    {
        options.push(first.clone());
    }
    options
}

/// First selectable option carrying `label`.
pub fn selector_for_quality(metadata: &VideoMetadata, label: &str) -> Option<u32> {
    quality_options(metadata)
        .into_iter()
        .find(|option| option.quality_label.eq_ignore_ascii_case(label))
        .map(|option| option.format_selector)
}
