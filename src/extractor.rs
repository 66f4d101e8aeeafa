//! Boundary to the extraction collaborator.
//!
//! Everything that knows how to talk to YouTube lives behind [`Extractor`].
//! The production implementation shells out to `yt-dlp`; tests swap in fakes.

use std::{
    io,
    path::PathBuf,
    process::Stdio,
};

use async_trait::async_trait;
use bytes::Bytes;
use futures::{StreamExt, stream::BoxStream};
use serde::Deserialize;
use thiserror::Error;
use tokio::{io::AsyncReadExt, process::Command};
use tokio_util::io::ReaderStream;

/// Byte stream of one rendition, in transport order.
pub type ByteStream = BoxStream<'static, io::Result<Bytes>>;

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("could not launch {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("extractor exited with {status}: {stderr}")]
    Failed { status: String, stderr: String },
    #[error("could not parse extractor output: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("extractor produced no output stream")]
    NoOutput,
}

/// Subset of `yt-dlp --dump-single-json` the resolver needs. Everything is
/// optional because older uploads lack plenty of fields.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawVideoInfo {
    pub id: Option<String>,
    pub title: Option<String>,
    pub fulltitle: Option<String>,
    #[serde(default)]
    pub thumbnails: Vec<RawThumbnail>,
    pub thumbnail: Option<String>,
    pub duration: Option<f64>,
    #[serde(default)]
    pub formats: Vec<RawFormat>,
}

impl RawVideoInfo {
    pub fn display_title(&self) -> &str {
        self.title
            .as_deref()
            .or(self.fulltitle.as_deref())
            .unwrap_or("video")
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawThumbnail {
    pub url: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawFormat {
    pub format_id: Option<String>,
    pub format_note: Option<String>,
    pub height: Option<i64>,
    pub ext: Option<String>,
    pub vcodec: Option<String>,
    pub acodec: Option<String>,
    pub filesize: Option<u64>,
    pub filesize_approx: Option<u64>,
}

impl RawFormat {
    pub fn has_video(&self) -> bool {
        codec_present(self.vcodec.as_deref())
    }

    pub fn has_audio(&self) -> bool {
        codec_present(self.acodec.as_deref())
    }

    /// Integer selector (YouTube itag). DASH/HLS variants with composite ids
    /// such as `137+140` or `hls-720p` return `None`.
    pub fn selector(&self) -> Option<u32> {
        self.format_id.as_deref()?.trim().parse().ok()
    }
}

fn codec_present(codec: Option<&str>) -> bool {
    matches!(codec, Some(value) if !value.is_empty() && value != "none")
}

#[async_trait]
pub trait Extractor: Send + Sync {
    /// Full metadata for one video id.
    async fn fetch_full_info(&self, video_id: &str) -> Result<RawVideoInfo, ExtractError>;

    /// Opens the byte stream for one rendition. Failures after the stream is
    /// returned surface as `Err` items.
    async fn open_stream(
        &self,
        video_id: &str,
        format_selector: u32,
    ) -> Result<ByteStream, ExtractError>;
}

pub fn watch_url(video_id: &str) -> String {
    format!("https://www.youtube.com/watch?v={video_id}")
}

/// `yt-dlp` driven through its CLI.
#[derive(Debug, Clone)]
pub struct YtDlp {
    binary: PathBuf,
    user_agent: Option<String>,
}

impl YtDlp {
    pub fn new(binary: impl Into<PathBuf>, user_agent: Option<String>) -> Self {
        Self {
            binary: binary.into(),
            user_agent,
        }
    }

    fn command(&self) -> Command {
        let mut command = Command::new(&self.binary);
        command
            .arg("--no-warnings")
            .arg("--no-progress")
            .arg("--no-playlist");
        // Upstream blocks some default agents; the override is purely a
        // collaborator concern.
        if let Some(agent) = &self.user_agent {
            command.arg("--user-agent").arg(agent);
        }
        command.stdin(Stdio::null()).kill_on_drop(true);
        command
    }

    fn spawn_error(&self, source: io::Error) -> ExtractError {
        ExtractError::Spawn {
            program: self.binary.display().to_string(),
            source,
        }
    }
}

#[async_trait]
impl Extractor for YtDlp {
    async fn fetch_full_info(&self, video_id: &str) -> Result<RawVideoInfo, ExtractError> {
        let output = self
            .command()
            .arg("--dump-single-json")
            .arg("--skip-download")
            .arg(watch_url(video_id))
            .output()
            .await
            .map_err(|err| self.spawn_error(err))?;

        if !output.status.success() {
            return Err(ExtractError::Failed {
                status: output.status.to_string(),
                stderr: last_stderr_line(&String::from_utf8_lossy(&output.stderr)),
            });
        }

        Ok(serde_json::from_slice(&output.stdout)?)
    }

    async fn open_stream(
        &self,
        video_id: &str,
        format_selector: u32,
    ) -> Result<ByteStream, ExtractError> {
        let mut child = self
            .command()
            .arg("--quiet")
            .arg("--format")
            .arg(format_selector.to_string())
            .arg("--output")
            .arg("-")
            .arg(watch_url(video_id))
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|err| self.spawn_error(err))?;

        let stdout = child.stdout.take().ok_or(ExtractError::NoOutput)?;
        // Drain stderr concurrently so a chatty child never blocks on a full
        // pipe while we stream stdout.
        let stderr = child.stderr.take();
        let stderr_task = tokio::spawn(async move {
            let mut buffer = String::new();
            if let Some(mut stderr) = stderr {
                let _ = stderr.read_to_string(&mut buffer).await;
            }
            buffer
        });

        // The exit status is checked once stdout hits EOF; a failing child
        // turns into a trailing error item.
        let exit_check = futures::stream::once(async move {
            let status = child.wait().await;
            let stderr = stderr_task.await.unwrap_or_default();
            match status {
                Ok(status) if status.success() => None,
                Ok(status) => Some(Err(io::Error::other(format!(
                    "yt-dlp exited with {status}: {}",
                    last_stderr_line(&stderr)
                )))),
                Err(err) => Some(Err(err)),
            }
        })
        .filter_map(|item| async move { item });

        Ok(ReaderStream::new(stdout).chain(exit_check).boxed())
    }
}

fn last_stderr_line(stderr: &str) -> String {
    stderr
        .lines()
        .rev()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .unwrap_or("no diagnostic output")
        .to_string()
}
