//! Metadata Resolver: URL validation, id extraction, and normalization of the
//! collaborator's raw format list into [`VideoMetadata`].

use std::cmp::Reverse;

use thiserror::Error;
use url::Url;

use crate::{
    api::{FormatOption, VideoMetadata},
    extractor::{ExtractError, Extractor, RawFormat, RawVideoInfo},
};

const ACCEPTED_HOSTS: &[&str] = &[
    "youtube.com",
    "www.youtube.com",
    "m.youtube.com",
    "music.youtube.com",
    "youtube-nocookie.com",
    "www.youtube-nocookie.com",
];
const SHORT_LINK_HOSTS: &[&str] = &["youtu.be", "www.youtu.be"];

#[derive(Debug, Error)]
pub enum ResolveError {
    /// Rejected before any network call.
    #[error("{0}")]
    Validation(&'static str),
    #[error("{0}")]
    Upstream(#[from] ExtractError),
}

/// Returns the video id when `raw` is a well-formed URL of an accepted shape.
pub fn validate_url(raw: &str) -> Result<String, ResolveError> {
    let parsed = Url::parse(raw.trim())
        .map_err(|_| ResolveError::Validation("Invalid URL provided"))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(ResolveError::Validation("Invalid URL provided"));
    }
    resolve_video_id(&parsed).ok_or(ResolveError::Validation("Not a valid YouTube URL"))
}

/// Accepts `/watch?v=`, `/shorts/<id>`, `/embed/<id>` and `youtu.be/<id>`.
pub fn resolve_video_id(url: &Url) -> Option<String> {
    let host = url.host_str()?.to_ascii_lowercase();
    let segments: Vec<&str> = url
        .path_segments()
        .map(|segments| segments.filter(|s| !s.is_empty()).collect())
        .unwrap_or_default();

    let candidate = if SHORT_LINK_HOSTS.contains(&host.as_str()) {
        match segments.as_slice() {
            [id] => Some((*id).to_string()),
            _ => None,
        }
    } else if ACCEPTED_HOSTS.contains(&host.as_str()) {
        match segments.as_slice() {
            ["watch"] => url
                .query_pairs()
                .find(|(key, _)| key == "v")
                .map(|(_, value)| value.into_owned()),
            ["shorts", id] | ["embed", id] | ["live", id] => Some((*id).to_string()),
            _ => None,
        }
    } else {
        None
    };

    candidate.filter(|id| is_valid_video_id(id))
}

pub fn is_valid_video_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= 64
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

/// Validates `url`, fetches metadata through `extractor`, and normalizes it.
pub async fn resolve(extractor: &dyn Extractor, url: &str) -> Result<VideoMetadata, ResolveError> {
    let video_id = validate_url(url)?;
    let info = extractor.fetch_full_info(&video_id).await?;
    Ok(build_metadata(video_id, &info))
}

pub fn build_metadata(video_id: String, info: &RawVideoInfo) -> VideoMetadata {
    VideoMetadata {
        video_id,
        title: info.display_title().to_string(),
        thumbnail_url: pick_thumbnail(info),
        duration: format_duration(info.duration),
        formats: normalize_formats(&info.formats),
    }
}

/// The collaborator lists thumbnails smallest first; the last one wins.
fn pick_thumbnail(info: &RawVideoInfo) -> String {
    info.thumbnails
        .iter()
        .rev()
        .find_map(|thumb| thumb.url.clone())
        .or_else(|| info.thumbnail.clone())
        .unwrap_or_default()
}

/// Renders `minutes:ss`; minutes are not folded into hours.
pub fn format_duration(seconds: Option<f64>) -> String {
    let total = seconds
        .filter(|value| value.is_finite() && *value > 0.0)
        .map(|value| value.floor() as u64)
        .unwrap_or(0);
    format!("{}:{:02}", total / 60, total % 60)
}

/// Keeps progressive renditions (audio and video in one file) with an integer
/// selector, ordered by resolution, highest first.
pub fn normalize_formats(formats: &[RawFormat]) -> Vec<FormatOption> {
    let mut options: Vec<FormatOption> = formats
        .iter()
        .filter(|format| format.has_audio() && format.has_video())
        .filter_map(|format| {
            let format_selector = format.selector()?;
            Some(FormatOption {
                quality_label: quality_label(format),
                format_selector,
                container: format.ext.clone().unwrap_or_else(|| "mp4".to_string()),
                approximate_size_bytes: format.filesize.or(format.filesize_approx),
            })
        })
        .collect();
    // Stable: equal or unparseable labels keep provider order, and the
    // unparseable ones sink below every parseable resolution.
    options.sort_by_key(|option| Reverse(resolution_of(&option.quality_label)));
    options
}

fn quality_label(format: &RawFormat) -> String {
    if let Some(note) = format.format_note.as_deref()
        && resolution_of(note).is_some()
    {
        return note.to_string();
    }
    match format.height {
        Some(height) if height > 0 => format!("{height}p"),
        _ => format
            .format_note
            .clone()
            .unwrap_or_else(|| "unknown".to_string()),
    }
}

/// Parses the leading number of labels like `720p`, `1080p60` or `2160p HDR`.
pub fn resolution_of(label: &str) -> Option<u32> {
    let trimmed = label.trim();
    let digits: String = trimmed.chars().take_while(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() || !trimmed[digits.len()..].starts_with('p') {
        return None;
    }
    digits.parse().ok()
}
