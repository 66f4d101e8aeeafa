//! Download Relay helpers: filename derivation, rendition choice, and the
//! headers attached to the proxied stream.

use std::sync::LazyLock;

use regex::Regex;

use crate::extractor::{RawFormat, RawVideoInfo};

const MAX_FILENAME_STEM: usize = 100;
const DEFAULT_CONTAINER: &str = "mp4";

static DISALLOWED_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^A-Za-z0-9_\s-]").expect("static regex"));
static WS_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").expect("static regex"));

/// Builds `<stem>.<container>` where the stem only holds ASCII word
/// characters, hyphens and underscores, capped at 100 characters.
pub fn download_filename(title: &str, container: &str) -> String {
    let stripped = DISALLOWED_RE.replace_all(title, "");
    let collapsed = WS_RE.replace_all(&stripped, "_");
    let mut stem: String = collapsed.chars().take(MAX_FILENAME_STEM).collect();
    if stem.is_empty() {
        stem = "video".to_string();
    }
    let extension = sanitize_extension(container);
    format!("{stem}.{extension}")
}

fn sanitize_extension(container: &str) -> String {
    let cleaned: String = container
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect::<String>()
        .to_ascii_lowercase();
    if cleaned.is_empty() {
        DEFAULT_CONTAINER.to_string()
    } else {
        cleaned
    }
}

/// Registered video type for the container when one exists (`mkv` gives
/// `video/x-matroska`), else `video/<container>`.
pub fn content_type_for(container: &str) -> String {
    let extension = sanitize_extension(container);
    mime_guess::from_ext(&extension)
        .first()
        .filter(|mime| mime.type_() == mime_guess::mime::VIDEO)
        .map(|mime| mime.essence_str().to_string())
        .unwrap_or_else(|| format!("video/{extension}"))
}

pub fn content_disposition(filename: &str) -> String {
    format!("attachment; filename=\"{filename}\"")
}

/// Rendition picked for a download request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectedFormat {
    pub format_selector: u32,
    pub container: String,
    /// Exact byte size when the collaborator knows it; approximations are not
    /// safe to announce as `Content-Length`.
    pub exact_size: Option<u64>,
    /// True when the requested selector was missing and a fallback was used.
    pub fallback: bool,
}

/// Exact selector match first, otherwise the highest-resolution progressive
/// rendition. `None` means nothing deliverable exists.
pub fn select_format(info: &RawVideoInfo, requested: u32) -> Option<SelectedFormat> {
    if let Some(format) = info
        .formats
        .iter()
        .find(|format| format.selector() == Some(requested))
    {
        return Some(selected(format, requested, false));
    }

    info.formats
        .iter()
        .filter(|format| format.has_audio() && format.has_video())
        .filter_map(|format| format.selector().map(|selector| (format, selector)))
        .max_by_key(|(format, _)| format.height.unwrap_or(0))
        .map(|(format, selector)| selected(format, selector, true))
}

fn selected(format: &RawFormat, format_selector: u32, fallback: bool) -> SelectedFormat {
    SelectedFormat {
        format_selector,
        container: format
            .ext
            .clone()
            .unwrap_or_else(|| DEFAULT_CONTAINER.to_string()),
        exact_size: format.filesize,
        fallback,
    }
}
