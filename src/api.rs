//! JSON payloads exchanged between the `backend` server and its clients.
//!
//! Field names follow the camelCase wire format the browser client used.

use serde::{Deserialize, Serialize};

pub const INFO_PATH: &str = "/api/youtube/info";
pub const DOWNLOAD_PATH: &str = "/api/youtube/download";

/// Normalized metadata for one video. Immutable once fetched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoMetadata {
    pub video_id: String,
    pub title: String,
    pub thumbnail_url: String,
    pub duration: String,
    pub formats: Vec<FormatOption>,
}

/// One downloadable rendition. Labels may repeat across selectors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FormatOption {
    pub quality_label: String,
    pub format_selector: u32,
    pub container: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approximate_size_bytes: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InfoRequest {
    pub url: String,
}

/// Raw query of the download endpoint. Kept as strings so malformed values
/// can be answered with our own 400 body instead of axum's rejection text.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadQuery {
    pub video_id: Option<String>,
    pub format_selector: Option<String>,
}

/// Error body returned by every failing endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub message: String,
}
