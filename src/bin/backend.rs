#![forbid(unsafe_code)]

//! Axum backend that resolves YouTube URLs and relays downloads.
//!
//! Nothing is stored on disk. Metadata comes from the extraction collaborator
//! on every request and the chosen rendition is proxied straight through to
//! the caller.

use std::{
    net::{IpAddr, SocketAddr},
    path::PathBuf,
    sync::Arc,
};

use anyhow::{Context, Result, anyhow};
use axum::{
    Json, Router,
    body::Body,
    extract::{Query, Request, State, rejection::JsonRejection},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use futures::{StreamExt, stream};
use tokio::signal;
use tubegrab::{
    api::{DOWNLOAD_PATH, DownloadQuery, ErrorBody, INFO_PATH, InfoRequest, VideoMetadata},
    config::{RuntimeOverrides, resolve_runtime_config},
    extractor::{Extractor, YtDlp},
    relay::{content_disposition, content_type_for, download_filename, select_format},
    resolver::{self, ResolveError},
};

#[derive(Debug, Clone)]
struct BackendArgs {
    listen_host: IpAddr,
    port: u16,
    ytdlp_bin: PathBuf,
    user_agent: Option<String>,
}

impl BackendArgs {
    fn parse() -> Result<Self> {
        Self::from_iter(std::env::args().skip(1))
    }

    fn from_iter<I>(iter: I) -> Result<Self>
    where
        I: IntoIterator<Item = String>,
    {
        let mut overrides = RuntimeOverrides::default();
        let mut args = iter.into_iter();
        while let Some(arg) = args.next() {
            if let Some(value) = arg.strip_prefix("--host=") {
                overrides.host = Some(value.to_string());
                continue;
            }
            if let Some(value) = arg.strip_prefix("--port=") {
                overrides.port = Some(parse_port_arg(value)?);
                continue;
            }
            if let Some(value) = arg.strip_prefix("--ytdlp=") {
                overrides.ytdlp_bin = Some(PathBuf::from(value));
                continue;
            }
            if let Some(value) = arg.strip_prefix("--env=") {
                overrides.env_path = Some(PathBuf::from(value));
                continue;
            }

            match arg.as_str() {
                "--host" => {
                    let value = args
                        .next()
                        .ok_or_else(|| anyhow!("--host requires a value"))?;
                    overrides.host = Some(value);
                }
                "--port" => {
                    let value = args
                        .next()
                        .ok_or_else(|| anyhow!("--port requires a value"))?;
                    overrides.port = Some(parse_port_arg(&value)?);
                }
                "--ytdlp" => {
                    let value = args
                        .next()
                        .ok_or_else(|| anyhow!("--ytdlp requires a value"))?;
                    overrides.ytdlp_bin = Some(PathBuf::from(value));
                }
                "--env" => {
                    let value = args
                        .next()
                        .ok_or_else(|| anyhow!("--env requires a value"))?;
                    overrides.env_path = Some(PathBuf::from(value));
                }
                _ => return Err(anyhow!("unknown argument: {arg}")),
            }
        }

        let config = resolve_runtime_config(overrides)?;
        Ok(Self {
            listen_host: parse_host_arg(&config.host)?,
            port: config.port,
            ytdlp_bin: config.ytdlp_bin,
            user_agent: config.user_agent,
        })
    }
}

fn parse_port_arg(value: &str) -> Result<u16> {
    value
        .parse::<u16>()
        .context("expected a numeric port between 0 and 65535")
}

fn parse_host_arg(value: &str) -> Result<IpAddr> {
    value
        .parse::<IpAddr>()
        .context("expected a valid IPv4 or IPv6 address for --host/TUBEGRAB_HOST")
}

#[derive(Clone)]
struct AppState {
    extractor: Arc<dyn Extractor>,
}

#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: message.into(),
        }
    }

    fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(ErrorBody {
                message: self.message,
            }),
        )
            .into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

#[tokio::main]
async fn main() -> Result<()> {
    tubegrab::init_logging();

    let BackendArgs {
        listen_host,
        port,
        ytdlp_bin,
        user_agent,
    } = BackendArgs::parse()?;

    tracing::info!(ytdlp = %ytdlp_bin.display(), "using extraction collaborator");
    let state = AppState {
        extractor: Arc::new(YtDlp::new(ytdlp_bin, user_agent)),
    };

    let addr = SocketAddr::new(listen_host, port);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding to {addr}"))?;
    tracing::info!("API server listening on http://{addr}");

    axum::serve(listener, app(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("running API server")?;

    Ok(())
}

fn app(state: AppState) -> Router {
    Router::new()
        .route(INFO_PATH, post(fetch_info))
        .route(DOWNLOAD_PATH, get(download))
        .fallback(api_fallback)
        .with_state(state)
}

async fn shutdown_signal() {
    if let Err(err) = signal::ctrl_c().await {
        tracing::warn!("failed to install Ctrl+C handler: {err}");
    }
}

async fn api_fallback(req: Request) -> Response {
    let path = req.uri().path();
    if path == "/api" || path.starts_with("/api/") {
        return ApiError::not_found("endpoint not found").into_response();
    }
    StatusCode::NOT_FOUND.into_response()
}

async fn fetch_info(
    State(state): State<AppState>,
    payload: Result<Json<InfoRequest>, JsonRejection>,
) -> ApiResult<Json<VideoMetadata>> {
    // A missing or non-string `url` is the same client mistake as a bad URL.
    let Json(request) = payload.map_err(|rejection| {
        tracing::debug!("rejected info body: {rejection}");
        ApiError::bad_request("Invalid URL provided")
    })?;
    match resolver::resolve(state.extractor.as_ref(), &request.url).await {
        Ok(metadata) => {
            tracing::info!(
                video_id = %metadata.video_id,
                formats = metadata.formats.len(),
                "resolved video"
            );
            Ok(Json(metadata))
        }
        Err(ResolveError::Validation(message)) => {
            tracing::debug!(url = %request.url, "rejected url: {message}");
            Err(ApiError::bad_request(message))
        }
        Err(ResolveError::Upstream(err)) => {
            tracing::error!(url = %request.url, "metadata extraction failed: {err}");
            Err(ApiError::internal(err.to_string()))
        }
    }
}

fn parse_download_query(query: &DownloadQuery) -> ApiResult<(String, u32)> {
    let video_id = query
        .video_id
        .as_deref()
        .map(str::trim)
        .filter(|id| resolver::is_valid_video_id(id));
    let selector = query
        .format_selector
        .as_deref()
        .and_then(|value| value.trim().parse::<u32>().ok());
    match (video_id, selector) {
        (Some(video_id), Some(selector)) => Ok((video_id.to_string(), selector)),
        _ => Err(ApiError::bad_request("Invalid parameters")),
    }
}

async fn download(
    State(state): State<AppState>,
    Query(query): Query<DownloadQuery>,
) -> ApiResult<Response> {
    let (video_id, requested) = parse_download_query(&query)?;

    let info = state
        .extractor
        .fetch_full_info(&video_id)
        .await
        .map_err(|err| {
            tracing::error!(%video_id, "metadata extraction failed: {err}");
            ApiError::internal(err.to_string())
        })?;

    let selected = select_format(&info, requested)
        .ok_or_else(|| ApiError::not_found("No suitable format found"))?;
    if selected.fallback {
        tracing::info!(
            %video_id,
            requested,
            used = selected.format_selector,
            "requested format missing, falling back"
        );
    }

    let mut upstream = state
        .extractor
        .open_stream(&video_id, selected.format_selector)
        .await
        .map_err(|err| {
            tracing::error!(%video_id, "could not open upstream stream: {err}");
            ApiError::internal("Error streaming video")
        })?;

    // Nothing is committed until the first chunk arrives, so an upstream
    // that fails right away still gets a clean JSON error.
    let first = match upstream.next().await {
        Some(Ok(chunk)) => chunk,
        Some(Err(err)) => {
            tracing::error!(%video_id, "upstream failed before first byte: {err}");
            return Err(ApiError::internal("Error streaming video"));
        }
        None => {
            tracing::error!(%video_id, "upstream ended without data");
            return Err(ApiError::internal("Error streaming video"));
        }
    };

    let filename = download_filename(info.display_title(), &selected.container);
    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_DISPOSITION,
        header_value(&content_disposition(&filename))?,
    );
    headers.insert(
        header::CONTENT_TYPE,
        header_value(&content_type_for(&selected.container))?,
    );
    if let Some(size) = selected.exact_size {
        headers.insert(header::CONTENT_LENGTH, HeaderValue::from(size));
    }

    tracing::info!(
        %video_id,
        format_selector = selected.format_selector,
        %filename,
        "relaying download"
    );
    let body = Body::from_stream(stream::once(async move { Ok(first) }).chain(upstream));
    Ok((headers, body).into_response())
}

fn header_value(value: &str) -> ApiResult<HeaderValue> {
    HeaderValue::from_str(value).map_err(|_| ApiError::internal("Error streaming video"))
}
