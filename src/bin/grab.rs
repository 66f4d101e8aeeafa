#![forbid(unsafe_code)]

//! Command-line client: resolve a URL through the backend, pick a quality
//! and stream the file into a directory with live progress on stderr.

use std::{io::Write, path::PathBuf, sync::Arc};

use anyhow::{Result, anyhow, bail};
use clap::Parser;
use tokio::signal;
use tubegrab::{
    api::VideoMetadata,
    client::{ClientError, DirectorySink, DownloadController, quality_options, selector_for_quality},
    config::{RuntimeOverrides, resolve_runtime_config},
    progress::ProgressSnapshot,
};

#[derive(Debug, Parser)]
#[command(name = "grab", version, about = "Download a YouTube video through a tubegrab backend")]
struct Cli {
    /// Video URL (watch, shorts, embed or youtu.be links).
    url: String,

    /// Quality label such as `720p`. Defaults to the best mp4 option.
    #[arg(long, conflicts_with = "format")]
    quality: Option<String>,

    /// Raw format selector, passed through as-is.
    #[arg(long)]
    format: Option<u32>,

    /// Directory the file is written to.
    #[arg(long, default_value = ".")]
    output: PathBuf,

    /// Backend base URL. Overrides TUBEGRAB_SERVER.
    #[arg(long)]
    server: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tubegrab::init_logging();
    let cli = Cli::parse();

    let config = resolve_runtime_config(RuntimeOverrides {
        server_url: cli.server.clone(),
        ..RuntimeOverrides::default()
    })?;
    let controller = Arc::new(DownloadController::new(config.server_url)?);

    let metadata = controller
        .fetch_video_info(&cli.url)
        .await
        .map_err(|err| anyhow!("Failed to fetch video information: {err}"))?;
    eprintln!("{} [{}]", metadata.title, metadata.duration);

    let selector = choose_format(&metadata, cli.quality.as_deref(), cli.format)?;

    let mut updates = controller.subscribe();
    let render = tokio::spawn(async move {
        while updates.changed().await.is_ok() {
            let progress = updates.borrow_and_update().progress.clone();
            if let Some(progress) = progress {
                eprint!("\r\x1b[2K{}", render_progress(&progress));
                let _ = std::io::stderr().flush();
            }
        }
    });
    let canceller = {
        let controller = controller.clone();
        tokio::spawn(async move {
            if signal::ctrl_c().await.is_ok() {
                controller.cancel();
            }
        })
    };

    let mut sink = DirectorySink::new(&cli.output);
    let result = controller
        .download(&metadata.video_id, selector, &mut sink)
        .await;
    canceller.abort();
    render.abort();
    eprintln!();

    if let Some(toast) = controller.view().toast {
        eprintln!("{}", toast.message);
    }
    match result {
        Ok(path) => {
            println!("{}", path.display());
            Ok(())
        }
        Err(ClientError::Cancelled) => std::process::exit(130),
        Err(err) => Err(err.into()),
    }
}

fn choose_format(
    metadata: &VideoMetadata,
    quality: Option<&str>,
    format: Option<u32>,
) -> Result<u32> {
    if let Some(format) = format {
        return Ok(format);
    }
    if let Some(quality) = quality {
        return selector_for_quality(metadata, quality).ok_or_else(|| {
            let available: Vec<String> = quality_options(metadata)
                .into_iter()
                .map(|option| option.quality_label)
                .collect();
            anyhow!(
                "no {quality} option for this video (available: {})",
                available.join(", ")
            )
        });
    }
    match quality_options(metadata).first() {
        Some(option) => Ok(option.format_selector),
        None => bail!("this video has no downloadable formats"),
    }
}

fn render_progress(progress: &ProgressSnapshot) -> String {
    let percent = match progress.percentage {
        Some(value) => format!("{value:>3}%"),
        None => " ...".to_string(),
    };
    format!(
        "[{percent}] {}  {}  {}",
        progress.size_label, progress.throughput_label, progress.eta_label
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use tubegrab::api::FormatOption;

    fn metadata(formats: &[(&str, u32, &str)]) -> VideoMetadata {
        VideoMetadata {
            video_id: "abc123".into(),
            title: "Clip".into(),
            thumbnail_url: String::new(),
            duration: "0:42".into(),
            formats: formats
                .iter()
                .map(|(label, selector, container)| FormatOption {
                    quality_label: (*label).into(),
                    format_selector: *selector,
                    container: (*container).into(),
                    approximate_size_bytes: None,
                })
                .collect(),
        }
    }

    #[test]
    fn default_choice_is_best_mp4() {
        let metadata = metadata(&[("360p", 18, "mp4"), ("720p", 22, "mp4"), ("1080p", 46, "webm")]);
        assert_eq!(choose_format(&metadata, None, None).unwrap(), 22);
        assert_eq!(choose_format(&metadata, Some("360p"), None).unwrap(), 18);
        assert_eq!(choose_format(&metadata, None, Some(137)).unwrap(), 137);
    }

    #[test]
    fn missing_quality_lists_alternatives() {
        let metadata = metadata(&[("360p", 18, "mp4"), ("720p", 22, "mp4")]);
        let err = choose_format(&metadata, Some("1080p"), None).unwrap_err();
        assert_eq!(
            err.to_string(),
            "no 1080p option for this video (available: 720p, 360p)"
        );
        assert!(choose_format(&self::metadata(&[]), None, None).is_err());
    }

    #[test]
    fn quality_and_format_flags_conflict() {
        assert!(
            Cli::try_parse_from(["grab", "https://youtu.be/abc", "--quality", "720p", "--format", "22"])
                .is_err()
        );
        let cli = Cli::try_parse_from(["grab", "https://youtu.be/abc", "--output", "/tmp/out"]).unwrap();
        assert_eq!(cli.output, PathBuf::from("/tmp/out"));
        assert!(cli.server.is_none());
    }

    #[test]
    fn progress_line_shows_indeterminate_percentage() {
        let snapshot = ProgressSnapshot {
            percentage: None,
            throughput_label: "1.0 MB/s".into(),
            size_label: "3.0 MB / unknown".into(),
            eta_label: "Estimating time remaining...".into(),
        };
        assert_eq!(
            render_progress(&snapshot),
            "[ ...] 3.0 MB / unknown  1.0 MB/s  Estimating time remaining..."
        );
        let snapshot = ProgressSnapshot {
            percentage: Some(7),
            ..snapshot
        };
        assert!(render_progress(&snapshot).starts_with("[  7%]"));
    }
}
