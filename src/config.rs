#![forbid(unsafe_code)]

use anyhow::{Context, Result};
use std::{
    collections::HashMap,
    env, fs,
    path::{Path, PathBuf},
};

pub const DEFAULT_ENV_PATH: &str = ".env";
pub const DEFAULT_TUBEGRAB_PORT: u16 = 8080;
pub const DEFAULT_TUBEGRAB_HOST: &str = "127.0.0.1";
pub const DEFAULT_YTDLP_BIN: &str = "yt-dlp";
pub const DEFAULT_SERVER_URL: &str = "http://127.0.0.1:8080";

/// Settings shared by both binaries. The server reads host/port/collaborator
/// values, the client only needs `server_url`.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub host: String,
    pub port: u16,
    pub ytdlp_bin: PathBuf,
    pub user_agent: Option<String>,
    pub server_url: String,
}

#[derive(Debug, Clone, Default)]
pub struct RuntimeOverrides {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub ytdlp_bin: Option<PathBuf>,
    pub server_url: Option<String>,
    pub env_path: Option<PathBuf>,
}

pub fn resolve_runtime_config(overrides: RuntimeOverrides) -> Result<RuntimeConfig> {
    let env_path = overrides
        .env_path
        .as_deref()
        .unwrap_or_else(|| Path::new(DEFAULT_ENV_PATH));
    let file_vars = read_env_file(env_path)?;
    Ok(build_runtime_config(&file_vars, env_var_string, overrides))
}

fn build_runtime_config(
    file_vars: &HashMap<String, String>,
    env_lookup: impl Fn(&str) -> Option<String>,
    overrides: RuntimeOverrides,
) -> RuntimeConfig {
    let host = non_blank(overrides.host)
        .or_else(|| lookup_value("TUBEGRAB_HOST", file_vars, &env_lookup))
        .unwrap_or_else(|| DEFAULT_TUBEGRAB_HOST.to_string());
    let port = overrides
        .port
        .or_else(|| {
            lookup_value("TUBEGRAB_PORT", file_vars, &env_lookup)
                .and_then(|value| value.parse::<u16>().ok())
        })
        .unwrap_or(DEFAULT_TUBEGRAB_PORT);
    let ytdlp_bin = overrides
        .ytdlp_bin
        .or_else(|| lookup_value("TUBEGRAB_YTDLP", file_vars, &env_lookup).map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_YTDLP_BIN));
    let user_agent = lookup_value("TUBEGRAB_USER_AGENT", file_vars, &env_lookup);
    let server_url = non_blank(overrides.server_url)
        .or_else(|| lookup_value("TUBEGRAB_SERVER", file_vars, &env_lookup))
        .unwrap_or_else(|| DEFAULT_SERVER_URL.to_string());

    RuntimeConfig {
        host,
        port,
        ytdlp_bin,
        user_agent,
        server_url: server_url.trim_end_matches('/').to_string(),
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.and_then(|value| {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

fn env_var_string(key: &str) -> Option<String> {
    non_blank(env::var(key).ok())
}

fn lookup_value(
    key: &str,
    file_vars: &HashMap<String, String>,
    env_lookup: &impl Fn(&str) -> Option<String>,
) -> Option<String> {
    env_lookup(key).or_else(|| non_blank(file_vars.get(key).cloned()))
}

/// Parses a dotenv-style file. Missing files yield an empty map.
pub fn read_env_file(path: &Path) -> Result<HashMap<String, String>> {
    let mut vars = HashMap::new();
    if !path.exists() {
        return Ok(vars);
    }
    let content =
        fs::read_to_string(path).with_context(|| format!("Reading {}", path.display()))?;
    for line in content.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let line = trimmed.strip_prefix("export ").unwrap_or(trimmed);
        let Some((key, value_raw)) = line.split_once('=') else {
            continue;
        };
        let key = key.trim();
        if key.is_empty() {
            continue;
        }
        let value = value_raw.trim();
        let value = value
            .strip_prefix('"')
            .and_then(|value| value.strip_suffix('"'))
            .or_else(|| {
                value
                    .strip_prefix('\'')
                    .and_then(|value| value.strip_suffix('\''))
            })
            .unwrap_or(value);
        vars.insert(key.to_string(), value.to_string());
    }
    Ok(vars)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn make_config(contents: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "{}", contents).unwrap();
        file
    }

    fn config_from(contents: &str) -> RuntimeConfig {
        let cfg = make_config(contents);
        let vars = read_env_file(cfg.path()).unwrap();
        build_runtime_config(&vars, |_| None, RuntimeOverrides::default())
    }

    #[test]
    fn defaults_apply_for_empty_file() {
        let config = config_from("");
        assert_eq!(config.host, DEFAULT_TUBEGRAB_HOST);
        assert_eq!(config.port, DEFAULT_TUBEGRAB_PORT);
        assert_eq!(config.ytdlp_bin, PathBuf::from(DEFAULT_YTDLP_BIN));
        assert!(config.user_agent.is_none());
        assert_eq!(config.server_url, DEFAULT_SERVER_URL);
    }

    #[test]
    fn reads_port_host_and_collaborator_settings() {
        let config = config_from(
            "TUBEGRAB_PORT=\"4242\"\nTUBEGRAB_HOST=\"0.0.0.0\"\nTUBEGRAB_YTDLP=/opt/yt-dlp\nTUBEGRAB_USER_AGENT='Mozilla/5.0 test'\n",
        );
        assert_eq!(config.port, 4242);
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.ytdlp_bin, PathBuf::from("/opt/yt-dlp"));
        assert_eq!(config.user_agent.as_deref(), Some("Mozilla/5.0 test"));
    }

    #[test]
    fn invalid_port_defaults() {
        let config = config_from("TUBEGRAB_PORT=\"nope\"\n");
        assert_eq!(config.port, DEFAULT_TUBEGRAB_PORT);
    }

    #[test]
    fn server_url_drops_trailing_slash() {
        let config = config_from("TUBEGRAB_SERVER=\"http://media.local:9000/\"\n");
        assert_eq!(config.server_url, "http://media.local:9000");
    }

    #[test]
    fn env_wins_over_file() {
        let vars = read_env_file(make_config("TUBEGRAB_PORT=7000\n").path()).unwrap();
        let config = build_runtime_config(
            &vars,
            |key| (key == "TUBEGRAB_PORT").then(|| "7100".to_string()),
            RuntimeOverrides::default(),
        );
        assert_eq!(config.port, 7100);
    }

    #[test]
    fn overrides_win_over_env_and_file() {
        let mut vars = HashMap::new();
        vars.insert("TUBEGRAB_HOST".to_string(), "file-host".to_string());
        vars.insert("TUBEGRAB_PORT".to_string(), "7000".to_string());

        let config = build_runtime_config(
            &vars,
            |key| (key == "TUBEGRAB_PORT").then(|| "8000".to_string()),
            RuntimeOverrides {
                host: Some("override-host".into()),
                port: Some(9000),
                ytdlp_bin: Some(PathBuf::from("/custom/yt-dlp")),
                ..RuntimeOverrides::default()
            },
        );

        assert_eq!(config.host, "override-host");
        assert_eq!(config.port, 9000);
        assert_eq!(config.ytdlp_bin, PathBuf::from("/custom/yt-dlp"));
    }

    #[test]
    fn blank_values_are_ignored() {
        let vars = read_env_file(make_config("TUBEGRAB_HOST=\"   \"\n").path()).unwrap();
        let config = build_runtime_config(
            &vars,
            |_| None,
            RuntimeOverrides {
                server_url: Some("  ".into()),
                ..RuntimeOverrides::default()
            },
        );
        assert_eq!(config.host, DEFAULT_TUBEGRAB_HOST);
        assert_eq!(config.server_url, DEFAULT_SERVER_URL);
    }

    #[test]
    fn read_env_file_handles_export_and_quotes() {
        let cfg = make_config(
            r#"
            export TUBEGRAB_HOST="0.0.0.0"
            TUBEGRAB_YTDLP='/usr/bin/yt-dlp'
            TUBEGRAB_PORT =  9090
            # comment
            INVALID_LINE
            "#,
        );
        let vars = read_env_file(cfg.path()).unwrap();
        assert_eq!(vars.get("TUBEGRAB_HOST").unwrap(), "0.0.0.0");
        assert_eq!(vars.get("TUBEGRAB_YTDLP").unwrap(), "/usr/bin/yt-dlp");
        assert_eq!(vars.get("TUBEGRAB_PORT").unwrap(), "9090");
        assert!(!vars.contains_key("INVALID_LINE"));
    }

    #[test]
    fn read_env_file_missing_file_returns_empty() {
        let dir = tempfile::tempdir().unwrap();
        let vars = read_env_file(&dir.path().join("missing.env")).unwrap();
        assert!(vars.is_empty());
    }
}
