use anyhow::{Context, Result, anyhow};
use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

pub const DEFAULT_CONFIG_PATH: &str = "/etc/tunegate-env";
pub const DEFAULT_TUNEGATE_PORT: u16 = 8080;
pub const DEFAULT_TUNEGATE_HOST: &str = "127.0.0.1";
pub const DEFAULT_YTDLP_PATH: &str = "yt-dlp";
pub const DEFAULT_STREAM_TTL_SECS: u64 = 3600;
/// Upstream media URLs are signed for hours, not days.
pub const MAX_STREAM_TTL_SECS: u64 = 7 * 24 * 3600;
pub const DEFAULT_SEARCH_LIMIT: usize = 10;
pub const DEFAULT_THUMBNAIL_BASE: &str = "https://i.ytimg.com/vi";
pub const DEFAULT_UPSTREAM_CONNECT_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_EXTRACTOR_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_RELAY_CAPACITY: usize = 8;

/// Raw values read from the env-style config file. Every key is optional so
/// a partial file only overrides what it names.
#[derive(Debug, Clone, Default)]
pub struct EnvConfig {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub www_root: Option<PathBuf>,
    pub ytdlp_path: Option<PathBuf>,
    pub ytdlp_cookies: Option<PathBuf>,
    pub stream_ttl_secs: Option<u64>,
    pub search_limit: Option<usize>,
    pub thumbnail_base: Option<String>,
    pub upstream_connect_timeout_secs: Option<u64>,
    pub extractor_timeout_secs: Option<u64>,
    pub relay_capacity: Option<usize>,
}

/// Values passed on the command line. They win over the config file.
#[derive(Debug, Clone, Default)]
pub struct RuntimeOverrides {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub www_root: Option<PathBuf>,
    pub ytdlp_path: Option<PathBuf>,
    pub stream_ttl_secs: Option<u64>,
}

/// Fully resolved settings used by the gateway.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub host: String,
    pub port: u16,
    pub www_root: Option<PathBuf>,
    pub ytdlp_path: PathBuf,
    pub ytdlp_cookies: Option<PathBuf>,
    pub stream_ttl: Duration,
    pub search_limit: usize,
    pub thumbnail_base: String,
    pub upstream_connect_timeout: Duration,
    pub extractor_timeout: Duration,
    pub relay_capacity: usize,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_TUNEGATE_HOST.to_string(),
            port: DEFAULT_TUNEGATE_PORT,
            www_root: None,
            ytdlp_path: PathBuf::from(DEFAULT_YTDLP_PATH),
            ytdlp_cookies: None,
            stream_ttl: Duration::from_secs(DEFAULT_STREAM_TTL_SECS),
            search_limit: DEFAULT_SEARCH_LIMIT,
            thumbnail_base: DEFAULT_THUMBNAIL_BASE.to_string(),
            upstream_connect_timeout: Duration::from_secs(DEFAULT_UPSTREAM_CONNECT_TIMEOUT_SECS),
            extractor_timeout: Duration::from_secs(DEFAULT_EXTRACTOR_TIMEOUT_SECS),
            relay_capacity: DEFAULT_RELAY_CAPACITY,
        }
    }
}

pub fn read_env_config(path: &Path) -> Result<Option<EnvConfig>> {
    if !path.exists() {
        return Ok(None);
    }
    let content =
        fs::read_to_string(path).with_context(|| format!("Reading {}", path.display()))?;
    let mut cfg = EnvConfig::default();
    for line in content.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let Some((key, value_raw)) = trimmed.split_once('=') else {
            continue;
        };
        let value = value_raw.trim().trim_matches('"');
        if value.is_empty() {
            continue;
        }
        match key.trim() {
            "TUNEGATE_HOST" => cfg.host = Some(value.to_string()),
            "TUNEGATE_PORT" => cfg.port = Some(parse_value(key, value, path)?),
            "WWW_ROOT" => cfg.www_root = Some(PathBuf::from(value)),
            "YTDLP_PATH" => cfg.ytdlp_path = Some(PathBuf::from(value)),
            "YTDLP_COOKIES" => cfg.ytdlp_cookies = Some(PathBuf::from(value)),
            "STREAM_TTL_SECS" => cfg.stream_ttl_secs = Some(parse_value(key, value, path)?),
            "SEARCH_LIMIT" => cfg.search_limit = Some(parse_value(key, value, path)?),
            "THUMBNAIL_BASE" => cfg.thumbnail_base = Some(value.trim_end_matches('/').to_string()),
            "UPSTREAM_CONNECT_TIMEOUT_SECS" => {
                cfg.upstream_connect_timeout_secs = Some(parse_value(key, value, path)?)
            }
            "EXTRACTOR_TIMEOUT_SECS" => {
                cfg.extractor_timeout_secs = Some(parse_value(key, value, path)?)
            }
            "RELAY_CAPACITY" => cfg.relay_capacity = Some(parse_value(key, value, path)?),
            _ => {}
        }
    }
    Ok(Some(cfg))
}

fn parse_value<T>(key: &str, value: &str, path: &Path) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    value
        .parse()
        .with_context(|| format!("Parsing {key} from {}", path.display()))
}

/// Merges defaults, the optional config file and CLI overrides, in that order.
pub fn resolve_config(path: impl AsRef<Path>, overrides: RuntimeOverrides) -> Result<GatewayConfig> {
    let path = path.as_ref();
    let file = read_env_config(path)?.unwrap_or_default();
    let defaults = GatewayConfig::default();

    let stream_ttl_secs = overrides
        .stream_ttl_secs
        .or(file.stream_ttl_secs)
        .unwrap_or(DEFAULT_STREAM_TTL_SECS);
    if stream_ttl_secs == 0 {
        return Err(anyhow!("STREAM_TTL_SECS must be greater than zero"));
    }
    if stream_ttl_secs > MAX_STREAM_TTL_SECS {
        return Err(anyhow!(
            "STREAM_TTL_SECS must be at most {MAX_STREAM_TTL_SECS}, got {stream_ttl_secs}"
        ));
    }
    let relay_capacity = file.relay_capacity.unwrap_or(defaults.relay_capacity);
    if relay_capacity == 0 {
        return Err(anyhow!("RELAY_CAPACITY must be greater than zero"));
    }

    Ok(GatewayConfig {
        host: overrides.host.or(file.host).unwrap_or(defaults.host),
        port: overrides.port.or(file.port).unwrap_or(defaults.port),
        www_root: overrides.www_root.or(file.www_root),
        ytdlp_path: overrides
            .ytdlp_path
            .or(file.ytdlp_path)
            .unwrap_or(defaults.ytdlp_path),
        ytdlp_cookies: file.ytdlp_cookies,
        stream_ttl: Duration::from_secs(stream_ttl_secs),
        search_limit: file
            .search_limit
            .unwrap_or(defaults.search_limit)
            .clamp(1, crate::extractor::MAX_SEARCH_LIMIT),
        thumbnail_base: file.thumbnail_base.unwrap_or(defaults.thumbnail_base),
        upstream_connect_timeout: file
            .upstream_connect_timeout_secs
            .map(Duration::from_secs)
            .unwrap_or(defaults.upstream_connect_timeout),
        extractor_timeout: file
            .extractor_timeout_secs
            .map(Duration::from_secs)
            .unwrap_or(defaults.extractor_timeout),
        relay_capacity,
    })
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

    #[test]
    fn read_env_config_extracts_port() {
        let cfg = make_config("# gateway\nTUNEGATE_PORT=\"4242\"\n");
        let parsed = read_env_config(cfg.path()).unwrap().unwrap();
        assert_eq!(parsed.port, Some(4242));
    }

    #[test]
    fn read_env_config_rejects_bad_port() {
        let cfg = make_config("TUNEGATE_PORT=\"not-a-port\"\n");
        let err = read_env_config(cfg.path()).unwrap_err();
        assert!(err.to_string().contains("TUNEGATE_PORT"));
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = resolve_config(dir.path().join("absent"), RuntimeOverrides::default()).unwrap();
        assert_eq!(config.port, DEFAULT_TUNEGATE_PORT);
        assert_eq!(config.host, DEFAULT_TUNEGATE_HOST);
        assert_eq!(config.stream_ttl, Duration::from_secs(DEFAULT_STREAM_TTL_SECS));
        assert_eq!(config.thumbnail_base, DEFAULT_THUMBNAIL_BASE);
        assert!(config.www_root.is_none());
    }

    #[test]
    fn file_values_apply_and_cli_wins() {
        let cfg = make_config(
            "TUNEGATE_HOST=\"0.0.0.0\"\nTUNEGATE_PORT=\"9000\"\nSTREAM_TTL_SECS=\"60\"\n\
             THUMBNAIL_BASE=\"http://thumbs.local/vi/\"\nSEARCH_LIMIT=\"500\"\n",
        );
        let config = resolve_config(
            cfg.path(),
            RuntimeOverrides {
                port: Some(7000),
                ..RuntimeOverrides::default()
            },
        )
        .unwrap();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 7000);
        assert_eq!(config.stream_ttl, Duration::from_secs(60));
        assert_eq!(config.thumbnail_base, "http://thumbs.local/vi");
        assert_eq!(config.search_limit, crate::extractor::MAX_SEARCH_LIMIT);
    }

    #[test]
    fn zero_ttl_is_rejected() {
        let cfg = make_config("STREAM_TTL_SECS=\"0\"\n");
        assert!(resolve_config(cfg.path(), RuntimeOverrides::default()).is_err());
    }

    #[test]
    fn oversized_ttl_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let err = resolve_config(
            dir.path().join("absent"),
            RuntimeOverrides {
                stream_ttl_secs: Some(u64::MAX),
                ..RuntimeOverrides::default()
            },
        )
        .unwrap_err();
        assert!(err.to_string().contains("STREAM_TTL_SECS"));

        let cfg = make_config(&format!("STREAM_TTL_SECS=\"{MAX_STREAM_TTL_SECS}\"\n"));
        let config = resolve_config(cfg.path(), RuntimeOverrides::default()).unwrap();
        assert_eq!(config.stream_ttl, Duration::from_secs(MAX_STREAM_TTL_SECS));
    }
}
