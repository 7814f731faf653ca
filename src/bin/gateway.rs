use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;
use tunegate::config::{DEFAULT_CONFIG_PATH, RuntimeOverrides, resolve_config};

#[derive(Parser, Debug)]
#[command(author, version, about = "Search, resolve and stream audio through short-lived proxy ids.")]
struct Cli {
    #[arg(long = "config", value_name = "PATH", default_value = DEFAULT_CONFIG_PATH, help = "Path to the config file")]
    config: PathBuf,
    #[arg(long = "host", value_name = "ADDR", help = "Address to listen on")]
    host: Option<String>,
    #[arg(short = 'p', long = "port", value_name = "PORT", help = "Port to listen on")]
    port: Option<u16>,
    #[arg(
        long = "www-root",
        value_name = "PATH",
        help = "Serve static files from this directory for unmatched routes"
    )]
    www_root: Option<PathBuf>,
    #[arg(long = "yt-dlp", value_name = "PATH", help = "yt-dlp executable to run")]
    ytdlp: Option<PathBuf>,
    #[arg(
        long = "stream-ttl",
        value_name = "SECS",
        help = "Seconds a stream id stays valid after /api/play"
    )]
    stream_ttl: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("tunegate=info,tower_http=info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let overrides = RuntimeOverrides {
        host: cli.host,
        port: cli.port,
        www_root: cli.www_root,
        ytdlp_path: cli.ytdlp,
        stream_ttl_secs: cli.stream_ttl,
    };
    let config = resolve_config(&cli.config, overrides)
        .with_context(|| format!("loading configuration from {}", cli.config.display()))?;
    tracing::debug!(?config, "configuration resolved");

    tunegate::server::serve(config).await
}
