//! Thin async wrapper around `yt-dlp`.
//!
//! Two invocations are used: a flat playlist dump for `ytsearchN:` queries and
//! a single-JSON dump with `-f bestaudio` to obtain a direct audio URL. Both
//! run with `kill_on_drop`, so an abandoned request does not leave the child
//! process behind, and both are bounded by the configured timeout.

use std::{
    io,
    path::PathBuf,
    process::Stdio,
    time::Duration,
};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::{process::Command, time::timeout};

use crate::config::GatewayConfig;

pub const MAX_SEARCH_LIMIT: usize = 25;
pub const MAX_QUERY_LEN: usize = 200;
const VIDEO_ID_LEN: usize = 11;
const WATCH_URL: &str = "https://www.youtube.com/watch?v=";

#[derive(Debug, Error)]
pub enum ExtractorError {
    #[error("failed to start yt-dlp: {0}")]
    Spawn(#[source] io::Error),

    #[error("yt-dlp did not finish within {secs}s")]
    Timeout { secs: u64 },

    #[error("yt-dlp exited with {status}: {stderr}")]
    Failed { status: String, stderr: String },

    #[error("unreadable yt-dlp output: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("yt-dlp returned no direct media url")]
    MissingUrl,
}

/// One search hit, shaped for the client.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackSummary {
    pub id: String,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artist: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upload_date: Option<String>,
    pub thumbnail: String,
}

/// Direct audio URL plus the metadata the play endpoint hands back.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedAudio {
    pub video_id: String,
    pub url: String,
    pub title: String,
    pub artist: Option<String>,
    pub duration: Option<u64>,
    pub mime_type: Option<String>,
}

/// Entry of `yt-dlp --flat-playlist --dump-json`. Everything but the id is
/// optional because flat entries are sparse.
#[derive(Debug, Deserialize)]
struct FlatEntry {
    id: String,
    title: Option<String>,
    uploader: Option<String>,
    channel: Option<String>,
    duration: Option<f64>,
    upload_date: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SingleInfo {
    id: String,
    title: Option<String>,
    uploader: Option<String>,
    channel: Option<String>,
    duration: Option<f64>,
    url: Option<String>,
    ext: Option<String>,
}

#[derive(Debug, Clone)]
pub struct YtDlp {
    program: PathBuf,
    cookies: Option<PathBuf>,
    timeout: Duration,
}

impl YtDlp {
    pub fn new(program: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            cookies: None,
            timeout,
        }
    }

    pub fn from_config(config: &GatewayConfig) -> Self {
        Self {
            program: config.ytdlp_path.clone(),
            cookies: config.ytdlp_cookies.clone(),
            timeout: config.extractor_timeout,
        }
    }

    pub async fn search(
        &self,
        query: &str,
        limit: usize,
    ) -> Result<Vec<TrackSummary>, ExtractorError> {
        let target = format!("ytsearch{limit}:{query}");
        let stdout = self
            .run(&["--flat-playlist", "--dump-json"], &target)
            .await?;
        Ok(parse_search_output(&String::from_utf8_lossy(&stdout)))
    }

    pub async fn resolve_audio(&self, video_id: &str) -> Result<ResolvedAudio, ExtractorError> {
        let target = format!("{WATCH_URL}{video_id}");
        let stdout = self
            .run(&["-f", "bestaudio", "--dump-single-json"], &target)
            .await?;
        parse_single_info(&stdout)
    }

    async fn run(&self, flags: &[&str], target: &str) -> Result<Vec<u8>, ExtractorError> {
        let mut command = Command::new(&self.program);
        command
            .args(flags)
            .arg("--no-warnings")
            .arg("--no-progress")
            .arg("--skip-download");
        if let Some(cookies) = &self.cookies {
            command.arg("--cookies").arg(cookies);
        }
        command
            .arg("--")
            .arg(target)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = timeout(self.timeout, command.output())
            .await
            .map_err(|_| ExtractorError::Timeout {
                secs: self.timeout.as_secs(),
            })?
            .map_err(ExtractorError::Spawn)?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ExtractorError::Failed {
                status: output.status.to_string(),
                stderr: stderr.trim().lines().last().unwrap_or_default().to_string(),
            });
        }
        Ok(output.stdout)
    }
}

/// True for 11-character ids made of `[A-Za-z0-9_-]`.
pub fn is_valid_video_id(id: &str) -> bool {
    id.len() == VIDEO_ID_LEN
        && id
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
}

pub fn thumbnail_path(video_id: &str) -> String {
    format!("/api/thumbnail/{video_id}")
}

fn parse_search_output(stdout: &str) -> Vec<TrackSummary> {
    stdout
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter_map(|line| match serde_json::from_str::<FlatEntry>(line) {
            Ok(entry) => Some(entry),
            Err(err) => {
                tracing::warn!(error = %err, "skipping unreadable search entry");
                None
            }
        })
        .filter(|entry| is_valid_video_id(&entry.id))
        .map(|entry| {
            let duration = entry.duration.map(whole_seconds);
            TrackSummary {
                thumbnail: thumbnail_path(&entry.id),
                title: entry.title.unwrap_or_else(|| entry.id.clone()),
                artist: entry.uploader.or(entry.channel),
                duration,
                duration_text: duration.map(format_duration),
                upload_date: entry.upload_date.as_deref().and_then(format_upload_date),
                id: entry.id,
            }
        })
        .collect()
}

fn parse_single_info(stdout: &[u8]) -> Result<ResolvedAudio, ExtractorError> {
    let info: SingleInfo = serde_json::from_slice(stdout)?;
    let url = info
        .url
        .filter(|url| url.starts_with("http://") || url.starts_with("https://"))
        .ok_or(ExtractorError::MissingUrl)?;
    Ok(ResolvedAudio {
        title: info.title.unwrap_or_else(|| info.id.clone()),
        artist: info.uploader.or(info.channel),
        duration: info.duration.map(whole_seconds),
        mime_type: info.ext.as_deref().and_then(audio_mime_type),
        video_id: info.id,
        url,
    })
}

fn whole_seconds(value: f64) -> u64 {
    if value.is_finite() && value > 0.0 {
        value.round() as u64
    } else {
        0
    }
}

fn format_duration(total: u64) -> String {
    let (hours, minutes, seconds) = (total / 3600, (total % 3600) / 60, total % 60);
    if hours > 0 {
        format!("{hours}:{minutes:02}:{seconds:02}")
    } else {
        format!("{minutes}:{seconds:02}")
    }
}

/// yt-dlp reports `YYYYMMDD`.
fn format_upload_date(raw: &str) -> Option<String> {
    NaiveDate::parse_from_str(raw, "%Y%m%d")
        .ok()
        .map(|date| date.format("%Y-%m-%d").to_string())
}

fn audio_mime_type(ext: &str) -> Option<String> {
    let known = match ext {
        "m4a" | "mp4" => Some("audio/mp4"),
        "webm" => Some("audio/webm"),
        "opus" | "ogg" => Some("audio/ogg"),
        "mp3" => Some("audio/mpeg"),
        _ => None,
    };
    known
        .map(str::to_string)
        .or_else(|| mime_guess::from_ext(ext).first().map(|mime| mime.to_string()))
}
