//! Mock upstream media host shared by the proxy and server tests.

use std::{
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::Duration,
};

use axum::{
    Router,
    body::{Body, Bytes},
    extract::{Path, State},
    http::{
        HeaderMap, HeaderName, StatusCode,
        header::{CONTENT_LENGTH, CONTENT_RANGE, CONTENT_TYPE, RANGE, USER_AGENT},
    },
    response::Response,
    routing::get,
};
use futures_util::stream;
use parking_lot::Mutex;
use tokio::net::TcpListener;

const AUDIO_LEN: usize = 500;
/// Video id whose thumbnails the mock host answers with a server error.
pub(crate) const BROKEN_THUMBNAIL_ID: &str = "brokenThumb";

#[derive(Default)]
pub(crate) struct MockState {
    pub hits: AtomicUsize,
    pub endless_bytes: AtomicUsize,
    pub endless_closed: AtomicBool,
    last_range: Mutex<Option<String>>,
    last_user_agent: Mutex<Option<String>>,
}

pub(crate) struct MockUpstream {
    pub addr: SocketAddr,
    pub state: Arc<MockState>,
}

impl MockUpstream {
    pub async fn start() -> Self {
        let state = Arc::new(MockState::default());
        let app = Router::new()
            .route("/audio", get(audio))
            .route("/gone", get(gone))
            .route("/endless", get(endless))
            .route("/thumbs/{id}/{file}", get(thumbnail))
            .with_state(state.clone());
        let addr = spawn_app(app).await;
        Self { addr, state }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub fn audio() -> Vec<u8> {
        (0..AUDIO_LEN).map(|n| (n % 251) as u8).collect()
    }

    pub fn last_range(&self) -> Option<String> {
        self.state.last_range.lock().clone()
    }

    pub fn last_user_agent(&self) -> Option<String> {
        self.state.last_user_agent.lock().clone()
    }
}

pub(crate) async fn spawn_app(app: Router) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

/// A URL on a port nothing listens on.
pub(crate) async fn unreachable_url() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{addr}/audio")
}

/// Writes an executable `yt-dlp` stand-in running `script` under `/bin/sh`.
#[cfg(unix)]
pub(crate) fn fake_ytdlp(script: &str) -> (tempfile::TempDir, std::path::PathBuf) {
    use std::os::unix::fs::PermissionsExt;

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("yt-dlp");
    std::fs::write(&path, format!("#!/bin/sh\n{script}\n")).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    (dir, path)
}

pub(crate) async fn wait_until(mut check: impl FnMut() -> bool, limit: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + limit;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}

fn record(state: &MockState, headers: &HeaderMap) {
    state.hits.fetch_add(1, Ordering::SeqCst);
    *state.last_range.lock() = header_string(headers, RANGE);
    *state.last_user_agent.lock() = header_string(headers, USER_AGENT);
}

fn header_string(headers: &HeaderMap, name: HeaderName) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
}

fn parse_range(value: &str) -> Option<(usize, Option<usize>)> {
    let (start, end) = value.strip_prefix("bytes=")?.split_once('-')?;
    let end = if end.is_empty() {
        None
    } else {
        Some(end.parse().ok()?)
    };
    Some((start.parse().ok()?, end))
}

async fn audio(State(state): State<Arc<MockState>>, headers: HeaderMap) -> Response {
    record(&state, &headers);
    let data = MockUpstream::audio();
    let range = headers
        .get(RANGE)
        .and_then(|value| value.to_str().ok())
        .and_then(parse_range);

    let builder = Response::builder().header(CONTENT_TYPE, "audio/mp4");
    match range {
        Some((start, end)) if start < AUDIO_LEN => {
            let end = end.unwrap_or(AUDIO_LEN - 1).min(AUDIO_LEN - 1);
            let slice = data[start..=end].to_vec();
            builder
                .status(StatusCode::PARTIAL_CONTENT)
                .header(CONTENT_RANGE, format!("bytes {start}-{end}/{AUDIO_LEN}"))
                .header(CONTENT_LENGTH, slice.len())
                .body(Body::from(slice))
                .unwrap()
        }
        Some(_) => builder
            .status(StatusCode::RANGE_NOT_SATISFIABLE)
            .header(CONTENT_RANGE, format!("bytes */{AUDIO_LEN}"))
            .body(Body::empty())
            .unwrap(),
        None => builder
            .header(CONTENT_LENGTH, AUDIO_LEN)
            .body(Body::from(data))
            .unwrap(),
    }
}

async fn gone(State(state): State<Arc<MockState>>, headers: HeaderMap) -> StatusCode {
    record(&state, &headers);
    StatusCode::FORBIDDEN
}

struct CloseFlag(Arc<MockState>);

impl Drop for CloseFlag {
    fn drop(&mut self) {
        self.0.endless_closed.store(true, Ordering::SeqCst);
    }
}

/// Emits a chunk every 10ms until the connection goes away.
async fn endless(State(state): State<Arc<MockState>>, headers: HeaderMap) -> Response {
    record(&state, &headers);
    let flag = CloseFlag(state);
    let chunks = stream::unfold(flag, |flag| async move {
        tokio::time::sleep(Duration::from_millis(10)).await;
        flag.0.endless_bytes.fetch_add(1024, Ordering::SeqCst);
        Some((Ok::<_, std::io::Error>(Bytes::from(vec![7u8; 1024])), flag))
    });
    Response::builder()
        .status(StatusCode::PARTIAL_CONTENT)
        .header(CONTENT_TYPE, "audio/webm")
        .body(Body::from_stream(chunks))
        .unwrap()
}

/// Only `mqdefault.jpg` exists, and it is served without a content type.
/// Every file under [`BROKEN_THUMBNAIL_ID`] fails with a 500.
async fn thumbnail(
    State(state): State<Arc<MockState>>,
    Path((id, file)): Path<(String, String)>,
    headers: HeaderMap,
) -> Response {
    record(&state, &headers);
    if id == BROKEN_THUMBNAIL_ID {
        return Response::builder()
            .status(StatusCode::INTERNAL_SERVER_ERROR)
            .body(Body::empty())
            .unwrap();
    }
    if id == "dQw4w9WgXcQ" && file == "mqdefault.jpg" {
        Response::new(Body::from("mqdefault"))
    } else {
        Response::builder()
            .status(StatusCode::NOT_FOUND)
            .body(Body::empty())
            .unwrap()
    }
}
