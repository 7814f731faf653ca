//! HTTP surface of the gateway: search, play, thumbnails and the stream proxy.

use std::{
    future::IntoFuture,
    net::{IpAddr, SocketAddr},
    sync::Arc,
    time::Duration,
};

use anyhow::{Context, Result};
use axum::{
    Json, Router,
    extract::{Path as AxumPath, Query, State},
    http::{HeaderMap, header},
    response::Response,
    routing::get,
};
use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use tokio::{net::TcpListener, signal};
use tokio_util::sync::CancellationToken;
use tower_http::{services::ServeDir, trace::TraceLayer};

use crate::config::GatewayConfig;
use crate::error::{ApiResult, GatewayError};
use crate::extractor::{
    MAX_QUERY_LEN, MAX_SEARCH_LIMIT, TrackSummary, YtDlp, is_valid_video_id, thumbnail_path,
};
use crate::proxy::RangeProxy;
use crate::registry::StreamRegistry;

/// How long in-flight streams may keep running after a shutdown request.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<StreamRegistry>,
    pub proxy: Arc<RangeProxy>,
    pub extractor: Arc<YtDlp>,
    pub settings: Arc<GatewayConfig>,
}

impl AppState {
    pub fn new(config: GatewayConfig) -> Result<Self> {
        let registry = Arc::new(StreamRegistry::new());
        let proxy =
            RangeProxy::new(registry.clone(), &config).context("building upstream HTTP client")?;
        Ok(Self {
            registry,
            proxy: Arc::new(proxy),
            extractor: Arc::new(YtDlp::from_config(&config)),
            settings: Arc::new(config),
        })
    }
}

pub fn router(state: AppState) -> Router {
    let mut app = Router::new()
        .route("/health", get(health))
        .route("/api/search", get(search))
        .route("/api/play/{video_id}", get(play))
        .route("/api/thumbnail/{video_id}", get(thumbnail))
        .route("/proxy/{stream_id}", get(proxy_stream));

    app = match &state.settings.www_root {
        Some(www_root) => app.fallback_service(ServeDir::new(www_root)),
        None => app.fallback(not_found),
    };

    app.layer(TraceLayer::new_for_http()).with_state(state)
}

/// Binds the configured address and serves until Ctrl+C.
pub async fn serve(config: GatewayConfig) -> Result<()> {
    let host: IpAddr = config
        .host
        .parse()
        .with_context(|| format!("invalid listen host {}", config.host))?;
    let addr = SocketAddr::new(host, config.port);
    let state = AppState::new(config)?;
    let app = router(state);

    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding to {}", addr))?;
    tracing::info!(%addr, "gateway listening");

    let shutdown = CancellationToken::new();
    tokio::spawn(shutdown_signal(shutdown.clone()));

    let server = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown.clone().cancelled_owned())
        .into_future();
    tokio::select! {
        result = server => result.context("running gateway")?,
        _ = async {
            shutdown.cancelled().await;
            tokio::time::sleep(SHUTDOWN_GRACE).await;
        } => {
            tracing::warn!("streams still open after shutdown grace period, closing them");
        }
    }

    Ok(())
}

async fn shutdown_signal(shutdown: CancellationToken) {
    if let Err(err) = signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to install Ctrl+C handler");
        return;
    }
    tracing::info!("shutdown requested");
    shutdown.cancel();
}

async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "streams": state.registry.len(),
    }))
}

async fn not_found() -> GatewayError {
    GatewayError::RouteNotFound
}

#[derive(Debug, Deserialize)]
struct SearchParams {
    q: Option<String>,
    limit: Option<usize>,
}

#[derive(Serialize)]
struct SearchResponse {
    results: Vec<TrackSummary>,
}

async fn search(
    State(state): State<AppState>,
    Query(params): Query<SearchParams>,
) -> ApiResult<Json<SearchResponse>> {
    let query = params.q.as_deref().map(str::trim).unwrap_or_default();
    if query.is_empty() {
        return Err(GatewayError::BadRequest("Missing search query".into()));
    }
    if query.chars().count() > MAX_QUERY_LEN {
        return Err(GatewayError::BadRequest("Search query too long".into()));
    }
    let limit = params
        .limit
        .unwrap_or(state.settings.search_limit)
        .clamp(1, MAX_SEARCH_LIMIT);

    let results = state
        .extractor
        .search(query, limit)
        .await
        .map_err(GatewayError::Search)?;
    tracing::info!(query, limit, results = results.len(), "search complete");
    Ok(Json(SearchResponse { results }))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PlayResponse {
    stream_id: String,
    stream_url: String,
    video_id: String,
    title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    artist: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    duration: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    mime_type: Option<String>,
    thumbnail: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    expires_at: Option<DateTime<Utc>>,
}

async fn play(
    State(state): State<AppState>,
    AxumPath(video_id): AxumPath<String>,
) -> ApiResult<Json<PlayResponse>> {
    if !is_valid_video_id(&video_id) {
        return Err(GatewayError::BadRequest("Invalid video id".into()));
    }

    let audio = state
        .extractor
        .resolve_audio(&video_id)
        .await
        .map_err(GatewayError::Resolve)?;

    let ttl = state.settings.stream_ttl;
    let expires_at = TimeDelta::from_std(ttl)
        .ok()
        .and_then(|ttl| Utc::now().checked_add_signed(ttl));
    let stream_id = state.registry.register(audio.url, ttl);
    tracing::info!(video_id = %video_id, stream_id = %stream_id, "stream registered");

    Ok(Json(PlayResponse {
        stream_url: format!("/proxy/{stream_id}"),
        stream_id,
        thumbnail: thumbnail_path(&video_id),
        video_id,
        title: audio.title,
        artist: audio.artist,
        duration: audio.duration,
        mime_type: audio.mime_type,
        expires_at,
    }))
}

async fn thumbnail(
    State(state): State<AppState>,
    AxumPath(video_id): AxumPath<String>,
) -> ApiResult<Response> {
    if !is_valid_video_id(&video_id) {
        return Err(GatewayError::BadRequest("Invalid video id".into()));
    }
    state.proxy.thumbnail(&video_id).await
}

async fn proxy_stream(
    State(state): State<AppState>,
    AxumPath(stream_id): AxumPath<String>,
    headers: HeaderMap,
) -> ApiResult<Response> {
    state
        .proxy
        .stream(&stream_id, headers.get(header::RANGE))
        .await
}
