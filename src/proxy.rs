//! Range-aware streaming proxy for registered streams and thumbnails.

use std::sync::Arc;

use axum::{
    http::{
        HeaderMap, HeaderName, HeaderValue, StatusCode,
        header::{ACCEPT_RANGES, CACHE_CONTROL, CONTENT_LENGTH, CONTENT_RANGE, CONTENT_TYPE, RANGE},
    },
    response::Response,
};
use futures_util::TryStreamExt;
use reqwest::redirect::Policy;

use crate::config::GatewayConfig;
use crate::error::{ApiResult, GatewayError};
use crate::registry::StreamRegistry;
use crate::relay::{Relay, relay};

/// Upstream media hosts reject requests that do not look like a browser.
pub const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36";

const DEFAULT_RANGE: &str = "bytes=0-";
const FORWARDED_HEADERS: [HeaderName; 3] = [CONTENT_TYPE, CONTENT_LENGTH, CONTENT_RANGE];
const THUMBNAIL_CANDIDATES: [&str; 3] = ["hqdefault.jpg", "mqdefault.jpg", "default.jpg"];
const THUMBNAIL_CACHE_CONTROL: &str = "public, max-age=86400";

pub struct RangeProxy {
    client: reqwest::Client,
    registry: Arc<StreamRegistry>,
    thumbnail_base: String,
    relay_capacity: usize,
}

impl RangeProxy {
    pub fn new(registry: Arc<StreamRegistry>, config: &GatewayConfig) -> reqwest::Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(BROWSER_USER_AGENT)
            .connect_timeout(config.upstream_connect_timeout)
            .redirect(Policy::limited(10))
            .build()?;
        Ok(Self {
            client,
            registry,
            thumbnail_base: config.thumbnail_base.trim_end_matches('/').to_string(),
            relay_capacity: config.relay_capacity,
        })
    }

    /// Streams the upstream behind `stream_id`, forwarding the client's range.
    ///
    /// Unknown and expired ids fail before any upstream connection is made.
    /// Once headers are returned the status is committed; a later upstream
    /// failure only truncates the body.
    pub async fn stream(&self, stream_id: &str, range: Option<&HeaderValue>) -> ApiResult<Response> {
        let upstream_url = self.registry.resolve(stream_id)?;
        let range = range
            .cloned()
            .unwrap_or_else(|| HeaderValue::from_static(DEFAULT_RANGE));

        let upstream = self
            .client
            .get(&upstream_url)
            .header(RANGE, range)
            .send()
            .await
            .map_err(|err| {
                tracing::warn!(stream_id, host = %upstream_host(&err), "upstream request failed");
                GatewayError::UpstreamTransport(err.without_url())
            })?;
        tracing::debug!(
            stream_id,
            host = upstream.url().host_str().unwrap_or_default(),
            status = %upstream.status(),
            "upstream responded"
        );

        let mut response = self.relay_response(upstream);
        let headers = response.headers_mut();
        headers.insert(ACCEPT_RANGES, HeaderValue::from_static("bytes"));
        headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
        Ok(response)
    }

    /// Streams the first thumbnail candidate the image host has for `video_id`.
    pub async fn thumbnail(&self, video_id: &str) -> ApiResult<Response> {
        for candidate in THUMBNAIL_CANDIDATES {
            let url = format!("{}/{video_id}/{candidate}", self.thumbnail_base);
            let upstream = self
                .client
                .get(&url)
                .send()
                .await
                .map_err(|err| GatewayError::ThumbnailTransport(err.without_url()))?;
            if upstream.status() == StatusCode::NOT_FOUND {
                continue;
            }
            let upstream = upstream
                .error_for_status()
                .map_err(|err| GatewayError::ThumbnailTransport(err.without_url()))?;

            let mut response = self.relay_response(upstream);
            let headers = response.headers_mut();
            if !headers.contains_key(CONTENT_TYPE) {
                if let Some(value) = mime_guess::from_path(candidate)
                    .first()
                    .and_then(|mime| HeaderValue::from_str(mime.as_ref()).ok())
                {
                    headers.insert(CONTENT_TYPE, value);
                }
            }
            headers.insert(
                CACHE_CONTROL,
                HeaderValue::from_static(THUMBNAIL_CACHE_CONTROL),
            );
            return Ok(response);
        }
        Err(GatewayError::ThumbnailNotFound)
    }

    fn relay_response(&self, upstream: reqwest::Response) -> Response {
        let status = upstream.status();
        let mut headers = HeaderMap::new();
        for name in FORWARDED_HEADERS {
            if let Some(value) = upstream.headers().get(&name) {
                headers.insert(name, value.clone());
            }
        }

        // the relay task is tied to the body and stops when the body is dropped
        let chunks = upstream.bytes_stream().map_err(reqwest::Error::without_url);
        let Relay { body, .. } = relay(chunks, self.relay_capacity);
        let mut response = Response::new(body);
        *response.status_mut() = status;
        *response.headers_mut() = headers;
        response
    }
}

/// Signed media URLs carry credentials in the query; only the host is logged.
fn upstream_host(err: &reqwest::Error) -> &str {
    err.url().and_then(|url| url.host_str()).unwrap_or("unknown")
}
