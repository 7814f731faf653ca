//! Bounded relay between an upstream byte stream and a client response body.
//!
//! A spawned task pulls chunks from upstream and pushes them into a bounded
//! channel, so upstream is never read faster than the client drains the body.
//! The body owns a drop guard: once hyper drops it (client gone), the task is
//! cancelled even while it is parked on an upstream read, and dropping the
//! upstream stream closes the upstream connection.

use std::io;

use axum::body::{Body, Bytes};
use futures_util::{Stream, StreamExt, stream};
use tokio::{sync::mpsc, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

/// Terminal state of a relayed body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayOutcome {
    Complete,
    ClientDisconnected,
    UpstreamError,
}

pub struct Relay {
    pub body: Body,
    pub task: JoinHandle<RelayOutcome>,
}

pub fn relay<S, E>(upstream: S, capacity: usize) -> Relay
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: std::error::Error + Send + Sync + 'static,
{
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let token = CancellationToken::new();
    let guard = token.clone().drop_guard();
    let task = tokio::spawn(pump(upstream, tx, token).instrument(tracing::Span::current()));

    let chunks = stream::unfold((rx, guard), |(mut rx, guard)| async move {
        rx.recv().await.map(|chunk| (chunk, (rx, guard)))
    });

    Relay {
        body: Body::from_stream(chunks),
        task,
    }
}

async fn pump<S, E>(
    upstream: S,
    tx: mpsc::Sender<io::Result<Bytes>>,
    token: CancellationToken,
) -> RelayOutcome
where
    S: Stream<Item = Result<Bytes, E>>,
    E: std::error::Error + Send + Sync + 'static,
{
    let mut upstream = std::pin::pin!(upstream);
    let mut forwarded: u64 = 0;

    let outcome = loop {
        let next = tokio::select! {
            biased;
            _ = token.cancelled() => None,
            next = upstream.next() => Some(next),
        };
        let Some(next) = next else {
            break RelayOutcome::ClientDisconnected;
        };

        match next {
            Some(Ok(chunk)) => {
                let len = chunk.len() as u64;
                if !forward(&tx, &token, Ok(chunk)).await {
                    break RelayOutcome::ClientDisconnected;
                }
                forwarded += len;
            }
            Some(Err(err)) => {
                tracing::warn!(error = %err, forwarded, "upstream failed mid-stream");
                forward(&tx, &token, Err(io::Error::other(err))).await;
                break RelayOutcome::UpstreamError;
            }
            None => break RelayOutcome::Complete,
        }
    };

    tracing::debug!(?outcome, bytes = forwarded, "relay finished");
    outcome
}

/// Returns false when the client side is gone.
async fn forward(
    tx: &mpsc::Sender<io::Result<Bytes>>,
    token: &CancellationToken,
    chunk: io::Result<Bytes>,
) -> bool {
    tokio::select! {
        biased;
        _ = token.cancelled() => false,
        sent = tx.send(chunk) => sent.is_ok(),
    }
}
