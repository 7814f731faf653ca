//! In-memory stream registry.
//!
//! Maps opaque stream ids to short-lived upstream media URLs. Entries are
//! append/evict only: `register` inserts, `sweep` removes, nothing is edited in
//! place. Expired entries are invisible to `resolve` even before a sweep has
//! physically removed them.

use std::{
    collections::HashMap,
    time::{Duration, Instant},
};

use parking_lot::RwLock;
use thiserror::Error;

use crate::token::{OsTokenSource, TokenSource};

/// The id is unknown or its entry has expired. Both cases look the same.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("stream not found or expired")]
pub struct NotFound;

#[derive(Debug, Clone)]
struct StreamEntry {
    upstream_url: String,
    /// `None` when `ttl` reaches past what `Instant` can represent.
    expires_at: Option<Instant>,
}

impl StreamEntry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|expires_at| now < expires_at)
    }
}

/// Opportunistic sweeps run once the map reaches this many entries, then again
/// whenever it doubles past what survived the previous sweep.
pub const SWEEP_FLOOR: usize = 64;

struct Entries {
    map: HashMap<String, StreamEntry>,
    next_sweep_len: usize,
}

impl Entries {
    fn evict_expired(&mut self, now: Instant) -> usize {
        let before = self.map.len();
        self.map.retain(|_, entry| entry.is_live(now));
        self.next_sweep_len = SWEEP_FLOOR.max(self.map.len() * 2);
        before - self.map.len()
    }
}

pub struct StreamRegistry {
    entries: RwLock<Entries>,
    tokens: Box<dyn TokenSource>,
}

impl StreamRegistry {
    pub fn new() -> Self {
        Self::with_token_source(OsTokenSource::new())
    }

    pub fn with_token_source(tokens: impl TokenSource + 'static) -> Self {
        Self {
            entries: RwLock::new(Entries {
                map: HashMap::new(),
                next_sweep_len: SWEEP_FLOOR,
            }),
            tokens: Box::new(tokens),
        }
    }

    /// Stores `url` under a fresh id valid for `ttl`. Expired entries are
    /// purged in the same critical section once the map has grown enough,
    /// which keeps the cost amortized constant and memory bounded.
    pub fn register(&self, url: impl Into<String>, ttl: Duration) -> String {
        let now = Instant::now();
        let entry = StreamEntry {
            upstream_url: url.into(),
            expires_at: now.checked_add(ttl),
        };

        let mut entries = self.entries.write();
        let evicted = if entries.map.len() >= entries.next_sweep_len {
            entries.evict_expired(now)
        } else {
            0
        };
        let id = loop {
            let candidate = self.tokens.next_token();
            if !entries.map.contains_key(&candidate) {
                break candidate;
            }
            tracing::warn!("token source produced a live id, drawing again");
        };
        entries.map.insert(id.clone(), entry);
        tracing::debug!(
            stream_id = %id,
            ttl_secs = ttl.as_secs(),
            evicted,
            live = entries.map.len(),
            "registered stream"
        );
        id
    }

    pub fn resolve(&self, id: &str) -> Result<String, NotFound> {
        let now = Instant::now();
        self.entries
            .read()
            .map
            .get(id)
            .filter(|entry| entry.is_live(now))
            .map(|entry| entry.upstream_url.clone())
            .ok_or(NotFound)
    }

    /// Physically removes every expired entry. Returns how many were dropped.
    pub fn sweep(&self) -> usize {
        self.entries.write().evict_expired(Instant::now())
    }

    /// Number of entries currently held in memory, expired or not.
    pub fn len(&self) -> usize {
        self.entries.read().map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().map.is_empty()
    }
}

impl Default for StreamRegistry {
    fn default() -> Self {
        Self::new()
    }
}
