//! Opaque stream identifiers.
//!
//! A token is `<hex millis>-<base64url random>`. The time part is forced to be
//! strictly increasing inside a process, so two tokens from the same source
//! never collide regardless of the random part. The random part (128 bits from
//! the OS CSPRNG) keeps neighbouring ids from being guessable.

use std::{
    sync::atomic::{AtomicU64, Ordering},
    time::{SystemTime, UNIX_EPOCH},
};

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use rand_core::{OsRng, RngCore};

const RANDOM_BYTES: usize = 16;

/// Source of fresh stream identifiers.
pub trait TokenSource: Send + Sync {
    fn next_token(&self) -> String;
}

#[derive(Debug, Default)]
pub struct OsTokenSource {
    last_millis: AtomicU64,
}

impl OsTokenSource {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_millis(&self) -> u64 {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_millis() as u64)
            .unwrap_or_default();
        let mut current = self.last_millis.load(Ordering::Relaxed);
        loop {
            let next = now.max(current + 1);
            match self.last_millis.compare_exchange_weak(
                current,
                next,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => return next,
                Err(observed) => current = observed,
            }
        }
    }
}

impl TokenSource for OsTokenSource {
    fn next_token(&self) -> String {
        let mut random = [0u8; RANDOM_BYTES];
        OsRng.fill_bytes(&mut random);
        format!("{:x}-{}", self.next_millis(), URL_SAFE_NO_PAD.encode(random))
    }
}
