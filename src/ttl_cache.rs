//! A concurrent store of short-lived tokens.
//!
//! Tokens map to the owner they were issued for and an expiry instant. Expiry is checked on every
//! read: a token past its expiry is reported as absent even while it is still stored. A sweeper
//! removes expired tokens periodically, purely to reclaim memory.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use rand::rngs::OsRng;
use rand::RngCore;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};

use super::clock;
use super::context::{CancelHandle, Context};

const DEFAULT_TOKEN_LEN: usize = 16;
const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(2);

#[derive(Clone, Debug)]
struct Entry {
    owner: String,
    // `None` when the ttl reaches past what `Instant` can represent.
    expires_at: Option<Instant>,
}

impl Entry {
    fn new(owner: &str, ttl: Duration) -> Self {
        Entry {
            owner: owner.to_owned(),
            expires_at: clock::now().checked_add(ttl),
        }
    }

    #[inline]
    fn is_expired(&self, now: Instant) -> bool {
        matches!(self.expires_at, Some(expires_at) if now >= expires_at)
    }
}

/// A TTL cache's configuration.
#[derive(Clone, Debug)]
pub struct Builder {
    token_len: usize,
    sweep_interval: Duration,
}

impl Builder {
    /// Configures the number of random bytes in an issued token. Tokens are hex encoded, so
    /// their length is twice this value.
    ///
    /// # Panics
    ///
    /// * When `token_len` is less than 8.
    pub fn token_len(mut self, token_len: usize) -> Self {
        assert!(token_len >= 8, "tokens need at least 8 random bytes");
        self.token_len = token_len;
        self
    }

    /// Configures how often the sweeper removes expired tokens.
    ///
    /// # Panics
    ///
    /// * When `sweep_interval` is zero.
    pub fn sweep_interval(mut self, sweep_interval: Duration) -> Self {
        assert!(sweep_interval > Duration::ZERO, "sweep interval must be positive");
        self.sweep_interval = sweep_interval;
        self
    }

    /// Builds an empty cache.
    pub fn build(self) -> TtlCache {
        TtlCache {
            entries: RwLock::new(HashMap::new()),
            token_len: self.token_len,
            sweep_interval: self.sweep_interval,
        }
    }
}

impl Default for Builder {
    fn default() -> Self {
        Builder {
            token_len: DEFAULT_TOKEN_LEN,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
        }
    }
}

/// Token to owner store with per-token expiry.
///
/// Lookups share a read lock, issuing and sweeping take the write lock.
#[derive(Debug)]
pub struct TtlCache {
    entries: RwLock<HashMap<String, Entry>>,
    token_len: usize,
    sweep_interval: Duration,
}

impl Default for TtlCache {
    fn default() -> Self {
        TtlCache::new()
    }
}

impl TtlCache {
    /// Creates an empty cache with 16 byte tokens and a 2 second sweep interval.
    pub fn new() -> Self {
        Self::builder().build()
    }

    /// Returns a cache's builder.
    pub fn builder() -> Builder {
        Builder::default()
    }

    /// Issues a fresh random token for `owner`, valid for `ttl`.
    ///
    /// A `ttl` too large to represent never expires.
    pub fn issue(&self, owner: &str, ttl: Duration) -> String {
        let entry = Entry::new(owner, ttl);
        let mut entries = self.entries.write();

        let token = loop {
            let token = generate_token(self.token_len);
            if !entries.contains_key(&token) {
                break token;
            }
        };

        entries.insert(token.clone(), entry);
        tracing::debug!(owner, ttl_ms = ttl.as_millis() as u64, "issued token");
        token
    }

    /// Stores a token issued elsewhere, replacing any previous entry for it.
    pub fn insert(&self, token: &str, owner: &str, ttl: Duration) {
        let entry = Entry::new(owner, ttl);
        self.entries.write().insert(token.to_owned(), entry);
    }

    /// Returns the owner of `token`, or `None` when it is unknown or expired.
    pub fn lookup(&self, token: &str) -> Option<String> {
        let now = clock::now();
        let entries = self.entries.read();
        entries
            .get(token)
            .filter(|entry| !entry.is_expired(now))
            .map(|entry| entry.owner.clone())
    }

    /// Removes `token`. Returns `true` if it was stored, expired or not.
    pub fn remove(&self, token: &str) -> bool {
        self.entries.write().remove(token).is_some()
    }

    /// Removes every expired token and returns how many were removed.
    pub fn sweep(&self) -> usize {
        let now = clock::now();
        let mut entries = self.entries.write();
        let before = entries.len();

        entries.retain(|token, entry| {
            let expired = entry.is_expired(now);
            if expired {
                tracing::trace!(token = %token, "removing expired token");
            }
            !expired
        });

        let removed = before - entries.len();
        if removed > 0 {
            tracing::debug!(removed, remaining = entries.len(), "swept expired tokens");
        }
        removed
    }

    /// Returns every stored token, including expired ones not swept yet.
    ///
    /// Validate each with [`lookup`](TtlCache::lookup) before trusting it.
    pub fn snapshot(&self) -> Vec<String> {
        self.entries.read().keys().cloned().collect()
    }

    /// Returns the number of stored tokens, including expired ones not swept yet.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Returns `true` if no tokens are stored.
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Spawns a task that sweeps the cache every sweep interval until `ctx` is done or the
    /// returned [`Sweeper`] is shut down.
    ///
    /// # Panics
    ///
    /// * When called outside of a tokio runtime.
    pub fn spawn_sweeper(self: &Arc<Self>, ctx: Context) -> Sweeper {
        let (ctx, cancel) = ctx.with_cancel();
        let cache = Arc::clone(self);
        let handle = tokio::spawn(async move {
            let mut ticker = time::interval(cache.sweep_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;

            tracing::debug!(
                sweep_interval_ms = cache.sweep_interval.as_millis() as u64,
                "token sweeper started"
            );
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        cache.sweep();
                    }
                    err = ctx.done() => {
                        tracing::debug!(reason = %err, "token sweeper stopped");
                        break;
                    }
                }
            }
        });

        Sweeper { cancel, handle }
    }
}

/// Handle to a running sweeper task.
#[derive(Debug)]
pub struct Sweeper {
    cancel: CancelHandle,
    handle: JoinHandle<()>,
}

impl Sweeper {
    /// Signals the sweeper to stop without waiting for it.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// Stops the sweeper and waits for the task to finish.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        if let Err(err) = self.handle.await {
            tracing::warn!(error = %err, "token sweeper task failed");
        }
    }
}

fn generate_token(len: usize) -> String {
    let mut bytes = vec![0u8; len];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}
