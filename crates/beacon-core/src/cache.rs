//! Cached live counts.
//!
//! Counting hits the store, so queries are served from a cache that is
//! refreshed periodically (see [`PeriodicTask`](crate::PeriodicTask)) and
//! on demand when a queried value has gone stale. Staleness is the accepted
//! consistency model: a query returns the last good value even when the
//! most recent refresh failed.

use crate::clock::{expiry_cutoff, Clock};
use crate::schedule::Tick;
use crate::store::{Index, PresenceStore, StoreError};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Default maximum age of a cached count.
pub const DEFAULT_STALENESS: Duration = Duration::from_secs(60);

/// Default bound on the inline refresh done by the very first query.
pub const DEFAULT_INITIAL_TIMEOUT: Duration = Duration::from_secs(2);

/// Which count to query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CountKind {
    /// All live sessions.
    Total,
    /// Live sessions that are logged in.
    Authenticated,
}

impl CountKind {
    /// The index this count is computed from.
    #[must_use]
    pub const fn index(self) -> Index {
        match self {
            CountKind::Total => Index::Sessions,
            CountKind::Authenticated => Index::Authenticated,
        }
    }
}

/// A computed count and when it was computed (unix seconds).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CachedCount {
    pub value: u64,
    pub refreshed_at: u64,
}

/// Count cache configuration.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Session time-to-live; defines the live window.
    pub ttl: Duration,
    /// Maximum age of a cached value before a query triggers a refresh.
    pub staleness: Duration,
    /// Bound on the inline refresh done when no value exists yet.
    pub initial_timeout: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl: crate::DEFAULT_TTL,
            staleness: DEFAULT_STALENESS,
            initial_timeout: DEFAULT_INITIAL_TIMEOUT,
        }
    }
}

#[derive(Default)]
struct Slot {
    /// Replaced as a whole; readers never see a partial update.
    current: RwLock<Option<CachedCount>>,
    /// Serializes refresh passes for this slot.
    refreshing: Mutex<()>,
    /// A background refresh has been spawned and not yet finished.
    scheduled: AtomicBool,
}

struct Inner {
    store: Arc<dyn PresenceStore>,
    clock: Arc<dyn Clock>,
    config: CacheConfig,
    total: Slot,
    authenticated: Slot,
}

impl Inner {
    fn slot(&self, kind: CountKind) -> &Slot {
        match kind {
            CountKind::Total => &self.total,
            CountKind::Authenticated => &self.authenticated,
        }
    }

    fn is_fresh(&self, cached: &CachedCount) -> bool {
        let age = self.clock.now().saturating_sub(cached.refreshed_at);
        age < self.config.staleness.as_secs()
    }
}

/// Approximate live-count cache.
///
/// Cloning is cheap; clones share the cached values.
#[derive(Clone)]
pub struct CountCache {
    inner: Arc<Inner>,
}

impl CountCache {
    /// Create an empty cache.
    #[must_use]
    pub fn new(store: Arc<dyn PresenceStore>, clock: Arc<dyn Clock>, config: CacheConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                clock,
                config,
                total: Slot::default(),
                authenticated: Slot::default(),
            }),
        }
    }

    /// Number of live sessions.
    pub async fn total(&self) -> u64 {
        self.count(CountKind::Total).await
    }

    /// Number of live, logged-in sessions.
    pub async fn authenticated(&self) -> u64 {
        self.count(CountKind::Authenticated).await
    }

    /// Get a count.
    ///
    /// Returns the cached value, scheduling a background refresh if it is
    /// stale. Only when nothing has been cached yet does this wait on the
    /// store, bounded by [`CacheConfig::initial_timeout`]; if that fails
    /// the answer is 0. Store failures are logged, never returned.
    ///
    /// The authenticated count is capped at the cached total.
    pub async fn count(&self, kind: CountKind) -> u64 {
        let cached = self.cached(kind);

        let value = match cached {
            Some(cached) => {
                if !self.inner.is_fresh(&cached) {
                    self.spawn_refresh(kind);
                }
                cached.value
            }
            None => {
                let initial = self.refresh_stale(kind);
                match tokio::time::timeout(self.inner.config.initial_timeout, initial).await {
                    Ok(Ok(value)) => value,
                    Ok(Err(e)) => {
                        warn!(?kind, error = %e, "Initial count failed");
                        0
                    }
                    Err(_) => {
                        warn!(?kind, "Initial count timed out");
                        0
                    }
                }
            }
        };

        match (kind, self.cached(CountKind::Total)) {
            (CountKind::Authenticated, Some(total)) => value.min(total.value),
            _ => value,
        }
    }

    /// The cached value for a count, if any, without triggering a refresh.
    #[must_use]
    pub fn cached(&self, kind: CountKind) -> Option<CachedCount> {
        *self.inner.slot(kind).current.read()
    }

    /// Recompute a count from the store unconditionally.
    ///
    /// # Errors
    ///
    /// Returns the store error; the cached value is left unchanged.
    pub async fn refresh(&self, kind: CountKind) -> Result<u64, StoreError> {
        self.refresh_inner(kind, true).await
    }

    /// Recompute a count unless another pass refreshed it meanwhile.
    async fn refresh_stale(&self, kind: CountKind) -> Result<u64, StoreError> {
        self.refresh_inner(kind, false).await
    }

    async fn refresh_inner(&self, kind: CountKind, force: bool) -> Result<u64, StoreError> {
        let slot = self.inner.slot(kind);
        let _guard = slot.refreshing.lock().await;

        if !force {
            let cached = *slot.current.read();
            if let Some(cached) = cached.filter(|c| self.inner.is_fresh(c)) {
                return Ok(cached.value);
            }
        }

        let now = self.inner.clock.now();
        let cutoff = expiry_cutoff(now, self.inner.config.ttl);
        let value = self.inner.store.count_live(kind.index(), cutoff).await?;

        *slot.current.write() = Some(CachedCount {
            value,
            refreshed_at: now,
        });

        debug!(?kind, value, "Count refreshed");
        Ok(value)
    }

    fn spawn_refresh(&self, kind: CountKind) {
        let slot = self.inner.slot(kind);
        if slot.scheduled.swap(true, Ordering::AcqRel) {
            return;
        }

        let cache = self.clone();
        tokio::spawn(async move {
            if let Err(e) = cache.refresh_stale(kind).await {
                warn!(?kind, error = %e, "Background count refresh failed");
            }
            cache.inner.slot(kind).scheduled.store(false, Ordering::Release);
        });
    }
}

#[async_trait]
impl Tick for CountCache {
    fn name(&self) -> &'static str {
        "count-refresh"
    }

    /// Refresh both counts, total first. Each is attempted even if the
    /// other fails.
    async fn tick(&self) -> Result<(), StoreError> {
        let total = self.refresh(CountKind::Total).await;
        let authenticated = self.refresh(CountKind::Authenticated).await;
        total.and(authenticated).map(|_| ())
    }
}
