//! Eviction of expired index entries.
//!
//! Range counts already ignore entries outside the live window, but the
//! entries themselves stay indexed until removed. The sweeper bounds that
//! growth by deleting everything at or before the expiry cutoff from both
//! indices.

use crate::clock::{expiry_cutoff, Clock};
use crate::schedule::Tick;
use crate::store::{PresenceStore, StoreError, SweepStats};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Default interval between sweeps.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Removes expired sessions from the store.
pub struct Sweeper {
    store: Arc<dyn PresenceStore>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
}

impl Sweeper {
    /// Create a sweeper for sessions with the given TTL.
    #[must_use]
    pub fn new(store: Arc<dyn PresenceStore>, clock: Arc<dyn Clock>, ttl: Duration) -> Self {
        Self { store, clock, ttl }
    }

    /// Run one sweep.
    ///
    /// Safe to run concurrently with heartbeats: the store re-checks each
    /// entry's timestamp when deleting, so a session refreshed after the
    /// cutoff was computed is kept.
    ///
    /// # Errors
    ///
    /// Returns the store error; nothing is retried until the next call.
    pub async fn sweep(&self) -> Result<SweepStats, StoreError> {
        let cutoff = expiry_cutoff(self.clock.now(), self.ttl);
        let stats = self.store.sweep(cutoff).await?;

        if stats.total() > 0 {
            info!(
                sessions = stats.sessions,
                authenticated = stats.authenticated,
                "Swept expired sessions"
            );
        } else {
            debug!(cutoff, "Sweep found nothing to remove");
        }

        Ok(stats)
    }
}

#[async_trait]
impl Tick for Sweeper {
    fn name(&self) -> &'static str {
        "sweeper"
    }

    async fn tick(&self) -> Result<(), StoreError> {
        self.sweep().await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::store::{AuthUpdate, Index, MemoryStore};
    use crate::token::SessionToken;

    const START: u64 = 1_700_000_000;
    const TTL: Duration = Duration::from_secs(660);

    fn token(n: u8) -> SessionToken {
        SessionToken::parse(format!("aaaaaaaa-0000-0000-0000-0000000000{:02}", n)).unwrap()
    }

    fn setup() -> (Sweeper, Arc<MemoryStore>, Arc<ManualClock>) {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(START));
        let sweeper = Sweeper::new(store.clone(), clock.clone(), TTL);
        (sweeper, store, clock)
    }

    #[tokio::test]
    async fn test_sweep_removes_only_expired() {
        let (sweeper, store, clock) = setup();

        store.upsert(&token(1), AuthUpdate::Set, START).await.unwrap();
        store.upsert(&token(2), AuthUpdate::Untouched, START + 60).await.unwrap();

        clock.advance(TTL);
        let stats = sweeper.sweep().await.unwrap();

        assert_eq!(stats.sessions, 1);
        assert_eq!(stats.authenticated, 1);
        assert_eq!(store.last_seen(Index::Sessions, token(1).as_str()), None);
        assert_eq!(store.last_seen(Index::Authenticated, token(1).as_str()), None);
        assert_eq!(store.last_seen(Index::Sessions, token(2).as_str()), Some(START + 60));
    }

    #[tokio::test]
    async fn test_sweep_keeps_refreshed() {
        let (sweeper, store, clock) = setup();
        store.upsert(&token(1), AuthUpdate::Set, START).await.unwrap();

        clock.advance(TTL);
        // Heartbeat lands just before the sweep.
        store.upsert(&token(1), AuthUpdate::Set, clock.now()).await.unwrap();

        let stats = sweeper.sweep().await.unwrap();
        assert_eq!(stats.total(), 0);
        assert_eq!(store.indexed(Index::Sessions), 1);
        assert_eq!(store.indexed(Index::Authenticated), 1);
    }

    #[tokio::test]
    async fn test_sweep_idempotent() {
        let (sweeper, store, clock) = setup();
        store.upsert(&token(1), AuthUpdate::Untouched, START).await.unwrap();

        clock.advance(TTL * 2);
        assert_eq!(sweeper.sweep().await.unwrap().total(), 1);
        assert_eq!(sweeper.sweep().await.unwrap().total(), 0);
    }

    #[tokio::test]
    async fn test_sweep_failure_via_tick() {
        let (sweeper, store, clock) = setup();
        store.upsert(&token(1), AuthUpdate::Untouched, START).await.unwrap();
        store.set_unavailable(true);
        clock.advance(TTL);

        assert!(sweeper.tick().await.is_err());
        store.set_unavailable(false);
        assert_eq!(store.indexed(Index::Sessions), 1);

        sweeper.tick().await.unwrap();
        assert_eq!(store.indexed(Index::Sessions), 0);
    }
}
