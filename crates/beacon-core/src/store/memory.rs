//! In-memory presence store.
//!
//! Used by tests and for running without Redis. Same semantics as the
//! Redis adapter, held in one concurrent map per index.
//!
//! Writes that touch both maps hold the base entry's shard lock for the
//! whole update, always locking the base map before the authenticated map.
//! That serializes upserts and removals of one token the way `MULTI` does
//! on Redis.

use super::{AuthUpdate, Index, PresenceStore, StoreError, SweepStats};
use crate::token::SessionToken;
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::trace;

#[cfg(any(test, feature = "testing"))]
use std::sync::atomic::{AtomicBool, Ordering};

/// In-memory presence store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    /// Token -> last activity, all sessions.
    sessions: DashMap<String, u64>,
    /// Token -> last activity, authenticated subset.
    authenticated: DashMap<String, u64>,
    #[cfg(any(test, feature = "testing"))]
    unavailable: AtomicBool,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn index(&self, index: Index) -> &DashMap<String, u64> {
        match index {
            Index::Sessions => &self.sessions,
            Index::Authenticated => &self.authenticated,
        }
    }

    /// Last recorded activity of a token in an index, live or not.
    #[must_use]
    pub fn last_seen(&self, index: Index, token: &str) -> Option<u64> {
        self.index(index).get(token).map(|e| *e)
    }

    /// Number of entries in an index, including expired but unswept ones.
    #[must_use]
    pub fn indexed(&self, index: Index) -> usize {
        self.index(index).len()
    }

    /// Make every subsequent call fail (or succeed again).
    #[cfg(any(test, feature = "testing"))]
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    #[cfg(any(test, feature = "testing"))]
    fn check(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("memory store switched off".into()));
        }
        Ok(())
    }

    #[cfg(not(any(test, feature = "testing")))]
    fn check(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

#[async_trait]
impl PresenceStore for MemoryStore {
    async fn ping(&self) -> Result<(), StoreError> {
        self.check()
    }

    async fn upsert(
        &self,
        token: &SessionToken,
        auth: AuthUpdate,
        at: u64,
    ) -> Result<(), StoreError> {
        self.check()?;

        // Base first, so the authenticated map never holds a token the base lacks.
        let mut base = self.sessions.entry(token.as_str().to_owned()).or_insert(at);
        *base = at;

        match auth {
            AuthUpdate::Set => {
                self.authenticated.insert(token.as_str().to_owned(), at);
            }
            AuthUpdate::Clear => {
                self.authenticated.remove(token.as_str());
            }
            AuthUpdate::Retain { cutoff } => {
                if let Some(mut last_seen) = self.authenticated.get_mut(token.as_str()) {
                    if *last_seen > cutoff {
                        *last_seen = at;
                    }
                }
            }
            AuthUpdate::Untouched => {}
        }
        drop(base);

        trace!(session = %token, ?auth, at, "Memory upsert");
        Ok(())
    }

    async fn remove(&self, token: &SessionToken) -> Result<(), StoreError> {
        self.check()?;

        let base = self.sessions.entry(token.as_str().to_owned());
        self.authenticated.remove(token.as_str());
        if let Entry::Occupied(entry) = base {
            entry.remove();
        }
        Ok(())
    }

    async fn count_live(&self, index: Index, cutoff: u64) -> Result<u64, StoreError> {
        self.check()?;
        let count = self
            .index(index)
            .iter()
            .filter(|entry| *entry.value() > cutoff)
            .count();
        Ok(count as u64)
    }

    async fn sweep(&self, cutoff: u64) -> Result<SweepStats, StoreError> {
        self.check()?;

        let mut stats = SweepStats::default();
        // Authenticated first, so a swept base entry never leaves its login
        // entry behind. `retain` evaluates each entry under its shard lock,
        // so a heartbeat that landed first keeps its entry.
        self.authenticated.retain(|_, last_seen| {
            let keep = *last_seen > cutoff;
            if !keep {
                stats.authenticated += 1;
            }
            keep
        });
        self.sessions.retain(|_, last_seen| {
            let keep = *last_seen > cutoff;
            if !keep {
                stats.sessions += 1;
            }
            keep
        });

        Ok(stats)
    }
}
