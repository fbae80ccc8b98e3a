//! Presence store adapters.
//!
//! Every adapter implements the score-index policy: each index is a set of
//! tokens ordered by last-activity time (unix seconds).
//!
//! - Counting is a range query over `(now - ttl, +inf)`. It is exact at
//!   query time and costs O(log N) on Redis.
//! - Entries outside the window stay indexed until a sweep removes them,
//!   so a [`Sweeper`](crate::Sweeper) must run alongside.
//!
//! Two indices exist, kept under separate keys: [`Index::Sessions`] holds
//! every live session and [`Index::Authenticated`] the logged-in subset.

mod memory;
mod redis;

pub use self::memory::MemoryStore;
pub use self::redis::RedisStore;

use crate::token::SessionToken;
use async_trait::async_trait;
use std::fmt;
use thiserror::Error;

/// Store errors. Any of these means the store could not serve the call.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Redis returned an error or the connection failed.
    #[error("Redis error: {0}")]
    Redis(#[from] ::redis::RedisError),

    /// The store is unreachable.
    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// A presence index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Index {
    /// All sessions.
    Sessions,
    /// Sessions that reported themselves as logged in.
    Authenticated,
}

impl Index {
    /// Both indices, base first.
    pub const ALL: [Index; 2] = [Index::Sessions, Index::Authenticated];

    /// Store key backing this index.
    #[must_use]
    pub const fn key(self) -> &'static str {
        match self {
            Index::Sessions => "session",
            Index::Authenticated => "loggedin",
        }
    }
}

impl fmt::Display for Index {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// What an upsert does to the authenticated index.
///
/// The base index is always refreshed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthUpdate {
    /// Add or refresh the authenticated entry, atomically with the base entry.
    Set,
    /// Remove the authenticated entry.
    Clear,
    /// Refresh the authenticated entry only if it exists and is still live,
    /// i.e. its last activity is after `cutoff`. An expired but unswept
    /// entry is left to age out.
    Retain { cutoff: u64 },
    /// Leave the authenticated entry alone.
    Untouched,
}

/// Result of a sweep pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepStats {
    /// Entries removed from the base index.
    pub sessions: u64,
    /// Entries removed from the authenticated index.
    pub authenticated: u64,
}

impl SweepStats {
    /// Total entries removed.
    #[must_use]
    pub fn total(&self) -> u64 {
        self.sessions + self.authenticated
    }
}

/// Backing store for presence entries.
#[async_trait]
pub trait PresenceStore: Send + Sync {
    /// Check that the store is reachable.
    async fn ping(&self) -> Result<(), StoreError>;

    /// Record activity for a session at unix time `at`.
    async fn upsert(
        &self,
        token: &SessionToken,
        auth: AuthUpdate,
        at: u64,
    ) -> Result<(), StoreError>;

    /// Remove a session from both indices. Removing an absent session is not
    /// an error.
    async fn remove(&self, token: &SessionToken) -> Result<(), StoreError>;

    /// Count entries in `index` whose last activity is after `cutoff`.
    async fn count_live(&self, index: Index, cutoff: u64) -> Result<u64, StoreError>;

    /// Remove entries whose last activity is at or before `cutoff` from both
    /// indices. Staleness is evaluated against current state at removal time.
    async fn sweep(&self, cutoff: u64) -> Result<SweepStats, StoreError>;
}
