//! # beacon-core
//!
//! Session presence tracking for the Beacon live-count service.
//!
//! This crate provides the building blocks behind the HTTP surface:
//!
//! - **Token** - Session token shape validation and generation
//! - **Store** - Presence store adapter (Redis sorted sets, or in-memory)
//! - **Tracker** - Session lifecycle: create, heartbeat, remove
//! - **Cache** - Approximate live counts with bounded staleness
//! - **Sweeper** - Eviction of expired entries from the time-scored index
//! - **Schedule** - Start/stop periodic background tasks
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//! │   Request   │────▶│   Tracker   │────▶│    Store    │
//! └─────────────┘     └─────────────┘     └─────────────┘
//!                                           ▲         ▲
//!                            ┌──────────────┘         │
//!                     ┌─────────────┐          ┌─────────────┐
//!                     │ Count Cache │          │   Sweeper   │
//!                     └─────────────┘          └─────────────┘
//! ```
//!
//! Liveness uses a single policy: a score-indexed set per index where the
//! score is the session's last activity in unix seconds. An entry is live
//! while `now - last_seen < ttl`.

pub mod cache;
pub mod clock;
pub mod schedule;
pub mod store;
pub mod sweeper;
pub mod token;
pub mod tracker;

pub use cache::{CacheConfig, CachedCount, CountCache, CountKind};
pub use clock::{Clock, ManualClock, SystemClock};
pub use schedule::{PeriodicTask, Tick};
pub use store::{AuthUpdate, Index, MemoryStore, PresenceStore, RedisStore, StoreError, SweepStats};
pub use sweeper::Sweeper;
pub use token::{SessionToken, TokenGenerator, UuidGenerator, ValidationError, TOKEN_LENGTH};
pub use tracker::{LoginFlagPolicy, PresenceError, PresenceTracker, TrackerConfig};

/// Default session time-to-live (11 minutes).
pub const DEFAULT_TTL: std::time::Duration = std::time::Duration::from_secs(11 * 60);
