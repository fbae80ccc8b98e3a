//! Session lifecycle.
//!
//! The tracker is the request-facing half of the core: it creates sessions,
//! refreshes them on heartbeat and removes them on request. Counting lives
//! in [`CountCache`](crate::CountCache).

use crate::clock::{expiry_cutoff, Clock};
use crate::store::{AuthUpdate, PresenceStore, StoreError};
use crate::token::{SessionToken, TokenGenerator, ValidationError};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

/// Presence errors.
#[derive(Debug, Error)]
pub enum PresenceError {
    /// The client sent a malformed session token.
    #[error("Invalid session: {0}")]
    Validation(#[from] ValidationError),

    /// The backing store failed.
    #[error("Store unavailable: {0}")]
    StoreUnavailable(#[from] StoreError),
}

/// What a heartbeat without a login flag does to an authenticated session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoginFlagPolicy {
    /// Keep the session authenticated and refresh its authenticated entry.
    #[default]
    Retain,
    /// Stop refreshing the authenticated entry; it ages out after one TTL.
    Lapse,
}

impl LoginFlagPolicy {
    fn resolve(self, logged_in: Option<bool>, cutoff: u64) -> AuthUpdate {
        match (logged_in, self) {
            (Some(true), _) => AuthUpdate::Set,
            (Some(false), _) => AuthUpdate::Clear,
            (None, LoginFlagPolicy::Retain) => AuthUpdate::Retain { cutoff },
            (None, LoginFlagPolicy::Lapse) => AuthUpdate::Untouched,
        }
    }
}

/// Tracker configuration.
#[derive(Debug, Clone)]
pub struct TrackerConfig {
    /// How long a session stays live without a heartbeat. A heartbeat that
    /// omits the login flag only keeps a login mark younger than this.
    pub ttl: Duration,
    /// Handling of heartbeats that omit the login flag.
    pub omitted_login_flag: LoginFlagPolicy,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            ttl: crate::DEFAULT_TTL,
            omitted_login_flag: LoginFlagPolicy::default(),
        }
    }
}

/// The presence tracker.
#[derive(Clone)]
pub struct PresenceTracker {
    store: Arc<dyn PresenceStore>,
    clock: Arc<dyn Clock>,
    generator: Arc<dyn TokenGenerator>,
    config: TrackerConfig,
}

impl PresenceTracker {
    /// Create a new tracker.
    #[must_use]
    pub fn new(
        store: Arc<dyn PresenceStore>,
        clock: Arc<dyn Clock>,
        generator: Arc<dyn TokenGenerator>,
        config: TrackerConfig,
    ) -> Self {
        Self {
            store,
            clock,
            generator,
            config,
        }
    }

    /// Get the tracker configuration.
    #[must_use]
    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    /// Start a new session and return its token.
    ///
    /// The session starts unauthenticated. A token whose write failed is
    /// discarded; callers retry the whole operation.
    ///
    /// # Errors
    ///
    /// Returns [`PresenceError::StoreUnavailable`] if the write fails.
    pub async fn create_session(&self) -> Result<SessionToken, PresenceError> {
        let token = self.generator.generate();
        let now = self.clock.now();

        if let Err(e) = self.store.upsert(&token, AuthUpdate::Untouched, now).await {
            warn!(error = %e, "Unable to create new session");
            return Err(e.into());
        }

        debug!(session = %token, "Session created");
        Ok(token)
    }

    /// Record a heartbeat for a client-supplied session token.
    ///
    /// `logged_in` of `Some(true)` marks the session authenticated and
    /// `Some(false)` clears the mark. `None` is resolved through
    /// [`TrackerConfig::omitted_login_flag`] and never marks a session.
    ///
    /// # Errors
    ///
    /// Returns [`PresenceError::Validation`] for a malformed token (the store
    /// is not touched) or [`PresenceError::StoreUnavailable`] if the write
    /// fails.
    pub async fn heartbeat(
        &self,
        session: &str,
        logged_in: Option<bool>,
    ) -> Result<(), PresenceError> {
        let token = SessionToken::parse(session)?;
        let now = self.clock.now();
        let cutoff = expiry_cutoff(now, self.config.ttl);
        let auth = self.config.omitted_login_flag.resolve(logged_in, cutoff);

        if let Err(e) = self.store.upsert(&token, auth, now).await {
            warn!(session = %token, error = %e, "Unable to record heartbeat");
            return Err(e.into());
        }

        debug!(session = %token, ?auth, "Heartbeat");
        Ok(())
    }

    /// Remove a session from both indices.
    ///
    /// A malformed token cannot name a stored session, so it is accepted
    /// without touching the store.
    ///
    /// # Errors
    ///
    /// Returns [`PresenceError::StoreUnavailable`] if the removal fails.
    pub async fn remove_session(&self, session: &str) -> Result<(), PresenceError> {
        let Ok(token) = SessionToken::parse(session) else {
            debug!(len = session.len(), "Ignoring removal of malformed session");
            return Ok(());
        };

        if let Err(e) = self.store.remove(&token).await {
            warn!(session = %token, error = %e, "Unable to remove session");
            return Err(e.into());
        }

        debug!(session = %token, "Session removed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::store::{Index, MemoryStore};
    use crate::token::UuidGenerator;

    const START: u64 = 1_700_000_000;

    fn setup(policy: LoginFlagPolicy) -> (PresenceTracker, Arc<MemoryStore>, Arc<ManualClock>) {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(START));
        let tracker = PresenceTracker::new(
            store.clone(),
            clock.clone(),
            Arc::new(UuidGenerator),
            TrackerConfig {
                ttl: Duration::from_secs(660),
                omitted_login_flag: policy,
            },
        );
        (tracker, store, clock)
    }

    #[tokio::test]
    async fn test_create_session() {
        let (tracker, store, _) = setup(LoginFlagPolicy::Retain);

        let a = tracker.create_session().await.unwrap();
        let b = tracker.create_session().await.unwrap();

        assert_ne!(a, b);
        assert_eq!(a.as_str().len(), crate::TOKEN_LENGTH);
        assert_eq!(store.last_seen(Index::Sessions, a.as_str()), Some(START));
        assert_eq!(store.last_seen(Index::Authenticated, a.as_str()), None);
    }

    #[tokio::test]
    async fn test_create_session_store_down() {
        let (tracker, store, _) = setup(LoginFlagPolicy::Retain);
        store.set_unavailable(true);

        assert!(matches!(
            tracker.create_session().await,
            Err(PresenceError::StoreUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_heartbeat_rejects_malformed() {
        let (tracker, store, _) = setup(LoginFlagPolicy::Retain);

        let malformed = vec![
            String::new(),
            "short".to_string(),
            "a".repeat(35),
            "a".repeat(37),
        ];
        for bad in &malformed {
            assert!(matches!(
                tracker.heartbeat(bad, Some(true)).await,
                Err(PresenceError::Validation(_))
            ));
        }

        assert_eq!(store.indexed(Index::Sessions), 0);
        assert_eq!(store.indexed(Index::Authenticated), 0);
    }

    #[tokio::test]
    async fn test_heartbeat_refreshes() {
        let (tracker, store, clock) = setup(LoginFlagPolicy::Retain);
        let s1 = tracker.create_session().await.unwrap();

        for _ in 0..5 {
            clock.advance(Duration::from_secs(30));
            tracker.heartbeat(s1.as_str(), None).await.unwrap();
        }

        assert_eq!(store.indexed(Index::Sessions), 1);
        assert_eq!(store.last_seen(Index::Sessions, s1.as_str()), Some(START + 150));
    }

    #[tokio::test]
    async fn test_heartbeat_unknown_token_creates() {
        let (tracker, store, _) = setup(LoginFlagPolicy::Retain);
        let token = "123e4567-e89b-12d3-a456-426614174000";

        tracker.heartbeat(token, None).await.unwrap();
        assert_eq!(store.last_seen(Index::Sessions, token), Some(START));
    }

    #[tokio::test]
    async fn test_omitted_flag_retains_authentication() {
        let (tracker, store, clock) = setup(LoginFlagPolicy::Retain);
        let s1 = tracker.create_session().await.unwrap();

        tracker.heartbeat(s1.as_str(), Some(true)).await.unwrap();
        clock.advance(Duration::from_secs(60));
        tracker.heartbeat(s1.as_str(), None).await.unwrap();

        assert_eq!(
            store.last_seen(Index::Authenticated, s1.as_str()),
            Some(START + 60)
        );

        tracker.heartbeat(s1.as_str(), Some(false)).await.unwrap();
        assert_eq!(store.last_seen(Index::Authenticated, s1.as_str()), None);
        assert_eq!(store.last_seen(Index::Sessions, s1.as_str()), Some(START + 60));
    }

    #[tokio::test]
    async fn test_omitted_flag_does_not_revive_expired_login() {
        let (tracker, store, clock) = setup(LoginFlagPolicy::Retain);
        let s1 = tracker.create_session().await.unwrap();
        tracker.heartbeat(s1.as_str(), Some(true)).await.unwrap();

        // Silent for longer than the TTL; nothing has swept yet.
        clock.advance(Duration::from_secs(12 * 60));
        tracker.heartbeat(s1.as_str(), None).await.unwrap();

        assert_eq!(store.last_seen(Index::Authenticated, s1.as_str()), Some(START));
        assert_eq!(
            store.last_seen(Index::Sessions, s1.as_str()),
            Some(START + 12 * 60)
        );
    }

    #[tokio::test]
    async fn test_omitted_flag_lapses() {
        let (tracker, store, clock) = setup(LoginFlagPolicy::Lapse);
        let s1 = tracker.create_session().await.unwrap();

        tracker.heartbeat(s1.as_str(), Some(true)).await.unwrap();
        clock.advance(Duration::from_secs(60));
        tracker.heartbeat(s1.as_str(), None).await.unwrap();

        // Still present, but no longer refreshed.
        assert_eq!(store.last_seen(Index::Authenticated, s1.as_str()), Some(START));
        assert_eq!(store.last_seen(Index::Sessions, s1.as_str()), Some(START + 60));
    }

    #[tokio::test]
    async fn test_remove_session() {
        let (tracker, store, _) = setup(LoginFlagPolicy::Retain);
        let s1 = tracker.create_session().await.unwrap();
        tracker.heartbeat(s1.as_str(), Some(true)).await.unwrap();

        tracker.remove_session(s1.as_str()).await.unwrap();
        tracker.remove_session(s1.as_str()).await.unwrap();

        assert_eq!(store.indexed(Index::Sessions), 0);
        assert_eq!(store.indexed(Index::Authenticated), 0);
    }

    #[tokio::test]
    async fn test_remove_malformed_skips_store() {
        let (tracker, store, _) = setup(LoginFlagPolicy::Retain);
        store.set_unavailable(true);

        // Would fail if it reached the store.
        assert!(tracker.remove_session("nope").await.is_ok());
        assert!(matches!(
            tracker
                .remove_session("123e4567-e89b-12d3-a456-426614174000")
                .await,
            Err(PresenceError::StoreUnavailable(_))
        ));
    }

    #[test]
    fn test_policy_from_config() {
        let policy: LoginFlagPolicy = serde_json::from_str("\"lapse\"").unwrap();
        assert_eq!(policy, LoginFlagPolicy::Lapse);
        assert_eq!(LoginFlagPolicy::default(), LoginFlagPolicy::Retain);
    }
}
