//! Redis-backed presence store.
//!
//! Each index is a sorted set: member = token, score = last activity in
//! unix seconds. Writes that touch both sets go through a `MULTI`/`EXEC`
//! pipeline (or a script, which Redis also runs atomically) so the
//! authenticated set never holds a token the base set has not seen.

use super::{AuthUpdate, Index, PresenceStore, StoreError, SweepStats};
use crate::token::SessionToken;
use ::redis::aio::ConnectionManager;
use ::redis::AsyncCommands;
use async_trait::async_trait;
use tracing::{debug, info};

/// Refresh the base entry, and the login entry only while it is still live.
///
/// KEYS: base set, authenticated set. ARGV: timestamp, token, cutoff.
const RETAIN_SCRIPT: &str = r#"
    redis.call('ZADD', KEYS[1], ARGV[1], ARGV[2])
    local score = redis.call('ZSCORE', KEYS[2], ARGV[2])
    if score and tonumber(score) > tonumber(ARGV[3]) then
        redis.call('ZADD', KEYS[2], ARGV[1], ARGV[2])
        return 1
    end
    return 0
"#;

/// Redis presence store.
///
/// Holds a [`ConnectionManager`], which multiplexes requests over one
/// connection and reconnects after failures. Cloning is cheap.
#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
    retain: ::redis::Script,
}

impl RedisStore {
    /// Connect to Redis.
    ///
    /// Accepts a full `redis://` URL or a bare `host:port`.
    ///
    /// # Errors
    ///
    /// Returns an error if the address is invalid or the first connection
    /// cannot be established.
    pub async fn connect(addr: &str) -> Result<Self, StoreError> {
        let url = normalize_addr(addr);
        let client = ::redis::Client::open(url.as_str())?;
        let conn = client.get_connection_manager().await?;

        info!(url = %url, "Connected to Redis");
        Ok(Self {
            conn,
            retain: ::redis::Script::new(RETAIN_SCRIPT),
        })
    }
}

/// Turn a bare `host:port` into a `redis://` URL.
#[must_use]
pub fn normalize_addr(addr: &str) -> String {
    if addr.contains("://") {
        addr.to_string()
    } else {
        format!("redis://{}", addr)
    }
}

/// Exclusive lower bound for a live range query.
fn exclusive(cutoff: u64) -> String {
    format!("({}", cutoff)
}

#[async_trait]
impl PresenceStore for RedisStore {
    async fn ping(&self) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let _: String = ::redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }

    async fn upsert(
        &self,
        token: &SessionToken,
        auth: AuthUpdate,
        at: u64,
    ) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let sessions = Index::Sessions.key();
        let authenticated = Index::Authenticated.key();

        if let AuthUpdate::Retain { cutoff } = auth {
            let refreshed: i64 = self
                .retain
                .key(sessions)
                .key(authenticated)
                .arg(at)
                .arg(token.as_str())
                .arg(cutoff)
                .invoke_async(&mut conn)
                .await?;
            debug!(session = %token, refreshed, "Redis retain");
            return Ok(());
        }

        let mut pipe = ::redis::pipe();
        pipe.atomic();
        pipe.zadd(sessions, token.as_str(), at).ignore();

        match auth {
            AuthUpdate::Set => {
                pipe.zadd(authenticated, token.as_str(), at).ignore();
            }
            AuthUpdate::Clear => {
                pipe.zrem(authenticated, token.as_str()).ignore();
            }
            AuthUpdate::Retain { .. } | AuthUpdate::Untouched => {}
        }

        let _: () = pipe.query_async(&mut conn).await?;
        Ok(())
    }

    async fn remove(&self, token: &SessionToken) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();

        let _: () = ::redis::pipe()
            .atomic()
            .zrem(Index::Authenticated.key(), token.as_str())
            .ignore()
            .zrem(Index::Sessions.key(), token.as_str())
            .ignore()
            .query_async(&mut conn)
            .await?;

        Ok(())
    }

    async fn count_live(&self, index: Index, cutoff: u64) -> Result<u64, StoreError> {
        let mut conn = self.conn.clone();
        let count: u64 = conn.zcount(index.key(), exclusive(cutoff), "+inf").await?;
        Ok(count)
    }

    async fn sweep(&self, cutoff: u64) -> Result<SweepStats, StoreError> {
        let mut conn = self.conn.clone();

        // ZREMRANGEBYSCORE compares scores server-side at execution time, so
        // entries refreshed since the caller read the clock survive.
        // Authenticated first, so a swept base entry never leaves its login
        // entry behind.
        let (authenticated, sessions): (u64, u64) = ::redis::pipe()
            .zrembyscore(Index::Authenticated.key(), "-inf", cutoff)
            .zrembyscore(Index::Sessions.key(), "-inf", cutoff)
            .query_async(&mut conn)
            .await?;

        debug!(cutoff, sessions, authenticated, "Redis sweep");
        Ok(SweepStats {
            sessions,
            authenticated,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_addr() {
        assert_eq!(normalize_addr("127.0.0.1:6379"), "redis://127.0.0.1:6379");
        assert_eq!(
            normalize_addr("redis://cache.local:6380/2"),
            "redis://cache.local:6380/2"
        );
        assert_eq!(normalize_addr("rediss://secure:6379"), "rediss://secure:6379");
    }

    #[test]
    fn test_exclusive_bound() {
        assert_eq!(exclusive(340), "(340");
    }

    // These tests need a Redis instance on localhost and write to the
    // `session` / `loggedin` keys.

    fn token(n: u8) -> SessionToken {
        SessionToken::parse(format!("ffffffff-0000-0000-0000-0000000000{:02}", n)).unwrap()
    }

    #[tokio::test]
    #[ignore] // Remove this to run with a local Redis instance
    async fn test_redis_lifecycle() {
        let store = RedisStore::connect("127.0.0.1:6379")
            .await
            .expect("Failed to connect to Redis");
        store.ping().await.unwrap();

        let s1 = token(1);
        let s2 = token(2);
        store.remove(&s1).await.unwrap();
        store.remove(&s2).await.unwrap();

        // Far-future scores keep unrelated data out of the counts.
        let base = 4_000_000_000;
        store.upsert(&s1, AuthUpdate::Set, base).await.unwrap();
        store.upsert(&s2, AuthUpdate::Untouched, base + 1).await.unwrap();
        store
            .upsert(&s2, AuthUpdate::Retain { cutoff: base - 1 }, base + 2)
            .await
            .unwrap();

        assert_eq!(store.count_live(Index::Sessions, base - 1).await.unwrap(), 2);
        assert_eq!(store.count_live(Index::Authenticated, base - 1).await.unwrap(), 1);

        store.upsert(&s1, AuthUpdate::Clear, base + 3).await.unwrap();
        assert_eq!(store.count_live(Index::Authenticated, base - 1).await.unwrap(), 0);

        store.remove(&s1).await.unwrap();
        store.remove(&s2).await.unwrap();
        assert_eq!(store.count_live(Index::Sessions, base - 1).await.unwrap(), 0);
    }

    #[tokio::test]
    #[ignore] // Remove this to run with a local Redis instance
    async fn test_redis_retain_skips_expired_login() {
        let store = RedisStore::connect("127.0.0.1:6379")
            .await
            .expect("Failed to connect to Redis");

        let s4 = token(4);
        store.remove(&s4).await.unwrap();

        let base = 4_100_000_000;
        store.upsert(&s4, AuthUpdate::Set, base).await.unwrap();

        // Login entry at `base` is expired under cutoff `base`; not refreshed.
        store
            .upsert(&s4, AuthUpdate::Retain { cutoff: base }, base + 700)
            .await
            .unwrap();
        assert_eq!(store.count_live(Index::Authenticated, base).await.unwrap(), 0);
        assert_eq!(store.count_live(Index::Sessions, base).await.unwrap(), 1);

        // Live under an earlier cutoff: refreshed.
        store
            .upsert(&s4, AuthUpdate::Retain { cutoff: base - 1 }, base + 701)
            .await
            .unwrap();
        assert_eq!(store.count_live(Index::Authenticated, base).await.unwrap(), 1);

        store.remove(&s4).await.unwrap();
    }

    #[tokio::test]
    #[ignore] // Remove this to run with a local Redis instance
    async fn test_redis_sweep() {
        let store = RedisStore::connect("redis://127.0.0.1/")
            .await
            .expect("Failed to connect to Redis");

        let s3 = token(3);
        // Score 1 is expired under any real cutoff.
        store.upsert(&s3, AuthUpdate::Set, 1).await.unwrap();

        let stats = store.sweep(1).await.unwrap();
        assert!(stats.sessions >= 1);
        assert!(stats.authenticated >= 1);
        assert_eq!(store.sweep(1).await.unwrap().total(), 0);
    }
}
