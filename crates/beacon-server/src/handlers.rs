//! HTTP handlers for Beacon server.
//!
//! | Route              | Methods         | Effect                              |
//! |--------------------|-----------------|-------------------------------------|
//! | `/`                | GET, POST       | Create a session, JSON token body   |
//! | `/`                | DELETE          | Remove `session`                    |
//! | `/ping`            | GET, POST       | Heartbeat `session` (+ `logged-in`) |
//! | `/count`           | GET             | Live sessions, JSON integer         |
//! | `/count/logged-in` | GET             | Logged-in live sessions             |
//! | `/health`          | GET             | Liveness of the server itself       |
//!
//! Unknown paths get 404 and unsupported methods 405.

use crate::config::{Config, StoreBackend};
use crate::metrics::{self, RequestTimer};
use anyhow::{Context, Result};
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use beacon_core::{
    CacheConfig, CountCache, CountKind, MemoryStore, PeriodicTask, PresenceError,
    PresenceStore, PresenceTracker, RedisStore, SessionToken, Sweeper, SystemClock,
    TrackerConfig, UuidGenerator,
};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

/// Shared server state.
#[derive(Clone)]
pub struct AppState {
    /// Session lifecycle.
    pub tracker: PresenceTracker,
    /// Cached live counts.
    pub counts: CountCache,
}

/// API errors.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Malformed session token.
    #[error("{0}")]
    BadRequest(String),

    /// The store could not serve the request.
    #[error("{0}")]
    Unavailable(String),
}

impl From<PresenceError> for ApiError {
    fn from(e: PresenceError) -> Self {
        match e {
            PresenceError::Validation(e) => ApiError::BadRequest(e.to_string()),
            PresenceError::StoreUnavailable(e) => ApiError::Unavailable(e.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unavailable(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, self.to_string()).into_response()
    }
}

/// Query parameters for `/` and `/ping`.
///
/// Parsed from raw pairs so a repeated key is not a client error; the
/// first occurrence wins and later ones are ignored.
#[derive(Debug, Default)]
pub struct SessionParams {
    session: Option<String>,
    logged_in: Option<String>,
}

impl SessionParams {
    fn from_pairs(pairs: Vec<(String, String)>) -> Self {
        let mut params = Self::default();
        for (key, value) in pairs {
            let slot = match key.as_str() {
                "session" => &mut params.session,
                "logged-in" => &mut params.logged_in,
                _ => continue,
            };
            if slot.is_none() {
                *slot = Some(value);
            }
        }
        params
    }

    fn session(&self) -> &str {
        self.session.as_deref().unwrap_or("")
    }

    /// `true` and `false` are flags; anything else counts as omitted.
    fn logged_in(&self) -> Option<bool> {
        match self.logged_in.as_deref() {
            Some("true") => Some(true),
            Some("false") => Some(false),
            _ => None,
        }
    }
}

/// Build the HTTP router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route(
            "/",
            get(create_session)
                .post(create_session)
                .delete(remove_session),
        )
        .route("/ping", get(heartbeat).post(heartbeat))
        .route("/count", get(count))
        .route("/count/logged-in", get(count_logged_in))
        .route("/health", get(health_handler))
        .with_state(state)
}

/// Open the configured presence store.
///
/// For Redis this also checks connectivity; failing here is fatal.
async fn open_store(config: &Config) -> Result<Arc<dyn PresenceStore>> {
    match config.store.backend {
        StoreBackend::Redis => {
            let store = RedisStore::connect(&config.store.redis_addr)
                .await
                .with_context(|| {
                    format!("Unable to connect to Redis at {}", config.store.redis_addr)
                })?;
            store
                .ping()
                .await
                .with_context(|| format!("Redis at {} did not answer PING", config.store.redis_addr))?;
            Ok(Arc::new(store))
        }
        StoreBackend::Memory => {
            warn!("Using in-memory store; counts are local to this process");
            Ok(Arc::new(MemoryStore::new()))
        }
    }
}

/// Run the HTTP server.
///
/// # Errors
///
/// Returns an error if the store is unreachable or the server fails to start.
pub async fn run_server(config: Config) -> Result<()> {
    let store = open_store(&config).await?;
    let clock = Arc::new(SystemClock);
    let presence = &config.presence;

    let tracker = PresenceTracker::new(
        store.clone(),
        clock.clone(),
        Arc::new(UuidGenerator),
        TrackerConfig {
            ttl: presence.ttl(),
            omitted_login_flag: presence.omitted_login_flag,
        },
    );
    let counts = CountCache::new(
        store.clone(),
        clock.clone(),
        CacheConfig {
            ttl: presence.ttl(),
            staleness: presence.refresh_interval(),
            ..CacheConfig::default()
        },
    );
    let sweeper = Sweeper::new(store, clock, presence.ttl());

    // Start metrics server if enabled
    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            error!("Failed to start metrics server: {}", e);
        }
    }

    let tasks = [
        PeriodicTask::spawn(Arc::new(counts.clone()), presence.refresh_interval()),
        PeriodicTask::spawn(Arc::new(sweeper), presence.sweep_interval()),
    ];

    let app = router(AppState { tracker, counts });

    // Bind and serve
    let addr = config.bind_addr()?;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Unable to listen on {}", addr))?;

    info!("Beacon server listening on {}", addr);

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    for task in tasks {
        task.stop().await;
    }

    served?;
    info!("Beacon server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Unable to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

/// Health check handler.
async fn health_handler() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Create a session.
async fn create_session(State(state): State<AppState>) -> Result<Json<SessionToken>, ApiError> {
    let _timer = RequestTimer::start("/");

    match state.tracker.create_session().await {
        Ok(token) => {
            metrics::record_session_created();
            Ok(Json(token))
        }
        Err(e) => {
            metrics::record_store_error("create");
            Err(e.into())
        }
    }
}

/// Remove a session.
async fn remove_session(
    State(state): State<AppState>,
    Query(pairs): Query<Vec<(String, String)>>,
) -> Result<StatusCode, ApiError> {
    let _timer = RequestTimer::start("/");
    let params = SessionParams::from_pairs(pairs);

    if let Err(e) = state.tracker.remove_session(params.session()).await {
        metrics::record_store_error("remove");
        return Err(e.into());
    }

    metrics::record_session_removed();
    Ok(StatusCode::OK)
}

/// Record a heartbeat.
async fn heartbeat(
    State(state): State<AppState>,
    Query(pairs): Query<Vec<(String, String)>>,
) -> Result<StatusCode, ApiError> {
    let _timer = RequestTimer::start("/ping");
    let params = SessionParams::from_pairs(pairs);
    let logged_in = params.logged_in();

    match state.tracker.heartbeat(params.session(), logged_in).await {
        Ok(()) => {
            metrics::record_heartbeat(logged_in);
            Ok(StatusCode::OK)
        }
        Err(e) => {
            match &e {
                PresenceError::Validation(_) => metrics::record_rejected(),
                PresenceError::StoreUnavailable(_) => metrics::record_store_error("heartbeat"),
            }
            Err(e.into())
        }
    }
}

/// Live session count.
async fn count(State(state): State<AppState>) -> Json<u64> {
    let _timer = RequestTimer::start("/count");
    let value = state.counts.count(CountKind::Total).await;
    metrics::set_live_sessions(value);
    Json(value)
}

/// Logged-in live session count.
async fn count_logged_in(State(state): State<AppState>) -> Json<u64> {
    let _timer = RequestTimer::start("/count/logged-in");
    let value = state.counts.count(CountKind::Authenticated).await;
    metrics::set_live_authenticated(value);
    Json(value)
}
