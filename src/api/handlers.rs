//! HTTP API handlers.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde::Serialize;
use tokio::sync::RwLock;

/// Live view of the scheduler, shared with handlers.
///
/// The scheduler is the only writer; handlers only read.
#[derive(Debug, Clone)]
pub struct StatusBoard {
    inner: Arc<BoardInner>,
}

#[derive(Debug)]
struct BoardInner {
    ready: AtomicBool,
    dry_run: bool,
    drive: &'static str,
    market_slug: RwLock<Option<String>>,
    scans: AtomicU64,
    opportunities: AtomicU64,
    trades: AtomicU64,
    stranded: AtomicU64,
    finalized: AtomicU64,
}

impl StatusBoard {
    pub fn new(dry_run: bool, drive: &'static str) -> Self {
        Self {
            inner: Arc::new(BoardInner {
                ready: AtomicBool::new(false),
                dry_run,
                drive,
                market_slug: RwLock::new(None),
                scans: AtomicU64::new(0),
                opportunities: AtomicU64::new(0),
                trades: AtomicU64::new(0),
                stranded: AtomicU64::new(0),
                finalized: AtomicU64::new(0),
            }),
        }
    }

    pub fn set_ready(&self, ready: bool) {
        self.inner.ready.store(ready, Ordering::SeqCst);
    }

    pub fn is_ready(&self) -> bool {
        self.inner.ready.load(Ordering::SeqCst)
    }

    /// Publish the active instance and mark the service ready.
    pub async fn set_market(&self, slug: Option<String>) {
        self.set_ready(slug.is_some());
        *self.inner.market_slug.write().await = slug;
    }

    pub async fn market(&self) -> Option<String> {
        self.inner.market_slug.read().await.clone()
    }

    pub fn inc_scans(&self) {
        self.inner.scans.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_opportunities(&self) {
        self.inner.opportunities.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_trades(&self) {
        self.inner.trades.fetch_add(1, Ordering::Relaxed);
    }

    /// Legs that could not be unwound.
    pub fn add_stranded(&self, legs: u64) {
        self.inner.stranded.fetch_add(legs, Ordering::Relaxed);
    }

    pub fn inc_finalized(&self) {
        self.inner.finalized.fetch_add(1, Ordering::Relaxed);
    }

    pub fn counters(&self) -> StatusCounters {
        StatusCounters {
            scans: self.inner.scans.load(Ordering::Relaxed),
            opportunities: self.inner.opportunities.load(Ordering::Relaxed),
            trades: self.inner.trades.load(Ordering::Relaxed),
            stranded_legs: self.inner.stranded.load(Ordering::Relaxed),
            finalized_instances: self.inner.finalized.load(Ordering::Relaxed),
        }
    }
}

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}

/// Readiness check response.
#[derive(Debug, Serialize)]
pub struct ReadyResponse {
    pub ready: bool,
    /// Active market slug, if any.
    pub market: Option<String>,
}

/// Cumulative scheduler counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StatusCounters {
    pub scans: u64,
    pub opportunities: u64,
    pub trades: u64,
    pub stranded_legs: u64,
    pub finalized_instances: u64,
}

/// Status response.
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub status: &'static str,
    pub mode: &'static str,
    pub drive: &'static str,
    pub market: Option<String>,
    pub counters: StatusCounters,
}

/// Health check handler - always returns 200.
pub async fn health() -> impl IntoResponse {
    Json(HealthResponse { status: "ok" })
}

/// Readiness check handler - returns 200 while a market is active, 503 otherwise.
pub async fn ready(State(board): State<StatusBoard>) -> impl IntoResponse {
    let response = ReadyResponse {
        ready: board.is_ready(),
        market: board.market().await,
    };

    if response.ready {
        (StatusCode::OK, Json(response))
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, Json(response))
    }
}

/// Status handler - returns scheduler state and counters.
pub async fn status(State(board): State<StatusBoard>) -> impl IntoResponse {
    Json(StatusResponse {
        status: if board.is_ready() { "running" } else { "waiting" },
        mode: if board.inner.dry_run { "dry-run" } else { "live" },
        drive: board.inner.drive,
        market: board.market().await,
        counters: board.counters(),
    })
}
