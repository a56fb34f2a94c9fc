//! Shutdown coordination and small parsing helpers.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use rust_decimal::Decimal;
use serde_json::Value;
use tokio::sync::watch;
use tracing::{info, warn};

/// Cloneable graceful-shutdown flag.
///
/// Triggering is sticky: once requested it stays requested, and every
/// waiter (current or future) observes it.
#[derive(Debug, Clone)]
pub struct Shutdown {
    tx: Arc<watch::Sender<bool>>,
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

impl Shutdown {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Request a graceful stop.
    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_requested(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolve once shutdown has been requested.
    pub async fn wait(&self) {
        let mut rx = self.tx.subscribe();
        // Err only if the sender is gone, which cannot happen while `self` holds it.
        let _ = rx.wait_for(|requested| *requested).await;
    }

    /// Sleep for `duration`, returning early (with `false`) on shutdown.
    pub async fn sleep(&self, duration: Duration) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(duration) => true,
            _ = self.wait() => false,
        }
    }
}

/// Install the Ctrl+C handler.
///
/// The first signal requests a graceful stop so the in-flight cycle can
/// finish; a second one terminates the process immediately.
pub fn install_signal_handlers(shutdown: Shutdown) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_err() {
            warn!("Failed to listen for Ctrl+C; graceful shutdown unavailable");
            return;
        }
        info!("Shutdown requested, finishing current cycle (Ctrl+C again to force)");
        shutdown.trigger();

        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Second interrupt received, exiting immediately");
            std::process::exit(130);
        }
    });
}

/// Future suitable for `axum::serve(..).with_graceful_shutdown`.
pub async fn shutdown_signal(shutdown: Shutdown) {
    shutdown.wait().await;
}

/// Read a decimal from a JSON number or numeric string without going through f64.
pub fn decimal_from_json(value: &Value) -> Option<Decimal> {
    match value {
        Value::String(s) => parse_decimal(s),
        Value::Number(n) => parse_decimal(&n.to_string()),
        _ => None,
    }
}

/// Parse a decimal string, accepting scientific notation.
pub fn parse_decimal(raw: &str) -> Option<Decimal> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    Decimal::from_str(raw)
        .or_else(|_| Decimal::from_scientific(raw))
        .ok()
}
