//! Health Check Server - Liveness, Readiness and Pair Status
//!
//! Exposes via axum 0.7:
//! - `/live`: 200 while the process runs
//! - `/ready`: 200 unless shutting down or some pair is stale
//! - `/status`: JSON snapshot of every pair and its sources
//!
//! A pair is stale when its last accepted price or its last committed
//! round is older than `health.stale_after_seconds`.

use std::sync::Arc;
use std::time::Duration;

use axum::Json;
use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use chrono::Utc;
use serde::Serialize;
use tokio::sync::{broadcast, watch};
use tracing::{info, instrument};

use crate::usecases::status::{PairSnapshot, StatusBoard};

/// State shared by the probe handlers.
#[derive(Debug, Clone)]
pub struct HealthState {
    /// False once shutdown has begun.
    running: watch::Receiver<bool>,
    board: StatusBoard,
    stale_after: Duration,
}

/// Body of `/ready` when not ready.
#[derive(Debug, Serialize)]
struct NotReady {
    shutting_down: bool,
    stale_pairs: Vec<String>,
}

impl HealthState {
    pub fn new(running: watch::Receiver<bool>, board: StatusBoard, stale_after: Duration) -> Self {
        Self {
            running,
            board,
            stale_after,
        }
    }

    /// Stale pairs at the current time.
    pub fn stale_pairs(&self) -> Vec<String> {
        self.board.stale_pairs(Utc::now(), self.stale_after)
    }

    pub fn is_running(&self) -> bool {
        *self.running.borrow()
    }

    pub fn is_ready(&self) -> bool {
        self.is_running() && self.stale_pairs().is_empty()
    }

    pub fn snapshots(&self) -> Vec<PairSnapshot> {
        self.board.snapshots()
    }
}

/// Axum-based health check HTTP server.
pub struct HealthServer {
    state: Arc<HealthState>,
    bind_address: String,
}

impl HealthServer {
    pub fn new(state: HealthState, bind_address: impl Into<String>) -> Self {
        Self {
            state: Arc::new(state),
            bind_address: bind_address.into(),
        }
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route("/live", get(Self::liveness))
            .route("/ready", get(Self::readiness))
            .route("/status", get(Self::status))
            .with_state(Arc::clone(&self.state))
    }

    /// Serve until shutdown is broadcast.
    #[instrument(skip(self, shutdown_rx), fields(address = %self.bind_address))]
    pub async fn run(self, mut shutdown_rx: broadcast::Receiver<()>) -> anyhow::Result<()> {
        let app = self.router();
        let listener = tokio::net::TcpListener::bind(&self.bind_address).await?;

        info!(address = %self.bind_address, "Health server started");

        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.recv().await;
            })
            .await?;

        Ok(())
    }

    async fn liveness() -> impl IntoResponse {
        (StatusCode::OK, "OK")
    }

    async fn readiness(State(state): State<Arc<HealthState>>) -> impl IntoResponse {
        let shutting_down = !state.is_running();
        let stale_pairs = state.stale_pairs();
        if !shutting_down && stale_pairs.is_empty() {
            (StatusCode::OK, "READY").into_response()
        } else {
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(NotReady {
                    shutting_down,
                    stale_pairs,
                }),
            )
                .into_response()
        }
    }

    async fn status(State(state): State<Arc<HealthState>>) -> impl IntoResponse {
        Json(state.snapshots())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    fn board_with(snapshot: PairSnapshot) -> (StatusBoard, watch::Sender<PairSnapshot>) {
        let (tx, rx) = watch::channel(snapshot.clone());
        let mut board = StatusBoard::new();
        board.insert(snapshot.pair, rx);
        (board, tx)
    }

    #[test]
    fn test_ready_until_shutdown() {
        let (running_tx, running_rx) = watch::channel(true);
        let (board, _tx) = board_with(PairSnapshot::new("rose/usd".into(), Utc::now()));
        let state = HealthState::new(running_rx, board, Duration::from_secs(900));

        assert!(state.is_ready());
        running_tx.send(false).unwrap();
        assert!(!state.is_ready());
    }

    #[test]
    fn test_stale_pair_blocks_readiness() {
        let (_running_tx, running_rx) = watch::channel(true);
        let started = Utc::now() - ChronoDuration::seconds(2_000);
        let (board, _tx) = board_with(PairSnapshot::new("btc/usd".into(), started));
        let state = HealthState::new(running_rx, board, Duration::from_secs(900));

        assert_eq!(state.stale_pairs(), vec!["btc/usd".to_string()]);
        assert!(!state.is_ready());
    }

    #[test]
    fn test_status_lists_pairs() {
        let (_running_tx, running_rx) = watch::channel(true);
        let (board, tx) = board_with(PairSnapshot::new("eth/usd".into(), Utc::now()));
        let state = HealthState::new(running_rx, board, Duration::from_secs(900));

        tx.send_modify(|s| s.last_round_id = 7);
        let snapshots = state.snapshots();
        assert_eq!(snapshots.len(), 1);
        assert_eq!(snapshots[0].last_round_id, 7);
    }
}
