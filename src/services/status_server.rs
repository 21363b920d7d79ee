//! Status HTTP listener.
//!
//! An optional axum server that exposes the poll loop's status so a running
//! bot can be inspected without reading its logs:
//! - `GET /health` answers `ok`
//! - `GET /status` returns [`PollStatus`] as JSON

use crate::error::AppError;
use crate::services::poll_loop::{PollHandle, PollStatus};
use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use std::net::SocketAddr;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Routes served by the status listener.
pub fn status_routes(handle: PollHandle) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/status", get(get_status))
        .with_state(handle)
}

async fn health() -> &'static str {
    "ok"
}

async fn get_status(State(handle): State<PollHandle>) -> Json<PollStatus> {
    Json(handle.status().await)
}

/// Handle to a running status listener.
pub struct StatusServer {
    cancel_token: CancellationToken,
    local_addr: SocketAddr,
    task: JoinHandle<()>,
}

impl StatusServer {
    /// Bind `addr` and serve in the background.
    ///
    /// A bind failure is a configuration error, since the address comes
    /// from the config file.
    pub async fn start(addr: &str, handle: PollHandle) -> Result<Self, AppError> {
        let listener = tokio::net::TcpListener::bind(addr).await.map_err(|e| {
            AppError::config_field(
                format!("Failed to bind status listener on {}: {}", addr, e),
                "robot.status_addr",
            )
        })?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| AppError::internal(format!("Failed to read bound address: {}", e)))?;

        log::info!("[status] Listening on http://{}", local_addr);

        let cancel_token = CancellationToken::new();
        let cancel_clone = cancel_token.clone();
        let app = status_routes(handle);

        let task = tokio::spawn(async move {
            let server = axum::serve(listener, app).with_graceful_shutdown(async move {
                cancel_clone.cancelled().await;
            });

            if let Err(e) = server.await {
                log::error!("[status] Server error: {}", e);
            }

            log::info!("[status] Listener stopped");
        });

        Ok(Self {
            cancel_token,
            local_addr,
            task,
        })
    }

    /// Address actually bound, useful when port 0 was requested.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Shut the listener down and wait for it to finish.
    pub async fn stop(self) {
        self.cancel_token.cancel();
        if let Err(e) = self.task.await {
            log::warn!("[status] Listener task failed: {}", e);
        }
    }
}
