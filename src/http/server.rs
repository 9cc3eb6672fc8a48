//! HTTP server implementation.

use std::net::SocketAddr;

use axum::routing::get;
use axum::{Json, Router};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tracing::{error, info};

use super::middleware::{protect, RateLimitState};
use crate::error::{Result, SluiceError};
use crate::ratelimit::{MemoryWindowStore, WindowStore};

/// HTTP server that rate limits an application router.
pub struct HttpServer<S: WindowStore + 'static = MemoryWindowStore> {
    /// Address to bind to
    addr: SocketAddr,
    /// Middleware state shared by every request
    state: RateLimitState<S>,
    /// Routes served behind the limiter
    app: Router,
}

impl<S: WindowStore + 'static> HttpServer<S> {
    /// Create a server protecting the default application routes.
    pub fn new(addr: SocketAddr, state: RateLimitState<S>) -> Self {
        Self {
            addr,
            state,
            app: default_app(),
        }
    }

    /// Replace the routes served behind the limiter.
    pub fn with_app(mut self, app: Router) -> Self {
        self.app = app;
        self
    }

    /// Build the full router: `/health` unthrottled, everything else limited.
    pub fn router(&self) -> Router {
        Router::new()
            .route("/health", get(health))
            .merge(protect(self.app.clone(), self.state.clone()))
    }

    /// Start the HTTP server.
    ///
    /// This method will block until the server is shut down.
    pub async fn serve(self) -> Result<()> {
        self.serve_with_shutdown(std::future::pending()).await
    }

    /// Start the HTTP server with graceful shutdown.
    ///
    /// The server will shut down when the provided signal resolves.
    pub async fn serve_with_shutdown<F>(self, signal: F) -> Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind(self.addr).await?;
        let local_addr = listener.local_addr()?;
        let policy = *self.state.decider().policy();

        info!(
            addr = %local_addr,
            limit = policy.limit(),
            window = ?policy.window(),
            "Starting HTTP server with rate limiting"
        );

        let app = self.router();
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(signal)
        .await
        .map_err(|e| {
            error!(error = %e, "HTTP server failed");
            SluiceError::Server(e.to_string())
        })
    }
}

fn default_app() -> Router {
    Router::new().route("/", get(index))
}

async fn index() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "healthy" }))
}
