//! HTTP adaptation layer: axum middleware and server.

mod middleware;
mod server;

pub use middleware::{
    protect, rate_limit, RateLimitState, X_RATE_LIMIT_LIMIT, X_RATE_LIMIT_REMAINING,
    X_RATE_LIMIT_RESET,
};
pub use server::HttpServer;
