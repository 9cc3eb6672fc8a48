//! Axum middleware that applies the rate decider to every request.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{ConnectInfo, Request, State};
use axum::http::header::RETRY_AFTER;
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::{Json, Router};
use chrono::SecondsFormat;
use serde_json::json;
use tracing::{debug, error, field, instrument, warn, Span};

use crate::config::FailureMode;
use crate::ratelimit::{ClientIdentity, Decision, MemoryWindowStore, RateDecider, WindowStore};

/// Policy limit for the client.
pub const X_RATE_LIMIT_LIMIT: HeaderName = HeaderName::from_static("x-rate-limit-limit");
/// Attempts left in the current window.
pub const X_RATE_LIMIT_REMAINING: HeaderName = HeaderName::from_static("x-rate-limit-remaining");
/// RFC 3339 time at which the window resets.
pub const X_RATE_LIMIT_RESET: HeaderName = HeaderName::from_static("x-rate-limit-reset");

/// Shared state for the rate limit middleware.
pub struct RateLimitState<S: WindowStore = MemoryWindowStore> {
    decider: Arc<RateDecider<S>>,
    failure_mode: FailureMode,
}

impl<S: WindowStore> RateLimitState<S> {
    /// Create middleware state around a shared decider.
    pub fn new(decider: Arc<RateDecider<S>>, failure_mode: FailureMode) -> Self {
        Self {
            decider,
            failure_mode,
        }
    }

    /// The decider consulted for every request.
    pub fn decider(&self) -> &Arc<RateDecider<S>> {
        &self.decider
    }
}

impl<S: WindowStore> Clone for RateLimitState<S> {
    fn clone(&self) -> Self {
        Self {
            decider: self.decider.clone(),
            failure_mode: self.failure_mode,
        }
    }
}

/// Wrap every route of `router` with the rate limiter.
pub fn protect<S>(router: Router, state: RateLimitState<S>) -> Router
where
    S: WindowStore + 'static,
{
    router.layer(axum::middleware::from_fn_with_state(state, rate_limit::<S>))
}

/// Rate limit one request by the peer's IP address.
///
/// Allowed and denied responses both carry the `X-Rate-Limit-*` headers.
/// Denied requests get `429 Too Many Requests` with `Retry-After`. A store
/// failure is handled according to the configured [`FailureMode`].
#[instrument(skip_all, fields(identity = field::Empty))]
pub async fn rate_limit<S>(
    State(state): State<RateLimitState<S>>,
    request: Request,
    next: Next,
) -> Response
where
    S: WindowStore + 'static,
{
    let Some(addr) = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr)
    else {
        error!("Request carries no peer address; serve with connect info enabled");
        return error_response(StatusCode::INTERNAL_SERVER_ERROR, "unable to identify client");
    };

    let identity = ClientIdentity::from_socket_addr(&addr);
    Span::current().record("identity", field::display(&identity));
    debug!("Rate limit middleware started");

    let decision = match state.decider.evaluate(&identity).await {
        Ok(decision) => decision,
        Err(e) => match state.failure_mode {
            FailureMode::Closed => {
                error!(error = %e, "Window store failed, rejecting request");
                return error_response(StatusCode::INTERNAL_SERVER_ERROR, "internal server error");
            }
            FailureMode::Open => {
                warn!(error = %e, "Window store failed, letting request through");
                return next.run(request).await;
            }
        },
    };

    if !decision.allowed {
        let retry_after = decision.retry_after(state.decider.now());
        // Round up so clients never retry a moment too early.
        let secs = retry_after.as_secs() + u64::from(retry_after.subsec_nanos() > 0);

        debug!(retry_after_secs = secs, "Rejecting request over the rate limit");

        let mut response = error_response(
            StatusCode::TOO_MANY_REQUESTS,
            &format!("rate limit exceeded. Try again in {} seconds", secs),
        );
        annotate(response.headers_mut(), &decision);
        response.headers_mut().insert(RETRY_AFTER, HeaderValue::from(secs));
        return response;
    }

    let mut response = next.run(request).await;
    annotate(response.headers_mut(), &decision);
    response
}

fn annotate(headers: &mut HeaderMap, decision: &Decision) {
    headers.insert(X_RATE_LIMIT_LIMIT, HeaderValue::from(decision.limit));
    headers.insert(
        X_RATE_LIMIT_REMAINING,
        HeaderValue::from(decision.remaining),
    );
    let reset = decision.reset_at.to_rfc3339_opts(SecondsFormat::Secs, true);
    if let Ok(value) = HeaderValue::from_str(&reset) {
        headers.insert(X_RATE_LIMIT_RESET, value);
    }
}

fn error_response(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "error": message }))).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::testing::UnreachableStore;
    use crate::ratelimit::{ManualClock, Policy};
    use axum::body::Body;
    use axum::routing::get;
    use std::time::Duration;
    use tower::ServiceExt;

    fn app<S: WindowStore + 'static>(store: S, limit: u64, mode: FailureMode) -> Router {
        let policy = Policy::new(limit, Duration::from_secs(60)).unwrap();
        let decider = RateDecider::with_store(policy, store, Arc::new(ManualClock::default()));
        let state = RateLimitState::new(Arc::new(decider), mode);
        protect(Router::new().route("/", get(|| async { "ok" })), state)
    }

    fn request_from(peer: &str) -> Request {
        let addr: SocketAddr = peer.parse().unwrap();
        axum::http::Request::builder()
            .uri("/")
            .extension(ConnectInfo(addr))
            .body(Body::empty())
            .unwrap()
    }

    fn header<'a>(response: &'a Response, name: &HeaderName) -> &'a str {
        response.headers().get(name).unwrap().to_str().unwrap()
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_allowed_request_is_annotated() {
        let app = app(MemoryWindowStore::new(), 2, FailureMode::Closed);

        let response = app.oneshot(request_from("10.0.0.1:4000")).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(header(&response, &X_RATE_LIMIT_LIMIT), "2");
        assert_eq!(header(&response, &X_RATE_LIMIT_REMAINING), "1");
        assert_eq!(header(&response, &X_RATE_LIMIT_RESET), "1970-01-01T00:01:00Z");
    }

    #[tokio::test]
    async fn test_over_limit_request_is_rejected() {
        let app = app(MemoryWindowStore::new(), 2, FailureMode::Closed);

        for port in [4000, 4001] {
            let addr = format!("10.0.0.1:{}", port);
            let response = app.clone().oneshot(request_from(&addr)).await.unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }

        let response = app.oneshot(request_from("10.0.0.1:4002")).await.unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(header(&response, &X_RATE_LIMIT_REMAINING), "0");
        assert_eq!(header(&response, &RETRY_AFTER), "60");

        let body = body_json(response).await;
        assert_eq!(body["error"], "rate limit exceeded. Try again in 60 seconds");
    }

    #[tokio::test]
    async fn test_clients_are_limited_independently() {
        let app = app(MemoryWindowStore::new(), 1, FailureMode::Closed);

        let first = app.clone().oneshot(request_from("10.0.0.1:4000")).await.unwrap();
        let blocked = app.clone().oneshot(request_from("10.0.0.1:4000")).await.unwrap();
        let other = app.oneshot(request_from("10.0.0.2:4000")).await.unwrap();

        assert_eq!(first.status(), StatusCode::OK);
        assert_eq!(blocked.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(other.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_missing_peer_address_is_server_error() {
        let app = app(MemoryWindowStore::new(), 1, FailureMode::Closed);
        let request = axum::http::Request::builder()
            .uri("/")
            .body(Body::empty())
            .unwrap();

        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn test_storage_failure_fails_closed() {
        let app = app(UnreachableStore, 5, FailureMode::Closed);

        let response = app.oneshot(request_from("10.0.0.1:4000")).await.unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(response.headers().get(&X_RATE_LIMIT_LIMIT).is_none());
    }

    #[tokio::test]
    async fn test_storage_failure_fails_open_when_configured() {
        let app = app(UnreachableStore, 5, FailureMode::Open);

        let response = app.oneshot(request_from("10.0.0.1:4000")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().get(&X_RATE_LIMIT_LIMIT).is_none());
    }
}
