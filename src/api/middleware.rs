// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Cross-cutting request middleware: deadlines, rate limiting, tracing
//! spans and the panic boundary.

use std::any::Any;
use std::convert::Infallible;
use std::time::Instant;

use axum::{
    body::Body,
    extract::{FromRequestParts, Request, State},
    http::{header::RETRY_AFTER, request::Parts, HeaderValue, Response as HttpResponse},
    middleware::Next,
    response::{IntoResponse, Response},
};
use tracing::Span;

use super::context::client_ip;
use crate::auth::Principal;
use crate::error::ApiError;
use crate::rate_limit::retry_after_secs;
use crate::state::AppState;
use crate::storage::CommitGate;

type HttpRequest<B> = axum::http::Request<B>;

/// Deadline and commit gate of the current request.
///
/// Handlers pass both to `TransactionManager::run_async`: the deadline stops
/// late work from starting or committing, and the gate is closed when the
/// request is answered with 504 or dropped, so a write never lands after
/// the client was told it failed.
#[derive(Debug, Clone, Default)]
pub struct RequestDeadline {
    pub at: Option<Instant>,
    pub gate: CommitGate,
}

impl<S: Send + Sync> FromRequestParts<S> for RequestDeadline {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(parts
            .extensions
            .get::<RequestDeadline>()
            .cloned()
            .unwrap_or_default())
    }
}

/// Bound the whole downstream stack by `state.request_timeout`.
///
/// When the timer fires while a transaction is committing, the commit's
/// outcome is awaited and returned instead of a 504.
pub async fn enforce_deadline(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    let timeout = state.request_timeout;
    let gate = CommitGate::new();
    request.extensions_mut().insert(RequestDeadline {
        at: Some(Instant::now() + timeout),
        gate: gate.clone(),
    });

    let response = next.run(request);
    tokio::pin!(response);

    tokio::select! {
        response = &mut response => response,
        _ = tokio::time::sleep(timeout) => {
            if gate.close() {
                tracing::warn!(timeout_ms = timeout.as_millis() as u64, "Request deadline exceeded");
                ApiError::deadline_exceeded().into_response()
            } else {
                tracing::debug!("Deadline reached during commit; awaiting its outcome");
                response.await
            }
        }
    }
}

fn rate_limit_key(state: &AppState, request: &Request) -> String {
    match request.extensions().get::<Principal>() {
        Some(principal) => format!("user:{}", principal.user_id),
        None => {
            let peer = request
                .extensions()
                .get::<axum::extract::ConnectInfo<std::net::SocketAddr>>()
                .map(|c| c.0);
            format!(
                "ip:{}",
                client_ip(request.headers(), peer, &state.trusted_proxies)
            )
        }
    }
}

/// Per-caller rate limit. Must run after authentication so principals are
/// keyed by user rather than by address.
pub async fn rate_limit(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let key = rate_limit_key(&state, &request);
    let wait = match state.rate_limiter.check(&key) {
        Ok(()) => return next.run(request).await,
        Err(wait) => wait,
    };

    let retry_after = retry_after_secs(wait);
    tracing::warn!(key = %key, retry_after, "Rate limit exceeded");

    let mut response = ApiError::too_many_requests().into_response();
    if let Ok(value) = HeaderValue::from_str(&retry_after.to_string()) {
        response.headers_mut().insert(RETRY_AFTER, value);
    }
    response
}

/// Span for `TraceLayer`, carrying the correlation id set by `SetRequestIdLayer`.
pub fn make_request_span(request: &HttpRequest<Body>) -> Span {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("-");

    tracing::info_span!(
        "http_request",
        method = %request.method(),
        path = %request.uri().path(),
        request_id = %request_id,
    )
}

/// Turn a handler panic into a generic 500.
pub fn handle_panic(err: Box<dyn Any + Send + 'static>) -> HttpResponse<Body> {
    let detail = if let Some(s) = err.downcast_ref::<String>() {
        s.as_str()
    } else if let Some(s) = err.downcast_ref::<&str>() {
        *s
    } else {
        "unknown panic"
    };
    tracing::error!(panic = %detail, "Handler panicked");

    ApiError::new(
        axum::http::StatusCode::INTERNAL_SERVER_ERROR,
        "Internal server error",
    )
    .into_response()
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use std::net::{IpAddr, SocketAddr};

    use super::*;
    use crate::api::test_support::test_state;
    use crate::rate_limit::RateLimiter;
    use axum::{
        extract::ConnectInfo, http::StatusCode, middleware::from_fn_with_state, routing::get,
        Router,
    };
    use redb::TableDefinition;
    use tower::ServiceExt;

    const SCRATCH: TableDefinition<&str, u64> = TableDefinition::new("scratch");

    fn get_root() -> HttpRequest<Body> {
        HttpRequest::builder().uri("/").body(Body::empty()).unwrap()
    }

    fn from_peer(peer: &str, forwarded_for: &str) -> HttpRequest<Body> {
        let peer: SocketAddr = peer.parse().unwrap();
        HttpRequest::builder()
            .uri("/")
            .header("x-forwarded-for", forwarded_for)
            .extension(ConnectInfo(peer))
            .body(Body::empty())
            .unwrap()
    }

    #[tokio::test]
    async fn slow_handlers_get_504() {
        let (state, _dir) = test_state();
        let state = state.with_request_timeout(Duration::from_millis(20));
        let app = Router::new()
            .route(
                "/",
                get(|| async {
                    tokio::time::sleep(Duration::from_millis(200)).await;
                    "late"
                }),
            )
            .layer(from_fn_with_state(state.clone(), enforce_deadline))
            .with_state(state);

        let response = app.oneshot(get_root()).await.unwrap();
        assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);
    }

    #[tokio::test]
    async fn deadline_is_visible_to_handlers() {
        let (state, _dir) = test_state();
        let app = Router::new()
            .route(
                "/",
                get(|deadline: RequestDeadline| async move {
                    if deadline.at.is_some() { "set" } else { "unset" }
                }),
            )
            .layer(from_fn_with_state(state.clone(), enforce_deadline))
            .with_state(state);

        let response = app.oneshot(get_root()).await.unwrap();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], b"set");
    }

    #[tokio::test]
    async fn rate_limit_returns_429_with_retry_after() {
        let (state, _dir) = test_state();
        let state = state.with_rate_limiter(RateLimiter::per_minute(1));
        let app = Router::new()
            .route("/", get(|| async { "ok" }))
            .route_layer(from_fn_with_state(state.clone(), rate_limit))
            .with_state(state);

        let first = app.clone().oneshot(get_root()).await.unwrap();
        assert_eq!(first.status(), StatusCode::OK);

        let second = app.oneshot(get_root()).await.unwrap();
        assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);
        assert!(second.headers().contains_key(RETRY_AFTER));
    }

    #[tokio::test]
    async fn timed_out_request_does_not_commit() {
        let (state, _dir) = test_state();
        let state = state.with_request_timeout(Duration::from_millis(20));
        let store = state.store.clone();
        let app = Router::new()
            .route(
                "/",
                get(|State(state): State<AppState>, deadline: RequestDeadline| async move {
                    state
                        .transactions
                        .run_async(deadline.at, deadline.gate, |scope| {
                            scope.txn().open_table(SCRATCH)?.insert("late", 1)?;
                            std::thread::sleep(Duration::from_millis(100));
                            Ok(())
                        })
                        .await
                        .map_err(ApiError::from)
                }),
            )
            .layer(from_fn_with_state(state.clone(), enforce_deadline))
            .with_state(state);

        let response = app.oneshot(get_root()).await.unwrap();
        assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);

        tokio::time::sleep(Duration::from_millis(300)).await;
        let read_txn = store.begin_read().unwrap();
        match read_txn.open_table(SCRATCH) {
            Ok(table) => assert!(table.get("late").unwrap().is_none()),
            Err(redb::TableError::TableDoesNotExist(_)) => {}
            Err(e) => panic!("unexpected table error: {e}"),
        }
    }

    #[tokio::test]
    async fn forwarded_for_from_untrusted_peer_shares_one_bucket() {
        let (state, _dir) = test_state();
        let state = state.with_rate_limiter(RateLimiter::per_minute(1));
        let app = Router::new()
            .route("/", get(|| async { "ok" }))
            .route_layer(from_fn_with_state(state.clone(), rate_limit))
            .with_state(state);

        let mut statuses = Vec::new();
        for i in 0..5 {
            let request = from_peer("192.0.2.10:5000", &format!("198.51.100.{i}"));
            statuses.push(app.clone().oneshot(request).await.unwrap().status());
        }

        assert_eq!(statuses[0], StatusCode::OK);
        assert!(statuses[1..].iter().all(|s| *s == StatusCode::TOO_MANY_REQUESTS));
    }

    #[tokio::test]
    async fn trusted_proxy_forwards_distinct_clients() {
        let (state, _dir) = test_state();
        let proxy: IpAddr = "10.0.0.1".parse().unwrap();
        let state = state
            .with_rate_limiter(RateLimiter::per_minute(1))
            .with_trusted_proxies(vec![proxy]);
        let app = Router::new()
            .route("/", get(|| async { "ok" }))
            .route_layer(from_fn_with_state(state.clone(), rate_limit))
            .with_state(state);

        let a = app.clone().oneshot(from_peer("10.0.0.1:443", "203.0.113.1")).await.unwrap();
        let b = app.clone().oneshot(from_peer("10.0.0.1:443", "203.0.113.2")).await.unwrap();
        let a_again = app.oneshot(from_peer("10.0.0.1:443", "203.0.113.1")).await.unwrap();

        assert_eq!(a.status(), StatusCode::OK);
        assert_eq!(b.status(), StatusCode::OK);
        assert_eq!(a_again.status(), StatusCode::TOO_MANY_REQUESTS);
    }

    #[test]
    fn panic_response_is_generic() {
        let response = handle_panic(Box::new("secret detail".to_string()));
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
