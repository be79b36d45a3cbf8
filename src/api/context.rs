// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Per-request audit context.
//!
//! Mutating handlers take an [`AuditContext`] argument; it is built from the
//! authenticated principal plus the caller's IP and user agent.

use std::net::{IpAddr, SocketAddr};

use axum::{
    extract::{ConnectInfo, FromRef, FromRequestParts},
    http::{header::USER_AGENT, request::Parts, HeaderMap},
};

use crate::auth::{AuthError, Principal};
use crate::state::AppState;
use crate::storage::AuditContext;

const UNKNOWN: &str = "unknown";

/// Client address for rate limiting and audit records.
///
/// Forwarding headers are only honoured when the socket peer is one of
/// `trusted_proxies`. `X-Forwarded-For` is then read right to left and the
/// first hop that is not itself a trusted proxy wins, falling back to
/// `X-Real-IP` and finally the peer.
pub fn client_ip(
    headers: &HeaderMap,
    peer: Option<SocketAddr>,
    trusted_proxies: &[IpAddr],
) -> String {
    let Some(peer) = peer.map(|addr| addr.ip()) else {
        return UNKNOWN.to_string();
    };
    if !trusted_proxies.contains(&peer) {
        return peer.to_string();
    }

    let hops: Vec<&str> = headers
        .get_all("x-forwarded-for")
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .collect();
    for hop in hops.iter().rev() {
        match hop.parse::<IpAddr>() {
            Ok(ip) if trusted_proxies.contains(&ip) => continue,
            Ok(ip) => return ip.to_string(),
            Err(_) => break,
        }
    }

    headers
        .get("x-real-ip")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<IpAddr>().ok())
        .unwrap_or(peer)
        .to_string()
}

fn peer_addr(parts: &Parts) -> Option<SocketAddr> {
    parts
        .extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr)
}

fn user_agent(headers: &HeaderMap) -> String {
    headers
        .get(USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or(UNKNOWN)
        .to_string()
}

impl<S> FromRequestParts<S> for AuditContext
where
    AppState: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let principal = parts
            .extensions
            .get::<Principal>()
            .ok_or(AuthError::MissingPrincipal)?;
        let app = AppState::from_ref(state);
        let ip = client_ip(&parts.headers, peer_addr(parts), &app.trusted_proxies);
        Ok(AuditContext::from_principal(principal, ip, user_agent(&parts.headers)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::test_support::test_state;
    use crate::auth::Role;
    use axum::http::{HeaderValue, Request};
    use uuid::Uuid;

    fn proxy() -> IpAddr {
        "10.0.0.1".parse().unwrap()
    }

    fn forwarded(value: &'static str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static(value));
        headers
    }

    #[test]
    fn untrusted_peer_ignores_forwarding_headers() {
        let mut headers = forwarded("203.0.113.5");
        headers.insert("x-real-ip", HeaderValue::from_static("198.51.100.7"));
        let peer: SocketAddr = "192.0.2.1:4000".parse().unwrap();
        assert_eq!(client_ip(&headers, Some(peer), &[]), "192.0.2.1");
        assert_eq!(client_ip(&headers, Some(peer), &[proxy()]), "192.0.2.1");
    }

    #[test]
    fn trusted_proxy_uses_nearest_untrusted_hop() {
        let peer: SocketAddr = "10.0.0.1:443".parse().unwrap();
        let headers = forwarded("198.51.100.99, 203.0.113.5, 10.0.0.1");
        assert_eq!(client_ip(&headers, Some(peer), &[proxy()]), "203.0.113.5");
    }

    #[test]
    fn trusted_proxy_falls_back_to_real_ip_then_peer() {
        let peer: SocketAddr = "10.0.0.1:443".parse().unwrap();
        let mut headers = HeaderMap::new();
        headers.insert("x-real-ip", HeaderValue::from_static("198.51.100.7"));
        assert_eq!(client_ip(&headers, Some(peer), &[proxy()]), "198.51.100.7");
        assert_eq!(client_ip(&HeaderMap::new(), Some(peer), &[proxy()]), "10.0.0.1");

        let garbage = forwarded("not-an-ip");
        assert_eq!(client_ip(&garbage, Some(peer), &[proxy()]), "10.0.0.1");
    }

    #[test]
    fn missing_peer_is_unknown() {
        assert_eq!(client_ip(&forwarded("203.0.113.5"), None, &[proxy()]), "unknown");
    }

    #[tokio::test]
    async fn context_requires_principal() {
        let (state, _dir) = test_state();
        let mut parts = Request::builder().uri("/").body(()).unwrap().into_parts().0;
        let result = AuditContext::from_request_parts(&mut parts, &state).await;
        assert!(matches!(result, Err(AuthError::MissingPrincipal)));
    }

    #[tokio::test]
    async fn context_is_built_from_principal_and_headers() {
        let (state, _dir) = test_state();
        let state = state.with_trusted_proxies(vec![proxy()]);
        let principal = Principal::new(Uuid::new_v4(), Uuid::new_v4(), "ops@example.com", Role::Admin);
        let peer: SocketAddr = "10.0.0.1:443".parse().unwrap();
        let mut parts = Request::builder()
            .uri("/")
            .header("user-agent", "curl/8.5")
            .header("x-real-ip", "192.0.2.44")
            .extension(ConnectInfo(peer))
            .body(())
            .unwrap()
            .into_parts()
            .0;
        parts.extensions.insert(principal.clone());

        let ctx = AuditContext::from_request_parts(&mut parts, &state).await.unwrap();
        assert_eq!(ctx.org_id, principal.org_id);
        assert_eq!(ctx.user_id, Some(principal.user_id));
        assert_eq!(ctx.user_email, "ops@example.com");
        assert_eq!(ctx.user_ip, "192.0.2.44");
        assert_eq!(ctx.user_agent, "curl/8.5");
    }

    #[tokio::test]
    async fn spoofed_forwarding_header_is_not_recorded() {
        let (state, _dir) = test_state();
        let principal = Principal::new(Uuid::new_v4(), Uuid::new_v4(), "ops@example.com", Role::Admin);
        let peer: SocketAddr = "192.0.2.8:5000".parse().unwrap();
        let mut parts = Request::builder()
            .uri("/")
            .header("x-forwarded-for", "198.51.100.1")
            .extension(ConnectInfo(peer))
            .body(())
            .unwrap()
            .into_parts()
            .0;
        parts.extensions.insert(principal);

        let ctx = AuditContext::from_request_parts(&mut parts, &state).await.unwrap();
        assert_eq!(ctx.user_ip, "192.0.2.8");
    }
}
