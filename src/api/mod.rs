// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use axum::{
    middleware::from_fn_with_state,
    routing::{get, post, put},
    Router,
};
use tower::ServiceBuilder;
use tower_http::{
    catch_panic::CatchPanicLayer,
    cors::CorsLayer,
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};
use utoipa::{
    openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
    Modify, OpenApi,
};
use utoipa_swagger_ui::SwaggerUi;

use crate::{
    auth::{optional_auth, require_auth, require_role, Principal, Role, RoleGate, TokenPair},
    state::AppState,
    storage::{AuditAction, AuditPage, AuditRecord, CredentialKind, CredentialMetadata},
};

pub mod audit;
pub mod context;
pub mod credentials;
pub mod health;
pub mod middleware;
pub mod session;

pub use middleware::RequestDeadline;

pub fn router(state: AppState) -> Router {
    // Admin-only; the gate runs after require_auth below.
    let audit_routes = Router::new()
        .route("/audit", get(audit::list_audit))
        .route("/audit/{record_id}", get(audit::get_audit_record))
        .route_layer(from_fn_with_state(RoleGate::admin_only(), require_role));

    // Last route_layer is outermost: require_auth -> rate_limit -> handler.
    let protected = Router::new()
        .route("/me", get(session::me))
        .route(
            "/clusters/{cluster_id}/credentials",
            get(credentials::list_credentials),
        )
        .route(
            "/clusters/{cluster_id}/credentials/{kind}",
            put(credentials::put_credential).delete(credentials::delete_credential),
        )
        .merge(audit_routes)
        .route_layer(from_fn_with_state(state.clone(), middleware::rate_limit))
        .route_layer(from_fn_with_state(state.clone(), require_auth));

    let public = Router::new()
        .route("/auth/refresh", post(session::refresh))
        .route("/session", get(session::session))
        .route_layer(from_fn_with_state(state.clone(), middleware::rate_limit))
        .route_layer(from_fn_with_state(state.clone(), optional_auth));

    let v1_routes = protected
        .merge(public)
        .layer(from_fn_with_state(state.clone(), middleware::enforce_deadline));

    Router::new()
        .route("/health", get(health::health))
        .route("/health/live", get(health::liveness))
        .route("/health/ready", get(health::readiness))
        .nest("/v1", v1_routes)
        .merge(SwaggerUi::new("/docs").url("/api-doc/openapi.json", ApiDoc::openapi()))
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
                .layer(PropagateRequestIdLayer::x_request_id())
                .layer(TraceLayer::new_for_http().make_span_with(middleware::make_request_span))
                .layer(CatchPanicLayer::custom(middleware::handle_panic)),
        )
        .layer(CorsLayer::permissive())
}

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer_auth",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .build(),
                ),
            );
        }
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(
        health::health,
        health::liveness,
        health::readiness,
        session::refresh,
        session::session,
        session::me,
        credentials::list_credentials,
        credentials::put_credential,
        credentials::delete_credential,
        audit::list_audit,
        audit::get_audit_record
    ),
    components(
        schemas(
            Principal,
            Role,
            TokenPair,
            CredentialKind,
            CredentialMetadata,
            AuditAction,
            AuditRecord,
            AuditPage,
            session::RefreshRequest,
            session::SessionResponse,
            credentials::PutCredentialRequest,
            credentials::CredentialListResponse,
            health::ReadyResponse,
            health::HealthChecks,
            health::HealthResponse
        )
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "Health", description = "Liveness and readiness probes"),
        (name = "Session", description = "Token refresh and principal introspection"),
        (name = "Credentials", description = "Encrypted cluster credentials"),
        (name = "Audit", description = "Append-only audit trail")
    )
)]
struct ApiDoc;


#[cfg(test)]
mod tests {
    use axum::{
        body::{to_bytes, Body},
        http::{Method, Request, StatusCode},
        response::Response,
    };
    use serde_json::{json, Value};
    use tower::ServiceExt;
    use uuid::Uuid;

    use super::test_support::{login, test_state};
    use super::*;

    fn request(method: Method, uri: &str, token: Option<&str>, body: Option<Value>) -> Request<Body> {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {token}"));
        }
        match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        }
    }

    async fn json_body(response: Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn health_is_public_and_carries_request_id() {
        let (state, _dir) = test_state();
        let app = router(state);

        let response = app
            .clone()
            .oneshot(request(Method::GET, "/health", None, None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().contains_key("x-request-id"));
        let body = json_body(response).await;
        assert_eq!(body["checks"]["database"], "ok");

        let mut req = request(Method::GET, "/health/live", None, None);
        req.headers_mut()
            .insert("x-request-id", "corr-123".parse().unwrap());
        let response = app.oneshot(req).await.unwrap();
        assert_eq!(response.headers()["x-request-id"], "corr-123");
    }

    #[tokio::test]
    async fn protected_routes_require_access_token() {
        let (state, _dir) = test_state();
        let (principal, pair) = login(&state, Uuid::new_v4(), Role::Viewer);
        let app = router(state);

        let response = app
            .clone()
            .oneshot(request(Method::GET, "/v1/me", None, None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(json_body(response).await["error_code"], "missing_auth_header");

        let response = app
            .clone()
            .oneshot(request(Method::GET, "/v1/me", Some(&pair.refresh_token), None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(json_body(response).await["error_code"], "wrong_token_type");

        let response = app
            .oneshot(request(Method::GET, "/v1/me", Some(&pair.access_token), None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["user_id"], principal.user_id.to_string());
        assert_eq!(body["organization_id"], principal.org_id.to_string());
        assert_eq!(body["role"], "viewer");
    }

    #[tokio::test]
    async fn foreign_tokens_are_rejected() {
        let (state, _dir) = test_state();
        let other = crate::auth::TokenService::new("another-secret", Default::default()).unwrap();
        let principal = Principal::new(Uuid::new_v4(), Uuid::new_v4(), "x@example.com", Role::Admin);
        let forged = other.issue(&principal).unwrap();

        let response = router(state)
            .oneshot(request(Method::GET, "/v1/me", Some(&forged.access_token), None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(json_body(response).await["error_code"], "invalid_signature");
    }

    #[tokio::test]
    async fn session_and_refresh_are_public() {
        let (state, _dir) = test_state();
        let (_, pair) = login(&state, Uuid::new_v4(), Role::Editor);
        let app = router(state);

        let response = app
            .clone()
            .oneshot(request(Method::GET, "/v1/session", None, None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await["authenticated"], false);

        let response = app
            .clone()
            .oneshot(request(Method::GET, "/v1/session", Some(&pair.access_token), None))
            .await
            .unwrap();
        let body = json_body(response).await;
        assert_eq!(body["authenticated"], true);
        assert_eq!(body["principal"]["role"], "editor");

        let response = app
            .clone()
            .oneshot(request(
                Method::POST,
                "/v1/auth/refresh",
                None,
                Some(json!({"refresh_token": pair.refresh_token})),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let refreshed = json_body(response).await;
        assert_eq!(refreshed["token_type"], "Bearer");
        assert!(refreshed["access_token"].is_string());

        let response = app
            .oneshot(request(
                Method::POST,
                "/v1/auth/refresh",
                None,
                Some(json!({"refresh_token": pair.access_token})),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    /// Access and refresh tokens issued long enough ago that both expired.
    fn expired_tokens(state: &AppState) -> (String, String) {
        let principal = Principal::new(Uuid::new_v4(), Uuid::new_v4(), "old@example.com", Role::Admin);
        let issued = chrono::Utc::now() - chrono::Duration::hours(200);
        let pair = state
            .tokens
            .issue_with(&principal, state.tokens.ttl(), issued)
            .unwrap();
        (pair.access_token, pair.refresh_token)
    }

    #[tokio::test]
    async fn expired_access_token_gets_token_expired() {
        let (state, _dir) = test_state();
        let (access, refresh) = expired_tokens(&state);
        let app = router(state);

        let response = app
            .clone()
            .oneshot(request(Method::GET, "/v1/me", Some(&access), None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(json_body(response).await["error_code"], "token_expired");

        let response = app
            .oneshot(request(
                Method::POST,
                "/v1/auth/refresh",
                None,
                Some(json!({"refresh_token": refresh})),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn session_treats_unusable_tokens_as_anonymous() {
        let (state, _dir) = test_state();
        let (expired, _) = expired_tokens(&state);
        let other = crate::auth::TokenService::new("another-secret", Default::default()).unwrap();
        let principal = Principal::new(Uuid::new_v4(), Uuid::new_v4(), "x@example.com", Role::Admin);
        let forged = other.issue(&principal).unwrap().access_token;
        let app = router(state);

        for token in [expired.as_str(), forged.as_str(), "not-a-jwt"] {
            let response = app
                .clone()
                .oneshot(request(Method::GET, "/v1/session", Some(token), None))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK, "token {token}");
            let body = json_body(response).await;
            assert_eq!(body["authenticated"], false);
            assert!(body.get("principal").is_none());
        }
    }

    #[tokio::test]
    async fn credential_lifecycle_enforces_roles_and_audits() {
        let (state, _dir) = test_state();
        let org = Uuid::new_v4();
        let (_, admin) = login(&state, org, Role::Admin);
        let (_, editor) = login(&state, org, Role::Editor);
        let (_, viewer) = login(&state, org, Role::Viewer);
        let app = router(state);
        let uri = "/v1/clusters/prod-eu/credentials/service_account_token";
        let secret = json!({"value": "sa-token-123"});

        let response = app
            .clone()
            .oneshot(request(Method::PUT, uri, Some(&viewer.access_token), Some(secret.clone())))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        let response = app
            .clone()
            .oneshot(request(Method::PUT, uri, Some(&editor.access_token), Some(secret.clone())))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let created = json_body(response).await;
        assert_eq!(created["version"], 1);
        assert!(!created.to_string().contains("sa-token-123"));

        let response = app
            .clone()
            .oneshot(request(
                Method::PUT,
                uri,
                Some(&editor.access_token),
                Some(json!({"value": "sa-token-456"})),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await["version"], 2);

        let response = app
            .clone()
            .oneshot(request(
                Method::GET,
                "/v1/clusters/prod-eu/credentials",
                Some(&viewer.access_token),
                None,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await["total"], 1);

        let response = app
            .clone()
            .oneshot(request(Method::DELETE, uri, Some(&editor.access_token), None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        let response = app
            .clone()
            .oneshot(request(Method::DELETE, uri, Some(&admin.access_token), None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);

        let response = app
            .clone()
            .oneshot(request(Method::GET, "/v1/audit", Some(&editor.access_token), None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        let response = app
            .clone()
            .oneshot(request(Method::GET, "/v1/audit", Some(&admin.access_token), None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let page = json_body(response).await;
        assert_eq!(page["total"], 3);
        let actions: Vec<&str> = page["records"]
            .as_array()
            .unwrap()
            .iter()
            .map(|r| r["action"].as_str().unwrap())
            .collect();
        assert!(actions.contains(&"create"));
        assert!(actions.contains(&"update"));
        assert!(actions.contains(&"delete"));
        assert!(!page.to_string().contains("sa-token"));

        let record_id = page["records"][0]["id"].as_str().unwrap().to_string();
        let response = app
            .oneshot(request(
                Method::GET,
                &format!("/v1/audit/{record_id}"),
                Some(&admin.access_token),
                None,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn unknown_kind_and_missing_credential() {
        let (state, _dir) = test_state();
        let (_, admin) = login(&state, Uuid::new_v4(), Role::Admin);
        let app = router(state);

        let response = app
            .clone()
            .oneshot(request(
                Method::PUT,
                "/v1/clusters/c1/credentials/password",
                Some(&admin.access_token),
                Some(json!({"value": "x"})),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = app
            .oneshot(request(
                Method::DELETE,
                "/v1/clusters/c1/credentials/kubeconfig",
                Some(&admin.access_token),
                None,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn organizations_are_isolated() {
        let (state, _dir) = test_state();
        let (_, admin_a) = login(&state, Uuid::new_v4(), Role::Admin);
        let (_, admin_b) = login(&state, Uuid::new_v4(), Role::Admin);
        let app = router(state);

        let response = app
            .clone()
            .oneshot(request(
                Method::PUT,
                "/v1/clusters/shared/credentials/kubeconfig",
                Some(&admin_a.access_token),
                Some(json!({"value": "apiVersion: v1"})),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);

        let response = app
            .clone()
            .oneshot(request(
                Method::GET,
                "/v1/clusters/shared/credentials",
                Some(&admin_b.access_token),
                None,
            ))
            .await
            .unwrap();
        assert_eq!(json_body(response).await["total"], 0);

        let response = app
            .oneshot(request(Method::GET, "/v1/audit", Some(&admin_b.access_token), None))
            .await
            .unwrap();
        assert_eq!(json_body(response).await["total"], 0);
    }

    #[tokio::test]
    async fn openapi_document_lists_routes() {
        let doc = ApiDoc::openapi();
        let paths: Vec<&String> = doc.paths.paths.keys().collect();
        assert!(paths.iter().any(|p| p.as_str() == "/v1/clusters/{cluster_id}/credentials/{kind}"));
        assert!(paths.iter().any(|p| p.as_str() == "/v1/audit"));
    }
}
