//! Middleware layer for the API server
//!
//! This module provides middleware components for:
//! - Request ID tracking
//! - Request logging
//! - Installing the per-request authorization context
//! - CORS configuration

use axum::{
    extract::{Request, State},
    http::{header, HeaderName, HeaderValue, Method},
    middleware::Next,
    response::Response,
};
use inkwell_authz::context::{self, RequestContext};
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn, Instrument};
use uuid::Uuid;

use crate::identity::{X_USER_EMAIL, X_USER_ID, X_USER_ROLE};
use crate::state::AppState;

/// Request ID header name
pub const X_REQUEST_ID: &str = "x-request-id";

/// Configure CORS middleware
pub fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([
            header::CONTENT_TYPE,
            header::ACCEPT,
            HeaderName::from_static(X_REQUEST_ID),
            HeaderName::from_static(X_USER_ID),
            HeaderName::from_static(X_USER_ROLE),
            HeaderName::from_static(X_USER_EMAIL),
        ])
        .expose_headers([HeaderName::from_static(X_REQUEST_ID)])
        .max_age(std::time::Duration::from_secs(3600))
}

/// Request ID middleware
///
/// Reuses a well-formed incoming request ID or generates one, stores it in
/// the request extensions and echoes it in the response headers.
pub async fn request_id_middleware(mut request: Request, next: Next) -> Response {
    let request_id = request
        .headers()
        .get(X_REQUEST_ID)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| Uuid::parse_str(s).ok())
        .unwrap_or_else(Uuid::new_v4);

    request.extensions_mut().insert(request_id);

    let mut response = next.run(request).await;

    if let Ok(value) = HeaderValue::from_str(&request_id.to_string()) {
        response.headers_mut().insert(X_REQUEST_ID, value);
    }

    response
}

/// Request logging middleware
pub async fn logging_middleware(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let request_id = request
        .extensions()
        .get::<Uuid>()
        .copied()
        .unwrap_or_else(Uuid::new_v4);

    info!(
        request_id = %request_id,
        method = %method,
        uri = %uri,
        "Incoming request"
    );

    let start = std::time::Instant::now();
    let response = next.run(request).await;
    let elapsed = start.elapsed();

    let status = response.status();
    match status.as_u16() {
        500..=599 => tracing::error!(
            request_id = %request_id,
            method = %method,
            uri = %uri,
            status = status.as_u16(),
            duration_ms = elapsed.as_millis() as u64,
            "Request completed"
        ),
        400..=499 => warn!(
            request_id = %request_id,
            method = %method,
            uri = %uri,
            status = status.as_u16(),
            duration_ms = elapsed.as_millis() as u64,
            "Request completed"
        ),
        _ => info!(
            request_id = %request_id,
            method = %method,
            uri = %uri,
            status = status.as_u16(),
            duration_ms = elapsed.as_millis() as u64,
            "Request completed"
        ),
    }

    response
}

/// Authorization middleware
///
/// Resolves the caller, compiles their rule set and runs the rest of the
/// request inside it. Identity failures degrade to an anonymous caller and
/// rule set construction failures to deny-all; neither aborts the request.
pub async fn authorization_middleware(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let request_id = request
        .extensions()
        .get::<Uuid>()
        .copied()
        .unwrap_or_else(Uuid::new_v4);

    let (parts, body) = request.into_parts();
    let caller = match state.identity.resolve(&parts).await {
        Ok(caller) => caller,
        Err(e) => {
            warn!(request_id = %request_id, error = %e, "Identity resolution failed, treating as anonymous");
            None
        }
    };
    let mut request = Request::from_parts(parts, body);

    let ctx = RequestContext::for_caller(request_id, caller);
    let span = tracing::info_span!(
        "request",
        request_id = %request_id,
        caller_id = ctx.caller_id().unwrap_or_default()
    );
    request.extensions_mut().insert(ctx.clone());

    context::install(ctx, next.run(request)).instrument(span).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        body::Body,
        http::{Request, StatusCode},
        middleware,
        routing::get,
        Json, Router,
    };
    use crate::identity::{IdentityError, IdentityResolver};
    use axum::http::request::Parts;
    use inkwell_authz::{context, Action, Caller, SubjectType};
    use std::sync::Arc;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    async fn test_handler() -> &'static str {
        "OK"
    }

    async fn whoami() -> Json<Value> {
        let ctx = context::current();
        let ability = context::effective_ability();
        Json(json!({
            "installed": ctx.is_some(),
            "callerId": ctx.and_then(|c| c.caller_id()),
            "canCreate": ability.can_on_type(Action::Create, SubjectType::Post),
        }))
    }

    /// Resolves every request to the same caller
    struct FixedIdentity(Caller);

    #[async_trait::async_trait]
    impl IdentityResolver for FixedIdentity {
        async fn resolve(&self, _parts: &Parts) -> Result<Option<Caller>, IdentityError> {
            Ok(Some(self.0.clone()))
        }
    }

    fn whoami_app() -> Router {
        app_with(AppState::default())
    }

    fn app_with(state: AppState) -> Router {
        Router::new()
            .route("/whoami", get(whoami))
            .layer(middleware::from_fn_with_state(state.clone(), authorization_middleware))
            .with_state(state)
    }

    async fn call(app: Router, request: Request<Body>) -> Value {
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    #[tokio::test]
    async fn test_request_id_middleware() {
        let app = Router::new()
            .route("/", get(test_handler))
            .layer(middleware::from_fn(request_id_middleware));

        let response = app
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert!(response.headers().contains_key(X_REQUEST_ID));
    }

    #[tokio::test]
    async fn test_request_id_is_reused() {
        let app = Router::new()
            .route("/", get(test_handler))
            .layer(middleware::from_fn(request_id_middleware));
        let id = Uuid::new_v4();

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/")
                    .header(X_REQUEST_ID, id.to_string())
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.headers()[X_REQUEST_ID], id.to_string().as_str());
    }

    #[tokio::test]
    async fn test_cors_layer() {
        let app = Router::new()
            .route("/", get(test_handler))
            .layer(cors_layer());

        let response = app
            .oneshot(
                Request::builder()
                    .method(Method::OPTIONS)
                    .uri("/")
                    .header(header::ORIGIN, "http://example.com")
                    .header(header::ACCESS_CONTROL_REQUEST_METHOD, "POST")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_context_installed_for_user() {
        let json = call(
            whoami_app(),
            Request::builder()
                .uri("/whoami")
                .header(X_USER_ID, "7")
                .body(Body::empty())
                .unwrap(),
        )
        .await;

        assert_eq!(json["installed"], true);
        assert_eq!(json["callerId"], 7);
        assert_eq!(json["canCreate"], true);
    }

    #[tokio::test]
    async fn test_anonymous_request_gets_anonymous_context() {
        let json = call(
            whoami_app(),
            Request::builder().uri("/whoami").body(Body::empty()).unwrap(),
        )
        .await;

        assert_eq!(json["installed"], true);
        assert_eq!(json["callerId"], Value::Null);
        assert_eq!(json["canCreate"], false);
    }

    #[tokio::test]
    async fn test_bad_identity_degrades_to_anonymous() {
        let json = call(
            whoami_app(),
            Request::builder()
                .uri("/whoami")
                .header(X_USER_ID, "not-a-number")
                .body(Body::empty())
                .unwrap(),
        )
        .await;

        assert_eq!(json["callerId"], Value::Null);
        assert_eq!(json["canCreate"], false);
    }

    #[tokio::test]
    async fn test_custom_identity_resolver_is_used() {
        let state = AppState::default().with_identity(Arc::new(FixedIdentity(Caller::admin(11))));
        let json = call(
            app_with(state),
            Request::builder()
                .uri("/whoami")
                .header(X_USER_ID, "3")
                .body(Body::empty())
                .unwrap(),
        )
        .await;

        assert_eq!(json["callerId"], 11);
        assert_eq!(json["canCreate"], true);
    }

    #[tokio::test]
    async fn test_unbuildable_caller_gets_deny_all() {
        let json = call(
            whoami_app(),
            Request::builder()
                .uri("/whoami")
                .header(X_USER_ID, "0")
                .body(Body::empty())
                .unwrap(),
        )
        .await;

        assert_eq!(json["installed"], true);
        assert_eq!(json["callerId"], 0);
        assert_eq!(json["canCreate"], false);
    }
}
