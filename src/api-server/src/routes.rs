//! Route definitions for the API server
//!
//! Routes are organized by functionality:
//! - Health endpoint
//! - Post management

use crate::{handlers, middleware, state::AppState};
use axum::{
    middleware as axum_middleware,
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;

/// Create the application router with all routes and middleware
pub fn create_router(state: AppState) -> Router {
    let post_routes = Router::new()
        .route("/", post(handlers::create_post).get(handlers::list_posts))
        .route(
            "/:id",
            get(handlers::get_post)
                .patch(handlers::update_post)
                .delete(handlers::delete_post),
        );

    Router::new()
        .route("/health", get(handlers::health_check))
        .nest("/posts", post_routes)
        // Middleware layers (executed bottom to top)
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::authorization_middleware,
        ))
        .layer(axum_middleware::from_fn(middleware::logging_middleware))
        .layer(axum_middleware::from_fn(middleware::request_id_middleware))
        .layer(middleware::cors_layer())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
