use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use inkwell_authz::{context, posts::Post};
use tracing::info;
use validator::Validate;

use crate::{
    error::{ApiError, Result},
    models::*,
    state::AppState,
    HealthResponse,
};

/// Health check endpoint
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: state.version.clone(),
        uptime_seconds: state.uptime_seconds(),
    })
}

/// `POST /posts`
///
/// The author is always the authenticated caller.
pub async fn create_post(
    State(state): State<AppState>,
    Json(req): Json<CreatePostRequest>,
) -> Result<(StatusCode, Json<Post>)> {
    req.validate()?;

    let author_id = context::current()
        .and_then(|ctx| ctx.caller_id())
        .ok_or_else(|| ApiError::Unauthorized("Sign in to create posts".to_string()))?;

    let post = state.posts.create(req.into(), author_id).await?;
    info!(post_id = post.id, author_id, "Post created");

    Ok((StatusCode::CREATED, Json(post)))
}

/// `GET /posts`
pub async fn list_posts(State(state): State<AppState>) -> Result<Json<ListPostsResponse<Post>>> {
    let posts = state.posts.find_all().await?;
    Ok(Json(ListPostsResponse {
        total: posts.len(),
        posts,
    }))
}

/// `GET /posts/:id`
pub async fn get_post(State(state): State<AppState>, Path(id): Path<i64>) -> Result<Json<Post>> {
    Ok(Json(state.posts.find_one(id).await?))
}

/// `PATCH /posts/:id`
pub async fn update_post(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(req): Json<UpdatePostRequest>,
) -> Result<Json<Post>> {
    req.validate()?;
    Ok(Json(state.posts.update(id, req.into()).await?))
}

/// `DELETE /posts/:id`
pub async fn delete_post(State(state): State<AppState>, Path(id): Path<i64>) -> Result<Json<Post>> {
    let post = state.posts.remove(id).await?;
    info!(post_id = post.id, "Post deleted");
    Ok(Json(post))
}
