// API Server for the Inkwell posts service
// Every request runs inside a task-local authorization context.

pub mod error;
pub mod handlers;
pub mod identity;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod server;
pub mod state;

pub use error::{ApiError, Result};
pub use server::Server;
pub use state::AppState;

/// Health check response
#[derive(Debug, serde::Serialize, serde::Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_seconds: u64,
}
