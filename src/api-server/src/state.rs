use inkwell_authz::{posts::PostService, store::InMemoryBackend, AuthorizedBackend, Backend};
use std::sync::Arc;
use std::time::Instant;

use crate::identity::{HeaderIdentityResolver, IdentityResolver};

pub type Posts = PostService<AuthorizedBackend<Arc<dyn Backend>>>;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// Post data access, scoped by the request context
    pub posts: Arc<Posts>,

    /// Identity resolution for the authorization middleware
    pub identity: Arc<dyn IdentityResolver>,

    /// Server start time for uptime calculation
    pub start_time: Instant,

    pub version: String,
}

impl AppState {
    /// State over `backend`, always wrapped in authorization
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self {
            posts: Arc::new(PostService::new(AuthorizedBackend::new(backend))),
            identity: Arc::new(HeaderIdentityResolver),
            start_time: Instant::now(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    pub fn with_identity(mut self, identity: Arc<dyn IdentityResolver>) -> Self {
        self.identity = identity;
        self
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::new(Arc::new(InMemoryBackend::new()))
    }
}
