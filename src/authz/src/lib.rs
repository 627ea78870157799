//! # Inkwell Authorization Core
//!
//! Row-level authorization for the Inkwell posts service.
//!
//! ## Features
//!
//! - **Ordered rule sets** compiled per caller, resolved with last-rule-wins precedence
//! - **Filter synthesis** turning a rule set into a backend predicate
//! - **Task-local request context** so data access needs no explicit auth parameter
//! - **Query interception** that scopes every backend call, failing closed
//! - **In-memory and PostgreSQL backends**
//!
//! ## Example
//!
//! ```rust
//! use inkwell_authz::{
//!     context::{self, RequestContext},
//!     posts::{NewPost, PostService},
//!     query::AuthorizedBackend,
//!     store::InMemoryBackend,
//!     Caller,
//! };
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let posts = PostService::new(AuthorizedBackend::new(InMemoryBackend::new()));
//! let ctx = RequestContext::for_caller(uuid::Uuid::new_v4(), Some(Caller::user(1)));
//!
//! let post = context::install(ctx, async {
//!     posts
//!         .create(NewPost { title: "Hello".into(), content: None, published: true }, 1)
//!         .await
//! })
//! .await?;
//!
//! assert_eq!(post.author_id, 1);
//! # Ok(())
//! # }
//! ```

pub mod ability;
pub mod context;
pub mod error;
pub mod filter;
pub mod posts;
pub mod query;
pub mod store;
pub mod types;

// Re-export commonly used types
pub use ability::{Ability, AbilityBuilder, AbilityFactory, Condition, Rule};
pub use context::RequestContext;
pub use error::{AuthzError, Result};
pub use filter::Filter;
pub use query::{AuthorizedBackend, Backend, Operation, Query, QueryOutput};
pub use types::{Action, Caller, Effect, Record, Role, Subject, SubjectType};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
