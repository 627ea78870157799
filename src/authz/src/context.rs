//! Request-scoped authorization context
//!
//! The active [`RequestContext`] lives in a tokio task-local. It is visible to
//! everything awaited inside [`install`], survives every suspension point, and
//! is invisible to other tasks. Plain `tokio::spawn` starts a fresh task
//! without it, so code that fans out inside a request uses [`spawn`].

use std::future::Future;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::warn;
use uuid::Uuid;

use crate::ability::{Ability, AbilityFactory};
use crate::types::Caller;

tokio::task_local! {
    static CURRENT: RequestContext;
}

/// Per-request carrier of exactly one rule set
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// Correlation id for logs
    pub request_id: Uuid,

    /// Resolved caller, `None` for anonymous requests
    pub caller: Option<Caller>,

    /// Rule set compiled for `caller`
    pub ability: Arc<Ability>,
}

impl RequestContext {
    pub fn new(request_id: Uuid, caller: Option<Caller>, ability: Arc<Ability>) -> Self {
        Self {
            request_id,
            caller,
            ability,
        }
    }

    /// Build the context for `caller`.
    ///
    /// A caller whose attributes cannot be compiled gets a deny-all rule set;
    /// the request still proceeds.
    pub fn for_caller(request_id: Uuid, caller: Option<Caller>) -> Self {
        let ability = match AbilityFactory::for_caller(caller.as_ref()) {
            Ok(ability) => ability,
            Err(e) => {
                warn!(request_id = %request_id, error = %e, "Falling back to deny-all ability");
                Ability::deny_all()
            }
        };

        Self::new(request_id, caller, ability.into_shared())
    }

    /// Anonymous context
    pub fn anonymous(request_id: Uuid) -> Self {
        Self::new(request_id, None, Ability::anonymous().into_shared())
    }

    pub fn caller_id(&self) -> Option<i64> {
        self.caller.as_ref().map(|c| c.id)
    }
}

/// Run `body` with `ctx` as the current context for its whole dynamic extent
pub async fn install<F>(ctx: RequestContext, body: F) -> F::Output
where
    F: Future,
{
    CURRENT.scope(ctx, body).await
}

/// Synchronous counterpart of [`install`]
pub fn install_sync<R>(ctx: RequestContext, body: impl FnOnce() -> R) -> R {
    CURRENT.sync_scope(ctx, body)
}

/// The current context, `None` outside any [`install`] extent
pub fn current() -> Option<RequestContext> {
    CURRENT.try_with(|ctx| ctx.clone()).ok()
}

/// The current rule set, `None` outside any [`install`] extent
pub fn current_ability() -> Option<Arc<Ability>> {
    CURRENT.try_with(|ctx| Arc::clone(&ctx.ability)).ok()
}

/// The current rule set, or the anonymous one when no context is installed
pub fn effective_ability() -> Arc<Ability> {
    current_ability().unwrap_or_else(|| {
        warn!("No authorization context installed; using anonymous ability");
        Ability::anonymous().into_shared()
    })
}

/// Spawn a task that inherits the current context
pub fn spawn<F>(future: F) -> JoinHandle<F::Output>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    match current() {
        Some(ctx) => tokio::spawn(CURRENT.scope(ctx, future)),
        None => tokio::spawn(future),
    }
}
