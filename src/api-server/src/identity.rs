//! Caller identity resolution
//!
//! Authentication happens upstream; the gateway forwards the verified
//! identity in headers. Resolution only decides who the caller is, never
//! what they may do.

use async_trait::async_trait;
use axum::http::{request::Parts, HeaderMap};
use inkwell_authz::{Caller, Role};
use thiserror::Error;

pub const X_USER_ID: &str = "x-user-id";
pub const X_USER_ROLE: &str = "x-user-role";
pub const X_USER_EMAIL: &str = "x-user-email";

#[derive(Debug, Error, PartialEq)]
pub enum IdentityError {
    #[error("Header {0} is not valid UTF-8")]
    InvalidHeader(&'static str),

    #[error("Invalid user id: {0}")]
    InvalidUserId(String),

    #[error("Unknown role: {0}")]
    UnknownRole(String),
}

/// Resolves the caller for an incoming request.
///
/// `Ok(None)` means the request is anonymous.
#[async_trait]
pub trait IdentityResolver: Send + Sync {
    async fn resolve(&self, parts: &Parts) -> Result<Option<Caller>, IdentityError>;
}

/// Reads the identity forwarded by the authentication gateway
#[derive(Debug, Clone, Default)]
pub struct HeaderIdentityResolver;

fn header<'a>(headers: &'a HeaderMap, name: &'static str) -> Result<Option<&'a str>, IdentityError> {
    headers
        .get(name)
        .map(|v| v.to_str().map_err(|_| IdentityError::InvalidHeader(name)))
        .transpose()
}

impl HeaderIdentityResolver {
    pub fn from_headers(headers: &HeaderMap) -> Result<Option<Caller>, IdentityError> {
        let Some(raw_id) = header(headers, X_USER_ID)? else {
            return Ok(None);
        };
        let id = raw_id
            .trim()
            .parse::<i64>()
            .map_err(|_| IdentityError::InvalidUserId(raw_id.to_string()))?;

        let role = match header(headers, X_USER_ROLE)? {
            Some(raw) => raw
                .trim()
                .parse::<Role>()
                .map_err(|_| IdentityError::UnknownRole(raw.to_string()))?,
            None => Role::User,
        };

        let mut caller = Caller::new(id, role);
        if let Some(email) = header(headers, X_USER_EMAIL)? {
            caller = caller.with_email(email);
        }
        Ok(Some(caller))
    }
}

#[async_trait]
impl IdentityResolver for HeaderIdentityResolver {
    async fn resolve(&self, parts: &Parts) -> Result<Option<Caller>, IdentityError> {
        Self::from_headers(&parts.headers)
    }
}
