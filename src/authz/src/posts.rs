//! Post model and service
//!
//! The service issues plain queries; it never sees the caller's rule set.
//! Scoping happens in whatever [`Backend`] it is given, normally an
//! [`AuthorizedBackend`](crate::query::AuthorizedBackend).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::ability::AUTHOR_ID;
use crate::error::{AuthzError, Result};
use crate::filter::Filter;
use crate::query::{Backend, Query};
use crate::types::{Record, Subject, SubjectType};

/// A published or draft post
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Post {
    pub id: i64,
    pub title: String,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub published: bool,
    pub author_id: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Subject for Post {
    fn subject_type(&self) -> SubjectType {
        SubjectType::Post
    }

    fn field(&self, name: &str) -> Option<Value> {
        let value = match name {
            "id" => Value::from(self.id),
            "title" => Value::from(self.title.clone()),
            "content" => self.content.clone().map_or(Value::Null, Value::from),
            "published" => Value::from(self.published),
            AUTHOR_ID => Value::from(self.author_id),
            "createdAt" => Value::from(self.created_at.to_rfc3339()),
            "updatedAt" => Value::from(self.updated_at.to_rfc3339()),
            _ => return None,
        };
        Some(value)
    }
}

/// Fields for a new post; the author is supplied separately
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewPost {
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default)]
    pub published: bool,
}

/// Partial update of a post
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostChanges {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published: Option<bool>,
}

fn to_fields<T: Serialize>(value: &T) -> Result<Map<String, Value>> {
    match serde_json::to_value(value)? {
        Value::Object(fields) => Ok(fields),
        other => Err(AuthzError::InvalidInput(format!("expected an object, got {}", other))),
    }
}

fn decode(record: Option<Record>, id: i64) -> Result<Post> {
    record
        .ok_or_else(|| AuthzError::NotFound(format!("Post with id {}", id)))?
        .decode()
}

/// Post data access
#[derive(Debug, Clone)]
pub struct PostService<B> {
    backend: B,
}

impl<B: Backend> PostService<B> {
    pub fn new(backend: B) -> Self {
        Self { backend }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Create a post authored by `author_id`
    pub async fn create(&self, input: NewPost, author_id: i64) -> Result<Post> {
        let mut data = to_fields(&input)?;
        data.insert(AUTHOR_ID.to_string(), Value::from(author_id));

        let record = self
            .backend
            .execute(Query::create(SubjectType::Post, data))
            .await?
            .into_record()?;

        record
            .ok_or_else(|| AuthzError::Internal("create returned no record".to_string()))?
            .decode()
    }

    /// Every post visible to the current caller
    pub async fn find_all(&self) -> Result<Vec<Post>> {
        self.find_where(Filter::True).await
    }

    pub async fn find_where(&self, filter: Filter) -> Result<Vec<Post>> {
        self.backend
            .execute(Query::find_many(SubjectType::Post, filter))
            .await?
            .into_records()?
            .iter()
            .map(Record::decode)
            .collect()
    }

    pub async fn count(&self, filter: Filter) -> Result<u64> {
        self.backend
            .execute(Query::count(SubjectType::Post, filter))
            .await?
            .into_count()
    }

    pub async fn find_one(&self, id: i64) -> Result<Post> {
        let record = self
            .backend
            .execute(Query::find_unique(SubjectType::Post, id))
            .await?
            .into_record()?;
        decode(record, id)
    }

    pub async fn update(&self, id: i64, changes: PostChanges) -> Result<Post> {
        let record = self
            .backend
            .execute(Query::update(SubjectType::Post, id, to_fields(&changes)?))
            .await?
            .into_record()?;
        decode(record, id)
    }

    pub async fn remove(&self, id: i64) -> Result<Post> {
        let record = self
            .backend
            .execute(Query::delete(SubjectType::Post, id))
            .await?
            .into_record()?;
        decode(record, id)
    }

    /// Delete every matching post the caller may delete, returning the count
    pub async fn remove_where(&self, filter: Filter) -> Result<u64> {
        self.backend
            .execute(Query::delete_many(SubjectType::Post, filter))
            .await?
            .into_count()
    }
}
