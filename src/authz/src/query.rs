//! Query interception
//!
//! [`AuthorizedBackend`] wraps any [`Backend`] and scopes every operation by
//! the rule set of the request it runs in. Nothing is cached between calls:
//! the same query shape narrows differently per request.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::context;
use crate::error::{AuthzError, Result};
use crate::filter::Filter;
use crate::types::{Action, Draft, Record, SubjectType};

/// Kind of data-access operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Operation {
    FindUnique,
    FindFirst,
    FindMany,
    Count,
    Aggregate,
    Create,
    Update,
    UpdateMany,
    Delete,
    DeleteMany,
}

impl Operation {
    /// Rule engine action this operation needs
    pub fn action(self) -> Action {
        match self {
            Operation::Create => Action::Create,
            Operation::Update | Operation::UpdateMany => Action::Update,
            Operation::Delete | Operation::DeleteMany => Action::Delete,
            Operation::FindUnique
            | Operation::FindFirst
            | Operation::FindMany
            | Operation::Count
            | Operation::Aggregate => Action::Read,
        }
    }

    /// Operations addressing one record by id
    pub fn is_by_id(self) -> bool {
        matches!(self, Operation::FindUnique | Operation::Update | Operation::Delete)
    }
}

/// Aggregate over one numeric field; non-numeric values are skipped
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "fn", content = "field")]
pub enum Aggregation {
    Sum(String),
    Avg(String),
    Min(String),
    Max(String),
}

impl Aggregation {
    pub fn field(&self) -> &str {
        match self {
            Aggregation::Sum(f) | Aggregation::Avg(f) | Aggregation::Min(f) | Aggregation::Max(f) => f,
        }
    }
}

/// A data-access request as handed to a backend
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub model: SubjectType,
    pub operation: Operation,
    /// Record id for by-id operations
    pub id: Option<i64>,
    /// Caller-supplied filter; authorization only ever ANDs onto it
    pub filter: Filter,
    /// Field values for create and update operations
    pub data: Option<Map<String, Value>>,
    pub aggregation: Option<Aggregation>,
}

impl Query {
    fn new(model: SubjectType, operation: Operation) -> Self {
        Self {
            model,
            operation,
            id: None,
            filter: Filter::True,
            data: None,
            aggregation: None,
        }
    }

    pub fn find_unique(model: SubjectType, id: i64) -> Self {
        Self::new(model, Operation::FindUnique).with_id(id)
    }

    pub fn find_first(model: SubjectType, filter: Filter) -> Self {
        Self::new(model, Operation::FindFirst).with_filter(filter)
    }

    pub fn find_many(model: SubjectType, filter: Filter) -> Self {
        Self::new(model, Operation::FindMany).with_filter(filter)
    }

    pub fn count(model: SubjectType, filter: Filter) -> Self {
        Self::new(model, Operation::Count).with_filter(filter)
    }

    pub fn aggregate(model: SubjectType, filter: Filter, aggregation: Aggregation) -> Self {
        let mut query = Self::new(model, Operation::Aggregate).with_filter(filter);
        query.aggregation = Some(aggregation);
        query
    }

    pub fn create(model: SubjectType, data: Map<String, Value>) -> Self {
        Self::new(model, Operation::Create).with_data(data)
    }

    pub fn update(model: SubjectType, id: i64, data: Map<String, Value>) -> Self {
        Self::new(model, Operation::Update).with_id(id).with_data(data)
    }

    pub fn update_many(model: SubjectType, filter: Filter, data: Map<String, Value>) -> Self {
        Self::new(model, Operation::UpdateMany)
            .with_filter(filter)
            .with_data(data)
    }

    pub fn delete(model: SubjectType, id: i64) -> Self {
        Self::new(model, Operation::Delete).with_id(id)
    }

    pub fn delete_many(model: SubjectType, filter: Filter) -> Self {
        Self::new(model, Operation::DeleteMany).with_filter(filter)
    }

    pub fn with_id(mut self, id: i64) -> Self {
        self.id = Some(id);
        self
    }

    pub fn with_filter(mut self, filter: Filter) -> Self {
        self.filter = filter;
        self
    }

    pub fn with_data(mut self, data: Map<String, Value>) -> Self {
        self.data = Some(data);
        self
    }

    fn require_id(&self) -> Result<i64> {
        self.id.ok_or_else(|| {
            AuthzError::InvalidInput(format!("{:?} on {} requires an id", self.operation, self.model))
        })
    }
}

/// Result of executing a [`Query`]
#[derive(Debug, Clone, PartialEq)]
pub enum QueryOutput {
    Record(Option<Record>),
    Records(Vec<Record>),
    Count(u64),
    /// Aggregate result, `Null` over no numeric values
    Value(Value),
}

impl QueryOutput {
    pub fn into_record(self) -> Result<Option<Record>> {
        match self {
            QueryOutput::Record(record) => Ok(record),
            other => Err(AuthzError::UnexpectedOutput(format!("single record, got {:?}", other))),
        }
    }

    pub fn into_records(self) -> Result<Vec<Record>> {
        match self {
            QueryOutput::Records(records) => Ok(records),
            other => Err(AuthzError::UnexpectedOutput(format!("record list, got {:?}", other))),
        }
    }

    pub fn into_value(self) -> Result<Value> {
        match self {
            QueryOutput::Value(value) => Ok(value),
            other => Err(AuthzError::UnexpectedOutput(format!("aggregate, got {:?}", other))),
        }
    }

    pub fn into_count(self) -> Result<u64> {
        match self {
            QueryOutput::Count(count) => Ok(count),
            other => Err(AuthzError::UnexpectedOutput(format!("count, got {:?}", other))),
        }
    }
}

/// Persistence backend
///
/// By-id operations must honour both `id` and `filter`. `Update` and `Delete`
/// return the affected record (`None` when nothing matched); `UpdateMany` and
/// `DeleteMany` return the number of affected records.
#[async_trait]
pub trait Backend: Send + Sync {
    async fn execute(&self, query: Query) -> Result<QueryOutput>;
}

#[async_trait]
impl<B: Backend + ?Sized> Backend for Arc<B> {
    async fn execute(&self, query: Query) -> Result<QueryOutput> {
        (**self).execute(query).await
    }
}

/// Backend decorator enforcing the current request's rule set
#[derive(Debug, Clone)]
pub struct AuthorizedBackend<B> {
    inner: B,
}

impl<B: Backend> AuthorizedBackend<B> {
    pub fn new(inner: B) -> Self {
        Self { inner }
    }

    pub fn inner(&self) -> &B {
        &self.inner
    }

    async fn execute_by_id(&self, mut query: Query) -> Result<QueryOutput> {
        let ability = context::effective_ability();
        let action = query.operation.action();
        let id = query.require_id()?;

        // Existence is checked before authorization so a missing record is
        // always NotFound and an existing one the caller may not touch is
        // always Forbidden.
        let lookup = Query::find_unique(query.model, id).with_filter(query.filter.clone());
        let existing = self
            .inner
            .execute(lookup)
            .await?
            .into_record()?
            .ok_or_else(|| AuthzError::NotFound(format!("{} with id {}", query.model, id)))?;

        if ability.cannot(action, &existing) {
            warn!(
                operation = ?query.operation,
                model = %query.model,
                id,
                "Operation denied on record"
            );
            return Err(AuthzError::Forbidden);
        }

        if query.operation == Operation::FindUnique {
            return Ok(QueryOutput::Record(Some(existing)));
        }

        query.filter = query.filter.and(ability.filter_for(action, query.model));
        match self.inner.execute(query).await? {
            // The record changed between the check and the write
            QueryOutput::Record(None) => Err(AuthzError::NotFound(format!("{} with id {}", existing.model, id))),
            output => Ok(output),
        }
    }

    async fn execute_create(&self, query: Query) -> Result<QueryOutput> {
        let ability = context::effective_ability();
        let data = query.data.as_ref().ok_or_else(|| {
            AuthzError::InvalidInput(format!("create on {} requires data", query.model))
        })?;

        let draft = Draft {
            model: query.model,
            data,
        };
        if ability.cannot(Action::Create, &draft) {
            warn!(model = %query.model, "Create denied");
            return Err(AuthzError::Forbidden);
        }

        self.inner.execute(query).await
    }

    async fn execute_scoped(&self, mut query: Query) -> Result<QueryOutput> {
        let ability = context::effective_ability();
        let scope = ability.filter_for(query.operation.action(), query.model);
        query.filter = query.filter.and(scope);

        debug!(
            operation = ?query.operation,
            model = %query.model,
            filter = %query.filter,
            "Executing scoped query"
        );

        self.inner.execute(query).await
    }
}

#[async_trait]
impl<B: Backend> Backend for AuthorizedBackend<B> {
    async fn execute(&self, query: Query) -> Result<QueryOutput> {
        match query.operation {
            Operation::Create => self.execute_create(query).await,
            op if op.is_by_id() => self.execute_by_id(query).await,
            _ => self.execute_scoped(query).await,
        }
    }
}
