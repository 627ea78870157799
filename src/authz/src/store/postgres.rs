//! PostgreSQL record store
//!
//! Records of every model share one table and keep their fields in a JSONB
//! column, which is what [`Filter::to_sql`] renders against.

use async_trait::async_trait;
use serde_json::{Map, Value};
use sqlx::postgres::{PgArguments, PgPool, PgPoolOptions, PgRow};
use sqlx::{Executor, Postgres, Row};
use std::time::Duration;
use tracing::debug;

use super::{prepare_insert, prepare_update};
use crate::error::{AuthzError, Result};
use crate::filter::SqlParam;
use crate::query::{Aggregation, Backend, Operation, Query, QueryOutput};
use crate::types::{Record, SubjectType};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS records (
    id BIGSERIAL PRIMARY KEY,
    model TEXT NOT NULL,
    data JSONB NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_records_model ON records (model);
"#;

/// PostgreSQL backend with connection pooling
pub struct PostgresBackend {
    pool: PgPool,
}

impl PostgresBackend {
    /// Connect to the database at `database_url`
    pub async fn new(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(25)
            .min_connections(1)
            .acquire_timeout(Duration::from_secs(3))
            .idle_timeout(Duration::from_secs(600))
            .connect(database_url)
            .await
            .map_err(|e| AuthzError::DatabaseError(format!("Failed to connect to database: {}", e)))?;

        Ok(Self { pool })
    }

    /// Create the records table if it does not exist
    pub async fn ensure_schema(&self) -> Result<()> {
        (&self.pool)
            .execute(SCHEMA)
            .await
            .map_err(|e| AuthzError::DatabaseError(format!("Schema setup failed: {}", e)))?;
        Ok(())
    }
}

/// `WHERE` clause for `query`, with its bind parameters
fn where_clause(query: &Query) -> Result<(String, Vec<SqlParam>)> {
    let mut params = vec![SqlParam::Text(query.model.to_string())];
    let mut clause = format!("model = $1 AND {}", query.filter.to_sql(&mut params)?);

    if query.operation.is_by_id() {
        let id = query
            .id
            .ok_or_else(|| AuthzError::InvalidInput(format!("{:?} requires an id", query.operation)))?;
        params.push(SqlParam::Json(Value::from(id)));
        clause.push_str(&format!(" AND id = (${}::jsonb)::bigint", params.len()));
    }

    Ok((clause, params))
}

/// `SELECT` list computing `aggregation` as JSONB, binding the field name
fn aggregate_select(aggregation: &Aggregation, params: &mut Vec<SqlParam>) -> String {
    params.push(SqlParam::Text(aggregation.field().to_string()));
    let n = params.len();
    let function = match aggregation {
        Aggregation::Sum(_) => "SUM",
        Aggregation::Avg(_) => "AVG",
        Aggregation::Min(_) => "MIN",
        Aggregation::Max(_) => "MAX",
    };
    format!(
        "to_jsonb({}((data ->> ${n}::text)::float8) FILTER (WHERE jsonb_typeof(data -> ${n}::text) = 'number')) AS v",
        function,
        n = n
    )
}

fn bind_all<'q>(
    mut query: sqlx::query::Query<'q, Postgres, PgArguments>,
    params: Vec<SqlParam>,
) -> sqlx::query::Query<'q, Postgres, PgArguments> {
    for param in params {
        query = match param {
            SqlParam::Text(text) => query.bind(text),
            SqlParam::Json(value) => query.bind(value),
        };
    }
    query
}

fn decode_row(model: SubjectType, row: &PgRow) -> Result<Record> {
    let id: i64 = row
        .try_get("id")
        .map_err(|e| AuthzError::DatabaseError(format!("Failed to read id: {}", e)))?;
    let data: Value = row
        .try_get("data")
        .map_err(|e| AuthzError::DatabaseError(format!("Failed to read data: {}", e)))?;

    match data {
        Value::Object(fields) => Ok(Record::new(model, id, fields)),
        other => Err(AuthzError::DatabaseError(format!("record {} has non-object data: {}", id, other))),
    }
}

fn db_error(operation: Operation) -> impl Fn(sqlx::Error) -> AuthzError {
    move |e| AuthzError::DatabaseError(format!("{:?} failed: {}", operation, e))
}

#[async_trait]
impl Backend for PostgresBackend {
    async fn execute(&self, query: Query) -> Result<QueryOutput> {
        let model = query.model;
        let operation = query.operation;
        let (clause, mut params) = where_clause(&query)?;

        let output = match operation {
            Operation::FindUnique | Operation::FindFirst => {
                let sql = format!("SELECT id, data FROM records WHERE {} ORDER BY id LIMIT 1", clause);
                debug!(sql = %sql, "Executing query");
                let row = bind_all(sqlx::query(&sql), params)
                    .fetch_optional(&self.pool)
                    .await
                    .map_err(db_error(operation))?;
                QueryOutput::Record(row.as_ref().map(|r| decode_row(model, r)).transpose()?)
            }
            Operation::FindMany => {
                let sql = format!("SELECT id, data FROM records WHERE {} ORDER BY id", clause);
                debug!(sql = %sql, "Executing query");
                let rows = bind_all(sqlx::query(&sql), params)
                    .fetch_all(&self.pool)
                    .await
                    .map_err(db_error(operation))?;
                let records = rows
                    .iter()
                    .map(|r| decode_row(model, r))
                    .collect::<Result<Vec<_>>>()?;
                QueryOutput::Records(records)
            }
            Operation::Count => {
                let sql = format!("SELECT COUNT(*) AS n FROM records WHERE {}", clause);
                let row = bind_all(sqlx::query(&sql), params)
                    .fetch_one(&self.pool)
                    .await
                    .map_err(db_error(operation))?;
                let count: i64 = row.try_get("n").map_err(db_error(operation))?;
                QueryOutput::Count(count as u64)
            }
            Operation::Aggregate => {
                let aggregation = query
                    .aggregation
                    .as_ref()
                    .ok_or_else(|| AuthzError::InvalidInput("aggregate requires an aggregation".to_string()))?;
                let select = aggregate_select(aggregation, &mut params);
                let sql = format!("SELECT {} FROM records WHERE {}", select, clause);
                let row = bind_all(sqlx::query(&sql), params)
                    .fetch_one(&self.pool)
                    .await
                    .map_err(db_error(operation))?;
                let value: Option<Value> = row.try_get("v").map_err(db_error(operation))?;
                QueryOutput::Value(value.unwrap_or(Value::Null))
            }
            Operation::Create => {
                let data = query
                    .data
                    .ok_or_else(|| AuthzError::InvalidInput("create requires data".to_string()))?;
                let row = sqlx::query("INSERT INTO records (model, data) VALUES ($1, $2) RETURNING id, data")
                    .bind(model.to_string())
                    .bind(Value::Object(prepare_insert(data)))
                    .fetch_one(&self.pool)
                    .await
                    .map_err(db_error(operation))?;
                QueryOutput::Record(Some(decode_row(model, &row)?))
            }
            Operation::Update | Operation::UpdateMany => {
                let changes: Map<String, Value> = prepare_update(query.data.unwrap_or_default());
                params.push(SqlParam::Json(Value::Object(changes)));
                let sql = format!(
                    "UPDATE records SET data = data || ${}::jsonb WHERE {} RETURNING id, data",
                    params.len(),
                    clause
                );
                let rows = bind_all(sqlx::query(&sql), params)
                    .fetch_all(&self.pool)
                    .await
                    .map_err(db_error(operation))?;
                if operation == Operation::Update {
                    QueryOutput::Record(rows.first().map(|r| decode_row(model, r)).transpose()?)
                } else {
                    QueryOutput::Count(rows.len() as u64)
                }
            }
            Operation::Delete => {
                let sql = format!("DELETE FROM records WHERE {} RETURNING id, data", clause);
                let row = bind_all(sqlx::query(&sql), params)
                    .fetch_optional(&self.pool)
                    .await
                    .map_err(db_error(operation))?;
                QueryOutput::Record(row.as_ref().map(|r| decode_row(model, r)).transpose()?)
            }
            Operation::DeleteMany => {
                let sql = format!("DELETE FROM records WHERE {}", clause);
                let result = bind_all(sqlx::query(&sql), params)
                    .execute(&self.pool)
                    .await
                    .map_err(db_error(operation))?;
                QueryOutput::Count(result.rows_affected())
            }
        };

        Ok(output)
    }
}
