//! Persistence backends

mod memory;
#[cfg(feature = "postgres")]
pub mod postgres;

pub use memory::InMemoryBackend;
#[cfg(feature = "postgres")]
pub use postgres::PostgresBackend;

use chrono::Utc;
use serde_json::{Map, Value};

pub(crate) const CREATED_AT: &str = "createdAt";
pub(crate) const UPDATED_AT: &str = "updatedAt";

/// Field values for a new record: `id` is assigned by the store and both
/// timestamps default to now.
pub(crate) fn prepare_insert(mut data: Map<String, Value>) -> Map<String, Value> {
    let now = Value::String(Utc::now().to_rfc3339());
    data.remove("id");
    data.entry(CREATED_AT).or_insert_with(|| now.clone());
    data.insert(UPDATED_AT.to_string(), now);
    data
}

/// Field values for an update: `id` and `createdAt` are immutable
pub(crate) fn prepare_update(mut data: Map<String, Value>) -> Map<String, Value> {
    data.remove("id");
    data.remove(CREATED_AT);
    data.insert(UPDATED_AT.to_string(), Value::String(Utc::now().to_rfc3339()));
    data
}
