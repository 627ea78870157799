//! In-memory record store

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;

use super::{prepare_insert, prepare_update};
use crate::error::{AuthzError, Result};
use crate::filter::Filter;
use crate::query::{Aggregation, Backend, Operation, Query, QueryOutput};
use crate::types::{Record, SubjectType};

#[derive(Debug, Default)]
struct Table {
    next_id: i64,
    rows: BTreeMap<i64, Record>,
}

impl Table {
    fn matching<'a>(&'a self, filter: &'a Filter) -> impl Iterator<Item = &'a Record> + 'a {
        self.rows.values().filter(move |record| filter.matches(*record))
    }

    fn by_id(&self, id: i64, filter: &Filter) -> Option<&Record> {
        self.rows.get(&id).filter(|record| filter.matches(*record))
    }
}

/// In-memory backend; records are kept in id order per model
#[derive(Debug, Clone, Default)]
pub struct InMemoryBackend {
    tables: Arc<RwLock<HashMap<SubjectType, Table>>>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records of `model`, ignoring authorization
    pub async fn record_count(&self, model: SubjectType) -> usize {
        let tables = self.tables.read().await;
        tables.get(&model).map_or(0, |t| t.rows.len())
    }
}

fn merge(record: &mut Record, changes: &Map<String, Value>) {
    for (key, value) in changes {
        record.data.insert(key.clone(), value.clone());
    }
}

fn aggregate<'a>(aggregation: &Aggregation, records: impl Iterator<Item = &'a Record>) -> Value {
    let numbers: Vec<&serde_json::Number> = records
        .filter_map(|r| match r.data.get(aggregation.field()) {
            Some(Value::Number(n)) => Some(n),
            _ => None,
        })
        .collect();
    if numbers.is_empty() {
        return Value::Null;
    }

    let floats = numbers.iter().filter_map(|n| n.as_f64());
    match aggregation {
        Aggregation::Sum(_) => match numbers
            .iter()
            .try_fold(0i64, |acc, n| n.as_i64().and_then(|v| acc.checked_add(v)))
        {
            Some(total) => Value::from(total),
            None => Value::from(floats.sum::<f64>()),
        },
        Aggregation::Avg(_) => Value::from(floats.sum::<f64>() / numbers.len() as f64),
        Aggregation::Min(_) => pick(&numbers, |a, b| a < b),
        Aggregation::Max(_) => pick(&numbers, |a, b| a > b),
    }
}

fn pick(numbers: &[&serde_json::Number], better: impl Fn(f64, f64) -> bool) -> Value {
    let mut best = numbers[0];
    for n in &numbers[1..] {
        if let (Some(candidate), Some(current)) = (n.as_f64(), best.as_f64()) {
            if better(candidate, current) {
                best = n;
            }
        }
    }
    Value::Number(best.clone())
}

fn require_id(operation: Operation, id: Option<i64>) -> Result<i64> {
    id.ok_or_else(|| AuthzError::InvalidInput(format!("{:?} requires an id", operation)))
}

#[async_trait]
impl Backend for InMemoryBackend {
    async fn execute(&self, query: Query) -> Result<QueryOutput> {
        let Query {
            model,
            operation,
            id,
            filter,
            data,
            aggregation,
        } = query;

        let output = match operation {
            Operation::FindUnique => {
                let tables = self.tables.read().await;
                let id = require_id(operation, id)?;
                let record = tables.get(&model).and_then(|t| t.by_id(id, &filter)).cloned();
                QueryOutput::Record(record)
            }
            Operation::FindFirst => {
                let tables = self.tables.read().await;
                let record = tables.get(&model).and_then(|t| t.matching(&filter).next()).cloned();
                QueryOutput::Record(record)
            }
            Operation::FindMany => {
                let tables = self.tables.read().await;
                let records = tables
                    .get(&model)
                    .map(|t| t.matching(&filter).cloned().collect())
                    .unwrap_or_default();
                QueryOutput::Records(records)
            }
            Operation::Count => {
                let tables = self.tables.read().await;
                let count = tables.get(&model).map_or(0, |t| t.matching(&filter).count());
                QueryOutput::Count(count as u64)
            }
            Operation::Aggregate => {
                let aggregation = aggregation
                    .ok_or_else(|| AuthzError::InvalidInput("aggregate requires an aggregation".to_string()))?;
                let tables = self.tables.read().await;
                let value = tables
                    .get(&model)
                    .map_or(Value::Null, |t| aggregate(&aggregation, t.matching(&filter)));
                QueryOutput::Value(value)
            }
            Operation::Create => {
                let data = data.ok_or_else(|| AuthzError::InvalidInput("create requires data".to_string()))?;
                let mut tables = self.tables.write().await;
                let table = tables.entry(model).or_default();
                table.next_id += 1;
                let record = Record::new(model, table.next_id, prepare_insert(data));
                table.rows.insert(record.id, record.clone());
                QueryOutput::Record(Some(record))
            }
            Operation::Update => {
                let changes = prepare_update(data.unwrap_or_default());
                let id = require_id(operation, id)?;
                let mut tables = self.tables.write().await;
                let updated = tables
                    .get_mut(&model)
                    .and_then(|t| t.rows.get_mut(&id))
                    .filter(|record| filter.matches(&**record))
                    .map(|record| {
                        merge(record, &changes);
                        record.clone()
                    });
                QueryOutput::Record(updated)
            }
            Operation::UpdateMany => {
                let changes = prepare_update(data.unwrap_or_default());
                let mut tables = self.tables.write().await;
                let mut count = 0;
                if let Some(table) = tables.get_mut(&model) {
                    for record in table.rows.values_mut().filter(|r| filter.matches(&**r)) {
                        merge(record, &changes);
                        count += 1;
                    }
                }
                QueryOutput::Count(count)
            }
            Operation::Delete => {
                let id = require_id(operation, id)?;
                let mut tables = self.tables.write().await;
                let removed = match tables.get_mut(&model) {
                    Some(table) if table.by_id(id, &filter).is_some() => table.rows.remove(&id),
                    _ => None,
                };
                QueryOutput::Record(removed)
            }
            Operation::DeleteMany => {
                let mut tables = self.tables.write().await;
                let mut count = 0;
                if let Some(table) = tables.get_mut(&model) {
                    let before = table.rows.len();
                    table.rows.retain(|_, record| !filter.matches(&*record));
                    count = (before - table.rows.len()) as u64;
                }
                QueryOutput::Count(count)
            }
        };

        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fields(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    async fn seeded() -> InMemoryBackend {
        let store = InMemoryBackend::new();
        for author in [1, 1, 2] {
            store
                .execute(Query::create(SubjectType::Post, fields(json!({ "authorId": author }))))
                .await
                .unwrap();
        }
        store
    }

    #[tokio::test]
    async fn test_create_assigns_ids_and_timestamps() {
        let store = seeded().await;
        let record = store
            .execute(Query::find_unique(SubjectType::Post, 3))
            .await
            .unwrap()
            .into_record()
            .unwrap()
            .unwrap();

        assert_eq!(record.id, 3);
        assert_eq!(record.data.get("id"), Some(&json!(3)));
        assert!(record.data.contains_key("createdAt"));
        assert!(record.data.contains_key("updatedAt"));
        assert_eq!(store.record_count(SubjectType::Post).await, 3);
        assert_eq!(store.record_count(SubjectType::User).await, 0);
    }

    #[tokio::test]
    async fn test_find_many_and_count_apply_filter() {
        let store = seeded().await;
        let mine = Filter::eq("authorId", 1);

        let records = store
            .execute(Query::find_many(SubjectType::Post, mine.clone()))
            .await
            .unwrap()
            .into_records()
            .unwrap();
        assert_eq!(records.iter().map(|r| r.id).collect::<Vec<_>>(), vec![1, 2]);

        let count = store
            .execute(Query::count(SubjectType::Post, mine))
            .await
            .unwrap()
            .into_count()
            .unwrap();
        assert_eq!(count, 2);

        let none = store
            .execute(Query::find_many(SubjectType::Post, Filter::False))
            .await
            .unwrap()
            .into_records()
            .unwrap();
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn test_aggregates_skip_non_numeric_values() {
        let store = seeded().await;
        store
            .execute(Query::create(SubjectType::Post, fields(json!({ "authorId": "nobody" }))))
            .await
            .unwrap();

        let run = |aggregation: Aggregation, filter: Filter| {
            let store = store.clone();
            async move {
                store
                    .execute(Query::aggregate(SubjectType::Post, filter, aggregation))
                    .await
                    .unwrap()
                    .into_value()
                    .unwrap()
            }
        };

        assert_eq!(run(Aggregation::Sum("authorId".into()), Filter::True).await, json!(4));
        assert_eq!(run(Aggregation::Max("authorId".into()), Filter::True).await, json!(2));
        assert_eq!(run(Aggregation::Min("id".into()), Filter::True).await, json!(1));
        assert_eq!(run(Aggregation::Avg("authorId".into()), Filter::eq("authorId", 1)).await, json!(1.0));
        assert_eq!(run(Aggregation::Max("authorId".into()), Filter::False).await, Value::Null);
    }

    #[tokio::test]
    async fn test_sum_beyond_i64_falls_back_to_float() {
        let store = InMemoryBackend::new();
        for _ in 0..2 {
            store
                .execute(Query::create(SubjectType::Post, fields(json!({ "views": i64::MAX }))))
                .await
                .unwrap();
        }

        let total = store
            .execute(Query::aggregate(SubjectType::Post, Filter::True, Aggregation::Sum("views".into())))
            .await
            .unwrap()
            .into_value()
            .unwrap();
        assert_eq!(total, json!(2.0 * i64::MAX as f64));
    }

    #[tokio::test]
    async fn test_update_respects_filter() {
        let store = seeded().await;
        let changes = fields(json!({ "title": "edited", "id": 99 }));

        let blocked = store
            .execute(Query::update(SubjectType::Post, 3, changes.clone()).with_filter(Filter::eq("authorId", 1)))
            .await
            .unwrap()
            .into_record()
            .unwrap();
        assert!(blocked.is_none());

        let updated = store
            .execute(Query::update(SubjectType::Post, 1, changes))
            .await
            .unwrap()
            .into_record()
            .unwrap()
            .unwrap();
        assert_eq!(updated.id, 1);
        assert_eq!(updated.data.get("title"), Some(&json!("edited")));
        assert_eq!(updated.data.get("id"), Some(&json!(1)));
    }

    #[tokio::test]
    async fn test_update_many_counts() {
        let store = seeded().await;
        let count = store
            .execute(Query::update_many(
                SubjectType::Post,
                Filter::eq("authorId", 1),
                fields(json!({ "published": true })),
            ))
            .await
            .unwrap()
            .into_count()
            .unwrap();
        assert_eq!(count, 2);
    }

    #[tokio::test]
    async fn test_delete_and_delete_many() {
        let store = seeded().await;

        let kept = store
            .execute(Query::delete(SubjectType::Post, 3).with_filter(Filter::eq("authorId", 1)))
            .await
            .unwrap()
            .into_record()
            .unwrap();
        assert!(kept.is_none());
        assert_eq!(store.record_count(SubjectType::Post).await, 3);

        let removed = store
            .execute(Query::delete_many(SubjectType::Post, Filter::eq("authorId", 1)))
            .await
            .unwrap()
            .into_count()
            .unwrap();
        assert_eq!(removed, 2);
        assert_eq!(store.record_count(SubjectType::Post).await, 1);
    }
}
