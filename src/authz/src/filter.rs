//! Backend filter dialect
//!
//! [`Filter`] is an immutable predicate value. Authorization narrows a query by
//! combining two filters with [`Filter::and`], never by mutating a query in
//! place. Filters evaluate in memory through [`Filter::matches`] and render to
//! PostgreSQL through [`Filter::to_sql`]; both use two-valued logic so that a
//! missing field behaves the same in either backend.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use crate::error::{AuthzError, Result};
use crate::types::Subject;

/// Predicate over record fields
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Filter {
    /// Matches every record
    True,
    /// Matches no record
    False,
    /// Field equals value; false when the field is missing
    Eq(String, Value),
    /// Field differs from value; true when the field is missing
    Ne(String, Value),
    And(Vec<Filter>),
    Or(Vec<Filter>),
    Not(Box<Filter>),
}

impl Default for Filter {
    fn default() -> Self {
        Filter::True
    }
}

impl Filter {
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Eq(field.into(), value.into())
    }

    pub fn ne(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Ne(field.into(), value.into())
    }

    /// Conjunction of every filter; `True` when empty
    pub fn all(filters: impl IntoIterator<Item = Filter>) -> Self {
        let mut parts = Vec::new();
        for filter in filters {
            match filter {
                Filter::True => {}
                Filter::False => return Filter::False,
                Filter::And(inner) => inner.into_iter().for_each(|f| push_unique(&mut parts, f)),
                other => push_unique(&mut parts, other),
            }
        }

        match parts.len() {
            0 => Filter::True,
            1 => parts.remove(0),
            _ => Filter::And(parts),
        }
    }

    /// Disjunction of every filter; `False` when empty
    pub fn any(filters: impl IntoIterator<Item = Filter>) -> Self {
        let mut parts = Vec::new();
        for filter in filters {
            match filter {
                Filter::False => {}
                Filter::True => return Filter::True,
                Filter::Or(inner) => inner.into_iter().for_each(|f| push_unique(&mut parts, f)),
                other => push_unique(&mut parts, other),
            }
        }

        match parts.len() {
            0 => Filter::False,
            1 => parts.remove(0),
            _ => Filter::Or(parts),
        }
    }

    /// Logical AND of two filters
    pub fn and(self, other: Filter) -> Self {
        Filter::all([self, other])
    }

    /// Logical OR of two filters
    pub fn or(self, other: Filter) -> Self {
        Filter::any([self, other])
    }

    /// Logical negation
    #[allow(clippy::should_implement_trait)]
    pub fn not(self) -> Self {
        match self {
            Filter::True => Filter::False,
            Filter::False => Filter::True,
            Filter::Eq(field, value) => Filter::Ne(field, value),
            Filter::Ne(field, value) => Filter::Eq(field, value),
            Filter::Not(inner) => *inner,
            other => Filter::Not(Box::new(other)),
        }
    }

    pub fn is_false(&self) -> bool {
        matches!(self, Filter::False)
    }

    pub fn is_true(&self) -> bool {
        matches!(self, Filter::True)
    }

    /// Evaluate the filter against a live instance
    pub fn matches(&self, subject: &dyn Subject) -> bool {
        match self {
            Filter::True => true,
            Filter::False => false,
            Filter::Eq(field, value) => subject
                .field(field)
                .map_or(false, |actual| values_equal(&actual, value)),
            Filter::Ne(field, value) => !subject
                .field(field)
                .map_or(false, |actual| values_equal(&actual, value)),
            Filter::And(parts) => parts.iter().all(|f| f.matches(subject)),
            Filter::Or(parts) => parts.iter().any(|f| f.matches(subject)),
            Filter::Not(inner) => !inner.matches(subject),
        }
    }

    /// Render as a PostgreSQL predicate over a JSONB `data` column.
    ///
    /// `id` lives in its own column and is compared there.
    ///
    /// Placeholders are numbered after whatever `params` already holds, so a
    /// caller can render several fragments into one statement.
    pub fn to_sql(&self, params: &mut Vec<SqlParam>) -> Result<String> {
        let sql = match self {
            Filter::True => "TRUE".to_string(),
            Filter::False => "FALSE".to_string(),
            Filter::Eq(field, value) => {
                let (field_ref, value_ref) = bind_field(field, value, params)?;
                format!("COALESCE({} = {}, FALSE)", field_ref, value_ref)
            }
            Filter::Ne(field, value) => {
                let (field_ref, value_ref) = bind_field(field, value, params)?;
                format!("{} IS DISTINCT FROM {}", field_ref, value_ref)
            }
            Filter::And(parts) => join_sql(parts, " AND ", "TRUE", params)?,
            Filter::Or(parts) => join_sql(parts, " OR ", "FALSE", params)?,
            Filter::Not(inner) => format!("NOT ({})", inner.to_sql(params)?),
        };

        Ok(sql)
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Filter::True => f.write_str("true"),
            Filter::False => f.write_str("false"),
            Filter::Eq(field, value) => write!(f, "{} == {}", field, value),
            Filter::Ne(field, value) => write!(f, "{} != {}", field, value),
            Filter::And(parts) => write_joined(f, parts, " && "),
            Filter::Or(parts) => write_joined(f, parts, " || "),
            Filter::Not(inner) => write!(f, "!({})", inner),
        }
    }
}

fn push_unique(parts: &mut Vec<Filter>, filter: Filter) {
    if !parts.contains(&filter) {
        parts.push(filter);
    }
}

fn write_joined(f: &mut fmt::Formatter<'_>, parts: &[Filter], sep: &str) -> fmt::Result {
    f.write_str("(")?;
    for (i, part) in parts.iter().enumerate() {
        if i > 0 {
            f.write_str(sep)?;
        }
        write!(f, "{}", part)?;
    }
    f.write_str(")")
}

/// Bound parameter for a rendered SQL predicate
#[derive(Debug, Clone, PartialEq)]
pub enum SqlParam {
    Text(String),
    Json(Value),
}

/// Column holding the record id, outside the JSONB data
const ID_COLUMN: &str = "id";

fn bind_field(field: &str, value: &Value, params: &mut Vec<SqlParam>) -> Result<(String, String)> {
    if !is_identifier(field) {
        return Err(AuthzError::InvalidInput(format!("invalid field name '{}'", field)));
    }

    let field_ref = if field == ID_COLUMN {
        format!("to_jsonb({})", ID_COLUMN)
    } else {
        params.push(SqlParam::Text(field.to_string()));
        format!("(data -> ${}::text)", params.len())
    };
    params.push(SqlParam::Json(value.clone()));
    let value_ref = format!("${}::jsonb", params.len());

    Ok((field_ref, value_ref))
}

fn join_sql(parts: &[Filter], sep: &str, empty: &str, params: &mut Vec<SqlParam>) -> Result<String> {
    if parts.is_empty() {
        return Ok(empty.to_string());
    }

    let rendered = parts
        .iter()
        .map(|part| part.to_sql(params))
        .collect::<Result<Vec<_>>>()?;

    Ok(format!("({})", rendered.join(sep)))
}

fn is_identifier(field: &str) -> bool {
    let mut chars = field.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// JSON equality that treats `1` and `1.0` as the same number
fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_i64(), y.as_i64()) {
            (Some(x), Some(y)) => x == y,
            _ => x.as_f64() == y.as_f64(),
        },
        _ => a == b,
    }
}
