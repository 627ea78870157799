//! Core authorization types

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use crate::error::AuthzError;

/// Caller role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Role {
    /// Full control over every subject
    Admin,
    /// Ordinary authenticated user
    User,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Admin => f.write_str("ADMIN"),
            Role::User => f.write_str("USER"),
        }
    }
}

impl FromStr for Role {
    type Err = AuthzError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "ADMIN" => Ok(Role::Admin),
            "USER" => Ok(Role::User),
            other => Err(AuthzError::InvalidInput(format!("unknown role '{}'", other))),
        }
    }
}

/// The identity a request executes on behalf of
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Caller {
    /// Caller identifier, compared against ownership fields such as `authorId`
    pub id: i64,

    /// Optional contact address
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,

    /// Caller role
    pub role: Role,

    /// Additional attributes
    #[serde(default)]
    pub attributes: HashMap<String, String>,
}

impl Caller {
    /// Create a caller with the given id and role
    pub fn new(id: i64, role: Role) -> Self {
        Self {
            id,
            email: None,
            role,
            attributes: HashMap::new(),
        }
    }

    /// Ordinary user shorthand
    pub fn user(id: i64) -> Self {
        Self::new(id, Role::User)
    }

    /// Administrator shorthand
    pub fn admin(id: i64) -> Self {
        Self::new(id, Role::Admin)
    }

    /// Set the email address
    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    /// Add an attribute to the caller
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

/// Action a rule grants or denies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    /// Any action
    Manage,
    Create,
    Read,
    Update,
    Delete,
}

impl Action {
    /// Whether a rule declared for `self` covers a request for `requested`
    pub fn matches(self, requested: Action) -> bool {
        self == Action::Manage || self == requested
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Action::Manage => "manage",
            Action::Create => "create",
            Action::Read => "read",
            Action::Update => "update",
            Action::Delete => "delete",
        };
        f.write_str(name)
    }
}

impl FromStr for Action {
    type Err = AuthzError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "manage" => Ok(Action::Manage),
            "create" => Ok(Action::Create),
            "read" => Ok(Action::Read),
            "update" => Ok(Action::Update),
            "delete" => Ok(Action::Delete),
            other => Err(AuthzError::InvalidInput(format!("unknown action '{}'", other))),
        }
    }
}

/// Kind of data entity a rule or check applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SubjectType {
    /// Wildcard subject
    #[serde(rename = "all")]
    All,
    Post,
    User,
}

impl SubjectType {
    /// Whether a rule declared for `self` covers a request for `requested`
    pub fn matches(self, requested: SubjectType) -> bool {
        self == SubjectType::All || self == requested
    }
}

impl fmt::Display for SubjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SubjectType::All => "all",
            SubjectType::Post => "Post",
            SubjectType::User => "User",
        };
        f.write_str(name)
    }
}

impl FromStr for SubjectType {
    type Err = AuthzError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "all" => Ok(SubjectType::All),
            "Post" => Ok(SubjectType::Post),
            "User" => Ok(SubjectType::User),
            other => Err(AuthzError::InvalidInput(format!("unknown subject type '{}'", other))),
        }
    }
}

/// Rule effect
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Effect {
    Allow,
    Deny,
}

impl Effect {
    pub fn is_allow(self) -> bool {
        self == Effect::Allow
    }
}

/// A live instance that rule conditions can be evaluated against
pub trait Subject {
    /// Entity kind of this instance
    fn subject_type(&self) -> SubjectType;

    /// Field value by name, `None` if the field is absent
    fn field(&self, name: &str) -> Option<Value>;
}

/// Untyped record as stored by a backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Entity kind
    pub model: SubjectType,

    /// Primary key
    pub id: i64,

    /// Field values, including `id`
    pub data: Map<String, Value>,
}

impl Record {
    /// Create a record, mirroring `id` into the field map
    pub fn new(model: SubjectType, id: i64, mut data: Map<String, Value>) -> Self {
        data.insert("id".to_string(), Value::from(id));
        Self { model, id, data }
    }

    /// Deserialize the field map into a typed model
    pub fn decode<T: serde::de::DeserializeOwned>(&self) -> crate::error::Result<T> {
        Ok(serde_json::from_value(Value::Object(self.data.clone()))?)
    }
}

impl Subject for Record {
    fn subject_type(&self) -> SubjectType {
        self.model
    }

    fn field(&self, name: &str) -> Option<Value> {
        self.data.get(name).cloned()
    }
}

/// A bare field map tagged with a subject type, for checks on data that has
/// not been persisted yet.
#[derive(Debug, Clone, Copy)]
pub struct Draft<'a> {
    pub model: SubjectType,
    pub data: &'a Map<String, Value>,
}

impl Subject for Draft<'_> {
    fn subject_type(&self) -> SubjectType {
        self.model
    }

    fn field(&self, name: &str) -> Option<Value> {
        self.data.get(name).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_caller_creation() {
        let caller = Caller::user(7)
            .with_email("alice@example.com")
            .with_attribute("department", "engineering");

        assert_eq!(caller.id, 7);
        assert_eq!(caller.role, Role::User);
        assert!(!caller.is_admin());
        assert_eq!(caller.attributes.get("department"), Some(&"engineering".to_string()));
        assert!(Caller::admin(1).is_admin());
    }

    #[test]
    fn test_role_parsing() {
        assert_eq!("admin".parse::<Role>().unwrap(), Role::Admin);
        assert_eq!("USER".parse::<Role>().unwrap(), Role::User);
        assert!("root".parse::<Role>().is_err());
    }

    #[test]
    fn test_action_manage_matches_everything() {
        for action in [Action::Create, Action::Read, Action::Update, Action::Delete, Action::Manage] {
            assert!(Action::Manage.matches(action));
        }
        assert!(Action::Read.matches(Action::Read));
        assert!(!Action::Read.matches(Action::Delete));
    }

    #[test]
    fn test_subject_type_all_matches_everything() {
        assert!(SubjectType::All.matches(SubjectType::Post));
        assert!(SubjectType::All.matches(SubjectType::User));
        assert!(SubjectType::Post.matches(SubjectType::Post));
        assert!(!SubjectType::Post.matches(SubjectType::User));
    }

    #[test]
    fn test_display_round_trips_through_from_str() {
        assert_eq!(Action::Delete.to_string().parse::<Action>().unwrap(), Action::Delete);
        assert_eq!(SubjectType::Post.to_string().parse::<SubjectType>().unwrap(), SubjectType::Post);
        assert_eq!(SubjectType::All.to_string(), "all");
    }

    #[test]
    fn test_record_mirrors_id() {
        let data = json!({ "title": "hello" }).as_object().cloned().unwrap();
        let record = Record::new(SubjectType::Post, 42, data);

        assert_eq!(record.field("id"), Some(json!(42)));
        assert_eq!(record.field("title"), Some(json!("hello")));
        assert_eq!(record.field("missing"), None);
        assert_eq!(record.subject_type(), SubjectType::Post);
    }
}
