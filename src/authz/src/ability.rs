//! Rule engine
//!
//! An [`Ability`] is the ordered rule set compiled for one caller. Later rules
//! take precedence over earlier ones: [`Ability::resolve`] scans in reverse
//! definition order and the first matching rule decides. Nothing matching
//! means deny.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

use crate::error::{AuthzError, Result};
use crate::filter::Filter;
use crate::types::{Action, Caller, Effect, Subject, SubjectType};

/// Ownership field on posts
pub const AUTHOR_ID: &str = "authorId";

/// Comparison operator in a field predicate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Comparison {
    Eq,
    Ne,
}

/// Single `field op value` test
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldPredicate {
    pub field: String,
    pub op: Comparison,
    pub value: Value,
}

impl FieldPredicate {
    fn to_filter(&self) -> Filter {
        match self.op {
            Comparison::Eq => Filter::eq(self.field.clone(), self.value.clone()),
            Comparison::Ne => Filter::ne(self.field.clone(), self.value.clone()),
        }
    }
}

/// Conjunction of field predicates attached to a rule
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Condition {
    predicates: Vec<FieldPredicate>,
}

impl Condition {
    /// `field == value`
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::default().and_eq(field, value)
    }

    /// `field != value`
    pub fn ne(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::default().and_ne(field, value)
    }

    pub fn and_eq(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.push(field.into(), Comparison::Eq, value.into())
    }

    pub fn and_ne(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.push(field.into(), Comparison::Ne, value.into())
    }

    fn push(mut self, field: String, op: Comparison, value: Value) -> Self {
        self.predicates.push(FieldPredicate { field, op, value });
        self
    }

    pub fn predicates(&self) -> &[FieldPredicate] {
        &self.predicates
    }

    /// Render into the backend filter dialect
    pub fn to_filter(&self) -> Filter {
        Filter::all(self.predicates.iter().map(FieldPredicate::to_filter))
    }

    /// Evaluate against a live instance
    pub fn matches(&self, subject: &dyn Subject) -> bool {
        self.to_filter().matches(subject)
    }
}

/// Atomic allow/deny statement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    pub effect: Effect,
    pub action: Action,
    pub subject: SubjectType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<Condition>,
}

impl Rule {
    /// Whether the rule's action and subject type cover the request
    pub fn applies_to(&self, action: Action, subject_type: SubjectType) -> bool {
        self.action.matches(action) && self.subject.matches(subject_type)
    }

    /// Whether the rule's condition holds.
    ///
    /// Without an instance the question is type-level ("may the caller act on
    /// some record of this type"): a conditional allow counts as a match and a
    /// conditional deny does not.
    pub fn matches_instance(&self, instance: Option<&dyn Subject>) -> bool {
        match (&self.condition, instance) {
            (None, _) => true,
            (Some(condition), Some(subject)) => condition.matches(subject),
            (Some(_), None) => self.effect.is_allow(),
        }
    }

    /// Condition as a filter, `True` when unconditional
    pub fn condition_filter(&self) -> Filter {
        self.condition
            .as_ref()
            .map_or(Filter::True, Condition::to_filter)
    }
}

/// Ordered, immutable rule set for one caller
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Ability {
    rules: Vec<Rule>,
}

impl Ability {
    pub fn new(rules: Vec<Rule>) -> Self {
        Self { rules }
    }

    /// Rule set for a request with no caller
    pub fn anonymous() -> Self {
        AbilityFactory::build_anonymous()
    }

    /// Rule set that matches nothing
    pub fn deny_all() -> Self {
        Self::default()
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    pub fn into_shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    /// Decide `action` on `subject_type`, optionally against a live instance
    pub fn resolve(
        &self,
        action: Action,
        subject_type: SubjectType,
        instance: Option<&dyn Subject>,
    ) -> Effect {
        let decision = self
            .rules
            .iter()
            .rev()
            .find(|rule| rule.applies_to(action, subject_type) && rule.matches_instance(instance))
            .map(|rule| rule.effect)
            .unwrap_or(Effect::Deny);

        debug!(
            action = %action,
            subject = %subject_type,
            instance = instance.is_some(),
            decision = ?decision,
            "Resolved permission"
        );

        decision
    }

    /// Whether `action` is allowed on this concrete instance
    pub fn can(&self, action: Action, subject: &dyn Subject) -> bool {
        self.resolve(action, subject.subject_type(), Some(subject))
            .is_allow()
    }

    pub fn cannot(&self, action: Action, subject: &dyn Subject) -> bool {
        !self.can(action, subject)
    }

    /// Type-level check: whether `action` is allowed on at least some records
    pub fn can_on_type(&self, action: Action, subject_type: SubjectType) -> bool {
        self.resolve(action, subject_type, None).is_allow()
    }

    /// Synthesize the row-level filter for `action` on `subject_type`.
    ///
    /// Rules are folded in definition order so that each later rule wraps the
    /// earlier result: an allow widens it (`cond OR acc`), a deny narrows it
    /// (`NOT cond AND acc`). A row therefore passes exactly when the
    /// highest-precedence rule matching it is an allow, which is what
    /// [`Ability::resolve`] decides for the same row.
    pub fn filter_for(&self, action: Action, subject_type: SubjectType) -> Filter {
        let filter = self
            .rules
            .iter()
            .filter(|rule| rule.applies_to(action, subject_type))
            .fold(Filter::False, |acc, rule| match rule.effect {
                Effect::Allow => rule.condition_filter().or(acc),
                Effect::Deny => rule.condition_filter().not().and(acc),
            });

        debug!(
            action = %action,
            subject = %subject_type,
            filter = %filter,
            "Synthesized query filter"
        );

        filter
    }
}

/// Declarative rule set builder; rules keep declaration order
#[derive(Debug, Default)]
pub struct AbilityBuilder {
    rules: Vec<Rule>,
}

impl AbilityBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn can(&mut self, action: Action, subject: SubjectType) -> &mut Self {
        self.push(Effect::Allow, action, subject, None)
    }

    pub fn can_where(&mut self, action: Action, subject: SubjectType, condition: Condition) -> &mut Self {
        self.push(Effect::Allow, action, subject, Some(condition))
    }

    pub fn cannot(&mut self, action: Action, subject: SubjectType) -> &mut Self {
        self.push(Effect::Deny, action, subject, None)
    }

    pub fn cannot_where(&mut self, action: Action, subject: SubjectType, condition: Condition) -> &mut Self {
        self.push(Effect::Deny, action, subject, Some(condition))
    }

    fn push(
        &mut self,
        effect: Effect,
        action: Action,
        subject: SubjectType,
        condition: Option<Condition>,
    ) -> &mut Self {
        self.rules.push(Rule {
            effect,
            action,
            subject,
            condition,
        });
        self
    }

    pub fn build(&mut self) -> Ability {
        Ability::new(std::mem::take(&mut self.rules))
    }
}

/// Compiles a caller into the service's fixed policy
#[derive(Debug, Clone, Copy, Default)]
pub struct AbilityFactory;

impl AbilityFactory {
    /// Build the rule set for `caller`; `None` is an anonymous request.
    ///
    /// Fails only when the caller's attributes cannot express ownership.
    pub fn for_caller(caller: Option<&Caller>) -> Result<Ability> {
        let Some(caller) = caller else {
            return Ok(Self::build_anonymous());
        };

        if caller.id <= 0 {
            return Err(AuthzError::PolicyConstruction(format!(
                "caller id must be positive, got {}",
                caller.id
            )));
        }

        let mut builder = AbilityBuilder::new();

        if caller.is_admin() {
            builder.can(Action::Manage, SubjectType::All);
        } else {
            builder
                .can(Action::Read, SubjectType::All)
                .can(Action::Create, SubjectType::Post)
                .can_where(Action::Manage, SubjectType::Post, Condition::eq(AUTHOR_ID, caller.id))
                .cannot_where(Action::Delete, SubjectType::Post, Condition::ne(AUTHOR_ID, caller.id));
        }

        let ability = builder.build();
        debug!(caller_id = caller.id, role = %caller.role, rules = ability.rules().len(), "Built ability");
        Ok(ability)
    }

    fn build_anonymous() -> Ability {
        AbilityBuilder::new()
            .can(Action::Read, SubjectType::All)
            .build()
    }
}
