//! Rule engine properties
//!
//! Filter synthesis must agree with per-instance resolution for any rule set,
//! and building twice from the same caller must give the same answers.

use inkwell_authz::{
    ability::{Ability, AbilityFactory, Condition, Rule},
    context::{self, RequestContext},
    query::{AuthorizedBackend, Backend, Query},
    store::InMemoryBackend,
    types::{Action, Caller, Effect, Record, Role, SubjectType},
    Filter,
};
use proptest::prelude::*;
use serde_json::{json, Map, Value};

const ACTIONS: [Action; 5] = [
    Action::Manage,
    Action::Create,
    Action::Read,
    Action::Update,
    Action::Delete,
];

fn post(author_id: Option<i64>, published: bool) -> Record {
    let mut data = Map::new();
    if let Some(author_id) = author_id {
        data.insert("authorId".to_string(), json!(author_id));
    }
    data.insert("published".to_string(), Value::Bool(published));
    Record::new(SubjectType::Post, 1, data)
}

// ============================================================================
// STRATEGIES
// ============================================================================

fn action() -> impl Strategy<Value = Action> {
    prop::sample::select(ACTIONS.to_vec())
}

fn subject_type() -> impl Strategy<Value = SubjectType> {
    prop::sample::select(vec![SubjectType::All, SubjectType::Post, SubjectType::User])
}

fn condition() -> impl Strategy<Value = Option<Condition>> {
    prop_oneof![
        Just(None),
        (1i64..4).prop_map(|id| Some(Condition::eq("authorId", id))),
        (1i64..4).prop_map(|id| Some(Condition::ne("authorId", id))),
        (1i64..4, any::<bool>())
            .prop_map(|(id, published)| Some(Condition::eq("authorId", id).and_eq("published", published))),
    ]
}

fn rule() -> impl Strategy<Value = Rule> {
    (any::<bool>(), action(), subject_type(), condition()).prop_map(|(allow, action, subject, condition)| Rule {
        effect: if allow { Effect::Allow } else { Effect::Deny },
        action,
        subject,
        condition,
    })
}

fn record() -> impl Strategy<Value = Record> {
    (prop::option::of(1i64..4), any::<bool>()).prop_map(|(author, published)| post(author, published))
}

fn caller() -> impl Strategy<Value = Option<Caller>> {
    prop::option::of((1i64..100, any::<bool>()).prop_map(|(id, admin)| {
        Caller::new(id, if admin { Role::Admin } else { Role::User })
    }))
}

// ============================================================================
// PROPERTIES
// ============================================================================

proptest! {
    #[test]
    fn prop_filter_agrees_with_resolve(
        rules in prop::collection::vec(rule(), 0..8),
        records in prop::collection::vec(record(), 1..6),
    ) {
        let ability = Ability::new(rules);

        for action in ACTIONS {
            let filter = ability.filter_for(action, SubjectType::Post);
            for record in &records {
                let allowed = ability.resolve(action, SubjectType::Post, Some(record)) == Effect::Allow;
                prop_assert_eq!(
                    filter.matches(record),
                    allowed,
                    "action={} filter={} record={:?}",
                    action,
                    filter,
                    record.data
                );
            }
        }
    }

    #[test]
    fn prop_build_is_idempotent(caller in caller(), records in prop::collection::vec(record(), 1..6)) {
        let first = AbilityFactory::for_caller(caller.as_ref()).unwrap();
        let second = AbilityFactory::for_caller(caller.as_ref()).unwrap();

        for action in ACTIONS {
            for subject in [SubjectType::All, SubjectType::Post, SubjectType::User] {
                prop_assert_eq!(
                    first.resolve(action, subject, None),
                    second.resolve(action, subject, None)
                );
            }
            for record in &records {
                prop_assert_eq!(first.can(action, record), second.can(action, record));
            }
        }
    }

    #[test]
    fn prop_bulk_operations_touch_exactly_the_permitted_rows(
        caller in caller(),
        authors in prop::collection::vec(prop::option::of(1i64..4), 1..8),
    ) {
        tokio_test::block_on(async {
            let store = InMemoryBackend::new();
            for author in &authors {
                let mut data = Map::new();
                if let Some(author) = author {
                    data.insert("authorId".to_string(), json!(author));
                }
                store.execute(Query::create(SubjectType::Post, data)).await.unwrap();
            }

            let ability = AbilityFactory::for_caller(caller.as_ref()).unwrap();
            let rows = store
                .execute(Query::find_many(SubjectType::Post, Filter::True))
                .await
                .unwrap()
                .into_records()
                .unwrap();
            let readable = rows.iter().filter(|r| ability.can(Action::Read, *r)).count() as u64;
            let deletable = rows.iter().filter(|r| ability.can(Action::Delete, *r)).count() as u64;

            let authorized = AuthorizedBackend::new(store.clone());
            let ctx = RequestContext::for_caller(uuid::Uuid::new_v4(), caller.clone());
            let (counted, deleted) = context::install(ctx, async {
                let counted = authorized
                    .execute(Query::count(SubjectType::Post, Filter::True))
                    .await?
                    .into_count()?;
                let deleted = authorized
                    .execute(Query::delete_many(SubjectType::Post, Filter::True))
                    .await?
                    .into_count()?;
                Ok::<_, inkwell_authz::AuthzError>((counted, deleted))
            })
            .await
            .unwrap();

            prop_assert_eq!(counted, readable);
            prop_assert_eq!(deleted, deletable);
            prop_assert_eq!(store.record_count(SubjectType::Post).await as u64, authors.len() as u64 - deletable);
            Ok(())
        })?;
    }

    #[test]
    fn prop_admin_allows_everything(id in 1i64..1000, records in prop::collection::vec(record(), 1..6)) {
        let ability = AbilityFactory::for_caller(Some(&Caller::admin(id))).unwrap();

        for action in ACTIONS {
            for record in &records {
                prop_assert!(ability.can(action, record));
            }
        }
    }
}

// ============================================================================
// FIXED SCENARIOS
// ============================================================================

#[test]
fn test_anonymous_scenario() {
    let ability = AbilityFactory::for_caller(None).unwrap();

    for author in [None, Some(1), Some(2)] {
        let record = post(author, true);
        assert_eq!(ability.resolve(Action::Read, SubjectType::Post, Some(&record)), Effect::Allow);
        assert_eq!(ability.resolve(Action::Create, SubjectType::Post, Some(&record)), Effect::Deny);
        assert_eq!(ability.resolve(Action::Delete, SubjectType::Post, Some(&record)), Effect::Deny);
    }
}

#[test]
fn test_foreign_delete_deny_overrides_manage() {
    let ability = AbilityFactory::for_caller(Some(&Caller::user(5))).unwrap();

    assert!(ability.can(Action::Delete, &post(Some(5), false)));
    assert!(!ability.can(Action::Delete, &post(Some(6), false)));
    // Posts with no author are not owned by anyone
    assert!(!ability.can(Action::Delete, &post(None, false)));
    assert!(!ability.can(Action::Update, &post(None, false)));
}
