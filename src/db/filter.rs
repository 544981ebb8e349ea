//! Event filters
//!
//! A filter selects events by attribute. Leaf filters map onto one
//! secondary index; `And`/`Or` combine them.

use crate::db::indexes::{behavior_roles, object_roles};
use crate::storage::{BehaviorRole, Event, EventKind, EventKindTag, ObjectId, ObjectRole};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventFilter {
    /// Every event
    #[default]
    All,
    Kind(EventKindTag),
    Host(u32),
    Thread { host_id: u32, thread_id: u32 },
    Depth(u32),
    /// Events emitted at one bytecode location
    Location { behavior_id: u32, bytecode_index: u32 },
    /// Events referring to a behavior, optionally in one role only
    Behavior {
        id: u32,
        #[serde(default)]
        role: Option<BehaviorRole>,
    },
    Field(u32),
    Variable(u32),
    /// Events referring to an object, optionally in one role only
    Object {
        id: ObjectId,
        #[serde(default)]
        role: Option<ObjectRole>,
    },
    /// Events matching every filter; empty means all events
    And(Vec<EventFilter>),
    /// Events matching any filter; empty means no event
    Or(Vec<EventFilter>),
}

impl EventFilter {
    /// Evaluate the filter against a single event
    pub fn matches(&self, event: &Event) -> bool {
        match self {
            EventFilter::All => true,
            EventFilter::Kind(tag) => event.kind.tag() == *tag,
            EventFilter::Host(host) => event.host_id == *host,
            EventFilter::Thread { host_id, thread_id } => {
                event.host_id == *host_id && event.thread_id == *thread_id
            }
            EventFilter::Depth(depth) => event.depth == *depth,
            EventFilter::Location {
                behavior_id,
                bytecode_index,
            } => event.location.is_some_and(|l| {
                l.behavior_id == *behavior_id && l.bytecode_index == *bytecode_index
            }),
            EventFilter::Behavior { id, role } => behavior_roles(event)
                .iter()
                .any(|(b, r)| b == id && role.map_or(true, |role| role == *r)),
            EventFilter::Field(field) => {
                matches!(&event.kind, EventKind::FieldWrite { field: f, .. } if f == field)
            }
            EventFilter::Variable(variable) => {
                matches!(&event.kind, EventKind::LocalWrite { variable: v, .. } if v == variable)
            }
            EventFilter::Object { id, role } => object_roles(event)
                .iter()
                .any(|(o, r)| o == id && role.map_or(true, |role| role == *r)),
            EventFilter::And(filters) => filters.iter().all(|f| f.matches(event)),
            EventFilter::Or(filters) => filters.iter().any(|f| f.matches(event)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(field: u32, target: u64) -> Event {
        Event::new(
            10,
            1,
            2,
            EventKind::FieldWrite {
                field,
                target: Some(ObjectId::new(1, target)),
                value: None,
            },
        )
    }

    #[test]
    fn test_matches() {
        let event = write(5, 9);
        assert!(EventFilter::Field(5).matches(&event));
        assert!(!EventFilter::Field(6).matches(&event));
        assert!(EventFilter::Object {
            id: ObjectId::new(1, 9),
            role: Some(ObjectRole::Target)
        }
        .matches(&event));
        assert!(!EventFilter::Object {
            id: ObjectId::new(1, 9),
            role: Some(ObjectRole::Value)
        }
        .matches(&event));
        assert!(EventFilter::And(vec![]).matches(&event));
        assert!(!EventFilter::Or(vec![]).matches(&event));
        assert!(EventFilter::Or(vec![EventFilter::Host(3), EventFilter::Thread { host_id: 1, thread_id: 2 }])
            .matches(&event));
    }

    #[test]
    fn test_json_shape() {
        let filter: EventFilter = serde_json::from_str(
            r#"{"and": [{"kind": "field_write"}, {"behavior": {"id": 4, "role": "called"}}, "all"]}"#,
        )
        .unwrap();
        assert_eq!(
            filter,
            EventFilter::And(vec![
                EventFilter::Kind(EventKindTag::FieldWrite),
                EventFilter::Behavior {
                    id: 4,
                    role: Some(BehaviorRole::Called)
                },
                EventFilter::All,
            ])
        );
    }
}
