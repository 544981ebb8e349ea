//! Core data types for the trace store
//!
//! This module defines the records flowing through the ingestion pipeline:
//! - `Event`: A single execution-trace event
//! - `EventKind`: The kind-specific operands of an event
//! - `ObjectId`: A 64-bit object id split into host id and per-host sequence
//! - `BehaviorRole` and `ObjectRole`: How an id participates in an event

use serde::{Deserialize, Serialize};
use std::fmt;

/// A single execution-trace event
///
/// Timestamps are globally comparable but only monotonic per source thread.
/// Events are never mutated once created.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Event {
    /// Event timestamp (nanoseconds)
    pub timestamp: u64,
    /// Host that produced the event
    pub host_id: u32,
    /// Thread id, unique within its host
    pub thread_id: u32,
    /// Call stack depth at which the event occurred
    pub depth: u32,
    /// Behavior and bytecode index where the operation took place
    #[serde(default)]
    pub location: Option<Location>,
    /// Kind-specific operands
    pub kind: EventKind,
}

impl Event {
    /// Create an event with no operation location
    pub fn new(timestamp: u64, host_id: u32, thread_id: u32, kind: EventKind) -> Self {
        Self {
            timestamp,
            host_id,
            thread_id,
            depth: 0,
            location: None,
            kind,
        }
    }

    /// Builder method: set call depth
    pub fn depth(mut self, depth: u32) -> Self {
        self.depth = depth;
        self
    }

    /// Builder method: set operation location
    pub fn at(mut self, behavior_id: u32, bytecode_index: u32) -> Self {
        self.location = Some(Location {
            behavior_id,
            bytecode_index,
        });
        self
    }

    /// Key of the producing thread, unique across hosts
    pub fn thread_key(&self) -> u64 {
        thread_key(self.host_id, self.thread_id)
    }
}

/// Combine a host id and a thread id into one index key
pub fn thread_key(host_id: u32, thread_id: u32) -> u64 {
    ((host_id as u64) << 32) | thread_id as u64
}

/// Where in the instrumented code an event was emitted
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Location {
    pub behavior_id: u32,
    pub bytecode_index: u32,
}

/// Kind-specific event operands
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    MethodCall {
        called: u32,
        executed: Option<u32>,
        target: Option<ObjectId>,
        args: Vec<ObjectId>,
    },
    Instantiation {
        called: u32,
        executed: Option<u32>,
        target: Option<ObjectId>,
        args: Vec<ObjectId>,
    },
    SuperCall {
        called: u32,
        executed: Option<u32>,
        target: Option<ObjectId>,
        args: Vec<ObjectId>,
    },
    BehaviorExit {
        behavior: u32,
        result: Option<ObjectId>,
        has_thrown: bool,
    },
    FieldWrite {
        field: u32,
        target: Option<ObjectId>,
        value: Option<ObjectId>,
    },
    LocalWrite {
        variable: u32,
        value: Option<ObjectId>,
    },
    ArrayWrite {
        target: ObjectId,
        index: u32,
        value: Option<ObjectId>,
    },
    Exception {
        behavior: u32,
        exception: ObjectId,
    },
}

impl EventKind {
    /// The fieldless tag used to index events by kind
    pub fn tag(&self) -> EventKindTag {
        match self {
            EventKind::MethodCall { .. } => EventKindTag::MethodCall,
            EventKind::Instantiation { .. } => EventKindTag::Instantiation,
            EventKind::SuperCall { .. } => EventKindTag::SuperCall,
            EventKind::BehaviorExit { .. } => EventKindTag::BehaviorExit,
            EventKind::FieldWrite { .. } => EventKindTag::FieldWrite,
            EventKind::LocalWrite { .. } => EventKindTag::LocalWrite,
            EventKind::ArrayWrite { .. } => EventKindTag::ArrayWrite,
            EventKind::Exception { .. } => EventKindTag::Exception,
        }
    }
}

/// Event kinds without operands
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum EventKindTag {
    MethodCall = 0,
    Instantiation = 1,
    SuperCall = 2,
    BehaviorExit = 3,
    FieldWrite = 4,
    LocalWrite = 5,
    ArrayWrite = 6,
    Exception = 7,
}

impl fmt::Display for EventKindTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EventKindTag::MethodCall => "method_call",
            EventKindTag::Instantiation => "instantiation",
            EventKindTag::SuperCall => "super_call",
            EventKindTag::BehaviorExit => "behavior_exit",
            EventKindTag::FieldWrite => "field_write",
            EventKindTag::LocalWrite => "local_write",
            EventKindTag::ArrayWrite => "array_write",
            EventKindTag::Exception => "exception",
        };
        f.write_str(name)
    }
}

/// A 64-bit object id
///
/// The high `HOST_BITS` bits carry the id of the host that created the
/// object, the remaining bits a per-host sequence number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ObjectId(pub u64);

impl ObjectId {
    pub const HOST_BITS: u32 = 8;
    const SEQUENCE_BITS: u32 = 64 - Self::HOST_BITS;
    const SEQUENCE_MASK: u64 = (1 << Self::SEQUENCE_BITS) - 1;

    /// Build an id from its host and sequence parts
    pub fn new(host_id: u32, sequence: u64) -> Self {
        ObjectId(((host_id as u64) << Self::SEQUENCE_BITS) | (sequence & Self::SEQUENCE_MASK))
    }

    pub fn host_id(self) -> u32 {
        (self.0 >> Self::SEQUENCE_BITS) as u32
    }

    pub fn sequence(self) -> u64 {
        self.0 & Self::SEQUENCE_MASK
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host_id(), self.sequence())
    }
}

/// Role of a behavior id within an event
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum BehaviorRole {
    Called,
    Executed,
    Exit,
    Thrown,
    /// The behavior whose code emitted the event
    Operation,
}

impl BehaviorRole {
    pub fn code(self) -> u8 {
        match self {
            BehaviorRole::Called => 1,
            BehaviorRole::Executed => 2,
            BehaviorRole::Exit => 3,
            BehaviorRole::Thrown => 4,
            BehaviorRole::Operation => 5,
        }
    }
}

/// Role of an object id within an event
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ObjectRole {
    Target,
    Value,
    Result,
    Exception,
    /// Positional call argument
    Arg(u8),
}

impl ObjectRole {
    const ARG_BASE: u8 = 16;

    pub fn code(self) -> u8 {
        match self {
            ObjectRole::Target => 1,
            ObjectRole::Value => 2,
            ObjectRole::Result => 3,
            ObjectRole::Exception => 4,
            ObjectRole::Arg(i) => Self::ARG_BASE.saturating_add(i),
        }
    }

    /// Argument role for a zero-based argument position, if it fits the role byte
    pub fn arg(position: usize) -> Option<Self> {
        u8::try_from(position)
            .ok()
            .filter(|p| p.checked_add(Self::ARG_BASE).is_some())
            .map(ObjectRole::Arg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_id_split() {
        let id = ObjectId::new(3, 42);
        assert_eq!(id.host_id(), 3);
        assert_eq!(id.sequence(), 42);
        assert_eq!(id.to_string(), "3:42");

        let max = ObjectId::new(255, u64::MAX);
        assert_eq!(max.host_id(), 255);
        assert_eq!(max.sequence(), (1 << 56) - 1);
    }

    #[test]
    fn test_event_builder() {
        let event = Event::new(
            100,
            1,
            7,
            EventKind::LocalWrite {
                variable: 4,
                value: None,
            },
        )
        .depth(3)
        .at(12, 40);

        assert_eq!(event.depth, 3);
        assert_eq!(event.location.map(|l| l.behavior_id), Some(12));
        assert_eq!(event.kind.tag(), EventKindTag::LocalWrite);
        assert_eq!(event.thread_key(), (1u64 << 32) | 7);
    }

    #[test]
    fn test_arg_roles() {
        assert_eq!(ObjectRole::arg(0).map(ObjectRole::code), Some(16));
        assert_eq!(ObjectRole::arg(239).map(ObjectRole::code), Some(255));
        assert!(ObjectRole::arg(240).is_none());
    }

    #[test]
    fn test_event_bincode_roundtrip() {
        let event = Event::new(
            5,
            0,
            1,
            EventKind::MethodCall {
                called: 10,
                executed: Some(11),
                target: Some(ObjectId::new(0, 9)),
                args: vec![ObjectId::new(0, 1)],
            },
        );
        let bytes = bincode::serialize(&event).unwrap();
        let decoded: Event = bincode::deserialize(&bytes).unwrap();
        assert_eq!(decoded, event);
    }
}
