//! Secondary event indexes
//!
//! Every processed event is appended to one index per attribute value it
//! carries. All indexes are keyed by timestamp and point into the event
//! store, so any of them can be merged with the primary event list.
//!
//! | index     | partitioned by                  | tuple     |
//! |-----------|---------------------------------|-----------|
//! | kinds     | event kind tag                  | standard  |
//! | hosts     | host id                         | standard  |
//! | threads   | host id << 32 \| thread id      | standard  |
//! | depths    | call depth                      | standard  |
//! | locations | behavior id << 32 \| bytecode   | standard  |
//! | behaviors | behavior id                     | with role |
//! | fields    | field id                        | standard  |
//! | variables | local variable id               | standard  |
//! | objects   | object id                       | with role |

use crate::index::{IndexSet, RoleTuple, StdTuple};
use crate::storage::{BehaviorRole, Event, EventKind, Location, ObjectId, ObjectRole};
use crate::storage::{PagedFile, StorageResult};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

type SetSnapshot = Vec<(u64, Vec<u8>)>;

/// Metadata of all secondary indexes, restorable over the same paged file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IndexesSnapshot {
    kinds: SetSnapshot,
    hosts: SetSnapshot,
    threads: SetSnapshot,
    depths: SetSnapshot,
    locations: SetSnapshot,
    behaviors: SetSnapshot,
    fields: SetSnapshot,
    variables: SetSnapshot,
    objects: SetSnapshot,
    operation_counts: Vec<(u32, u64)>,
}

/// Index key of an operation location
pub fn location_key(location: Location) -> u64 {
    ((location.behavior_id as u64) << 32) | location.bytecode_index as u64
}

/// Behaviors an event refers to, with the role each plays
pub fn behavior_roles(event: &Event) -> Vec<(u32, BehaviorRole)> {
    let mut roles = Vec::with_capacity(3);
    match &event.kind {
        EventKind::MethodCall { called, executed, .. }
        | EventKind::Instantiation { called, executed, .. }
        | EventKind::SuperCall { called, executed, .. } => {
            roles.push((*called, BehaviorRole::Called));
            if let Some(executed) = executed {
                roles.push((*executed, BehaviorRole::Executed));
            }
        }
        EventKind::BehaviorExit { behavior, .. } => roles.push((*behavior, BehaviorRole::Exit)),
        EventKind::Exception { behavior, .. } => roles.push((*behavior, BehaviorRole::Thrown)),
        EventKind::FieldWrite { .. } | EventKind::LocalWrite { .. } | EventKind::ArrayWrite { .. } => {}
    }
    if let Some(location) = event.location {
        roles.push((location.behavior_id, BehaviorRole::Operation));
    }
    roles
}

/// Objects an event refers to, with the role each plays
pub fn object_roles(event: &Event) -> Vec<(ObjectId, ObjectRole)> {
    let mut roles = Vec::new();
    match &event.kind {
        EventKind::MethodCall { target, args, .. }
        | EventKind::Instantiation { target, args, .. }
        | EventKind::SuperCall { target, args, .. } => {
            roles.extend(target.map(|t| (t, ObjectRole::Target)));
            roles.extend(
                args.iter()
                    .enumerate()
                    .filter_map(|(i, arg)| ObjectRole::arg(i).map(|role| (*arg, role))),
            );
        }
        EventKind::BehaviorExit { result, .. } => {
            roles.extend(result.map(|r| (r, ObjectRole::Result)));
        }
        EventKind::FieldWrite { target, value, .. } => {
            roles.extend(target.map(|t| (t, ObjectRole::Target)));
            roles.extend(value.map(|v| (v, ObjectRole::Value)));
        }
        EventKind::LocalWrite { value, .. } => {
            roles.extend(value.map(|v| (v, ObjectRole::Value)));
        }
        EventKind::ArrayWrite { target, value, .. } => {
            roles.push((*target, ObjectRole::Target));
            roles.extend(value.map(|v| (v, ObjectRole::Value)));
        }
        EventKind::Exception { exception, .. } => roles.push((*exception, ObjectRole::Exception)),
    }
    roles
}

pub struct EventIndexes {
    pub(crate) kinds: IndexSet<StdTuple>,
    pub(crate) hosts: IndexSet<StdTuple>,
    pub(crate) threads: IndexSet<StdTuple>,
    pub(crate) depths: IndexSet<StdTuple>,
    pub(crate) locations: IndexSet<StdTuple>,
    pub(crate) behaviors: IndexSet<RoleTuple>,
    pub(crate) fields: IndexSet<StdTuple>,
    pub(crate) variables: IndexSet<StdTuple>,
    pub(crate) objects: IndexSet<RoleTuple>,
    /// Events emitted from within each behavior
    operation_counts: HashMap<u32, u64>,
}

impl EventIndexes {
    pub fn new(file: &Arc<PagedFile>, max_levels: usize) -> Self {
        Self {
            kinds: IndexSet::new("kind", Arc::clone(file), max_levels),
            hosts: IndexSet::new("host", Arc::clone(file), max_levels),
            threads: IndexSet::new("thread", Arc::clone(file), max_levels),
            depths: IndexSet::new("depth", Arc::clone(file), max_levels),
            locations: IndexSet::new("location", Arc::clone(file), max_levels),
            behaviors: IndexSet::new("behavior", Arc::clone(file), max_levels),
            fields: IndexSet::new("field", Arc::clone(file), max_levels),
            variables: IndexSet::new("variable", Arc::clone(file), max_levels),
            objects: IndexSet::new("object", Arc::clone(file), max_levels),
            operation_counts: HashMap::new(),
        }
    }

    /// Append `event`, stored at `pointer`, to every index it belongs to
    pub fn index(&mut self, event: &Event, pointer: u64) -> StorageResult<()> {
        let key = event.timestamp;
        let tuple = StdTuple { key, pointer };

        self.kinds.add(event.kind.tag() as u64, tuple)?;
        self.hosts.add(event.host_id as u64, tuple)?;
        self.threads.add(event.thread_key(), tuple)?;
        self.depths.add(event.depth as u64, tuple)?;

        if let Some(location) = event.location {
            self.locations.add(location_key(location), tuple)?;
            *self.operation_counts.entry(location.behavior_id).or_default() += 1;
        }

        for (behavior, role) in behavior_roles(event) {
            self.behaviors.add(
                behavior as u64,
                RoleTuple {
                    key,
                    pointer,
                    role: role.code(),
                },
            )?;
        }

        match &event.kind {
            EventKind::FieldWrite { field, .. } => self.fields.add(*field as u64, tuple)?,
            EventKind::LocalWrite { variable, .. } => self.variables.add(*variable as u64, tuple)?,
            _ => {}
        }

        for (object, role) in object_roles(event) {
            self.objects.add(
                object.0,
                RoleTuple {
                    key,
                    pointer,
                    role: role.code(),
                },
            )?;
        }
        Ok(())
    }

    pub fn snapshot(&self) -> IndexesSnapshot {
        let mut operation_counts: Vec<(u32, u64)> =
            self.operation_counts.iter().map(|(&b, &c)| (b, c)).collect();
        operation_counts.sort_unstable();

        IndexesSnapshot {
            kinds: self.kinds.snapshot(),
            hosts: self.hosts.snapshot(),
            threads: self.threads.snapshot(),
            depths: self.depths.snapshot(),
            locations: self.locations.snapshot(),
            behaviors: self.behaviors.snapshot(),
            fields: self.fields.snapshot(),
            variables: self.variables.snapshot(),
            objects: self.objects.snapshot(),
            operation_counts,
        }
    }

    pub fn restore(
        file: &Arc<PagedFile>,
        max_levels: usize,
        snapshot: &IndexesSnapshot,
    ) -> StorageResult<Self> {
        Ok(Self {
            kinds: IndexSet::restore("kind", Arc::clone(file), max_levels, &snapshot.kinds)?,
            hosts: IndexSet::restore("host", Arc::clone(file), max_levels, &snapshot.hosts)?,
            threads: IndexSet::restore("thread", Arc::clone(file), max_levels, &snapshot.threads)?,
            depths: IndexSet::restore("depth", Arc::clone(file), max_levels, &snapshot.depths)?,
            locations: IndexSet::restore(
                "location",
                Arc::clone(file),
                max_levels,
                &snapshot.locations,
            )?,
            behaviors: IndexSet::restore(
                "behavior",
                Arc::clone(file),
                max_levels,
                &snapshot.behaviors,
            )?,
            fields: IndexSet::restore("field", Arc::clone(file), max_levels, &snapshot.fields)?,
            variables: IndexSet::restore(
                "variable",
                Arc::clone(file),
                max_levels,
                &snapshot.variables,
            )?,
            objects: IndexSet::restore("object", Arc::clone(file), max_levels, &snapshot.objects)?,
            operation_counts: snapshot.operation_counts.iter().copied().collect(),
        })
    }

    /// Number of events emitted from within `behavior_id`
    pub fn operation_count(&self, behavior_id: u32) -> u64 {
        self.operation_counts.get(&behavior_id).copied().unwrap_or(0)
    }

    /// Number of distinct indexed values across all attributes
    pub fn index_count(&self) -> usize {
        self.kinds.len()
            + self.hosts.len()
            + self.threads.len()
            + self.depths.len()
            + self.locations.len()
            + self.behaviors.len()
            + self.fields.len()
            + self.variables.len()
            + self.objects.len()
    }
}
