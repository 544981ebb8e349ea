//! Object database of one host
//!
//! Holds the serialized state of objects created on a single host, plus
//! the class each object was instantiated from. Object ids are per-host
//! sequence numbers, so both streams are indexed by sequence.

use crate::db::counters::DatabaseCounters;
use crate::db::flush::{FlushMonitor, FlushPacer};
use crate::db::DatabaseSettings;
use crate::index::{HierarchicalIndex, RefTuple, StdTuple};
use crate::reorder::{ReorderingBuffer, Sequenced};
use crate::storage::{PagedFile, RecordLog, StorageResult};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// A class as registered by the instrumentation agent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadedClass {
    pub class_id: u64,
    pub loader_id: u64,
    pub name: String,
}

#[derive(Debug)]
struct ObjectEntry {
    id: u64,
    timestamp: u64,
    data: Vec<u8>,
}

impl Sequenced for ObjectEntry {
    fn id(&self) -> u64 {
        self.id
    }

    fn timestamp(&self) -> u64 {
        self.timestamp
    }
}

#[derive(Debug)]
struct RefEntry {
    id: u64,
    timestamp: u64,
    class_id: u64,
}

impl Sequenced for RefEntry {
    fn id(&self) -> u64 {
        self.id
    }

    fn timestamp(&self) -> u64 {
        self.timestamp
    }
}

pub struct ObjectsDatabase {
    host_id: u32,
    data: RecordLog,
    objects: HierarchicalIndex<StdTuple>,
    refs: HierarchicalIndex<RefTuple>,
    classes: HashMap<u64, LoadedClass>,
    object_buffer: ReorderingBuffer<ObjectEntry>,
    ref_buffer: ReorderingBuffer<RefEntry>,
    last_object_added: u64,
    last_object_processed: u64,
    last_ref_added: u64,
    last_ref_processed: u64,
    counters: Arc<DatabaseCounters>,
    check_interval: usize,
}

impl ObjectsDatabase {
    /// Create the database of `host_id`, allocating its indexes in `file`
    pub fn new(
        host_id: u32,
        file: &Arc<PagedFile>,
        settings: &DatabaseSettings,
        counters: Arc<DatabaseCounters>,
    ) -> StorageResult<Self> {
        let levels = settings.max_index_levels;
        Ok(Self {
            host_id,
            data: RecordLog::new(),
            objects: HierarchicalIndex::new(format!("objects[{}]", host_id), Arc::clone(file), levels)?,
            refs: HierarchicalIndex::new(format!("refs[{}]", host_id), Arc::clone(file), levels)?,
            classes: HashMap::new(),
            object_buffer: ReorderingBuffer::new(settings.objects_buffer_size),
            ref_buffer: ReorderingBuffer::new(settings.objects_buffer_size),
            last_object_added: 0,
            last_object_processed: 0,
            last_ref_added: 0,
            last_ref_processed: 0,
            counters,
            check_interval: settings.flush_check_interval,
        })
    }

    pub fn host_id(&self) -> u32 {
        self.host_id
    }

    /// Buffer the serialized state of object `id`
    pub fn store(&mut self, id: u64, timestamp: u64, data: Vec<u8>) -> StorageResult<()> {
        if id < self.last_object_added {
            self.counters.object_unordered();
        } else {
            self.last_object_added = id;
        }

        while self.object_buffer.is_full() {
            if self.flush_oldest_object()? == 0 {
                break;
            }
        }
        self.object_buffer.push(ObjectEntry {
            id,
            timestamp,
            data,
        });
        Ok(())
    }

    /// Buffer the class of object `id`
    pub fn register_ref(&mut self, id: u64, timestamp: u64, class_id: u64) -> StorageResult<()> {
        if id < self.last_ref_added {
            self.counters.object_unordered();
        } else {
            self.last_ref_added = id;
        }

        while self.ref_buffer.is_full() {
            if self.flush_oldest_ref()? == 0 {
                break;
            }
        }
        self.ref_buffer.push(RefEntry {
            id,
            timestamp,
            class_id,
        });
        Ok(())
    }

    pub fn register_class(&mut self, class_id: u64, loader_id: u64, name: impl Into<String>) {
        let class = LoadedClass {
            class_id,
            loader_id,
            name: name.into(),
        };
        if let Some(previous) = self.classes.insert(class_id, class) {
            tracing::warn!(
                host_id = self.host_id,
                class_id,
                previous = %previous.name,
                "Class registered twice"
            );
        }
    }

    /// Serialized state of object `id`, if it has been processed
    pub fn load(&self, id: u64) -> StorageResult<Option<Vec<u8>>> {
        match self.objects.tuple_at(id, true)? {
            Some(tuple) => self.data.read(tuple.pointer).map(Some),
            None => Ok(None),
        }
    }

    /// Class id of object `id`, if its reference has been processed
    pub fn object_type(&self, id: u64) -> StorageResult<Option<u64>> {
        Ok(self.refs.tuple_at(id, true)?.map(|tuple| tuple.class_id))
    }

    pub fn loaded_class_for_object(&self, id: u64) -> StorageResult<Option<LoadedClass>> {
        Ok(self
            .object_type(id)?
            .and_then(|class_id| self.classes.get(&class_id).cloned()))
    }

    pub fn loaded_class(&self, class_id: u64) -> Option<&LoadedClass> {
        self.classes.get(&class_id)
    }

    pub fn flush(&mut self, monitor: Option<&FlushMonitor>) -> StorageResult<usize> {
        let mut pacer = FlushPacer::new(monitor, self.check_interval);
        let mut count = 0;
        while !self.object_buffer.is_empty() || !self.ref_buffer.is_empty() {
            if !pacer.proceed() {
                tracing::debug!(host_id = self.host_id, flushed = count, "Object flush cancelled");
                break;
            }
            count += self.flush_oldest()?;
        }
        Ok(count)
    }

    pub fn flush_old(&mut self, max_age: u64, monitor: Option<&FlushMonitor>) -> StorageResult<usize> {
        let mut pacer = FlushPacer::new(monitor, self.check_interval);
        let mut count = 0;
        loop {
            let objects = self.object_buffer.is_next_entry_flushable(max_age);
            let refs = self.ref_buffer.is_next_entry_flushable(max_age);
            if !objects && !refs {
                break;
            }
            if !pacer.proceed() {
                break;
            }
            if objects {
                count += self.flush_oldest_object()?;
            }
            if refs {
                count += self.flush_oldest_ref()?;
            }
        }
        Ok(count)
    }

    /// Process one buffered object and one buffered reference
    pub fn flush_oldest(&mut self) -> StorageResult<usize> {
        Ok(self.flush_oldest_object()? + self.flush_oldest_ref()?)
    }

    fn flush_oldest_object(&mut self) -> StorageResult<usize> {
        let Some(entry) = self.object_buffer.pop() else {
            return Ok(0);
        };
        if entry.id < self.last_object_processed {
            let total = self.counters.object_dropped();
            tracing::debug!(
                host_id = self.host_id,
                id = entry.id,
                last_valid = self.last_object_processed,
                total,
                "Out of order object dropped"
            );
            return Ok(1);
        }
        self.last_object_processed = entry.id;

        let pointer = self.data.append(&entry.data)?;
        self.objects.add(StdTuple {
            key: entry.id,
            pointer,
        })?;
        self.counters.object_processed();
        self.counters.object_stored(entry.data.len());
        Ok(1)
    }

    fn flush_oldest_ref(&mut self) -> StorageResult<usize> {
        let Some(entry) = self.ref_buffer.pop() else {
            return Ok(0);
        };
        if entry.id < self.last_ref_processed {
            let total = self.counters.object_dropped();
            tracing::debug!(
                host_id = self.host_id,
                id = entry.id,
                last_valid = self.last_ref_processed,
                total,
                "Out of order object reference dropped"
            );
            return Ok(1);
        }
        self.last_ref_processed = entry.id;
        self.refs.add(RefTuple {
            key: entry.id,
            class_id: entry.class_id,
        })?;
        Ok(1)
    }

    /// Number of entries waiting in either buffer
    pub fn buffered_count(&self) -> usize {
        self.object_buffer.len() + self.ref_buffer.len()
    }

    pub fn objects_count(&self) -> u64 {
        self.objects.leaf_count()
    }
}
