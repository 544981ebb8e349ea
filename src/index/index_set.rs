//! A family of indexes sharing one paged file
//!
//! Secondary indexes are partitioned by an indexed value (a thread, a
//! behavior, an object...). Each value gets its own [`HierarchicalIndex`],
//! created on first use.

use crate::index::hierarchical::{HierarchicalIndex, IndexView};
use crate::index::tuple::IndexTuple;
use crate::storage::{BitReader, PagedFile, StorageResult};
use std::collections::HashMap;
use std::sync::Arc;

pub struct IndexSet<T: IndexTuple> {
    name: String,
    file: Arc<PagedFile>,
    max_levels: usize,
    indexes: HashMap<u64, HierarchicalIndex<T>>,
}

impl<T: IndexTuple> IndexSet<T> {
    pub fn new(name: impl Into<String>, file: Arc<PagedFile>, max_levels: usize) -> Self {
        Self {
            name: name.into(),
            file,
            max_levels,
            indexes: HashMap::new(),
        }
    }

    /// Append `tuple` to the index of `value`, creating it if needed
    pub fn add(&mut self, value: u64, tuple: T) -> StorageResult<()> {
        let index = match self.indexes.entry(value) {
            std::collections::hash_map::Entry::Occupied(entry) => entry.into_mut(),
            std::collections::hash_map::Entry::Vacant(entry) => {
                let name = format!("{}[{}]", self.name, value);
                entry.insert(HierarchicalIndex::new(
                    name,
                    Arc::clone(&self.file),
                    self.max_levels,
                )?)
            }
        };
        index.add(tuple)
    }

    pub fn get(&self, value: u64) -> Option<&HierarchicalIndex<T>> {
        self.indexes.get(&value)
    }

    pub fn view(&self, value: u64) -> Option<IndexView<T>> {
        self.get(value).map(HierarchicalIndex::view)
    }

    /// Number of tuples recorded for `value`
    pub fn leaf_count(&self, value: u64) -> u64 {
        self.get(value).map_or(0, HierarchicalIndex::leaf_count)
    }

    pub fn values(&self) -> impl Iterator<Item = u64> + '_ {
        self.indexes.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.indexes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indexes.is_empty()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Metadata of every index, sorted by value
    pub fn snapshot(&self) -> Vec<(u64, Vec<u8>)> {
        let mut entries: Vec<(u64, Vec<u8>)> = self
            .indexes
            .iter()
            .map(|(&value, index)| (value, index.to_bytes()))
            .collect();
        entries.sort_unstable_by_key(|(value, _)| *value);
        entries
    }

    /// Reopen a set from [`IndexSet::snapshot`] output over the same paged file
    pub fn restore(
        name: impl Into<String>,
        file: Arc<PagedFile>,
        max_levels: usize,
        entries: &[(u64, Vec<u8>)],
    ) -> StorageResult<Self> {
        let mut set = Self::new(name, file, max_levels);
        for (value, bytes) in entries {
            let index = HierarchicalIndex::from_struct(
                format!("{}[{}]", set.name, value),
                Arc::clone(&set.file),
                max_levels,
                &mut BitReader::new(bytes, 0),
            )?;
            set.indexes.insert(*value, index);
        }
        Ok(set)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::tuple::StdTuple;
    use crate::storage::PageLayout;

    #[test]
    fn test_indexes_created_lazily_per_value() {
        let file = Arc::new(PagedFile::new(PageLayout::default()));
        let mut set = IndexSet::<StdTuple>::new("thread", Arc::clone(&file), 6);
        assert!(set.is_empty());
        assert!(set.view(7).is_none());

        set.add(7, StdTuple { key: 1, pointer: 10 }).unwrap();
        set.add(9, StdTuple { key: 2, pointer: 20 }).unwrap();
        set.add(7, StdTuple { key: 3, pointer: 30 }).unwrap();

        assert_eq!(set.len(), 2);
        assert_eq!(set.leaf_count(7), 2);
        assert_eq!(set.leaf_count(8), 0);
        assert_eq!(set.get(9).map(|i| i.name().to_string()), Some("thread[9]".into()));
        assert_eq!(file.page_count().unwrap(), 2);

        let view = set.view(7).unwrap();
        assert_eq!(view.tuple_at(2, false).unwrap().map(|t| t.pointer), Some(30));
    }

    #[test]
    fn test_snapshot_restore() {
        let file = Arc::new(PagedFile::new(PageLayout::new(256, 16).unwrap()));
        let mut set = IndexSet::<StdTuple>::new("depth", Arc::clone(&file), 6);
        for key in 0..300u64 {
            set.add(key % 3, StdTuple { key, pointer: key }).unwrap();
        }

        let entries = set.snapshot();
        assert_eq!(entries.iter().map(|(v, _)| *v).collect::<Vec<_>>(), vec![0, 1, 2]);

        let restored = IndexSet::<StdTuple>::restore("depth", file, 6, &entries).unwrap();
        assert_eq!(restored.len(), 3);
        for value in 0..3u64 {
            assert_eq!(restored.leaf_count(value), 100);
            let first = restored.view(value).unwrap().tuple_at(0, false).unwrap();
            assert_eq!(first.map(|t| t.key), Some(value));
        }
    }
}
