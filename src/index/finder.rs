//! Binary search over the keys of one page

use crate::storage::Page;

/// Which tuple to return when several share the searched key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Match {
    First,
    Last,
}

/// What to return when no tuple has the searched key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoMatch {
    /// The last tuple with a smaller key
    Before,
    /// The first tuple with a greater key
    After,
}

/// Result of a page search
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Located {
    pub index: usize,
    pub exact: bool,
}

/// Search `page` for `key`; `None` when the policy selects no tuple
pub fn find(
    page: &Page,
    tuple_bits: usize,
    key: u64,
    on_match: Match,
    on_miss: NoMatch,
) -> Option<Located> {
    let count = page.tuple_count();
    let lower = partition(count, |i| page.key_at(i, tuple_bits) < key);

    if lower < count && page.key_at(lower, tuple_bits) == key {
        let index = match on_match {
            Match::First => lower,
            Match::Last => partition(count, |i| page.key_at(i, tuple_bits) <= key) - 1,
        };
        return Some(Located { index, exact: true });
    }

    let index = match on_miss {
        NoMatch::Before => lower.checked_sub(1)?,
        NoMatch::After if lower < count => lower,
        NoMatch::After => return None,
    };
    Some(Located {
        index,
        exact: false,
    })
}

/// First index in `0..count` for which `pred` is false; `pred` must be monotonic
fn partition(count: usize, pred: impl Fn(usize) -> bool) -> usize {
    let (mut lo, mut hi) = (0, count);
    while lo < hi {
        let mid = lo + (hi - lo) / 2;
        if pred(mid) {
            lo = mid + 1;
        } else {
            hi = mid;
        }
    }
    lo
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::tuple::{IndexTuple, StdTuple};
    use crate::storage::{BitWriter, PageLayout, PagedFile};

    fn page_with(keys: &[u64]) -> Page {
        let file = PagedFile::new(PageLayout::default());
        let layout = file.layout();
        let id = file.create_page().unwrap();
        file.update(id, |buf| {
            let mut writer = BitWriter::new(buf, 0);
            for (i, &key) in keys.iter().enumerate() {
                StdTuple { key, pointer: i as u64 }.write(&mut writer, &layout);
            }
            layout.write_count(buf, keys.len());
        })
        .unwrap();
        file.get(id).unwrap()
    }

    fn at(index: usize, exact: bool) -> Option<Located> {
        Some(Located { index, exact })
    }

    #[test]
    fn test_exact_with_duplicates() {
        let page = page_with(&[10, 20, 20, 20, 30]);
        assert_eq!(find(&page, 128, 20, Match::First, NoMatch::After), at(1, true));
        assert_eq!(find(&page, 128, 20, Match::Last, NoMatch::After), at(3, true));
    }

    #[test]
    fn test_miss_policies() {
        let page = page_with(&[10, 20, 30]);
        assert_eq!(find(&page, 128, 25, Match::First, NoMatch::Before), at(1, false));
        assert_eq!(find(&page, 128, 25, Match::First, NoMatch::After), at(2, false));
        assert_eq!(find(&page, 128, 5, Match::First, NoMatch::Before), None);
        assert_eq!(find(&page, 128, 5, Match::First, NoMatch::After), at(0, false));
        assert_eq!(find(&page, 128, 35, Match::First, NoMatch::Before), at(2, false));
        assert_eq!(find(&page, 128, 35, Match::First, NoMatch::After), None);
    }

    #[test]
    fn test_empty_page() {
        let page = page_with(&[]);
        assert_eq!(find(&page, 128, 1, Match::First, NoMatch::Before), None);
        assert_eq!(find(&page, 128, 1, Match::First, NoMatch::After), None);
    }
}
