use std::collections::HashMap;
use std::hash::Hash;

use tracing::warn;

use crate::model::RequestPage;

/// One contiguous cached window of an offset-addressed query.
///
/// `slots[i]` holds logical result index `offset + i`; `None` means "not
/// yet fetched", which is distinct from an id the server never returned.
#[derive(Clone, Debug)]
pub struct PageWindow<T> {
    offset: usize,
    slots: Vec<Option<T>>,
    result_total: usize,
}

impl<T: Clone> PageWindow<T> {
    fn from_page(page: &RequestPage<T>) -> Self {
        Self {
            offset: page.result_offset,
            slots: page.items.iter().cloned().map(Some).collect(),
            result_total: page.result_total,
        }
    }

    /// Exclusive end of the window's logical index range.
    fn end(&self) -> usize {
        self.offset + self.slots.len()
    }

    #[must_use]
    pub fn result_total(&self) -> usize {
        self.result_total
    }

    /// Widens the window to span both itself and `page`; the incoming page
    /// overwrites any slots it overlaps.
    fn absorb(&mut self, page: &RequestPage<T>) {
        if self.result_total != page.result_total {
            // Two pages of one query disagreeing on the total is a defect
            // in the backing query, not something to recover from. The
            // newer total wins.
            debug_assert_eq!(self.result_total, page.result_total);
            warn!(
                cached = self.result_total,
                incoming = page.result_total,
                "merged pages disagree on result total"
            );
            self.result_total = page.result_total;
        }

        let new_offset = self.offset.min(page.result_offset);
        let new_end = self.end().max(page.end_offset());

        let mut slots: Vec<Option<T>> = vec![None; new_end - new_offset];
        for (i, slot) in self.slots.iter().enumerate() {
            slots[self.offset - new_offset + i] = slot.clone();
        }
        for (i, item) in page.items.iter().enumerate() {
            slots[page.result_offset - new_offset + i] = Some(item.clone());
        }

        self.offset = new_offset;
        self.slots = slots;
    }

    /// Serves `[offset, offset + count)` from the window, or `None` when
    /// the window does not fully cover the (total-clamped) range.
    fn slice(&self, offset: usize, count: usize) -> Option<RequestPage<T>> {
        // A known-empty result set answers every offset without a fetch.
        if self.result_total == 0 {
            return Some(RequestPage::empty(count, offset, 0));
        }

        if offset >= self.result_total {
            return Some(RequestPage::empty(count, offset, self.result_total));
        }

        if count == 0 {
            return Some(RequestPage::empty(count, offset, self.result_total));
        }

        let clamped_last = (offset + count - 1).min(self.result_total - 1);
        if offset < self.offset || clamped_last >= self.end() {
            return None;
        }

        let start = offset - self.offset;
        let len = clamped_last - offset + 1;
        let mut items = Vec::with_capacity(len);
        for slot in &self.slots[start..start + len] {
            match slot {
                Some(item) => items.push(item.clone()),
                None => return None,
            }
        }

        Some(RequestPage {
            size: count,
            result_offset: offset,
            result_total: self.result_total,
            items,
        })
    }
}

/// Cache of paginated query results, one merged window per filter key.
#[derive(Debug)]
pub struct PagedResultCache<K, T> {
    windows: HashMap<K, PageWindow<T>>,
}

impl<K: Eq + Hash + Clone, T: Clone> PagedResultCache<K, T> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            windows: HashMap::new(),
        }
    }

    /// Answers the request from cache when the window covers it with no
    /// absent slots; `None` means the caller has to go to the network.
    #[must_use]
    pub fn serve(&self, key: &K, offset: usize, count: usize) -> Option<RequestPage<T>> {
        self.windows.get(key).and_then(|w| w.slice(offset, count))
    }

    /// Folds a fetched page into the key's window.
    pub fn merge(&mut self, key: &K, page: &RequestPage<T>) {
        match self.windows.get_mut(key) {
            Some(window) => window.absorb(page),
            None => {
                self.windows.insert(key.clone(), PageWindow::from_page(page));
            }
        }
    }

    #[must_use]
    pub fn result_total(&self, key: &K) -> Option<usize> {
        self.windows.get(key).map(PageWindow::result_total)
    }

    pub fn reset(&mut self) {
        self.windows.clear();
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.windows.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }
}

impl<K: Eq + Hash + Clone, T: Clone> Default for PagedResultCache<K, T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(offset: usize, size: usize, total: usize, values: Vec<u32>) -> RequestPage<u32> {
        RequestPage {
            size,
            result_offset: offset,
            result_total: total,
            items: values,
        }
    }

    #[test]
    fn merging_adjacent_pages_equals_one_big_fetch() {
        let mut split = PagedResultCache::new();
        split.merge(&"recent", &page(0, 10, 20, (0..10).collect()));
        split.merge(&"recent", &page(10, 10, 20, (10..20).collect()));

        let mut whole = PagedResultCache::new();
        whole.merge(&"recent", &page(0, 20, 20, (0..20).collect()));

        assert_eq!(
            split.serve(&"recent", 0, 20),
            whole.serve(&"recent", 0, 20)
        );
        assert_eq!(
            split.serve(&"recent", 0, 20).unwrap().items,
            (0..20).collect::<Vec<u32>>()
        );
    }

    #[test]
    fn later_page_overwrites_overlap() {
        let mut cache = PagedResultCache::new();
        cache.merge(&"k", &page(0, 10, 30, vec![1; 10]));
        cache.merge(&"k", &page(5, 10, 30, vec![2; 10]));

        let served = cache.serve(&"k", 0, 15).unwrap();
        assert_eq!(served.items[..5], [1, 1, 1, 1, 1]);
        assert_eq!(served.items[5..], [2; 10]);
    }

    #[test]
    fn uncovered_range_misses() {
        let mut cache = PagedResultCache::new();
        cache.merge(&"k", &page(10, 10, 100, (10..20).collect()));

        assert!(cache.serve(&"k", 0, 10).is_none());
        assert!(cache.serve(&"k", 15, 10).is_none());
        assert!(cache.serve(&"missing", 10, 10).is_none());
        assert!(cache.serve(&"k", 10, 10).is_some());
    }

    #[test]
    fn disjoint_pages_leave_a_gap() {
        let mut cache = PagedResultCache::new();
        cache.merge(&"k", &page(0, 5, 100, (0..5).collect()));
        cache.merge(&"k", &page(10, 5, 100, (10..15).collect()));

        // The window spans [0, 15) but the middle slots are absent.
        assert!(cache.serve(&"k", 0, 15).is_none());
        assert!(cache.serve(&"k", 0, 5).is_some());
        assert!(cache.serve(&"k", 10, 5).is_some());
    }

    #[test]
    fn empty_total_answers_every_offset() {
        let mut cache = PagedResultCache::new();
        cache.merge(&"k", &page(0, 20, 0, vec![]));

        let served = cache.serve(&"k", 40, 20).unwrap();
        assert_eq!(served.result_offset, 40);
        assert_eq!(served.result_total, 0);
        assert!(served.items.is_empty());
    }

    #[test]
    fn offset_beyond_total_is_an_empty_page_with_the_total() {
        let mut cache = PagedResultCache::new();
        cache.merge(&"k", &page(0, 10, 7, (0..7).collect()));

        let served = cache.serve(&"k", 7, 10).unwrap();
        assert!(served.items.is_empty());
        assert_eq!(served.result_total, 7);
        assert_eq!(served.result_offset, 7);
    }

    #[test]
    fn request_past_the_tail_is_clamped() {
        let mut cache = PagedResultCache::new();
        cache.merge(&"k", &page(0, 10, 7, (0..7).collect()));

        let served = cache.serve(&"k", 5, 10).unwrap();
        assert_eq!(served.items, vec![5, 6]);
        assert_eq!(served.size, 10);
    }

    #[test]
    fn zero_count_is_served_without_items() {
        let mut cache = PagedResultCache::new();
        cache.merge(&"k", &page(0, 10, 50, (0..10).collect()));

        let served = cache.serve(&"k", 3, 0).unwrap();
        assert!(served.items.is_empty());
        assert_eq!(served.result_total, 50);
    }

    #[test]
    fn reset_drops_all_windows() {
        let mut cache = PagedResultCache::new();
        cache.merge(&"a", &page(0, 5, 5, (0..5).collect()));
        cache.merge(&"b", &page(0, 5, 5, (0..5).collect()));
        assert_eq!(cache.len(), 2);

        cache.reset();
        assert!(cache.is_empty());
        assert!(cache.serve(&"a", 0, 5).is_none());
    }
}
