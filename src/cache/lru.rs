//! Recency Index Module
//!
//! Tracks access order of live keys for LRU eviction.

use std::collections::HashMap;

use crate::cache::{CacheKey, EntryMeta};

#[derive(Debug)]
struct Node {
    meta: EntryMeta,
    prev: Option<usize>,
    next: Option<usize>,
}

// == Recency Index ==
/// Access order over live keys, most recently used first.
///
/// Nodes live in a slab with a free list; `touch`, `insert` and `remove`
/// are O(1). Head = most recently used, tail = least recently used.
#[derive(Debug, Default)]
pub struct RecencyIndex {
    slots: Vec<Option<Node>>,
    free: Vec<usize>,
    lookup: HashMap<CacheKey, usize>,
    head: Option<usize>,
    tail: Option<usize>,
    total_bytes: u64,
}

impl RecencyIndex {
    // == Constructor ==
    pub fn new() -> Self {
        Self::default()
    }

    // == Insert ==
    /// Adds or replaces the meta for `meta.key` and moves it to the front.
    pub fn insert(&mut self, meta: EntryMeta) {
        if let Some(&idx) = self.lookup.get(&meta.key) {
            let node = self.node_mut(idx);
            let old_size = node.meta.size_bytes;
            node.meta = meta;
            self.total_bytes = self.total_bytes.saturating_sub(old_size) + meta.size_bytes;
            self.move_to_front(idx);
            return;
        }

        let node = Node {
            meta,
            prev: None,
            next: None,
        };
        let idx = match self.free.pop() {
            Some(idx) => {
                self.slots[idx] = Some(node);
                idx
            }
            None => {
                self.slots.push(Some(node));
                self.slots.len() - 1
            }
        };
        self.lookup.insert(meta.key, idx);
        self.total_bytes += meta.size_bytes;
        self.push_front(idx);
    }

    /// Appends `meta` as the least recently used key. Used when rebuilding
    /// an index from a persisted MRU -> LRU listing.
    pub fn push_oldest(&mut self, meta: EntryMeta) {
        self.insert(meta);
        if let Some(&idx) = self.lookup.get(&meta.key) {
            if self.tail != Some(idx) {
                self.unlink(idx);
                self.push_back(idx);
            }
        }
    }

    // == Touch ==
    /// Marks a key as recently used. Returns false if the key is unknown.
    pub fn touch(&mut self, key: &CacheKey, now: u64) -> bool {
        match self.lookup.get(key).copied() {
            Some(idx) => {
                self.node_mut(idx).meta.last_accessed = now;
                self.move_to_front(idx);
                true
            }
            None => false,
        }
    }

    // == Remove ==
    pub fn remove(&mut self, key: &CacheKey) -> Option<EntryMeta> {
        let idx = self.lookup.remove(key)?;
        self.unlink(idx);
        let node = self.slots[idx].take()?;
        self.free.push(idx);
        self.total_bytes = self.total_bytes.saturating_sub(node.meta.size_bytes);
        Some(node.meta)
    }

    // == Queries ==
    pub fn get(&self, key: &CacheKey) -> Option<&EntryMeta> {
        self.lookup.get(key).map(|&idx| &self.node(idx).meta)
    }

    pub fn contains(&self, key: &CacheKey) -> bool {
        self.lookup.contains_key(key)
    }

    /// The least recently used entry.
    pub fn peek_oldest(&self) -> Option<&EntryMeta> {
        self.tail.map(|idx| &self.node(idx).meta)
    }

    pub fn len(&self) -> usize {
        self.lookup.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lookup.is_empty()
    }

    pub fn total_bytes(&self) -> u64 {
        self.total_bytes
    }

    /// Iterates from most to least recently used.
    pub fn iter(&self) -> impl Iterator<Item = &EntryMeta> + '_ {
        let mut cursor = self.head;
        std::iter::from_fn(move || {
            let idx = cursor?;
            let node = self.node(idx);
            cursor = node.next;
            Some(&node.meta)
        })
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }

    // == Linking ==
    fn node(&self, idx: usize) -> &Node {
        self.slots[idx].as_ref().expect("linked slot is occupied")
    }

    fn node_mut(&mut self, idx: usize) -> &mut Node {
        self.slots[idx].as_mut().expect("linked slot is occupied")
    }

    fn move_to_front(&mut self, idx: usize) {
        if self.head != Some(idx) {
            self.unlink(idx);
            self.push_front(idx);
        }
    }

    fn unlink(&mut self, idx: usize) {
        let (prev, next) = {
            let node = self.node(idx);
            (node.prev, node.next)
        };
        match prev {
            Some(p) => self.node_mut(p).next = next,
            None => self.head = next,
        }
        match next {
            Some(n) => self.node_mut(n).prev = prev,
            None => self.tail = prev,
        }
        let node = self.node_mut(idx);
        node.prev = None;
        node.next = None;
    }

    fn push_front(&mut self, idx: usize) {
        let old_head = self.head;
        {
            let node = self.node_mut(idx);
            node.prev = None;
            node.next = old_head;
        }
        if let Some(h) = old_head {
            self.node_mut(h).prev = Some(idx);
        }
        self.head = Some(idx);
        if self.tail.is_none() {
            self.tail = Some(idx);
        }
    }

    fn push_back(&mut self, idx: usize) {
        let old_tail = self.tail;
        {
            let node = self.node_mut(idx);
            node.next = None;
            node.prev = old_tail;
        }
        if let Some(t) = old_tail {
            self.node_mut(t).next = Some(idx);
        }
        self.tail = Some(idx);
        if self.head.is_none() {
            self.head = Some(idx);
        }
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;

    fn meta(label: &str, size: u64) -> EntryMeta {
        EntryMeta {
            key: CacheKey::for_label(label),
            created_at: 0,
            expires_at: None,
            last_accessed: 0,
            size_bytes: size,
        }
    }

    fn k(label: &str) -> CacheKey {
        CacheKey::for_label(label)
    }

    fn order(index: &RecencyIndex) -> Vec<CacheKey> {
        index.iter().map(|m| m.key).collect()
    }

    #[test]
    fn test_index_new() {
        let index = RecencyIndex::new();
        assert!(index.is_empty());
        assert_eq!(index.len(), 0);
        assert!(index.peek_oldest().is_none());
    }

    #[test]
    fn test_insert_order() {
        let mut index = RecencyIndex::new();
        index.insert(meta("a", 1));
        index.insert(meta("b", 1));
        index.insert(meta("c", 1));

        assert_eq!(order(&index), vec![k("c"), k("b"), k("a")]);
        assert_eq!(index.peek_oldest().map(|m| m.key), Some(k("a")));
    }

    #[test]
    fn test_touch_moves_to_front() {
        let mut index = RecencyIndex::new();
        index.insert(meta("a", 1));
        index.insert(meta("b", 1));
        index.insert(meta("c", 1));

        assert!(index.touch(&k("a"), 42));

        assert_eq!(order(&index), vec![k("a"), k("c"), k("b")]);
        assert_eq!(index.get(&k("a")).unwrap().last_accessed, 42);
        assert_eq!(index.peek_oldest().map(|m| m.key), Some(k("b")));
    }

    #[test]
    fn test_touch_unknown_key() {
        let mut index = RecencyIndex::new();
        index.insert(meta("a", 1));
        assert!(!index.touch(&k("zzz"), 1));
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn test_reinsert_updates_size_without_duplicating() {
        let mut index = RecencyIndex::new();
        index.insert(meta("a", 10));
        index.insert(meta("b", 5));
        index.insert(meta("a", 3));

        assert_eq!(index.len(), 2);
        assert_eq!(index.total_bytes(), 8);
        assert_eq!(order(&index), vec![k("a"), k("b")]);
    }

    #[test]
    fn test_remove_middle_and_reuse_slot() {
        let mut index = RecencyIndex::new();
        index.insert(meta("a", 1));
        index.insert(meta("b", 2));
        index.insert(meta("c", 3));

        let removed = index.remove(&k("b")).unwrap();
        assert_eq!(removed.size_bytes, 2);
        assert_eq!(order(&index), vec![k("c"), k("a")]);
        assert_eq!(index.total_bytes(), 4);
        assert!(index.remove(&k("b")).is_none());

        index.insert(meta("d", 1));
        assert_eq!(index.slots.len(), 3);
        assert_eq!(order(&index), vec![k("d"), k("c"), k("a")]);
    }

    #[test]
    fn test_remove_head_and_tail() {
        let mut index = RecencyIndex::new();
        index.insert(meta("a", 1));
        index.insert(meta("b", 1));
        index.insert(meta("c", 1));

        index.remove(&k("c"));
        index.remove(&k("a"));
        assert_eq!(order(&index), vec![k("b")]);
        assert_eq!(index.peek_oldest().map(|m| m.key), Some(k("b")));

        index.remove(&k("b"));
        assert!(index.is_empty());
        assert!(index.iter().next().is_none());
    }

    #[test]
    fn test_push_oldest_rebuilds_order() {
        let mut index = RecencyIndex::new();
        for label in ["newest", "middle", "oldest"] {
            index.push_oldest(meta(label, 1));
        }
        assert_eq!(order(&index), vec![k("newest"), k("middle"), k("oldest")]);
        assert_eq!(index.peek_oldest().map(|m| m.key), Some(k("oldest")));
    }

    #[test]
    fn test_clear() {
        let mut index = RecencyIndex::new();
        index.insert(meta("a", 7));
        index.clear();
        assert!(index.is_empty());
        assert_eq!(index.total_bytes(), 0);
    }
}
