//! Priority Queue with indexed removal
//!
//! Array-backed binary min-heap keyed by expiry, plus a HashMap from id to
//! current heap position. The index makes remove-by-id O(log n) instead of a
//! linear scan.
//!
//! Entries with equal expiry come out in no particular order. Callers must not
//! rely on insertion order for ties.

use std::collections::HashMap;

/// One heap slot.
#[derive(Debug)]
struct Entry<M> {
    id: u64,
    expiry: u64,
    meta: M,
}

/// An indexed min-priority queue.
pub struct MinPq<M> {
    heap: Vec<Entry<M>>,
    index: HashMap<u64, usize>, // id -> position in heap
}

impl<M> Default for MinPq<M> {
    fn default() -> Self {
        Self::new()
    }
}

fn parent(i: usize) -> usize {
    (i - 1) / 2
}

impl<M> MinPq<M> {
    pub fn new() -> Self {
        Self {
            heap: Vec::new(),
            index: HashMap::new(),
        }
    }

    /// Add an item to the queue and sift it up.
    /// Returns the final heap position, or None if the id already exists.
    pub fn add(&mut self, id: u64, expiry: u64, meta: M) -> Option<usize> {
        if self.index.contains_key(&id) {
            return None;
        }
        let pos = self.heap.len();
        self.heap.push(Entry { id, expiry, meta });
        self.index.insert(id, pos);
        Some(self.sift_up(pos))
    }

    #[cfg(test)]
    /// Id and expiry of the minimum without removing it.
    pub fn peek(&self) -> Option<(u64, u64)> {
        self.heap.first().map(|e| (e.id, e.expiry))
    }

    /// Expiry of the minimum. None if empty.
    pub fn peek_expiry(&self) -> Option<u64> {
        self.heap.first().map(|e| e.expiry)
    }

    /// Pop the minimum item. Returns (id, expiry, metadata).
    pub fn pop(&mut self) -> Option<(u64, u64, M)> {
        let e = self.take_at(0)?;
        Some((e.id, e.expiry, e.meta))
    }

    /// Remove an item by id. Returns the metadata if found.
    pub fn remove(&mut self, id: u64) -> Option<M> {
        let pos = *self.index.get(&id)?;
        self.take_at(pos).map(|e| e.meta)
    }

    #[cfg(test)]
    /// Whether an item with this id is queued.
    pub fn contains(&self, id: u64) -> bool {
        self.index.contains_key(&id)
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    /// Drop every item.
    pub fn clear(&mut self) {
        self.heap.clear();
        self.index.clear();
    }

    /// Detach the entry at `pos`: move the last leaf into its slot, then sift
    /// whichever way restores the heap property.
    fn take_at(&mut self, pos: usize) -> Option<Entry<M>> {
        let last = self.heap.len().checked_sub(1)?;
        self.swap(pos, last);
        let e = self.heap.pop()?;
        self.index.remove(&e.id);
        if pos < self.heap.len() {
            let p = self.sift_up(pos);
            if p == pos {
                self.sift_down(pos);
            }
        }
        Some(e)
    }

    fn sift_up(&mut self, mut i: usize) -> usize {
        while i > 0 {
            let p = parent(i);
            if self.heap[p].expiry <= self.heap[i].expiry {
                break;
            }
            self.swap(i, p);
            i = p;
        }
        i
    }

    fn sift_down(&mut self, mut i: usize) -> usize {
        let n = self.heap.len();
        loop {
            let l = 2 * i + 1;
            let r = l + 1;
            let mut m = i;
            if l < n && self.heap[l].expiry < self.heap[m].expiry {
                m = l;
            }
            if r < n && self.heap[r].expiry < self.heap[m].expiry {
                m = r;
            }
            if m == i {
                return i;
            }
            self.swap(i, m);
            i = m;
        }
    }

    fn swap(&mut self, a: usize, b: usize) {
        if a == b {
            return;
        }
        self.heap.swap(a, b);
        self.index.insert(self.heap[a].id, a);
        self.index.insert(self.heap[b].id, b);
    }

    /// Check the heap property and the id index against the array.
    #[cfg(test)]
    pub(crate) fn is_valid(&self) -> bool {
        let ordered = (1..self.heap.len())
            .all(|i| self.heap[parent(i)].expiry <= self.heap[i].expiry);
        let indexed = self.index.len() == self.heap.len()
            && self
                .heap
                .iter()
                .enumerate()
                .all(|(i, e)| self.index.get(&e.id) == Some(&i));
        ordered && indexed
    }
}
