//! Indexed binary heap scheduler.

use std::collections::HashMap;

use crate::scheduler::{ModelEntry, Scheduler};
use crate::time::VirtualTime;

/// A min-heap of model entries with an external index.
///
/// The index maps each model key to the position of its entry in the heap
/// array, so rescheduling a model is a single sift instead of a search. This
/// is the preferred realization for all but trivially small model counts.
#[derive(Default, Debug)]
pub struct HeapScheduler {
    heap: Vec<ModelEntry>,
    pos: HashMap<usize, usize>,
}

impl HeapScheduler {
    /// Creates an empty scheduler.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty scheduler with room for `capacity` entries.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            heap: Vec::with_capacity(capacity),
            pos: HashMap::with_capacity(capacity),
        }
    }

    fn sift_up(&mut self, mut idx: usize) {
        while idx > 0 {
            let parent = (idx - 1) / 2;
            if self.heap[idx] < self.heap[parent] {
                self.swap(idx, parent);
                idx = parent;
            } else {
                break;
            }
        }
    }

    fn sift_down(&mut self, mut idx: usize) {
        loop {
            let left = 2 * idx + 1;
            if left >= self.heap.len() {
                break;
            }
            let right = left + 1;
            let smallest = if right < self.heap.len() && self.heap[right] < self.heap[left] {
                right
            } else {
                left
            };
            if self.heap[smallest] < self.heap[idx] {
                self.swap(idx, smallest);
                idx = smallest;
            } else {
                break;
            }
        }
    }

    fn swap(&mut self, a: usize, b: usize) {
        self.heap.swap(a, b);
        self.pos.insert(self.heap[a].key, a);
        self.pos.insert(self.heap[b].key, b);
    }

    /// Removes the entry at a heap position, restoring the heap property.
    fn remove_at(&mut self, idx: usize) -> ModelEntry {
        let last = self.heap.len() - 1;
        self.heap.swap(idx, last);
        let entry = self.heap.pop().unwrap();
        self.pos.remove(&entry.key);
        if idx < self.heap.len() {
            self.pos.insert(self.heap[idx].key, idx);
            self.sift_down(idx);
            self.sift_up(idx);
        }
        entry
    }
}

impl Scheduler for HeapScheduler {
    fn push(&mut self, entry: ModelEntry) {
        debug_assert!(
            !self.pos.contains_key(&entry.key),
            "model already scheduled"
        );
        let idx = self.heap.len();
        self.pos.insert(entry.key, idx);
        self.heap.push(entry);
        self.sift_up(idx);
    }

    fn remove(&mut self, key: usize) -> bool {
        match self.pos.get(&key).copied() {
            Some(idx) => {
                self.remove_at(idx);
                true
            }
            None => false,
        }
    }

    fn reschedule(&mut self, entry: ModelEntry) {
        if entry.time.is_infinite() {
            self.remove(entry.key);
            return;
        }
        match self.pos.get(&entry.key).copied() {
            Some(idx) => {
                self.heap[idx] = entry;
                self.sift_down(idx);
                self.sift_up(idx);
            }
            None => self.push(entry),
        }
    }

    fn top(&self) -> Option<ModelEntry> {
        self.heap.first().copied()
    }

    fn pop_imminents(&mut self, until: VirtualTime, out: &mut Vec<ModelEntry>) {
        while let Some(top) = self.heap.first() {
            if top.time > until {
                break;
            }
            let entry = self.remove_at(0);
            out.push(entry);
        }
    }

    fn contains(&self, key: usize) -> bool {
        self.pos.contains_key(&key)
    }

    fn time_of(&self, key: usize) -> Option<VirtualTime> {
        self.pos.get(&key).map(|&idx| self.heap[idx].time)
    }

    fn len(&self) -> usize {
        self.heap.len()
    }

    fn clear(&mut self) {
        self.heap.clear();
        self.pos.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ModelId;

    fn entry(key: usize, time: f64) -> ModelEntry {
        ModelEntry {
            key,
            time: VirtualTime::at(time),
            priority: 0,
            id: ModelId::new(0, 0, key as u64),
        }
    }

    #[test]
    fn back_pointers_stay_consistent_under_churn() {
        let mut s = HeapScheduler::new();
        for key in 0..32 {
            s.push(entry(key, (31 - key) as f64));
        }
        // Reschedule every other entry, remove the rest.
        for key in 0..32 {
            if key % 2 == 0 {
                s.reschedule(entry(key, (key * 3) as f64));
            } else {
                assert!(s.remove(key));
            }
        }
        assert_eq!(s.len(), 16);

        // Entries must drain in nondecreasing time order.
        let mut prev = VirtualTime::ZERO;
        while let Some(top) = s.top() {
            assert!(top.time >= prev);
            prev = top.time;
            assert!(s.remove(top.key));
        }
    }

    #[test]
    fn top_always_tracks_minimum() {
        let mut s = HeapScheduler::new();
        s.push(entry(0, 9.0));
        s.push(entry(1, 4.0));
        s.push(entry(2, 6.0));
        assert_eq!(s.top().unwrap().key, 1);
        s.reschedule(entry(1, 12.0));
        assert_eq!(s.top().unwrap().key, 2);
        s.reschedule(entry(0, 1.0));
        assert_eq!(s.top().unwrap().key, 0);
    }
}
