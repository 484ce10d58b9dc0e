//! Sorted-list scheduler.

use std::collections::VecDeque;

use crate::scheduler::{ModelEntry, Scheduler};
use crate::time::VirtualTime;

/// A scheduler backed by a list kept in ascending entry order.
///
/// Insertion is O(n) and access to the minimum O(1), which beats the heap for
/// very small model counts and provides an independent oracle for the heap's
/// behavior in tests.
#[derive(Default, Debug)]
pub struct ListScheduler {
    list: VecDeque<ModelEntry>,
}

impl ListScheduler {
    /// Creates an empty scheduler.
    pub fn new() -> Self {
        Self::default()
    }

    fn position_of(&self, key: usize) -> Option<usize> {
        self.list.iter().position(|e| e.key == key)
    }
}

impl Scheduler for ListScheduler {
    fn push(&mut self, entry: ModelEntry) {
        debug_assert!(self.position_of(entry.key).is_none(), "model already scheduled");
        let idx = self
            .list
            .iter()
            .position(|e| *e > entry)
            .unwrap_or(self.list.len());
        self.list.insert(idx, entry);
    }

    fn remove(&mut self, key: usize) -> bool {
        match self.position_of(key) {
            Some(idx) => {
                self.list.remove(idx);
                true
            }
            None => false,
        }
    }

    fn reschedule(&mut self, entry: ModelEntry) {
        self.remove(entry.key);
        if !entry.time.is_infinite() {
            self.push(entry);
        }
    }

    fn top(&self) -> Option<ModelEntry> {
        self.list.front().copied()
    }

    fn pop_imminents(&mut self, until: VirtualTime, out: &mut Vec<ModelEntry>) {
        while let Some(front) = self.list.front() {
            if front.time > until {
                break;
            }
            out.push(self.list.pop_front().unwrap());
        }
    }

    fn contains(&self, key: usize) -> bool {
        self.position_of(key).is_some()
    }

    fn time_of(&self, key: usize) -> Option<VirtualTime> {
        self.position_of(key).map(|idx| self.list[idx].time)
    }

    fn len(&self) -> usize {
        self.list.len()
    }

    fn clear(&mut self) {
        self.list.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ModelId;

    #[test]
    fn list_stays_sorted() {
        let mut s = ListScheduler::new();
        for (key, time) in [(0, 5.0), (1, 1.0), (2, 3.0), (3, 9.0), (4, 2.0)] {
            s.push(ModelEntry {
                key,
                time: VirtualTime::at(time),
                priority: 0,
                id: ModelId::new(0, 0, key as u64),
            });
        }
        let times: Vec<f64> = s.list.iter().map(|e| e.time.time()).collect();
        assert_eq!(times, vec![1.0, 2.0, 3.0, 5.0, 9.0]);
    }
}
