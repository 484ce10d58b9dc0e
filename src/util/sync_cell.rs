//! A single-writer, many-reader cell for virtual time.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::time::VirtualTime;

/// A lock-free cell holding a [`VirtualTime`].
///
/// A timestamp is two words, so a plain atomic cannot hold it without
/// tearing. The cell uses a sequence counter in the manner of a seqlock:
/// writers bump the counter to an odd value, store both words, and bump it
/// back to even; readers retry whenever they observe an odd counter or a
/// counter change across their two loads.
///
/// The cell assumes a single writer. All operations use sequentially
/// consistent ordering; the update rates involved (one write per
/// synchronization round) make the cost irrelevant.
#[derive(Debug)]
pub(crate) struct TimeCell {
    seq: AtomicU64,
    coord: AtomicU64,
    causal: AtomicU64,
}

impl TimeCell {
    pub(crate) fn new(t: VirtualTime) -> Self {
        Self {
            seq: AtomicU64::new(0),
            coord: AtomicU64::new(t.time().to_bits()),
            causal: AtomicU64::new(t.causal()),
        }
    }

    /// Stores a new value. Must only be called from the owning thread.
    pub(crate) fn write(&self, t: VirtualTime) {
        let seq = self.seq.load(Ordering::SeqCst);
        self.seq.store(seq.wrapping_add(1), Ordering::SeqCst);
        self.coord.store(t.time().to_bits(), Ordering::SeqCst);
        self.causal.store(t.causal(), Ordering::SeqCst);
        self.seq.store(seq.wrapping_add(2), Ordering::SeqCst);
    }

    /// Loads the current value from any thread.
    pub(crate) fn read(&self) -> VirtualTime {
        loop {
            let before = self.seq.load(Ordering::SeqCst);
            if before % 2 == 1 {
                std::hint::spin_loop();
                continue;
            }
            let coord = self.coord.load(Ordering::SeqCst);
            let causal = self.causal.load(Ordering::SeqCst);
            let after = self.seq.load(Ordering::SeqCst);
            if before == after {
                return VirtualTime::new(f64::from_bits(coord), causal);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_returns_last_write() {
        let cell = TimeCell::new(VirtualTime::ZERO);
        assert_eq!(cell.read(), VirtualTime::ZERO);

        cell.write(VirtualTime::new(42.5, 3));
        assert_eq!(cell.read(), VirtualTime::new(42.5, 3));

        cell.write(VirtualTime::INFINITY);
        assert!(cell.read().is_infinite());
    }

    #[test]
    fn concurrent_readers_never_observe_tears() {
        use std::sync::Arc;

        let cell = Arc::new(TimeCell::new(VirtualTime::ZERO));
        let writer = {
            let cell = cell.clone();
            std::thread::spawn(move || {
                for i in 0..10_000u64 {
                    // Coordinate and causal always match, so a torn read
                    // would produce a mismatched pair.
                    cell.write(VirtualTime::new(i as f64, i));
                }
            })
        };
        let reader = {
            let cell = cell.clone();
            std::thread::spawn(move || {
                for _ in 0..10_000 {
                    let t = cell.read();
                    assert_eq!(t.time() as u64, t.causal());
                }
            })
        };
        writer.join().unwrap();
        reader.join().unwrap();
    }
}
