//! Inter-LP plumbing: location table, mailboxes and the shared EOT vector.
//!
//! All mutable state shared between logical processes lives here, with the
//! ownership discipline the parallel modes rely on:
//!
//! * each LP's inbox is a channel with a single consumer (the owning
//!   worker); any LP may send into it;
//! * the EOT vector has one slot per LP, written only by the slot owner and
//!   readable by anyone;
//! * the location table is immutable once the simulation starts and needs
//!   no locking at all.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::Sender;
use std::sync::Arc;

use crossbeam_utils::CachePadded;
use parking::Unparker;
use tracing::trace;

use crate::messaging::Message;
use crate::model::ModelId;
use crate::time::VirtualTime;
use crate::util::sync_cell::TimeCell;

/// Maps model names to their packed identifiers (and thereby to the LP that
/// owns them). Populated once at registration, immutable afterwards.
#[derive(Default, Debug)]
pub(crate) struct LocationTable {
    by_name: HashMap<String, ModelId>,
}

impl LocationTable {
    pub(crate) fn insert(&mut self, name: String, id: ModelId) {
        self.by_name.insert(name, id);
    }

    pub(crate) fn get(&self, name: &str) -> Option<ModelId> {
        self.by_name.get(name).copied()
    }
}

/// A sending handle onto every LP inbox, plus the global message accounting
/// used for optimistic termination detection.
#[derive(Clone)]
pub(crate) struct Network {
    mail: Arc<Vec<Sender<Message>>>,
    shared: Arc<SharedState>,
}

impl Network {
    pub(crate) fn new(mail: Vec<Sender<Message>>, shared: Arc<SharedState>) -> Self {
        Self {
            mail: Arc::new(mail),
            shared,
        }
    }

    /// Delivers a message to the inbox of the destination LP.
    ///
    /// A message to an LP that already shut its inbox down is dropped: this
    /// only happens past the termination horizon, where the message can no
    /// longer have an effect.
    pub(crate) fn send(&self, msg: Message) {
        let dst = msg.dst().lp() as usize;
        self.shared.sent_total.fetch_add(1, Ordering::Relaxed);
        if self.mail[dst].send(msg).is_err() {
            trace!(dst, "dropped message to terminated LP");
            // Balance the accounting so in-flight detection still settles.
            self.shared.recv_total.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Records the reception of one message by its destination LP.
    pub(crate) fn acknowledge(&self) {
        self.shared.recv_total.fetch_add(1, Ordering::Relaxed);
    }
}

impl std::fmt::Debug for Network {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Network")
            .field("lps", &self.mail.len())
            .finish_non_exhaustive()
    }
}

/// The shared per-LP earliest-output-time vector.
///
/// Each slot is a single-writer time cell padded to its own cache line.
/// Publishing a slot wakes the LPs registered as depending on it, so a
/// conservative LP blocked on its EIT re-evaluates as soon as an influencer
/// makes progress.
#[derive(Debug)]
pub(crate) struct EotVector {
    slots: Vec<CachePadded<TimeCell>>,
    wakers: Vec<Vec<Unparker>>,
}

impl EotVector {
    pub(crate) fn new(lps: usize) -> Self {
        Self {
            slots: (0..lps)
                .map(|_| CachePadded::new(TimeCell::new(VirtualTime::ZERO)))
                .collect(),
            wakers: vec![Vec::new(); lps],
        }
    }

    /// Registers a waker to notify when the given slot is published.
    ///
    /// Must be called before the worker threads start.
    pub(crate) fn add_waker(&mut self, lp: usize, waker: Unparker) {
        self.wakers[lp].push(waker);
    }

    /// Publishes a new value for a slot. Only the slot owner may call this.
    pub(crate) fn publish(&self, lp: usize, t: VirtualTime) {
        self.slots[lp].write(t);
        for waker in &self.wakers[lp] {
            waker.unpark();
        }
    }

    /// Reads a slot from any thread.
    pub(crate) fn read(&self, lp: usize) -> VirtualTime {
        self.slots[lp].read()
    }
}

/// Run-wide state shared by the controller and all workers.
#[derive(Debug)]
pub(crate) struct SharedState {
    live: AtomicBool,
    done: Vec<AtomicBool>,
    sent_total: AtomicU64,
    recv_total: AtomicU64,
    gvt: TimeCell,
}

impl SharedState {
    pub(crate) fn new(lps: usize) -> Self {
        Self {
            live: AtomicBool::new(true),
            done: (0..lps).map(|_| AtomicBool::new(false)).collect(),
            sent_total: AtomicU64::new(0),
            recv_total: AtomicU64::new(0),
            gvt: TimeCell::new(VirtualTime::ZERO),
        }
    }

    pub(crate) fn is_live(&self) -> bool {
        self.live.load(Ordering::Acquire)
    }

    /// Requests a cooperative stop; every LP exits at its next step
    /// boundary.
    pub(crate) fn shutdown(&self) {
        self.live.store(false, Ordering::Release);
    }

    pub(crate) fn set_done(&self, lp: usize, done: bool) {
        self.done[lp].store(done, Ordering::Release);
    }

    pub(crate) fn all_done(&self) -> bool {
        self.done.iter().all(|d| d.load(Ordering::Acquire))
    }

    /// Whether every sent message has been received.
    pub(crate) fn in_flight_settled(&self) -> bool {
        // Read receipts first so a concurrent send cannot make the counts
        // appear settled when they are not.
        let received = self.recv_total.load(Ordering::SeqCst);
        let sent = self.sent_total.load(Ordering::SeqCst);
        received == sent
    }

    pub(crate) fn gvt(&self) -> VirtualTime {
        self.gvt.read()
    }

    /// Publishes a new GVT estimate. Only the coordinator may call this.
    pub(crate) fn publish_gvt(&self, t: VirtualTime) {
        debug_assert!(t >= self.gvt.read(), "GVT regressed");
        self.gvt.write(t);
    }
}
