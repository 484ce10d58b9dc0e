//! Optimistic (time-warp) LP discipline.
//!
//! An optimistic LP never waits for its peers: it executes local events
//! speculatively and repairs mistakes after the fact. The machinery for
//! repair is threefold:
//!
//! * **state saving** — before a step transitions any model, the affected
//!   models are checkpointed by cloning, together with their scheduler
//!   positions and the incoming messages the step consumes;
//! * **rollback** — when a straggler (a message timestamped before the local
//!   clock) or an anti-message for an already-consumed message arrives,
//!   every step at or after the offending time is undone in reverse order,
//!   anti-messages are emitted for everything those steps sent, and
//!   execution resumes from the restored state;
//! * **fossil collection** — checkpoints strictly below GVT can never be
//!   rolled back to and are discarded; their listener events are committed
//!   at that point, so observers only ever see the settled history.
//!
//! With a nonzero save interval only a subset of steps is checkpointed. A
//! rollback that would need to undo an unsaved step is a fatal
//! [`ExecutionError::RollbackDepthExhausted`]: the configured interval was
//! too coarse for the message traffic.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use crossbeam_utils::Backoff;
use tracing::{debug, trace, warn};

use crate::engine::gvt::{Control, GvtParticipant};
use crate::engine::{DeferredEvent, Engine, WorkerCtx};
use crate::messaging::{Message, MessageId};
use crate::model::AtomicModel;
use crate::simulation::{ExecutionError, LpSummary};
use crate::time::VirtualTime;

/// Upper bound on one idle park.
const PARK_TIMEOUT: Duration = Duration::from_micros(200);

/// One checkpointed model within a step snapshot.
struct SavedModel {
    key: usize,
    model: Box<dyn AtomicModel>,
    last_event: VirtualTime,
    scheduled: Option<VirtualTime>,
}

/// Everything needed to undo (or commit) one step.
struct Snapshot {
    time: VirtualTime,
    /// Whether model state was saved; unsaved steps cannot be undone.
    saved: bool,
    entries: Vec<SavedModel>,
    /// Messages consumed from the pending queue by this step.
    consumed: Vec<Message>,
    /// Messages sent to other LPs by this step.
    sent: Vec<Message>,
    /// Listener events withheld until the step drops below GVT.
    events: Vec<DeferredEvent>,
}

impl Snapshot {
    fn has(&self, key: usize) -> bool {
        self.entries.iter().any(|e| e.key == key)
    }
}

/// A logical process running under the time-warp discipline.
pub(crate) struct OptimisticEngine {
    core: Engine,
    history: VecDeque<Snapshot>,
    /// Send times of consumed messages, for anti-message matching.
    processed: HashMap<MessageId, VirtualTime>,
    gvt_state: GvtParticipant,
    save_interval: VirtualTime,
    last_saved: VirtualTime,
    gvt: VirtualTime,
    rollbacks: u64,
    stopped: bool,
}

impl OptimisticEngine {
    pub(crate) fn new(mut core: Engine, lps: usize, save_interval: VirtualTime) -> Self {
        // Listener events must not leak from speculative steps.
        core.defer_events();
        let lp = core.lp();
        Self {
            core,
            history: VecDeque::new(),
            processed: HashMap::new(),
            gvt_state: GvtParticipant::new(lp, lps),
            save_interval,
            last_saved: VirtualTime::ZERO,
            gvt: VirtualTime::ZERO,
            rollbacks: 0,
            stopped: false,
        }
    }

    /// Runs this LP until the controller stops the run.
    pub(crate) fn run(mut self, ctx: &WorkerCtx) -> Result<LpSummary, ExecutionError> {
        self.core.init()?;

        let backoff = Backoff::new();
        while ctx.shared.is_live() && !self.stopped {
            self.drain_ctrl(ctx);
            if self.stopped {
                break;
            }
            self.drain_inbox(ctx)?;

            let next = self.core.next_time();
            if self.core.is_terminated() || next.is_infinite() || next > self.core.end_time()
            {
                ctx.eot.publish(ctx.lp as usize, VirtualTime::INFINITY);
                ctx.shared.set_done(ctx.lp as usize, true);
                if backoff.is_completed() {
                    ctx.parker.park_timeout(PARK_TIMEOUT);
                } else {
                    backoff.snooze();
                }
                continue;
            }

            ctx.shared.set_done(ctx.lp as usize, false);
            backoff.reset();
            self.step_speculative(next, ctx)?;
            ctx.eot.publish(ctx.lp as usize, self.core.next_time());
        }

        // Whatever survived to the end is settled; commit it in time order.
        for snapshot in self.history.drain(..) {
            self.core.flush_events(&snapshot.events);
        }

        debug!(
            lp = ctx.lp,
            time = %self.core.clock(),
            steps = self.core.steps(),
            rollbacks = self.rollbacks,
            "LP finished"
        );

        Ok(LpSummary {
            lp: ctx.lp,
            final_time: std::cmp::min(self.core.clock(), self.core.end_time()),
            steps: self.core.steps(),
            rollbacks: self.rollbacks,
        })
    }

    /// Executes one speculative step at time `t`, checkpointing first.
    fn step_speculative(&mut self, t: VirtualTime, ctx: &WorkerCtx) -> Result<(), ExecutionError> {
        let saved = self.should_save(t);
        let mut snapshot = Snapshot {
            time: t,
            saved,
            entries: Vec::new(),
            consumed: Vec::new(),
            sent: Vec::new(),
            events: Vec::new(),
        };

        let imminents = self.core.take_imminents(t);
        if saved {
            for entry in &imminents {
                snapshot.entries.push(self.checkpoint(entry.key, Some(entry.time)));
            }
        }

        let mut routed = self.core.collect_output(t, &imminents)?;
        self.core.deliver_pending(
            t,
            &mut routed.local,
            saved.then_some(&mut snapshot.consumed),
        )?;
        if saved {
            for &key in routed.local.keys() {
                if !snapshot.has(key) {
                    let scheduled = self.core.scheduler().time_of(key);
                    snapshot.entries.push(self.checkpoint(key, scheduled));
                }
            }
            for msg in &snapshot.consumed {
                self.processed.insert(msg.id(), msg.send_time());
            }
        }

        let touched = self.core.transition(t, &imminents, routed.local)?;
        self.core.reschedule(t, &touched)?;

        for msg in routed.outbound.drain(..) {
            snapshot.sent.push(msg.clone());
            self.send(msg, ctx);
        }

        self.core.finish_step(t);
        snapshot.events = self.core.take_deferred();

        if saved {
            self.last_saved = t;
        }
        self.history.push_back(snapshot);
        Ok(())
    }

    fn checkpoint(&self, key: usize, scheduled: Option<VirtualTime>) -> SavedModel {
        let slot = self.core.model(key);
        SavedModel {
            key,
            model: dyn_clone::clone_box(slot.model.as_ref()),
            last_event: slot.last_event,
            scheduled,
        }
    }

    /// Whether the step at `t` must be checkpointed under the configured
    /// save interval.
    fn should_save(&self, t: VirtualTime) -> bool {
        if self.save_interval == VirtualTime::ZERO {
            return true;
        }
        self.history.is_empty()
            || t.time() - self.last_saved.time() >= self.save_interval.time()
    }

    /// Stamps, accounts and sends an outbound message.
    fn send(&mut self, mut msg: Message, ctx: &WorkerCtx) {
        msg.set_white(self.gvt_state.color());
        self.gvt_state.note_send(msg.dst().lp(), msg.send_time());
        ctx.net.send(msg);
    }

    fn drain_inbox(&mut self, ctx: &WorkerCtx) -> Result<(), ExecutionError> {
        let mut woke = false;
        while let Ok(msg) = ctx.mail_rx.try_recv() {
            if !woke {
                // Clear the idle flag before the reception is accounted, so
                // the controller can never observe "all done and settled"
                // while this message is being absorbed.
                ctx.shared.set_done(ctx.lp as usize, false);
                woke = true;
            }
            ctx.net.acknowledge();
            self.gvt_state.note_receive(msg.is_white());

            if msg.is_anti() {
                self.handle_anti(msg, ctx)?;
            } else {
                if msg.send_time() < self.core.clock() {
                    debug!(lp = ctx.lp, straggler = %msg.send_time(), clock = %self.core.clock(), "straggler");
                    self.rollback(msg.send_time(), ctx)?;
                }
                self.core.insert_mail(msg)?;
            }
        }
        Ok(())
    }

    /// Annihilates the positive counterpart of an anti-message, rolling back
    /// first when it was already consumed.
    fn handle_anti(&mut self, anti: Message, ctx: &WorkerCtx) -> Result<(), ExecutionError> {
        if self.core.annihilate_pending(anti.id()) {
            trace!(lp = ctx.lp, id = ?anti.id(), "annihilated in queue");
            return Ok(());
        }
        if self.processed.contains_key(&anti.id()) {
            debug!(lp = ctx.lp, id = ?anti.id(), time = %anti.send_time(), "anti-message for consumed message");
            self.rollback(anti.send_time(), ctx)?;
            // The rollback requeued the positive message; it annihilates now.
            let annihilated = self.core.annihilate_pending(anti.id());
            debug_assert!(annihilated, "rollback did not restore the positive message");
            return Ok(());
        }
        // Sends precede their anti-messages on the same channel, so an
        // unmatched anti-message means its positive was already annihilated.
        warn!(lp = ctx.lp, id = ?anti.id(), "unmatched anti-message dropped");
        Ok(())
    }

    /// Undoes every step at or after `t_r` and emits anti-messages for their
    /// sends.
    fn rollback(&mut self, t_r: VirtualTime, ctx: &WorkerCtx) -> Result<(), ExecutionError> {
        let mut undone = 0u64;
        while let Some(last) = self.history.back() {
            if last.time < t_r {
                break;
            }
            let snapshot = self.history.pop_back().unwrap();
            if !snapshot.saved {
                return Err(ExecutionError::RollbackDepthExhausted {
                    lp: ctx.lp,
                    needed: t_r,
                    horizon: snapshot.time,
                });
            }
            for saved in snapshot.entries {
                self.core
                    .restore_model(saved.key, saved.model, saved.last_event, saved.scheduled);
            }
            for msg in snapshot.consumed {
                self.processed.remove(&msg.id());
                self.core.requeue_mail(msg);
            }
            for msg in snapshot.sent {
                self.send(msg.to_anti(), ctx);
            }
            // Withheld events of an undone step never happened.
            undone += 1;
        }

        if undone > 0 {
            self.rollbacks += 1;
            self.core.set_clock(t_r);
            self.core.reset_termination();
            // The published EOT may have run ahead of the restored state.
            ctx.eot.publish(ctx.lp as usize, t_r);
            debug!(lp = ctx.lp, to = %t_r, steps = undone, "rolled back");
        }
        Ok(())
    }

    fn drain_ctrl(&mut self, ctx: &WorkerCtx) {
        while let Ok(ctrl) = ctx.ctrl_rx.try_recv() {
            match ctrl {
                Control::Token(mut token) => {
                    self.gvt_state.visit(&mut token, self.core.next_time());
                    ctx.forward_token(token);
                }
                Control::Gvt(gvt) => self.fossil_collect(gvt),
                Control::Stop => self.stopped = true,
            }
        }
    }

    /// Discards history below the new GVT, committing its listener events.
    fn fossil_collect(&mut self, gvt: VirtualTime) {
        debug_assert!(gvt >= self.gvt, "GVT regressed");
        while self
            .history
            .front()
            .map_or(false, |snapshot| snapshot.time < gvt)
        {
            let snapshot = self.history.pop_front().unwrap();
            self.core.flush_events(&snapshot.events);
        }
        self.processed.retain(|_, &mut time| time >= gvt);
        self.gvt = gvt;
    }
}

impl std::fmt::Debug for OptimisticEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OptimisticEngine")
            .field("lp", &self.core.lp())
            .field("clock", &self.core.clock())
            .field("history", &self.history.len())
            .field("rollbacks", &self.rollbacks)
            .finish_non_exhaustive()
    }
}
