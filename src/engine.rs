//! The per-LP simulation kernel.
//!
//! An [`Engine`] owns everything one logical process needs to execute PDEVS
//! semantics sequentially: the resident models, their scheduler, the local
//! clock, the queue of not-yet-consumed incoming messages and the
//! termination conditions. One [`step`](Engine::step) executes the canonical
//! cycle:
//!
//! 1. pop the imminent models,
//! 2. collect and route their outputs,
//! 3. deliver queued incoming mail for the step time,
//! 4. dispatch internal / external / confluent transitions,
//! 5. reschedule every touched model from its new `time_advance`,
//! 6. advance the clock and evaluate the termination conditions.
//!
//! The parallel disciplines in [`conservative`] and [`optimistic`] drive the
//! same phases one by one instead of calling [`step`](Engine::step), which
//! lets them interleave their protocol work (lookahead accumulation,
//! state saving) at the right points without duplicating the kernel.
//!
//! Messages routed between models of the same LP are delivered within the
//! emitting step, so co-resident models receive confluent transitions
//! exactly as in a purely sequential run. Messages that cross an LP boundary
//! are stamped with the causal successor of the step time: the receiver
//! consumes them in a directly following micro-step at the same time
//! coordinate. This stamping is what makes the conservative earliest-output
//! publication sound for same-time sends.

pub(crate) mod conservative;
pub(crate) mod gvt;
pub(crate) mod optimistic;

use std::collections::{BTreeMap, HashMap};
use std::sync::mpsc::{Receiver, Sender};
use std::sync::Arc;

use parking::Parker;
use slab::Slab;
use tracing::{debug, trace};

use crate::engine::gvt::{Control, GvtToken};
use crate::messaging::{EventListener, Message, MessageBag, MessageId, OutputBag, RoutingTable};
use crate::model::{AtomicModel, ModelId};
use crate::network::{EotVector, Network, SharedState};
use crate::scheduler::{ModelEntry, Scheduler};
use crate::simulation::{ExecutionError, TerminationPredicate};
use crate::time::VirtualTime;

/// Everything one worker thread needs besides its engine: its channels, the
/// shared synchronization state and its place in the GVT token ring.
pub(crate) struct WorkerCtx {
    pub(crate) lp: u8,
    pub(crate) net: Network,
    pub(crate) mail_rx: Receiver<Message>,
    pub(crate) ctrl_rx: Receiver<Control>,
    pub(crate) shared: Arc<SharedState>,
    pub(crate) eot: Arc<EotVector>,
    pub(crate) parker: Parker,
    /// Token destination: the next LP in the ring, or the coordinator for
    /// the last LP.
    pub(crate) next_ctrl: Option<Sender<Control>>,
    pub(crate) coordinator_tx: Sender<GvtToken>,
}

impl WorkerCtx {
    pub(crate) fn forward_token(&self, token: GvtToken) {
        match &self.next_ctrl {
            Some(next) => {
                let _ = next.send(Control::Token(token));
            }
            None => {
                let _ = self.coordinator_tx.send(token);
            }
        }
    }
}

/// A resident model and its bookkeeping.
pub(crate) struct ModelSlot {
    pub(crate) model: Box<dyn AtomicModel>,
    pub(crate) id: ModelId,
    pub(crate) name: Arc<str>,
    pub(crate) priority: i32,
    pub(crate) last_event: VirtualTime,
}

/// Messages routed during one output phase.
#[derive(Default)]
pub(crate) struct RoutedMail {
    /// Bags for models resident on this LP, keyed by model slot.
    pub(crate) local: HashMap<usize, MessageBag>,
    /// Messages bound for other LPs, in emission order.
    pub(crate) outbound: Vec<Message>,
}

/// A listener event withheld from dispatch, used by the optimistic
/// discipline to commit events only once they are below GVT.
#[derive(Clone)]
pub(crate) enum DeferredEvent {
    Output {
        src: ModelId,
        msg: Message,
        time: VirtualTime,
    },
    StateChange {
        model: ModelId,
        time: VirtualTime,
    },
}

/// The sequential kernel of one logical process.
pub(crate) struct Engine {
    lp: u8,
    models: Slab<ModelSlot>,
    by_model_num: HashMap<u64, usize>,
    scheduler: Box<dyn Scheduler>,
    routes: Arc<RoutingTable>,
    listeners: Arc<Vec<Arc<dyn EventListener>>>,
    /// Current local virtual time; equals the time of the next step while
    /// the LP runs, and the final time once terminated.
    clock: VirtualTime,
    end_time: VirtualTime,
    predicate: Option<Arc<TerminationPredicate>>,
    /// Incoming messages not yet consumed, keyed by their send time.
    pending: BTreeMap<VirtualTime, Vec<Message>>,
    terminated: bool,
    next_seq: u64,
    defer_events: bool,
    deferred: Vec<DeferredEvent>,
    steps: u64,
}

impl Engine {
    pub(crate) fn new(
        lp: u8,
        scheduler: Box<dyn Scheduler>,
        routes: Arc<RoutingTable>,
        listeners: Arc<Vec<Arc<dyn EventListener>>>,
        end_time: VirtualTime,
        predicate: Option<Arc<TerminationPredicate>>,
    ) -> Self {
        Self {
            lp,
            models: Slab::new(),
            by_model_num: HashMap::new(),
            scheduler,
            routes,
            listeners,
            clock: VirtualTime::ZERO,
            end_time,
            predicate,
            pending: BTreeMap::new(),
            terminated: false,
            next_seq: 0,
            defer_events: false,
            deferred: Vec::new(),
            steps: 0,
        }
    }

    /// Moves a model into this LP. The identifier must carry this LP's id.
    pub(crate) fn add_model(&mut self, model: Box<dyn AtomicModel>, id: ModelId) -> usize {
        debug_assert_eq!(id.lp(), self.lp);
        let name: Arc<str> = Arc::from(model.name());
        let priority = model.priority();
        let key = self.models.insert(ModelSlot {
            model,
            id,
            name,
            priority,
            last_event: VirtualTime::ZERO,
        });
        self.by_model_num.insert(id.model(), key);
        key
    }

    /// Schedules every non-passive model at its initial time advance and
    /// sets the clock to the first event time.
    pub(crate) fn init(&mut self) -> Result<(), ExecutionError> {
        let keys: Vec<usize> = self.models.iter().map(|(k, _)| k).collect();
        for key in keys {
            let ta = self.validated_ta(key)?;
            if !ta.is_infinite() {
                let slot = &self.models[key];
                self.scheduler.push(ModelEntry {
                    key,
                    time: VirtualTime::ZERO.saturating_add(ta),
                    priority: slot.priority,
                    id: slot.id,
                });
            }
        }
        let next = self.next_time();
        if next > self.end_time || next.is_infinite() {
            self.clock = std::cmp::min(next, self.end_time);
            self.terminated = true;
        } else {
            self.clock = next;
        }
        debug!(lp = self.lp, models = self.models.len(), clock = %self.clock, "initialized");
        Ok(())
    }

    pub(crate) fn lp(&self) -> u8 {
        self.lp
    }

    pub(crate) fn clock(&self) -> VirtualTime {
        self.clock
    }

    pub(crate) fn set_clock(&mut self, t: VirtualTime) {
        self.clock = t;
    }

    pub(crate) fn is_terminated(&self) -> bool {
        self.terminated
    }

    pub(crate) fn steps(&self) -> u64 {
        self.steps
    }

    pub(crate) fn end_time(&self) -> VirtualTime {
        self.end_time
    }

    pub(crate) fn scheduler(&self) -> &dyn Scheduler {
        self.scheduler.as_ref()
    }

    pub(crate) fn model(&self, key: usize) -> &ModelSlot {
        &self.models[key]
    }

    pub(crate) fn local_key(&self, id: ModelId) -> Option<usize> {
        self.by_model_num.get(&id.model()).copied()
    }

    /// The smallest lookahead any resident model currently advertises.
    ///
    /// This bounds how soon a future input could make *any* local model
    /// emit, which is why it ranges over all models rather than only the
    /// recently transitioned ones.
    pub(crate) fn min_lookahead(&self) -> VirtualTime {
        self.models
            .iter()
            .map(|(_, slot)| slot.model.lookahead())
            .min()
            .unwrap_or(VirtualTime::INFINITY)
    }

    /// Buffers listener events instead of dispatching them immediately.
    pub(crate) fn defer_events(&mut self) {
        self.defer_events = true;
    }

    pub(crate) fn take_deferred(&mut self) -> Vec<DeferredEvent> {
        std::mem::take(&mut self.deferred)
    }

    /// Dispatches previously deferred events to the listeners.
    pub(crate) fn flush_events(&self, events: &[DeferredEvent]) {
        for event in events {
            match event {
                DeferredEvent::Output { src, msg, time } => {
                    for listener in self.listeners.iter() {
                        listener.on_output(*src, msg, *time);
                    }
                }
                DeferredEvent::StateChange { model, time } => {
                    for listener in self.listeners.iter() {
                        listener.on_state_change(*model, *time);
                    }
                }
            }
        }
    }

    /// The time of the next local event: the earliest of the scheduler top
    /// and the earliest queued incoming message.
    pub(crate) fn next_time(&self) -> VirtualTime {
        let scheduled = self
            .scheduler
            .top()
            .map(|e| e.time)
            .unwrap_or(VirtualTime::INFINITY);
        let mail = self
            .pending
            .keys()
            .next()
            .copied()
            .unwrap_or(VirtualTime::INFINITY);
        std::cmp::min(scheduled, mail)
    }

    /// Queues an incoming message for consumption at its send time.
    ///
    /// Rejects messages from the past: under the conservative discipline a
    /// message timestamped before the local clock is a protocol violation.
    /// The optimistic discipline rolls the clock back before queuing such
    /// messages, so the check never fires there.
    pub(crate) fn insert_mail(&mut self, msg: Message) -> Result<(), ExecutionError> {
        if self.local_key(msg.dst()).is_none() {
            return Err(ExecutionError::UnknownDestination {
                lp: self.lp,
                dst: msg.dst(),
            });
        }
        if msg.send_time() < self.clock {
            return Err(ExecutionError::CausalityViolation {
                lp: self.lp,
                message_time: msg.send_time(),
                local_time: self.clock,
            });
        }
        self.pending.entry(msg.send_time()).or_default().push(msg);
        Ok(())
    }

    /// Requeues a message without the causality check, used when restoring
    /// rollback state.
    pub(crate) fn requeue_mail(&mut self, msg: Message) {
        self.pending.entry(msg.send_time()).or_default().push(msg);
    }

    /// Removes a queued message by identity; returns whether one was found.
    pub(crate) fn annihilate_pending(&mut self, id: MessageId) -> bool {
        let time = match self
            .pending
            .iter()
            .find(|(_, msgs)| msgs.iter().any(|m| m.id() == id))
        {
            Some((&time, _)) => time,
            None => return false,
        };
        let msgs = self.pending.get_mut(&time).unwrap();
        msgs.retain(|m| m.id() != id);
        if msgs.is_empty() {
            self.pending.remove(&time);
        }
        true
    }

    /// Pops every model scheduled at or before `t`.
    pub(crate) fn take_imminents(&mut self, t: VirtualTime) -> Vec<ModelEntry> {
        debug_assert!(
            self.scheduler.top().map_or(true, |e| self.clock <= e.time),
            "clock ran past the schedule"
        );
        let mut out = Vec::new();
        self.scheduler.pop_imminents(t, &mut out);
        out
    }

    /// Runs the output phase of the imminent models and routes the results.
    pub(crate) fn collect_output(
        &mut self,
        t: VirtualTime,
        imminents: &[ModelEntry],
    ) -> Result<RoutedMail, ExecutionError> {
        let mut routed = RoutedMail::default();
        let mut bag = OutputBag::default();
        for entry in imminents {
            let slot = &mut self.models[entry.key];
            slot.model.output(&mut bag);
            if bag.is_empty() {
                continue;
            }
            let src = slot.id;
            let items: Vec<_> = bag.drain().collect();
            for (port, payload) in items {
                self.route(src.with_port(port), payload, t, &mut routed);
            }
        }
        Ok(routed)
    }

    fn route(
        &mut self,
        src: ModelId,
        payload: crate::messaging::Payload,
        t: VirtualTime,
        routed: &mut RoutedMail,
    ) {
        let routes = self.routes.clone();
        for &dst in routes.targets(src) {
            let id = MessageId {
                lp: self.lp,
                seq: self.next_seq,
            };
            self.next_seq += 1;
            if dst.lp() == self.lp {
                let msg = Message::new(src, dst, payload.clone(), t, id);
                self.emit_output(src, &msg, t);
                let key = self
                    .local_key(dst)
                    .expect("routing table references an unregistered local model");
                routed.local.entry(key).or_default().push(msg);
            } else {
                // Cross-LP messages happen causally after the emitting step.
                let msg = Message::new(src, dst, payload.clone(), t.next_causal(), id);
                self.emit_output(src, &msg, t);
                routed.outbound.push(msg);
            }
        }
    }

    /// Moves queued mail due at or before `t` into the local bags.
    ///
    /// When `consumed` is provided, every delivered message is also recorded
    /// there so the step can be undone later.
    pub(crate) fn deliver_pending(
        &mut self,
        t: VirtualTime,
        local: &mut HashMap<usize, MessageBag>,
        mut consumed: Option<&mut Vec<Message>>,
    ) -> Result<(), ExecutionError> {
        loop {
            let due = match self.pending.keys().next() {
                Some(&time) if time <= t => time,
                _ => break,
            };
            let msgs = self.pending.remove(&due).unwrap();
            for msg in msgs {
                let key = self
                    .local_key(msg.dst())
                    .ok_or(ExecutionError::UnknownDestination {
                        lp: self.lp,
                        dst: msg.dst(),
                    })?;
                if let Some(consumed) = consumed.as_mut() {
                    consumed.push(msg.clone());
                }
                local.entry(key).or_default().push(msg);
            }
        }
        Ok(())
    }

    /// Dispatches the transitions for one step: confluent or internal for
    /// the imminent models, external for the rest of the mail recipients.
    ///
    /// Returns the keys of every model that transitioned.
    pub(crate) fn transition(
        &mut self,
        t: VirtualTime,
        imminents: &[ModelEntry],
        mut mail: HashMap<usize, MessageBag>,
    ) -> Result<Vec<usize>, ExecutionError> {
        let mut touched = Vec::with_capacity(imminents.len() + mail.len());

        for entry in imminents {
            let slot = &mut self.models[entry.key];
            match mail.remove(&entry.key) {
                Some(bag) => {
                    trace!(lp = self.lp, model = %slot.name, time = %t, "confluent");
                    slot.model.confluent_transition(&bag);
                }
                None => {
                    trace!(lp = self.lp, model = %slot.name, time = %t, "internal");
                    slot.model.internal_transition();
                }
            }
            touched.push(entry.key);
        }

        // External recipients, in deterministic (priority, id) order.
        let mut rest: Vec<(usize, MessageBag)> = mail.into_iter().collect();
        rest.sort_by_key(|(key, _)| {
            let slot = &self.models[*key];
            (slot.priority, slot.id)
        });
        for (key, bag) in rest {
            let slot = &mut self.models[key];
            let elapsed =
                t.checked_sub(slot.last_event)
                    .ok_or(ExecutionError::CausalityViolation {
                        lp: self.lp,
                        message_time: t,
                        local_time: slot.last_event,
                    })?;
            trace!(lp = self.lp, model = %slot.name, time = %t, "external");
            slot.model.external_transition(elapsed, &bag);
            touched.push(key);
        }

        Ok(touched)
    }

    /// Reads the new time advance of every touched model and reschedules or
    /// removes it accordingly.
    pub(crate) fn reschedule(
        &mut self,
        t: VirtualTime,
        touched: &[usize],
    ) -> Result<(), ExecutionError> {
        for &key in touched {
            let ta = self.validated_ta(key)?;
            let slot = &mut self.models[key];
            slot.last_event = t;
            let (id, priority, name) = (slot.id, slot.priority, slot.name.clone());
            if ta.is_infinite() {
                self.scheduler.remove(key);
                trace!(lp = self.lp, model = %name, "passivated");
            } else {
                let mut next = t.saturating_add(ta);
                if next <= t {
                    // A zero time advance re-fires within the same time
                    // coordinate, one causal slot later.
                    next = t.next_causal();
                }
                self.scheduler.reschedule(ModelEntry {
                    key,
                    time: next,
                    priority,
                    id,
                });
            }
            self.emit_state_change(id, t);
        }
        Ok(())
    }

    /// Terminates an LP that has nothing left to do below the horizon.
    pub(crate) fn terminate_idle(&mut self) {
        self.clock = std::cmp::min(self.next_time(), self.end_time);
        self.terminated = true;
    }

    /// Clears a (speculative) termination undone by a rollback.
    pub(crate) fn reset_termination(&mut self) {
        self.terminated = false;
    }

    /// Evaluates the termination conditions and advances the clock.
    pub(crate) fn finish_step(&mut self, t: VirtualTime) {
        self.steps += 1;

        if let Some(predicate) = &self.predicate {
            for (_, slot) in self.models.iter() {
                if predicate(slot.model.as_ref()) {
                    debug!(lp = self.lp, model = %slot.name, time = %t, "termination predicate");
                    self.clock = t;
                    self.terminated = true;
                    return;
                }
            }
        }

        let next = self.next_time();
        if next > self.end_time || next.is_infinite() {
            self.clock = std::cmp::min(next, self.end_time);
            self.terminated = true;
            debug!(lp = self.lp, time = %self.clock, "termination time reached");
        } else {
            self.clock = next;
        }
    }

    /// One full sequential step. Returns `false` once the LP is terminated.
    pub(crate) fn step(&mut self) -> Result<bool, ExecutionError> {
        if self.terminated {
            return Ok(false);
        }
        let t = self.next_time();
        if t.is_infinite() || t > self.end_time {
            self.clock = std::cmp::min(t, self.end_time);
            self.terminated = true;
            return Ok(false);
        }

        let imminents = self.take_imminents(t);
        let mut routed = self.collect_output(t, &imminents)?;
        debug_assert!(
            routed.outbound.is_empty(),
            "sequential engine routed a message off-LP"
        );
        self.deliver_pending(t, &mut routed.local, None)?;
        let touched = self.transition(t, &imminents, routed.local)?;
        self.reschedule(t, &touched)?;
        self.finish_step(t);
        Ok(true)
    }

    /// The time advance of a model, validated to be non-negative.
    fn validated_ta(&self, key: usize) -> Result<VirtualTime, ExecutionError> {
        let slot = &self.models[key];
        let ta = slot.model.time_advance();
        if ta.time() < 0.0 {
            return Err(ExecutionError::NegativeTimeAdvance {
                model: slot.name.to_string(),
            });
        }
        Ok(ta)
    }

    /// Restores a model checkpoint: state, last-event time and scheduler
    /// position.
    pub(crate) fn restore_model(
        &mut self,
        key: usize,
        model: Box<dyn AtomicModel>,
        last_event: VirtualTime,
        scheduled: Option<VirtualTime>,
    ) {
        let slot = &mut self.models[key];
        slot.model = model;
        slot.last_event = last_event;
        let (id, priority) = (slot.id, slot.priority);
        match scheduled {
            Some(time) => self.scheduler.reschedule(ModelEntry {
                key,
                time,
                priority,
                id,
            }),
            None => {
                self.scheduler.remove(key);
            }
        }
    }

    fn emit_output(&mut self, src: ModelId, msg: &Message, time: VirtualTime) {
        if self.defer_events {
            self.deferred.push(DeferredEvent::Output {
                src,
                msg: msg.clone(),
                time,
            });
        } else {
            for listener in self.listeners.iter() {
                listener.on_output(src, msg, time);
            }
        }
    }

    fn emit_state_change(&mut self, model: ModelId, time: VirtualTime) {
        if self.defer_events {
            self.deferred.push(DeferredEvent::StateChange { model, time });
        } else {
            for listener in self.listeners.iter() {
                listener.on_state_change(model, time);
            }
        }
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("lp", &self.lp)
            .field("models", &self.models.len())
            .field("clock", &self.clock)
            .field("terminated", &self.terminated)
            .finish_non_exhaustive()
    }
}
