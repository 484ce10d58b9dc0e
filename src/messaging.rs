//! Messages, bags and simulation event listeners.
//!
//! Models communicate through [`Message`]s: timestamped, port-addressed
//! payloads routed by the kernel. Payloads are reference-counted type-erased
//! values ([`Payload`]), so broadcasting one output to several destinations
//! or across logical processes never copies the user data.
//!
//! Simulation observers implement [`EventListener`]. Listener callbacks are
//! fire-and-forget and, in the parallel execution modes, may be invoked
//! concurrently from several logical processes; implementations must be
//! thread-safe. [`EventBuffer`] is a ready-made listener that records events
//! into an unbounded queue for later inspection.

use std::any::Any;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::{Arc, Mutex};

use crate::model::ModelId;
use crate::time::VirtualTime;

/// A type-erased, shareable message payload.
pub type Payload = Arc<dyn Any + Send + Sync>;

/// The identity of a message, unique across one simulation run.
///
/// An anti-message carries the identity of the positive message it negates.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub struct MessageId {
    /// The logical process that sent the message.
    pub lp: u8,
    /// Sender-local sequence number.
    pub seq: u64,
}

/// A routed inter-model message.
#[derive(Clone)]
pub struct Message {
    src: ModelId,
    dst: ModelId,
    payload: Payload,
    send_time: VirtualTime,
    id: MessageId,
    anti: bool,
    white: bool,
}

impl Message {
    pub(crate) fn new(
        src: ModelId,
        dst: ModelId,
        payload: Payload,
        send_time: VirtualTime,
        id: MessageId,
    ) -> Self {
        Self {
            src,
            dst,
            payload,
            send_time,
            id,
            anti: false,
            white: true,
        }
    }

    /// The sending model, with the output port packed in.
    pub fn src(&self) -> ModelId {
        self.src
    }

    /// The destination model, with the input port packed in.
    pub fn dst(&self) -> ModelId {
        self.dst
    }

    /// The destination input port.
    pub fn port(&self) -> u16 {
        self.dst.port()
    }

    /// The payload.
    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    /// Downcasts the payload to a concrete type.
    pub fn downcast<T: Any + Send + Sync>(&self) -> Option<&T> {
        self.payload.downcast_ref()
    }

    /// The simulation time at which the message was sent.
    pub fn send_time(&self) -> VirtualTime {
        self.send_time
    }

    /// The unique message identity.
    pub fn id(&self) -> MessageId {
        self.id
    }

    /// Whether this is an anti-message.
    pub fn is_anti(&self) -> bool {
        self.anti
    }

    /// Returns the anti-message negating this message.
    pub(crate) fn to_anti(&self) -> Self {
        let mut anti = self.clone();
        anti.anti = true;
        anti
    }

    /// Whether the sender was white (pre-cut) in the current GVT round.
    pub(crate) fn is_white(&self) -> bool {
        self.white
    }

    pub(crate) fn set_white(&mut self, white: bool) {
        self.white = white;
    }
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Message")
            .field("src", &self.src)
            .field("dst", &self.dst)
            .field("send_time", &self.send_time)
            .field("id", &self.id)
            .field("anti", &self.anti)
            .finish_non_exhaustive()
    }
}

/// The set of messages delivered to one model in one simulation step.
///
/// Bags must be treated as unordered: the kernel does not promise any
/// relative order among same-time messages.
#[derive(Default, Debug)]
pub struct MessageBag {
    messages: Vec<Message>,
}

impl MessageBag {
    pub(crate) fn push(&mut self, msg: Message) {
        self.messages.push(msg);
    }

    /// Number of messages in the bag.
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Whether the bag is empty.
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Iterates over the messages.
    pub fn iter(&self) -> impl Iterator<Item = &Message> {
        self.messages.iter()
    }

    /// Iterates over the messages addressed to the given input port.
    pub fn on_port(&self, port: u16) -> impl Iterator<Item = &Message> {
        self.messages.iter().filter(move |m| m.port() == port)
    }

    /// Iterates over payloads downcast to a concrete type, skipping others.
    pub fn payloads<T: Any + Send + Sync>(&self) -> impl Iterator<Item = &T> {
        self.messages.iter().filter_map(|m| m.downcast::<T>())
    }
}

/// Collects the outputs produced by one model during its output phase.
///
/// Entries are (output port, payload) pairs; the kernel resolves them to
/// destinations through the routing table.
#[derive(Default)]
pub struct OutputBag {
    items: Vec<(u16, Payload)>,
}

impl fmt::Debug for OutputBag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutputBag")
            .field("items", &self.items.len())
            .finish()
    }
}

impl OutputBag {
    /// Emits a value on the given output port.
    pub fn send<T: Any + Send + Sync>(&mut self, port: u16, value: T) {
        self.items.push((port, Arc::new(value)));
    }

    /// Emits an already shared payload on the given output port.
    pub fn send_payload(&mut self, port: u16, payload: Payload) {
        self.items.push((port, payload));
    }

    pub(crate) fn drain(&mut self) -> std::vec::Drain<'_, (u16, Payload)> {
        self.items.drain(..)
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Resolves output ports to their connected input ports.
///
/// Built once from the flattened couplings at initialization; immutable
/// afterwards, so it is shared across logical processes without locking.
#[derive(Default, Debug)]
pub(crate) struct RoutingTable {
    routes: std::collections::HashMap<u64, Vec<ModelId>>,
}

impl RoutingTable {
    pub(crate) fn add(&mut self, src: ModelId, dst: ModelId) {
        self.routes.entry(src.packed()).or_default().push(dst);
    }

    /// Destinations of the given output port; empty when unconnected.
    pub(crate) fn targets(&self, src: ModelId) -> &[ModelId] {
        self.routes
            .get(&src.packed())
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

/// Observer of simulation events.
///
/// All callbacks have empty default implementations so listeners only
/// override what they need. Implementations must be thread-safe when used in
/// a parallel execution mode.
pub trait EventListener: Send + Sync {
    /// A message was emitted by a model.
    fn on_output(&self, src: ModelId, msg: &Message, time: VirtualTime) {
        let _ = (src, msg, time);
    }

    /// A model went through a state transition.
    fn on_state_change(&self, model: ModelId, time: VirtualTime) {
        let _ = (model, time);
    }
}

/// One recorded simulation event.
#[derive(Clone)]
pub enum EventRecord {
    /// A message emission.
    Output {
        /// The emitting model and port.
        src: ModelId,
        /// The destination model and port.
        dst: ModelId,
        /// The emission time.
        time: VirtualTime,
        /// The message payload.
        payload: Payload,
    },
    /// A state transition of a model at a time.
    StateChange {
        /// The transitioned model.
        model: ModelId,
        /// The transition time.
        time: VirtualTime,
    },
}

impl fmt::Debug for EventRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Output { src, dst, time, .. } => f
                .debug_struct("Output")
                .field("src", src)
                .field("dst", dst)
                .field("time", time)
                .finish_non_exhaustive(),
            Self::StateChange { model, time } => f
                .debug_struct("StateChange")
                .field("model", model)
                .field("time", time)
                .finish(),
        }
    }
}

/// An [`EventListener`] that records events into an unbounded queue.
///
/// The queue can be drained at any time from the thread owning the buffer;
/// recording can be paused by closing the buffer.
pub struct EventBuffer {
    is_open: Arc<AtomicBool>,
    sender: Sender<EventRecord>,
    receiver: Mutex<Receiver<EventRecord>>,
}

impl EventBuffer {
    /// Creates an open event buffer.
    pub fn new() -> Arc<Self> {
        let (sender, receiver) = channel();
        Arc::new(Self {
            is_open: Arc::new(AtomicBool::new(true)),
            sender,
            receiver: Mutex::new(receiver),
        })
    }

    /// Stops recording; events sent while closed are dropped.
    pub fn close(&self) {
        self.is_open.store(false, Ordering::Relaxed);
    }

    /// Drains all recorded events.
    pub fn drain(&self) -> Vec<EventRecord> {
        let receiver = self.receiver.lock().unwrap();
        let mut events = Vec::new();
        while let Ok(event) = receiver.try_recv() {
            events.push(event);
        }
        events
    }
}

impl EventListener for EventBuffer {
    fn on_output(&self, src: ModelId, msg: &Message, time: VirtualTime) {
        if !self.is_open.load(Ordering::Relaxed) {
            return;
        }
        // Ignore sending failure.
        let _ = self.sender.send(EventRecord::Output {
            src,
            dst: msg.dst(),
            time,
            payload: msg.payload().clone(),
        });
    }

    fn on_state_change(&self, model: ModelId, time: VirtualTime) {
        if !self.is_open.load(Ordering::Relaxed) {
            return;
        }
        let _ = self.sender.send(EventRecord::StateChange { model, time });
    }
}

impl fmt::Debug for EventBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBuffer").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bag_filters_by_port_and_type() {
        let src = ModelId::new(1, 0, 1);
        let dst = ModelId::new(2, 0, 2);
        let mut bag = MessageBag::default();
        let id = MessageId { lp: 0, seq: 0 };
        bag.push(Message::new(
            src,
            dst,
            Arc::new(7u32),
            VirtualTime::at(1.0),
            id,
        ));
        bag.push(Message::new(
            src,
            dst.with_port(3),
            Arc::new("text"),
            VirtualTime::at(1.0),
            MessageId { lp: 0, seq: 1 },
        ));

        assert_eq!(bag.len(), 2);
        assert_eq!(bag.on_port(2).count(), 1);
        assert_eq!(bag.payloads::<u32>().copied().collect::<Vec<_>>(), vec![7]);
    }

    #[test]
    fn anti_message_preserves_identity() {
        let msg = Message::new(
            ModelId::new(0, 0, 1),
            ModelId::new(0, 1, 2),
            Arc::new(()),
            VirtualTime::at(5.0),
            MessageId { lp: 0, seq: 42 },
        );
        let anti = msg.to_anti();
        assert!(anti.is_anti());
        assert_eq!(anti.id(), msg.id());
        assert_eq!(anti.send_time(), msg.send_time());
    }

    #[test]
    fn event_buffer_records_and_drains() {
        let buffer = EventBuffer::new();
        buffer.on_state_change(ModelId::new(0, 0, 1), VirtualTime::at(2.0));
        let events = buffer.drain();
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], EventRecord::StateChange { .. }));

        buffer.close();
        buffer.on_state_change(ModelId::new(0, 0, 1), VirtualTime::at(3.0));
        assert!(buffer.drain().is_empty());
    }
}
