//! Shared test models.

#![allow(dead_code)]

use std::any::Any;
use std::sync::{Arc, Mutex};

use parasim::messaging::{EventRecord, MessageBag, OutputBag};
use parasim::model::AtomicModel;
use parasim::time::VirtualTime;

/// A transition log shared between a model and the test body.
pub type Log = Arc<Mutex<Vec<(&'static str, f64)>>>;

pub fn new_log() -> Log {
    Arc::new(Mutex::new(Vec::new()))
}

pub fn entries(log: &Log) -> Vec<(&'static str, f64)> {
    log.lock().unwrap().clone()
}

/// Emits a unit message every `period`, forever.
#[derive(Clone)]
pub struct Pulser {
    pub name: String,
    pub period: f64,
    pub now: f64,
    pub log: Log,
}

impl Pulser {
    pub fn new(name: &str, period: f64, log: Log) -> Box<dyn AtomicModel> {
        Box::new(Self {
            name: name.to_string(),
            period,
            now: 0.0,
            log,
        })
    }
}

impl AtomicModel for Pulser {
    fn name(&self) -> &str {
        &self.name
    }
    fn as_any(&self) -> &dyn Any {
        self
    }
    fn time_advance(&self) -> VirtualTime {
        VirtualTime::at(self.period)
    }
    fn internal_transition(&mut self) {
        self.now += self.period;
        self.log.lock().unwrap().push(("internal", self.now));
    }
    fn external_transition(&mut self, _: VirtualTime, _: &MessageBag) {
        unreachable!("pulser has no inputs");
    }
    fn confluent_transition(&mut self, _: &MessageBag) {
        unreachable!("pulser has no inputs");
    }
    fn output(&mut self, bag: &mut OutputBag) {
        bag.send(0, ());
    }
}

/// Passive until it receives a message, then fires once after `delay`.
#[derive(Clone)]
pub struct Responder {
    pub name: String,
    pub delay: f64,
    pub armed: bool,
    pub now: f64,
    pub log: Log,
}

impl Responder {
    pub fn new(name: &str, delay: f64, log: Log) -> Box<dyn AtomicModel> {
        Box::new(Self {
            name: name.to_string(),
            delay,
            armed: false,
            now: 0.0,
            log,
        })
    }
}

impl AtomicModel for Responder {
    fn name(&self) -> &str {
        &self.name
    }
    fn as_any(&self) -> &dyn Any {
        self
    }
    fn time_advance(&self) -> VirtualTime {
        if self.armed {
            VirtualTime::at(self.delay)
        } else {
            VirtualTime::INFINITY
        }
    }
    fn internal_transition(&mut self) {
        self.now += self.delay;
        self.armed = false;
        self.log.lock().unwrap().push(("internal", self.now));
    }
    fn external_transition(&mut self, elapsed: VirtualTime, _: &MessageBag) {
        self.now += elapsed.time();
        self.armed = true;
        self.log.lock().unwrap().push(("external", self.now));
    }
    fn confluent_transition(&mut self, _: &MessageBag) {
        self.now += self.delay;
        self.armed = true;
        self.log.lock().unwrap().push(("confluent", self.now));
    }
    fn output(&mut self, _: &mut OutputBag) {}
}

/// A passive message counter.
#[derive(Clone)]
pub struct CountingSink {
    pub name: String,
    pub received: Arc<Mutex<u64>>,
}

impl CountingSink {
    pub fn new(name: &str, received: Arc<Mutex<u64>>) -> Box<dyn AtomicModel> {
        Box::new(Self {
            name: name.to_string(),
            received,
        })
    }
}

impl AtomicModel for CountingSink {
    fn name(&self) -> &str {
        &self.name
    }
    fn as_any(&self) -> &dyn Any {
        self
    }
    fn time_advance(&self) -> VirtualTime {
        VirtualTime::INFINITY
    }
    fn internal_transition(&mut self) {}
    fn external_transition(&mut self, _: VirtualTime, bag: &MessageBag) {
        *self.received.lock().unwrap() += bag.len() as u64;
    }
    fn confluent_transition(&mut self, bag: &MessageBag) {
        *self.received.lock().unwrap() += bag.len() as u64;
    }
    fn output(&mut self, _: &mut OutputBag) {}
}

/// Emits its running count every `period` and jumps the count by every
/// received payload.
#[derive(Clone)]
pub struct Accumulator {
    pub name: String,
    pub period: f64,
    pub lookahead: f64,
    pub count: u64,
}

impl Accumulator {
    pub fn new(name: &str, period: f64, lookahead: f64) -> Box<dyn AtomicModel> {
        Box::new(Self {
            name: name.to_string(),
            period,
            lookahead,
            count: 0,
        })
    }

    fn absorb(&mut self, bag: &MessageBag) {
        for jump in bag.payloads::<u64>() {
            self.count += *jump;
        }
    }
}

impl AtomicModel for Accumulator {
    fn name(&self) -> &str {
        &self.name
    }
    fn as_any(&self) -> &dyn Any {
        self
    }
    fn time_advance(&self) -> VirtualTime {
        VirtualTime::at(self.period)
    }
    fn internal_transition(&mut self) {
        self.count += 1;
    }
    fn external_transition(&mut self, _: VirtualTime, bag: &MessageBag) {
        self.absorb(bag);
    }
    fn confluent_transition(&mut self, bag: &MessageBag) {
        self.count += 1;
        self.absorb(bag);
    }
    fn output(&mut self, bag: &mut OutputBag) {
        bag.send(0, self.count);
    }
    fn lookahead(&self) -> VirtualTime {
        VirtualTime::at(self.lookahead)
    }
}

/// Fires once, `delay` after the start, emitting one `u64` payload; absorbs
/// any input without disturbing its firing time.
#[derive(Clone)]
pub struct OneShot {
    pub name: String,
    pub remaining: f64,
    pub payload: u64,
    pub fired: bool,
}

impl OneShot {
    pub fn new(name: &str, delay: f64, payload: u64) -> Box<dyn AtomicModel> {
        Box::new(Self {
            name: name.to_string(),
            remaining: delay,
            payload,
            fired: false,
        })
    }
}

impl AtomicModel for OneShot {
    fn name(&self) -> &str {
        &self.name
    }
    fn as_any(&self) -> &dyn Any {
        self
    }
    fn time_advance(&self) -> VirtualTime {
        if self.fired {
            VirtualTime::INFINITY
        } else {
            VirtualTime::at(self.remaining)
        }
    }
    fn internal_transition(&mut self) {
        self.fired = true;
    }
    fn external_transition(&mut self, elapsed: VirtualTime, _: &MessageBag) {
        self.remaining -= elapsed.time();
    }
    fn confluent_transition(&mut self, _: &MessageBag) {
        self.fired = true;
    }
    fn output(&mut self, bag: &mut OutputBag) {
        if !self.fired {
            bag.send(0, self.payload);
        }
    }
}

/// Projects the recorded output events of a run into a comparable multiset.
pub fn output_multiset(events: &[EventRecord]) -> Vec<(u64, u64, u64, u64, u64)> {
    let mut outputs: Vec<_> = events
        .iter()
        .filter_map(|event| match event {
            EventRecord::Output {
                src,
                dst,
                time,
                payload,
            } => {
                let value = payload.downcast_ref::<u64>().copied().unwrap_or(u64::MAX);
                Some((
                    src.packed(),
                    dst.packed(),
                    time.time().to_bits(),
                    time.causal(),
                    value,
                ))
            }
            EventRecord::StateChange { .. } => None,
        })
        .collect();
    outputs.sort_unstable();
    outputs
}
