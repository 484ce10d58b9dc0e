//! A parallel discrete-event (PDEVS) simulation kernel.
//!
//! Parasim executes hierarchical benches of communicating atomic models
//! under three interchangeable execution modes:
//!
//! * a **sequential** simulator that runs the whole bench on the calling
//!   thread,
//! * a **conservative** parallel simulator that partitions the bench over
//!   logical processes (LPs) and keeps them causally safe with
//!   lookahead-based earliest-output/earliest-input time bounds,
//! * an **optimistic** parallel simulator that lets every LP speculate ahead
//!   and repairs causality violations with time-warp rollback,
//!   anti-messages and global-virtual-time fossil collection.
//!
//! The model programming surface is deliberately small: a model implements
//! the [`AtomicModel`](model::AtomicModel) trait — the four PDEVS
//! transitions, an output function, a time advance and (for the parallel
//! modes) a lookahead — and communicates exclusively through port-addressed
//! messages. Models can be registered directly or grouped in
//! [`Coupled`](model::coupled::Coupled) containers, which are flattened into
//! direct port-to-port routes before the run starts.
//!
//! # A minimal bench
//!
//! ```
//! use parasim::messaging::{EventBuffer, MessageBag, OutputBag};
//! use parasim::model::AtomicModel;
//! use parasim::simulation::{SimConfig, SimInit};
//! use parasim::time::VirtualTime;
//!
//! // A generator emitting one message every 10 time units.
//! #[derive(Clone)]
//! struct Generator;
//!
//! impl AtomicModel for Generator {
//!     fn name(&self) -> &str {
//!         "generator"
//!     }
//!     fn as_any(&self) -> &dyn std::any::Any {
//!         self
//!     }
//!     fn time_advance(&self) -> VirtualTime {
//!         VirtualTime::at(10.0)
//!     }
//!     fn internal_transition(&mut self) {}
//!     fn external_transition(&mut self, _: VirtualTime, _: &MessageBag) {}
//!     fn confluent_transition(&mut self, _: &MessageBag) {}
//!     fn output(&mut self, bag: &mut OutputBag) {
//!         bag.send(0, 1u64);
//!     }
//! }
//!
//! // A passive sink counting what it receives.
//! #[derive(Clone)]
//! struct Sink {
//!     received: u64,
//! }
//!
//! impl AtomicModel for Sink {
//!     fn name(&self) -> &str {
//!         "sink"
//!     }
//!     fn as_any(&self) -> &dyn std::any::Any {
//!         self
//!     }
//!     fn time_advance(&self) -> VirtualTime {
//!         VirtualTime::INFINITY
//!     }
//!     fn internal_transition(&mut self) {}
//!     fn external_transition(&mut self, _: VirtualTime, bag: &MessageBag) {
//!         self.received += bag.len() as u64;
//!     }
//!     fn confluent_transition(&mut self, bag: &MessageBag) {
//!         self.received += bag.len() as u64;
//!     }
//!     fn output(&mut self, _: &mut OutputBag) {}
//! }
//!
//! let events = EventBuffer::new();
//! let config = SimConfig::sequential().with_end_time(VirtualTime::at(100.0));
//! let mut simu = SimInit::new(config)
//!     .add_model(Box::new(Generator))
//!     .add_model(Box::new(Sink { received: 0 }))
//!     .connect("generator", 0, "sink", 0)
//!     .add_listener(events.clone())
//!     .init()?;
//!
//! let outcome = simu.run()?;
//! assert_eq!(outcome.final_time, VirtualTime::at(100.0));
//! # Ok::<(), parasim::simulation::SimulationError>(())
//! ```
//!
//! Switching the same bench to a parallel mode is a configuration change:
//! `SimConfig::new(Mode::Conservative)` or `Mode::Optimistic`, plus a
//! strictly positive [`lookahead`](model::AtomicModel::lookahead) on every
//! model for the conservative protocol to exploit.
//!
//! # Determinism and ordering
//!
//! Within one LP, transitions execute in nondecreasing `(time, causal)`
//! order and same-time ties are broken by model priority and then by model
//! identifier, so repeated runs of a sequential bench are bit-identical.
//! Across LPs, the conservative mode never lets a model observe a message
//! from its past; the optimistic mode guarantees the same once rollbacks
//! have settled, and withholds listener events until they are final.
//!
//! # Observability
//!
//! Simulation output is consumed through
//! [`EventListener`](messaging::EventListener)s, which receive every routed
//! message and state transition. Diagnostic logging goes through the
//! [`tracing`](https://docs.rs/tracing) facade; attach any subscriber to see
//! step, synchronization and rollback activity.

#![warn(missing_docs, missing_debug_implementations, unreachable_pub)]
#![cfg_attr(docsrs, feature(doc_auto_cfg))]

pub(crate) mod engine;
pub mod messaging;
pub mod model;
pub(crate) mod network;
pub mod scheduler;
pub mod simulation;
pub mod time;
pub(crate) mod util;

pub use model::AtomicModel;
pub use simulation::{Mode, SimConfig, SimInit, Simulation};
pub use time::VirtualTime;
