//! Simulation configuration, assembly and execution.
//!
//! # Assembling and running a simulation
//!
//! A simulation is assembled with [`SimInit`]: models (and coupled
//! containers) are moved in, output ports are connected to input ports, and
//! [`SimInit::init`] validates the whole bench and produces a [`Simulation`].
//!
//! ```
//! use parasim::messaging::{MessageBag, OutputBag};
//! use parasim::model::AtomicModel;
//! use parasim::simulation::{SimConfig, SimInit};
//! use parasim::time::VirtualTime;
//!
//! #[derive(Clone)]
//! struct Pulse {
//!     period: f64,
//! }
//!
//! impl AtomicModel for Pulse {
//!     fn name(&self) -> &str {
//!         "pulse"
//!     }
//!     fn as_any(&self) -> &dyn std::any::Any {
//!         self
//!     }
//!     fn time_advance(&self) -> VirtualTime {
//!         VirtualTime::at(self.period)
//!     }
//!     fn internal_transition(&mut self) {}
//!     fn external_transition(&mut self, _: VirtualTime, _: &MessageBag) {}
//!     fn confluent_transition(&mut self, _: &MessageBag) {}
//!     fn output(&mut self, bag: &mut OutputBag) {
//!         bag.send(0, ());
//!     }
//! }
//!
//! let config = SimConfig::sequential().with_end_time(VirtualTime::at(10.0));
//! let mut simu = SimInit::new(config)
//!     .add_model(Box::new(Pulse { period: 1.0 }))
//!     .init()?;
//! let outcome = simu.run()?;
//! assert_eq!(outcome.final_time, VirtualTime::at(10.0));
//! # Ok::<(), parasim::simulation::SimulationError>(())
//! ```
//!
//! # Execution modes
//!
//! * [`Mode::Sequential`] runs every model on the calling thread.
//! * [`Mode::Conservative`] partitions the models over logical processes and
//!   synchronizes them with lookahead-based EOT/EIT bounds; every model must
//!   advertise a strictly positive lookahead.
//! * [`Mode::Optimistic`] partitions likewise but lets every LP run ahead
//!   speculatively, repairing causality violations by rollback and bounding
//!   history with a periodically computed global virtual time.
//!
//! Models are assigned to LPs by the configured allocator (round-robin by
//! default), once per model, before the run starts.

pub(crate) mod controller;

use std::error::Error;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::engine::Engine;
use crate::messaging::{EventListener, RoutingTable};
use crate::model::coupled::Coupled;
use crate::model::{AtomicModel, ModelId, LP_MAX};
use crate::network::LocationTable;
use crate::scheduler::heap::HeapScheduler;
use crate::time::VirtualTime;

/// Execution mode of the simulation.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum Mode {
    /// Single-threaded execution on the calling thread.
    Sequential,
    /// Parallel execution under the conservative (lookahead) discipline.
    Conservative,
    /// Parallel execution under the optimistic (time-warp) discipline.
    Optimistic,
}

impl FromStr for Mode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sequential" => Ok(Self::Sequential),
            "conservative" => Ok(Self::Conservative),
            "optimistic" => Ok(Self::Optimistic),
            other => Err(ConfigError::InvalidMode(other.to_string())),
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sequential => write!(f, "sequential"),
            Self::Conservative => write!(f, "conservative"),
            Self::Optimistic => write!(f, "optimistic"),
        }
    }
}

/// Configuration of a simulation run.
#[derive(Clone, Debug)]
pub struct SimConfig {
    /// Execution mode.
    pub mode: Mode,
    /// Number of logical processes in the parallel modes; ignored in
    /// sequential mode. Defaults to the number of logical CPUs.
    pub core_count: usize,
    /// Simulated time horizon; events beyond it do not execute.
    pub end_time: VirtualTime,
    /// Optimistic checkpoint thinning: zero saves state before every step,
    /// a positive value keeps roughly one checkpoint per interval.
    pub save_interval: VirtualTime,
    /// Wall-clock cadence of GVT rounds in optimistic mode.
    pub gvt_interval: Duration,
    /// Master seed; LP-local seeds are derived from it.
    pub seed: u64,
}

impl SimConfig {
    /// A configuration for the given mode with default settings.
    pub fn new(mode: Mode) -> Self {
        Self {
            mode,
            core_count: num_cpus::get(),
            end_time: VirtualTime::INFINITY,
            save_interval: VirtualTime::ZERO,
            gvt_interval: Duration::from_millis(10),
            seed: 0,
        }
    }

    /// A sequential configuration with default settings.
    pub fn sequential() -> Self {
        Self::new(Mode::Sequential)
    }

    /// Replaces the time horizon.
    pub fn with_end_time(mut self, end_time: VirtualTime) -> Self {
        self.end_time = end_time;
        self
    }

    /// Replaces the LP count.
    pub fn with_core_count(mut self, core_count: usize) -> Self {
        self.core_count = core_count;
        self
    }

    /// Replaces the master seed.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// The seed for one LP, derived deterministically from the master seed.
    pub fn lp_seed(&self, lp: u8) -> u64 {
        self.seed ^ (lp as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.mode != Mode::Sequential {
            if self.core_count == 0 {
                return Err(ConfigError::ZeroCores);
            }
            if self.core_count > LP_MAX as usize + 1 {
                return Err(ConfigError::TooManyCores(self.core_count));
            }
        }
        if self.end_time.time() < 0.0 {
            return Err(ConfigError::NegativeEndTime);
        }
        if self.save_interval.time() < 0.0 || self.save_interval.is_infinite() {
            return Err(ConfigError::InvalidSaveInterval);
        }
        Ok(())
    }
}

/// Assigns a model to a logical process; called once per model.
pub type Allocator = dyn Fn(&dyn AtomicModel) -> usize + Send;

/// Decides, from a model's state, whether the simulation should stop.
///
/// Evaluated over every local model after each step; use
/// [`AtomicModel::as_any`] to downcast to the concrete model type.
pub type TerminationPredicate = dyn Fn(&dyn AtomicModel) -> bool + Send + Sync;

/// Builder for a simulation bench.
pub struct SimInit {
    config: SimConfig,
    models: Vec<Box<dyn AtomicModel>>,
    coupleds: Vec<Coupled>,
    connections: Vec<((String, u16), (String, u16))>,
    listeners: Vec<Arc<dyn EventListener>>,
    predicate: Option<Arc<TerminationPredicate>>,
    allocator: Option<Box<Allocator>>,
    lp_graph: Option<Vec<(u8, u8)>>,
}

impl SimInit {
    /// Creates a builder with the given configuration.
    pub fn new(config: SimConfig) -> Self {
        Self {
            config,
            models: Vec::new(),
            coupleds: Vec::new(),
            connections: Vec::new(),
            listeners: Vec::new(),
            predicate: None,
            allocator: None,
            lp_graph: None,
        }
    }

    /// Adds an atomic model to the bench.
    pub fn add_model(mut self, model: Box<dyn AtomicModel>) -> Self {
        self.models.push(model);
        self
    }

    /// Adds a coupled container; it is flattened during initialization and
    /// its children appear under names qualified with the container name.
    pub fn add_coupled(mut self, coupled: Coupled) -> Self {
        self.coupleds.push(coupled);
        self
    }

    /// Connects an output port to an input port by model name.
    pub fn connect(
        mut self,
        src: impl Into<String>,
        src_port: u16,
        dst: impl Into<String>,
        dst_port: u16,
    ) -> Self {
        self.connections
            .push(((src.into(), src_port), (dst.into(), dst_port)));
        self
    }

    /// Registers a simulation event listener.
    pub fn add_listener(mut self, listener: Arc<dyn EventListener>) -> Self {
        self.listeners.push(listener);
        self
    }

    /// Sets the termination predicate, evaluated over every local model
    /// after each step.
    pub fn set_termination_predicate(
        mut self,
        predicate: impl Fn(&dyn AtomicModel) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.predicate = Some(Arc::new(predicate));
        self
    }

    /// Sets the model-to-LP allocator; round-robin by default.
    pub fn set_allocator(
        mut self,
        allocator: impl Fn(&dyn AtomicModel) -> usize + Send + 'static,
    ) -> Self {
        self.allocator = Some(Box::new(allocator));
        self
    }

    /// Overrides the LP dependency graph used by the conservative protocol.
    ///
    /// An edge `(u, v)` states that models on LP `u` may send to models on
    /// LP `v`. Without an override the graph is derived from the routing
    /// table and the models' declared influencees.
    pub fn set_lp_graph(mut self, edges: Vec<(u8, u8)>) -> Self {
        self.lp_graph = Some(edges);
        self
    }

    /// Validates the bench and builds the simulation.
    pub fn init(mut self) -> Result<Simulation, SimulationError> {
        self.config.validate()?;

        // Flatten coupled containers into the model and connection lists.
        for coupled in std::mem::take(&mut self.coupleds) {
            let prefix = coupled.name().to_string();
            let flat = coupled.flatten()?;
            for (name, model) in flat.atomics {
                self.models.push(Box::new(NamedModel {
                    name: format!("{prefix}.{name}"),
                    inner: model,
                }));
            }
            for ((src, sp), (dst, dp)) in flat.routes {
                self.connections.push((
                    (format!("{prefix}.{src}"), sp),
                    (format!("{prefix}.{dst}"), dp),
                ));
            }
        }

        if self.models.is_empty() {
            return Err(ConfigError::EmptyBench.into());
        }

        let lps = match self.config.mode {
            Mode::Sequential => 1,
            _ => self.config.core_count.min(self.models.len()),
        };

        // Allocate models to LPs and mint identifiers.
        let mut location = LocationTable::default();
        let mut assignments = Vec::with_capacity(self.models.len());
        for (index, model) in self.models.iter().enumerate() {
            let lp = match (&self.allocator, self.config.mode) {
                (_, Mode::Sequential) => 0,
                (Some(allocator), _) => allocator(model.as_ref()),
                (None, _) => index % lps,
            };
            if lp >= lps {
                return Err(ConfigError::InvalidAllocation {
                    model: model.name().to_string(),
                    lp,
                    lps,
                }
                .into());
            }
            if self.config.mode != Mode::Sequential && model.lookahead() <= VirtualTime::ZERO {
                return Err(ConfigError::ZeroLookahead(model.name().to_string()).into());
            }
            let id = ModelId::new(0, lp as u8, index as u64);
            if location.get(model.name()).is_some() {
                return Err(ConfigError::DuplicateModel(model.name().to_string()).into());
            }
            location.insert(model.name().to_string(), id);
            assignments.push(id);
        }

        // Resolve connections into the routing table.
        let mut routes = RoutingTable::default();
        for ((src, src_port), (dst, dst_port)) in &self.connections {
            let src_id = location
                .get(src)
                .ok_or_else(|| ConfigError::UnknownModel(src.clone()))?;
            let dst_id = location
                .get(dst)
                .ok_or_else(|| ConfigError::UnknownModel(dst.clone()))?;
            routes.add(src_id.with_port(*src_port), dst_id.with_port(*dst_port));
        }
        let routes = Arc::new(routes);
        let listeners = Arc::new(self.listeners);

        // Build one engine per LP and distribute the models.
        let mut engines: Vec<Engine> = (0..lps)
            .map(|lp| {
                Engine::new(
                    lp as u8,
                    Box::new(HeapScheduler::new()),
                    routes.clone(),
                    listeners.clone(),
                    self.config.end_time,
                    self.predicate.clone(),
                )
            })
            .collect();
        let influencers = derive_influencers(
            lps,
            &self.models,
            &assignments,
            &self.connections,
            &location,
            self.lp_graph.as_deref(),
        );
        for (model, id) in self.models.into_iter().zip(assignments) {
            engines[id.lp() as usize].add_model(model, id);
        }

        info!(
            mode = %self.config.mode,
            lps,
            end_time = %self.config.end_time,
            "simulation initialized"
        );

        let location = Arc::new(location);
        let state = match self.config.mode {
            Mode::Sequential => {
                let mut engine = engines.pop().unwrap();
                engine
                    .init()
                    .map_err(|error| SimulationError::Failed(vec![LpFailure {
                        lp: 0,
                        error: LpError::Execution(error),
                    }]))?;
                SimState::Sequential(engine)
            }
            _ => SimState::Parallel(Some(controller::ParallelSetup {
                engines,
                influencers,
            })),
        };

        Ok(Simulation {
            config: self.config,
            location,
            state,
            outcome: None,
        })
    }
}

impl fmt::Debug for SimInit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SimInit")
            .field("mode", &self.config.mode)
            .field("models", &self.models.len())
            .finish_non_exhaustive()
    }
}

/// Derives, for each LP, the set of LPs that can send to it.
///
/// Without an explicit override the connection list gives the exact
/// reachability; the models' declared influencees are unioned in on top, so
/// an over-approximate declaration can only widen the graph, never unsoundly
/// narrow it.
fn derive_influencers(
    lps: usize,
    models: &[Box<dyn AtomicModel>],
    assignments: &[ModelId],
    connections: &[((String, u16), (String, u16))],
    location: &LocationTable,
    lp_graph: Option<&[(u8, u8)]>,
) -> Vec<Vec<u8>> {
    let mut edges = vec![vec![false; lps]; lps];

    match lp_graph {
        Some(graph) => {
            for &(u, v) in graph {
                if (u as usize) < lps && (v as usize) < lps {
                    edges[u as usize][v as usize] = true;
                }
            }
        }
        None => {
            for ((src, _), (dst, _)) in connections {
                if let (Some(s), Some(d)) = (location.get(src), location.get(dst)) {
                    edges[s.lp() as usize][d.lp() as usize] = true;
                }
            }
            for (model, id) in models.iter().zip(assignments) {
                let u = id.lp() as usize;
                if let Some(influencees) = model.influencees() {
                    for name in influencees {
                        if let Some(target) = location.get(&name) {
                            edges[u][target.lp() as usize] = true;
                        }
                    }
                }
            }
        }
    }

    (0..lps)
        .map(|v| {
            (0..lps)
                .filter(|&u| u != v && edges[u][v])
                .map(|u| u as u8)
                .collect()
        })
        .collect()
}

/// Wrapper giving a flattened child its qualified name.
#[derive(Clone)]
struct NamedModel {
    name: String,
    inner: Box<dyn AtomicModel>,
}

impl AtomicModel for NamedModel {
    fn name(&self) -> &str {
        &self.name
    }
    fn as_any(&self) -> &dyn std::any::Any {
        self.inner.as_any()
    }
    fn time_advance(&self) -> VirtualTime {
        self.inner.time_advance()
    }
    fn internal_transition(&mut self) {
        self.inner.internal_transition()
    }
    fn external_transition(&mut self, elapsed: VirtualTime, bag: &crate::messaging::MessageBag) {
        self.inner.external_transition(elapsed, bag)
    }
    fn confluent_transition(&mut self, bag: &crate::messaging::MessageBag) {
        self.inner.confluent_transition(bag)
    }
    fn output(&mut self, bag: &mut crate::messaging::OutputBag) {
        self.inner.output(bag)
    }
    fn lookahead(&self) -> VirtualTime {
        self.inner.lookahead()
    }
    fn influencees(&self) -> Option<Vec<String>> {
        self.inner.influencees()
    }
    fn priority(&self) -> i32 {
        self.inner.priority()
    }
}

enum SimState {
    Sequential(Engine),
    Parallel(Option<controller::ParallelSetup>),
}

/// A fully assembled simulation.
pub struct Simulation {
    config: SimConfig,
    location: Arc<LocationTable>,
    state: SimState,
    outcome: Option<SimOutcome>,
}

impl Simulation {
    /// Runs the simulation to completion.
    pub fn run(&mut self) -> Result<SimOutcome, SimulationError> {
        let outcome = match &mut self.state {
            SimState::Sequential(engine) => {
                while engine.step().map_err(|error| {
                    SimulationError::Failed(vec![LpFailure {
                        lp: 0,
                        error: LpError::Execution(error),
                    }])
                })? {}
                SimOutcome {
                    final_time: engine.clock(),
                    gvt: engine.clock(),
                    lps: vec![LpSummary {
                        lp: 0,
                        final_time: engine.clock(),
                        steps: engine.steps(),
                        rollbacks: 0,
                    }],
                }
            }
            SimState::Parallel(setup) => {
                let setup = setup.take().ok_or(SimulationError::AlreadyRun)?;
                controller::run_parallel(&self.config, setup)?
            }
        };
        self.outcome = Some(outcome.clone());
        Ok(outcome)
    }

    /// Executes a single step; only available in sequential mode.
    ///
    /// Returns `false` once the simulation has terminated.
    pub fn step(&mut self) -> Result<bool, SimulationError> {
        match &mut self.state {
            SimState::Sequential(engine) => engine.step().map_err(|error| {
                SimulationError::Failed(vec![LpFailure {
                    lp: 0,
                    error: LpError::Execution(error),
                }])
            }),
            SimState::Parallel(_) => Err(SimulationError::UnsupportedInMode {
                operation: "step",
                mode: self.config.mode,
            }),
        }
    }

    /// The current simulation time.
    ///
    /// In the parallel modes this is only meaningful once the run finished,
    /// where it reports the largest LP-local final time.
    pub fn time(&self) -> VirtualTime {
        match &self.state {
            SimState::Sequential(engine) => engine.clock(),
            SimState::Parallel(_) => self
                .outcome
                .as_ref()
                .map(|o| o.final_time)
                .unwrap_or(VirtualTime::ZERO),
        }
    }

    /// Resolves a model name to its identifier.
    pub fn model_id(&self, name: &str) -> Option<ModelId> {
        self.location.get(name)
    }

    /// The next scheduled transition time of a model; `None` when the model
    /// is passive. Only available in sequential mode.
    pub fn scheduled_time(&self, name: &str) -> Option<VirtualTime> {
        match &self.state {
            SimState::Sequential(engine) => {
                let id = self.location.get(name)?;
                let key = engine.local_key(id)?;
                engine.scheduler().time_of(key)
            }
            SimState::Parallel(_) => None,
        }
    }
}

impl fmt::Debug for Simulation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Simulation")
            .field("mode", &self.config.mode)
            .field("time", &self.time())
            .finish_non_exhaustive()
    }
}

/// Per-LP result of a finished run.
#[derive(Clone, Debug)]
pub struct LpSummary {
    /// The logical process.
    pub lp: u8,
    /// Its final local virtual time.
    pub final_time: VirtualTime,
    /// Number of executed steps, including rolled-back ones.
    pub steps: u64,
    /// Number of rollbacks (optimistic mode only).
    pub rollbacks: u64,
}

/// Result of a finished run.
#[derive(Clone, Debug)]
pub struct SimOutcome {
    /// The largest LP-local final time.
    pub final_time: VirtualTime,
    /// The final global virtual time (meaningful in optimistic mode).
    pub gvt: VirtualTime,
    /// Per-LP summaries.
    pub lps: Vec<LpSummary>,
}

/// A configuration problem detected before the simulation starts.
#[derive(Clone, Debug, PartialEq)]
pub enum ConfigError {
    /// The mode string is not recognized.
    InvalidMode(String),
    /// A parallel mode was configured with zero cores.
    ZeroCores,
    /// More cores than the packed LP field can address.
    TooManyCores(usize),
    /// The end time is negative.
    NegativeEndTime,
    /// The save interval is negative or infinite.
    InvalidSaveInterval,
    /// No models were added to the bench.
    EmptyBench,
    /// Two models share a name.
    DuplicateModel(String),
    /// A connection or allocation references a name that was never added.
    UnknownModel(String),
    /// A model advertises a non-positive lookahead in a parallel mode.
    ZeroLookahead(String),
    /// The allocator placed a model on a nonexistent LP.
    InvalidAllocation {
        /// The model being placed.
        model: String,
        /// The LP the allocator chose.
        lp: usize,
        /// The number of LPs in this run.
        lps: usize,
    },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidMode(mode) => write!(f, "unrecognized mode '{mode}'"),
            Self::ZeroCores => write!(f, "parallel modes require at least one core"),
            Self::TooManyCores(n) => write!(f, "{n} cores exceed the addressable LP range"),
            Self::NegativeEndTime => write!(f, "the end time cannot be negative"),
            Self::InvalidSaveInterval => {
                write!(f, "the save interval must be finite and non-negative")
            }
            Self::EmptyBench => write!(f, "the bench contains no models"),
            Self::DuplicateModel(name) => write!(f, "duplicate model name '{name}'"),
            Self::UnknownModel(name) => write!(f, "unknown model '{name}'"),
            Self::ZeroLookahead(name) => write!(
                f,
                "model '{name}' has no positive lookahead, which parallel modes require"
            ),
            Self::InvalidAllocation { model, lp, lps } => write!(
                f,
                "model '{model}' was allocated to LP {lp} but the run has only {lps} LPs"
            ),
        }
    }
}

impl Error for ConfigError {}

/// A fatal error raised by a logical process during execution.
#[derive(Clone, Debug, PartialEq)]
pub enum ExecutionError {
    /// A model returned a negative time advance.
    NegativeTimeAdvance {
        /// The offending model.
        model: String,
    },
    /// A message from the past reached an LP that can no longer honor it.
    CausalityViolation {
        /// The receiving LP.
        lp: u8,
        /// The timestamp of the offending message.
        message_time: VirtualTime,
        /// The LP's local time on arrival.
        local_time: VirtualTime,
    },
    /// A message addressed a model that is not registered on the receiving
    /// LP.
    UnknownDestination {
        /// The receiving LP.
        lp: u8,
        /// The unresolvable destination.
        dst: ModelId,
    },
    /// A rollback would need to undo a step whose state was not saved.
    RollbackDepthExhausted {
        /// The rolling-back LP.
        lp: u8,
        /// The time the rollback had to restore.
        needed: VirtualTime,
        /// The unsaved step that blocked it.
        horizon: VirtualTime,
    },
}

impl fmt::Display for ExecutionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NegativeTimeAdvance { model } => {
                write!(f, "model '{model}' returned a negative time advance")
            }
            Self::CausalityViolation {
                lp,
                message_time,
                local_time,
            } => write!(
                f,
                "LP {lp} received a message timestamped {message_time} at local time {local_time}"
            ),
            Self::UnknownDestination { lp, dst } => {
                write!(f, "LP {lp} received a message for unknown destination {dst:?}")
            }
            Self::RollbackDepthExhausted { lp, needed, horizon } => write!(
                f,
                "LP {lp} had to roll back to {needed} but the step at {horizon} was not saved; \
                 decrease the save interval"
            ),
        }
    }
}

impl Error for ExecutionError {}

/// The failure of one logical process.
#[derive(Clone, Debug)]
pub struct LpFailure {
    /// The failed LP.
    pub lp: u8,
    /// What brought it down.
    pub error: LpError,
}

/// The cause of an LP failure.
#[derive(Clone, Debug)]
pub enum LpError {
    /// A protocol or model-contract violation.
    Execution(ExecutionError),
    /// The LP worker panicked, most likely in user transition code.
    Panicked(String),
}

impl fmt::Display for LpFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.error {
            LpError::Execution(error) => write!(f, "LP {} failed: {error}", self.lp),
            LpError::Panicked(message) => write!(f, "LP {} panicked: {message}", self.lp),
        }
    }
}

/// Top-level simulation error.
#[derive(Debug)]
pub enum SimulationError {
    /// The configuration or bench was invalid.
    Config(ConfigError),
    /// One or more logical processes failed; the run was aborted.
    Failed(Vec<LpFailure>),
    /// `run` was called twice on a parallel simulation.
    AlreadyRun,
    /// The operation is not available in the configured mode.
    UnsupportedInMode {
        /// The attempted operation.
        operation: &'static str,
        /// The configured mode.
        mode: Mode,
    },
}

impl fmt::Display for SimulationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config(error) => write!(f, "configuration error: {error}"),
            Self::Failed(failures) => {
                write!(f, "simulation aborted:")?;
                for failure in failures {
                    write!(f, " {failure};")?;
                }
                Ok(())
            }
            Self::AlreadyRun => write!(f, "a parallel simulation can only be run once"),
            Self::UnsupportedInMode { operation, mode } => {
                write!(f, "'{operation}' is not available in {mode} mode")
            }
        }
    }
}

impl Error for SimulationError {}

impl From<ConfigError> for SimulationError {
    fn from(error: ConfigError) -> Self {
        Self::Config(error)
    }
}
