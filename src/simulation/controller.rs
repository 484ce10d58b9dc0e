//! Parallel run orchestration.
//!
//! The controller owns the worker pool: one thread per logical process,
//! sized at startup, with no migration. It wires up the per-LP mailboxes and
//! control channels, the shared EOT vector with its wake lists, and — in
//! optimistic mode — drives the GVT coordinator on the calling thread while
//! the workers run. When the run ends (normally or through a failure) it
//! joins every worker and aggregates the per-LP results.

use std::sync::mpsc::channel;
use std::sync::Arc;
use std::thread;

use parking::Parker;
use tracing::{error, warn};

use crate::engine::conservative::ConservativeEngine;
use crate::engine::gvt::GvtCoordinator;
use crate::engine::optimistic::OptimisticEngine;
use crate::engine::{Engine, WorkerCtx};
use crate::network::{EotVector, Network, SharedState};
use crate::simulation::{
    ExecutionError, LpError, LpFailure, LpSummary, Mode, SimConfig, SimOutcome, SimulationError,
};
use crate::time::VirtualTime;

/// Everything `SimInit` prepared for a parallel run.
pub(crate) struct ParallelSetup {
    pub(crate) engines: Vec<Engine>,
    /// For each LP, the LPs that can send to it.
    pub(crate) influencers: Vec<Vec<u8>>,
}

/// Stops the run when a worker unwinds, so its peers do not wait on a
/// corpse.
struct ShutdownOnPanic(Arc<SharedState>);

impl Drop for ShutdownOnPanic {
    fn drop(&mut self) {
        if thread::panicking() {
            self.0.shutdown();
        }
    }
}

pub(crate) fn run_parallel(
    config: &SimConfig,
    setup: ParallelSetup,
) -> Result<SimOutcome, SimulationError> {
    let lps = setup.engines.len();
    let shared = Arc::new(SharedState::new(lps));

    let mut mail_txs = Vec::with_capacity(lps);
    let mut mail_rxs = Vec::with_capacity(lps);
    let mut ctrl_txs = Vec::with_capacity(lps);
    let mut ctrl_rxs = Vec::with_capacity(lps);
    for _ in 0..lps {
        let (tx, rx) = channel();
        mail_txs.push(tx);
        mail_rxs.push(rx);
        let (tx, rx) = channel();
        ctrl_txs.push(tx);
        ctrl_rxs.push(rx);
    }
    let net = Network::new(mail_txs, shared.clone());
    let (coordinator_tx, coordinator_rx) = channel();

    let parkers: Vec<Parker> = (0..lps).map(|_| Parker::new()).collect();
    let mut eot = EotVector::new(lps);
    if config.mode == Mode::Conservative {
        // An EOT publish by `u` wakes every LP it influences.
        for (v, influencers) in setup.influencers.iter().enumerate() {
            for &u in influencers {
                eot.add_waker(u as usize, parkers[v].unparker());
            }
        }
    }
    let eot = Arc::new(eot);

    let mut handles = Vec::with_capacity(lps);
    let mut mail_rxs = mail_rxs.into_iter();
    let mut ctrl_rxs = ctrl_rxs.into_iter();
    let mut parkers = parkers.into_iter();
    for (i, engine) in setup.engines.into_iter().enumerate() {
        let ctx = WorkerCtx {
            lp: i as u8,
            net: net.clone(),
            mail_rx: mail_rxs.next().unwrap(),
            ctrl_rx: ctrl_rxs.next().unwrap(),
            shared: shared.clone(),
            eot: eot.clone(),
            parker: parkers.next().unwrap(),
            next_ctrl: ctrl_txs.get(i + 1).cloned(),
            coordinator_tx: coordinator_tx.clone(),
        };
        let influencers = setup.influencers[i].clone();
        let mode = config.mode;
        let save_interval = config.save_interval;

        let handle = thread::Builder::new()
            .name(format!("parasim-lp-{i}"))
            .spawn(move || -> Result<LpSummary, ExecutionError> {
                let _guard = ShutdownOnPanic(ctx.shared.clone());
                let result = match mode {
                    Mode::Conservative => ConservativeEngine::new(engine, influencers).run(&ctx),
                    Mode::Optimistic => {
                        OptimisticEngine::new(engine, lps, save_interval).run(&ctx)
                    }
                    Mode::Sequential => unreachable!("sequential runs have no workers"),
                };
                if let Err(err) = &result {
                    error!(lp = ctx.lp, %err, "LP failed");
                    ctx.shared.shutdown();
                }
                result
            })
            .expect("failed to spawn LP worker");
        handles.push(handle);
    }
    drop(coordinator_tx);

    if config.mode == Mode::Optimistic {
        GvtCoordinator::new(
            ctrl_txs,
            coordinator_rx,
            shared.clone(),
            config.gvt_interval,
            config.end_time,
        )
        .run();
    }

    let mut summaries = Vec::with_capacity(lps);
    let mut failures = Vec::new();
    for (i, handle) in handles.into_iter().enumerate() {
        match handle.join() {
            Ok(Ok(summary)) => summaries.push(summary),
            Ok(Err(error)) => failures.push(LpFailure {
                lp: i as u8,
                error: LpError::Execution(error),
            }),
            Err(panic) => {
                warn!(lp = i, "LP worker panicked");
                failures.push(LpFailure {
                    lp: i as u8,
                    error: LpError::Panicked(panic_message(panic)),
                });
            }
        }
    }

    if !failures.is_empty() {
        return Err(SimulationError::Failed(failures));
    }

    let final_time = summaries
        .iter()
        .map(|s| s.final_time)
        .max()
        .unwrap_or(VirtualTime::ZERO);
    let gvt = match config.mode {
        Mode::Optimistic => std::cmp::max(shared.gvt(), final_time),
        _ => final_time,
    };

    Ok(SimOutcome {
        final_time,
        gvt,
        lps: summaries,
    })
}

fn panic_message(panic: Box<dyn std::any::Any + Send>) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
