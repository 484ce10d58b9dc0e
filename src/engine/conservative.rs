//! Conservative (lookahead-based) LP discipline.
//!
//! A conservative LP only executes an event once it is certain no earlier
//! message can still arrive. Certainty comes from the shared EOT vector:
//! every LP publishes its *earliest output time* (EOT), the earliest
//! simulated time at which it might still emit a message, and derives its
//! *earliest input time* (EIT) as the minimum EOT over the LPs that can send
//! to it. Events at or before the EIT are safe.
//!
//! After each local step the LP refreshes its published EOT as
//! `min(EIT + lookahead_min, y)` where `lookahead_min` is the smallest
//! lookahead any resident model advertises and `y` is the causal successor
//! of the step time when a message was sent during the step, and the next
//! local event time otherwise. The `x` term ranges over *all* models: a
//! quiescent model can still be triggered by an input arriving at the EIT
//! and emit one lookahead later.
//!
//! Progress requires every model to advertise a strictly positive lookahead,
//! which is enforced at registration. A blocked LP parks and is woken by the
//! EOT vector whenever one of its influencers publishes.

use std::time::Duration;

use crossbeam_utils::Backoff;
use tracing::{debug, trace};

use crate::engine::{Engine, WorkerCtx};
use crate::simulation::{ExecutionError, LpSummary};
use crate::time::VirtualTime;

/// Upper bound on one blocked park; bounds the staleness of the live flag.
const PARK_TIMEOUT: Duration = Duration::from_millis(1);

/// A logical process running under the conservative discipline.
pub(crate) struct ConservativeEngine {
    core: Engine,
    /// Earliest input time: no influencer can send below this.
    eit: VirtualTime,
    /// Send stamp of the last step, if it sent across LPs.
    sent_stamp: Option<VirtualTime>,
    /// LPs whose models can send to models resident here.
    influencers: Vec<u8>,
}

impl ConservativeEngine {
    pub(crate) fn new(core: Engine, influencers: Vec<u8>) -> Self {
        Self {
            core,
            eit: VirtualTime::ZERO,
            sent_stamp: None,
            influencers,
        }
    }

    /// Runs this LP to termination.
    pub(crate) fn run(mut self, ctx: &WorkerCtx) -> Result<LpSummary, ExecutionError> {
        self.core.init()?;
        self.sync(ctx);

        let backoff = Backoff::new();
        while ctx.shared.is_live() && !self.core.is_terminated() {
            self.drain_inbox(ctx)?;
            self.update_eit(ctx);

            let next = self.core.next_time();
            if next.is_infinite() || next > self.core.end_time() {
                // Nothing local below the horizon. Influencers may still
                // send unless their EOTs have passed the horizon too.
                if self.eit.is_infinite() || self.eit > self.core.end_time() {
                    self.core.terminate_idle();
                    break;
                }
                self.sync(ctx);
                self.wait(ctx, &backoff);
                continue;
            }

            if next <= self.eit {
                backoff.reset();
                self.step_at(next, ctx)?;
                self.sync(ctx);
            } else {
                trace!(lp = ctx.lp, next = %next, eit = %self.eit, "blocked");
                self.sync(ctx);
                if self.core.next_time() > self.eit {
                    self.wait(ctx, &backoff);
                }
            }
        }

        // Nothing will ever be emitted from here again.
        ctx.eot.publish(ctx.lp as usize, VirtualTime::INFINITY);
        debug!(lp = ctx.lp, time = %self.core.clock(), steps = self.core.steps(), "LP finished");

        Ok(LpSummary {
            lp: ctx.lp,
            final_time: self.core.clock(),
            steps: self.core.steps(),
            rollbacks: 0,
        })
    }

    /// One safe step at time `t`, with outbound flushing.
    fn step_at(&mut self, t: VirtualTime, ctx: &WorkerCtx) -> Result<(), ExecutionError> {
        let imminents = self.core.take_imminents(t);
        let mut routed = self.core.collect_output(t, &imminents)?;
        self.core.deliver_pending(t, &mut routed.local, None)?;
        let touched = self.core.transition(t, &imminents, routed.local)?;
        self.core.reschedule(t, &touched)?;

        if !routed.outbound.is_empty() {
            self.sent_stamp = Some(t.next_causal());
            for msg in routed.outbound.drain(..) {
                // Raise the published EOT eagerly so receivers of this
                // message see a consistent bound before their next read.
                if ctx.eot.read(ctx.lp as usize) < msg.send_time() {
                    ctx.eot.publish(ctx.lp as usize, msg.send_time());
                }
                ctx.net.send(msg);
            }
        }

        self.core.finish_step(t);
        Ok(())
    }

    fn drain_inbox(&mut self, ctx: &WorkerCtx) -> Result<(), ExecutionError> {
        while let Ok(msg) = ctx.mail_rx.try_recv() {
            ctx.net.acknowledge();
            debug_assert!(!msg.is_anti(), "anti-message under conservative discipline");
            self.core.insert_mail(msg)?;
        }
        Ok(())
    }

    /// Publishes the new EOT, refreshes the EIT and clamps the clock.
    fn sync(&mut self, ctx: &WorkerCtx) {
        self.update_eot(ctx);
        self.update_eit(ctx);
        let clamped = std::cmp::min(self.core.clock(), self.eit);
        self.core.set_clock(clamped);
    }

    fn update_eot(&mut self, ctx: &WorkerCtx) {
        let lookahead_min = self.core.min_lookahead();
        let x = if self.eit.is_infinite() || lookahead_min.is_infinite() {
            VirtualTime::INFINITY
        } else {
            VirtualTime::at(self.eit.time() + lookahead_min.time())
        };
        let y = match self.sent_stamp.take() {
            Some(stamp) => stamp,
            None => self.core.next_time(),
        };
        let eot = std::cmp::min(x, y);
        trace!(lp = ctx.lp, eot = %eot, x = %x, y = %y, "publishing EOT");
        ctx.eot.publish(ctx.lp as usize, eot);
    }

    fn update_eit(&mut self, ctx: &WorkerCtx) {
        let mut eit = VirtualTime::INFINITY;
        for &lp in &self.influencers {
            eit = std::cmp::min(eit, ctx.eot.read(lp as usize));
        }
        self.eit = eit;
    }

    /// Cooperative blocked wait: spin briefly, then park until an influencer
    /// publishes or the timeout elapses.
    fn wait(&self, ctx: &WorkerCtx, backoff: &Backoff) {
        if backoff.is_completed() {
            ctx.parker.park_timeout(PARK_TIMEOUT);
        } else {
            backoff.snooze();
        }
    }
}

impl std::fmt::Debug for ConservativeEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConservativeEngine")
            .field("lp", &self.core.lp())
            .field("clock", &self.core.clock())
            .field("eit", &self.eit)
            .finish_non_exhaustive()
    }
}
