//! Global virtual time estimation.
//!
//! GVT is a lower bound on the timestamp of any message still in transit and
//! any state an optimistic LP may still roll back to. It is computed with a
//! Mattern-style token that circulates over the LP control channels, driven
//! by a single coordinator:
//!
//! * the token carries a running minimum of the LPs' local virtual times
//!   (`t_min`), a running minimum of the send times of post-cut ("red")
//!   messages (`t_red`), and one in-flight counter per LP;
//! * on its first visit in a round an LP advances its cut epoch, after which
//!   its sends are red for this round;
//! * the coordinator keeps circulating the token until every counter drains
//!   to zero, i.e. every pre-cut ("white") message has been received, and
//!   then publishes `min(t_min, t_red)` as the new GVT.
//!
//! Epoch parity doubles as the message color: a message stamped with the
//! sender's epoch parity at send time is white for the cut that ends that
//! epoch and red for the previous one. Anti-messages are counted exactly
//! like positive messages.
//!
//! GVT is monotone by construction; the coordinator additionally clamps the
//! published value to never regress.

use std::sync::mpsc::{Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, trace, warn};

use crate::network::SharedState;
use crate::time::VirtualTime;

/// The Mattern token.
#[derive(Clone, Debug)]
pub(crate) struct GvtToken {
    /// Minimum local virtual time over the visited LPs.
    pub(crate) t_min: VirtualTime,
    /// Minimum send time of red messages.
    pub(crate) t_red: VirtualTime,
    /// Per-LP white messages still in flight (sent minus received).
    pub(crate) count: Vec<i64>,
    /// Round number; the first round is 1.
    pub(crate) round: u64,
}

impl GvtToken {
    fn fresh(lps: usize, round: u64) -> Self {
        Self {
            t_min: VirtualTime::INFINITY,
            t_red: VirtualTime::INFINITY,
            count: vec![0; lps],
            round,
        }
    }

    fn settled(&self) -> bool {
        self.count.iter().all(|&c| c == 0)
    }
}

/// Control messages delivered over the per-LP control channels.
#[derive(Debug)]
pub(crate) enum Control {
    /// The circulating GVT token.
    Token(GvtToken),
    /// A freshly published GVT estimate; prompts fossil collection.
    Gvt(VirtualTime),
    /// Cooperative stop request.
    Stop,
}

/// The parity color of an epoch, stamped into messages at send time.
pub(crate) fn epoch_parity(epoch: u64) -> bool {
    epoch % 2 == 0
}

/// Single coordinator driving GVT rounds and global termination for the
/// optimistic mode.
pub(crate) struct GvtCoordinator {
    ctrl: Vec<Sender<Control>>,
    token_rx: Receiver<GvtToken>,
    shared: Arc<SharedState>,
    interval: Duration,
    end_time: VirtualTime,
}

impl GvtCoordinator {
    pub(crate) fn new(
        ctrl: Vec<Sender<Control>>,
        token_rx: Receiver<GvtToken>,
        shared: Arc<SharedState>,
        interval: Duration,
        end_time: VirtualTime,
    ) -> Self {
        Self {
            ctrl,
            token_rx,
            shared,
            interval,
            end_time,
        }
    }

    /// Runs rounds until the simulation stops, then broadcasts the stop.
    pub(crate) fn run(self) {
        let mut round = 0u64;
        let mut gvt = VirtualTime::ZERO;

        while self.shared.is_live() {
            spin_sleep::sleep(self.interval);

            // Quiescence: every LP idle and no message in flight.
            if self.shared.all_done() && self.shared.in_flight_settled() {
                debug!("all LPs quiescent");
                break;
            }

            round += 1;
            match self.circulate(GvtToken::fresh(self.ctrl.len(), round)) {
                Some(token) => {
                    let estimate = std::cmp::min(token.t_min, token.t_red);
                    // A later round can only raise the bound.
                    gvt = std::cmp::max(gvt, estimate);
                    trace!(round, gvt = %gvt, "publishing GVT");
                    self.shared.publish_gvt(gvt);
                    self.broadcast(|| Control::Gvt(gvt));
                    if gvt > self.end_time {
                        debug!(gvt = %gvt, "GVT passed the termination time");
                        break;
                    }
                }
                None => break,
            }
        }

        self.shared.shutdown();
        self.broadcast(|| Control::Stop);
    }

    /// Circulates one token until its counters settle. Returns `None` when
    /// the run ended underneath us.
    fn circulate(&self, mut token: GvtToken) -> Option<GvtToken> {
        loop {
            if self.ctrl[0].send(Control::Token(token)).is_err() {
                return None;
            }
            token = loop {
                match self.token_rx.recv_timeout(Duration::from_millis(100)) {
                    Ok(token) => break token,
                    Err(RecvTimeoutError::Timeout) => {
                        if !self.shared.is_live() {
                            return None;
                        }
                    }
                    Err(RecvTimeoutError::Disconnected) => {
                        warn!("token ring broken");
                        return None;
                    }
                }
            };
            if token.settled() {
                return Some(token);
            }
            trace!(round = token.round, "white messages in flight, circulating again");
        }
    }

    fn broadcast(&self, ctrl: impl Fn() -> Control) {
        for tx in &self.ctrl {
            let _ = tx.send(ctrl());
        }
    }
}

impl std::fmt::Debug for GvtCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GvtCoordinator")
            .field("lps", &self.ctrl.len())
            .finish_non_exhaustive()
    }
}

/// Per-LP side of the GVT protocol: cut epoch, color counters and the red
/// send-time minimum.
#[derive(Debug)]
pub(crate) struct GvtParticipant {
    lp: u8,
    epoch: u64,
    /// Sends per destination LP, split by the sender's epoch parity.
    sent: [Vec<u64>; 2],
    /// Receptions, split by the color stamped in the message.
    received: [u64; 2],
    /// Minimum send time since this LP's last cut.
    min_red_sent: VirtualTime,
}

impl GvtParticipant {
    pub(crate) fn new(lp: u8, lps: usize) -> Self {
        Self {
            lp,
            epoch: 0,
            sent: [vec![0; lps], vec![0; lps]],
            received: [0, 0],
            min_red_sent: VirtualTime::INFINITY,
        }
    }

    /// The color to stamp into outgoing messages right now.
    pub(crate) fn color(&self) -> bool {
        epoch_parity(self.epoch)
    }

    /// Records an outgoing message.
    pub(crate) fn note_send(&mut self, dst: u8, send_time: VirtualTime) {
        self.sent[usize::from(self.color())][dst as usize] += 1;
        self.min_red_sent = std::cmp::min(self.min_red_sent, send_time);
    }

    /// Records an incoming message of the given color.
    pub(crate) fn note_receive(&mut self, white: bool) {
        self.received[usize::from(white)] += 1;
    }

    /// Folds this LP's report into a visiting token.
    ///
    /// `local_min` is the earliest local event time (scheduler top or queued
    /// mail, whichever is lower).
    pub(crate) fn visit(&mut self, token: &mut GvtToken, local_min: VirtualTime) {
        if self.epoch < token.round {
            // First sighting this round: take the cut.
            self.epoch = token.round;
            self.min_red_sent = VirtualTime::INFINITY;
        }
        token.t_min = std::cmp::min(token.t_min, local_min);
        token.t_red = std::cmp::min(token.t_red, self.min_red_sent);

        // White messages for cut `round` are those stamped with the parity
        // of the previous epoch.
        let white = usize::from(epoch_parity(token.round - 1));
        for (dst, sent) in self.sent[white].iter_mut().enumerate() {
            token.count[dst] += *sent as i64;
            *sent = 0;
        }
        token.count[self.lp as usize] -= self.received[white] as i64;
        self.received[white] = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lone_lp_settles_in_one_circulation() {
        let mut p = GvtParticipant::new(0, 1);
        let mut token = GvtToken::fresh(1, 1);
        p.visit(&mut token, VirtualTime::at(12.0));
        assert!(token.settled());
        assert_eq!(token.t_min, VirtualTime::at(12.0));
        assert!(token.t_red.is_infinite());
    }

    #[test]
    fn in_flight_white_message_blocks_settlement() {
        let mut sender = GvtParticipant::new(0, 2);
        let mut receiver = GvtParticipant::new(1, 2);

        // A white message leaves LP0 before the cut and is still in flight.
        let stamped = sender.color();
        sender.note_send(1, VirtualTime::at(5.0));

        let mut token = GvtToken::fresh(2, 1);
        sender.visit(&mut token, VirtualTime::at(20.0));
        receiver.visit(&mut token, VirtualTime::at(30.0));
        assert!(!token.settled());
        assert_eq!(token.count[1], 1);

        // The message arrives; the next circulation settles.
        receiver.note_receive(stamped);
        let mut token2 = GvtToken {
            count: token.count.clone(),
            ..GvtToken::fresh(2, 1)
        };
        sender.visit(&mut token2, VirtualTime::at(20.0));
        receiver.visit(&mut token2, VirtualTime::at(5.0));
        assert!(token2.settled());
        assert_eq!(std::cmp::min(token2.t_min, token2.t_red), VirtualTime::at(5.0));
    }

    #[test]
    fn red_sends_bound_the_estimate() {
        let mut p = GvtParticipant::new(0, 2);
        let mut token = GvtToken::fresh(2, 1);
        p.visit(&mut token, VirtualTime::at(50.0));
        // After the cut this LP sends at t=8: red for the current round.
        p.note_send(1, VirtualTime::at(8.0));

        let mut token2 = GvtToken {
            count: token.count.clone(),
            ..GvtToken::fresh(2, 1)
        };
        p.visit(&mut token2, VirtualTime::at(50.0));
        assert_eq!(token2.t_red, VirtualTime::at(8.0));
    }
}
