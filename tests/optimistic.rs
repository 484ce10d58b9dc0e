//! Optimistic-mode end-to-end scenarios.

mod common;

use std::time::Duration;

use parasim::messaging::EventBuffer;
use parasim::simulation::{Mode, SimConfig, SimInit, SimOutcome};
use parasim::time::VirtualTime;

use common::{output_multiset, Accumulator, OneShot};

/// A fast LP racing ahead of a slow one that eventually sends it a message
/// from what is, by then, the fast LP's past.
///
/// The hare ticks every time unit and broadcasts its count; the turtle
/// wakes once at t = 50 and sends a jump of 1000 back. Under optimistic
/// execution the hare has usually sped far beyond 50 when the jump arrives,
/// forcing a rollback and a replay whose re-emitted counts must match the
/// sequential reference exactly.
fn hare_and_turtle(mode: Mode) -> (Vec<(u64, u64, u64, u64, u64)>, SimOutcome) {
    let events = EventBuffer::new();
    let mut config = SimConfig::new(mode)
        .with_core_count(2)
        .with_end_time(VirtualTime::at(100.0));
    config.gvt_interval = Duration::from_millis(2);
    let mut simu = SimInit::new(config)
        .add_model(Accumulator::new("hare", 1.0, 1.0))
        .add_model(OneShot::new("turtle", 50.0, 1000))
        .connect("hare", 0, "turtle", 0)
        .connect("turtle", 0, "hare", 0)
        .set_allocator(|model| usize::from(model.name() == "turtle"))
        .add_listener(events.clone())
        .init()
        .unwrap();

    let outcome = simu.run().unwrap();
    (output_multiset(&events.drain()), outcome)
}

#[test]
fn straggler_rollback_reproduces_the_sequential_run() {
    let (optimistic, outcome) = hare_and_turtle(Mode::Optimistic);
    let (sequential, _) = hare_and_turtle(Mode::Sequential);

    // The committed output multiset must be indistinguishable from the
    // sequential reference: same sources, destinations, times and payloads,
    // with the post-rollback replay carrying the jumped counts.
    assert_eq!(optimistic, sequential);

    // The jump is visible in the payload stream: the hare's output at t=60
    // carries 59 + 1000.
    let jumped = optimistic
        .iter()
        .filter(|(_, _, time, _, payload)| {
            *time == 60.0f64.to_bits() && *payload == 1059
        })
        .count();
    assert_eq!(jumped, 1);

    assert_eq!(outcome.final_time, VirtualTime::at(100.0));
}

#[test]
fn gvt_reaches_the_horizon_on_a_clean_run() {
    let (_, outcome) = hare_and_turtle(Mode::Optimistic);

    // GVT is monotone throughout the run (asserted internally) and ends at
    // or beyond every LP's final time once the run settles.
    assert!(outcome.gvt >= outcome.final_time);
    for lp in &outcome.lps {
        assert!(lp.final_time <= outcome.final_time);
    }
}

#[test]
fn sparse_checkpointing_still_settles_without_deep_rollbacks() {
    // With no cross-LP traffic there is nothing to roll back, so even a
    // coarse save interval must run to completion.
    let mut config = SimConfig::new(Mode::Optimistic)
        .with_core_count(2)
        .with_end_time(VirtualTime::at(200.0));
    config.save_interval = VirtualTime::at(10.0);
    config.gvt_interval = Duration::from_millis(2);

    let mut simu = SimInit::new(config)
        .add_model(Accumulator::new("left", 1.0, 1.0))
        .add_model(Accumulator::new("right", 3.0, 3.0))
        .init()
        .unwrap();
    let outcome = simu.run().unwrap();

    assert_eq!(outcome.final_time, VirtualTime::at(200.0));
    for lp in &outcome.lps {
        assert_eq!(lp.rollbacks, 0);
    }
}
