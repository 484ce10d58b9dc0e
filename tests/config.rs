//! Configuration validation.

mod common;

use std::sync::{Arc, Mutex};

use parasim::simulation::{ConfigError, Mode, SimConfig, SimInit, SimulationError};
use parasim::time::VirtualTime;

use common::{new_log, CountingSink, Pulser};

fn config_error(result: Result<parasim::Simulation, SimulationError>) -> ConfigError {
    match result {
        Err(SimulationError::Config(error)) => error,
        other => panic!("expected a configuration error, got {other:?}"),
    }
}

#[test]
fn mode_strings_parse() {
    assert_eq!("sequential".parse::<Mode>().unwrap(), Mode::Sequential);
    assert_eq!("conservative".parse::<Mode>().unwrap(), Mode::Conservative);
    assert_eq!("optimistic".parse::<Mode>().unwrap(), Mode::Optimistic);
    assert!(matches!(
        "eager".parse::<Mode>(),
        Err(ConfigError::InvalidMode(_))
    ));
}

#[test]
fn zero_cores_are_rejected() {
    let config = SimConfig::new(Mode::Conservative).with_core_count(0);
    let result = SimInit::new(config)
        .add_model(Pulser::new("p", 1.0, new_log()))
        .init();
    assert_eq!(config_error(result), ConfigError::ZeroCores);
}

#[test]
fn negative_end_time_is_rejected() {
    let config = SimConfig::sequential().with_end_time(VirtualTime::at(-5.0));
    let result = SimInit::new(config)
        .add_model(Pulser::new("p", 1.0, new_log()))
        .init();
    assert_eq!(config_error(result), ConfigError::NegativeEndTime);
}

#[test]
fn empty_bench_is_rejected() {
    let result = SimInit::new(SimConfig::sequential()).init();
    assert_eq!(config_error(result), ConfigError::EmptyBench);
}

#[test]
fn duplicate_names_are_rejected() {
    let result = SimInit::new(SimConfig::sequential())
        .add_model(Pulser::new("p", 1.0, new_log()))
        .add_model(Pulser::new("p", 2.0, new_log()))
        .init();
    assert_eq!(
        config_error(result),
        ConfigError::DuplicateModel("p".to_string())
    );
}

#[test]
fn unknown_connection_endpoint_is_rejected() {
    let result = SimInit::new(SimConfig::sequential())
        .add_model(Pulser::new("p", 1.0, new_log()))
        .connect("p", 0, "ghost", 0)
        .init();
    assert_eq!(
        config_error(result),
        ConfigError::UnknownModel("ghost".to_string())
    );
}

#[test]
fn zero_lookahead_is_rejected_in_parallel_modes() {
    // `CountingSink` does not override `lookahead`, so it advertises the
    // minimal positive epsilon and passes; a pulser with an explicit zero
    // must be refused.
    #[derive(Clone)]
    struct NoLookahead;
    impl parasim::model::AtomicModel for NoLookahead {
        fn name(&self) -> &str {
            "zero"
        }
        fn as_any(&self) -> &dyn std::any::Any {
            self
        }
        fn time_advance(&self) -> VirtualTime {
            VirtualTime::at(1.0)
        }
        fn internal_transition(&mut self) {}
        fn external_transition(&mut self, _: VirtualTime, _: &parasim::messaging::MessageBag) {}
        fn confluent_transition(&mut self, _: &parasim::messaging::MessageBag) {}
        fn output(&mut self, _: &mut parasim::messaging::OutputBag) {}
        fn lookahead(&self) -> VirtualTime {
            VirtualTime::ZERO
        }
    }

    let config = SimConfig::new(Mode::Conservative).with_core_count(2);
    let result = SimInit::new(config)
        .add_model(Box::new(NoLookahead))
        .add_model(CountingSink::new("sink", Arc::new(Mutex::new(0))))
        .init();
    assert_eq!(
        config_error(result),
        ConfigError::ZeroLookahead("zero".to_string())
    );

    // The same bench is fine sequentially.
    let result = SimInit::new(SimConfig::sequential())
        .add_model(Box::new(NoLookahead))
        .add_model(CountingSink::new("sink", Arc::new(Mutex::new(0))))
        .init();
    assert!(result.is_ok());
}

#[test]
fn misallocated_model_is_rejected() {
    let config = SimConfig::new(Mode::Conservative).with_core_count(2);
    let result = SimInit::new(config)
        .add_model(Pulser::new("p", 1.0, new_log()))
        .add_model(CountingSink::new("sink", Arc::new(Mutex::new(0))))
        .set_allocator(|_| 7)
        .init();
    assert!(matches!(
        config_error(result),
        ConfigError::InvalidAllocation { lp: 7, .. }
    ));
}

#[test]
fn stepping_a_parallel_simulation_is_refused() {
    let config = SimConfig::new(Mode::Conservative).with_core_count(2);
    let mut simu = SimInit::new(config)
        .add_model(Pulser::new("p", 1.0, new_log()))
        .add_model(CountingSink::new("sink", Arc::new(Mutex::new(0))))
        .init()
        .unwrap();
    assert!(matches!(
        simu.step(),
        Err(SimulationError::UnsupportedInMode { .. })
    ));
}
