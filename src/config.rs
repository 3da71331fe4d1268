use std::time::Duration;

use super::circuit_breaker::CircuitBreaker;
use super::state_machine::{Instrument, StateMachine};

const DEFAULT_FAILURE_THRESHOLD: u32 = 3;
const DEFAULT_RESET_TIMEOUT: Duration = Duration::from_secs(5);

/// A `CircuitBreaker`'s configuration.
#[derive(Debug)]
pub struct Config<INSTRUMENT> {
    pub(crate) failure_threshold: u32,
    pub(crate) reset_timeout: Duration,
    pub(crate) instrument: INSTRUMENT,
}

impl Config<()> {
    /// Creates a new circuit breaker's default configuration: open after 3 consecutive failures
    /// and probe again after 5 seconds.
    pub fn new() -> Config<()> {
        Config {
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            reset_timeout: DEFAULT_RESET_TIMEOUT,
            instrument: (),
        }
    }
}

impl Default for Config<()> {
    fn default() -> Self {
        Config::new()
    }
}

impl<INSTRUMENT> Config<INSTRUMENT> {
    /// Configures the number of consecutive failures that opens the circuit.
    pub fn failure_threshold(mut self, failure_threshold: u32) -> Self {
        self.failure_threshold = failure_threshold;
        self
    }

    /// Configures how long the circuit stays open before a probe call is let through.
    pub fn reset_timeout(mut self, reset_timeout: Duration) -> Self {
        self.reset_timeout = reset_timeout;
        self
    }

    /// Configures `Instrument` for a circuit breaker.
    pub fn instrument<T>(self, instrument: T) -> Config<T>
    where
        T: Instrument,
    {
        Config {
            failure_threshold: self.failure_threshold,
            reset_timeout: self.reset_timeout,
            instrument,
        }
    }

    /// Builds a new circuit breaker instance.
    ///
    /// # Panics
    ///
    /// * When the failure threshold is zero.
    pub fn build(self) -> CircuitBreaker<INSTRUMENT>
    where
        INSTRUMENT: Instrument,
    {
        let state_machine =
            StateMachine::new(self.failure_threshold, self.reset_timeout, self.instrument);
        CircuitBreaker::from_state_machine(state_machine)
    }
}
