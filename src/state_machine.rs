use std::fmt::{self, Display};
use std::time::{Duration, Instant};

use super::clock;

/// States of the state machine.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum State {
    /// A closed breaker is operating normally and allowing calls.
    Closed,
    /// An open breaker has tripped and rejects calls. Keeps the instant of the last failure that
    /// (re)opened it.
    Open(Instant),
    /// A half open breaker has waited out its reset timeout and lets probe calls through.
    HalfOpen,
}

/// A circuit breaker's state machine.
///
/// It is implemented via a finite state machine with three states: `Closed`, `Open` and
/// `HalfOpen`. The state machine does not know anything about the backend's state by itself, but
/// uses the information provided by the method via `on_success` and `on_error` events. Before
/// communicating with the backend, the permission to do so must be obtained via the method
/// `is_call_permitted`.
///
/// Consecutive failures are counted while `Closed` or `HalfOpen`. Once the count reaches the
/// failure threshold the state changes to `Open` and every call is rejected.
///
/// The first permission request that arrives more than the reset timeout after the circuit opened
/// moves it to `HalfOpen` and is allowed through as a probe. No timer is involved, the check is
/// made lazily. A successful probe closes the circuit and clears the count. A failed probe opens
/// it again right away, because the count was never cleared, and restarts the timeout.
#[derive(Debug)]
pub struct StateMachine<INSTRUMENT> {
    failure_threshold: u32,
    reset_timeout: Duration,
    failure_count: u32,
    state: State,
    instrument: INSTRUMENT,
}

/// Consumes the state machine events. May used for metrics and/or logs.
pub trait Instrument {
    /// Calls when state machine reject a call.
    fn on_call_rejected(&self);

    /// Calls when the circuit breaker become to open state.
    fn on_open(&self, failure_count: u32);

    /// Calls when the circuit breaker become to half open state.
    fn on_half_open(&self);

    /// Calls when the circuit breaker become to closed state.
    fn on_closed(&self);
}

impl Instrument for () {
    #[inline]
    fn on_call_rejected(&self) {}

    #[inline]
    fn on_open(&self, _: u32) {}

    #[inline]
    fn on_half_open(&self) {}

    #[inline]
    fn on_closed(&self) {}
}

impl State {
    /// Returns a string value for the state identifier.
    #[inline]
    pub fn as_str(&self) -> &'static str {
        match self {
            State::Open(_) => "open",
            State::Closed => "closed",
            State::HalfOpen => "half_open",
        }
    }

    /// Returns `true` if the state is `Open`.
    #[inline]
    pub fn is_open(&self) -> bool {
        matches!(self, State::Open(_))
    }
}

impl Display for State {
    fn fmt(&self, f: &mut fmt::Formatter) -> Result<(), fmt::Error> {
        write!(f, "{}", self.as_str())
    }
}

impl<INSTRUMENT> StateMachine<INSTRUMENT>
where
    INSTRUMENT: Instrument,
{
    /// Creates a new closed state machine.
    ///
    /// # Panics
    ///
    /// * When `failure_threshold` is zero.
    pub fn new(failure_threshold: u32, reset_timeout: Duration, instrument: INSTRUMENT) -> Self {
        assert!(failure_threshold > 0, "failure threshold must be positive");

        StateMachine {
            failure_threshold,
            reset_timeout,
            failure_count: 0,
            state: State::Closed,
            instrument,
        }
    }

    /// Requests permission to call this circuit breaker's backend.
    pub fn is_call_permitted(&mut self) -> bool {
        match self.state {
            State::Closed | State::HalfOpen => true,
            State::Open(since) => {
                if clock::now().saturating_duration_since(since) > self.reset_timeout {
                    self.transit_to_half_open();
                    return true;
                }
                tracing::debug!(state = "open", "circuit breaker rejected a call");
                self.instrument.on_call_rejected();
                false
            }
        }
    }

    /// Records a successful call.
    ///
    /// Any success clears the failure count and closes the circuit.
    pub fn on_success(&mut self) {
        self.failure_count = 0;
        if self.state != State::Closed {
            self.reset();
        }
    }

    /// Records a failed call.
    pub fn on_error(&mut self) {
        match self.state {
            State::Closed | State::HalfOpen => {
                self.failure_count = self.failure_count.saturating_add(1);
                tracing::debug!(
                    state = self.state.as_str(),
                    failure_count = self.failure_count,
                    failure_threshold = self.failure_threshold,
                    "circuit breaker recorded a failure"
                );
                if self.failure_count >= self.failure_threshold {
                    self.transit_to_open();
                }
            }
            // A call permitted before the circuit opened failed late, restart the timeout.
            State::Open(_) => self.transit_to_open(),
        }
    }

    /// Returns the circuit breaker to its original closed state, losing statistics.
    pub fn reset(&mut self) {
        self.failure_count = 0;
        self.state = State::Closed;
        tracing::info!("circuit breaker closed");
        self.instrument.on_closed();
    }

    /// Returns the current state.
    #[inline]
    pub fn state(&self) -> State {
        self.state
    }

    /// Returns the number of failures counted towards the threshold.
    #[inline]
    pub fn failure_count(&self) -> u32 {
        self.failure_count
    }

    #[inline]
    fn transit_to_half_open(&mut self) {
        self.state = State::HalfOpen;
        tracing::info!("circuit breaker half open, letting a probe through");
        self.instrument.on_half_open();
    }

    #[inline]
    fn transit_to_open(&mut self) {
        self.state = State::Open(clock::now());
        tracing::warn!(
            failure_count = self.failure_count,
            reset_timeout_ms = self.reset_timeout.as_millis() as u64,
            "circuit breaker opened, failing fast"
        );
        self.instrument.on_open(self.failure_count);
    }
}
