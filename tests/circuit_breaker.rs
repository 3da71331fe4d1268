use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use callguard::{clock, CircuitBreaker, Config, Context, Error, Instrument, State};

/// Perform `Closed` -> `Open` -> `HalfOpen` -> `Open` -> `HalfOpen` -> `Closed` transitions
/// through guarded calls.
#[tokio::test]
async fn circuit_breaker() {
    let mut time = clock::freeze();
    let observe = Observer::new();
    let backend = Backend::new();
    let circuit_breaker = Config::new()
        .failure_threshold(3)
        .reset_timeout(5.seconds())
        .instrument(observe.clone())
        .build();

    // Perform success requests. the circuit breaker must be closed.
    for _i in 0..10 {
        assert_eq!(Ok("ok".to_string()), backend.call(&circuit_breaker, true).await);
        assert!(observe.is_closed());
    }

    // Perform failed requests, the circuit breaker still closed.
    for _i in 0..2 {
        assert_eq!(Err(Error::Inner(503)), backend.call(&circuit_breaker, false).await);
        assert!(observe.is_closed());
    }

    // Perform a failed request and transit to the open state for 5s.
    assert_eq!(Err(Error::Inner(503)), backend.call(&circuit_breaker, false).await);
    assert!(observe.is_open());
    assert_eq!(13, backend.calls());

    // Reject call attempts, the backend is left alone.
    for i in 0..10 {
        assert_eq!(Err(Error::Rejected), backend.call(&circuit_breaker, true).await);
        assert_eq!(i + 1, observe.rejected_calls());
    }
    assert_eq!(13, backend.calls());

    // Wait 2s, the circuit breaker still open.
    time.advance(2.seconds());
    assert_eq!(Err(Error::Rejected), backend.call(&circuit_breaker, true).await);
    assert!(observe.is_open());

    // Wait 4s (6s total), a probe goes through and fails, back to the open state.
    time.advance(4.seconds());
    assert_eq!(Err(Error::Inner(503)), backend.call(&circuit_breaker, false).await);
    assert_eq!(1, observe.half_opened());
    assert!(observe.is_open());
    assert_eq!(14, backend.calls());

    // Wait 5s, the timeout restarted with the failed probe.
    time.advance(5.seconds());
    assert_eq!(Err(Error::Rejected), backend.call(&circuit_breaker, true).await);
    assert!(observe.is_open());

    // Wait 1s (6s total), a successful probe closes the circuit.
    time.advance(1.seconds());
    assert_eq!(Ok("ok".to_string()), backend.call(&circuit_breaker, true).await);
    assert_eq!(2, observe.half_opened());
    assert!(observe.is_closed());
    assert_eq!(State::Closed, circuit_breaker.state());
    assert_eq!(0, circuit_breaker.failure_count());

    // Perform success requests.
    for _i in 0..10 {
        assert_eq!(Ok("ok".to_string()), backend.call(&circuit_breaker, true).await);
    }
    assert_eq!(25, backend.calls());
}

#[tokio::test]
async fn reset_closes_open_circuit() {
    let _time = clock::freeze();
    let backend = Backend::new();
    let circuit_breaker = CircuitBreaker::new(1, 60.seconds());

    assert_eq!(Err(Error::Inner(503)), backend.call(&circuit_breaker, false).await);
    assert!(circuit_breaker.state().is_open());

    circuit_breaker.reset();
    assert_eq!(Ok("ok".to_string()), backend.call(&circuit_breaker, true).await);
}

#[tokio::test]
async fn clones_share_state() {
    let _time = clock::freeze();
    let backend = Backend::new();
    let circuit_breaker = CircuitBreaker::new(2, 60.seconds());
    let clone = circuit_breaker.clone();

    let _ = backend.call(&circuit_breaker, false).await;
    let _ = backend.call(&clone, false).await;

    assert_eq!(Err(Error::Rejected), backend.call(&circuit_breaker, true).await);
    assert_eq!(2, backend.calls());
}

/// Stands in for a payment API answering `503` when unhealthy.
struct Backend {
    calls: AtomicUsize,
}

impl Backend {
    fn new() -> Self {
        Backend {
            calls: AtomicUsize::new(0),
        }
    }

    async fn call<I: Instrument>(
        &self,
        circuit_breaker: &CircuitBreaker<I>,
        healthy: bool,
    ) -> Result<String, Error<u16>> {
        circuit_breaker
            .call(Context::background(), |_ctx| async move {
                self.calls.fetch_add(1, Ordering::SeqCst);
                if healthy {
                    Ok("ok".to_string())
                } else {
                    Err(503)
                }
            })
            .await
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[derive(Debug)]
enum ObservedState {
    Open,
    HalfOpen,
    Closed,
}

#[derive(Clone, Debug)]
struct Observer {
    state: Arc<Mutex<ObservedState>>,
    rejected_calls: Arc<AtomicUsize>,
    half_opened: Arc<AtomicUsize>,
}

impl Observer {
    fn new() -> Self {
        Observer {
            state: Arc::new(Mutex::new(ObservedState::Closed)),
            rejected_calls: Arc::new(AtomicUsize::new(0)),
            half_opened: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn is_closed(&self) -> bool {
        matches!(*self.state.lock().unwrap(), ObservedState::Closed)
    }

    fn is_open(&self) -> bool {
        matches!(*self.state.lock().unwrap(), ObservedState::Open)
    }

    fn rejected_calls(&self) -> usize {
        self.rejected_calls.load(Ordering::SeqCst)
    }

    fn half_opened(&self) -> usize {
        self.half_opened.load(Ordering::SeqCst)
    }
}

impl Instrument for Observer {
    fn on_call_rejected(&self) {
        self.rejected_calls.fetch_add(1, Ordering::SeqCst);
    }

    fn on_open(&self, failure_count: u32) {
        println!("state=open after {} failures", failure_count);
        *self.state.lock().unwrap() = ObservedState::Open
    }

    fn on_half_open(&self) {
        println!("state=half_open");
        self.half_opened.fetch_add(1, Ordering::SeqCst);
        *self.state.lock().unwrap() = ObservedState::HalfOpen
    }

    fn on_closed(&self) {
        println!("state=closed");
        *self.state.lock().unwrap() = ObservedState::Closed
    }
}

trait IntoDuration {
    fn seconds(self) -> Duration;
}

impl IntoDuration for u64 {
    fn seconds(self) -> Duration {
        Duration::from_secs(self)
    }
}
