use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context as TaskContext, Poll};
use std::time::Duration;

use parking_lot::Mutex;
use pin_project_lite::pin_project;

use super::config::Config;
use super::context::{Context, ContextError};
use super::error::Error;
use super::failure_predicate::{self, FailurePredicate};
use super::state_machine::{Instrument, State, StateMachine};

/// A circuit breaker guarding calls to a remote dependency.
///
/// Cloning is cheap, clones share the same state machine.
///
/// # Example
///
/// ```
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// use std::time::Duration;
/// use callguard::{CircuitBreaker, Context, Error};
///
/// async fn unstable_api(_ctx: Context) -> Result<String, &'static str> {
///     Err("external API failure")
/// }
///
/// let circuit_breaker = CircuitBreaker::new(1, Duration::from_secs(5));
///
/// let res = circuit_breaker.call(Context::background(), unstable_api).await;
/// assert_eq!(Err(Error::Inner("external API failure")), res);
///
/// // The circuit is open now, calls fail fast.
/// let res = circuit_breaker.call(Context::background(), unstable_api).await;
/// assert_eq!(Err(Error::Rejected), res);
/// # }
/// ```
#[derive(Debug)]
pub struct CircuitBreaker<INSTRUMENT = ()> {
    state_machine: Arc<Mutex<StateMachine<INSTRUMENT>>>,
}

impl CircuitBreaker<()> {
    /// Creates a circuit breaker that opens after `failure_threshold` consecutive failures and
    /// lets a probe through once `reset_timeout` has passed.
    ///
    /// # Panics
    ///
    /// * When `failure_threshold` is zero.
    pub fn new(failure_threshold: u32, reset_timeout: Duration) -> Self {
        Config::new()
            .failure_threshold(failure_threshold)
            .reset_timeout(reset_timeout)
            .build()
    }

    /// Returns a circuit breaker's builder.
    pub fn builder() -> Config<()> {
        Config::new()
    }
}

impl Default for CircuitBreaker<()> {
    fn default() -> Self {
        CircuitBreaker::builder().build()
    }
}

impl<INSTRUMENT> CircuitBreaker<INSTRUMENT>
where
    INSTRUMENT: Instrument,
{
    pub(crate) fn from_state_machine(state_machine: StateMachine<INSTRUMENT>) -> Self {
        Self {
            state_machine: Arc::new(Mutex::new(state_machine)),
        }
    }

    /// Requests permission to call.
    ///
    /// It returns `true` if a call is allowed, or `false` if prohibited. An open circuit whose
    /// reset timeout has passed moves to half open and permits the call.
    #[inline]
    pub fn is_call_permitted(&self) -> bool {
        self.state_machine.lock().is_call_permitted()
    }

    /// Returns the current state.
    pub fn state(&self) -> State {
        self.state_machine.lock().state()
    }

    /// Returns the number of consecutive failures counted so far.
    pub fn failure_count(&self) -> u32 {
        self.state_machine.lock().failure_count()
    }

    /// Forces the circuit closed and clears the failure count.
    pub fn reset(&self) {
        self.state_machine.lock().reset();
    }

    /// Executes a given call within circuit breaker.
    ///
    /// Permission is requested right away: when the circuit is open, `f` is never invoked and the
    /// returned future resolves to [`Error::Rejected`]. When `ctx` is already done, `f` is not
    /// invoked either and the future resolves to [`Error::Cancelled`] without touching the
    /// failure count. Otherwise `f` is invoked exactly once and its result is recorded as a
    /// success or a failure. An error returned once `ctx` is done is still recorded, but
    /// surfaces as [`Error::Cancelled`].
    ///
    /// The call is never retried.
    #[inline]
    pub fn call<F, FUT, R, E>(
        &self,
        ctx: Context,
        f: F,
    ) -> ResponseFuture<FUT, failure_predicate::Any, INSTRUMENT>
    where
        F: FnOnce(Context) -> FUT,
        FUT: Future<Output = Result<R, E>>,
    {
        self.call_with(failure_predicate::Any, ctx, f)
    }

    /// Executes a given call within circuit breaker.
    ///
    /// Works like [`call`](CircuitBreaker::call), but checks errors with the provided predicate.
    /// If the predicate returns `true` for the error, the call is recorded as failure otherwise
    /// considered this error as a success.
    pub fn call_with<P, F, FUT, R, E>(
        &self,
        predicate: P,
        ctx: Context,
        f: F,
    ) -> ResponseFuture<FUT, P, INSTRUMENT>
    where
        P: FailurePredicate<E>,
        F: FnOnce(Context) -> FUT,
        FUT: Future<Output = Result<R, E>>,
    {
        let (future, gate) = if let Some(err) = ctx.err() {
            (None, Gate::Cancelled(err))
        } else if self.is_call_permitted() {
            (Some(f(ctx.clone())), Gate::Permitted)
        } else {
            (None, Gate::Rejected)
        };

        ResponseFuture {
            future,
            gate,
            ctx,
            circuit_breaker: self.clone(),
            predicate,
        }
    }

    /// Invoked after success call.
    #[inline]
    fn on_success(&self) {
        self.state_machine.lock().on_success();
    }

    /// Invoked after failed call.
    #[inline]
    fn on_error(&self) {
        self.state_machine.lock().on_error();
    }
}

impl<INSTRUMENT> Clone for CircuitBreaker<INSTRUMENT> {
    fn clone(&self) -> Self {
        Self {
            state_machine: self.state_machine.clone(),
        }
    }
}

#[derive(Clone, Copy, Debug)]
enum Gate {
    Permitted,
    Rejected,
    Cancelled(ContextError),
}

pin_project! {
    /// A circuit breaker's future.
    #[allow(missing_debug_implementations)]
    #[must_use = "futures do nothing unless you `.await` or poll them"]
    pub struct ResponseFuture<FUT, PREDICATE, INSTRUMENT> {
        #[pin]
        future: Option<FUT>,
        gate: Gate,
        ctx: Context,
        circuit_breaker: CircuitBreaker<INSTRUMENT>,
        predicate: PREDICATE,
    }
}

impl<FUT, PREDICATE, INSTRUMENT, R, E> Future for ResponseFuture<FUT, PREDICATE, INSTRUMENT>
where
    FUT: Future<Output = Result<R, E>>,
    PREDICATE: FailurePredicate<E>,
    INSTRUMENT: Instrument,
{
    type Output = Result<R, Error<E>>;

    fn poll(self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<Self::Output> {
        let this = self.project();

        let future = match this.future.as_pin_mut() {
            Some(future) => future,
            None => {
                return match *this.gate {
                    Gate::Cancelled(err) => Poll::Ready(Err(Error::Cancelled(err))),
                    _ => Poll::Ready(Err(Error::Rejected)),
                }
            }
        };

        match future.poll(cx) {
            Poll::Ready(Ok(ok)) => {
                this.circuit_breaker.on_success();
                Poll::Ready(Ok(ok))
            }
            Poll::Ready(Err(err)) => {
                if this.predicate.is_err(&err) {
                    this.circuit_breaker.on_error();
                } else {
                    this.circuit_breaker.on_success();
                }
                match this.ctx.err() {
                    Some(cause) => Poll::Ready(Err(Error::Cancelled(cause))),
                    None => Poll::Ready(Err(Error::Inner(err))),
                }
            }
            Poll::Pending => Poll::Pending,
        }
    }
}
