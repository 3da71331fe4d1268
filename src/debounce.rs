//! Coalesces bursts of calls into a single deferred execution.
//!
//! A [`Debouncer`] wraps a remote call. Every [`Debouncer::call`] pushes a shared deadline to
//! "now + quiet period" and returns at once. The first call of a burst spawns a waiter task that
//! polls the deadline and runs the wrapped call once the deadline has passed, so a burst of calls
//! spaced closer than the quiet period results in exactly one execution, after the last call.
//!
//! `call` returns the outcome of the most recently *completed* execution. Calls made during a
//! burst therefore see the previous cycle's outcome (an empty payload before the first
//! execution). Use [`Debouncer::call_and_wait`] when the fresh outcome is needed.
//!
//! ```
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! use std::time::Duration;
//! use callguard::{debounce, Context, Error};
//!
//! async fn api_call(_ctx: Context) -> Result<String, Error<&'static str>> {
//!     Ok("success".to_string())
//! }
//!
//! let debounced = debounce(api_call, Duration::from_millis(50));
//! for _ in 0..5 {
//!     let _ = debounced.call(Context::background());
//! }
//!
//! let outcome = debounced.call_and_wait(Context::background()).await;
//! assert_eq!(Ok("success".to_string()), outcome);
//! # }
//! ```

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::time::{self, Instant, MissedTickBehavior};

use super::context::{Context, ContextError};

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);
// Stands in for a deadline past `Instant`'s range.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// Wraps `call` so that bursts of calls closer than `quiet_period` run it once.
pub fn debounce<F, FUT, E>(call: F, quiet_period: Duration) -> Debouncer<F, E>
where
    F: Fn(Context) -> FUT + Send + Sync + 'static,
    FUT: Future<Output = Result<String, E>> + Send + 'static,
    E: From<ContextError> + Clone + Send + 'static,
{
    Debouncer::builder(quiet_period).build(call)
}

/// A debouncer's configuration.
#[derive(Debug, Clone)]
pub struct Builder {
    quiet_period: Duration,
    poll_interval: Duration,
}

impl Builder {
    /// Configures how often the waiter checks whether the quiet period is over.
    ///
    /// # Panics
    ///
    /// * When `poll_interval` is zero.
    pub fn poll_interval(mut self, poll_interval: Duration) -> Self {
        assert!(poll_interval > Duration::ZERO, "poll interval must be positive");
        self.poll_interval = poll_interval;
        self
    }

    /// Builds a debouncer around `call`.
    pub fn build<F, FUT, E>(self, call: F) -> Debouncer<F, E>
    where
        F: Fn(Context) -> FUT + Send + Sync + 'static,
        FUT: Future<Output = Result<String, E>> + Send + 'static,
        E: From<ContextError> + Clone + Send + 'static,
    {
        let (completions, _) = watch::channel(0);
        Debouncer {
            shared: Arc::new(Shared {
                call,
                quiet_period: self.quiet_period,
                poll_interval: self.poll_interval,
                cycle: Mutex::new(Cycle {
                    deadline: Instant::now(),
                    rerun_ctx: None,
                    outcome: Ok(String::new()),
                    waiter_active: false,
                    started: 0,
                    completed: 0,
                }),
                completions,
            }),
        }
    }
}

/// A debounced remote call.
///
/// Cloning is cheap, clones share the deadline, the outcome and the waiter.
pub struct Debouncer<F, E> {
    shared: Arc<Shared<F, E>>,
}

struct Shared<F, E> {
    call: F,
    quiet_period: Duration,
    poll_interval: Duration,
    cycle: Mutex<Cycle<E>>,
    // Carries the number of completed executions.
    completions: watch::Sender<u64>,
}

struct Cycle<E> {
    deadline: Instant,
    // Context of the latest trigger since the running execution started.
    rerun_ctx: Option<Context>,
    outcome: Result<String, E>,
    waiter_active: bool,
    started: u64,
    completed: u64,
}

impl<E> Cycle<E> {
    fn complete(&mut self, outcome: Result<String, E>, completions: &watch::Sender<u64>) {
        self.outcome = outcome;
        self.completed = self.started;
        completions.send_replace(self.completed);
    }
}

impl Debouncer<(), ()> {
    /// Returns a debouncer's builder.
    pub fn builder(quiet_period: Duration) -> Builder {
        Builder {
            quiet_period,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

impl<F, FUT, E> Debouncer<F, E>
where
    F: Fn(Context) -> FUT + Send + Sync + 'static,
    FUT: Future<Output = Result<String, E>> + Send + 'static,
    E: From<ContextError> + Clone + Send + 'static,
{
    /// Triggers the wrapped call and returns the outcome of the last completed execution.
    ///
    /// The first call of a burst spawns the waiter, which later runs the wrapped call with this
    /// call's `ctx`. Cancelling that context before the quiet period ends stops the waiter and
    /// records [`ContextError`] as the outcome. Later calls of the same burst only move the
    /// deadline, their contexts are not used. A call made while the wrapped call is running
    /// schedules another execution, which runs with that call's `ctx`.
    ///
    /// # Panics
    ///
    /// * When called outside of a tokio runtime.
    pub fn call(&self, ctx: Context) -> Result<String, E> {
        self.trigger(ctx).0
    }

    /// Triggers the wrapped call and waits for an execution that started after this trigger.
    ///
    /// Resolves with that execution's outcome, or with the cancellation error if the waiter's
    /// context was cancelled first.
    pub async fn call_and_wait(&self, ctx: Context) -> Result<String, E> {
        let mut completions = self.shared.completions.subscribe();
        let (_, target) = self.trigger(ctx);

        let waited = completions
            .wait_for(|completed| *completed >= target)
            .await
            .map(|_| ());
        if let Err(err) = waited {
            tracing::warn!(error = %err, "debounce completions closed while waiting");
        }
        self.last_outcome()
    }

    /// Returns the outcome of the last completed execution.
    pub fn last_outcome(&self) -> Result<String, E> {
        self.shared.cycle.lock().outcome.clone()
    }

    /// Returns `true` while a waiter is active for the current burst.
    pub fn is_pending(&self) -> bool {
        self.shared.cycle.lock().waiter_active
    }

    fn trigger(&self, ctx: Context) -> (Result<String, E>, u64) {
        let mut cycle = self.shared.cycle.lock();
        cycle.deadline = deadline_after(self.shared.quiet_period);

        if cycle.waiter_active {
            cycle.rerun_ctx = Some(ctx);
        } else {
            tokio::spawn(wait_quiet_period(self.shared.clone(), ctx));
            cycle.waiter_active = true;
            tracing::debug!(
                quiet_period_ms = self.shared.quiet_period.as_millis() as u64,
                "debounce burst started"
            );
        }

        (cycle.outcome.clone(), cycle.started + 1)
    }
}

impl<F, E> Clone for Debouncer<F, E> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<F, E> fmt::Debug for Debouncer<F, E> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Debouncer")
            .field("quiet_period", &self.shared.quiet_period)
            .field("poll_interval", &self.shared.poll_interval)
            .finish()
    }
}

fn deadline_after(quiet_period: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(quiet_period).unwrap_or_else(|| now + FAR_FUTURE)
}

enum Wake {
    Tick,
    Done(ContextError),
}

/// Releases the waiter flag if the waiter unwinds or is dropped before finishing a cycle.
struct WaiterGuard<'a, F, E> {
    shared: &'a Shared<F, E>,
    armed: bool,
}

impl<'a, F, E> Drop for WaiterGuard<'a, F, E> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        tracing::error!("debounce waiter exited abnormally, outcome left unchanged");
        let mut cycle = self.shared.cycle.lock();
        cycle.waiter_active = false;
        cycle.completed = cycle.started;
        self.shared.completions.send_replace(cycle.completed);
    }
}

async fn wait_quiet_period<F, FUT, E>(shared: Arc<Shared<F, E>>, mut ctx: Context)
where
    F: Fn(Context) -> FUT,
    FUT: Future<Output = Result<String, E>>,
    E: From<ContextError>,
{
    let mut guard = WaiterGuard {
        shared: &shared,
        armed: true,
    };
    let mut ticker = time::interval(shared.poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        let wake = tokio::select! {
            _ = ticker.tick() => Wake::Tick,
            err = ctx.done() => Wake::Done(err),
        };

        let fired_deadline = match wake {
            Wake::Done(err) => {
                tracing::debug!(error = %err, "debounce waiter cancelled");
                let mut cycle = shared.cycle.lock();
                cycle.started += 1;
                cycle.complete(Err(E::from(err)), &shared.completions);
                cycle.rerun_ctx = None;
                cycle.waiter_active = false;
                guard.armed = false;
                return;
            }
            Wake::Tick => {
                let mut cycle = shared.cycle.lock();
                if Instant::now() < cycle.deadline {
                    continue;
                }
                cycle.started += 1;
                cycle.rerun_ctx = None;
                cycle.deadline
            }
        };

        tracing::debug!("quiet period over, running debounced call");
        let outcome = (shared.call)(ctx.clone()).await;

        let rerun = {
            let mut cycle = shared.cycle.lock();
            cycle.complete(outcome, &shared.completions);
            if cycle.deadline > fired_deadline {
                Some(cycle.rerun_ctx.take().unwrap_or_else(|| ctx.clone()))
            } else {
                cycle.waiter_active = false;
                None
            }
        };

        match rerun {
            Some(rerun_ctx) => ctx = rerun_ctx,
            None => {
                guard.armed = false;
                return;
            }
        }
        tracing::debug!("triggered while running, waiting for another quiet period");
    }
}
