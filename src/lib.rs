//! Call-shaping primitives guarding callers from unreliable or bursty dependencies.
//!
//! * [`CircuitBreaker`] counts consecutive failures of a remote call and, once a threshold is
//!   reached, fails fast until a reset timeout has passed and a probe call succeeds.
//!   See https://martinfowler.com/bliki/CircuitBreaker.html
//! * [`Debouncer`] coalesces a burst of triggers into one execution after a quiet period.
//! * [`TtlCache`] holds short-lived tokens, validated by many concurrent readers and swept in
//!   the background.
//!
//! Every guarded call receives a cancellable [`Context`] and reports failures through
//! [`Error`], which keeps a fail-fast rejection and a cancellation apart from an error of the
//! call itself.
//!
//! # Example
//!
//! Debounced triggers in front of a circuit breaker guarded call.
//!
//! ```
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! use std::time::Duration;
//! use callguard::{debounce, CircuitBreaker, Context, Error};
//!
//! async fn payment_api(_ctx: Context) -> Result<String, &'static str> {
//!     Ok("payment processed".to_string())
//! }
//!
//! let circuit_breaker = CircuitBreaker::new(3, Duration::from_secs(5));
//! let debounced = debounce(
//!     move |ctx| {
//!         let circuit_breaker = circuit_breaker.clone();
//!         async move { circuit_breaker.call(ctx, payment_api).await }
//!     },
//!     Duration::from_millis(20),
//! );
//!
//! let outcome: Result<String, Error<&str>> =
//!     debounced.call_and_wait(Context::background()).await;
//! assert_eq!(Ok("payment processed".to_string()), outcome);
//! # }
//! ```

#![deny(missing_debug_implementations)]
#![deny(missing_docs)]
#![cfg_attr(test, deny(warnings))]

mod circuit_breaker;
mod config;
mod error;
mod state_machine;

pub mod clock;
pub mod context;
pub mod debounce;
pub mod failure_predicate;
pub mod ttl_cache;

pub use self::circuit_breaker::{CircuitBreaker, ResponseFuture};
pub use self::config::Config;
pub use self::context::{CancelHandle, Context, ContextError};
pub use self::debounce::{debounce, Debouncer};
pub use self::error::Error;
pub use self::failure_predicate::FailurePredicate;
pub use self::state_machine::{Instrument, State, StateMachine};
pub use self::ttl_cache::{Sweeper, TtlCache};
