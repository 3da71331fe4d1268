//! Time source used by the circuit breaker and the TTL cache.
//!
//! By default [`now`] returns [`Instant::now`]. A test may [`freeze`] the clock for the current
//! thread and move it forward manually, which makes open-state timeouts and token expiry
//! deterministic.
//!
//! ```
//! use std::time::Duration;
//! use callguard::clock;
//!
//! let mut time = clock::freeze();
//! let start = clock::now();
//! time.advance(Duration::from_secs(5));
//! assert_eq!(Duration::from_secs(5), clock::now() - start);
//! ```

use std::cell::Cell;
use std::marker::PhantomData;
use std::time::{Duration, Instant};

thread_local!(static FROZEN: Cell<Option<Instant>> = Cell::new(None));

/// A frozen clock installed for the current thread.
///
/// The clock is removed from the thread when the guard is dropped, panics included.
#[derive(Debug)]
pub struct MockClock {
    // Bound to the thread it was installed on.
    _not_send: PhantomData<*const ()>,
}

impl MockClock {
    /// Returns the frozen time.
    pub fn now(&self) -> Instant {
        FROZEN.with(|cell| cell.get()).unwrap_or_else(Instant::now)
    }

    /// Moves the frozen time forward by `diff`.
    pub fn advance(&mut self, diff: Duration) {
        FROZEN.with(|cell| {
            if let Some(current) = cell.get() {
                cell.set(Some(current + diff));
            }
        })
    }
}

impl Drop for MockClock {
    fn drop(&mut self) {
        FROZEN.with(|cell| cell.set(None));
    }
}

/// Freezes the clock of the current thread at the current instant.
///
/// # Panics
///
/// * When the clock of the current thread is already frozen.
pub fn freeze() -> MockClock {
    FROZEN.with(|cell| {
        assert!(
            cell.get().is_none(),
            "clock already frozen for the current thread"
        );
        cell.set(Some(Instant::now()));
    });

    MockClock {
        _not_send: PhantomData,
    }
}

/// Returns the current time, honoring a frozen clock.
pub fn now() -> Instant {
    FROZEN
        .with(|cell| cell.get())
        .unwrap_or_else(Instant::now)
}
