use std::error::Error as StdError;
use std::fmt::{self, Display};

use super::context::ContextError;

/// An error of a guarded call.
///
/// A rejected call and a cancelled call are kept apart from a failure of the inner call, so
/// callers can pick a different fallback for each.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error<E> {
    /// An error from inner call.
    Inner(E),
    /// The call was rejected without being attempted because the circuit is open.
    Rejected,
    /// The call's context was cancelled or timed out.
    Cancelled(ContextError),
}

impl<E> Error<E> {
    /// Returns `true` for a fail-fast rejection.
    pub fn is_rejected(&self) -> bool {
        matches!(self, Error::Rejected)
    }

    /// Returns `true` for a cancellation.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled(_))
    }

    /// Returns the inner call's error, if this is one.
    pub fn into_inner(self) -> Option<E> {
        match self {
            Error::Inner(err) => Some(err),
            _ => None,
        }
    }
}

impl<E> From<ContextError> for Error<E> {
    fn from(err: ContextError) -> Self {
        Error::Cancelled(err)
    }
}

impl<E> Display for Error<E>
where
    E: Display,
{
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::Rejected => write!(f, "call was rejected: circuit is open"),
            Error::Cancelled(err) => write!(f, "call was cancelled: {}", err),
            Error::Inner(err) => write!(f, "{}", err),
        }
    }
}

impl<E> StdError for Error<E>
where
    E: StdError + 'static,
{
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            Error::Inner(ref err) => Some(err),
            Error::Cancelled(ref err) => Some(err),
            Error::Rejected => None,
        }
    }
}
