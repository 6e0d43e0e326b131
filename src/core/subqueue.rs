use std::fmt;
use std::time::Duration;

use crate::core::cancel::CancelToken;
use crate::core::{Error, Result};

/// Contract every tier must satisfy: a bounded blocking FIFO with
/// cancellable timed operations and idempotent disposal.
///
/// Timeout convention: `None` waits indefinitely, `Some(Duration::ZERO)`
/// tries once, anything else bounds the wait. `len` returns `None` when the
/// tier cannot count itself; `capacity` returns `None` when unbounded.
pub trait BlockingQueue<T>: Send + Sync {
    /// Admit `item`, waiting for capacity up to `timeout`. Timing out is not
    /// a fault: the item comes back in `AddError::Full`.
    fn try_add(
        &self,
        item: T,
        timeout: Option<Duration>,
        token: &CancelToken,
    ) -> std::result::Result<(), AddError<T>>;

    /// Take the oldest item, waiting up to `timeout`.
    fn try_take(&self, timeout: Option<Duration>, token: &CancelToken)
        -> std::result::Result<T, TakeError>;

    /// Admit `item` regardless of capacity. Never blocks on capacity.
    fn add_forced(&self, item: T) -> Result<()>;

    fn len(&self) -> Option<u64>;

    fn capacity(&self) -> Option<u64>;

    fn is_empty(&self) -> bool;

    /// Wake all blocked callers with `Disposed` and reject further
    /// operations. Idempotent.
    fn dispose(&self);
}

/// Failed admission, carrying the item back to the caller.
pub enum AddError<T> {
    /// No capacity became available within the timeout.
    Full(T),
    /// The wait was interrupted or the tier failed.
    Rejected(T, Error),
}

impl<T> AddError<T> {
    pub fn into_item(self) -> T {
        match self {
            AddError::Full(item) => item,
            AddError::Rejected(item, _) => item,
        }
    }

    pub fn is_full(&self) -> bool {
        matches!(self, AddError::Full(_))
    }

    pub fn error(&self) -> Option<&Error> {
        match self {
            AddError::Full(_) => None,
            AddError::Rejected(_, err) => Some(err),
        }
    }
}

// Manual impls keep `T: Debug` off the bounds, same trick the channel
// crates use for their send errors.
impl<T> fmt::Debug for AddError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AddError::Full(_) => write!(f, "Full(..)"),
            AddError::Rejected(_, err) => write!(f, "Rejected(.., {err:?})"),
        }
    }
}

impl<T> fmt::Display for AddError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AddError::Full(_) => write!(f, "queue full"),
            AddError::Rejected(_, err) => write!(f, "add rejected: {err}"),
        }
    }
}

impl<T> std::error::Error for AddError<T> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            AddError::Full(_) => None,
            AddError::Rejected(_, err) => Some(err),
        }
    }
}

/// Failed take.
#[derive(Debug)]
pub enum TakeError {
    /// Nothing arrived within the timeout.
    Empty,
    /// The wait was interrupted or the tier failed.
    Fault(Error),
}

impl TakeError {
    pub fn is_empty(&self) -> bool {
        matches!(self, TakeError::Empty)
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, TakeError::Fault(Error::Cancelled))
    }

    pub fn is_disposed(&self) -> bool {
        matches!(self, TakeError::Fault(Error::Disposed))
    }
}

impl fmt::Display for TakeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TakeError::Empty => write!(f, "queue empty"),
            TakeError::Fault(err) => write!(f, "take failed: {err}"),
        }
    }
}

impl std::error::Error for TakeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            TakeError::Empty => None,
            TakeError::Fault(err) => Some(err),
        }
    }
}

impl From<Error> for TakeError {
    fn from(value: Error) -> Self {
        TakeError::Fault(value)
    }
}
