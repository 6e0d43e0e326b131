use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use crate::core::cancel::CancelToken;
use crate::core::monitor::DEFAULT_POLL_PERIOD;
use crate::core::subqueue::{AddError, BlockingQueue, TakeError};
use crate::core::{Error, Result};

/// Bounded in-memory FIFO tier.
///
/// A capacity of 0 is legal: regular adds always report full and everything
/// is routed around the tier, while forced adds still land.
pub struct MemoryQueue<T> {
    state: Mutex<MemoryState<T>>,
    not_empty: Condvar,
    not_full: Condvar,
    capacity: Option<usize>,
    poll_period: Duration,
}

struct MemoryState<T> {
    items: VecDeque<T>,
    disposed: bool,
}

impl<T> MemoryQueue<T> {
    pub fn bounded(capacity: usize) -> Self {
        Self::with_poll_period(Some(capacity), DEFAULT_POLL_PERIOD)
    }

    pub fn unbounded() -> Self {
        Self::with_poll_period(None, DEFAULT_POLL_PERIOD)
    }

    pub fn with_poll_period(capacity: Option<usize>, poll_period: Duration) -> Self {
        Self {
            state: Mutex::new(MemoryState {
                items: VecDeque::new(),
                disposed: false,
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
            capacity,
            poll_period,
        }
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn has_room(&self, state: &MemoryState<T>) -> bool {
        match self.capacity {
            Some(capacity) => state.items.len() < capacity,
            None => true,
        }
    }
}

impl<T: Send> BlockingQueue<T> for MemoryQueue<T> {
    fn try_add(
        &self,
        item: T,
        timeout: Option<Duration>,
        token: &CancelToken,
    ) -> std::result::Result<(), AddError<T>> {
        let deadline = timeout.map(|timeout| Instant::now() + timeout);
        let mut state = self.lock();
        loop {
            if state.disposed {
                return Err(AddError::Rejected(item, Error::Disposed));
            }
            if token.is_cancelled() {
                return Err(AddError::Rejected(item, Error::Cancelled));
            }
            if self.has_room(&state) {
                state.items.push_back(item);
                self.not_empty.notify_one();
                return Ok(());
            }

            let mut slice = self.poll_period;
            if let Some(deadline) = deadline {
                let remaining = deadline.saturating_duration_since(Instant::now());
                if remaining.is_zero() {
                    return Err(AddError::Full(item));
                }
                slice = slice.min(remaining);
            }
            let (next, _) = self
                .not_full
                .wait_timeout(state, slice)
                .unwrap_or_else(PoisonError::into_inner);
            state = next;
        }
    }

    fn try_take(
        &self,
        timeout: Option<Duration>,
        token: &CancelToken,
    ) -> std::result::Result<T, TakeError> {
        let deadline = timeout.map(|timeout| Instant::now() + timeout);
        let mut state = self.lock();
        loop {
            if state.disposed {
                return Err(TakeError::Fault(Error::Disposed));
            }
            if token.is_cancelled() {
                return Err(TakeError::Fault(Error::Cancelled));
            }
            if let Some(item) = state.items.pop_front() {
                self.not_full.notify_one();
                return Ok(item);
            }

            let mut slice = self.poll_period;
            if let Some(deadline) = deadline {
                let remaining = deadline.saturating_duration_since(Instant::now());
                if remaining.is_zero() {
                    return Err(TakeError::Empty);
                }
                slice = slice.min(remaining);
            }
            let (next, _) = self
                .not_empty
                .wait_timeout(state, slice)
                .unwrap_or_else(PoisonError::into_inner);
            state = next;
        }
    }

    fn add_forced(&self, item: T) -> Result<()> {
        let mut state = self.lock();
        if state.disposed {
            return Err(Error::Disposed);
        }
        state.items.push_back(item);
        self.not_empty.notify_one();
        Ok(())
    }

    fn len(&self) -> Option<u64> {
        Some(self.lock().items.len() as u64)
    }

    fn capacity(&self) -> Option<u64> {
        self.capacity.map(|capacity| capacity as u64)
    }

    fn is_empty(&self) -> bool {
        self.lock().items.is_empty()
    }

    fn dispose(&self) {
        let mut state = self.lock();
        state.disposed = true;
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }
}
