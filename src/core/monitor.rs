use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Condvar, Mutex, PoisonError};
use std::time::{Duration, Instant};

use crate::core::cancel::CancelToken;
use crate::core::{Error, Result};

pub const DEFAULT_POLL_PERIOD: Duration = Duration::from_secs(2);

/// Condition-variable-like wakeup channel with a bounded poll period.
///
/// The queue tiers can be mutated out-of-band by other holders of their
/// references, so a plain wait/notify pair would miss wakeups it never sees.
/// Waiters therefore sleep at most `poll_period` per slice and re-probe the
/// shared state between slices; `pulse` only shortens the sleep.
///
/// `waiter_count` is exposed so producers and consumers can skip the wakeup
/// entirely when nobody is parked.
pub struct PollingMonitor {
    lock: Mutex<()>,
    cond: Condvar,
    waiters: AtomicUsize,
    disposed: AtomicBool,
    poll_period: Duration,
}

impl PollingMonitor {
    pub fn new(poll_period: Duration) -> Self {
        Self {
            lock: Mutex::new(()),
            cond: Condvar::new(),
            waiters: AtomicUsize::new(0),
            disposed: AtomicBool::new(false),
            poll_period,
        }
    }

    /// Register as a waiter. The returned handle keeps the waiter counted
    /// until it is dropped.
    pub fn enter(&self, timeout: Option<Duration>, token: &CancelToken) -> Result<MonitorWaiter<'_>> {
        if self.disposed.load(Ordering::Acquire) {
            return Err(Error::Disposed);
        }
        if token.is_cancelled() {
            return Err(Error::Cancelled);
        }
        self.waiters.fetch_add(1, Ordering::AcqRel);
        Ok(MonitorWaiter {
            monitor: self,
            deadline: timeout.map(|timeout| Instant::now() + timeout),
            token: token.clone(),
        })
    }

    pub fn waiter_count(&self) -> usize {
        self.waiters.load(Ordering::Acquire)
    }

    /// Wake one waiter. Cheap when nobody waits.
    pub fn pulse(&self) {
        if self.waiters.load(Ordering::Acquire) == 0 {
            return;
        }
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        self.cond.notify_one();
    }

    /// Wake everyone and fail all subsequent waits with `Disposed`.
    pub fn dispose(&self) {
        self.disposed.store(true, Ordering::Release);
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        self.cond.notify_all();
    }
}

pub struct MonitorWaiter<'a> {
    monitor: &'a PollingMonitor,
    deadline: Option<Instant>,
    token: CancelToken,
}

impl MonitorWaiter<'_> {
    /// Block until pulsed, cancelled, past the overall deadline, or one poll
    /// period elapses, whichever comes first. Returning `Ok` does not mean
    /// anything changed; the caller re-probes.
    pub fn wait(&self) -> Result<()> {
        if self.monitor.disposed.load(Ordering::Acquire) {
            return Err(Error::Disposed);
        }
        if self.token.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let mut slice = self.monitor.poll_period;
        if let Some(deadline) = self.deadline {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(());
            }
            slice = slice.min(remaining);
        }

        let guard = self.monitor.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let (guard, _) = self
            .monitor
            .cond
            .wait_timeout(guard, slice)
            .unwrap_or_else(PoisonError::into_inner);
        drop(guard);

        if self.monitor.disposed.load(Ordering::Acquire) {
            return Err(Error::Disposed);
        }
        if self.token.is_cancelled() {
            return Err(Error::Cancelled);
        }
        Ok(())
    }

    pub fn is_timed_out(&self) -> bool {
        match self.deadline {
            Some(deadline) => Instant::now() >= deadline,
            None => false,
        }
    }
}

impl Drop for MonitorWaiter<'_> {
    fn drop(&mut self) {
        self.monitor.waiters.fetch_sub(1, Ordering::AcqRel);
    }
}
