use std::sync::{Condvar, Mutex, PoisonError};
use std::time::{Duration, Instant};

use crate::core::cancel::CancelToken;
use crate::core::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateSide {
    A,
    B,
}

impl GateSide {
    pub fn other(self) -> GateSide {
        match self {
            GateSide::A => GateSide::B,
            GateSide::B => GateSide::A,
        }
    }
}

/// Two-sided exclusive gate.
///
/// At most one side is open at a time. A side may have several concurrent
/// holders; exclusion is only across sides. A side that wants in does not
/// outrank the other: it requests the flip, the current holders' guard
/// tokens trip, and the gate flips once the last holder leaves. Holders are
/// expected to observe their token and release promptly.
pub struct TwinGate {
    state: Mutex<GateState>,
    cond: Condvar,
    poll_period: Duration,
}

struct GateState {
    open: GateSide,
    holders: usize,
    requested: Option<GateSide>,
    session: CancelToken,
    disposed: bool,
}

impl GateState {
    fn flip(&mut self, side: GateSide) {
        self.open = side;
        self.requested = None;
        self.session = CancelToken::new();
    }
}

/// Scoped occupancy of one gate side. `token` trips when the opposite side
/// requests the gate; dropping the guard releases the side.
pub struct GateGuard<'a> {
    gate: &'a TwinGate,
    token: CancelToken,
}

impl GateGuard<'_> {
    pub fn token(&self) -> &CancelToken {
        &self.token
    }
}

impl Drop for GateGuard<'_> {
    fn drop(&mut self) {
        self.gate.release();
    }
}

impl TwinGate {
    pub fn new(initial: GateSide, poll_period: Duration) -> Self {
        Self {
            state: Mutex::new(GateState {
                open: initial,
                holders: 0,
                requested: None,
                session: CancelToken::new(),
                disposed: false,
            }),
            cond: Condvar::new(),
            poll_period,
        }
    }

    /// Ask the gate to flip to `side` at the next safe point. If the other
    /// side is inside, its holders' guard tokens trip. No-op when `side` is
    /// already open or the gate is disposed.
    pub fn request_open(&self, side: GateSide) {
        let mut state = self.lock();
        if state.disposed || state.open == side {
            return;
        }
        if state.requested != Some(side) {
            state.requested = Some(side);
            state.session.cancel();
        }
        if state.holders == 0 {
            state.flip(side);
        }
        self.cond.notify_all();
    }

    /// Block until `side` is open and acquired. Registers the flip request
    /// itself, so a bare `enter` is enough to eventually preempt the other
    /// side.
    pub fn enter(&self, side: GateSide, token: &CancelToken) -> Result<GateGuard<'_>> {
        match self.enter_inner(side, None, token)? {
            Some(guard) => Ok(guard),
            // No deadline, so the wait can only end with a guard or an error.
            None => Err(Error::Cancelled),
        }
    }

    /// Bounded variant of [`enter`](Self::enter); `Ok(None)` on timeout.
    pub fn try_enter_for(
        &self,
        side: GateSide,
        timeout: Duration,
        token: &CancelToken,
    ) -> Result<Option<GateGuard<'_>>> {
        self.enter_inner(side, Some(Instant::now() + timeout), token)
    }

    fn enter_inner(
        &self,
        side: GateSide,
        deadline: Option<Instant>,
        token: &CancelToken,
    ) -> Result<Option<GateGuard<'_>>> {
        let mut state = self.lock();
        loop {
            if state.disposed {
                return Err(Error::Disposed);
            }
            if token.is_cancelled() {
                return Err(Error::Cancelled);
            }
            if state.open == side && state.requested.is_none() {
                state.holders += 1;
                let guard_token = state.session.clone();
                return Ok(Some(GateGuard {
                    gate: self,
                    token: guard_token,
                }));
            }
            if state.open != side && state.requested != Some(side) {
                state.requested = Some(side);
                state.session.cancel();
                if state.holders == 0 {
                    state.flip(side);
                    continue;
                }
            }

            let mut slice = self.poll_period;
            if let Some(deadline) = deadline {
                let remaining = deadline.saturating_duration_since(Instant::now());
                if remaining.is_zero() {
                    return Ok(None);
                }
                slice = slice.min(remaining);
            }
            let (next, _) = self
                .cond
                .wait_timeout(state, slice)
                .unwrap_or_else(PoisonError::into_inner);
            state = next;
        }
    }

    /// Wake all waiters and trip the current holders; subsequent enters fail
    /// with `Disposed`.
    pub fn dispose(&self) {
        let mut state = self.lock();
        state.disposed = true;
        state.session.cancel();
        self.cond.notify_all();
    }

    fn release(&self) {
        let mut state = self.lock();
        state.holders -= 1;
        if state.holders == 0 {
            if let Some(side) = state.requested {
                state.flip(side);
            }
        }
        self.cond.notify_all();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, GateState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
