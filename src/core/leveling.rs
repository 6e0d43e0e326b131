use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use crate::core::cancel::CancelToken;
use crate::core::gate::{GateSide, TwinGate};
use crate::core::monitor::{PollingMonitor, DEFAULT_POLL_PERIOD};
use crate::core::subqueue::{AddError, BlockingQueue, TakeError};
use crate::core::transfer::{self, TransferHandle};
use crate::core::{Error, Result};

/// How many times an ordered add yields while waiting for the transfer
/// worker to drain a nearly-empty slow tier.
const TRANSFER_SPIN_YIELDS: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AddingMode {
    /// Admissions are observed in admission order across both tiers.
    PreserveOrder,
    /// New items go to whichever tier has room, fast tier first; cross-tier
    /// order is undefined.
    #[default]
    PreferLiveData,
}

#[derive(Debug, Clone, Copy)]
pub struct LevelingConfig {
    pub mode: AddingMode,
    /// Run a background thread that promotes items from the slow tier to
    /// the fast tier while consumers are idle.
    pub background_transfer: bool,
    /// Upper bound on every internal wait slice. Cancellation, disposal and
    /// out-of-band tier mutations are observed within one period.
    pub poll_period: Duration,
}

impl Default for LevelingConfig {
    fn default() -> Self {
        Self {
            mode: AddingMode::default(),
            background_transfer: false,
            poll_period: DEFAULT_POLL_PERIOD,
        }
    }
}

/// Two-tier blocking queue: a small fast tier over a large slow one, behind
/// one queue surface.
///
/// Producers land in the fast tier while it has room (subject to the
/// ordering mode), consumers always drain the fast tier first, and the
/// optional background worker promotes spilled items back up so consumers
/// rarely touch the slow tier.
///
/// The queue is itself a [`BlockingQueue`], so leveling queues compose as
/// tiers of other leveling queues.
pub struct LevelingQueue<T: Send + 'static> {
    shared: Arc<Shared<T>>,
    worker: Mutex<Option<TransferHandle>>,
}

pub(crate) struct Shared<T> {
    pub(crate) high: Box<dyn BlockingQueue<T>>,
    pub(crate) low: Box<dyn BlockingQueue<T>>,
    pub(crate) mode: AddingMode,
    pub(crate) add_monitor: PollingMonitor,
    pub(crate) take_monitor: PollingMonitor,
    /// Wakes the transfer worker when an admission lands in the slow tier.
    pub(crate) transfer_monitor: PollingMonitor,
    /// Serializes a low-to-high move against the ordered add shortcut into
    /// the fast tier. A producer that finds it busy must assume an older
    /// item is mid-move and route to the slow tier.
    pub(crate) move_lock: Mutex<()>,
    pub(crate) gate: Option<TwinGate>,
    pub(crate) disposed: AtomicBool,
}

impl<T> Shared<T> {
    /// Post-admission wakeups: one consumer, plus the transfer worker when
    /// one exists.
    fn notify_added(&self) {
        self.take_monitor.pulse();
        if self.gate.is_some() {
            self.transfer_monitor.pulse();
        }
    }

    /// Zero-timeout admission, fast tier first.
    fn try_add_fast(&self, item: T) -> std::result::Result<(), AddError<T>> {
        let item = match self
            .high
            .try_add(item, Some(Duration::ZERO), &CancelToken::never())
        {
            Ok(()) => return Ok(()),
            Err(AddError::Full(item)) => item,
            Err(rejected) => return Err(rejected),
        };
        self.low
            .try_add(item, Some(Duration::ZERO), &CancelToken::never())
    }

    /// Zero-timeout take, fast tier first.
    pub(crate) fn try_take_fast(&self) -> std::result::Result<T, TakeError> {
        match self.high.try_take(Some(Duration::ZERO), &CancelToken::never()) {
            Ok(item) => Ok(item),
            Err(TakeError::Empty) => self
                .low
                .try_take(Some(Duration::ZERO), &CancelToken::never()),
            Err(fault) => Err(fault),
        }
    }
}

impl<T: Send + 'static> LevelingQueue<T> {
    pub fn new(
        high: Box<dyn BlockingQueue<T>>,
        low: Box<dyn BlockingQueue<T>>,
        mode: AddingMode,
        background_transfer: bool,
    ) -> Result<Self> {
        Self::with_config(
            high,
            low,
            LevelingConfig {
                mode,
                background_transfer,
                ..LevelingConfig::default()
            },
        )
    }

    pub fn with_config(
        high: Box<dyn BlockingQueue<T>>,
        low: Box<dyn BlockingQueue<T>>,
        config: LevelingConfig,
    ) -> Result<Self> {
        if config.poll_period.is_zero() {
            return Err(Error::InvalidArgument("poll period must be non-zero"));
        }

        let shared = Arc::new(Shared {
            high,
            low,
            mode: config.mode,
            add_monitor: PollingMonitor::new(config.poll_period),
            take_monitor: PollingMonitor::new(config.poll_period),
            transfer_monitor: PollingMonitor::new(config.poll_period),
            move_lock: Mutex::new(()),
            gate: config
                .background_transfer
                .then(|| TwinGate::new(GateSide::B, config.poll_period)),
            disposed: AtomicBool::new(false),
        });

        let worker = config
            .background_transfer
            .then(|| transfer::spawn(Arc::clone(&shared)));

        Ok(Self {
            shared,
            worker: Mutex::new(worker),
        })
    }

    /// Admit `item`, waiting for capacity up to `timeout`. Timing out hands
    /// the item back in `AddError::Full`; it is not a fault.
    pub fn try_add(
        &self,
        item: T,
        timeout: Option<Duration>,
        token: &CancelToken,
    ) -> std::result::Result<(), AddError<T>> {
        if token.is_cancelled() {
            return Err(AddError::Rejected(item, Error::Cancelled));
        }
        if self.is_disposed() {
            return Err(AddError::Rejected(item, Error::Disposed));
        }
        match self.shared.mode {
            AddingMode::PreferLiveData => self.try_add_live(item, timeout, token),
            AddingMode::PreserveOrder => self.try_add_ordered(item, timeout, token),
        }
    }

    fn try_add_live(
        &self,
        mut item: T,
        timeout: Option<Duration>,
        token: &CancelToken,
    ) -> std::result::Result<(), AddError<T>> {
        // Fairness hint: skip the fast attempt while other producers queue
        // for space.
        let fast_tried = self.shared.add_monitor.waiter_count() == 0;
        if fast_tried {
            item = match self.shared.try_add_fast(item) {
                Ok(()) => {
                    self.shared.notify_added();
                    return Ok(());
                }
                Err(AddError::Full(item)) => item,
                Err(rejected) => return Err(rejected),
            };
        }

        if matches!(timeout, Some(timeout) if timeout.is_zero()) {
            if fast_tried {
                return Err(AddError::Full(item));
            }
            // A zero-timeout probe still answers "were both tiers full".
            return match self.shared.try_add_fast(item) {
                Ok(()) => {
                    self.shared.notify_added();
                    Ok(())
                }
                Err(err) => Err(err),
            };
        }

        let waiter = match self.shared.add_monitor.enter(timeout, token) {
            Ok(waiter) => waiter,
            Err(err) => return Err(AddError::Rejected(item, err)),
        };
        loop {
            if self.is_disposed() {
                return Err(AddError::Rejected(item, Error::Disposed));
            }
            item = match self.shared.try_add_fast(item) {
                Ok(()) => {
                    self.shared.notify_added();
                    return Ok(());
                }
                Err(AddError::Full(item)) => item,
                Err(rejected) => return Err(rejected),
            };
            if waiter.is_timed_out() {
                return Err(AddError::Full(item));
            }
            if let Err(err) = waiter.wait() {
                return Err(AddError::Rejected(item, err));
            }
        }
    }

    fn try_add_ordered(
        &self,
        mut item: T,
        timeout: Option<Duration>,
        token: &CancelToken,
    ) -> std::result::Result<(), AddError<T>> {
        if self.shared.gate.is_some() {
            self.spin_for_transfer();
        }

        if let Some(free) = self.claim_high_slot() {
            item = match self
                .shared
                .high
                .try_add(item, Some(Duration::ZERO), &CancelToken::never())
            {
                Ok(()) => {
                    drop(free);
                    self.shared.notify_added();
                    return Ok(());
                }
                Err(AddError::Full(item)) => item,
                Err(rejected) => return Err(rejected),
            };
            drop(free);
        }

        // Never the fast tier from here on: an older item may sit in the
        // slow tier or be mid-move.
        self.shared.low.try_add(item, timeout, token)?;
        self.shared.notify_added();
        Ok(())
    }

    /// Ordered admissions may only shortcut into the fast tier when the slow
    /// tier is empty and no promotion is in flight. With a transfer worker
    /// around, that means holding the move lock across the check and the
    /// add; a busy lock routes the admission to the slow tier, which is
    /// always order-safe.
    fn claim_high_slot(&self) -> Option<Option<std::sync::MutexGuard<'_, ()>>> {
        if !self.shared.low.is_empty() {
            return None;
        }
        if self.shared.gate.is_none() {
            return Some(None);
        }
        let guard = match self.shared.move_lock.try_lock() {
            Ok(guard) => guard,
            Err(std::sync::TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
            Err(std::sync::TryLockError::WouldBlock) => return None,
        };
        if self.shared.low.is_empty() {
            Some(Some(guard))
        } else {
            None
        }
    }

    /// Give the transfer worker a short window to finish draining an almost
    /// empty slow tier, so the next admission can go to the fast tier. Best
    /// effort; correctness never depends on it.
    fn spin_for_transfer(&self) {
        let Some(len) = self.shared.low.len() else {
            return;
        };
        let threads = std::thread::available_parallelism()
            .map(|threads| threads.get() as u64)
            .unwrap_or(1);
        if len == 0 || len > threads {
            return;
        }
        for _ in 0..TRANSFER_SPIN_YIELDS {
            if self.shared.low.is_empty() {
                return;
            }
            std::thread::yield_now();
        }
    }

    /// Take the oldest observable item, waiting up to `timeout`.
    pub fn try_take(
        &self,
        timeout: Option<Duration>,
        token: &CancelToken,
    ) -> std::result::Result<T, TakeError> {
        if self.is_disposed() {
            return Err(TakeError::Fault(Error::Disposed));
        }
        let taken = match (self.shared.mode, self.shared.gate.as_ref()) {
            (AddingMode::PreserveOrder, Some(gate)) => self.try_take_ordered(gate, timeout, token),
            _ => self.try_take_live(timeout, token),
        }?;
        self.shared.add_monitor.pulse();
        Ok(taken)
    }

    fn try_take_ordered(
        &self,
        gate: &TwinGate,
        timeout: Option<Duration>,
        token: &CancelToken,
    ) -> std::result::Result<T, TakeError> {
        match self
            .shared
            .high
            .try_take(Some(Duration::ZERO), &CancelToken::never())
        {
            Ok(item) => {
                if !self.shared.low.is_empty() {
                    // Re-arm the worker; it re-enters its side on its own,
                    // this just skips a wait when the gate is idle.
                    gate.request_open(GateSide::B);
                }
                return Ok(item);
            }
            Err(TakeError::Empty) => {}
            Err(fault) => return Err(fault),
        }

        // The fast tier looked empty. Fence the transfer worker out so
        // "fast empty, then slow" is a consistent snapshot and order holds.
        gate.request_open(GateSide::A);
        let _guard = gate.enter(GateSide::A, token).map_err(TakeError::Fault)?;
        self.take_slow(timeout, token)
    }

    fn try_take_live(
        &self,
        timeout: Option<Duration>,
        token: &CancelToken,
    ) -> std::result::Result<T, TakeError> {
        let fast_tried = self.shared.take_monitor.waiter_count() == 0;
        if fast_tried {
            match self.shared.try_take_fast() {
                Ok(item) => return Ok(item),
                Err(TakeError::Empty) => {}
                Err(fault) => return Err(fault),
            }
        }
        if matches!(timeout, Some(timeout) if timeout.is_zero()) {
            if fast_tried {
                return Err(TakeError::Empty);
            }
            return self.shared.try_take_fast();
        }
        self.take_slow(timeout, token)
    }

    fn take_slow(
        &self,
        timeout: Option<Duration>,
        token: &CancelToken,
    ) -> std::result::Result<T, TakeError> {
        match self.shared.try_take_fast() {
            Ok(item) => return Ok(item),
            Err(TakeError::Empty) => {}
            Err(fault) => return Err(fault),
        }
        if matches!(timeout, Some(timeout) if timeout.is_zero()) {
            return Err(TakeError::Empty);
        }
        let waiter = self.shared.take_monitor.enter(timeout, token)?;
        loop {
            if self.is_disposed() {
                return Err(TakeError::Fault(Error::Disposed));
            }
            match self.shared.try_take_fast() {
                Ok(item) => return Ok(item),
                Err(TakeError::Empty) => {}
                Err(fault) => return Err(fault),
            }
            if waiter.is_timed_out() {
                return Err(TakeError::Empty);
            }
            waiter.wait()?;
        }
    }

    /// Admit `item` regardless of capacity; only routing differs by mode.
    pub fn add_forced(&self, item: T) -> Result<()> {
        if self.is_disposed() {
            return Err(Error::Disposed);
        }
        let item = match self.shared.mode {
            AddingMode::PreferLiveData => {
                match self
                    .shared
                    .high
                    .try_add(item, Some(Duration::ZERO), &CancelToken::never())
                {
                    Ok(()) => {
                        self.shared.notify_added();
                        return Ok(());
                    }
                    Err(err) => err.into_item(),
                }
            }
            AddingMode::PreserveOrder => {
                let mut item = item;
                if let Some(free) = self.claim_high_slot() {
                    item = match self
                        .shared
                        .high
                        .try_add(item, Some(Duration::ZERO), &CancelToken::never())
                    {
                        Ok(()) => {
                            drop(free);
                            self.shared.notify_added();
                            return Ok(());
                        }
                        Err(err) => err.into_item(),
                    };
                    drop(free);
                }
                item
            }
        };
        self.shared.low.add_forced(item)?;
        self.shared.notify_added();
        Ok(())
    }

    /// Forced admission straight into the fast tier, bypassing mode routing.
    pub fn add_forced_to_high(&self, item: T) -> Result<()> {
        if self.is_disposed() {
            return Err(Error::Disposed);
        }
        self.shared.high.add_forced(item)?;
        self.shared.take_monitor.pulse();
        Ok(())
    }

    pub fn len(&self) -> Option<u64> {
        match (self.shared.high.len(), self.shared.low.len()) {
            (Some(high), Some(low)) => Some(high + low),
            _ => None,
        }
    }

    pub fn capacity(&self) -> Option<u64> {
        match (self.shared.high.capacity(), self.shared.low.capacity()) {
            (Some(high), Some(low)) => Some(high + low),
            _ => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.shared.high.is_empty() && self.shared.low.is_empty()
    }

    pub fn mode(&self) -> AddingMode {
        self.shared.mode
    }

    pub fn is_disposed(&self) -> bool {
        self.shared.disposed.load(Ordering::Acquire)
    }

    /// Fast tier, for inspection. Callers must not mutate structure.
    pub fn high(&self) -> &dyn BlockingQueue<T> {
        &*self.shared.high
    }

    /// Slow tier, for inspection. Callers must not mutate structure.
    pub fn low(&self) -> &dyn BlockingQueue<T> {
        &*self.shared.low
    }

    /// Stop the transfer worker, wake every blocked caller and dispose both
    /// tiers. Idempotent; also runs on drop.
    pub fn dispose(&self) {
        if self.shared.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        let worker = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(worker) = worker {
            worker.stop();
        }
        self.shared.add_monitor.dispose();
        self.shared.take_monitor.dispose();
        self.shared.transfer_monitor.dispose();
        self.shared.high.dispose();
        self.shared.low.dispose();
        if let Some(gate) = &self.shared.gate {
            gate.dispose();
        }
    }
}

impl<T: Send + 'static> BlockingQueue<T> for LevelingQueue<T> {
    fn try_add(
        &self,
        item: T,
        timeout: Option<Duration>,
        token: &CancelToken,
    ) -> std::result::Result<(), AddError<T>> {
        LevelingQueue::try_add(self, item, timeout, token)
    }

    fn try_take(
        &self,
        timeout: Option<Duration>,
        token: &CancelToken,
    ) -> std::result::Result<T, TakeError> {
        LevelingQueue::try_take(self, timeout, token)
    }

    fn add_forced(&self, item: T) -> Result<()> {
        LevelingQueue::add_forced(self, item)
    }

    fn len(&self) -> Option<u64> {
        LevelingQueue::len(self)
    }

    fn capacity(&self) -> Option<u64> {
        LevelingQueue::capacity(self)
    }

    fn is_empty(&self) -> bool {
        LevelingQueue::is_empty(self)
    }

    fn dispose(&self) {
        LevelingQueue::dispose(self);
    }
}

impl<T: Send + 'static> Drop for LevelingQueue<T> {
    fn drop(&mut self) {
        self.dispose();
    }
}
