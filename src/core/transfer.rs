use std::sync::{Arc, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;

use crate::core::cancel::CancelToken;
use crate::core::gate::GateSide;
use crate::core::leveling::Shared;
use crate::core::subqueue::{AddError, TakeError};
use crate::core::Error;

/// Running transfer worker: one thread promoting items from the slow tier
/// to the fast tier whenever consumers are idle.
pub(crate) struct TransferHandle {
    handle: JoinHandle<()>,
    token: CancelToken,
}

impl TransferHandle {
    /// Cancel the worker and wait for it to finish. Any move in flight is
    /// restored before the thread exits.
    pub(crate) fn stop(self) {
        self.token.cancel();
        let _ = self.handle.join();
    }
}

pub(crate) fn spawn<T: Send + 'static>(shared: Arc<Shared<T>>) -> TransferHandle {
    let token = CancelToken::new();
    let task = token.clone();
    let handle = std::thread::spawn(move || run(shared, task));
    TransferHandle { handle, token }
}

fn run<T: Send>(shared: Arc<Shared<T>>, task: CancelToken) {
    let Some(gate) = shared.gate.as_ref() else {
        return;
    };

    while !task.is_cancelled() {
        let guard = match gate.enter(GateSide::B, &task) {
            Ok(guard) => guard,
            Err(Error::Cancelled) => continue,
            Err(_) => return,
        };
        // Trips on our own shutdown or when a consumer claims the gate.
        let linked = CancelToken::linked(&task, guard.token());
        if !drain(&shared, &linked) {
            return;
        }
    }
}

/// Move items low → high until preempted. Returns false when the worker
/// must exit for good rather than re-acquire its gate side.
fn drain<T: Send>(shared: &Shared<T>, linked: &CancelToken) -> bool {
    let waiter = match shared.transfer_monitor.enter(None, linked) {
        Ok(waiter) => waiter,
        Err(Error::Cancelled) => return true,
        Err(_) => return false,
    };

    loop {
        if linked.is_cancelled() {
            return true;
        }
        if shared.low.is_empty() {
            match waiter.wait() {
                Ok(()) => continue,
                Err(Error::Cancelled) => return true,
                Err(_) => return false,
            }
        }

        // Claim and move under the move lock; an ordered producer that sees
        // the lock busy routes to the slow tier instead of overtaking the
        // item in our hands.
        let move_guard = shared
            .move_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let item = match shared
            .low
            .try_take(Some(Duration::ZERO), &CancelToken::never())
        {
            Ok(item) => item,
            Err(TakeError::Empty) => {
                drop(move_guard);
                continue;
            }
            Err(TakeError::Fault(_)) => {
                drop(move_guard);
                return false;
            }
        };

        // The item is out of the slow tier now. The first attempt uses a
        // token that cannot trip: cancellation must not strand it.
        let item = match shared
            .high
            .try_add(item, Some(Duration::ZERO), &CancelToken::never())
        {
            Ok(()) => {
                drop(move_guard);
                shared.take_monitor.pulse();
                continue;
            }
            Err(AddError::Full(item)) => item,
            Err(AddError::Rejected(item, _)) => {
                restore(shared, item);
                drop(move_guard);
                return false;
            }
        };

        // Fast tier full: wait for room, but stay preemptible.
        match shared.high.try_add(item, None, linked) {
            Ok(()) => {
                drop(move_guard);
                shared.take_monitor.pulse();
            }
            Err(err) => {
                let preempted = matches!(err.error(), Some(Error::Cancelled));
                restore(shared, err.into_item());
                drop(move_guard);
                return preempted;
            }
        }
    }
}

/// An interrupted move must not lose the item: force it into the fast tier
/// so the next take still observes it.
fn restore<T>(shared: &Shared<T>, item: T) {
    match shared.high.add_forced(item) {
        Ok(()) => log::debug!("transfer interrupted, item restored to the fast tier"),
        Err(err) => log::error!("transfer interrupted and restore failed, item lost: {err}"),
    }
    shared.take_monitor.pulse();
}
