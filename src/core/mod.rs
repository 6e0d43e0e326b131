//! Two-tier blocking queue engine.
//!
//! A [`LevelingQueue`] composes two [`BlockingQueue`] tiers, a small fast
//! one over a large slow one, and presents them as a single blocking queue
//! with bounded capacity, cancellation and an optional background worker
//! promoting spilled items back to the fast tier.

pub mod cancel;
pub mod error;
pub mod gate;
pub mod leveling;
pub mod memory;
pub mod monitor;
pub mod subqueue;
mod transfer;

pub use cancel::CancelToken;
pub use error::{Error, Result};
pub use gate::{GateGuard, GateSide, TwinGate};
pub use leveling::{AddingMode, LevelingConfig, LevelingQueue};
pub use memory::MemoryQueue;
pub use monitor::{MonitorWaiter, PollingMonitor, DEFAULT_POLL_PERIOD};
pub use subqueue::{AddError, BlockingQueue, TakeError};
