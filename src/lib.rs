pub mod core;
pub mod spill;

pub use self::core::*;
pub use self::spill::{SpillConfig, SpillQueue};
