pub mod casing;
pub mod config;
pub mod error;
pub mod queue;

pub use casing::Casing;
pub use config::{CasingConfig, IsolationLevel, PgedConfig, RetryConfig};
pub use error::{BoxError, Error, Result};
pub use queue::{QueueSlot, TaskQueue};
