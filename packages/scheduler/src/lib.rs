pub mod error;
pub mod hub;
pub mod logger;
mod scheduler;
pub mod store;

pub use error::{Result, SchedulerError};
pub use hub::{Broadcaster, Subscription};
pub use scheduler::Scheduler;
pub use store::TrackedCid;
