pub mod error;
pub mod instance;
pub mod instance_store;
pub mod manager;
pub mod options;

pub use error::{ApiError, Result};
pub use instance::{Instance, InstanceInfo, WalletInfo};
pub use instance_store::{InstanceConfig, InstanceStore, KvInstanceStore};
pub use manager::Manager;
pub use options::{PushConfigOptions, WatchLogsOptions};
