//! Infrastructure layer: filesystem locking, document persistence, and
//! configuration loading.

pub mod config;
pub mod lock;
pub mod state_store;

pub use config::{ConfigError, ConfigLoader};
pub use lock::{FileLock, LockError, LockGuard};
pub use state_store::{StateStore, StoreError, STATE_FILE_NAME};
