pub mod api;
pub mod app;
pub mod error;
pub mod storage;
pub mod sync;
pub mod utils;

pub use app::Settings;
pub use error::{ApiError, ConfigError, StorageError, SyncError};
