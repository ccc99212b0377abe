pub mod activity;
pub mod chats;
pub mod messages;
pub mod reconcile;
pub mod scheduler;

pub use activity::{ActivityEvent, ActivityMonitor};
pub use chats::{ChatChanges, ChatSnapshot};
pub use messages::MessageLog;
pub use reconcile::{ChatSync, SyncEvent};
pub use scheduler::{Scheduler, SchedulerConfig, SchedulerStatus, SyncFn, Syncer};
