mod record;
mod store;
mod watch;

pub use record::{EventType, ObjectInfo, StatusRecord, WatchEvent};
pub use store::StatusStore;
pub use watch::{Broadcaster, DEFAULT_KEEPALIVE, Frame, KEEPALIVE_TOKEN, Subscription, Watch};
