//! A typed, path-keyed in-memory key/value store: an arena tracking
//! allocation bookkeeping only, glob-pattern watches bridging to the event
//! bus, and a snapshot format for save/restore across restarts.

pub mod arena;
pub mod entry;
pub mod events;
pub mod proxy;
pub mod snapshot;
pub mod store;
pub mod types;
pub mod watch;

pub use entry::RdbEntry;
pub use events::{EventEmitter, NullEventEmitter};
pub use proxy::{EventSubscribeChannel, RdbControlChannel, RdbProxyValue};
pub use store::{RdbStatisticsSample, RdbStore};
pub use types::{RDB_MAX_KEY_SIZE, RDB_MAX_STRING_SIZE, RdbKeyError, RdbValueType, validate_key};
pub use watch::WatchSet;
