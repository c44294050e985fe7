//! Named publish/subscribe event bus: clients register event names,
//! subscribe to ids, and the server relays every received frame to that
//! event's subscriber set. A thread-per-connection server pairs with a
//! matching client transport.

pub mod client;
pub mod hooks;
pub mod registry;
pub mod server;
pub mod stats;
pub mod wire;

pub use client::{EventClient, EventClientError, EventControlChannel};
pub use hooks::{GETCLIENTMETA_EVENT, GhostSet, HookRegistry, NullRdbSink, RdbSink, ServerHook};
pub use registry::EventRegistry;
pub use server::EventServer;
pub use stats::ClientStats;
pub use wire::{EventHeader, EventId, MessageId};
