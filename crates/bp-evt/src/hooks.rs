use std::{
    collections::{HashMap, HashSet},
    sync::Mutex,
};

use bp_net::ClientId;

use crate::wire::EventId;

/// `name -> callback(client_id, event_id, payload)` map consulted on every
/// received event. Keyed by id rather than name since the server side only
/// ever sees ids after registration.
pub type ServerHook = Box<dyn Fn(ClientId, EventId, &[u8]) + Send + Sync>;

#[derive(Default)]
pub struct HookRegistry {
    hooks: Mutex<HashMap<EventId, ServerHook>>,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, id: EventId, hook: ServerHook) {
        self.hooks.lock().unwrap().insert(id, hook);
    }

    /// Invokes the hook registered for `id`, if any. A no-op for events with
    /// no hook, which is the overwhelming majority.
    pub fn try_run(&self, client: ClientId, id: EventId, payload: &[u8]) {
        let hooks = self.hooks.lock().unwrap();
        if let Some(hook) = hooks.get(&id) {
            hook(client, id, payload);
        }
    }
}

/// The reserved `mxevt::getclientmeta` handshake event name.
pub const GETCLIENTMETA_EVENT: &str = "mxevt::getclientmeta";

/// Clients that send a zero-length `getclientmeta` payload are transient:
/// their traffic bypasses statistics, they get no KV presence record, and
/// they're dropped from this set on disconnect rather than torn down via
/// the normal backend-record cleanup.
#[derive(Default)]
pub struct GhostSet {
    ghosts: Mutex<HashSet<ClientId>>,
}

impl GhostSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark(&self, client: ClientId) {
        self.ghosts.lock().unwrap().insert(client);
    }

    pub fn is_ghost(&self, client: ClientId) -> bool {
        self.ghosts.lock().unwrap().contains(&client)
    }

    pub fn remove(&self, client: ClientId) {
        self.ghosts.lock().unwrap().remove(&client);
    }
}

/// Minimal write surface the event bus needs into the KV store, injected at
/// server startup so the event bus never depends on `bp-rdb` directly —
/// breaks the RDB-writes-emit-events / event-stats-write-RDB cycle (Design
/// Notes: "the event bus [is] a pure consumer of a small interface").
pub trait RdbSink: Send + Sync {
    fn write_or_create_u32(&self, key: &str, value: u32);
    fn write_or_create_i64(&self, key: &str, value: i64);
    fn write_or_create_bool(&self, key: &str, value: bool);
    fn write_or_create_string(&self, key: &str, value: &str);

    /// A non-ghost client connected: record its presence under
    /// `/system/backends/<hex-cid>/...` (name, host, connected, timestamps).
    fn register_backend(&self, client: ClientId, binary_name: &str, hostname: &str);

    /// The client's worker loop exited: reset `user_status/*` to defaults
    /// and clear `connected`. Never called for ghost clients.
    fn on_client_disconnect(&self, client: ClientId);
}

/// `RdbSink` that drops every write; used where no KV store is wired up
/// (unit tests, a bare event bus with no backing server).
#[derive(Default)]
pub struct NullRdbSink;

impl RdbSink for NullRdbSink {
    fn write_or_create_u32(&self, _key: &str, _value: u32) {}
    fn write_or_create_i64(&self, _key: &str, _value: i64) {}
    fn write_or_create_bool(&self, _key: &str, _value: bool) {}
    fn write_or_create_string(&self, _key: &str, _value: &str) {}
    fn register_backend(&self, _client: ClientId, _binary_name: &str, _hostname: &str) {}
    fn on_client_disconnect(&self, _client: ClientId) {}
}
