use std::{
    collections::{HashMap, HashSet},
    sync::{
        Mutex, RwLock,
        atomic::{AtomicU16, Ordering},
    },
};

use bp_net::ClientId;
use tracing::{trace, warn};

use crate::wire::EventId;

/// Name -> id registry plus the id -> subscriber-set map. An `EventId` is
/// never reused within a process lifetime (monotonic counter, pre-increment
/// so `0` stays a permanent "not found" sentinel).
#[derive(Default)]
pub struct EventRegistry {
    names: RwLock<HashMap<String, EventId>>,
    next_id: AtomicU16,
    subscriptions: Mutex<HashMap<EventId, HashSet<ClientId>>>,
}

impl EventRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new event name. Returns the freshly assigned id, or
    /// `None` if the name already exists.
    pub fn register(&self, name: &str) -> Option<EventId> {
        let mut names = self.names.write().unwrap();
        if names.contains_key(name) {
            trace!(name, "evt: cannot register, already exists");
            return None;
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        names.insert(name.to_string(), id);
        self.subscriptions.lock().unwrap().insert(id, HashSet::new());
        trace!(name, id, "evt: registered");
        Some(id)
    }

    /// Returns the id or `0` if `name` is not registered.
    pub fn get_id(&self, name: &str) -> EventId {
        self.names.read().unwrap().get(name).copied().unwrap_or(0)
    }

    pub fn name_of(&self, id: EventId) -> Option<String> {
        self.names
            .read()
            .unwrap()
            .iter()
            .find(|(_, &v)| v == id)
            .map(|(k, _)| k.clone())
    }

    pub fn all_names(&self) -> Vec<String> {
        self.names.read().unwrap().keys().cloned().collect()
    }

    /// Adds `client` to `id`'s subscriber set. Fails if the event doesn't
    /// exist or the caller is the server itself (`ClientId(0)`).
    pub fn subscribe(&self, id: EventId, client: ClientId) -> bool {
        if client.is_server() {
            warn!("evt: server cannot manually subscribe to events");
            return false;
        }
        let mut subs = self.subscriptions.lock().unwrap();
        match subs.get_mut(&id) {
            Some(set) => {
                set.insert(client);
                true
            }
            None => {
                warn!(id, "evt: cannot subscribe, unknown event");
                false
            }
        }
    }

    /// Removes `client` from `id`'s subscriber set. Tolerates non-membership
    /// and unknown ids silently (both return `false` without side effects).
    pub fn unsubscribe(&self, id: EventId, client: ClientId) -> bool {
        if client.is_server() {
            warn!("evt: server cannot manually unsubscribe from events");
            return false;
        }
        let mut subs = self.subscriptions.lock().unwrap();
        match subs.get_mut(&id) {
            Some(set) => set.remove(&client),
            None => false,
        }
    }

    /// Removes `client` from every event's subscriber set; called on
    /// disconnect.
    pub fn unsubscribe_all(&self, client: ClientId) {
        let mut subs = self.subscriptions.lock().unwrap();
        for set in subs.values_mut() {
            set.remove(&client);
        }
    }

    /// Snapshot of the current subscriber set for `id`, taken atomically
    /// with respect to other subscription-map mutations.
    pub fn subscribers(&self, id: EventId) -> Vec<ClientId> {
        self.subscriptions
            .lock()
            .unwrap()
            .get(&id)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }
}
