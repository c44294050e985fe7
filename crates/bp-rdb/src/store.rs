use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex, RwLock,
        atomic::{AtomicU32, AtomicU64, Ordering},
    },
};

use tracing::{error, trace, warn};

use crate::{
    arena::Arena,
    entry::RdbEntry,
    events::EventEmitter,
    types::{RdbValueType, validate_key},
    watch::WatchSet,
};

pub const KEY_CREATED_EVENT: &str = "mxrdb::keycreated";
pub const KEY_DELETED_EVENT: &str = "mxrdb::keydeleted";

const STATS_ROOT: &str = "/system/rdb/statistics";

#[derive(Default)]
struct RdbStatistics {
    read_ops: AtomicU32,
    write_ops: AtomicU32,
}

/// A point-in-time sample of the counters `publish_statistics` writes into
/// `/system/rdb/statistics/*`; read-ops/write-ops are reset on sample,
/// matching the source's 5-second accumulator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RdbStatisticsSample {
    pub read_ops: u32,
    pub write_ops: u32,
    pub nkeys: u64,
    pub allocated: u64,
    pub size: u64,
}

/// The typed in-memory KV store: a name -> entry map, arena bookkeeping for
/// allocation statistics, glob watches bridging to the event bus, and a
/// small read/write operation counter. Global lock ordering is: this
/// store's `entries` lock, then (if needed) an individual entry's lock —
/// never the reverse.
pub struct RdbStore {
    entries: RwLock<HashMap<String, Arc<RdbEntry>>>,
    arena: Mutex<Arena>,
    watches: WatchSet,
    emitter: Arc<dyn EventEmitter>,
    stats: RdbStatistics,
}

impl RdbStore {
    pub fn new(arena_capacity: u64, emitter: Arc<dyn EventEmitter>) -> Self {
        emitter.register(KEY_CREATED_EVENT);
        emitter.register(KEY_DELETED_EVENT);
        Self {
            entries: RwLock::new(HashMap::new()),
            arena: Mutex::new(Arena::new(arena_capacity)),
            watches: WatchSet::new(),
            emitter,
            stats: RdbStatistics::default(),
        }
    }

    /// Creates a new entry. `false` (logged) if the key already exists or
    /// fails validation — creation never overwrites.
    pub fn create(
        &self,
        key: &str,
        value_type: RdbValueType,
        count: u64,
        initial: Option<&[u8]>,
    ) -> bool {
        let Ok(key) = validate_key(key) else {
            error!(key, "rdb: rejected invalid key on create");
            return false;
        };

        let mut entries = self.entries.write().unwrap();
        if entries.contains_key(key) {
            error!(key, "rdb: cannot create already existing key");
            return false;
        }

        let size = RdbEntry::data_size(value_type, count);
        let offset = self.arena.lock().unwrap().allocate(size);
        let entry = Arc::new(RdbEntry::new(offset, value_type, count, initial));
        entries.insert(key.to_string(), entry.clone());
        drop(entries);

        self.watches.notify(key, |name| self.emitter.emit(name, &encode_watch_payload(key, &entry.read())));
        self.emitter.emit(KEY_CREATED_EVENT, key.as_bytes());
        self.stats.write_ops.fetch_add(1, Ordering::Relaxed);
        trace!(key, "rdb: created key");
        true
    }

    /// Deletes `key`, freeing its arena block. `false` if unknown.
    pub fn delete(&self, key: &str) -> bool {
        let mut entries = self.entries.write().unwrap();
        let Some(entry) = entries.remove(key) else {
            error!(key, "rdb: cannot delete unknown key");
            return false;
        };
        drop(entries);

        self.arena.lock().unwrap().free(entry.offset, entry.total_size());
        self.watches.notify(key, |name| self.emitter.emit(name, &encode_watch_payload(key, &entry.read())));
        self.emitter.emit(KEY_DELETED_EVENT, key.as_bytes());
        self.stats.write_ops.fetch_add(1, Ordering::Relaxed);
        trace!(key, "rdb: deleted key");
        true
    }

    pub fn find(&self, key: &str) -> Option<Arc<RdbEntry>> {
        self.entries.read().unwrap().get(key).cloned()
    }

    pub fn exists(&self, key: &str) -> bool {
        self.entries.read().unwrap().contains_key(key)
    }

    pub fn read_value(&self, key: &str) -> Option<Vec<u8>> {
        let entry = self.find(key)?;
        self.stats.read_ops.fetch_add(1, Ordering::Relaxed);
        Some(entry.read())
    }

    /// Writes `data` into `key`'s entry. `false` (logged) if the key is
    /// unknown or `data`'s length doesn't match the entry's fixed shape.
    pub fn write_value(&self, key: &str, data: &[u8]) -> bool {
        let Some(entry) = self.find(key) else {
            warn!(key, "rdb: write to unknown key dropped");
            return false;
        };
        if !entry.write(data) {
            error!(key, expected = entry.total_size(), got = data.len(), "rdb: shape mismatch on write, dropped");
            return false;
        }
        self.watches.notify(key, |name| self.emitter.emit(name, &encode_watch_payload(key, data)));
        self.stats.write_ops.fetch_add(1, Ordering::Relaxed);
        true
    }

    pub fn read_key_metadata(&self, key: &str) -> Option<RdbValueType> {
        let entry = self.find(key)?;
        self.stats.read_ops.fetch_add(1, Ordering::Relaxed);
        Some(entry.value_type)
    }

    pub fn list_keys(&self) -> Vec<String> {
        self.entries.read().unwrap().keys().cloned().collect()
    }

    pub fn list_key_types(&self) -> Vec<(String, RdbValueType)> {
        self.entries.read().unwrap().iter().map(|(k, v)| (k.clone(), v.value_type)).collect()
    }

    /// Keys under `dir`. If `dir` contains no `*`, this is a plain prefix
    /// match (`dir` should end with `/`); otherwise every key matching the
    /// glob is returned.
    pub fn list_subkeys(&self, dir: &str) -> Vec<String> {
        let entries = self.entries.read().unwrap();
        if bp_net::pattern::is_glob(dir) {
            entries.keys().filter(|k| bp_net::pattern::matches(dir, k)).cloned().collect()
        } else {
            entries.keys().filter(|k| k.starts_with(dir)).cloned().collect()
        }
    }

    /// Registers the derived event with the emitter before installing the
    /// pattern, so a client that immediately subscribes to the returned
    /// name always finds it known.
    pub fn watch(&self, glob: &str) -> String {
        let event_name = self.watches.watch(glob);
        self.emitter.register(&event_name);
        event_name
    }

    pub fn unwatch(&self, glob: &str) -> Option<String> {
        self.watches.unwatch(glob)
    }

    pub fn arena_used(&self) -> u64 {
        self.arena.lock().unwrap().used()
    }

    /// Creates the `/system/rdb/statistics/*` keys this store publishes
    /// into, if they don't already exist. Call once at startup before the
    /// first `publish_statistics`.
    pub fn bootstrap_statistics(&self) {
        self.create(&format!("{STATS_ROOT}/read"), RdbValueType::Uint32, 0, None);
        self.create(&format!("{STATS_ROOT}/write"), RdbValueType::Uint32, 0, None);
        self.create(&format!("{STATS_ROOT}/nkeys"), RdbValueType::Uint64, 0, None);
        self.create(&format!("{STATS_ROOT}/allocated"), RdbValueType::Uint64, 0, None);
        self.create(&format!("{STATS_ROOT}/size"), RdbValueType::Uint64, 0, None);
    }

    /// Samples and resets the read/write counters, writing all five
    /// statistics keys. Intended to be driven by a periodic task every
    /// five seconds, matching the source's `RdbStatisticsThread` cadence.
    pub fn publish_statistics(&self) -> RdbStatisticsSample {
        let sample = RdbStatisticsSample {
            read_ops: self.stats.read_ops.swap(0, Ordering::Relaxed),
            write_ops: self.stats.write_ops.swap(0, Ordering::Relaxed),
            nkeys: self.entries.read().unwrap().len() as u64,
            allocated: self.arena.lock().unwrap().used(),
            size: self.arena.lock().unwrap().capacity(),
        };

        self.write_value(&format!("{STATS_ROOT}/read"), &sample.read_ops.to_le_bytes());
        self.write_value(&format!("{STATS_ROOT}/write"), &sample.write_ops.to_le_bytes());
        self.write_value(&format!("{STATS_ROOT}/nkeys"), &sample.nkeys.to_le_bytes());
        self.write_value(&format!("{STATS_ROOT}/allocated"), &sample.allocated.to_le_bytes());
        self.write_value(&format!("{STATS_ROOT}/size"), &sample.size.to_le_bytes());

        sample
    }

    pub(crate) fn entries_for_snapshot(&self) -> Vec<(String, Arc<RdbEntry>)> {
        self.entries.read().unwrap().iter().map(|(k, v)| (k.clone(), v.clone())).collect()
    }

    pub(crate) fn restore_entry(&self, key: String, entry: RdbEntry) {
        let offset = entry.offset;
        let size = entry.total_size();
        self.entries.write().unwrap().insert(key, Arc::new(entry));
        let mut arena = self.arena.lock().unwrap();
        if offset + size > arena.used() {
            // Bump the bookkeeping tail to cover restored offsets; a fresh
            // arena's `used` starts at 0 and must account for everything
            // the snapshot already laid out.
            let gap = offset + size - arena.used();
            arena.allocate(gap);
        }
    }
}

/// `{Key:bounded-string, Size:u64, Bytes[Size]}` — `key` is padded/truncated
/// to [`crate::types::RDB_MAX_KEY_SIZE`] bytes so the payload has a fixed,
/// decodable key field width.
pub fn encode_watch_payload(key: &str, data: &[u8]) -> Vec<u8> {
    use crate::types::RDB_MAX_KEY_SIZE;

    let mut out = Vec::with_capacity(RDB_MAX_KEY_SIZE + 8 + data.len());
    let mut key_field = [0u8; RDB_MAX_KEY_SIZE];
    let key_bytes = key.as_bytes();
    let copy_len = key_bytes.len().min(RDB_MAX_KEY_SIZE);
    key_field[..copy_len].copy_from_slice(&key_bytes[..copy_len]);
    out.extend_from_slice(&key_field);
    out.extend_from_slice(&(data.len() as u64).to_le_bytes());
    out.extend_from_slice(data);
    out
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;
    use crate::events::NullEventEmitter;

    fn store() -> RdbStore {
        RdbStore::new(1024, Arc::new(NullEventEmitter))
    }

    #[test]
    fn create_then_read_roundtrips() {
        let store = store();
        assert!(store.create("/x/y", RdbValueType::Uint32, 0, Some(&42u32.to_le_bytes())));
        assert_eq!(store.read_value("/x/y"), Some(42u32.to_le_bytes().to_vec()));
    }

    #[test]
    fn create_rejects_duplicate_key() {
        let store = store();
        assert!(store.create("/x/y", RdbValueType::Bool, 0, None));
        assert!(!store.create("/x/y", RdbValueType::Bool, 0, None));
    }

    #[test]
    fn write_rejects_shape_mismatch() {
        let store = store();
        store.create("/x/y", RdbValueType::Uint32, 0, None);
        assert!(!store.write_value("/x/y", &[0u8; 2]));
        assert!(store.write_value("/x/y", &99u32.to_le_bytes()));
    }

    #[test]
    fn delete_frees_and_forgets_key() {
        let store = store();
        store.create("/x/y", RdbValueType::Bool, 0, None);
        assert!(store.delete("/x/y"));
        assert!(!store.exists("/x/y"));
        assert!(!store.delete("/x/y"));
    }

    #[test]
    fn watch_fires_on_matching_write() {
        struct CountingEmitter {
            count: AtomicUsize,
        }
        impl EventEmitter for CountingEmitter {
            fn register(&self, _name: &str) -> bool {
                true
            }
            fn emit(&self, name: &str, _payload: &[u8]) -> bool {
                if name.starts_with("mxevt::rdbw-") {
                    self.count.fetch_add(1, Ordering::SeqCst);
                }
                true
            }
        }

        let emitter = Arc::new(CountingEmitter { count: AtomicUsize::new(0) });
        let store = RdbStore::new(1024, emitter.clone());
        store.watch("/x/*/value");
        store.create("/x/y/value", RdbValueType::Uint32, 0, None);
        store.write_value("/x/y/value", &1u32.to_le_bytes());

        assert_eq!(emitter.count.load(Ordering::SeqCst), 2); // create + write
    }

    #[test]
    fn watch_registers_event_before_returning_its_name() {
        struct RecordingEmitter {
            registered: Mutex<Vec<String>>,
        }
        impl EventEmitter for RecordingEmitter {
            fn register(&self, name: &str) -> bool {
                self.registered.lock().unwrap().push(name.to_string());
                true
            }
            fn emit(&self, _name: &str, _payload: &[u8]) -> bool {
                false
            }
        }

        let emitter = Arc::new(RecordingEmitter { registered: Mutex::new(Vec::new()) });
        let store = RdbStore::new(1024, emitter.clone());
        let event_name = store.watch("/x/*/value");

        assert_eq!(emitter.registered.lock().unwrap().as_slice(), &[event_name]);
    }

    #[test]
    fn list_subkeys_prefix_and_glob() {
        let store = store();
        store.create("/a/1", RdbValueType::Bool, 0, None);
        store.create("/a/2", RdbValueType::Bool, 0, None);
        store.create("/b/1", RdbValueType::Bool, 0, None);

        let mut prefix = store.list_subkeys("/a/");
        prefix.sort();
        assert_eq!(prefix, vec!["/a/1".to_string(), "/a/2".to_string()]);

        let glob = store.list_subkeys("/*/1");
        assert_eq!(glob.len(), 2);
    }

    #[test]
    fn statistics_round_trip_through_store() {
        let store = store();
        store.bootstrap_statistics();
        store.create("/x", RdbValueType::Bool, 0, None);
        store.read_value("/x");

        let sample = store.publish_statistics();
        assert_eq!(sample.nkeys, 6); // 5 statistics keys + /x
        assert_eq!(store.read_value(&format!("{STATS_ROOT}/nkeys")), Some(6u64.to_le_bytes().to_vec()));
    }
}
