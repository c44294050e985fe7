//! Wires the RDB store and event bus together through the small traits
//! each crate exposes, rather than a direct dependency: [`RdbEventEmitter`]
//! lets `RdbStore` emit through `EventServer`, [`EventRdbSink`] lets
//! `EventServer` write presence/statistics into `RdbStore`.

use std::sync::Arc;

use bp_evt::{EventServer, RdbSink};
use bp_net::ClientId;
use bp_rdb::{EventEmitter, RdbStore, RdbValueType};

pub struct RdbEventEmitter(pub Arc<EventServer>);

impl EventEmitter for RdbEventEmitter {
    fn register(&self, name: &str) -> bool {
        self.0.registry().register(name).is_some() || self.0.registry().get_id(name) != 0
    }

    fn emit(&self, name: &str, payload: &[u8]) -> bool {
        self.0.emit(name, payload)
    }
}

pub struct EventRdbSink(pub Arc<RdbStore>);

impl EventRdbSink {
    fn write_or_create(&self, key: &str, value_type: RdbValueType, bytes: &[u8]) {
        if !self.0.exists(key) {
            self.0.create(key, value_type, 0, Some(bytes));
            return;
        }
        self.0.write_value(key, bytes);
    }
}

impl RdbSink for EventRdbSink {
    fn write_or_create_u32(&self, key: &str, value: u32) {
        self.write_or_create(key, RdbValueType::Uint32, &value.to_le_bytes());
    }

    fn write_or_create_i64(&self, key: &str, value: i64) {
        self.write_or_create(key, RdbValueType::Int64, &value.to_le_bytes());
    }

    fn write_or_create_bool(&self, key: &str, value: bool) {
        self.write_or_create(key, RdbValueType::Bool, &[value as u8]);
    }

    fn write_or_create_string(&self, key: &str, value: &str) {
        let mut padded = vec![0u8; bp_rdb::RDB_MAX_STRING_SIZE];
        let bytes = value.as_bytes();
        let len = bytes.len().min(padded.len());
        padded[..len].copy_from_slice(&bytes[..len]);
        self.write_or_create(key, RdbValueType::String, &padded);
    }

    fn register_backend(&self, client: ClientId, binary_name: &str, hostname: &str) {
        let root = format!("/system/backends/{client}");
        self.write_or_create_string(&format!("{root}/name"), binary_name);
        self.write_or_create_string(&format!("{root}/host"), hostname);
        self.write_or_create_bool(&format!("{root}/connected"), true);
        self.write_or_create_i64(&format!("{root}/last_connect_time"), now_unix());
        self.write_or_create_string(&format!("{root}/user_status/text"), "");
        self.write_or_create_string(&format!("{root}/user_status/color"), "");
        self.write_or_create_u32(&format!("{root}/statistics/event/read"), 0);
        self.write_or_create_u32(&format!("{root}/statistics/event/write"), 0);
    }

    fn on_client_disconnect(&self, client: ClientId) {
        let root = format!("/system/backends/{client}");
        self.write_or_create_bool(&format!("{root}/connected"), false);
        self.write_or_create_string(&format!("{root}/user_status/text"), "");
        self.write_or_create_string(&format!("{root}/user_status/color"), "");
    }
}

fn now_unix() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs() as i64).unwrap_or(0)
}
