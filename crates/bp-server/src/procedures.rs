use std::sync::Arc;

use bp_evt::EventServer;
use bp_net::CallerContext;
use bp_rdb::{RdbStore, RdbValueType};
use bp_rpc::{GenericBlob, ProcedureId, ProcedureOutcome, RpcRegistry, Status};

use crate::run_control;

pub const RDB_READ_VALUE_DIRECT: ProcedureId = 1;
pub const RDB_WRITE_VALUE_DIRECT: ProcedureId = 2;
pub const RDB_CREATE_VALUE_DIRECT: ProcedureId = 3;
pub const RDB_DELETE_VALUE_DIRECT: ProcedureId = 4;
pub const RDB_VALUE_EXISTS: ProcedureId = 5;
pub const RDB_READ_KEY_METADATA: ProcedureId = 6;
pub const RDB_WATCH: ProcedureId = 7;
pub const RDB_UNWATCH: ProcedureId = 8;
pub const RDB_LIST_KEYS: ProcedureId = 9;
pub const RDB_LIST_KEY_TYPES: ProcedureId = 10;
pub const RDB_LIST_SUBKEYS: ProcedureId = 11;

pub const EVT_REGISTER: ProcedureId = 20;
pub const EVT_GET_ID: ProcedureId = 21;
pub const EVT_SUBSCRIBE: ProcedureId = 22;
pub const EVT_UNSUBSCRIBE: ProcedureId = 23;

pub const RUN_START: ProcedureId = 30;
pub const RUN_STOP: ProcedureId = 31;

pub const ECHO: ProcedureId = 40;

/// Registers every procedure this server hosts: RDB direct access and
/// introspection, event bus control-channel operations (register/getid/
/// subscribe/unsubscribe, matching `network/mxevt.cpp`'s client-side RPC
/// calls), run-control transitions, and a bare connectivity check.
pub fn register_all(registry: &mut RpcRegistry, store: Arc<RdbStore>, evt: Arc<EventServer>) {
    register_rdb(registry, store.clone());
    register_evt(registry, evt);
    register_run_control(registry, store);

    registry.register(ECHO, "echo", "public", |_ctx, payload| {
        ProcedureOutcome::Value(payload.to_vec())
    });
}

fn register_rdb(registry: &mut RpcRegistry, store: Arc<RdbStore>) {
    {
        let store = store.clone();
        registry.register(RDB_READ_VALUE_DIRECT, "rdb_read_value_direct", "public", move |_ctx, payload| {
            let Some(key) = decode_key(payload) else {
                return ProcedureOutcome::Error(Status::WrongArgs);
            };
            match store.read_value(&key) {
                Some(bytes) => ProcedureOutcome::Value(bytes),
                None => ProcedureOutcome::Error(Status::NotFound),
            }
        });
    }

    {
        let store = store.clone();
        registry.register(RDB_WRITE_VALUE_DIRECT, "rdb_write_value_direct", "public", move |_ctx, payload| {
            let mut cursor = 0;
            let Some(key) = decode_blob_at(payload, &mut cursor) else {
                return ProcedureOutcome::Error(Status::WrongArgs);
            };
            let Some(value) = decode_blob_at(payload, &mut cursor) else {
                return ProcedureOutcome::Error(Status::WrongArgs);
            };
            if store.write_value(&key, &value) { ProcedureOutcome::Void } else { ProcedureOutcome::Error(Status::WrongArgs) }
        });
    }

    {
        let store = store.clone();
        registry.register(RDB_CREATE_VALUE_DIRECT, "rdb_create_value_direct", "public", move |_ctx, payload| {
            let mut cursor = 0;
            let Some(key) = decode_blob_at(payload, &mut cursor) else {
                return ProcedureOutcome::Error(Status::WrongArgs);
            };
            let Some(raw_type) = decode_u8_at(payload, &mut cursor) else {
                return ProcedureOutcome::Error(Status::WrongArgs);
            };
            let Some(count) = decode_u64_at(payload, &mut cursor) else {
                return ProcedureOutcome::Error(Status::WrongArgs);
            };
            let initial = decode_blob_at(payload, &mut cursor);
            let Some(value_type) = RdbValueType::from_u8(raw_type) else {
                return ProcedureOutcome::Error(Status::WrongArgs);
            };
            let initial_ref = initial.as_deref();
            if store.create(&key, value_type, count, initial_ref) {
                ProcedureOutcome::Void
            } else {
                ProcedureOutcome::Error(Status::AlreadyExists)
            }
        });
    }

    {
        let store = store.clone();
        registry.register(RDB_DELETE_VALUE_DIRECT, "rdb_delete_value_direct", "public", move |_ctx, payload| {
            let Some(key) = decode_key(payload) else {
                return ProcedureOutcome::Error(Status::WrongArgs);
            };
            if store.delete(&key) { ProcedureOutcome::Void } else { ProcedureOutcome::Error(Status::NotFound) }
        });
    }

    {
        let store = store.clone();
        registry.register(RDB_VALUE_EXISTS, "rdb_value_exists", "public", move |_ctx, payload| {
            let Some(key) = decode_key(payload) else {
                return ProcedureOutcome::Error(Status::WrongArgs);
            };
            ProcedureOutcome::Value(vec![store.exists(&key) as u8])
        });
    }

    {
        let store = store.clone();
        registry.register(RDB_READ_KEY_METADATA, "rdb_read_key_metadata", "public", move |_ctx, payload| {
            let Some(key) = decode_key(payload) else {
                return ProcedureOutcome::Error(Status::WrongArgs);
            };
            match store.read_key_metadata(&key) {
                Some(value_type) => ProcedureOutcome::Value(vec![value_type as u8]),
                None => ProcedureOutcome::Error(Status::NotFound),
            }
        });
    }

    {
        let store = store.clone();
        registry.register(RDB_WATCH, "rdb_watch", "public", move |_ctx, payload| {
            let Some(glob) = decode_key(payload) else {
                return ProcedureOutcome::Error(Status::WrongArgs);
            };
            ProcedureOutcome::Value(store.watch(&glob).into_bytes())
        });
    }

    {
        let store = store.clone();
        registry.register(RDB_UNWATCH, "rdb_unwatch", "public", move |_ctx, payload| {
            let Some(glob) = decode_key(payload) else {
                return ProcedureOutcome::Error(Status::WrongArgs);
            };
            match store.unwatch(&glob) {
                Some(name) => ProcedureOutcome::Value(name.into_bytes()),
                None => ProcedureOutcome::Error(Status::NotFound),
            }
        });
    }

    {
        let store = store.clone();
        registry.register(RDB_LIST_KEYS, "rdb_list_keys", "public", move |_ctx, _payload| {
            ProcedureOutcome::Value(encode_key_list(&store.list_keys()))
        });
    }

    {
        let store = store.clone();
        registry.register(RDB_LIST_KEY_TYPES, "rdb_list_key_types", "public", move |_ctx, _payload| {
            ProcedureOutcome::Value(encode_key_types(&store.list_key_types()))
        });
    }

    registry.register(RDB_LIST_SUBKEYS, "rdb_list_subkeys", "public", move |_ctx, payload| {
        let Some(dir) = decode_key(payload) else {
            return ProcedureOutcome::Error(Status::WrongArgs);
        };
        ProcedureOutcome::Value(encode_key_list(&store.list_subkeys(&dir)))
    });
}

fn register_evt(registry: &mut RpcRegistry, evt: Arc<EventServer>) {
    {
        let evt = evt.clone();
        registry.register(EVT_REGISTER, "evt_register", "public", move |_ctx, payload| {
            let Some(name) = decode_key(payload) else {
                return ProcedureOutcome::Error(Status::WrongArgs);
            };
            ProcedureOutcome::Value(vec![evt.registry().register(&name).is_some() as u8])
        });
    }

    {
        let evt = evt.clone();
        registry.register(EVT_GET_ID, "evt_get_id", "public", move |_ctx, payload| {
            let Some(name) = decode_key(payload) else {
                return ProcedureOutcome::Error(Status::WrongArgs);
            };
            ProcedureOutcome::Value(evt.registry().get_id(&name).to_le_bytes().to_vec())
        });
    }

    {
        let evt = evt.clone();
        registry.register(EVT_SUBSCRIBE, "evt_subscribe", "public", move |ctx: CallerContext, payload| {
            let Some(name) = decode_key(payload) else {
                return ProcedureOutcome::Error(Status::WrongArgs);
            };
            let id = evt.registry().get_id(&name);
            if id == 0 {
                return ProcedureOutcome::Error(Status::NotFound);
            }
            ProcedureOutcome::Value(vec![evt.registry().subscribe(id, ctx.caller) as u8])
        });
    }

    registry.register(EVT_UNSUBSCRIBE, "evt_unsubscribe", "public", move |ctx: CallerContext, payload| {
        let Some(name) = decode_key(payload) else {
            return ProcedureOutcome::Error(Status::WrongArgs);
        };
        let id = evt.registry().get_id(&name);
        if id == 0 {
            return ProcedureOutcome::Error(Status::NotFound);
        }
        ProcedureOutcome::Value(vec![evt.registry().unsubscribe(id, ctx.caller) as u8])
    });
}

fn register_run_control(registry: &mut RpcRegistry, store: Arc<RdbStore>) {
    {
        let store = store.clone();
        registry.register(RUN_START, "run_start", "operator", move |_ctx, _payload| {
            if run_control::start(&store) { ProcedureOutcome::Void } else { ProcedureOutcome::Error(Status::Protocol) }
        });
    }

    registry.register(RUN_STOP, "run_stop", "operator", move |_ctx, _payload| {
        if run_control::stop(&store) { ProcedureOutcome::Void } else { ProcedureOutcome::Error(Status::Protocol) }
    });
}

fn decode_key(payload: &[u8]) -> Option<String> {
    let blob = GenericBlob::decode(payload)?;
    String::from_utf8(blob.as_slice().to_vec()).ok()
}

fn decode_blob_at(buf: &[u8], cursor: &mut usize) -> Option<String> {
    let blob = GenericBlob::decode(buf.get(*cursor..)?)?;
    *cursor += 8 + blob.len();
    String::from_utf8(blob.as_slice().to_vec()).ok()
}

fn decode_u8_at(buf: &[u8], cursor: &mut usize) -> Option<u8> {
    let byte = *buf.get(*cursor)?;
    *cursor += 1;
    Some(byte)
}

fn decode_u64_at(buf: &[u8], cursor: &mut usize) -> Option<u64> {
    let slice = buf.get(*cursor..*cursor + 8)?;
    *cursor += 8;
    Some(u64::from_le_bytes(slice.try_into().ok()?))
}

/// NUL-joined key list; simplest encoding that survives a path containing
/// any byte but NUL, which `validate_key` already guarantees for RDB keys.
fn encode_key_list(keys: &[String]) -> Vec<u8> {
    let mut out = Vec::new();
    for key in keys {
        out.extend_from_slice(key.as_bytes());
        out.push(0);
    }
    out
}

fn encode_key_types(pairs: &[(String, RdbValueType)]) -> Vec<u8> {
    let mut out = Vec::new();
    for (key, value_type) in pairs {
        out.extend_from_slice(key.as_bytes());
        out.push(0);
        out.push(*value_type as u8);
    }
    out
}
