//! Client-side control-channel adapters: the concrete wiring that lets
//! `bp_evt::EventClient` and `bp_rdb::RdbProxyValue` reach a running server
//! over real RPC sockets, rather than the traits they're generic over being
//! exercised only by test mocks.

use bp_evt::{EventClient, EventId};
use bp_rdb::{EventSubscribeChannel, RdbControlChannel, RdbValueType};
use bp_rpc::{GenericBlob, RpcClient, Status};

use crate::procedures;

/// Drives the event register/getid/subscribe/unsubscribe RPCs, resolving
/// `bp_evt::EventClient`'s control-channel dependency against a running
/// server instead of a local registry.
pub struct RpcEventControl(pub RpcClient);

impl bp_evt::EventControlChannel for RpcEventControl {
    fn register(&self, name: &str) -> bool {
        let payload = GenericBlob::new(name.as_bytes().to_vec()).encode();
        self.0.call(procedures::EVT_REGISTER, &payload).map(|(_, body)| body == [1]).unwrap_or(false)
    }

    fn get_id(&self, name: &str) -> EventId {
        let payload = GenericBlob::new(name.as_bytes().to_vec()).encode();
        match self.0.call(procedures::EVT_GET_ID, &payload) {
            Ok((_, body)) if body.len() == 2 => u16::from_le_bytes([body[0], body[1]]),
            _ => 0,
        }
    }

    fn subscribe(&self, name: &str) -> bool {
        let payload = GenericBlob::new(name.as_bytes().to_vec()).encode();
        self.0.call(procedures::EVT_SUBSCRIBE, &payload).map(|(_, body)| body == [1]).unwrap_or(false)
    }

    fn unsubscribe(&self, name: &str) -> bool {
        let payload = GenericBlob::new(name.as_bytes().to_vec()).encode();
        self.0.call(procedures::EVT_UNSUBSCRIBE, &payload).map(|(_, body)| body == [1]).unwrap_or(false)
    }
}

/// Drives the RDB direct-access and watch RPCs, resolving
/// `bp_rdb::RdbProxyValue`'s control-channel dependency against a running
/// server.
pub struct RpcRdbControl(pub RpcClient);

impl RdbControlChannel for RpcRdbControl {
    fn create(&self, key: &str, value_type: RdbValueType, count: u64) -> bool {
        let mut payload = GenericBlob::new(key.as_bytes().to_vec()).encode();
        payload.push(value_type as u8);
        payload.extend_from_slice(&count.to_le_bytes());
        matches!(self.0.call(procedures::RDB_CREATE_VALUE_DIRECT, &payload), Ok((Status::Ok, _)))
    }

    fn delete(&self, key: &str) -> bool {
        let payload = GenericBlob::new(key.as_bytes().to_vec()).encode();
        matches!(self.0.call(procedures::RDB_DELETE_VALUE_DIRECT, &payload), Ok((Status::Ok, _)))
    }

    fn exists(&self, key: &str) -> bool {
        let payload = GenericBlob::new(key.as_bytes().to_vec()).encode();
        match self.0.call(procedures::RDB_VALUE_EXISTS, &payload) {
            Ok((Status::Ok, body)) => body == [1],
            _ => false,
        }
    }

    fn read(&self, key: &str) -> Option<Vec<u8>> {
        let payload = GenericBlob::new(key.as_bytes().to_vec()).encode();
        match self.0.call(procedures::RDB_READ_VALUE_DIRECT, &payload) {
            Ok((Status::Ok, body)) => Some(body),
            _ => None,
        }
    }

    fn write(&self, key: &str, data: &[u8]) -> bool {
        let mut payload = GenericBlob::new(key.as_bytes().to_vec()).encode();
        payload.extend_from_slice(&GenericBlob::new(data.to_vec()).encode());
        matches!(self.0.call(procedures::RDB_WRITE_VALUE_DIRECT, &payload), Ok((Status::Ok, _)))
    }

    fn metadata(&self, key: &str) -> Option<RdbValueType> {
        let payload = GenericBlob::new(key.as_bytes().to_vec()).encode();
        match self.0.call(procedures::RDB_READ_KEY_METADATA, &payload) {
            Ok((Status::Ok, body)) => RdbValueType::from_u8(*body.first()?),
            _ => None,
        }
    }

    fn list_subkeys(&self, dir: &str) -> Vec<String> {
        let payload = GenericBlob::new(dir.as_bytes().to_vec()).encode();
        match self.0.call(procedures::RDB_LIST_SUBKEYS, &payload) {
            Ok((Status::Ok, body)) => {
                body.split(|&b| b == 0).filter(|s| !s.is_empty()).filter_map(|s| String::from_utf8(s.to_vec()).ok()).collect()
            }
            _ => Vec::new(),
        }
    }

    fn watch(&self, glob: &str) -> String {
        let payload = GenericBlob::new(glob.as_bytes().to_vec()).encode();
        match self.0.call(procedures::RDB_WATCH, &payload) {
            Ok((Status::Ok, body)) => String::from_utf8(body).unwrap_or_default(),
            _ => String::new(),
        }
    }

    fn unwatch(&self, glob: &str) -> Option<String> {
        let payload = GenericBlob::new(glob.as_bytes().to_vec()).encode();
        match self.0.call(procedures::RDB_UNWATCH, &payload) {
            Ok((Status::Ok, body)) => String::from_utf8(body).ok(),
            _ => None,
        }
    }
}

/// Bridges `bp_rdb::RdbProxyValue::watch`'s subscribe step onto a real
/// `EventClient`, the other half of the two-call watch-then-subscribe
/// sequence the RDB control channel starts.
pub struct EventClientSubscribe(pub EventClient);

impl EventSubscribeChannel for EventClientSubscribe {
    fn subscribe(&self, event_name: &str, callback: Box<dyn Fn(&[u8]) + Send + Sync>) -> bool {
        self.0.subscribe(event_name, move |payload| callback(payload))
    }

    fn unsubscribe(&self, event_name: &str) -> bool {
        self.0.unsubscribe(event_name)
    }
}
