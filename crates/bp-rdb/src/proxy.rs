use crate::types::RdbValueType;

/// Remote RDB operations a proxy value needs. Implemented by whatever
/// actually carries requests to the server (an RPC client, in `bp-server`),
/// so this crate never depends on `bp-rpc` directly — the client-side
/// mirror of [`crate::events::EventEmitter`] and `bp_evt::EventControlChannel`.
pub trait RdbControlChannel: Send + Sync {
    fn create(&self, key: &str, value_type: RdbValueType, count: u64) -> bool;
    fn delete(&self, key: &str) -> bool;
    fn exists(&self, key: &str) -> bool;
    fn read(&self, key: &str) -> Option<Vec<u8>>;
    fn write(&self, key: &str, data: &[u8]) -> bool;
    fn metadata(&self, key: &str) -> Option<RdbValueType>;
    fn list_subkeys(&self, dir: &str) -> Vec<String>;
    fn watch(&self, glob: &str) -> String;
    fn unwatch(&self, glob: &str) -> Option<String>;
}

/// Subscribes a callback to an event name and tears it back down — the
/// client-side mirror of `bp_evt::EventClient::subscribe`/`unsubscribe`,
/// injected so this crate never depends on `bp-evt` directly.
pub trait EventSubscribeChannel: Send + Sync {
    fn subscribe(&self, event_name: &str, callback: Box<dyn Fn(&[u8]) + Send + Sync>) -> bool;
    fn unsubscribe(&self, event_name: &str) -> bool;
}

/// A typed handle bound to one key, read and written through an
/// [`RdbControlChannel`]. Construct once, call `get_*`/`set_*` as often as
/// needed — mirrors the source's `RdbValue` proxy object, which resolves a
/// key once and then reads/writes it directly.
pub struct RdbProxyValue<'a, C: RdbControlChannel + ?Sized, E: EventSubscribeChannel + ?Sized> {
    channel: &'a C,
    events: &'a E,
    key: String,
}

impl<'a, C: RdbControlChannel + ?Sized, E: EventSubscribeChannel + ?Sized> RdbProxyValue<'a, C, E> {
    pub fn new(channel: &'a C, events: &'a E, key: impl Into<String>) -> Self {
        Self { channel, events, key: key.into() }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn exists(&self) -> bool {
        self.channel.exists(&self.key)
    }

    pub fn create(&self, value_type: RdbValueType, count: u64) -> bool {
        self.channel.create(&self.key, value_type, count)
    }

    pub fn delete(&self) -> bool {
        self.channel.delete(&self.key)
    }

    pub fn metadata(&self) -> Option<RdbValueType> {
        self.channel.metadata(&self.key)
    }

    pub fn read_raw(&self) -> Option<Vec<u8>> {
        self.channel.read(&self.key)
    }

    pub fn write_raw(&self, data: &[u8]) -> bool {
        self.channel.write(&self.key, data)
    }

    /// Watches this key, mirroring the source's `RdbProxyValue::watch`: a
    /// single call that resolves the event name through `RDB_WATCH` and
    /// subscribes `callback` to it, rather than leaving the caller to issue
    /// the subscribe step itself.
    pub fn watch(&self, callback: impl Fn(&[u8]) + Send + Sync + 'static) -> bool {
        let event_name = self.channel.watch(&self.key);
        self.events.subscribe(&event_name, Box::new(callback))
    }

    /// Undoes [`Self::watch`]: drops the server-side pattern and, if it was
    /// still installed, unsubscribes the local callback from its event.
    pub fn unwatch(&self) -> bool {
        match self.channel.unwatch(&self.key) {
            Some(event_name) => self.events.unsubscribe(&event_name),
            None => false,
        }
    }
}

macro_rules! scalar_accessor {
    ($get:ident, $set:ident, $ty:ty) => {
        impl<'a, C: RdbControlChannel + ?Sized, E: EventSubscribeChannel + ?Sized> RdbProxyValue<'a, C, E> {
            pub fn $get(&self) -> Option<$ty> {
                let bytes = self.read_raw()?;
                Some(<$ty>::from_le_bytes(bytes.try_into().ok()?))
            }

            pub fn $set(&self, value: $ty) -> bool {
                self.write_raw(&value.to_le_bytes())
            }
        }
    };
}

scalar_accessor!(get_i8, set_i8, i8);
scalar_accessor!(get_i16, set_i16, i16);
scalar_accessor!(get_i32, set_i32, i32);
scalar_accessor!(get_i64, set_i64, i64);
scalar_accessor!(get_u8, set_u8, u8);
scalar_accessor!(get_u16, set_u16, u16);
scalar_accessor!(get_u32, set_u32, u32);
scalar_accessor!(get_u64, set_u64, u64);
scalar_accessor!(get_f32, set_f32, f32);
scalar_accessor!(get_f64, set_f64, f64);

impl<'a, C: RdbControlChannel + ?Sized, E: EventSubscribeChannel + ?Sized> RdbProxyValue<'a, C, E> {
    pub fn get_bool(&self) -> Option<bool> {
        Some(self.read_raw()?.first().copied()? != 0)
    }

    pub fn set_bool(&self, value: bool) -> bool {
        self.write_raw(&[value as u8])
    }

    /// Reads a `String` entry's fixed-width buffer back to its NUL-trimmed
    /// text.
    pub fn get_string(&self) -> Option<String> {
        let bytes = self.read_raw()?;
        let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
        String::from_utf8(bytes[..end].to_vec()).ok()
    }

    /// Writes `value` into a `String` entry's fixed-width buffer,
    /// truncating and NUL-padding to [`crate::types::RDB_MAX_STRING_SIZE`].
    pub fn set_string(&self, value: &str) -> bool {
        use crate::types::RDB_MAX_STRING_SIZE;
        let mut buf = vec![0u8; RDB_MAX_STRING_SIZE];
        let bytes = value.as_bytes();
        let len = bytes.len().min(RDB_MAX_STRING_SIZE);
        buf[..len].copy_from_slice(&bytes[..len]);
        self.write_raw(&buf)
    }
}
