/// Minimal emit surface the store needs into the event bus, injected at
/// server startup so this crate never depends on `bp-evt` directly —
/// the other half of the decoupling `bp_evt::RdbSink` applies in reverse
/// (event-bus-writes-RDB / RDB-writes-emit-events would otherwise be a
/// cyclic crate dependency).
pub trait EventEmitter: Send + Sync {
    /// Registers `name` as an event with the bus, idempotently.
    fn register(&self, name: &str) -> bool;

    /// Emits `payload` under `name`. Returns whether the event had any
    /// subscribers.
    fn emit(&self, name: &str, payload: &[u8]) -> bool;
}

/// `EventEmitter` that drops every emit; used where no event bus is wired
/// up (unit tests, a bare store).
#[derive(Default)]
pub struct NullEventEmitter;

impl EventEmitter for NullEventEmitter {
    fn register(&self, _name: &str) -> bool {
        true
    }

    fn emit(&self, _name: &str, _payload: &[u8]) -> bool {
        false
    }
}
