use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex, RwLock,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    thread::JoinHandle,
};

use bp_net::{
    BufferStack, ByteStream, ClientId,
    socket::{RecvOutcome, Socket, SocketError},
};
use bp_utils::{ThreadPriority, thread_boot};
use thiserror::Error;
use tracing::{debug, error, trace, warn};

use crate::{
    hooks::GETCLIENTMETA_EVENT,
    wire::{EVENT_HEADER_SIZE, EventHeader, EventId, MessageId},
};

const RX_STREAM_CAPACITY: usize = 256 * 1024;
const RX_CHUNK_SIZE: usize = 16 * 1024;

#[derive(Debug, Error)]
pub enum EventClientError {
    #[error("transport error: {0}")]
    Socket(#[from] SocketError),
    #[error("server rejected registration for event {0:?}")]
    RegisterFailed(String),
}

/// The RPC procedures an event client needs to resolve and manage
/// subscriptions through (`register`, `getid`, `subscribe`, `unsubscribe`),
/// injected so this crate never depends on `bp-rpc` directly — mirrors
/// `RdbSink`'s decoupling of the event bus from the KV store.
pub trait EventControlChannel: Send + Sync {
    fn register(&self, name: &str) -> bool;
    fn get_id(&self, name: &str) -> EventId;
    fn subscribe(&self, name: &str) -> bool;
    fn unsubscribe(&self, name: &str) -> bool;
}

type Callback = Box<dyn Fn(&[u8]) + Send + Sync>;

/// A connected event-bus peer: one thread draining the inbound socket and
/// invoking local callbacks by event id, one thread draining an outbound
/// emit stack. `findEvent` in the original is `local_ids`'s read-then-ask
/// cache here.
pub struct EventClient {
    client_id: ClientId,
    control: Arc<dyn EventControlChannel>,
    local_ids: RwLock<HashMap<String, EventId>>,
    callbacks: Arc<Mutex<HashMap<EventId, Callback>>>,
    emit_stack: Arc<BufferStack>,
    next_message_id: AtomicU64,
    shutdown: Arc<AtomicBool>,
    listener: Option<JoinHandle<()>>,
    emitter: Option<JoinHandle<()>>,
}

impl EventClient {
    pub fn connect(
        addr: impl std::net::ToSocketAddrs,
        client_id: ClientId,
        control: Arc<dyn EventControlChannel>,
        binary_name: &str,
        hostname: &str,
    ) -> Result<Self, EventClientError> {
        let client = Self::connect_raw(addr, client_id, control)?;
        let meta = format!("{binary_name}@{hostname}");
        client.emit(GETCLIENTMETA_EVENT, meta.as_bytes());
        Ok(client)
    }

    /// Connects without sending a non-empty `getclientmeta` handshake,
    /// marking this connection as a ghost client on the server: excluded
    /// from statistics and presence, used by transient tools.
    pub fn connect_ghost(
        addr: impl std::net::ToSocketAddrs,
        client_id: ClientId,
        control: Arc<dyn EventControlChannel>,
    ) -> Result<Self, EventClientError> {
        let client = Self::connect_raw(addr, client_id, control)?;
        client.emit(GETCLIENTMETA_EVENT, &[]);
        Ok(client)
    }

    fn connect_raw(
        addr: impl std::net::ToSocketAddrs,
        client_id: ClientId,
        control: Arc<dyn EventControlChannel>,
    ) -> Result<Self, EventClientError> {
        let send_socket = Socket::connect(addr, None)?;
        let mut recv_socket = send_socket.try_clone()?;

        let emit_stack = Arc::new(BufferStack::new());
        let callbacks: Arc<Mutex<HashMap<EventId, Callback>>> = Arc::new(Mutex::new(HashMap::new()));
        let shutdown = Arc::new(AtomicBool::new(false));

        let listener = {
            let callbacks = callbacks.clone();
            let shutdown = shutdown.clone();
            std::thread::spawn(move || listen_loop(&mut recv_socket, &callbacks, &shutdown))
        };

        let emitter = {
            let emit_stack = emit_stack.clone();
            let shutdown = shutdown.clone();
            let mut send_socket = send_socket;
            std::thread::spawn(move || emit_loop(&mut send_socket, &emit_stack, &shutdown))
        };

        Ok(Self {
            client_id,
            control,
            local_ids: RwLock::new(HashMap::new()),
            callbacks,
            emit_stack,
            next_message_id: AtomicU64::new(1),
            shutdown,
            listener: Some(listener),
            emitter: Some(emitter),
        })
    }

    /// Resolves `name` to a server-assigned id, asking the control channel
    /// and caching the result on first use.
    fn find_event(&self, name: &str) -> EventId {
        if let Some(&id) = self.local_ids.read().unwrap().get(name) {
            return id;
        }
        let id = self.control.get_id(name);
        if id != 0 {
            self.local_ids.write().unwrap().insert(name.to_string(), id);
        }
        id
    }

    /// Registers `name` as a new event with the server, caching its id
    /// locally. A no-op success if the name is already registered
    /// elsewhere — only the id lookup needs to succeed.
    pub fn register(&self, name: &str) -> Result<EventId, EventClientError> {
        if !self.control.register(name) {
            trace!(name, "evt client: register returned false, assuming already registered");
        }
        let id = self.control.get_id(name);
        if id == 0 {
            return Err(EventClientError::RegisterFailed(name.to_string()));
        }
        self.local_ids.write().unwrap().insert(name.to_string(), id);
        Ok(id)
    }

    /// Pushes an event frame onto the outbound emit stack: queued, not
    /// sent, on return. `false` if the event name can't be resolved to an
    /// id — the error-handling design surfaces emit failures as a boolean,
    /// not a `Result`.
    pub fn emit(&self, name: &str, payload: &[u8]) -> bool {
        let id = self.find_event(name);
        if id == 0 {
            error!(name, "evt client: failed to find event id, emit aborted");
            return false;
        }
        let message: MessageId = self.next_message_id.fetch_add(1, Ordering::Relaxed);
        let header = EventHeader { client: self.client_id, event: id, message, payload_size: payload.len() as u32 };
        self.emit_stack.push(header.encode_frame(payload));
        true
    }

    /// Subscribes to `name` via the control channel and installs `callback`
    /// for frames matching its id. Replaces an existing callback for the
    /// same event with a warning — only one callback per event is allowed.
    pub fn subscribe(&self, name: &str, callback: impl Fn(&[u8]) + Send + Sync + 'static) -> bool {
        let id = self.find_event(name);
        if id == 0 {
            error!(name, "evt client: cannot subscribe, event not found");
            return false;
        }
        if !self.control.subscribe(name) {
            error!(name, "evt client: server refused subscription");
            return false;
        }
        let mut callbacks = self.callbacks.lock().unwrap();
        if callbacks.insert(id, Box::new(callback)).is_some() {
            warn!(name, "evt client: replacing existing callback, only one allowed per event");
        }
        true
    }

    pub fn unsubscribe(&self, name: &str) -> bool {
        let id = self.find_event(name);
        if id == 0 {
            return false;
        }
        if !self.control.unsubscribe(name) {
            error!(name, "evt client: server refused unsubscribe");
            return false;
        }
        self.callbacks.lock().unwrap().remove(&id);
        true
    }

    pub fn unsubscribe_all(&self) {
        let names: Vec<String> = self.local_ids.read().unwrap().keys().cloned().collect();
        for name in names {
            self.unsubscribe(&name);
        }
    }

    pub fn shutdown(&mut self) {
        self.shutdown.store(true, Ordering::Release);
        self.emit_stack.unblock();
        if let Some(handle) = self.listener.take() {
            let _ = handle.join();
        }
        if let Some(handle) = self.emitter.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for EventClient {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn listen_loop(socket: &mut Socket, callbacks: &Mutex<HashMap<EventId, Callback>>, shutdown: &AtomicBool) {
    thread_boot(None, ThreadPriority::OSDefault);
    let stream = ByteStream::new(RX_STREAM_CAPACITY);
    let mut buf = [0u8; RX_CHUNK_SIZE];

    loop {
        if shutdown.load(Ordering::Acquire) {
            break;
        }
        match socket.recv_bytes(&mut buf) {
            RecvOutcome::Ok(n) => {
                if !stream.push(&buf[..n]) {
                    break;
                }
            }
            RecvOutcome::Timeout => continue,
            RecvOutcome::Disconnected => {
                debug!("evt client: server disconnected");
                break;
            }
        }

        while let Some(frame) = stream.try_fetch(EVENT_HEADER_SIZE, EventHeader::payload_len_at) {
            let header = EventHeader::decode(&frame);
            trace!(event = header.event, client = %header.client, "evt client: received event");
            if let Some(callback) = callbacks.lock().unwrap().get(&header.event) {
                callback(&frame[EVENT_HEADER_SIZE..]);
            }
        }
    }
}

fn emit_loop(socket: &mut Socket, emit_stack: &BufferStack, shutdown: &AtomicBool) {
    thread_boot(None, ThreadPriority::OSDefault);
    while let Some(frame) = emit_stack.pop() {
        if shutdown.load(Ordering::Acquire) {
            break;
        }
        if socket.send_bytes(&frame).is_err() {
            debug!("evt client: send failed, ending emitter");
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;

    struct StubControl {
        ids: Mutex<HashMap<String, EventId>>,
        next: AtomicU64,
    }

    impl StubControl {
        fn new() -> Self {
            Self { ids: Mutex::new(HashMap::new()), next: AtomicU64::new(1) }
        }
    }

    impl EventControlChannel for StubControl {
        fn register(&self, name: &str) -> bool {
            let mut ids = self.ids.lock().unwrap();
            if ids.contains_key(name) {
                return false;
            }
            let id = self.next.fetch_add(1, Ordering::Relaxed) as EventId;
            ids.insert(name.to_string(), id);
            true
        }

        fn get_id(&self, name: &str) -> EventId {
            self.ids.lock().unwrap().get(name).copied().unwrap_or(0)
        }

        fn subscribe(&self, _name: &str) -> bool {
            true
        }

        fn unsubscribe(&self, _name: &str) -> bool {
            true
        }
    }

    #[test]
    fn register_caches_id_locally() {
        let control = Arc::new(StubControl::new());
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        std::thread::spawn(move || {
            let _ = listener.accept();
            std::thread::sleep(std::time::Duration::from_millis(200));
        });

        let client = EventClient::connect_raw(addr, ClientId(1), control).unwrap();
        let id = client.register("demo::event").unwrap();
        assert_ne!(id, 0);
        assert_eq!(client.local_ids.read().unwrap().get("demo::event"), Some(&id));
    }

    #[test]
    fn subscribe_without_registration_fails() {
        let control = Arc::new(StubControl::new());
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        std::thread::spawn(move || {
            let _ = listener.accept();
            std::thread::sleep(std::time::Duration::from_millis(200));
        });

        let client = EventClient::connect_raw(addr, ClientId(1), control).unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();
        assert!(!client.subscribe("never::registered", move |_| {
            calls_clone.fetch_add(1, Ordering::SeqCst);
        }));
    }
}
