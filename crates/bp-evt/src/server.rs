use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    thread::JoinHandle,
};

use bp_net::{
    BufferStack, ByteStream, ClientId,
    socket::{Listener, RECV_POLL_GRANULARITY, RecvOutcome, Socket, SocketError},
};
use bp_utils::{ThreadPriority, thread_boot};
use tracing::{debug, info, warn};

use crate::{
    hooks::{GETCLIENTMETA_EVENT, GhostSet, HookRegistry, RdbSink},
    registry::EventRegistry,
    stats::ClientStats,
    wire::{EVENT_HEADER_SIZE, EventHeader, EventId},
};

const RX_STREAM_CAPACITY: usize = 256 * 1024;
const RX_CHUNK_SIZE: usize = 16 * 1024;

struct Connection {
    inbound: Arc<ByteStream>,
    outbound: Arc<BufferStack>,
    receiver: JoinHandle<()>,
    dispatcher: JoinHandle<()>,
    sender: JoinHandle<()>,
}

type ConnectionMap = Arc<Mutex<HashMap<ClientId, Connection>>>;

/// Named pub/sub event bus: acceptor plus a receiver/dispatcher/sender
/// thread triple per connection. Incoming frames are relayed to every
/// subscriber of their event id; outgoing frames are drained from a
/// per-client LIFO outbound stack fed by `emit`/`relay`.
pub struct EventServer {
    listener: Listener,
    registry: Arc<EventRegistry>,
    hooks: Arc<HookRegistry>,
    ghosts: Arc<GhostSet>,
    stats: Arc<ClientStats>,
    sink: Arc<dyn RdbSink>,
    next_client_id: AtomicU64,
    shutdown: Arc<AtomicBool>,
    connections: ConnectionMap,
}

impl EventServer {
    pub fn bind(addr: impl std::net::ToSocketAddrs, sink: Arc<dyn RdbSink>) -> Result<Self, SocketError> {
        let listener = Listener::bind_listen(addr)?;
        listener.set_nonblocking(true)?;

        let registry = Arc::new(EventRegistry::new());
        let hooks = Arc::new(HookRegistry::new());
        let ghosts = Arc::new(GhostSet::new());

        registry.register(GETCLIENTMETA_EVENT);
        let meta_id = registry.get_id(GETCLIENTMETA_EVENT);
        {
            let ghosts = ghosts.clone();
            let sink = sink.clone();
            hooks.register(
                meta_id,
                Box::new(move |client, _eid, payload| {
                    on_client_connect_metadata(client, payload, &ghosts, sink.as_ref());
                }),
            );
        }

        Ok(Self {
            listener,
            registry,
            hooks,
            ghosts,
            stats: Arc::new(ClientStats::new()),
            sink,
            next_client_id: AtomicU64::new(1),
            shutdown: Arc::new(AtomicBool::new(false)),
            connections: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    pub fn local_addr(&self) -> Result<std::net::SocketAddr, SocketError> {
        self.listener.local_addr()
    }

    pub fn registry(&self) -> &Arc<EventRegistry> {
        &self.registry
    }

    pub fn stats(&self) -> &Arc<ClientStats> {
        &self.stats
    }

    /// Registers a server-side hook for `name`; `name` must already be
    /// registered as an event (the reserved events are registered by
    /// `bind`, application events by explicit `register` calls first).
    pub fn register_hook(
        &self,
        name: &str,
        hook: Box<dyn Fn(ClientId, EventId, &[u8]) + Send + Sync>,
    ) {
        let id = self.registry.get_id(name);
        if id == 0 {
            warn!(name, "evt: cannot register hook, event not registered");
            return;
        }
        self.hooks.register(id, hook);
    }

    /// Server-initiated emit (ClientId is always `0`). `false` if the event
    /// is unknown or has no subscribers — cheap and silent either way.
    pub fn emit(&self, name: &str, payload: &[u8]) -> bool {
        let id = self.registry.get_id(name);
        if id == 0 {
            return false;
        }
        self.emit_by_id(id, payload)
    }

    pub fn emit_by_id(&self, id: EventId, payload: &[u8]) -> bool {
        let subscribers = self.registry.subscribers(id);
        if subscribers.is_empty() {
            return false;
        }

        let header = EventHeader { client: ClientId::SERVER, event: id, message: 0, payload_size: payload.len() as u32 };
        let frame = header.encode_frame(payload);

        let connections = self.connections.lock().unwrap();
        for subscriber in subscribers {
            if let Some(conn) = connections.get(&subscriber) {
                conn.outbound.push(frame.clone());
            }
        }
        true
    }

    pub fn run(&self) {
        thread_boot(None, ThreadPriority::OSDefault);
        info!(addr = ?self.listener.local_addr().ok(), "evt: listening");
        loop {
            if self.shutdown.load(Ordering::Acquire) {
                break;
            }
            match self.listener.accept_with_poll(RECV_POLL_GRANULARITY) {
                Ok(Some(socket)) => self.spawn_connection(socket),
                Ok(None) => continue,
                Err(err) => warn!(?err, "evt: accept error"),
            }
        }
        info!("evt: acceptor stopped");
    }

    fn spawn_connection(&self, socket: Socket) {
        let client = ClientId(self.next_client_id.fetch_add(1, Ordering::Relaxed));
        let peer = socket.peer_addr();
        info!(%client, %peer, "evt: client connected");

        self.stats.register(client);

        let recv_socket = socket;
        let send_socket = match recv_socket.try_clone() {
            Ok(s) => s,
            Err(err) => {
                warn!(?err, "evt: failed to clone socket for connection");
                return;
            }
        };

        let inbound = Arc::new(ByteStream::new(RX_STREAM_CAPACITY));
        let outbound = Arc::new(BufferStack::new());
        let shutdown = self.shutdown.clone();

        let receiver = {
            let inbound = inbound.clone();
            let mut recv_socket = recv_socket;
            std::thread::spawn(move || receiver_loop(client, &mut recv_socket, &inbound, &shutdown))
        };

        let dispatcher = {
            let inbound = inbound.clone();
            let outbound_self = outbound.clone();
            let registry = self.registry.clone();
            let hooks = self.hooks.clone();
            let ghosts = self.ghosts.clone();
            let stats = self.stats.clone();
            let sink = self.sink.clone();
            let connections = self.connections.clone();
            std::thread::spawn(move || {
                dispatch_loop(client, &inbound, &registry, &hooks, &ghosts, &stats, &connections);
                outbound_self.unblock();
                on_client_disconnect(client, &registry, &ghosts, &stats, sink.as_ref());
                debug!(%client, "evt: dispatcher exited");
            })
        };

        let sender = {
            let outbound = outbound.clone();
            let ghosts = self.ghosts.clone();
            let stats = self.stats.clone();
            let connections = self.connections.clone();
            let mut send_socket = send_socket;
            std::thread::spawn(move || {
                sender_loop(client, &outbound, &mut send_socket, &ghosts, &stats);
                if let Some(conn) = connections.lock().unwrap().remove(&client) {
                    let _ = conn.receiver.join();
                    let _ = conn.dispatcher.join();
                }
                debug!(%client, "evt: connection closed");
            })
        };

        self.connections
            .lock()
            .unwrap()
            .insert(client, Connection { inbound, outbound, receiver, dispatcher, sender });
    }

    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Release);
        let connections = std::mem::take(&mut *self.connections.lock().unwrap());
        for (client, conn) in connections {
            conn.inbound.unblock();
            conn.outbound.unblock();
            let _ = conn.receiver.join();
            let _ = conn.dispatcher.join();
            let _ = conn.sender.join();
            debug!(%client, "evt: connection drained");
        }
    }

    pub fn connection_count(&self) -> usize {
        self.connections.lock().unwrap().len()
    }
}

fn receiver_loop(client: ClientId, socket: &mut Socket, inbound: &ByteStream, shutdown: &AtomicBool) {
    thread_boot(None, ThreadPriority::OSDefault);
    let mut buf = [0u8; RX_CHUNK_SIZE];
    loop {
        if shutdown.load(Ordering::Acquire) {
            break;
        }
        match socket.recv_bytes(&mut buf) {
            RecvOutcome::Ok(n) => {
                if !inbound.push(&buf[..n]) {
                    break;
                }
            }
            RecvOutcome::Timeout => continue,
            RecvOutcome::Disconnected => {
                debug!(%client, "evt: receiver observed disconnect");
                break;
            }
        }
    }
    inbound.unblock();
}

#[allow(clippy::too_many_arguments)]
fn dispatch_loop(
    client: ClientId,
    inbound: &ByteStream,
    registry: &EventRegistry,
    hooks: &HookRegistry,
    ghosts: &GhostSet,
    stats: &ClientStats,
    connections: &ConnectionMap,
) {
    thread_boot(None, ThreadPriority::OSDefault);
    while let Some(frame) = inbound.fetch(EVENT_HEADER_SIZE, EventHeader::payload_len_at) {
        let header = EventHeader::decode(&frame);
        let payload = &frame[EVENT_HEADER_SIZE..];

        if registry.name_of(header.event).is_none() {
            warn!(%client, event = header.event, "evt: unknown event id, dropping frame");
            continue;
        }

        for subscriber in registry.subscribers(header.event) {
            if let Some(conn) = connections.lock().unwrap().get(&subscriber) {
                conn.outbound.push(frame.clone());
            }
        }

        hooks.try_run(header.client, header.event, payload);

        if !ghosts.is_ghost(client) {
            stats.accumulate_upload(client, frame.len() as u32);
        }
    }
}

fn sender_loop(client: ClientId, outbound: &BufferStack, socket: &mut Socket, ghosts: &GhostSet, stats: &ClientStats) {
    thread_boot(None, ThreadPriority::OSDefault);
    while let Some(frame) = outbound.pop() {
        let len = frame.len();
        if socket.send_bytes(&frame).is_err() {
            debug!(%client, "evt: send failed, ending sender");
            break;
        }
        if !ghosts.is_ghost(client) {
            stats.accumulate_download(client, len as u32);
        }
    }
}

fn on_client_connect_metadata(client: ClientId, payload: &[u8], ghosts: &GhostSet, sink: &dyn RdbSink) {
    if payload.is_empty() {
        debug!(%client, "evt: ghost client");
        ghosts.mark(client);
        return;
    }
    let meta = String::from_utf8_lossy(payload);
    let meta = meta.trim_end_matches('\0');
    let (binary, host) = meta.split_once('@').unwrap_or((meta, ""));
    sink.register_backend(client, binary, host);
}

fn on_client_disconnect(client: ClientId, registry: &EventRegistry, ghosts: &GhostSet, stats: &ClientStats, sink: &dyn RdbSink) {
    registry.unsubscribe_all(client);

    if ghosts.is_ghost(client) {
        ghosts.remove(client);
        stats.remove(client);
        return;
    }

    sink.on_client_disconnect(client);
    stats.reset_for(client, sink);
    stats.remove(client);
}
