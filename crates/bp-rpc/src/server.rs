use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    thread::JoinHandle,
};

use bp_net::{
    ClientId,
    bytestream::ByteStream,
    socket::{Listener, RECV_POLL_GRANULARITY, RecvOutcome, Socket, SocketError},
};
use bp_utils::{ThreadPriority, thread_boot};
use tracing::{debug, info, warn};

use crate::{
    registry::RpcRegistry,
    wire::{REQUEST_HEADER_SIZE, RESPONSE_HEADER_SIZE, RequestHeader, ResponseHeader},
};

const RX_STREAM_CAPACITY: usize = 256 * 1024;
const RX_CHUNK_SIZE: usize = 16 * 1024;

struct Connection {
    stream: Arc<ByteStream>,
    receiver: JoinHandle<()>,
    worker: JoinHandle<()>,
}

type ConnectionMap = Arc<Mutex<HashMap<ClientId, Connection>>>;

/// Acceptor + one receiver/dispatcher thread pair per connection. A request
/// is handled synchronously: the worker that fetched the frame writes the
/// response directly back, since RPC has no pipelining to correlate out of
/// order.
pub struct RpcServer {
    listener: Listener,
    registry: Arc<RpcRegistry>,
    next_client_id: AtomicU64,
    shutdown: Arc<AtomicBool>,
    connections: ConnectionMap,
}

impl RpcServer {
    pub fn bind(
        addr: impl std::net::ToSocketAddrs,
        registry: RpcRegistry,
    ) -> Result<Self, SocketError> {
        let listener = Listener::bind_listen(addr)?;
        listener.set_nonblocking(true)?;
        Ok(Self {
            listener,
            registry: Arc::new(registry),
            next_client_id: AtomicU64::new(1),
            shutdown: Arc::new(AtomicBool::new(false)),
            connections: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    pub fn local_addr(&self) -> Result<std::net::SocketAddr, SocketError> {
        self.listener.local_addr()
    }

    /// Runs the acceptor loop until `shutdown()` is called. Intended to be
    /// run on its own thread.
    pub fn run(&self) {
        thread_boot(None, ThreadPriority::OSDefault);
        info!(addr = ?self.listener.local_addr().ok(), "rpc: listening");
        loop {
            if self.shutdown.load(Ordering::Acquire) {
                break;
            }
            match self.listener.accept_with_poll(RECV_POLL_GRANULARITY) {
                Ok(Some(socket)) => self.spawn_connection(socket),
                Ok(None) => continue,
                Err(err) => warn!(?err, "rpc: accept error"),
            }
        }
        info!("rpc: acceptor stopped");
    }

    fn spawn_connection(&self, socket: Socket) {
        let client = ClientId(self.next_client_id.fetch_add(1, Ordering::Relaxed));
        let peer = socket.peer_addr();
        info!(%client, %peer, "rpc: client connected");

        let recv_socket = socket;
        let send_socket = match recv_socket.try_clone() {
            Ok(s) => s,
            Err(err) => {
                warn!(?err, "rpc: failed to clone socket for connection");
                return;
            }
        };

        let stream = Arc::new(ByteStream::new(RX_STREAM_CAPACITY));
        let shutdown = self.shutdown.clone();

        let receiver = {
            let stream = stream.clone();
            let mut recv_socket = recv_socket;
            std::thread::spawn(move || receiver_loop(client, &mut recv_socket, &stream, &shutdown))
        };

        let worker = {
            let stream = stream.clone();
            let registry = self.registry.clone();
            let connections = self.connections.clone();
            let mut send_socket = send_socket;
            std::thread::spawn(move || {
                worker_loop(client, &stream, &registry, &mut send_socket);
                stream.unblock();
                // Opportunistic disconnect cleanup: remove our own entry,
                // including this thread's own JoinHandle, and join the
                // receiver we know has already been told to stop.
                if let Some(conn) = connections.lock().unwrap().remove(&client) {
                    let _ = conn.receiver.join();
                }
                debug!(%client, "rpc: connection closed");
            })
        };

        self.connections.lock().unwrap().insert(client, Connection { stream, receiver, worker });
    }

    /// Unblocks every still-connected client's byte-stream and joins its
    /// workers, then stops the acceptor loop. Clients that disconnected
    /// earlier already cleaned themselves up.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Release);
        let connections = std::mem::take(&mut *self.connections.lock().unwrap());
        for (client, conn) in connections {
            conn.stream.unblock();
            let _ = conn.receiver.join();
            let _ = conn.worker.join();
            debug!(%client, "rpc: connection drained");
        }
    }

    pub fn connection_count(&self) -> usize {
        self.connections.lock().unwrap().len()
    }
}

fn receiver_loop(client: ClientId, socket: &mut Socket, stream: &ByteStream, shutdown: &AtomicBool) {
    thread_boot(None, ThreadPriority::OSDefault);
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
                debug!(%client, "rpc: receiver observed disconnect");
                break;
            }
        }
    }
    stream.unblock();
}

fn worker_loop(client: ClientId, stream: &ByteStream, registry: &RpcRegistry, socket: &mut Socket) {
    thread_boot(None, ThreadPriority::OSDefault);
    while let Some(frame) = stream.fetch(REQUEST_HEADER_SIZE, RequestHeader::payload_len_at) {
        let header = RequestHeader::decode(&frame);
        let payload = &frame[REQUEST_HEADER_SIZE..];

        if header.payload_size as usize != payload.len() {
            warn!(%client, "rpc: payload size mismatch, dropping frame");
            continue;
        }

        let (status, body) = registry.dispatch(client, header.procedure, payload);

        let response_header = ResponseHeader { status, payload_size: body.len() as u32 };
        let mut header_buf = [0u8; RESPONSE_HEADER_SIZE];
        response_header.encode(&mut header_buf);

        let send_ok = socket.send_bytes(&header_buf).is_ok()
            && (body.is_empty() || socket.send_bytes(&body).is_ok());
        if !send_ok {
            debug!(%client, "rpc: send failed, ending worker");
            break;
        }
    }
}
