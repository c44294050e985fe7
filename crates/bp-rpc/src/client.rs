use std::{
    sync::{
        Arc, Mutex,
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
use tracing::debug;

use crate::wire::{
    MessageId, RESPONSE_HEADER_SIZE, ProcedureId, REQUEST_HEADER_SIZE, RequestHeader,
    ResponseHeader, Status,
};

const RX_STREAM_CAPACITY: usize = 256 * 1024;
const RX_CHUNK_SIZE: usize = 16 * 1024;

#[derive(Debug, Error)]
pub enum RpcClientError {
    #[error("transport error: {0}")]
    Socket(#[from] SocketError),
    #[error("connection closed before a response arrived")]
    Disconnected,
}

/// Outbound RPC call + response correlation for a single server connection.
/// At most one call may be in flight per thread: responses are popped off a
/// LIFO return-stack fed by a background frame-parsing thread, which only
/// works because the caller never pipelines requests.
pub struct RpcClient {
    client_id: ClientId,
    send_socket: Mutex<Socket>,
    return_stack: Arc<BufferStack>,
    next_message_id: AtomicU64,
    shutdown: Arc<AtomicBool>,
    receiver: Option<JoinHandle<()>>,
}

impl RpcClient {
    pub fn connect(
        addr: impl std::net::ToSocketAddrs,
        client_id: ClientId,
    ) -> Result<Self, RpcClientError> {
        let send_socket = Socket::connect(addr, None)?;
        let mut recv_socket = send_socket.try_clone()?;

        let return_stack = Arc::new(BufferStack::new());
        let shutdown = Arc::new(AtomicBool::new(false));

        let receiver = {
            let return_stack = return_stack.clone();
            let shutdown = shutdown.clone();
            std::thread::spawn(move || response_loop(&mut recv_socket, &return_stack, &shutdown))
        };

        Ok(Self {
            client_id,
            send_socket: Mutex::new(send_socket),
            return_stack,
            next_message_id: AtomicU64::new(1),
            shutdown,
            receiver: Some(receiver),
        })
    }

    /// Serializes `payload`, writes one request frame, then blocks for the
    /// matching response.
    pub fn call(&self, procedure: ProcedureId, payload: &[u8]) -> Result<(Status, Vec<u8>), RpcClientError> {
        self.send_request(procedure, payload)?;
        let frame = self.return_stack.pop().ok_or(RpcClientError::Disconnected)?;
        let header = ResponseHeader::decode(&frame);
        let body = frame[RESPONSE_HEADER_SIZE..].to_vec();
        Ok((header.status, body))
    }

    /// Fire-and-forget: writes the request and returns without waiting for
    /// a response frame.
    pub fn call_void(&self, procedure: ProcedureId, payload: &[u8]) -> Result<(), RpcClientError> {
        self.send_request(procedure, payload)
    }

    fn send_request(&self, procedure: ProcedureId, payload: &[u8]) -> Result<(), RpcClientError> {
        let message: MessageId = self.next_message_id.fetch_add(1, Ordering::Relaxed);
        let header = RequestHeader {
            client: self.client_id,
            procedure,
            message,
            payload_size: payload.len() as u32,
        };
        let mut buf = [0u8; REQUEST_HEADER_SIZE];
        header.encode(&mut buf);

        let mut socket = self.send_socket.lock().unwrap();
        socket.send_bytes(&buf)?;
        if !payload.is_empty() {
            socket.send_bytes(payload)?;
        }
        Ok(())
    }

    pub fn shutdown(&mut self) {
        self.shutdown.store(true, Ordering::Release);
        self.return_stack.unblock();
        if let Some(handle) = self.receiver.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for RpcClient {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn response_loop(socket: &mut Socket, return_stack: &BufferStack, shutdown: &AtomicBool) {
    thread_boot(None, ThreadPriority::OSDefault);
    let stream = ByteStream::new(RX_STREAM_CAPACITY);
    let mut buf = [0u8; RX_CHUNK_SIZE];

    'outer: loop {
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
                debug!("rpc client: server disconnected");
                break;
            }
        }

        while let Some(frame) = stream.try_fetch(RESPONSE_HEADER_SIZE, ResponseHeader::payload_len_at)
        {
            return_stack.push(frame);
            if shutdown.load(Ordering::Acquire) {
                break 'outer;
            }
        }
    }
    return_stack.unblock();
}
