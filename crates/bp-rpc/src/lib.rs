//! Synchronous request/response RPC transport: a fixed binary header,
//! a procedure registry dispatched by id, and a thread-per-connection
//! server and client.

pub mod blob;
pub mod client;
pub mod registry;
pub mod server;
pub mod wire;

pub use blob::GenericBlob;
pub use client::{RpcClient, RpcClientError};
pub use registry::{PermissionCheck, ProcedureEntry, ProcedureOutcome, RpcRegistry};
pub use server::RpcServer;
pub use wire::{MessageId, ProcedureId, RequestHeader, ResponseHeader, Status};
