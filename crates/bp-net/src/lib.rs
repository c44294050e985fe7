pub mod bufferstack;
pub mod bytestream;
pub mod caller;
pub mod hash;
pub mod pattern;
pub mod socket;

pub use bufferstack::BufferStack;
pub use bytestream::ByteStream;
pub use caller::{CallerContext, ClientId, current_caller, set_current_caller};
pub use socket::{Listener, RecvOutcome, Socket, SocketError};
