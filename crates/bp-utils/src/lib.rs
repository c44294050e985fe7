pub mod arrayvec;
pub mod assert;
pub mod directories;
pub mod thread;

pub use arrayvec::{ArrayStr, ArrayVec};
pub use thread::{ThreadPriority, thread_boot};
