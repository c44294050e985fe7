use std::sync::{Condvar, Mutex};

struct Inner {
    stack: Vec<Vec<u8>>,
    unblocked: bool,
}

/// LIFO outbound queue. `pop` returns the most recently pushed frame first:
/// under backpressure a slow sender drops the oldest undelivered frames
/// rather than the newest, which favors a continuously-refreshed sensor
/// stream over strict delivery order.
pub struct BufferStack {
    inner: Mutex<Inner>,
    cv: Condvar,
}

impl Default for BufferStack {
    fn default() -> Self {
        Self::new()
    }
}

impl BufferStack {
    pub fn new() -> Self {
        Self { inner: Mutex::new(Inner { stack: Vec::new(), unblocked: false }), cv: Condvar::new() }
    }

    pub fn push(&self, data: Vec<u8>) {
        let mut inner = self.inner.lock().unwrap();
        inner.stack.push(data);
        self.cv.notify_one();
    }

    /// Blocks until a frame is available or the stack is unblocked.
    pub fn pop(&self) -> Option<Vec<u8>> {
        let mut inner = self.inner.lock().unwrap();
        loop {
            if let Some(frame) = inner.stack.pop() {
                return Some(frame);
            }
            if inner.unblocked {
                return None;
            }
            inner = self.cv.wait(inner).unwrap();
        }
    }

    pub fn unblock(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.unblocked = true;
        self.cv.notify_all();
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().stack.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
