use std::sync::{Condvar, Mutex};

struct Inner {
    buf: Vec<u8>,
    unblocked: bool,
}

/// Bounded buffer fed by a receiver thread and drained frame-by-frame by a
/// dispatcher thread. `push` blocks the producer while the buffer is full;
/// `fetch` blocks the consumer until a full frame (header + payload) is
/// present, then copies the frame out and compacts the remainder.
///
/// Both sides additionally wake on `unblock()`, returning `None`/`false`
/// instead of the usual result so the owning thread can exit cleanly during
/// shutdown.
pub struct ByteStream {
    capacity: usize,
    inner: Mutex<Inner>,
    cv: Condvar,
}

impl ByteStream {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            inner: Mutex::new(Inner { buf: Vec::with_capacity(capacity), unblocked: false }),
            cv: Condvar::new(),
        }
    }

    /// Appends `bytes`, blocking while doing so would exceed capacity.
    /// Returns `false` if the stream was unblocked while waiting.
    pub fn push(&self, bytes: &[u8]) -> bool {
        let mut inner = self.inner.lock().unwrap();
        loop {
            if inner.unblocked {
                return false;
            }
            if inner.buf.len() + bytes.len() <= self.capacity {
                break;
            }
            inner = self.cv.wait(inner).unwrap();
        }
        inner.buf.extend_from_slice(bytes);
        self.cv.notify_all();
        true
    }

    /// Extracts the next complete frame. `header_len` is the fixed header
    /// size; `payload_len_at` reads the payload-size field out of a header
    /// slice of that length. Blocks until a full frame is buffered or the
    /// stream is unblocked.
    pub fn fetch(
        &self,
        header_len: usize,
        payload_len_at: impl Fn(&[u8]) -> usize,
    ) -> Option<Vec<u8>> {
        let mut inner = self.inner.lock().unwrap();
        loop {
            if inner.buf.len() >= header_len {
                let total = header_len + payload_len_at(&inner.buf[..header_len]);
                if inner.buf.len() >= total {
                    let frame = inner.buf[..total].to_vec();
                    inner.buf.drain(..total);
                    self.cv.notify_all();
                    return Some(frame);
                }
            }
            if inner.unblocked {
                return None;
            }
            inner = self.cv.wait(inner).unwrap();
        }
    }

    /// Non-blocking variant of `fetch`: returns `None` immediately if no
    /// full frame is currently buffered, instead of waiting for one. For a
    /// single thread that both produces (reads the socket) and consumes
    /// (parses frames) in the same loop, where blocking on its own condvar
    /// would deadlock.
    pub fn try_fetch(
        &self,
        header_len: usize,
        payload_len_at: impl Fn(&[u8]) -> usize,
    ) -> Option<Vec<u8>> {
        let mut inner = self.inner.lock().unwrap();
        if inner.buf.len() >= header_len {
            let total = header_len + payload_len_at(&inner.buf[..header_len]);
            if inner.buf.len() >= total {
                let frame = inner.buf[..total].to_vec();
                inner.buf.drain(..total);
                self.cv.notify_all();
                return Some(frame);
            }
        }
        None
    }

    /// Wakes every waiter; subsequent `push`/`fetch` calls return
    /// immediately with the sentinel outcome.
    pub fn unblock(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.unblocked = true;
        self.cv.notify_all();
    }

    pub fn buffered_len(&self) -> usize {
        self.inner.lock().unwrap().buf.len()
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, thread, time::Duration};

    use super::*;

    fn payload_len_u32(header: &[u8]) -> usize {
        u32::from_le_bytes(header.try_into().unwrap()) as usize
    }

    #[test]
    fn fetch_waits_for_full_frame_then_compacts() {
        let stream = ByteStream::new(64);
        assert!(stream.push(&3u32.to_le_bytes()));
        assert!(stream.push(b"ab"));
        assert!(stream.push(b"c"));

        let frame = stream.fetch(4, payload_len_u32).unwrap();
        assert_eq!(&frame[4..], b"abc");
        assert_eq!(stream.buffered_len(), 0);
    }

    #[test]
    fn try_fetch_does_not_block_on_partial_frame() {
        let stream = ByteStream::new(64);
        assert!(stream.push(&10u32.to_le_bytes()));
        assert!(stream.push(b"ab"));
        assert_eq!(stream.try_fetch(4, payload_len_u32), None);
        assert_eq!(stream.buffered_len(), 6);
    }

    #[test]
    fn unblock_wakes_blocked_fetch() {
        let stream = Arc::new(ByteStream::new(64));
        let reader = {
            let stream = stream.clone();
            thread::spawn(move || stream.fetch(4, payload_len_u32))
        };
        thread::sleep(Duration::from_millis(20));
        stream.unblock();
        assert_eq!(reader.join().unwrap(), None);
    }

    #[test]
    fn push_blocks_until_capacity_frees() {
        let stream = Arc::new(ByteStream::new(8));
        assert!(stream.push(&[0u8; 8]));

        let writer = {
            let stream = stream.clone();
            thread::spawn(move || stream.push(&[1u8; 4]))
        };
        thread::sleep(Duration::from_millis(20));
        assert_eq!(stream.buffered_len(), 8);

        stream.unblock();
        assert!(!writer.join().unwrap());
    }
}
