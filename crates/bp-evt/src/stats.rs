use std::{
    collections::HashMap,
    sync::{
        Mutex,
        atomic::{AtomicU64, Ordering},
    },
};

use bp_net::ClientId;

use crate::hooks::RdbSink;

/// Per-client upload/download counters, packed into one atomic so a single
/// `fetch_add` updates either half without taking a lock: hi dword is
/// download, lo dword is upload.
#[derive(Default)]
pub struct ClientStats {
    counters: Mutex<HashMap<ClientId, AtomicU64>>,
}

impl ClientStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, client: ClientId) {
        self.counters.lock().unwrap().entry(client).or_insert_with(|| AtomicU64::new(0));
    }

    pub fn remove(&self, client: ClientId) {
        self.counters.lock().unwrap().remove(&client);
    }

    pub fn accumulate_upload(&self, client: ClientId, bytes: u32) {
        self.accumulate(client, u64::from(bytes));
    }

    pub fn accumulate_download(&self, client: ClientId, bytes: u32) {
        self.accumulate(client, u64::from(bytes) << 32);
    }

    fn accumulate(&self, client: ClientId, delta: u64) {
        let counters = self.counters.lock().unwrap();
        if let Some(counter) = counters.get(&client) {
            counter.fetch_add(delta, Ordering::Relaxed);
        }
    }

    /// Snapshots and resets every client's counters, writing each under
    /// `/system/backends/<hex-cid>/statistics/event/{read,write}`. `read` is
    /// the client's download, `write` its upload — named from the client's
    /// perspective.
    pub fn flush(&self, sink: &dyn RdbSink) {
        let counters = self.counters.lock().unwrap();
        for (client, counter) in counters.iter() {
            let raw = counter.swap(0, Ordering::Relaxed);
            let upload = raw & 0xFFFF_FFFF;
            let download = raw >> 32;
            let key = format!("/system/backends/{client}/statistics/event");
            sink.write_or_create_u32(&format!("{key}/read"), download as u32);
            sink.write_or_create_u32(&format!("{key}/write"), upload as u32);
        }
    }

    pub fn reset_for(&self, client: ClientId, sink: &dyn RdbSink) {
        let counters = self.counters.lock().unwrap();
        if let Some(counter) = counters.get(&client) {
            counter.store(0, Ordering::Relaxed);
        }
        let key = format!("/system/backends/{client}/statistics/event");
        sink.write_or_create_u32(&format!("{key}/read"), 0);
        sink.write_or_create_u32(&format!("{key}/write"), 0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hooks::NullRdbSink;

    #[test]
    fn upload_and_download_accumulate_independently() {
        let stats = ClientStats::new();
        stats.register(ClientId(1));
        stats.accumulate_upload(ClientId(1), 10);
        stats.accumulate_download(ClientId(1), 20);

        let counters = stats.counters.lock().unwrap();
        let raw = counters.get(&ClientId(1)).unwrap().load(Ordering::Relaxed);
        assert_eq!(raw & 0xFFFF_FFFF, 10);
        assert_eq!(raw >> 32, 20);
    }

    #[test]
    fn flush_resets_counters() {
        let stats = ClientStats::new();
        stats.register(ClientId(1));
        stats.accumulate_upload(ClientId(1), 5);
        stats.flush(&NullRdbSink);

        let counters = stats.counters.lock().unwrap();
        assert_eq!(counters.get(&ClientId(1)).unwrap().load(Ordering::Relaxed), 0);
    }

    #[test]
    fn removed_client_is_not_accumulated() {
        let stats = ClientStats::new();
        stats.register(ClientId(1));
        stats.remove(ClientId(1));
        stats.accumulate_upload(ClientId(1), 5); // no-op, not a panic
        assert!(stats.counters.lock().unwrap().get(&ClientId(1)).is_none());
    }
}
