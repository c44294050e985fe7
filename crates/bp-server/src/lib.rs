//! The experiment-control server binds together the RPC transport, the
//! event bus, and the RDB typed key/value store: it owns the `RdbStore` and
//! `EventServer`, bridges them via the traits each crate exposes, registers
//! the full RPC procedure surface, and drives the run-control state machine.

pub mod bridge;
pub mod client;
pub mod config;
pub mod procedures;
pub mod run_control;

use std::sync::{Arc, OnceLock};

use bp_evt::{EventServer, RdbSink};
use bp_net::{ClientId, socket::SocketError};
use bp_rdb::{EventEmitter, RdbStore};
use bp_rpc::{RpcRegistry, RpcServer};
use tracing::warn;

use bridge::{EventRdbSink, RdbEventEmitter};
use config::ServerConfig;

/// Owns the fully wired-up transports and store; `run`/`shutdown` drive and
/// tear down every worker thread.
pub struct Server {
    pub store: Arc<RdbStore>,
    pub evt: Arc<EventServer>,
    pub rpc: Arc<RpcServer>,
}

impl Server {
    /// Builds the store, event bus, and RPC server from `config`. Does not
    /// start accepting connections; call `run`.
    ///
    /// `EventServer::bind` needs an `RdbSink` before an `RdbStore` can exist
    /// (it needs an `EventEmitter` pointing at the bus first), so the sink
    /// handed to `bind` here is a [`LazyRdbSink`] that starts forwarding to
    /// the real store the moment it's built, a few lines below.
    pub fn build(config: &ServerConfig) -> Result<Self, SocketError> {
        let lazy_store = Arc::new(OnceLock::new());
        let evt = Arc::new(EventServer::bind(&config.evt_addr, Arc::new(LazyRdbSink(lazy_store.clone())))?);

        let emitter: Arc<dyn EventEmitter> = Arc::new(RdbEventEmitter(evt.clone()));
        let store = Arc::new(load_or_create_store(config, emitter));
        lazy_store.set(store.clone()).ok();

        let mut registry = RpcRegistry::new();
        procedures::register_all(&mut registry, store.clone(), evt.clone());
        let rpc = Arc::new(RpcServer::bind(&config.rpc_addr, registry)?);

        run_control::bootstrap(&store);
        store.bootstrap_statistics();

        Ok(Self { store, evt, rpc })
    }

    /// Writes a snapshot of `self.store` to `path`, unless `no_snapshot` is
    /// set. Logs and swallows failures rather than blocking shutdown on
    /// them: a failed snapshot loses state but should not hang the process.
    pub fn save_snapshot(&self, config: &ServerConfig) {
        if config.no_snapshot {
            return;
        }
        if let Err(err) = bp_rdb::snapshot::save(&self.store, &config.snapshot_path) {
            warn!(?err, path = %config.snapshot_path.display(), "bp-server: snapshot save failed");
        }
    }

    pub fn shutdown(&self) {
        self.rpc.shutdown();
        self.evt.shutdown();
    }
}

fn load_or_create_store(config: &ServerConfig, emitter: Arc<dyn EventEmitter>) -> RdbStore {
    if config.no_snapshot || !config.snapshot_path.exists() {
        return RdbStore::new(config.arena_capacity, emitter);
    }
    match bp_rdb::snapshot::load(&config.snapshot_path, emitter.clone()) {
        Ok(store) => store,
        Err(err) => {
            warn!(?err, path = %config.snapshot_path.display(), "bp-server: snapshot load failed, starting empty");
            RdbStore::new(config.arena_capacity, emitter)
        }
    }
}

/// Forwards to an [`EventRdbSink`] over the store once it's set; a no-op
/// before that, which only covers the brief window during `Server::build`
/// in which no client can yet be connected.
struct LazyRdbSink(Arc<OnceLock<Arc<RdbStore>>>);

impl RdbSink for LazyRdbSink {
    fn write_or_create_u32(&self, key: &str, value: u32) {
        if let Some(store) = self.0.get() {
            EventRdbSink(store.clone()).write_or_create_u32(key, value);
        }
    }

    fn write_or_create_i64(&self, key: &str, value: i64) {
        if let Some(store) = self.0.get() {
            EventRdbSink(store.clone()).write_or_create_i64(key, value);
        }
    }

    fn write_or_create_bool(&self, key: &str, value: bool) {
        if let Some(store) = self.0.get() {
            EventRdbSink(store.clone()).write_or_create_bool(key, value);
        }
    }

    fn write_or_create_string(&self, key: &str, value: &str) {
        if let Some(store) = self.0.get() {
            EventRdbSink(store.clone()).write_or_create_string(key, value);
        }
    }

    fn register_backend(&self, client: ClientId, binary_name: &str, hostname: &str) {
        if let Some(store) = self.0.get() {
            EventRdbSink(store.clone()).register_backend(client, binary_name, hostname);
        }
    }

    fn on_client_disconnect(&self, client: ClientId) {
        if let Some(store) = self.0.get() {
            EventRdbSink(store.clone()).on_client_disconnect(client);
        }
    }
}
