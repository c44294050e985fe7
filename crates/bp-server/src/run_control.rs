//! The `/system/run/*` state machine: `STOPPED(0) <-> RUNNING(1)`.
//! `STARTING(2)`/`STOPPING(3)` are reserved but never materialized here.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use bp_rdb::{RdbStore, RdbValueType};
use tracing::{info, warn};

pub const STATUS_KEY: &str = "/system/run/status";
pub const NUMBER_KEY: &str = "/system/run/number";
pub const TIMESTAMP_KEY: &str = "/system/run/timestamp";

pub const STOPPED: u8 = 0;
pub const RUNNING: u8 = 1;

/// Creates the run-control keys if absent, leaving the store `STOPPED`
/// with run number `0` on first boot.
pub fn bootstrap(store: &RdbStore) {
    store.create(STATUS_KEY, RdbValueType::Uint8, 0, Some(&[STOPPED]));
    store.create(NUMBER_KEY, RdbValueType::Uint64, 0, Some(&0u64.to_le_bytes()));
    store.create(TIMESTAMP_KEY, RdbValueType::Int64, 0, Some(&0i64.to_le_bytes()));
}

fn status(store: &RdbStore) -> u8 {
    store.read_value(STATUS_KEY).and_then(|b| b.first().copied()).unwrap_or(STOPPED)
}

fn run_number(store: &RdbStore) -> u64 {
    store
        .read_value(NUMBER_KEY)
        .and_then(|b| b.try_into().ok())
        .map(u64::from_le_bytes)
        .unwrap_or(0)
}

/// `STOPPED -> RUNNING`: bumps the run number and stamps the current time.
/// `false` if already running.
pub fn start(store: &RdbStore) -> bool {
    if status(store) == RUNNING {
        warn!("run-control: start rejected, already running");
        return false;
    }

    let next_number = run_number(store) + 1;
    let timestamp = now_unix();

    store.write_value(NUMBER_KEY, &next_number.to_le_bytes());
    store.write_value(TIMESTAMP_KEY, &timestamp.to_le_bytes());
    store.write_value(STATUS_KEY, &[RUNNING]);
    info!(run = next_number, "run-control: started");
    true
}

/// `RUNNING -> STOPPED`. `false` if already stopped.
pub fn stop(store: &RdbStore) -> bool {
    if status(store) == STOPPED {
        warn!("run-control: stop rejected, already stopped");
        return false;
    }

    store.write_value(STATUS_KEY, &[STOPPED]);
    info!("run-control: stopped");
    true
}

fn now_unix() -> i64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs() as i64).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bp_rdb::NullEventEmitter;

    fn store() -> RdbStore {
        let store = RdbStore::new(4096, Arc::new(NullEventEmitter));
        bootstrap(&store);
        store
    }

    #[test]
    fn start_then_stop_cycles_status() {
        let store = store();
        assert!(start(&store));
        assert_eq!(status(&store), RUNNING);
        assert!(stop(&store));
        assert_eq!(status(&store), STOPPED);
    }

    #[test]
    fn start_twice_is_rejected() {
        let store = store();
        assert!(start(&store));
        assert!(!start(&store));
    }

    #[test]
    fn stop_without_start_is_rejected() {
        let store = store();
        assert!(!stop(&store));
    }

    #[test]
    fn run_number_increments_each_start() {
        let store = store();
        start(&store);
        stop(&store);
        start(&store);
        assert_eq!(run_number(&store), 2);
    }
}
