use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use bp_net::{hash::watch_event_name, pattern};
use bp_timing::Nanos;
use tracing::trace;

/// A pattern is dropped if an emit finds no subscribers and it has gone
/// idle for longer than this.
const DANGLING_WATCH_TIMEOUT: Nanos = Nanos::from_secs(5);

/// Glob patterns watching the KV store, each bound to a derived event name
/// (`mxevt::rdbw-<hex64>`). A pattern with no subscribers for more than
/// [`DANGLING_WATCH_TIMEOUT`] is garbage-collected the next time it fails
/// to find a listener.
#[derive(Default)]
pub struct WatchSet {
    dirs: RwLock<HashSet<String>>,
    last_trigger: RwLock<HashMap<String, Nanos>>,
}

impl WatchSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn make_event_name(pattern: &str) -> String {
        watch_event_name(pattern)
    }

    /// Registers `pattern`, returning its derived event name. Re-arms the
    /// idle timer if the pattern was already installed.
    pub fn watch(&self, glob: &str) -> String {
        self.dirs.write().unwrap().insert(glob.to_string());
        self.last_trigger.write().unwrap().insert(glob.to_string(), Nanos::now());
        Self::make_event_name(glob)
    }

    /// Removes `pattern`. Returns its event name if it was installed.
    pub fn unwatch(&self, glob: &str) -> Option<String> {
        let removed = self.dirs.write().unwrap().remove(glob);
        self.last_trigger.write().unwrap().remove(glob);
        removed.then(|| Self::make_event_name(glob))
    }

    pub fn is_watched(&self, glob: &str) -> bool {
        self.dirs.read().unwrap().contains(glob)
    }

    pub fn len(&self) -> usize {
        self.dirs.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every installed pattern matching `key` gets `emit` called with its
    /// derived event name. `emit` returns whether the event had any
    /// subscribers; patterns that keep missing for `DANGLING_WATCH_TIMEOUT`
    /// are dropped after this call returns.
    pub fn notify(&self, key: &str, emit: impl Fn(&str) -> bool) {
        let matched: Vec<String> =
            self.dirs.read().unwrap().iter().filter(|glob| pattern::matches(glob, key)).cloned().collect();

        let mut stale = Vec::new();
        for glob in matched {
            let event_name = Self::make_event_name(&glob);
            trace!(glob, key, event_name, "rdb watch: match");
            if emit(&event_name) {
                self.last_trigger.write().unwrap().insert(glob, Nanos::now());
            } else {
                let idle = self
                    .last_trigger
                    .read()
                    .unwrap()
                    .get(&glob)
                    .copied()
                    .unwrap_or(Nanos::ZERO)
                    .elapsed();
                if idle > DANGLING_WATCH_TIMEOUT {
                    stale.push(glob);
                }
            }
        }

        for glob in stale {
            trace!(glob, "rdb watch: dangling, removing");
            self.unwatch(&glob);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn watch_and_unwatch_round_trip() {
        let watches = WatchSet::new();
        let name = watches.watch("/x/*/value");
        assert!(watches.is_watched("/x/*/value"));
        assert_eq!(name, WatchSet::make_event_name("/x/*/value"));
        assert_eq!(watches.unwatch("/x/*/value"), Some(name));
        assert!(!watches.is_watched("/x/*/value"));
    }

    #[test]
    fn notify_matches_segment_glob() {
        let watches = WatchSet::new();
        watches.watch("/x/*/value");

        let emitted = std::cell::RefCell::new(Vec::new());
        watches.notify("/x/y/value", |name| {
            emitted.borrow_mut().push(name.to_string());
            true
        });
        assert_eq!(emitted.borrow().len(), 1);

        emitted.borrow_mut().clear();
        watches.notify("/z/y/value", |name| {
            emitted.borrow_mut().push(name.to_string());
            true
        });
        assert!(emitted.borrow().is_empty());
    }

    #[test]
    fn dangling_watch_is_not_removed_before_timeout() {
        let watches = WatchSet::new();
        watches.watch("/a/*");
        watches.notify("/a/b", |_| false);
        assert!(watches.is_watched("/a/*"));
    }
}
