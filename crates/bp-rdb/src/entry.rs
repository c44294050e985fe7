use std::sync::RwLock;

use bp_timing::Nanos;

use crate::types::RdbValueType;

/// `EVENT_MOD_WATCHER` in the source; unused by any current call site here
/// but kept as a flag bit since `RdbEntry::flags` is part of the on-disk
/// record layout.
pub const FLAG_EVENT_MOD_WATCHER: u64 = 0x01;

struct EntryData {
    modified: Nanos,
    bytes: Vec<u8>,
}

/// A single typed KV entry. `offset` is the arena-bookkeeping identifier
/// assigned at creation (stable for the entry's lifetime); the actual
/// bytes live in `data`, never addressed through that offset directly.
pub struct RdbEntry {
    pub offset: u64,
    pub created: Nanos,
    pub flags: u64,
    pub value_type: RdbValueType,
    pub elem_size: u64,
    pub count: u64,
    data: RwLock<EntryData>,
}

impl RdbEntry {
    pub fn new(offset: u64, value_type: RdbValueType, count: u64, initial: Option<&[u8]>) -> Self {
        let now = Nanos::now();
        let total = Self::data_size(value_type, count);
        let bytes = match initial {
            Some(src) => src.to_vec(),
            None => vec![0u8; total as usize],
        };
        Self {
            offset,
            created: now,
            flags: 0,
            value_type,
            elem_size: value_type.element_size() as u64,
            count,
            data: RwLock::new(EntryData { modified: now, bytes }),
        }
    }

    pub fn data_size(value_type: RdbValueType, count: u64) -> u64 {
        let elem = value_type.element_size() as u64;
        if count > 0 { count * elem } else { elem }
    }

    pub fn total_size(&self) -> u64 {
        Self::data_size(self.value_type, self.count)
    }

    pub fn modified(&self) -> Nanos {
        self.data.read().unwrap().modified
    }

    pub fn read(&self) -> Vec<u8> {
        self.data.read().unwrap().bytes.clone()
    }

    /// Overwrites the entry's bytes. Fails (returning `false`, logged by
    /// the caller) if `bytes.len()` doesn't match the entry's fixed shape
    /// — an RDB entry never changes type or count after creation.
    pub fn write(&self, bytes: &[u8]) -> bool {
        if bytes.len() as u64 != self.total_size() {
            return false;
        }
        let mut guard = self.data.write().unwrap();
        guard.bytes.copy_from_slice(bytes);
        guard.modified = Nanos::now();
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalar_entry_has_exact_size() {
        let entry = RdbEntry::new(0, RdbValueType::Uint32, 0, None);
        assert_eq!(entry.total_size(), 4);
        assert_eq!(entry.read(), vec![0, 0, 0, 0]);
    }

    #[test]
    fn array_entry_sizes_by_count() {
        let entry = RdbEntry::new(0, RdbValueType::Float64, 10, None);
        assert_eq!(entry.total_size(), 80);
    }

    #[test]
    fn write_rejects_shape_mismatch() {
        let entry = RdbEntry::new(0, RdbValueType::Uint32, 0, None);
        assert!(!entry.write(&[0, 0]));
        assert!(entry.write(&[1, 2, 3, 4]));
        assert_eq!(entry.read(), vec![1, 2, 3, 4]);
    }

    #[test]
    fn write_bumps_modified_time() {
        let entry = RdbEntry::new(0, RdbValueType::Bool, 0, Some(&[0]));
        let created = entry.modified();
        std::thread::sleep(std::time::Duration::from_millis(2));
        entry.write(&[1]);
        assert!(entry.modified() >= created);
    }
}
