const FNV_OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// 64-bit FNV-1a, used to derive a watch pattern's event name.
pub fn fnv1a64(bytes: &[u8]) -> u64 {
    let mut hash = FNV_OFFSET_BASIS;
    for &b in bytes {
        hash ^= u64::from(b);
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

/// Reserved event name a watch on `pattern` emits to: `mxevt::rdbw-<hex64>`.
pub fn watch_event_name(pattern: &str) -> String {
    format!("mxevt::rdbw-{:016x}", fnv1a64(pattern.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deterministic() {
        assert_eq!(fnv1a64(b"/x/*/value"), fnv1a64(b"/x/*/value"));
        assert_ne!(fnv1a64(b"/x/*/value"), fnv1a64(b"/y/*/value"));
    }

    #[test]
    fn watch_name_is_reserved_prefixed() {
        let name = watch_event_name("/x/*/value");
        assert!(name.starts_with("mxevt::rdbw-"));
        assert_eq!(name.len(), "mxevt::rdbw-".len() + 16);
    }
}
