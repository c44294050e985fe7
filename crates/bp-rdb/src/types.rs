use thiserror::Error;

/// Maximum byte length of a key path and of an inline `String` value; both
/// bounds come from the source's `RDB_MAX_KEY_SIZE`/`RDB_MAX_STRING_SIZE`.
pub const RDB_MAX_KEY_SIZE: usize = 512;
pub const RDB_MAX_STRING_SIZE: usize = 512;

#[derive(Debug, Error)]
pub enum RdbKeyError {
    #[error("key exceeds {RDB_MAX_KEY_SIZE} bytes")]
    TooLong,
    #[error("key must be an absolute path starting with '/'")]
    NotAbsolute,
}

/// Validates a key path against the store's bound and leading-`/` shape
/// convention, returning it unchanged for convenient chaining.
pub fn validate_key(key: &str) -> Result<&str, RdbKeyError> {
    if key.len() > RDB_MAX_KEY_SIZE {
        return Err(RdbKeyError::TooLong);
    }
    if !key.starts_with('/') {
        return Err(RdbKeyError::NotAbsolute);
    }
    Ok(key)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum RdbValueType {
    Int8 = 0,
    Int16 = 1,
    Int32 = 2,
    Int64 = 3,
    Uint8 = 4,
    Uint16 = 5,
    Uint32 = 6,
    Uint64 = 7,
    Float32 = 8,
    Float64 = 9,
    String = 10,
    Bool = 11,
}

impl RdbValueType {
    /// Byte width of a single element of this type. `String` is
    /// bounds-fixed to [`RDB_MAX_STRING_SIZE`] rather than variable-length,
    /// matching the source's "store the max size" choice.
    pub const fn element_size(self) -> usize {
        match self {
            Self::Int8 | Self::Uint8 | Self::Bool => 1,
            Self::Int16 | Self::Uint16 => 2,
            Self::Int32 | Self::Uint32 | Self::Float32 => 4,
            Self::Int64 | Self::Uint64 | Self::Float64 => 8,
            Self::String => RDB_MAX_STRING_SIZE,
        }
    }

    pub const fn from_u8(v: u8) -> Option<Self> {
        Some(match v {
            0 => Self::Int8,
            1 => Self::Int16,
            2 => Self::Int32,
            3 => Self::Int64,
            4 => Self::Uint8,
            5 => Self::Uint16,
            6 => Self::Uint32,
            7 => Self::Uint64,
            8 => Self::Float32,
            9 => Self::Float64,
            10 => Self::String,
            11 => Self::Bool,
            _ => return None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_overlong_key() {
        let long = format!("/{}", "a".repeat(RDB_MAX_KEY_SIZE));
        assert!(matches!(validate_key(&long), Err(RdbKeyError::TooLong)));
    }

    #[test]
    fn rejects_relative_key() {
        assert!(matches!(validate_key("system/run"), Err(RdbKeyError::NotAbsolute)));
    }

    #[test]
    fn string_type_is_bounded() {
        assert_eq!(RdbValueType::String.element_size(), RDB_MAX_STRING_SIZE);
    }

    #[test]
    fn u8_roundtrip() {
        for raw in 0..=11u8 {
            let ty = RdbValueType::from_u8(raw).unwrap();
            assert_eq!(ty as u8, raw);
        }
        assert!(RdbValueType::from_u8(12).is_none());
    }
}
