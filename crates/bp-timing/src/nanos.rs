use std::{
    ops::{Add, AddAssign, Sub, SubAssign},
    time::{SystemTime, UNIX_EPOCH},
};

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// Nanoseconds since the Unix epoch. Code that needs milliseconds instead
/// uses `Nanos::now().as_millis_u64()`.
#[derive(Copy, Clone, Debug, Default, Serialize, Deserialize, Hash, PartialEq, Eq)]
#[repr(transparent)]
pub struct Nanos(pub u64);

impl Nanos {
    pub const ZERO: Nanos = Nanos(0);
    pub const MAX: Nanos = Nanos(u64::MAX);

    #[inline]
    pub const fn from_millis(ms: u64) -> Self {
        Nanos(ms * 1_000_000)
    }

    #[inline]
    pub const fn from_secs(s: u64) -> Self {
        Nanos(s * 1_000_000_000)
    }

    #[inline]
    pub fn now() -> Self {
        let d = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default();
        Nanos(d.as_nanos() as u64)
    }

    #[inline]
    pub fn as_millis_u64(&self) -> u64 {
        self.0 / 1_000_000
    }

    #[inline]
    pub fn as_secs_f64(&self) -> f64 {
        self.0 as f64 / 1_000_000_000.0
    }

    #[inline]
    pub fn elapsed(&self) -> Self {
        Self::now().saturating_sub(*self)
    }

    #[inline]
    pub fn saturating_sub(self, rhs: Nanos) -> Self {
        Nanos(self.0.saturating_sub(rhs.0))
    }

    pub fn to_rfc3339_utc(&self) -> String {
        chrono::DateTime::<Utc>::from(*self).to_rfc3339_opts(SecondsFormat::Millis, true)
    }
}

impl From<Nanos> for chrono::DateTime<Utc> {
    fn from(value: Nanos) -> Self {
        chrono::DateTime::from_timestamp_nanos(value.0 as i64)
    }
}

impl std::fmt::Display for Nanos {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if *self < Nanos::from_millis(1) {
            write!(f, "{}ns", self.0)
        } else if *self < Nanos::from_secs(1) {
            write!(f, "{:.3}ms", self.0 as f64 / 1_000_000.0)
        } else {
            write!(f, "{:.3}s", self.as_secs_f64())
        }
    }
}

impl Add for Nanos {
    type Output = Nanos;
    #[inline]
    fn add(self, rhs: Nanos) -> Nanos {
        Nanos(self.0.wrapping_add(rhs.0))
    }
}

impl AddAssign for Nanos {
    #[inline]
    fn add_assign(&mut self, rhs: Nanos) {
        *self = *self + rhs;
    }
}

impl Sub for Nanos {
    type Output = Nanos;
    #[inline]
    fn sub(self, rhs: Nanos) -> Nanos {
        Nanos(self.0 - rhs.0)
    }
}

impl SubAssign for Nanos {
    #[inline]
    fn sub_assign(&mut self, rhs: Nanos) {
        *self = *self - rhs;
    }
}

impl PartialOrd for Nanos {
    #[inline]
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Nanos {
    #[inline]
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.cmp(&other.0)
    }
}

impl From<u64> for Nanos {
    #[inline]
    fn from(value: u64) -> Self {
        Nanos(value)
    }
}

impl From<Nanos> for u64 {
    #[inline]
    fn from(value: Nanos) -> Self {
        value.0
    }
}

impl From<Nanos> for std::time::Duration {
    #[inline]
    fn from(value: Nanos) -> Self {
        std::time::Duration::from_nanos(value.0)
    }
}
