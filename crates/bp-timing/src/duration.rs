use std::ops::{Add, AddAssign, Div, DivAssign, Mul, MulAssign, Sub, SubAssign};

use serde::{Deserialize, Serialize};

use crate::Nanos;

/// A span of wall-clock time, stored as a plain nanosecond count.
#[derive(Copy, Clone, Debug, Default, Serialize, Deserialize)]
#[repr(transparent)]
pub struct Duration(pub u64);

impl Duration {
    pub const MAX: Self = Self(u64::MAX);
    pub const ZERO: Self = Self(0);
    pub const MILLIS_10: Self = Self::from_millis(10);
    pub const MILLIS_5: Self = Self::from_millis(5);

    #[inline]
    pub fn saturating_sub(self, rhs: Duration) -> Self {
        Self(self.0.saturating_sub(rhs.0))
    }

    #[inline]
    pub fn saturating_add(self, rhs: Duration) -> Self {
        Self(self.0.saturating_add(rhs.0))
    }

    #[inline]
    pub const fn from_secs(s: u64) -> Self {
        Self(s * 1_000_000_000)
    }

    #[inline]
    pub fn from_mins(m: u64) -> Self {
        Self::from_secs(m * 60)
    }

    #[inline]
    pub fn from_secs_f64(s: f64) -> Self {
        Self::from_nanos((s * 1_000_000_000.0).round() as u64)
    }

    #[inline]
    pub const fn from_millis(ms: u64) -> Self {
        Self(ms * 1_000_000)
    }

    #[inline]
    pub const fn from_micros(us: u64) -> Self {
        Self(us * 1_000)
    }

    #[inline]
    pub const fn from_nanos(ns: u64) -> Self {
        Self(ns)
    }

    #[inline]
    pub fn as_secs(&self) -> f64 {
        self.0 as f64 / 1_000_000_000.0
    }

    #[inline]
    pub fn as_millis(&self) -> f64 {
        self.0 as f64 / 1_000_000.0
    }

    #[inline]
    pub fn as_micros(&self) -> f64 {
        self.0 as f64 / 1_000.0
    }

    #[inline]
    pub fn as_micros_u128(&self) -> u128 {
        self.0 as u128 / 1_000
    }

    #[inline]
    pub fn as_nanos(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for Duration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        Nanos(self.0).fmt(f)
    }
}

impl From<u64> for Duration {
    #[inline]
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl From<Duration> for u64 {
    #[inline]
    fn from(value: Duration) -> Self {
        value.0
    }
}

impl Add for Duration {
    type Output = Duration;
    #[inline]
    fn add(self, rhs: Duration) -> Duration {
        Duration(self.0.wrapping_add(rhs.0))
    }
}

impl AddAssign for Duration {
    #[inline]
    fn add_assign(&mut self, rhs: Duration) {
        *self = *self + rhs;
    }
}

impl Sub for Duration {
    type Output = Duration;
    #[inline]
    fn sub(self, rhs: Duration) -> Duration {
        Duration(self.0.wrapping_sub(rhs.0))
    }
}

impl SubAssign for Duration {
    #[inline]
    fn sub_assign(&mut self, rhs: Duration) {
        *self = *self - rhs;
    }
}

impl Mul<u32> for Duration {
    type Output = Duration;
    #[inline]
    fn mul(self, rhs: u32) -> Duration {
        Duration(self.0 * rhs as u64)
    }
}

impl Mul<Duration> for u32 {
    type Output = Duration;
    #[inline]
    fn mul(self, rhs: Duration) -> Duration {
        rhs * self
    }
}

impl MulAssign<u32> for Duration {
    #[inline]
    fn mul_assign(&mut self, rhs: u32) {
        *self = *self * rhs;
    }
}

impl Div<u32> for Duration {
    type Output = Duration;
    #[inline]
    fn div(self, rhs: u32) -> Duration {
        Duration(self.0 / rhs as u64)
    }
}

impl Div<Duration> for Duration {
    type Output = u64;
    #[inline]
    fn div(self, rhs: Duration) -> u64 {
        self.0 / rhs.0
    }
}

impl DivAssign<u32> for Duration {
    #[inline]
    fn div_assign(&mut self, rhs: u32) {
        *self = *self / rhs;
    }
}

impl PartialEq for Duration {
    #[inline]
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

impl Eq for Duration {}

impl PartialOrd for Duration {
    #[inline]
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Duration {
    #[inline]
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.cmp(&other.0)
    }
}

impl From<Duration> for f64 {
    #[inline]
    fn from(value: Duration) -> f64 {
        value.0 as f64
    }
}

impl std::iter::Sum for Duration {
    #[inline]
    fn sum<I>(iter: I) -> Self
    where
        I: Iterator<Item = Self>,
    {
        Duration(iter.map(|v| v.0).sum())
    }
}

impl From<Duration> for std::time::Duration {
    #[inline]
    fn from(value: Duration) -> Self {
        std::time::Duration::from_nanos(value.0)
    }
}

impl From<std::time::Duration> for Duration {
    #[inline]
    fn from(value: std::time::Duration) -> Self {
        Self(value.as_nanos() as u64)
    }
}

impl From<Nanos> for Duration {
    #[inline]
    fn from(value: Nanos) -> Self {
        Self(value.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unit_constructors_agree() {
        assert_eq!(Duration::from_secs(1), Duration::from_millis(1_000));
        assert_eq!(Duration::from_millis(1), Duration::from_micros(1_000));
        assert_eq!(Duration::from_micros(1), Duration::from_nanos(1_000));
    }

    #[test]
    fn arithmetic() {
        let a = Duration::from_millis(10);
        let b = Duration::from_millis(4);
        assert_eq!((a - b).as_millis(), 6.0);
        assert_eq!((a + b).as_millis(), 14.0);
    }
}
