use std::fmt;

use chrono::{DateTime, Utc};

/// Milliseconds between the NTP era base (1900-01-01T00:00:00Z) and the
/// POSIX epoch.
const BASE_1900_MILLIS: i64 = -2_208_988_800_000;

/// Milliseconds between the POSIX epoch and the start of the second NTP
/// era (2036-02-07T06:28:16Z), reached when the 32-bit seconds counter
/// rolls over.
const BASE_2036_MILLIS: i64 = 2_085_978_496_000;

/// 64-bit NTP timestamp: 32-bit seconds since 1900-01-01 UTC in the
/// high word, 32-bit binary fraction of a second (units of 2^-32 s) in
/// the low word.
///
/// The raw encoding is preserved exactly; millisecond conversions use
/// the high bit of the seconds field to pick the era, so values past
/// the 2036 rollover still convert correctly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct NtpTimestamp(u64);

impl NtpTimestamp {
    pub const ZERO: NtpTimestamp = NtpTimestamp(0);

    pub fn from_bits(bits: u64) -> Self {
        Self(bits)
    }

    pub fn as_bits(self) -> u64 {
        self.0
    }

    /// Whole seconds since the era base.
    pub fn seconds(self) -> u32 {
        (self.0 >> 32) as u32
    }

    /// Fractional second in units of 2^-32 s.
    pub fn fraction(self) -> u32 {
        self.0 as u32
    }

    pub fn is_zero(self) -> bool {
        self.0 == 0
    }

    /// Milliseconds since the POSIX epoch.
    ///
    /// The seconds field is unsigned; a set high bit means the first
    /// era (1900 base), a clear one the second (2036 base).
    pub fn as_millis(self) -> i64 {
        let seconds = i64::from(self.seconds());
        let frac_millis = (i64::from(self.fraction()) * 1000 + (1 << 31)) >> 32;
        let base = if self.seconds() & 0x8000_0000 != 0 {
            BASE_1900_MILLIS
        } else {
            BASE_2036_MILLIS
        };
        base + seconds * 1000 + frac_millis
    }

    /// Build a timestamp from milliseconds since the POSIX epoch.
    pub fn from_millis(millis: i64) -> Self {
        let use_base_1900 = millis < BASE_2036_MILLIS;
        let base_millis = if use_base_1900 {
            millis - BASE_1900_MILLIS
        } else {
            millis - BASE_2036_MILLIS
        };

        let mut seconds = (base_millis / 1000) as u64;
        let fraction = (((base_millis % 1000) as u64) << 32) / 1000;
        if use_base_1900 {
            seconds |= 0x8000_0000;
        }

        Self((seconds << 32) | fraction)
    }

    pub fn to_datetime(self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp_millis(self.as_millis())
    }
}

impl From<u64> for NtpTimestamp {
    fn from(bits: u64) -> Self {
        Self(bits)
    }
}

impl fmt::Display for NtpTimestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:08x}.{:08x}", self.seconds(), self.fraction())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_bits_roundtrip() {
        for bits in [
            0u64,
            1,
            0xffff_ffff_ffff_ffff,
            0x8000_0000_0000_0000,
            0xc508_6b4c_8000_0000,
            0x0000_0001_0000_0000,
        ] {
            assert_eq!(NtpTimestamp::from_bits(bits).as_bits(), bits);
        }
    }

    #[test]
    fn millis_roundtrip_current_era() {
        // 2020-01-01T00:00:00Z
        let millis = 1_577_836_800_000;
        let ts = NtpTimestamp::from_millis(millis);
        assert_eq!(ts.as_millis(), millis);
        // High bit set: first era.
        assert_eq!(ts.seconds() & 0x8000_0000, 0x8000_0000);
    }

    #[test]
    fn millis_roundtrip_past_2036_rollover() {
        // 2040-01-01T00:00:00Z, past the 32-bit seconds rollover.
        let millis = 2_208_988_800_000;
        let ts = NtpTimestamp::from_millis(millis);
        assert_eq!(ts.as_millis(), millis);
        // High bit clear: second era.
        assert_eq!(ts.seconds() & 0x8000_0000, 0);
    }

    #[test]
    fn fraction_converts_to_rounded_millis() {
        // Half a second is exactly 0x8000_0000 fractional units.
        let ts = NtpTimestamp::from_bits(0x8000_0000_8000_0000);
        assert_eq!(ts.as_millis() % 1000, 500);
    }

    #[test]
    fn sub_millisecond_conversion_is_stable() {
        for offset in 0..1000 {
            let millis = 1_700_000_000_000 + offset;
            assert_eq!(NtpTimestamp::from_millis(millis).as_millis(), millis);
        }
    }
}
