//! Schema version stamps
//!
//! A version is a `YYYYMMDDHHMMSS` timestamp stored as an integer. Short
//! versions typed by hand are right-padded with zeros to 14 digits, so
//! `2024` means `20240000000000`. Versions read back from JSON are taken as
//! written.

use chrono::{DateTime, Utc};
use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

use crate::error::MigrateError;

const VERSION_DIGITS: usize = 14;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Version(i64);

impl Version {
    pub fn new(value: i64) -> Self {
        Self(value)
    }

    /// Version stamp for the given instant
    pub fn at(time: DateTime<Utc>) -> Self {
        let stamp = time.format("%Y%m%d%H%M%S").to_string();
        // The formatted stamp is always 14 ASCII digits.
        Self(stamp.parse().unwrap_or_default())
    }

    pub fn now() -> Self {
        Self::at(Utc::now())
    }

    pub fn as_i64(&self) -> i64 {
        self.0
    }

    pub fn next(&self) -> Self {
        Self(self.0 + 1)
    }

    /// Parse digits typed by hand or taken from a file name, right-padding
    /// to 14 digits
    pub fn parse_padded(digits: &str) -> Result<Self, MigrateError> {
        let digits = checked_digits(digits)?;
        let padded = format!("{:0<width$}", digits, width = VERSION_DIGITS);
        padded
            .parse::<i64>()
            .map(Self)
            .map_err(|_| MigrateError::InvalidVersion(digits.to_string()))
    }

    /// Parse digits exactly as written
    pub fn parse_exact(digits: &str) -> Result<Self, MigrateError> {
        let digits = checked_digits(digits)?;
        digits
            .parse::<i64>()
            .map(Self)
            .map_err(|_| MigrateError::InvalidVersion(digits.to_string()))
    }
}

fn checked_digits(digits: &str) -> Result<&str, MigrateError> {
    let digits = digits.trim();
    let valid = !digits.is_empty()
        && digits.len() <= VERSION_DIGITS
        && digits.bytes().all(|b| b.is_ascii_digit());
    if valid {
        Ok(digits)
    } else {
        Err(MigrateError::InvalidVersion(digits.to_string()))
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Version {
    type Err = MigrateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse_padded(s)
    }
}

impl Serialize for Version {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0.to_string())
    }
}

impl<'de> Deserialize<'de> for Version {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct VersionVisitor;

        impl Visitor<'_> for VersionVisitor {
            type Value = Version;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a YYYYMMDDHHMMSS version as a string or integer")
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<Version, E> {
                Version::parse_exact(v).map_err(E::custom)
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<Version, E> {
                if v < 0 {
                    return Err(E::custom(format!("version {} is negative", v)));
                }
                Ok(Version(v))
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<Version, E> {
                i64::try_from(v)
                    .map(Version)
                    .map_err(|_| E::custom(format!("version {} is out of range", v)))
            }
        }

        deserializer.deserialize_any(VersionVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_short_versions_are_padded() {
        assert_eq!(
            Version::parse_padded("2024").unwrap(),
            Version::new(20240000000000)
        );
        assert_eq!(
            "20240101000000".parse::<Version>().unwrap(),
            Version::new(20240101000000)
        );
    }

    #[test]
    fn test_rejects_non_digits() {
        assert!(Version::parse_padded("2024-01").is_err());
        assert!(Version::parse_padded("").is_err());
    }

    #[test]
    fn test_rejects_more_than_fourteen_digits() {
        assert!(Version::parse_padded("202401010000001").is_err());
        assert!(Version::parse_exact("202401010000001").is_err());
        assert_eq!(
            Version::parse_padded("20240101000001").unwrap(),
            Version::new(20240101000001)
        );
    }

    #[test]
    fn test_stamp_from_time() {
        let time = Utc.with_ymd_and_hms(2024, 3, 9, 7, 5, 1).unwrap();
        assert_eq!(Version::at(time), Version::new(20240309070501));
    }

    #[test]
    fn test_json_accepts_string_and_number() {
        let a: Version = serde_json::from_str("\"20240101000000\"").unwrap();
        let b: Version = serde_json::from_str("20240101000000").unwrap();
        assert_eq!(a, b);
        assert_eq!(serde_json::to_string(&a).unwrap(), "\"20240101000000\"");
    }

    #[test]
    fn test_json_is_not_padded() {
        let short: Version = serde_json::from_str("\"1\"").unwrap();
        assert_eq!(short, Version::new(1));
        let number: Version = serde_json::from_str("1").unwrap();
        assert_eq!(short, number);

        let written = serde_json::to_string(&Version::new(2024)).unwrap();
        assert_eq!(serde_json::from_str::<Version>(&written).unwrap(), Version::new(2024));
        assert!(serde_json::from_str::<Version>("-1").is_err());
    }
}
