//! Snowflake ID - 64-bit unique identifier used by the gateway protocol
//!
//! Structure:
//! - Bits 63-22: Timestamp (milliseconds since the gateway epoch)
//! - Bits 21-12: Worker/process ID
//! - Bits 11-0:  Sequence number
//!
//! The client never mints snowflakes; every id arrives from the server.
//! JSON carries them as decimal strings for JavaScript safety, so serde
//! accepts both string and integer forms and always emits strings.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// 64-bit gateway entity identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Snowflake(u64);

impl Snowflake {
    /// Gateway epoch: 2015-01-01 00:00:00 UTC (milliseconds)
    pub const EPOCH: u64 = 1_420_070_400_000;

    /// Create a new Snowflake from a raw u64 value
    #[inline]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Get the inner u64 value
    #[inline]
    pub const fn into_inner(self) -> u64 {
        self.0
    }

    /// Check if the Snowflake is zero (uninitialized)
    #[inline]
    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }

    /// Extract timestamp (milliseconds since Unix epoch)
    #[inline]
    pub fn timestamp(&self) -> u64 {
        (self.0 >> 22) + Self::EPOCH
    }

    /// Convert the embedded timestamp to `DateTime<Utc>`
    pub fn created_at(&self) -> chrono::DateTime<chrono::Utc> {
        use chrono::{TimeZone, Utc};
        Utc.timestamp_millis_opt(self.timestamp() as i64)
            .single()
            .unwrap_or_else(|| Utc.timestamp_millis_opt(0).unwrap())
    }

    /// Parse from string representation
    pub fn parse(s: &str) -> Result<Self, SnowflakeParseError> {
        s.parse::<u64>()
            .map(Snowflake)
            .map_err(|_| SnowflakeParseError::InvalidFormat)
    }
}

/// Error when parsing a Snowflake from string
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SnowflakeParseError {
    #[error("invalid snowflake format")]
    InvalidFormat,
}

impl fmt::Display for Snowflake {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for Snowflake {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

impl From<Snowflake> for u64 {
    fn from(id: Snowflake) -> Self {
        id.0
    }
}

impl std::str::FromStr for Snowflake {
    type Err = SnowflakeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for Snowflake {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.0.to_string())
    }
}

impl<'de> Deserialize<'de> for Snowflake {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct SnowflakeVisitor;

        impl serde::de::Visitor<'_> for SnowflakeVisitor {
            type Value = Snowflake;

            fn expecting(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
                formatter.write_str("a snowflake id as a string or integer")
            }

            fn visit_u64<E>(self, value: u64) -> Result<Self::Value, E> {
                Ok(Snowflake(value))
            }

            fn visit_str<E>(self, value: &str) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                Snowflake::parse(value).map_err(E::custom)
            }
        }

        deserializer.deserialize_any(SnowflakeVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snowflake_roundtrip() {
        let id = Snowflake::new(81384788765712384);
        assert_eq!(id.into_inner(), 81384788765712384);
        assert_eq!(id.to_string(), "81384788765712384");
        assert_eq!(Snowflake::parse("81384788765712384").unwrap(), id);
    }

    #[test]
    fn test_snowflake_timestamp() {
        // 81384788765712384 >> 22 == 19405851 ms after the epoch
        let id = Snowflake::new(81384788765712384);
        assert_eq!(id.timestamp(), Snowflake::EPOCH + 19405851);
    }

    #[test]
    fn test_snowflake_parse_rejects_garbage() {
        assert_eq!(
            Snowflake::parse("not-a-number"),
            Err(SnowflakeParseError::InvalidFormat)
        );
        assert_eq!(Snowflake::parse("-5"), Err(SnowflakeParseError::InvalidFormat));
    }

    #[test]
    fn test_snowflake_serde_string_and_number() {
        let id: Snowflake = serde_json::from_str("\"123456\"").unwrap();
        assert_eq!(id.into_inner(), 123456);

        let id: Snowflake = serde_json::from_str("123456").unwrap();
        assert_eq!(id.into_inner(), 123456);

        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"123456\"");
    }

    #[test]
    fn test_snowflake_is_zero() {
        assert!(Snowflake::default().is_zero());
        assert!(!Snowflake::new(1).is_zero());
    }
}
