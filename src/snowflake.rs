use std::{fmt, str::FromStr};

use chrono::{DateTime, TimeZone, Utc};
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

use crate::error::Error;

/// Milliseconds between the unix epoch and the first second of 2015.
pub const DISCORD_EPOCH: u64 = 1_420_070_400_000;

const TIMESTAMP_SHIFT: u32 = 22;
const MAX_TIMESTAMP: u64 = (1 << 42) - 1;

/// A Discord identifier.
///
/// The upper 42 bits hold the creation time in milliseconds since
/// [`DISCORD_EPOCH`], so sorting snowflakes sorts by creation time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Snowflake(u64);

impl Snowflake {
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    pub const fn get(self) -> u64 {
        self.0
    }

    pub fn timestamp_millis(self) -> u64 {
        (self.0 >> TIMESTAMP_SHIFT) + DISCORD_EPOCH
    }

    pub fn created_at(self) -> DateTime<Utc> {
        // 42 bits of milliseconds always fit in an i64
        Utc.timestamp_millis_opt(self.timestamp_millis() as i64)
            .single()
            .unwrap_or_default()
    }

    /// The lowest snowflake created at `at`. Useful as a pagination bound.
    ///
    /// Instants before the Discord epoch clamp to zero, instants past the
    /// 42-bit timestamp range clamp to its end.
    pub fn from_created_at(at: DateTime<Utc>) -> Self {
        let millis = at.timestamp_millis().max(0) as u64;
        let offset = millis.saturating_sub(DISCORD_EPOCH).min(MAX_TIMESTAMP);
        Self(offset << TIMESTAMP_SHIFT)
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

impl PartialEq<u64> for Snowflake {
    fn eq(&self, other: &u64) -> bool {
        self.0 == *other
    }
}

impl fmt::Display for Snowflake {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for Snowflake {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse::<u64>()
            .map(Self)
            .map_err(|_| Error::InvalidSnowflake(s.to_string()))
    }
}

impl Serialize for Snowflake {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for Snowflake {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct Visitor;

        impl de::Visitor<'_> for Visitor {
            type Value = Snowflake;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a snowflake as a string or an integer")
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<Snowflake, E> {
                Ok(Snowflake(v))
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<Snowflake, E> {
                u64::try_from(v)
                    .map(Snowflake)
                    .map_err(|_| E::custom("negative snowflake"))
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<Snowflake, E> {
                v.parse().map_err(E::custom)
            }
        }

        deserializer.deserialize_any(Visitor)
    }
}

/// Anything addressable by a snowflake.
pub trait Identified {
    fn id(&self) -> Snowflake;
}
