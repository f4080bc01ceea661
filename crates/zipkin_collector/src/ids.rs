//! Trace and span identifiers.
//!
//! Zipkin identifiers travel as lower-hex strings: span ids are always 16
//! characters, trace ids are 16 characters for 64-bit ids and 32 characters
//! when the high 64 bits are set.

use serde::de::{self, Deserializer, Visitor};
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Error parsing a hex identifier
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdParseError {
    /// Empty string where an id was expected
    #[error("empty identifier")]
    Empty,
    /// More hex characters than the id can hold
    #[error("identifier {value:?} is longer than {max} hex characters")]
    TooLong { value: String, max: usize },
    /// A non-hex character was found
    #[error("identifier {0:?} is not hex")]
    NotHex(String),
}

/// A 128-bit trace identifier split into its high and low halves.
///
/// `high` is zero for traces started with 64-bit ids.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TraceId {
    pub high: u64,
    pub low: u64,
}

impl TraceId {
    pub const fn new(high: u64, low: u64) -> Self {
        Self { high, low }
    }

    /// A 64-bit trace id.
    pub const fn from_low(low: u64) -> Self {
        Self { high: 0, low }
    }

    pub const fn is_128bit(&self) -> bool {
        self.high != 0
    }
}

impl fmt::Display for TraceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.high != 0 {
            write!(f, "{:016x}", self.high)?;
        }
        write!(f, "{:016x}", self.low)
    }
}

impl FromStr for TraceId {
    type Err = IdParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() > 32 {
            return Err(IdParseError::TooLong {
                value: s.to_string(),
                max: 32,
            });
        }
        // checked before splitting so the split lands on a char boundary
        if !s.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(IdParseError::NotHex(s.to_string()));
        }
        if s.len() > 16 {
            let (high, low) = s.split_at(s.len() - 16);
            return Ok(Self::new(parse_hex(high)?, parse_hex(low)?));
        }
        parse_hex(s).map(Self::from_low)
    }
}

impl From<u64> for TraceId {
    fn from(low: u64) -> Self {
        Self::from_low(low)
    }
}

impl Serialize for TraceId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for TraceId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct TraceIdVisitor;

        impl Visitor<'_> for TraceIdVisitor {
            type Value = TraceId;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a lower-hex trace id of up to 32 characters")
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<TraceId, E> {
                v.parse().map_err(E::custom)
            }
        }

        deserializer.deserialize_str(TraceIdVisitor)
    }
}

/// Parses up to 16 hex characters into a `u64`.
pub fn parse_span_id(s: &str) -> Result<u64, IdParseError> {
    if s.len() > 16 {
        return Err(IdParseError::TooLong {
            value: s.to_string(),
            max: 16,
        });
    }
    parse_hex(s)
}

/// Renders a span id as 16 lower-hex characters.
pub fn span_id_string(id: u64) -> String {
    format!("{id:016x}")
}

fn parse_hex(s: &str) -> Result<u64, IdParseError> {
    if s.is_empty() {
        return Err(IdParseError::Empty);
    }
    // from_str_radix tolerates a leading '+', zipkin ids don't
    if !s.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(IdParseError::NotHex(s.to_string()));
    }
    u64::from_str_radix(s, 16).map_err(|_| IdParseError::NotHex(s.to_string()))
}

/// Serde adapter for span ids (`#[serde(with = "crate::ids::hex")]`).
pub mod hex {
    use super::{parse_span_id, span_id_string};
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(id: &u64, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&span_id_string(*id))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
        let s = <std::borrow::Cow<'de, str>>::deserialize(deserializer)?;
        parse_span_id(&s).map_err(de::Error::custom)
    }
}

/// Serde adapter for optional span ids such as `parentId`.
pub mod hex_opt {
    use super::{parse_span_id, span_id_string};
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(id: &Option<u64>, serializer: S) -> Result<S::Ok, S::Error> {
        match id {
            Some(id) => serializer.serialize_str(&span_id_string(*id)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<u64>, D::Error> {
        let s = <Option<std::borrow::Cow<'de, str>>>::deserialize(deserializer)?;
        s.map(|s| parse_span_id(&s).map_err(de::Error::custom))
            .transpose()
    }
}
