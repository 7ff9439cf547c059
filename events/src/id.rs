//! Stream identity value types.
//!
//! `StreamId` names one durable log, `EventId` names one entry inside it. Both
//! have a canonical string form which doubles as the SSE `id` field and as the
//! resumption token a client echoes back in `Last-Event-ID`:
//!
//! ```text
//! orders.0b6a1f4e-3f3c-4d52-9a1e-5b3f1c2d4e6f_42
//! ^^^^^^ ^^^^^^^^^^^^^^^^^^^^^^^^^^^^^^^^^^^^ ^^
//! category            unique                 index
//! ```

use crate::error::{Error, IdErrorKind};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Longest accepted stream category.
pub const MAX_CATEGORY_LEN: usize = 32;

const CATEGORY_SEPARATOR: char = '.';
const INDEX_SEPARATOR: char = '_';

/// Identifier of one durable log.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StreamId {
    category: String,
    unique: Uuid,
}

impl StreamId {
    /// Creates a fresh stream id with a random unique part.
    pub fn new(category: &str) -> Result<Self, Error> {
        Self::from_parts(category, Uuid::new_v4())
    }

    pub fn from_parts(category: &str, unique: Uuid) -> Result<Self, Error> {
        validate_category(category)?;
        Ok(Self {
            category: category.to_owned(),
            unique,
        })
    }

    pub fn category(&self) -> &str {
        &self.category
    }

    pub fn unique(&self) -> Uuid {
        self.unique
    }
}

/// Checks that `category` is 1..=32 lowercase ASCII letters or digits.
pub fn validate_category(category: &str) -> Result<(), Error> {
    let well_formed = !category.is_empty()
        && category.len() <= MAX_CATEGORY_LEN
        && category
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit());

    if well_formed {
        Ok(())
    } else {
        Err(Error::id(IdErrorKind::InvalidCategory))
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{}{CATEGORY_SEPARATOR}{}",
            self.category,
            self.unique.hyphenated()
        )
    }
}

impl FromStr for StreamId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (category, unique) = s
            .split_once(CATEGORY_SEPARATOR)
            .ok_or_else(|| Error::id(IdErrorKind::Malformed))?;

        validate_category(category)?;

        let parsed = Uuid::parse_str(unique)?;
        // Only the lowercase hyphenated form is canonical; anything else would
        // round-trip to a different token.
        if parsed.hyphenated().to_string() != unique {
            return Err(Error::id(IdErrorKind::InvalidUuid));
        }

        Self::from_parts(category, parsed)
    }
}

impl Serialize for StreamId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for StreamId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Position of one entry inside one stream.
///
/// Deliberately not `Ord`: two ids are only comparable when they belong to
/// the same stream, see [`EventId::cmp_within_stream`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EventId {
    stream_id: StreamId,
    index: u64,
}

impl EventId {
    pub fn new(stream_id: StreamId, index: u64) -> Self {
        Self { stream_id, index }
    }

    pub fn stream_id(&self) -> &StreamId {
        &self.stream_id
    }

    pub fn index(&self) -> u64 {
        self.index
    }

    /// Orders two ids of the same stream by index.
    ///
    /// Returns an `IdErrorKind::StreamMismatch` error when the streams differ.
    pub fn cmp_within_stream(&self, other: &EventId) -> Result<Ordering, Error> {
        if self.stream_id != other.stream_id {
            return Err(Error::id(IdErrorKind::StreamMismatch));
        }
        Ok(self.index.cmp(&other.index))
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}{INDEX_SEPARATOR}{}", self.stream_id, self.index)
    }
}

impl FromStr for EventId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (stream, index) = s
            .rsplit_once(INDEX_SEPARATOR)
            .ok_or_else(|| Error::id(IdErrorKind::Malformed))?;

        if index.is_empty() || !index.bytes().all(|b| b.is_ascii_digit()) {
            return Err(Error::id(IdErrorKind::InvalidIndex));
        }
        let index = index
            .parse::<u64>()
            .map_err(|e| Error::id(IdErrorKind::InvalidIndex).with_source(e))?;

        Ok(Self {
            stream_id: stream.parse()?,
            index,
        })
    }
}

impl Serialize for EventId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for EventId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}
