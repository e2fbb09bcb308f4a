use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use uuid::Uuid;

use crate::error::IdentityParseError;

/// A backend row as it travels between the store and the live-view core.
///
/// Rows are kept as loosely-typed JSON objects; projections normalise them
/// into stable view-models.
pub type Record = serde_json::Map<String, serde_json::Value>;

/// The backend collections Deskline reads and writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Collection {
    /// Chat rooms opened by customers.
    Chat,
    /// Customers known to the support desk.
    ChatUser,
    /// Messages exchanged inside a chat room.
    Message,
}

impl Collection {
    pub const ALL: [Collection; 3] = [Collection::Chat, Collection::ChatUser, Collection::Message];

    /// Table name used both in SQL and as the identity prefix.
    pub fn table(&self) -> &'static str {
        match self {
            Collection::Chat => "chat",
            Collection::ChatUser => "chat_user",
            Collection::Message => "message",
        }
    }

    pub fn from_table(table: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.table() == table)
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.table())
    }
}

/// Opaque, stable identity of a record: `table:key`.
///
/// Identities are unique within a collection and never reused, which makes
/// them the reconciliation key for live views.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RecordId {
    collection: Collection,
    key: String,
}

impl RecordId {
    pub fn new(collection: Collection, key: impl Into<String>) -> Self {
        Self {
            collection,
            key: key.into(),
        }
    }

    /// Allocate a fresh UUID v4 identity in `collection`.
    pub fn generate(collection: Collection) -> Self {
        Self::new(collection, Uuid::new_v4().to_string())
    }

    pub fn collection(&self) -> Collection {
        self.collection
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Parse an identity that must belong to `collection`.
    ///
    /// Accepts both the full `table:key` form and a bare key, since callers
    /// such as URL paths often drop the table prefix.
    pub fn parse_in(collection: Collection, s: &str) -> Result<Self, IdentityParseError> {
        let s = s.trim();
        if s.is_empty() {
            return Err(IdentityParseError::Empty);
        }
        match s.split_once(':') {
            Some((table, key)) if Collection::from_table(table).is_some() => {
                let parsed = Self::from_str(s)?;
                if parsed.collection != collection {
                    return Err(IdentityParseError::WrongCollection {
                        id: s.to_string(),
                        expected: collection.table(),
                    });
                }
                if key.is_empty() {
                    return Err(IdentityParseError::Empty);
                }
                Ok(parsed)
            }
            _ => Ok(Self::new(collection, s)),
        }
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.collection.table(), self.key)
    }
}

impl FromStr for RecordId {
    type Err = IdentityParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(IdentityParseError::Empty);
        }
        let (table, key) = s
            .split_once(':')
            .ok_or_else(|| IdentityParseError::UnknownCollection(s.to_string()))?;
        let collection = Collection::from_table(table)
            .ok_or_else(|| IdentityParseError::UnknownCollection(table.to_string()))?;
        if key.is_empty() {
            return Err(IdentityParseError::Empty);
        }
        Ok(Self::new(collection, key))
    }
}

impl Serialize for RecordId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for RecordId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
