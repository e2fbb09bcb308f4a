//! View-models built from backend records.
//!
//! Rows reach a view in more than one shape (initial reads, feed events,
//! older rows written by other clients), so every projection is lenient
//! about optional fields and strict only about identity.

use chrono::{DateTime, TimeZone, Utc};
use deskline_shared::constants::{CREATED_AT_FIELD, CUSTOMER_NAME_FIELD, ID_FIELD};
use deskline_shared::{Collection, Record, RecordId};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ProjectionError;

/// A reduced, UI-shaped representation of one backend record.
pub trait Projection: Clone + Send + Sync + 'static {
    /// Collection the projection is read from.
    const COLLECTION: Collection;

    fn from_record(record: &Record) -> Result<Self, ProjectionError>;

    fn id(&self) -> &RecordId;
}

/// Identity of a raw record, if it has a well-formed one.
pub fn record_id(record: &Record) -> Option<RecordId> {
    record.get(ID_FIELD)?.as_str()?.parse().ok()
}

fn required_id(record: &Record, collection: Collection) -> Result<RecordId, ProjectionError> {
    let raw = record
        .get(ID_FIELD)
        .and_then(Value::as_str)
        .ok_or(ProjectionError::MissingField(ID_FIELD))?;
    RecordId::parse_in(collection, raw).map_err(|e| ProjectionError::InvalidField {
        field: ID_FIELD,
        reason: e.to_string(),
    })
}

fn text(record: &Record, field: &str) -> Option<String> {
    match record.get(field)? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Creation timestamps arrive either as RFC 3339 text or as epoch millis.
fn timestamp(record: &Record, field: &'static str) -> Result<DateTime<Utc>, ProjectionError> {
    match record.get(field) {
        Some(Value::String(s)) => DateTime::parse_from_rfc3339(s)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| ProjectionError::InvalidField {
                field,
                reason: e.to_string(),
            }),
        Some(Value::Number(n)) => n
            .as_i64()
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
            .ok_or_else(|| ProjectionError::InvalidField {
                field,
                reason: format!("{n} is not a valid epoch millisecond value"),
            }),
        _ => Err(ProjectionError::MissingField(field)),
    }
}

// ---------------------------------------------------------------------------
// Chat room
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatStatus {
    Pending,
    Active,
    Viewed,
    Closed,
    Unknown,
}

impl ChatStatus {
    /// Unrecognised or missing statuses map to `Unknown`.
    pub fn parse(s: &str) -> Self {
        match s {
            "pending" => ChatStatus::Pending,
            "active" => ChatStatus::Active,
            "viewed" => ChatStatus::Viewed,
            "closed" => ChatStatus::Closed,
            _ => ChatStatus::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ChatStatus::Pending => "pending",
            ChatStatus::Active => "active",
            ChatStatus::Viewed => "viewed",
            ChatStatus::Closed => "closed",
            ChatStatus::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for ChatStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRoom {
    pub id: RecordId,
    /// Customer display name; empty when the customer row is gone.
    pub customer: String,
    pub status: ChatStatus,
    pub created_at: DateTime<Utc>,
}

impl Projection for ChatRoom {
    const COLLECTION: Collection = Collection::Chat;

    fn from_record(record: &Record) -> Result<Self, ProjectionError> {
        // Joined rows carry `customer_name`; rows fetched with the customer
        // record inlined carry `customer.name`.
        let customer = text(record, CUSTOMER_NAME_FIELD)
            .or_else(|| {
                record
                    .get("customer")
                    .and_then(Value::as_object)
                    .and_then(|c| text(c, "name"))
            })
            .unwrap_or_default();
        let status = record
            .get("status")
            .and_then(Value::as_str)
            .map(ChatStatus::parse)
            .unwrap_or(ChatStatus::Unknown);

        Ok(Self {
            id: required_id(record, Self::COLLECTION)?,
            customer,
            status,
            created_at: timestamp(record, CREATED_AT_FIELD)?,
        })
    }

    fn id(&self) -> &RecordId {
        &self.id
    }
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: RecordId,
    pub body: String,
    pub sender_id: String,
    pub created_at: DateTime<Utc>,
    pub chat_id: RecordId,
}

impl Message {
    /// Whether this message was sent by `actor_id`.
    pub fn is_from(&self, actor_id: &str) -> bool {
        self.sender_id == actor_id
    }
}

impl Projection for Message {
    const COLLECTION: Collection = Collection::Message;

    fn from_record(record: &Record) -> Result<Self, ProjectionError> {
        let chat_raw = text(record, "chat_id").ok_or(ProjectionError::MissingField("chat_id"))?;
        let chat_id = RecordId::parse_in(Collection::Chat, &chat_raw).map_err(|e| {
            ProjectionError::InvalidField {
                field: "chat_id",
                reason: e.to_string(),
            }
        })?;

        Ok(Self {
            id: required_id(record, Self::COLLECTION)?,
            body: text(record, "content").unwrap_or_default(),
            sender_id: text(record, "sender_id").unwrap_or_default(),
            created_at: timestamp(record, CREATED_AT_FIELD)?,
            chat_id,
        })
    }

    fn id(&self) -> &RecordId {
        &self.id
    }
}

// ---------------------------------------------------------------------------
// Customer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Customer {
    pub id: RecordId,
    pub name: String,
    pub email: String,
    pub created_at: DateTime<Utc>,
}

impl Projection for Customer {
    const COLLECTION: Collection = Collection::ChatUser;

    fn from_record(record: &Record) -> Result<Self, ProjectionError> {
        Ok(Self {
            id: required_id(record, Self::COLLECTION)?,
            name: text(record, "name").unwrap_or_default(),
            email: text(record, "email").unwrap_or_default(),
            created_at: timestamp(record, CREATED_AT_FIELD)?,
        })
    }

    fn id(&self) -> &RecordId {
        &self.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(v: Value) -> Record {
        v.as_object().cloned().unwrap()
    }

    #[test]
    fn chat_status_falls_back_to_unknown() {
        assert_eq!(ChatStatus::parse("pending"), ChatStatus::Pending);
        assert_eq!(ChatStatus::parse("archived"), ChatStatus::Unknown);
        let room = ChatRoom::from_record(&record(json!({
            "id": "chat:1",
            "created_at": "2024-01-01T00:00:00Z",
        })))
        .unwrap();
        assert_eq!(room.status, ChatStatus::Unknown);
        assert_eq!(room.customer, "");
    }

    #[test]
    fn chat_room_accepts_both_customer_shapes() {
        let joined = ChatRoom::from_record(&record(json!({
            "id": "chat:1", "status": "active", "customer_name": "Ada",
            "created_at": "2024-01-01T00:00:00Z",
        })))
        .unwrap();
        let inlined = ChatRoom::from_record(&record(json!({
            "id": "chat:1", "status": "active", "customer": {"name": "Ada"},
            "created_at": 1_704_067_200_000_i64,
        })))
        .unwrap();
        assert_eq!(joined, inlined);
    }

    #[test]
    fn message_requires_parent_chat() {
        let err = Message::from_record(&record(json!({
            "id": "message:1", "content": "hi", "sender_id": "u",
            "created_at": "2024-01-01T00:00:00Z",
        })))
        .unwrap_err();
        assert_eq!(err, ProjectionError::MissingField("chat_id"));
    }

    #[test]
    fn identity_must_belong_to_collection() {
        let err = Customer::from_record(&record(json!({
            "id": "chat:1", "name": "x", "email": "y",
            "created_at": "2024-01-01T00:00:00Z",
        })))
        .unwrap_err();
        assert!(matches!(err, ProjectionError::InvalidField { field: "id", .. }));
    }

    #[test]
    fn record_id_reads_rendered_identity() {
        assert_eq!(
            record_id(&record(json!({"id": "message:9"}))),
            Some(RecordId::new(Collection::Message, "9"))
        );
        assert_eq!(record_id(&record(json!({"id": 9}))), None);
    }
}
