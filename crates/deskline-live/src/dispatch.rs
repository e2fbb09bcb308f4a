//! Mutation dispatcher.
//!
//! Writes go straight to the data service. The dispatcher never touches a
//! view: every successful write comes back to the open views through their
//! change feeds.

use deskline_shared::actor::Actor;
use deskline_shared::{Collection, Filter, Record, RecordId};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::connection::Connection;
use crate::error::MutationError;
use crate::projection::{record_id, ChatStatus};

/// A one-shot write.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Create a record; the service assigns its identity.
    CreateRecord { collection: Collection, fields: Record },
    /// Merge `partial` into an existing record.
    UpdateFields { id: RecordId, partial: Record },
    DeleteRecord { id: RecordId },
    /// Merge `partial` only if the record currently matches `precondition`.
    ConditionalUpdate {
        id: RecordId,
        partial: Record,
        precondition: Filter,
    },
}

impl Command {
    fn name(&self) -> &'static str {
        match self {
            Command::CreateRecord { .. } => "create",
            Command::UpdateFields { .. } => "update",
            Command::DeleteRecord { .. } => "delete",
            Command::ConditionalUpdate { .. } => "conditional_update",
        }
    }
}

/// Acknowledgement of a write.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Ack {
    pub id: RecordId,
    /// `false` only for a conditional update whose precondition failed.
    pub applied: bool,
    /// The record as written (or as deleted); absent when nothing applied.
    pub record: Option<Record>,
}

/// What happened to the `pending → active` transition after a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "outcome", content = "reason")]
pub enum StatusTransition {
    /// The room moved from pending to active.
    Applied,
    /// The room was not pending; nothing changed.
    NotPending,
    /// The sender is not an admin.
    Skipped,
    /// The transition write failed; the message itself stands.
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SendOutcome {
    pub message: Ack,
    pub status_transition: StatusTransition,
}

/// Result of the widget's "start chat" action.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StartedChat {
    pub customer: Ack,
    pub chat: Ack,
}

#[derive(Clone, Debug)]
pub struct Dispatcher {
    conn: Connection,
}

impl Dispatcher {
    pub fn new(conn: Connection) -> Self {
        Self { conn }
    }

    /// Issue one write and acknowledge it.
    pub async fn write(&self, command: Command) -> Result<Ack, MutationError> {
        let name = command.name();
        let result = self.execute(command).await;
        match &result {
            Ok(ack) => debug!(command = name, id = %ack.id, applied = ack.applied, "write acknowledged"),
            Err(e) => warn!(command = name, error = %e, "write failed"),
        }
        result
    }

    async fn execute(&self, command: Command) -> Result<Ack, MutationError> {
        match command {
            Command::CreateRecord { collection, fields } => {
                let record = self.conn.create(collection, fields).await?;
                let id = record_id(&record).ok_or_else(|| {
                    MutationError::Rejected(format!("created {collection} record has no identity"))
                })?;
                Ok(Ack {
                    id,
                    applied: true,
                    record: Some(record),
                })
            }
            Command::UpdateFields { id, partial } => {
                ensure_fields(&partial)?;
                let record = self.conn.merge(&id, partial).await?;
                Ok(Ack {
                    id,
                    applied: true,
                    record: Some(record),
                })
            }
            Command::DeleteRecord { id } => {
                let record = self.conn.delete(&id).await?;
                Ok(Ack {
                    id,
                    applied: true,
                    record: Some(record),
                })
            }
            Command::ConditionalUpdate {
                id,
                partial,
                precondition,
            } => {
                ensure_fields(&partial)?;
                let record = self.conn.merge_if(&id, partial, &precondition).await?;
                Ok(Ack {
                    id,
                    applied: record.is_some(),
                    record,
                })
            }
        }
    }

    // -----------------------------------------------------------------------
    // Chat rooms
    // -----------------------------------------------------------------------

    /// Admin action: mark a room `viewed`, `closed` (or any known status).
    pub async fn set_chat_status(
        &self,
        chat: &RecordId,
        status: ChatStatus,
    ) -> Result<Ack, MutationError> {
        expect_collection(chat, Collection::Chat)?;
        if status == ChatStatus::Unknown {
            return Err(MutationError::Invalid("unknown is not a settable status".into()));
        }
        self.write(Command::UpdateFields {
            id: chat.clone(),
            partial: fields([("status", Value::from(status.as_str()))]),
        })
        .await
    }

    /// Post a message into a room.
    ///
    /// When the sender is an admin, a pending room then moves to `active`
    /// and records the admin. That second write is conditional on the room
    /// still being pending; its failure is reported, never rolled back.
    pub async fn send_message(
        &self,
        chat: &RecordId,
        sender: &Actor,
        body: &str,
    ) -> Result<SendOutcome, MutationError> {
        expect_collection(chat, Collection::Chat)?;
        if body.trim().is_empty() {
            return Err(MutationError::Invalid("message body is empty".into()));
        }

        let message = self
            .write(Command::CreateRecord {
                collection: Collection::Message,
                fields: fields([
                    ("chat_id", Value::from(chat.to_string())),
                    ("sender_id", Value::from(sender.id.as_str())),
                    ("content", Value::from(body)),
                ]),
            })
            .await?;

        let status_transition = if !sender.is_admin() {
            StatusTransition::Skipped
        } else {
            let transition = self
                .write(Command::ConditionalUpdate {
                    id: chat.clone(),
                    partial: fields([
                        ("status", Value::from(ChatStatus::Active.as_str())),
                        ("admin_id", Value::from(sender.id.as_str())),
                    ]),
                    precondition: Filter::eq("status", ChatStatus::Pending.as_str()),
                })
                .await;
            match transition {
                Ok(ack) if ack.applied => {
                    info!(chat = %chat, admin = %sender.id, "chat taken by admin");
                    StatusTransition::Applied
                }
                Ok(_) => StatusTransition::NotPending,
                Err(e) => {
                    warn!(chat = %chat, error = %e, "message sent but status transition failed");
                    StatusTransition::Failed(e.reason())
                }
            }
        };

        Ok(SendOutcome {
            message,
            status_transition,
        })
    }

    /// Widget entry point: register the customer and open a pending room.
    pub async fn start_chat(&self, name: &str, email: &str) -> Result<StartedChat, MutationError> {
        let customer = self.create_customer(name, email).await?;
        let chat = self
            .write(Command::CreateRecord {
                collection: Collection::Chat,
                fields: fields([
                    ("user_id", Value::from(customer.id.to_string())),
                    ("status", Value::from(ChatStatus::Pending.as_str())),
                ]),
            })
            .await?;
        info!(chat = %chat.id, customer = %customer.id, "chat started");
        Ok(StartedChat { customer, chat })
    }

    // -----------------------------------------------------------------------
    // Customers
    // -----------------------------------------------------------------------

    pub async fn create_customer(&self, name: &str, email: &str) -> Result<Ack, MutationError> {
        let name = non_blank("name", name)?;
        let email = non_blank("email", email)?;
        self.write(Command::CreateRecord {
            collection: Collection::ChatUser,
            fields: fields([("name", Value::from(name)), ("email", Value::from(email))]),
        })
        .await
    }

    /// Change a customer's name and/or email. At least one must be given.
    pub async fn edit_customer(
        &self,
        id: &RecordId,
        name: Option<&str>,
        email: Option<&str>,
    ) -> Result<Ack, MutationError> {
        expect_collection(id, Collection::ChatUser)?;
        let mut partial = Record::new();
        if let Some(name) = name {
            partial.insert("name".into(), Value::from(non_blank("name", name)?));
        }
        if let Some(email) = email {
            partial.insert("email".into(), Value::from(non_blank("email", email)?));
        }
        self.write(Command::UpdateFields {
            id: id.clone(),
            partial,
        })
        .await
    }

    pub async fn delete_customer(&self, id: &RecordId) -> Result<Ack, MutationError> {
        expect_collection(id, Collection::ChatUser)?;
        self.write(Command::DeleteRecord { id: id.clone() }).await
    }
}

fn fields<const N: usize>(pairs: [(&str, Value); N]) -> Record {
    pairs
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect()
}

fn ensure_fields(partial: &Record) -> Result<(), MutationError> {
    if partial.is_empty() {
        return Err(MutationError::Invalid("nothing to update".into()));
    }
    Ok(())
}

fn expect_collection(id: &RecordId, collection: Collection) -> Result<(), MutationError> {
    if id.collection() != collection {
        return Err(MutationError::Invalid(format!(
            "{id} is not a {collection} record"
        )));
    }
    Ok(())
}

fn non_blank<'a>(field: &str, value: &'a str) -> Result<&'a str, MutationError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(MutationError::Invalid(format!("{field} must not be empty")));
    }
    Ok(trimmed)
}
