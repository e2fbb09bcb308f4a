//! # deskline-shared
//!
//! Types shared by every Deskline crate: record identities, collection
//! names, change-feed notifications, query filters and the actor claims
//! handed over by the identity provider.

pub mod actor;
pub mod constants;
pub mod error;
pub mod protocol;
pub mod query;
pub mod types;

pub use error::IdentityParseError;
pub use protocol::{ChangeAction, Notification};
pub use query::{Direction, Filter, OrderBy};
pub use types::{Collection, Record, RecordId};
