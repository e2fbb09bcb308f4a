//! Error taxonomy of the live-view layer.
//!
//! Every backend failure is reduced to one of these at the call site and
//! then logged; none of them is allowed to stop a feed pump.

use deskline_shared::{Collection, RecordId};
use deskline_store::StoreError;
use thiserror::Error;

/// Failure reported by a [`DataService`](crate::DataService).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ServiceError {
    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Request rejected: {0}")]
    Rejected(String),

    #[error("Service unavailable: {0}")]
    Unavailable(String),
}

impl From<StoreError> for ServiceError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(id) => ServiceError::NotFound(id),
            StoreError::LiveQueryNotFound(id) => ServiceError::NotFound(id.to_string()),
            StoreError::UnknownField { .. }
            | StoreError::ReadOnlyField(_)
            | StoreError::MissingField(_)
            | StoreError::InvalidValue { .. } => ServiceError::Rejected(e.to_string()),
            other => ServiceError::Unavailable(other.to_string()),
        }
    }
}

/// The data service could not be reached. Fatal to every view.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConnectionError {
    #[error("Data service unavailable: {0}")]
    Unavailable(String),

    #[error("Authentication with the data service failed: {0}")]
    Unauthorized(String),
}

/// The initial read of a view failed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Initial read of {collection} failed: {source}")]
pub struct QueryError {
    pub collection: Collection,
    #[source]
    pub source: ServiceError,
}

/// The change feed of a view could not be opened; the view runs static.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Live query on {collection} could not be opened: {source}")]
pub struct SubscriptionError {
    pub collection: Collection,
    #[source]
    pub source: ServiceError,
}

/// A one-shot write failed. Local view state is left untouched.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MutationError {
    #[error("Invalid mutation: {0}")]
    Invalid(String),

    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Mutation rejected: {0}")]
    Rejected(String),

    #[error("Data service unavailable: {0}")]
    Unavailable(String),
}

impl MutationError {
    pub fn reason(&self) -> String {
        self.to_string()
    }
}

impl From<ServiceError> for MutationError {
    fn from(e: ServiceError) -> Self {
        match e {
            ServiceError::NotFound(id) => MutationError::NotFound(id),
            ServiceError::Rejected(r) => MutationError::Rejected(r),
            ServiceError::Unavailable(r) => MutationError::Unavailable(r),
        }
    }
}

/// A backend row could not be turned into a view-model.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProjectionError {
    #[error("Missing field `{0}`")]
    MissingField(&'static str),

    #[error("Invalid field `{field}`: {reason}")]
    InvalidField { field: &'static str, reason: String },
}

/// A feed event that could not be applied. Benign: logged, never surfaced.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EventApplyError {
    #[error("No local record with identity {0}")]
    UnknownIdentity(RecordId),

    #[error("Event record has no usable identity")]
    MissingIdentity,

    #[error("Event record could not be projected: {0}")]
    Unprojectable(#[from] ProjectionError),
}
