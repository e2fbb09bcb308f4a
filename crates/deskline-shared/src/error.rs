use thiserror::Error;

/// Failure to parse a `table:key` record identity.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IdentityParseError {
    #[error("Empty record identity")]
    Empty,

    #[error("Unknown collection: {0}")]
    UnknownCollection(String),

    #[error("Record identity {id} does not belong to collection {expected}")]
    WrongCollection { id: String, expected: &'static str },
}
