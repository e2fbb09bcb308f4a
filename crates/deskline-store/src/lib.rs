//! # deskline-store
//!
//! The real-time data service behind Deskline, backed by SQLite.
//!
//! The crate exposes a synchronous [`Database`] handle that wraps a
//! `rusqlite::Connection` and provides generic, parameterized CRUD over the
//! three support-desk collections (`chat_user`, `chat`, `message`). Every
//! successful write is published on the [`LiveHub`], which fans changes out
//! to the live queries opened on the written collection.

pub mod database;
pub mod live;
pub mod migrations;
pub mod records;
pub mod schema;

mod error;

pub use database::Database;
pub use error::StoreError;
pub use live::{LiveHub, LiveQuery};
