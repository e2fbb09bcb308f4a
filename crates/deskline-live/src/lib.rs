//! # deskline-live
//!
//! Live views over the Deskline data service.
//!
//! A live view is a local, ordered projection of one collection kept current
//! by an initial read plus a change-feed subscription on the same collection.
//! The pieces:
//!
//! - [`ConnectionProvider`] hands out one shared [`Connection`] per process.
//! - [`open_view`] subscribes, reads, and installs the initial rows.
//! - [`ViewState`] reconciles create/update/delete events into the list and
//!   owns the `Loading -> Live -> Closed` lifecycle.
//! - [`Dispatcher`] issues one-shot writes; their effects come back through
//!   the feeds.
//! - [`DerivedView`] and [`dashboard`] recompute aggregates on every change.

pub mod connection;
pub mod dashboard;
pub mod derived;
pub mod dispatch;
pub mod error;
pub mod projection;
pub mod reconcile;
pub mod service;
pub mod view;

pub use connection::{Connection, ConnectionProvider};
pub use dashboard::{AdminSummary, ChartPoint, Dashboard, SummaryCard};
pub use derived::DerivedView;
pub use dispatch::{Ack, Command, Dispatcher, SendOutcome, StartedChat, StatusTransition};
pub use error::{
    ConnectionError, EventApplyError, MutationError, ProjectionError, QueryError, ServiceError,
    SubscriptionError,
};
pub use projection::{ChatRoom, ChatStatus, Customer, Message, Projection};
pub use reconcile::{Applied, IgnoreReason, Phase, Placement, ViewSpec, ViewState};
pub use service::{DataService, Feed, StoreService};
pub use view::{open_view, LiveView};
