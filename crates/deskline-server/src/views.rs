//! Live state served by the HTTP API.
//!
//! Every list the API returns is the snapshot of a live view, so reads never
//! hit the store directly. The views are opened once, on the first request
//! (or at startup), and kept for the life of the process.

use std::collections::{HashMap, VecDeque};

use deskline_live::dashboard::Dashboard;
use deskline_live::{
    open_view, ChatRoom, Connection, ConnectionProvider, Customer, Dispatcher, LiveView, Message,
    QueryError, ViewSpec,
};
use deskline_shared::actor::AdminProfile;
use deskline_shared::RecordId;
use tokio::sync::{Mutex, OnceCell};
use tracing::{debug, info};

use crate::error::ServerError;

/// Message views kept open at once; the least recently opened is dropped.
const MAX_ROOM_VIEWS: usize = 64;

pub struct Services {
    pub conn: Connection,
    pub dispatcher: Dispatcher,
    pub chats: LiveView<ChatRoom>,
    pub customers: LiveView<Customer>,
    pub dashboard: Dashboard,
    pub rooms: RoomViews,
}

impl Services {
    async fn open(conn: Connection, admins: Vec<AdminProfile>) -> Result<Self, QueryError> {
        let chats = open_view::<ChatRoom>(&conn, ViewSpec::chat_rooms()).await?;
        let customers = open_view::<Customer>(&conn, ViewSpec::customers()).await?;
        let dashboard = Dashboard::open(&conn, admins).await;
        info!(
            session = %conn.session(),
            chats = chats.len(),
            customers = customers.len(),
            "Live views ready"
        );
        Ok(Self {
            dispatcher: Dispatcher::new(conn.clone()),
            rooms: RoomViews::new(conn.clone()),
            conn,
            chats,
            customers,
            dashboard,
        })
    }
}

/// Lazily established [`Services`].
///
/// A failed attempt is not cached: the request gets a 503 and the next one
/// tries again.
pub struct Backend {
    provider: ConnectionProvider,
    admins: Vec<AdminProfile>,
    services: OnceCell<Services>,
}

impl Backend {
    pub fn new(provider: ConnectionProvider, admins: Vec<AdminProfile>) -> Self {
        Self {
            provider,
            admins,
            services: OnceCell::new(),
        }
    }

    pub async fn services(&self) -> Result<&Services, ServerError> {
        self.services
            .get_or_try_init(|| async {
                let conn = self.provider.acquire().await?;
                let services = Services::open(conn, self.admins.clone()).await?;
                Ok::<_, ServerError>(services)
            })
            .await
    }

    pub fn is_ready(&self) -> bool {
        self.services.initialized()
    }
}

/// Per-room message views, opened when a room is first looked at.
pub struct RoomViews {
    conn: Connection,
    open: Mutex<RoomCache>,
}

#[derive(Default)]
struct RoomCache {
    views: HashMap<RecordId, LiveView<Message>>,
    order: VecDeque<RecordId>,
}

impl RoomViews {
    fn new(conn: Connection) -> Self {
        Self {
            conn,
            open: Mutex::new(RoomCache::default()),
        }
    }

    /// Messages of `chat`, oldest first.
    pub async fn messages(&self, chat: &RecordId) -> Result<Vec<Message>, QueryError> {
        let mut cache = self.open.lock().await;
        if let Some(view) = cache.views.get(chat) {
            return Ok(view.snapshot());
        }

        let view = open_view::<Message>(&self.conn, ViewSpec::chat_messages(chat)).await?;
        let snapshot = view.snapshot();
        cache.views.insert(chat.clone(), view);
        cache.order.push_back(chat.clone());

        while cache.order.len() > MAX_ROOM_VIEWS {
            if let Some(evicted) = cache.order.pop_front() {
                // Dropping the view releases its feed.
                cache.views.remove(&evicted);
                debug!(chat = %evicted, "Message view evicted");
            }
        }
        Ok(snapshot)
    }

    pub async fn open_count(&self) -> usize {
        self.open.lock().await.views.len()
    }
}
