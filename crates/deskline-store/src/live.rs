//! Live-query hub.
//!
//! A live query watches one whole collection: every create, update and
//! delete on that collection is delivered to every open query, unfiltered
//! and in write order. Killing a query delivers a final `CLOSE` notification
//! and drops the sender, so the receiving side drains and then ends.

use std::collections::HashMap;
use std::sync::Mutex;

use deskline_shared::{ChangeAction, Collection, Notification, Record};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::error::{Result, StoreError};

/// Receiving end of a live query.
#[derive(Debug)]
pub struct LiveQuery {
    pub id: Uuid,
    pub collection: Collection,
    pub events: mpsc::UnboundedReceiver<Notification>,
}

struct Feed {
    collection: Collection,
    tx: mpsc::UnboundedSender<Notification>,
}

/// Registry of open live queries.
#[derive(Default)]
pub struct LiveHub {
    feeds: Mutex<HashMap<Uuid, Feed>>,
}

impl LiveHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a live query on `collection`.
    pub fn live(&self, collection: Collection) -> LiveQuery {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = Uuid::new_v4();
        self.lock().insert(id, Feed { collection, tx });
        tracing::debug!(query_id = %id, %collection, "live query opened");
        LiveQuery {
            id,
            collection,
            events: rx,
        }
    }

    /// Close a live query. The subscriber receives `CLOSE` as its last event.
    pub fn kill(&self, id: Uuid) -> Result<()> {
        let feed = self.lock().remove(&id).ok_or(StoreError::LiveQueryNotFound(id))?;
        // The receiver may already be gone; that is the caller's business.
        let _ = feed.tx.send(Notification::close(id, feed.collection));
        tracing::debug!(query_id = %id, collection = %feed.collection, "live query killed");
        Ok(())
    }

    /// Fan a change out to every live query on `collection`.
    ///
    /// Feeds whose receiver has been dropped are pruned.
    pub fn publish(&self, collection: Collection, action: ChangeAction, record: &Record) {
        let mut feeds = self.lock();
        let mut dead = Vec::new();
        for (id, feed) in feeds.iter().filter(|(_, f)| f.collection == collection) {
            let notification = Notification {
                query_id: *id,
                collection,
                action,
                record: record.clone(),
            };
            if feed.tx.send(notification).is_err() {
                dead.push(*id);
            }
        }
        for id in dead {
            tracing::debug!(query_id = %id, "pruning live query with dropped receiver");
            feeds.remove(&id);
        }
    }

    /// Number of open live queries.
    pub fn active(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<Uuid, Feed>> {
        self.feeds.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
