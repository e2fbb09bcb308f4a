//! The data-service seam.
//!
//! Live views and the dispatcher only ever talk to a [`DataService`]. The
//! SQLite store implements it through [`StoreService`]; tests substitute
//! scripted services to exercise races and failures.

use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use deskline_shared::{Collection, Filter, Notification, OrderBy, Record, RecordId};
use deskline_store::{Database, LiveHub};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::error::ServiceError;

/// An open change feed: every change on one whole collection.
#[derive(Debug)]
pub struct Feed {
    pub id: Uuid,
    pub collection: Collection,
    pub events: mpsc::UnboundedReceiver<Notification>,
}

#[async_trait]
pub trait DataService: Send + Sync {
    /// One-shot read, filtered and sorted by the service.
    async fn select(
        &self,
        collection: Collection,
        filter: &Filter,
        order: Option<&OrderBy>,
        limit: Option<u32>,
    ) -> Result<Vec<Record>, ServiceError>;

    async fn count(&self, collection: Collection, filter: &Filter) -> Result<u64, ServiceError>;

    async fn create(&self, collection: Collection, fields: Record) -> Result<Record, ServiceError>;

    async fn merge(&self, id: &RecordId, partial: Record) -> Result<Record, ServiceError>;

    /// Merge only if the record matches `precondition`; `Ok(None)` otherwise.
    async fn merge_if(
        &self,
        id: &RecordId,
        partial: Record,
        precondition: &Filter,
    ) -> Result<Option<Record>, ServiceError>;

    async fn delete(&self, id: &RecordId) -> Result<Record, ServiceError>;

    /// Open a change feed on a whole collection.
    async fn live(&self, collection: Collection) -> Result<Feed, ServiceError>;

    /// Close a change feed opened with [`DataService::live`].
    async fn kill(&self, feed: Uuid) -> Result<(), ServiceError>;
}

/// [`DataService`] backed by the local SQLite store.
pub struct StoreService {
    db: Mutex<Database>,
    hub: Arc<LiveHub>,
}

impl StoreService {
    pub fn new(db: Database) -> Self {
        let hub = db.hub();
        Self {
            db: Mutex::new(db),
            hub,
        }
    }

    fn db(&self) -> MutexGuard<'_, Database> {
        self.db.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl DataService for StoreService {
    async fn select(
        &self,
        collection: Collection,
        filter: &Filter,
        order: Option<&OrderBy>,
        limit: Option<u32>,
    ) -> Result<Vec<Record>, ServiceError> {
        Ok(self.db().select(collection, filter, order, limit)?)
    }

    async fn count(&self, collection: Collection, filter: &Filter) -> Result<u64, ServiceError> {
        Ok(self.db().count(collection, filter)?)
    }

    async fn create(&self, collection: Collection, fields: Record) -> Result<Record, ServiceError> {
        Ok(self.db().create(collection, &fields)?)
    }

    async fn merge(&self, id: &RecordId, partial: Record) -> Result<Record, ServiceError> {
        Ok(self.db().merge(id, &partial)?)
    }

    async fn merge_if(
        &self,
        id: &RecordId,
        partial: Record,
        precondition: &Filter,
    ) -> Result<Option<Record>, ServiceError> {
        Ok(self.db().merge_if(id, &partial, precondition)?)
    }

    async fn delete(&self, id: &RecordId) -> Result<Record, ServiceError> {
        Ok(self.db().delete(id)?)
    }

    async fn live(&self, collection: Collection) -> Result<Feed, ServiceError> {
        let query = self.hub.live(collection);
        Ok(Feed {
            id: query.id,
            collection: query.collection,
            events: query.events,
        })
    }

    async fn kill(&self, feed: Uuid) -> Result<(), ServiceError> {
        Ok(self.hub.kill(feed)?)
    }
}
