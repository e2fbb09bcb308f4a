//! Connection provider.
//!
//! Establishes the data-service session once and hands clones of the same
//! handle to every caller. A failed attempt is not cached, so the next
//! `acquire` retries.

use std::future::Future;
use std::ops::Deref;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use deskline_store::Database;
use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::sync::OnceCell;
use uuid::Uuid;

use crate::error::ConnectionError;
use crate::service::{DataService, StoreService};

/// Shared handle to the data service.
///
/// Cheap to clone; usable from any task.
#[derive(Clone)]
pub struct Connection {
    service: Arc<dyn DataService>,
    session: Uuid,
}

impl Connection {
    pub fn new(service: Arc<dyn DataService>) -> Self {
        Self {
            service,
            session: Uuid::new_v4(),
        }
    }

    /// Identifier of the underlying session, for logging.
    pub fn session(&self) -> Uuid {
        self.session
    }
}

impl Deref for Connection {
    type Target = dyn DataService;

    fn deref(&self) -> &Self::Target {
        self.service.as_ref()
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("session", &self.session)
            .finish_non_exhaustive()
    }
}

type Connector =
    Box<dyn Fn() -> BoxFuture<'static, Result<Arc<dyn DataService>, ConnectionError>> + Send + Sync>;

pub struct ConnectionProvider {
    connector: Connector,
    cell: OnceCell<Connection>,
}

impl ConnectionProvider {
    pub fn new<F, Fut>(connector: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Arc<dyn DataService>, ConnectionError>> + Send + 'static,
    {
        Self {
            connector: Box::new(move || connector().boxed()),
            cell: OnceCell::new(),
        }
    }

    /// Provider for the SQLite store at `path`.
    pub fn sqlite(path: PathBuf) -> Self {
        Self::new(move || {
            let path = path.clone();
            async move { sqlite_service(&path) }
        })
    }

    /// Provider for a private in-memory store.
    pub fn in_memory() -> Self {
        Self::new(|| async { memory_service() })
    }

    /// Provider wrapping an already-established service.
    pub fn from_service(service: Arc<dyn DataService>) -> Self {
        Self::new(move || {
            let service = Arc::clone(&service);
            async move { Ok::<_, ConnectionError>(service) }
        })
    }

    /// Return the shared connection, establishing it on first use.
    pub async fn acquire(&self) -> Result<Connection, ConnectionError> {
        self.cell
            .get_or_try_init(|| async {
                match (self.connector)().await {
                    Ok(service) => {
                        let conn = Connection::new(service);
                        tracing::info!(session = %conn.session(), "connected to data service");
                        Ok(conn)
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "failed to connect to data service");
                        Err(e)
                    }
                }
            })
            .await
            .cloned()
    }

    pub fn is_connected(&self) -> bool {
        self.cell.initialized()
    }
}

fn sqlite_service(path: &Path) -> Result<Arc<dyn DataService>, ConnectionError> {
    let db = Database::open_at(path).map_err(|e| ConnectionError::Unavailable(e.to_string()))?;
    Ok(Arc::new(StoreService::new(db)))
}

fn memory_service() -> Result<Arc<dyn DataService>, ConnectionError> {
    let db = Database::open_in_memory().map_err(|e| ConnectionError::Unavailable(e.to_string()))?;
    Ok(Arc::new(StoreService::new(db)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn acquire_is_idempotent() {
        let provider = ConnectionProvider::in_memory();
        let a = provider.acquire().await.unwrap();
        let b = provider.acquire().await.unwrap();
        assert_eq!(a.session(), b.session());
        assert!(provider.is_connected());
    }

    #[tokio::test]
    async fn concurrent_first_acquire_connects_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let provider = Arc::new(ConnectionProvider::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            async {
                tokio::task::yield_now().await;
                memory_service()
            }
        }));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let p = Arc::clone(&provider);
                tokio::spawn(async move { p.acquire().await.unwrap().session() })
            })
            .collect();
        let mut sessions = Vec::new();
        for h in handles {
            sessions.push(h.await.unwrap());
        }
        sessions.dedup();
        assert_eq!(sessions.len(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failed_connect_is_retried() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let provider = ConnectionProvider::new(move || {
            let attempt = counter.fetch_add(1, Ordering::SeqCst);
            async move {
                if attempt == 0 {
                    return Err(ConnectionError::Unavailable("down".into()));
                }
                memory_service()
            }
        });

        assert!(provider.acquire().await.is_err());
        assert!(!provider.is_connected());
        assert!(provider.acquire().await.is_ok());
    }

    #[tokio::test]
    async fn sqlite_provider_opens_file() {
        let dir = tempfile::tempdir().unwrap();
        let provider = ConnectionProvider::sqlite(dir.path().join("desk.db"));
        provider.acquire().await.unwrap();
        assert!(dir.path().join("desk.db").exists());
    }
}
