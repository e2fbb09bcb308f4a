//! Derived views: values recomputed from scratch whenever a watched
//! collection changes.
//!
//! Unlike a [`LiveView`](crate::LiveView) nothing is reconciled here. Any
//! create, update or delete on a watched collection triggers a full
//! recompute; `CLOSE` notifications are ignored.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use deskline_shared::{Collection, Notification};
use futures::future::BoxFuture;
use futures::stream::{self, BoxStream, StreamExt};
use futures::FutureExt;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::connection::Connection;
use crate::error::{ServiceError, SubscriptionError};

type Recompute<T> = Arc<dyn Fn(Connection) -> BoxFuture<'static, Result<T, ServiceError>> + Send + Sync>;

pub struct DerivedView<T> {
    name: &'static str,
    conn: Connection,
    value: Arc<watch::Sender<T>>,
    feeds: Vec<Uuid>,
    task: Option<JoinHandle<()>>,
    closed: Arc<AtomicBool>,
}

impl<T> DerivedView<T>
where
    T: Clone + Default + Send + Sync + 'static,
{
    /// Subscribe to `collections`, compute the first value, and keep it
    /// current.
    ///
    /// Feeds that cannot be opened are logged and skipped. A failed first
    /// computation leaves `T::default()` in place.
    pub async fn open<F, Fut>(
        name: &'static str,
        conn: &Connection,
        collections: &[Collection],
        recompute: F,
    ) -> Self
    where
        F: Fn(Connection) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, ServiceError>> + Send + 'static,
    {
        let recompute: Recompute<T> = Arc::new(move |conn| recompute(conn).boxed());

        let mut feeds = Vec::new();
        let mut streams: Vec<BoxStream<'static, Notification>> = Vec::new();
        for &collection in collections {
            match conn.live(collection).await {
                Ok(feed) => {
                    feeds.push(feed.id);
                    streams.push(events(feed.events));
                }
                Err(source) => {
                    let e = SubscriptionError { collection, source };
                    warn!(view = name, error = %e, "derived view will not refresh on changes");
                }
            }
        }

        let initial = match recompute(conn.clone()).await {
            Ok(value) => value,
            Err(e) => {
                warn!(view = name, error = %e, "initial computation failed");
                T::default()
            }
        };
        let (value, _) = watch::channel(initial);
        let value = Arc::new(value);
        let closed = Arc::new(AtomicBool::new(false));

        let task = (!streams.is_empty()).then(|| {
            tokio::spawn(refresh(
                name,
                conn.clone(),
                stream::select_all(streams),
                recompute,
                Arc::clone(&value),
                Arc::clone(&closed),
            ))
        });

        debug!(view = name, feeds = feeds.len(), "derived view opened");
        Self {
            name,
            conn: conn.clone(),
            value,
            feeds,
            task,
            closed,
        }
    }
}

impl<T: Clone> DerivedView<T> {
    /// The latest successfully computed value.
    pub fn current(&self) -> T {
        self.value.borrow().clone()
    }

    /// Receiver that observes every new value.
    pub fn subscribe(&self) -> watch::Receiver<T> {
        self.value.subscribe()
    }

    /// Whether change feeds keep this view current.
    pub fn is_static(&self) -> bool {
        self.feeds.is_empty()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Stop refreshing and release the feeds. Release failures are logged.
    pub async fn close(&mut self) {
        self.closed.store(true, Ordering::SeqCst);
        for id in self.feeds.drain(..) {
            if let Err(e) = self.conn.kill(id).await {
                warn!(view = self.name, feed = %id, error = %e, "failed to release live query");
            }
        }
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl<T> Drop for DerivedView<T> {
    fn drop(&mut self) {
        self.closed.store(true, Ordering::SeqCst);
        if let Some(task) = self.task.take() {
            task.abort();
        }
        if self.feeds.is_empty() {
            return;
        }
        let feeds = std::mem::take(&mut self.feeds);
        let conn = self.conn.clone();
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                for id in feeds {
                    let _ = conn.kill(id).await;
                }
            });
        }
    }
}

fn events(rx: mpsc::UnboundedReceiver<Notification>) -> BoxStream<'static, Notification> {
    stream::unfold(rx, |mut rx| async move { rx.recv().await.map(|n| (n, rx)) }).boxed()
}

async fn refresh<T>(
    name: &'static str,
    conn: Connection,
    mut changes: stream::SelectAll<BoxStream<'static, Notification>>,
    recompute: Recompute<T>,
    value: Arc<watch::Sender<T>>,
    closed: Arc<AtomicBool>,
) where
    T: Send + Sync + 'static,
{
    while let Some(notification) = changes.next().await {
        if closed.load(Ordering::SeqCst) {
            break;
        }
        if !notification.action.is_record_change() {
            continue;
        }
        match recompute(conn.clone()).await {
            Ok(next) => {
                if closed.load(Ordering::SeqCst) {
                    break;
                }
                value.send_replace(next);
                debug!(
                    view = name,
                    collection = %notification.collection,
                    action = ?notification.action,
                    "derived view recomputed"
                );
            }
            Err(e) => warn!(view = name, error = %e, "recompute failed, keeping previous value"),
        }
    }
}
