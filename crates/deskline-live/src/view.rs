//! Query/subscribe adapter and the async live-view handle.
//!
//! Opening a view subscribes to the collection feed *before* issuing the
//! initial read, so changes racing the read are buffered by the
//! [`ViewState`] rather than lost.

use std::sync::{Arc, Mutex, MutexGuard};

use deskline_shared::Filter;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};
use uuid::Uuid;

use crate::connection::Connection;
use crate::error::{QueryError, SubscriptionError};
use crate::projection::Projection;
use crate::reconcile::{Applied, Phase, ViewSpec, ViewState};
use crate::service::Feed;

type SharedState<P> = Arc<Mutex<ViewState<P>>>;

fn lock<P>(state: &Mutex<ViewState<P>>) -> MutexGuard<'_, ViewState<P>> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

struct FeedTask {
    id: Uuid,
    pump: JoinHandle<()>,
}

/// One open live view over a collection.
///
/// Dropping the handle closes the view; prefer [`LiveView::close`], which
/// also waits for the backend to release the feed.
pub struct LiveView<P: Projection> {
    conn: Connection,
    spec: ViewSpec,
    state: SharedState<P>,
    revisions: Arc<watch::Sender<u64>>,
    feed: Option<FeedTask>,
    is_static: bool,
}

/// Open a live view: subscribe, read, install.
///
/// An initial-read failure is returned as [`QueryError`]. A subscription
/// failure is not: the view comes back in static mode with the rows read.
pub async fn open_view<P: Projection>(
    conn: &Connection,
    spec: ViewSpec,
) -> Result<LiveView<P>, QueryError> {
    let state = Arc::new(Mutex::new(ViewState::new(spec.filter.clone(), spec.placement)));
    let (revisions, _) = watch::channel(0);
    let revisions = Arc::new(revisions);
    let mut view = LiveView {
        conn: conn.clone(),
        spec,
        state,
        revisions,
        feed: None,
        is_static: false,
    };
    view.mount().await?;
    Ok(view)
}

impl<P: Projection> LiveView<P> {
    /// Current rows, in view order.
    pub fn snapshot(&self) -> Vec<P> {
        lock(&self.state).rows().to_vec()
    }

    pub fn len(&self) -> usize {
        lock(&self.state).rows().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn phase(&self) -> Phase {
        lock(&self.state).phase()
    }

    pub fn generation(&self) -> u64 {
        lock(&self.state).generation()
    }

    /// Whether the view runs without a change feed (subscription failed).
    pub fn is_static(&self) -> bool {
        self.is_static
    }

    pub fn spec(&self) -> &ViewSpec {
        &self.spec
    }

    /// Receiver that ticks whenever the visible list changes.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.revisions.subscribe()
    }

    /// Revision of the visible list as last published.
    pub fn revision(&self) -> u64 {
        *self.revisions.borrow()
    }

    /// Wait until the list has moved past revision `seen` and return the
    /// revision it is at now. Returns at once if that already happened, so a
    /// change published between two calls is not missed.
    pub async fn changed(&self, seen: u64) -> u64 {
        let mut rx = self.revisions.subscribe();
        // The sender lives as long as `self`, so this cannot fail.
        let revision = match rx.wait_for(|revision| *revision != seen).await {
            Ok(revision) => *revision,
            Err(_) => seen,
        };
        revision
    }

    /// Re-run the whole open sequence under a new filter.
    ///
    /// The generation is bumped first, so events still draining from the
    /// previous feed can no longer touch the list.
    pub async fn reopen(&mut self, filter: Filter) -> Result<(), QueryError> {
        self.spec.filter = filter;
        self.mount().await
    }

    /// Close the view: mark it `Closed`, then ask the backend to release
    /// the feed. A release failure is logged only.
    pub async fn close(&mut self) {
        lock(&self.state).close();
        self.publish_revision();
        self.release_feed().await;
    }

    async fn mount(&mut self) -> Result<(), QueryError> {
        let collection = self.spec.collection;
        let generation = lock(&self.state).begin(self.spec.filter.clone());
        self.publish_revision();
        self.release_feed().await;

        match self.conn.live(collection).await {
            Ok(feed) => {
                self.is_static = false;
                self.feed = Some(self.spawn_pump(feed, generation));
            }
            Err(source) => {
                let e = SubscriptionError { collection, source };
                warn!(error = %e, "live updates unavailable, view is static");
                self.is_static = true;
            }
        }

        let read = self
            .conn
            .select(collection, &self.spec.filter, self.spec.order.as_ref(), None)
            .await;
        let rows = match read {
            Ok(rows) => rows,
            Err(source) => {
                lock(&self.state).close();
                self.publish_revision();
                self.release_feed().await;
                return Err(QueryError { collection, source });
            }
        };

        let initial: Vec<P> = rows
            .iter()
            .filter_map(|record| match P::from_record(record) {
                Ok(p) => Some(p),
                Err(e) => {
                    warn!(%collection, error = %e, "dropping row that cannot be projected");
                    None
                }
            })
            .collect();

        let count = initial.len();
        let outcomes = lock(&self.state).install(generation, initial);
        self.publish_revision();
        debug!(
            %collection,
            generation,
            rows = count,
            replayed = outcomes.len(),
            is_static = self.is_static,
            "live view mounted"
        );
        for outcome in &outcomes {
            log_outcome(outcome);
        }
        Ok(())
    }

    fn spawn_pump(&self, feed: Feed, generation: u64) -> FeedTask {
        let id = feed.id;
        let state = Arc::clone(&self.state);
        let revisions = Arc::clone(&self.revisions);
        let pump = tokio::spawn(pump(feed.events, state, revisions, generation));
        FeedTask { id, pump }
    }

    async fn release_feed(&mut self) {
        if let Some(task) = self.feed.take() {
            if let Err(e) = self.conn.kill(task.id).await {
                warn!(feed = %task.id, error = %e, "failed to release live query");
            }
            // The pump drains the final CLOSE on its own; anything it still
            // delivers is stale or lands on a closed view.
            drop(task.pump);
        }
    }

    fn publish_revision(&self) {
        let revision = lock(&self.state).revision();
        self.revisions.send_replace(revision);
    }
}

impl<P: Projection> Drop for LiveView<P> {
    fn drop(&mut self) {
        lock(&self.state).close();
        if let Some(task) = self.feed.take() {
            let conn = self.conn.clone();
            if let Ok(handle) = tokio::runtime::Handle::try_current() {
                handle.spawn(async move {
                    if let Err(e) = conn.kill(task.id).await {
                        debug!(feed = %task.id, error = %e, "live query already released");
                    }
                });
            }
        }
    }
}

/// Apply feed events in arrival order until the feed ends or closes.
async fn pump<P: Projection>(
    mut events: mpsc::UnboundedReceiver<deskline_shared::Notification>,
    state: SharedState<P>,
    revisions: Arc<watch::Sender<u64>>,
    generation: u64,
) {
    while let Some(notification) = events.recv().await {
        let (outcome, revision) = {
            let mut state = lock(&state);
            let outcome = state.deliver(generation, notification.action, &notification.record);
            (outcome, state.revision())
        };
        log_outcome(&outcome);
        if outcome.changed() {
            revisions.send_replace(revision);
        }
        if outcome == Applied::Closed {
            break;
        }
    }
    trace!(generation, "feed pump finished");
}

fn log_outcome(outcome: &Applied) {
    match outcome {
        Applied::Rejected(e) => debug!(error = %e, "feed event not applied"),
        Applied::Ignored(reason) => trace!(?reason, "feed event ignored"),
        other => trace!(outcome = ?other, "feed event applied"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::ConnectionProvider;
    use crate::projection::ChatRoom;

    #[tokio::test]
    async fn open_on_empty_collection_goes_live() {
        let conn = ConnectionProvider::in_memory().acquire().await.unwrap();
        let mut view = open_view::<ChatRoom>(&conn, ViewSpec::chat_rooms())
            .await
            .unwrap();
        assert_eq!(view.phase(), Phase::Live);
        assert!(view.is_empty());
        assert!(!view.is_static());

        view.close().await;
        assert_eq!(view.phase(), Phase::Closed);
    }

    #[tokio::test]
    async fn reopen_bumps_generation() {
        let conn = ConnectionProvider::in_memory().acquire().await.unwrap();
        let mut view = open_view::<ChatRoom>(&conn, ViewSpec::chat_rooms())
            .await
            .unwrap();
        let first = view.generation();
        view.reopen(Filter::eq("status", "pending")).await.unwrap();
        assert_eq!(view.generation(), first + 1);
        assert_eq!(view.phase(), Phase::Live);
        assert_eq!(view.spec().filter, Filter::eq("status", "pending"));
    }
}
