//! Reconciliation of change-feed events into an ordered local list.
//!
//! [`ViewState`] is the owned state of one live view. It is purely
//! synchronous: the async plumbing in [`crate::view`] feeds it events and
//! initial rows, always under its lock, so every application is atomic.
//!
//! Lifecycle per subscription (one *generation*):
//!
//! ```text
//! begin() ──> Loading ──install()──> Live ──close / CLOSE──> Closed
//!               │ events are buffered    │ events applied in order
//! ```
//!
//! Deliveries are tagged with the generation they were subscribed under and
//! dropped when it is no longer current, so a feed that is still draining
//! after a remount cannot touch the new list.

use deskline_shared::{ChangeAction, Collection, Filter, OrderBy, Record, RecordId};
use serde::Serialize;

use crate::error::EventApplyError;
use crate::projection::{record_id, Projection};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Loading,
    Live,
    Closed,
}

/// Where newly created records go.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    /// Newest first (reverse-chronological lists).
    Prepend,
    /// Oldest first (chronological lists).
    Append,
}

/// Everything needed to open a view.
#[derive(Debug, Clone, PartialEq)]
pub struct ViewSpec {
    pub collection: Collection,
    pub filter: Filter,
    /// Sort of the initial read. Feed events are placed by `placement`.
    pub order: Option<OrderBy>,
    pub placement: Placement,
}

impl ViewSpec {
    /// All chat rooms, newest first.
    pub fn chat_rooms() -> Self {
        Self {
            collection: Collection::Chat,
            filter: Filter::All,
            order: Some(OrderBy::desc("created_at")),
            placement: Placement::Prepend,
        }
    }

    /// Messages of one chat room, oldest first.
    pub fn chat_messages(chat: &RecordId) -> Self {
        Self {
            collection: Collection::Message,
            filter: Filter::eq("chat_id", chat.to_string()),
            order: Some(OrderBy::asc("created_at")),
            placement: Placement::Append,
        }
    }

    /// All customers, newest first.
    pub fn customers() -> Self {
        Self {
            collection: Collection::ChatUser,
            filter: Filter::All,
            order: Some(OrderBy::desc("created_at")),
            placement: Placement::Prepend,
        }
    }

    pub fn with_filter(mut self, filter: Filter) -> Self {
        self.filter = filter;
        self
    }
}

/// Why a delivery was screened out before reaching the list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    /// Delivered under a generation that is no longer current.
    StaleGeneration,
    /// The view is closed.
    ViewClosed,
    /// Initial rows arrived for a view that is already live.
    AlreadyLive,
    /// The record does not match the view's filter.
    FilteredOut,
    /// The record belongs to another collection.
    ForeignCollection,
}

/// Outcome of one delivery.
#[derive(Debug, Clone, PartialEq)]
pub enum Applied {
    Inserted(RecordId),
    Replaced(RecordId),
    Removed(RecordId),
    /// Held until the initial rows are installed.
    Buffered,
    /// A `CLOSE` moved the view to `Closed`.
    Closed,
    Ignored(IgnoreReason),
    /// Benign failure, logged only.
    Rejected(EventApplyError),
}

impl Applied {
    /// Whether the list changed.
    pub fn changed(&self) -> bool {
        matches!(
            self,
            Applied::Inserted(_) | Applied::Replaced(_) | Applied::Removed(_) | Applied::Closed
        )
    }
}

/// Owned state of one live view.
#[derive(Debug)]
pub struct ViewState<P> {
    phase: Phase,
    generation: u64,
    filter: Filter,
    placement: Placement,
    rows: Vec<P>,
    pending: Vec<(ChangeAction, Record)>,
    revision: u64,
}

impl<P: Projection> ViewState<P> {
    /// A state waiting for its first [`begin`](Self::begin).
    pub fn new(filter: Filter, placement: Placement) -> Self {
        Self {
            phase: Phase::Loading,
            generation: 0,
            filter,
            placement,
            rows: Vec::new(),
            pending: Vec::new(),
            revision: 0,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Bumped every time the visible list changes.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn rows(&self) -> &[P] {
        &self.rows
    }

    pub fn filter(&self) -> &Filter {
        &self.filter
    }

    /// Start a new subscription lifetime: back to `Loading` with an empty
    /// list. Returns the new generation token.
    pub fn begin(&mut self, filter: Filter) -> u64 {
        self.generation += 1;
        self.phase = Phase::Loading;
        self.filter = filter;
        self.rows.clear();
        self.pending.clear();
        self.revision += 1;
        self.generation
    }

    /// Install the initial read and replay whatever was buffered while it was
    /// in flight, exactly once and in arrival order.
    pub fn install(&mut self, generation: u64, initial: Vec<P>) -> Vec<Applied> {
        if generation != self.generation {
            return vec![Applied::Ignored(IgnoreReason::StaleGeneration)];
        }
        match self.phase {
            Phase::Loading => {}
            Phase::Live => return vec![Applied::Ignored(IgnoreReason::AlreadyLive)],
            Phase::Closed => return vec![Applied::Ignored(IgnoreReason::ViewClosed)],
        }

        self.rows = initial;
        self.phase = Phase::Live;
        self.revision += 1;

        let pending = std::mem::take(&mut self.pending);
        let mut outcomes = Vec::with_capacity(pending.len());
        for (action, record) in pending {
            if self.phase == Phase::Closed {
                outcomes.push(Applied::Ignored(IgnoreReason::ViewClosed));
                continue;
            }
            outcomes.push(self.apply(action, &record));
        }
        outcomes
    }

    /// Deliver one feed event received under `generation`.
    pub fn deliver(&mut self, generation: u64, action: ChangeAction, record: &Record) -> Applied {
        if generation != self.generation {
            return Applied::Ignored(IgnoreReason::StaleGeneration);
        }
        if self.phase == Phase::Closed {
            return Applied::Ignored(IgnoreReason::ViewClosed);
        }

        if action.is_record_change() {
            if let Some(id) = record_id(record) {
                if id.collection() != P::COLLECTION {
                    return Applied::Ignored(IgnoreReason::ForeignCollection);
                }
            }
            // A record that stopped matching may still be listed; `apply`
            // removes it. While loading only updates can name such a row.
            let may_depart = match action {
                ChangeAction::Update => true,
                ChangeAction::Create => self.phase == Phase::Live,
                _ => false,
            };
            if !may_depart && !self.filter.matches(record) {
                return Applied::Ignored(IgnoreReason::FilteredOut);
            }
        }

        if self.phase == Phase::Loading {
            self.pending.push((action, record.clone()));
            return Applied::Buffered;
        }

        self.apply(action, record)
    }

    /// Close the view from the owning side. The list is discarded.
    pub fn close(&mut self) {
        self.revision += 1;
        self.phase = Phase::Closed;
        self.rows.clear();
        self.pending.clear();
    }

    fn position(&self, id: &RecordId) -> Option<usize> {
        self.rows.iter().position(|p| p.id() == id)
    }

    /// A record that stopped matching the filter leaves the list.
    fn depart(&mut self, record: &Record) -> Applied {
        match record_id(record).and_then(|id| self.position(&id).map(|i| (i, id))) {
            Some((i, id)) => {
                self.rows.remove(i);
                Applied::Removed(id)
            }
            None => Applied::Ignored(IgnoreReason::FilteredOut),
        }
    }

    fn apply(&mut self, action: ChangeAction, record: &Record) -> Applied {
        let outcome = match action {
            ChangeAction::Close => {
                // Feed-side close: keep what we have, accept nothing more.
                self.phase = Phase::Closed;
                self.pending.clear();
                Applied::Closed
            }
            ChangeAction::Create | ChangeAction::Update if !self.filter.matches(record) => {
                self.depart(record)
            }
            ChangeAction::Create | ChangeAction::Update => match P::from_record(record) {
                Err(e) => Applied::Rejected(EventApplyError::from(e)),
                Ok(projection) => {
                    let id = projection.id().clone();
                    match (self.position(&id), action) {
                        (Some(i), _) => {
                            // A redelivered create is an update.
                            self.rows[i] = projection;
                            Applied::Replaced(id)
                        }
                        (None, ChangeAction::Create) => {
                            match self.placement {
                                Placement::Prepend => self.rows.insert(0, projection),
                                Placement::Append => self.rows.push(projection),
                            }
                            Applied::Inserted(id)
                        }
                        (None, _) => Applied::Rejected(EventApplyError::UnknownIdentity(id)),
                    }
                }
            },
            ChangeAction::Delete => match record_id(record) {
                None => Applied::Rejected(EventApplyError::MissingIdentity),
                Some(id) => match self.position(&id) {
                    Some(i) => {
                        self.rows.remove(i);
                        Applied::Removed(id)
                    }
                    None => Applied::Rejected(EventApplyError::UnknownIdentity(id)),
                },
            },
        };

        if outcome.changed() {
            self.revision += 1;
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::projection::{ChatRoom, ChatStatus, Message};
    use serde_json::json;

    fn chat(id: &str, status: &str) -> Record {
        json!({
            "id": format!("chat:{id}"),
            "status": status,
            "customer_name": "c",
            "created_at": "2024-01-01T00:00:00Z",
        })
        .as_object()
        .cloned()
        .unwrap()
    }

    fn message(id: &str, chat: &str) -> Record {
        json!({
            "id": format!("message:{id}"),
            "chat_id": format!("chat:{chat}"),
            "sender_id": "u",
            "content": id,
            "created_at": "2024-01-01T00:00:00Z",
        })
        .as_object()
        .cloned()
        .unwrap()
    }

    fn live_chats(initial: &[Record]) -> (ViewState<ChatRoom>, u64) {
        let mut state = ViewState::new(Filter::All, Placement::Prepend);
        let generation = state.begin(Filter::All);
        let rows = initial
            .iter()
            .map(|r| ChatRoom::from_record(r).unwrap())
            .collect();
        state.install(generation, rows);
        (state, generation)
    }

    fn ids<P: Projection>(state: &ViewState<P>) -> Vec<String> {
        state.rows().iter().map(|p| p.id().key().to_string()).collect()
    }

    #[test]
    fn create_update_delete_leave_latest_survivors() {
        let (mut s, g) = live_chats(&[]);
        s.deliver(g, ChangeAction::Create, &chat("a", "pending"));
        s.deliver(g, ChangeAction::Create, &chat("b", "pending"));
        s.deliver(g, ChangeAction::Create, &chat("c", "pending"));
        s.deliver(g, ChangeAction::Update, &chat("a", "closed"));
        s.deliver(g, ChangeAction::Delete, &chat("b", "pending"));

        assert_eq!(ids(&s), vec!["c", "a"]);
        assert_eq!(s.rows()[1].status, ChatStatus::Closed);
    }

    #[test]
    fn duplicate_create_behaves_as_update() {
        let (mut s, g) = live_chats(&[]);
        assert!(matches!(
            s.deliver(g, ChangeAction::Create, &chat("a", "pending")),
            Applied::Inserted(_)
        ));
        assert!(matches!(
            s.deliver(g, ChangeAction::Create, &chat("a", "active")),
            Applied::Replaced(_)
        ));
        assert_eq!(ids(&s), vec!["a"]);
        assert_eq!(s.rows()[0].status, ChatStatus::Active);
    }

    #[test]
    fn placement_controls_insert_position() {
        let (mut newest_first, g) = live_chats(&[]);
        newest_first.deliver(g, ChangeAction::Create, &chat("a", "pending"));
        newest_first.deliver(g, ChangeAction::Create, &chat("b", "pending"));
        assert_eq!(ids(&newest_first), vec!["b", "a"]);

        let mut chronological: ViewState<Message> = ViewState::new(Filter::All, Placement::Append);
        let g = chronological.begin(Filter::All);
        chronological.install(g, Vec::new());
        chronological.deliver(g, ChangeAction::Create, &message("a", "x"));
        chronological.deliver(g, ChangeAction::Create, &message("b", "x"));
        assert_eq!(ids(&chronological), vec!["a", "b"]);
    }

    #[test]
    fn events_outside_filter_never_appear() {
        let filter = Filter::eq("chat_id", "chat:x");
        let mut s: ViewState<Message> = ViewState::new(filter.clone(), Placement::Append);
        let g = s.begin(filter);

        // Before the initial read lands...
        assert_eq!(
            s.deliver(g, ChangeAction::Create, &message("early", "y")),
            Applied::Ignored(IgnoreReason::FilteredOut)
        );
        s.install(g, Vec::new());
        // ...and after.
        assert_eq!(
            s.deliver(g, ChangeAction::Create, &message("late", "y")),
            Applied::Ignored(IgnoreReason::FilteredOut)
        );
        s.deliver(g, ChangeAction::Create, &message("mine", "x"));
        assert_eq!(ids(&s), vec!["mine"]);
    }

    #[test]
    fn update_leaving_filter_removes_row() {
        let pending = Filter::eq("status", "pending");
        let mut s: ViewState<ChatRoom> = ViewState::new(pending.clone(), Placement::Prepend);
        let g = s.begin(pending);
        s.install(
            g,
            vec![
                ChatRoom::from_record(&chat("a", "pending")).unwrap(),
                ChatRoom::from_record(&chat("b", "pending")).unwrap(),
            ],
        );
        let before = s.revision();

        assert!(matches!(
            s.deliver(g, ChangeAction::Update, &chat("a", "closed")),
            Applied::Removed(_)
        ));
        assert_eq!(ids(&s), vec!["b"]);
        assert!(s.revision() > before);

        // A redelivered create is treated the same way.
        assert!(matches!(
            s.deliver(g, ChangeAction::Create, &chat("b", "active")),
            Applied::Removed(_)
        ));
        assert!(s.rows().is_empty());

        // Not listed, so nothing to remove.
        assert_eq!(
            s.deliver(g, ChangeAction::Update, &chat("ghost", "closed")),
            Applied::Ignored(IgnoreReason::FilteredOut)
        );
    }

    #[test]
    fn update_leaving_filter_while_loading_removes_after_install() {
        let pending = Filter::eq("status", "pending");
        let mut s: ViewState<ChatRoom> = ViewState::new(pending.clone(), Placement::Prepend);
        let g = s.begin(pending);

        assert_eq!(s.deliver(g, ChangeAction::Update, &chat("a", "closed")), Applied::Buffered);
        let outcomes = s.install(g, vec![ChatRoom::from_record(&chat("a", "pending")).unwrap()]);

        assert!(matches!(outcomes.as_slice(), [Applied::Removed(_)]));
        assert!(s.rows().is_empty());
    }

    #[test]
    fn loading_events_apply_once_after_install() {
        let mut s: ViewState<ChatRoom> = ViewState::new(Filter::All, Placement::Prepend);
        let g = s.begin(Filter::All);

        assert_eq!(s.deliver(g, ChangeAction::Create, &chat("new", "pending")), Applied::Buffered);
        assert_eq!(s.deliver(g, ChangeAction::Update, &chat("old", "active")), Applied::Buffered);
        assert!(s.rows().is_empty());

        let initial = vec![ChatRoom::from_record(&chat("old", "pending")).unwrap()];
        let outcomes = s.install(g, initial);

        assert_eq!(outcomes.len(), 2);
        assert_eq!(s.phase(), Phase::Live);
        assert_eq!(ids(&s), vec!["new", "old"]);
        assert_eq!(s.rows()[1].status, ChatStatus::Active);

        // The buffer is drained; a second install is stale.
        assert_eq!(
            s.install(g, Vec::new()),
            vec![Applied::Ignored(IgnoreReason::AlreadyLive)]
        );
        assert_eq!(ids(&s), vec!["new", "old"]);
    }

    #[test]
    fn initial_read_that_already_saw_a_buffered_create_does_not_duplicate() {
        let mut s: ViewState<ChatRoom> = ViewState::new(Filter::All, Placement::Prepend);
        let g = s.begin(Filter::All);
        s.deliver(g, ChangeAction::Create, &chat("a", "pending"));
        s.install(g, vec![ChatRoom::from_record(&chat("a", "pending")).unwrap()]);
        assert_eq!(ids(&s), vec!["a"]);
    }

    #[test]
    fn closed_view_ignores_everything() {
        let (mut s, g) = live_chats(&[chat("a", "pending")]);
        assert_eq!(s.deliver(g, ChangeAction::Close, &Record::new()), Applied::Closed);
        assert_eq!(s.phase(), Phase::Closed);
        assert_eq!(
            s.deliver(g, ChangeAction::Create, &chat("b", "pending")),
            Applied::Ignored(IgnoreReason::ViewClosed)
        );
        assert_eq!(ids(&s), vec!["a"]);

        s.close();
        assert!(s.rows().is_empty());
    }

    #[test]
    fn stale_generation_cannot_touch_new_list() {
        let (mut s, old) = live_chats(&[chat("a", "pending")]);
        let new = s.begin(Filter::All);
        s.install(new, vec![ChatRoom::from_record(&chat("z", "pending")).unwrap()]);

        assert_eq!(
            s.deliver(old, ChangeAction::Delete, &chat("z", "pending")),
            Applied::Ignored(IgnoreReason::StaleGeneration)
        );
        assert_eq!(
            s.install(old, Vec::new()),
            vec![Applied::Ignored(IgnoreReason::StaleGeneration)]
        );
        assert_eq!(ids(&s), vec!["z"]);
    }

    #[test]
    fn concrete_chat_room_scenario() {
        let (mut s, g) = live_chats(&[chat("c1", "pending")]);
        s.deliver(g, ChangeAction::Create, &chat("c2", "pending"));
        s.deliver(g, ChangeAction::Update, &chat("c1", "active"));

        let got: Vec<_> = s
            .rows()
            .iter()
            .map(|r| (r.id.key().to_string(), r.status))
            .collect();
        assert_eq!(
            got,
            vec![
                ("c2".to_string(), ChatStatus::Pending),
                ("c1".to_string(), ChatStatus::Active)
            ]
        );
    }

    #[test]
    fn unknown_identity_is_a_benign_no_op() {
        let (mut s, g) = live_chats(&[chat("a", "pending")]);
        let before = s.revision();

        let outcome = s.deliver(g, ChangeAction::Delete, &chat("ghost", "pending"));
        assert!(matches!(
            outcome,
            Applied::Rejected(EventApplyError::UnknownIdentity(_))
        ));
        let outcome = s.deliver(g, ChangeAction::Update, &chat("ghost", "active"));
        assert!(matches!(
            outcome,
            Applied::Rejected(EventApplyError::UnknownIdentity(_))
        ));

        assert_eq!(ids(&s), vec!["a"]);
        assert_eq!(s.revision(), before);
    }

    #[test]
    fn foreign_collection_records_are_screened() {
        let (mut s, g) = live_chats(&[]);
        assert_eq!(
            s.deliver(g, ChangeAction::Create, &message("m", "x")),
            Applied::Ignored(IgnoreReason::ForeignCollection)
        );
    }
}
