use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::{Collection, Record};

/// Kind of change delivered on a live-query feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeAction {
    Create,
    Update,
    Delete,
    /// Feed-level: the live query was killed. Carries no record.
    Close,
}

impl ChangeAction {
    /// Whether this action describes a record change (as opposed to a
    /// feed-level signal).
    pub fn is_record_change(&self) -> bool {
        !matches!(self, ChangeAction::Close)
    }
}

/// One notification on a live-query feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    /// The live query this notification was delivered on.
    pub query_id: Uuid,
    /// Collection the feed watches.
    pub collection: Collection,
    pub action: ChangeAction,
    /// Full record after the change (before, for deletes). Empty for `Close`.
    pub record: Record,
}

impl Notification {
    pub fn close(query_id: Uuid, collection: Collection) -> Self {
        Self {
            query_id,
            collection,
            action: ChangeAction::Close,
            record: Record::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn actions_use_feed_wire_names() {
        let json = serde_json::to_string(&ChangeAction::Create).unwrap();
        assert_eq!(json, "\"CREATE\"");
        let back: ChangeAction = serde_json::from_str("\"DELETE\"").unwrap();
        assert_eq!(back, ChangeAction::Delete);
    }

    #[test]
    fn close_carries_no_record() {
        let n = Notification::close(Uuid::new_v4(), Collection::Chat);
        assert!(!n.action.is_record_change());
        assert!(n.record.is_empty());
    }
}
