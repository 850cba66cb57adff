//! Queue entry state definitions
//!
//! A crawl queue entry moves `pending → in_progress → {completed, failed}`.
//! The only way back is an explicit reset of a failed (or stale in-progress)
//! entry to `pending`; the crawl loop itself never re-opens an entry.

use std::fmt;

/// Processing state of a URL in the crawl queue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueStatus {
    /// Discovered and waiting to be claimed
    Pending,

    /// Claimed by a running session
    InProgress,

    /// Page fetched, extracted and its pagination links queued
    Completed,

    /// Terminal failure (policy denial, timeout, transport error, abort)
    Failed,
}

impl QueueStatus {
    /// Returns true if no further processing will happen for this entry
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Checks whether moving from `self` to `next` is a legal transition
    ///
    /// `Failed → Pending` and `InProgress → Pending` are operator resets;
    /// the crawl loop only ever uses the forward edges.
    pub fn can_transition_to(&self, next: QueueStatus) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::InProgress)
                | (Self::InProgress, Self::Completed)
                | (Self::InProgress, Self::Failed)
                | (Self::Failed, Self::Pending)
                | (Self::InProgress, Self::Pending)
        )
    }

    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "in_progress" => Some(Self::InProgress),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    /// Returns all queue states, in lifecycle order
    pub fn all_states() -> [Self; 4] {
        [
            Self::Pending,
            Self::InProgress,
            Self::Completed,
            Self::Failed,
        ]
    }
}

impl fmt::Display for QueueStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_terminal() {
        assert!(!QueueStatus::Pending.is_terminal());
        assert!(!QueueStatus::InProgress.is_terminal());
        assert!(QueueStatus::Completed.is_terminal());
        assert!(QueueStatus::Failed.is_terminal());
    }

    #[test]
    fn test_forward_transitions() {
        assert!(QueueStatus::Pending.can_transition_to(QueueStatus::InProgress));
        assert!(QueueStatus::InProgress.can_transition_to(QueueStatus::Completed));
        assert!(QueueStatus::InProgress.can_transition_to(QueueStatus::Failed));
    }

    #[test]
    fn test_reset_transitions() {
        assert!(QueueStatus::Failed.can_transition_to(QueueStatus::Pending));
        assert!(QueueStatus::InProgress.can_transition_to(QueueStatus::Pending));
    }

    #[test]
    fn test_illegal_transitions() {
        assert!(!QueueStatus::Pending.can_transition_to(QueueStatus::Completed));
        assert!(!QueueStatus::Pending.can_transition_to(QueueStatus::Failed));
        assert!(!QueueStatus::Completed.can_transition_to(QueueStatus::Pending));
        assert!(!QueueStatus::Completed.can_transition_to(QueueStatus::InProgress));
        assert!(!QueueStatus::Failed.can_transition_to(QueueStatus::InProgress));
    }

    #[test]
    fn test_roundtrip_db_string() {
        for state in QueueStatus::all_states() {
            let parsed = QueueStatus::from_db_string(state.to_db_string());
            assert_eq!(Some(state), parsed, "Failed roundtrip for {:?}", state);
        }
        assert_eq!(QueueStatus::from_db_string("fetching"), None);
    }

    #[test]
    fn test_display() {
        assert_eq!(format!("{}", QueueStatus::InProgress), "in_progress");
    }
}
