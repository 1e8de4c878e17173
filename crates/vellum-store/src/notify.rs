//! Commit notifications.
//!
//! Every commit that changed data publishes a [`CommitNotification`] on a
//! broadcast channel. Observers (such as a remote authority's writer) use it
//! to learn that new records may be waiting, then read them from a fresh
//! snapshot. Notifications carry no object data.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::broadcast;
use tracing::debug;

/// Capacity of the notification channel. Slow receivers see `Lagged`.
const CHANNEL_CAPACITY: usize = 256;

/// Published after a commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitNotification {
    /// Per-store commit counter, starting at 1.
    pub sequence: u64,
    /// Object types whose objects or definitions changed.
    pub changed_types: Vec<String>,
}

impl CommitNotification {
    /// Whether the commit touched `object_type`.
    pub fn touches(&self, object_type: &str) -> bool {
        self.changed_types.iter().any(|t| t == object_type)
    }
}

pub(crate) struct Notifier {
    sender: broadcast::Sender<CommitNotification>,
    sequence: AtomicU64,
}

impl Notifier {
    pub(crate) fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            sender,
            sequence: AtomicU64::new(0),
        }
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<CommitNotification> {
        self.sender.subscribe()
    }

    pub(crate) fn publish(&self, changed: BTreeSet<String>) {
        if changed.is_empty() {
            return;
        }
        let sequence = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
        debug!(sequence, changed = ?changed, "commit");

        // No receivers is not an error.
        let _ = self.sender.send(CommitNotification {
            sequence,
            changed_types: changed.into_iter().collect(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_publish_increments_sequence() {
        let notifier = Notifier::new();
        let mut rx = notifier.subscribe();

        notifier.publish(BTreeSet::from(["A".to_string()]));
        notifier.publish(BTreeSet::from(["B".to_string(), "C".to_string()]));

        let first = rx.try_recv().unwrap();
        let second = rx.try_recv().unwrap();
        assert_eq!(first.sequence, 1);
        assert_eq!(second.sequence, 2);
        assert!(second.touches("C"));
        assert!(!second.touches("A"));
    }

    #[test]
    fn test_empty_commit_not_published() {
        let notifier = Notifier::new();
        let mut rx = notifier.subscribe();

        notifier.publish(BTreeSet::new());
        assert!(rx.try_recv().is_err());
    }
}
