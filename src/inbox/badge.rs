//! Total unread count shown on the messages badge.
//!
//! The read-state synchronizer is the only writer; any number of readers
//! follow it through a `watch` receiver.

use tokio::sync::watch;

pub struct UnreadBadge {
    tx: watch::Sender<u64>,
}

impl UnreadBadge {
    pub fn new(initial: u64) -> Self {
        let (tx, _rx) = watch::channel(initial);
        Self { tx }
    }

    pub fn current(&self) -> u64 {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.tx.subscribe()
    }

    /// Publish a fresh total. Readers wake only when the value changes.
    pub(crate) fn publish(&self, count: u64) {
        self.tx.send_if_modified(|current| {
            if *current == count {
                false
            } else {
                tracing::debug!("Unread badge {} -> {}", current, count);
                *current = count;
                true
            }
        });
    }
}

impl Default for UnreadBadge {
    fn default() -> Self {
        Self::new(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_readers_see_published_value() {
        let badge = UnreadBadge::new(5);
        let rx = badge.subscribe();
        badge.publish(2);
        assert_eq!(*rx.borrow(), 2);
        assert_eq!(badge.current(), 2);
    }

    #[test]
    fn test_unchanged_value_does_not_wake() {
        let badge = UnreadBadge::new(3);
        let rx = badge.subscribe();
        badge.publish(3);
        assert!(!rx.has_changed().unwrap());
    }
}
