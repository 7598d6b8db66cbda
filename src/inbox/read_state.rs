//! Read-state synchronization for an opened conversation.
//!
//! Marks the counterparty's unread messages as read, waits until the store
//! reflects the update, then recounts the principal's total unread. The
//! caller decides whether the total still applies and hands it back to
//! `publish`.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;

use super::badge::UnreadBadge;
use super::InboxError;
use crate::api::MessageStore;
use crate::config::Config;
use crate::models::UserId;

/// Longest single wait between visibility checks.
const MAX_SETTLE_DELAY: Duration = Duration::from_secs(5);

/// How long to wait for a mark-as-read to become visible to reads.
///
/// The store does not promise read-after-write consistency, so the recount
/// is gated on the counterparty's unread count reading zero, checked with
/// exponential backoff starting at `initial_delay`.
#[derive(Debug, Clone, Copy)]
pub struct SettlePolicy {
    pub initial_delay: Duration,
    pub attempts: u32,
}

impl SettlePolicy {
    pub fn from_config(config: &Config) -> Self {
        Self {
            initial_delay: config.settle_delay(),
            attempts: config.settle_attempts(),
        }
    }

    /// No waiting; for stores that are read-your-writes consistent.
    pub fn immediate() -> Self {
        Self {
            initial_delay: Duration::ZERO,
            attempts: 1,
        }
    }
}

/// Result of one synchronization pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncOutcome {
    /// Messages flipped to read by this pass.
    pub marked: u64,
    /// Total unread after the pass.
    pub unread_total: u64,
    /// Whether the update was confirmed visible before recounting.
    pub confirmed: bool,
}

pub struct ReadStateSync<S> {
    store: Arc<S>,
    badge: Arc<UnreadBadge>,
    policy: SettlePolicy,
}

impl<S> Clone for ReadStateSync<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            badge: Arc::clone(&self.badge),
            policy: self.policy,
        }
    }
}

impl<S: MessageStore> ReadStateSync<S> {
    pub fn new(store: Arc<S>, badge: Arc<UnreadBadge>, policy: SettlePolicy) -> Self {
        Self {
            store,
            badge,
            policy,
        }
    }

    /// Mark `counterparty → principal` as read and recount.
    ///
    /// If the update fails no total is produced, so the badge keeps its
    /// last value until the next successful pass.
    pub async fn sync(&self, principal: Option<UserId>, counterparty: UserId) -> Result<SyncOutcome> {
        let principal = principal.ok_or(InboxError::NotAuthenticated)?;

        let marked = self.store.mark_read(principal, counterparty).await?;
        tracing::debug!("Marked {} messages from {} as read", marked, counterparty);

        let confirmed = if marked == 0 {
            true
        } else {
            self.settle(principal, counterparty).await
        };
        if !confirmed {
            tracing::warn!(
                "Read state for {} not visible after {} checks, recounting anyway",
                counterparty,
                self.policy.attempts
            );
        }

        let unread_total = self.recount(principal).await?;
        Ok(SyncOutcome {
            marked,
            unread_total,
            confirmed,
        })
    }

    /// Count all unread messages for `principal`.
    pub async fn recount(&self, principal: UserId) -> Result<u64> {
        self.store.count_unread(principal, None).await
    }

    /// Show `total` on the badge.
    pub fn publish(&self, total: u64) {
        self.badge.publish(total);
    }

    /// Nobody signed in: nothing is unread.
    pub fn reset(&self) {
        self.badge.publish(0);
    }

    async fn settle(&self, principal: UserId, counterparty: UserId) -> bool {
        let mut delay = self.policy.initial_delay;
        for attempt in 1..=self.policy.attempts.max(1) {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            match self.store.count_unread(principal, Some(counterparty)).await {
                Ok(0) => return true,
                Ok(n) => tracing::debug!("{} still unread on check {}", n, attempt),
                Err(e) => tracing::warn!("Unread check {} failed: {:#}", attempt, e),
            }
            delay = (delay * 2).min(MAX_SETTLE_DELAY);
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::MemoryStore;
    use std::sync::atomic::Ordering;
    use uuid::Uuid;

    fn setup() -> (Arc<MemoryStore>, Arc<UnreadBadge>, ReadStateSync<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let badge = Arc::new(UnreadBadge::new(0));
        let sync = ReadStateSync::new(Arc::clone(&store), Arc::clone(&badge), SettlePolicy::immediate());
        (store, badge, sync)
    }

    #[tokio::test]
    async fn test_opening_conversation_clears_only_that_sender() {
        let (store, badge, sync) = setup();
        let (p, c, d) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        for _ in 0..3 {
            store.seed(c, p, "from c", false);
        }
        for _ in 0..2 {
            store.seed(d, p, "from d", false);
        }
        sync.publish(sync.recount(p).await.unwrap());
        assert_eq!(badge.current(), 5);

        let outcome = sync.sync(Some(p), c).await.unwrap();
        assert_eq!(outcome.marked, 3);
        assert_eq!(outcome.unread_total, 2);
        // counting alone leaves the badge to the caller
        assert_eq!(badge.current(), 5);
        sync.publish(outcome.unread_total);
        assert_eq!(badge.current(), 2);
    }

    #[tokio::test]
    async fn test_sync_is_idempotent() {
        let (store, badge, sync) = setup();
        let (p, c) = (Uuid::new_v4(), Uuid::new_v4());
        store.seed(c, p, "hi", false);
        store.seed(c, p, "again", false);

        let first = tokio_test::assert_ok!(sync.sync(Some(p), c).await);
        let snapshot = store.all();
        let second = tokio_test::assert_ok!(sync.sync(Some(p), c).await);

        assert_eq!(first.marked, 2);
        assert_eq!(second.marked, 0);
        assert_eq!(first.unread_total, second.unread_total);
        assert_eq!(store.all(), snapshot);
        assert_eq!(badge.current(), 0);
        assert_eq!(second.unread_total, 0);
    }

    #[tokio::test]
    async fn test_failed_update_leaves_badge_stale() {
        let (store, badge, sync) = setup();
        let (p, c) = (Uuid::new_v4(), Uuid::new_v4());
        store.seed(c, p, "hi", false);
        sync.publish(sync.recount(p).await.unwrap());
        store.fail_mark_read.store(true, Ordering::SeqCst);

        assert!(sync.sync(Some(p), c).await.is_err());
        assert_eq!(badge.current(), 1);
    }

    #[tokio::test]
    async fn test_waits_until_update_visible() {
        let store = Arc::new(MemoryStore::new());
        let badge = Arc::new(UnreadBadge::new(0));
        let policy = SettlePolicy {
            initial_delay: Duration::from_millis(1),
            attempts: 3,
        };
        let sync = ReadStateSync::new(Arc::clone(&store), Arc::clone(&badge), policy);
        let (p, c) = (Uuid::new_v4(), Uuid::new_v4());
        store.seed(c, p, "hi", false);
        store.stale_counts.store(1, Ordering::SeqCst);

        let outcome = sync.sync(Some(p), c).await.unwrap();
        assert!(outcome.confirmed);
        assert_eq!(outcome.unread_total, 0);
    }

    #[tokio::test]
    async fn test_unconfirmed_still_recounts() {
        let (store, _badge, sync) = setup();
        let (p, c) = (Uuid::new_v4(), Uuid::new_v4());
        store.seed(c, p, "hi", false);
        // first check stale, single attempt allowed
        store.stale_counts.store(1, Ordering::SeqCst);

        let outcome = sync.sync(Some(p), c).await.unwrap();
        assert!(!outcome.confirmed);
        assert_eq!(outcome.unread_total, 0);
    }

    #[tokio::test]
    async fn test_signed_out_is_blocked() {
        let (store, _badge, sync) = setup();
        let err = sync.sync(None, Uuid::new_v4()).await.unwrap_err();
        assert_eq!(
            err.downcast_ref::<InboxError>(),
            Some(&InboxError::NotAuthenticated)
        );
        assert_eq!(store.mark_read_calls.load(Ordering::SeqCst), 0);
    }
}
