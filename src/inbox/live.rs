//! Live delivery of new messages into the open conversation.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::models::{Message, UserId};
use crate::realtime::ChangeFilter;

/// How long `unsubscribe` waits for the connection task to leave.
const LEAVE_TIMEOUT: Duration = Duration::from_secs(2);

/// Source of row-insert notifications.
pub trait RealtimeChannel: Send + Sync {
    fn subscribe(&self, filter: ChangeFilter) -> impl Future<Output = Result<Subscription>> + Send;
}

/// Handle on one live subscription.
///
/// Dropping it signals the connection task to leave the channel; use
/// `unsubscribe` to also wait for that to finish.
pub struct Subscription {
    rx: mpsc::UnboundedReceiver<Message>,
    stop: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl Subscription {
    pub fn new(
        rx: mpsc::UnboundedReceiver<Message>,
        stop: oneshot::Sender<()>,
        task: JoinHandle<()>,
    ) -> Self {
        Self {
            rx,
            stop: Some(stop),
            task: Some(task),
        }
    }

    /// A subscription fed directly through the returned sender.
    #[cfg(test)]
    pub fn local() -> (mpsc::UnboundedSender<Message>, Self) {
        let (tx, rx) = mpsc::unbounded_channel();
        let sub = Self {
            rx,
            stop: None,
            task: None,
        };
        (tx, sub)
    }

    /// Next delivered message; `None` once the source has ended.
    pub async fn next(&mut self) -> Option<Message> {
        self.rx.recv().await
    }

    /// Stop delivery and wait for the connection to be released.
    pub async fn unsubscribe(mut self) {
        self.rx.close();
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Some(task) = self.task.take() {
            if tokio::time::timeout(LEAVE_TIMEOUT, task).await.is_err() {
                tracing::warn!("Realtime task did not stop in time");
            }
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
    }
}

/// Whether a delivered message belongs to the conversation between
/// `principal` and `counterparty`.
pub fn belongs_to(msg: &Message, principal: UserId, counterparty: UserId) -> bool {
    msg.involves_pair(principal, counterparty)
}

struct ActiveFeed {
    principal: UserId,
    counterparty: UserId,
    sub: Subscription,
}

/// At most one live subscription, bound to the open conversation.
pub struct LiveFeed<R> {
    channel: Arc<R>,
    active: Option<ActiveFeed>,
}

impl<R: RealtimeChannel> LiveFeed<R> {
    pub fn new(channel: Arc<R>) -> Self {
        Self {
            channel,
            active: None,
        }
    }

    #[cfg(test)]
    pub fn is_open(&self) -> bool {
        self.active.is_some()
    }

    /// Pair the feed currently filters for.
    #[cfg(test)]
    pub fn pair(&self) -> Option<(UserId, UserId)> {
        self.active.as_ref().map(|a| (a.principal, a.counterparty))
    }

    /// Release any existing subscription, then open one for the pair.
    pub async fn open(&mut self, principal: UserId, counterparty: UserId) -> Result<()> {
        self.close().await;
        let sub = self.channel.subscribe(ChangeFilter::message_inserts()).await?;
        tracing::debug!("Live feed open for {}", counterparty);
        self.active = Some(ActiveFeed {
            principal,
            counterparty,
            sub,
        });
        Ok(())
    }

    pub async fn close(&mut self) {
        if let Some(active) = self.active.take() {
            tracing::debug!("Live feed closed for {}", active.counterparty);
            active.sub.unsubscribe().await;
        }
    }

    /// Next message for the active pair. Never resolves while closed.
    ///
    /// Messages for other pairs are discarded. If the source ends the feed
    /// closes and `None` is returned.
    pub async fn next(&mut self) -> Option<Message> {
        let Some(active) = self.active.as_mut() else {
            return std::future::pending().await;
        };
        loop {
            match active.sub.next().await {
                Some(msg) if belongs_to(&msg, active.principal, active.counterparty) => {
                    return Some(msg);
                }
                Some(msg) => {
                    tracing::trace!("Live message {} not for this conversation", msg.id);
                }
                None => {
                    tracing::warn!("Live feed ended");
                    self.active = None;
                    return None;
                }
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::Mutex;

    /// Channel whose subscriptions are fed by the test.
    #[derive(Default)]
    pub struct ManualChannel {
        senders: Mutex<Vec<mpsc::UnboundedSender<Message>>>,
    }

    impl ManualChannel {
        /// Deliver to every subscription still listening.
        pub fn deliver(&self, msg: &Message) {
            let senders = self.senders.lock().unwrap();
            for tx in senders.iter().filter(|tx| !tx.is_closed()) {
                let _ = tx.send(msg.clone());
            }
        }

        pub fn open_count(&self) -> usize {
            let senders = self.senders.lock().unwrap();
            senders.iter().filter(|tx| !tx.is_closed()).count()
        }

        pub fn total_subscribed(&self) -> usize {
            self.senders.lock().unwrap().len()
        }
    }

    impl RealtimeChannel for ManualChannel {
        async fn subscribe(&self, _filter: ChangeFilter) -> Result<Subscription> {
            let (tx, sub) = Subscription::local();
            self.senders.lock().unwrap().push(tx);
            Ok(sub)
        }
    }
}
