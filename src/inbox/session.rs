//! Inbox session: the state behind one open inbox view.
//!
//! `InboxState` is the pure part. It decides which fetch results still
//! apply. `InboxSession` drives it: it spawns fetches, owns the live feed
//! and the composer, and follows identity changes.

use std::sync::Arc;

use anyhow::Result;
use tokio::sync::{mpsc, watch};

use super::composer::Composer;
use super::contacts::load_contacts;
use super::conversation::{load_conversation, Conversation};
use super::live::{LiveFeed, RealtimeChannel};
use super::read_state::{ReadStateSync, SettlePolicy, SyncOutcome};
use super::{InboxError, UnreadBadge};
use crate::api::MessageStore;
use crate::auth::IdentityContext;
use crate::models::{Contact, Message, Principal, UserId};

/// Tag carried by every fetch issued for a conversation selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Selection {
    pub counterparty: UserId,
    pub generation: u64,
}

#[derive(Debug, Default)]
pub struct InboxState {
    principal: Option<UserId>,
    /// Bumped on every identity change; tags contact loads.
    epoch: u64,
    contacts: Vec<Contact>,
    selection: Option<Selection>,
    generation: u64,
    redirected: bool,
    conversation: Conversation,
}

impl InboxState {
    pub fn new(principal: Option<UserId>) -> Self {
        Self {
            principal,
            ..Default::default()
        }
    }

    pub fn principal(&self) -> Option<UserId> {
        self.principal
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn contacts(&self) -> &[Contact] {
        &self.contacts
    }

    pub fn selection(&self) -> Option<Selection> {
        self.selection
    }

    pub fn counterparty(&self) -> Option<UserId> {
        self.selection.map(|s| s.counterparty)
    }

    pub fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    /// Switch identity. Everything derived from the old principal is
    /// dropped. Returns false if nothing changed.
    pub fn set_principal(&mut self, principal: Option<UserId>) -> bool {
        if self.principal == principal {
            return false;
        }
        self.principal = principal;
        self.epoch += 1;
        self.contacts.clear();
        self.selection = None;
        self.redirected = false;
        self.conversation.clear();
        true
    }

    /// Open a conversation. Results tagged with older selections no
    /// longer apply.
    pub fn select(&mut self, counterparty: UserId) -> Selection {
        self.generation += 1;
        let selection = Selection {
            counterparty,
            generation: self.generation,
        };
        self.selection = Some(selection);
        // a manual choice also rules out the automatic one
        self.redirected = true;
        self.conversation.clear();
        selection
    }

    pub fn is_current(&self, tag: Selection) -> bool {
        self.selection == Some(tag)
    }

    /// Install a contact list loaded under `epoch`.
    ///
    /// Returns the counterparty to open when this is the first list and
    /// nothing is selected yet. `None` also when the list was stale.
    pub fn apply_contacts(&mut self, epoch: u64, contacts: Vec<Contact>) -> Option<UserId> {
        if epoch != self.epoch {
            tracing::debug!("Discarding contacts from epoch {}", epoch);
            return None;
        }
        self.contacts = contacts;
        if self.selection.is_some() || self.redirected {
            return None;
        }
        let first = self.contacts.first()?.counterparty;
        self.redirected = true;
        Some(first)
    }

    /// Install a loaded history. Returns false if `tag` is stale.
    pub fn apply_conversation(&mut self, tag: Selection, history: Vec<Message>) -> bool {
        if !self.is_current(tag) {
            tracing::debug!(
                "Discarding history for {} (generation {})",
                tag.counterparty,
                tag.generation
            );
            return false;
        }
        self.conversation.replace(history);
        true
    }

    /// Append a live or just-sent message if it belongs to the open
    /// conversation and is not already shown.
    pub fn apply_message(&mut self, msg: Message) -> bool {
        let (Some(principal), Some(counterparty)) = (self.principal, self.counterparty()) else {
            return false;
        };
        if !msg.involves_pair(principal, counterparty) {
            return false;
        }
        self.conversation.push(msg)
    }

    /// Reflect a completed read sync in the contact list.
    pub fn clear_unread(&mut self, counterparty: UserId) {
        if let Some(contact) = self.contacts.iter_mut().find(|c| c.counterparty == counterparty) {
            contact.unread = 0;
        }
    }
}

/// Completions of background fetches, tagged with what they were for.
enum SessionEvent {
    Contacts {
        epoch: u64,
        result: Result<Vec<Contact>>,
    },
    Conversation {
        tag: Selection,
        result: Result<Vec<Message>>,
    },
    ReadSynced {
        epoch: u64,
        tag: Selection,
        result: Result<SyncOutcome>,
    },
    Recounted {
        epoch: u64,
        result: Result<u64>,
    },
}

/// Something `InboxSession::apply` has to act on.
///
/// Waiting for one with `next_input` is cancel-safe; the work happens in
/// `apply`, which the caller runs to completion.
pub struct Input(Pending);

enum Pending {
    Event(SessionEvent),
    Live(Message),
    Identity(Option<Principal>),
    Ignored,
}

/// What changed after one `pump` step.
#[derive(Debug, Clone, PartialEq)]
pub enum Update {
    Contacts,
    /// The first contact was opened automatically.
    Redirected(UserId),
    History(UserId),
    Message(Message),
    Unread(u64),
    Identity(Option<Principal>),
    Failed(String),
}

pub struct InboxSession<S, R> {
    store: Arc<S>,
    identity: IdentityContext,
    identity_rx: watch::Receiver<Option<Principal>>,
    read_sync: ReadStateSync<S>,
    feed: LiveFeed<R>,
    composer: Composer,
    state: InboxState,
    /// Counterparty asked for before anyone was signed in.
    deep_link: Option<UserId>,
    events_tx: mpsc::UnboundedSender<SessionEvent>,
    events_rx: mpsc::UnboundedReceiver<SessionEvent>,
}

impl<S, R> InboxSession<S, R>
where
    S: MessageStore + 'static,
    R: RealtimeChannel,
{
    pub fn new(
        store: Arc<S>,
        channel: Arc<R>,
        identity: IdentityContext,
        badge: Arc<UnreadBadge>,
        policy: SettlePolicy,
    ) -> Self {
        let mut identity_rx = identity.subscribe();
        let principal = identity_rx.borrow_and_update().as_ref().map(|p| p.id);
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            read_sync: ReadStateSync::new(Arc::clone(&store), badge, policy),
            store,
            identity,
            identity_rx,
            feed: LiveFeed::new(channel),
            composer: Composer::new(),
            state: InboxState::new(principal),
            deep_link: None,
            events_tx,
            events_rx,
        }
    }

    pub fn state(&self) -> &InboxState {
        &self.state
    }

    pub fn composer(&self) -> &Composer {
        &self.composer
    }

    pub fn identity(&self) -> &IdentityContext {
        &self.identity
    }

    /// Load contacts and the unread total for the current principal.
    pub fn start(&mut self) {
        self.refresh_contacts();
        self.refresh_unread();
    }

    /// Re-aggregate the contact list in the background.
    pub fn refresh_contacts(&mut self) {
        let epoch = self.state.epoch();
        let Some(principal) = self.state.principal() else {
            self.state.apply_contacts(epoch, Vec::new());
            return;
        };
        let store = Arc::clone(&self.store);
        let tx = self.events_tx.clone();
        tokio::spawn(async move {
            let result = load_contacts(&*store, principal).await;
            let _ = tx.send(SessionEvent::Contacts { epoch, result });
        });
    }

    fn refresh_unread(&self) {
        let Some(principal) = self.state.principal() else {
            return;
        };
        let epoch = self.state.epoch();
        let sync = self.read_sync.clone();
        let tx = self.events_tx.clone();
        tokio::spawn(async move {
            let result = sync.recount(principal).await;
            let _ = tx.send(SessionEvent::Recounted { epoch, result });
        });
    }

    /// Open the conversation with `counterparty`.
    ///
    /// History load and read-state sync run concurrently in the
    /// background; the live feed is switched over before this returns.
    pub async fn open(&mut self, counterparty: UserId) -> Selection {
        let tag = self.state.select(counterparty);
        let Some(principal) = self.state.principal() else {
            self.deep_link = Some(counterparty);
            self.feed.close().await;
            return tag;
        };
        self.deep_link = None;

        let store = Arc::clone(&self.store);
        let tx = self.events_tx.clone();
        tokio::spawn(async move {
            let result = load_conversation(&*store, principal, counterparty).await;
            let _ = tx.send(SessionEvent::Conversation { tag, result });
        });

        let epoch = self.state.epoch();
        let sync = self.read_sync.clone();
        let tx = self.events_tx.clone();
        tokio::spawn(async move {
            let result = sync.sync(Some(principal), counterparty).await;
            let _ = tx.send(SessionEvent::ReadSynced { epoch, tag, result });
        });

        if let Err(e) = self.feed.open(principal, counterparty).await {
            tracing::warn!("Live updates unavailable: {:#}", e);
        }
        tag
    }

    /// Attach a listing to the composer. Unknown products are ignored.
    pub async fn attach_product(&mut self, product_id: &str) -> Result<bool> {
        match self.store.product(product_id).await? {
            Some(product) => {
                self.composer.attach_product(product);
                Ok(true)
            }
            None => {
                tracing::warn!("Product {} not found", product_id);
                Ok(false)
            }
        }
    }

    /// Send the current draft, or `text` if given, to the open conversation.
    pub async fn send(&mut self, text: Option<String>) -> Result<Message> {
        if let Some(text) = text {
            self.composer.set_draft(text);
        }
        let principal = self.state.principal();
        let counterparty = self.state.counterparty();
        let stored = self.composer.send(&*self.store, principal, counterparty).await?;
        self.state.apply_message(stored.clone());
        Ok(stored)
    }

    /// Wait for the next background completion, live message or identity
    /// change. Nothing is changed until the input is applied.
    pub async fn next_input(&mut self) -> Input {
        loop {
            tokio::select! {
                Some(event) = self.events_rx.recv() => return Input(Pending::Event(event)),
                msg = self.feed.next() => {
                    // a feed that ended has closed itself and is pending now
                    if let Some(msg) = msg {
                        return Input(Pending::Live(msg));
                    }
                }
                changed = self.identity_rx.changed() => {
                    if changed.is_err() {
                        return Input(Pending::Ignored);
                    }
                    let principal = self.identity_rx.borrow_and_update().clone();
                    return Input(Pending::Identity(principal));
                }
            }
        }
    }

    /// Apply one input. `None` when it changed nothing visible.
    ///
    /// Not cancel-safe: callers must not drop the returned future.
    pub async fn apply(&mut self, input: Input) -> Option<Update> {
        match input.0 {
            Pending::Event(event) => self.apply_event(event).await,
            Pending::Live(msg) => self
                .state
                .apply_message(msg.clone())
                .then_some(Update::Message(msg)),
            Pending::Identity(principal) => self.on_identity(principal).await,
            Pending::Ignored => None,
        }
    }

    /// `next_input` followed by `apply`.
    #[cfg(test)]
    pub async fn pump(&mut self) -> Option<Update> {
        let input = self.next_input().await;
        self.apply(input).await
    }

    async fn apply_event(&mut self, event: SessionEvent) -> Option<Update> {
        match event {
            SessionEvent::Contacts { epoch, result } => match result {
                Ok(contacts) => {
                    let stale = epoch != self.state.epoch();
                    match self.state.apply_contacts(epoch, contacts) {
                        Some(first) => {
                            tracing::info!("Opening most recent conversation");
                            self.open(first).await;
                            Some(Update::Redirected(first))
                        }
                        None if stale => None,
                        None => Some(Update::Contacts),
                    }
                }
                Err(e) if epoch == self.state.epoch() => {
                    tracing::warn!("Contact list failed: {:#}", e);
                    Some(Update::Failed(format!("Could not load contacts: {:#}", e)))
                }
                Err(_) => None,
            },
            SessionEvent::Conversation { tag, result } => match result {
                Ok(history) => self
                    .state
                    .apply_conversation(tag, history)
                    .then_some(Update::History(tag.counterparty)),
                Err(e) if self.state.is_current(tag) => {
                    tracing::warn!("Conversation load failed: {:#}", e);
                    Some(Update::Failed(format!("Could not load messages: {:#}", e)))
                }
                Err(_) => None,
            },
            SessionEvent::ReadSynced { epoch, tag, result } => match result {
                Ok(_) if epoch != self.state.epoch() => None,
                Ok(outcome) => {
                    self.state.clear_unread(tag.counterparty);
                    self.read_sync.publish(outcome.unread_total);
                    Some(Update::Unread(outcome.unread_total))
                }
                Err(e) => {
                    if e.downcast_ref::<InboxError>().is_none() {
                        tracing::warn!("Read state sync failed: {:#}", e);
                    }
                    None
                }
            },
            SessionEvent::Recounted { epoch, result } => match result {
                Ok(_) if epoch != self.state.epoch() => None,
                Ok(total) => {
                    self.read_sync.publish(total);
                    Some(Update::Unread(total))
                }
                Err(e) => {
                    tracing::warn!("Unread recount failed: {:#}", e);
                    None
                }
            },
        }
    }

    async fn on_identity(&mut self, principal: Option<Principal>) -> Option<Update> {
        if !self.state.set_principal(principal.as_ref().map(|p| p.id)) {
            return None;
        }
        self.composer = Composer::new();
        if principal.is_none() {
            self.read_sync.reset();
        }
        self.start();
        self.feed.close().await;
        if principal.is_some() {
            if let Some(counterparty) = self.deep_link.take() {
                self.open(counterparty).await;
            }
        }
        Some(Update::Identity(principal))
    }

    /// Release the live subscription.
    pub async fn close(&mut self) {
        self.feed.close().await;
    }
}
