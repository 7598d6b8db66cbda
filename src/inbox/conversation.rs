//! Ordered message history with one counterparty.

use std::collections::HashSet;

use anyhow::Result;

use crate::api::MessageStore;
use crate::models::{Message, MessageId, UserId};

/// Fetch the full history between `principal` and `counterparty`.
pub async fn load_conversation<S: MessageStore>(
    store: &S,
    principal: UserId,
    counterparty: UserId,
) -> Result<Vec<Message>> {
    let mut msgs = store.conversation(principal, counterparty).await?;
    // the store orders already; keep only members and make ties deterministic
    msgs.retain(|m| m.involves_pair(principal, counterparty));
    msgs.sort_by(|a, b| a.chrono_cmp(b));
    tracing::debug!("Loaded {} messages with {}", msgs.len(), counterparty);
    Ok(msgs)
}

/// In-memory conversation view.
///
/// Written by a full `replace` (history load) and by `push` (live delivery
/// and local echo of sent messages). Ids are unique within the sequence.
#[derive(Debug, Default)]
pub struct Conversation {
    messages: Vec<Message>,
    ids: HashSet<MessageId>,
    /// Messages pushed since the last `replace`.
    appended: Vec<MessageId>,
}

impl Conversation {
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn contains(&self, id: &MessageId) -> bool {
        self.ids.contains(id)
    }

    pub fn clear(&mut self) {
        self.messages.clear();
        self.ids.clear();
        self.appended.clear();
    }

    /// Append in arrival order. Returns false for an id already shown.
    pub fn push(&mut self, msg: Message) -> bool {
        if !self.ids.insert(msg.id.clone()) {
            tracing::debug!("Duplicate message {} ignored", msg.id);
            return false;
        }
        self.appended.push(msg.id.clone());
        self.messages.push(msg);
        true
    }

    /// Install a loaded history.
    ///
    /// Messages pushed while the load was in flight and missing from
    /// `history` stay, after it, in their arrival order.
    pub fn replace(&mut self, history: Vec<Message>) {
        let mut pending: Vec<Message> = Vec::new();
        let history_ids: HashSet<&MessageId> = history.iter().map(|m| &m.id).collect();
        for id in &self.appended {
            if history_ids.contains(id) {
                continue;
            }
            if let Some(m) = self.messages.iter().find(|m| &m.id == id) {
                pending.push(m.clone());
            }
        }

        self.clear();
        for msg in history.into_iter().chain(pending) {
            if self.ids.insert(msg.id.clone()) {
                self.messages.push(msg);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::MemoryStore;
    use uuid::Uuid;

    #[tokio::test]
    async fn test_conversation_is_symmetric() {
        let store = MemoryStore::new();
        let (a, b, c) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        store.seed(a, b, "1", false);
        store.seed(b, a, "2", false);
        store.seed(a, c, "elsewhere", false);
        store.seed(a, b, "3", false);

        let ab = load_conversation(&store, a, b).await.unwrap();
        let ba = load_conversation(&store, b, a).await.unwrap();
        assert_eq!(ab, ba);
        let bodies: Vec<&str> = ab.iter().map(|m| m.body.as_str()).collect();
        assert_eq!(bodies, ["1", "2", "3"]);
    }

    #[tokio::test]
    async fn test_empty_conversation_is_not_an_error() {
        let store = MemoryStore::new();
        let msgs = load_conversation(&store, Uuid::new_v4(), Uuid::new_v4())
            .await
            .unwrap();
        assert!(msgs.is_empty());
    }

    #[test]
    fn test_push_dedupes_by_id() {
        let store = MemoryStore::new();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let msg = store.build(a, b, "echo".to_string(), false);

        let mut conv = Conversation::default();
        assert!(conv.push(msg.clone()));
        assert!(!conv.push(msg));
        assert_eq!(conv.len(), 1);
    }

    #[test]
    fn test_push_preserves_arrival_order() {
        let store = MemoryStore::new();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let older = store.build(a, b, "older".to_string(), false);
        let newer = store.build(b, a, "newer".to_string(), false);

        let mut conv = Conversation::default();
        conv.push(newer);
        conv.push(older);
        let bodies: Vec<&str> = conv.messages().iter().map(|m| m.body.as_str()).collect();
        assert_eq!(bodies, ["newer", "older"]);
    }

    #[test]
    fn test_replace_keeps_in_flight_pushes() {
        let store = MemoryStore::new();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let h1 = store.build(a, b, "h1".to_string(), false);
        let h2 = store.build(b, a, "h2".to_string(), false);
        let live = store.build(b, a, "live".to_string(), false);

        let mut conv = Conversation::default();
        conv.push(h2.clone());
        conv.push(live.clone());
        conv.replace(vec![h1, h2]);

        let bodies: Vec<&str> = conv.messages().iter().map(|m| m.body.as_str()).collect();
        assert_eq!(bodies, ["h1", "h2", "live"]);
        assert!(conv.contains(&live.id));
    }
}
