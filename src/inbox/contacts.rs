//! Contact list: one row per conversation partner.
//!
//! Built from two separate result sets (messages the principal sent, and
//! messages the principal received) because the store cannot index an OR
//! across both columns. Everything after the fetch is a pure derivation.

use std::collections::{BTreeSet, HashMap};

use anyhow::Result;

use crate::api::MessageStore;
use crate::models::{Contact, Message, Profile, UserId, UNKNOWN_USER};

/// Fetch both directions concurrently, batch-resolve profiles, aggregate.
pub async fn load_contacts<S: MessageStore>(store: &S, principal: UserId) -> Result<Vec<Contact>> {
    let (sent, received) =
        futures::try_join!(store.sent_by(principal), store.received_by(principal))?;

    let ids: Vec<UserId> = counterparties(principal, &sent, &received)
        .into_iter()
        .collect();

    let profiles = if ids.is_empty() {
        Vec::new()
    } else {
        match store.profiles(&ids).await {
            Ok(p) => p,
            Err(e) => {
                tracing::warn!("Profile lookup failed, using placeholders: {:#}", e);
                Vec::new()
            }
        }
    };

    tracing::debug!(
        "Aggregating {} sent / {} received into {} contacts",
        sent.len(),
        received.len(),
        ids.len()
    );
    Ok(aggregate_contacts(principal, &sent, &received, &profiles))
}

/// Distinct partners across both sets, never the principal itself.
pub fn counterparties(principal: UserId, sent: &[Message], received: &[Message]) -> BTreeSet<UserId> {
    sent.iter()
        .map(|m| m.receiver_id)
        .chain(received.iter().map(|m| m.sender_id))
        .filter(|id| *id != principal)
        .collect()
}

#[derive(Default)]
struct Partial<'a> {
    last: Option<&'a Message>,
    unread: u64,
}

impl<'a> Partial<'a> {
    fn offer(&mut self, msg: &'a Message) {
        let newer = match self.last {
            Some(cur) => msg.chrono_cmp(cur).is_gt(),
            None => true,
        };
        if newer {
            self.last = Some(msg);
        }
    }
}

/// Derive the sorted contact list from already-fetched sets.
pub fn aggregate_contacts(
    principal: UserId,
    sent: &[Message],
    received: &[Message],
    profiles: &[Profile],
) -> Vec<Contact> {
    let mut partials: HashMap<UserId, Partial> = counterparties(principal, sent, received)
        .into_iter()
        .map(|id| (id, Partial::default()))
        .collect();

    for msg in sent {
        if let Some(p) = partials.get_mut(&msg.receiver_id) {
            p.offer(msg);
        }
    }
    for msg in received {
        if let Some(p) = partials.get_mut(&msg.sender_id) {
            p.offer(msg);
            if !msg.is_read {
                p.unread += 1;
            }
        }
    }

    let by_id: HashMap<UserId, &Profile> = profiles.iter().map(|p| (p.id, p)).collect();

    let mut contacts: Vec<Contact> = partials
        .into_iter()
        .map(|(id, partial)| {
            let profile = by_id.get(&id);
            Contact {
                counterparty: id,
                display_name: profile
                    .map(|p| p.display_name().to_string())
                    .unwrap_or_else(|| UNKNOWN_USER.to_string()),
                avatar_url: profile.and_then(|p| p.avatar_url.clone()),
                last_message: partial.last.map(|m| m.body.clone()),
                last_at: partial.last.map(|m| m.created_at),
                unread: partial.unread,
            }
        })
        .collect();

    // newest first; no timestamp sorts last
    contacts.sort_by(|a, b| {
        let by_time = match (a.last_at, b.last_at) {
            (Some(x), Some(y)) => y.cmp(&x),
            (Some(_), None) => std::cmp::Ordering::Less,
            (None, Some(_)) => std::cmp::Ordering::Greater,
            (None, None) => std::cmp::Ordering::Equal,
        };
        by_time.then_with(|| a.counterparty.cmp(&b.counterparty))
    });

    contacts
}
