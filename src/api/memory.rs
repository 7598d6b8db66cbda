//! In-memory `MessageStore` for tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;

use anyhow::{bail, Result};
use chrono::{DateTime, Duration, TimeZone, Utc};

use super::store::MessageStore;
use crate::models::{Message, MessageId, NewMessage, ProductSnapshot, Profile, UserId};

pub struct MemoryStore {
    messages: Mutex<Vec<Message>>,
    profiles: Mutex<HashMap<UserId, Profile>>,
    products: Mutex<HashMap<String, ProductSnapshot>>,
    next_id: AtomicU64,
    /// Creation time handed to the next message; advances one second per insert.
    clock: Mutex<DateTime<Utc>>,
    pub fail_reads: AtomicBool,
    pub fail_profiles: AtomicBool,
    pub fail_mark_read: AtomicBool,
    /// Calls to `count_unread` that report stale (pre-update) data.
    pub stale_counts: AtomicU64,
    pub mark_read_calls: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            messages: Mutex::new(Vec::new()),
            profiles: Mutex::new(HashMap::new()),
            products: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            clock: Mutex::new(Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap()),
            fail_reads: AtomicBool::new(false),
            fail_profiles: AtomicBool::new(false),
            fail_mark_read: AtomicBool::new(false),
            stale_counts: AtomicU64::new(0),
            mark_read_calls: AtomicU64::new(0),
        }
    }

    pub fn add_profile(&self, id: UserId, name: &str) {
        self.profiles.lock().unwrap().insert(
            id,
            Profile {
                id,
                full_name: Some(name.to_string()),
                avatar_url: None,
            },
        );
    }

    pub fn add_product(&self, id: &str, product: ProductSnapshot) {
        self.products
            .lock()
            .unwrap()
            .insert(id.to_string(), product);
    }

    /// Seed a message as if inserted now; returns the stored record.
    pub fn seed(&self, from: UserId, to: UserId, body: &str, is_read: bool) -> Message {
        let msg = self.build(from, to, body.to_string(), is_read);
        self.messages.lock().unwrap().push(msg.clone());
        msg
    }

    /// Build a record with the next id and timestamp without storing it.
    pub fn build(&self, from: UserId, to: UserId, body: String, is_read: bool) -> Message {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let mut clock = self.clock.lock().unwrap();
        let created_at = *clock;
        *clock = created_at + Duration::seconds(1);
        Message {
            id: MessageId::new(id.to_string()),
            sender_id: from,
            receiver_id: to,
            body,
            is_read,
            created_at,
        }
    }

    pub fn all(&self) -> Vec<Message> {
        self.messages.lock().unwrap().clone()
    }

    fn check_reads(&self) -> Result<()> {
        if self.fail_reads.load(Ordering::SeqCst) {
            bail!("store unavailable");
        }
        Ok(())
    }

    fn unread_for(&self, receiver: UserId, sender: Option<UserId>) -> u64 {
        self.messages
            .lock()
            .unwrap()
            .iter()
            .filter(|m| m.receiver_id == receiver && !m.is_read)
            .filter(|m| sender.map_or(true, |s| m.sender_id == s))
            .count() as u64
    }
}

impl MessageStore for MemoryStore {
    async fn sent_by(&self, user: UserId) -> Result<Vec<Message>> {
        self.check_reads()?;
        Ok(self
            .all()
            .into_iter()
            .filter(|m| m.sender_id == user)
            .collect())
    }

    async fn received_by(&self, user: UserId) -> Result<Vec<Message>> {
        self.check_reads()?;
        Ok(self
            .all()
            .into_iter()
            .filter(|m| m.receiver_id == user)
            .collect())
    }

    async fn profiles(&self, ids: &[UserId]) -> Result<Vec<Profile>> {
        if self.fail_profiles.load(Ordering::SeqCst) {
            bail!("profiles unavailable");
        }
        let profiles = self.profiles.lock().unwrap();
        Ok(ids.iter().filter_map(|id| profiles.get(id).cloned()).collect())
    }

    async fn conversation(&self, a: UserId, b: UserId) -> Result<Vec<Message>> {
        self.check_reads()?;
        let mut msgs: Vec<Message> = self
            .all()
            .into_iter()
            .filter(|m| m.involves_pair(a, b))
            .collect();
        msgs.sort_by(|x, y| x.chrono_cmp(y));
        Ok(msgs)
    }

    async fn insert_message(&self, msg: &NewMessage) -> Result<Message> {
        let stored = self.build(msg.sender_id, msg.receiver_id, msg.body.clone(), msg.is_read);
        self.messages.lock().unwrap().push(stored.clone());
        Ok(stored)
    }

    async fn mark_read(&self, receiver: UserId, sender: UserId) -> Result<u64> {
        self.mark_read_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_mark_read.load(Ordering::SeqCst) {
            bail!("update rejected");
        }
        let mut changed = 0;
        for m in self.messages.lock().unwrap().iter_mut() {
            if m.receiver_id == receiver && m.sender_id == sender && !m.is_read {
                m.is_read = true;
                changed += 1;
            }
        }
        Ok(changed)
    }

    async fn count_unread(&self, receiver: UserId, sender: Option<UserId>) -> Result<u64> {
        self.check_reads()?;
        let stale = self
            .stale_counts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if stale {
            // pretend the last update is not visible yet
            return Ok(self.unread_for(receiver, sender) + 1);
        }
        Ok(self.unread_for(receiver, sender))
    }

    async fn product(&self, id: &str) -> Result<Option<ProductSnapshot>> {
        Ok(self.products.lock().unwrap().get(id).cloned())
    }
}
