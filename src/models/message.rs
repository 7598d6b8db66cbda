//! Message-related models

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

use super::{RecordError, UserId};

/// Marker line the marketplace web client splits on to render an attached
/// product image. Kept byte-identical so both clients read each other's rows.
pub const IMAGE_MARKER: &str = "صورة المنتج:";

/// Server-assigned message identifier.
///
/// The `messages.id` column may be a bigint or a uuid depending on the
/// deployment, so both JSON numbers and strings are accepted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MessageId(String);

impl MessageId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Ordering key: numeric ids compare numerically, everything else
    /// lexically after all numeric ids.
    fn sort_key(&self) -> (u8, u64, &str) {
        match self.0.parse::<u64>() {
            Ok(n) => (0, n, ""),
            Err(_) => (1, 0, self.0.as_str()),
        }
    }

    /// Compare two ids in store insertion order (best effort).
    pub fn insertion_cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.sort_key().cmp(&other.sort_key())
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Serialize for MessageId {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for MessageId {
    fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        struct Visitor;
        impl<'de> de::Visitor<'de> for Visitor {
            type Value = MessageId;
            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("message id as string or integer")
            }
            fn visit_u64<E: de::Error>(self, v: u64) -> Result<MessageId, E> {
                Ok(MessageId(v.to_string()))
            }
            fn visit_i64<E: de::Error>(self, v: i64) -> Result<MessageId, E> {
                Ok(MessageId(v.to_string()))
            }
            fn visit_str<E: de::Error>(self, v: &str) -> Result<MessageId, E> {
                if v.is_empty() {
                    return Err(E::custom("empty message id"));
                }
                Ok(MessageId(v.to_string()))
            }
        }
        d.deserialize_any(Visitor)
    }
}

/// Message row exactly as the store returns it. Every field is optional;
/// use `Message::try_from` to validate.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MessageRow {
    pub id: Option<MessageId>,
    pub sender_id: Option<UserId>,
    pub receiver_id: Option<UserId>,
    pub message: Option<String>,
    pub is_read: Option<bool>,
    pub created_at: Option<DateTime<Utc>>,
}

/// A directed, timestamped message between two users.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Message {
    pub id: MessageId,
    pub sender_id: UserId,
    pub receiver_id: UserId,
    #[serde(rename = "message")]
    pub body: String,
    pub is_read: bool,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<MessageRow> for Message {
    type Error = RecordError;

    fn try_from(row: MessageRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id.ok_or(RecordError::missing("message", "id"))?,
            sender_id: row
                .sender_id
                .ok_or(RecordError::missing("message", "sender_id"))?,
            receiver_id: row
                .receiver_id
                .ok_or(RecordError::missing("message", "receiver_id"))?,
            body: row.message.unwrap_or_default(),
            is_read: row.is_read.unwrap_or(false),
            created_at: row
                .created_at
                .ok_or(RecordError::missing("message", "created_at"))?,
        })
    }
}

impl Message {
    /// Parse a single JSON record into a validated message.
    pub fn from_value(value: serde_json::Value) -> Result<Self, RecordError> {
        let row: MessageRow =
            serde_json::from_value(value).map_err(|e| RecordError::Invalid {
                kind: "message",
                reason: e.to_string(),
            })?;
        Self::try_from(row)
    }

    /// True if this message belongs to the conversation between `a` and `b`.
    pub fn involves_pair(&self, a: UserId, b: UserId) -> bool {
        (self.sender_id == a && self.receiver_id == b)
            || (self.sender_id == b && self.receiver_id == a)
    }

    /// The other participant, seen from `me`. `None` if `me` is not a party.
    pub fn counterparty_of(&self, me: UserId) -> Option<UserId> {
        if self.sender_id == me {
            Some(self.receiver_id)
        } else if self.receiver_id == me {
            Some(self.sender_id)
        } else {
            None
        }
    }

    /// Split the body into its text and an embedded product image URL.
    pub fn split_image(&self) -> (&str, Option<&str>) {
        split_image(&self.body)
    }

    /// Chronological order with id as tie-breaker.
    pub fn chrono_cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.created_at
            .cmp(&other.created_at)
            .then_with(|| self.id.insertion_cmp(&other.id))
    }
}

/// Split a raw body on the image marker line.
pub fn split_image(body: &str) -> (&str, Option<&str>) {
    match body.split_once(IMAGE_MARKER) {
        Some((text, rest)) => {
            let url = rest.trim();
            if url.is_empty() {
                (body, None)
            } else {
                (text.trim(), Some(url))
            }
        }
        None => (body, None),
    }
}

/// Payload for inserting a message.
#[derive(Debug, Clone, Serialize)]
pub struct NewMessage {
    pub sender_id: UserId,
    pub receiver_id: UserId,
    #[serde(rename = "message")]
    pub body: String,
    pub is_read: bool,
}

impl NewMessage {
    pub fn new(sender_id: UserId, receiver_id: UserId, body: String) -> Self {
        Self {
            sender_id,
            receiver_id,
            body,
            is_read: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_message_from_numeric_id() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let msg = Message::from_value(serde_json::json!({
            "id": 42,
            "sender_id": a,
            "receiver_id": b,
            "message": "hi",
            "is_read": false,
            "created_at": "2024-05-01T10:00:00.123456+00:00"
        }))
        .unwrap();
        assert_eq!(msg.id.as_str(), "42");
        assert_eq!(msg.body, "hi");
        assert!(msg.involves_pair(b, a));
        assert_eq!(msg.counterparty_of(a), Some(b));
    }

    #[test]
    fn test_message_missing_sender_rejected() {
        let err = Message::from_value(serde_json::json!({
            "id": "abc",
            "receiver_id": Uuid::new_v4(),
            "created_at": "2024-05-01T10:00:00Z"
        }))
        .unwrap_err();
        assert!(err.to_string().contains("sender_id"));
    }

    #[test]
    fn test_message_defaults_body_and_read_flag() {
        let msg = Message::from_value(serde_json::json!({
            "id": "m1",
            "sender_id": Uuid::new_v4(),
            "receiver_id": Uuid::new_v4(),
            "created_at": "2024-05-01T10:00:00Z"
        }))
        .unwrap();
        assert_eq!(msg.body, "");
        assert!(!msg.is_read);
    }

    #[test]
    fn test_split_image() {
        let body = format!("Is this available?\n{}\nhttp://x/img.jpg", IMAGE_MARKER);
        let (text, url) = split_image(&body);
        assert_eq!(text, "Is this available?");
        assert_eq!(url, Some("http://x/img.jpg"));

        let (text, url) = split_image("plain");
        assert_eq!(text, "plain");
        assert!(url.is_none());
    }

    #[test]
    fn test_insertion_order_numeric() {
        assert!(MessageId::new("9").insertion_cmp(&MessageId::new("10")).is_lt());
        assert!(MessageId::new("10").insertion_cmp(&MessageId::new("a")).is_lt());
    }
}
