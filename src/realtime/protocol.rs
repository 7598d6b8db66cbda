//! Phoenix channel frames used by the realtime service

use serde::{Deserialize, Serialize};

use crate::models::{Message, RecordError};

/// One JSON frame on the realtime socket.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Frame {
    pub topic: String,
    pub event: String,
    #[serde(default)]
    pub payload: serde_json::Value,
    #[serde(rename = "ref", default)]
    pub reference: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub join_ref: Option<String>,
}

/// Which row changes to receive. No per-conversation filter is applied
/// server-side; the session filters by pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChangeFilter {
    pub event: &'static str,
    pub schema: &'static str,
    pub table: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filter: Option<String>,
}

impl ChangeFilter {
    /// Every new row in `public.messages`.
    pub fn message_inserts() -> Self {
        Self {
            event: "INSERT",
            schema: "public",
            table: "messages",
            filter: None,
        }
    }
}

pub fn join_frame(topic: &str, filter: &ChangeFilter, access_token: &str, reference: &str) -> Frame {
    Frame {
        topic: topic.to_string(),
        event: "phx_join".to_string(),
        payload: serde_json::json!({
            "config": {
                "broadcast": { "self": false },
                "presence": { "key": "" },
                "postgres_changes": [filter],
            },
            "access_token": access_token,
        }),
        reference: Some(reference.to_string()),
        join_ref: Some(reference.to_string()),
    }
}

pub fn leave_frame(topic: &str, reference: &str) -> Frame {
    Frame {
        topic: topic.to_string(),
        event: "phx_leave".to_string(),
        payload: serde_json::json!({}),
        reference: Some(reference.to_string()),
        join_ref: None,
    }
}

pub fn heartbeat_frame(reference: &str) -> Frame {
    Frame {
        topic: "phoenix".to_string(),
        event: "heartbeat".to_string(),
        payload: serde_json::json!({}),
        reference: Some(reference.to_string()),
        join_ref: None,
    }
}

/// What an incoming frame means for a subscription on `topic`.
#[derive(Debug)]
pub enum Incoming {
    /// A new row matching the subscription.
    Insert(Result<Message, RecordError>),
    /// Reply to our join request.
    Joined,
    JoinRejected(String),
    /// The server closed or errored the channel; rejoin needed.
    ChannelLost(String),
    /// Heartbeat replies, presence, system notices.
    Ignored,
}

pub fn classify(frame: &Frame, topic: &str, join_ref: &str) -> Incoming {
    if frame.topic != topic {
        return Incoming::Ignored;
    }

    match frame.event.as_str() {
        "phx_reply" if frame.reference.as_deref() == Some(join_ref) => {
            let status = frame.payload.get("status").and_then(|s| s.as_str());
            if status == Some("ok") {
                Incoming::Joined
            } else {
                let reason = frame
                    .payload
                    .get("response")
                    .map(|r| r.to_string())
                    .unwrap_or_else(|| "unknown".to_string());
                Incoming::JoinRejected(reason)
            }
        }
        "postgres_changes" => {
            let data = &frame.payload["data"];
            if data["type"].as_str() != Some("INSERT") {
                return Incoming::Ignored;
            }
            Incoming::Insert(Message::from_value(data["record"].clone()))
        }
        // older servers deliver the change under its own event name
        "INSERT" => Incoming::Insert(Message::from_value(frame.payload["record"].clone())),
        "phx_error" => Incoming::ChannelLost("channel error".to_string()),
        "phx_close" => Incoming::ChannelLost("channel closed".to_string()),
        "system" => {
            let status = frame.payload.get("status").and_then(|s| s.as_str());
            if status == Some("error") {
                let msg = frame.payload["message"].as_str().unwrap_or("system error");
                Incoming::ChannelLost(msg.to_string())
            } else {
                Incoming::Ignored
            }
        }
        _ => Incoming::Ignored,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    const TOPIC: &str = "realtime:live-chat";

    fn frame(value: serde_json::Value) -> Frame {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_join_frame_shape() {
        let f = join_frame(TOPIC, &ChangeFilter::message_inserts(), "jwt", "1");
        let v = serde_json::to_value(&f).unwrap();
        assert_eq!(v["event"], "phx_join");
        assert_eq!(v["ref"], "1");
        assert_eq!(v["join_ref"], "1");
        assert_eq!(v["payload"]["access_token"], "jwt");
        let change = &v["payload"]["config"]["postgres_changes"][0];
        assert_eq!(change["event"], "INSERT");
        assert_eq!(change["table"], "messages");
        assert!(change.get("filter").is_none());
    }

    #[test]
    fn test_classify_insert() {
        let sender = Uuid::new_v4();
        let f = frame(serde_json::json!({
            "topic": TOPIC,
            "event": "postgres_changes",
            "ref": null,
            "payload": {
                "ids": [1],
                "data": {
                    "type": "INSERT",
                    "schema": "public",
                    "table": "messages",
                    "commit_timestamp": "2024-05-01T10:00:00Z",
                    "record": {
                        "id": 17,
                        "sender_id": sender,
                        "receiver_id": Uuid::new_v4(),
                        "message": "live",
                        "is_read": false,
                        "created_at": "2024-05-01T10:00:00.5+00:00"
                    }
                }
            }
        }));
        match classify(&f, TOPIC, "1") {
            Incoming::Insert(Ok(msg)) => {
                assert_eq!(msg.sender_id, sender);
                assert_eq!(msg.body, "live");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_classify_malformed_insert() {
        let f = frame(serde_json::json!({
            "topic": TOPIC,
            "event": "postgres_changes",
            "payload": { "data": { "type": "INSERT", "record": { "id": 1 } } }
        }));
        assert!(matches!(classify(&f, TOPIC, "1"), Incoming::Insert(Err(_))));
    }

    #[test]
    fn test_classify_join_reply() {
        let ok = frame(serde_json::json!({
            "topic": TOPIC, "event": "phx_reply", "ref": "1",
            "payload": { "status": "ok", "response": {} }
        }));
        assert!(matches!(classify(&ok, TOPIC, "1"), Incoming::Joined));

        let heartbeat_reply = frame(serde_json::json!({
            "topic": TOPIC, "event": "phx_reply", "ref": "7",
            "payload": { "status": "ok" }
        }));
        assert!(matches!(classify(&heartbeat_reply, TOPIC, "1"), Incoming::Ignored));

        let rejected = frame(serde_json::json!({
            "topic": TOPIC, "event": "phx_reply", "ref": "1",
            "payload": { "status": "error", "response": { "reason": "bad token" } }
        }));
        match classify(&rejected, TOPIC, "1") {
            Incoming::JoinRejected(reason) => assert!(reason.contains("bad token")),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_other_topics_ignored() {
        let f = frame(serde_json::json!({
            "topic": "phoenix", "event": "phx_error", "payload": {}
        }));
        assert!(matches!(classify(&f, TOPIC, "1"), Incoming::Ignored));
    }

    #[test]
    fn test_channel_error() {
        let f = frame(serde_json::json!({
            "topic": TOPIC, "event": "phx_error", "payload": {}
        }));
        assert!(matches!(classify(&f, TOPIC, "1"), Incoming::ChannelLost(_)));
    }
}
