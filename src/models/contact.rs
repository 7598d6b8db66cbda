//! Inbox contact rows

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::UserId;

/// One conversation partner in the inbox list. Derived, never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Contact {
    pub counterparty: UserId,
    pub display_name: String,
    pub avatar_url: Option<String>,
    /// Body of the most recent message in either direction.
    pub last_message: Option<String>,
    pub last_at: Option<DateTime<Utc>>,
    /// Received messages from this counterparty not yet read.
    pub unread: u64,
}

impl Contact {
    /// Last message shortened to at most `max_chars` characters.
    pub fn preview(&self, max_chars: usize) -> String {
        let text = self
            .last_message
            .as_deref()
            .map(|m| super::message::split_image(m).0)
            .unwrap_or("");
        truncate(text.trim(), max_chars)
    }
}

/// Truncate on a char boundary, appending "..." when shortened.
pub fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let keep = max_chars.saturating_sub(3);
    let end = text
        .char_indices()
        .nth(keep)
        .map(|(i, _)| i)
        .unwrap_or(text.len());
    format!("{}...", &text[..end])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_multibyte() {
        assert_eq!(truncate("short", 30), "short");
        assert_eq!(truncate("abcdefghij", 6), "abc...");
        assert_eq!(truncate("مرحبا بك في السوق", 8), "مرحبا...");
    }

    #[test]
    fn test_preview_hides_image_line() {
        let contact = Contact {
            counterparty: uuid::Uuid::new_v4(),
            display_name: "Seller".to_string(),
            avatar_url: None,
            last_message: Some(format!(
                "Still for sale?\n{}\nhttp://x/a.jpg",
                super::super::message::IMAGE_MARKER
            )),
            last_at: None,
            unread: 0,
        };
        assert_eq!(contact.preview(30), "Still for sale?");
    }
}
