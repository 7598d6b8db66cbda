//! Message store: the queries the inbox needs, over PostgREST.

use std::future::Future;

use anyhow::{Context, Result};
use serde::Deserialize;

use super::client::BackendClient;
use super::query::{and_eq, Order, Query};
use crate::models::{
    Message, MessageRow, NewMessage, ProductSnapshot, Profile, ProfileRow, RecordError, UserId,
};

/// Data access used by the inbox core.
///
/// Implemented over the REST backend; tests use an in-memory store.
pub trait MessageStore: Send + Sync {
    /// Every message `user` has sent.
    fn sent_by(&self, user: UserId) -> impl Future<Output = Result<Vec<Message>>> + Send;

    /// Every message `user` has received.
    fn received_by(&self, user: UserId) -> impl Future<Output = Result<Vec<Message>>> + Send;

    /// Profiles for a batch of ids. Unknown ids are simply absent.
    fn profiles(&self, ids: &[UserId]) -> impl Future<Output = Result<Vec<Profile>>> + Send;

    /// Messages between `a` and `b`, oldest first, ties by id.
    fn conversation(
        &self,
        a: UserId,
        b: UserId,
    ) -> impl Future<Output = Result<Vec<Message>>> + Send;

    /// Persist a message and return the stored record.
    fn insert_message(&self, msg: &NewMessage) -> impl Future<Output = Result<Message>> + Send;

    /// Mark unread messages `sender → receiver` as read. Returns rows changed.
    fn mark_read(
        &self,
        receiver: UserId,
        sender: UserId,
    ) -> impl Future<Output = Result<u64>> + Send;

    /// Unread messages for `receiver`, optionally only from `sender`.
    fn count_unread(
        &self,
        receiver: UserId,
        sender: Option<UserId>,
    ) -> impl Future<Output = Result<u64>> + Send;

    /// Read-only product lookup for composer pre-fill.
    fn product(&self, id: &str) -> impl Future<Output = Result<Option<ProductSnapshot>>> + Send;
}

const MESSAGE_COLUMNS: &str = "id,sender_id,receiver_id,message,is_read,created_at";
const PROFILE_COLUMNS: &str = "id,full_name,avatar_url";
const PRODUCT_COLUMNS: &str = "name,price,description,image_url";

/// Validate rows, dropping (and logging) malformed ones.
pub fn validate_rows<R, T>(rows: Vec<R>) -> Vec<T>
where
    T: TryFrom<R, Error = RecordError>,
{
    rows.into_iter()
        .filter_map(|row| match T::try_from(row) {
            Ok(v) => Some(v),
            Err(e) => {
                tracing::warn!("Dropping malformed record: {}", e);
                None
            }
        })
        .collect()
}

#[derive(Debug, Deserialize)]
struct ProductRow {
    name: Option<String>,
    price: Option<serde_json::Value>,
    description: Option<String>,
    image_url: Option<String>,
}

impl TryFrom<ProductRow> for ProductSnapshot {
    type Error = RecordError;

    fn try_from(row: ProductRow) -> std::result::Result<Self, Self::Error> {
        // numeric columns may arrive as strings
        let price = match row.price {
            Some(serde_json::Value::Number(n)) => n.as_f64(),
            Some(serde_json::Value::String(s)) => s.trim().parse().ok(),
            _ => None,
        }
        .ok_or(RecordError::missing("product", "price"))?;
        Ok(ProductSnapshot {
            name: row.name.ok_or(RecordError::missing("product", "name"))?,
            price,
            description: row.description,
            image_url: row.image_url,
        })
    }
}

impl BackendClient {
    async fn fetch_messages(&self, query: Query) -> Result<Vec<Message>> {
        let url = query.to_url(&self.rest_url());
        let rows: Vec<MessageRow> = self
            .rest_get(&url)
            .await?
            .json()
            .await
            .context("Failed to parse messages response")?;
        Ok(validate_rows(rows))
    }
}

impl MessageStore for BackendClient {
    async fn sent_by(&self, user: UserId) -> Result<Vec<Message>> {
        let query = Query::table("messages")
            .select(MESSAGE_COLUMNS)
            .eq("sender_id", user);
        self.fetch_messages(query).await
    }

    async fn received_by(&self, user: UserId) -> Result<Vec<Message>> {
        let query = Query::table("messages")
            .select(MESSAGE_COLUMNS)
            .eq("receiver_id", user);
        self.fetch_messages(query).await
    }

    async fn profiles(&self, ids: &[UserId]) -> Result<Vec<Profile>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let url = Query::table("profiles")
            .select(PROFILE_COLUMNS)
            .is_in("id", ids)
            .to_url(&self.rest_url());
        let rows: Vec<ProfileRow> = self
            .rest_get(&url)
            .await?
            .json()
            .await
            .context("Failed to parse profiles response")?;
        Ok(validate_rows(rows))
    }

    async fn conversation(&self, a: UserId, b: UserId) -> Result<Vec<Message>> {
        let query = Query::table("messages")
            .select(MESSAGE_COLUMNS)
            .or(&[
                and_eq(&[("sender_id", a.to_string()), ("receiver_id", b.to_string())]),
                and_eq(&[("sender_id", b.to_string()), ("receiver_id", a.to_string())]),
            ])
            .order("created_at", Order::Asc)
            .order("id", Order::Asc);
        self.fetch_messages(query).await
    }

    async fn insert_message(&self, msg: &NewMessage) -> Result<Message> {
        let url = Query::table("messages")
            .select(MESSAGE_COLUMNS)
            .to_url(&self.rest_url());
        let body = serde_json::to_value(msg).context("Failed to encode message")?;
        let rows: Vec<MessageRow> = self
            .rest_post(&url, &body)
            .await?
            .json()
            .await
            .context("Failed to parse insert response")?;
        let row = rows
            .into_iter()
            .next()
            .context("Insert returned no rows")?;
        Ok(Message::try_from(row)?)
    }

    async fn mark_read(&self, receiver: UserId, sender: UserId) -> Result<u64> {
        let url = Query::table("messages")
            .select("id")
            .eq("receiver_id", receiver)
            .eq("sender_id", sender)
            .eq("is_read", false)
            .to_url(&self.rest_url());
        let body = serde_json::json!({ "is_read": true });
        let rows: Vec<serde_json::Value> = self
            .rest_patch(&url, &body)
            .await?
            .json()
            .await
            .context("Failed to parse update response")?;
        Ok(rows.len() as u64)
    }

    async fn count_unread(&self, receiver: UserId, sender: Option<UserId>) -> Result<u64> {
        let mut query = Query::table("messages")
            .select("id")
            .eq("receiver_id", receiver)
            .eq("is_read", false);
        if let Some(sender) = sender {
            query = query.eq("sender_id", sender);
        }
        self.rest_count(&query.to_url(&self.rest_url())).await
    }

    async fn product(&self, id: &str) -> Result<Option<ProductSnapshot>> {
        let url = Query::table("products")
            .select(PRODUCT_COLUMNS)
            .eq("id", id)
            .limit(1)
            .to_url(&self.rest_url());
        let rows: Vec<ProductRow> = self
            .rest_get(&url)
            .await?
            .json()
            .await
            .context("Failed to parse product response")?;
        Ok(validate_rows(rows).into_iter().next())
    }
}
