//! Outgoing message drafts.
//!
//! A draft may carry a product snapshot (when the conversation was started
//! from a listing). The snapshot pre-fills the draft once, and its image is
//! attached to the first message sent in the session only.

use anyhow::Result;

use super::InboxError;
use crate::api::MessageStore;
use crate::models::{Message, NewMessage, ProductSnapshot, UserId, IMAGE_MARKER};

#[derive(Debug, Default)]
pub struct Composer {
    draft: String,
    product: Option<ProductSnapshot>,
    image_sent: bool,
    prefilled: bool,
}

impl Composer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a draft about `product`; the template is applied only once.
    #[cfg(test)]
    pub fn with_product(product: ProductSnapshot) -> Self {
        let mut composer = Self::new();
        composer.attach_product(product);
        composer
    }

    /// Attach a product. Pre-fills the draft the first time only; a
    /// different product brings its own image back for the next send.
    pub fn attach_product(&mut self, product: ProductSnapshot) {
        if !self.prefilled {
            self.draft = product_template(&product);
            self.prefilled = true;
        }
        if self.product.as_ref() != Some(&product) {
            self.image_sent = false;
        }
        self.product = Some(product);
    }

    pub fn draft(&self) -> &str {
        &self.draft
    }

    pub fn set_draft(&mut self, text: impl Into<String>) {
        self.draft = text.into();
    }

    /// Image still waiting to go out with the next message.
    pub fn pending_image(&self) -> Option<&str> {
        if self.image_sent {
            return None;
        }
        self.product.as_ref().and_then(|p| p.image())
    }

    /// Final body: the draft, plus the product image line if still unsent.
    pub fn build_body(&self) -> String {
        let mut body = self.draft.clone();
        if let Some(url) = self.pending_image() {
            body.push('\n');
            body.push_str(IMAGE_MARKER);
            body.push('\n');
            body.push_str(url);
        }
        body
    }

    /// Validate and build the insert payload without changing the draft.
    pub fn prepare(
        &self,
        principal: Option<UserId>,
        counterparty: Option<UserId>,
    ) -> Result<NewMessage, InboxError> {
        let principal = principal.ok_or(InboxError::NotAuthenticated)?;
        if self.draft.trim().is_empty() {
            return Err(InboxError::EmptyDraft);
        }
        let counterparty = counterparty.ok_or(InboxError::NoCounterparty)?;
        Ok(NewMessage::new(principal, counterparty, self.build_body()))
    }

    /// Called after the store accepted the message.
    pub fn complete(&mut self) {
        self.draft.clear();
        if self.product.is_some() {
            self.image_sent = true;
        }
    }

    /// Validate, persist, and on success reset the draft.
    ///
    /// Returns the stored record for local echo.
    pub async fn send<S: MessageStore>(
        &mut self,
        store: &S,
        principal: Option<UserId>,
        counterparty: Option<UserId>,
    ) -> Result<Message> {
        let new_msg = self.prepare(principal, counterparty)?;
        let stored = store.insert_message(&new_msg).await?;
        tracing::debug!("Sent message {} to {}", stored.id, stored.receiver_id);
        self.complete();
        Ok(stored)
    }
}

/// Draft text for a message about a listing.
pub fn product_template(product: &ProductSnapshot) -> String {
    let description = product
        .description
        .as_deref()
        .map(str::trim)
        .filter(|d| !d.is_empty())
        .unwrap_or("No description");
    format!(
        "Product: {}\nPrice: {} EGP\nDescription: {}",
        product.name,
        product.price_label(),
        description
    )
}
