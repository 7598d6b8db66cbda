//! Product snapshot used to pre-fill a message to the seller

use serde::{Deserialize, Serialize};

/// Read-only copy of the product a conversation was started from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductSnapshot {
    pub name: String,
    pub price: f64,
    pub description: Option<String>,
    pub image_url: Option<String>,
}

impl ProductSnapshot {
    /// Price without a trailing ".0" for whole amounts.
    pub fn price_label(&self) -> String {
        if self.price.fract() == 0.0 {
            format!("{:.0}", self.price)
        } else {
            format!("{:.2}", self.price)
        }
    }

    pub fn image(&self) -> Option<&str> {
        self.image_url.as_deref().filter(|u| !u.trim().is_empty())
    }
}
