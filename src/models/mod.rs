//! Data models for inbox entities

mod contact;
mod message;
mod product;
mod user;

pub use contact::*;
pub use message::*;
pub use product::*;
pub use user::*;

use thiserror::Error;

/// Marketplace user identifier (auth user id, also `profiles.id`).
pub type UserId = uuid::Uuid;

/// A store record that cannot be turned into a model value.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RecordError {
    /// A required column is absent or null.
    #[error("{kind} record is missing `{field}`")]
    Missing {
        kind: &'static str,
        field: &'static str,
    },

    /// The record did not have the expected shape.
    #[error("invalid {kind} record: {reason}")]
    Invalid { kind: &'static str, reason: String },
}

impl RecordError {
    pub fn missing(kind: &'static str, field: &'static str) -> Self {
        Self::Missing { kind, field }
    }
}
