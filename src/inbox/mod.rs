//! Messaging core: contacts, conversations, read state, live delivery
//! and composing, generic over the store and the realtime channel.

mod badge;
pub mod composer;
pub mod console;
pub mod contacts;
pub mod conversation;
mod error;
pub mod live;
pub mod read_state;
pub mod session;

pub use badge::UnreadBadge;
pub use composer::Composer;
pub use contacts::load_contacts;
pub use conversation::load_conversation;
pub use error::InboxError;
pub use live::{RealtimeChannel, Subscription};
pub use read_state::{ReadStateSync, SettlePolicy};
pub use session::InboxSession;
