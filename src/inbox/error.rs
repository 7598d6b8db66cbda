use thiserror::Error;

/// Reasons an inbox write is refused before it reaches the store.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum InboxError {
    /// No signed-in user; reads return nothing and writes are blocked.
    #[error("not signed in")]
    NotAuthenticated,

    /// A send was attempted with no conversation open.
    #[error("no conversation selected")]
    NoCounterparty,

    /// The draft is empty or whitespace.
    #[error("message is empty")]
    EmptyDraft,
}
