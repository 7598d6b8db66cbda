//! Authentication module for the marketplace backend
//!
//! Email/password sessions against the hosted auth service, token
//! persistence, and the in-process identity context.

pub mod gotrue;
pub mod identity;
pub mod tokens;

pub use gotrue::{login, logout, signup, status};
pub use identity::IdentityContext;
pub use tokens::{StoredToken, TokenStore};
