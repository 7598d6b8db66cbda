//! Current principal, shared with every inbox component.
//!
//! A single `watch` channel holds the signed-in user. Readers take a
//! snapshot with `current()` or follow login/logout with `subscribe()`.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::TokenStore;
use crate::config::Config;
use crate::models::{Principal, UserId};

#[derive(Clone)]
pub struct IdentityContext {
    tx: Arc<watch::Sender<Option<Principal>>>,
}

impl IdentityContext {
    pub fn new(initial: Option<Principal>) -> Self {
        let (tx, _rx) = watch::channel(initial);
        Self { tx: Arc::new(tx) }
    }

    pub fn current(&self) -> Option<Principal> {
        self.tx.borrow().clone()
    }

    pub fn principal_id(&self) -> Option<UserId> {
        self.tx.borrow().as_ref().map(|p| p.id)
    }

    /// Replace the principal. Subscribers are only woken on an actual change.
    pub fn set(&self, principal: Option<Principal>) {
        self.tx.send_if_modified(|current| {
            if *current == principal {
                false
            } else {
                tracing::info!(
                    "Session changed: {}",
                    principal.as_ref().map(|p| p.label()).unwrap_or("signed out")
                );
                *current = principal;
                true
            }
        });
    }

    /// Follow session changes (login, logout, account switch).
    pub fn subscribe(&self) -> watch::Receiver<Option<Principal>> {
        self.tx.subscribe()
    }
}

/// Principal of the saved session, if its token is still usable.
pub fn saved_principal(config: &Config) -> Option<Principal> {
    let token = config.get_access_token()?;
    if token.is_expired() && config.get_refresh_token().is_none() {
        return None;
    }
    config.principal()
}

/// Keep `identity` in step with the saved session, so a login or logout
/// from another terminal reaches a running inbox.
///
/// `on_reload` receives every reloaded config before subscribers are
/// woken, so clients holding a session can switch tokens first.
pub fn follow_saved_session<F>(identity: IdentityContext, every: Duration, on_reload: F) -> JoinHandle<()>
where
    F: Fn(Config) + Send + 'static,
{
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(every);
        tick.tick().await;
        loop {
            tick.tick().await;
            match Config::load() {
                Ok(config) => apply_saved_session(&identity, config, &on_reload),
                Err(e) => tracing::debug!("Config reload failed: {:#}", e),
            }
        }
    })
}

pub(crate) fn apply_saved_session(identity: &IdentityContext, config: Config, on_reload: &impl Fn(Config)) {
    let principal = saved_principal(&config);
    on_reload(config);
    identity.set(principal);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_session_change_notifies() {
        let identity = IdentityContext::new(None);
        let mut rx = identity.subscribe();
        assert!(identity.principal_id().is_none());

        let p = Principal::new(uuid::Uuid::new_v4());
        identity.set(Some(p.clone()));
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow().as_ref().map(|x| x.id), Some(p.id));
        assert_eq!(identity.principal_id(), Some(p.id));
    }

    #[test]
    fn test_saved_principal_needs_a_session() {
        let mut config = Config::default();
        let p = Principal::new(uuid::Uuid::new_v4());
        config.set_principal(&p);
        assert!(saved_principal(&config).is_none());

        config.set_access_token("t".to_string(), Some(3600));
        assert_eq!(saved_principal(&config).map(|x| x.id), Some(p.id));

        // expired and no way to refresh
        config.set_access_token("t".to_string(), Some(0));
        assert!(saved_principal(&config).is_none());
    }

    #[test]
    fn test_same_principal_does_not_notify() {
        let p = Principal::new(uuid::Uuid::new_v4());
        let identity = IdentityContext::new(Some(p.clone()));
        let rx = identity.subscribe();
        identity.set(Some(p));
        assert!(!rx.has_changed().unwrap());
    }
}
