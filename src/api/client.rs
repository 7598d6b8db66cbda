//! Authenticated HTTP client for the backend REST API
//!
//! Wraps reqwest::Client with `apikey` + bearer injection and session refresh.

use std::sync::{PoisonError, RwLock, RwLockReadGuard};

use anyhow::{bail, Context, Result};

use crate::auth::TokenStore;
use crate::config::{Config, Endpoint};
use crate::models::Principal;

/// Authenticated client for the PostgREST endpoint.
///
/// The session lives behind a lock so a long-running inbox can follow a
/// refresh or an account switch without rebuilding the client.
pub struct BackendClient {
    http: reqwest::Client,
    endpoint: Endpoint,
    config: RwLock<Config>,
    refreshing: tokio::sync::Mutex<()>,
}

impl BackendClient {
    /// Load config and build client. Attempts a refresh if the session is expired.
    pub async fn new() -> Result<Self> {
        let config = Config::load()?;
        let endpoint = config.endpoint()?;
        if config.get_access_token().is_none() && config.get_refresh_token().is_none() {
            bail!("Not logged in. Run 'souq login'.");
        }

        let client = Self::with_config(endpoint, config);
        client.access_token().await?;
        Ok(client)
    }

    pub fn with_config(endpoint: Endpoint, config: Config) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint,
            config: RwLock::new(config),
            refreshing: tokio::sync::Mutex::new(()),
        }
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Snapshot of the session config in use.
    pub fn config(&self) -> Config {
        self.read_config().clone()
    }

    /// Principal cached at login.
    pub fn principal(&self) -> Option<Principal> {
        self.read_config().principal()
    }

    /// Replace the session, e.g. after a login from another terminal.
    pub fn install(&self, config: Config) {
        *self.config.write().unwrap_or_else(PoisonError::into_inner) = config;
    }

    fn read_config(&self) -> RwLockReadGuard<'_, Config> {
        self.config.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn usable_token(&self) -> Option<String> {
        self.read_config()
            .get_access_token()
            .filter(|t| !t.is_expired())
            .map(|t| t.token)
    }

    /// Bearer for the next request. An expired session is refreshed and
    /// the saved config reloaded.
    pub async fn access_token(&self) -> Result<String> {
        if let Some(token) = self.usable_token() {
            return Ok(token);
        }
        let _guard = self.refreshing.lock().await;
        // a concurrent request may have refreshed already
        if let Some(token) = self.usable_token() {
            return Ok(token);
        }
        let can_refresh = self.read_config().get_refresh_token().is_some();
        if !can_refresh {
            bail!("Session expired. Run 'souq login'.");
        }

        tracing::info!("Session missing or expired, refreshing...");
        match crate::auth::gotrue::refresh().await {
            Ok(true) => {
                self.install(Config::load()?);
                tracing::info!("Session refreshed");
            }
            Ok(false) => bail!("No refresh token available. Run 'souq login'."),
            Err(e) => bail!("Session refresh failed: {:#}. Run 'souq login'.", e),
        }
        self.usable_token()
            .context("Session expired. Run 'souq login'.")
    }

    pub fn rest_url(&self) -> String {
        self.endpoint.rest_url()
    }

    async fn authed(&self, req: reqwest::RequestBuilder) -> Result<reqwest::RequestBuilder> {
        let token = self.access_token().await?;
        Ok(req.header("apikey", &self.endpoint.anon_key).bearer_auth(token))
    }

    /// GET a PostgREST URL.
    pub async fn rest_get(&self, url: &str) -> Result<reqwest::Response> {
        tracing::debug!("REST GET {}", url);

        let resp = self
            .authed(self.http.get(url))
            .await?
            .send()
            .await
            .with_context(|| format!("REST GET {} failed", url))?;

        check_response(resp, url).await
    }

    /// POST rows and ask for the stored representation back.
    pub async fn rest_post(&self, url: &str, body: &serde_json::Value) -> Result<reqwest::Response> {
        tracing::debug!("REST POST {}", url);

        let resp = self
            .authed(self.http.post(url))
            .await?
            .header("Prefer", "return=representation")
            .json(body)
            .send()
            .await
            .with_context(|| format!("REST POST {} failed", url))?;

        check_response(resp, url).await
    }

    /// PATCH rows matching the URL filter; returns the updated rows.
    pub async fn rest_patch(
        &self,
        url: &str,
        body: &serde_json::Value,
    ) -> Result<reqwest::Response> {
        tracing::debug!("REST PATCH {}", url);

        let resp = self
            .authed(self.http.patch(url))
            .await?
            .header("Prefer", "return=representation")
            .json(body)
            .send()
            .await
            .with_context(|| format!("REST PATCH {} failed", url))?;

        check_response(resp, url).await
    }

    /// Exact row count for a filter (HEAD with `Prefer: count=exact`).
    pub async fn rest_count(&self, url: &str) -> Result<u64> {
        tracing::debug!("REST HEAD {}", url);

        let resp = self
            .authed(self.http.head(url))
            .await?
            .header("Prefer", "count=exact")
            .send()
            .await
            .with_context(|| format!("REST HEAD {} failed", url))?;

        let resp = check_response(resp, url).await?;
        let range = resp
            .headers()
            .get("content-range")
            .and_then(|v| v.to_str().ok())
            .context("Count response missing Content-Range")?;
        parse_content_range_total(range)
            .with_context(|| format!("Unexpected Content-Range '{}'", range))
    }
}

/// Total from a `Content-Range` header such as `0-24/57` or `*/0`.
pub fn parse_content_range_total(value: &str) -> Option<u64> {
    value.rsplit_once('/')?.1.trim().parse().ok()
}

/// Check HTTP response status code and return a clear error on failure.
async fn check_response(resp: reqwest::Response, url: &str) -> Result<reqwest::Response> {
    let status = resp.status();
    if status == reqwest::StatusCode::UNAUTHORIZED {
        bail!(
            "401 Unauthorized for {}. Session may be invalid -- run 'souq login'.",
            url
        );
    }
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        bail!("HTTP {} for {}: {}", status.as_u16(), url, body);
    }
    Ok(resp)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::identity::{apply_saved_session, saved_principal};
    use crate::auth::IdentityContext;
    use std::sync::Arc;

    fn endpoint() -> Endpoint {
        Endpoint {
            project_url: "https://proj.example.co".to_string(),
            anon_key: "anon".to_string(),
        }
    }

    fn signed_in(token: &str) -> (Config, Principal) {
        let principal = Principal::new(uuid::Uuid::new_v4());
        let mut config = Config::default();
        config.set_principal(&principal);
        config.set_access_token(token.to_string(), Some(3600));
        (config, principal)
    }

    #[tokio::test]
    async fn test_account_switch_changes_bearer() {
        let (config_a, _) = signed_in("token-a");
        let (config_b, b) = signed_in("token-b");
        let client = Arc::new(BackendClient::with_config(endpoint(), config_a.clone()));
        let identity = IdentityContext::new(saved_principal(&config_a));
        assert_eq!(client.access_token().await.unwrap(), "token-a");

        let installer = Arc::clone(&client);
        apply_saved_session(&identity, config_b, &move |c| installer.install(c));

        assert_eq!(identity.principal_id(), Some(b.id));
        assert_eq!(client.principal().map(|p| p.id), Some(b.id));
        assert_eq!(client.access_token().await.unwrap(), "token-b");
    }

    #[tokio::test]
    async fn test_expired_session_without_refresh_token() {
        let (mut config, _) = signed_in("old");
        config.set_access_token("old".to_string(), Some(0));
        let client = BackendClient::with_config(endpoint(), config);
        let err = client.access_token().await.unwrap_err();
        assert!(err.to_string().contains("Session expired"));
    }

    #[test]
    fn test_content_range_total() {
        assert_eq!(parse_content_range_total("0-24/57"), Some(57));
        assert_eq!(parse_content_range_total("*/0"), Some(0));
        assert_eq!(parse_content_range_total("0-1/*"), None);
        assert_eq!(parse_content_range_total("garbage"), None);
    }
}
