//! Configuration and credential storage

use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use crate::auth::{StoredToken, TokenStore};
use crate::models::{Principal, UserId};

/// Environment override for the backend project URL.
pub const ENV_URL: &str = "SOUQ_URL";
/// Environment override for the backend anon (public) API key.
pub const ENV_ANON_KEY: &str = "SOUQ_ANON_KEY";

const DEFAULT_SETTLE_DELAY_MS: u64 = 300;
const DEFAULT_SETTLE_ATTEMPTS: u32 = 4;

/// Application configuration
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Backend project URL, e.g. https://abcd.supabase.co
    pub project_url: Option<String>,
    /// Public API key sent as `apikey` on every request
    pub anon_key: Option<String>,
    /// Session access token (JWT)
    pub access_token: Option<StoredToken>,
    /// Session refresh token
    pub refresh_token: Option<String>,
    /// Cached principal from the last login
    pub user_id: Option<UserId>,
    pub email: Option<String>,
    pub display_name: Option<String>,
    pub avatar_url: Option<String>,
    /// Initial wait before confirming a mark-as-read is visible
    pub settle_delay_ms: Option<u64>,
    /// Confirmation attempts before recounting anyway
    pub settle_attempts: Option<u32>,
    /// Latest known total of unread messages (badge)
    pub unread_count: Option<u64>,
}

/// Backend endpoint resolved from config and environment.
#[derive(Debug, Clone)]
pub struct Endpoint {
    pub project_url: String,
    pub anon_key: String,
}

impl Endpoint {
    pub fn auth_url(&self, path: &str) -> String {
        format!("{}/auth/v1{}", self.project_url, path)
    }

    pub fn rest_url(&self) -> String {
        format!("{}/rest/v1", self.project_url)
    }

    /// Realtime websocket URL (https → wss).
    pub fn realtime_url(&self) -> String {
        let base = self
            .project_url
            .replacen("https://", "wss://", 1)
            .replacen("http://", "ws://", 1);
        format!(
            "{}/realtime/v1/websocket?apikey={}&vsn=1.0.0",
            base,
            url::form_urlencoded::byte_serialize(self.anon_key.as_bytes()).collect::<String>()
        )
    }
}

impl Config {
    /// Get config directory path
    fn config_dir() -> Result<PathBuf> {
        let proj_dirs = ProjectDirs::from("com", "souq", "souq")
            .context("Could not determine config directory")?;
        Ok(proj_dirs.config_dir().to_path_buf())
    }

    /// Get config file path
    fn config_path() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.toml"))
    }

    /// Load configuration from disk
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;

        if !path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(&path).context("Failed to read config file")?;
        toml::from_str(&content).context("Failed to parse config file")
    }

    /// Save configuration to disk
    pub fn save(&self) -> Result<()> {
        let dir = Self::config_dir()?;
        fs::create_dir_all(&dir).context("Failed to create config directory")?;

        let path = Self::config_path()?;
        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        fs::write(&path, content).context("Failed to write config file")?;

        // Set restrictive permissions on config file (contains tokens)
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = fs::Permissions::from_mode(0o600);
            fs::set_permissions(&path, perms).context("Failed to set config permissions")?;
        }

        Ok(())
    }

    /// Resolve the backend endpoint; environment variables win over the file.
    pub fn endpoint(&self) -> Result<Endpoint> {
        self.endpoint_with(
            std::env::var(ENV_URL).ok(),
            std::env::var(ENV_ANON_KEY).ok(),
        )
    }

    fn endpoint_with(&self, env_url: Option<String>, env_key: Option<String>) -> Result<Endpoint> {
        let project_url = env_url
            .filter(|s| !s.is_empty())
            .or_else(|| self.project_url.clone())
            .context("No backend URL configured. Run 'souq configure --url <URL> --anon-key <KEY>'.")?;
        let anon_key = env_key
            .filter(|s| !s.is_empty())
            .or_else(|| self.anon_key.clone())
            .context("No anon key configured. Run 'souq configure --url <URL> --anon-key <KEY>'.")?;
        Ok(Endpoint {
            project_url: project_url.trim_end_matches('/').to_string(),
            anon_key,
        })
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms.unwrap_or(DEFAULT_SETTLE_DELAY_MS))
    }

    pub fn settle_attempts(&self) -> u32 {
        self.settle_attempts.unwrap_or(DEFAULT_SETTLE_ATTEMPTS).max(1)
    }

    /// Cached principal, falling back to the access token's `sub` claim.
    pub fn principal(&self) -> Option<Principal> {
        let id = self.user_id.or_else(|| {
            self.access_token
                .as_ref()
                .and_then(|t| crate::auth::tokens::jwt_claims(&t.token))
                .and_then(|c| c.sub)
        })?;
        Some(Principal {
            id,
            email: self.email.clone(),
            display_name: self.display_name.clone(),
            avatar_url: self.avatar_url.clone(),
        })
    }

    pub fn set_principal(&mut self, principal: &Principal) {
        self.user_id = Some(principal.id);
        self.email = principal.email.clone();
        self.display_name = principal.display_name.clone();
        self.avatar_url = principal.avatar_url.clone();
    }
}

impl TokenStore for Config {
    fn get_access_token(&self) -> Option<StoredToken> {
        self.access_token.clone()
    }

    fn set_access_token(&mut self, token: String, expires_in: Option<u64>) {
        self.access_token = Some(StoredToken::new(token, expires_in));
    }

    fn get_refresh_token(&self) -> Option<String> {
        self.refresh_token.clone()
    }

    fn set_refresh_token(&mut self, token: String) {
        self.refresh_token = Some(token);
    }

    fn clear_tokens(&mut self) {
        self.access_token = None;
        self.refresh_token = None;
        self.user_id = None;
        self.email = None;
        self.display_name = None;
        self.avatar_url = None;
        self.unread_count = None;
    }
}

/// Validate a project URL and strip any trailing slash.
fn normalize_project_url(raw: &str) -> Result<String> {
    let parsed = url::Url::parse(raw.trim()).context("Invalid project URL")?;
    anyhow::ensure!(
        matches!(parsed.scheme(), "http" | "https"),
        "Project URL must be http(s), got {}",
        parsed.scheme()
    );
    Ok(parsed.as_str().trim_end_matches('/').to_string())
}

/// Store endpoint and tuning settings (`souq configure`).
pub fn configure(
    url: Option<String>,
    anon_key: Option<String>,
    settle_delay_ms: Option<u64>,
    settle_attempts: Option<u32>,
) -> Result<()> {
    let mut config = Config::load()?;

    if let Some(url) = url {
        config.project_url = Some(normalize_project_url(&url)?);
    }
    if let Some(key) = anon_key {
        config.anon_key = Some(key.trim().to_string());
    }
    if let Some(ms) = settle_delay_ms {
        config.settle_delay_ms = Some(ms);
    }
    if let Some(n) = settle_attempts {
        config.settle_attempts = Some(n);
    }
    config.save()?;

    println!(
        "Backend:  {}",
        config.project_url.as_deref().unwrap_or("(not set)")
    );
    println!(
        "API key:  {}",
        if config.anon_key.is_some() { "set" } else { "(not set)" }
    );
    println!(
        "Settle:   {}ms x {}",
        config.settle_delay().as_millis(),
        config.settle_attempts()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn configured() -> Config {
        Config {
            project_url: Some("https://proj.example.co/".to_string()),
            anon_key: Some("anon".to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_endpoint_from_file() {
        let ep = configured().endpoint_with(None, None).unwrap();
        assert_eq!(ep.project_url, "https://proj.example.co");
        assert_eq!(ep.rest_url(), "https://proj.example.co/rest/v1");
        assert_eq!(
            ep.auth_url("/token?grant_type=password"),
            "https://proj.example.co/auth/v1/token?grant_type=password"
        );
    }

    #[test]
    fn test_endpoint_env_overrides() {
        let ep = configured()
            .endpoint_with(Some("http://localhost:54321".to_string()), Some("k".to_string()))
            .unwrap();
        assert_eq!(ep.project_url, "http://localhost:54321");
        assert_eq!(ep.anon_key, "k");
        assert_eq!(
            ep.realtime_url(),
            "ws://localhost:54321/realtime/v1/websocket?apikey=k&vsn=1.0.0"
        );
    }

    #[test]
    fn test_normalize_project_url() {
        assert_eq!(
            normalize_project_url(" https://proj.example.co/ ").unwrap(),
            "https://proj.example.co"
        );
        assert!(normalize_project_url("proj.example.co").is_err());
        assert!(normalize_project_url("ftp://proj.example.co").is_err());
    }

    #[test]
    fn test_endpoint_missing() {
        assert!(Config::default().endpoint_with(None, None).is_err());
    }

    #[test]
    fn test_settle_defaults() {
        let config = Config::default();
        assert_eq!(config.settle_delay(), Duration::from_millis(300));
        assert_eq!(config.settle_attempts(), 4);
    }

    #[test]
    fn test_toml_roundtrip_keeps_badge() {
        let mut config = configured();
        config.unread_count = Some(7);
        let text = toml::to_string_pretty(&config).unwrap();
        let back: Config = toml::from_str(&text).unwrap();
        assert_eq!(back.unread_count, Some(7));
    }

    #[test]
    fn test_clear_tokens_forgets_principal() {
        let mut config = configured();
        config.set_access_token("t".to_string(), Some(3600));
        config.set_principal(&Principal::new(uuid::Uuid::new_v4()));
        config.clear_tokens();
        assert!(config.principal().is_none());
        assert!(config.get_access_token().is_none());
    }
}
