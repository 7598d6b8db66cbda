//! Password sign-in, refresh and sign-out against the backend auth service

use anyhow::{bail, Context, Result};
use serde::Deserialize;

use super::TokenStore;
use crate::config::{Config, Endpoint};
use crate::models::{Principal, UserId};

/// Password source for non-interactive logins.
pub const ENV_PASSWORD: &str = "SOUQ_PASSWORD";

/// Session returned by the token endpoints.
#[derive(Debug, Deserialize)]
pub struct SessionResponse {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_in: Option<u64>,
    pub user: Option<AuthUser>,
}

#[derive(Debug, Deserialize)]
pub struct AuthUser {
    pub id: UserId,
    pub email: Option<String>,
    #[serde(default)]
    pub user_metadata: UserMetadata,
}

#[derive(Debug, Default, Deserialize)]
pub struct UserMetadata {
    pub full_name: Option<String>,
    pub avatar_url: Option<String>,
}

impl From<AuthUser> for Principal {
    fn from(user: AuthUser) -> Self {
        Principal {
            id: user.id,
            email: user.email,
            display_name: user.user_metadata.full_name,
            avatar_url: user.user_metadata.avatar_url,
        }
    }
}

async fn post_json<T: serde::de::DeserializeOwned>(
    http: &reqwest::Client,
    endpoint: &Endpoint,
    path: &str,
    body: &serde_json::Value,
) -> Result<T> {
    let url = endpoint.auth_url(path);
    tracing::debug!("Auth POST {}", url);

    let resp = http
        .post(&url)
        .header("apikey", &endpoint.anon_key)
        .json(body)
        .send()
        .await
        .with_context(|| format!("Auth POST {} failed", url))?;

    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        bail!("Auth request failed (HTTP {}): {}", status.as_u16(), body);
    }

    resp.json().await.context("Failed to parse auth response")
}

/// Exchange email and password for a session.
pub async fn sign_in_with_password(
    http: &reqwest::Client,
    endpoint: &Endpoint,
    email: &str,
    password: &str,
) -> Result<SessionResponse> {
    let body = serde_json::json!({ "email": email, "password": password });
    post_json(http, endpoint, "/token?grant_type=password", &body).await
}

/// Exchange a refresh token for a new session.
pub async fn refresh_session(
    http: &reqwest::Client,
    endpoint: &Endpoint,
    refresh_token: &str,
) -> Result<SessionResponse> {
    let body = serde_json::json!({ "refresh_token": refresh_token });
    post_json(http, endpoint, "/token?grant_type=refresh_token", &body).await
}

/// Register a new account. Returns a session when email confirmation is off.
pub async fn sign_up(
    http: &reqwest::Client,
    endpoint: &Endpoint,
    email: &str,
    password: &str,
    full_name: Option<&str>,
) -> Result<Option<SessionResponse>> {
    let body = serde_json::json!({
        "email": email,
        "password": password,
        "data": { "full_name": full_name },
    });
    let value: serde_json::Value = post_json(http, endpoint, "/signup", &body).await?;
    if value.get("access_token").is_some() {
        let session = serde_json::from_value(value).context("Failed to parse signup session")?;
        Ok(Some(session))
    } else {
        Ok(None)
    }
}

/// Fetch the user behind an access token.
pub async fn fetch_user(
    http: &reqwest::Client,
    endpoint: &Endpoint,
    access_token: &str,
) -> Result<Principal> {
    let url = endpoint.auth_url("/user");
    tracing::debug!("Auth GET {}", url);

    let resp = http
        .get(&url)
        .header("apikey", &endpoint.anon_key)
        .bearer_auth(access_token)
        .send()
        .await
        .with_context(|| format!("Auth GET {} failed", url))?;

    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        bail!("Fetching user failed (HTTP {}): {}", status.as_u16(), body);
    }

    let user: AuthUser = resp.json().await.context("Failed to parse user")?;
    Ok(user.into())
}

/// Store a fresh session in the config (tokens + cached principal).
fn store_session(config: &mut Config, session: SessionResponse) -> Option<Principal> {
    config.set_access_token(session.access_token, session.expires_in);
    if let Some(rt) = session.refresh_token {
        config.set_refresh_token(rt);
    }
    let principal = session.user.map(Principal::from);
    if let Some(ref p) = principal {
        config.set_principal(p);
    }
    principal
}

/// Refresh the stored session using its refresh token.
/// Returns Ok(true) if refresh succeeded.
pub async fn refresh() -> Result<bool> {
    let mut config = Config::load()?;
    let refresh_token = match config.get_refresh_token() {
        Some(rt) => rt,
        None => return Ok(false),
    };
    let endpoint = config.endpoint()?;

    tracing::info!("Refreshing session...");
    let http = reqwest::Client::new();
    let session = refresh_session(&http, &endpoint, &refresh_token)
        .await
        .context("Failed to refresh session")?;

    store_session(&mut config, session);
    config.save()?;
    tracing::info!("Session refresh complete");
    Ok(true)
}

/// Read one trimmed line from stdin after printing a prompt.
async fn prompt(label: &str) -> Result<String> {
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

    let mut stdout = tokio::io::stdout();
    stdout.write_all(label.as_bytes()).await?;
    stdout.flush().await?;

    let mut line = String::new();
    BufReader::new(tokio::io::stdin())
        .read_line(&mut line)
        .await
        .context("Failed to read from stdin")?;
    Ok(line.trim().to_string())
}

/// Password from `SOUQ_PASSWORD`, else typed on stdin.
async fn read_password() -> Result<String> {
    if let Some(p) = password_from_env(std::env::var(ENV_PASSWORD).ok()) {
        return Ok(p);
    }
    eprintln!(
        "Warning: the password will be visible while you type. Set {} to avoid this.",
        ENV_PASSWORD
    );
    prompt("Password: ").await
}

fn password_from_env(value: Option<String>) -> Option<String> {
    value.filter(|p| !p.is_empty())
}

/// Interactive password login.
pub async fn login(force: bool, email: Option<String>) -> Result<()> {
    {
        let config = Config::load()?;

        // Check for existing valid token
        if !force {
            if let Some(token) = config.get_access_token() {
                if !token.is_expired() {
                    println!("Already logged in. Use --force to re-authenticate.");
                    return Ok(());
                }
                // Try refresh before prompting
                if config.get_refresh_token().is_some() {
                    tracing::info!("Access token expired, attempting refresh...");
                    match refresh().await {
                        Ok(true) => {
                            println!("Session refreshed successfully.");
                            return Ok(());
                        }
                        Ok(false) => {}
                        Err(e) => {
                            tracing::warn!("Refresh failed, falling back to password: {:#}", e);
                        }
                    }
                }
            }
        }
    }

    let email = match email {
        Some(e) => e,
        None => prompt("Email: ").await?,
    };
    let password = read_password().await?;
    if email.is_empty() || password.is_empty() {
        bail!("Email and password are required.");
    }

    let mut config = Config::load()?;
    let endpoint = config.endpoint()?;
    let http = reqwest::Client::new();

    let session = sign_in_with_password(&http, &endpoint, &email, &password).await?;
    let access_token = session.access_token.clone();
    let principal = match store_session(&mut config, session) {
        Some(p) => p,
        None => {
            let p = fetch_user(&http, &endpoint, &access_token).await?;
            config.set_principal(&p);
            p
        }
    };

    config.save()?;
    println!("Logged in as {}.", principal.label());
    Ok(())
}

/// Create an account, logging in immediately when the backend allows it.
pub async fn signup(email: &str, full_name: Option<&str>) -> Result<()> {
    let password = read_password().await?;

    let mut config = Config::load()?;
    let endpoint = config.endpoint()?;
    let http = reqwest::Client::new();

    match sign_up(&http, &endpoint, email, &password, full_name).await? {
        Some(session) => {
            let principal = store_session(&mut config, session);
            config.save()?;
            let label = principal.as_ref().map(|p| p.label()).unwrap_or(email);
            println!("Account created. Logged in as {}.", label);
        }
        None => {
            println!("Account created. Confirm your email, then run 'souq login'.");
        }
    }
    Ok(())
}

/// Revoke the session (best effort) and clear stored credentials
pub async fn logout() -> Result<()> {
    let mut config = Config::load()?;

    if let (Ok(endpoint), Some(token)) = (config.endpoint(), config.get_access_token()) {
        let url = endpoint.auth_url("/logout");
        let result = reqwest::Client::new()
            .post(&url)
            .header("apikey", &endpoint.anon_key)
            .bearer_auth(&token.token)
            .send()
            .await;
        if let Err(e) = result {
            tracing::warn!("Server-side logout failed: {:#}", e);
        }
    }

    config.clear_tokens();
    config.save()?;
    println!("Logged out.");
    Ok(())
}

/// Display current auth status
pub async fn status() -> Result<()> {
    let config = Config::load()?;

    match config.endpoint() {
        Ok(ep) => println!("Backend:     {}", ep.project_url),
        Err(_) => println!("Backend:     not configured"),
    }

    match config.get_access_token() {
        Some(token) if !token.is_expired() => {
            println!("Session:     valid");
            if let Some(exp) = token.expires_at {
                println!("  expires_at: {}", exp);
            }
        }
        Some(_) => {
            println!("Session:     expired");
        }
        None => {
            println!("Session:     none");
        }
    }

    match config.get_refresh_token() {
        Some(_) => println!("Refresh tok: present"),
        None => println!("Refresh tok: none"),
    }

    match config.principal() {
        Some(p) => println!("User:        {} ({})", p.label(), p.id),
        None => println!("User:        unknown"),
    }

    if let Some(count) = config.unread_count {
        println!("Unread:      {}", count);
    }

    if config.get_access_token().is_none() {
        println!("\nRun 'souq login' to authenticate.");
    }

    Ok(())
}
