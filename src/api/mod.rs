//! Backend access and the CLI commands built on it

pub mod client;
#[cfg(test)]
mod memory;
pub mod query;
pub mod store;

pub use client::BackendClient;
#[cfg(test)]
pub use memory::MemoryStore;
pub use store::MessageStore;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::auth::identity::{follow_saved_session, saved_principal};
use crate::auth::IdentityContext;
use crate::config::Config;
use crate::inbox::{
    console, load_contacts, load_conversation, Composer, InboxSession, ReadStateSync,
    RealtimeChannel, SettlePolicy, UnreadBadge,
};
use crate::models::{Message, UserId, UNKNOWN_USER};
use crate::realtime::{ChangeFilter, RealtimeClient};

/// How often a running inbox re-reads the saved session.
const SESSION_POLL: Duration = Duration::from_secs(5);

fn require_principal(client: &BackendClient) -> Result<UserId> {
    client
        .principal()
        .map(|p| p.id)
        .context("No user in the saved session. Run 'souq login --force'.")
}

/// Resolve a user argument: a user id, a contact number or a name prefix.
async fn resolve_user(client: &BackendClient, principal: UserId, arg: &str) -> Result<(UserId, String)> {
    let contacts = load_contacts(client, principal).await?;
    let id = console::resolve_contact(&contacts, arg)
        .with_context(|| format!("No conversation matches '{}'", arg))?;
    let name = contacts
        .iter()
        .find(|c| c.counterparty == id)
        .map(|c| c.display_name.clone())
        .unwrap_or_else(|| UNKNOWN_USER.to_string());
    Ok((id, name))
}

fn save_unread(total: u64) -> Result<()> {
    let mut config = Config::load()?;
    config.unread_count = Some(total);
    config.save()
}

fn read_sync(client: Arc<BackendClient>, badge: Arc<UnreadBadge>) -> ReadStateSync<BackendClient> {
    let policy = SettlePolicy::from_config(&client.config());
    ReadStateSync::new(client, badge, policy)
}

/// Show the signed-in user as the auth server sees it.
pub async fn whoami() -> Result<()> {
    let client = BackendClient::new().await?;
    let http = reqwest::Client::new();
    let principal =
        crate::auth::gotrue::fetch_user(&http, client.endpoint(), &client.access_token().await?).await?;

    let mut config = Config::load()?;
    config.set_principal(&principal);
    config.save()?;

    println!("Name:  {}", principal.label());
    println!("ID:    {}", principal.id);
    if let Some(ref email) = principal.email {
        println!("Email: {}", email);
    }
    if let Some(ref avatar) = principal.avatar_url {
        println!("Photo: {}", avatar);
    }
    Ok(())
}

/// List conversation partners, most recent first (prints to stdout).
pub async fn list_contacts() -> Result<()> {
    let client = BackendClient::new().await?;
    let principal = require_principal(&client)?;
    let contacts = load_contacts(&client, principal).await?;
    console::print_contacts(&contacts, None);
    Ok(())
}

/// Print the conversation with `user` and mark it read.
pub async fn read_conversation(user: &str, limit: usize) -> Result<()> {
    let client = Arc::new(BackendClient::new().await?);
    let principal = require_principal(&client)?;
    let (counterparty, name) = resolve_user(&client, principal, user).await?;

    let msgs = load_conversation(&*client, principal, counterparty).await?;
    if msgs.is_empty() {
        println!("(no messages)");
    }
    let skip = msgs.len().saturating_sub(limit);
    for msg in &msgs[skip..] {
        println!("{}", console::render_message(msg, principal, &name));
    }

    let badge = Arc::new(UnreadBadge::new(client.config().unread_count.unwrap_or(0)));
    let sync = read_sync(Arc::clone(&client), Arc::clone(&badge));
    match sync.sync(Some(principal), counterparty).await {
        Ok(outcome) => {
            tracing::debug!("Marked {} read, {} unread left", outcome.marked, outcome.unread_total);
            save_unread(outcome.unread_total)?;
        }
        Err(e) => tracing::warn!("Could not mark conversation read: {:#}", e),
    }
    Ok(())
}

/// Send one message, optionally about a product listing.
pub async fn send_message(to: &str, product: Option<&str>, message: Option<String>) -> Result<()> {
    let client = BackendClient::new().await?;
    let principal = require_principal(&client)?;
    let (counterparty, name) = resolve_user(&client, principal, to).await?;

    let mut composer = Composer::new();
    if let Some(id) = product {
        let snapshot = client
            .product(id)
            .await?
            .with_context(|| format!("Product {} not found", id))?;
        composer.attach_product(snapshot);
    }
    // without text, a product message goes out with its template
    if let Some(text) = message {
        composer.set_draft(text);
    }

    let sent = composer
        .send(&client, Some(principal), Some(counterparty))
        .await?;
    println!("Sent to {} (id {})", name, sent.id);
    Ok(())
}

/// Recount unread messages and store the badge value.
pub async fn unread() -> Result<()> {
    let client = Arc::new(BackendClient::new().await?);
    let principal = require_principal(&client)?;
    let badge = Arc::new(UnreadBadge::default());
    let total = read_sync(Arc::clone(&client), badge).recount(principal).await?;
    save_unread(total)?;
    println!("{} unread", total);
    Ok(())
}

fn print_live(msg: &Message, principal: UserId) {
    let direction = if msg.sender_id == principal { "->" } else { "<-" };
    let other = msg.counterparty_of(principal).unwrap_or(msg.sender_id);
    let (text, image) = msg.split_image();
    println!(
        "[{}] {} {}: {}",
        msg.created_at.format("%H:%M:%S"),
        direction,
        other,
        text.trim()
    );
    if let Some(url) = image {
        println!("    [image] {}", url);
    }
}

/// Print new messages involving the signed-in user as they arrive.
pub async fn listen() -> Result<()> {
    let client = BackendClient::new().await?;
    let principal = require_principal(&client)?;
    let realtime = RealtimeClient::new(client.endpoint().clone(), client.access_token().await?);

    let mut sub = realtime.subscribe(ChangeFilter::message_inserts()).await?;
    println!("Listening for messages... (Ctrl-C to stop)");

    loop {
        tokio::select! {
            msg = sub.next() => {
                let Some(msg) = msg else {
                    break;
                };
                if msg.counterparty_of(principal).is_some() {
                    print_live(&msg, principal);
                }
            }
            _ = tokio::signal::ctrl_c() => {
                println!("Shutting down...");
                break;
            }
        }
    }
    sub.unsubscribe().await;
    Ok(())
}

/// Interactive inbox console.
pub async fn inbox(user: Option<String>, product: Option<String>) -> Result<()> {
    let client = Arc::new(BackendClient::new().await?);
    let config = client.config();

    let identity = IdentityContext::new(saved_principal(&config));
    let session_client = Arc::clone(&client);
    let watcher = follow_saved_session(identity.clone(), SESSION_POLL, move |config| {
        session_client.install(config)
    });

    let badge = Arc::new(UnreadBadge::new(config.unread_count.unwrap_or(0)));
    let realtime = Arc::new(RealtimeClient::new(client.endpoint().clone(), client.access_token().await?));
    let mut session = InboxSession::new(
        Arc::clone(&client),
        realtime,
        identity,
        Arc::clone(&badge),
        SettlePolicy::from_config(&config),
    );

    if let Some(id) = product {
        if !session.attach_product(&id).await? {
            println!("Product {} not found, starting without it", id);
        }
    }

    let result = console::run(&mut session, user).await;
    watcher.abort();
    save_unread(badge.current())?;
    result
}
