//! Souq CLI - marketplace inbox client
//!
//! Buyer/seller messaging from the terminal: contacts, conversations,
//! live delivery and unread counts.

mod api;
mod auth;
mod config;
mod inbox;
mod models;
mod realtime;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "souq")]
#[command(about = "Terminal inbox for the Souq marketplace", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Set the backend endpoint and tuning options
    Configure {
        /// Project URL, e.g. https://abcd.supabase.co
        #[arg(long)]
        url: Option<String>,

        /// Public (anon) API key
        #[arg(long)]
        anon_key: Option<String>,

        /// Initial wait before confirming a mark-as-read (ms)
        #[arg(long)]
        settle_delay_ms: Option<u64>,

        /// Confirmation attempts before recounting anyway
        #[arg(long)]
        settle_attempts: Option<u32>,
    },

    /// Create an account
    Signup {
        /// Account email
        email: String,

        /// Name shown to other users
        #[arg(long)]
        name: Option<String>,
    },

    /// Sign in with email and password
    Login {
        /// Force interactive login even if a valid session exists
        #[arg(short, long)]
        force: bool,

        /// Account email (prompted if omitted)
        #[arg(short, long)]
        email: Option<String>,
    },

    /// Sign out and clear cached credentials
    Logout,

    /// Show current authentication status
    Status,

    /// Show current user info (verify auth works)
    Whoami,

    /// List conversations, most recent first
    Contacts,

    /// Read a conversation and mark it read
    Read {
        /// User id, contact number or name prefix (from `contacts` output)
        user: String,

        /// Maximum number of messages to show
        #[arg(short, long, default_value = "50")]
        limit: usize,
    },

    /// Send a message
    Send {
        /// User id, contact number or name prefix
        #[arg(short, long)]
        to: String,

        /// Attach a product listing; its image goes with the message
        #[arg(short, long)]
        product: Option<String>,

        /// Message content (defaults to the product template)
        message: Option<String>,
    },

    /// Recount unread messages
    Unread,

    /// Print new messages as they arrive
    Listen,

    /// Open the interactive inbox
    Inbox {
        /// Conversation to open first
        user: Option<String>,

        /// Start a message about this product listing
        #[arg(short, long)]
        product: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    match cli.command {
        Commands::Configure {
            url,
            anon_key,
            settle_delay_ms,
            settle_attempts,
        } => {
            config::configure(url, anon_key, settle_delay_ms, settle_attempts)?;
        }
        Commands::Signup { email, name } => {
            auth::signup(&email, name.as_deref()).await?;
        }
        Commands::Login { force, email } => {
            tracing::info!("Starting authentication flow...");
            auth::login(force, email).await?;
        }
        Commands::Logout => {
            tracing::info!("Logging out...");
            auth::logout().await?;
        }
        Commands::Status => {
            auth::status().await?;
        }
        Commands::Whoami => {
            api::whoami().await?;
        }
        Commands::Contacts => {
            tracing::info!("Fetching conversations...");
            api::list_contacts().await?;
        }
        Commands::Read { user, limit } => {
            api::read_conversation(&user, limit).await?;
        }
        Commands::Send {
            to,
            product,
            message,
        } => {
            tracing::info!("Sending message...");
            api::send_message(&to, product.as_deref(), message).await?;
        }
        Commands::Unread => {
            api::unread().await?;
        }
        Commands::Listen => {
            api::listen().await?;
        }
        Commands::Inbox { user, product } => {
            api::inbox(user, product).await?;
        }
    }

    Ok(())
}
