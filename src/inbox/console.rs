//! Line-oriented inbox console.
//!
//! Plain lines are sent to the open conversation; lines starting with `/`
//! are commands.

use anyhow::Result;
use tokio::io::{AsyncBufReadExt, BufReader};
use uuid::Uuid;

use super::live::RealtimeChannel;
use super::session::{InboxSession, InboxState, Update};
use crate::api::MessageStore;
use crate::models::{Contact, Message, UserId, UNKNOWN_USER};

const PREVIEW_CHARS: usize = 48;
/// Receipts on the principal's own messages.
const SENT_MARK: &str = "✓";
const READ_MARK: &str = "✓✓";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Open(String),
    Contacts,
    Product(String),
    Help,
    Quit,
    Send(String),
    Empty,
    Unknown(String),
}

pub fn parse_command(line: &str) -> Command {
    let line = line.trim();
    if line.is_empty() {
        return Command::Empty;
    }
    let Some(rest) = line.strip_prefix('/') else {
        return Command::Send(line.to_string());
    };
    let (name, arg) = match rest.split_once(char::is_whitespace) {
        Some((name, arg)) => (name, arg.trim()),
        None => (rest, ""),
    };
    match (name, arg.is_empty()) {
        ("open" | "o", false) => Command::Open(arg.to_string()),
        ("contacts" | "c", _) => Command::Contacts,
        ("product" | "p", false) => Command::Product(arg.to_string()),
        ("help" | "h" | "?", _) => Command::Help,
        ("quit" | "q" | "exit", _) => Command::Quit,
        _ => Command::Unknown(line.to_string()),
    }
}

/// Find a contact by list position (1-based), user id, or name prefix.
pub fn resolve_contact(contacts: &[Contact], arg: &str) -> Option<UserId> {
    if let Ok(index) = arg.parse::<usize>() {
        return contacts.get(index.checked_sub(1)?).map(|c| c.counterparty);
    }
    if let Ok(id) = Uuid::parse_str(arg) {
        return Some(id);
    }
    let needle = arg.to_lowercase();
    contacts
        .iter()
        .find(|c| c.display_name.to_lowercase().starts_with(&needle))
        .map(|c| c.counterparty)
}

fn name_of(state: &InboxState, id: UserId) -> String {
    state
        .contacts()
        .iter()
        .find(|c| c.counterparty == id)
        .map(|c| c.display_name.clone())
        .unwrap_or_else(|| UNKNOWN_USER.to_string())
}

/// One message as printed in the console and by `souq read`.
pub fn render_message(msg: &Message, principal: UserId, their_name: &str) -> String {
    let who = if msg.sender_id == principal { "You" } else { their_name };
    let (text, image) = msg.split_image();
    let mut out = format!(
        "[{}] {}: {}",
        msg.created_at.format("%Y-%m-%d %H:%M"),
        who,
        text.trim()
    );
    if msg.sender_id == principal {
        out.push(' ');
        out.push_str(if msg.is_read { READ_MARK } else { SENT_MARK });
    }
    if let Some(url) = image {
        out.push_str(&format!("\n    [image] {}", url));
    }
    out
}

pub fn print_contacts(contacts: &[Contact], selected: Option<UserId>) {
    println!("\nConversations:");
    println!("{:-<60}", "");

    if contacts.is_empty() {
        println!("  (no conversations yet)");
        return;
    }

    for (i, contact) in contacts.iter().enumerate() {
        let marker = if Some(contact.counterparty) == selected { '>' } else { ' ' };
        let unread = if contact.unread > 0 {
            format!(" ({} unread)", contact.unread)
        } else {
            String::new()
        };
        println!("{}{:>3}. {}{}", marker, i + 1, contact.display_name, unread);
        if let Some(at) = contact.last_at {
            println!("       {}  {}", at.format("%Y-%m-%d %H:%M"), contact.preview(PREVIEW_CHARS));
        }
    }
    println!();
}

fn print_help() {
    println!("Commands:");
    println!("  /open <n|name|id>   open a conversation");
    println!("  /contacts           list conversations");
    println!("  /product <id>       attach a listing to the next message");
    println!("  /quit               leave");
    println!("Anything else is sent to the open conversation.");
}

fn show<S, R>(session: &InboxSession<S, R>, update: Update)
where
    S: MessageStore + 'static,
    R: RealtimeChannel,
{
    let state = session.state();
    match update {
        Update::Contacts => print_contacts(state.contacts(), state.counterparty()),
        Update::Redirected(id) => {
            print_contacts(state.contacts(), Some(id));
            println!("Opening conversation with {}...", name_of(state, id));
        }
        Update::History(id) => {
            let Some(principal) = state.principal() else {
                return;
            };
            let name = name_of(state, id);
            println!("\n--- {} ---", name);
            if state.conversation().is_empty() {
                println!("(no messages yet, say hello)");
            }
            for msg in state.conversation().messages() {
                println!("{}", render_message(msg, principal, &name));
            }
        }
        Update::Message(msg) => {
            if let Some(principal) = state.principal() {
                let name = name_of(state, msg.sender_id);
                println!("{}", render_message(&msg, principal, &name));
            }
        }
        Update::Unread(total) => println!("[{} unread]", total),
        Update::Identity(Some(p)) => println!("Signed in as {}", p.label()),
        Update::Identity(None) => println!("Signed out."),
        Update::Failed(reason) => eprintln!("{}", reason),
    }
}

/// Run the console until `/quit`, end of input or Ctrl-C.
pub async fn run<S, R>(session: &mut InboxSession<S, R>, open: Option<String>) -> Result<()>
where
    S: MessageStore + 'static,
    R: RealtimeChannel,
{
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut pending_open = open;

    // an explicit user id can be opened before the contact list arrives
    if let Some(id) = pending_open.as_deref().and_then(|arg| Uuid::parse_str(arg).ok()) {
        pending_open = None;
        session.open(id).await;
    }
    session.start();
    print_help();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else {
                    break;
                };
                match parse_command(&line) {
                    Command::Empty => {
                        // send a pre-filled draft as is
                        if !session.composer().draft().trim().is_empty() {
                            if let Err(e) = session.send(None).await {
                                eprintln!("Not sent: {:#}", e);
                            }
                        }
                    }
                    Command::Quit => break,
                    Command::Help => print_help(),
                    Command::Contacts => {
                        session.refresh_contacts();
                    }
                    Command::Open(arg) => match resolve_contact(session.state().contacts(), &arg) {
                        Some(id) => {
                            session.open(id).await;
                        }
                        None => println!("No conversation matches '{}'", arg),
                    },
                    Command::Product(id) => match session.attach_product(&id).await {
                        Ok(true) => {
                            println!("Draft:\n{}", session.composer().draft());
                            println!("(press Enter on an empty line to send the draft)");
                        }
                        Ok(false) => println!("Product {} not found", id),
                        Err(e) => eprintln!("Could not load product: {:#}", e),
                    },
                    Command::Send(text) => {
                        if let Err(e) = session.send(Some(text)).await {
                            eprintln!("Not sent: {:#}", e);
                        }
                    }
                    Command::Unknown(cmd) => println!("Unknown command {}. Try /help", cmd),
                }
            }
            input = session.next_input() => {
                if let Some(update) = session.apply(input).await {
                    let contacts_arrived = matches!(update, Update::Contacts | Update::Redirected(_));
                    show(session, update);
                    if contacts_arrived {
                        if let Some(arg) = pending_open.take() {
                            match resolve_contact(session.state().contacts(), &arg) {
                                Some(id) => {
                                    session.open(id).await;
                                }
                                None => println!("No conversation matches '{}'", arg),
                            }
                        }
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                println!("Shutting down...");
                break;
            }
        }
    }

    session.close().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::MemoryStore;
    use chrono::{TimeZone, Utc};

    fn contact(name: &str) -> Contact {
        Contact {
            counterparty: Uuid::new_v4(),
            display_name: name.to_string(),
            avatar_url: None,
            last_message: None,
            last_at: None,
            unread: 0,
        }
    }

    #[test]
    fn test_parse_commands() {
        assert_eq!(parse_command("  "), Command::Empty);
        assert_eq!(parse_command("hello there"), Command::Send("hello there".to_string()));
        assert_eq!(parse_command("/open 2"), Command::Open("2".to_string()));
        assert_eq!(parse_command("/o  Mona "), Command::Open("Mona".to_string()));
        assert_eq!(parse_command("/contacts"), Command::Contacts);
        assert_eq!(parse_command("/product 42"), Command::Product("42".to_string()));
        assert_eq!(parse_command("/q"), Command::Quit);
        assert_eq!(parse_command("/open"), Command::Unknown("/open".to_string()));
    }

    #[test]
    fn test_resolve_contact() {
        let contacts = vec![contact("Mona Hassan"), contact("Omar")];
        assert_eq!(resolve_contact(&contacts, "1"), Some(contacts[0].counterparty));
        assert_eq!(resolve_contact(&contacts, "omar"), Some(contacts[1].counterparty));
        assert_eq!(resolve_contact(&contacts, "0"), None);
        assert_eq!(resolve_contact(&contacts, "3"), None);
        assert_eq!(resolve_contact(&contacts, "zed"), None);

        let id = Uuid::new_v4();
        assert_eq!(resolve_contact(&contacts, &id.to_string()), Some(id));
    }

    #[test]
    fn test_render_message_with_image() {
        let store = MemoryStore::new();
        let (me, them) = (Uuid::new_v4(), Uuid::new_v4());
        let body = format!("Is it new?\n{}\nhttp://x/bike.jpg", crate::models::IMAGE_MARKER);
        let mut msg = store.build(me, them, body, false);
        msg.created_at = Utc.with_ymd_and_hms(2024, 5, 1, 9, 30, 0).unwrap();

        let out = render_message(&msg, me, "Mona");
        assert_eq!(out, "[2024-05-01 09:30] You: Is it new? ✓\n    [image] http://x/bike.jpg");

        msg.is_read = true;
        let out = render_message(&msg, me, "Mona");
        assert!(out.starts_with("[2024-05-01 09:30] You: Is it new? ✓✓\n"));

        // no receipts on the other side's messages
        let out = render_message(&msg, them, "Mona");
        assert_eq!(out, "[2024-05-01 09:30] Mona: Is it new?\n    [image] http://x/bike.jpg");
    }
}
