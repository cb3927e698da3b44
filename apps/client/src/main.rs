use std::path::PathBuf;

use clap::{Parser, Subcommand};
use client::contacts::{
    invite_message, normalize_phone, ContactResolution, DeviceContact, JsonFileContacts,
};
use client::messaging::{Applied, ConversationRoom};
use client::protocol::REACTIONS;
use client::{observability, AppError, AppResult, Backend, ChatService, ClientConfig, ViewChange};
use shared_proto::{ContentType, Message};
use tokio::io::{AsyncBufReadExt, BufReader};
use uuid::Uuid;

#[derive(Parser)]
#[command(author, version, about = "ThunderTalk chat client")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create an account for CHAT_EMAIL / CHAT_PASSWORD
    SignUp,
    /// List conversations, most recent first
    Chats {
        #[arg(long)]
        search: Option<String>,
    },
    /// Open a conversation and chat interactively
    Open { counterparty: Uuid },
    /// Send one text message
    Send { counterparty: Uuid, text: String },
    /// Upload a file and send it as a message
    Attach {
        counterparty: Uuid,
        path: PathBuf,
        #[arg(long)]
        image: bool,
        #[arg(long, default_value = "")]
        caption: String,
    },
    /// React to a message of a conversation
    React {
        counterparty: Uuid,
        message_id: Uuid,
        symbol: String,
    },
    /// Show which exported device contacts are registered
    Contacts {
        file: PathBuf,
        #[arg(long)]
        search: Option<String>,
    },
    /// Start a chat with a phone number that has no account
    Guest { phone: String, name: String },
}

#[tokio::main]
async fn main() {
    observability::init_tracing();
    let args = Args::parse();

    if let Err(err) = run(args).await {
        tracing::error!(
            component = "cli",
            code = ?err.code,
            details = err.details.as_deref().unwrap_or_default(),
            "{}",
            err.message
        );
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}

fn credentials() -> AppResult<(String, String)> {
    let email = std::env::var("CHAT_EMAIL").map_err(|_| AppError::validation("CHAT_EMAIL is not set"))?;
    let password =
        std::env::var("CHAT_PASSWORD").map_err(|_| AppError::validation("CHAT_PASSWORD is not set"))?;
    Ok((email, password))
}

async fn run(args: Args) -> AppResult<()> {
    let config = ClientConfig::from_env()?;
    let backend = Backend::new(config)?;
    let (email, password) = credentials()?;

    if let Command::SignUp = args.command {
        let outcome = backend.sign_up(&email, &password).await?;
        println!("{}", outcome.message());
        return Ok(());
    }

    backend.sign_in(&email, &password).await?;
    let service = ChatService::connect(backend.clone()).await?;
    if let Err(err) = service.set_online(true).await {
        tracing::warn!(component = "cli", error = %err, "presence update failed");
    }

    let result = dispatch(&service, args.command).await;

    if let Err(err) = service.set_online(false).await {
        tracing::warn!(component = "cli", error = %err, "presence update failed");
    }
    backend.sign_out().await?;
    result
}

async fn dispatch(service: &ChatService, command: Command) -> AppResult<()> {
    match command {
        Command::SignUp => Ok(()),
        Command::Chats { search } => {
            service.refresh_rooms().await?;
            let rooms = match search {
                Some(query) => service.search_rooms(&query).await,
                None => service.rooms().await,
            };
            if rooms.is_empty() {
                println!("No chats yet");
            }
            for room in &rooms {
                print_room(room);
            }
            Ok(())
        }
        Command::Open { counterparty } => chat(service, counterparty).await,
        Command::Send { counterparty, text } => {
            let message = service.send_text(counterparty, &text).await?;
            print_message(service.me(), &message);
            Ok(())
        }
        Command::Attach {
            counterparty,
            path,
            image,
            caption,
        } => {
            let kind = if image { ContentType::Image } else { ContentType::File };
            let message = service
                .send_attachment(counterparty, &path, kind, &caption)
                .await?;
            print_message(service.me(), &message);
            Ok(())
        }
        Command::React {
            counterparty,
            message_id,
            symbol,
        } => {
            let view = service.open_conversation(counterparty).await?;
            let message = view.react(message_id, &symbol).await?;
            print_message(service.me(), &message);
            Ok(())
        }
        Command::Contacts { file, search } => {
            let directory = service.load_contacts(&JsonFileContacts::new(file)).await?;
            let contacts = directory.search(search.as_deref().unwrap_or_default());
            for contact in contacts {
                let status = if directory.is_registered(contact) {
                    "registered"
                } else {
                    "invite"
                };
                println!(
                    "{:<24} {:<16} {}",
                    contact.name,
                    contact.primary_phone().unwrap_or("-"),
                    status
                );
            }
            Ok(())
        }
        Command::Guest { phone, name } => {
            let contact = DeviceContact {
                id: phone.clone(),
                name: name.clone(),
                phone_numbers: Some(normalize_phone(&phone))
                    .filter(|number| !number.is_empty())
                    .into_iter()
                    .collect(),
                email: None,
                image: None,
            };
            let counterparty = match service.resolve_contact(&contact).await? {
                ContactResolution::Existing(id) => id,
                ContactResolution::Unregistered { name, phone_number } => {
                    println!("{name} is not on ThunderTalk. {}", invite_message());
                    service.start_guest_chat(&phone_number, &name).await?
                }
            };
            println!("{counterparty}");
            Ok(())
        }
    }
}

async fn chat(service: &ChatService, counterparty: Uuid) -> AppResult<()> {
    let mut view = service.open_conversation(counterparty).await?;
    let me = service.me();

    let title = view
        .profile()
        .map(|p| p.full_name.clone())
        .unwrap_or_else(|| counterparty.to_string());
    println!("== {title} ==");
    for message in view.messages().await.iter().rev() {
        print_message(me, message);
    }
    println!("(type to send, /typing, /react <message-id> <n>, /quit; reactions: {})", REACTIONS.join(" "));

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            change = view.next_change() => match change {
                Some(ViewChange::Timeline { applied, message_id }) => {
                    if let Some(message) = view.message(message_id).await {
                        if applied == Applied::Updated {
                            print!("(updated) ");
                        }
                        print_message(me, &message);
                    }
                }
                Some(ViewChange::Typing(true)) => println!("… typing"),
                Some(ViewChange::Typing(false)) => println!("… stopped typing"),
                Some(ViewChange::Disconnected) | None => {
                    println!("(disconnected)");
                    break;
                }
                Some(_) => {}
            },
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                let line = line.trim();
                if line == "/quit" {
                    break;
                } else if line == "/typing" {
                    view.notify_typing()?;
                } else if let Some(rest) = line.strip_prefix("/react ") {
                    react_command(&view, rest).await;
                } else if !line.is_empty() {
                    match view.send_text(line).await {
                        Ok(message) => print_message(me, &message),
                        Err(err) => eprintln!("error: {err}"),
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }
    Ok(())
}

async fn react_command(view: &client::ConversationView, args: &str) {
    let mut parts = args.split_whitespace();
    let message_id = parts.next().and_then(|raw| Uuid::parse_str(raw).ok());
    let symbol = parts
        .next()
        .and_then(|raw| raw.parse::<usize>().ok())
        .and_then(|index| REACTIONS.get(index));

    match (message_id, symbol) {
        (Some(id), Some(symbol)) => {
            if let Err(err) = view.react(id, symbol).await {
                eprintln!("error: {err}");
            }
        }
        _ => eprintln!("usage: /react <message-id> <0-{}>", REACTIONS.len() - 1),
    }
}

fn print_room(room: &ConversationRoom) {
    let dot = if room.shows_unread_dot() { "●" } else { " " };
    println!(
        "{dot} {:<28} {:<40} {} ({})",
        room.display_name(),
        room.last_message.preview(),
        room.last_message.time_label(),
        room.counterparty_id
    );
}

fn print_message(me: Uuid, message: &Message) {
    let who = if message.sender_id == me { "me" } else { "them" };
    let read = if message.sender_id == me && message.is_read { " ✓✓" } else { "" };
    let reactions: Vec<String> = message
        .reactions
        .iter()
        .map(|(symbol, count)| format!("{symbol}{count}"))
        .collect();
    let link = message
        .file_url
        .as_deref()
        .map(|url| format!(" <{url}>"))
        .unwrap_or_default();

    println!(
        "[{}] {who}: {}{link}{read} {} ({})",
        message.time_label(),
        if message.content.is_empty() { message.preview() } else { message.content.as_str() },
        reactions.join(" "),
        message.id
    );
}
