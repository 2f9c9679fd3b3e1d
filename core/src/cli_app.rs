use crate::backend::Backend;
use crate::connection::{ConnectionManager, ConnectionStatus, PushEvent};
use crate::health::{check_server_status, ServerStatus};
use crate::http::HttpBackend;
use crate::messenger::{Messenger, MessengerTiming};
use crate::models::Session;
use crate::notifications::NotificationCenter;
use crate::session::SessionManager;
use crate::sse::SseTransport;
use crate::Config;
use colored::*;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing::info;

const COMMANDS: &[&str] = &["status", "login", "watch", "conversations", "notifications"];

/// Entry point for the `chyloo` binary.
///
/// Arguments before the command configure the client, the rest belong to the command.
pub async fn run(args: Vec<String>) -> anyhow::Result<()> {
    let bin = args.first().map(String::as_str).unwrap_or("chyloo").to_string();

    let Some(split) = args.iter().position(|a| COMMANDS.contains(&a.as_str())) else {
        print_usage(&bin);
        return Ok(());
    };
    let (config_args, command_args) = args.split_at(split);
    let config = Config::from_args(config_args)
        .map_err(|e| anyhow::anyhow!("Configuration error: {}", e))?;
    let http = Arc::new(HttpBackend::new(config.clone())?);
    // The push channel authenticates with the same cookie jar as REST
    let client = http.client().clone();
    let backend: Arc<dyn Backend> = http;

    match command_args[0].as_str() {
        "status" => show_status(backend.as_ref(), &config).await,
        command => {
            let (Some(user), Some(pass)) = (command_args.get(1), command_args.get(2)) else {
                eprintln!(
                    "{}",
                    format!("Usage: {} <base_url> {} <username> <password>", bin, command).yellow()
                );
                return Ok(());
            };
            let sessions = SessionManager::new(backend.clone());
            let me = match sessions.login(user, pass).await {
                Ok(me) => me,
                Err(e) => {
                    eprintln!("{} {}", "✗".red().bold(), e.user_message().red());
                    std::process::exit(1);
                }
            };
            println!(
                "{} Logged in as {} ({})",
                "✓".green().bold(),
                me.display_name().cyan(),
                me.id.dimmed()
            );

            match command {
                "conversations" => list_conversations(backend, client, &config, me).await,
                "notifications" => list_notifications(backend, &config).await,
                "watch" => watch(backend, client, &config, me).await,
                _ => Ok(()),
            }
        }
    }
}

fn print_usage(bin: &str) {
    println!("{}", "⚡ Chyloo sync client".bright_cyan().bold());
    println!();
    println!("{}", "Usage:".bright_white().bold());
    println!("  {} <base_url> [options] <command> [args]", bin.cyan());
    println!();
    println!("{}", "Commands:".bright_white().bold());
    println!("  {}                          Check server health", "status".cyan());
    println!(
        "  {} <user> <pass>             Log in and print the session",
        "login".cyan()
    );
    println!(
        "  {} <user> <pass>     List conversations",
        "conversations".cyan()
    );
    println!(
        "  {} <user> <pass>     List the first page of notifications",
        "notifications".cyan()
    );
    println!(
        "  {} <user> <pass>             Print live push events until Ctrl-C",
        "watch".cyan()
    );
    println!();
    println!("{}", "Options:".bright_white().bold());
    println!("  --config <file>  --seen-debounce-ms <ms>  --typing-idle-ms <ms>");
    println!("  --health-timeout-ms <ms>  --page-size <n>");
}

async fn show_status(backend: &dyn Backend, config: &Config) -> anyhow::Result<()> {
    let status = check_server_status(backend, config.health_timeout).await;
    println!(
        "{}",
        "╭─ Chyloo Server ──────────────────────────────────────────────╮".bright_cyan()
    );
    println!(
        "{} {}",
        "│".bright_cyan(),
        format!("URL:    {}", config.base_url.cyan()).bright_white()
    );
    let label = match status {
        ServerStatus::Online => "online".green(),
        ServerStatus::Offline => "offline".red(),
    };
    println!(
        "{} {}",
        "│".bright_cyan(),
        format!("Status: {}", label).bright_white()
    );
    println!(
        "{}",
        "╰──────────────────────────────────────────────────────────────╯".bright_cyan()
    );
    if status == ServerStatus::Offline {
        std::process::exit(1);
    }
    Ok(())
}

fn new_messenger(
    backend: Arc<dyn Backend>,
    connection: Arc<ConnectionManager>,
    config: &Config,
    me: Session,
) -> Messenger {
    Messenger::new(backend, connection, me, MessengerTiming::from(config))
}

async fn list_conversations(
    backend: Arc<dyn Backend>,
    client: reqwest::Client,
    config: &Config,
    me: Session,
) -> anyhow::Result<()> {
    // Listing needs no push channel; the manager simply stays disconnected
    let transport = Arc::new(SseTransport::new(client, config.base_url.clone()));
    let connection = Arc::new(ConnectionManager::new(transport, config.event_buffer));
    let messenger = new_messenger(backend, connection, config, me.clone());
    messenger.load_conversations().await?;

    let view = messenger.view().await;
    let items = view.conversations().items();
    if items.is_empty() {
        println!("{}", "No conversations".yellow());
        return Ok(());
    }
    println!(
        "{}",
        format!("Conversations ({}, {} unread)", items.len(), view.conversations().unread_count())
            .bright_cyan()
            .bold()
    );
    println!("{}", "─".repeat(60).dimmed());
    for conv in items {
        let title = match &conv.chat.group_name {
            Some(name) => name.clone(),
            None => conv
                .chat
                .members
                .iter()
                .filter(|m| m.id != me.id)
                .map(|m| m.display_name().to_string())
                .collect::<Vec<_>>()
                .join(", "),
        };
        let preview = conv
            .last_message
            .as_ref()
            .map(|m| {
                if m.deletion.is_deleted() {
                    "message deleted".to_string()
                } else if let Some(text) = m.text.as_deref().filter(|t| !t.is_empty()) {
                    text.to_string()
                } else {
                    "[attachment]".to_string()
                }
            })
            .unwrap_or_default();
        let marker = if conv.has_new_messages {
            "●".green()
        } else {
            " ".normal()
        };
        println!("  {} {} {}", marker, title.cyan(), preview.dimmed());
    }
    Ok(())
}

async fn list_notifications(backend: Arc<dyn Backend>, config: &Config) -> anyhow::Result<()> {
    let center = NotificationCenter::new(backend, config.notification_page_size);
    center.fetch_notifications(1, false).await?;

    let store = center.view().await;
    println!(
        "{}",
        format!("Notifications ({} unread)", store.unread_count())
            .bright_cyan()
            .bold()
    );
    println!("{}", "─".repeat(60).dimmed());
    for n in store.items() {
        let marker = if n.is_read { " ".normal() } else { "●".green() };
        println!(
            "  {} [{}] {} {}",
            marker,
            n.kind.category().yellow(),
            n.sender.display_name().cyan(),
            n.message
        );
    }
    if store.has_more() {
        println!("  {}", "…more available".dimmed());
    }
    Ok(())
}

async fn watch(
    backend: Arc<dyn Backend>,
    client: reqwest::Client,
    config: &Config,
    me: Session,
) -> anyhow::Result<()> {
    let transport = Arc::new(SseTransport::new(client, config.base_url.clone()));
    let connection = Arc::new(ConnectionManager::new(transport, config.event_buffer));
    let messenger = Arc::new(new_messenger(
        backend.clone(),
        connection.clone(),
        config,
        me.clone(),
    ));
    let notifications = NotificationCenter::new(backend, config.notification_page_size);

    let mut printed = connection.subscribe();
    let messenger_events = connection.subscribe();
    connection.set_identity(Some(&me)).await;
    if let ConnectionStatus::Failed(reason) = connection.status() {
        eprintln!("{} Push channel failed: {}", "✗".red().bold(), reason.red());
        std::process::exit(1);
    }

    let runner = {
        let messenger = messenger.clone();
        tokio::spawn(async move { messenger.run(messenger_events).await })
    };
    let _ = messenger.load_conversations().await;
    let _ = notifications.fetch_notifications(1, false).await;
    info!("Watching push events for {}", me.id);
    println!("{}", "Watching push events (Ctrl-C to stop)".bright_cyan());

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = printed.recv() => match event {
                Ok(event) => {
                    notifications.handle_event(&event).await;
                    print_event(&event);
                }
                Err(RecvError::Lagged(n)) => {
                    println!("{}", format!("… skipped {} events", n).yellow());
                }
                Err(RecvError::Closed) => break,
            },
        }
    }

    runner.abort();
    connection.close().await;
    Ok(())
}

fn print_event(event: &PushEvent) {
    match event {
        PushEvent::NewMessage { message, .. } => println!(
            "{} {} in {}: {}",
            "✉".green(),
            message.sender.display_name().cyan(),
            message.chat_id().dimmed(),
            message.text.as_deref().unwrap_or("[attachment]")
        ),
        PushEvent::ConversationSeen { chat_id, user_id, .. } => {
            println!("{} {} saw {}", "👁".blue(), user_id.cyan(), chat_id.dimmed())
        }
        PushEvent::MessageDeleted { message_id, .. } => {
            println!("{} message {} deleted", "✗".red(), message_id.dimmed())
        }
        PushEvent::UserTyping { user_name, chat_id, .. } => {
            println!("{} {} is typing in {}", "…".dimmed(), user_name.cyan(), chat_id.dimmed())
        }
        PushEvent::UserStoppedTyping { .. } => {}
        PushEvent::NewNotification(n) => println!(
            "{} [{}] {}",
            "🔔".yellow(),
            n.kind.category().yellow(),
            n.message
        ),
        PushEvent::NotificationRead { notification_id } => {
            println!("{} notification {} read", "✓".green(), notification_id.dimmed())
        }
        PushEvent::RefreshConversationList => {
            println!("{}", "↻ conversation list refreshed".dimmed())
        }
    }
}
