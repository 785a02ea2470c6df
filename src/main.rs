use anyhow::{anyhow, Context, Result};
use clap::Parser;
use log::{debug, error, info, warn, LevelFilter};
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};

mod ui;
mod utils;

use crate::ui::{parse_command, render_messages, Command, HELP};
use koschat::chat::identity::fetch_current_user;
use koschat::chat::{HttpMessageApi, MessageReconciler, ReconcilerEvent, SseTransport, StaticIdentity};
use koschat::config::ChatConfig;
use koschat::ChatError;

/// Command line arguments for koschat
#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "koschat: terminal chat for kos tenants and owners.",
    long_about = "koschat opens a chat room on the kos chat service and keeps the transcript in sync \
    with the server push stream.\n\n\
    Settings are read from <config dir>/koschat/config.json, then KOSCHAT_* environment variables, \
    then the flags below."
)]
struct Args {
    /// Room to open
    #[arg(long, env = "KOSCHAT_ROOM")]
    room: String,

    /// Chat service base URL
    #[arg(long)]
    chat_url: Option<String>,

    /// Auth service base URL
    #[arg(long)]
    auth_url: Option<String>,

    /// Access token sent as a bearer token
    #[arg(long)]
    token: Option<String>,

    #[arg(long, value_name = "PATH", default_value = "koschat.log")]
    log_file: PathBuf,

    /// off, error, warn, info, debug or trace
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn terminal_width() -> usize {
    std::env::var("COLUMNS")
        .ok()
        .and_then(|c| c.parse().ok())
        .filter(|&w: &usize| w >= 20)
        .unwrap_or(80)
}

async fn redraw(reconciler: &MessageReconciler, me: &str) {
    let messages = reconciler.snapshot().await;
    let editing = reconciler.editing().await.map(|e| e.message_id);
    let room = reconciler.room_id().await.unwrap_or_else(|| "(closed)".to_string());

    println!("\n==== room {} ====", room);
    for line in render_messages(&messages, me, editing.as_deref(), terminal_width(), chrono::Utc::now()) {
        println!("{}", line);
    }
}

fn report(action: &str, e: &ChatError) {
    warn!("{} failed: {}", action, e);
    eprintln!("{} failed: {}", action, e);
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let level = LevelFilter::from_str(&args.log_level)
        .map_err(|_| anyhow!("invalid log level '{}'", args.log_level))?;
    utils::setup_logging(args.log_file.to_str(), level)?;
    info!("koschat starting up on {} {}", std::env::consts::OS, std::env::consts::ARCH);

    let mut config = ChatConfig::load().context("loading configuration")?;
    if let Some(url) = args.chat_url {
        config.chat_url = url;
    }
    if let Some(url) = args.auth_url {
        config.auth_url = url;
    }
    if let Some(token) = args.token {
        config.access_token = Some(token);
    }
    config.validate()?;

    let user = fetch_current_user(&config)
        .await
        .context("resolving the signed-in user")?;
    let me = user.user_id.clone().unwrap_or_default();
    println!("Signed in as {} ({:?})", user.email, user.role);

    let identity = Arc::new(StaticIdentity::from(&user));
    let transport = Arc::new(SseTransport::new(&config)?);
    let api = Arc::new(HttpMessageApi::new(&config)?);
    let (reconciler, mut events) = MessageReconciler::new(transport, api, identity, config.notify_buffer);

    let mut room = args.room;
    if let Err(e) = reconciler.open(&room).await {
        report("Opening the room", &e);
    }
    redraw(&reconciler, &me).await;
    println!("Type /help for commands.");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            event = events.recv() => {
                match event {
                    Some(ReconcilerEvent::LogUpdated { .. }) => redraw(&reconciler, &me).await,
                    Some(ReconcilerEvent::ChannelOpened { room_id }) => debug!("Channel open for {}", room_id),
                    Some(ReconcilerEvent::ChannelFailed { room_id, reason }) => {
                        error!("Room {} disconnected: {}", room_id, reason);
                        eprintln!("Chat connection error: {}. Type /reconnect to try again.", reason);
                    }
                    None => break,
                }
            }
            line = lines.next_line() => {
                let line = match line? {
                    Some(line) => line,
                    None => break,
                };
                match parse_command(&line) {
                    Command::Empty => {}
                    Command::Send(content) => {
                        if let Err(e) = reconciler.send(&content).await {
                            report("Sending", &e);
                        }
                    }
                    Command::BeginEdit(message_id) => match reconciler.begin_edit(&message_id).await {
                        Ok(original) => {
                            println!("Editing #{}: {}", message_id, original);
                            println!("Type /save <new text> or /cancel.");
                        }
                        Err(e) => report("Editing", &e),
                    },
                    Command::SaveEdit(content) => match reconciler.save_edit(&content).await {
                        Ok(_) => println!("Message edited."),
                        Err(e) => report("Saving the edit", &e),
                    },
                    Command::CancelEdit => {
                        if reconciler.cancel_edit().await.is_some() {
                            redraw(&reconciler, &me).await;
                        }
                    }
                    Command::Delete(message_id) => match reconciler.delete(&message_id).await {
                        Ok(_) => println!("Message deleted."),
                        Err(e) => report("Deleting", &e),
                    },
                    Command::Reconnect => {
                        if let Err(e) = reconciler.open(&room).await {
                            report("Reconnecting", &e);
                        }
                        redraw(&reconciler, &me).await;
                    }
                    Command::SwitchRoom(next) => {
                        room = next;
                        if let Err(e) = reconciler.open(&room).await {
                            report("Opening the room", &e);
                        }
                        redraw(&reconciler, &me).await;
                    }
                    Command::Help => println!("{}", HELP),
                    Command::Quit => break,
                    Command::Invalid(input) => eprintln!("Unknown command: {} (try /help)", input),
                }
            }
        }
    }

    reconciler.close().await;
    info!("koschat shutting down");
    Ok(())
}
