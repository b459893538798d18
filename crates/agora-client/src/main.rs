//! # agora-chat
//!
//! Line-based terminal client for one chat room.
//!
//! Plain lines are sent as messages. Commands:
//! - `/image <path>` attach an image to the draft
//! - `/paste <path>` paste a text file (long text becomes an attachment)
//! - `/drop` discard the draft
//! - `/reconnect` reconnect now
//! - `/quit`

use std::sync::Arc;

use anyhow::Context;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

use agora_client::{init_tracing, ChatEvent, ChatSessionManager, ClientConfig, Composer};
use agora_net::{HttpUploader, UploadBlob, WsConnector};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Initialize tracing (respects RUST_LOG env var)
    // -----------------------------------------------------------------------
    init_tracing();
    info!("Starting agora-chat v{}", env!("CARGO_PKG_VERSION"));

    // -----------------------------------------------------------------------
    // 2. Load configuration
    // -----------------------------------------------------------------------
    let config = ClientConfig::from_env();
    info!(
        server = %config.server_url,
        room = %config.chat.room,
        auth = config.token.is_some(),
        "Loaded configuration"
    );
    let base_url = config.base_url().context("invalid server URL")?;

    // -----------------------------------------------------------------------
    // 3. Wire transport, uploader and session manager
    // -----------------------------------------------------------------------
    let connector = WsConnector::new(&base_url, config.token.clone())
        .context("failed to build WebSocket endpoint")?;
    let uploader = HttpUploader::new(base_url, config.token.clone());
    let manager = ChatSessionManager::new(Arc::new(connector), Arc::new(uploader), config.chat);
    let composer = manager.composer();

    let printer = tokio::spawn(print_events(manager.events()));

    // -----------------------------------------------------------------------
    // 4. Read commands from stdin until EOF or /quit
    // -----------------------------------------------------------------------
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match handle_line(line, &manager, &composer).await {
            Ok(true) => {}
            Ok(false) => break,
            Err(e) => eprintln!("! {e:#}"),
        }
    }

    info!("Shutting down");
    manager.shutdown().await;
    printer.abort();
    Ok(())
}

/// Returns `false` when the user asked to quit.
async fn handle_line(
    line: &str,
    manager: &ChatSessionManager,
    composer: &Composer,
) -> anyhow::Result<bool> {
    let (command, arg) = line.split_once(' ').unwrap_or((line, ""));
    match command {
        "/quit" => return Ok(false),
        "/reconnect" => manager.reconnect().await?,
        "/drop" => composer.discard().await,
        "/image" => {
            let blob = UploadBlob::from_path(arg.trim()).await?;
            composer.attach_image(blob).await?;
            print_draft(composer).await;
        }
        "/paste" => {
            let text = tokio::fs::read_to_string(arg.trim())
                .await
                .with_context(|| format!("failed to read {}", arg.trim()))?;
            composer.paste_text(&text).await?;
            print_draft(composer).await;
        }
        _ => {
            let mut text = composer.text().await;
            if !text.is_empty() {
                text.push('\n');
            }
            text.push_str(line);
            composer.set_text(text).await;
            composer.submit(manager).await?;
        }
    }
    Ok(true)
}

async fn print_draft(composer: &Composer) {
    for attachment in composer.attachments().await {
        let status = attachment.url.as_deref().unwrap_or("uploading");
        println!(
            "  [{}] {} ({})",
            attachment.name,
            agora_client::attachment::format_size(attachment.size_bytes),
            status
        );
    }
}

async fn print_events(mut events: tokio::sync::broadcast::Receiver<ChatEvent>) {
    loop {
        match events.recv().await {
            Ok(ChatEvent::NewMessage(message)) => {
                let time = message
                    .created_at_utc()
                    .map(|t| t.format("%H:%M").to_string())
                    .unwrap_or_default();
                println!("{time} <{}> {}", message.author.label(), message.content);
                for url in &message.attachments {
                    println!("      {url}");
                }
            }
            Ok(ChatEvent::HistoryLoaded(history)) => {
                println!("-- joined #{} ({} messages) --", history.room, history.inserted);
            }
            Ok(ChatEvent::ConnectionChanged(change)) => println!("-- {} --", change.state),
            Ok(ChatEvent::RetryScheduled(retry)) => println!("-- {} --", retry.label()),
            Ok(ChatEvent::Announcement(a)) => {
                if let Some(text) = a.text {
                    println!("** {text} **");
                }
            }
            Ok(ChatEvent::Error(e)) => println!("!! {}", e.message),
            Err(RecvError::Lagged(skipped)) => warn!(skipped, "Event printer fell behind"),
            Err(RecvError::Closed) => break,
        }
    }
}
