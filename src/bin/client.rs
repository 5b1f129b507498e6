//! Interactive chat client.
//!
//! Usage: `relay-chat-client [url] [name]`. Lines typed on stdin are sent as
//! chat messages; `quit`, `exit` or `bye` leaves. When `CHAT_TOKEN` is set it
//! is sent as the first frame so gated rooms accept the session.

use futures_util::{SinkExt, StreamExt};
use relay_chat::models::{AuthRequest, Envelope};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

const DEFAULT_URL: &str = "ws://localhost:8765/ws/chat";

#[tokio::main(flavor = "current_thread")]
async fn main() {
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "relay_chat_client=info,warn".into()))
        .init();

    let mut args = std::env::args().skip(1);
    let url = args.next().unwrap_or_else(|| DEFAULT_URL.to_string());
    let name = args.next();
    let token = std::env::var("CHAT_TOKEN").ok().filter(|t| !t.is_empty());

    info!("Connecting to {}", url);
    let (ws_stream, _) = match connect_async(url.as_str()).await {
        Ok(conn) => conn,
        Err(e) => {
            error!("❌ Could not connect to {}: {}", url, e);
            std::process::exit(1);
        }
    };
    info!("Connected!");
    let (mut write, mut read) = ws_stream.split();

    let hello = [
        token.map(|token| AuthRequest { token: Some(token), name: None }),
        name.map(|name| AuthRequest { token: None, name: Some(name) }),
    ];
    for request in hello.into_iter().flatten() {
        match Envelope::Auth(request).encode() {
            Ok(text) => {
                if let Err(e) = write.send(Message::text(text)).await {
                    error!("Failed to send auth frame: {}", e);
                    std::process::exit(1);
                }
            }
            Err(e) => error!("Failed to encode auth frame: {}", e),
        }
    }

    let mut receive_task = tokio::spawn(async move {
        while let Some(frame) = read.next().await {
            match frame {
                Ok(Message::Text(text)) => println!("{}", render(&text)),
                Ok(Message::Close(frame)) => {
                    match frame {
                        Some(frame) => println!("[closed] {} {}", u16::from(frame.code), frame.reason),
                        None => println!("[closed]"),
                    }
                    break;
                }
                Ok(_) => {}
                Err(e) => {
                    error!("Connection lost: {}", e);
                    break;
                }
            }
        }
    });

    let mut send_task = tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if matches!(line.trim().to_lowercase().as_str(), "quit" | "exit" | "bye") {
                break;
            }
            if line.trim().is_empty() {
                continue;
            }
            if write.send(Message::text(line)).await.is_err() {
                break;
            }
        }
        let _ = write.send(Message::Close(None)).await;
    });

    // Wait for either task to finish (and finish the other)
    tokio::select! {
        _ = (&mut send_task) => receive_task.abort(),
        _ = (&mut receive_task) => send_task.abort(),
    };
    info!("Disconnected");
}

/// Format an inbound envelope for the terminal.
fn render(text: &str) -> String {
    match serde_json::from_str::<Envelope>(text) {
        Ok(Envelope::Message(msg)) => format!("{}: {}", msg.from.as_deref().unwrap_or("?"), msg.text),
        Ok(Envelope::System(notice)) => format!("[system] {}", notice.text),
        Ok(Envelope::Error(e)) => format!("[error] {}", e.error),
        Ok(Envelope::Auth(_)) | Err(_) => text.to_string(),
    }
}
