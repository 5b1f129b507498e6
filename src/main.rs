use relay_chat::{AppState, Config};
use tracing::{info, error, warn};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};
use std::panic;

#[tokio::main(flavor = "current_thread")]
async fn main() {

    // Set panic hook for better error messages
    panic::set_hook(Box::new(|info| {
        eprintln!("PANIC: {info}");
    }));

    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            // Default to info level, but allow debug for our app
            "relay_chat=debug,tower_http=debug,axum::rejection=trace,info".into()
        }))
        .init();

    info!("Starting server...");

    // Load configuration
    let config = Config::load().unwrap_or_else(|e| {
        error!("Failed to load configuration: {}", e);
        warn!("Using default configuration");
        Config::default()
    });

    if config.is_development() {
        info!("🛠️ Running in development mode ({})", config.environment);
    }

    if config.auth_required() {
        info!("🔒 Chat sessions require a token");
    } else if config.is_production() {
        warn!("No auth secret configured in production - chat sessions are open");
    } else {
        info!("No auth secret configured - chat sessions are open");
    }

    let address = config.server_address();
    let state = AppState::new(config);

    let listener = match tokio::net::TcpListener::bind(&address).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Failed to bind to {}: {}", address, e);
            std::process::exit(1);
        }
    };

    info!("🚀 Server running on http://{}", address);
    info!("📡 WebSocket rooms at ws://{}/ws/chat, /ws/echo, /ws/counter", address);
    info!("📚 Swagger UI available at http://{}/swagger", address);

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for shutdown signal: {}", e);
            std::future::pending::<()>().await;
        }
    };

    if let Err(e) = relay_chat::serve(listener, state, shutdown).await {
        error!("Server error: {}", e);
        std::process::exit(1);
    }
    info!("Server stopped");
}
