//! WebSocket relay with a shared connection registry, broadcast dispatcher
//! and session handler, hosting chat, echo and counter rooms.

pub mod config;
pub mod docs;
pub mod handlers;
pub mod models;
pub mod routes;
pub mod services;
pub mod state;
pub mod ws;

use std::future::Future;

use tokio::net::TcpListener;
use tracing::info;

pub use config::Config;
pub use state::AppState;

/// Serve the application on `listener` until `shutdown` resolves.
/// On shutdown every open WebSocket is sent a going-away close frame.
pub async fn serve<F>(listener: TcpListener, state: AppState, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let app = routes::create_router(state.clone());
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown.await;
            info!("Shutdown requested");
            state.shutdown();
        })
        .await
}
