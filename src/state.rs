use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::info;

use crate::config::Config;
use crate::ws::error::CLOSE_GOING_AWAY;
use crate::ws::{ChatRoom, CounterRoom, EchoRoom, Room};

/// Everything the server owns for its lifetime. Cloned into each handler.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub chat: Arc<ChatRoom>,
    pub echo: Arc<EchoRoom>,
    pub counter: Arc<CounterRoom>,
    pub started_at: DateTime<Utc>,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        Self {
            chat: Arc::new(ChatRoom::new(&config)),
            echo: Arc::new(EchoRoom::new(&config)),
            counter: Arc::new(CounterRoom::new()),
            config: Arc::new(config),
            started_at: Utc::now(),
        }
    }

    /// Ask every open connection in every room to close.
    pub fn shutdown(&self) -> usize {
        let rooms: [&dyn Room; 3] = [&*self.chat, &*self.echo, &*self.counter];
        let closed: usize = rooms
            .iter()
            .map(|room| room.registry().close_all(CLOSE_GOING_AWAY, "Server shutting down"))
            .sum();
        info!(closed, "Sent close frames to open connections");
        closed
    }
}
