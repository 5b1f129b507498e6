use std::sync::atomic::{AtomicI64, Ordering};

use tracing::info;

use crate::models::Envelope;
use super::dispatcher;
use super::error::SessionError;
use super::registry::ConnectionRegistry;
use super::room::{reject_kind, Room, SessionCtx};

/// A shared counter; every change is broadcast to all clients, sender included.
#[derive(Default)]
pub struct CounterRoom {
    registry: ConnectionRegistry,
    value: AtomicI64,
}

impl CounterRoom {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn value(&self) -> i64 {
        self.value.load(Ordering::SeqCst)
    }
}

impl Room for CounterRoom {
    fn kind(&self) -> &'static str {
        "counter"
    }

    fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    fn on_join(&self, session: &SessionCtx) -> Result<(), SessionError> {
        session.reply(&Envelope::system(format!("Current counter: {}", self.value())))
    }

    fn on_message(&self, session: &mut SessionCtx, envelope: Envelope) -> Result<(), SessionError> {
        let msg = match envelope {
            Envelope::Message(msg) => msg,
            other => return reject_kind(session, &other),
        };
        let notice = match msg.text.trim().to_lowercase().as_str() {
            "increment" => {
                let value = self.value.fetch_add(1, Ordering::SeqCst) + 1;
                info!(conn = %session.id, value, "Counter incremented");
                format!("Counter: {}", value)
            }
            "reset" => {
                self.value.store(0, Ordering::SeqCst);
                info!(conn = %session.id, "Counter reset");
                "Counter reset to 0".to_string()
            }
            other => {
                return session.reply(&Envelope::error(format!(
                    "Unknown command '{}'; use 'increment' or 'reset'",
                    other
                )));
            }
        };
        dispatcher::broadcast(&self.registry, &Envelope::system(notice), None);
        Ok(())
    }
}
