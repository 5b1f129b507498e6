use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tracing::info;

use crate::config::Config;
use crate::models::{AuthRequest, Envelope};
use super::dispatcher;
use super::error::SessionError;
use super::registry::ConnectionRegistry;
use super::room::{reject_kind, Room, SessionCtx};

/// Named clients relaying messages to everyone else in the room.
pub struct ChatRoom {
    registry: ConnectionRegistry,
    auth_secret: Option<String>,
    auth_timeout: Duration,
    announce_presence: bool,
    max_name_len: usize,
    joins: AtomicU64,
}

impl ChatRoom {
    pub fn new(config: &Config) -> Self {
        Self {
            registry: ConnectionRegistry::new(),
            auth_secret: config.auth_required().then(|| config.auth_jwt_secret.clone()).flatten(),
            auth_timeout: config.auth_timeout(),
            announce_presence: config.announce_presence,
            max_name_len: config.max_name_len,
            joins: AtomicU64::new(0),
        }
    }

    fn rename(&self, session: &mut SessionCtx, request: AuthRequest) -> Result<(), SessionError> {
        if self.auth_secret.is_some() {
            return session.reply(&Envelope::error("Already authenticated"));
        }
        let requested = request.name.as_deref().map(str::trim).unwrap_or_default();
        if requested.is_empty() || requested.chars().count() > self.max_name_len {
            return session.reply(&Envelope::error(format!(
                "Name must be between 1 and {} characters",
                self.max_name_len
            )));
        }

        let old = session.display_name().to_string();
        session.name = Some(requested.to_string());
        self.registry.rename(&session.id, session.name.clone());
        info!(conn = %session.id, from = %old, to = %requested, "Client renamed");

        dispatcher::broadcast(
            &self.registry,
            &Envelope::system(format!("{} is now known as {}", old, requested)),
            None,
        );
        Ok(())
    }
}

impl Room for ChatRoom {
    fn kind(&self) -> &'static str {
        "chat"
    }

    fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    fn auth_secret(&self) -> Option<&str> {
        self.auth_secret.as_deref()
    }

    fn auth_timeout(&self) -> Duration {
        self.auth_timeout
    }

    fn assign_name(&self) -> Option<String> {
        let n = self.joins.fetch_add(1, Ordering::Relaxed) + 1;
        Some(format!("Client {}", n))
    }

    fn on_join(&self, session: &SessionCtx) -> Result<(), SessionError> {
        let welcome = Envelope::system(format!("Welcome! You are {}", session.display_name()));
        dispatcher::send_to(&self.registry, session.id, &welcome)?;
        if self.announce_presence {
            dispatcher::broadcast(
                &self.registry,
                &Envelope::system(format!(
                    "{} joined. Total clients: {}",
                    session.display_name(),
                    self.registry.len()
                )),
                Some(session.id),
            );
        }
        Ok(())
    }

    fn on_message(&self, session: &mut SessionCtx, envelope: Envelope) -> Result<(), SessionError> {
        match envelope {
            Envelope::Message(msg) => {
                if msg.text.trim().is_empty() {
                    return Ok(());
                }
                let report = dispatcher::broadcast(
                    &self.registry,
                    &Envelope::message(session.display_name(), msg.text),
                    Some(session.id),
                );
                if !report.pruned.is_empty() {
                    info!(conn = %session.id, pruned = report.pruned.len(), "Dropped disconnected clients during broadcast");
                }
                Ok(())
            }
            Envelope::Auth(request) => self.rename(session, request),
            other @ (Envelope::System(_) | Envelope::Error(_)) => reject_kind(session, &other),
        }
    }

    fn on_leave(&self, session: &SessionCtx) {
        if self.announce_presence {
            dispatcher::broadcast(
                &self.registry,
                &Envelope::system(format!(
                    "{} left. Total clients: {}",
                    session.display_name(),
                    self.registry.len()
                )),
                None,
            );
        }
    }
}
