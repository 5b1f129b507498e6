use std::time::Duration;

use axum::extract::ws::Message;
use tokio::sync::mpsc::error::TrySendError;
use tracing::warn;

use crate::models::Envelope;
use super::error::SessionError;
use super::registry::{ConnectionId, ConnectionRegistry, ConnectionSender};

/// What one active session knows about itself.
pub struct SessionCtx {
    pub id: ConnectionId,
    pub name: Option<String>,
    pub tx: ConnectionSender,
}

impl SessionCtx {
    pub fn new(id: ConnectionId, name: Option<String>, tx: ConnectionSender) -> Self {
        Self { id, name, tx }
    }

    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or("anonymous")
    }

    /// Send an envelope to this session only.
    ///
    /// A full queue drops the reply; a closed one means the writer is gone.
    pub fn reply(&self, envelope: &Envelope) -> Result<(), SessionError> {
        let text = envelope.encode().map_err(SessionError::encode)?;
        match self.tx.try_send(Message::Text(text)) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                warn!(conn = %self.id, "Outbound queue full, reply dropped");
                Err(SessionError::Delivery(self.id))
            }
            Err(TrySendError::Closed(_)) => Err(SessionError::ConnectionClosed),
        }
    }
}

/// Behaviour plugged into the shared session handler.
///
/// Hooks run between socket reads and never await; anything they send goes
/// through the registry's per-connection channels.
pub trait Room: Send + Sync + 'static {
    fn kind(&self) -> &'static str;

    fn registry(&self) -> &ConnectionRegistry;

    /// Token secret for gated rooms
    fn auth_secret(&self) -> Option<&str> {
        None
    }

    fn auth_timeout(&self) -> Duration {
        Duration::from_secs(10)
    }

    /// Name for a session that did not authenticate
    fn assign_name(&self) -> Option<String> {
        None
    }

    fn on_join(&self, session: &SessionCtx) -> Result<(), SessionError>;

    fn on_message(&self, session: &mut SessionCtx, envelope: Envelope) -> Result<(), SessionError>;

    /// Runs after the session has been deregistered.
    fn on_leave(&self, _session: &SessionCtx) {}
}

/// Reply used by rooms for envelope kinds clients may not send.
pub(crate) fn reject_kind(session: &SessionCtx, envelope: &Envelope) -> Result<(), SessionError> {
    session.reply(&Envelope::error(format!(
        "Clients may not send '{}' envelopes here",
        envelope.kind()
    )))
}
