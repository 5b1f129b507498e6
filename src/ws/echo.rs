use crate::config::Config;
use crate::models::Envelope;
use super::error::SessionError;
use super::registry::ConnectionRegistry;
use super::room::{reject_kind, Room, SessionCtx};

/// Anonymous clients whose messages are sent straight back to them.
pub struct EchoRoom {
    registry: ConnectionRegistry,
    server_name: String,
}

impl EchoRoom {
    pub fn new(config: &Config) -> Self {
        Self {
            registry: ConnectionRegistry::new(),
            server_name: config.server_name.clone(),
        }
    }
}

impl Room for EchoRoom {
    fn kind(&self) -> &'static str {
        "echo"
    }

    fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    fn on_join(&self, _session: &SessionCtx) -> Result<(), SessionError> {
        Ok(())
    }

    fn on_message(&self, session: &mut SessionCtx, envelope: Envelope) -> Result<(), SessionError> {
        match envelope {
            Envelope::Message(msg) => session.reply(&Envelope::message(
                self.server_name.as_str(),
                format!("Server received: {}", msg.text),
            )),
            other => reject_kind(session, &other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ws::registry::{outbound_channel, ConnectionId};
    use axum::extract::ws::Message;

    #[test]
    fn echoes_to_the_sender_only() {
        let room = EchoRoom::new(&Config::default());
        let (tx, mut rx) = outbound_channel();
        let (other_tx, mut other_rx) = outbound_channel();
        let mut ctx = SessionCtx::new(ConnectionId::new(), room.assign_name(), tx.clone());
        let _me = room.registry().add(ctx.id, None, tx).unwrap();
        let _other = room.registry().add(ConnectionId::new(), None, other_tx).unwrap();

        assert!(ctx.name.is_none());
        room.on_message(&mut ctx, Envelope::decode("ping").unwrap()).unwrap();

        match rx.try_recv().unwrap() {
            Message::Text(text) => match Envelope::decode(&text).unwrap() {
                Envelope::Message(msg) => {
                    assert_eq!(msg.text, "Server received: ping");
                    assert_eq!(msg.from.as_deref(), Some("relay-chat"));
                }
                other => panic!("unexpected {other:?}"),
            },
            other => panic!("unexpected {other:?}"),
        }
        assert!(other_rx.try_recv().is_err());
    }
}
