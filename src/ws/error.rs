use std::error::Error as StdError;
use std::fmt;
use std::io;

use super::registry::ConnectionId;

/// Close codes sent to sessions that fail authentication.
pub const CLOSE_AUTH_FAILED: u16 = 4001;
pub const CLOSE_AUTH_MALFORMED: u16 = 4002;
pub const CLOSE_AUTH_TIMEOUT: u16 = 4003;
/// Sent to every connection when the server stops.
pub const CLOSE_GOING_AWAY: u16 = 1001;

#[derive(Debug, Clone, PartialEq)]
pub enum SessionError {
    /// Peer went away. Expected; only triggers cleanup.
    ConnectionClosed,
    /// Frame could not be decoded. Reported back, session continues.
    Decode(String),
    /// A server envelope could not be serialized. Logged, never shown to the peer.
    Encode(String),
    /// Credentials missing or rejected. Session is closed with `code`.
    AuthFailure { code: u16, reason: String },
    /// A recipient could not be reached.
    Delivery(ConnectionId),
    /// Socket-level protocol error while reading.
    Transport(String),
}

impl SessionError {
    pub fn auth(code: u16, reason: impl Into<String>) -> Self {
        SessionError::AuthFailure { code, reason: reason.into() }
    }

    pub fn encode(e: serde_json::Error) -> Self {
        SessionError::Encode(e.to_string())
    }

    /// Whether the session survives this error
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            SessionError::Decode(_) | SessionError::Encode(_) | SessionError::Delivery(_)
        )
    }
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionError::ConnectionClosed => write!(f, "connection closed"),
            SessionError::Decode(e) => write!(f, "malformed message: {}", e),
            SessionError::Encode(e) => write!(f, "could not encode envelope: {}", e),
            SessionError::AuthFailure { code, reason } => {
                write!(f, "authentication failed ({}): {}", code, reason)
            }
            SessionError::Delivery(id) => write!(f, "could not deliver to {}", id),
            SessionError::Transport(e) => write!(f, "transport error: {}", e),
        }
    }
}

impl std::error::Error for SessionError {}

// Inbound only; outbound failures go through `SessionError::encode`.
impl From<serde_json::Error> for SessionError {
    fn from(e: serde_json::Error) -> Self {
        SessionError::Decode(e.to_string())
    }
}

impl From<axum::Error> for SessionError {
    fn from(e: axum::Error) -> Self {
        if is_disconnect(&e) {
            SessionError::ConnectionClosed
        } else {
            SessionError::Transport(e.to_string())
        }
    }
}

/// The peer vanished without a close handshake. Walks the source chain since
/// axum wraps the underlying tungstenite and io errors.
fn is_disconnect(e: &(dyn StdError + 'static)) -> bool {
    let mut current = Some(e);
    while let Some(err) = current {
        if let Some(io_err) = err.downcast_ref::<io::Error>() {
            return matches!(
                io_err.kind(),
                io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
                    | io::ErrorKind::BrokenPipe
                    | io::ErrorKind::UnexpectedEof
            );
        }
        let text = err.to_string();
        if text == "Connection reset without closing handshake"
            || text == "Connection closed normally"
            || text == "Trying to work with closed connection"
        {
            return true;
        }
        current = err.source();
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_tungstenite::tungstenite::error::{Error as WsError, ProtocolError};

    #[test]
    fn peer_resets_are_ordinary_disconnects() {
        let reset = axum::Error::new(io::Error::new(io::ErrorKind::ConnectionReset, "reset by peer"));
        assert_eq!(SessionError::from(reset), SessionError::ConnectionClosed);

        let wrapped = axum::Error::new(WsError::Io(io::Error::new(io::ErrorKind::BrokenPipe, "pipe")));
        assert_eq!(SessionError::from(wrapped), SessionError::ConnectionClosed);

        let no_handshake = axum::Error::new(WsError::Protocol(ProtocolError::ResetWithoutClosingHandshake));
        assert_eq!(SessionError::from(no_handshake), SessionError::ConnectionClosed);
    }

    #[test]
    fn protocol_violations_stay_transport_errors() {
        let bad = axum::Error::new(WsError::Protocol(ProtocolError::NonZeroReservedBits));
        assert!(matches!(SessionError::from(bad), SessionError::Transport(_)));

        let io_other = axum::Error::new(io::Error::new(io::ErrorKind::InvalidData, "garbage"));
        assert!(matches!(SessionError::from(io_other), SessionError::Transport(_)));
    }

    #[test]
    fn encode_failures_are_kept_apart_from_decode_failures() {
        let json_err = serde_json::from_str::<u8>("x").unwrap_err();
        let encode = SessionError::encode(json_err);
        assert!(matches!(encode, SessionError::Encode(_)));
        assert!(encode.is_recoverable());
        assert!(encode.to_string().starts_with("could not encode envelope"));

        let json_err = serde_json::from_str::<u8>("x").unwrap_err();
        assert!(matches!(SessionError::from(json_err), SessionError::Decode(_)));
    }
}
