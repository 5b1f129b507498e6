use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{timeout, timeout_at, Instant};
use tracing::{debug, error, info, warn};

use crate::models::{AuthRequest, Envelope};
use crate::services::auth_service;
use super::error::{SessionError, CLOSE_AUTH_FAILED, CLOSE_AUTH_MALFORMED, CLOSE_AUTH_TIMEOUT};
use super::registry::{outbound_channel, ConnectionId};
use super::room::{Room, SessionCtx};

/// How long a finished session waits for its writer to flush.
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connected,
    Authenticating,
    Authenticated,
    Active,
    Closed,
}

impl SessionState {
    pub fn can_advance_to(self, next: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            (Connected, Authenticating)
                | (Connected, Active)
                | (Authenticating, Authenticated)
                | (Authenticated, Active)
                | (Connected | Authenticating | Authenticated | Active, Closed)
        )
    }
}

struct Session {
    id: ConnectionId,
    room: &'static str,
    state: SessionState,
}

impl Session {
    fn new(id: ConnectionId, room: &'static str) -> Self {
        Self { id, room, state: SessionState::Connected }
    }

    fn advance(&mut self, next: SessionState) {
        if self.state.can_advance_to(next) {
            debug!(conn = %self.id, room = self.room, from = ?self.state, to = ?next, "Session state change");
            self.state = next;
        } else {
            warn!(conn = %self.id, room = self.room, from = ?self.state, to = ?next, "Ignoring invalid session transition");
        }
    }
}

/// Drive one upgraded connection from accept to close.
///
/// `token` is a credential that came with the upgrade request, if any.
pub async fn run_session<R: Room>(socket: WebSocket, room: Arc<R>, token: Option<String>) {
    let id = ConnectionId::new();
    let mut session = Session::new(id, room.kind());
    info!(conn = %id, room = room.kind(), "WebSocket connection established");

    let (sink, mut stream) = socket.split();
    let (tx, rx) = outbound_channel();
    let mut writer = tokio::spawn(writer_task(sink, rx));

    let name = match authenticate(&*room, &mut session, &mut stream, token).await {
        Ok(name) => name,
        Err(SessionError::AuthFailure { code, reason }) => {
            warn!(conn = %id, room = room.kind(), close_code = code, reason = %reason, "WebSocket auth failed");
            let _ = tx.try_send(Message::Close(Some(CloseFrame {
                code,
                reason: reason.into(),
            })));
            session.advance(SessionState::Closed);
            drop(tx);
            finish_writer(writer).await;
            return;
        }
        Err(e) => {
            info!(conn = %id, room = room.kind(), "Connection ended before authentication: {}", e);
            session.advance(SessionState::Closed);
            drop(tx);
            finish_writer(writer).await;
            return;
        }
    };

    let mut ctx = SessionCtx::new(id, name, tx.clone());
    let registration = match room.registry().add(id, ctx.name.clone(), tx.clone()) {
        Ok(registration) => registration,
        Err(e) => {
            error!(conn = %id, room = room.kind(), "Failed to register connection: {}", e);
            drop(ctx);
            drop(tx);
            finish_writer(writer).await;
            return;
        }
    };
    session.advance(SessionState::Active);
    info!(
        conn = %id,
        room = room.kind(),
        name = ctx.display_name(),
        total = room.registry().len(),
        "Session active"
    );

    // The writer ends on its own after sending a close frame or failing a
    // write; either way the peer is done and the reader must stop too.
    let mut writer_done = false;
    let exit = match room.on_join(&ctx) {
        Ok(()) => tokio::select! {
            exit = receive_loop(&*room, &mut ctx, &mut stream) => exit,
            _ = &mut writer => {
                writer_done = true;
                debug!(conn = %id, room = room.kind(), "Writer finished, ending session");
                SessionError::ConnectionClosed
            }
            _ = registration.evicted() => SessionError::Delivery(id),
        },
        Err(e) => e,
    };

    session.advance(SessionState::Closed);
    drop(registration);
    room.on_leave(&ctx);

    match exit {
        SessionError::ConnectionClosed => {
            info!(conn = %id, room = room.kind(), name = ctx.display_name(), "WebSocket connection terminated")
        }
        e => warn!(conn = %id, room = room.kind(), name = ctx.display_name(), "Session ended with error: {}", e),
    }

    drop(ctx);
    drop(tx);
    if !writer_done {
        finish_writer(writer).await;
    }
}

/// Resolve the session's display name, authenticating first when the room is gated.
async fn authenticate<R: Room>(
    room: &R,
    session: &mut Session,
    stream: &mut SplitStream<WebSocket>,
    token: Option<String>,
) -> Result<Option<String>, SessionError> {
    let Some(secret) = room.auth_secret() else {
        return Ok(room.assign_name());
    };
    session.advance(SessionState::Authenticating);

    let token = match token {
        Some(token) => token,
        None => first_frame_token(stream, room.auth_timeout()).await?,
    };

    let identity = auth_service::authenticate(&token, secret)
        .map_err(|e| SessionError::auth(CLOSE_AUTH_FAILED, format!("Authentication failed: {}", e)))?;
    session.advance(SessionState::Authenticated);
    Ok(Some(identity.display_name))
}

/// Wait for the first data frame and pull a token out of it.
async fn first_frame_token(
    stream: &mut SplitStream<WebSocket>,
    wait: Duration,
) -> Result<String, SessionError> {
    let deadline = Instant::now() + wait;
    loop {
        let frame = match timeout_at(deadline, stream.next()).await {
            Err(_) => return Err(SessionError::auth(CLOSE_AUTH_TIMEOUT, "Authentication timeout")),
            Ok(None) => return Err(SessionError::ConnectionClosed),
            Ok(Some(Err(e))) => return Err(e.into()),
            Ok(Some(Ok(frame))) => frame,
        };
        match decode_frame(frame) {
            Ok(None) => continue,
            Ok(Some(Envelope::Auth(AuthRequest { token: Some(token), .. }))) => return Ok(token),
            Ok(Some(_)) | Err(SessionError::Decode(_)) => {
                return Err(SessionError::auth(CLOSE_AUTH_MALFORMED, "Expected an auth message"));
            }
            Err(e) => return Err(e),
        }
    }
}

/// Feed inbound frames to the room until the session has to end.
/// Returns the reason it ended.
async fn receive_loop<R: Room>(
    room: &R,
    ctx: &mut SessionCtx,
    stream: &mut SplitStream<WebSocket>,
) -> SessionError {
    loop {
        let frame = match stream.next().await {
            Some(Ok(frame)) => frame,
            Some(Err(e)) => return e.into(),
            None => return SessionError::ConnectionClosed,
        };

        let result = match decode_frame(frame) {
            Ok(Some(envelope)) => {
                debug!(conn = %ctx.id, kind = envelope.kind(), "Received envelope");
                room.on_message(ctx, envelope)
            }
            Ok(None) => Ok(()),
            Err(e) => Err(e),
        };

        match result {
            Ok(()) => {}
            Err(SessionError::Decode(e)) => {
                debug!(conn = %ctx.id, "Malformed message: {}", e);
                if let Err(e) = ctx.reply(&Envelope::error(format!("Malformed message: {}", e))) {
                    return e;
                }
            }
            Err(SessionError::Encode(e)) => error!(conn = %ctx.id, "Failed to encode reply: {}", e),
            Err(e) if e.is_recoverable() => debug!(conn = %ctx.id, "{}", e),
            Err(e) => return e,
        }
    }
}

/// Turn a WebSocket frame into an envelope. Control frames yield `None`.
pub fn decode_frame(frame: Message) -> Result<Option<Envelope>, SessionError> {
    match frame {
        Message::Text(text) => Ok(Some(Envelope::decode(&text)?)),
        Message::Binary(data) => {
            let text = String::from_utf8(data)
                .map_err(|_| SessionError::Decode("binary frame is not valid UTF-8".to_string()))?;
            Ok(Some(Envelope::decode(&text)?))
        }
        Message::Ping(_) | Message::Pong(_) => Ok(None),
        Message::Close(_) => Err(SessionError::ConnectionClosed),
    }
}

/// Owns the socket's write half and forwards queued frames in order.
/// Exits after a close frame, on a write error, or once every sender is gone.
async fn writer_task(
    mut sink: SplitSink<WebSocket, Message>,
    mut rx: mpsc::Receiver<Message>,
) {
    while let Some(msg) = rx.recv().await {
        let closing = matches!(msg, Message::Close(_));
        if let Err(e) = sink.send(msg).await {
            debug!("WebSocket write failed: {}", e);
            return;
        }
        if closing {
            return;
        }
    }
    let _ = sink.close().await;
}

async fn finish_writer(mut writer: JoinHandle<()>) {
    if timeout(WRITER_DRAIN_TIMEOUT, &mut writer).await.is_err() {
        writer.abort();
    }
}
