use axum::extract::ws::Message;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, error, warn};

use crate::models::Envelope;
use super::error::SessionError;
use super::registry::{ConnectionId, ConnectionRegistry, ConnectionSender};

/// Outcome of one broadcast sweep
#[derive(Debug, Default, Clone, PartialEq)]
pub struct BroadcastReport {
    pub delivered: usize,
    pub pruned: Vec<ConnectionId>,
}

/// Deliver an envelope to every registered connection except `exclude`.
///
/// Delivery is best-effort and independent per recipient. Recipients whose
/// writer has gone away, or whose queue is full, are removed from the registry
/// after the sweep.
pub fn broadcast(
    registry: &ConnectionRegistry,
    envelope: &Envelope,
    exclude: Option<ConnectionId>,
) -> BroadcastReport {
    let text = match envelope.encode() {
        Ok(text) => text,
        Err(e) => {
            error!("Failed to encode {} envelope: {}", envelope.kind(), e);
            return BroadcastReport::default();
        }
    };
    broadcast_frame(registry, Message::Text(text), exclude)
}

pub fn broadcast_frame(
    registry: &ConnectionRegistry,
    frame: Message,
    exclude: Option<ConnectionId>,
) -> BroadcastReport {
    let mut report = BroadcastReport::default();

    for entry in registry.list() {
        if Some(entry.id) == exclude {
            continue;
        }
        if deliver(&entry.sender, entry.id, frame.clone()) {
            report.delivered += 1;
        } else {
            report.pruned.push(entry.id);
        }
    }

    if !report.pruned.is_empty() {
        let removed = registry.remove_all(&report.pruned);
        debug!(pruned = removed, "Pruned unreachable recipients");
    }
    report
}

/// Deliver an envelope to a single registered connection.
/// An unreachable connection is pruned and reported as a delivery failure.
pub fn send_to(
    registry: &ConnectionRegistry,
    id: ConnectionId,
    envelope: &Envelope,
) -> Result<(), SessionError> {
    let entry = registry.get(&id).ok_or(SessionError::Delivery(id))?;
    let text = envelope.encode().map_err(SessionError::encode)?;
    if !deliver(&entry.sender, id, Message::Text(text)) {
        registry.remove(&id);
        debug!(conn = %id, "Pruned unreachable recipient");
        return Err(SessionError::Delivery(id));
    }
    Ok(())
}

/// Queue a frame without waiting. `false` means the recipient should be pruned.
fn deliver(sender: &ConnectionSender, id: ConnectionId, frame: Message) -> bool {
    match sender.try_send(frame) {
        Ok(()) => true,
        Err(TrySendError::Full(_)) => {
            warn!(conn = %id, "Outbound queue full, dropping slow connection");
            false
        }
        Err(TrySendError::Closed(_)) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ws::registry::{outbound_channel, Registration, OUTBOUND_QUEUE_SIZE};
    use tokio::sync::mpsc;

    struct Peer {
        id: ConnectionId,
        rx: mpsc::Receiver<Message>,
        _guard: Registration,
    }

    fn join(registry: &ConnectionRegistry) -> Peer {
        let (tx, rx) = outbound_channel();
        let id = ConnectionId::new();
        let guard = registry.add(id, None, tx).unwrap();
        Peer { id, rx, _guard: guard }
    }

    fn texts(rx: &mut mpsc::Receiver<Message>) -> Vec<String> {
        let mut out = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            if let Message::Text(text) = msg {
                out.push(text);
            }
        }
        out
    }

    #[test]
    fn sender_is_excluded_and_everyone_else_receives_once() {
        let registry = ConnectionRegistry::new();
        let mut p1 = join(&registry);
        let mut p2 = join(&registry);
        let mut p3 = join(&registry);

        let report = broadcast(&registry, &Envelope::message("Client 2", "hi"), Some(p2.id));
        assert_eq!(report.delivered, 2);
        assert!(report.pruned.is_empty());

        for rx in [&mut p1.rx, &mut p3.rx] {
            let got = texts(rx);
            assert_eq!(got.len(), 1);
            assert!(got[0].contains("hi"));
        }
        assert!(texts(&mut p2.rx).is_empty());
    }

    #[test]
    fn dead_recipient_is_pruned_without_blocking_the_rest() {
        let registry = ConnectionRegistry::new();
        let p1 = join(&registry);
        let p2 = join(&registry);
        let mut p3 = join(&registry);
        let dead = p1.id;
        drop(p1.rx);

        let report = broadcast(&registry, &Envelope::message("Client 2", "hi"), Some(p2.id));
        assert_eq!(report.delivered, 1);
        assert_eq!(report.pruned, vec![dead]);
        assert_eq!(texts(&mut p3.rx).len(), 1);

        assert!(!registry.contains(&dead));
        assert!(registry.list().iter().all(|entry| entry.id != dead));
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn broadcast_without_exclusion_reaches_the_sender_too() {
        let registry = ConnectionRegistry::new();
        let mut p1 = join(&registry);
        let mut p2 = join(&registry);

        let report = broadcast(&registry, &Envelope::system("Counter: 1"), None);
        assert_eq!(report.delivered, 2);
        assert_eq!(texts(&mut p1.rx).len(), 1);
        assert_eq!(texts(&mut p2.rx).len(), 1);
    }

    #[test]
    fn per_sender_order_is_preserved() {
        let registry = ConnectionRegistry::new();
        let sender = join(&registry);
        let mut receiver = join(&registry);

        for i in 0..5 {
            broadcast(&registry, &Envelope::message("a", format!("msg {i}")), Some(sender.id));
        }
        let got = texts(&mut receiver.rx);
        assert_eq!(got.len(), 5);
        for (i, text) in got.iter().enumerate() {
            assert!(text.contains(&format!("msg {i}")));
        }
    }

    #[test]
    fn send_to_targets_one_connection_and_prunes_on_failure() {
        let registry = ConnectionRegistry::new();
        let mut p1 = join(&registry);
        let p2 = join(&registry);

        assert!(send_to(&registry, p1.id, &Envelope::system("welcome")).is_ok());
        assert_eq!(texts(&mut p1.rx).len(), 1);

        let gone = p2.id;
        drop(p2.rx);
        assert_eq!(
            send_to(&registry, gone, &Envelope::system("welcome")),
            Err(SessionError::Delivery(gone))
        );
        assert!(!registry.contains(&gone));

        let stranger = ConnectionId::new();
        assert_eq!(
            send_to(&registry, stranger, &Envelope::system("nobody")),
            Err(SessionError::Delivery(stranger))
        );
    }

    #[tokio::test]
    async fn slow_recipient_with_a_full_queue_is_pruned_and_signalled() {
        let registry = ConnectionRegistry::new();
        let mut live = join(&registry);
        let slow = join(&registry);
        for i in 0..OUTBOUND_QUEUE_SIZE {
            broadcast(&registry, &Envelope::system(format!("tick {i}")), Some(live.id));
        }
        assert!(registry.contains(&slow.id));

        let report = broadcast(&registry, &Envelope::system("one too many"), None);
        assert_eq!(report.delivered, 1);
        assert_eq!(report.pruned, vec![slow.id]);
        assert!(!registry.contains(&slow.id));
        let got = texts(&mut live.rx);
        assert_eq!(got.len(), 1);
        assert!(got[0].contains("one too many"));

        tokio::time::timeout(std::time::Duration::from_secs(1), slow._guard.evicted())
            .await
            .expect("slow session was not signalled");
    }
}
