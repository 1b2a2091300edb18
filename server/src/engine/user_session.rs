use tokio::sync::mpsc;

use super::events::{ServerEvent, SessionId};

/// Maximum queued outbound events per session (prevents memory exhaustion from slow clients).
pub const MAX_OUTBOUND_QUEUE: usize = 1024;

/// One live browser connection. The hub only ever talks to it through the
/// bounded outbound queue drained by the connection's write loop.
#[derive(Debug)]
pub struct UserSession {
    pub id: SessionId,
    /// Send outbound events to this session's write loop.
    pub outbound: mpsc::Sender<ServerEvent>,
}

impl UserSession {
    pub fn new(id: SessionId, outbound: mpsc::Sender<ServerEvent>) -> Self {
        Self { id, outbound }
    }

    /// Send an event to this session. Returns false if the connection is gone
    /// or its queue is full (the event is dropped rather than blocking the hub).
    pub fn send(&self, event: ServerEvent) -> bool {
        self.outbound.try_send(event).is_ok()
    }
}
