use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::error::HubError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallState {
    Requested,
    Accepted,
    Joined,
}

/// Transient record of one two-party call. Never persisted; rejected and
/// ended calls are simply removed from the table.
#[derive(Debug, Clone)]
pub struct CallSession {
    pub room_id: String,
    pub caller_id: String,
    pub callee_id: String,
    /// The `call_request` notification sent to the callee.
    pub notification_id: String,
    pub state: CallState,
    pub requested_at: Instant,
}

impl CallSession {
    pub fn new(room_id: &str, caller_id: &str, callee_id: &str, notification_id: &str) -> Self {
        Self {
            room_id: room_id.to_string(),
            caller_id: caller_id.to_string(),
            callee_id: callee_id.to_string(),
            notification_id: notification_id.to_string(),
            state: CallState::Requested,
            requested_at: Instant::now(),
        }
    }

    pub fn involves(&self, user_id: &str) -> bool {
        self.caller_id == user_id || self.callee_id == user_id
    }
}

/// In-flight calls keyed by room id. Pending requests expire after `request_ttl`.
pub struct CallTable {
    sessions: DashMap<String, CallSession>,
    request_ttl: Duration,
}

impl CallTable {
    pub fn new(request_ttl: Duration) -> Self {
        Self {
            sessions: DashMap::new(),
            request_ttl,
        }
    }

    pub fn request_ttl(&self) -> Duration {
        self.request_ttl
    }

    fn is_expired(&self, session: &CallSession) -> bool {
        session.state == CallState::Requested && session.requested_at.elapsed() >= self.request_ttl
    }

    /// Record a new request. A newer request for the same room replaces the old one.
    pub fn request(&self, session: CallSession) {
        debug!(room_id = %session.room_id, caller = %session.caller_id, callee = %session.callee_id, "call requested");
        self.sessions.insert(session.room_id.clone(), session);
    }

    pub fn get(&self, room_id: &str) -> Option<CallSession> {
        self.sessions.get(room_id).map(|s| s.clone())
    }

    /// requested → accepted. Only the callee may accept, and only before the
    /// request expires.
    pub fn accept(&self, room_id: &str, user_id: &str) -> Result<CallSession, HubError> {
        let Some(mut session) = self.sessions.get_mut(room_id) else {
            return Err(HubError::NotFound(format!("No pending call for room {room_id}")));
        };
        if session.state != CallState::Requested || self.is_expired(&session) {
            return Err(HubError::NotFound(format!("No pending call for room {room_id}")));
        }
        if !user_id.is_empty() && session.callee_id != user_id {
            return Err(HubError::Forbidden("Only the callee can accept this call".into()));
        }
        session.state = CallState::Accepted;
        Ok(session.clone())
    }

    /// requested → rejected. The call is dropped from the table.
    pub fn reject(&self, room_id: &str) -> Option<CallSession> {
        self.sessions
            .remove_if(room_id, |_, s| s.state == CallState::Requested)
            .map(|(_, s)| s)
    }

    /// accepted → joined. Returns false if the room has no accepted call.
    pub fn mark_joined(&self, room_id: &str) -> bool {
        match self.sessions.get_mut(room_id) {
            Some(mut s) if s.state != CallState::Requested => {
                s.state = CallState::Joined;
                true
            }
            _ => false,
        }
    }

    /// * → ended.
    pub fn end(&self, room_id: &str) -> Option<CallSession> {
        self.sessions.remove(room_id).map(|(_, s)| s)
    }

    /// End every call a user takes part in. Used when their connection drops.
    pub fn end_all_for(&self, user_id: &str) -> Vec<CallSession> {
        let rooms: Vec<String> = self
            .sessions
            .iter()
            .filter(|s| s.involves(user_id))
            .map(|s| s.key().clone())
            .collect();
        rooms.iter().filter_map(|room| self.end(room)).collect()
    }

    /// Drop pending requests older than the TTL.
    pub fn sweep_expired(&self) -> Vec<CallSession> {
        let expired: Vec<String> = self
            .sessions
            .iter()
            .filter(|s| self.is_expired(s))
            .map(|s| s.key().clone())
            .collect();
        expired
            .iter()
            .filter_map(|room| {
                self.sessions
                    .remove_if(room, |_, s| self.is_expired(s))
                    .map(|(_, s)| s)
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

/// Periodically expire stale call requests until `shutdown` fires.
pub async fn run_sweeper(calls: Arc<CallTable>, shutdown: CancellationToken) {
    let period = (calls.request_ttl() / 2).max(Duration::from_secs(1));
    let mut ticker = tokio::time::interval(period);
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {
                for expired in calls.sweep_expired() {
                    info!(room_id = %expired.room_id, caller = %expired.caller_id, "call request expired");
                }
            }
        }
    }
    debug!("call sweeper stopped");
}
