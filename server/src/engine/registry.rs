use std::collections::HashSet;
use std::sync::Arc;

use dashmap::DashMap;
use tracing::{debug, info, warn};

use super::channel::{ChannelId, ChannelState};
use super::events::{ServerEvent, SessionId};
use super::user_session::UserSession;
use crate::error::HubError;

/// Live connections and their user/channel associations.
///
/// Soft state: nothing here is persisted and disconnect is the only cleanup
/// path. A userId maps to at most one connection (the most recent `join_user`
/// wins); older tabs of the same user keep their channel memberships but are
/// no longer directly addressable.
#[derive(Default)]
pub struct Registry {
    sessions: DashMap<SessionId, Arc<UserSession>>,
    /// Reverse index used to clean up on disconnect.
    joined: DashMap<SessionId, HashSet<ChannelId>>,
    channels: DashMap<ChannelId, ChannelState>,
    session_user: DashMap<SessionId, String>,
    user_session: DashMap<String, SessionId>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    // ── Connections ─────────────────────────────────────────────────

    /// Track a new connection with an empty channel set. Registering the same
    /// session id again keeps the first registration.
    pub fn register(&self, session: Arc<UserSession>) {
        let id = session.id;
        self.sessions.entry(id).or_insert(session);
        self.joined.entry(id).or_default();
        debug!(session_id = %id, "connection registered");
    }

    /// Associate a connection with a user and join `user:{userId}`.
    /// Rebinding a connection to a different user releases the previous one.
    pub fn bind_user(&self, session_id: SessionId, user_id: &str) -> Result<(), HubError> {
        if user_id.is_empty() {
            return Err(HubError::missing("userId"));
        }
        if !self.sessions.contains_key(&session_id) {
            return Err(HubError::NotFound("Unknown connection".into()));
        }

        let previous = self.session_user.insert(session_id, user_id.to_string());
        if let Some(old) = previous
            && old != user_id
        {
            self.user_session.remove_if(&old, |_, sid| *sid == session_id);
            self.leave_channel(session_id, &ChannelId::User(old));
        }

        if let Some(replaced) = self.user_session.insert(user_id.to_string(), session_id)
            && replaced != session_id
        {
            info!(%user_id, old_session = %replaced, new_session = %session_id, "user rebound to newer connection");
        }

        self.join_channel(session_id, &ChannelId::User(user_id.to_string()))
    }

    /// The connection currently addressed for `user_id`. Absence means "offline".
    pub fn lookup(&self, user_id: &str) -> Option<Arc<UserSession>> {
        let session_id = *self.user_session.get(user_id)?;
        self.sessions.get(&session_id).map(|s| s.clone())
    }

    pub fn user_of(&self, session_id: SessionId) -> Option<String> {
        self.session_user.get(&session_id).map(|u| u.clone())
    }

    pub fn session(&self, session_id: SessionId) -> Option<Arc<UserSession>> {
        self.sessions.get(&session_id).map(|s| s.clone())
    }

    pub fn connection_count(&self) -> usize {
        self.sessions.len()
    }

    /// Remove every trace of a connection. Returns the user it was bound to.
    /// Safe to call any number of times.
    pub fn on_disconnect(&self, session_id: SessionId) -> Option<String> {
        let user_id = self.session_user.remove(&session_id).map(|(_, u)| u);
        if let Some(user) = &user_id {
            self.user_session.remove_if(user, |_, sid| *sid == session_id);
        }

        if let Some((_, joined)) = self.joined.remove(&session_id) {
            for channel in &joined {
                self.remove_member(channel, session_id);
            }
        }

        if self.sessions.remove(&session_id).is_some() {
            info!(%session_id, user_id = ?user_id, "connection removed");
        }
        user_id
    }

    // ── Channels ────────────────────────────────────────────────────

    /// Join a channel. Joining a channel twice is the same as joining it once.
    pub fn join_channel(&self, session_id: SessionId, channel: &ChannelId) -> Result<(), HubError> {
        channel.require_complete()?;

        let Some(mut joined) = self.joined.get_mut(&session_id) else {
            return Err(HubError::NotFound("Unknown connection".into()));
        };
        joined.insert(channel.clone());
        drop(joined);

        self.channels
            .entry(channel.clone())
            .or_default()
            .members
            .insert(session_id);

        debug!(%session_id, %channel, "joined channel");
        Ok(())
    }

    /// Leave a channel. Not being a member is not an error.
    pub fn leave_channel(&self, session_id: SessionId, channel: &ChannelId) {
        if let Some(mut joined) = self.joined.get_mut(&session_id) {
            joined.remove(channel);
        }
        self.remove_member(channel, session_id);
    }

    pub fn is_member(&self, session_id: SessionId, channel: &ChannelId) -> bool {
        self.channels
            .get(channel)
            .is_some_and(|c| c.members.contains(&session_id))
    }

    pub fn members(&self, channel: &ChannelId) -> Vec<SessionId> {
        self.channels
            .get(channel)
            .map(|c| c.members.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn channels_of(&self, session_id: SessionId) -> Vec<ChannelId> {
        self.joined
            .get(&session_id)
            .map(|j| j.iter().cloned().collect())
            .unwrap_or_default()
    }

    fn remove_member(&self, channel: &ChannelId, session_id: SessionId) {
        if let Some(mut state) = self.channels.get_mut(channel) {
            state.members.remove(&session_id);
        }
        self.channels.remove_if(channel, |_, state| state.members.is_empty());
    }

    // ── Delivery ────────────────────────────────────────────────────

    /// Send an event to every member of a channel, optionally excluding one
    /// session. Returns how many sessions accepted it.
    pub fn broadcast(
        &self,
        channel: &ChannelId,
        event: &ServerEvent,
        exclude: Option<SessionId>,
    ) -> usize {
        let mut delivered = 0;
        for member_id in self.members(channel) {
            if Some(member_id) == exclude {
                continue;
            }
            if self.send_to_session(member_id, event.clone()) {
                delivered += 1;
            }
        }
        delivered
    }

    /// Deliver to one connection. False if it is gone or its queue is full.
    pub fn send_to_session(&self, session_id: SessionId, event: ServerEvent) -> bool {
        let Some(session) = self.session(session_id) else {
            return false;
        };
        if session.send(event) {
            true
        } else {
            warn!(%session_id, "failed to send event to session (queue full or closed)");
            false
        }
    }

    /// Deliver to the user's addressed connection, if they are online.
    pub fn send_to_user(&self, user_id: &str, event: ServerEvent) -> bool {
        match self.user_session.get(user_id).map(|s| *s) {
            Some(session_id) => self.send_to_session(session_id, event),
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::events::RoomEvent;
    use crate::engine::user_session::MAX_OUTBOUND_QUEUE;
    use tokio::sync::mpsc;
    use uuid::Uuid;

    fn connect(registry: &Registry) -> (SessionId, mpsc::Receiver<ServerEvent>) {
        let (tx, rx) = mpsc::channel(MAX_OUTBOUND_QUEUE);
        let id = Uuid::new_v4();
        registry.register(Arc::new(UserSession::new(id, tx)));
        (id, rx)
    }

    fn ping(room: &str) -> ServerEvent {
        ServerEvent::CallEnded(RoomEvent {
            room_id: room.into(),
        })
    }

    #[test]
    fn test_join_channel_is_idempotent() {
        let registry = Registry::new();
        let (sid, _rx) = connect(&registry);
        let channel = ChannelId::Community("g1".into());

        registry.join_channel(sid, &channel).unwrap();
        let once = registry.members(&channel);
        let once_joined = registry.channels_of(sid);
        registry.join_channel(sid, &channel).unwrap();

        assert_eq!(registry.members(&channel), once);
        assert_eq!(registry.channels_of(sid), once_joined);
        assert_eq!(once.len(), 1);
    }

    #[test]
    fn test_disconnect_cleans_up_everything() {
        let registry = Registry::new();
        let (sid, _rx) = connect(&registry);
        let channels = [
            ChannelId::Community("g1".into()),
            ChannelId::private("c1", "s1", "t1"),
            ChannelId::Room("r1".into()),
        ];
        registry.bind_user(sid, "u1").unwrap();
        for c in &channels {
            registry.join_channel(sid, c).unwrap();
        }

        assert_eq!(registry.on_disconnect(sid).as_deref(), Some("u1"));

        assert!(registry.lookup("u1").is_none());
        for c in &channels {
            assert!(!registry.is_member(sid, c));
        }
        assert!(!registry.is_member(sid, &ChannelId::User("u1".into())));
        assert_eq!(registry.connection_count(), 0);

        // Second disconnect is a no-op.
        assert!(registry.on_disconnect(sid).is_none());
    }

    #[test]
    fn test_join_requires_non_empty_ids() {
        let registry = Registry::new();
        let (sid, _rx) = connect(&registry);
        let err = registry
            .join_channel(sid, &ChannelId::Community(String::new()))
            .unwrap_err();
        assert_eq!(err.code(), "invalid_payload");
        assert!(registry.bind_user(sid, "").is_err());
    }

    #[test]
    fn test_leave_channel_not_member_is_ok() {
        let registry = Registry::new();
        let (sid, _rx) = connect(&registry);
        let channel = ChannelId::Room("r1".into());
        registry.leave_channel(sid, &channel);
        registry.join_channel(sid, &channel).unwrap();
        registry.leave_channel(sid, &channel);
        registry.leave_channel(sid, &channel);
        assert!(registry.members(&channel).is_empty());
    }

    #[test]
    fn test_last_writer_wins_binding() {
        let registry = Registry::new();
        let (first, _rx1) = connect(&registry);
        let (second, _rx2) = connect(&registry);

        registry.bind_user(first, "u1").unwrap();
        registry.bind_user(second, "u1").unwrap();
        assert_eq!(registry.lookup("u1").unwrap().id, second);

        // The older tab going away must not unbind the newer one.
        registry.on_disconnect(first);
        assert_eq!(registry.lookup("u1").unwrap().id, second);
    }

    #[test]
    fn test_rebinding_releases_previous_user() {
        let registry = Registry::new();
        let (sid, _rx) = connect(&registry);
        registry.bind_user(sid, "u1").unwrap();
        registry.bind_user(sid, "u2").unwrap();

        assert!(registry.lookup("u1").is_none());
        assert!(!registry.is_member(sid, &ChannelId::User("u1".into())));
        assert!(registry.is_member(sid, &ChannelId::User("u2".into())));
    }

    #[test]
    fn test_broadcast_excludes_sender() {
        let registry = Registry::new();
        let (a, mut rx_a) = connect(&registry);
        let (b, mut rx_b) = connect(&registry);
        let channel = ChannelId::Room("r1".into());
        registry.join_channel(a, &channel).unwrap();
        registry.join_channel(b, &channel).unwrap();

        assert_eq!(registry.broadcast(&channel, &ping("r1"), Some(a)), 1);
        assert!(rx_a.try_recv().is_err());
        assert!(matches!(rx_b.try_recv(), Ok(ServerEvent::CallEnded(_))));
    }

    #[test]
    fn test_send_to_offline_user_fails_soft() {
        let registry = Registry::new();
        assert!(!registry.send_to_user("nobody", ping("r1")));
    }
}
