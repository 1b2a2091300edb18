use std::future::Future;
use std::sync::Arc;

use sqlx::SqlitePool;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::calls::{CallSession, CallTable};
use super::channel::ChannelId;
use super::events::{ClientEvent, MessageRecord, RoomEvent, ServerEvent, SessionId};
use super::registry::Registry;
use super::user_session::{MAX_OUTBOUND_QUEUE, UserSession};
use super::validation::{self, HISTORY_LIMIT};
use crate::config::ServerConfig;
use crate::db::queries::messages;
use crate::error::HubError;

/// The connection hub. One instance per process, shared by every connection
/// handler and the REST surface behind an `Arc`.
pub struct Hub {
    pub registry: Registry,
    pub calls: Arc<CallTable>,
    db: SqlitePool,
    config: ServerConfig,
}

impl Hub {
    pub fn new(db: SqlitePool, config: ServerConfig) -> Self {
        Self {
            registry: Registry::new(),
            calls: Arc::new(CallTable::new(config.call_request_ttl())),
            db,
            config,
        }
    }

    pub fn db(&self) -> &SqlitePool {
        &self.db
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Run one persistence call under the configured timeout. Failures and
    /// timeouts both surface as `Unavailable`.
    pub(crate) async fn persist<T, F>(&self, op: &'static str, fut: F) -> Result<T, HubError>
    where
        F: Future<Output = Result<T, sqlx::Error>>,
    {
        match tokio::time::timeout(self.config.query_timeout(), fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => {
                error!(op, error = %e, "persistence call failed");
                Err(e.into())
            }
            Err(_) => {
                warn!(op, "persistence call timed out");
                Err(HubError::Unavailable(format!("{op} timed out")))
            }
        }
    }

    // ── Connections ─────────────────────────────────────────────────

    /// Register a new connection. Returns its id and the receiver its write loop drains.
    pub fn connect(&self) -> (SessionId, mpsc::Receiver<ServerEvent>) {
        let session_id = Uuid::new_v4();
        let (tx, rx) = mpsc::channel(MAX_OUTBOUND_QUEUE);
        self.registry
            .register(Arc::new(UserSession::new(session_id, tx)));
        info!(%session_id, "session connected");
        (session_id, rx)
    }

    /// Tear down a connection and end any call its user was part of.
    pub fn disconnect(&self, session_id: SessionId) {
        let Some(user_id) = self.registry.on_disconnect(session_id) else {
            return;
        };
        // Another tab may still be addressed for this user; their calls stay up.
        if self.registry.lookup(&user_id).is_some() {
            return;
        }
        for call in self.calls.end_all_for(&user_id) {
            info!(room_id = %call.room_id, %user_id, "call ended by disconnect");
            self.announce_call_ended(&call.room_id, Some(&call));
        }
    }

    /// Tell the call room, and any participant not yet in it, that a call is over.
    pub(crate) fn announce_call_ended(&self, room_id: &str, call: Option<&CallSession>) {
        let room = ChannelId::Room(room_id.to_string());
        let event = ServerEvent::CallEnded(RoomEvent {
            room_id: room_id.to_string(),
        });
        self.registry.broadcast(&room, &event, None);

        let Some(call) = call else {
            return;
        };
        for user_id in [&call.caller_id, &call.callee_id] {
            if let Some(session) = self.registry.lookup(user_id)
                && !self.registry.is_member(session.id, &room)
            {
                self.registry.send_to_session(session.id, event.clone());
            }
        }
    }

    // ── Event dispatch ──────────────────────────────────────────────

    /// Handle one inbound event. Failures go back to the emitting connection
    /// only, as an `error` event.
    pub async fn handle_event(&self, session_id: SessionId, event: ClientEvent) {
        let name = event.name();
        debug!(%session_id, event = name, "handling event");
        if let Err(e) = self.dispatch(session_id, event).await {
            self.send_error(session_id, name, &e);
        }
    }

    pub fn send_error(&self, session_id: SessionId, event: &str, err: &HubError) {
        match err {
            HubError::Unavailable(detail) => {
                error!(%session_id, event, %detail, "event failed on a downstream dependency")
            }
            other => debug!(%session_id, event, error = %other, "event rejected"),
        }
        self.registry
            .send_to_session(session_id, ServerEvent::error(err));
    }

    async fn dispatch(&self, session_id: SessionId, event: ClientEvent) -> Result<(), HubError> {
        match event {
            ClientEvent::JoinUser(p) => self.join_user(session_id, &p.user_id).await,
            ClientEvent::JoinRoom(p) => {
                let room_id = validation::require("roomId", &p.room_id)?;
                self.registry
                    .join_channel(session_id, &ChannelId::Room(room_id.to_string()))
            }
            ClientEvent::LeaveRoom(p) => {
                let room_id = validation::require("roomId", &p.room_id)?;
                self.registry
                    .leave_channel(session_id, &ChannelId::Room(room_id.to_string()));
                Ok(())
            }
            ClientEvent::JoinCommunity(p) => {
                let channel = ChannelId::Community(p.community_id);
                self.registry.join_channel(session_id, &channel)?;
                let history = self.channel_history(&channel).await?;
                self.registry
                    .send_to_session(session_id, ServerEvent::MessageHistory(history));
                Ok(())
            }
            ClientEvent::JoinPrivateChat(p) => {
                let channel = ChannelId::private(&p.course_id, &p.student_id, &p.tutor_id);
                self.registry.join_channel(session_id, &channel)?;
                let history = self.channel_history(&channel).await?;
                self.registry
                    .send_to_session(session_id, ServerEvent::PrivateMessageHistory(history));
                Ok(())
            }
            ClientEvent::FetchPrivateChats(p) => {
                let tutor_id = validation::require("tutorId", &p.tutor_id)?;
                let chats = self.list_private_chats(tutor_id).await?;
                self.registry
                    .send_to_session(session_id, ServerEvent::PrivateChats(chats));
                Ok(())
            }
            ClientEvent::SendMessage(p) => self.send_community_message(session_id, p, false).await,
            ClientEvent::SendImageMessage(p) => {
                self.send_community_message(session_id, p, true).await
            }
            ClientEvent::SendPrivateMessage(p) => {
                self.send_private_message(session_id, p, false).await
            }
            ClientEvent::SendPrivateImageMessage(p) => {
                self.send_private_message(session_id, p, true).await
            }
            ClientEvent::AddReaction(p) => self.reaction_event(session_id, p, true).await,
            ClientEvent::RemoveReaction(p) => self.reaction_event(session_id, p, false).await,
            ClientEvent::DeleteMessage(p) => self.delete_message_event(session_id, p).await,
            ClientEvent::CallRequest(p) => self.call_request(session_id, p).await,
            ClientEvent::CallAccepted(p) => self.call_accepted(session_id, p).await,
            ClientEvent::JoinVideoCall(p) => self.join_video_call(session_id, p),
            ClientEvent::EndCall(p) => self.end_call(session_id, p),
            ClientEvent::Offer(p) => self.relay_negotiation(session_id, p, ServerEvent::Offer),
            ClientEvent::Answer(p) => self.relay_negotiation(session_id, p, ServerEvent::Answer),
            ClientEvent::IceCandidate(p) => {
                self.relay_negotiation(session_id, p, ServerEvent::IceCandidate)
            }
            ClientEvent::RejectCall(p) => self.reject_call(session_id, p).await,
            ClientEvent::AcceptIncomingCall(p) => {
                self.forward_to_peer(session_id, p, ServerEvent::AcceptedCall)
            }
            ClientEvent::OutgoingVideoCall(p) => {
                self.forward_to_peer(session_id, p, ServerEvent::IncomingVideoCall)
            }
            ClientEvent::TrainerCallAccept(p) => {
                self.forward_to_peer(session_id, p, ServerEvent::TrainerAccept)
            }
            ClientEvent::LeaveCallRoom(p) => self.leave_call_room(session_id, p).await,
            ClientEvent::MarkNotificationRead(p) => {
                let id = validation::require("notificationId", &p.notification_id)?;
                let record = self.mark_read(id).await?;
                if self.registry.lookup(&record.user_id).map(|s| s.id) != Some(session_id) {
                    self.registry
                        .send_to_session(session_id, ServerEvent::NotificationRead(record));
                }
                Ok(())
            }
        }
    }

    /// Bind the connection to its user and push the user's private-chat inbox.
    async fn join_user(&self, session_id: SessionId, user_id: &str) -> Result<(), HubError> {
        self.registry.bind_user(session_id, user_id)?;
        info!(%session_id, %user_id, "user bound to connection");

        let chats = match self.list_private_chats(user_id).await {
            Ok(chats) => chats,
            Err(HubError::NotFound(_)) => Vec::new(),
            Err(e) => return Err(e),
        };
        self.registry
            .send_to_session(session_id, ServerEvent::PrivateChats(chats));
        Ok(())
    }

    /// The most recent messages of a channel, oldest first, with reactions.
    pub(crate) async fn channel_history(
        &self,
        channel: &ChannelId,
    ) -> Result<Vec<MessageRecord>, HubError> {
        let channel_ref = channel.to_string();
        let rows = self
            .persist(
                "fetch history",
                messages::fetch_channel_history(&self.db, &channel_ref, HISTORY_LIMIT),
            )
            .await?;
        let reactions = self
            .persist(
                "fetch reactions",
                messages::list_channel_reactions(&self.db, &channel_ref),
            )
            .await?;
        rows.into_iter()
            .map(|row| MessageRecord::from_row(row, &reactions))
            .collect()
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use crate::engine::events::{CommunityRef, JoinUser, RoomRef};

    #[tokio::test]
    async fn test_join_user_pushes_inbox() {
        let hub = seeded_hub().await;
        let (sid, mut rx) = hub.connect();

        hub.handle_event(sid, ClientEvent::JoinUser(JoinUser { user_id: "t1".into() }))
            .await;

        match drain(&mut rx).as_slice() {
            [ServerEvent::PrivateChats(chats)] => {
                assert_eq!(chats.len(), 1);
                assert_eq!(chats[0].channel_id, "private:c1:s1:t1");
            }
            other => panic!("Expected private_chats, got {:?}", other),
        }
        assert_eq!(hub.registry.lookup("t1").unwrap().id, sid);
    }

    #[tokio::test]
    async fn test_join_user_unknown_user_gets_empty_inbox() {
        let hub = test_hub().await;
        let (sid, mut rx) = hub.connect();
        hub.handle_event(sid, ClientEvent::JoinUser(JoinUser { user_id: "ghost".into() }))
            .await;
        match drain(&mut rx).as_slice() {
            [ServerEvent::PrivateChats(chats)] => assert!(chats.is_empty()),
            other => panic!("Expected empty private_chats, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_missing_parameter_reported_to_emitter_only() {
        let hub = test_hub().await;
        let (a, mut rx_a) = hub.connect();
        let (b, mut rx_b) = hub.connect();
        hub.registry
            .join_channel(b, &ChannelId::Community("g1".into()))
            .unwrap();

        hub.handle_event(a, ClientEvent::JoinCommunity(CommunityRef::default()))
            .await;

        match drain(&mut rx_a).as_slice() {
            [ServerEvent::Error(e)] => {
                assert_eq!(e.code, "invalid_payload");
                assert_eq!(e.message, "Missing required parameter: communityId");
            }
            other => panic!("Expected error, got {:?}", other),
        }
        assert!(drain(&mut rx_b).is_empty());
    }

    #[tokio::test]
    async fn test_join_and_leave_room() {
        let hub = test_hub().await;
        let (sid, _rx) = hub.connect();
        let room = ChannelId::Room("r1".into());

        hub.handle_event(sid, ClientEvent::JoinRoom(RoomRef { room_id: "r1".into() }))
            .await;
        assert!(hub.registry.is_member(sid, &room));

        hub.handle_event(sid, ClientEvent::LeaveRoom(RoomRef { room_id: "r1".into() }))
            .await;
        assert!(!hub.registry.is_member(sid, &room));
    }

    #[tokio::test]
    async fn test_persist_times_out_as_unavailable() {
        let mut config = ServerConfig::default();
        config.database.query_timeout_ms = 10;
        let pool = crate::db::pool::create_pool("sqlite::memory:").await.unwrap();
        let hub = Hub::new(pool, config);

        let slow = async {
            tokio::time::sleep(std::time::Duration::from_millis(200)).await;
            Ok::<_, sqlx::Error>(())
        };
        let err = hub.persist("slow op", slow).await.unwrap_err();
        assert_eq!(err.code(), "unavailable");
    }

    #[tokio::test]
    async fn test_disconnect_ends_active_call() {
        let hub = seeded_hub().await;
        let (tutor, _rx_t) = hub.connect();
        let (student, mut rx_s) = hub.connect();
        hub.registry.bind_user(tutor, "t1").unwrap();
        hub.registry.bind_user(student, "s1").unwrap();
        hub.calls.request(CallSession::new("r1", "t1", "s1", "n1"));
        hub.calls.accept("r1", "s1").unwrap();

        hub.disconnect(tutor);

        assert!(hub.calls.get("r1").is_none());
        let events = drain(&mut rx_s);
        assert_eq!(event_names(&events), vec!["call_ended"]);
    }
}
