//! Call signaling: request → accept/reject → join → end, between exactly two
//! parties. Media never passes through here; offer/answer/candidate payloads
//! are ferried between room members without interpretation.

use tracing::{info, warn};

use super::calls::CallSession;
use super::channel::ChannelId;
use super::events::{
    CallAccepted, CallJoined, CallRequest, CallStarted, EndCall, IncomingCall, JoinVideoCall,
    MediaNegotiation, NotificationKind, PeerSignal, RelayedNegotiation, ServerEvent, SessionId,
};
use super::hub::Hub;
use super::notify::NotificationMeta;
use super::{timestamps, validation};
use crate::auth::media_token::{MediaGrant, sign_media_token};
use crate::db::queries::directory;
use crate::error::HubError;

impl Hub {
    /// idle → requested.
    pub async fn call_request(
        &self,
        session_id: SessionId,
        req: CallRequest,
    ) -> Result<(), HubError> {
        let room_id = validation::require("roomId", &req.room_id)?;
        let student_id = validation::require_identifier("studentId", &req.student_id)?;
        let course_id = validation::require_identifier("courseId", &req.course_id)?;
        let course_title = validation::require("courseTitle", &req.course_title)?;
        let tutor_id = validation::require_identifier("tutorId", &req.tutor_id)?;
        let timestamp = timestamps::accept_client_timestamp(&req.timestamp)?;
        let caller_name = validation::require("callerName", &req.caller_name)?;

        self.require_user(student_id, "Student").await?;
        self.require_user(tutor_id, "Tutor").await?;
        if self
            .persist("get course", directory::get_course(self.db(), course_id))
            .await?
            .is_none()
        {
            return Err(HubError::NotFound(format!("Course {course_id} not found")));
        }

        let (caller_id, callee_id) = match self.registry.user_of(session_id) {
            Some(bound) if bound == tutor_id => (tutor_id, student_id),
            Some(bound) if bound == student_id => (student_id, tutor_id),
            Some(_) => {
                return Err(HubError::Forbidden(
                    "Only the course's student or tutor can start this call".into(),
                ));
            }
            None => {
                return Err(HubError::InvalidPayload(
                    "Send join_user before requesting a call".into(),
                ));
            }
        };

        let notification_id = self
            .notify(
                callee_id,
                NotificationKind::CallRequest,
                &format!("{caller_name} is calling you about {course_title}"),
                NotificationMeta {
                    sender_id: Some(caller_id),
                    course_id: Some(course_id),
                    student_id: Some(student_id),
                    tutor_id: Some(tutor_id),
                    course_title: Some(course_title),
                    community_id: None,
                },
            )
            .await?;

        self.calls.request(CallSession::new(
            room_id,
            caller_id,
            callee_id,
            &notification_id,
        ));

        let delivered = self.registry.send_to_user(
            callee_id,
            ServerEvent::IncomingCall(IncomingCall {
                room_id: room_id.to_string(),
                call_id: notification_id.clone(),
                caller_id: caller_id.to_string(),
                caller_name: caller_name.to_string(),
                course_id: course_id.to_string(),
                course_title: course_title.to_string(),
                student_id: student_id.to_string(),
                tutor_id: tutor_id.to_string(),
                timestamp,
            }),
        );
        info!(%room_id, %caller_id, %callee_id, delivered, "call requested");
        Ok(())
    }

    /// requested → accepted. Both parties get a `videoCallStarted` with their own token.
    pub async fn call_accepted(
        &self,
        session_id: SessionId,
        p: CallAccepted,
    ) -> Result<(), HubError> {
        let room_id = validation::require("roomId", &p.room_id)?;
        let acceptor = self.acting_user(session_id, &p.user_id)?;
        let call = self.calls.accept(room_id, &acceptor)?;

        for (user_id, peer_id) in [
            (&call.callee_id, &call.caller_id),
            (&call.caller_id, &call.callee_id),
        ] {
            let token = self.media_token(user_id, room_id)?;
            let delivered = self.registry.send_to_user(
                user_id,
                ServerEvent::VideoCallStarted(CallStarted {
                    room_id: room_id.to_string(),
                    user_id: user_id.clone(),
                    peer_id: peer_id.clone(),
                    app_id: self.config().media.app_id,
                    token,
                }),
            );
            if !delivered {
                info!(%room_id, %user_id, "call participant offline at accept");
            }
        }

        // Always the notification recorded with the request, whatever callId says.
        let notification_id = call.notification_id.as_str();
        if let Err(e) = self.mark_read(notification_id).await {
            warn!(%notification_id, error = %e, "failed to mark call notification read");
        }
        info!(%room_id, caller = %call.caller_id, callee = %call.callee_id, "call accepted");
        Ok(())
    }

    /// accepted → joined. The joiner gets a token scoped to `room_{roomId}`;
    /// everyone already in the room learns who joined.
    pub fn join_video_call(&self, session_id: SessionId, p: JoinVideoCall) -> Result<(), HubError> {
        let room_id = validation::require("roomId", &p.room_id)?;
        let user_id = self.acting_user(session_id, &p.user_id)?;
        let role = validation::require("role", &p.role)?;

        let room = ChannelId::Room(room_id.to_string());
        self.registry.join_channel(session_id, &room)?;
        self.calls.mark_joined(room_id);

        let token = self.media_token(&user_id, &format!("room_{room_id}"))?;
        let joined = CallJoined {
            room_id: room_id.to_string(),
            user_id: user_id.clone(),
            role: role.to_string(),
            token: None,
        };
        self.registry.broadcast(
            &room,
            &ServerEvent::VideoCallJoined(joined.clone()),
            Some(session_id),
        );
        self.registry.send_to_session(
            session_id,
            ServerEvent::VideoCallJoined(CallJoined {
                token: Some(token),
                ..joined
            }),
        );
        info!(%room_id, %user_id, %role, "joined video call");
        Ok(())
    }

    /// * → ended.
    pub fn end_call(&self, session_id: SessionId, p: EndCall) -> Result<(), HubError> {
        let room_id = validation::require("to", &p.to)?;
        let call = self.calls.end(room_id);
        self.announce_call_ended(room_id, call.as_ref());
        info!(%session_id, %room_id, "call ended");
        Ok(())
    }

    /// requested → rejected. The caller gets a durable notice and, if online,
    /// the rejection itself.
    pub async fn reject_call(&self, session_id: SessionId, p: PeerSignal) -> Result<(), HubError> {
        let to = validation::require("to", &p.to)?.to_string();
        let rejecter = self.registry.user_of(session_id);

        if let Some(room_id) = p.field("roomId")
            && self.calls.reject(room_id).is_some()
        {
            info!(%room_id, caller = %to, "call rejected");
        }

        let name = p.field("name").unwrap_or("The other participant");
        self.notify(
            &to,
            NotificationKind::VideoCall,
            &format!("{name} declined your call"),
            NotificationMeta {
                sender_id: rejecter.as_deref(),
                course_id: p.field("courseId"),
                ..Default::default()
            },
        )
        .await?;

        self.registry.send_to_user(&to, ServerEvent::CallRejected(p));
        Ok(())
    }

    /// A participant walked out of the call room.
    pub async fn leave_call_room(&self, session_id: SessionId, p: PeerSignal) -> Result<(), HubError> {
        let to = validation::require("to", &p.to)?.to_string();
        let leaver = self.registry.user_of(session_id);

        if let Some(room_id) = p.field("roomId") {
            self.registry
                .leave_channel(session_id, &ChannelId::Room(room_id.to_string()));
        }

        let name = p.field("name").unwrap_or("The other participant");
        self.notify(
            &to,
            NotificationKind::VideoCall,
            &format!("{name} left the call"),
            NotificationMeta {
                sender_id: leaver.as_deref(),
                ..Default::default()
            },
        )
        .await?;

        self.registry.send_to_user(&to, ServerEvent::UserLeft(p));
        Ok(())
    }

    /// Pass a peer-addressed payload straight to its recipient. An offline
    /// recipient is not reported back.
    pub fn forward_to_peer(
        &self,
        session_id: SessionId,
        p: PeerSignal,
        wrap: fn(PeerSignal) -> ServerEvent,
    ) -> Result<(), HubError> {
        let to = validation::require("to", &p.to)?.to_string();
        let delivered = self.registry.send_to_user(&to, wrap(p));
        if !delivered {
            info!(%session_id, recipient = %to, "peer signal dropped, recipient offline");
        }
        Ok(())
    }

    /// Ferry an opaque media-negotiation payload to the rest of the call room.
    pub fn relay_negotiation(
        &self,
        session_id: SessionId,
        p: MediaNegotiation,
        wrap: fn(RelayedNegotiation) -> ServerEvent,
    ) -> Result<(), HubError> {
        let room_id = validation::require("roomId", &p.room_id)?;
        let room = ChannelId::Room(room_id.to_string());
        if !self.registry.is_member(session_id, &room) {
            return Err(HubError::Forbidden("Join the call room first".into()));
        }
        let event = wrap(RelayedNegotiation {
            room_id: room_id.to_string(),
            from: self.registry.user_of(session_id),
            payload: p.payload,
        });
        self.registry.broadcast(&room, &event, Some(session_id));
        Ok(())
    }

    /// The user an event acts for: the payload's id, else the connection's binding.
    fn acting_user(&self, session_id: SessionId, claimed: &str) -> Result<String, HubError> {
        match validation::require("userId", claimed) {
            Ok(user_id) => Ok(user_id.to_string()),
            Err(e) => self.registry.user_of(session_id).ok_or(e),
        }
    }

    async fn require_user(&self, user_id: &str, what: &str) -> Result<(), HubError> {
        match self
            .persist("get user", directory::get_user(self.db(), user_id))
            .await?
        {
            Some(_) => Ok(()),
            None => Err(HubError::NotFound(format!("{what} {user_id} not found"))),
        }
    }

    fn media_token(&self, user_id: &str, room_id: &str) -> Result<String, HubError> {
        let media = &self.config().media;
        let grant = MediaGrant::issue(media.app_id, user_id, room_id, media.token_ttl_secs);
        sign_media_token(&grant, &media.server_secret)
            .map_err(|e| HubError::Unavailable(format!("media token: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::media_token::tests::verify_media_token;
    use crate::engine::events::ClientEvent;
    use crate::engine::hub::test_support::*;
    use serde_json::json;

    fn request() -> CallRequest {
        CallRequest {
            room_id: "r1".into(),
            student_id: "s1".into(),
            course_id: "c1".into(),
            course_title: "Rust 101".into(),
            tutor_id: "t1".into(),
            timestamp: "2024-05-01T10:00:00Z".into(),
            caller_name: "Tess".into(),
        }
    }

    fn peer(value: serde_json::Value) -> PeerSignal {
        serde_json::from_value(value).unwrap()
    }

    #[tokio::test]
    async fn test_tutor_calls_student() {
        let hub = seeded_hub().await;
        let (tutor, _rx_t) = hub.connect();
        let (student, mut rx_s) = hub.connect();
        hub.registry.bind_user(tutor, "t1").unwrap();
        hub.registry.bind_user(student, "s1").unwrap();

        hub.call_request(tutor, request()).await.unwrap();

        let events = drain(&mut rx_s);
        assert_eq!(event_names(&events), vec!["notification", "call_request"]);
        match &events[1] {
            ServerEvent::IncomingCall(call) => {
                assert_eq!(call.caller_id, "t1");
                assert_eq!(call.room_id, "r1");
            }
            other => panic!("Expected call_request, got {:?}", other),
        }
        let session = hub.calls.get("r1").unwrap();
        assert_eq!(session.callee_id, "s1");
    }

    #[tokio::test]
    async fn test_student_calls_tutor() {
        let hub = seeded_hub().await;
        let (tutor, mut rx_t) = hub.connect();
        let (student, _rx_s) = hub.connect();
        hub.registry.bind_user(tutor, "t1").unwrap();
        hub.registry.bind_user(student, "s1").unwrap();

        hub.call_request(student, request()).await.unwrap();

        assert_eq!(event_names(&drain(&mut rx_t)), vec!["notification", "call_request"]);
        let session = hub.calls.get("r1").unwrap();
        assert_eq!(session.caller_id, "s1");
        assert_eq!(session.callee_id, "t1");
    }

    #[tokio::test]
    async fn test_unbound_caller_is_rejected() {
        let hub = seeded_hub().await;
        let (tutor, mut rx_t) = hub.connect();

        let err = hub.call_request(tutor, request()).await.unwrap_err();
        assert_eq!(err.code(), "invalid_payload");
        assert!(hub.calls.is_empty());
        assert!(hub.list_notifications("t1").await.unwrap().is_empty());
        assert!(hub.list_notifications("s1").await.unwrap().is_empty());
        assert!(drain(&mut rx_t).is_empty());
    }

    #[tokio::test]
    async fn test_outsider_cannot_start_call() {
        let hub = seeded_hub().await;
        let (outsider, _rx) = hub.connect();
        hub.registry.bind_user(outsider, "u9").unwrap();

        let err = hub.call_request(outsider, request()).await.unwrap_err();
        assert_eq!(err.code(), "forbidden");
        assert!(hub.calls.is_empty());
    }

    #[tokio::test]
    async fn test_accept_marks_recorded_notification_read_regardless_of_call_id() {
        let hub = seeded_hub().await;
        let (tutor, _rx_t) = hub.connect();
        let (student, mut rx_s) = hub.connect();
        hub.registry.bind_user(tutor, "t1").unwrap();
        hub.registry.bind_user(student, "s1").unwrap();
        hub.call_request(tutor, request()).await.unwrap();
        drain(&mut rx_s);

        // An unrelated notification the client might try to name instead.
        let other = hub
            .notify("s1", NotificationKind::ChatMessage, "hi", NotificationMeta::default())
            .await
            .unwrap();

        let accepted = CallAccepted {
            call_id: other.clone(),
            room_id: "r1".into(),
            receiver_id: "t1".into(),
            user_id: "s1".into(),
        };
        hub.call_accepted(student, accepted).await.unwrap();

        let stored = hub.list_notifications("s1").await.unwrap();
        let call = stored
            .iter()
            .find(|n| n.kind == NotificationKind::CallRequest)
            .unwrap();
        assert!(call.read);
        let chat = stored.iter().find(|n| n.id == other).unwrap();
        assert!(!chat.read);
    }

    #[tokio::test]
    async fn test_accept_with_foreign_call_id_still_marks_request_read() {
        let hub = seeded_hub().await;
        let (tutor, _rx_t) = hub.connect();
        let (student, _rx_s) = hub.connect();
        hub.registry.bind_user(tutor, "t1").unwrap();
        hub.registry.bind_user(student, "s1").unwrap();
        hub.call_request(tutor, request()).await.unwrap();

        let accepted = CallAccepted {
            call_id: "client-call-7".into(),
            room_id: "r1".into(),
            receiver_id: "t1".into(),
            user_id: "s1".into(),
        };
        hub.call_accepted(student, accepted).await.unwrap();

        let stored = hub.list_notifications("s1").await.unwrap();
        assert_eq!(stored.len(), 1);
        assert!(stored[0].read);
    }

    #[tokio::test]
    async fn test_call_request_malformed_identifier() {
        let hub = seeded_hub().await;
        let (sid, _rx) = hub.connect();
        let mut req = request();
        req.course_id = "c1; drop".into();
        let err = hub.call_request(sid, req).await.unwrap_err();
        assert_eq!(err.code(), "invalid_payload");
    }

    #[tokio::test]
    async fn test_call_request_unknown_course() {
        let hub = seeded_hub().await;
        let (sid, _rx) = hub.connect();
        let mut req = request();
        req.course_id = "c404".into();
        assert_eq!(hub.call_request(sid, req).await.unwrap_err().code(), "not_found");
        assert!(hub.calls.is_empty());
    }

    #[tokio::test]
    async fn test_accept_after_expiry_fails() {
        let mut config = crate::config::ServerConfig::default();
        config.calls.request_ttl_secs = 0;
        let hub = test_hub_with(config).await;
        seed(&hub).await;
        let (tutor, _rx_t) = hub.connect();
        let (student, mut rx_s) = hub.connect();
        hub.registry.bind_user(tutor, "t1").unwrap();
        hub.registry.bind_user(student, "s1").unwrap();
        hub.call_request(tutor, request()).await.unwrap();
        drain(&mut rx_s);

        let accepted = CallAccepted {
            call_id: String::new(),
            room_id: "r1".into(),
            receiver_id: "t1".into(),
            user_id: "s1".into(),
        };
        let err = hub.call_accepted(student, accepted).await.unwrap_err();
        assert_eq!(err.code(), "not_found");
        assert!(drain(&mut rx_s).is_empty());
    }

    #[tokio::test]
    async fn test_accept_unknown_room_fails() {
        let hub = seeded_hub().await;
        let (student, _rx) = hub.connect();
        let accepted = CallAccepted {
            call_id: String::new(),
            room_id: "r-unknown".into(),
            receiver_id: "t1".into(),
            user_id: "s1".into(),
        };
        let err = hub.call_accepted(student, accepted).await.unwrap_err();
        assert_eq!(err.code(), "not_found");
    }

    #[tokio::test]
    async fn test_join_video_call_token_goes_to_joiner_only() {
        let hub = test_hub().await;
        let (first, mut rx_first) = hub.connect();
        let (second, mut rx_second) = hub.connect();
        hub.registry
            .join_channel(first, &ChannelId::Room("r1".into()))
            .unwrap();

        let join = JoinVideoCall {
            room_id: "r1".into(),
            user_id: "s1".into(),
            role: "student".into(),
        };
        hub.join_video_call(second, join).unwrap();

        match drain(&mut rx_first).as_slice() {
            [ServerEvent::VideoCallJoined(j)] => {
                assert_eq!(j.user_id, "s1");
                assert!(j.token.is_none());
            }
            other => panic!("Expected videoCallJoined, got {:?}", other),
        }
        match drain(&mut rx_second).as_slice() {
            [ServerEvent::VideoCallJoined(j)] => {
                let token = j.token.as_deref().unwrap();
                let grant = verify_media_token(token, &hub.config().media.server_secret).unwrap();
                assert_eq!(grant.room_id, "room_r1");
                assert_eq!(grant.user_id, "s1");
                assert_eq!(grant.expires_at - grant.created_at, 3600);
            }
            other => panic!("Expected videoCallJoined, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_end_call_broadcasts_to_room() {
        let hub = test_hub().await;
        let (a, mut rx_a) = hub.connect();
        let (b, mut rx_b) = hub.connect();
        for sid in [a, b] {
            hub.registry
                .join_channel(sid, &ChannelId::Room("r1".into()))
                .unwrap();
        }
        hub.handle_event(a, ClientEvent::EndCall(EndCall { to: "r1".into() }))
            .await;
        assert_eq!(event_names(&drain(&mut rx_a)), vec!["call_ended"]);
        assert_eq!(event_names(&drain(&mut rx_b)), vec!["call_ended"]);
    }

    #[tokio::test]
    async fn test_reject_notifies_caller_and_drops_call() {
        let hub = seeded_hub().await;
        let (tutor, mut rx_t) = hub.connect();
        let (student, _rx_s) = hub.connect();
        hub.registry.bind_user(tutor, "t1").unwrap();
        hub.registry.bind_user(student, "s1").unwrap();
        hub.call_request(tutor, request()).await.unwrap();

        hub.handle_event(
            student,
            ClientEvent::RejectCall(peer(json!({"to": "t1", "roomId": "r1", "name": "Sam"}))),
        )
        .await;

        let events = drain(&mut rx_t);
        assert_eq!(event_names(&events), vec!["notification", "call-rejected"]);
        let persisted = hub.list_notifications("t1").await.unwrap();
        assert_eq!(persisted[0].kind, NotificationKind::VideoCall);
        assert_eq!(persisted[0].message, "Sam declined your call");
        assert!(hub.calls.get("r1").is_none());
    }

    #[tokio::test]
    async fn test_leave_room_notifies_peer() {
        let hub = test_hub().await;
        let (a, _rx_a) = hub.connect();
        let (b, mut rx_b) = hub.connect();
        hub.registry.bind_user(b, "t1").unwrap();
        hub.registry
            .join_channel(a, &ChannelId::Room("r1".into()))
            .unwrap();

        hub.handle_event(
            a,
            ClientEvent::LeaveCallRoom(peer(json!({"to": "t1", "roomId": "r1"}))),
        )
        .await;

        assert!(!hub.registry.is_member(a, &ChannelId::Room("r1".into())));
        assert_eq!(event_names(&drain(&mut rx_b)), vec!["notification", "user-left"]);
    }

    #[tokio::test]
    async fn test_peer_signals_forward_untouched() {
        let hub = test_hub().await;
        let (a, mut rx_a) = hub.connect();
        let (b, mut rx_b) = hub.connect();
        hub.registry.bind_user(b, "t1").unwrap();

        hub.handle_event(
            a,
            ClientEvent::TrainerCallAccept(peer(json!({"to": "t1", "roomId": "r1", "extra": 7}))),
        )
        .await;
        match drain(&mut rx_b).as_slice() {
            [ServerEvent::TrainerAccept(sig)] => assert_eq!(sig.fields["extra"], 7),
            other => panic!("Expected trainer-accept, got {:?}", other),
        }

        // Offline recipient: nothing comes back to the sender.
        hub.handle_event(
            a,
            ClientEvent::OutgoingVideoCall(peer(json!({"to": "nobody"}))),
        )
        .await;
        assert!(drain(&mut rx_a).is_empty());
    }

    #[tokio::test]
    async fn test_negotiation_relayed_to_room_only() {
        let hub = test_hub().await;
        let (a, mut rx_a) = hub.connect();
        let (b, mut rx_b) = hub.connect();
        let (outsider, mut rx_o) = hub.connect();
        hub.registry.bind_user(a, "t1").unwrap();
        for sid in [a, b] {
            hub.registry
                .join_channel(sid, &ChannelId::Room("r1".into()))
                .unwrap();
        }

        let offer = MediaNegotiation {
            room_id: "r1".into(),
            payload: json!({"sdp": "v=0"}),
        };
        hub.handle_event(a, ClientEvent::Offer(offer.clone())).await;

        assert!(drain(&mut rx_a).is_empty());
        let out = serde_json::to_value(&drain(&mut rx_b)[0]).unwrap();
        assert_eq!(out["event"], "offer");
        assert_eq!(out["data"]["from"], "t1");
        assert_eq!(out["data"]["payload"]["sdp"], "v=0");

        hub.handle_event(outsider, ClientEvent::Offer(offer)).await;
        match drain(&mut rx_o).as_slice() {
            [ServerEvent::Error(e)] => assert_eq!(e.code, "forbidden"),
            other => panic!("Expected error, got {:?}", other),
        }
    }
}
