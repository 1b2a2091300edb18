use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::db::models::{MessageRow, NotificationRow, ReactionRow};
use crate::error::HubError;

/// Unique identifier for a connected session (one per connection, not per user).
pub type SessionId = Uuid;

// ── Inbound ─────────────────────────────────────────────────────────

/// Every event a browser may emit, decoded at the transport boundary from
/// `{ "event": <name>, "data": {...} }`.
///
/// Payload fields default to empty so that a missing field surfaces as an
/// `invalid_payload` error naming the field, not as an opaque decode failure.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ClientEvent {
    #[serde(rename = "join_user")]
    JoinUser(JoinUser),
    #[serde(rename = "join_room")]
    JoinRoom(RoomRef),
    #[serde(rename = "leave_room")]
    LeaveRoom(RoomRef),
    #[serde(rename = "join_community")]
    JoinCommunity(CommunityRef),
    #[serde(rename = "join_private_chat")]
    JoinPrivateChat(PrivateChatRef),
    #[serde(rename = "fetch_private_chats")]
    FetchPrivateChats(TutorRef),
    #[serde(rename = "send_message")]
    SendMessage(CommunityMessage),
    #[serde(rename = "send_image_message")]
    SendImageMessage(CommunityMessage),
    #[serde(rename = "send_private_message")]
    SendPrivateMessage(PrivateMessage),
    #[serde(rename = "send_private_image_message")]
    SendPrivateImageMessage(PrivateMessage),
    #[serde(rename = "add_reaction")]
    AddReaction(ReactionInput),
    #[serde(rename = "remove_reaction")]
    RemoveReaction(ReactionInput),
    #[serde(rename = "delete_message")]
    DeleteMessage(MessageRef),
    #[serde(rename = "call_request")]
    CallRequest(CallRequest),
    #[serde(rename = "call_accepted")]
    CallAccepted(CallAccepted),
    #[serde(rename = "joinVideoCall")]
    JoinVideoCall(JoinVideoCall),
    #[serde(rename = "end_call")]
    EndCall(EndCall),
    #[serde(rename = "offer")]
    Offer(MediaNegotiation),
    #[serde(rename = "answer")]
    Answer(MediaNegotiation),
    #[serde(rename = "ice-candidate")]
    IceCandidate(MediaNegotiation),
    #[serde(rename = "reject-call")]
    RejectCall(PeerSignal),
    #[serde(rename = "accept-incoming-call")]
    AcceptIncomingCall(PeerSignal),
    #[serde(rename = "outgoing-video-call")]
    OutgoingVideoCall(PeerSignal),
    #[serde(rename = "trainer-call-accept")]
    TrainerCallAccept(PeerSignal),
    #[serde(rename = "leave-room")]
    LeaveCallRoom(PeerSignal),
    #[serde(rename = "mark_private_message_notification_as_read")]
    MarkNotificationRead(NotificationRef),
}

impl ClientEvent {
    /// Wire name, for logging.
    pub fn name(&self) -> &'static str {
        match self {
            ClientEvent::JoinUser(_) => "join_user",
            ClientEvent::JoinRoom(_) => "join_room",
            ClientEvent::LeaveRoom(_) => "leave_room",
            ClientEvent::JoinCommunity(_) => "join_community",
            ClientEvent::JoinPrivateChat(_) => "join_private_chat",
            ClientEvent::FetchPrivateChats(_) => "fetch_private_chats",
            ClientEvent::SendMessage(_) => "send_message",
            ClientEvent::SendImageMessage(_) => "send_image_message",
            ClientEvent::SendPrivateMessage(_) => "send_private_message",
            ClientEvent::SendPrivateImageMessage(_) => "send_private_image_message",
            ClientEvent::AddReaction(_) => "add_reaction",
            ClientEvent::RemoveReaction(_) => "remove_reaction",
            ClientEvent::DeleteMessage(_) => "delete_message",
            ClientEvent::CallRequest(_) => "call_request",
            ClientEvent::CallAccepted(_) => "call_accepted",
            ClientEvent::JoinVideoCall(_) => "joinVideoCall",
            ClientEvent::EndCall(_) => "end_call",
            ClientEvent::Offer(_) => "offer",
            ClientEvent::Answer(_) => "answer",
            ClientEvent::IceCandidate(_) => "ice-candidate",
            ClientEvent::RejectCall(_) => "reject-call",
            ClientEvent::AcceptIncomingCall(_) => "accept-incoming-call",
            ClientEvent::OutgoingVideoCall(_) => "outgoing-video-call",
            ClientEvent::TrainerCallAccept(_) => "trainer-call-accept",
            ClientEvent::LeaveCallRoom(_) => "leave-room",
            ClientEvent::MarkNotificationRead(_) => "mark_private_message_notification_as_read",
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct JoinUser {
    pub user_id: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RoomRef {
    pub room_id: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CommunityRef {
    pub community_id: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PrivateChatRef {
    pub course_id: String,
    pub student_id: String,
    pub tutor_id: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TutorRef {
    pub tutor_id: String,
}

/// The `message` object clients attach to every send.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct MessageInput {
    pub sender: String,
    pub content: String,
    pub timestamp: String,
    /// Already-hosted image, passed through untouched.
    pub image_url: Option<String>,
}

/// Inline image upload attached to an image message.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ImageInput {
    /// Base64 payload, optionally already in `data:` URL form.
    pub data: String,
    pub name: String,
    #[serde(rename = "type")]
    pub content_type: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CommunityMessage {
    pub community_id: String,
    pub message: Option<MessageInput>,
    pub image: Option<ImageInput>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PrivateMessage {
    pub course_id: String,
    pub student_id: String,
    pub tutor_id: String,
    pub message: Option<MessageInput>,
    pub image: Option<ImageInput>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ReactionInput {
    pub message_id: String,
    pub user_id: String,
    pub emoji: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct MessageRef {
    pub message_id: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CallRequest {
    pub room_id: String,
    pub student_id: String,
    pub course_id: String,
    pub course_title: String,
    pub tutor_id: String,
    pub timestamp: String,
    pub caller_name: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CallAccepted {
    /// Client's id for the call. Accepted on the wire but not used to pick
    /// the notification that gets marked read.
    pub call_id: String,
    pub room_id: String,
    /// The original caller.
    pub receiver_id: String,
    /// The callee accepting the call.
    pub user_id: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct JoinVideoCall {
    pub room_id: String,
    pub user_id: String,
    pub role: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct EndCall {
    /// Room id of the call being ended.
    pub to: String,
}

/// Opaque offer/answer/candidate payload for the other members of a call room.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct MediaNegotiation {
    pub room_id: String,
    pub payload: Value,
}

/// Peer-addressed signaling payload. Only `to` is interpreted; every other
/// field is relayed to the recipient untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PeerSignal {
    #[serde(default)]
    pub to: String,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl PeerSignal {
    /// A string field of the opaque payload, if present and non-empty.
    pub fn field(&self, key: &str) -> Option<&str> {
        self.fields
            .get(key)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct NotificationRef {
    pub notification_id: String,
}

// ── Outbound ────────────────────────────────────────────────────────

/// Every event the hub pushes to a connection, encoded as
/// `{ "event": <name>, "data": ... }`.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", content = "data")]
pub enum ServerEvent {
    #[serde(rename = "private_chats")]
    PrivateChats(Vec<ChatSummary>),
    #[serde(rename = "message_history")]
    MessageHistory(Vec<MessageRecord>),
    #[serde(rename = "private_message_history")]
    PrivateMessageHistory(Vec<MessageRecord>),
    #[serde(rename = "receive_message")]
    ReceiveMessage(MessageRecord),
    #[serde(rename = "receive_private_message")]
    ReceivePrivateMessage(MessageRecord),
    #[serde(rename = "message_updated")]
    MessageUpdated(MessageRecord),
    #[serde(rename = "message_deleted")]
    MessageDeleted(DeletedMessage),
    #[serde(rename = "notification")]
    Notification(NotificationRecord),
    #[serde(rename = "notification_read")]
    NotificationRead(NotificationRecord),
    #[serde(rename = "call_request")]
    IncomingCall(IncomingCall),
    #[serde(rename = "videoCallStarted")]
    VideoCallStarted(CallStarted),
    #[serde(rename = "videoCallJoined")]
    VideoCallJoined(CallJoined),
    #[serde(rename = "call_ended")]
    CallEnded(RoomEvent),
    #[serde(rename = "call-rejected")]
    CallRejected(PeerSignal),
    #[serde(rename = "trainer-accept")]
    TrainerAccept(PeerSignal),
    #[serde(rename = "accepted-call")]
    AcceptedCall(PeerSignal),
    #[serde(rename = "incoming-video-call")]
    IncomingVideoCall(PeerSignal),
    #[serde(rename = "user-left")]
    UserLeft(PeerSignal),
    #[serde(rename = "offer")]
    Offer(RelayedNegotiation),
    #[serde(rename = "answer")]
    Answer(RelayedNegotiation),
    #[serde(rename = "ice-candidate")]
    IceCandidate(RelayedNegotiation),
    #[serde(rename = "error")]
    Error(ErrorPayload),
}

impl ServerEvent {
    pub fn error(err: &HubError) -> Self {
        ServerEvent::Error(ErrorPayload {
            code: err.code().to_string(),
            message: err.client_message(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub code: String,
    pub message: String,
}

/// Delivery status of a chat message. Only ever moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    Sent,
    Delivered,
    Read,
}

impl MessageStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            MessageStatus::Sent => "sent",
            MessageStatus::Delivered => "delivered",
            MessageStatus::Read => "read",
        }
    }

    /// Position in the sent → delivered → read order.
    pub fn rank(self) -> i64 {
        match self {
            MessageStatus::Sent => 0,
            MessageStatus::Delivered => 1,
            MessageStatus::Read => 2,
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "sent" => Some(MessageStatus::Sent),
            "delivered" => Some(MessageStatus::Delivered),
            "read" => Some(MessageStatus::Read),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reaction {
    pub user_id: String,
    pub emoji: String,
}

/// A chat message as delivered to clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageRecord {
    pub id: String,
    pub channel_ref: String,
    pub sender: String,
    pub content: String,
    pub timestamp: String,
    pub status: MessageStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    pub reactions: Vec<Reaction>,
}

impl MessageRecord {
    pub fn from_row(row: MessageRow, reactions: &[ReactionRow]) -> Result<Self, HubError> {
        let status = MessageStatus::parse(&row.status).ok_or_else(|| {
            HubError::Unavailable(format!("message {} has unknown status {}", row.id, row.status))
        })?;
        let reactions = reactions
            .iter()
            .filter(|r| r.message_id == row.id)
            .map(|r| Reaction {
                user_id: r.user_id.clone(),
                emoji: r.emoji.clone(),
            })
            .collect();

        Ok(Self {
            id: row.id,
            channel_ref: row.channel_ref,
            sender: row.sender,
            content: row.content,
            timestamp: row.timestamp,
            status,
            image_url: row.image_url,
            reactions,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeletedMessage {
    pub message_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    Approval,
    Rejection,
    ChatMessage,
    CallRequest,
    VideoCall,
}

impl NotificationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            NotificationKind::Approval => "approval",
            NotificationKind::Rejection => "rejection",
            NotificationKind::ChatMessage => "chat_message",
            NotificationKind::CallRequest => "call_request",
            NotificationKind::VideoCall => "video_call",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "approval" => Some(NotificationKind::Approval),
            "rejection" => Some(NotificationKind::Rejection),
            "chat_message" => Some(NotificationKind::ChatMessage),
            "call_request" => Some(NotificationKind::CallRequest),
            "video_call" => Some(NotificationKind::VideoCall),
            _ => None,
        }
    }
}

/// A notification as delivered to clients and returned by the REST surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationRecord {
    pub id: String,
    pub user_id: String,
    #[serde(rename = "type")]
    pub kind: NotificationKind,
    pub message: String,
    pub read: bool,
    pub created_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sender_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub course_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub student_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tutor_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub course_title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub community_id: Option<String>,
}

impl TryFrom<NotificationRow> for NotificationRecord {
    type Error = HubError;

    fn try_from(row: NotificationRow) -> Result<Self, Self::Error> {
        let kind = NotificationKind::parse(&row.kind).ok_or_else(|| {
            HubError::Unavailable(format!("notification {} has unknown kind {}", row.id, row.kind))
        })?;
        Ok(Self {
            id: row.id,
            user_id: row.user_id,
            kind,
            message: row.message,
            read: row.read,
            created_at: row.created_at,
            sender_id: row.sender_id,
            course_id: row.course_id,
            student_id: row.student_id,
            tutor_id: row.tutor_id,
            course_title: row.course_title,
            community_id: row.community_id,
        })
    }
}

/// One entry of a tutor's private-chat inbox.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatSummary {
    pub channel_id: String,
    pub course_id: String,
    pub course_title: String,
    pub student_id: String,
    pub student_name: String,
    pub tutor_id: String,
    /// `null` for a chat implied by a purchase with no messages yet.
    pub latest_message: Option<MessageRecord>,
}

/// A call request as delivered to the callee.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IncomingCall {
    pub room_id: String,
    pub call_id: String,
    pub caller_id: String,
    pub caller_name: String,
    pub course_id: String,
    pub course_title: String,
    pub student_id: String,
    pub tutor_id: String,
    pub timestamp: String,
}

/// Sent to each party once a call is accepted. The token is minted for the recipient.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallStarted {
    pub room_id: String,
    pub user_id: String,
    pub peer_id: String,
    pub app_id: u32,
    pub token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallJoined {
    pub room_id: String,
    pub user_id: String,
    pub role: String,
    /// Present only on the copy sent to the joiner.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomEvent {
    pub room_id: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayedNegotiation {
    pub room_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    pub payload: Value,
}
