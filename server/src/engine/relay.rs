use tracing::{debug, info, warn};
use uuid::Uuid;

use super::channel::ChannelId;
use super::events::{
    CommunityMessage, DeletedMessage, ImageInput, MessageInput, MessageRecord, MessageRef,
    MessageStatus, NotificationKind, PrivateMessage, ReactionInput, ServerEvent, SessionId,
};
use super::hub::Hub;
use super::notify::NotificationMeta;
use super::{timestamps, validation};
use crate::db::models::NewMessage;
use crate::db::queries::{directory, messages};
use crate::error::HubError;

/// A validated outbound chat message, before it has an id.
struct Draft {
    sender: String,
    content: String,
    timestamp: String,
    image_url: Option<String>,
}

impl Hub {
    // ── Sending ─────────────────────────────────────────────────────

    pub async fn send_community_message(
        &self,
        session_id: SessionId,
        input: CommunityMessage,
        with_image: bool,
    ) -> Result<(), HubError> {
        let community_id = validation::require("communityId", &input.community_id)?;
        let channel = ChannelId::Community(community_id.to_string());
        let draft = self.draft(input.message.as_ref(), input.image.as_ref(), with_image)?;
        self.relay(session_id, &channel, draft).await?;
        Ok(())
    }

    pub async fn send_private_message(
        &self,
        session_id: SessionId,
        input: PrivateMessage,
        with_image: bool,
    ) -> Result<(), HubError> {
        let channel = ChannelId::private(&input.course_id, &input.student_id, &input.tutor_id);
        channel.require_complete()?;
        let draft = self.draft(input.message.as_ref(), input.image.as_ref(), with_image)?;
        let record = self.relay(session_id, &channel, draft).await?;
        self.after_private_message(session_id, &input, &record).await;
        Ok(())
    }

    fn draft(
        &self,
        message: Option<&MessageInput>,
        image: Option<&ImageInput>,
        with_image: bool,
    ) -> Result<Draft, HubError> {
        let message = message.ok_or_else(|| HubError::missing("message"))?;
        let sender = validation::require("message.sender", &message.sender)?.to_string();
        let timestamp = timestamps::accept_client_timestamp(&message.timestamp)?;
        let limits = &self.config().chat;

        let image_url = if with_image {
            let image = image.ok_or_else(|| HubError::missing("image"))?;
            Some(validation::image_to_data_url(image, limits.max_image_bytes)?)
        } else {
            message.image_url.clone().filter(|u| !u.trim().is_empty())
        };

        // An image message may go without a caption.
        if image_url.is_none() || !message.content.trim().is_empty() {
            validation::validate_message(&message.content, limits.max_message_length)?;
        }

        Ok(Draft {
            sender,
            content: message.content.clone(),
            timestamp,
            image_url,
        })
    }

    /// Persist as `sent`, broadcast, advance to `delivered`, broadcast again.
    /// Both broadcasts go to every member of the channel, sender included.
    async fn relay(
        &self,
        session_id: SessionId,
        channel: &ChannelId,
        draft: Draft,
    ) -> Result<MessageRecord, HubError> {
        let id = Uuid::new_v4().to_string();
        let channel_ref = channel.to_string();

        self.persist(
            "insert message",
            messages::insert_message(
                self.db(),
                &NewMessage {
                    id: &id,
                    channel_ref: &channel_ref,
                    sender: &draft.sender,
                    content: &draft.content,
                    timestamp: &draft.timestamp,
                    image_url: draft.image_url.as_deref(),
                },
            ),
        )
        .await?;

        let mut record = MessageRecord {
            id,
            channel_ref,
            sender: draft.sender,
            content: draft.content,
            timestamp: draft.timestamp,
            status: MessageStatus::Sent,
            image_url: draft.image_url,
            reactions: Vec::new(),
        };
        let receivers = self
            .registry
            .broadcast(channel, &wrap_message(channel, record.clone()), None);
        debug!(%session_id, %channel, message_id = %record.id, receivers, "message relayed");

        // The message is stored and out; a failed status bump only costs the
        // second broadcast.
        let delivered = MessageStatus::Delivered;
        match self
            .persist(
                "mark delivered",
                messages::advance_status(self.db(), &record.id, delivered.as_str(), delivered.rank()),
            )
            .await
        {
            Ok(_) => {
                record.status = delivered;
                self.registry
                    .broadcast(channel, &wrap_message(channel, record.clone()), None);
            }
            Err(e) => warn!(message_id = %record.id, error = %e, "failed to mark message delivered"),
        }

        Ok(record)
    }

    /// Notify the participant who did not send the message and, when that is
    /// the tutor, refresh their inbox. Failures here are logged, not surfaced.
    async fn after_private_message(
        &self,
        session_id: SessionId,
        input: &PrivateMessage,
        record: &MessageRecord,
    ) {
        let sender_id = self.registry.user_of(session_id);
        let recipient = match sender_id.as_deref() {
            Some(u) if u == input.tutor_id => input.student_id.as_str(),
            Some(u) if u == input.student_id => input.tutor_id.as_str(),
            _ => {
                // Unbound connection: fall back to comparing display names.
                match self
                    .persist("get tutor", directory::get_user(self.db(), &input.tutor_id))
                    .await
                {
                    Ok(Some(tutor)) if tutor.display_name == record.sender => {
                        input.student_id.as_str()
                    }
                    _ => input.tutor_id.as_str(),
                }
            }
        };

        let course_title = match self
            .persist("get course", directory::get_course(self.db(), &input.course_id))
            .await
        {
            Ok(course) => course.map(|c| c.title),
            Err(_) => None,
        };

        let text = if record.image_url.is_some() && record.content.trim().is_empty() {
            format!("{} sent you an image", record.sender)
        } else {
            format!("New message from {}", record.sender)
        };
        let meta = NotificationMeta {
            sender_id: sender_id.as_deref(),
            course_id: Some(input.course_id.as_str()),
            student_id: Some(input.student_id.as_str()),
            tutor_id: Some(input.tutor_id.as_str()),
            course_title: course_title.as_deref(),
            community_id: None,
        };
        if let Err(e) = self
            .notify(recipient, NotificationKind::ChatMessage, &text, meta)
            .await
        {
            warn!(%recipient, error = %e, "failed to notify chat recipient");
        }

        if recipient == input.tutor_id {
            self.refresh_private_chats(&input.tutor_id).await;
        }
    }

    // ── Reactions and deletion ──────────────────────────────────────

    /// Add a (user, emoji) reaction. Adding it twice leaves one entry.
    pub async fn add_reaction(
        &self,
        message_id: &str,
        user_id: &str,
        emoji: &str,
    ) -> Result<MessageRecord, HubError> {
        validation::validate_emoji(emoji)?;
        self.require_message(message_id).await?;
        self.persist(
            "add reaction",
            messages::add_reaction(self.db(), message_id, user_id, emoji),
        )
        .await?;
        self.load_message(message_id).await
    }

    /// Remove a (user, emoji) reaction. Removing an absent one is a no-op.
    pub async fn remove_reaction(
        &self,
        message_id: &str,
        user_id: &str,
        emoji: &str,
    ) -> Result<MessageRecord, HubError> {
        validation::validate_emoji(emoji)?;
        self.require_message(message_id).await?;
        self.persist(
            "remove reaction",
            messages::remove_reaction(self.db(), message_id, user_id, emoji),
        )
        .await?;
        self.load_message(message_id).await
    }

    /// Hard-delete a message. Returns the channel reference it lived in, or
    /// None if it was already gone.
    pub async fn delete_message(&self, message_id: &str) -> Result<Option<String>, HubError> {
        let Some(row) = self
            .persist("get message", messages::get_message(self.db(), message_id))
            .await?
        else {
            return Ok(None);
        };
        let removed = self
            .persist("delete message", messages::delete_message(self.db(), message_id))
            .await?;
        if !removed {
            return Ok(None);
        }
        info!(%message_id, channel = %row.channel_ref, "message deleted");
        Ok(Some(row.channel_ref))
    }

    /// Tell a message's channel about a change. The caller gets a copy too if
    /// it is not in the channel.
    pub(crate) fn publish_to_message_channel(
        &self,
        session_id: Option<SessionId>,
        channel: Option<&ChannelId>,
        event: ServerEvent,
    ) {
        let in_channel = match channel {
            Some(channel) => {
                self.registry.broadcast(channel, &event, None);
                session_id.is_some_and(|sid| self.registry.is_member(sid, channel))
            }
            None => false,
        };
        if let Some(sid) = session_id
            && !in_channel
        {
            self.registry.send_to_session(sid, event);
        }
    }

    pub(crate) async fn reaction_event(
        &self,
        session_id: SessionId,
        input: ReactionInput,
        add: bool,
    ) -> Result<(), HubError> {
        let message_id = validation::require("messageId", &input.message_id)?;
        // A bound connection reacts as its own user; the payload only names the
        // user for connections that never sent join_user.
        let user_id = match self.registry.user_of(session_id) {
            Some(bound) => bound,
            None => validation::require("userId", &input.user_id)?.to_string(),
        };
        let record = if add {
            self.add_reaction(message_id, &user_id, &input.emoji).await?
        } else {
            self.remove_reaction(message_id, &user_id, &input.emoji).await?
        };
        let channel = ChannelId::parse(&record.channel_ref);
        self.publish_to_message_channel(
            Some(session_id),
            channel.as_ref(),
            ServerEvent::MessageUpdated(record),
        );
        Ok(())
    }

    pub(crate) async fn delete_message_event(
        &self,
        session_id: SessionId,
        input: MessageRef,
    ) -> Result<(), HubError> {
        let message_id = validation::require("messageId", &input.message_id)?;
        let channel = self
            .delete_message(message_id)
            .await?
            .and_then(|r| ChannelId::parse(&r));
        self.publish_to_message_channel(
            Some(session_id),
            channel.as_ref(),
            ServerEvent::MessageDeleted(DeletedMessage {
                message_id: message_id.to_string(),
            }),
        );
        Ok(())
    }

    async fn require_message(&self, message_id: &str) -> Result<(), HubError> {
        match self
            .persist("get message", messages::get_message(self.db(), message_id))
            .await?
        {
            Some(_) => Ok(()),
            None => Err(HubError::NotFound("Message not found".into())),
        }
    }

    async fn load_message(&self, message_id: &str) -> Result<MessageRecord, HubError> {
        let row = self
            .persist("get message", messages::get_message(self.db(), message_id))
            .await?
            .ok_or_else(|| HubError::NotFound("Message not found".into()))?;
        let reactions = self
            .persist("list reactions", messages::list_reactions(self.db(), message_id))
            .await?;
        MessageRecord::from_row(row, &reactions)
    }
}

fn wrap_message(channel: &ChannelId, record: MessageRecord) -> ServerEvent {
    if channel.is_private() {
        ServerEvent::ReceivePrivateMessage(record)
    } else {
        ServerEvent::ReceiveMessage(record)
    }
}
