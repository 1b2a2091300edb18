//! Notification fan-out: durable record first, best-effort push second.

use tracing::{debug, info};
use uuid::Uuid;

use super::events::{NotificationKind, NotificationRecord, ServerEvent};
use super::hub::Hub;
use super::validation;
use crate::db::models::NewNotification;
use crate::db::queries::notifications;
use crate::error::HubError;

/// Optional context attached to a notification, depending on its kind.
#[derive(Debug, Default, Clone, Copy)]
pub struct NotificationMeta<'a> {
    pub sender_id: Option<&'a str>,
    pub course_id: Option<&'a str>,
    pub student_id: Option<&'a str>,
    pub tutor_id: Option<&'a str>,
    pub course_title: Option<&'a str>,
    pub community_id: Option<&'a str>,
}

impl Hub {
    /// Persist an unread notification for `user_id` and push it to their
    /// connection if they are online. Returns the new notification's id.
    pub async fn notify(
        &self,
        user_id: &str,
        kind: NotificationKind,
        message: &str,
        meta: NotificationMeta<'_>,
    ) -> Result<String, HubError> {
        let id = Uuid::new_v4().to_string();
        self.persist(
            "insert notification",
            notifications::insert_notification(
                self.db(),
                &NewNotification {
                    id: &id,
                    user_id,
                    kind: kind.as_str(),
                    message,
                    sender_id: meta.sender_id,
                    course_id: meta.course_id,
                    student_id: meta.student_id,
                    tutor_id: meta.tutor_id,
                    course_title: meta.course_title,
                    community_id: meta.community_id,
                },
            ),
        )
        .await?;

        let record = self.load_notification(&id).await?;
        let pushed = self
            .registry
            .send_to_user(user_id, ServerEvent::Notification(record));
        debug!(notification_id = %id, %user_id, kind = kind.as_str(), pushed, "notification created");
        Ok(id)
    }

    /// Mark one notification read and tell its owner.
    pub async fn mark_read(&self, notification_id: &str) -> Result<NotificationRecord, HubError> {
        let updated = self
            .persist(
                "mark notification read",
                notifications::mark_read(self.db(), notification_id),
            )
            .await?;
        if !updated {
            return Err(HubError::NotFound("Notification not found".into()));
        }
        let record = self.load_notification(notification_id).await?;
        self.registry.send_to_user(
            &record.user_id,
            ServerEvent::NotificationRead(record.clone()),
        );
        Ok(record)
    }

    /// Mark a notification read on behalf of `requester`, who must own it.
    pub async fn mark_read_as(
        &self,
        requester: &str,
        notification_id: &str,
    ) -> Result<NotificationRecord, HubError> {
        let row = self
            .persist(
                "get notification",
                notifications::get_notification(self.db(), notification_id),
            )
            .await?
            .ok_or_else(|| HubError::NotFound("Notification not found".into()))?;
        if row.user_id != requester {
            return Err(HubError::Forbidden(
                "Not authorized to modify this notification".into(),
            ));
        }
        self.mark_read(notification_id).await
    }

    /// Mark every notification of `user_id` read. Only the user themselves may.
    pub async fn mark_all_read(&self, requester: &str, user_id: &str) -> Result<u64, HubError> {
        if requester != user_id {
            return Err(HubError::Forbidden(
                "Not authorized to modify these notifications".into(),
            ));
        }
        self.persist(
            "mark all notifications read",
            notifications::mark_all_read(self.db(), user_id),
        )
        .await
    }

    /// Delete every notification of `target_user_id`. Self-service only.
    pub async fn clear_all(&self, requester: &str, target_user_id: &str) -> Result<u64, HubError> {
        if requester != target_user_id {
            return Err(HubError::Forbidden(
                "Not authorized to delete these notifications".into(),
            ));
        }
        if !validation::is_valid_identifier(target_user_id) {
            return Err(HubError::InvalidArgument("Invalid user id".into()));
        }
        let deleted = self
            .persist(
                "delete notifications",
                notifications::delete_all_for_user(self.db(), target_user_id),
            )
            .await?;
        info!(user_id = %target_user_id, deleted, "notifications cleared");
        Ok(deleted)
    }

    /// A user's notifications, newest first.
    pub async fn list_notifications(
        &self,
        user_id: &str,
    ) -> Result<Vec<NotificationRecord>, HubError> {
        let rows = self
            .persist(
                "list notifications",
                notifications::list_for_user(self.db(), user_id),
            )
            .await?;
        rows.into_iter().map(NotificationRecord::try_from).collect()
    }

    async fn load_notification(&self, id: &str) -> Result<NotificationRecord, HubError> {
        self.persist("get notification", notifications::get_notification(self.db(), id))
            .await?
            .ok_or_else(|| HubError::NotFound("Notification not found".into()))?
            .try_into()
    }
}
