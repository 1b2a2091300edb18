use serde::{Deserialize, Serialize};

/// A stored chat message.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct MessageRow {
    pub id: String,
    pub channel_ref: String,
    pub sender: String,
    pub content: String,
    /// Client-supplied, stored verbatim.
    pub timestamp: String,
    pub status: String,
    pub image_url: Option<String>,
    pub created_at: String,
}

/// Parameters for inserting a new message.
pub struct NewMessage<'a> {
    pub id: &'a str,
    pub channel_ref: &'a str,
    pub sender: &'a str,
    pub content: &'a str,
    pub timestamp: &'a str,
    pub image_url: Option<&'a str>,
}

/// A single (user, emoji) reaction on a message.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ReactionRow {
    pub message_id: String,
    pub user_id: String,
    pub emoji: String,
}

/// A stored notification. Always addressed to exactly one user.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct NotificationRow {
    pub id: String,
    pub user_id: String,
    pub kind: String,
    pub message: String,
    pub read: bool,
    pub created_at: String,
    pub sender_id: Option<String>,
    pub course_id: Option<String>,
    pub student_id: Option<String>,
    pub tutor_id: Option<String>,
    pub course_title: Option<String>,
    pub community_id: Option<String>,
}

/// Parameters for inserting a notification.
#[derive(Default)]
pub struct NewNotification<'a> {
    pub id: &'a str,
    pub user_id: &'a str,
    pub kind: &'a str,
    pub message: &'a str,
    pub sender_id: Option<&'a str>,
    pub course_id: Option<&'a str>,
    pub student_id: Option<&'a str>,
    pub tutor_id: Option<&'a str>,
    pub course_title: Option<&'a str>,
    pub community_id: Option<&'a str>,
}

/// A user, as seen through the account subsystem's table.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct UserRow {
    pub id: String,
    pub display_name: String,
    pub role: String,
}

/// A course, as seen through the catalog subsystem's table.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct CourseRow {
    pub id: String,
    pub title: String,
    pub tutor_id: String,
}

/// A completed enrollment: one student in one course.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct EnrollmentRow {
    pub course_id: String,
    pub student_id: String,
}
