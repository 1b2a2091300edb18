use sqlx::SqlitePool;

use crate::db::models::{NewNotification, NotificationRow};

const NOTIFICATION_COLUMNS: &str = "id, user_id, kind, message, read, created_at, sender_id, \
     course_id, student_id, tutor_id, course_title, community_id";

/// Insert an unread notification.
pub async fn insert_notification(
    pool: &SqlitePool,
    n: &NewNotification<'_>,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO notifications (id, user_id, kind, message, read, sender_id, course_id, \
         student_id, tutor_id, course_title, community_id) \
         VALUES (?, ?, ?, ?, 0, ?, ?, ?, ?, ?, ?)",
    )
    .bind(n.id)
    .bind(n.user_id)
    .bind(n.kind)
    .bind(n.message)
    .bind(n.sender_id)
    .bind(n.course_id)
    .bind(n.student_id)
    .bind(n.tutor_id)
    .bind(n.course_title)
    .bind(n.community_id)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn get_notification(
    pool: &SqlitePool,
    id: &str,
) -> Result<Option<NotificationRow>, sqlx::Error> {
    sqlx::query_as::<_, NotificationRow>(&format!(
        "SELECT {NOTIFICATION_COLUMNS} FROM notifications WHERE id = ?"
    ))
    .bind(id)
    .fetch_optional(pool)
    .await
}

/// A user's notifications, newest first.
pub async fn list_for_user(
    pool: &SqlitePool,
    user_id: &str,
) -> Result<Vec<NotificationRow>, sqlx::Error> {
    sqlx::query_as::<_, NotificationRow>(&format!(
        "SELECT {NOTIFICATION_COLUMNS} FROM notifications \
         WHERE user_id = ? ORDER BY created_at DESC, rowid DESC"
    ))
    .bind(user_id)
    .fetch_all(pool)
    .await
}

/// Mark one notification read. Returns false if it does not exist.
pub async fn mark_read(pool: &SqlitePool, id: &str) -> Result<bool, sqlx::Error> {
    let result = sqlx::query("UPDATE notifications SET read = 1 WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

/// Mark every unread notification of a user read. Returns how many changed.
pub async fn mark_all_read(pool: &SqlitePool, user_id: &str) -> Result<u64, sqlx::Error> {
    let result = sqlx::query("UPDATE notifications SET read = 1 WHERE user_id = ? AND read = 0")
        .bind(user_id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}

/// Delete all notifications of a user. Returns how many were removed.
pub async fn delete_all_for_user(pool: &SqlitePool, user_id: &str) -> Result<u64, sqlx::Error> {
    let result = sqlx::query("DELETE FROM notifications WHERE user_id = ?")
        .bind(user_id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}
