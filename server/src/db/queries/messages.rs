use sqlx::SqlitePool;

use crate::db::models::{MessageRow, NewMessage, ReactionRow};

const MESSAGE_COLUMNS: &str =
    "id, channel_ref, sender, content, timestamp, status, image_url, created_at";

/// Insert a new message with status `sent`.
pub async fn insert_message(pool: &SqlitePool, msg: &NewMessage<'_>) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO messages (id, channel_ref, sender, content, timestamp, status, image_url) \
         VALUES (?, ?, ?, ?, ?, 'sent', ?)",
    )
    .bind(msg.id)
    .bind(msg.channel_ref)
    .bind(msg.sender)
    .bind(msg.content)
    .bind(msg.timestamp)
    .bind(msg.image_url)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn get_message(pool: &SqlitePool, id: &str) -> Result<Option<MessageRow>, sqlx::Error> {
    sqlx::query_as::<_, MessageRow>(&format!(
        "SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = ?"
    ))
    .bind(id)
    .fetch_optional(pool)
    .await
}

/// Move a message forward to `status`. Never regresses: a message already at
/// or past `status` is left untouched. Returns true if the row changed.
pub async fn advance_status(
    pool: &SqlitePool,
    id: &str,
    status: &str,
    rank: i64,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        "UPDATE messages SET status = ? \
         WHERE id = ? \
           AND (CASE status WHEN 'sent' THEN 0 WHEN 'delivered' THEN 1 ELSE 2 END) < ?",
    )
    .bind(status)
    .bind(id)
    .bind(rank)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}

/// Hard-delete a message and its reactions. Returns true if a message was removed.
pub async fn delete_message(pool: &SqlitePool, id: &str) -> Result<bool, sqlx::Error> {
    sqlx::query("DELETE FROM message_reactions WHERE message_id = ?")
        .bind(id)
        .execute(pool)
        .await?;
    let result = sqlx::query("DELETE FROM messages WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

/// Set-insert a reaction. Adding an existing (user, emoji) pair is a no-op.
pub async fn add_reaction(
    pool: &SqlitePool,
    message_id: &str,
    user_id: &str,
    emoji: &str,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT OR IGNORE INTO message_reactions (message_id, user_id, emoji) VALUES (?, ?, ?)",
    )
    .bind(message_id)
    .bind(user_id)
    .bind(emoji)
    .execute(pool)
    .await?;
    Ok(())
}

/// Set-delete a reaction. Removing an absent pair is a no-op.
pub async fn remove_reaction(
    pool: &SqlitePool,
    message_id: &str,
    user_id: &str,
    emoji: &str,
) -> Result<(), sqlx::Error> {
    sqlx::query("DELETE FROM message_reactions WHERE message_id = ? AND user_id = ? AND emoji = ?")
        .bind(message_id)
        .bind(user_id)
        .bind(emoji)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn list_reactions(
    pool: &SqlitePool,
    message_id: &str,
) -> Result<Vec<ReactionRow>, sqlx::Error> {
    sqlx::query_as::<_, ReactionRow>(
        "SELECT message_id, user_id, emoji FROM message_reactions \
         WHERE message_id = ? ORDER BY created_at, user_id, emoji",
    )
    .bind(message_id)
    .fetch_all(pool)
    .await
}

/// All reactions on all messages of a channel, for history payloads.
pub async fn list_channel_reactions(
    pool: &SqlitePool,
    channel_ref: &str,
) -> Result<Vec<ReactionRow>, sqlx::Error> {
    sqlx::query_as::<_, ReactionRow>(
        "SELECT r.message_id, r.user_id, r.emoji FROM message_reactions r \
         JOIN messages m ON m.id = r.message_id \
         WHERE m.channel_ref = ? ORDER BY r.created_at, r.user_id, r.emoji",
    )
    .bind(channel_ref)
    .fetch_all(pool)
    .await
}

/// The most recent `limit` messages of a channel, returned oldest first.
pub async fn fetch_channel_history(
    pool: &SqlitePool,
    channel_ref: &str,
    limit: i64,
) -> Result<Vec<MessageRow>, sqlx::Error> {
    let mut rows = sqlx::query_as::<_, MessageRow>(&format!(
        "SELECT {MESSAGE_COLUMNS} FROM messages \
         WHERE channel_ref = ? \
         ORDER BY created_at DESC, rowid DESC \
         LIMIT ?"
    ))
    .bind(channel_ref)
    .bind(limit)
    .fetch_all(pool)
    .await?;
    rows.reverse();
    Ok(rows)
}

/// The newest message of a channel, if any.
pub async fn latest_message(
    pool: &SqlitePool,
    channel_ref: &str,
) -> Result<Option<MessageRow>, sqlx::Error> {
    sqlx::query_as::<_, MessageRow>(&format!(
        "SELECT {MESSAGE_COLUMNS} FROM messages \
         WHERE channel_ref = ? \
         ORDER BY created_at DESC, rowid DESC \
         LIMIT 1"
    ))
    .bind(channel_ref)
    .fetch_optional(pool)
    .await
}

/// Distinct private-chat channel refs whose last segment is `tutor_id`.
/// Matches on the suffix rather than LIKE so `_` in ids is not a wildcard.
pub async fn private_channel_refs_for_tutor(
    pool: &SqlitePool,
    tutor_id: &str,
) -> Result<Vec<String>, sqlx::Error> {
    sqlx::query_scalar(
        "SELECT DISTINCT channel_ref FROM messages \
         WHERE substr(channel_ref, 1, 8) = 'private:' \
           AND substr(channel_ref, length(channel_ref) - length(?1)) = ':' || ?1",
    )
    .bind(tutor_id)
    .fetch_all(pool)
    .await
}
