//! Message and notification side effects.
//! Both are plain datastore rows consumed by the UI layer; the writers run
//! inside the caller's transaction so a failed settlement step never leaves
//! a dangling notification.
// region:    --- Imports
use sqlx::{Postgres, Transaction};

// endregion: --- Imports

// region:    --- Writers

/// Insert a direct message between two users, optionally tied to a listing.
pub async fn send_message(
    tx: &mut Transaction<'_, Postgres>,
    sender_id: i64,
    receiver_id: i64,
    product_id: Option<i64>,
    content: &str,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO messages (sender_id, receiver_id, product_id, content, is_read)
         VALUES ($1, $2, $3, $4, FALSE)",
    )
    .bind(sender_id)
    .bind(receiver_id)
    .bind(product_id)
    .bind(content)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

/// Insert a notification for a user.
pub async fn send_notification(
    tx: &mut Transaction<'_, Postgres>,
    user_id: i64,
    product_id: Option<i64>,
    kind: &str,
    title: &str,
    message: &str,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO notifications (user_id, product_id, type, title, message)
         VALUES ($1, $2, $3, $4, $5)",
    )
    .bind(user_id)
    .bind(product_id)
    .bind(kind)
    .bind(title)
    .bind(message)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

// endregion: --- Writers
