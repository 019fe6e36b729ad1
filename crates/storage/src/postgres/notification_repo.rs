//! Notification repository implementation for PostgreSQL.

use async_trait::async_trait;
use sqlx::PgPool;

use gavel_core::error::{StorageError, StorageResult};
use gavel_core::models::{Address, Notification};
use gavel_core::ports::NotificationRepository;

use super::database::Database;
use super::helpers::{bytes_to_address, map_query_err};

/// PostgreSQL implementation of NotificationRepository.
pub struct PgNotificationRepository {
    pool: PgPool,
}

impl PgNotificationRepository {
    pub fn new(db: &Database) -> Self {
        Self {
            pool: db.pool().clone(),
        }
    }
}

#[async_trait]
impl NotificationRepository for PgNotificationRepository {
    async fn insert_notification(&self, notification: &Notification) -> StorageResult<()> {
        sqlx::query(
            r#"
            INSERT INTO notifications (auction, recipient, message, read, created_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(&notification.auction.0[..])
        .bind(&notification.recipient.0[..])
        .bind(&notification.message)
        .bind(notification.read)
        .bind(notification.created_at)
        .execute(&self.pool)
        .await
        .map_err(map_query_err)?;

        Ok(())
    }

    async fn insert_notifications(&self, notifications: &[Notification]) -> StorageResult<()> {
        if notifications.is_empty() {
            return Ok(());
        }

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StorageError::TransactionError(e.to_string()))?;

        for notification in notifications {
            sqlx::query(
                r#"
                INSERT INTO notifications (auction, recipient, message, read, created_at)
                VALUES ($1, $2, $3, $4, $5)
                "#,
            )
            .bind(&notification.auction.0[..])
            .bind(&notification.recipient.0[..])
            .bind(&notification.message)
            .bind(notification.read)
            .bind(notification.created_at)
            .execute(&mut *tx)
            .await
            .map_err(map_query_err)?;
        }

        tx.commit()
            .await
            .map_err(|e| StorageError::TransactionError(e.to_string()))?;

        Ok(())
    }

    async fn list_for_recipient(&self, recipient: &Address) -> StorageResult<Vec<Notification>> {
        let rows: Vec<NotificationRow> = sqlx::query_as(
            r#"
            SELECT auction, recipient, message, read, created_at
            FROM notifications
            WHERE recipient = $1
            ORDER BY created_at DESC, id DESC
            "#,
        )
        .bind(&recipient.0[..])
        .fetch_all(&self.pool)
        .await
        .map_err(map_query_err)?;

        rows.into_iter()
            .map(NotificationRow::into_notification)
            .collect()
    }
}

/// Database row representation for Notification.
#[derive(sqlx::FromRow)]
struct NotificationRow {
    auction: Vec<u8>,
    recipient: Vec<u8>,
    message: String,
    read: bool,
    created_at: chrono::DateTime<chrono::Utc>,
}

impl NotificationRow {
    fn into_notification(self) -> StorageResult<Notification> {
        Ok(Notification {
            auction: bytes_to_address(self.auction, "notification.auction")?,
            recipient: bytes_to_address(self.recipient, "notification.recipient")?,
            message: self.message,
            read: self.read,
            created_at: self.created_at,
        })
    }
}
