//! Leased message queue stored in Postgres.
//!
//! Messages live in `task_messages` until committed. A fetch leases the oldest
//! message whose key has no older pending message, which keeps per-key order.
//! Leases that lapse make the message deliverable again.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use sqlx::postgres::PgPool;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::application::channel::{ChannelError, Delivery, MessageChannel};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelOptions {
    pub topic: String,
    pub group: String,
    pub consumer_id: String,
    pub lease: Duration,
    pub fetch_wait: Duration,
    pub poll_interval: Duration,
}

#[derive(sqlx::FromRow)]
struct LeasedRow {
    id: i64,
    message_key: String,
    payload: Vec<u8>,
    attempts: i32,
}

#[derive(Clone)]
pub struct PostgresChannel {
    pool: PgPool,
    options: ChannelOptions,
    lease_owner: String,
}

impl PostgresChannel {
    pub fn new(pool: PgPool, options: ChannelOptions) -> Self {
        let lease_owner = format!("{}/{}", options.group, options.consumer_id);
        Self {
            pool,
            options,
            lease_owner,
        }
    }

    async fn try_lease(&self) -> Result<Option<Delivery>, ChannelError> {
        let row = sqlx::query_as::<_, LeasedRow>(
            r#"
            WITH candidate AS (
                SELECT m.id
                FROM task_messages m
                WHERE m.topic = $1
                  AND (m.leased_until IS NULL OR m.leased_until < now())
                  AND NOT EXISTS (
                      SELECT 1
                      FROM task_messages earlier
                      WHERE earlier.topic = m.topic
                        AND earlier.message_key = m.message_key
                        AND earlier.id < m.id
                  )
                ORDER BY m.id
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            UPDATE task_messages t
            SET leased_by = $2,
                leased_until = now() + make_interval(secs => $3),
                attempts = t.attempts + 1
            FROM candidate
            WHERE t.id = candidate.id
            RETURNING t.id, t.message_key, t.payload, t.attempts
            "#,
        )
        .bind(&self.options.topic)
        .bind(&self.lease_owner)
        .bind(self.options.lease.as_secs_f64())
        .fetch_optional(&self.pool)
        .await
        .map_err(map_channel_error)?;

        Ok(row.map(|row| {
            if row.attempts > 1 {
                warn!(
                    message_id = row.id,
                    key = %row.message_key,
                    attempt = row.attempts,
                    "redelivering message after lease expiry"
                );
                metrics::counter!("imgproc_channel_redeliveries_total").increment(1);
            }
            Delivery {
                id: row.id,
                key: row.message_key,
                payload: Bytes::from(row.payload),
                attempt: row.attempts,
            }
        }))
    }
}

#[async_trait]
impl MessageChannel for PostgresChannel {
    async fn publish(&self, key: &str, payload: Bytes) -> Result<(), ChannelError> {
        sqlx::query(
            r#"
            INSERT INTO task_messages (topic, message_key, payload)
            VALUES ($1, $2, $3)
            "#,
        )
        .bind(&self.options.topic)
        .bind(key)
        .bind(payload.as_ref())
        .execute(&self.pool)
        .await
        .map_err(map_channel_error)?;

        debug!(topic = %self.options.topic, key, "published message");
        Ok(())
    }

    async fn fetch(&self) -> Result<Option<Delivery>, ChannelError> {
        let deadline = Instant::now() + self.options.fetch_wait;
        loop {
            if let Some(delivery) = self.try_lease().await? {
                return Ok(Some(delivery));
            }
            if Instant::now() + self.options.poll_interval > deadline {
                return Ok(None);
            }
            tokio::time::sleep(self.options.poll_interval).await;
        }
    }

    async fn commit(&self, delivery: &Delivery) -> Result<(), ChannelError> {
        let result = sqlx::query(
            r#"
            DELETE FROM task_messages
            WHERE id = $1 AND leased_by = $2
            "#,
        )
        .bind(delivery.id)
        .bind(&self.lease_owner)
        .execute(&self.pool)
        .await
        .map_err(map_channel_error)?;

        if result.rows_affected() == 0 {
            warn!(
                message_id = delivery.id,
                "message was already committed or leased by another consumer"
            );
        }
        Ok(())
    }
}

fn map_channel_error(err: sqlx::Error) -> ChannelError {
    match err {
        sqlx::Error::PoolClosed => ChannelError::Closed,
        other => ChannelError::transport(other),
    }
}
