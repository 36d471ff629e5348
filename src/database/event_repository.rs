use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};

use crate::database::error::{DatabaseError, DbResult};
use crate::database::repository::PaymentEventStore;
use crate::payments::types::PaymentStatus;

/// Append-only lifecycle audit row. `old_status` is absent when the event
/// did not change the payment status.
#[derive(Debug, Clone, FromRow)]
pub struct PaymentEvent {
    pub id: i64,

    pub payment_id: i64,

    pub event_type: String,

    pub old_status: Option<PaymentStatus>,
    pub new_status: PaymentStatus,

    pub provider_event_id: Option<String>,
    pub payload_json: Option<String>,

    pub created_at: DateTime<Utc>,
}

/// Repository for the payment_events table.
pub struct PaymentEventRepository {
    pool: PgPool,
}

impl PaymentEventRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PaymentEventStore for PaymentEventRepository {
    async fn create(&self, event: &PaymentEvent) -> DbResult<PaymentEvent> {
        sqlx::query_as::<_, PaymentEvent>(
            "INSERT INTO payment_events (
                payment_id, event_type, old_status, new_status, provider_event_id, payload_json, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING id, payment_id, event_type, old_status, new_status, provider_event_id, payload_json, created_at",
        )
        .bind(event.payment_id)
        .bind(&event.event_type)
        .bind(event.old_status)
        .bind(event.new_status)
        .bind(&event.provider_event_id)
        .bind(&event.payload_json)
        .bind(event.created_at)
        .fetch_one(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }
}
