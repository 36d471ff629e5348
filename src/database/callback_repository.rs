use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};

use crate::database::error::{DatabaseError, DbResult};
use crate::database::repository::PaymentCallbackStore;

pub const PAYMENT_CALLBACK_PROCESSED: i32 = 10;
pub const PAYMENT_CALLBACK_REJECTED: i32 = 20;

/// Audit row for an inbound provider webhook. `payment_id` is nullable:
/// rejected callbacks may not resolve to a payment.
#[derive(Debug, Clone, FromRow)]
pub struct PaymentCallback {
    pub id: i64,

    pub payment_id: Option<i64>,

    pub provider: String,
    pub callback_hash: String,
    pub signature: String,
    pub payload_json: String,
    pub status: i32,
    pub error: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Repository for the payment_callbacks table.
pub struct PaymentCallbackRepository {
    pool: PgPool,
}

impl PaymentCallbackRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PaymentCallbackStore for PaymentCallbackRepository {
    async fn create(&self, callback: &PaymentCallback) -> DbResult<PaymentCallback> {
        sqlx::query_as::<_, PaymentCallback>(
            "INSERT INTO payment_callbacks (
                payment_id, provider, callback_hash, signature, payload_json, status, error, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING id, payment_id, provider, callback_hash, signature, payload_json, status, error, created_at, updated_at",
        )
        .bind(callback.payment_id)
        .bind(&callback.provider)
        .bind(&callback.callback_hash)
        .bind(&callback.signature)
        .bind(&callback.payload_json)
        .bind(callback.status)
        .bind(&callback.error)
        .bind(&callback.created_at)
        .bind(&callback.updated_at)
        .fetch_one(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }
}
