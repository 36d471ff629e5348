use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::{FromRow, PgPool, Postgres, QueryBuilder};
use std::collections::HashMap;

use crate::database::error::{DatabaseError, DbResult};
use crate::database::repository::PaymentStore;
use crate::payments::types::{
    CallbackDeliveryStatus, PaymentMethod, PaymentStatus, PaymentType, ProviderKind,
};

/// Payment aggregate root. Mutated only through the repository.
#[derive(Debug, Clone, FromRow)]
pub struct Payment {
    pub id: i64,

    pub request_id: String,
    pub caller_service: String,

    pub resource_type: String,
    pub resource_id: String,
    pub customer_ref: Option<String>,

    pub amount_cents: i64,
    pub currency: String,

    pub status: PaymentStatus,
    pub payment_method: PaymentMethod,
    pub payment_type: PaymentType,
    pub provider: ProviderKind,

    pub recurring_interval: Option<String>,
    pub recurring_interval_count: Option<i32>,

    pub provider_payment_id: Option<String>,
    pub provider_subscription_id: Option<String>,
    pub checkout_url: Option<String>,

    pub provider_callback_hash: String,
    pub provider_callback_url: String,

    pub status_callback_url: String,

    pub refunded_cents: i64,
    pub refundable_cents: i64,

    pub metadata: Json<HashMap<String, String>>,

    pub callback_delivery_status: CallbackDeliveryStatus,
    pub callback_delivery_attempts: i32,
    pub callback_delivery_next_at: Option<DateTime<Utc>>,
    #[sqlx(rename = "callback_delivery_last_error")]
    pub callback_delivery_last_err: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Filter for listing payments. Absent fields do not constrain the result.
#[derive(Debug, Clone, Default)]
pub struct PaymentFilter {
    pub request_id: Option<String>,
    pub caller_service: Option<String>,
    pub resource_type: Option<String>,
    pub resource_id: Option<String>,
    pub status: Option<PaymentStatus>,
    pub provider: Option<ProviderKind>,
    pub limit: i64,
    pub offset: i64,
}

const PAYMENT_COLUMNS: &str =
    "id, request_id, caller_service, resource_type, resource_id, customer_ref, \
     amount_cents, currency, status, payment_method, payment_type, provider, \
     recurring_interval, recurring_interval_count, \
     provider_payment_id, provider_subscription_id, checkout_url, \
     provider_callback_hash, provider_callback_url, status_callback_url, \
     refunded_cents, refundable_cents, metadata, \
     callback_delivery_status, callback_delivery_attempts, callback_delivery_next_at, callback_delivery_last_error, \
     created_at, updated_at";

/// Repository for the payments table.
pub struct PaymentRepository {
    pool: PgPool,
}

impl PaymentRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PaymentStore for PaymentRepository {
    async fn create(&self, payment: &Payment) -> DbResult<Payment> {
        let query = format!(
            "INSERT INTO payments (
                request_id, caller_service, resource_type, resource_id, customer_ref,
                amount_cents, currency, status, payment_method, payment_type, provider,
                recurring_interval, recurring_interval_count,
                provider_payment_id, provider_subscription_id, checkout_url,
                provider_callback_hash, provider_callback_url, status_callback_url,
                refunded_cents, refundable_cents, metadata,
                callback_delivery_status, callback_delivery_attempts, callback_delivery_next_at, callback_delivery_last_error,
                created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19, $20, $21, $22, $23, $24, $25, $26, $27, $28)
            RETURNING {PAYMENT_COLUMNS}"
        );

        sqlx::query_as::<_, Payment>(&query)
            .bind(&payment.request_id)
            .bind(&payment.caller_service)
            .bind(&payment.resource_type)
            .bind(&payment.resource_id)
            .bind(&payment.customer_ref)
            .bind(payment.amount_cents)
            .bind(&payment.currency)
            .bind(payment.status)
            .bind(payment.payment_method)
            .bind(payment.payment_type)
            .bind(payment.provider)
            .bind(&payment.recurring_interval)
            .bind(payment.recurring_interval_count)
            .bind(&payment.provider_payment_id)
            .bind(&payment.provider_subscription_id)
            .bind(&payment.checkout_url)
            .bind(&payment.provider_callback_hash)
            .bind(&payment.provider_callback_url)
            .bind(&payment.status_callback_url)
            .bind(payment.refunded_cents)
            .bind(payment.refundable_cents)
            .bind(&payment.metadata)
            .bind(payment.callback_delivery_status)
            .bind(payment.callback_delivery_attempts)
            .bind(payment.callback_delivery_next_at)
            .bind(&payment.callback_delivery_last_err)
            .bind(payment.created_at)
            .bind(payment.updated_at)
            .fetch_one(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)
    }

    async fn update(&self, payment: &Payment) -> DbResult<Payment> {
        let query = format!(
            "UPDATE payments SET
                resource_type = $1,
                resource_id = $2,
                customer_ref = $3,
                amount_cents = $4,
                currency = $5,
                status = $6,
                payment_method = $7,
                payment_type = $8,
                provider = $9,
                recurring_interval = $10,
                recurring_interval_count = $11,
                provider_payment_id = $12,
                provider_subscription_id = $13,
                checkout_url = $14,
                provider_callback_url = $15,
                status_callback_url = $16,
                refunded_cents = $17,
                refundable_cents = $18,
                metadata = $19,
                callback_delivery_status = $20,
                callback_delivery_attempts = $21,
                callback_delivery_next_at = $22,
                callback_delivery_last_error = $23,
                updated_at = $24
            WHERE id = $25
            RETURNING {PAYMENT_COLUMNS}"
        );

        let updated = sqlx::query_as::<_, Payment>(&query)
            .bind(&payment.resource_type)
            .bind(&payment.resource_id)
            .bind(&payment.customer_ref)
            .bind(payment.amount_cents)
            .bind(&payment.currency)
            .bind(payment.status)
            .bind(payment.payment_method)
            .bind(payment.payment_type)
            .bind(payment.provider)
            .bind(&payment.recurring_interval)
            .bind(payment.recurring_interval_count)
            .bind(&payment.provider_payment_id)
            .bind(&payment.provider_subscription_id)
            .bind(&payment.checkout_url)
            .bind(&payment.provider_callback_url)
            .bind(&payment.status_callback_url)
            .bind(payment.refunded_cents)
            .bind(payment.refundable_cents)
            .bind(&payment.metadata)
            .bind(payment.callback_delivery_status)
            .bind(payment.callback_delivery_attempts)
            .bind(payment.callback_delivery_next_at)
            .bind(&payment.callback_delivery_last_err)
            .bind(payment.updated_at)
            .bind(payment.id)
            .fetch_optional(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?;

        updated.ok_or_else(DatabaseError::not_found)
    }

    async fn find_by_id(&self, id: i64) -> DbResult<Option<Payment>> {
        let query = format!("SELECT {PAYMENT_COLUMNS} FROM payments WHERE id = $1");
        sqlx::query_as::<_, Payment>(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)
    }

    async fn find_by_caller_request_id(
        &self,
        caller_service: &str,
        request_id: &str,
    ) -> DbResult<Option<Payment>> {
        let query = format!(
            "SELECT {PAYMENT_COLUMNS} FROM payments WHERE caller_service = $1 AND request_id = $2 LIMIT 1"
        );
        sqlx::query_as::<_, Payment>(&query)
            .bind(caller_service)
            .bind(request_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)
    }

    async fn find_by_callback_hash(
        &self,
        provider: ProviderKind,
        callback_hash: &str,
    ) -> DbResult<Option<Payment>> {
        let query = format!(
            "SELECT {PAYMENT_COLUMNS} FROM payments WHERE provider = $1 AND provider_callback_hash = $2 LIMIT 1"
        );
        sqlx::query_as::<_, Payment>(&query)
            .bind(provider)
            .bind(callback_hash)
            .fetch_optional(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)
    }

    async fn list(&self, filter: &PaymentFilter) -> DbResult<Vec<Payment>> {
        let mut builder: QueryBuilder<Postgres> =
            QueryBuilder::new(format!("SELECT {PAYMENT_COLUMNS} FROM payments"));

        let mut separator = " WHERE ";
        if let Some(request_id) = filter.request_id.as_deref() {
            builder.push(separator).push("request_id = ").push_bind(request_id);
            separator = " AND ";
        }
        if let Some(caller_service) = filter.caller_service.as_deref() {
            builder
                .push(separator)
                .push("caller_service = ")
                .push_bind(caller_service);
            separator = " AND ";
        }
        if let Some(resource_type) = filter.resource_type.as_deref() {
            builder
                .push(separator)
                .push("resource_type = ")
                .push_bind(resource_type);
            separator = " AND ";
        }
        if let Some(resource_id) = filter.resource_id.as_deref() {
            builder.push(separator).push("resource_id = ").push_bind(resource_id);
            separator = " AND ";
        }
        if let Some(status) = filter.status {
            builder.push(separator).push("status = ").push_bind(status);
            separator = " AND ";
        }
        if let Some(provider) = filter.provider {
            builder.push(separator).push("provider = ").push_bind(provider);
        }

        builder
            .push(" ORDER BY id DESC LIMIT ")
            .push_bind(filter.limit)
            .push(" OFFSET ")
            .push_bind(filter.offset);

        builder
            .build_query_as::<Payment>()
            .fetch_all(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)
    }

    async fn list_due_callback_dispatch(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> DbResult<Vec<Payment>> {
        let query = format!(
            "SELECT {PAYMENT_COLUMNS} FROM payments
             WHERE callback_delivery_status = $1
               AND callback_delivery_next_at IS NOT NULL
               AND callback_delivery_next_at <= $2
             ORDER BY callback_delivery_next_at ASC
             LIMIT $3"
        );
        sqlx::query_as::<_, Payment>(&query)
            .bind(CallbackDeliveryStatus::Pending)
            .bind(now)
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)
    }

    async fn list_expired_pending(
        &self,
        cutoff: DateTime<Utc>,
        limit: i64,
    ) -> DbResult<Vec<Payment>> {
        let query = format!(
            "SELECT {PAYMENT_COLUMNS} FROM payments
             WHERE status IN ($1, $2)
               AND created_at <= $3
             ORDER BY created_at ASC
             LIMIT $4"
        );
        sqlx::query_as::<_, Payment>(&query)
            .bind(PaymentStatus::Pending)
            .bind(PaymentStatus::Processing)
            .bind(cutoff)
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)
    }

    async fn list_for_reconcile(
        &self,
        before: DateTime<Utc>,
        limit: i64,
    ) -> DbResult<Vec<Payment>> {
        let query = format!(
            "SELECT {PAYMENT_COLUMNS} FROM payments
             WHERE status IN ($1, $2)
               AND provider_payment_id IS NOT NULL
               AND updated_at <= $3
             ORDER BY updated_at ASC
             LIMIT $4"
        );
        sqlx::query_as::<_, Payment>(&query)
            .bind(PaymentStatus::Pending)
            .bind(PaymentStatus::Processing)
            .bind(before)
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)
    }
}
