use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::database::callback_repository::PaymentCallback;
use crate::database::error::DbResult;
use crate::database::event_repository::PaymentEvent;
use crate::database::payment_repository::{Payment, PaymentFilter};
use crate::payments::types::ProviderKind;

/// Persistence contract for payments. The service layer only speaks this
/// trait; the sqlx repository and the in-memory test stores both satisfy it.
#[async_trait]
pub trait PaymentStore: Send + Sync {
    /// Inserts a new payment and returns it with its assigned id.
    /// A (caller_service, request_id) collision surfaces as a unique-violation error.
    async fn create(&self, payment: &Payment) -> DbResult<Payment>;

    /// Updates an existing payment by id; not-found when no row matched.
    async fn update(&self, payment: &Payment) -> DbResult<Payment>;

    async fn find_by_id(&self, id: i64) -> DbResult<Option<Payment>>;

    async fn find_by_caller_request_id(
        &self,
        caller_service: &str,
        request_id: &str,
    ) -> DbResult<Option<Payment>>;

    async fn find_by_callback_hash(
        &self,
        provider: ProviderKind,
        callback_hash: &str,
    ) -> DbResult<Option<Payment>>;

    async fn list(&self, filter: &PaymentFilter) -> DbResult<Vec<Payment>>;

    /// Payments whose armed delivery is due at `now`, ordered by due time.
    async fn list_due_callback_dispatch(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> DbResult<Vec<Payment>>;

    /// Pending/processing payments created at or before `cutoff`.
    async fn list_expired_pending(
        &self,
        cutoff: DateTime<Utc>,
        limit: i64,
    ) -> DbResult<Vec<Payment>>;

    /// Pending/processing payments with a provider payment id, untouched
    /// since `before`.
    async fn list_for_reconcile(
        &self,
        before: DateTime<Utc>,
        limit: i64,
    ) -> DbResult<Vec<Payment>>;
}

/// Append-only audit of payment lifecycle events.
#[async_trait]
pub trait PaymentEventStore: Send + Sync {
    async fn create(&self, event: &PaymentEvent) -> DbResult<PaymentEvent>;
}

/// Append-only audit of inbound provider callbacks.
#[async_trait]
pub trait PaymentCallbackStore: Send + Sync {
    async fn create(&self, callback: &PaymentCallback) -> DbResult<PaymentCallback>;
}
