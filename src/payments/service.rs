//! Synchronous payment operations: idempotent creation, lookup, listing,
//! cancellation, and inbound provider callback handling.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::Client;
use sqlx::types::Json;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::PaymentsConfig;
use crate::database::callback_repository::{
    PaymentCallback, PAYMENT_CALLBACK_PROCESSED, PAYMENT_CALLBACK_REJECTED,
};
use crate::database::event_repository::PaymentEvent;
use crate::database::payment_repository::{Payment, PaymentFilter};
use crate::database::repository::{PaymentCallbackStore, PaymentEventStore, PaymentStore};
use crate::error::{AppError, AppResult};
use crate::payments::traits::ProviderRegistry;
use crate::payments::types::{
    truncate_error, CallbackDeliveryStatus, CreateInput, PaymentMethod, PaymentStatus,
    PaymentType, ProviderKind,
};

const DEFAULT_LIST_LIMIT: i64 = 100;
const ERROR_TRUNCATE_BYTES: usize = 1024;

/// Create operation input, already decoded by the transport.
#[derive(Debug, Clone)]
pub struct CreatePaymentInput {
    pub request_id: String,
    pub caller_service: String,
    pub resource_type: String,
    pub resource_id: String,
    pub customer_ref: Option<String>,
    pub amount_cents: i64,
    pub currency: String,
    pub payment_method: PaymentMethod,
    pub payment_type: PaymentType,
    pub provider: Option<ProviderKind>,
    pub recurring_interval: Option<String>,
    pub recurring_interval_count: Option<i32>,
    pub status_callback_url: String,
    pub success_url: Option<String>,
    pub cancel_url: Option<String>,
    pub metadata: HashMap<String, String>,
}

#[derive(Debug, Clone, Default)]
pub struct ListPaymentsInput {
    pub request_id: Option<String>,
    pub caller_service: Option<String>,
    pub resource_type: Option<String>,
    pub resource_id: Option<String>,
    pub status: Option<PaymentStatus>,
    pub provider: Option<ProviderKind>,
    pub limit: i64,
    pub offset: i64,
}

/// Inbound provider webhook, as routed by the transport.
#[derive(Debug, Clone)]
pub struct HandleCallbackInput {
    pub provider: String,
    pub callback_hash: String,
    pub signature: String,
    pub payload: Vec<u8>,
}

/// Owns the payment lifecycle. Collaborators are injected; there is no
/// global state.
pub struct PaymentService {
    pub(crate) payments: Arc<dyn PaymentStore>,
    pub(crate) events: Arc<dyn PaymentEventStore>,
    pub(crate) callbacks: Arc<dyn PaymentCallbackStore>,
    pub(crate) providers: ProviderRegistry,
    pub(crate) cfg: PaymentsConfig,
    pub(crate) app_api_key: String,
    pub(crate) callback_http: Client,
}

impl PaymentService {
    pub fn new(
        payments: Arc<dyn PaymentStore>,
        events: Arc<dyn PaymentEventStore>,
        callbacks: Arc<dyn PaymentCallbackStore>,
        providers: ProviderRegistry,
        cfg: PaymentsConfig,
        app_api_key: &str,
    ) -> Self {
        let timeout = if cfg.callback_http_timeout.is_zero() {
            Duration::from_secs(10)
        } else {
            cfg.callback_http_timeout
        };

        let callback_http = Client::builder()
            .timeout(timeout)
            .build()
            .expect("Failed to create HTTP client");

        Self {
            payments,
            events,
            callbacks,
            providers,
            cfg,
            app_api_key: app_api_key.trim().to_string(),
            callback_http,
        }
    }

    /// Idempotent by (caller_service, request_id): a repeated request returns
    /// the existing payment unchanged, with no provider call and no event.
    pub async fn create_payment(&self, input: &CreatePaymentInput) -> AppResult<Payment> {
        let request_id = input.request_id.trim().to_string();
        let caller_service = input.caller_service.trim().to_string();
        if request_id.is_empty() || caller_service.is_empty() {
            return Err(AppError::InvalidRequest(
                "request_id and caller_service are required".to_string(),
            ));
        }

        if let Some(existing) = self
            .payments
            .find_by_caller_request_id(&caller_service, &request_id)
            .await?
        {
            return Ok(existing);
        }

        let provider_kind = input.provider.unwrap_or(ProviderKind::Stripe);
        let provider = self.providers.get(provider_kind)?;

        let callback_hash = Uuid::new_v4().to_string();
        let customer_ref = input.customer_ref.as_deref().and_then(normalize_optional);
        let recurring_interval = input
            .recurring_interval
            .as_deref()
            .and_then(|v| normalize_optional(&v.to_lowercase()));
        let recurring_interval_count = input.recurring_interval_count.filter(|count| *count > 0);
        let metadata = input.metadata.clone();

        let output = provider
            .create_payment(&CreateInput {
                request_id: request_id.clone(),
                callback_hash: callback_hash.clone(),
                resource_type: input.resource_type.trim().to_string(),
                resource_id: input.resource_id.trim().to_string(),
                amount_cents: input.amount_cents,
                currency: input.currency.trim().to_uppercase(),
                payment_method: input.payment_method,
                payment_type: input.payment_type,
                recurring_interval: recurring_interval.clone(),
                recurring_interval_count,
                customer_ref: customer_ref.clone(),
                metadata: metadata.clone(),
                success_url: input.success_url.as_deref().and_then(normalize_optional),
                cancel_url: input.cancel_url.as_deref().and_then(normalize_optional),
            })
            .await?;

        let now = Utc::now();
        let mut payment = Payment {
            id: 0,
            request_id,
            caller_service,
            resource_type: input.resource_type.trim().to_string(),
            resource_id: input.resource_id.trim().to_string(),
            customer_ref,
            amount_cents: input.amount_cents,
            currency: input.currency.trim().to_uppercase(),
            status: output.initial_status,
            payment_method: input.payment_method,
            payment_type: input.payment_type,
            provider: provider_kind,
            recurring_interval,
            recurring_interval_count,
            provider_payment_id: output.provider_payment_id,
            provider_subscription_id: output.provider_subscription_id,
            checkout_url: output.checkout_url,
            provider_callback_hash: callback_hash,
            provider_callback_url: output.provider_callback_url,
            status_callback_url: input.status_callback_url.trim().to_string(),
            refunded_cents: 0,
            refundable_cents: input.amount_cents,
            metadata: Json(metadata),
            callback_delivery_status: CallbackDeliveryStatus::None,
            callback_delivery_attempts: 0,
            callback_delivery_next_at: None,
            callback_delivery_last_err: None,
            created_at: now,
            updated_at: now,
        };

        if payment.status.is_terminal() {
            self.mark_for_callback_delivery(&mut payment, now);
        }

        let payment = match self.payments.create(&payment).await {
            Ok(created) => created,
            Err(err) if err.is_unique_violation() => return Err(AppError::PaymentAlreadyExists),
            Err(err) => return Err(err.into()),
        };

        self.record_event(PaymentEvent {
            id: 0,
            payment_id: payment.id,
            event_type: "payment_created".to_string(),
            old_status: None,
            new_status: payment.status,
            provider_event_id: None,
            payload_json: None,
            created_at: now,
        })
        .await;

        info!(
            payment_id = payment.id,
            caller_service = %payment.caller_service,
            provider = %payment.provider.tag(),
            "payment created"
        );

        Ok(payment)
    }

    pub async fn get_payment(&self, id: i64) -> AppResult<Payment> {
        self.payments
            .find_by_id(id)
            .await?
            .ok_or(AppError::PaymentNotFound)
    }

    pub async fn list_payments(&self, input: &ListPaymentsInput) -> AppResult<Vec<Payment>> {
        let limit = if input.limit <= 0 {
            DEFAULT_LIST_LIMIT
        } else {
            input.limit
        };

        let filter = PaymentFilter {
            request_id: input.request_id.as_deref().and_then(normalize_optional),
            caller_service: input.caller_service.as_deref().and_then(normalize_optional),
            resource_type: input.resource_type.as_deref().and_then(normalize_optional),
            resource_id: input.resource_id.as_deref().and_then(normalize_optional),
            status: input.status,
            provider: input.provider,
            limit,
            offset: input.offset.max(0),
        };

        Ok(self.payments.list(&filter).await?)
    }

    pub async fn cancel_payment(&self, id: i64, reason: &str) -> AppResult<Payment> {
        let mut payment = self
            .payments
            .find_by_id(id)
            .await?
            .ok_or(AppError::PaymentNotFound)?;

        if payment.status == PaymentStatus::Paid {
            return Err(AppError::InvalidStatus(
                "paid payments cannot be canceled".to_string(),
            ));
        }

        let now = Utc::now();
        let old_status = payment.status;
        payment.status = PaymentStatus::Canceled;
        self.mark_for_callback_delivery(&mut payment, now);
        payment.updated_at = now;

        let payment = match self.payments.update(&payment).await {
            Ok(updated) => updated,
            Err(err) if err.is_not_found() => return Err(AppError::PaymentNotFound),
            Err(err) => return Err(err.into()),
        };

        self.record_event(PaymentEvent {
            id: 0,
            payment_id: payment.id,
            event_type: "payment_canceled".to_string(),
            old_status: Some(old_status),
            new_status: payment.status,
            provider_event_id: None,
            payload_json: None,
            created_at: now,
        })
        .await;

        info!(payment_id = payment.id, reason = %reason.trim(), "payment canceled");

        Ok(payment)
    }

    /// Routes a provider webhook to its payment via the callback hash,
    /// applies the decoded event, and audits the callback either way.
    pub async fn handle_provider_callback(&self, req: &HandleCallbackInput) -> AppResult<Payment> {
        let provider_kind =
            ProviderKind::parse_tag(&req.provider).ok_or(AppError::ProviderUnsupported)?;
        let provider = self.providers.get(provider_kind)?;

        let signature = req.signature.trim();
        let event = match provider
            .verify_and_parse_callback(&req.payload, signature)
            .await
        {
            Ok(event) => event,
            Err(err) => {
                self.persist_rejected_callback(
                    req,
                    &format!("provider callback validation failed: {}", err),
                )
                .await;
                return Err(AppError::CallbackRejected);
            }
        };

        let callback_hash = req.callback_hash.trim();
        let Some(mut payment) = self
            .payments
            .find_by_callback_hash(provider_kind, callback_hash)
            .await?
        else {
            self.persist_rejected_callback(req, "payment not found for callback hash")
                .await;
            return Err(AppError::PaymentNotFound);
        };

        let now = Utc::now();
        let old_status = payment.status;

        if event.provider_payment_id.is_some() {
            payment.provider_payment_id = event.provider_payment_id.clone();
        }
        if event.provider_subscription_id.is_some() {
            payment.provider_subscription_id = event.provider_subscription_id.clone();
        }
        // Terminal statuses are final; a late or replayed webhook never
        // rewrites them.
        if let Some(new_status) = event.new_status {
            if !payment.status.is_terminal() {
                payment.status = new_status;
            }
        }

        if payment.status != old_status && payment.status.is_terminal() {
            self.mark_for_callback_delivery(&mut payment, now);
        }

        payment.updated_at = now;
        let payment = match self.payments.update(&payment).await {
            Ok(updated) => updated,
            Err(err) if err.is_not_found() => return Err(AppError::PaymentNotFound),
            Err(err) => return Err(err.into()),
        };

        let event_type = if event.event_type.trim().is_empty() {
            "provider_callback".to_string()
        } else {
            event.event_type.trim().to_string()
        };

        let payload_json = String::from_utf8_lossy(&req.payload).into_owned();
        self.record_event(PaymentEvent {
            id: 0,
            payment_id: payment.id,
            event_type,
            old_status: (old_status != payment.status).then_some(old_status),
            new_status: payment.status,
            provider_event_id: event.provider_event_id.clone(),
            payload_json: Some(payload_json.clone()),
            created_at: now,
        })
        .await;

        // A processed webhook must leave an audit row; failing to write it
        // fails the request so the provider retries.
        self.callbacks
            .create(&PaymentCallback {
                id: 0,
                payment_id: Some(payment.id),
                provider: req.provider.trim().to_lowercase(),
                callback_hash: callback_hash.to_string(),
                signature: signature.to_string(),
                payload_json,
                status: PAYMENT_CALLBACK_PROCESSED,
                error: None,
                created_at: now,
                updated_at: now,
            })
            .await?;

        Ok(payment)
    }

    /// Arms the delivery sub-state: the payment becomes a candidate for the
    /// next dispatch batch.
    pub(crate) fn mark_for_callback_delivery(&self, payment: &mut Payment, now: DateTime<Utc>) {
        payment.callback_delivery_status = CallbackDeliveryStatus::Pending;
        payment.callback_delivery_attempts = 0;
        payment.callback_delivery_next_at = Some(now);
        payment.callback_delivery_last_err = None;
    }

    pub(crate) fn batch_size(&self) -> i64 {
        if self.cfg.job_batch_size > 0 {
            self.cfg.job_batch_size
        } else {
            100
        }
    }

    /// Event-log writes are best-effort; a failure is logged and swallowed.
    pub(crate) async fn record_event(&self, event: PaymentEvent) {
        if let Err(err) = self.events.create(&event).await {
            warn!(
                payment_id = event.payment_id,
                event_type = %event.event_type,
                "failed to record payment event: {}", err
            );
        }
    }

    async fn persist_rejected_callback(&self, req: &HandleCallbackInput, reason: &str) {
        let now = Utc::now();
        let reason = reason.trim();
        let reason = if reason.is_empty() {
            "callback rejected"
        } else {
            reason
        };

        let callback = PaymentCallback {
            id: 0,
            payment_id: None,
            provider: req.provider.trim().to_lowercase(),
            callback_hash: req.callback_hash.trim().to_string(),
            signature: req.signature.trim().to_string(),
            payload_json: String::from_utf8_lossy(&req.payload).into_owned(),
            status: PAYMENT_CALLBACK_REJECTED,
            error: Some(truncate_error(reason, ERROR_TRUNCATE_BYTES)),
            created_at: now,
            updated_at: now,
        };

        if let Err(err) = self.callbacks.create(&callback).await {
            warn!(
                provider = %callback.provider,
                callback_hash = %callback.callback_hash,
                "failed to record rejected callback: {}", err
            );
        }
    }
}

fn normalize_optional(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}
