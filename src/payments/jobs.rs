//! Batch workers: provider reconciliation, pending-payment expiry, and the
//! outbound status-callback dispatcher.
//!
//! Each batch drains at most `job_batch_size` rows and returns the first
//! error encountered while still attempting the rest of the batch.

use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::info;

use crate::database::event_repository::PaymentEvent;
use crate::database::payment_repository::Payment;
use crate::error::{AppError, AppResult};
use crate::payments::service::PaymentService;
use crate::payments::types::{
    truncate_error, CallbackDeliveryStatus, PaymentEnvelope, PaymentStatus, PaymentView,
};

const ERROR_TRUNCATE_BYTES: usize = 1024;

impl PaymentService {
    /// Polls the provider for payments stuck in PENDING/PROCESSING whose row
    /// has not moved since `reconcile_stale_after`.
    pub async fn run_reconcile_batch(&self) -> AppResult<()> {
        let now = Utc::now();
        let before = now - self.cfg.reconcile_stale_after;
        let items = self
            .payments
            .list_for_reconcile(before, self.batch_size())
            .await?;

        let mut first_err: Option<AppError> = None;
        for mut payment in items {
            let provider_payment_id = match payment.provider_payment_id.as_deref() {
                Some(id) if !id.trim().is_empty() => id.trim().to_string(),
                _ => continue,
            };

            let provider = match self.providers.get(payment.provider) {
                Ok(provider) => provider,
                Err(err) => {
                    keep_first_err(&mut first_err, err);
                    continue;
                }
            };

            let new_status = match provider.get_payment_status(&provider_payment_id).await {
                Ok(status) => status,
                Err(err) => {
                    keep_first_err(&mut first_err, err);
                    continue;
                }
            };

            // No mapping or no movement: leave the row for the next tick.
            let Some(new_status) = new_status else { continue };
            if new_status == payment.status {
                continue;
            }

            let old_status = payment.status;
            payment.status = new_status;
            if new_status.is_terminal() {
                self.mark_for_callback_delivery(&mut payment, now);
            }
            payment.updated_at = now;

            let payment = match self.payments.update(&payment).await {
                Ok(updated) => updated,
                Err(err) => {
                    keep_first_err(&mut first_err, err.into());
                    continue;
                }
            };

            self.record_event(PaymentEvent {
                id: 0,
                payment_id: payment.id,
                event_type: "payment_reconciled".to_string(),
                old_status: Some(old_status),
                new_status,
                provider_event_id: None,
                payload_json: None,
                created_at: now,
            })
            .await;

            info!(
                payment_id = payment.id,
                old_status = old_status.code(),
                new_status = new_status.code(),
                "payment reconciled"
            );
        }

        match first_err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Sends due terminal-status notifications to caller services.
    pub async fn run_dispatch_callbacks_batch(&self) -> AppResult<()> {
        let now = Utc::now();
        let items = self
            .payments
            .list_due_callback_dispatch(now, self.batch_size())
            .await?;

        let mut first_err: Option<AppError> = None;
        for payment in items {
            if let Err(err) = self.dispatch_callback(payment, now).await {
                keep_first_err(&mut first_err, err);
            }
        }

        match first_err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Flips PENDING/PROCESSING payments older than `pending_timeout` to
    /// EXPIRED.
    pub async fn run_expire_pending_batch(&self) -> AppResult<()> {
        let now = Utc::now();
        let cutoff = now - self.cfg.pending_timeout;
        let items = self
            .payments
            .list_expired_pending(cutoff, self.batch_size())
            .await?;

        let mut first_err: Option<AppError> = None;
        for mut payment in items {
            if payment.status == PaymentStatus::Expired {
                continue;
            }

            let old_status = payment.status;
            payment.status = PaymentStatus::Expired;
            self.mark_for_callback_delivery(&mut payment, now);
            payment.updated_at = now;

            let payment = match self.payments.update(&payment).await {
                Ok(updated) => updated,
                Err(err) => {
                    keep_first_err(&mut first_err, err.into());
                    continue;
                }
            };

            self.record_event(PaymentEvent {
                id: 0,
                payment_id: payment.id,
                event_type: "payment_expired".to_string(),
                old_status: Some(old_status),
                new_status: payment.status,
                provider_event_id: None,
                payload_json: None,
                created_at: now,
            })
            .await;

            info!(payment_id = payment.id, "pending payment expired");
        }

        match first_err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    async fn dispatch_callback(&self, mut payment: Payment, now: DateTime<Utc>) -> AppResult<()> {
        if payment.status_callback_url.trim().is_empty() {
            payment.callback_delivery_status = CallbackDeliveryStatus::Failed;
            payment.callback_delivery_next_at = None;
            payment.callback_delivery_last_err = Some("status_callback_url is empty".to_string());
            payment.updated_at = now;
            self.payments.update(&payment).await?;
            return Ok(());
        }

        let envelope = PaymentEnvelope {
            payment: PaymentView::from_entity(&payment),
        };

        let mut request = self
            .callback_http
            .post(payment.status_callback_url.trim())
            .header("Content-Type", "application/json")
            .header("X-Request-ID", &payment.request_id)
            .json(&envelope);
        if !self.app_api_key.is_empty() {
            request = request.header("X-API-Key", &self.app_api_key);
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(err) => {
                return self
                    .record_dispatch_failure(payment, now, err.to_string())
                    .await;
            }
        };

        let status = response.status();
        if !status.is_success() {
            return self
                .record_dispatch_failure(
                    payment,
                    now,
                    format!("callback endpoint returned status={}", status.as_u16()),
                )
                .await;
        }

        payment.callback_delivery_status = CallbackDeliveryStatus::Success;
        payment.callback_delivery_next_at = None;
        payment.callback_delivery_last_err = None;
        payment.updated_at = now;

        let payment = self.payments.update(&payment).await?;

        self.record_event(PaymentEvent {
            id: 0,
            payment_id: payment.id,
            event_type: "callback_dispatched".to_string(),
            old_status: None,
            new_status: payment.status,
            provider_event_id: None,
            payload_json: None,
            created_at: now,
        })
        .await;

        info!(
            payment_id = payment.id,
            attempts = payment.callback_delivery_attempts,
            "status callback dispatched"
        );

        Ok(())
    }

    /// Bumps the attempt counter and either schedules the fixed-interval
    /// retry or marks the delivery terminally failed. Returns the original
    /// dispatch error so the batch surfaces it.
    async fn record_dispatch_failure(
        &self,
        mut payment: Payment,
        now: DateTime<Utc>,
        dispatch_err: String,
    ) -> AppResult<()> {
        payment.callback_delivery_attempts += 1;
        payment.callback_delivery_last_err =
            Some(truncate_error(&dispatch_err, ERROR_TRUNCATE_BYTES));

        let max_attempts = self.cfg.callback_max_attempts.max(1);

        if payment.callback_delivery_attempts >= max_attempts {
            payment.callback_delivery_status = CallbackDeliveryStatus::Failed;
            payment.callback_delivery_next_at = None;
        } else {
            let retry_interval = if self.cfg.callback_retry_interval.is_zero() {
                Duration::from_secs(5 * 60)
            } else {
                self.cfg.callback_retry_interval
            };
            payment.callback_delivery_status = CallbackDeliveryStatus::Pending;
            payment.callback_delivery_next_at = Some(now + retry_interval);
        }
        payment.updated_at = now;

        let payment = self.payments.update(&payment).await?;

        self.record_event(PaymentEvent {
            id: 0,
            payment_id: payment.id,
            event_type: "callback_dispatch_failed".to_string(),
            old_status: None,
            new_status: payment.status,
            provider_event_id: None,
            payload_json: None,
            created_at: now,
        })
        .await;

        Err(AppError::Internal(dispatch_err))
    }
}

fn keep_first_err(current: &mut Option<AppError>, candidate: AppError) {
    if current.is_none() {
        *current = Some(candidate);
    }
}
