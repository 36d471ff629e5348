//! Domain enums, provider exchange types, and the public payment projection.
//!
//! Status-like enums carry their stable integer codes; those codes are what
//! the storage layer persists and what the API surfaces.

use std::collections::HashMap;

use chrono::SecondsFormat;
use serde::{Deserialize, Serialize};

use crate::database::payment_repository::Payment;

/// Lifecycle status of a payment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, sqlx::Type)]
#[repr(i32)]
pub enum PaymentStatus {
    Created = 1,
    Pending = 2,
    Processing = 3,
    Paid = 10,
    Failed = 20,
    Canceled = 30,
    Expired = 40,
}

impl PaymentStatus {
    /// Terminal statuses admit no further transitions.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            PaymentStatus::Paid
                | PaymentStatus::Failed
                | PaymentStatus::Canceled
                | PaymentStatus::Expired
        )
    }

    pub fn code(self) -> i32 {
        self as i32
    }

    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            1 => Some(PaymentStatus::Created),
            2 => Some(PaymentStatus::Pending),
            3 => Some(PaymentStatus::Processing),
            10 => Some(PaymentStatus::Paid),
            20 => Some(PaymentStatus::Failed),
            30 => Some(PaymentStatus::Canceled),
            40 => Some(PaymentStatus::Expired),
            _ => None,
        }
    }
}

/// Progress of the outbound caller notification for a payment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type)]
#[repr(i32)]
pub enum CallbackDeliveryStatus {
    None = 0,
    Pending = 1,
    Success = 10,
    Failed = 20,
}

impl CallbackDeliveryStatus {
    pub fn code(self) -> i32 {
        self as i32
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type)]
#[repr(i32)]
pub enum PaymentMethod {
    HostedCard = 1,
    PaymentLink = 2,
}

impl PaymentMethod {
    pub fn code(self) -> i32 {
        self as i32
    }

    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            1 => Some(PaymentMethod::HostedCard),
            2 => Some(PaymentMethod::PaymentLink),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type)]
#[repr(i32)]
pub enum PaymentType {
    OneTime = 1,
    Recurring = 2,
}

impl PaymentType {
    pub fn code(self) -> i32 {
        self as i32
    }

    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            1 => Some(PaymentType::OneTime),
            2 => Some(PaymentType::Recurring),
            _ => None,
        }
    }
}

/// Registered external payment processors, keyed by stable code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, sqlx::Type)]
#[repr(i32)]
pub enum ProviderKind {
    Stripe = 1,
}

impl ProviderKind {
    pub fn code(self) -> i32 {
        self as i32
    }

    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            1 => Some(ProviderKind::Stripe),
            _ => None,
        }
    }

    /// Lowercase tag used in webhook routes and audit rows.
    pub fn tag(self) -> &'static str {
        match self {
            ProviderKind::Stripe => "stripe",
        }
    }

    /// Accepts either the lowercase tag or the numeric code.
    pub fn parse_tag(raw: &str) -> Option<Self> {
        match raw.trim().to_lowercase().as_str() {
            "stripe" | "1" => Some(ProviderKind::Stripe),
            _ => None,
        }
    }
}

/// Request projection handed to a provider when creating a payment.
#[derive(Debug, Clone)]
pub struct CreateInput {
    pub request_id: String,
    pub callback_hash: String,
    pub resource_type: String,
    pub resource_id: String,
    pub amount_cents: i64,
    pub currency: String,
    pub payment_method: PaymentMethod,
    pub payment_type: PaymentType,
    pub recurring_interval: Option<String>,
    pub recurring_interval_count: Option<i32>,
    pub customer_ref: Option<String>,
    pub metadata: HashMap<String, String>,
    pub success_url: Option<String>,
    pub cancel_url: Option<String>,
}

/// Provider artifacts produced by a create call.
#[derive(Debug, Clone)]
pub struct CreateOutput {
    pub provider_payment_id: Option<String>,
    pub provider_subscription_id: Option<String>,
    pub checkout_url: Option<String>,
    pub provider_callback_url: String,
    pub initial_status: PaymentStatus,
}

/// A verified, decoded provider webhook.
#[derive(Debug, Clone, Default)]
pub struct CallbackEvent {
    pub provider_event_id: Option<String>,
    pub provider_payment_id: Option<String>,
    pub provider_subscription_id: Option<String>,
    pub event_type: String,
    /// None means the provider event carries no status mapping.
    pub new_status: Option<PaymentStatus>,
}

/// Public projection of a payment, identical on every outbound surface.
///
/// Absent optional strings surface as "", absent optional ints as 0.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentView {
    pub id: i64,
    pub request_id: String,
    pub caller_service: String,
    pub resource_type: String,
    pub resource_id: String,
    pub customer_ref: String,
    pub amount_cents: i64,
    pub currency: String,
    pub status: i32,
    pub payment_method: i32,
    pub payment_type: i32,
    pub provider: i32,
    pub recurring_interval: String,
    pub recurring_interval_count: i32,
    pub provider_payment_id: String,
    pub provider_subscription_id: String,
    pub checkout_url: String,
    pub provider_callback_hash: String,
    pub provider_callback_url: String,
    pub status_callback_url: String,
    pub refunded_cents: i64,
    pub refundable_cents: i64,
    pub metadata: HashMap<String, String>,
    pub created_at: String,
    pub updated_at: String,
}

impl PaymentView {
    pub fn from_entity(payment: &Payment) -> Self {
        Self {
            id: payment.id,
            request_id: payment.request_id.clone(),
            caller_service: payment.caller_service.clone(),
            resource_type: payment.resource_type.clone(),
            resource_id: payment.resource_id.clone(),
            customer_ref: payment.customer_ref.clone().unwrap_or_default(),
            amount_cents: payment.amount_cents,
            currency: payment.currency.clone(),
            status: payment.status.code(),
            payment_method: payment.payment_method.code(),
            payment_type: payment.payment_type.code(),
            provider: payment.provider.code(),
            recurring_interval: payment.recurring_interval.clone().unwrap_or_default(),
            recurring_interval_count: payment.recurring_interval_count.unwrap_or(0),
            provider_payment_id: payment.provider_payment_id.clone().unwrap_or_default(),
            provider_subscription_id: payment
                .provider_subscription_id
                .clone()
                .unwrap_or_default(),
            checkout_url: payment.checkout_url.clone().unwrap_or_default(),
            provider_callback_hash: payment.provider_callback_hash.clone(),
            provider_callback_url: payment.provider_callback_url.clone(),
            status_callback_url: payment.status_callback_url.clone(),
            refunded_cents: payment.refunded_cents,
            refundable_cents: payment.refundable_cents,
            metadata: payment.metadata.0.clone(),
            created_at: format_timestamp(payment.created_at),
            updated_at: format_timestamp(payment.updated_at),
        }
    }
}

/// JSON envelope sent to caller services and returned by the API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentEnvelope {
    pub payment: PaymentView,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentListEnvelope {
    pub payments: Vec<PaymentView>,
}

fn format_timestamp(ts: chrono::DateTime<chrono::Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Byte-bounded truncation that never splits a UTF-8 character.
pub fn truncate_error(value: &str, max: usize) -> String {
    if value.len() <= max {
        return value.to_string();
    }
    let mut end = max;
    while end > 0 && !value.is_char_boundary(end) {
        end -= 1;
    }
    value[..end].to_string()
}
