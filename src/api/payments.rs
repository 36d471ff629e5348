//! Payment route handlers: request decoding, validation, and mapping of the
//! service results onto the public projection.

use std::collections::HashMap;

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use serde::Deserialize;

use crate::api::AppState;
use crate::error::{AppError, AppResult};
use crate::payments::service::{CreatePaymentInput, HandleCallbackInput, ListPaymentsInput};
use crate::payments::types::{
    PaymentEnvelope, PaymentListEnvelope, PaymentMethod, PaymentStatus, PaymentType, PaymentView,
    ProviderKind,
};

const MAX_LIST_LIMIT: i64 = 500;

#[derive(Debug, Default, Deserialize)]
pub struct CreatePaymentRequest {
    #[serde(default)]
    pub request_id: String,
    #[serde(default)]
    pub caller_service: String,
    #[serde(default)]
    pub resource_type: String,
    #[serde(default)]
    pub resource_id: String,
    #[serde(default)]
    pub customer_ref: String,
    #[serde(default)]
    pub amount_cents: i64,
    #[serde(default)]
    pub currency: String,
    #[serde(default)]
    pub payment_method: i32,
    #[serde(default)]
    pub payment_type: i32,
    #[serde(default)]
    pub provider: i32,
    #[serde(default)]
    pub recurring_interval: String,
    #[serde(default)]
    pub recurring_interval_count: i32,
    #[serde(default)]
    pub status_callback_url: String,
    #[serde(default)]
    pub success_url: String,
    #[serde(default)]
    pub cancel_url: String,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl CreatePaymentRequest {
    fn validate(self) -> AppResult<CreatePaymentInput> {
        if self.request_id.trim().is_empty() {
            return Err(AppError::InvalidRequest("request_id is required".into()));
        }
        if self.caller_service.trim().is_empty() {
            return Err(AppError::InvalidRequest("caller_service is required".into()));
        }
        if self.resource_type.trim().is_empty() {
            return Err(AppError::InvalidRequest("resource_type is required".into()));
        }
        if self.resource_id.trim().is_empty() {
            return Err(AppError::InvalidRequest("resource_id is required".into()));
        }
        if self.amount_cents <= 0 {
            return Err(AppError::InvalidRequest("amount_cents must be > 0".into()));
        }
        let currency = self.currency.trim();
        if currency.len() != 3 || !currency.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(AppError::InvalidRequest("currency must be 3 letters".into()));
        }
        let payment_method = PaymentMethod::from_code(self.payment_method).ok_or_else(|| {
            AppError::InvalidRequest("payment_method must be hosted_card or payment_link".into())
        })?;
        let payment_type = PaymentType::from_code(self.payment_type).ok_or_else(|| {
            AppError::InvalidRequest("payment_type must be one_time or recurring".into())
        })?;
        let provider = if self.provider == 0 {
            None
        } else {
            Some(
                ProviderKind::from_code(self.provider)
                    .ok_or_else(|| AppError::InvalidRequest("provider is invalid".into()))?,
            )
        };
        if self.status_callback_url.trim().is_empty() {
            return Err(AppError::InvalidRequest(
                "status_callback_url is required".into(),
            ));
        }

        let recurring_interval = self.recurring_interval.trim().to_lowercase();
        if payment_type == PaymentType::Recurring {
            if !matches!(recurring_interval.as_str(), "day" | "week" | "month" | "year") {
                return Err(AppError::InvalidRequest(
                    "recurring_interval must be day, week, month, or year".into(),
                ));
            }
            if self.recurring_interval_count <= 0 {
                return Err(AppError::InvalidRequest(
                    "recurring_interval_count must be > 0".into(),
                ));
            }
        }

        Ok(CreatePaymentInput {
            request_id: self.request_id,
            caller_service: self.caller_service,
            resource_type: self.resource_type,
            resource_id: self.resource_id,
            customer_ref: optional(&self.customer_ref),
            amount_cents: self.amount_cents,
            currency: self.currency,
            payment_method,
            payment_type,
            provider,
            recurring_interval: optional(&recurring_interval),
            recurring_interval_count: (self.recurring_interval_count > 0)
                .then_some(self.recurring_interval_count),
            status_callback_url: self.status_callback_url,
            success_url: optional(&self.success_url),
            cancel_url: optional(&self.cancel_url),
            metadata: self.metadata,
        })
    }
}

pub async fn create_payment(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(mut request): Json<CreatePaymentRequest>,
) -> AppResult<(StatusCode, Json<PaymentEnvelope>)> {
    if request.request_id.trim().is_empty() {
        request.request_id = header_value(&headers, "X-Request-ID");
    }

    let input = request.validate()?;
    let payment = state.service.create_payment(&input).await?;

    Ok((
        StatusCode::CREATED,
        Json(PaymentEnvelope {
            payment: PaymentView::from_entity(&payment),
        }),
    ))
}

pub async fn get_payment(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> AppResult<Json<PaymentEnvelope>> {
    if id <= 0 {
        return Err(AppError::InvalidRequest("invalid payment id".into()));
    }

    let payment = state.service.get_payment(id).await?;
    Ok(Json(PaymentEnvelope {
        payment: PaymentView::from_entity(&payment),
    }))
}

#[derive(Debug, Default, Deserialize)]
pub struct ListPaymentsQuery {
    pub request_id: Option<String>,
    pub caller_service: Option<String>,
    pub resource_type: Option<String>,
    pub resource_id: Option<String>,
    pub status: Option<i32>,
    pub provider: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl ListPaymentsQuery {
    fn validate(self) -> AppResult<ListPaymentsInput> {
        let status = match self.status {
            Some(code) => Some(
                PaymentStatus::from_code(code)
                    .ok_or_else(|| AppError::InvalidRequest("invalid status".into()))?,
            ),
            None => None,
        };

        let provider = match self.provider.as_deref().map(str::trim) {
            Some(raw) if !raw.is_empty() => Some(
                ProviderKind::parse_tag(raw)
                    .ok_or_else(|| AppError::InvalidRequest("invalid provider".into()))?,
            ),
            _ => None,
        };

        let limit = self.limit.unwrap_or(100);
        if !(1..=MAX_LIST_LIMIT).contains(&limit) {
            return Err(AppError::InvalidRequest(
                "limit must be between 1 and 500".into(),
            ));
        }

        let offset = self.offset.unwrap_or(0);
        if offset < 0 {
            return Err(AppError::InvalidRequest("offset must be >= 0".into()));
        }

        Ok(ListPaymentsInput {
            request_id: self.request_id,
            caller_service: self.caller_service,
            resource_type: self.resource_type,
            resource_id: self.resource_id,
            status,
            provider,
            limit,
            offset,
        })
    }
}

pub async fn list_payments(
    State(state): State<AppState>,
    Query(query): Query<ListPaymentsQuery>,
) -> AppResult<Json<PaymentListEnvelope>> {
    let input = query.validate()?;
    let payments = state.service.list_payments(&input).await?;

    Ok(Json(PaymentListEnvelope {
        payments: payments.iter().map(PaymentView::from_entity).collect(),
    }))
}

#[derive(Debug, Default, Deserialize)]
struct CancelPaymentBody {
    #[serde(default)]
    reason: String,
}

pub async fn cancel_payment(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    body: Bytes,
) -> AppResult<Json<PaymentEnvelope>> {
    if id <= 0 {
        return Err(AppError::InvalidRequest("invalid payment id".into()));
    }

    // Empty bodies are accepted; the reason is optional.
    let parsed: CancelPaymentBody = if body.is_empty() {
        CancelPaymentBody::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| AppError::InvalidRequest(format!("invalid cancel body: {}", e)))?
    };

    let payment = state.service.cancel_payment(id, parsed.reason.trim()).await?;
    Ok(Json(PaymentEnvelope {
        payment: PaymentView::from_entity(&payment),
    }))
}

#[derive(Debug, Default, Deserialize)]
struct ForwardedCallbackBody {
    #[serde(default)]
    payload: String,
    #[serde(default)]
    signature: String,
}

pub async fn handle_provider_callback(
    State(state): State<AppState>,
    Path((provider, hash)): Path<(String, String)>,
    headers: HeaderMap,
    body: Bytes,
) -> AppResult<Json<PaymentEnvelope>> {
    let mut signature = header_value(&headers, "Stripe-Signature");
    if signature.is_empty() {
        signature = header_value(&headers, "X-Provider-Signature");
    }
    let mut payload = body.to_vec();

    // Internal forwarders wrap the provider body as {payload, signature}.
    if !body.is_empty() {
        if let Ok(forwarded) = serde_json::from_slice::<ForwardedCallbackBody>(&body) {
            if !forwarded.payload.trim().is_empty() {
                payload = forwarded.payload.into_bytes();
            }
            if !forwarded.signature.trim().is_empty() {
                signature = forwarded.signature.trim().to_string();
            }
        }
    }

    if hash.trim().is_empty() {
        return Err(AppError::InvalidRequest("callback hash is required".into()));
    }
    if signature.trim().is_empty() {
        return Err(AppError::InvalidRequest(
            "provider signature is required".into(),
        ));
    }
    if payload.is_empty() {
        return Err(AppError::InvalidRequest("payload is required".into()));
    }

    let payment = state
        .service
        .handle_provider_callback(&HandleCallbackInput {
            provider: provider.trim().to_lowercase(),
            callback_hash: hash.trim().to_string(),
            signature,
            payload,
        })
        .await?;

    Ok(Json(PaymentEnvelope {
        payment: PaymentView::from_entity(&payment),
    }))
}

fn header_value(headers: &HeaderMap, name: &str) -> String {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("")
        .trim()
        .to_string()
}

fn optional(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}
