//! Stripe payment provider implementation
//!
//! Creates hosted checkout sessions and payment links, verifies inbound
//! webhook signatures, and polls checkout sessions for reconciliation.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use hmac::{Hmac, Mac};
use reqwest::Client;
use serde::Deserialize;
use sha2::Sha256;
use tracing::info;

use crate::config::StripeConfig;
use crate::error::{AppError, AppResult};
use crate::payments::traits::Provider;
use crate::payments::types::{
    CallbackEvent, CreateInput, CreateOutput, PaymentMethod, PaymentStatus, PaymentType,
    ProviderKind,
};

type HmacSha256 = Hmac<Sha256>;

/// Stripe payment provider
pub struct StripeProvider {
    cfg: StripeConfig,
    client: Client,
}

impl StripeProvider {
    /// Create a new Stripe provider instance
    pub fn new(mut cfg: StripeConfig) -> Self {
        if cfg.http_timeout.is_zero() {
            cfg.http_timeout = Duration::from_secs(10);
        }
        if cfg.signature_tolerance_secs <= 0 {
            cfg.signature_tolerance_secs = 300;
        }
        if cfg.api_base_url.trim().is_empty() {
            cfg.api_base_url = "https://api.stripe.com".to_string();
        }

        let client = Client::builder()
            .timeout(cfg.http_timeout)
            .build()
            .expect("Failed to create HTTP client");

        Self { cfg, client }
    }

    async fn create_checkout_session(
        &self,
        input: &CreateInput,
        callback_url: &str,
    ) -> AppResult<CreateOutput> {
        let mut params: Vec<(String, String)> = vec![
            ("line_items[0][quantity]".to_string(), "1".to_string()),
            (
                "line_items[0][price_data][currency]".to_string(),
                input.currency.to_lowercase(),
            ),
            (
                "line_items[0][price_data][unit_amount]".to_string(),
                input.amount_cents.to_string(),
            ),
            (
                "line_items[0][price_data][product_data][name]".to_string(),
                build_product_name(input),
            ),
        ];

        if input.payment_type == PaymentType::Recurring {
            params.push(("mode".to_string(), "subscription".to_string()));
            params.push((
                "line_items[0][price_data][recurring][interval]".to_string(),
                input.recurring_interval.clone().unwrap_or_default(),
            ));
            params.push((
                "line_items[0][price_data][recurring][interval_count]".to_string(),
                input.recurring_interval_count.unwrap_or_default().to_string(),
            ));
        } else {
            params.push(("mode".to_string(), "payment".to_string()));
        }

        let success_url = match input.success_url.as_deref() {
            Some(url) if !url.trim().is_empty() => url.trim().to_string(),
            _ => format!("{}?state=success", callback_url),
        };
        let cancel_url = match input.cancel_url.as_deref() {
            Some(url) if !url.trim().is_empty() => url.trim().to_string(),
            _ => format!("{}?state=cancel", callback_url),
        };
        params.push(("success_url".to_string(), success_url));
        params.push(("cancel_url".to_string(), cancel_url));
        params.push(("client_reference_id".to_string(), input.request_id.clone()));

        for (key, value) in &input.metadata {
            params.push((format!("metadata[{}]", key), value.clone()));
        }
        params.push(("metadata[request_id]".to_string(), input.request_id.clone()));
        params.push((
            "metadata[callback_hash]".to_string(),
            input.callback_hash.clone(),
        ));

        let session: CheckoutSessionPayload =
            self.post_form("/v1/checkout/sessions", &params).await?;

        info!(
            request_id = %input.request_id,
            session_id = %session.id,
            "stripe checkout session created"
        );

        Ok(CreateOutput {
            provider_payment_id: normalize(&session.id),
            provider_subscription_id: session
                .subscription
                .as_ref()
                .and_then(parse_stringish),
            checkout_url: normalize(&session.url),
            provider_callback_url: callback_url.to_string(),
            initial_status: PaymentStatus::Pending,
        })
    }

    async fn create_payment_link(
        &self,
        input: &CreateInput,
        callback_url: &str,
    ) -> AppResult<CreateOutput> {
        let product_params = vec![("name".to_string(), build_product_name(input))];
        let product: IdPayload = self.post_form("/v1/products", &product_params).await?;
        let product_id = product.id.trim().to_string();
        if product_id.is_empty() {
            return Err(AppError::Provider("stripe product id missing".to_string()));
        }

        let mut price_params: Vec<(String, String)> = vec![
            ("currency".to_string(), input.currency.to_lowercase()),
            ("unit_amount".to_string(), input.amount_cents.to_string()),
            ("product".to_string(), product_id),
        ];
        if input.payment_type == PaymentType::Recurring {
            price_params.push((
                "recurring[interval]".to_string(),
                input.recurring_interval.clone().unwrap_or_default(),
            ));
            price_params.push((
                "recurring[interval_count]".to_string(),
                input.recurring_interval_count.unwrap_or_default().to_string(),
            ));
        }
        let price: IdPayload = self.post_form("/v1/prices", &price_params).await?;
        let price_id = price.id.trim().to_string();
        if price_id.is_empty() {
            return Err(AppError::Provider("stripe price id missing".to_string()));
        }

        let mut link_params: Vec<(String, String)> = vec![
            ("line_items[0][price]".to_string(), price_id),
            ("line_items[0][quantity]".to_string(), "1".to_string()),
            ("after_completion[type]".to_string(), "redirect".to_string()),
            (
                "after_completion[redirect][url]".to_string(),
                callback_url.to_string(),
            ),
        ];
        for (key, value) in &input.metadata {
            link_params.push((format!("metadata[{}]", key), value.clone()));
        }
        link_params.push(("metadata[request_id]".to_string(), input.request_id.clone()));
        link_params.push((
            "metadata[callback_hash]".to_string(),
            input.callback_hash.clone(),
        ));

        let link: PaymentLinkPayload = self.post_form("/v1/payment_links", &link_params).await?;

        info!(
            request_id = %input.request_id,
            link_id = %link.id,
            "stripe payment link created"
        );

        Ok(CreateOutput {
            provider_payment_id: normalize(&link.id),
            provider_subscription_id: None,
            checkout_url: normalize(&link.url),
            provider_callback_url: callback_url.to_string(),
            initial_status: PaymentStatus::Pending,
        })
    }

    /// Form-encoded POST to the Stripe API with bearer auth.
    async fn post_form<T>(&self, path: &str, params: &[(String, String)]) -> AppResult<T>
    where
        T: for<'de> Deserialize<'de>,
    {
        let url = format!("{}{}", self.cfg.api_base_url.trim_end_matches('/'), path);
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.cfg.secret_key)
            .form(params)
            .send()
            .await
            .map_err(|e| AppError::Provider(format!("stripe request failed: {}", e)))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| AppError::Provider(format!("stripe response read failed: {}", e)))?;

        if status.as_u16() >= 400 {
            return Err(AppError::Provider(format!(
                "stripe request failed: path={} status={} body={}",
                path,
                status.as_u16(),
                body
            )));
        }

        serde_json::from_str(&body)
            .map_err(|e| AppError::Provider(format!("stripe response invalid: {}", e)))
    }
}

#[async_trait]
impl Provider for StripeProvider {
    fn code(&self) -> ProviderKind {
        ProviderKind::Stripe
    }

    async fn create_payment(&self, input: &CreateInput) -> AppResult<CreateOutput> {
        if self.cfg.secret_key.trim().is_empty() {
            return Err(AppError::Provider(
                "stripe secret key is not configured".to_string(),
            ));
        }

        let callback_url = join_callback_url(&self.cfg.callback_base_url, &input.callback_hash);
        let Some(callback_url) = callback_url else {
            return Err(AppError::Provider(
                "provider callback base url is not configured".to_string(),
            ));
        };

        match input.payment_method {
            PaymentMethod::HostedCard => self.create_checkout_session(input, &callback_url).await,
            PaymentMethod::PaymentLink => self.create_payment_link(input, &callback_url).await,
        }
    }

    async fn verify_and_parse_callback(
        &self,
        payload: &[u8],
        signature: &str,
    ) -> AppResult<CallbackEvent> {
        if self.cfg.webhook_secret.trim().is_empty() {
            return Err(AppError::Provider(
                "stripe webhook secret is not configured".to_string(),
            ));
        }
        if !verify_signature(
            payload,
            signature,
            &self.cfg.webhook_secret,
            self.cfg.signature_tolerance_secs,
        ) {
            return Err(AppError::CallbackRejected);
        }

        let event: StripeEventPayload = serde_json::from_slice(payload)
            .map_err(|e| AppError::Provider(format!("stripe event invalid: {}", e)))?;

        let mut result = CallbackEvent {
            event_type: event.event_type.clone(),
            provider_event_id: normalize(&event.id),
            ..CallbackEvent::default()
        };

        let object: EventObjectPayload =
            serde_json::from_value(event.data.object.clone()).unwrap_or_default();

        match event.event_type.as_str() {
            "checkout.session.completed" | "checkout.session.async_payment_succeeded" => {
                result.new_status = Some(PaymentStatus::Paid);
                assign_session_fields(&mut result, &object);
            }
            "checkout.session.async_payment_failed" => {
                result.new_status = Some(PaymentStatus::Failed);
                assign_session_fields(&mut result, &object);
            }
            "checkout.session.expired" => {
                result.new_status = Some(PaymentStatus::Expired);
                assign_session_fields(&mut result, &object);
            }
            "invoice.paid" => {
                result.new_status = Some(PaymentStatus::Paid);
                assign_session_fields(&mut result, &object);
            }
            "invoice.payment_failed" => {
                result.new_status = Some(PaymentStatus::Failed);
                assign_session_fields(&mut result, &object);
            }
            "customer.subscription.deleted" => {
                result.new_status = Some(PaymentStatus::Canceled);
                result.provider_subscription_id = normalize(&object.id);
            }
            _ => {
                result.new_status = None;
            }
        }

        Ok(result)
    }

    async fn get_payment_status(
        &self,
        provider_payment_id: &str,
    ) -> AppResult<Option<PaymentStatus>> {
        let provider_payment_id = provider_payment_id.trim();
        if provider_payment_id.is_empty() {
            return Ok(None);
        }

        let url = format!(
            "{}/v1/checkout/sessions/{}",
            self.cfg.api_base_url.trim_end_matches('/'),
            provider_payment_id
        );
        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.cfg.secret_key)
            .send()
            .await
            .map_err(|e| AppError::Provider(format!("stripe request failed: {}", e)))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| AppError::Provider(format!("stripe response read failed: {}", e)))?;

        if status.as_u16() >= 400 {
            return Err(AppError::Provider(format!(
                "stripe get checkout session failed: status={} body={}",
                status.as_u16(),
                body
            )));
        }

        let session: SessionStatusPayload = serde_json::from_str(&body)
            .map_err(|e| AppError::Provider(format!("stripe response invalid: {}", e)))?;

        Ok(map_session_status(
            &session.status,
            &session.payment_status,
        ))
    }
}

/// Maps a checkout session's status pair into the core status enum.
/// `None` means the session is in a state the engine should not act on.
fn map_session_status(status: &str, payment_status: &str) -> Option<PaymentStatus> {
    if status == "expired" {
        return Some(PaymentStatus::Expired);
    }

    match payment_status {
        "paid" | "no_payment_required" => Some(PaymentStatus::Paid),
        "unpaid" => Some(PaymentStatus::Pending),
        _ => None,
    }
}

fn build_product_name(input: &CreateInput) -> String {
    let name = format!(
        "{}-{}",
        input.resource_type.trim(),
        input.resource_id.trim()
    );
    let name = name.trim();
    if name == "-" || name.is_empty() {
        "payment".to_string()
    } else {
        name.to_string()
    }
}

fn join_callback_url(base_url: &str, callback_hash: &str) -> Option<String> {
    let base_url = base_url.trim().trim_end_matches('/');
    let callback_hash = callback_hash.trim();
    if base_url.is_empty() || callback_hash.is_empty() {
        return None;
    }
    Some(format!("{}/{}", base_url, callback_hash))
}

/// Verifies a Stripe `t=...,v1=...` signature header: HMAC-SHA256 over
/// `"{t}.{payload}"`, with a timestamp tolerance window and constant-time
/// digest comparison. Multiple v1 candidates are accepted.
fn verify_signature(
    payload: &[u8],
    signature_header: &str,
    webhook_secret: &str,
    tolerance_secs: i64,
) -> bool {
    let signature_header = signature_header.trim();
    if signature_header.is_empty() || webhook_secret.trim().is_empty() {
        return false;
    }

    let mut timestamp = "";
    let mut candidates: Vec<&str> = Vec::new();
    for part in signature_header.split(',') {
        let part = part.trim();
        if let Some(value) = part.strip_prefix("t=") {
            timestamp = value.trim();
        }
        if let Some(value) = part.strip_prefix("v1=") {
            candidates.push(value.trim());
        }
    }
    if timestamp.is_empty() || candidates.is_empty() {
        return false;
    }

    let ts_unix: i64 = match timestamp.parse() {
        Ok(value) => value,
        Err(_) => return false,
    };
    let now = Utc::now().timestamp();
    if (now - ts_unix).abs() > tolerance_secs {
        return false;
    }

    let mut mac = HmacSha256::new_from_slice(webhook_secret.as_bytes())
        .expect("HMAC can take key of any size");
    mac.update(timestamp.as_bytes());
    mac.update(b".");
    mac.update(payload);
    let expected = mac.finalize().into_bytes();

    for candidate in candidates {
        let Ok(decoded) = hex::decode(candidate) else {
            continue;
        };
        if decoded.len() != expected.len() {
            continue;
        }
        let mismatch = decoded
            .iter()
            .zip(expected.iter())
            .fold(0u8, |acc, (a, b)| acc | (a ^ b));
        if mismatch == 0 {
            return true;
        }
    }

    false
}

fn assign_session_fields(event: &mut CallbackEvent, object: &EventObjectPayload) {
    if let Some(id) = normalize(&object.id) {
        event.provider_payment_id = Some(id);
    }
    if let Some(subscription) = object.subscription.as_ref().and_then(parse_stringish) {
        event.provider_subscription_id = Some(subscription);
    }
}

/// Stripe renders expandable references either as a plain id string or as
/// the expanded object carrying an `id`.
fn parse_stringish(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(s) => normalize(s),
        serde_json::Value::Object(map) => match map.get("id") {
            Some(serde_json::Value::String(s)) => normalize(s),
            _ => None,
        },
        _ => None,
    }
}

fn normalize(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

#[derive(Debug, Default, Deserialize)]
struct CheckoutSessionPayload {
    #[serde(default)]
    id: String,
    #[serde(default)]
    url: String,
    #[serde(default)]
    subscription: Option<serde_json::Value>,
}

#[derive(Debug, Default, Deserialize)]
struct IdPayload {
    #[serde(default)]
    id: String,
}

#[derive(Debug, Default, Deserialize)]
struct PaymentLinkPayload {
    #[serde(default)]
    id: String,
    #[serde(default)]
    url: String,
}

#[derive(Debug, Default, Deserialize)]
struct SessionStatusPayload {
    #[serde(default)]
    status: String,
    #[serde(default)]
    payment_status: String,
}

#[derive(Debug, Default, Deserialize)]
struct StripeEventPayload {
    #[serde(default)]
    id: String,
    #[serde(rename = "type", default)]
    event_type: String,
    #[serde(default)]
    data: StripeEventData,
}

#[derive(Debug, Default, Deserialize)]
struct StripeEventData {
    #[serde(default)]
    object: serde_json::Value,
}

#[derive(Debug, Default, Deserialize)]
struct EventObjectPayload {
    #[serde(default)]
    id: String,
    #[serde(default)]
    subscription: Option<serde_json::Value>,
}
