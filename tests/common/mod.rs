//! Shared test harness: in-memory store implementations, a scripted
//! provider, and a local HTTP endpoint for dispatcher tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use axum::Router;
use chrono::{DateTime, Utc};
use sqlx::types::Json;

use payments_service::config::PaymentsConfig;
use payments_service::database::callback_repository::PaymentCallback;
use payments_service::database::error::{DatabaseError, DatabaseErrorKind, DbResult};
use payments_service::database::event_repository::PaymentEvent;
use payments_service::database::payment_repository::{Payment, PaymentFilter};
use payments_service::database::repository::{
    PaymentCallbackStore, PaymentEventStore, PaymentStore,
};
use payments_service::error::{AppError, AppResult};
use payments_service::payments::service::{CreatePaymentInput, PaymentService};
use payments_service::payments::traits::{Provider, ProviderRegistry};
use payments_service::payments::types::{
    CallbackDeliveryStatus, CallbackEvent, CreateInput, CreateOutput, PaymentMethod,
    PaymentStatus, PaymentType, ProviderKind,
};

#[derive(Default)]
struct PaymentStoreState {
    payments: HashMap<i64, Payment>,
    next_id: i64,
}

/// In-memory PaymentStore with the same observable semantics as the sqlx
/// repository.
#[derive(Default)]
pub struct InMemoryPaymentStore {
    state: Mutex<PaymentStoreState>,
}

impl InMemoryPaymentStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(PaymentStoreState {
                payments: HashMap::new(),
                next_id: 1,
            }),
        })
    }

    /// Seeds a payment under its own id, bypassing the unique checks.
    pub fn seed(&self, payment: Payment) {
        let mut state = self.state.lock().unwrap();
        state.next_id = state.next_id.max(payment.id + 1);
        state.payments.insert(payment.id, payment);
    }

    pub fn get(&self, id: i64) -> Option<Payment> {
        self.state.lock().unwrap().payments.get(&id).cloned()
    }

    pub fn count(&self) -> usize {
        self.state.lock().unwrap().payments.len()
    }
}

#[async_trait]
impl PaymentStore for InMemoryPaymentStore {
    async fn create(&self, payment: &Payment) -> DbResult<Payment> {
        let mut state = self.state.lock().unwrap();
        if state.payments.values().any(|item| {
            item.caller_service == payment.caller_service && item.request_id == payment.request_id
        }) {
            return Err(DatabaseError::new(
                DatabaseErrorKind::UniqueConstraintViolation {
                    constraint: "ux_payments_caller_request".to_string(),
                },
            ));
        }

        let id = state.next_id;
        state.next_id += 1;
        let mut created = payment.clone();
        created.id = id;
        state.payments.insert(id, created.clone());
        Ok(created)
    }

    async fn update(&self, payment: &Payment) -> DbResult<Payment> {
        let mut state = self.state.lock().unwrap();
        if !state.payments.contains_key(&payment.id) {
            return Err(DatabaseError::not_found());
        }
        state.payments.insert(payment.id, payment.clone());
        Ok(payment.clone())
    }

    async fn find_by_id(&self, id: i64) -> DbResult<Option<Payment>> {
        Ok(self.state.lock().unwrap().payments.get(&id).cloned())
    }

    async fn find_by_caller_request_id(
        &self,
        caller_service: &str,
        request_id: &str,
    ) -> DbResult<Option<Payment>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .payments
            .values()
            .find(|item| item.caller_service == caller_service && item.request_id == request_id)
            .cloned())
    }

    async fn find_by_callback_hash(
        &self,
        provider: ProviderKind,
        callback_hash: &str,
    ) -> DbResult<Option<Payment>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .payments
            .values()
            .find(|item| {
                item.provider == provider && item.provider_callback_hash == callback_hash
            })
            .cloned())
    }

    async fn list(&self, filter: &PaymentFilter) -> DbResult<Vec<Payment>> {
        let state = self.state.lock().unwrap();
        let mut items: Vec<Payment> = state
            .payments
            .values()
            .filter(|item| {
                filter
                    .request_id
                    .as_deref()
                    .map_or(true, |v| item.request_id == v)
                    && filter
                        .caller_service
                        .as_deref()
                        .map_or(true, |v| item.caller_service == v)
                    && filter
                        .resource_type
                        .as_deref()
                        .map_or(true, |v| item.resource_type == v)
                    && filter
                        .resource_id
                        .as_deref()
                        .map_or(true, |v| item.resource_id == v)
                    && filter.status.map_or(true, |v| item.status == v)
                    && filter.provider.map_or(true, |v| item.provider == v)
            })
            .cloned()
            .collect();
        items.sort_by(|a, b| b.id.cmp(&a.id));

        let start = (filter.offset.max(0) as usize).min(items.len());
        let end = (start + filter.limit.max(0) as usize).min(items.len());
        Ok(items[start..end].to_vec())
    }

    async fn list_due_callback_dispatch(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> DbResult<Vec<Payment>> {
        let state = self.state.lock().unwrap();
        let mut items: Vec<Payment> = state
            .payments
            .values()
            .filter(|item| {
                item.callback_delivery_status == CallbackDeliveryStatus::Pending
                    && item
                        .callback_delivery_next_at
                        .map(|next_at| next_at <= now)
                        .unwrap_or(false)
            })
            .cloned()
            .collect();
        items.sort_by_key(|item| item.callback_delivery_next_at);
        items.truncate(limit.max(0) as usize);
        Ok(items)
    }

    async fn list_expired_pending(
        &self,
        cutoff: DateTime<Utc>,
        limit: i64,
    ) -> DbResult<Vec<Payment>> {
        let state = self.state.lock().unwrap();
        let mut items: Vec<Payment> = state
            .payments
            .values()
            .filter(|item| {
                matches!(
                    item.status,
                    PaymentStatus::Pending | PaymentStatus::Processing
                ) && item.created_at <= cutoff
            })
            .cloned()
            .collect();
        items.sort_by_key(|item| item.created_at);
        items.truncate(limit.max(0) as usize);
        Ok(items)
    }

    async fn list_for_reconcile(
        &self,
        before: DateTime<Utc>,
        limit: i64,
    ) -> DbResult<Vec<Payment>> {
        let state = self.state.lock().unwrap();
        let mut items: Vec<Payment> = state
            .payments
            .values()
            .filter(|item| {
                matches!(
                    item.status,
                    PaymentStatus::Pending | PaymentStatus::Processing
                ) && item.provider_payment_id.is_some()
                    && item.updated_at <= before
            })
            .cloned()
            .collect();
        items.sort_by_key(|item| item.updated_at);
        items.truncate(limit.max(0) as usize);
        Ok(items)
    }
}

#[derive(Default)]
pub struct RecordingEventStore {
    events: Mutex<Vec<PaymentEvent>>,
}

impl RecordingEventStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<PaymentEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn events_of_type(&self, event_type: &str) -> Vec<PaymentEvent> {
        self.events()
            .into_iter()
            .filter(|event| event.event_type == event_type)
            .collect()
    }
}

#[async_trait]
impl PaymentEventStore for RecordingEventStore {
    async fn create(&self, event: &PaymentEvent) -> DbResult<PaymentEvent> {
        let mut events = self.events.lock().unwrap();
        let mut stored = event.clone();
        stored.id = events.len() as i64 + 1;
        events.push(stored.clone());
        Ok(stored)
    }
}

#[derive(Default)]
pub struct RecordingCallbackStore {
    callbacks: Mutex<Vec<PaymentCallback>>,
}

impl RecordingCallbackStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn callbacks(&self) -> Vec<PaymentCallback> {
        self.callbacks.lock().unwrap().clone()
    }
}

#[async_trait]
impl PaymentCallbackStore for RecordingCallbackStore {
    async fn create(&self, callback: &PaymentCallback) -> DbResult<PaymentCallback> {
        let mut callbacks = self.callbacks.lock().unwrap();
        let mut stored = callback.clone();
        stored.id = callbacks.len() as i64 + 1;
        callbacks.push(stored.clone());
        Ok(stored)
    }
}

/// Provider whose behaviour is fixed at construction time.
#[derive(Default)]
pub struct ScriptedProvider {
    pub create_output: Option<CreateOutput>,
    pub create_err: Option<String>,
    pub callback_event: Option<CallbackEvent>,
    pub callback_err: Option<String>,
    pub reconcile_status: Option<PaymentStatus>,
    pub reconcile_err: Option<String>,
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn code(&self) -> ProviderKind {
        ProviderKind::Stripe
    }

    async fn create_payment(&self, _input: &CreateInput) -> AppResult<CreateOutput> {
        if let Some(message) = &self.create_err {
            return Err(AppError::Provider(message.clone()));
        }
        if let Some(output) = &self.create_output {
            return Ok(output.clone());
        }
        Ok(CreateOutput {
            provider_payment_id: Some("cs_test_123".to_string()),
            provider_subscription_id: None,
            checkout_url: Some("https://stripe.example/checkout/session".to_string()),
            provider_callback_url: "https://gateway.example/callbacks/stripe/hash".to_string(),
            initial_status: PaymentStatus::Pending,
        })
    }

    async fn verify_and_parse_callback(
        &self,
        _payload: &[u8],
        _signature: &str,
    ) -> AppResult<CallbackEvent> {
        if let Some(message) = &self.callback_err {
            return Err(AppError::Provider(message.clone()));
        }
        if let Some(event) = &self.callback_event {
            return Ok(event.clone());
        }
        Ok(CallbackEvent {
            event_type: "checkout.session.completed".to_string(),
            new_status: Some(PaymentStatus::Paid),
            ..CallbackEvent::default()
        })
    }

    async fn get_payment_status(
        &self,
        _provider_payment_id: &str,
    ) -> AppResult<Option<PaymentStatus>> {
        if let Some(message) = &self.reconcile_err {
            return Err(AppError::Provider(message.clone()));
        }
        Ok(self.reconcile_status)
    }
}

pub struct Harness {
    pub store: Arc<InMemoryPaymentStore>,
    pub events: Arc<RecordingEventStore>,
    pub callbacks: Arc<RecordingCallbackStore>,
    pub service: PaymentService,
}

pub fn test_config() -> PaymentsConfig {
    PaymentsConfig {
        callback_max_attempts: 3,
        callback_retry_interval: Duration::from_secs(1),
        callback_http_timeout: Duration::from_secs(1),
        pending_timeout: Duration::from_secs(60),
        reconcile_stale_after: Duration::from_secs(60),
        job_batch_size: 100,
    }
}

pub fn harness(provider: ScriptedProvider) -> Harness {
    harness_with_config(provider, test_config())
}

pub fn harness_with_config(provider: ScriptedProvider, cfg: PaymentsConfig) -> Harness {
    let store = InMemoryPaymentStore::new();
    let events = RecordingEventStore::new();
    let callbacks = RecordingCallbackStore::new();
    let registry = ProviderRegistry::new(vec![Arc::new(provider) as Arc<dyn Provider>]);

    let service = PaymentService::new(
        store.clone(),
        events.clone(),
        callbacks.clone(),
        registry,
        cfg,
        "payments-app-key",
    );

    Harness {
        store,
        events,
        callbacks,
        service,
    }
}

pub fn create_input() -> CreatePaymentInput {
    CreatePaymentInput {
        request_id: "req-1".to_string(),
        caller_service: "subscriptions-service".to_string(),
        resource_type: "subscription".to_string(),
        resource_id: "sub-1".to_string(),
        customer_ref: None,
        amount_cents: 1000,
        currency: "usd".to_string(),
        payment_method: PaymentMethod::HostedCard,
        payment_type: PaymentType::OneTime,
        provider: None,
        recurring_interval: None,
        recurring_interval_count: None,
        status_callback_url: "https://caller.example/callback".to_string(),
        success_url: None,
        cancel_url: None,
        metadata: HashMap::new(),
    }
}

/// A seeded payment in the given status, keyed by id.
pub fn seeded_payment(id: i64, status: PaymentStatus) -> Payment {
    let now = Utc::now();
    Payment {
        id,
        request_id: format!("req-{}", id),
        caller_service: "subscriptions-service".to_string(),
        resource_type: "subscription".to_string(),
        resource_id: format!("sub-{}", id),
        customer_ref: None,
        amount_cents: 1000,
        currency: "USD".to_string(),
        status,
        payment_method: PaymentMethod::HostedCard,
        payment_type: PaymentType::OneTime,
        provider: ProviderKind::Stripe,
        recurring_interval: None,
        recurring_interval_count: None,
        provider_payment_id: None,
        provider_subscription_id: None,
        checkout_url: None,
        provider_callback_hash: format!("hash-{}", id),
        provider_callback_url: format!("https://gateway.example/callbacks/stripe/hash-{}", id),
        status_callback_url: "https://caller.example/status".to_string(),
        refunded_cents: 0,
        refundable_cents: 1000,
        metadata: Json(HashMap::new()),
        callback_delivery_status: CallbackDeliveryStatus::None,
        callback_delivery_attempts: 0,
        callback_delivery_next_at: None,
        callback_delivery_last_err: None,
        created_at: now,
        updated_at: now,
    }
}

#[derive(Debug, Clone)]
pub struct CapturedRequest {
    pub request_id: String,
    pub api_key: String,
    pub content_type: String,
    pub body: String,
}

type CallbackServerState = (StatusCode, Arc<Mutex<Vec<CapturedRequest>>>);

async fn capture_handler(
    State((status, captured)): State<CallbackServerState>,
    headers: HeaderMap,
    body: String,
) -> StatusCode {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|value| value.to_str().ok())
            .unwrap_or("")
            .to_string()
    };
    captured.lock().unwrap().push(CapturedRequest {
        request_id: header("X-Request-ID"),
        api_key: header("X-API-Key"),
        content_type: header("Content-Type"),
        body,
    });
    status
}

/// Spawns a local endpoint answering every POST with `status`; returns its
/// URL and the captured requests.
pub async fn spawn_callback_server(
    status: StatusCode,
) -> (String, Arc<Mutex<Vec<CapturedRequest>>>) {
    let captured: Arc<Mutex<Vec<CapturedRequest>>> = Arc::new(Mutex::new(Vec::new()));
    let app = Router::new()
        .route("/callback", post(capture_handler))
        .with_state((status, captured.clone()));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind callback server");
    let addr = listener.local_addr().expect("callback server addr");
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });

    (format!("http://{}/callback", addr), captured)
}
