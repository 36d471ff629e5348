//! Payment provider trait definitions
//!
//! Defines the common interface that all payment providers must implement,
//! and the registry that dispatches on provider code.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::{AppError, AppResult};
use crate::payments::types::{CallbackEvent, CreateInput, CreateOutput, PaymentStatus, ProviderKind};

/// Capability set of an external payment processor.
///
/// The core never branches on provider identity except through the registry.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Stable provider code.
    fn code(&self) -> ProviderKind;

    /// Create the provider-side payment artifact (checkout session, payment
    /// link, ...) and report the initial status plus the URL the provider
    /// will post callbacks to.
    async fn create_payment(&self, input: &CreateInput) -> AppResult<CreateOutput>;

    /// Verify the webhook signature and decode the event. Rejections and
    /// undecodable payloads are errors.
    async fn verify_and_parse_callback(
        &self,
        payload: &[u8],
        signature: &str,
    ) -> AppResult<CallbackEvent>;

    /// Poll the provider for the current status of a payment. `None` means
    /// the provider has no terminal mapping to offer.
    async fn get_payment_status(
        &self,
        provider_payment_id: &str,
    ) -> AppResult<Option<PaymentStatus>>;
}

/// Maps provider codes to registered providers.
pub struct ProviderRegistry {
    providers: HashMap<ProviderKind, Arc<dyn Provider>>,
}

impl ProviderRegistry {
    pub fn new(items: Vec<Arc<dyn Provider>>) -> Self {
        let mut providers = HashMap::with_capacity(items.len());
        for provider in items {
            providers.insert(provider.code(), provider);
        }
        Self { providers }
    }

    pub fn get(&self, code: ProviderKind) -> AppResult<Arc<dyn Provider>> {
        self.providers
            .get(&code)
            .cloned()
            .ok_or(AppError::ProviderUnsupported)
    }
}
