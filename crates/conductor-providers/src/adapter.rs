//! Provider adapter trait (C4, spec §4.4): the single seam every gateway
//! integration implements. Optional surfaces default to `NotSupported` so
//! an adapter only has to override what its gateway actually offers.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use conductor_types::{CaptureMethod, Currency, Money, PaymentStatus, ProviderName, SubscriptionStatus};
use serde_json::Value;

use crate::capabilities::Capabilities;
use crate::error::ProviderError;

#[derive(Debug, Clone)]
pub struct ChargeRequest {
    pub customer_id: String,
    pub amount: Money,
    pub currency: Currency,
    pub payment_method_ref: String,
    pub capture_method: CaptureMethod,
    pub idempotency_key: Option<String>,
    pub metadata: Value,
}

#[derive(Debug, Clone)]
pub struct ChargeResult {
    pub provider_charge_id: String,
    pub status: PaymentStatus,
    pub requires_action: bool,
    pub next_action: Option<Value>,
    pub client_secret: Option<String>,
    pub captured_amount: Money,
}

#[derive(Debug, Clone)]
pub struct CaptureRequest {
    pub provider_charge_id: String,
    pub amount: Option<Money>,
}

#[derive(Debug, Clone)]
pub struct RefundRequest {
    pub provider_charge_id: String,
    pub amount: Money,
    pub currency: Currency,
    pub reason: Option<String>,
}

#[derive(Debug, Clone)]
pub struct RefundResult {
    pub provider_refund_id: String,
    pub status: PaymentStatus,
}

/// Raw headers from an inbound webhook POST, keyed case-insensitively.
pub struct WebhookHeaders(HashMap<String, String>);

impl WebhookHeaders {
    pub fn new(headers: impl IntoIterator<Item = (String, String)>) -> Self {
        WebhookHeaders(headers.into_iter().map(|(k, v)| (k.to_lowercase(), v)).collect())
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(&name.to_lowercase()).map(|s| s.as_str())
    }
}

/// Gateway's own projection of a subscription (spec §9c / REDESIGN FLAGS):
/// `current_period_end` must come from the gateway's real field, never a
/// cancellation timestamp.
#[derive(Debug, Clone)]
pub struct SubscriptionResult {
    pub provider_subscription_id: String,
    pub status: SubscriptionStatus,
    pub current_period_end: DateTime<Utc>,
}

/// A decoded webhook event, post signature-verification, ready for C9.
#[derive(Debug, Clone)]
pub struct VerifiedWebhookEvent {
    pub event_id: String,
    pub event_type: String,
    pub payload: Value,
}

#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    fn name(&self) -> ProviderName;
    fn capabilities(&self) -> &Capabilities;

    async fn charge(&self, req: ChargeRequest) -> Result<ChargeResult, ProviderError>;
    async fn refund(&self, req: RefundRequest) -> Result<RefundResult, ProviderError>;
    async fn capture(&self, req: CaptureRequest) -> Result<ChargeResult, ProviderError>;
    async fn void(&self, provider_charge_id: &str) -> Result<ChargeResult, ProviderError>;
    async fn confirm_3ds(&self, provider_charge_id: &str) -> Result<ChargeResult, ProviderError>;

    /// Probe used by the health checker (C3). Must not panic and should
    /// be cheap; adapters typically hit a lightweight gateway endpoint.
    async fn is_available(&self) -> bool;

    /// Verifies the gateway's own signature scheme over the raw body.
    /// A failed verification must never be surfaced as anything but
    /// `SignatureInvalid` — callers rely on that to skip persistence.
    fn verify_webhook(
        &self,
        headers: &WebhookHeaders,
        raw_body: &[u8],
    ) -> Result<VerifiedWebhookEvent, ProviderError>;

    async fn balance(&self, _currency: &Currency) -> Result<Money, ProviderError> {
        Err(ProviderError::NotSupported)
    }

    async fn create_subscription(
        &self,
        _plan_provider_id: &str,
        _customer_id: &str,
    ) -> Result<SubscriptionResult, ProviderError> {
        Err(ProviderError::NotSupported)
    }

    async fn cancel_subscription(&self, _provider_subscription_id: &str) -> Result<(), ProviderError> {
        Err(ProviderError::NotSupported)
    }

    async fn create_invoice(&self, _customer_id: &str, _amount: Money, _currency: &Currency) -> Result<String, ProviderError> {
        Err(ProviderError::NotSupported)
    }

    async fn create_payout(&self, _destination: &str, _amount: Money, _currency: &Currency) -> Result<String, ProviderError> {
        Err(ProviderError::NotSupported)
    }

    async fn submit_dispute_evidence(&self, _provider_dispute_id: &str, _evidence: Value) -> Result<(), ProviderError> {
        Err(ProviderError::NotSupported)
    }

    async fn create_customer(&self, _email: Option<&str>, _name: Option<&str>) -> Result<String, ProviderError> {
        Err(ProviderError::NotSupported)
    }

    async fn attach_payment_method(&self, _customer_provider_id: &str, _payment_method_ref: &str) -> Result<String, ProviderError> {
        Err(ProviderError::NotSupported)
    }
}
