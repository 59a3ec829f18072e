//! Persisted entities from the data model (spec §3), owned by their repositories.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::money::{Currency, Money};
use crate::status::{
    CaptureMethod, DisputeStatus, EntityType, InvoiceStatus, PayoutStatus, PaymentStatus,
    ProviderName, SubscriptionStatus, WebhookEventStatus,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Payment {
    pub id: Uuid,
    pub tenant_id: Option<Uuid>,
    pub customer_id: String,
    pub amount: Money,
    pub currency: Currency,
    pub status: PaymentStatus,
    pub payment_method_ref: String,
    pub provider_name: Option<ProviderName>,
    pub provider_charge_id: Option<String>,
    pub capture_method: CaptureMethod,
    pub captured_amount: Money,
    pub requires_action: bool,
    pub next_action: Option<Value>,
    pub client_secret: Option<String>,
    pub idempotency_key: Option<String>,
    pub metadata: Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Payment {
    /// `captured_amount <= amount` is a standing invariant; callers that would
    /// violate it must reject the operation before calling this.
    pub fn remaining_refundable(&self, already_refunded: Money) -> Money {
        self.captured_amount
            .checked_sub(already_refunded)
            .unwrap_or(Money::ZERO)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Refund {
    pub id: Uuid,
    pub payment_id: Uuid,
    pub amount: Money,
    pub currency: Currency,
    pub reason: Option<String>,
    pub status: PaymentStatus,
    pub provider_name: ProviderName,
    pub provider_refund_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Durable assertion that `entity_id` was created in `provider_name` and must
/// be addressed there for every follow-up operation. Never rewritten once
/// created (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderMapping {
    pub entity_id: Uuid,
    pub entity_type: EntityType,
    pub provider_name: ProviderName,
    pub provider_entity_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdempotencyKey {
    pub key: String,
    pub tenant_id: Option<Uuid>,
    pub request_path: String,
    pub request_hash: String,
    pub response_code: Option<u16>,
    pub response_body: Option<Value>,
    pub locked_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookEvent {
    pub id: Uuid,
    pub tenant_id: Option<Uuid>,
    pub provider: ProviderName,
    pub event_type: String,
    pub event_id: String,
    pub payload: Value,
    pub status: WebhookEventStatus,
    pub attempts: u32,
    pub max_attempts: u32,
    pub next_attempt_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tenant {
    pub id: Uuid,
    pub name: String,
    pub api_key: String,
    /// SHA-256 digest of the tenant secret; never the secret itself.
    pub api_secret_hash: String,
    pub webhook_url: Option<String>,
    pub webhook_secret: Option<String>,
    pub is_active: bool,
    pub settings: Value,
    pub metadata: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditLog {
    pub id: Uuid,
    pub tenant_id: Option<Uuid>,
    pub user_id: Option<String>,
    pub action: String,
    pub resource_type: String,
    pub resource_id: String,
    pub request_summary: String,
    pub response_code: u16,
    pub success: bool,
    pub error: Option<String>,
    pub ip: Option<String>,
    pub user_agent: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentMethod {
    pub id: Uuid,
    pub tenant_id: Option<Uuid>,
    pub customer_id: String,
    pub provider_name: ProviderName,
    pub provider_payment_method_id: String,
    pub method_type: String,
    pub last4: Option<String>,
    pub brand: Option<String>,
    pub is_default: bool,
    pub metadata: Value,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Customer {
    pub id: Uuid,
    pub tenant_id: Option<Uuid>,
    pub provider_name: Option<ProviderName>,
    pub provider_customer_id: Option<String>,
    pub email: Option<String>,
    pub name: Option<String>,
    pub metadata: Value,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dispute {
    pub id: Uuid,
    pub payment_id: Uuid,
    pub provider_name: ProviderName,
    pub provider_dispute_id: String,
    pub amount: Money,
    pub currency: Currency,
    pub reason: Option<String>,
    pub status: DisputeStatus,
    pub evidence_due_by: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Invoice {
    pub id: Uuid,
    pub tenant_id: Option<Uuid>,
    pub customer_id: String,
    pub amount: Money,
    pub currency: Currency,
    pub status: InvoiceStatus,
    pub provider_name: ProviderName,
    pub provider_invoice_id: String,
    pub due_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Payout {
    pub id: Uuid,
    pub tenant_id: Option<Uuid>,
    pub amount: Money,
    pub currency: Currency,
    pub destination: String,
    pub status: PayoutStatus,
    pub provider_name: ProviderName,
    pub provider_payout_id: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    pub id: Uuid,
    pub tenant_id: Option<Uuid>,
    pub provider_name: ProviderName,
    pub provider_plan_id: String,
    pub amount: Money,
    pub currency: Currency,
    pub interval: String,
    pub interval_count: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subscription {
    pub id: Uuid,
    pub tenant_id: Option<Uuid>,
    pub customer_id: String,
    pub plan_id: Uuid,
    pub provider_name: ProviderName,
    pub provider_subscription_id: String,
    pub status: SubscriptionStatus,
    pub current_period_end: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payment() -> Payment {
        Payment {
            id: Uuid::new_v4(),
            tenant_id: None,
            customer_id: "cus_1".into(),
            amount: Money(2500),
            currency: Currency::new("usd"),
            status: PaymentStatus::Succeeded,
            payment_method_ref: "pm_1".into(),
            provider_name: Some(ProviderName::Stripe),
            provider_charge_id: Some("ch_1".into()),
            capture_method: CaptureMethod::Automatic,
            captured_amount: Money(2500),
            requires_action: false,
            next_action: None,
            client_secret: None,
            idempotency_key: Some("k1".into()),
            metadata: Value::Null,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn remaining_refundable_subtracts_prior_refunds() {
        let p = payment();
        assert_eq!(p.remaining_refundable(Money(1000)), Money(1500));
    }

    #[test]
    fn remaining_refundable_never_negative() {
        let p = payment();
        assert_eq!(p.remaining_refundable(Money(9999)), Money::ZERO);
    }
}
