//! Razorpay adapter, the preferred provider for INR. Webhook signatures use
//! `X-Razorpay-Signature`, HMAC-SHA256 over the raw body (spec §6).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use conductor_types::{Currency, Money, PaymentStatus, ProviderName, SubscriptionStatus};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::adapter::{
    CaptureRequest, ChargeRequest, ChargeResult, ProviderAdapter, RefundRequest, RefundResult,
    SubscriptionResult, VerifiedWebhookEvent, WebhookHeaders,
};
use crate::capabilities::{Capabilities, Capability};
use crate::error::ProviderError;
use crate::hmac_sig;
use crate::http::{build_client, classify_status, map_transport_error};

pub struct RazorpayConfig {
    pub key_id: String,
    pub key_secret: String,
    pub webhook_secret: String,
    pub base_url: String,
    pub timeout: std::time::Duration,
}

pub struct RazorpayAdapter {
    config: RazorpayConfig,
    client: reqwest::Client,
    capabilities: Capabilities,
}

impl RazorpayAdapter {
    pub fn new(config: RazorpayConfig) -> Self {
        let client = build_client(config.timeout);
        let capabilities = Capabilities::new(
            [
                Capability::Charge,
                Capability::Refund,
                Capability::Capture,
                Capability::Void,
                Capability::WebhookVerify,
                Capability::IsAvailable,
                Capability::Subscription,
                Capability::Plan,
                Capability::Payout,
            ],
            ["INR"],
            ["card", "upi", "netbanking"],
        );
        RazorpayAdapter {
            config,
            client,
            capabilities,
        }
    }

    fn map_status(status: &str) -> PaymentStatus {
        match status {
            "created" => PaymentStatus::Pending,
            "authorized" => PaymentStatus::RequiresCapture,
            "captured" => PaymentStatus::Succeeded,
            "refunded" => PaymentStatus::Refunded,
            "failed" => PaymentStatus::Failed,
            _ => PaymentStatus::Failed,
        }
    }

    fn map_subscription_status(status: &str) -> SubscriptionStatus {
        match status {
            "active" | "authenticated" => SubscriptionStatus::Active,
            "pending" | "halted" => SubscriptionStatus::PastDue,
            "cancelled" | "completed" | "expired" => SubscriptionStatus::Canceled,
            _ => SubscriptionStatus::Incomplete,
        }
    }

    async fn call(&self, method: reqwest::Method, path: &str, body: Option<Value>) -> Result<Value, ProviderError> {
        let mut req = self
            .client
            .request(method, format!("{}{path}", self.config.base_url))
            .basic_auth(&self.config.key_id, Some(&self.config.key_secret));
        if let Some(body) = body {
            req = req.json(&body);
        }
        let resp = req.send().await.map_err(|e| map_transport_error(&e))?;
        let status = resp.status();
        let text = resp.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(classify_status(status, &text));
        }
        serde_json::from_str(&text).map_err(|e| ProviderError::Fatal(e.to_string()))
    }
}

#[derive(Deserialize)]
struct PaymentResp {
    id: String,
    status: String,
    #[serde(default)]
    amount: i64,
}

#[async_trait]
impl ProviderAdapter for RazorpayAdapter {
    fn name(&self) -> ProviderName {
        ProviderName::Razorpay
    }

    fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }

    async fn charge(&self, req: ChargeRequest) -> Result<ChargeResult, ProviderError> {
        let body = json!({
            "amount": req.amount.0,
            "currency": req.currency.as_str(),
            "order_id": req.payment_method_ref,
            "customer_id": req.customer_id,
        });
        let resp: PaymentResp = serde_json::from_value(self.call(reqwest::Method::POST, "/payments", Some(body)).await?)
            .map_err(|e| ProviderError::Fatal(e.to_string()))?;
        let status = Self::map_status(&resp.status);
        Ok(ChargeResult {
            provider_charge_id: resp.id,
            requires_action: false,
            captured_amount: if status == PaymentStatus::Succeeded { Money(resp.amount) } else { Money::ZERO },
            client_secret: None,
            next_action: None,
            status,
        })
    }

    async fn refund(&self, req: RefundRequest) -> Result<RefundResult, ProviderError> {
        let body = json!({ "amount": req.amount.0 });
        let resp: PaymentResp = serde_json::from_value(
            self.call(reqwest::Method::POST, &format!("/payments/{}/refund", req.provider_charge_id), Some(body))
                .await?,
        )
        .map_err(|e| ProviderError::Fatal(e.to_string()))?;
        Ok(RefundResult {
            provider_refund_id: resp.id,
            status: PaymentStatus::Refunded,
        })
    }

    async fn capture(&self, req: CaptureRequest) -> Result<ChargeResult, ProviderError> {
        let body = json!({ "amount": req.amount.map(|m| m.0) });
        let resp: PaymentResp = serde_json::from_value(
            self.call(reqwest::Method::POST, &format!("/payments/{}/capture", req.provider_charge_id), Some(body))
                .await?,
        )
        .map_err(|e| ProviderError::Fatal(e.to_string()))?;
        let status = Self::map_status(&resp.status);
        Ok(ChargeResult {
            provider_charge_id: resp.id,
            requires_action: false,
            captured_amount: Money(resp.amount),
            client_secret: None,
            next_action: None,
            status,
        })
    }

    async fn void(&self, provider_charge_id: &str) -> Result<ChargeResult, ProviderError> {
        let resp: PaymentResp = serde_json::from_value(
            self.call(reqwest::Method::POST, &format!("/payments/{provider_charge_id}/cancel"), None)
                .await?,
        )
        .map_err(|e| ProviderError::Fatal(e.to_string()))?;
        Ok(ChargeResult {
            provider_charge_id: resp.id,
            requires_action: false,
            captured_amount: Money::ZERO,
            client_secret: None,
            next_action: None,
            status: PaymentStatus::Canceled,
        })
    }

    async fn confirm_3ds(&self, provider_charge_id: &str) -> Result<ChargeResult, ProviderError> {
        let resp: PaymentResp = serde_json::from_value(
            self.call(reqwest::Method::GET, &format!("/payments/{provider_charge_id}"), None)
                .await?,
        )
        .map_err(|e| ProviderError::Fatal(e.to_string()))?;
        let status = Self::map_status(&resp.status);
        Ok(ChargeResult {
            provider_charge_id: resp.id,
            requires_action: false,
            captured_amount: Money(resp.amount),
            client_secret: None,
            next_action: None,
            status,
        })
    }

    async fn is_available(&self) -> bool {
        self.call(reqwest::Method::GET, "/payments?count=1", None).await.is_ok()
    }

    fn verify_webhook(
        &self,
        headers: &WebhookHeaders,
        raw_body: &[u8],
    ) -> Result<VerifiedWebhookEvent, ProviderError> {
        let signature = headers.get("x-razorpay-signature").ok_or(ProviderError::SignatureInvalid)?;
        if !hmac_sig::verify_hex(self.config.webhook_secret.as_bytes(), raw_body, signature) {
            return Err(ProviderError::SignatureInvalid);
        }

        let payload: Value = serde_json::from_slice(raw_body).map_err(|_| ProviderError::SignatureInvalid)?;
        let event_type = payload
            .get("event")
            .and_then(Value::as_str)
            .ok_or(ProviderError::SignatureInvalid)?
            .to_string();
        // Razorpay events don't carry a top-level id; the payment entity id
        // doubles as the dedup key since one webhook fires per payment event.
        let event_id = payload["payload"]["payment"]["entity"]["id"]
            .as_str()
            .ok_or(ProviderError::SignatureInvalid)?
            .to_string();

        Ok(VerifiedWebhookEvent {
            event_id: format!("{event_type}:{event_id}"),
            event_type,
            payload,
        })
    }

    async fn balance(&self, _currency: &Currency) -> Result<Money, ProviderError> {
        let body = self.call(reqwest::Method::GET, "/balance", None).await?;
        Ok(Money(body["balance"].as_i64().unwrap_or(0)))
    }

    /// Razorpay Subscriptions API: a plan is addressed by its own
    /// provider-side plan id, created ahead of time via the dashboard or
    /// the Plans API (out of scope here — plans arrive pre-provisioned).
    async fn create_subscription(&self, plan_provider_id: &str, customer_id: &str) -> Result<SubscriptionResult, ProviderError> {
        #[derive(Deserialize)]
        struct SubscriptionResp {
            id: String,
            status: String,
            #[serde(default)]
            current_end: Option<i64>,
        }
        let body = json!({
            "plan_id": plan_provider_id,
            "customer_notify": 1,
            "total_count": 12,
            "notes": { "customer_id": customer_id },
        });
        let resp: SubscriptionResp = serde_json::from_value(self.call(reqwest::Method::POST, "/subscriptions", Some(body)).await?)
            .map_err(|e| ProviderError::Fatal(e.to_string()))?;
        Ok(SubscriptionResult {
            provider_subscription_id: resp.id,
            status: Self::map_subscription_status(&resp.status),
            current_period_end: resp
                .current_end
                .and_then(|ts| DateTime::from_timestamp(ts, 0))
                .unwrap_or_else(Utc::now),
        })
    }

    async fn cancel_subscription(&self, provider_subscription_id: &str) -> Result<(), ProviderError> {
        self.call(reqwest::Method::POST, &format!("/subscriptions/{provider_subscription_id}/cancel"), None)
            .await?;
        Ok(())
    }

    /// RazorpayX payouts: one-shot disbursement to a bank account or UPI VPA.
    async fn create_payout(&self, destination: &str, amount: Money, currency: &Currency) -> Result<String, ProviderError> {
        #[derive(Deserialize)]
        struct PayoutResp {
            id: String,
        }
        let body = json!({
            "fund_account_id": destination,
            "amount": amount.0,
            "currency": currency.as_str(),
            "mode": "IMPS",
            "purpose": "payout",
        });
        let resp: PayoutResp = serde_json::from_value(self.call(reqwest::Method::POST, "/payouts", Some(body)).await?)
            .map_err(|e| ProviderError::Fatal(e.to_string()))?;
        Ok(resp.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn adapter() -> RazorpayAdapter {
        RazorpayAdapter::new(RazorpayConfig {
            key_id: "rzp_test".into(),
            key_secret: "secret".into(),
            webhook_secret: "whsec".into(),
            base_url: "https://api.razorpay.test".into(),
            timeout: std::time::Duration::from_secs(5),
        })
    }

    #[test]
    fn maps_known_statuses() {
        assert_eq!(RazorpayAdapter::map_status("captured"), PaymentStatus::Succeeded);
        assert_eq!(RazorpayAdapter::map_status("authorized"), PaymentStatus::RequiresCapture);
    }

    #[test]
    fn verify_webhook_accepts_valid_signature() {
        let a = adapter();
        let body = br#"{"event":"payment.captured","payload":{"payment":{"entity":{"id":"pay_1"}}}}"#;
        let sig = hmac_sig::compute_hex(b"whsec", body);
        let headers = WebhookHeaders::new([("X-Razorpay-Signature".to_string(), sig)]);
        let result = a.verify_webhook(&headers, body).unwrap();
        assert_eq!(result.event_id, "payment.captured:pay_1");
    }

    #[test]
    fn verify_webhook_rejects_bad_signature() {
        let a = adapter();
        let body = br#"{"event":"payment.captured"}"#;
        let headers = WebhookHeaders::new([("X-Razorpay-Signature".to_string(), "deadbeef".to_string())]);
        assert!(matches!(
            a.verify_webhook(&headers, body),
            Err(ProviderError::SignatureInvalid)
        ));
    }

    #[test]
    fn only_supports_inr() {
        let a = adapter();
        assert!(a.capabilities().supports_currency(&Currency::new("INR")));
        assert!(!a.capabilities().supports_currency(&Currency::new("USD")));
    }
}
