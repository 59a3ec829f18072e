//! Airwallex adapter. Not one of the currency-preferred providers (spec
//! §4.6), so the router only reaches it as the first-healthy fallback.
//! Webhook signatures are HMAC-SHA256 over the raw body, `x-signature`.

use async_trait::async_trait;
use conductor_types::{Currency, Money, PaymentStatus, ProviderName};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::adapter::{
    CaptureRequest, ChargeRequest, ChargeResult, ProviderAdapter, RefundRequest, RefundResult,
    VerifiedWebhookEvent, WebhookHeaders,
};
use crate::capabilities::{Capabilities, Capability};
use crate::error::ProviderError;
use crate::hmac_sig;
use crate::http::{build_client, classify_status, map_transport_error};

pub struct AirwallexConfig {
    pub api_key: String,
    pub webhook_secret: String,
    pub base_url: String,
    pub timeout: std::time::Duration,
}

pub struct AirwallexAdapter {
    config: AirwallexConfig,
    client: reqwest::Client,
    capabilities: Capabilities,
}

impl AirwallexAdapter {
    pub fn new(config: AirwallexConfig) -> Self {
        let client = build_client(config.timeout);
        let capabilities = Capabilities::new(
            [
                Capability::Charge,
                Capability::Refund,
                Capability::Capture,
                Capability::Void,
                Capability::Confirm3DS,
                Capability::WebhookVerify,
                Capability::IsAvailable,
                Capability::Payout,
            ],
            ["AUD", "HKD", "CNY", "JPY", "NZD", "USD", "EUR", "GBP"],
            ["card", "wechatpay", "alipay"],
        );
        AirwallexAdapter {
            config,
            client,
            capabilities,
        }
    }

    fn map_status(status: &str) -> PaymentStatus {
        match status {
            "REQUIRES_PAYMENT_METHOD" | "REQUIRES_CUSTOMER_ACTION" => PaymentStatus::RequiresAction,
            "REQUIRES_CAPTURE" => PaymentStatus::RequiresCapture,
            "PENDING" => PaymentStatus::Pending,
            "SUCCEEDED" => PaymentStatus::Succeeded,
            "CANCELLED" => PaymentStatus::Canceled,
            _ => PaymentStatus::Failed,
        }
    }

    async fn call(&self, method: reqwest::Method, path: &str, body: Option<Value>) -> Result<Value, ProviderError> {
        let mut req = self
            .client
            .request(method, format!("{}{path}", self.config.base_url))
            .bearer_auth(&self.config.api_key);
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
struct PaymentIntentResp {
    id: String,
    status: String,
    #[serde(default)]
    captured_amount: f64,
}

#[async_trait]
impl ProviderAdapter for AirwallexAdapter {
    fn name(&self) -> ProviderName {
        ProviderName::Airwallex
    }

    fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }

    async fn charge(&self, req: ChargeRequest) -> Result<ChargeResult, ProviderError> {
        let body = json!({
            "amount": req.amount.0,
            "currency": req.currency.as_str(),
            "customer_id": req.customer_id,
            "payment_method": { "id": req.payment_method_ref },
        });
        let resp: PaymentIntentResp =
            serde_json::from_value(self.call(reqwest::Method::POST, "/pa/payment_intents/create", Some(body)).await?)
                .map_err(|e| ProviderError::Fatal(e.to_string()))?;
        let status = Self::map_status(&resp.status);
        Ok(ChargeResult {
            provider_charge_id: resp.id,
            requires_action: status == PaymentStatus::RequiresAction,
            captured_amount: Money(resp.captured_amount.round() as i64),
            client_secret: None,
            next_action: None,
            status,
        })
    }

    async fn refund(&self, req: RefundRequest) -> Result<RefundResult, ProviderError> {
        let body = json!({ "payment_intent_id": req.provider_charge_id, "amount": req.amount.0 });
        let resp: PaymentIntentResp = serde_json::from_value(self.call(reqwest::Method::POST, "/pa/refunds/create", Some(body)).await?)
            .map_err(|e| ProviderError::Fatal(e.to_string()))?;
        Ok(RefundResult {
            provider_refund_id: resp.id,
            status: Self::map_status(&resp.status),
        })
    }

    async fn capture(&self, req: CaptureRequest) -> Result<ChargeResult, ProviderError> {
        let body = json!({ "amount": req.amount.map(|m| m.0) });
        let resp: PaymentIntentResp = serde_json::from_value(
            self.call(reqwest::Method::POST, &format!("/pa/payment_intents/{}/capture", req.provider_charge_id), Some(body))
                .await?,
        )
        .map_err(|e| ProviderError::Fatal(e.to_string()))?;
        let status = Self::map_status(&resp.status);
        Ok(ChargeResult {
            provider_charge_id: resp.id,
            requires_action: false,
            captured_amount: Money(resp.captured_amount.round() as i64),
            client_secret: None,
            next_action: None,
            status,
        })
    }

    async fn void(&self, provider_charge_id: &str) -> Result<ChargeResult, ProviderError> {
        let resp: PaymentIntentResp = serde_json::from_value(
            self.call(reqwest::Method::POST, &format!("/pa/payment_intents/{provider_charge_id}/cancel"), None)
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
        let resp: PaymentIntentResp = serde_json::from_value(
            self.call(reqwest::Method::GET, &format!("/pa/payment_intents/{provider_charge_id}"), None)
                .await?,
        )
        .map_err(|e| ProviderError::Fatal(e.to_string()))?;
        let status = Self::map_status(&resp.status);
        Ok(ChargeResult {
            provider_charge_id: resp.id,
            requires_action: status == PaymentStatus::RequiresAction,
            captured_amount: Money(resp.captured_amount.round() as i64),
            client_secret: None,
            next_action: None,
            status,
        })
    }

    async fn is_available(&self) -> bool {
        self.call(reqwest::Method::GET, "/pa/balances/current", None).await.is_ok()
    }

    fn verify_webhook(
        &self,
        headers: &WebhookHeaders,
        raw_body: &[u8],
    ) -> Result<VerifiedWebhookEvent, ProviderError> {
        let signature = headers.get("x-signature").ok_or(ProviderError::SignatureInvalid)?;
        if !hmac_sig::verify_hex(self.config.webhook_secret.as_bytes(), raw_body, signature) {
            return Err(ProviderError::SignatureInvalid);
        }

        let payload: Value = serde_json::from_slice(raw_body).map_err(|_| ProviderError::SignatureInvalid)?;
        let event_id = payload
            .get("id")
            .and_then(Value::as_str)
            .ok_or(ProviderError::SignatureInvalid)?
            .to_string();
        let event_type = payload
            .get("name")
            .and_then(Value::as_str)
            .unwrap_or("unknown")
            .to_string();

        Ok(VerifiedWebhookEvent {
            event_id,
            event_type,
            payload,
        })
    }

    async fn balance(&self, currency: &Currency) -> Result<Money, ProviderError> {
        let body = self.call(reqwest::Method::GET, "/pa/balances/current", None).await?;
        let amount = body
            .as_array()
            .into_iter()
            .flatten()
            .find(|b| b["currency"].as_str() == Some(currency.as_str()))
            .and_then(|b| b["available_amount"].as_f64())
            .unwrap_or(0.0);
        Ok(Money(amount.round() as i64))
    }

    /// Airwallex's Global Payouts product: cross-border disbursement to a
    /// beneficiary previously registered with the gateway.
    async fn create_payout(&self, destination: &str, amount: Money, currency: &Currency) -> Result<String, ProviderError> {
        #[derive(Deserialize)]
        struct PayoutResp {
            id: String,
        }
        let body = json!({
            "beneficiary_id": destination,
            "amount": amount.0,
            "currency": currency.as_str(),
            "reason": "supplier_payment",
        });
        let resp: PayoutResp = serde_json::from_value(self.call(reqwest::Method::POST, "/pa/payouts/create", Some(body)).await?)
            .map_err(|e| ProviderError::Fatal(e.to_string()))?;
        Ok(resp.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn adapter() -> AirwallexAdapter {
        AirwallexAdapter::new(AirwallexConfig {
            api_key: "key".into(),
            webhook_secret: "whsec".into(),
            base_url: "https://api.airwallex.test".into(),
            timeout: std::time::Duration::from_secs(5),
        })
    }

    #[test]
    fn maps_known_statuses() {
        assert_eq!(AirwallexAdapter::map_status("SUCCEEDED"), PaymentStatus::Succeeded);
        assert_eq!(AirwallexAdapter::map_status("REQUIRES_CAPTURE"), PaymentStatus::RequiresCapture);
    }

    #[test]
    fn verify_webhook_accepts_valid_signature() {
        let a = adapter();
        let body = br#"{"id":"evt_1","name":"payment_intent.succeeded"}"#;
        let sig = hmac_sig::compute_hex(b"whsec", body);
        let headers = WebhookHeaders::new([("x-signature".to_string(), sig)]);
        let result = a.verify_webhook(&headers, body).unwrap();
        assert_eq!(result.event_id, "evt_1");
    }

    #[test]
    fn not_preferred_for_any_currency_but_still_covers_majors() {
        let a = adapter();
        assert!(a.capabilities().supports_currency(&Currency::new("AUD")));
    }
}
