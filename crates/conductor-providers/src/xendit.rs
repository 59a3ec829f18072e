//! Xendit adapter, used for IDR/SGD/MYR/PHP/THB/VND. Webhook authentication
//! is a shared bearer token (`x-callback-token`) rather than an HMAC, per
//! Xendit's own scheme (spec §6).

use async_trait::async_trait;
use conductor_types::{Currency, Money, PaymentStatus, ProviderName};
use serde::Deserialize;
use serde_json::{json, Value};
use subtle::ConstantTimeEq;

use crate::adapter::{
    CaptureRequest, ChargeRequest, ChargeResult, ProviderAdapter, RefundRequest, RefundResult,
    VerifiedWebhookEvent, WebhookHeaders,
};
use crate::capabilities::{Capabilities, Capability};
use crate::error::ProviderError;
use crate::http::{build_client, classify_status, map_transport_error};

pub struct XenditConfig {
    pub api_key: String,
    pub callback_token: String,
    pub base_url: String,
    pub timeout: std::time::Duration,
}

pub struct XenditAdapter {
    config: XenditConfig,
    client: reqwest::Client,
    capabilities: Capabilities,
}

impl XenditAdapter {
    pub fn new(config: XenditConfig) -> Self {
        let client = build_client(config.timeout);
        let capabilities = Capabilities::new(
            [
                Capability::Charge,
                Capability::Refund,
                Capability::Void,
                Capability::WebhookVerify,
                Capability::IsAvailable,
                Capability::Balance,
                Capability::Payout,
                Capability::Invoice,
            ],
            ["IDR", "SGD", "MYR", "PHP", "THB", "VND"],
            ["ewallet", "virtual_account", "card"],
        );
        XenditAdapter {
            config,
            client,
            capabilities,
        }
    }

    fn map_status(status: &str) -> PaymentStatus {
        match status {
            "PENDING" => PaymentStatus::Pending,
            "REQUIRES_ACTION" => PaymentStatus::RequiresAction,
            "SUCCEEDED" | "PAID" | "COMPLETED" => PaymentStatus::Succeeded,
            "VOIDED" => PaymentStatus::Canceled,
            "FAILED" | "EXPIRED" => PaymentStatus::Failed,
            _ => PaymentStatus::Failed,
        }
    }

    async fn call(&self, method: reqwest::Method, path: &str, body: Option<Value>) -> Result<Value, ProviderError> {
        let mut req = self
            .client
            .request(method, format!("{}{path}", self.config.base_url))
            .basic_auth(&self.config.api_key, Some(""));
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
struct ChargeResp {
    id: String,
    status: String,
    #[serde(default)]
    actions: Option<Value>,
}

#[async_trait]
impl ProviderAdapter for XenditAdapter {
    fn name(&self) -> ProviderName {
        ProviderName::Xendit
    }

    fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }

    async fn charge(&self, req: ChargeRequest) -> Result<ChargeResult, ProviderError> {
        let body = json!({
            "reference_id": req.idempotency_key,
            "currency": req.currency.as_str(),
            "amount": req.amount.0,
            "customer_id": req.customer_id,
            "channel_code": req.payment_method_ref,
        });
        let resp: ChargeResp = serde_json::from_value(self.call(reqwest::Method::POST, "/ewallets/charges", Some(body)).await?)
            .map_err(|e| ProviderError::Fatal(e.to_string()))?;
        let status = Self::map_status(&resp.status);
        Ok(ChargeResult {
            provider_charge_id: resp.id,
            requires_action: status == PaymentStatus::RequiresAction,
            captured_amount: if status == PaymentStatus::Succeeded { req.amount } else { Money::ZERO },
            client_secret: None,
            next_action: resp.actions,
            status,
        })
    }

    async fn refund(&self, req: RefundRequest) -> Result<RefundResult, ProviderError> {
        let body = json!({ "charge_id": req.provider_charge_id, "amount": req.amount.0, "reason": req.reason });
        let resp: ChargeResp = serde_json::from_value(self.call(reqwest::Method::POST, "/refunds", Some(body)).await?)
            .map_err(|e| ProviderError::Fatal(e.to_string()))?;
        Ok(RefundResult {
            provider_refund_id: resp.id,
            status: Self::map_status(&resp.status),
        })
    }

    async fn capture(&self, _req: CaptureRequest) -> Result<ChargeResult, ProviderError> {
        Err(ProviderError::NotSupported)
    }

    async fn void(&self, provider_charge_id: &str) -> Result<ChargeResult, ProviderError> {
        let resp: ChargeResp = serde_json::from_value(
            self.call(reqwest::Method::POST, &format!("/ewallets/charges/{provider_charge_id}/void"), None)
                .await?,
        )
        .map_err(|e| ProviderError::Fatal(e.to_string()))?;
        Ok(ChargeResult {
            provider_charge_id: resp.id,
            requires_action: false,
            captured_amount: Money::ZERO,
            client_secret: None,
            next_action: None,
            status: Self::map_status(&resp.status),
        })
    }

    async fn confirm_3ds(&self, provider_charge_id: &str) -> Result<ChargeResult, ProviderError> {
        let resp: ChargeResp = serde_json::from_value(
            self.call(reqwest::Method::GET, &format!("/ewallets/charges/{provider_charge_id}"), None)
                .await?,
        )
        .map_err(|e| ProviderError::Fatal(e.to_string()))?;
        let status = Self::map_status(&resp.status);
        Ok(ChargeResult {
            provider_charge_id: resp.id,
            requires_action: status == PaymentStatus::RequiresAction,
            captured_amount: Money::ZERO,
            client_secret: None,
            next_action: resp.actions,
            status,
        })
    }

    async fn is_available(&self) -> bool {
        self.call(reqwest::Method::GET, "/balance", None).await.is_ok()
    }

    fn verify_webhook(
        &self,
        headers: &WebhookHeaders,
        raw_body: &[u8],
    ) -> Result<VerifiedWebhookEvent, ProviderError> {
        let token = headers.get("x-callback-token").ok_or(ProviderError::SignatureInvalid)?;
        let valid: bool = token.as_bytes().ct_eq(self.config.callback_token.as_bytes()).into();
        if !valid {
            return Err(ProviderError::SignatureInvalid);
        }

        let payload: Value = serde_json::from_slice(raw_body).map_err(|_| ProviderError::SignatureInvalid)?;
        let event_id = payload
            .get("id")
            .and_then(Value::as_str)
            .ok_or(ProviderError::SignatureInvalid)?
            .to_string();
        let event_type = payload
            .get("event")
            .and_then(Value::as_str)
            .unwrap_or("unknown")
            .to_string();

        Ok(VerifiedWebhookEvent {
            event_id,
            event_type,
            payload,
        })
    }

    async fn balance(&self, _currency: &Currency) -> Result<Money, ProviderError> {
        let body = self.call(reqwest::Method::GET, "/balance", None).await?;
        Ok(Money(body["balance"].as_i64().unwrap_or(0)))
    }

    /// Xendit's Invoices API is its signature product for this corridor:
    /// a hosted payment page addressed by a single invoice id.
    async fn create_invoice(&self, customer_id: &str, amount: Money, currency: &Currency) -> Result<String, ProviderError> {
        let body = json!({
            "external_id": format!("inv-{customer_id}-{}", amount.0),
            "amount": amount.0,
            "currency": currency.as_str(),
            "customer": { "given_names": customer_id },
        });
        #[derive(Deserialize)]
        struct InvoiceResp {
            id: String,
        }
        let resp: InvoiceResp = serde_json::from_value(self.call(reqwest::Method::POST, "/v2/invoices", Some(body)).await?)
            .map_err(|e| ProviderError::Fatal(e.to_string()))?;
        Ok(resp.id)
    }

    /// Xendit disbursements: one-shot payouts to a bank account or e-wallet.
    async fn create_payout(&self, destination: &str, amount: Money, currency: &Currency) -> Result<String, ProviderError> {
        let body = json!({
            "external_id": format!("po-{destination}-{}", amount.0),
            "amount": amount.0,
            "currency": currency.as_str(),
            "bank_account": destination,
        });
        #[derive(Deserialize)]
        struct DisbursementResp {
            id: String,
        }
        let resp: DisbursementResp = serde_json::from_value(self.call(reqwest::Method::POST, "/disbursements", Some(body)).await?)
            .map_err(|e| ProviderError::Fatal(e.to_string()))?;
        Ok(resp.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn adapter() -> XenditAdapter {
        XenditAdapter::new(XenditConfig {
            api_key: "xnd_test".into(),
            callback_token: "cb-token".into(),
            base_url: "https://api.xendit.test".into(),
            timeout: std::time::Duration::from_secs(5),
        })
    }

    #[test]
    fn maps_known_statuses() {
        assert_eq!(XenditAdapter::map_status("SUCCEEDED"), PaymentStatus::Succeeded);
        assert_eq!(XenditAdapter::map_status("PENDING"), PaymentStatus::Pending);
        assert_eq!(XenditAdapter::map_status("whatever"), PaymentStatus::Failed);
    }

    #[test]
    fn verify_webhook_rejects_wrong_token() {
        let a = adapter();
        let headers = WebhookHeaders::new([("x-callback-token".to_string(), "wrong".to_string())]);
        assert!(matches!(
            a.verify_webhook(&headers, b"{}"),
            Err(ProviderError::SignatureInvalid)
        ));
    }

    #[test]
    fn verify_webhook_accepts_matching_token() {
        let a = adapter();
        let headers = WebhookHeaders::new([("X-Callback-Token".to_string(), "cb-token".to_string())]);
        let body = br#"{"id":"evt_1","event":"ewallet.capture"}"#;
        let result = a.verify_webhook(&headers, body).unwrap();
        assert_eq!(result.event_id, "evt_1");
    }

    #[test]
    fn capture_is_not_supported() {
        let a = adapter();
        assert!(!a.capabilities().supports(Capability::Capture));
    }
}
