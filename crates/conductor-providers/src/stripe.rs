//! Stripe adapter. Charges map to Payment Intents; webhook signatures use
//! Stripe's `t=...,v1=...` scheme (spec §6).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use conductor_types::{CaptureMethod, Currency, Money, PaymentStatus, ProviderName, SubscriptionStatus};
use serde::Deserialize;
use serde_json::Value;

use crate::adapter::{
    CaptureRequest, ChargeRequest, ChargeResult, ProviderAdapter, RefundRequest, RefundResult,
    SubscriptionResult, VerifiedWebhookEvent, WebhookHeaders,
};
use crate::capabilities::{Capabilities, Capability};
use crate::error::ProviderError;
use crate::hmac_sig;
use crate::http::{build_client, classify_status, map_transport_error};

pub struct StripeConfig {
    pub api_key: String,
    pub webhook_secret: String,
    pub base_url: String,
    pub timeout: std::time::Duration,
}

pub struct StripeAdapter {
    config: StripeConfig,
    client: reqwest::Client,
    capabilities: Capabilities,
}

impl StripeAdapter {
    pub fn new(config: StripeConfig) -> Self {
        let client = build_client(config.timeout);
        let capabilities = Capabilities::new(
            [
                Capability::Charge,
                Capability::Refund,
                Capability::Capture,
                Capability::Void,
                Capability::Confirm3DS,
                Capability::Balance,
                Capability::WebhookVerify,
                Capability::IsAvailable,
                Capability::Customer,
                Capability::PaymentMethod,
                Capability::Subscription,
                Capability::Plan,
                Capability::Invoice,
                Capability::Dispute,
            ],
            ["USD", "EUR", "GBP"],
            ["card"],
        );
        StripeAdapter {
            config,
            client,
            capabilities,
        }
    }

    fn map_status(status: &str) -> PaymentStatus {
        match status {
            "requires_payment_method" | "requires_confirmation" => PaymentStatus::Pending,
            "requires_action" => PaymentStatus::RequiresAction,
            "processing" => PaymentStatus::Processing,
            "requires_capture" => PaymentStatus::RequiresCapture,
            "canceled" => PaymentStatus::Canceled,
            "succeeded" => PaymentStatus::Succeeded,
            _ => PaymentStatus::Failed,
        }
    }

    fn map_subscription_status(status: &str) -> SubscriptionStatus {
        match status {
            "active" | "trialing" => SubscriptionStatus::Active,
            "past_due" | "unpaid" => SubscriptionStatus::PastDue,
            "canceled" => SubscriptionStatus::Canceled,
            _ => SubscriptionStatus::Incomplete,
        }
    }

    async fn post(&self, path: &str, form: &[(&str, String)]) -> Result<Value, ProviderError> {
        let resp = self
            .client
            .post(format!("{}{path}", self.config.base_url))
            .basic_auth(&self.config.api_key, Some(""))
            .form(form)
            .send()
            .await
            .map_err(|e| map_transport_error(&e))?;

        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(classify_status(status, &body));
        }
        serde_json::from_str(&body).map_err(|e| ProviderError::Fatal(e.to_string()))
    }
}

#[derive(Deserialize)]
struct PaymentIntent {
    id: String,
    status: String,
    amount_received: Option<i64>,
    client_secret: Option<String>,
    next_action: Option<Value>,
}

#[async_trait]
impl ProviderAdapter for StripeAdapter {
    fn name(&self) -> ProviderName {
        ProviderName::Stripe
    }

    fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }

    async fn charge(&self, req: ChargeRequest) -> Result<ChargeResult, ProviderError> {
        let capture_method = match req.capture_method {
            CaptureMethod::Automatic => "automatic",
            CaptureMethod::Manual => "manual",
        };
        let body = self
            .post(
                "/v1/payment_intents",
                &[
                    ("amount", req.amount.0.to_string()),
                    ("currency", req.currency.as_str().to_lowercase()),
                    ("customer", req.customer_id),
                    ("payment_method", req.payment_method_ref),
                    ("capture_method", capture_method.to_string()),
                    ("confirm", "true".to_string()),
                ],
            )
            .await?;
        let pi: PaymentIntent = serde_json::from_value(body).map_err(|e| ProviderError::Fatal(e.to_string()))?;
        let status = Self::map_status(&pi.status);
        Ok(ChargeResult {
            provider_charge_id: pi.id,
            requires_action: status == PaymentStatus::RequiresAction,
            captured_amount: Money(pi.amount_received.unwrap_or(0)),
            client_secret: pi.client_secret,
            next_action: pi.next_action,
            status,
        })
    }

    async fn refund(&self, req: RefundRequest) -> Result<RefundResult, ProviderError> {
        let body = self
            .post(
                "/v1/refunds",
                &[
                    ("payment_intent", req.provider_charge_id),
                    ("amount", req.amount.0.to_string()),
                ],
            )
            .await?;
        #[derive(Deserialize)]
        struct RefundResp {
            id: String,
            status: String,
        }
        let r: RefundResp = serde_json::from_value(body).map_err(|e| ProviderError::Fatal(e.to_string()))?;
        Ok(RefundResult {
            provider_refund_id: r.id,
            status: Self::map_status(&r.status),
        })
    }

    async fn capture(&self, req: CaptureRequest) -> Result<ChargeResult, ProviderError> {
        let mut form = vec![];
        if let Some(amount) = req.amount {
            form.push(("amount_to_capture", amount.0.to_string()));
        }
        let body = self
            .post(&format!("/v1/payment_intents/{}/capture", req.provider_charge_id), &form)
            .await?;
        let pi: PaymentIntent = serde_json::from_value(body).map_err(|e| ProviderError::Fatal(e.to_string()))?;
        let status = Self::map_status(&pi.status);
        Ok(ChargeResult {
            provider_charge_id: pi.id,
            requires_action: false,
            captured_amount: Money(pi.amount_received.unwrap_or(0)),
            client_secret: pi.client_secret,
            next_action: None,
            status,
        })
    }

    async fn void(&self, provider_charge_id: &str) -> Result<ChargeResult, ProviderError> {
        let body = self
            .post(&format!("/v1/payment_intents/{provider_charge_id}/cancel"), &[])
            .await?;
        let pi: PaymentIntent = serde_json::from_value(body).map_err(|e| ProviderError::Fatal(e.to_string()))?;
        Ok(ChargeResult {
            provider_charge_id: pi.id,
            requires_action: false,
            captured_amount: Money(pi.amount_received.unwrap_or(0)),
            client_secret: pi.client_secret,
            next_action: None,
            status: Self::map_status(&pi.status),
        })
    }

    async fn confirm_3ds(&self, provider_charge_id: &str) -> Result<ChargeResult, ProviderError> {
        let body = self
            .post(&format!("/v1/payment_intents/{provider_charge_id}"), &[])
            .await?;
        let pi: PaymentIntent = serde_json::from_value(body).map_err(|e| ProviderError::Fatal(e.to_string()))?;
        let status = Self::map_status(&pi.status);
        Ok(ChargeResult {
            provider_charge_id: pi.id,
            requires_action: status == PaymentStatus::RequiresAction,
            captured_amount: Money(pi.amount_received.unwrap_or(0)),
            client_secret: pi.client_secret,
            next_action: pi.next_action,
            status,
        })
    }

    async fn is_available(&self) -> bool {
        self.client
            .get(format!("{}/v1/balance", self.config.base_url))
            .basic_auth(&self.config.api_key, Some(""))
            .send()
            .await
            .map(|r| r.status().is_success())
            .unwrap_or(false)
    }

    fn verify_webhook(
        &self,
        headers: &WebhookHeaders,
        raw_body: &[u8],
    ) -> Result<VerifiedWebhookEvent, ProviderError> {
        let header = headers.get("stripe-signature").ok_or(ProviderError::SignatureInvalid)?;
        let (mut timestamp, mut v1) = (None, None);
        for part in header.split(',') {
            if let Some(t) = part.strip_prefix("t=") {
                timestamp = Some(t);
            } else if let Some(v) = part.strip_prefix("v1=") {
                v1 = Some(v);
            }
        }
        let (timestamp, v1) = match (timestamp, v1) {
            (Some(t), Some(v)) => (t, v),
            _ => return Err(ProviderError::SignatureInvalid),
        };

        let signed_payload = format!("{timestamp}.{}", String::from_utf8_lossy(raw_body));
        if !hmac_sig::verify_hex(self.config.webhook_secret.as_bytes(), signed_payload.as_bytes(), v1) {
            return Err(ProviderError::SignatureInvalid);
        }

        let payload: Value = serde_json::from_slice(raw_body).map_err(|_| ProviderError::SignatureInvalid)?;
        let event_id = payload
            .get("id")
            .and_then(Value::as_str)
            .ok_or(ProviderError::SignatureInvalid)?
            .to_string();
        let event_type = payload
            .get("type")
            .and_then(Value::as_str)
            .ok_or(ProviderError::SignatureInvalid)?
            .to_string();

        Ok(VerifiedWebhookEvent {
            event_id,
            event_type,
            payload,
        })
    }

    async fn balance(&self, _currency: &Currency) -> Result<Money, ProviderError> {
        let resp = self
            .client
            .get(format!("{}/v1/balance", self.config.base_url))
            .basic_auth(&self.config.api_key, Some(""))
            .send()
            .await
            .map_err(|e| map_transport_error(&e))?;
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(classify_status(status, &body));
        }
        let parsed: Value = serde_json::from_str(&body).map_err(|e| ProviderError::Fatal(e.to_string()))?;
        let amount = parsed["available"][0]["amount"].as_i64().unwrap_or(0);
        Ok(Money(amount))
    }

    async fn create_customer(&self, email: Option<&str>, name: Option<&str>) -> Result<String, ProviderError> {
        let mut form = vec![];
        if let Some(email) = email {
            form.push(("email", email.to_string()));
        }
        if let Some(name) = name {
            form.push(("name", name.to_string()));
        }
        #[derive(Deserialize)]
        struct CustomerResp {
            id: String,
        }
        let body = self.post("/v1/customers", &form).await?;
        let resp: CustomerResp = serde_json::from_value(body).map_err(|e| ProviderError::Fatal(e.to_string()))?;
        Ok(resp.id)
    }

    async fn attach_payment_method(&self, customer_provider_id: &str, payment_method_ref: &str) -> Result<String, ProviderError> {
        self.post(
            &format!("/v1/payment_methods/{payment_method_ref}/attach"),
            &[("customer", customer_provider_id.to_string())],
        )
        .await?;
        Ok(payment_method_ref.to_string())
    }

    async fn create_subscription(&self, plan_provider_id: &str, customer_id: &str) -> Result<SubscriptionResult, ProviderError> {
        #[derive(Deserialize)]
        struct SubscriptionResp {
            id: String,
            status: String,
            current_period_end: i64,
        }
        let body = self
            .post(
                "/v1/subscriptions",
                &[
                    ("customer", customer_id.to_string()),
                    ("items[0][price]", plan_provider_id.to_string()),
                ],
            )
            .await?;
        let resp: SubscriptionResp = serde_json::from_value(body).map_err(|e| ProviderError::Fatal(e.to_string()))?;
        Ok(SubscriptionResult {
            provider_subscription_id: resp.id,
            status: Self::map_subscription_status(&resp.status),
            current_period_end: DateTime::from_timestamp(resp.current_period_end, 0).unwrap_or_else(Utc::now),
        })
    }

    async fn cancel_subscription(&self, provider_subscription_id: &str) -> Result<(), ProviderError> {
        let body = self
            .client
            .delete(format!("{}/v1/subscriptions/{provider_subscription_id}", self.config.base_url))
            .basic_auth(&self.config.api_key, Some(""))
            .send()
            .await
            .map_err(|e| map_transport_error(&e))?;
        let status = body.status();
        if !status.is_success() {
            let text = body.text().await.unwrap_or_default();
            return Err(classify_status(status, &text));
        }
        Ok(())
    }

    async fn create_invoice(&self, customer_id: &str, amount: Money, currency: &Currency) -> Result<String, ProviderError> {
        self.post(
            "/v1/invoiceitems",
            &[
                ("customer", customer_id.to_string()),
                ("amount", amount.0.to_string()),
                ("currency", currency.as_str().to_lowercase()),
            ],
        )
        .await?;
        #[derive(Deserialize)]
        struct InvoiceResp {
            id: String,
        }
        let body = self.post("/v1/invoices", &[("customer", customer_id.to_string())]).await?;
        let resp: InvoiceResp = serde_json::from_value(body).map_err(|e| ProviderError::Fatal(e.to_string()))?;
        Ok(resp.id)
    }

    async fn submit_dispute_evidence(&self, provider_dispute_id: &str, evidence: Value) -> Result<(), ProviderError> {
        let owned_form: Vec<(String, String)> = evidence
            .as_object()
            .map(|m| {
                m.iter()
                    .map(|(k, v)| (format!("evidence[{k}]"), v.as_str().map(str::to_string).unwrap_or_else(|| v.to_string())))
                    .collect()
            })
            .unwrap_or_default();
        let form: Vec<(&str, String)> = owned_form.iter().map(|(k, v)| (k.as_str(), v.clone())).collect();
        self.post(&format!("/v1/disputes/{provider_dispute_id}"), &form).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers_with(sig: &str) -> WebhookHeaders {
        WebhookHeaders::new([("Stripe-Signature".to_string(), sig.to_string())])
    }

    fn adapter() -> StripeAdapter {
        StripeAdapter::new(StripeConfig {
            api_key: "sk_test".into(),
            webhook_secret: "whsec_test".into(),
            base_url: "https://api.stripe.test".into(),
            timeout: std::time::Duration::from_secs(5),
        })
    }

    #[test]
    fn maps_known_statuses() {
        assert_eq!(StripeAdapter::map_status("succeeded"), PaymentStatus::Succeeded);
        assert_eq!(StripeAdapter::map_status("requires_action"), PaymentStatus::RequiresAction);
        assert_eq!(StripeAdapter::map_status("bogus"), PaymentStatus::Failed);
    }

    #[test]
    fn maps_subscription_statuses() {
        assert_eq!(StripeAdapter::map_subscription_status("trialing"), SubscriptionStatus::Active);
        assert_eq!(StripeAdapter::map_subscription_status("past_due"), SubscriptionStatus::PastDue);
        assert_eq!(StripeAdapter::map_subscription_status("canceled"), SubscriptionStatus::Canceled);
    }

    #[test]
    fn verify_webhook_rejects_missing_header() {
        let a = adapter();
        let headers = WebhookHeaders::new([]);
        let result = a.verify_webhook(&headers, b"{}");
        assert!(matches!(result, Err(ProviderError::SignatureInvalid)));
    }

    #[test]
    fn verify_webhook_accepts_valid_signature() {
        let a = adapter();
        let body = br#"{"id":"evt_1","type":"payment_intent.succeeded"}"#;
        let signed_payload = format!("1700000000.{}", String::from_utf8_lossy(body));
        let mac = hmac_sig::compute_hex(b"whsec_test", signed_payload.as_bytes());
        let header = format!("t=1700000000,v1={mac}");
        let result = a.verify_webhook(&headers_with(&header), body).unwrap();
        assert_eq!(result.event_id, "evt_1");
        assert_eq!(result.event_type, "payment_intent.succeeded");
    }

    #[test]
    fn verify_webhook_rejects_tampered_body() {
        let a = adapter();
        let signed_payload = "1700000000.{\"id\":\"evt_1\"}";
        let mac = hmac_sig::compute_hex(b"whsec_test", signed_payload.as_bytes());
        let header = format!("t=1700000000,v1={mac}");
        let result = a.verify_webhook(&headers_with(&header), br#"{"id":"evt_2"}"#);
        assert!(matches!(result, Err(ProviderError::SignatureInvalid)));
    }
}
