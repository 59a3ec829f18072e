//! Outbound webhook dispatcher (C10, spec §4.10): signs and delivers
//! tenant notifications with retries, serialized per event id so a
//! tenant never observes two deliveries for the same event out of order.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use conductor_core::{BackoffType, RetryPolicy};
use conductor_providers::hmac_sig;
use conductor_storage::TenantRepository;
use conductor_types::ConductorError;
use serde_json::Value;
use tokio::sync::Mutex;
use uuid::Uuid;

/// A single notification destined for one tenant. `id` is caller-supplied
/// and stable across retries of the same logical occurrence — it is both
/// the serialization key and the `X-Webhook-Id` the tenant sees.
#[derive(Debug, Clone)]
pub struct OutboundEvent {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub event_type: String,
    pub data: Value,
}

pub struct OutboundWebhookDispatcher {
    tenants: Arc<TenantRepository>,
    client: reqwest::Client,
    retry_policy: RetryPolicy,
    event_locks: Mutex<HashMap<Uuid, Arc<Mutex<()>>>>,
}

impl OutboundWebhookDispatcher {
    pub fn new(tenants: Arc<TenantRepository>) -> Self {
        OutboundWebhookDispatcher {
            tenants,
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .expect("failed to build webhook delivery client"),
            retry_policy: RetryPolicy {
                max_attempts: 5,
                base_delay: Duration::from_millis(500),
                max_delay: Duration::from_secs(30),
                multiplier: 2.0,
                jitter: 0.2,
                backoff_type: BackoffType::Exponential,
            },
            event_locks: Mutex::new(HashMap::new()),
        }
    }

    async fn lock_for(&self, event_id: Uuid) -> Arc<Mutex<()>> {
        let mut locks = self.event_locks.lock().await;
        locks.entry(event_id).or_insert_with(|| Arc::new(Mutex::new(()))).clone()
    }

    /// Resolves the tenant's webhook destination, signs the envelope, and
    /// delivers with retries (spec §4.10). A tenant with no `webhook_url`
    /// configured is a silent no-op — there is nowhere to deliver to.
    pub async fn dispatch(&self, event: OutboundEvent) -> Result<(), ConductorError> {
        let tenant = self
            .tenants
            .find_by_id(event.tenant_id)?
            .ok_or_else(|| ConductorError::NotFound(format!("tenant {}", event.tenant_id)))?;
        let (Some(url), Some(secret)) = (tenant.webhook_url.clone(), tenant.webhook_secret.clone()) else {
            return Ok(());
        };

        let lock = self.lock_for(event.id).await;
        let _guard = lock.lock().await;

        let envelope = serde_json::json!({
            "id": event.id,
            "tenant_id": event.tenant_id,
            "event_type": event.event_type,
            "data": event.data,
            "timestamp": Utc::now().to_rfc3339(),
        });
        let body = serde_json::to_vec(&envelope).map_err(|e| ConductorError::Internal(e.to_string()))?;
        let signature = hmac_sig::compute_hex(secret.as_bytes(), &body);

        let mut attempt: u32 = 1;
        loop {
            let response = self
                .client
                .post(&url)
                .header("X-Webhook-Signature", &signature)
                .header("X-Webhook-Id", event.id.to_string())
                .header("X-Webhook-Timestamp", Utc::now().timestamp().to_string())
                .header("Content-Type", "application/json")
                .body(body.clone())
                .send()
                .await;

            match response {
                Ok(resp) if resp.status().is_success() => return Ok(()),
                Ok(resp) if resp.status().as_u16() == 410 => {
                    return Err(ConductorError::Conflict(format!(
                        "tenant webhook endpoint {url} is gone"
                    )));
                }
                Ok(resp) => {
                    tracing::warn!(status = %resp.status(), attempt, url, "webhook delivery failed, will retry");
                }
                Err(err) => {
                    tracing::warn!(error = %err, attempt, url, "webhook delivery transport error, will retry");
                }
            }

            if attempt >= self.retry_policy.max_attempts {
                return Err(ConductorError::ProviderUnavailable(format!(
                    "tenant webhook delivery to {url} exhausted retries"
                )));
            }
            tokio::time::sleep(self.retry_policy.delay_for_attempt(attempt + 1)).await;
            attempt += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conductor_storage::Database;
    use conductor_types::Tenant;

    fn tenant_with_no_destination() -> Tenant {
        Tenant {
            id: Uuid::new_v4(),
            name: "Acme".into(),
            api_key: "ak_live_1".into(),
            api_secret_hash: "hash".into(),
            webhook_url: None,
            webhook_secret: None,
            is_active: true,
            settings: Value::Null,
            metadata: Value::Null,
        }
    }

    #[tokio::test]
    async fn dispatch_is_a_no_op_without_a_webhook_destination() {
        let tenants = Arc::new(TenantRepository::new(Arc::new(Database::open_in_memory().unwrap())));
        let tenant = tenant_with_no_destination();
        tenants.insert(&tenant).unwrap();

        let dispatcher = OutboundWebhookDispatcher::new(tenants);
        let result = dispatcher
            .dispatch(OutboundEvent {
                id: Uuid::new_v4(),
                tenant_id: tenant.id,
                event_type: "payment.succeeded".into(),
                data: serde_json::json!({}),
            })
            .await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn dispatch_fails_for_unknown_tenant() {
        let tenants = Arc::new(TenantRepository::new(Arc::new(Database::open_in_memory().unwrap())));
        let dispatcher = OutboundWebhookDispatcher::new(tenants);
        let result = dispatcher
            .dispatch(OutboundEvent {
                id: Uuid::new_v4(),
                tenant_id: Uuid::new_v4(),
                event_type: "payment.succeeded".into(),
                data: serde_json::json!({}),
            })
            .await;
        assert!(matches!(result, Err(ConductorError::NotFound(_))));
    }
}
