//! Inbound webhook pipeline (C9, spec §4.9): verify signature, dedupe on
//! `(provider, event_id)`, dispatch to the handler for `event_type`, apply
//! the resulting state transition, and back off on failure.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use conductor_core::RetryPolicy;
use conductor_orchestrator::PaymentOrchestrator;
use conductor_providers::{ProviderRouter, WebhookHeaders};
use conductor_storage::{PaymentRepository, WebhookEventRepository};
use conductor_types::{ConductorError, PaymentStatus, ProviderName, WebhookEvent, WebhookEventStatus};
use serde_json::Value;
use tracing::instrument;
use uuid::Uuid;

pub struct InboundWebhookPipeline {
    router: Arc<ProviderRouter>,
    events: Arc<WebhookEventRepository>,
    payments: Arc<PaymentRepository>,
    orchestrator: Arc<PaymentOrchestrator>,
    backoff: RetryPolicy,
}

impl InboundWebhookPipeline {
    pub fn new(
        router: Arc<ProviderRouter>,
        events: Arc<WebhookEventRepository>,
        payments: Arc<PaymentRepository>,
        orchestrator: Arc<PaymentOrchestrator>,
    ) -> Self {
        InboundWebhookPipeline {
            router,
            events,
            payments,
            orchestrator,
            backoff: RetryPolicy::default(),
        }
    }

    /// spec §4.9 steps 1-3. A failed signature check never reaches storage
    /// (property 7): the caller should map `Forbidden` straight to 401
    /// without this pipeline touching the database.
    #[instrument(skip_all, fields(provider = %provider))]
    pub async fn receive(
        &self,
        provider: ProviderName,
        headers: &WebhookHeaders,
        raw_body: &[u8],
    ) -> Result<(), ConductorError> {
        let executor = self
            .router
            .executor(provider)
            .ok_or_else(|| ConductorError::ProviderUnavailable(provider.to_string()))?;
        let verified = executor
            .verify_webhook(headers, raw_body)
            .map_err(|_| ConductorError::Forbidden("invalid webhook signature".to_string()))?;

        if let Some(existing) = self.events.find_by_provider_event(provider, &verified.event_id)? {
            if existing.status == WebhookEventStatus::Completed {
                return Ok(());
            }
            return self.dispatch(existing).await;
        }

        let event = WebhookEvent {
            id: Uuid::new_v4(),
            tenant_id: None,
            provider,
            event_type: verified.event_type,
            event_id: verified.event_id.clone(),
            payload: verified.payload,
            status: WebhookEventStatus::Pending,
            attempts: 0,
            max_attempts: 5,
            next_attempt_at: None,
            last_error: None,
            created_at: Utc::now(),
        };

        match self.events.insert(&event) {
            Ok(()) => self.dispatch(event).await,
            Err(ConductorError::Conflict(_)) => {
                // Lost a race with a concurrent delivery of the same event
                // (spec §8 property 6); the row that won processes it.
                match self.events.find_by_provider_event(provider, &verified.event_id)? {
                    Some(existing) if existing.status != WebhookEventStatus::Completed => self.dispatch(existing).await,
                    _ => Ok(()),
                }
            }
            Err(err) => Err(err),
        }
    }

    async fn dispatch(&self, event: WebhookEvent) -> Result<(), ConductorError> {
        self.events.mark_processing(event.id)?;
        match self.handle(&event).await {
            Ok(()) => {
                self.events.mark_completed(event.id)?;
                Ok(())
            }
            Err(err) => {
                let attempts = event.attempts + 1;
                let next_attempt_at = if attempts < event.max_attempts {
                    let delay = self.backoff.delay_for_attempt((attempts + 1).max(2));
                    Some(Utc::now() + chrono::Duration::from_std(delay).unwrap_or(chrono::Duration::seconds(1)))
                } else {
                    None
                };
                self.events
                    .record_failure(event.id, attempts, event.max_attempts, &err.to_string(), next_attempt_at)?;
                Err(err)
            }
        }
    }

    /// Locates the local `Payment` by `provider_charge_id` and applies the
    /// transition the event type implies (spec §4.9 step 4). An event type
    /// this pipeline doesn't recognize, or one with no resolvable payment,
    /// is tolerated rather than retried forever.
    async fn handle(&self, event: &WebhookEvent) -> Result<(), ConductorError> {
        let Some(status) = map_event_type(&event.event_type) else {
            return Ok(());
        };
        let Some(provider_charge_id) = extract_charge_id(event.provider, &event.payload) else {
            return Ok(());
        };
        let Some(payment) = self.payments.find_by_provider_charge_id(&provider_charge_id)? else {
            return Ok(());
        };

        self.orchestrator.reconcile_from_webhook(payment.id, status, None)?;
        Ok(())
    }

    /// Scans for rows due for retry and re-invokes their handler (spec
    /// §4.9 final paragraph). Returns how many rows it attempted.
    pub async fn retry_due(&self, batch_size: u32) -> Result<u32, ConductorError> {
        let due = self.events.due_for_retry(Utc::now(), batch_size)?;
        let handled = due.len() as u32;
        for event in due {
            if let Err(err) = self.dispatch(event).await {
                tracing::warn!(error = %err, "webhook retry attempt failed");
            }
        }
        Ok(handled)
    }

    pub fn spawn_retry_worker(self: Arc<Self>, interval: Duration, batch_size: u32) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                if let Err(err) = self.retry_due(batch_size).await {
                    tracing::warn!(error = %err, "webhook retry sweep failed");
                }
            }
        })
    }
}

fn map_event_type(event_type: &str) -> Option<PaymentStatus> {
    match event_type {
        "succeeded" | "payment_intent.succeeded" | "charge.succeeded" => Some(PaymentStatus::Succeeded),
        "failed" | "payment_intent.payment_failed" | "charge.failed" => Some(PaymentStatus::Failed),
        "requires_action" | "payment_intent.requires_action" => Some(PaymentStatus::RequiresAction),
        "canceled" | "payment_intent.canceled" => Some(PaymentStatus::Canceled),
        "capturable" | "payment_intent.amount_capturable_updated" => Some(PaymentStatus::RequiresCapture),
        "refunded" | "charge.refunded" => Some(PaymentStatus::Refunded),
        "dispute_created" | "charge.dispute.created" => Some(PaymentStatus::Disputed),
        _ => None,
    }
}

/// Each gateway nests the charge id somewhere different in its verified
/// webhook payload (spec §4.9 step 4 assumes we can always find it):
/// Stripe and Airwallex wrap the resource at `data.object.id` under an
/// event envelope whose top-level `id` is the *event's* id, not the
/// charge's; Razorpay nests it at `payload.payment.entity.id`; Xendit
/// posts the charge resource itself, so its top-level `id` already is the
/// charge id.
fn extract_charge_id(provider: ProviderName, payload: &Value) -> Option<String> {
    let nested = match provider {
        ProviderName::Stripe | ProviderName::Airwallex => payload.pointer("/data/object/id"),
        ProviderName::Razorpay => payload.pointer("/payload/payment/entity/id"),
        ProviderName::Xendit => None,
    };

    nested
        .or_else(|| payload.get("provider_charge_id"))
        .or_else(|| payload.get("id"))
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
}
