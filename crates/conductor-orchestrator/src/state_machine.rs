//! Payment orchestrator (C8, spec §4.8): the state machine over `Payment`,
//! wired to the router (C6) for gateway dispatch and the audit log (C11)
//! for every mutating step. Idempotency sealing (C7) wraps these calls at
//! the HTTP layer; this module only ever sees one logical attempt.

use std::sync::Arc;

use chrono::Utc;
use conductor_providers::{CaptureRequest, ChargeRequest, ProviderRouter, RefundRequest};
use conductor_storage::{AuditLogRepository, MappingRepository, PaymentRepository, RefundRepository};
use conductor_types::{
    AuditLog, CaptureMethod, ConductorError, Currency, EntityType, Money, Payment, PaymentStatus,
    ProviderMapping, ProviderName, Refund,
};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::instrument;
use uuid::Uuid;

/// Caller-supplied context for audit rows. The orchestrator has no HTTP
/// context of its own; the server layer threads this through.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    pub ip: Option<String>,
    pub user_agent: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CreateChargeRequest {
    pub tenant_id: Option<Uuid>,
    pub customer_id: String,
    pub amount: Money,
    pub currency: Currency,
    pub payment_method_ref: String,
    pub capture_method: CaptureMethod,
    pub preferred_provider: Option<ProviderName>,
    pub idempotency_key: Option<String>,
    pub metadata: Value,
}

pub struct PaymentOrchestrator {
    payments: Arc<PaymentRepository>,
    refunds: Arc<RefundRepository>,
    mappings: Arc<MappingRepository>,
    router: Arc<ProviderRouter>,
    audit: Arc<AuditLogRepository>,
}

impl PaymentOrchestrator {
    pub fn new(
        payments: Arc<PaymentRepository>,
        refunds: Arc<RefundRepository>,
        mappings: Arc<MappingRepository>,
        router: Arc<ProviderRouter>,
        audit: Arc<AuditLogRepository>,
    ) -> Self {
        PaymentOrchestrator {
            payments,
            refunds,
            mappings,
            router,
            audit,
        }
    }

    fn record_audit(
        &self,
        tenant_id: Option<Uuid>,
        ctx: &RequestContext,
        action: &str,
        resource_id: &str,
        request_summary: String,
        response_code: u16,
        success: bool,
        error: Option<String>,
    ) {
        let entry = AuditLog {
            id: Uuid::new_v4(),
            tenant_id,
            user_id: None,
            action: action.to_string(),
            resource_type: "payment".to_string(),
            resource_id: resource_id.to_string(),
            request_summary,
            response_code,
            success,
            error,
            ip: ctx.ip.clone(),
            user_agent: ctx.user_agent.clone(),
            created_at: Utc::now(),
        };
        if let Err(err) = self.audit.insert(&entry) {
            tracing::warn!(error = %err, action, "failed to write audit row");
        }
    }

    /// *create_charge* (spec §4.8): validate, reserve a `pending` row, route
    /// and call the gateway, then persist the outcome and write the mapping
    /// and audit rows. A gateway failure marks the local row `failed`
    /// rather than leaving it dangling in `pending`.
    #[instrument(skip_all, fields(customer_id = %req.customer_id, amount = req.amount.0, currency = %req.currency))]
    pub async fn create_charge(
        &self,
        req: CreateChargeRequest,
        ctx: &RequestContext,
        cancel: &CancellationToken,
    ) -> Result<Payment, ConductorError> {
        if !req.amount.is_positive() {
            return Err(ConductorError::InvalidRequest("amount must be greater than zero".into()));
        }
        if req.payment_method_ref.trim().is_empty() {
            return Err(ConductorError::InvalidRequest("payment_method_ref is required".into()));
        }

        let now = Utc::now();
        let payment = Payment {
            id: Uuid::new_v4(),
            tenant_id: req.tenant_id,
            customer_id: req.customer_id.clone(),
            amount: req.amount,
            currency: req.currency.clone(),
            status: PaymentStatus::Pending,
            payment_method_ref: req.payment_method_ref.clone(),
            provider_name: None,
            provider_charge_id: None,
            capture_method: req.capture_method,
            captured_amount: Money::ZERO,
            requires_action: false,
            next_action: None,
            client_secret: None,
            idempotency_key: req.idempotency_key.clone(),
            metadata: req.metadata.clone(),
            created_at: now,
            updated_at: now,
        };
        self.payments.insert(&payment)?;

        let summary = format!(
            "amount={} currency={} capture_method={:?}",
            req.amount, req.currency, req.capture_method
        );

        let executor = match self.router.select_for_new_entity(&req.currency, req.preferred_provider) {
            Ok(exec) => exec,
            Err(err) => {
                self.payments.update_status(
                    payment.id,
                    PaymentStatus::Failed,
                    None,
                    None,
                    Money::ZERO,
                    false,
                    None,
                    None,
                )?;
                self.record_audit(
                    req.tenant_id,
                    ctx,
                    "create_charge",
                    &payment.id.to_string(),
                    summary,
                    err.http_status(),
                    false,
                    Some(err.to_string()),
                );
                return Err(err);
            }
        };

        let charge_req = ChargeRequest {
            customer_id: req.customer_id.clone(),
            amount: req.amount,
            currency: req.currency.clone(),
            payment_method_ref: req.payment_method_ref.clone(),
            capture_method: req.capture_method,
            idempotency_key: req.idempotency_key.clone(),
            metadata: req.metadata.clone(),
        };

        let result = executor
            .execute(cancel, |adapter| {
                let charge_req = charge_req.clone();
                async move { adapter.charge(charge_req).await }
            })
            .await;

        match result {
            Ok(charge_result) => {
                self.payments.update_status(
                    payment.id,
                    charge_result.status,
                    Some(executor.name()),
                    Some(&charge_result.provider_charge_id),
                    charge_result.captured_amount,
                    charge_result.requires_action,
                    charge_result.next_action.as_ref(),
                    charge_result.client_secret.as_deref(),
                )?;
                self.mappings.create(&ProviderMapping {
                    entity_id: payment.id,
                    entity_type: EntityType::Payment,
                    provider_name: executor.name(),
                    provider_entity_id: charge_result.provider_charge_id.clone(),
                })?;
                self.record_audit(
                    req.tenant_id,
                    ctx,
                    "create_charge",
                    &payment.id.to_string(),
                    summary,
                    200,
                    true,
                    None,
                );
                self.payments
                    .find(payment.id)?
                    .ok_or_else(|| ConductorError::Internal("payment vanished after insert".into()))
            }
            Err(err) => {
                self.payments.update_status(
                    payment.id,
                    PaymentStatus::Failed,
                    None,
                    None,
                    Money::ZERO,
                    false,
                    None,
                    None,
                )?;
                self.record_audit(
                    req.tenant_id,
                    ctx,
                    "create_charge",
                    &payment.id.to_string(),
                    summary,
                    err.http_status(),
                    false,
                    Some(err.to_string()),
                );
                Err(err)
            }
        }
    }

    /// *authorize* (spec §4.8): identical to `create_charge` with manual
    /// capture so the gateway reserves funds without settling them.
    pub async fn authorize(
        &self,
        mut req: CreateChargeRequest,
        ctx: &RequestContext,
        cancel: &CancellationToken,
    ) -> Result<Payment, ConductorError> {
        req.capture_method = CaptureMethod::Manual;
        self.create_charge(req, ctx, cancel).await
    }

    /// *capture* (spec §4.8): only from `requires_capture`; `amount`
    /// defaults to the full authorized amount and must not exceed it.
    #[instrument(skip_all, fields(payment_id = %payment_id))]
    pub async fn capture(
        &self,
        payment_id: Uuid,
        amount: Option<Money>,
        ctx: &RequestContext,
        cancel: &CancellationToken,
    ) -> Result<Payment, ConductorError> {
        let payment = self
            .payments
            .find(payment_id)?
            .ok_or_else(|| ConductorError::NotFound(format!("payment {payment_id}")))?;

        if payment.status != PaymentStatus::RequiresCapture {
            return Err(ConductorError::InvalidRequest(format!(
                "payment {payment_id} is not capturable from status {}",
                payment.status
            )));
        }

        let capture_amount = amount.unwrap_or(payment.amount);
        if capture_amount.0 <= 0 || capture_amount.0 > payment.amount.0 {
            return Err(ConductorError::InvalidRequest(
                "capture amount must be positive and not exceed the authorized amount".into(),
            ));
        }

        let provider_name = payment
            .provider_name
            .ok_or_else(|| ConductorError::Internal(format!("payment {payment_id} has no provider bound")))?;
        let provider_charge_id = payment
            .provider_charge_id
            .clone()
            .ok_or_else(|| ConductorError::Internal(format!("payment {payment_id} has no provider charge id")))?;
        let executor = self
            .router
            .executor(provider_name)
            .ok_or_else(|| ConductorError::ProviderUnavailable(provider_name.to_string()))?;

        let summary = format!("capture amount={}", capture_amount);
        let result = executor
            .execute(cancel, |adapter| {
                let provider_charge_id = provider_charge_id.clone();
                let amount = Some(capture_amount);
                async move { adapter.capture(CaptureRequest { provider_charge_id, amount }).await }
            })
            .await;

        match result {
            Ok(charge_result) => {
                self.payments.update_status(
                    payment.id,
                    charge_result.status,
                    payment.provider_name,
                    payment.provider_charge_id.as_deref(),
                    charge_result.captured_amount,
                    false,
                    None,
                    payment.client_secret.as_deref(),
                )?;
                self.record_audit(payment.tenant_id, ctx, "capture", &payment.id.to_string(), summary, 200, true, None);
                self.payments
                    .find(payment.id)?
                    .ok_or_else(|| ConductorError::Internal("payment vanished after capture".into()))
            }
            Err(err) => {
                self.record_audit(
                    payment.tenant_id,
                    ctx,
                    "capture",
                    &payment.id.to_string(),
                    summary,
                    err.http_status(),
                    false,
                    Some(err.to_string()),
                );
                Err(err)
            }
        }
    }

    /// *void* (spec §4.8): only from `requires_capture | pending`.
    #[instrument(skip_all, fields(payment_id = %payment_id))]
    pub async fn void(
        &self,
        payment_id: Uuid,
        ctx: &RequestContext,
        cancel: &CancellationToken,
    ) -> Result<Payment, ConductorError> {
        let payment = self
            .payments
            .find(payment_id)?
            .ok_or_else(|| ConductorError::NotFound(format!("payment {payment_id}")))?;

        if !matches!(payment.status, PaymentStatus::RequiresCapture | PaymentStatus::Pending) {
            return Err(ConductorError::InvalidRequest(format!(
                "payment {payment_id} cannot be voided from status {}",
                payment.status
            )));
        }

        let provider_name = payment
            .provider_name
            .ok_or_else(|| ConductorError::Internal(format!("payment {payment_id} has no provider bound")))?;
        let provider_charge_id = payment
            .provider_charge_id
            .clone()
            .ok_or_else(|| ConductorError::Internal(format!("payment {payment_id} has no provider charge id")))?;
        let executor = self
            .router
            .executor(provider_name)
            .ok_or_else(|| ConductorError::ProviderUnavailable(provider_name.to_string()))?;

        let result = executor
            .execute(cancel, |adapter| {
                let provider_charge_id = provider_charge_id.clone();
                async move { adapter.void(&provider_charge_id).await }
            })
            .await;

        match result {
            Ok(_charge_result) => {
                self.payments.update_status(
                    payment.id,
                    PaymentStatus::Canceled,
                    payment.provider_name,
                    payment.provider_charge_id.as_deref(),
                    payment.captured_amount,
                    false,
                    None,
                    payment.client_secret.as_deref(),
                )?;
                self.record_audit(payment.tenant_id, ctx, "void", &payment.id.to_string(), String::new(), 200, true, None);
                self.payments
                    .find(payment.id)?
                    .ok_or_else(|| ConductorError::Internal("payment vanished after void".into()))
            }
            Err(err) => {
                self.record_audit(
                    payment.tenant_id,
                    ctx,
                    "void",
                    &payment.id.to_string(),
                    String::new(),
                    err.http_status(),
                    false,
                    Some(err.to_string()),
                );
                Err(err)
            }
        }
    }

    /// *confirm_3ds* (spec §4.8): re-projects the gateway's current state;
    /// it does not itself capture.
    #[instrument(skip_all, fields(payment_id = %payment_id))]
    pub async fn confirm_3ds(
        &self,
        payment_id: Uuid,
        ctx: &RequestContext,
        cancel: &CancellationToken,
    ) -> Result<Payment, ConductorError> {
        let payment = self
            .payments
            .find(payment_id)?
            .ok_or_else(|| ConductorError::NotFound(format!("payment {payment_id}")))?;

        let provider_name = payment
            .provider_name
            .ok_or_else(|| ConductorError::Internal(format!("payment {payment_id} has no provider bound")))?;
        let provider_charge_id = payment
            .provider_charge_id
            .clone()
            .ok_or_else(|| ConductorError::Internal(format!("payment {payment_id} has no provider charge id")))?;
        let executor = self
            .router
            .executor(provider_name)
            .ok_or_else(|| ConductorError::ProviderUnavailable(provider_name.to_string()))?;

        let result = executor
            .execute(cancel, |adapter| {
                let provider_charge_id = provider_charge_id.clone();
                async move { adapter.confirm_3ds(&provider_charge_id).await }
            })
            .await;

        match result {
            Ok(charge_result) => {
                self.payments.update_status(
                    payment.id,
                    charge_result.status,
                    payment.provider_name,
                    payment.provider_charge_id.as_deref(),
                    charge_result.captured_amount,
                    charge_result.requires_action,
                    charge_result.next_action.as_ref(),
                    charge_result.client_secret.as_deref(),
                )?;
                self.record_audit(
                    payment.tenant_id,
                    ctx,
                    "confirm_3ds",
                    &payment.id.to_string(),
                    String::new(),
                    200,
                    true,
                    None,
                );
                self.payments
                    .find(payment.id)?
                    .ok_or_else(|| ConductorError::Internal("payment vanished after confirm".into()))
            }
            Err(err) => {
                self.record_audit(
                    payment.tenant_id,
                    ctx,
                    "confirm_3ds",
                    &payment.id.to_string(),
                    String::new(),
                    err.http_status(),
                    false,
                    Some(err.to_string()),
                );
                Err(err)
            }
        }
    }

    /// *refund* (spec §4.8): only from `succeeded | partially_refunded`;
    /// `amount` must not exceed `captured_amount − Σ prior refunds`.
    #[instrument(skip_all, fields(payment_id = %payment_id, amount = amount.0))]
    pub async fn refund(
        &self,
        payment_id: Uuid,
        amount: Money,
        reason: Option<String>,
        ctx: &RequestContext,
        cancel: &CancellationToken,
    ) -> Result<Refund, ConductorError> {
        let payment = self
            .payments
            .find(payment_id)?
            .ok_or_else(|| ConductorError::NotFound(format!("payment {payment_id}")))?;

        if !matches!(payment.status, PaymentStatus::Succeeded | PaymentStatus::PartiallyRefunded) {
            return Err(ConductorError::InvalidRequest(format!(
                "payment {payment_id} is not refundable from status {}",
                payment.status
            )));
        }

        let already_refunded = self.refunds.total_refunded(payment_id)?;
        let remaining = payment.remaining_refundable(already_refunded);
        if !amount.is_positive() || amount.0 > remaining.0 {
            return Err(ConductorError::InvalidRequest(format!(
                "refund amount {} exceeds remaining refundable amount {}",
                amount, remaining
            )));
        }

        let provider_name = payment
            .provider_name
            .ok_or_else(|| ConductorError::Internal(format!("payment {payment_id} has no provider bound")))?;
        let provider_charge_id = payment
            .provider_charge_id
            .clone()
            .ok_or_else(|| ConductorError::Internal(format!("payment {payment_id} has no provider charge id")))?;
        let executor = self
            .router
            .executor(provider_name)
            .ok_or_else(|| ConductorError::ProviderUnavailable(provider_name.to_string()))?;

        let summary = format!("refund amount={}", amount);
        let currency = payment.currency.clone();
        let reason_for_call = reason.clone();
        let result = executor
            .execute(cancel, |adapter| {
                let req = RefundRequest {
                    provider_charge_id: provider_charge_id.clone(),
                    amount,
                    currency: currency.clone(),
                    reason: reason_for_call.clone(),
                };
                async move { adapter.refund(req).await }
            })
            .await;

        let refund_result = match result {
            Ok(r) => r,
            Err(err) => {
                self.record_audit(
                    payment.tenant_id,
                    ctx,
                    "refund",
                    &payment.id.to_string(),
                    summary,
                    err.http_status(),
                    false,
                    Some(err.to_string()),
                );
                return Err(err);
            }
        };

        let refund = Refund {
            id: Uuid::new_v4(),
            payment_id,
            amount,
            currency: payment.currency.clone(),
            reason,
            status: refund_result.status,
            provider_name,
            provider_refund_id: Some(refund_result.provider_refund_id),
            created_at: Utc::now(),
        };
        self.refunds.insert(&refund)?;

        let new_total = already_refunded.checked_add(amount).unwrap_or(already_refunded);
        let new_status = if new_total.0 >= payment.captured_amount.0 {
            PaymentStatus::Refunded
        } else {
            PaymentStatus::PartiallyRefunded
        };
        self.payments.update_status(
            payment.id,
            new_status,
            payment.provider_name,
            payment.provider_charge_id.as_deref(),
            payment.captured_amount,
            false,
            None,
            payment.client_secret.as_deref(),
        )?;

        self.record_audit(payment.tenant_id, ctx, "refund", &payment.id.to_string(), summary, 200, true, None);
        Ok(refund)
    }

    /// Applies a status transition reported by an inbound webhook handler
    /// (spec §4.9 step 4) to the local `Payment` row. Unknown payments are
    /// the caller's concern — this only runs once the row has been found.
    pub fn reconcile_from_webhook(
        &self,
        payment_id: Uuid,
        new_status: PaymentStatus,
        captured_amount: Option<Money>,
    ) -> Result<Payment, ConductorError> {
        let payment = self
            .payments
            .find(payment_id)?
            .ok_or_else(|| ConductorError::NotFound(format!("payment {payment_id}")))?;

        let amount = captured_amount.unwrap_or(payment.captured_amount);
        self.payments.update_status(
            payment_id,
            new_status,
            payment.provider_name,
            payment.provider_charge_id.as_deref(),
            amount,
            false,
            None,
            payment.client_secret.as_deref(),
        )?;

        self.record_audit(
            payment.tenant_id,
            &RequestContext::default(),
            "webhook_reconcile",
            &payment_id.to_string(),
            format!("status={new_status}"),
            200,
            true,
            None,
        );

        self.payments
            .find(payment_id)?
            .ok_or_else(|| ConductorError::Internal("payment vanished after webhook reconcile".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use conductor_providers::{
        Capabilities, Capability, ChargeResult, ExecutorConfig, ProviderAdapter, ProviderError,
        ProviderExecutor, ProviderRouter, RefundResult, VerifiedWebhookEvent, WebhookHeaders,
    };
    use conductor_storage::{AuditLogRepository, Database, MappingRepository, PaymentRepository, RefundRepository};
    use conductor_types::Currency;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    /// Adapter test double: always succeeds as Stripe unless `fail_all` is set.
    struct StubAdapter {
        name: ProviderName,
        capabilities: Capabilities,
        fail_all: AtomicBool,
    }

    impl StubAdapter {
        fn stripe() -> Self {
            StubAdapter {
                name: ProviderName::Stripe,
                capabilities: Capabilities::new([Capability::Charge, Capability::Refund, Capability::Capture, Capability::Void], ["USD"], ["card"]),
                fail_all: AtomicBool::new(false),
            }
        }
    }

    #[async_trait]
    impl ProviderAdapter for StubAdapter {
        fn name(&self) -> ProviderName {
            self.name
        }

        fn capabilities(&self) -> &Capabilities {
            &self.capabilities
        }

        async fn charge(&self, req: ChargeRequest) -> Result<ChargeResult, ProviderError> {
            if self.fail_all.load(Ordering::SeqCst) {
                return Err(ProviderError::Fatal("down".into()));
            }
            let status = match req.capture_method {
                CaptureMethod::Automatic => PaymentStatus::Succeeded,
                CaptureMethod::Manual => PaymentStatus::RequiresCapture,
            };
            let captured = match req.capture_method {
                CaptureMethod::Automatic => req.amount,
                CaptureMethod::Manual => Money::ZERO,
            };
            Ok(ChargeResult {
                provider_charge_id: format!("ch_{}", Uuid::new_v4()),
                status,
                requires_action: false,
                next_action: None,
                client_secret: None,
                captured_amount: captured,
            })
        }

        async fn refund(&self, _req: RefundRequest) -> Result<RefundResult, ProviderError> {
            Ok(RefundResult {
                provider_refund_id: format!("re_{}", Uuid::new_v4()),
                status: PaymentStatus::Succeeded,
            })
        }

        async fn capture(&self, req: CaptureRequest) -> Result<ChargeResult, ProviderError> {
            Ok(ChargeResult {
                provider_charge_id: req.provider_charge_id,
                status: PaymentStatus::Succeeded,
                requires_action: false,
                next_action: None,
                client_secret: None,
                captured_amount: req.amount.unwrap_or(Money::ZERO),
            })
        }

        async fn void(&self, provider_charge_id: &str) -> Result<ChargeResult, ProviderError> {
            Ok(ChargeResult {
                provider_charge_id: provider_charge_id.to_string(),
                status: PaymentStatus::Canceled,
                requires_action: false,
                next_action: None,
                client_secret: None,
                captured_amount: Money::ZERO,
            })
        }

        async fn confirm_3ds(&self, provider_charge_id: &str) -> Result<ChargeResult, ProviderError> {
            Ok(ChargeResult {
                provider_charge_id: provider_charge_id.to_string(),
                status: PaymentStatus::Succeeded,
                requires_action: false,
                next_action: None,
                client_secret: None,
                captured_amount: Money(2500),
            })
        }

        async fn is_available(&self) -> bool {
            !self.fail_all.load(Ordering::SeqCst)
        }

        fn verify_webhook(&self, _h: &WebhookHeaders, _b: &[u8]) -> Result<VerifiedWebhookEvent, ProviderError> {
            Err(ProviderError::NotSupported)
        }
    }

    fn orchestrator() -> PaymentOrchestrator {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let payments = Arc::new(PaymentRepository::new(db.clone()));
        let refunds = Arc::new(RefundRepository::new(db.clone()));
        let mappings = Arc::new(MappingRepository::new(db.clone()));
        let audit = Arc::new(AuditLogRepository::new(db));

        let adapter = Arc::new(StubAdapter::stripe());
        let mut config = ExecutorConfig::default();
        config.health_interval = Duration::from_secs(3600);
        let executor = Arc::new(ProviderExecutor::new(adapter, config));
        let router = Arc::new(ProviderRouter::new(vec![executor]));

        PaymentOrchestrator::new(payments, refunds, mappings, router, audit)
    }

    fn charge_req(amount: i64, currency: &str, capture_method: CaptureMethod) -> CreateChargeRequest {
        CreateChargeRequest {
            tenant_id: None,
            customer_id: "cus_1".into(),
            amount: Money(amount),
            currency: Currency::new(currency),
            payment_method_ref: "pm_1".into(),
            capture_method,
            preferred_provider: None,
            idempotency_key: Some("k1".into()),
            metadata: Value::Null,
        }
    }

    #[tokio::test]
    async fn create_charge_succeeds_and_writes_mapping() {
        let orch = orchestrator();
        let cancel = CancellationToken::new();
        let payment = orch
            .create_charge(charge_req(2500, "USD", CaptureMethod::Automatic), &RequestContext::default(), &cancel)
            .await
            .unwrap();

        assert_eq!(payment.status, PaymentStatus::Succeeded);
        assert_eq!(payment.provider_name, Some(ProviderName::Stripe));
        assert_eq!(payment.captured_amount, Money(2500));

        let mapping = orch.mappings.find(payment.id, EntityType::Payment).unwrap().unwrap();
        assert_eq!(mapping.provider_name, ProviderName::Stripe);
    }

    #[tokio::test]
    async fn create_charge_rejects_non_positive_amount() {
        let orch = orchestrator();
        let cancel = CancellationToken::new();
        let result = orch
            .create_charge(charge_req(0, "USD", CaptureMethod::Automatic), &RequestContext::default(), &cancel)
            .await;
        assert!(matches!(result, Err(ConductorError::InvalidRequest(_))));
    }

    #[tokio::test]
    async fn authorize_then_capture_transitions_to_succeeded() {
        let orch = orchestrator();
        let cancel = CancellationToken::new();
        let authorized = orch
            .authorize(charge_req(2500, "USD", CaptureMethod::Automatic), &RequestContext::default(), &cancel)
            .await
            .unwrap();
        assert_eq!(authorized.status, PaymentStatus::RequiresCapture);
        assert_eq!(authorized.captured_amount, Money::ZERO);

        let captured = orch
            .capture(authorized.id, None, &RequestContext::default(), &cancel)
            .await
            .unwrap();
        assert_eq!(captured.status, PaymentStatus::Succeeded);
        assert_eq!(captured.captured_amount, Money(2500));
    }

    #[tokio::test]
    async fn capture_rejects_amount_above_authorized() {
        let orch = orchestrator();
        let cancel = CancellationToken::new();
        let authorized = orch
            .authorize(charge_req(2500, "USD", CaptureMethod::Automatic), &RequestContext::default(), &cancel)
            .await
            .unwrap();

        let result = orch.capture(authorized.id, Some(Money(5000)), &RequestContext::default(), &cancel).await;
        assert!(matches!(result, Err(ConductorError::InvalidRequest(_))));
    }

    #[tokio::test]
    async fn capture_rejects_from_wrong_status() {
        let orch = orchestrator();
        let cancel = CancellationToken::new();
        let succeeded = orch
            .create_charge(charge_req(2500, "USD", CaptureMethod::Automatic), &RequestContext::default(), &cancel)
            .await
            .unwrap();

        let result = orch.capture(succeeded.id, None, &RequestContext::default(), &cancel).await;
        assert!(matches!(result, Err(ConductorError::InvalidRequest(_))));
    }

    #[tokio::test]
    async fn void_cancels_an_authorized_payment() {
        let orch = orchestrator();
        let cancel = CancellationToken::new();
        let authorized = orch
            .authorize(charge_req(2500, "USD", CaptureMethod::Automatic), &RequestContext::default(), &cancel)
            .await
            .unwrap();

        let voided = orch.void(authorized.id, &RequestContext::default(), &cancel).await.unwrap();
        assert_eq!(voided.status, PaymentStatus::Canceled);
    }

    #[tokio::test]
    async fn refund_within_cap_partially_refunds() {
        let orch = orchestrator();
        let cancel = CancellationToken::new();
        let payment = orch
            .create_charge(charge_req(2500, "USD", CaptureMethod::Automatic), &RequestContext::default(), &cancel)
            .await
            .unwrap();

        let refund = orch
            .refund(payment.id, Money(1000), None, &RequestContext::default(), &cancel)
            .await
            .unwrap();
        assert_eq!(refund.amount, Money(1000));

        let after = orch.payments.find(payment.id).unwrap().unwrap();
        assert_eq!(after.status, PaymentStatus::PartiallyRefunded);
    }

    #[tokio::test]
    async fn refund_for_full_captured_amount_marks_refunded() {
        let orch = orchestrator();
        let cancel = CancellationToken::new();
        let payment = orch
            .create_charge(charge_req(2500, "USD", CaptureMethod::Automatic), &RequestContext::default(), &cancel)
            .await
            .unwrap();

        orch.refund(payment.id, Money(2500), None, &RequestContext::default(), &cancel)
            .await
            .unwrap();

        let after = orch.payments.find(payment.id).unwrap().unwrap();
        assert_eq!(after.status, PaymentStatus::Refunded);
    }

    #[tokio::test]
    async fn refund_overflow_is_rejected_and_leaves_captured_amount_unchanged() {
        let orch = orchestrator();
        let cancel = CancellationToken::new();
        let payment = orch
            .create_charge(charge_req(2500, "USD", CaptureMethod::Automatic), &RequestContext::default(), &cancel)
            .await
            .unwrap();

        orch.refund(payment.id, Money(1000), None, &RequestContext::default(), &cancel)
            .await
            .unwrap();

        let result = orch.refund(payment.id, Money(2000), None, &RequestContext::default(), &cancel).await;
        assert!(matches!(result, Err(ConductorError::InvalidRequest(_))));

        let after = orch.payments.find(payment.id).unwrap().unwrap();
        assert_eq!(after.captured_amount, Money(2500));
        assert_eq!(after.status, PaymentStatus::PartiallyRefunded);
    }

    #[tokio::test]
    async fn reconcile_from_webhook_applies_status() {
        let orch = orchestrator();
        let cancel = CancellationToken::new();
        let payment = orch
            .authorize(charge_req(2500, "USD", CaptureMethod::Manual), &RequestContext::default(), &cancel)
            .await
            .unwrap();

        let reconciled = orch
            .reconcile_from_webhook(payment.id, PaymentStatus::Succeeded, Some(Money(2500)))
            .unwrap();
        assert_eq!(reconciled.status, PaymentStatus::Succeeded);
        assert_eq!(reconciled.captured_amount, Money(2500));
    }
}
