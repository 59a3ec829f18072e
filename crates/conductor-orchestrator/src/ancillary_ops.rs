//! Ancillary entity operations (SPEC_FULL §3 `[ADDED]` entities): customers,
//! payment methods, subscriptions, invoices, payouts and disputes. These
//! participate in `ProviderMapping` exactly like payments (SPEC_FULL §3),
//! but unlike the payment state machine (C8) they don't carry a full
//! lifecycle of their own — one request in, one gateway call, one row
//! persisted. Grounded on the same reserve/call/commit shape
//! [`crate::state_machine::PaymentOrchestrator`] uses for the payment
//! lifecycle, generalized to these thinner entities.

use std::sync::Arc;

use chrono::Utc;
use conductor_providers::ProviderRouter;
use conductor_storage::{
    AuditLogRepository, CustomerRepository, DisputeRepository, InvoiceRepository,
    MappingRepository, PayoutRepository, PaymentMethodRepository, PlanRepository,
    SubscriptionRepository,
};
use conductor_types::{
    AuditLog, ConductorError, Currency, Customer, Dispute, DisputeStatus, EntityType, Invoice,
    InvoiceStatus, Money, Payout, PayoutStatus, PaymentMethod, Plan, ProviderMapping,
    ProviderName, Subscription, SubscriptionStatus,
};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::instrument;
use uuid::Uuid;

pub struct CreateCustomerRequest {
    pub tenant_id: Option<Uuid>,
    pub email: Option<String>,
    pub name: Option<String>,
    pub preferred_provider: Option<ProviderName>,
    /// First-touch routing hint (spec §4.6 mode 1); customers have no
    /// amount/currency of their own, so the caller supplies one.
    pub routing_currency: Currency,
}

pub struct AncillaryOrchestrator {
    customers: Arc<CustomerRepository>,
    payment_methods: Arc<PaymentMethodRepository>,
    plans: Arc<PlanRepository>,
    subscriptions: Arc<SubscriptionRepository>,
    invoices: Arc<InvoiceRepository>,
    payouts: Arc<PayoutRepository>,
    disputes: Arc<DisputeRepository>,
    mappings: Arc<MappingRepository>,
    router: Arc<ProviderRouter>,
    audit: Arc<AuditLogRepository>,
}

impl AncillaryOrchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        customers: Arc<CustomerRepository>,
        payment_methods: Arc<PaymentMethodRepository>,
        plans: Arc<PlanRepository>,
        subscriptions: Arc<SubscriptionRepository>,
        invoices: Arc<InvoiceRepository>,
        payouts: Arc<PayoutRepository>,
        disputes: Arc<DisputeRepository>,
        mappings: Arc<MappingRepository>,
        router: Arc<ProviderRouter>,
        audit: Arc<AuditLogRepository>,
    ) -> Self {
        AncillaryOrchestrator {
            customers,
            payment_methods,
            plans,
            subscriptions,
            invoices,
            payouts,
            disputes,
            mappings,
            router,
            audit,
        }
    }

    fn record_audit(&self, tenant_id: Option<Uuid>, action: &str, resource_type: &str, resource_id: &str, response_code: u16, success: bool, error: Option<String>) {
        let entry = AuditLog {
            id: Uuid::new_v4(),
            tenant_id,
            user_id: None,
            action: action.to_string(),
            resource_type: resource_type.to_string(),
            resource_id: resource_id.to_string(),
            request_summary: String::new(),
            response_code,
            success,
            error,
            ip: None,
            user_agent: None,
            created_at: Utc::now(),
        };
        if let Err(err) = self.audit.insert(&entry) {
            tracing::warn!(error = %err, action, "failed to write audit row");
        }
    }

    #[instrument(skip_all)]
    pub async fn create_customer(&self, req: CreateCustomerRequest, cancel: &CancellationToken) -> Result<Customer, ConductorError> {
        let executor = self.router.select_for_new_entity(&req.routing_currency, req.preferred_provider)?;
        let email = req.email.clone();
        let name = req.name.clone();
        let provider_customer_id = executor
            .execute(cancel, |adapter| {
                let email = email.clone();
                let name = name.clone();
                async move { adapter.create_customer(email.as_deref(), name.as_deref()).await }
            })
            .await?;

        let customer = Customer {
            id: Uuid::new_v4(),
            tenant_id: req.tenant_id,
            provider_name: Some(executor.name()),
            provider_customer_id: Some(provider_customer_id),
            email: req.email,
            name: req.name,
            metadata: Value::Null,
            created_at: Utc::now(),
        };
        self.customers.insert(&customer)?;
        self.record_audit(req.tenant_id, "create_customer", "customer", &customer.id.to_string(), 200, true, None);
        Ok(customer)
    }

    /// Payment methods are never re-targeted to a different gateway
    /// (SPEC_FULL §3), so dispatch is bound to `customer.provider_name`
    /// directly rather than through `ProviderMapping`.
    #[instrument(skip_all, fields(customer_id = %customer.id))]
    pub async fn attach_payment_method(
        &self,
        customer: &Customer,
        payment_method_ref: &str,
        method_type: String,
        last4: Option<String>,
        brand: Option<String>,
        cancel: &CancellationToken,
    ) -> Result<PaymentMethod, ConductorError> {
        let provider_name = customer
            .provider_name
            .ok_or_else(|| ConductorError::InvalidRequest(format!("customer {} has no provider", customer.id)))?;
        let provider_customer_id = customer
            .provider_customer_id
            .clone()
            .ok_or_else(|| ConductorError::InvalidRequest(format!("customer {} has no provider customer id", customer.id)))?;
        let executor = self
            .router
            .executor(provider_name)
            .ok_or_else(|| ConductorError::ProviderUnavailable(provider_name.to_string()))?;

        let ref_clone = payment_method_ref.to_string();
        let provider_payment_method_id = executor
            .execute(cancel, |adapter| {
                let provider_customer_id = provider_customer_id.clone();
                let ref_clone = ref_clone.clone();
                async move { adapter.attach_payment_method(&provider_customer_id, &ref_clone).await }
            })
            .await?;

        let pm = PaymentMethod {
            id: Uuid::new_v4(),
            tenant_id: customer.tenant_id,
            customer_id: customer.id.to_string(),
            provider_name,
            provider_payment_method_id,
            method_type,
            last4,
            brand,
            is_default: false,
            metadata: Value::Null,
            created_at: Utc::now(),
        };
        self.payment_methods.insert(&pm)?;
        self.record_audit(customer.tenant_id, "attach_payment_method", "payment_method", &pm.id.to_string(), 200, true, None);
        Ok(pm)
    }

    /// *create_subscription*: dispatches to whichever gateway the plan was
    /// provisioned on (plans are provider-specific, unlike currencies).
    #[instrument(skip_all, fields(plan_id = %plan.id))]
    pub async fn create_subscription(
        &self,
        tenant_id: Option<Uuid>,
        customer_provider_id: &str,
        customer_id: &str,
        plan: &Plan,
        cancel: &CancellationToken,
    ) -> Result<Subscription, ConductorError> {
        let executor = self
            .router
            .executor(plan.provider_name)
            .ok_or_else(|| ConductorError::ProviderUnavailable(plan.provider_name.to_string()))?;

        let plan_provider_id = plan.provider_plan_id.clone();
        let customer_provider_id = customer_provider_id.to_string();
        let result = executor
            .execute(cancel, |adapter| {
                let plan_provider_id = plan_provider_id.clone();
                let customer_provider_id = customer_provider_id.clone();
                async move { adapter.create_subscription(&plan_provider_id, &customer_provider_id).await }
            })
            .await?;

        let subscription = Subscription {
            id: Uuid::new_v4(),
            tenant_id,
            customer_id: customer_id.to_string(),
            plan_id: plan.id,
            provider_name: executor.name(),
            provider_subscription_id: result.provider_subscription_id.clone(),
            status: result.status,
            current_period_end: result.current_period_end,
            created_at: Utc::now(),
        };
        self.subscriptions.insert(&subscription)?;
        self.mappings.create(&ProviderMapping {
            entity_id: subscription.id,
            entity_type: EntityType::Subscription,
            provider_name: executor.name(),
            provider_entity_id: result.provider_subscription_id,
        })?;
        self.record_audit(tenant_id, "create_subscription", "subscription", &subscription.id.to_string(), 200, true, None);
        Ok(subscription)
    }

    #[instrument(skip_all, fields(subscription_id = %subscription_id))]
    pub async fn cancel_subscription(&self, subscription_id: Uuid, cancel: &CancellationToken) -> Result<Subscription, ConductorError> {
        let subscription = self
            .subscriptions
            .find(subscription_id)?
            .ok_or_else(|| ConductorError::NotFound(format!("subscription {subscription_id}")))?;

        let executor = self
            .router
            .executor(subscription.provider_name)
            .ok_or_else(|| ConductorError::ProviderUnavailable(subscription.provider_name.to_string()))?;

        let provider_subscription_id = subscription.provider_subscription_id.clone();
        executor
            .execute(cancel, |adapter| {
                let provider_subscription_id = provider_subscription_id.clone();
                async move { adapter.cancel_subscription(&provider_subscription_id).await }
            })
            .await?;

        self.subscriptions
            .update_after_gateway_sync(subscription_id, SubscriptionStatus::Canceled, subscription.current_period_end)?;
        self.record_audit(subscription.tenant_id, "cancel_subscription", "subscription", &subscription_id.to_string(), 200, true, None);
        self.subscriptions
            .find(subscription_id)?
            .ok_or_else(|| ConductorError::Internal("subscription vanished after cancel".into()))
    }

    #[instrument(skip_all)]
    pub async fn create_invoice(
        &self,
        tenant_id: Option<Uuid>,
        customer_id: &str,
        customer_provider_id: &str,
        amount: Money,
        currency: Currency,
        preferred_provider: Option<ProviderName>,
        cancel: &CancellationToken,
    ) -> Result<Invoice, ConductorError> {
        if !amount.is_positive() {
            return Err(ConductorError::InvalidRequest("amount must be greater than zero".into()));
        }
        let executor = self.router.select_for_new_entity(&currency, preferred_provider)?;

        let customer_provider_id = customer_provider_id.to_string();
        let provider_invoice_id = executor
            .execute(cancel, |adapter| {
                let customer_provider_id = customer_provider_id.clone();
                let currency = currency.clone();
                async move { adapter.create_invoice(&customer_provider_id, amount, &currency).await }
            })
            .await?;

        let invoice = Invoice {
            id: Uuid::new_v4(),
            tenant_id,
            customer_id: customer_id.to_string(),
            amount,
            currency,
            status: InvoiceStatus::Open,
            provider_name: executor.name(),
            provider_invoice_id: provider_invoice_id.clone(),
            due_at: None,
            created_at: Utc::now(),
        };
        self.invoices.insert(&invoice)?;
        self.mappings.create(&ProviderMapping {
            entity_id: invoice.id,
            entity_type: EntityType::Invoice,
            provider_name: executor.name(),
            provider_entity_id: provider_invoice_id,
        })?;
        self.record_audit(tenant_id, "create_invoice", "invoice", &invoice.id.to_string(), 200, true, None);
        Ok(invoice)
    }

    /// No gateway call: voiding an invoice before it's paid is a local
    /// bookkeeping action every gateway treats the same way.
    #[instrument(skip_all, fields(invoice_id = %invoice_id))]
    pub fn void_invoice(&self, invoice_id: Uuid) -> Result<Invoice, ConductorError> {
        let invoice = self
            .invoices
            .find(invoice_id)?
            .ok_or_else(|| ConductorError::NotFound(format!("invoice {invoice_id}")))?;
        if !matches!(invoice.status, InvoiceStatus::Draft | InvoiceStatus::Open) {
            return Err(ConductorError::InvalidRequest(format!(
                "invoice {invoice_id} cannot be voided from status {:?}",
                invoice.status
            )));
        }
        self.invoices.update_status(invoice_id, InvoiceStatus::Void)?;
        self.record_audit(invoice.tenant_id, "void_invoice", "invoice", &invoice_id.to_string(), 200, true, None);
        self.invoices
            .find(invoice_id)?
            .ok_or_else(|| ConductorError::Internal("invoice vanished after void".into()))
    }

    #[instrument(skip_all)]
    pub async fn create_payout(
        &self,
        tenant_id: Option<Uuid>,
        destination: &str,
        amount: Money,
        currency: Currency,
        preferred_provider: Option<ProviderName>,
        cancel: &CancellationToken,
    ) -> Result<Payout, ConductorError> {
        if !amount.is_positive() {
            return Err(ConductorError::InvalidRequest("amount must be greater than zero".into()));
        }
        let executor = self.router.select_for_new_entity(&currency, preferred_provider)?;

        let destination_owned = destination.to_string();
        let provider_payout_id = executor
            .execute(cancel, |adapter| {
                let destination = destination_owned.clone();
                let currency = currency.clone();
                async move { adapter.create_payout(&destination, amount, &currency).await }
            })
            .await?;

        let payout = Payout {
            id: Uuid::new_v4(),
            tenant_id,
            amount,
            currency,
            destination: destination.to_string(),
            status: PayoutStatus::Pending,
            provider_name: executor.name(),
            provider_payout_id: provider_payout_id.clone(),
            created_at: Utc::now(),
        };
        self.payouts.insert(&payout)?;
        self.mappings.create(&ProviderMapping {
            entity_id: payout.id,
            entity_type: EntityType::Payout,
            provider_name: executor.name(),
            provider_entity_id: provider_payout_id,
        })?;
        self.record_audit(tenant_id, "create_payout", "payout", &payout.id.to_string(), 200, true, None);
        Ok(payout)
    }

    #[instrument(skip_all, fields(dispute_id = %dispute_id))]
    pub async fn submit_dispute_evidence(&self, dispute_id: Uuid, evidence: Value, cancel: &CancellationToken) -> Result<Dispute, ConductorError> {
        let dispute = self
            .disputes
            .find(dispute_id)?
            .ok_or_else(|| ConductorError::NotFound(format!("dispute {dispute_id}")))?;

        if dispute.status != DisputeStatus::NeedsResponse {
            return Err(ConductorError::InvalidRequest(format!(
                "dispute {dispute_id} is not awaiting evidence (status {:?})",
                dispute.status
            )));
        }

        let executor = self
            .router
            .executor(dispute.provider_name)
            .ok_or_else(|| ConductorError::ProviderUnavailable(dispute.provider_name.to_string()))?;

        let provider_dispute_id = dispute.provider_dispute_id.clone();
        executor
            .execute(cancel, |adapter| {
                let provider_dispute_id = provider_dispute_id.clone();
                let evidence = evidence.clone();
                async move { adapter.submit_dispute_evidence(&provider_dispute_id, evidence).await }
            })
            .await?;

        self.disputes.update_status(dispute_id, DisputeStatus::UnderReview)?;
        self.record_audit(None, "submit_dispute_evidence", "dispute", &dispute_id.to_string(), 200, true, None);
        self.disputes
            .find(dispute_id)?
            .ok_or_else(|| ConductorError::Internal("dispute vanished after evidence submission".into()))
    }

    pub fn list_disputes_for_payment(&self, payment_id: Uuid) -> Result<Vec<Dispute>, ConductorError> {
        self.disputes.find_for_payment(payment_id)
    }

    pub fn find_customer(&self, id: Uuid) -> Result<Option<Customer>, ConductorError> {
        self.customers.find(id)
    }

    pub fn find_plan(&self, id: Uuid) -> Result<Option<Plan>, ConductorError> {
        self.plans.find(id)
    }

    pub fn find_subscription(&self, id: Uuid) -> Result<Option<Subscription>, ConductorError> {
        self.subscriptions.find(id)
    }

    pub fn list_subscriptions(&self, tenant_id: Option<Uuid>) -> Result<Vec<Subscription>, ConductorError> {
        self.subscriptions.list_by_tenant(tenant_id)
    }

    pub fn find_invoice(&self, id: Uuid) -> Result<Option<Invoice>, ConductorError> {
        self.invoices.find(id)
    }

    pub fn find_payout(&self, id: Uuid) -> Result<Option<Payout>, ConductorError> {
        self.payouts.find(id)
    }

    pub fn list_payment_methods(&self, customer_id: &str) -> Result<Vec<PaymentMethod>, ConductorError> {
        self.payment_methods.list_for_customer(customer_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Duration;
    use conductor_providers::{
        CaptureRequest, Capabilities, Capability, ChargeRequest, ChargeResult, ExecutorConfig,
        ProviderAdapter, ProviderError, ProviderExecutor, RefundRequest, RefundResult,
        SubscriptionResult, VerifiedWebhookEvent, WebhookHeaders,
    };
    use conductor_storage::Database;
    use conductor_types::PaymentStatus;

    struct StubAdapter {
        capabilities: Capabilities,
    }

    #[async_trait]
    impl ProviderAdapter for StubAdapter {
        fn name(&self) -> ProviderName {
            ProviderName::Stripe
        }

        fn capabilities(&self) -> &Capabilities {
            &self.capabilities
        }

        async fn charge(&self, _req: ChargeRequest) -> Result<ChargeResult, ProviderError> {
            Err(ProviderError::NotSupported)
        }

        async fn refund(&self, _req: RefundRequest) -> Result<RefundResult, ProviderError> {
            Err(ProviderError::NotSupported)
        }

        async fn capture(&self, _req: CaptureRequest) -> Result<ChargeResult, ProviderError> {
            Err(ProviderError::NotSupported)
        }

        async fn void(&self, _id: &str) -> Result<ChargeResult, ProviderError> {
            Err(ProviderError::NotSupported)
        }

        async fn confirm_3ds(&self, _id: &str) -> Result<ChargeResult, ProviderError> {
            Err(ProviderError::NotSupported)
        }

        async fn is_available(&self) -> bool {
            true
        }

        fn verify_webhook(&self, _h: &WebhookHeaders, _b: &[u8]) -> Result<VerifiedWebhookEvent, ProviderError> {
            Err(ProviderError::NotSupported)
        }

        async fn create_customer(&self, _email: Option<&str>, _name: Option<&str>) -> Result<String, ProviderError> {
            Ok("cus_prov_1".into())
        }

        async fn create_subscription(&self, _plan_provider_id: &str, _customer_id: &str) -> Result<SubscriptionResult, ProviderError> {
            Ok(SubscriptionResult {
                provider_subscription_id: "sub_prov_1".into(),
                status: SubscriptionStatus::Active,
                current_period_end: Utc::now() + Duration::days(30),
            })
        }

        async fn cancel_subscription(&self, _id: &str) -> Result<(), ProviderError> {
            Ok(())
        }

        async fn create_invoice(&self, _customer_id: &str, _amount: Money, _currency: &Currency) -> Result<String, ProviderError> {
            Ok("inv_prov_1".into())
        }

        async fn create_payout(&self, _destination: &str, _amount: Money, _currency: &Currency) -> Result<String, ProviderError> {
            Ok("po_prov_1".into())
        }

        async fn submit_dispute_evidence(&self, _dispute_id: &str, _evidence: Value) -> Result<(), ProviderError> {
            Ok(())
        }
    }

    fn orchestrator() -> AncillaryOrchestrator {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let customers = Arc::new(CustomerRepository::new(db.clone()));
        let payment_methods = Arc::new(PaymentMethodRepository::new(db.clone()));
        let plans = Arc::new(PlanRepository::new(db.clone()));
        let subscriptions = Arc::new(SubscriptionRepository::new(db.clone()));
        let invoices = Arc::new(InvoiceRepository::new(db.clone()));
        let payouts = Arc::new(PayoutRepository::new(db.clone()));
        let disputes = Arc::new(DisputeRepository::new(db.clone()));
        let mappings = Arc::new(MappingRepository::new(db.clone()));
        let audit = Arc::new(AuditLogRepository::new(db));

        let adapter = Arc::new(StubAdapter {
            capabilities: Capabilities::new(
                [Capability::Customer, Capability::Subscription, Capability::Invoice, Capability::Payout, Capability::Dispute],
                ["USD"],
                ["card"],
            ),
        });
        let mut config = ExecutorConfig::default();
        config.health_interval = std::time::Duration::from_secs(3600);
        let executor = Arc::new(ProviderExecutor::new(adapter, config));
        let router = Arc::new(ProviderRouter::new(vec![executor]));

        AncillaryOrchestrator::new(customers, payment_methods, plans, subscriptions, invoices, payouts, disputes, mappings, router, audit)
    }

    #[tokio::test]
    async fn create_customer_persists_provider_identity() {
        let orch = orchestrator();
        let cancel = CancellationToken::new();
        let customer = orch
            .create_customer(
                CreateCustomerRequest {
                    tenant_id: None,
                    email: Some("a@b.com".into()),
                    name: None,
                    preferred_provider: None,
                    routing_currency: Currency::new("USD"),
                },
                &cancel,
            )
            .await
            .unwrap();
        assert_eq!(customer.provider_name, Some(ProviderName::Stripe));
        assert_eq!(customer.provider_customer_id.as_deref(), Some("cus_prov_1"));
    }

    #[tokio::test]
    async fn create_subscription_writes_mapping_with_real_period_end() {
        let orch = orchestrator();
        let cancel = CancellationToken::new();
        let plan = Plan {
            id: Uuid::new_v4(),
            tenant_id: None,
            provider_name: ProviderName::Stripe,
            provider_plan_id: "plan_prov_1".into(),
            amount: Money(999),
            currency: Currency::new("USD"),
            interval: "month".into(),
            interval_count: 1,
        };
        orch.plans.insert(&plan).unwrap();

        let subscription = orch
            .create_subscription(None, "cus_prov_1", "cus_local_1", &plan, &cancel)
            .await
            .unwrap();
        assert_eq!(subscription.status, SubscriptionStatus::Active);
        assert!(subscription.current_period_end > Utc::now());

        let mapping = orch.mappings.find(subscription.id, EntityType::Subscription).unwrap().unwrap();
        assert_eq!(mapping.provider_name, ProviderName::Stripe);
    }

    #[tokio::test]
    async fn cancel_subscription_marks_canceled() {
        let orch = orchestrator();
        let cancel = CancellationToken::new();
        let plan = Plan {
            id: Uuid::new_v4(),
            tenant_id: None,
            provider_name: ProviderName::Stripe,
            provider_plan_id: "plan_prov_1".into(),
            amount: Money(999),
            currency: Currency::new("USD"),
            interval: "month".into(),
            interval_count: 1,
        };
        orch.plans.insert(&plan).unwrap();
        let subscription = orch.create_subscription(None, "cus_prov_1", "cus_local_1", &plan, &cancel).await.unwrap();

        let canceled = orch.cancel_subscription(subscription.id, &cancel).await.unwrap();
        assert_eq!(canceled.status, SubscriptionStatus::Canceled);
    }

    #[tokio::test]
    async fn void_invoice_rejects_already_paid() {
        let orch = orchestrator();
        let cancel = CancellationToken::new();
        let invoice = orch
            .create_invoice(None, "cus_local_1", "cus_prov_1", Money(1000), Currency::new("USD"), None, &cancel)
            .await
            .unwrap();
        orch.invoices.update_status(invoice.id, InvoiceStatus::Paid).unwrap();

        let result = orch.void_invoice(invoice.id);
        assert!(matches!(result, Err(ConductorError::InvalidRequest(_))));
    }

    #[tokio::test]
    async fn submit_dispute_evidence_moves_to_under_review() {
        let orch = orchestrator();
        let cancel = CancellationToken::new();
        let dispute = Dispute {
            id: Uuid::new_v4(),
            payment_id: Uuid::new_v4(),
            provider_name: ProviderName::Stripe,
            provider_dispute_id: "dp_1".into(),
            amount: Money(500),
            currency: Currency::new("USD"),
            reason: Some("fraudulent".into()),
            status: DisputeStatus::NeedsResponse,
            evidence_due_by: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        orch.disputes.insert(&dispute).unwrap();

        let updated = orch
            .submit_dispute_evidence(dispute.id, serde_json::json!({"customer_communication": "..."}), &cancel)
            .await
            .unwrap();
        assert_eq!(updated.status, DisputeStatus::UnderReview);
    }
}
