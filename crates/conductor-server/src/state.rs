//! `Services` bundle (SPEC_FULL §9): every shared dependency a route
//! handler can need, constructed once in `main` and cloned (cheaply, via
//! `Arc`) into each worker. Handlers see only this bundle, never a
//! concrete executor or repository they'd have to mock individually.

use std::sync::Arc;
use std::time::Duration;

use conductor_advisors::{DeterministicFraudAdvisor, DeterministicRoutingAdvisor, FraudAdvisor, LlmFraudAdvisor, LlmRoutingAdvisor, RoutingAdvisor};
use conductor_core::{IdempotencyKeeper, RateLimiter, RateLimiterConfig, SweeperHandle};
use conductor_orchestrator::{AncillaryOrchestrator, PaymentOrchestrator, TenantRegistry};
use conductor_providers::{
    AirwallexAdapter, AirwallexConfig, ExecutorConfig, ProviderExecutor, ProviderRouter, RazorpayAdapter,
    RazorpayConfig, StripeAdapter, StripeConfig, XenditAdapter, XenditConfig,
};
use conductor_storage::{
    AuditLogRepository, CustomerRepository, Database, DisputeRepository, InvoiceRepository, MappingRepository,
    PaymentMethodRepository, PaymentRepository, PayoutRepository, PlanRepository, RefundRepository,
    SqliteIdempotencyStore, SubscriptionRepository, TenantRepository, WebhookEventRepository,
};
use conductor_webhooks::{InboundWebhookPipeline, OutboundWebhookDispatcher};

use crate::config::ServerConfig;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServerConfig>,
    pub payments: Arc<PaymentRepository>,
    pub refunds: Arc<RefundRepository>,
    pub mappings: Arc<MappingRepository>,
    pub tenants: Arc<TenantRepository>,
    pub audit: Arc<AuditLogRepository>,
    pub webhook_events: Arc<WebhookEventRepository>,
    pub router: Arc<ProviderRouter>,
    pub orchestrator: Arc<PaymentOrchestrator>,
    pub customers: Arc<CustomerRepository>,
    pub payment_methods: Arc<PaymentMethodRepository>,
    pub plans: Arc<PlanRepository>,
    pub subscriptions: Arc<SubscriptionRepository>,
    pub invoices: Arc<InvoiceRepository>,
    pub payouts: Arc<PayoutRepository>,
    pub disputes: Arc<DisputeRepository>,
    pub ancillary: Arc<AncillaryOrchestrator>,
    pub tenant_registry: Arc<TenantRegistry>,
    pub idempotency: Arc<IdempotencyKeeper<SqliteIdempotencyStore>>,
    /// Kept alive for the process lifetime: dropping it stops the sweep.
    pub idempotency_sweeper: Arc<SweeperHandle>,
    pub rate_limiter: Arc<RateLimiter>,
    pub inbound_webhooks: Arc<InboundWebhookPipeline>,
    pub outbound_webhooks: Arc<OutboundWebhookDispatcher>,
    pub fraud_advisor: Arc<dyn FraudAdvisor>,
    pub routing_advisor: Arc<dyn RoutingAdvisor>,
}

impl AppState {
    pub fn new(config: ServerConfig) -> Result<Self, conductor_types::ConductorError> {
        let db = Arc::new(Database::open(&config.db_path)?);

        let payments = Arc::new(PaymentRepository::new(db.clone()));
        let refunds = Arc::new(RefundRepository::new(db.clone()));
        let mappings = Arc::new(MappingRepository::new(db.clone()));
        let tenants = Arc::new(TenantRepository::new(db.clone()));
        let audit = Arc::new(AuditLogRepository::new(db.clone()));
        let webhook_events = Arc::new(WebhookEventRepository::new(db.clone()));
        let idempotency_store = Arc::new(SqliteIdempotencyStore::new(db.clone()));

        let stripe = Arc::new(StripeAdapter::new(StripeConfig {
            api_key: config.stripe_api_key.clone(),
            webhook_secret: config.stripe_webhook_secret.clone(),
            base_url: "https://api.stripe.com".to_string(),
            timeout: Duration::from_secs(30),
        }));
        let xendit = Arc::new(XenditAdapter::new(XenditConfig {
            api_key: config.xendit_api_key.clone(),
            callback_token: config.xendit_callback_token.clone(),
            base_url: "https://api.xendit.co".to_string(),
            timeout: Duration::from_secs(30),
        }));
        let razorpay = Arc::new(RazorpayAdapter::new(RazorpayConfig {
            key_id: config.razorpay_key_id.clone(),
            key_secret: config.razorpay_key_secret.clone(),
            webhook_secret: config.razorpay_webhook_secret.clone(),
            base_url: "https://api.razorpay.com/v1".to_string(),
            timeout: Duration::from_secs(30),
        }));
        let airwallex = Arc::new(AirwallexAdapter::new(AirwallexConfig {
            api_key: config.airwallex_api_key.clone(),
            webhook_secret: config.airwallex_webhook_secret.clone(),
            base_url: "https://api.airwallex.com".to_string(),
            timeout: Duration::from_secs(30),
        }));

        let executors = vec![
            Arc::new(ProviderExecutor::new(stripe, ExecutorConfig::default())),
            Arc::new(ProviderExecutor::new(xendit, ExecutorConfig::default())),
            Arc::new(ProviderExecutor::new(razorpay, ExecutorConfig::default())),
            Arc::new(ProviderExecutor::new(airwallex, ExecutorConfig::default())),
        ];
        let router = Arc::new(ProviderRouter::new(executors));

        let orchestrator = Arc::new(PaymentOrchestrator::new(
            payments.clone(),
            refunds.clone(),
            mappings.clone(),
            router.clone(),
            audit.clone(),
        ));

        let tenant_registry = Arc::new(TenantRegistry::new(tenants.clone()));

        let idempotency = Arc::new(IdempotencyKeeper::new(idempotency_store, config.idempotency_lock_lease));
        let idempotency_sweeper = Arc::new(idempotency.spawn_sweeper(Duration::from_secs(60)));

        let rate_limiter = Arc::new(RateLimiter::new(Duration::from_secs(300)));
        rate_limiter.configure_tier(
            "default",
            RateLimiterConfig {
                requests_per_second: config.rate_limit_rps,
                burst: config.rate_limit_burst,
            },
        );

        let inbound_webhooks = Arc::new(InboundWebhookPipeline::new(
            router.clone(),
            webhook_events.clone(),
            payments.clone(),
            orchestrator.clone(),
        ));
        inbound_webhooks.clone().spawn_retry_worker(Duration::from_secs(30), 50);

        let outbound_webhooks = Arc::new(OutboundWebhookDispatcher::new(tenants.clone()));

        let fraud_advisor: Arc<dyn FraudAdvisor> = match &config.fraud_advisor_api_key {
            Some(_) => Arc::new(LlmFraudAdvisor::new(DeterministicFraudAdvisor::default())),
            None => Arc::new(DeterministicFraudAdvisor::default()),
        };
        let routing_advisor: Arc<dyn RoutingAdvisor> = match &config.routing_advisor_api_key {
            Some(_) => Arc::new(LlmRoutingAdvisor::new(DeterministicRoutingAdvisor)),
            None => Arc::new(DeterministicRoutingAdvisor),
        };

        Ok(AppState {
            config: Arc::new(config),
            payments,
            refunds,
            mappings,
            tenants,
            audit,
            webhook_events,
            router,
            orchestrator,
            tenant_registry,
            idempotency,
            idempotency_sweeper,
            rate_limiter,
            inbound_webhooks,
            outbound_webhooks,
            fraud_advisor,
            routing_advisor,
        })
    }
}
