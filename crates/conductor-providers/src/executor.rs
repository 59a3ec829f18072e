//! Provider executor (C5, spec §4.5): wraps one adapter with its breaker
//! and health checker, and is the only place a `ProviderError` is ever
//! translated into the client-facing `ConductorError` taxonomy.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use conductor_core::{CircuitBreaker, CircuitBreakerConfig, CircuitState, HealthChecker, RetryPolicy};
use conductor_types::{ConductorError, ProviderName};
use tokio_util::sync::CancellationToken;
use tracing::instrument;

use crate::adapter::{ProviderAdapter, VerifiedWebhookEvent, WebhookHeaders};
use crate::capabilities::Capabilities;
use crate::error::ProviderError;

pub struct ExecutorConfig {
    pub breaker: CircuitBreakerConfig,
    pub health_interval: Duration,
    pub health_probe_timeout: Duration,
    pub retry_policy: RetryPolicy,
    pub call_timeout: Duration,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        ExecutorConfig {
            breaker: CircuitBreakerConfig::default(),
            health_interval: Duration::from_secs(15),
            health_probe_timeout: Duration::from_secs(5),
            retry_policy: RetryPolicy::default(),
            call_timeout: Duration::from_secs(30),
        }
    }
}

pub struct ProviderExecutor {
    adapter: Arc<dyn ProviderAdapter>,
    breaker: CircuitBreaker,
    health: HealthChecker,
    retry_policy: RetryPolicy,
    call_timeout: Duration,
}

impl ProviderExecutor {
    pub fn new(adapter: Arc<dyn ProviderAdapter>, config: ExecutorConfig) -> Self {
        let probe_adapter = adapter.clone();
        let name = adapter.name();
        let health = HealthChecker::spawn(
            Self::static_name(name),
            config.health_interval,
            config.health_probe_timeout,
            move || {
                let probe_adapter = probe_adapter.clone();
                async move { probe_adapter.is_available().await }
            },
        );
        ProviderExecutor {
            adapter,
            breaker: CircuitBreaker::new(config.breaker),
            health,
            retry_policy: config.retry_policy,
            call_timeout: config.call_timeout,
        }
    }

    fn static_name(name: ProviderName) -> &'static str {
        match name {
            ProviderName::Stripe => "stripe",
            ProviderName::Xendit => "xendit",
            ProviderName::Razorpay => "razorpay",
            ProviderName::Airwallex => "airwallex",
        }
    }

    pub fn name(&self) -> ProviderName {
        self.adapter.name()
    }

    pub fn capabilities(&self) -> &Capabilities {
        self.adapter.capabilities()
    }

    /// Availability test per spec §4.6: breaker not open AND health latch healthy.
    pub fn is_available(&self) -> bool {
        self.breaker.state() != CircuitState::Open && self.health.is_healthy()
    }

    /// Signature check runs ahead of the breaker (spec §4.9 step 1): a
    /// provider with an open breaker must still be able to reject a
    /// forged webhook.
    pub fn verify_webhook(
        &self,
        headers: &WebhookHeaders,
        raw_body: &[u8],
    ) -> Result<VerifiedWebhookEvent, ProviderError> {
        self.adapter.verify_webhook(headers, raw_body)
    }

    /// Runs `op` against the wrapped adapter, applying breaker admission,
    /// retry-with-jitter on `Retryable`/`RateLimited`, and an overall
    /// per-call timeout. `InvalidRequest`/`NotSupported` never retry.
    #[instrument(skip_all, fields(provider = %Self::static_name(self.adapter.name())))]
    pub async fn execute<T, F, Fut>(&self, cancel: &CancellationToken, op: F) -> Result<T, ConductorError>
    where
        F: Fn(Arc<dyn ProviderAdapter>) -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        let admission = self
            .breaker
            .allow()
            .ok_or_else(|| ConductorError::ProviderUnavailable(self.name().to_string()))?;

        let mut attempt: u32 = 1;
        loop {
            if cancel.is_cancelled() {
                self.breaker.record_failure(admission);
                return Err(ConductorError::Cancelled);
            }

            let adapter = self.adapter.clone();
            let call = tokio::time::timeout(self.call_timeout, op(adapter));
            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    self.breaker.record_failure(admission);
                    return Err(ConductorError::Cancelled);
                }
                r = call => r,
            };

            let provider_err = match outcome {
                Ok(Ok(value)) => {
                    self.breaker.record_success(admission);
                    return Ok(value);
                }
                Ok(Err(err)) => err,
                Err(_elapsed) => {
                    self.breaker.record_failure(admission);
                    return Err(ConductorError::ProviderTimeout(self.name().to_string()));
                }
            };

            if !provider_err.is_retryable() || attempt >= self.retry_policy.max_attempts {
                self.breaker.record_failure(admission);
                return Err(map_provider_error(provider_err, self.name()));
            }

            let delay = match &provider_err {
                ProviderError::RateLimited { retry_after: Some(d) } => *d,
                _ => self.retry_policy.delay_for_attempt(attempt + 1),
            };
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    self.breaker.record_failure(admission);
                    return Err(ConductorError::Cancelled);
                }
                _ = tokio::time::sleep(delay) => {}
            }
            attempt += 1;
        }
    }
}

fn map_provider_error(err: ProviderError, provider: ProviderName) -> ConductorError {
    match err {
        ProviderError::Retryable(msg) | ProviderError::Fatal(msg) => {
            ConductorError::ProviderError(format!("{provider}: {msg}"))
        }
        ProviderError::RateLimited { .. } => ConductorError::ProviderUnavailable(provider.to_string()),
        ProviderError::AuthFailed => ConductorError::Internal(format!("{provider} rejected configured credentials")),
        ProviderError::InvalidRequest(msg) => ConductorError::InvalidRequest(msg),
        ProviderError::NotSupported => ConductorError::InvalidRequest(format!("{provider} does not support this operation")),
        ProviderError::SignatureInvalid => ConductorError::Forbidden("invalid webhook signature".to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::{
        CaptureRequest, ChargeRequest, ChargeResult, RefundRequest, RefundResult, VerifiedWebhookEvent, WebhookHeaders,
    };
    use crate::capabilities::Capability;
    use async_trait::async_trait;
    use conductor_types::Money;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FlakyAdapter {
        capabilities: Capabilities,
        failures_before_success: AtomicU32,
    }

    #[async_trait]
    impl ProviderAdapter for FlakyAdapter {
        fn name(&self) -> ProviderName {
            ProviderName::Stripe
        }

        fn capabilities(&self) -> &Capabilities {
            &self.capabilities
        }

        async fn charge(&self, _req: ChargeRequest) -> Result<ChargeResult, ProviderError> {
            if self.failures_before_success.fetch_sub(1, Ordering::SeqCst) > 0 {
                Err(ProviderError::Retryable("flaky".into()))
            } else {
                Ok(ChargeResult {
                    provider_charge_id: "ch_1".into(),
                    status: conductor_types::PaymentStatus::Succeeded,
                    requires_action: false,
                    next_action: None,
                    client_secret: None,
                    captured_amount: Money(100),
                })
            }
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
    }

    fn executor(failures_before_success: u32) -> ProviderExecutor {
        let adapter = Arc::new(FlakyAdapter {
            capabilities: Capabilities::new([Capability::Charge], ["USD"], ["card"]),
            failures_before_success: AtomicU32::new(failures_before_success),
        });
        let mut config = ExecutorConfig::default();
        config.retry_policy.max_attempts = 5;
        config.retry_policy.base_delay = Duration::from_millis(1);
        config.retry_policy.max_delay = Duration::from_millis(5);
        config.retry_policy.jitter = 0.0;
        ProviderExecutor::new(adapter, config)
    }

    #[tokio::test]
    async fn retries_retryable_errors_and_eventually_succeeds() {
        let exec = executor(2);
        let cancel = CancellationToken::new();
        let result = exec
            .execute(&cancel, |adapter| async move {
                adapter
                    .charge(ChargeRequest {
                        customer_id: "cus_1".into(),
                        amount: Money(100),
                        currency: conductor_types::Currency::new("USD"),
                        payment_method_ref: "pm_1".into(),
                        capture_method: conductor_types::CaptureMethod::Automatic,
                        idempotency_key: None,
                        metadata: serde_json::Value::Null,
                    })
                    .await
            })
            .await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn breaker_opens_after_enough_failures_and_fails_fast() {
        let exec = executor(1000);
        let cancel = CancellationToken::new();
        for _ in 0..5 {
            let _ = exec
                .execute(&cancel, |adapter| async move {
                    adapter
                        .charge(ChargeRequest {
                            customer_id: "cus_1".into(),
                            amount: Money(100),
                            currency: conductor_types::Currency::new("USD"),
                            payment_method_ref: "pm_1".into(),
                            capture_method: conductor_types::CaptureMethod::Automatic,
                            idempotency_key: None,
                            metadata: serde_json::Value::Null,
                        })
                        .await
                })
                .await;
        }
        let result = exec
            .execute(&cancel, |adapter| async move {
                adapter
                    .charge(ChargeRequest {
                        customer_id: "cus_1".into(),
                        amount: Money(100),
                        currency: conductor_types::Currency::new("USD"),
                        payment_method_ref: "pm_1".into(),
                        capture_method: conductor_types::CaptureMethod::Automatic,
                        idempotency_key: None,
                        metadata: serde_json::Value::Null,
                    })
                    .await
            })
            .await;
        assert!(matches!(result, Err(ConductorError::ProviderUnavailable(_))));
    }
}
