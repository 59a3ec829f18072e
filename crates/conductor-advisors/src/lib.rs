//! Fraud and routing advisors. The LLM-assisted versions are collaborators
//! out of scope for this crate (spec.md §1); what's specified here is the
//! trait seam and the deterministic fallback each LLM advisor defers to
//! when no API key is configured (SPEC_FULL §4.15).

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use conductor_types::{Currency, Money, ProviderName};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FraudVerdict {
    Allow,
    Review,
    Block,
}

/// One past charge attempt against a payment method, used by the fraud
/// heuristic's failure-rate check.
#[derive(Debug, Clone)]
pub struct ChargeAttempt {
    pub payment_method_ref: String,
    pub succeeded: bool,
    pub occurred_at: DateTime<Utc>,
}

pub struct FraudContext<'a> {
    pub amount: Money,
    pub payment_method_ref: &'a str,
    pub recent_attempts: &'a [ChargeAttempt],
}

#[async_trait]
pub trait FraudAdvisor: Send + Sync {
    async fn assess(&self, ctx: FraudContext<'_>) -> FraudVerdict;
}

#[async_trait]
pub trait RoutingAdvisor: Send + Sync {
    async fn suggest(&self, currency: &Currency, amount: Money, history: &[ChargeAttempt]) -> Option<ProviderName>;
}

/// Allows unless the amount exceeds a per-tenant ceiling, or the same
/// payment method racked up `failure_threshold` failed attempts within
/// `failure_window`.
pub struct DeterministicFraudAdvisor {
    pub amount_ceiling: Money,
    pub failure_window: Duration,
    pub failure_threshold: usize,
}

impl Default for DeterministicFraudAdvisor {
    fn default() -> Self {
        DeterministicFraudAdvisor {
            amount_ceiling: Money(1_000_000),
            failure_window: Duration::hours(1),
            failure_threshold: 3,
        }
    }
}

#[async_trait]
impl FraudAdvisor for DeterministicFraudAdvisor {
    async fn assess(&self, ctx: FraudContext<'_>) -> FraudVerdict {
        if ctx.amount.0 > self.amount_ceiling.0 {
            return FraudVerdict::Review;
        }

        let cutoff = Utc::now() - self.failure_window;
        let recent_failures = ctx
            .recent_attempts
            .iter()
            .filter(|a| a.payment_method_ref == ctx.payment_method_ref && !a.succeeded && a.occurred_at >= cutoff)
            .count();

        if recent_failures >= self.failure_threshold {
            FraudVerdict::Block
        } else {
            FraudVerdict::Allow
        }
    }
}

/// Delegates to the same currency table the router uses for first-touch
/// selection (spec §4.6); it exists as an advisor seam so the LLM version
/// can override with tenant-specific preferences later.
pub struct DeterministicRoutingAdvisor;

#[async_trait]
impl RoutingAdvisor for DeterministicRoutingAdvisor {
    async fn suggest(&self, currency: &Currency, _amount: Money, _history: &[ChargeAttempt]) -> Option<ProviderName> {
        match currency.as_str() {
            "USD" | "EUR" | "GBP" => Some(ProviderName::Stripe),
            "IDR" | "SGD" | "MYR" | "PHP" | "THB" | "VND" => Some(ProviderName::Xendit),
            "INR" => Some(ProviderName::Razorpay),
            _ => None,
        }
    }
}

/// Trait-object slot the server wires in only when an LLM API key
/// environment variable is present. This crate does not make the call
/// itself; without a key, every assessment defers to the deterministic
/// rule it wraps.
pub struct LlmFraudAdvisor {
    fallback: DeterministicFraudAdvisor,
}

impl LlmFraudAdvisor {
    pub fn new(fallback: DeterministicFraudAdvisor) -> Self {
        LlmFraudAdvisor { fallback }
    }
}

#[async_trait]
impl FraudAdvisor for LlmFraudAdvisor {
    async fn assess(&self, ctx: FraudContext<'_>) -> FraudVerdict {
        tracing::debug!("LLM fraud advisor not configured, deferring to deterministic fallback");
        self.fallback.assess(ctx).await
    }
}

pub struct LlmRoutingAdvisor {
    fallback: DeterministicRoutingAdvisor,
}

impl LlmRoutingAdvisor {
    pub fn new(fallback: DeterministicRoutingAdvisor) -> Self {
        LlmRoutingAdvisor { fallback }
    }
}

#[async_trait]
impl RoutingAdvisor for LlmRoutingAdvisor {
    async fn suggest(&self, currency: &Currency, amount: Money, history: &[ChargeAttempt]) -> Option<ProviderName> {
        tracing::debug!("LLM routing advisor not configured, deferring to deterministic fallback");
        self.fallback.suggest(currency, amount, history).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attempt(payment_method_ref: &str, succeeded: bool, minutes_ago: i64) -> ChargeAttempt {
        ChargeAttempt {
            payment_method_ref: payment_method_ref.to_string(),
            succeeded,
            occurred_at: Utc::now() - Duration::minutes(minutes_ago),
        }
    }

    #[tokio::test]
    async fn allows_a_clean_low_amount_charge() {
        let advisor = DeterministicFraudAdvisor::default();
        let verdict = advisor
            .assess(FraudContext {
                amount: Money(2500),
                payment_method_ref: "pm_1",
                recent_attempts: &[],
            })
            .await;
        assert_eq!(verdict, FraudVerdict::Allow);
    }

    #[tokio::test]
    async fn flags_for_review_above_the_ceiling() {
        let advisor = DeterministicFraudAdvisor::default();
        let verdict = advisor
            .assess(FraudContext {
                amount: Money(2_000_000),
                payment_method_ref: "pm_1",
                recent_attempts: &[],
            })
            .await;
        assert_eq!(verdict, FraudVerdict::Review);
    }

    #[tokio::test]
    async fn blocks_after_three_recent_failures_on_the_same_method() {
        let advisor = DeterministicFraudAdvisor::default();
        let history = vec![attempt("pm_1", false, 5), attempt("pm_1", false, 10), attempt("pm_1", false, 15)];
        let verdict = advisor
            .assess(FraudContext {
                amount: Money(1000),
                payment_method_ref: "pm_1",
                recent_attempts: &history,
            })
            .await;
        assert_eq!(verdict, FraudVerdict::Block);
    }

    #[tokio::test]
    async fn ignores_failures_outside_the_window() {
        let advisor = DeterministicFraudAdvisor::default();
        let history = vec![attempt("pm_1", false, 90), attempt("pm_1", false, 120), attempt("pm_1", false, 150)];
        let verdict = advisor
            .assess(FraudContext {
                amount: Money(1000),
                payment_method_ref: "pm_1",
                recent_attempts: &history,
            })
            .await;
        assert_eq!(verdict, FraudVerdict::Allow);
    }

    #[tokio::test]
    async fn routing_advisor_matches_the_currency_table() {
        let advisor = DeterministicRoutingAdvisor;
        assert_eq!(advisor.suggest(&Currency::new("USD"), Money(100), &[]).await, Some(ProviderName::Stripe));
        assert_eq!(advisor.suggest(&Currency::new("IDR"), Money(100), &[]).await, Some(ProviderName::Xendit));
        assert_eq!(advisor.suggest(&Currency::new("INR"), Money(100), &[]).await, Some(ProviderName::Razorpay));
        assert_eq!(advisor.suggest(&Currency::new("AUD"), Money(100), &[]).await, None);
    }
}
