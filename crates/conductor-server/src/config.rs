//! Startup configuration, loaded once from the process environment
//! (spec §6 "Environment"). Mirrors the reference gateway's
//! `GatewayConfig::from_env`: manual `std::env::var` parsing, typed
//! defaults, and a `Debug` impl that never prints a secret.

use std::env;
use std::time::Duration;

const DEFAULT_PORT: u16 = 8080;
const DEFAULT_DB_PATH: &str = "./conductor.db";
const DEFAULT_RATE_LIMIT_RPS: f64 = 20.0;
const DEFAULT_RATE_LIMIT_BURST: f64 = 40.0;
const DEFAULT_IDEMPOTENCY_TTL_SECS: u64 = 24 * 60 * 60;
const DEFAULT_LOCK_LEASE_SECS: u64 = 60;

#[derive(Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub db_path: String,
    pub allowed_origins: Vec<String>,
    pub rate_limit_rps: f64,
    pub rate_limit_burst: f64,
    pub idempotency_ttl: Duration,
    pub idempotency_lock_lease: Duration,
    pub metrics_token: Option<String>,

    pub stripe_api_key: String,
    pub stripe_webhook_secret: String,
    pub xendit_api_key: String,
    pub xendit_callback_token: String,
    pub razorpay_key_id: String,
    pub razorpay_key_secret: String,
    pub razorpay_webhook_secret: String,
    pub airwallex_api_key: String,
    pub airwallex_webhook_secret: String,

    /// Presence alone decides whether the server wires up `LlmFraudAdvisor`
    /// in front of the deterministic fallback (SPEC_FULL §4.15); the key
    /// itself is never read by this crate.
    pub fraud_advisor_api_key: Option<String>,
    pub routing_advisor_api_key: Option<String>,
}

impl std::fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerConfig")
            .field("port", &self.port)
            .field("db_path", &self.db_path)
            .field("allowed_origins", &self.allowed_origins)
            .field("rate_limit_rps", &self.rate_limit_rps)
            .field("rate_limit_burst", &self.rate_limit_burst)
            .field("idempotency_ttl", &self.idempotency_ttl)
            .field("idempotency_lock_lease", &self.idempotency_lock_lease)
            .field("metrics_token", &self.metrics_token.as_ref().map(|_| "[REDACTED]"))
            .field("stripe_api_key", &"[REDACTED]")
            .field("stripe_webhook_secret", &"[REDACTED]")
            .field("xendit_api_key", &"[REDACTED]")
            .field("xendit_callback_token", &"[REDACTED]")
            .field("razorpay_key_id", &"[REDACTED]")
            .field("razorpay_key_secret", &"[REDACTED]")
            .field("razorpay_webhook_secret", &"[REDACTED]")
            .field("airwallex_api_key", &"[REDACTED]")
            .field("airwallex_webhook_secret", &"[REDACTED]")
            .field("fraud_advisor_api_key", &self.fraud_advisor_api_key.as_ref().map(|_| "[SET]"))
            .field("routing_advisor_api_key", &self.routing_advisor_api_key.as_ref().map(|_| "[SET]"))
            .finish()
    }
}

fn env_or_dev_placeholder(var: &str, placeholder: &str) -> String {
    match env::var(var) {
        Ok(v) if !v.is_empty() => v,
        _ => {
            tracing::warn!("{var} not set — using a dev placeholder, outbound calls to this provider will fail auth");
            placeholder.to_string()
        }
    }
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let port = env::var("PORT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_PORT);

        let db_path = env::var("DATABASE_URL")
            .or_else(|_| env::var("DB_PATH"))
            .unwrap_or_else(|_| DEFAULT_DB_PATH.to_string());

        let allowed_origins: Vec<String> = env::var("ALLOWED_ORIGINS")
            .map(|s| s.split(',').map(|s| s.trim().to_string()).collect())
            .unwrap_or_else(|_| vec!["http://localhost:3000".to_string()]);

        let rate_limit_rps = env::var("RATE_LIMIT_RPS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_RATE_LIMIT_RPS);
        let rate_limit_burst = env::var("RATE_LIMIT_BURST")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_RATE_LIMIT_BURST);

        let idempotency_ttl = Duration::from_secs(
            env::var("IDEMPOTENCY_TTL_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_IDEMPOTENCY_TTL_SECS),
        );
        let idempotency_lock_lease = Duration::from_secs(
            env::var("IDEMPOTENCY_LOCK_LEASE_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_LOCK_LEASE_SECS),
        );

        let metrics_token = env::var("METRICS_TOKEN").ok().filter(|s| !s.is_empty());
        if metrics_token.is_none() {
            tracing::warn!("METRICS_TOKEN not set — /metrics endpoint is publicly accessible");
        }

        let fraud_advisor_api_key = env::var("FRAUD_ADVISOR_API_KEY").ok().filter(|s| !s.is_empty());
        let routing_advisor_api_key = env::var("ROUTING_ADVISOR_API_KEY").ok().filter(|s| !s.is_empty());

        Ok(ServerConfig {
            port,
            db_path,
            allowed_origins,
            rate_limit_rps,
            rate_limit_burst,
            idempotency_ttl,
            idempotency_lock_lease,
            metrics_token,
            stripe_api_key: env_or_dev_placeholder("STRIPE_API_KEY", "sk_test_dev"),
            stripe_webhook_secret: env_or_dev_placeholder("STRIPE_WEBHOOK_SECRET", "whsec_dev"),
            xendit_api_key: env_or_dev_placeholder("XENDIT_API_KEY", "xnd_development_dev"),
            xendit_callback_token: env_or_dev_placeholder("XENDIT_CALLBACK_TOKEN", "xendit_callback_dev"),
            razorpay_key_id: env_or_dev_placeholder("RAZORPAY_KEY_ID", "rzp_test_dev"),
            razorpay_key_secret: env_or_dev_placeholder("RAZORPAY_KEY_SECRET", "razorpay_secret_dev"),
            razorpay_webhook_secret: env_or_dev_placeholder("RAZORPAY_WEBHOOK_SECRET", "razorpay_webhook_dev"),
            airwallex_api_key: env_or_dev_placeholder("AIRWALLEX_API_KEY", "airwallex_key_dev"),
            airwallex_webhook_secret: env_or_dev_placeholder("AIRWALLEX_WEBHOOK_SECRET", "airwallex_webhook_dev"),
            fraud_advisor_api_key,
            routing_advisor_api_key,
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    MissingRequired(&'static str),
}
