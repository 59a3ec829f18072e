//! Canonical adapter-boundary error taxonomy (spec §4.4, §7).
//!
//! Adapters translate whatever their gateway SDK throws into one of these
//! variants. No vendor-specific word is allowed to cross this boundary —
//! the executor and everything above it only ever sees `ProviderError`.

use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("transient provider failure: {0}")]
    Retryable(String),

    #[error("provider rate limited the request")]
    RateLimited { retry_after: Option<Duration> },

    #[error("provider rejected credentials")]
    AuthFailed,

    #[error("provider rejected the request: {0}")]
    InvalidRequest(String),

    #[error("operation not supported by this provider")]
    NotSupported,

    #[error("provider returned a fatal, non-retryable error: {0}")]
    Fatal(String),

    #[error("webhook signature verification failed")]
    SignatureInvalid,
}

impl ProviderError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, ProviderError::Retryable(_) | ProviderError::RateLimited { .. })
    }
}
