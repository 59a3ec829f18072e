//! Canonical error taxonomy. One stable HTTP status per kind (spec §7).
//!
//! This mirrors the reference gateway's `GatewayError`: a flat enum, a
//! `Display` impl for logging, and — here, since this crate stays free of
//! the web framework — a `status_code`/`error_code` pair that the server
//! crate's `ResponseError` impl delegates to.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConductorError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("invalid credentials")]
    InvalidCredentials,

    #[error("tenant is inactive")]
    TenantInactive,

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("idempotency key conflict: request body differs from the original request")]
    IdempotencyConflict,

    #[error("request is already in progress, retry after a short delay")]
    InProgress,

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("rate limit exceeded")]
    TooManyRequests,

    #[error("no healthy provider is available for this request")]
    NoAvailableProvider,

    #[error("provider {0} is currently unavailable")]
    ProviderUnavailable(String),

    #[error("provider {0} timed out")]
    ProviderTimeout(String),

    #[error("provider error: {0}")]
    ProviderError(String),

    #[error("operation was cancelled")]
    Cancelled,

    #[error("internal error: {0}")]
    Internal(String),
}

/// A stable machine-readable code per kind, independent of the HTTP framework.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidRequest,
    Unauthorized,
    Forbidden,
    NotFound,
    Conflict,
    InProgress,
    TooManyRequests,
    ServiceUnavailable,
    GatewayTimeout,
    BadGateway,
    Cancelled,
    Internal,
}

impl ConductorError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ConductorError::InvalidRequest(_) => ErrorKind::InvalidRequest,
            ConductorError::InvalidCredentials => ErrorKind::Unauthorized,
            ConductorError::TenantInactive => ErrorKind::Unauthorized,
            ConductorError::Forbidden(_) => ErrorKind::Forbidden,
            ConductorError::NotFound(_) => ErrorKind::NotFound,
            ConductorError::IdempotencyConflict => ErrorKind::Conflict,
            ConductorError::Conflict(_) => ErrorKind::Conflict,
            ConductorError::InProgress => ErrorKind::InProgress,
            ConductorError::TooManyRequests => ErrorKind::TooManyRequests,
            ConductorError::NoAvailableProvider => ErrorKind::ServiceUnavailable,
            ConductorError::ProviderUnavailable(_) => ErrorKind::ServiceUnavailable,
            ConductorError::ProviderTimeout(_) => ErrorKind::GatewayTimeout,
            ConductorError::ProviderError(_) => ErrorKind::BadGateway,
            ConductorError::Cancelled => ErrorKind::Cancelled,
            ConductorError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// The numeric HTTP status spec §7 assigns to this kind.
    pub fn http_status(&self) -> u16 {
        match self.kind() {
            ErrorKind::InvalidRequest => 400,
            ErrorKind::Unauthorized => 401,
            ErrorKind::Forbidden => 403,
            ErrorKind::NotFound => 404,
            ErrorKind::Conflict => 409,
            ErrorKind::InProgress => 409,
            ErrorKind::TooManyRequests => 429,
            ErrorKind::ServiceUnavailable => 503,
            ErrorKind::GatewayTimeout => 504,
            ErrorKind::BadGateway => 502,
            ErrorKind::Cancelled => 499,
            ErrorKind::Internal => 500,
        }
    }
}

pub type ConductorResult<T> = Result<T, ConductorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn idempotency_conflict_is_409() {
        assert_eq!(ConductorError::IdempotencyConflict.http_status(), 409);
    }

    #[test]
    fn no_available_provider_is_503() {
        assert_eq!(ConductorError::NoAvailableProvider.http_status(), 503);
    }
}
