//! Shared HTTP client construction and error classification for gateway
//! adapters. Mirrors the reference gateway's client builder: bounded
//! timeout, redirects disabled (adapters only ever call a fixed,
//! configured gateway host, never a caller-supplied URL).

use std::time::Duration;

use reqwest::StatusCode;

use crate::error::ProviderError;

pub fn build_client(timeout: Duration) -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(timeout)
        .redirect(reqwest::redirect::Policy::none())
        .build()
        .expect("failed to build provider HTTP client")
}

/// Classifies a non-2xx gateway response into the canonical taxonomy.
/// `retry_after` is parsed by the caller from a `Retry-After` header, if any.
pub fn classify_status(status: StatusCode, body: &str) -> ProviderError {
    match status.as_u16() {
        401 | 403 => ProviderError::AuthFailed,
        400 | 404 | 422 => ProviderError::InvalidRequest(body.to_string()),
        429 => ProviderError::RateLimited { retry_after: None },
        500..=599 => ProviderError::Retryable(format!("gateway returned {status}")),
        _ => ProviderError::Fatal(format!("unexpected gateway status {status}: {body}")),
    }
}

pub fn map_transport_error(err: &reqwest::Error) -> ProviderError {
    if err.is_timeout() || err.is_connect() {
        ProviderError::Retryable(err.to_string())
    } else {
        ProviderError::Fatal(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unauthorized_and_forbidden_map_to_auth_failed() {
        assert!(matches!(classify_status(StatusCode::UNAUTHORIZED, ""), ProviderError::AuthFailed));
        assert!(matches!(classify_status(StatusCode::FORBIDDEN, ""), ProviderError::AuthFailed));
    }

    #[test]
    fn client_errors_map_to_invalid_request() {
        assert!(matches!(classify_status(StatusCode::BAD_REQUEST, "bad"), ProviderError::InvalidRequest(_)));
        assert!(matches!(classify_status(StatusCode::NOT_FOUND, ""), ProviderError::InvalidRequest(_)));
        assert!(matches!(classify_status(StatusCode::UNPROCESSABLE_ENTITY, ""), ProviderError::InvalidRequest(_)));
    }

    #[test]
    fn too_many_requests_maps_to_rate_limited() {
        assert!(matches!(
            classify_status(StatusCode::TOO_MANY_REQUESTS, ""),
            ProviderError::RateLimited { retry_after: None }
        ));
    }

    #[test]
    fn server_errors_are_retryable() {
        assert!(matches!(classify_status(StatusCode::INTERNAL_SERVER_ERROR, ""), ProviderError::Retryable(_)));
        assert!(matches!(classify_status(StatusCode::BAD_GATEWAY, ""), ProviderError::Retryable(_)));
    }

    #[test]
    fn anything_else_is_fatal() {
        assert!(matches!(classify_status(StatusCode::IM_A_TEAPOT, "teapot"), ProviderError::Fatal(_)));
    }
}
