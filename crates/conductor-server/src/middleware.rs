//! Per-request auth and rate-limiting, applied as plain function calls at
//! the top of each handler rather than as actix middleware: both need the
//! resolved tenant before deciding anything, and the tenant is only known
//! after the credentials have been validated.

use actix_web::HttpRequest;
use conductor_orchestrator::TenantRegistry;
use conductor_core::RateLimiter;
use conductor_types::{ConductorError, Tenant};

use crate::error::ApiError;

/// Accepts `X-Api-Key` alone or `Authorization: Bearer <key>[:<secret>]`
/// (spec §4.12). Returns the validated, active tenant.
pub fn authenticate(req: &HttpRequest, tenants: &TenantRegistry) -> Result<Tenant, ApiError> {
    let (header_name, header_value) = req
        .headers()
        .get("x-api-key")
        .map(|v| ("x-api-key", v))
        .or_else(|| req.headers().get("authorization").map(|v| ("authorization", v)))
        .ok_or(ConductorError::InvalidCredentials)
        .map_err(ApiError)?;

    let header_value = header_value.to_str().map_err(|_| ApiError(ConductorError::InvalidCredentials))?;
    let (api_key, api_secret) =
        TenantRegistry::parse_credentials(header_name, header_value).ok_or(ConductorError::InvalidCredentials).map_err(ApiError)?;

    tenants.validate(&api_key, api_secret.as_deref()).map_err(ApiError)
}

/// Spec §4.13: tenant identity is the rate-limit bucket key, tier is fixed
/// until multi-tier billing plans exist (SPEC_FULL §4.14 open question).
pub fn check_rate_limit(limiter: &RateLimiter, tenant_id: uuid::Uuid) -> Result<(), ApiError> {
    if limiter.allow(&tenant_id.to_string(), "default") {
        Ok(())
    } else {
        Err(ApiError(ConductorError::TooManyRequests))
    }
}
