//! Customers and their payment methods (SPEC_FULL §3 `[ADDED]` entities).
//! Neither op is in spec §4.7's idempotency scope, so these go straight to
//! the orchestrator without the keeper wrapping `charges.rs` uses.

use actix_web::{web, HttpRequest, HttpResponse};
use conductor_orchestrator::CreateCustomerRequest;
use conductor_types::{ConductorError, Currency, ProviderName};
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::{ApiError, ApiResult};
use crate::middleware::{authenticate, check_rate_limit};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct CreateCustomerBody {
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub preferred_provider: Option<String>,
    pub currency: String,
}

pub async fn create_customer(req: HttpRequest, body: web::Bytes, state: web::Data<AppState>) -> ApiResult<HttpResponse> {
    let tenant = authenticate(&req, &state.tenant_registry)?;
    check_rate_limit(&state.rate_limiter, tenant.id)?;

    let parsed: CreateCustomerBody = serde_json::from_slice(&body).map_err(|e| ApiError(ConductorError::InvalidRequest(e.to_string())))?;
    let preferred_provider = parsed
        .preferred_provider
        .as_deref()
        .map(str::parse::<ProviderName>)
        .transpose()
        .map_err(|e| ApiError(ConductorError::InvalidRequest(e)))?;

    let cancel = CancellationToken::new();
    let customer = state
        .ancillary
        .create_customer(
            CreateCustomerRequest {
                tenant_id: Some(tenant.id),
                email: parsed.email,
                name: parsed.name,
                preferred_provider,
                routing_currency: Currency::new(parsed.currency),
            },
            &cancel,
        )
        .await
        .map_err(ApiError)?;

    Ok(HttpResponse::Ok().json(customer))
}

pub async fn get_customer(req: HttpRequest, path: web::Path<Uuid>, state: web::Data<AppState>) -> ApiResult<HttpResponse> {
    let tenant = authenticate(&req, &state.tenant_registry)?;
    check_rate_limit(&state.rate_limiter, tenant.id)?;

    let customer = state
        .ancillary
        .find_customer(path.into_inner())
        .map_err(ApiError)?
        .ok_or_else(|| ApiError(ConductorError::NotFound("customer".to_string())))?;
    if customer.tenant_id != Some(tenant.id) {
        return Err(ApiError(ConductorError::NotFound("customer".to_string())));
    }

    Ok(HttpResponse::Ok().json(customer))
}

#[derive(Debug, Deserialize)]
pub struct AttachPaymentMethodBody {
    pub payment_method_ref: String,
    pub method_type: String,
    #[serde(default)]
    pub last4: Option<String>,
    #[serde(default)]
    pub brand: Option<String>,
}

pub async fn attach_payment_method(
    req: HttpRequest,
    path: web::Path<Uuid>,
    body: web::Bytes,
    state: web::Data<AppState>,
) -> ApiResult<HttpResponse> {
    let tenant = authenticate(&req, &state.tenant_registry)?;
    check_rate_limit(&state.rate_limiter, tenant.id)?;

    let customer_id = path.into_inner();
    let customer = state
        .ancillary
        .find_customer(customer_id)
        .map_err(ApiError)?
        .ok_or_else(|| ApiError(ConductorError::NotFound("customer".to_string())))?;
    if customer.tenant_id != Some(tenant.id) {
        return Err(ApiError(ConductorError::NotFound("customer".to_string())));
    }

    let parsed: AttachPaymentMethodBody = serde_json::from_slice(&body).map_err(|e| ApiError(ConductorError::InvalidRequest(e.to_string())))?;
    let cancel = CancellationToken::new();
    let pm = state
        .ancillary
        .attach_payment_method(&customer, &parsed.payment_method_ref, parsed.method_type, parsed.last4, parsed.brand, &cancel)
        .await
        .map_err(ApiError)?;

    Ok(HttpResponse::Ok().json(pm))
}

pub async fn list_payment_methods(req: HttpRequest, path: web::Path<Uuid>, state: web::Data<AppState>) -> ApiResult<HttpResponse> {
    let tenant = authenticate(&req, &state.tenant_registry)?;
    check_rate_limit(&state.rate_limiter, tenant.id)?;

    let customer_id = path.into_inner();
    let customer = state
        .ancillary
        .find_customer(customer_id)
        .map_err(ApiError)?
        .ok_or_else(|| ApiError(ConductorError::NotFound("customer".to_string())))?;
    if customer.tenant_id != Some(tenant.id) {
        return Err(ApiError(ConductorError::NotFound("customer".to_string())));
    }

    let methods = state.ancillary.list_payment_methods(&customer_id.to_string()).map_err(ApiError)?;
    Ok(HttpResponse::Ok().json(methods))
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/v1/customers", web::post().to(create_customer))
        .route("/v1/customers/{id}", web::get().to(get_customer))
        .route("/v1/customers/{id}/payment_methods", web::post().to(attach_payment_method))
        .route("/v1/customers/{id}/payment_methods", web::get().to(list_payment_methods));
}
