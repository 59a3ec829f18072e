//! Invoices (SPEC_FULL §3). `create-invoice` is in spec §4.7's idempotency
//! scope; voiding is a local-only bookkeeping action and isn't.

use actix_web::{web, HttpRequest, HttpResponse};
use conductor_types::{ConductorError, Currency, Money, ProviderName};
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::{ApiError, ApiResult};
use crate::idempotent::run_idempotent;
use crate::middleware::{authenticate, check_rate_limit};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct CreateInvoiceBody {
    pub customer_id: String,
    pub customer_provider_id: String,
    pub amount: i64,
    pub currency: String,
    #[serde(default)]
    pub preferred_provider: Option<String>,
}

pub async fn create_invoice(req: HttpRequest, body: web::Bytes, state: web::Data<AppState>) -> ApiResult<HttpResponse> {
    let tenant = authenticate(&req, &state.tenant_registry)?;
    check_rate_limit(&state.rate_limiter, tenant.id)?;

    let parsed: CreateInvoiceBody = serde_json::from_slice(&body).map_err(|e| ApiError(ConductorError::InvalidRequest(e.to_string())))?;
    let preferred_provider = parsed
        .preferred_provider
        .as_deref()
        .map(str::parse::<ProviderName>)
        .transpose()
        .map_err(|e| ApiError(ConductorError::InvalidRequest(e)))?;

    let key = req.headers().get("idempotency-key").and_then(|v| v.to_str().ok()).map(str::to_string);
    let cancel = CancellationToken::new();
    let tenant_id = Some(tenant.id);
    let amount = Money::new(parsed.amount);
    let currency = Currency::new(parsed.currency);

    run_idempotent(
        &state.idempotency,
        Some(tenant.id),
        key.as_deref(),
        "/v1/invoices",
        &body,
        state.config.idempotency_ttl,
        || async {
            state
                .ancillary
                .create_invoice(tenant_id, &parsed.customer_id, &parsed.customer_provider_id, amount, currency, preferred_provider, &cancel)
                .await
        },
    )
    .await
}

pub async fn get_invoice(req: HttpRequest, path: web::Path<Uuid>, state: web::Data<AppState>) -> ApiResult<HttpResponse> {
    let tenant = authenticate(&req, &state.tenant_registry)?;
    check_rate_limit(&state.rate_limiter, tenant.id)?;

    let invoice = state
        .ancillary
        .find_invoice(path.into_inner())
        .map_err(ApiError)?
        .ok_or_else(|| ApiError(ConductorError::NotFound("invoice".to_string())))?;
    if invoice.tenant_id != Some(tenant.id) {
        return Err(ApiError(ConductorError::NotFound("invoice".to_string())));
    }

    Ok(HttpResponse::Ok().json(invoice))
}

pub async fn void_invoice(req: HttpRequest, path: web::Path<Uuid>, state: web::Data<AppState>) -> ApiResult<HttpResponse> {
    let tenant = authenticate(&req, &state.tenant_registry)?;
    check_rate_limit(&state.rate_limiter, tenant.id)?;

    let invoice_id = path.into_inner();
    let existing = state
        .ancillary
        .find_invoice(invoice_id)
        .map_err(ApiError)?
        .ok_or_else(|| ApiError(ConductorError::NotFound("invoice".to_string())))?;
    if existing.tenant_id != Some(tenant.id) {
        return Err(ApiError(ConductorError::NotFound("invoice".to_string())));
    }

    let invoice = state.ancillary.void_invoice(invoice_id).map_err(ApiError)?;
    Ok(HttpResponse::Ok().json(invoice))
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/v1/invoices", web::post().to(create_invoice))
        .route("/v1/invoices/{id}", web::get().to(get_invoice))
        .route("/v1/invoices/{id}/void", web::post().to(void_invoice));
}
