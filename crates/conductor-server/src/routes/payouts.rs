//! Payouts (SPEC_FULL §3). `create-payout` is in spec §4.7's idempotency
//! scope.

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
pub struct CreatePayoutBody {
    pub destination: String,
    pub amount: i64,
    pub currency: String,
    #[serde(default)]
    pub preferred_provider: Option<String>,
}

pub async fn create_payout(req: HttpRequest, body: web::Bytes, state: web::Data<AppState>) -> ApiResult<HttpResponse> {
    let tenant = authenticate(&req, &state.tenant_registry)?;
    check_rate_limit(&state.rate_limiter, tenant.id)?;

    let parsed: CreatePayoutBody = serde_json::from_slice(&body).map_err(|e| ApiError(ConductorError::InvalidRequest(e.to_string())))?;
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
        "/v1/payouts",
        &body,
        state.config.idempotency_ttl,
        || async {
            state
                .ancillary
                .create_payout(tenant_id, &parsed.destination, amount, currency, preferred_provider, &cancel)
                .await
        },
    )
    .await
}

pub async fn get_payout(req: HttpRequest, path: web::Path<Uuid>, state: web::Data<AppState>) -> ApiResult<HttpResponse> {
    let tenant = authenticate(&req, &state.tenant_registry)?;
    check_rate_limit(&state.rate_limiter, tenant.id)?;

    let payout = state
        .ancillary
        .find_payout(path.into_inner())
        .map_err(ApiError)?
        .ok_or_else(|| ApiError(ConductorError::NotFound("payout".to_string())))?;
    if payout.tenant_id != Some(tenant.id) {
        return Err(ApiError(ConductorError::NotFound("payout".to_string())));
    }

    Ok(HttpResponse::Ok().json(payout))
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/v1/payouts", web::post().to(create_payout))
        .route("/v1/payouts/{id}", web::get().to(get_payout));
}
