use actix_web::{web, HttpRequest, HttpResponse};
use conductor_orchestrator::RequestContext;
use conductor_types::{ConductorError, Money};
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::{ApiError, ApiResult};
use crate::idempotent::run_idempotent;
use crate::middleware::{authenticate, check_rate_limit};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct RefundBody {
    pub payment_id: Uuid,
    pub amount: i64,
    #[serde(default)]
    pub reason: Option<String>,
}

pub async fn refund(req: HttpRequest, body: web::Bytes, state: web::Data<AppState>) -> ApiResult<HttpResponse> {
    let tenant = authenticate(&req, &state.tenant_registry)?;
    check_rate_limit(&state.rate_limiter, tenant.id)?;

    let parsed: RefundBody = serde_json::from_slice(&body).map_err(|e| ApiError(ConductorError::InvalidRequest(e.to_string())))?;

    let key = req.headers().get("idempotency-key").and_then(|v| v.to_str().ok()).map(str::to_string);
    let ctx = RequestContext {
        ip: req.connection_info().realip_remote_addr().map(str::to_string),
        user_agent: req.headers().get("user-agent").and_then(|v| v.to_str().ok()).map(str::to_string),
    };
    let cancel = CancellationToken::new();
    let amount = Money::new(parsed.amount);
    let payment_id = parsed.payment_id;
    let reason = parsed.reason;

    run_idempotent(
        &state.idempotency,
        Some(tenant.id),
        key.as_deref(),
        "/v1/refunds",
        &body,
        state.config.idempotency_ttl,
        || async { state.orchestrator.refund(payment_id, amount, reason, &ctx, &cancel).await },
    )
    .await
}

pub async fn list_for_payment(req: HttpRequest, path: web::Path<Uuid>, state: web::Data<AppState>) -> ApiResult<HttpResponse> {
    let tenant = authenticate(&req, &state.tenant_registry)?;
    check_rate_limit(&state.rate_limiter, tenant.id)?;

    let payment_id = path.into_inner();
    let payment = state
        .payments
        .find(payment_id)
        .map_err(ApiError)?
        .ok_or_else(|| ApiError(ConductorError::NotFound("payment".to_string())))?;
    if payment.tenant_id != Some(tenant.id) {
        return Err(ApiError(ConductorError::NotFound("payment".to_string())));
    }

    let refunds = state.refunds.list_for_payment(payment_id).map_err(ApiError)?;
    Ok(HttpResponse::Ok().json(refunds))
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/v1/refunds", web::post().to(refund))
        .route("/v1/payments/{id}/refunds", web::get().to(list_for_payment));
}
