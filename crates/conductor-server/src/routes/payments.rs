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

fn request_context(req: &HttpRequest) -> RequestContext {
    RequestContext {
        ip: req.connection_info().realip_remote_addr().map(str::to_string),
        user_agent: req.headers().get("user-agent").and_then(|v| v.to_str().ok()).map(str::to_string),
    }
}

fn idempotency_key(req: &HttpRequest) -> Option<String> {
    req.headers().get("idempotency-key").and_then(|v| v.to_str().ok()).map(str::to_string)
}

pub async fn get_payment(req: HttpRequest, path: web::Path<Uuid>, state: web::Data<AppState>) -> ApiResult<HttpResponse> {
    let tenant = authenticate(&req, &state.tenant_registry)?;
    check_rate_limit(&state.rate_limiter, tenant.id)?;

    let payment = state
        .payments
        .find(path.into_inner())
        .map_err(ApiError)?
        .ok_or_else(|| ApiError(ConductorError::NotFound("payment".to_string())))?;

    if payment.tenant_id != Some(tenant.id) {
        return Err(ApiError(ConductorError::NotFound("payment".to_string())));
    }

    Ok(HttpResponse::Ok().json(payment))
}

#[derive(Debug, Deserialize, Default)]
pub struct CaptureBody {
    #[serde(default)]
    pub amount: Option<i64>,
}

pub async fn capture(
    req: HttpRequest,
    path: web::Path<Uuid>,
    body: web::Bytes,
    state: web::Data<AppState>,
) -> ApiResult<HttpResponse> {
    let tenant = authenticate(&req, &state.tenant_registry)?;
    check_rate_limit(&state.rate_limiter, tenant.id)?;

    let payment_id = path.into_inner();
    let parsed: CaptureBody = if body.is_empty() {
        CaptureBody::default()
    } else {
        serde_json::from_slice(&body).map_err(|e| ApiError(ConductorError::InvalidRequest(e.to_string())))?
    };

    let key = idempotency_key(&req);
    let ctx = request_context(&req);
    let cancel = CancellationToken::new();

    run_idempotent(
        &state.idempotency,
        Some(tenant.id),
        key.as_deref(),
        &format!("/v1/payments/{payment_id}/capture"),
        &body,
        state.config.idempotency_ttl,
        || async { state.orchestrator.capture(payment_id, parsed.amount.map(Money::new), &ctx, &cancel).await },
    )
    .await
}

pub async fn void(req: HttpRequest, path: web::Path<Uuid>, body: web::Bytes, state: web::Data<AppState>) -> ApiResult<HttpResponse> {
    let tenant = authenticate(&req, &state.tenant_registry)?;
    check_rate_limit(&state.rate_limiter, tenant.id)?;

    let payment_id = path.into_inner();
    let key = idempotency_key(&req);
    let ctx = request_context(&req);
    let cancel = CancellationToken::new();

    run_idempotent(
        &state.idempotency,
        Some(tenant.id),
        key.as_deref(),
        &format!("/v1/payments/{payment_id}/void"),
        &body,
        state.config.idempotency_ttl,
        || async { state.orchestrator.void(payment_id, &ctx, &cancel).await },
    )
    .await
}

pub async fn confirm(req: HttpRequest, path: web::Path<Uuid>, body: web::Bytes, state: web::Data<AppState>) -> ApiResult<HttpResponse> {
    let tenant = authenticate(&req, &state.tenant_registry)?;
    check_rate_limit(&state.rate_limiter, tenant.id)?;

    let payment_id = path.into_inner();
    let key = idempotency_key(&req);
    let ctx = request_context(&req);
    let cancel = CancellationToken::new();

    run_idempotent(
        &state.idempotency,
        Some(tenant.id),
        key.as_deref(),
        &format!("/v1/payments/{payment_id}/confirm"),
        &body,
        state.config.idempotency_ttl,
        || async { state.orchestrator.confirm_3ds(payment_id, &ctx, &cancel).await },
    )
    .await
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/v1/payments/{id}", web::get().to(get_payment))
        .route("/v1/payments/{id}/capture", web::post().to(capture))
        .route("/v1/payments/{id}/void", web::post().to(void))
        .route("/v1/payments/{id}/confirm", web::post().to(confirm));
}
