//! Disputes (SPEC_FULL §3). A dispute has no `tenant_id` of its own; it's
//! scoped indirectly through the payment it was raised against. Evidence
//! submission isn't in spec §4.7's idempotency scope.

use actix_web::{web, HttpRequest, HttpResponse};
use conductor_types::ConductorError;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::{ApiError, ApiResult};
use crate::middleware::{authenticate, check_rate_limit};
use crate::state::AppState;

async fn owning_tenant_dispute(state: &AppState, tenant_id: Uuid, dispute_id: Uuid) -> ApiResult<conductor_types::Dispute> {
    let dispute = state
        .disputes
        .find(dispute_id)
        .map_err(ApiError)?
        .ok_or_else(|| ApiError(ConductorError::NotFound("dispute".to_string())))?;

    let payment = state
        .payments
        .find(dispute.payment_id)
        .map_err(ApiError)?
        .ok_or_else(|| ApiError(ConductorError::NotFound("dispute".to_string())))?;
    if payment.tenant_id != Some(tenant_id) {
        return Err(ApiError(ConductorError::NotFound("dispute".to_string())));
    }

    Ok(dispute)
}

pub async fn get_dispute(req: HttpRequest, path: web::Path<Uuid>, state: web::Data<AppState>) -> ApiResult<HttpResponse> {
    let tenant = authenticate(&req, &state.tenant_registry)?;
    check_rate_limit(&state.rate_limiter, tenant.id)?;

    let dispute = owning_tenant_dispute(&state, tenant.id, path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(dispute))
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

    let disputes = state.ancillary.list_disputes_for_payment(payment_id).map_err(ApiError)?;
    Ok(HttpResponse::Ok().json(disputes))
}

pub async fn submit_evidence(
    req: HttpRequest,
    path: web::Path<Uuid>,
    body: web::Bytes,
    state: web::Data<AppState>,
) -> ApiResult<HttpResponse> {
    let tenant = authenticate(&req, &state.tenant_registry)?;
    check_rate_limit(&state.rate_limiter, tenant.id)?;

    let dispute_id = path.into_inner();
    owning_tenant_dispute(&state, tenant.id, dispute_id).await?;

    let evidence: serde_json::Value = serde_json::from_slice(&body).map_err(|e| ApiError(ConductorError::InvalidRequest(e.to_string())))?;
    let cancel = CancellationToken::new();
    let dispute = state.ancillary.submit_dispute_evidence(dispute_id, evidence, &cancel).await.map_err(ApiError)?;
    Ok(HttpResponse::Ok().json(dispute))
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/v1/disputes/{id}", web::get().to(get_dispute))
        .route("/v1/disputes/{id}/evidence", web::post().to(submit_evidence))
        .route("/v1/payments/{id}/disputes", web::get().to(list_for_payment));
}
