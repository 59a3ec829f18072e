//! Subscriptions (SPEC_FULL §3). `create-subscription` is in spec §4.7's
//! idempotency scope; cancellation is not.

use actix_web::{web, HttpRequest, HttpResponse};
use conductor_types::ConductorError;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::{ApiError, ApiResult};
use crate::idempotent::run_idempotent;
use crate::middleware::{authenticate, check_rate_limit};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct CreateSubscriptionBody {
    pub customer_id: String,
    pub customer_provider_id: String,
    pub plan_id: Uuid,
}

pub async fn create_subscription(req: HttpRequest, body: web::Bytes, state: web::Data<AppState>) -> ApiResult<HttpResponse> {
    let tenant = authenticate(&req, &state.tenant_registry)?;
    check_rate_limit(&state.rate_limiter, tenant.id)?;

    let parsed: CreateSubscriptionBody = serde_json::from_slice(&body).map_err(|e| ApiError(ConductorError::InvalidRequest(e.to_string())))?;
    let plan = state
        .ancillary
        .find_plan(parsed.plan_id)
        .map_err(ApiError)?
        .ok_or_else(|| ApiError(ConductorError::NotFound("plan".to_string())))?;

    let key = req.headers().get("idempotency-key").and_then(|v| v.to_str().ok()).map(str::to_string);
    let cancel = CancellationToken::new();
    let tenant_id = Some(tenant.id);

    run_idempotent(
        &state.idempotency,
        Some(tenant.id),
        key.as_deref(),
        "/v1/subscriptions",
        &body,
        state.config.idempotency_ttl,
        || async {
            state
                .ancillary
                .create_subscription(tenant_id, &parsed.customer_provider_id, &parsed.customer_id, &plan, &cancel)
                .await
        },
    )
    .await
}

pub async fn get_subscription(req: HttpRequest, path: web::Path<Uuid>, state: web::Data<AppState>) -> ApiResult<HttpResponse> {
    let tenant = authenticate(&req, &state.tenant_registry)?;
    check_rate_limit(&state.rate_limiter, tenant.id)?;

    let subscription = state
        .ancillary
        .find_subscription(path.into_inner())
        .map_err(ApiError)?
        .ok_or_else(|| ApiError(ConductorError::NotFound("subscription".to_string())))?;
    if subscription.tenant_id != Some(tenant.id) {
        return Err(ApiError(ConductorError::NotFound("subscription".to_string())));
    }

    Ok(HttpResponse::Ok().json(subscription))
}

pub async fn list_subscriptions(req: HttpRequest, state: web::Data<AppState>) -> ApiResult<HttpResponse> {
    let tenant = authenticate(&req, &state.tenant_registry)?;
    check_rate_limit(&state.rate_limiter, tenant.id)?;

    let subscriptions = state.ancillary.list_subscriptions(Some(tenant.id)).map_err(ApiError)?;
    Ok(HttpResponse::Ok().json(subscriptions))
}

pub async fn cancel_subscription(req: HttpRequest, path: web::Path<Uuid>, state: web::Data<AppState>) -> ApiResult<HttpResponse> {
    let tenant = authenticate(&req, &state.tenant_registry)?;
    check_rate_limit(&state.rate_limiter, tenant.id)?;

    let subscription_id = path.into_inner();
    let existing = state
        .ancillary
        .find_subscription(subscription_id)
        .map_err(ApiError)?
        .ok_or_else(|| ApiError(ConductorError::NotFound("subscription".to_string())))?;
    if existing.tenant_id != Some(tenant.id) {
        return Err(ApiError(ConductorError::NotFound("subscription".to_string())));
    }

    let cancel = CancellationToken::new();
    let subscription = state.ancillary.cancel_subscription(subscription_id, &cancel).await.map_err(ApiError)?;
    Ok(HttpResponse::Ok().json(subscription))
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/v1/subscriptions", web::post().to(create_subscription))
        .route("/v1/subscriptions", web::get().to(list_subscriptions))
        .route("/v1/subscriptions/{id}", web::get().to(get_subscription))
        .route("/v1/subscriptions/{id}/cancel", web::post().to(cancel_subscription));
}
