use actix_web::{web, HttpRequest, HttpResponse};
use conductor_orchestrator::{CreateChargeRequest, RequestContext};
use conductor_types::{CaptureMethod, Currency, Money, ProviderName};
use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use crate::error::ApiResult;
use crate::idempotent::run_idempotent;
use crate::middleware::{authenticate, check_rate_limit};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ChargeBody {
    pub customer_id: String,
    pub amount: i64,
    pub currency: String,
    pub payment_method: String,
    #[serde(default)]
    pub capture_method: Option<String>,
    #[serde(default)]
    pub preferred_provider: Option<String>,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

fn request_context(req: &HttpRequest) -> RequestContext {
    RequestContext {
        ip: req.connection_info().realip_remote_addr().map(str::to_string),
        user_agent: req.headers().get("user-agent").and_then(|v| v.to_str().ok()).map(str::to_string),
    }
}

fn idempotency_key(req: &HttpRequest) -> Option<String> {
    req.headers().get("idempotency-key").and_then(|v| v.to_str().ok()).map(str::to_string)
}

async fn create(
    req: HttpRequest,
    body: web::Bytes,
    state: web::Data<AppState>,
    path: &'static str,
    manual_capture: bool,
) -> ApiResult<HttpResponse> {
    let tenant = authenticate(&req, &state.tenant_registry)?;
    check_rate_limit(&state.rate_limiter, tenant.id)?;

    let parsed: ChargeBody = serde_json::from_slice(&body)
        .map_err(|e| crate::error::ApiError(conductor_types::ConductorError::InvalidRequest(e.to_string())))?;

    let preferred_provider = match parsed.preferred_provider {
        Some(ref s) => Some(
            s.parse::<ProviderName>()
                .map_err(|e| crate::error::ApiError(conductor_types::ConductorError::InvalidRequest(e)))?,
        ),
        None => None,
    };
    let capture_method = match parsed.capture_method.as_deref() {
        Some("manual") => CaptureMethod::Manual,
        _ => CaptureMethod::Automatic,
    };

    let key = idempotency_key(&req);
    let charge_req = CreateChargeRequest {
        tenant_id: Some(tenant.id),
        customer_id: parsed.customer_id,
        amount: Money::new(parsed.amount),
        currency: Currency::new(parsed.currency),
        payment_method_ref: parsed.payment_method,
        capture_method,
        preferred_provider,
        idempotency_key: key.clone(),
        metadata: parsed.metadata,
    };

    let ctx = request_context(&req);
    let cancel = CancellationToken::new();

    run_idempotent(
        &state.idempotency,
        Some(tenant.id),
        key.as_deref(),
        path,
        &body,
        state.config.idempotency_ttl,
        || async {
            if manual_capture {
                state.orchestrator.authorize(charge_req, &ctx, &cancel).await
            } else {
                state.orchestrator.create_charge(charge_req, &ctx, &cancel).await
            }
        },
    )
    .await
}

pub async fn charge(req: HttpRequest, body: web::Bytes, state: web::Data<AppState>) -> ApiResult<HttpResponse> {
    create(req, body, state, "/v1/charges", false).await
}

pub async fn authorize(req: HttpRequest, body: web::Bytes, state: web::Data<AppState>) -> ApiResult<HttpResponse> {
    create(req, body, state, "/v1/authorize", true).await
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/v1/charges", web::post().to(charge))
        .route("/v1/authorize", web::post().to(authorize));
}
