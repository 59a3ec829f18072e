//! POST /v1/webhooks/{provider} - inbound gateway event intake (C9, spec
//! §4.9, §6). Unauthenticated by tenant credentials; trust is established
//! per-provider by [`InboundWebhookPipeline::receive`] verifying the
//! gateway's own signature over the raw body.

use actix_web::{web, HttpRequest, HttpResponse};
use conductor_providers::WebhookHeaders;
use conductor_types::{ConductorError, ProviderName};
use std::str::FromStr;

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

pub async fn receive(req: HttpRequest, path: web::Path<String>, body: web::Bytes, state: web::Data<AppState>) -> ApiResult<HttpResponse> {
    let provider = ProviderName::from_str(&path.into_inner())
        .map_err(|e| ApiError(ConductorError::InvalidRequest(e)))?;

    let headers = WebhookHeaders::new(
        req.headers()
            .iter()
            .filter_map(|(name, value)| value.to_str().ok().map(|v| (name.as_str().to_string(), v.to_string()))),
    );

    state.inbound_webhooks.receive(provider, &headers, &body).await.map_err(ApiError)?;

    Ok(HttpResponse::Ok().json(serde_json::json!({ "received": true })))
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/v1/webhooks/{provider}", web::post().to(receive));
}
