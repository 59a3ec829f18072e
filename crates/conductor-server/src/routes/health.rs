use actix_web::{web, HttpRequest, HttpResponse};
use subtle::ConstantTimeEq;

use conductor_types::ProviderName;

use crate::metrics::REGISTRY;
use crate::state::AppState;

/// GET /health - liveness and per-provider breaker status.
pub async fn health(state: web::Data<AppState>) -> HttpResponse {
    let providers: Vec<serde_json::Value> = ProviderName::ALL
        .iter()
        .filter_map(|name| state.router.executor(*name))
        .map(|e| serde_json::json!({ "provider": e.name().as_str(), "available": e.is_available() }))
        .collect();

    HttpResponse::Ok().json(serde_json::json!({
        "status": "ok",
        "service": "conductor",
        "version": env!("CARGO_PKG_VERSION"),
        "providers": providers,
    }))
}

/// GET /metrics - Prometheus exposition, optionally bearer-gated.
pub async fn metrics(req: HttpRequest, state: web::Data<AppState>) -> HttpResponse {
    if let Some(ref expected) = state.config.metrics_token {
        let authorized = req
            .headers()
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(|token| bool::from(token.as_bytes().ct_eq(expected.as_bytes())))
            .unwrap_or(false);

        if !authorized {
            return HttpResponse::Unauthorized().json(serde_json::json!({ "error": "valid bearer token required for /metrics" }));
        }
    }

    use prometheus::Encoder;
    let encoder = prometheus::TextEncoder::new();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&REGISTRY.gather(), &mut buffer) {
        tracing::error!("failed to encode metrics: {e}");
        return HttpResponse::InternalServerError().body("failed to encode metrics");
    }

    HttpResponse::Ok()
        .content_type("text/plain; version=0.0.4")
        .body(String::from_utf8(buffer).unwrap_or_default())
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/health", web::get().to(health))
        .route("/metrics", web::get().to(metrics));
}
