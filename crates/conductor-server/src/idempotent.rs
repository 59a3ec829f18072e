//! Wraps a mutating handler body in the idempotency keeper (spec §4.7).
//! Charge, authorize, capture, void and refund all funnel through this so
//! the lock/replay/conflict dance lives in one place instead of five.

use std::future::Future;

use actix_web::HttpResponse;
use conductor_core::{IdempotencyDecision, IdempotencyKeeper};
use conductor_storage::SqliteIdempotencyStore;
use conductor_types::ConductorError;
use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

use crate::error::ApiError;

pub async fn run_idempotent<F, Fut, T>(
    keeper: &IdempotencyKeeper<SqliteIdempotencyStore>,
    tenant_id: Option<Uuid>,
    idempotency_key: Option<&str>,
    request_path: &str,
    request_bytes: &[u8],
    ttl: std::time::Duration,
    op: F,
) -> Result<HttpResponse, ApiError>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, ConductorError>>,
    T: Serialize,
{
    let Some(key) = idempotency_key else {
        return run_once(op).await;
    };

    match keeper.get_or_create(tenant_id, key, request_path, request_bytes, ttl).await.map_err(ApiError)? {
        IdempotencyDecision::Replay { response_code, response_body } => {
            let status = actix_web::http::StatusCode::from_u16(response_code)
                .unwrap_or(actix_web::http::StatusCode::OK);
            Ok(HttpResponse::build(status).json(response_body))
        }
        IdempotencyDecision::New | IdempotencyDecision::Reuse => match op().await {
            Ok(value) => {
                let body = serde_json::to_value(&value).unwrap_or(Value::Null);
                keeper.complete(tenant_id, key, 200, body.clone()).await.map_err(ApiError)?;
                Ok(HttpResponse::Ok().json(body))
            }
            Err(err) => {
                let status = err.http_status();
                let body = serde_json::json!({ "error": err.to_string() });
                // A failed attempt still seals the slot: retrying the exact same
                // request with the same key must replay this failure, not retry
                // the gateway call a second time with no caller-visible signal.
                keeper.complete(tenant_id, key, status, body.clone()).await.map_err(ApiError)?;
                Err(ApiError(err))
            }
        },
    }
}

async fn run_once<F, Fut, T>(op: F) -> Result<HttpResponse, ApiError>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, ConductorError>>,
    T: Serialize,
{
    let value = op().await.map_err(ApiError)?;
    Ok(HttpResponse::Ok().json(value))
}
