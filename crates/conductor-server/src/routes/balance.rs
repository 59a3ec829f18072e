//! GET /v1/balance - reads through to whichever adapter serves the
//! requested currency (spec §6). No local ledger is maintained; the
//! gateway's own balance figure is the answer.

use actix_web::{web, HttpRequest, HttpResponse};
use conductor_types::{ConductorError, Currency};
use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use crate::error::{ApiError, ApiResult};
use crate::middleware::{authenticate, check_rate_limit};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct BalanceQuery {
    pub currency: String,
    #[serde(default)]
    pub provider: Option<String>,
}

pub async fn balance(req: HttpRequest, query: web::Query<BalanceQuery>, state: web::Data<AppState>) -> ApiResult<HttpResponse> {
    let tenant = authenticate(&req, &state.tenant_registry)?;
    check_rate_limit(&state.rate_limiter, tenant.id)?;

    let currency = Currency::new(query.currency.clone());
    let preferred = match &query.provider {
        Some(s) => Some(
            s.parse()
                .map_err(|e| ApiError(ConductorError::InvalidRequest(e)))?,
        ),
        None => None,
    };

    let executor = state.router.select_for_new_entity(&currency, preferred).map_err(ApiError)?;
    let cancel = CancellationToken::new();
    let amount = executor
        .execute(&cancel, |adapter| {
            let currency = currency.clone();
            async move { adapter.balance(&currency).await }
        })
        .await
        .map_err(ApiError)?;

    Ok(HttpResponse::Ok().json(serde_json::json!({
        "provider": executor.name().as_str(),
        "currency": currency.as_str(),
        "amount": amount.0,
    })))
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/v1/balance", web::get().to(balance));
}
