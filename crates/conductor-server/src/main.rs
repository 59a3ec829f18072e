use actix_cors::Cors;
use actix_web::{web, App, HttpServer};

mod config;
mod error;
mod idempotent;
mod metrics;
mod middleware;
mod routes;
mod state;

use config::ServerConfig;
use state::AppState;

fn build_cors(origins: &[String]) -> Cors {
    if origins.iter().any(|o| o == "*") {
        return Cors::default().allow_any_origin().allow_any_method().allow_any_header().max_age(3600);
    }
    let mut cors = Cors::default();
    for origin in origins {
        cors = cors.allowed_origin(origin);
    }
    cors.allow_any_method().allow_any_header().max_age(3600)
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    metrics::register_metrics();

    let config = ServerConfig::from_env().expect("invalid server configuration");
    let port = config.port;
    let cors_origins = config.allowed_origins.clone();

    tracing::info!(port, "conductor listening");

    let app_state = web::Data::new(AppState::new(config).expect("failed to initialize application state"));

    HttpServer::new(move || {
        App::new()
            .wrap(build_cors(&cors_origins))
            .app_data(web::JsonConfig::default().limit(65_536))
            .app_data(app_state.clone())
            .configure(routes::charges::configure)
            .configure(routes::payments::configure)
            .configure(routes::refunds::configure)
            .configure(routes::balance::configure)
            .configure(routes::webhooks::configure)
            .configure(routes::health::configure)
            .configure(routes::customers::configure)
            .configure(routes::subscriptions::configure)
            .configure(routes::invoices::configure)
            .configure(routes::payouts::configure)
            .configure(routes::disputes::configure)
    })
    .bind(("0.0.0.0", port))?
    .run()
    .await
}
