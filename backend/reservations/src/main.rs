//! Grand Hotel reservations backend: entry point.
//!
//! Serves the reservation and payment REST API. Card payments go through the
//! processor's hosted page (or a local simulation of it) and come back as
//! signed callbacks that drive the payment state machine.

mod accounts;
mod api;
mod config;
mod db;
mod errors;
mod facade;
mod gateway;
mod mailer;
mod models;
mod payments;
mod reservations;

#[cfg(test)]
mod testing;

use std::sync::Arc;

use reqwest::Client;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::EnvFilter;

use config::Config;
use facade::PaymentService;
use mailer::Mailer;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialise structured logging (RUST_LOG controls verbosity).
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // Load optional .env file (ignored if missing).
    let _ = dotenvy::dotenv();

    let config = Config::from_env().map_err(|e| anyhow::anyhow!("{e}"))?;
    info!(profile = ?config.profile, gateway = ?config.gateway, "Configuration loaded");

    // Set up the SQLite connection pool and run migrations.
    let pool = db::init_pool(&config.database_url, config.db_max_connections).await?;

    // HTTP client shared by the card gateway and the mailer.
    let client = Client::builder()
        .timeout(std::time::Duration::from_secs(30))
        .build()?;

    // Fails fast on incomplete gateway credentials.
    let gateway = gateway::select_gateway(&config, client.clone())
        .map_err(|e| anyhow::anyhow!("{e}"))?;
    let mailer = Mailer::new(client, config.mail_relay_url.clone(), config.mail_from.clone());
    let payments = PaymentService::new(pool.clone(), gateway, mailer, config.frontend_url.clone());

    // ─── REST API ─────────────────────────────────────────
    let api_state = Arc::new(api::ApiState { pool, payments });

    let app = api::router(api_state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr = format!("0.0.0.0:{}", config.api_port);
    info!("API listening on http://{addr}");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
