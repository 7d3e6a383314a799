// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Hive Coupons API Server
//!
//! Serves the phone sign-in flow, the Hive ID form, and the live coupon
//! history to the web page.

use hive_coupons::{
    config::Config,
    db::{DocumentStore, FirestoreDb, MemoryDb},
    services::{IdentityApi, IdentityToolkit, MockIdentity},
    AppState,
};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Code accepted by the offline identity backend.
const OFFLINE_CODE: &str = "123456";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize structured JSON logging for GCP
    init_logging()?;

    // Load configuration from environment
    let config = Config::from_env()?;
    tracing::info!(port = config.port, offline = config.offline, "Starting Hive Coupons API");

    let (identity, db): (Arc<dyn IdentityApi>, Arc<dyn DocumentStore>) = if config.offline {
        tracing::warn!(code = OFFLINE_CODE, "Using in-memory identity and document backends");
        (
            Arc::new(MockIdentity::new(OFFLINE_CODE)),
            Arc::new(MemoryDb::new()),
        )
    } else {
        let db = FirestoreDb::new(&config.gcp_project_id).await?;
        tracing::info!(project = %config.gcp_project_id, "Firestore client initialized");
        (
            Arc::new(IdentityToolkit::new(config.firebase_api_key.clone())),
            Arc::new(db),
        )
    };

    // Build shared state
    let state = Arc::new(AppState::new(config.clone(), identity, db));
    spawn_idle_sweeper(state.clone());

    // Build router
    let app = hive_coupons::routes::create_router(state);

    // Start server
    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(address = %addr, "Server listening");

    axum::serve(listener, app).await?;
    Ok(())
}

/// Periodically drop client sessions that have gone quiet.
fn spawn_idle_sweeper(state: Arc<AppState>) {
    let timeout = state.config.session_idle_timeout;
    let period = (timeout / 4).max(Duration::from_secs(30));
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            state.clients.evict_idle(timeout).await;
        }
    });
}

/// Initialize structured JSON logging (GCP-compliant).
fn init_logging() -> Result<(), Box<dyn std::error::Error>> {
    let format = tracing_subscriber::fmt::layer()
        .json()
        .with_target(false)
        .with_current_span(true)
        .flatten_event(true);

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("hive_coupons=debug".parse()?)
                .add_directive("info".parse()?),
        )
        .with(format)
        .init();
    Ok(())
}
