// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Sign-out route.

use axum::{routing::post, Extension, Json, Router};
use std::sync::Arc;

use crate::services::client::ClientApp;
use crate::services::gate::{GateView, SIGN_OUT_PATH};
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new().route(SIGN_OUT_PATH, post(logout))
}

/// Sign the client out. The session cookie stays; the client is anonymous
/// again and sees the verification flow.
async fn logout(Extension(client): Extension<Arc<ClientApp>>) -> Json<GateView> {
    client.sign_out().await;
    Json(client.render().await)
}
