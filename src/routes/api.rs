// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Client-facing API: current view, event stream, and user actions.
//!
//! Every action responds with the re-rendered [`GateView`], so the page can
//! update without waiting for the event stream.

use crate::error::{AppError, Result};
use crate::services::client::ClientApp;
use crate::services::gate::GateView;
use crate::services::profile_form::ConfirmationPrompt;
use crate::AppState;
use axum::{
    extract::Path,
    response::sse::{Event, KeepAlive, Sse},
    routing::{get, post},
    Extension, Json, Router,
};
use futures_util::stream::{self, Stream};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::sync::Arc;
#[cfg(feature = "binding-generation")]
use ts_rs::TS;
use validator::Validate;

/// API routes. The client session middleware is applied in routes/mod.rs.
pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/view", get(get_view))
        .route("/api/events", get(events))
        .route("/api/phone", post(set_phone))
        .route("/api/phone/send", post(send_code))
        .route("/api/phone/verify", post(verify_code))
        .route("/api/phone/change-number", post(change_number))
        .route("/api/profile", post(submit_profile))
        .route("/api/profile/confirm", post(confirm_profile))
        .route("/api/coupons/{id}/copy", post(copy_coupon))
}

fn validated<T: Validate>(body: T) -> Result<T> {
    body.validate()
        .map_err(|e| AppError::BadRequest(e.to_string()))?;
    Ok(body)
}

// ─── View ────────────────────────────────────────────────────

async fn get_view(Extension(client): Extension<Arc<ClientApp>>) -> Json<GateView> {
    Json(client.render().await)
}

/// Stream a fresh view on connect and after every change.
async fn events(
    Extension(client): Extension<Arc<ClientApp>>,
) -> Sse<impl Stream<Item = std::result::Result<Event, Infallible>>> {
    let revisions = client.subscribe_revisions();
    tracing::debug!(client = %client.id(), "Event stream opened");

    let stream = stream::unfold(
        (client, revisions, true),
        |(client, mut revisions, first)| async move {
            if !first && revisions.changed().await.is_err() {
                return None;
            }
            let revision = *revisions.borrow_and_update();
            client.touch();
            let view = client.render().await;
            let event = Event::default()
                .event("view")
                .id(revision.to_string())
                .json_data(&view)
                .unwrap_or_else(|e| {
                    tracing::warn!(error = %e, "Failed to encode view");
                    Event::default().event("error")
                });
            Some((Ok(event), (client, revisions, false)))
        },
    );

    Sse::new(stream).keep_alive(KeepAlive::default())
}

// ─── Phone verification ──────────────────────────────────────

#[derive(Debug, Deserialize, Validate)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct PhoneInputRequest {
    #[validate(length(max = 32))]
    pub phone: String,
}

#[derive(Debug, Deserialize, Validate)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct SendCodeRequest {
    #[validate(length(max = 32))]
    #[serde(default)]
    pub phone: Option<String>,
    /// Token from the invisible bot-check widget.
    #[validate(length(max = 4096))]
    #[serde(default)]
    pub recaptcha_token: String,
}

#[derive(Debug, Deserialize, Validate)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct VerifyCodeRequest {
    #[validate(length(max = 16))]
    pub code: String,
}

async fn set_phone(
    Extension(client): Extension<Arc<ClientApp>>,
    Json(body): Json<PhoneInputRequest>,
) -> Result<Json<GateView>> {
    let body = validated(body)?;
    client.set_phone(&body.phone).await?;
    Ok(Json(client.render().await))
}

async fn send_code(
    Extension(client): Extension<Arc<ClientApp>>,
    Json(body): Json<SendCodeRequest>,
) -> Result<Json<GateView>> {
    let body = validated(body)?;
    client
        .send_code(body.phone.as_deref(), &body.recaptcha_token)
        .await?;
    Ok(Json(client.render().await))
}

async fn verify_code(
    Extension(client): Extension<Arc<ClientApp>>,
    Json(body): Json<VerifyCodeRequest>,
) -> Result<Json<GateView>> {
    let body = validated(body)?;
    client.verify_code(&body.code).await?;
    Ok(Json(client.render().await))
}

async fn change_number(Extension(client): Extension<Arc<ClientApp>>) -> Result<Json<GateView>> {
    client.change_number().await?;
    Ok(Json(client.render().await))
}

// ─── Profile ─────────────────────────────────────────────────

#[derive(Debug, Deserialize, Validate)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct ProfileNameRequest {
    #[validate(length(max = 256))]
    pub name: String,
}

#[derive(Debug, Deserialize, Validate)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct ConfirmProfileRequest {
    #[validate(length(max = 256))]
    pub name: String,
    pub confirmed: bool,
}

async fn submit_profile(
    Extension(client): Extension<Arc<ClientApp>>,
    Json(body): Json<ProfileNameRequest>,
) -> Result<Json<ConfirmationPrompt>> {
    let body = validated(body)?;
    Ok(Json(client.submit_profile(&body.name).await?))
}

async fn confirm_profile(
    Extension(client): Extension<Arc<ClientApp>>,
    Json(body): Json<ConfirmProfileRequest>,
) -> Result<Json<GateView>> {
    let body = validated(body)?;
    client.confirm_profile(&body.name, body.confirmed).await?;
    Ok(Json(client.render().await))
}

// ─── Coupons ─────────────────────────────────────────────────

#[derive(Debug, Serialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct CopyResponse {
    /// Text for the browser to put on the clipboard.
    pub code: String,
}

async fn copy_coupon(
    Extension(client): Extension<Arc<ClientApp>>,
    Path(id): Path<String>,
) -> Result<Json<CopyResponse>> {
    let code = client.copy_coupon(&id).await?;
    Ok(Json(CopyResponse { code }))
}
