// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Access gate: picks the screen for the current session.

use crate::models::{AuthUser, Session};
use crate::services::coupon_history::PanelView;
use crate::services::phone_auth::VerificationView;
use crate::services::profile_form::ProfileFormView;
use serde::Serialize;
#[cfg(feature = "binding-generation")]
use ts_rs::TS;

/// Path of the sign-out control shown to signed-in users.
pub const SIGN_OUT_PATH: &str = "/auth/logout";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateState {
    Loading,
    Unauthenticated,
    Authenticated,
}

impl GateState {
    /// `loading` wins over everything; then presence of a user decides.
    pub fn from_session(session: &Session) -> Self {
        if session.loading {
            GateState::Loading
        } else if session.user.is_none() {
            GateState::Unauthenticated
        } else {
            GateState::Authenticated
        }
    }
}

/// Whole-screen view for one client.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "state", rename_all = "snake_case")]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub enum GateView {
    Loading {
        message: String,
    },
    Unauthenticated {
        verification: VerificationView,
    },
    Authenticated {
        user_label: String,
        sign_out_path: String,
        content: HomeView,
    },
}

/// Content behind the gate.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "screen", rename_all = "snake_case")]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub enum HomeView {
    ProfileForm {
        form: ProfileFormView,
    },
    History {
        saved_notice: Option<String>,
        panel: PanelView,
    },
}

/// Render the gate. Only the branch for the current state is evaluated.
pub fn render_gate<V, C>(session: &Session, verification: V, children: C) -> GateView
where
    V: FnOnce() -> VerificationView,
    C: FnOnce(&AuthUser) -> HomeView,
{
    match (GateState::from_session(session), session.user.as_ref()) {
        (GateState::Authenticated, Some(user)) => GateView::Authenticated {
            user_label: user.label().to_string(),
            sign_out_path: SIGN_OUT_PATH.to_string(),
            content: children(user),
        },
        (GateState::Unauthenticated, _) => GateView::Unauthenticated {
            verification: verification(),
        },
        _ => GateView::Loading {
            message: "Loading...".to_string(),
        },
    }
}
