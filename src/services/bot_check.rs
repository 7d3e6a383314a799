// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Invisible reCAPTCHA widget bookkeeping.
//!
//! A widget instance yields at most one proof. After a verification request
//! (successful or not) it is cleared and never used again; a retry needs a
//! fresh instance, which the browser renders into a new container.

use crate::error::AppError;
use serde::Serialize;
#[cfg(feature = "binding-generation")]
use ts_rs::TS;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WidgetState {
    Ready,
    Consumed,
    Cleared,
}

/// Token produced by the browser-side widget, bound to one widget instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BotCheckProof {
    pub token: String,
    pub generation: u64,
}

/// One single-use widget instance.
#[derive(Debug)]
pub struct BotCheckWidget {
    generation: u64,
    state: WidgetState,
}

impl BotCheckWidget {
    /// Render a new invisible widget.
    pub fn render(generation: u64) -> Self {
        tracing::debug!(generation, "Bot-check widget rendered");
        Self {
            generation,
            state: WidgetState::Ready,
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_ready(&self) -> bool {
        self.state == WidgetState::Ready
    }

    /// Exchange the browser token for a proof. Consumes the widget.
    pub fn take_proof(&mut self, token: &str) -> Result<BotCheckProof, AppError> {
        match self.state {
            WidgetState::Ready => {}
            WidgetState::Consumed | WidgetState::Cleared => {
                return Err(AppError::Challenge(
                    "reCAPTCHA not ready. Please retry.".to_string(),
                ))
            }
        }
        let token = token.trim();
        if token.is_empty() {
            return Err(AppError::Challenge(
                "reCAPTCHA not ready. Please retry.".to_string(),
            ));
        }
        self.state = WidgetState::Consumed;
        Ok(BotCheckProof {
            token: token.to_string(),
            generation: self.generation,
        })
    }

    /// Tear the widget down. It can never produce another proof.
    pub fn clear(&mut self) {
        if self.state != WidgetState::Cleared {
            tracing::debug!(generation = self.generation, "Bot-check widget cleared");
        }
        self.state = WidgetState::Cleared;
    }

    /// Browser-facing description of this widget.
    pub fn view(&self, site_key: Option<&str>) -> BotCheckView {
        BotCheckView {
            container_id: format!("recaptcha-container-{}", self.generation),
            generation: self.generation,
            size: "invisible".to_string(),
            site_key: site_key.map(str::to_string),
            ready: self.is_ready(),
        }
    }
}

impl Drop for BotCheckWidget {
    fn drop(&mut self) {
        self.clear();
    }
}

/// What the browser needs to render the current widget instance.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct BotCheckView {
    pub container_id: String,
    #[cfg_attr(feature = "binding-generation", ts(type = "number"))]
    pub generation: u64,
    pub size: String,
    pub site_key: Option<String>,
    pub ready: bool,
}
