// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Two-phase phone verification flow.
//!
//! Phase A collects a number and requests an SMS challenge; phase B confirms
//! the code. Backend calls happen outside the flow: `begin_*` validates and
//! marks the request in flight, `finish_*` applies the outcome. An outcome
//! for an attempt that is no longer current is ignored.

use crate::error::AppError;
use crate::services::bot_check::{BotCheckProof, BotCheckView, BotCheckWidget};
use crate::services::identity::ChallengeHandle;
use crate::services::phone::{digits_only, format_display, to_e164, MIN_DIGITS};
use serde::Serialize;
#[cfg(feature = "binding-generation")]
use ts_rs::TS;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub enum Phase {
    EnterPhone,
    EnterCode,
}

/// Challenge request to run against the backend.
#[derive(Debug)]
pub struct SendRequest {
    pub attempt: u64,
    pub phone_number: String,
    pub proof: BotCheckProof,
}

/// Code confirmation to run against the backend.
#[derive(Debug)]
pub struct VerifyRequest {
    pub attempt: u64,
    pub challenge: ChallengeHandle,
    pub code: String,
}

/// Phone verification state for one client.
#[derive(Debug)]
pub struct PhoneVerificationFlow {
    phone: String,
    code: String,
    challenge: Option<ChallengeHandle>,
    widget: Option<BotCheckWidget>,
    widget_generation: u64,
    in_flight: Option<u64>,
    sending: bool,
    verifying: bool,
    attempts: u64,
    error: Option<String>,
}

impl PhoneVerificationFlow {
    /// Mount the flow with a freshly rendered invisible widget.
    pub fn mount() -> Self {
        let mut flow = Self {
            phone: String::new(),
            code: String::new(),
            challenge: None,
            widget: None,
            widget_generation: 0,
            in_flight: None,
            sending: false,
            verifying: false,
            attempts: 0,
            error: None,
        };
        flow.recreate_widget();
        flow
    }

    pub fn phase(&self) -> Phase {
        if self.challenge.is_some() {
            Phase::EnterCode
        } else {
            Phase::EnterPhone
        }
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Store phone input, normalized to grouped digits.
    pub fn set_phone(&mut self, input: &str) {
        self.phone = format_display(input);
    }

    pub fn set_code(&mut self, code: &str) {
        self.code = code.trim().to_string();
    }

    /// Phase A submit is enabled.
    pub fn can_send(&self) -> bool {
        self.phase() == Phase::EnterPhone
            && !self.sending
            && digits_only(&self.phone).len() >= MIN_DIGITS
    }

    /// Phase B submit is enabled.
    pub fn can_verify(&self) -> bool {
        self.phase() == Phase::EnterCode && !self.verifying
    }

    fn recreate_widget(&mut self) {
        if let Some(mut old) = self.widget.take() {
            old.clear();
        }
        self.widget_generation += 1;
        self.widget = Some(BotCheckWidget::render(self.widget_generation));
    }

    fn fail(&mut self, err: AppError) -> AppError {
        self.error = Some(err.user_message());
        err
    }

    /// Validate phase A and take the widget's proof.
    pub fn begin_send(
        &mut self,
        bot_token: &str,
        country_code: &str,
    ) -> Result<SendRequest, AppError> {
        if self.phase() != Phase::EnterPhone {
            return Err(AppError::Busy(
                "A code has already been sent. Change the number to start over.".to_string(),
            ));
        }
        if self.sending {
            return Err(AppError::Busy("A code request is already in progress.".to_string()));
        }
        self.error = None;

        let phone_number = match to_e164(&self.phone, country_code) {
            Ok(number) => number,
            Err(e) => return Err(self.fail(e)),
        };

        let proof = match self.widget.as_mut() {
            Some(widget) => widget.take_proof(bot_token),
            None => Err(AppError::Challenge(
                "reCAPTCHA not ready. Please retry.".to_string(),
            )),
        };
        let proof = match proof {
            Ok(proof) => proof,
            Err(e) => {
                self.recreate_widget();
                return Err(self.fail(e));
            }
        };

        self.attempts += 1;
        self.in_flight = Some(self.attempts);
        self.sending = true;
        Ok(SendRequest {
            attempt: self.attempts,
            phone_number,
            proof,
        })
    }

    /// Apply the challenge request outcome. The used widget is torn down
    /// either way; after a failure a fresh one is rendered for the retry.
    pub fn finish_send(&mut self, attempt: u64, result: Result<ChallengeHandle, &AppError>) {
        if self.in_flight != Some(attempt) || !self.sending {
            tracing::debug!(attempt, "Ignoring stale challenge result");
            return;
        }
        self.in_flight = None;
        self.sending = false;

        match result {
            Ok(challenge) => {
                tracing::debug!(attempt, "Challenge issued; awaiting code");
                if let Some(widget) = self.widget.as_mut() {
                    widget.clear();
                }
                self.challenge = Some(challenge);
                self.error = None;
            }
            Err(e) => {
                tracing::info!(attempt, error = %e, "Challenge request failed");
                self.error = Some(e.user_message());
                self.recreate_widget();
            }
        }
    }

    /// Validate phase B and hand out the stored challenge.
    pub fn begin_verify(&mut self) -> Result<VerifyRequest, AppError> {
        if self.verifying {
            return Err(AppError::Busy("Verification is already in progress.".to_string()));
        }
        self.error = None;

        let Some(challenge) = self.challenge.clone() else {
            return Err(self.fail(AppError::Confirmation(
                "No verification in progress.".to_string(),
            )));
        };

        self.attempts += 1;
        self.in_flight = Some(self.attempts);
        self.verifying = true;
        Ok(VerifyRequest {
            attempt: self.attempts,
            challenge,
            code: self.code.clone(),
        })
    }

    /// Apply the confirmation outcome. Failure keeps the challenge and code
    /// so the user can retry in place.
    pub fn finish_verify(&mut self, attempt: u64, result: Result<(), &AppError>) {
        if self.in_flight != Some(attempt) || !self.verifying {
            tracing::debug!(attempt, "Ignoring stale confirmation result");
            return;
        }
        self.in_flight = None;
        self.verifying = false;

        if let Err(e) = result {
            tracing::info!(attempt, error = %e, "Code confirmation failed");
            self.error = Some(e.user_message());
        }
    }

    /// Drop the challenge and return to phase A.
    pub fn change_number(&mut self) -> Result<(), AppError> {
        if self.verifying {
            return Err(AppError::Busy("Verification is already in progress.".to_string()));
        }
        self.challenge = None;
        self.code.clear();
        self.error = None;
        if !self.widget.as_ref().is_some_and(BotCheckWidget::is_ready) {
            self.recreate_widget();
        }
        Ok(())
    }

    /// Tear everything down; nothing may be used afterwards.
    pub fn unmount(&mut self) {
        if let Some(mut widget) = self.widget.take() {
            widget.clear();
        }
        self.challenge = None;
        self.in_flight = None;
        self.sending = false;
        self.verifying = false;
    }

    pub fn view(&self, site_key: Option<&str>) -> VerificationView {
        let phase = self.phase();
        VerificationView {
            phase,
            step_label: match phase {
                Phase::EnterPhone => "Step 1 · Enter number".to_string(),
                Phase::EnterCode => "Step 2 · Verify code".to_string(),
            },
            phone: self.phone.clone(),
            code: self.code.clone(),
            sending: self.sending,
            verifying: self.verifying,
            can_submit: match phase {
                Phase::EnterPhone => self.can_send(),
                Phase::EnterCode => self.can_verify(),
            },
            error: self.error.clone(),
            bot_check: self.widget.as_ref().map(|w| w.view(site_key)),
        }
    }
}

/// Browser-facing state of the verification flow.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct VerificationView {
    pub phase: Phase,
    pub step_label: String,
    pub phone: String,
    pub code: String,
    pub sending: bool,
    pub verifying: bool,
    pub can_submit: bool,
    pub error: Option<String>,
    pub bot_check: Option<BotCheckView>,
}
