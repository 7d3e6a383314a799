// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Identity backend: phone verification and auth-record updates.
//!
//! Production talks to the Firebase Identity Toolkit REST API. Handles:
//! - reCAPTCHA site key discovery
//! - SMS challenge request (`accounts:sendVerificationCode`)
//! - Code confirmation (`accounts:signInWithPhoneNumber`)
//! - Display name updates (`accounts:update`)

use crate::error::AppError;
use crate::models::AuthUser;
use crate::services::bot_check::BotCheckProof;
use dashmap::DashMap;
use futures_util::future::{BoxFuture, FutureExt};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use tokio::sync::OnceCell;

const DEFAULT_BASE_URL: &str = "https://identitytoolkit.googleapis.com/v1";

/// An in-flight phone verification, as issued by the backend.
#[derive(Clone, PartialEq, Eq)]
pub struct ChallengeHandle {
    pub session_info: String,
    pub phone_number: String,
}

impl std::fmt::Debug for ChallengeHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChallengeHandle")
            .field("phone_number", &self.phone_number)
            .finish_non_exhaustive()
    }
}

/// Identity operations the app needs from its backend.
pub trait IdentityApi: Send + Sync {
    /// Site key for rendering the bot-check widget.
    fn recaptcha_site_key(&self) -> BoxFuture<'_, Result<String, AppError>>;

    /// Ask the backend to text a code to `phone_number` (E.164).
    fn send_verification_code<'a>(
        &'a self,
        phone_number: &'a str,
        proof: &'a BotCheckProof,
    ) -> BoxFuture<'a, Result<ChallengeHandle, AppError>>;

    /// Confirm `code` against `challenge`; signs the user in on success.
    fn confirm_code<'a>(
        &'a self,
        challenge: &'a ChallengeHandle,
        code: &'a str,
    ) -> BoxFuture<'a, Result<AuthUser, AppError>>;

    /// Set the display name on the auth record; returns the refreshed user.
    fn update_display_name<'a>(
        &'a self,
        user: &'a AuthUser,
        display_name: &'a str,
    ) -> BoxFuture<'a, Result<AuthUser, AppError>>;
}

/// Turn a backend error into text fit for the user.
///
/// Strips the SDK-style "Firebase: Error" prefix and maps Identity Toolkit
/// error codes to sentences. Unknown codes pass through.
pub fn friendly_message(raw: &str) -> String {
    let cleaned = raw.replace("Firebase: Error", "");
    let cleaned = cleaned.trim();
    // Identity Toolkit appends detail after " : ", e.g. "INVALID_PHONE_NUMBER : TOO_SHORT".
    let code = cleaned.split(" : ").next().unwrap_or(cleaned).trim();

    let mapped = match code {
        "INVALID_CODE" | "INVALID_VERIFICATION_CODE" => {
            "The SMS verification code is invalid. Please check the code and try again."
        }
        "SESSION_EXPIRED" | "CODE_EXPIRED" => {
            "The SMS code has expired. Please request a new code."
        }
        "INVALID_SESSION_INFO" | "MISSING_SESSION_INFO" => {
            "This verification attempt is no longer valid. Please request a new code."
        }
        "INVALID_PHONE_NUMBER" | "MISSING_PHONE_NUMBER" => "Please enter a valid mobile number.",
        "TOO_MANY_ATTEMPTS_TRY_LATER" => {
            "Too many attempts. Please wait a while and try again. (TOO_MANY_ATTEMPTS_TRY_LATER)"
        }
        "QUOTA_EXCEEDED" => "SMS quota for this project has been exceeded.",
        "CAPTCHA_CHECK_FAILED" | "MISSING_RECAPTCHA_TOKEN" | "INVALID_RECAPTCHA_TOKEN" => {
            "reCAPTCHA verification failed. Please try again."
        }
        "USER_DISABLED" => "This account has been disabled.",
        "TOKEN_EXPIRED" | "INVALID_ID_TOKEN" | "CREDENTIAL_TOO_OLD_LOGIN_AGAIN" => {
            "Your sign-in has expired. Please sign in again."
        }
        _ => return cleaned.to_string(),
    };
    mapped.to_string()
}

// ─── Identity Toolkit REST client ──────────────────────────────

/// Firebase Identity Toolkit client.
pub struct IdentityToolkit {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    site_key: OnceCell<String>,
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Deserialize)]
struct ErrorBody {
    message: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SendCodeRequest<'a> {
    phone_number: &'a str,
    recaptcha_token: &'a str,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SendCodeResponse {
    session_info: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SignInRequest<'a> {
    session_info: &'a str,
    code: &'a str,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SignInResponse {
    id_token: String,
    refresh_token: String,
    local_id: String,
    #[serde(default)]
    phone_number: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct LookupRequest<'a> {
    id_token: &'a str,
}

#[derive(Deserialize)]
struct LookupResponse {
    #[serde(default)]
    users: Vec<LookupUser>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct LookupUser {
    #[serde(default)]
    display_name: Option<String>,
    #[serde(default)]
    phone_number: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct UpdateRequest<'a> {
    id_token: &'a str,
    display_name: &'a str,
    return_secure_token: bool,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpdateResponse {
    #[serde(default)]
    display_name: Option<String>,
    #[serde(default)]
    id_token: Option<String>,
    #[serde(default)]
    refresh_token: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RecaptchaParams {
    recaptcha_site_key: String,
}

impl IdentityToolkit {
    /// Create a client for the project identified by `api_key`.
    ///
    /// Honors FIREBASE_AUTH_EMULATOR_HOST for local development.
    pub fn new(api_key: String) -> Self {
        let base_url = match std::env::var("FIREBASE_AUTH_EMULATOR_HOST") {
            Ok(host) => {
                tracing::info!(host = %host, "Using Firebase Auth emulator");
                format!("http://{}/identitytoolkit.googleapis.com/v1", host)
            }
            Err(_) => DEFAULT_BASE_URL.to_string(),
        };
        Self::with_base_url(api_key, base_url)
    }

    pub fn with_base_url(api_key: String, base_url: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url,
            api_key,
            site_key: OnceCell::new(),
        }
    }

    async fn post_json<B: Serialize, T: DeserializeOwned>(
        &self,
        method: &str,
        body: &B,
    ) -> Result<T, String> {
        let url = format!("{}/{}", self.base_url, method);
        let response = self
            .http
            .post(&url)
            .query(&[("key", self.api_key.as_str())])
            .json(body)
            .send()
            .await
            .map_err(|e| e.to_string())?;

        Self::check_response_json(response).await
    }

    /// Check response status and parse JSON body, surfacing the backend's message.
    async fn check_response_json<T: DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, String> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            if status.as_u16() == 429 {
                tracing::warn!("Identity Toolkit rate limit hit (429)");
            }
            return Err(serde_json::from_str::<ErrorEnvelope>(&body)
                .map(|e| e.error.message)
                .unwrap_or_else(|_| format!("HTTP {}: {}", status, body)));
        }

        response
            .json()
            .await
            .map_err(|e| format!("Failed to parse Identity Toolkit response: {}", e))
    }

    async fn fetch_site_key(&self) -> Result<String, AppError> {
        let key = self
            .site_key
            .get_or_try_init(|| async {
                let response = self
                    .http
                    .get(format!("{}/recaptchaParams", self.base_url))
                    .query(&[("key", self.api_key.as_str())])
                    .send()
                    .await
                    .map_err(|e| AppError::IdentityApi(e.to_string()))?;
                let params: RecaptchaParams = Self::check_response_json(response)
                    .await
                    .map_err(AppError::IdentityApi)?;
                tracing::info!("reCAPTCHA site key loaded");
                Ok::<_, AppError>(params.recaptcha_site_key)
            })
            .await?;
        Ok(key.clone())
    }

    async fn send_code(
        &self,
        phone_number: &str,
        proof: &BotCheckProof,
    ) -> Result<ChallengeHandle, AppError> {
        let response: SendCodeResponse = self
            .post_json(
                "accounts:sendVerificationCode",
                &SendCodeRequest {
                    phone_number,
                    recaptcha_token: &proof.token,
                },
            )
            .await
            .map_err(|e| AppError::Challenge(friendly_message(&e)))?;

        tracing::info!(generation = proof.generation, "Verification code sent");
        Ok(ChallengeHandle {
            session_info: response.session_info,
            phone_number: phone_number.to_string(),
        })
    }

    async fn sign_in(&self, challenge: &ChallengeHandle, code: &str) -> Result<AuthUser, AppError> {
        let signed_in: SignInResponse = self
            .post_json(
                "accounts:signInWithPhoneNumber",
                &SignInRequest {
                    session_info: &challenge.session_info,
                    code: code.trim(),
                },
            )
            .await
            .map_err(|e| AppError::Confirmation(friendly_message(&e)))?;

        // The sign-in response has no profile fields; look them up.
        let lookup: LookupResponse = self
            .post_json(
                "accounts:lookup",
                &LookupRequest {
                    id_token: &signed_in.id_token,
                },
            )
            .await
            .map_err(|e| AppError::IdentityApi(friendly_message(&e)))?;
        let profile = lookup.users.into_iter().next();

        tracing::info!(uid = %signed_in.local_id, "Phone sign-in confirmed");
        Ok(AuthUser {
            uid: signed_in.local_id,
            display_name: profile
                .as_ref()
                .and_then(|p| p.display_name.clone())
                .filter(|n| !n.is_empty()),
            phone_number: signed_in
                .phone_number
                .or_else(|| profile.and_then(|p| p.phone_number))
                .or_else(|| Some(challenge.phone_number.clone())),
            id_token: signed_in.id_token,
            refresh_token: signed_in.refresh_token,
        })
    }

    async fn update_name(&self, user: &AuthUser, display_name: &str) -> Result<AuthUser, AppError> {
        let response: UpdateResponse = self
            .post_json(
                "accounts:update",
                &UpdateRequest {
                    id_token: &user.id_token,
                    display_name,
                    return_secure_token: true,
                },
            )
            .await
            .map_err(|e| AppError::Persistence(friendly_message(&e)))?;

        Ok(AuthUser {
            uid: user.uid.clone(),
            display_name: response
                .display_name
                .or_else(|| Some(display_name.to_string())),
            phone_number: user.phone_number.clone(),
            id_token: response.id_token.unwrap_or_else(|| user.id_token.clone()),
            refresh_token: response
                .refresh_token
                .unwrap_or_else(|| user.refresh_token.clone()),
        })
    }
}

impl IdentityApi for IdentityToolkit {
    fn recaptcha_site_key(&self) -> BoxFuture<'_, Result<String, AppError>> {
        self.fetch_site_key().boxed()
    }

    fn send_verification_code<'a>(
        &'a self,
        phone_number: &'a str,
        proof: &'a BotCheckProof,
    ) -> BoxFuture<'a, Result<ChallengeHandle, AppError>> {
        self.send_code(phone_number, proof).boxed()
    }

    fn confirm_code<'a>(
        &'a self,
        challenge: &'a ChallengeHandle,
        code: &'a str,
    ) -> BoxFuture<'a, Result<AuthUser, AppError>> {
        self.sign_in(challenge, code).boxed()
    }

    fn update_display_name<'a>(
        &'a self,
        user: &'a AuthUser,
        display_name: &'a str,
    ) -> BoxFuture<'a, Result<AuthUser, AppError>> {
        self.update_name(user, display_name).boxed()
    }
}

// ─── Mock backend ──────────────────────────────────────────────

/// Identity calls that can be made to fail once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IdentityOp {
    SendCode,
    Confirm,
    UpdateName,
}

/// In-memory identity backend for tests and offline development.
///
/// Every number receives the same accepted code. A number signs in as the
/// same uid every time, and display names persist across sign-ins.
pub struct MockIdentity {
    accepted_code: String,
    display_names: DashMap<String, String>,
    failures: DashMap<IdentityOp, String>,
    sent_to: Mutex<Vec<String>>,
    challenges: AtomicUsize,
}

impl MockIdentity {
    pub fn new(accepted_code: impl Into<String>) -> Self {
        Self {
            accepted_code: accepted_code.into(),
            display_names: DashMap::new(),
            failures: DashMap::new(),
            sent_to: Mutex::new(Vec::new()),
            challenges: AtomicUsize::new(0),
        }
    }

    /// uid assigned to an E.164 number.
    pub fn uid_for(phone_number: &str) -> String {
        format!("uid-{}", phone_number.trim_start_matches('+'))
    }

    /// Pre-register a returning user with a display name.
    pub fn with_display_name(self, phone_number: &str, display_name: &str) -> Self {
        self.display_names
            .insert(Self::uid_for(phone_number), display_name.to_string());
        self
    }

    /// Make the next `op` fail with the given backend message.
    pub fn fail_next(&self, op: IdentityOp, message: impl Into<String>) {
        self.failures.insert(op, message.into());
    }

    /// Numbers that a code was sent to, in order.
    pub fn sent_to(&self) -> Vec<String> {
        self.sent_to
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn take_failure(&self, op: IdentityOp) -> Option<String> {
        self.failures.remove(&op).map(|(_, msg)| friendly_message(&msg))
    }
}

impl IdentityApi for MockIdentity {
    fn recaptcha_site_key(&self) -> BoxFuture<'_, Result<String, AppError>> {
        async { Ok("mock-site-key".to_string()) }.boxed()
    }

    fn send_verification_code<'a>(
        &'a self,
        phone_number: &'a str,
        _proof: &'a BotCheckProof,
    ) -> BoxFuture<'a, Result<ChallengeHandle, AppError>> {
        async move {
            if let Some(msg) = self.take_failure(IdentityOp::SendCode) {
                return Err(AppError::Challenge(msg));
            }
            self.sent_to
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(phone_number.to_string());
            let n = self.challenges.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(ChallengeHandle {
                session_info: format!("mock-session-{}", n),
                phone_number: phone_number.to_string(),
            })
        }
        .boxed()
    }

    fn confirm_code<'a>(
        &'a self,
        challenge: &'a ChallengeHandle,
        code: &'a str,
    ) -> BoxFuture<'a, Result<AuthUser, AppError>> {
        async move {
            if let Some(msg) = self.take_failure(IdentityOp::Confirm) {
                return Err(AppError::Confirmation(msg));
            }
            if code.trim() != self.accepted_code {
                return Err(AppError::Confirmation(friendly_message("INVALID_CODE")));
            }
            let uid = Self::uid_for(&challenge.phone_number);
            Ok(AuthUser {
                display_name: self.display_names.get(&uid).map(|n| n.clone()),
                phone_number: Some(challenge.phone_number.clone()),
                id_token: format!("mock-id-token-{}", uid),
                refresh_token: format!("mock-refresh-token-{}", uid),
                uid,
            })
        }
        .boxed()
    }

    fn update_display_name<'a>(
        &'a self,
        user: &'a AuthUser,
        display_name: &'a str,
    ) -> BoxFuture<'a, Result<AuthUser, AppError>> {
        async move {
            if let Some(msg) = self.take_failure(IdentityOp::UpdateName) {
                return Err(AppError::Persistence(msg));
            }
            self.display_names
                .insert(user.uid.clone(), display_name.to_string());
            let mut updated = user.clone();
            updated.display_name = Some(display_name.to_string());
            Ok(updated)
        }
        .boxed()
    }
}
