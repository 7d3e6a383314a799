// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! One-time display name ("Hive ID") form.

use crate::error::AppError;
use crate::models::{AuthUser, ProfileFields};
use crate::services::profile_store::UserProfileStore;
use crate::services::session::AuthHandle;
use serde::Serialize;
#[cfg(feature = "binding-generation")]
use ts_rs::TS;

/// Longest accepted Hive ID, in characters.
pub const MAX_NAME_CHARS: usize = 50;

/// Shown once the profile has been written.
pub const SAVED_NOTICE: &str = "Your Hive ID has been saved.";

/// A validated name waiting for the user to confirm it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct ConfirmationPrompt {
    pub name: String,
    pub prompt: String,
}

#[derive(Debug, Default)]
pub struct ProfileForm {
    name: String,
    pending: Option<String>,
    saving: bool,
    saved: bool,
    error: Option<String>,
}

impl ProfileForm {
    pub fn new() -> Self {
        Self::default()
    }

    /// Visible for a signed-in user without a display name, until saved.
    pub fn is_visible(&self, user: Option<&AuthUser>) -> bool {
        match user {
            Some(user) => user.display_name.is_none() && !self.saved,
            None => false,
        }
    }

    pub fn is_saved(&self) -> bool {
        self.saved
    }

    /// Validate the input and ask for confirmation.
    pub fn submit(&mut self, input: &str) -> Result<ConfirmationPrompt, AppError> {
        if self.saving {
            return Err(AppError::Busy("Saving is already in progress.".to_string()));
        }
        self.name = input.to_string();
        self.pending = None;

        let name = input.trim();
        let err = if name.is_empty() {
            Some("Please enter your name.".to_string())
        } else if name.chars().count() > MAX_NAME_CHARS {
            Some(format!(
                "Your Hive ID can be at most {} characters.",
                MAX_NAME_CHARS
            ))
        } else {
            None
        };
        if let Some(msg) = err {
            self.error = Some(msg.clone());
            return Err(AppError::Validation(msg));
        }

        self.error = None;
        self.pending = Some(name.to_string());
        Ok(ConfirmationPrompt {
            name: name.to_string(),
            prompt: format!(
                "Use \"{}\" as your Hive ID? It cannot be changed later.",
                name
            ),
        })
    }

    pub fn cancel(&mut self) {
        self.pending = None;
    }

    /// Mark the confirmed name as being saved. It must match the prompt.
    pub fn begin_save(&mut self, name: &str) -> Result<String, AppError> {
        if self.saving {
            return Err(AppError::Busy("Saving is already in progress.".to_string()));
        }
        match self.pending.as_deref() {
            Some(pending) if pending == name.trim() => {
                let name = pending.to_string();
                self.saving = true;
                self.error = None;
                Ok(name)
            }
            _ => Err(AppError::BadRequest(
                "Name does not match the pending confirmation".to_string(),
            )),
        }
    }

    pub fn finish_save(&mut self, result: Result<(), &AppError>) {
        self.saving = false;
        match result {
            Ok(()) => {
                self.pending = None;
                self.saved = true;
                self.error = None;
            }
            Err(e) => {
                tracing::warn!(error = %e, "Profile save failed");
                self.error = Some(e.user_message());
            }
        }
    }

    /// Notice shown above the history once the name is stored.
    pub fn saved_notice(&self) -> Option<String> {
        self.saved.then(|| SAVED_NOTICE.to_string())
    }

    pub fn view(&self) -> ProfileFormView {
        ProfileFormView {
            name: self.name.clone(),
            confirmation: self.pending.as_ref().map(|name| ConfirmationPrompt {
                name: name.clone(),
                prompt: format!(
                    "Use \"{}\" as your Hive ID? It cannot be changed later.",
                    name
                ),
            }),
            saving: self.saving,
            error: self.error.clone(),
            max_length: MAX_NAME_CHARS,
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct ProfileFormView {
    pub name: String,
    pub confirmation: Option<ConfirmationPrompt>,
    pub saving: bool,
    pub error: Option<String>,
    #[cfg_attr(feature = "binding-generation", ts(type = "number"))]
    pub max_length: usize,
}

/// Set the display name on the auth record, then upsert the profile.
///
/// Returns the refreshed user; publishing it is left to the caller so a
/// failure in either step leaves the form in place.
pub async fn save_profile(
    auth: &AuthHandle,
    store: &UserProfileStore,
    user: &AuthUser,
    name: &str,
) -> Result<AuthUser, AppError> {
    let updated = auth.update_display_name(user, name).await?;
    store
        .save_user(
            &user.uid,
            ProfileFields {
                display_name: Some(name.to_string()),
                phone_number: user.phone_number.clone(),
                ..Default::default()
            },
        )
        .await?;
    tracing::info!(uid = %user.uid, "Hive ID saved");
    Ok(updated)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::memory::MemoryOp;
    use crate::db::MemoryDb;
    use crate::services::bot_check::BotCheckProof;
    use crate::services::identity::{IdentityOp, MockIdentity};
    use std::sync::Arc;

    fn user() -> AuthUser {
        AuthUser {
            uid: "u1".to_string(),
            display_name: None,
            phone_number: Some("+821012345678".to_string()),
            id_token: String::new(),
            refresh_token: String::new(),
        }
    }

    async fn signed_in(identity: Arc<MockIdentity>) -> (AuthHandle, AuthUser) {
        let auth = AuthHandle::new(identity);
        let proof = BotCheckProof {
            token: "t".to_string(),
            generation: 1,
        };
        let challenge = auth
            .request_challenge("+821012345678", &proof)
            .await
            .unwrap();
        let user = auth.confirm_challenge(&challenge, "123456").await.unwrap();
        (auth, user)
    }

    #[test]
    fn test_visibility() {
        let form = ProfileForm::new();
        assert!(!form.is_visible(None));
        assert!(form.is_visible(Some(&user())));

        let named = AuthUser {
            display_name: Some("Alice".to_string()),
            ..user()
        };
        assert!(!form.is_visible(Some(&named)));
    }

    #[test]
    fn test_submit_validation() {
        let mut form = ProfileForm::new();
        assert!(matches!(form.submit("   "), Err(AppError::Validation(_))));
        assert_eq!(form.view().error.as_deref(), Some("Please enter your name."));

        let long = "x".repeat(MAX_NAME_CHARS + 1);
        assert!(matches!(form.submit(&long), Err(AppError::Validation(_))));

        let prompt = form.submit("  Alice ").unwrap();
        assert_eq!(prompt.name, "Alice");
        assert!(prompt.prompt.contains("cannot be changed"));
        assert!(form.view().error.is_none());
    }

    #[test]
    fn test_cancel_and_mismatched_confirm() {
        let mut form = ProfileForm::new();
        form.submit("Alice").unwrap();
        assert!(form.begin_save("Bob").is_err());
        form.cancel();
        assert!(form.view().confirmation.is_none());
        assert!(form.begin_save("Alice").is_err());
    }

    #[test]
    fn test_saved_form_stays_hidden() {
        let mut form = ProfileForm::new();
        form.submit("Alice").unwrap();
        let name = form.begin_save("Alice").unwrap();
        assert_eq!(name, "Alice");
        form.finish_save(Ok(()));

        assert!(!form.is_visible(Some(&user())));
        assert_eq!(form.saved_notice().as_deref(), Some(SAVED_NOTICE));
    }

    #[test]
    fn test_failed_save_allows_retry() {
        let mut form = ProfileForm::new();
        form.submit("Alice").unwrap();
        form.begin_save("Alice").unwrap();
        form.finish_save(Err(&AppError::Persistence("offline".to_string())));

        assert!(form.is_visible(Some(&user())));
        assert_eq!(form.view().error.as_deref(), Some("offline"));
        assert!(form.begin_save("Alice").is_ok());
    }

    #[tokio::test]
    async fn test_save_profile_writes_name_and_phone() {
        let (auth, user) = signed_in(Arc::new(MockIdentity::new("123456"))).await;
        let db = MemoryDb::new();
        let store = UserProfileStore::new(Arc::new(db.clone()));

        let updated = save_profile(&auth, &store, &user, "Alice").await.unwrap();
        assert_eq!(updated.display_name.as_deref(), Some("Alice"));

        let profile = store.get_user(&user.uid).await.unwrap().unwrap();
        assert_eq!(profile.display_name.as_deref(), Some("Alice"));
        assert_eq!(profile.phone_number.as_deref(), Some("+821012345678"));
        assert!(profile.created_at.is_some());
    }

    #[tokio::test]
    async fn test_save_profile_stops_when_auth_update_fails() {
        let identity = Arc::new(MockIdentity::new("123456"));
        let (auth, user) = signed_in(identity.clone()).await;
        identity.fail_next(IdentityOp::UpdateName, "CREDENTIAL_TOO_OLD_LOGIN_AGAIN");
        let db = MemoryDb::new();
        let store = UserProfileStore::new(Arc::new(db.clone()));

        assert!(save_profile(&auth, &store, &user, "Alice").await.is_err());
        assert_eq!(db.write_count(), 0);
    }

    #[tokio::test]
    async fn test_save_profile_store_failure() {
        let (auth, user) = signed_in(Arc::new(MockIdentity::new("123456"))).await;
        let db = MemoryDb::new();
        db.fail_next(MemoryOp::Write, "quota");
        let store = UserProfileStore::new(Arc::new(db.clone()));

        let err = save_profile(&auth, &store, &user, "Alice").await.unwrap_err();
        assert!(matches!(err, AppError::Persistence(_)));
        assert!(auth.current_user().unwrap().display_name.is_none());
    }
}
