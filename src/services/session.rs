// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Auth-state stream and the identity context that consumes it.

use crate::error::AppError;
use crate::models::{AuthUser, Session};
use crate::services::bot_check::BotCheckProof;
use crate::services::identity::{ChallengeHandle, IdentityApi};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Owner of one client's auth state.
///
/// Emits the current user (or `None`) to every subscriber on subscribe and
/// on every sign-in, profile refresh, and sign-out.
pub struct AuthHandle {
    api: Arc<dyn IdentityApi>,
    state: watch::Sender<Option<AuthUser>>,
}

impl AuthHandle {
    pub fn new(api: Arc<dyn IdentityApi>) -> Self {
        let (state, _) = watch::channel(None);
        Self { api, state }
    }

    pub fn api(&self) -> &Arc<dyn IdentityApi> {
        &self.api
    }

    pub fn current_user(&self) -> Option<AuthUser> {
        self.state.borrow().clone()
    }

    /// Auth-state change stream. The current value is visible immediately.
    pub fn subscribe(&self) -> watch::Receiver<Option<AuthUser>> {
        self.state.subscribe()
    }

    /// Request an SMS challenge for an E.164 number.
    pub async fn request_challenge(
        &self,
        phone_number: &str,
        proof: &BotCheckProof,
    ) -> Result<ChallengeHandle, AppError> {
        self.api.send_verification_code(phone_number, proof).await
    }

    /// Confirm a challenge. On success the signed-in user is emitted.
    pub async fn confirm_challenge(
        &self,
        challenge: &ChallengeHandle,
        code: &str,
    ) -> Result<AuthUser, AppError> {
        let user = self.api.confirm_code(challenge, code).await?;
        tracing::info!(uid = %user.uid, "User signed in");
        self.state.send_replace(Some(user.clone()));
        Ok(user)
    }

    /// Update the display name remotely. Does not emit; see [`Self::replace_user`].
    pub async fn update_display_name(
        &self,
        user: &AuthUser,
        display_name: &str,
    ) -> Result<AuthUser, AppError> {
        self.api.update_display_name(user, display_name).await
    }

    /// Publish a refreshed user record, unless that user has signed out since.
    pub fn replace_user(&self, user: AuthUser) {
        self.state.send_if_modified(|current| match current {
            Some(existing) if existing.uid == user.uid => {
                *current = Some(user);
                true
            }
            _ => false,
        });
    }

    pub fn sign_out(&self) {
        let previous = self.state.send_replace(None);
        if let Some(user) = previous {
            tracing::info!(uid = %user.uid, "User signed out");
        }
    }
}

/// Session state derived from the auth stream.
///
/// Holds exactly one subscription for its lifetime; `loading` flips to false
/// on the first emission. Dropping the context closes the subscription.
pub struct IdentityContext {
    session: watch::Receiver<Session>,
    task: JoinHandle<()>,
}

impl IdentityContext {
    pub fn mount(auth: &AuthHandle) -> Self {
        let mut auth_rx = auth.subscribe();
        let (tx, session) = watch::channel(Session::pending());

        let task = tokio::spawn(async move {
            loop {
                let user = auth_rx.borrow_and_update().clone();
                tx.send_replace(Session::resolved(user));
                if auth_rx.changed().await.is_err() {
                    break;
                }
            }
        });

        Self { session, task }
    }

    /// Current session snapshot.
    pub fn session(&self) -> Session {
        self.session.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Session> {
        self.session.clone()
    }
}

impl Drop for IdentityContext {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::identity::MockIdentity;

    fn proof() -> BotCheckProof {
        BotCheckProof {
            token: "token".to_string(),
            generation: 1,
        }
    }

    async fn resolved(ctx: &IdentityContext) -> Session {
        let mut rx = ctx.subscribe();
        let session = rx.wait_for(|s| !s.loading).await.unwrap().clone();
        session
    }

    #[tokio::test]
    async fn test_loading_until_first_emission() {
        let auth = AuthHandle::new(Arc::new(MockIdentity::new("123456")));
        let ctx = IdentityContext::mount(&auth);

        let session = resolved(&ctx).await;
        assert!(!session.loading);
        assert!(session.user.is_none());
    }

    #[tokio::test]
    async fn test_sign_in_and_out_are_observed() {
        let auth = AuthHandle::new(Arc::new(MockIdentity::new("123456")));
        let ctx = IdentityContext::mount(&auth);
        let mut rx = ctx.subscribe();

        let challenge = auth
            .request_challenge("+821012345678", &proof())
            .await
            .unwrap();
        auth.confirm_challenge(&challenge, "123456").await.unwrap();

        let session = rx.wait_for(|s| s.user.is_some()).await.unwrap().clone();
        assert_eq!(session.user.unwrap().uid, "uid-821012345678");

        auth.sign_out();
        let session = rx.wait_for(|s| s.user.is_none()).await.unwrap().clone();
        assert!(!session.loading);
    }

    #[tokio::test]
    async fn test_replace_user_ignored_after_sign_out() {
        let auth = AuthHandle::new(Arc::new(MockIdentity::new("123456")));
        let challenge = auth
            .request_challenge("+821012345678", &proof())
            .await
            .unwrap();
        let mut user = auth.confirm_challenge(&challenge, "123456").await.unwrap();
        auth.sign_out();

        user.display_name = Some("Late".to_string());
        auth.replace_user(user);
        assert!(auth.current_user().is_none());
    }
}
