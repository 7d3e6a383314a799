// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Per-browser client sessions.
//!
//! A [`ClientApp`] owns the component tree for one browser: auth state, the
//! identity context, the verification flow, the profile form and the history
//! panel. Components are reconciled against the session whenever it changes,
//! and every change bumps a revision counter that drives the event stream.

use crate::config::Config;
use crate::db::DocumentStore;
use crate::error::AppError;
use crate::models::Session;
use crate::services::coupon_history::{CouponHistoryPanel, PanelState};
use crate::services::gate::{render_gate, GateView, HomeView};
use crate::services::identity::IdentityApi;
use crate::services::phone_auth::PhoneVerificationFlow;
use crate::services::profile_form::{save_profile, ConfirmationPrompt, ProfileForm};
use crate::services::profile_store::UserProfileStore;
use crate::services::session::{AuthHandle, IdentityContext};
use chrono::FixedOffset;
use dashmap::DashMap;
use std::sync::{Arc, OnceLock, PoisonError, Weak};
use std::time::{Duration, Instant};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;

/// How long an action waits for the identity context to catch up.
const SYNC_TIMEOUT: Duration = Duration::from_secs(2);

/// Registry size when none is configured.
const DEFAULT_MAX_CLIENTS: usize = 10_000;

/// Settings every client shares.
#[derive(Debug, Clone)]
pub struct ClientSettings {
    pub country_code: String,
    pub display_offset: FixedOffset,
    pub copied_indicator: Duration,
}

impl ClientSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            country_code: config.country_code.clone(),
            display_offset: config.display_offset(),
            copied_indicator: config.copied_indicator,
        }
    }
}

/// Component state guarded by one lock. Never held across a backend call.
struct UiState {
    verification: Option<PhoneVerificationFlow>,
    profile_form: ProfileForm,
    form_uid: Option<String>,
}

pub struct ClientApp {
    id: String,
    settings: ClientSettings,
    auth: AuthHandle,
    identity: IdentityContext,
    profile_store: UserProfileStore,
    ui: Mutex<UiState>,
    /// Held while switching subscriptions, so switches never interleave.
    history: Mutex<CouponHistoryPanel>,
    revision: watch::Sender<u64>,
    last_seen: std::sync::Mutex<Instant>,
    watcher: OnceLock<JoinHandle<()>>,
}

impl ClientApp {
    pub fn new(
        id: String,
        api: Arc<dyn IdentityApi>,
        db: Arc<dyn DocumentStore>,
        settings: ClientSettings,
    ) -> Arc<Self> {
        let auth = AuthHandle::new(api);
        let identity = IdentityContext::mount(&auth);
        let history = CouponHistoryPanel::new(
            db.clone(),
            settings.copied_indicator,
            settings.display_offset,
        );
        let history_rx = history.subscribe();
        let (revision, _) = watch::channel(0);

        let app = Arc::new(Self {
            id,
            settings,
            auth,
            identity,
            profile_store: UserProfileStore::new(db),
            ui: Mutex::new(UiState {
                verification: None,
                profile_form: ProfileForm::new(),
                form_uid: None,
            }),
            history: Mutex::new(history),
            revision,
            last_seen: std::sync::Mutex::new(Instant::now()),
            watcher: OnceLock::new(),
        });

        let task = tokio::spawn(watch_client(
            Arc::downgrade(&app),
            app.identity.subscribe(),
            history_rx,
        ));
        let _ = app.watcher.set(task);
        tracing::debug!(client = %app.id, "Client session created");
        app
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn touch(&self) {
        *self.last_seen.lock().unwrap_or_else(PoisonError::into_inner) = Instant::now();
    }

    pub fn idle_for(&self) -> Duration {
        self.last_seen
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .elapsed()
    }

    pub fn session(&self) -> Session {
        self.identity.session()
    }

    /// Revision counter; changes whenever the rendered view may have changed.
    pub fn subscribe_revisions(&self) -> watch::Receiver<u64> {
        self.revision.subscribe()
    }

    /// Whether an event stream is currently attached.
    pub fn has_listeners(&self) -> bool {
        self.revision.receiver_count() > 0
    }

    fn bump(&self) {
        self.revision.send_modify(|r| *r += 1);
    }

    /// Bring the components in line with the current session.
    async fn reconcile(&self) {
        let session = self.identity.session();
        if session.loading {
            return;
        }
        let user = session.user.as_ref();
        let uid = user.map(|u| u.uid.clone());

        let history_uid = {
            let mut ui = self.ui.lock().await;
            match user {
                Some(_) => {
                    if let Some(mut flow) = ui.verification.take() {
                        flow.unmount();
                    }
                }
                None => {
                    if ui.verification.is_none() {
                        ui.verification = Some(PhoneVerificationFlow::mount());
                    }
                }
            }
            if ui.form_uid != uid {
                ui.profile_form = ProfileForm::new();
                ui.form_uid = uid.clone();
            }
            user.filter(|u| !ui.profile_form.is_visible(Some(*u)))
                .map(|u| u.uid.clone())
        };

        self.history
            .lock()
            .await
            .set_uid(history_uid.as_deref())
            .await;
        self.bump();
    }

    /// Wait until the identity context reflects the auth state, then reconcile.
    async fn sync(&self) {
        let target = self.auth.current_user();
        let mut rx = self.identity.subscribe();
        let caught_up = matches!(
            tokio::time::timeout(SYNC_TIMEOUT, rx.wait_for(|s| !s.loading && s.user == target))
                .await,
            Ok(Ok(_))
        );
        if !caught_up {
            tracing::warn!(client = %self.id, "Identity context did not catch up");
        }
        self.reconcile().await;
    }

    /// Session after the first auth-state emission, or as-is on timeout.
    async fn settled_session(&self) -> Session {
        let mut rx = self.identity.subscribe();
        let settled = match tokio::time::timeout(SYNC_TIMEOUT, rx.wait_for(|s| !s.loading)).await {
            Ok(Ok(session)) => Some(session.clone()),
            _ => None,
        };
        settled.unwrap_or_else(|| self.identity.session())
    }

    /// Store phone input in the verification flow.
    pub async fn set_phone(&self, input: &str) -> Result<(), AppError> {
        let session = self.settled_session().await;
        let mut ui = self.ui.lock().await;
        let flow = verification_mut(&mut ui, &session)?;
        flow.set_phone(input);
        drop(ui);
        self.bump();
        Ok(())
    }

    /// Phase A submit: request an SMS challenge.
    pub async fn send_code(&self, phone: Option<&str>, bot_token: &str) -> Result<(), AppError> {
        let session = self.settled_session().await;
        let request = {
            let mut ui = self.ui.lock().await;
            let flow = verification_mut(&mut ui, &session)?;
            if let Some(phone) = phone {
                flow.set_phone(phone);
            }
            let request = flow.begin_send(bot_token, &self.settings.country_code);
            drop(ui);
            self.bump();
            request?
        };

        tracing::info!(client = %self.id, attempt = request.attempt, "Requesting verification code");
        let result = self
            .auth
            .request_challenge(&request.phone_number, &request.proof)
            .await;

        let outcome = {
            let mut ui = self.ui.lock().await;
            match (ui.verification.as_mut(), result) {
                (Some(flow), Ok(challenge)) => {
                    flow.finish_send(request.attempt, Ok(challenge));
                    Ok(())
                }
                (Some(flow), Err(e)) => {
                    flow.finish_send(request.attempt, Err(&e));
                    Err(e)
                }
                (None, result) => result.map(|_| ()),
            }
        };
        self.bump();
        outcome
    }

    /// Phase B submit: confirm the SMS code.
    pub async fn verify_code(&self, code: &str) -> Result<(), AppError> {
        let session = self.settled_session().await;
        let request = {
            let mut ui = self.ui.lock().await;
            let flow = verification_mut(&mut ui, &session)?;
            flow.set_code(code);
            let request = flow.begin_verify();
            drop(ui);
            self.bump();
            request?
        };

        let result = self
            .auth
            .confirm_challenge(&request.challenge, &request.code)
            .await;

        let outcome = {
            let mut ui = self.ui.lock().await;
            let outcome = result.map(|_| ());
            if let Some(flow) = ui.verification.as_mut() {
                flow.finish_verify(request.attempt, outcome.as_ref().map(|_| ()));
            }
            outcome
        };
        self.sync().await;
        outcome
    }

    pub async fn change_number(&self) -> Result<(), AppError> {
        let session = self.settled_session().await;
        let mut ui = self.ui.lock().await;
        verification_mut(&mut ui, &session)?.change_number()?;
        drop(ui);
        self.bump();
        Ok(())
    }

    /// Validate a Hive ID and return the confirmation prompt.
    pub async fn submit_profile(&self, name: &str) -> Result<ConfirmationPrompt, AppError> {
        let user = self.auth.current_user().ok_or(AppError::Unauthorized)?;
        let mut ui = self.ui.lock().await;
        if !ui.profile_form.is_visible(Some(&user)) {
            return Err(AppError::Busy("Your Hive ID is already set.".to_string()));
        }
        let result = ui.profile_form.submit(name);
        drop(ui);
        self.bump();
        result
    }

    /// Answer the confirmation prompt. Declining just drops it.
    pub async fn confirm_profile(&self, name: &str, confirmed: bool) -> Result<(), AppError> {
        let user = self.auth.current_user().ok_or(AppError::Unauthorized)?;

        let name = {
            let mut ui = self.ui.lock().await;
            if !confirmed {
                ui.profile_form.cancel();
                drop(ui);
                self.bump();
                return Ok(());
            }
            let name = ui.profile_form.begin_save(name);
            drop(ui);
            self.bump();
            name?
        };

        let result = save_profile(&self.auth, &self.profile_store, &user, &name).await;

        let outcome = {
            let mut ui = self.ui.lock().await;
            let current = ui.form_uid.as_deref() == Some(user.uid.as_str());
            match result {
                Ok(updated) => {
                    if current {
                        ui.profile_form.finish_save(Ok(()));
                    }
                    drop(ui);
                    self.auth.replace_user(updated);
                    Ok(())
                }
                Err(e) => {
                    if current {
                        ui.profile_form.finish_save(Err(&e));
                    }
                    Err(e)
                }
            }
        };
        self.sync().await;
        outcome
    }

    /// Copy a coupon code; the row shows as copied for a moment.
    pub async fn copy_coupon(&self, id: &str) -> Result<String, AppError> {
        let code = self.history.lock().await.copy(id)?;
        self.bump();
        Ok(code)
    }

    pub async fn sign_out(&self) {
        self.auth.sign_out();
        self.sync().await;
    }

    /// Render the whole screen.
    pub async fn render(&self) -> GateView {
        let session = self.identity.session();
        let site_key = match session.user {
            None if !session.loading => self.auth.api().recaptcha_site_key().await.ok(),
            _ => None,
        };

        let mut ui = self.ui.lock().await;
        let history = self.history.lock().await;
        let UiState {
            verification,
            profile_form,
            ..
        } = &mut *ui;

        render_gate(
            &session,
            || {
                verification
                    .get_or_insert_with(PhoneVerificationFlow::mount)
                    .view(site_key.as_deref())
            },
            |user| {
                if profile_form.is_visible(Some(user)) {
                    HomeView::ProfileForm {
                        form: profile_form.view(),
                    }
                } else {
                    HomeView::History {
                        saved_notice: profile_form.saved_notice(),
                        panel: history.view(),
                    }
                }
            },
        )
    }

    /// Release subscriptions now rather than when the last handle drops.
    pub async fn shutdown(&self) {
        self.history.lock().await.close().await;
        if let Some(flow) = self.ui.lock().await.verification.as_mut() {
            flow.unmount();
        }
    }
}

impl Drop for ClientApp {
    fn drop(&mut self) {
        if let Some(task) = self.watcher.get() {
            task.abort();
        }
        tracing::debug!(client = %self.id, "Client session dropped");
    }
}

/// The verification flow, mounted on demand while nobody is signed in.
fn verification_mut<'a>(
    ui: &'a mut UiState,
    session: &Session,
) -> Result<&'a mut PhoneVerificationFlow, AppError> {
    if session.loading {
        return Err(AppError::Busy("Still loading. Please retry.".to_string()));
    }
    if session.user.is_some() {
        return Err(AppError::Busy("Already signed in.".to_string()));
    }
    Ok(ui
        .verification
        .get_or_insert_with(PhoneVerificationFlow::mount))
}

/// React to session and history changes for as long as the client lives.
async fn watch_client(
    app: Weak<ClientApp>,
    mut session: watch::Receiver<Session>,
    mut history: watch::Receiver<PanelState>,
) {
    session.mark_changed();
    loop {
        let session_changed = tokio::select! {
            changed = session.changed() => {
                if changed.is_err() {
                    break;
                }
                true
            }
            changed = history.changed() => {
                if changed.is_err() {
                    break;
                }
                false
            }
        };

        let Some(app) = app.upgrade() else {
            break;
        };
        if session_changed {
            session.borrow_and_update();
            app.reconcile().await;
        } else {
            history.borrow_and_update();
            app.bump();
        }
    }
}

/// Live client sessions keyed by client id.
pub struct ClientRegistry {
    clients: DashMap<String, Arc<ClientApp>>,
    max_clients: usize,
}

impl Default for ClientRegistry {
    fn default() -> Self {
        Self::with_max_clients(DEFAULT_MAX_CLIENTS)
    }
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_clients(max_clients: usize) -> Self {
        Self {
            clients: DashMap::new(),
            max_clients: max_clients.max(1),
        }
    }

    pub fn get(&self, id: &str) -> Option<Arc<ClientApp>> {
        self.clients.get(id).map(|c| c.clone())
    }

    /// Existing session for `id`, or a new one from `create`.
    ///
    /// At capacity, the longest-idle session is dropped first, preferring
    /// one without an attached event stream.
    pub fn get_or_create(&self, id: &str, create: impl FnOnce() -> Arc<ClientApp>) -> Arc<ClientApp> {
        if let Some(existing) = self.get(id) {
            return existing;
        }
        while self.clients.len() >= self.max_clients {
            if !self.evict_oldest() {
                break;
            }
        }
        self.clients
            .entry(id.to_string())
            .or_insert_with(create)
            .clone()
    }

    fn evict_oldest(&self) -> bool {
        let oldest = self
            .clients
            .iter()
            .max_by_key(|entry| (!entry.value().has_listeners(), entry.value().idle_for()))
            .map(|entry| entry.key().clone());
        let Some(client) = oldest.and_then(|id| self.remove(&id)) else {
            return false;
        };
        tracing::info!(client = %client.id(), limit = self.max_clients, "Client session limit reached, dropping oldest");
        tokio::spawn(async move {
            client.shutdown().await;
        });
        true
    }

    pub fn remove(&self, id: &str) -> Option<Arc<ClientApp>> {
        self.clients.remove(id).map(|(_, c)| c)
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    /// Drop sessions idle for longer than `timeout`, closing their subscriptions.
    /// Sessions with an open event stream are never idle.
    pub async fn evict_idle(&self, timeout: Duration) -> usize {
        let idle: Vec<String> = self
            .clients
            .iter()
            .filter(|entry| !entry.value().has_listeners() && entry.value().idle_for() >= timeout)
            .map(|entry| entry.key().clone())
            .collect();

        let mut evicted = 0;
        for id in idle {
            if let Some(client) = self.remove(&id) {
                client.shutdown().await;
                evicted += 1;
            }
        }
        if evicted > 0 {
            tracing::info!(count = evicted, remaining = self.len(), "Evicted idle client sessions");
        }
        evicted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryDb;
    use crate::models::{CouponDoc, CreatedValue};
    use crate::services::identity::MockIdentity;
    use crate::services::phone_auth::Phase;

    fn client(identity: MockIdentity, db: &MemoryDb) -> Arc<ClientApp> {
        ClientApp::new(
            "c1".to_string(),
            Arc::new(identity),
            Arc::new(db.clone()),
            ClientSettings::from_config(&Config::test_default()),
        )
    }

    async fn sign_in(app: &ClientApp, phone: &str) {
        app.send_code(Some(phone), "bot-token").await.unwrap();
        app.verify_code("123456").await.unwrap();
    }

    async fn history_loaded(app: &ClientApp) {
        let mut rx = app.history.lock().await.subscribe();
        rx.wait_for(|s| !s.loading).await.unwrap();
    }

    #[tokio::test]
    async fn test_new_client_renders_verification() {
        let db = MemoryDb::new();
        let app = client(MockIdentity::new("123456"), &db);
        app.sync().await;

        match app.render().await {
            GateView::Unauthenticated { verification } => {
                assert_eq!(verification.phase, Phase::EnterPhone);
                let widget = verification.bot_check.unwrap();
                assert_eq!(widget.site_key.as_deref(), Some("mock-site-key"));
            }
            other => panic!("unexpected view {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_short_number_sends_nothing() {
        let db = MemoryDb::new();
        let identity = Arc::new(MockIdentity::new("123456"));
        let app = ClientApp::new(
            "c1".to_string(),
            identity.clone(),
            Arc::new(db.clone()),
            ClientSettings::from_config(&Config::test_default()),
        );
        app.sync().await;

        let err = app.send_code(Some("010123"), "bot-token").await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
        assert!(identity.sent_to().is_empty());
    }

    #[tokio::test]
    async fn test_new_user_sees_profile_form_then_history() {
        let db = MemoryDb::new();
        let app = client(MockIdentity::new("123456"), &db);
        sign_in(&app, "01099998888").await;

        let view = app.render().await;
        assert!(matches!(
            view,
            GateView::Authenticated {
                content: HomeView::ProfileForm { .. },
                ..
            }
        ));
        assert_eq!(db.open_watchers("uid-821099998888"), 0);

        app.submit_profile("Alice").await.unwrap();
        app.confirm_profile("Alice", true).await.unwrap();
        history_loaded(&app).await;

        match app.render().await {
            GateView::Authenticated {
                user_label,
                content: HomeView::History { saved_notice, .. },
                ..
            } => {
                assert_eq!(user_label, "Alice");
                assert!(saved_notice.is_some());
            }
            other => panic!("unexpected view {:?}", other),
        }
        assert_eq!(db.open_watchers("uid-821099998888"), 1);
    }

    #[tokio::test]
    async fn test_returning_user_goes_straight_to_history() {
        let db = MemoryDb::new();
        db.put_coupon(
            "uid-821012345678",
            "c1",
            CouponDoc {
                code: Some("WELCOME".to_string()),
                created: Some(CreatedValue::Millis(1.0)),
                ..Default::default()
            },
        );
        let identity = MockIdentity::new("123456").with_display_name("+821012345678", "Bee");
        let app = client(identity, &db);
        sign_in(&app, "010 1234 5678").await;
        history_loaded(&app).await;

        match app.render().await {
            GateView::Authenticated {
                content: HomeView::History { panel, saved_notice },
                ..
            } => {
                assert!(saved_notice.is_none());
                assert_eq!(panel.rows[0].code, "WELCOME");
            }
            other => panic!("unexpected view {:?}", other),
        }
        assert_eq!(app.copy_coupon("c1").await.unwrap(), "WELCOME");
    }

    #[tokio::test]
    async fn test_sign_out_closes_history_and_remounts_flow() {
        let db = MemoryDb::new();
        let identity = MockIdentity::new("123456").with_display_name("+821012345678", "Bee");
        let app = client(identity, &db);
        sign_in(&app, "01012345678").await;
        history_loaded(&app).await;
        assert_eq!(db.open_watchers("uid-821012345678"), 1);

        app.sign_out().await;
        assert_eq!(db.open_watchers("uid-821012345678"), 0);
        match app.render().await {
            GateView::Unauthenticated { verification } => {
                assert_eq!(verification.phase, Phase::EnterPhone);
                assert_eq!(verification.phone, "");
            }
            other => panic!("unexpected view {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_registry_evicts_idle_clients() {
        let db = MemoryDb::new();
        let registry = ClientRegistry::new();
        let app = registry.get_or_create("c1", || client(MockIdentity::new("1"), &db));
        let again = registry.get_or_create("c1", || panic!("should reuse"));
        assert!(Arc::ptr_eq(&app, &again));

        assert_eq!(registry.evict_idle(Duration::from_secs(60)).await, 0);
        assert_eq!(registry.evict_idle(Duration::ZERO).await, 1);
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_actions_run_on_spawned_tasks() {
        let db = MemoryDb::new();
        let identity = MockIdentity::new("123456").with_display_name("+821012345678", "Bee");
        let app = client(identity, &db);

        let task = {
            let app = app.clone();
            tokio::spawn(async move {
                app.set_phone("01012345678").await?;
                app.send_code(None, "bot-token").await?;
                app.verify_code("123456").await
            })
        };
        task.await.unwrap().unwrap();
        assert_eq!(app.session().user.unwrap().uid, "uid-821012345678");

        let task = {
            let app = app.clone();
            tokio::spawn(async move { app.sign_out().await })
        };
        task.await.unwrap();
        assert!(app.session().user.is_none());
    }

    #[tokio::test]
    async fn test_open_event_stream_keeps_client_alive() {
        let db = MemoryDb::new();
        db.put_coupon(
            "uid-821012345678",
            "c1",
            CouponDoc {
                code: Some("WELCOME".to_string()),
                created: Some(CreatedValue::Millis(1.0)),
                ..Default::default()
            },
        );
        let registry = ClientRegistry::new();
        let identity = MockIdentity::new("123456").with_display_name("+821012345678", "Bee");
        let app = registry.get_or_create("c1", || client(identity, &db));
        sign_in(&app, "01012345678").await;
        history_loaded(&app).await;

        let stream = app.subscribe_revisions();
        assert!(app.has_listeners());
        assert_eq!(registry.evict_idle(Duration::ZERO).await, 0);
        assert_eq!(db.open_watchers("uid-821012345678"), 1);
        match app.render().await {
            GateView::Authenticated {
                content: HomeView::History { panel, .. },
                ..
            } => assert_eq!(panel.rows[0].code, "WELCOME"),
            other => panic!("unexpected view {:?}", other),
        }

        drop(stream);
        assert_eq!(registry.evict_idle(Duration::ZERO).await, 1);
        assert_eq!(db.open_watchers("uid-821012345678"), 0);
    }

    #[tokio::test]
    async fn test_registry_drops_oldest_at_capacity() {
        let db = MemoryDb::new();
        let registry = ClientRegistry::with_max_clients(2);
        registry.get_or_create("c1", || client(MockIdentity::new("1"), &db));
        tokio::time::sleep(Duration::from_millis(5)).await;
        registry.get_or_create("c2", || client(MockIdentity::new("1"), &db));
        tokio::time::sleep(Duration::from_millis(5)).await;

        // Reuse never evicts.
        registry.get_or_create("c2", || panic!("should reuse"));
        assert_eq!(registry.len(), 2);

        registry.get_or_create("c3", || client(MockIdentity::new("1"), &db));
        assert_eq!(registry.len(), 2);
        assert!(registry.get("c1").is_none());
        assert!(registry.get("c2").is_some());
        assert!(registry.get("c3").is_some());
    }

    #[tokio::test]
    async fn test_registry_capacity_spares_streaming_clients() {
        let db = MemoryDb::new();
        let registry = ClientRegistry::with_max_clients(2);
        let watched = registry.get_or_create("c1", || client(MockIdentity::new("1"), &db));
        let _stream = watched.subscribe_revisions();
        tokio::time::sleep(Duration::from_millis(5)).await;
        registry.get_or_create("c2", || client(MockIdentity::new("1"), &db));

        registry.get_or_create("c3", || client(MockIdentity::new("1"), &db));
        assert!(registry.get("c1").is_some());
        assert!(registry.get("c2").is_none());
        assert_eq!(registry.len(), 2);
    }
}
