// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    response::Response,
};
use hive_coupons::config::Config;
use hive_coupons::db::{FirestoreDb, MemoryDb};
use hive_coupons::routes::create_router;
use hive_coupons::services::MockIdentity;
use hive_coupons::AppState;
use serde_json::Value;
use std::sync::Arc;
use tower::ServiceExt;

/// Code the mock identity backend accepts.
#[allow(dead_code)]
pub const TEST_CODE: &str = "123456";

/// Check if emulator is available via environment variable.
#[allow(dead_code)]
pub fn emulator_available() -> bool {
    std::env::var("FIRESTORE_EMULATOR_HOST").is_ok()
}

/// Skip test with message if emulator not available.
#[macro_export]
macro_rules! require_emulator {
    () => {
        if !crate::common::emulator_available() {
            eprintln!("⚠️  Skipping: FIRESTORE_EMULATOR_HOST not set");
            return;
        }
    };
}

/// Create a test database connection.
#[allow(dead_code)]
pub async fn test_db() -> FirestoreDb {
    FirestoreDb::new("test-project")
        .await
        .expect("Failed to connect to Firestore emulator")
}

/// Offline backends used by a test app.
#[allow(dead_code)]
pub struct TestBackends {
    pub identity: Arc<MockIdentity>,
    pub db: MemoryDb,
    pub state: Arc<AppState>,
}

/// Create a test app with offline mock dependencies.
#[allow(dead_code)]
pub fn create_test_app() -> (axum::Router, TestBackends) {
    create_test_app_with_identity(MockIdentity::new(TEST_CODE))
}

/// Create a test app around a preconfigured identity backend.
#[allow(dead_code)]
pub fn create_test_app_with_identity(identity: MockIdentity) -> (axum::Router, TestBackends) {
    let config = Config::test_default();
    let identity = Arc::new(identity);
    let db = MemoryDb::new();

    let state = Arc::new(AppState::new(config, identity.clone(), Arc::new(db.clone())));
    let backends = TestBackends {
        identity,
        db,
        state: state.clone(),
    };
    (create_router(state), backends)
}

/// Value of the `hive_session` cookie set by a response, if any.
#[allow(dead_code)]
pub fn session_cookie(response: &Response) -> Option<String> {
    response
        .headers()
        .get_all(header::SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .find(|v| v.starts_with("hive_session="))
        .and_then(|v| v.split(';').next())
        .map(str::to_string)
}

/// Send a request, carrying `cookie` when given. Returns the response.
#[allow(dead_code)]
pub async fn send(
    app: &axum::Router,
    method: &str,
    uri: &str,
    cookie: Option<&str>,
    body: Option<Value>,
) -> Response {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(cookie) = cookie {
        builder = builder.header(header::COOKIE, cookie);
    }
    let body = match body {
        Some(json) => {
            builder = builder.header(header::CONTENT_TYPE, "application/json");
            Body::from(json.to_string())
        }
        None => Body::empty(),
    };

    app.clone()
        .oneshot(builder.body(body).unwrap())
        .await
        .unwrap()
}

/// Read a JSON body.
#[allow(dead_code)]
pub async fn json_body(response: Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

/// A browser with its own session cookie.
#[allow(dead_code)]
pub struct Browser {
    pub app: axum::Router,
    pub cookie: String,
}

#[allow(dead_code)]
impl Browser {
    /// Open the page to obtain a session cookie, then wait until the
    /// auth state has resolved past `loading`.
    pub async fn open(app: &axum::Router) -> Self {
        let response = send(app, "GET", "/api/view", None, None).await;
        assert_eq!(response.status(), StatusCode::OK);
        let cookie = session_cookie(&response).expect("first visit sets a session cookie");
        let browser = Self {
            app: app.clone(),
            cookie,
        };

        for _ in 0..100 {
            let (_, view) = browser.get("/api/view").await;
            if view["state"] != "loading" {
                return browser;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        panic!("auth state never resolved");
    }

    pub async fn get(&self, uri: &str) -> (StatusCode, Value) {
        let response = send(&self.app, "GET", uri, Some(&self.cookie), None).await;
        let status = response.status();
        (status, json_body(response).await)
    }

    pub async fn post(&self, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let response = send(&self.app, "POST", uri, Some(&self.cookie), body).await;
        let status = response.status();
        (status, json_body(response).await)
    }

    /// Request a code for `phone` and confirm it.
    pub async fn sign_in(&self, phone: &str) -> Value {
        let (status, _) = self
            .post(
                "/api/phone/send",
                Some(serde_json::json!({ "phone": phone, "recaptcha_token": "bot-token" })),
            )
            .await;
        assert_eq!(status, StatusCode::OK);

        let (status, view) = self
            .post(
                "/api/phone/verify",
                Some(serde_json::json!({ "code": TEST_CODE })),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        view
    }
}
