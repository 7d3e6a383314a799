// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Client session cookie middleware.
//!
//! Each browser is identified by a signed `hive_session` cookie whose subject
//! is a random client id. The middleware resolves (or creates) the matching
//! [`ClientApp`] and hands it to handlers as a request extension.

use crate::error::AppError;
use crate::services::client::{ClientApp, ClientSettings};
use crate::AppState;
use axum::{
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use ring::rand::{SecureRandom, SystemRandom};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

pub const SESSION_COOKIE: &str = "hive_session";

/// Cookie lifetime; the server-side session may be evicted sooner when idle.
const SESSION_TTL_SECS: usize = 30 * 24 * 60 * 60;

/// JWT claims structure.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    /// Subject (client id)
    pub sub: String,
    /// Expiration time (Unix timestamp)
    pub exp: usize,
    /// Issued at (Unix timestamp)
    pub iat: usize,
}

/// Generate a random 128-bit client id.
pub fn new_client_id() -> Result<String, AppError> {
    let mut bytes = [0u8; 16];
    SystemRandom::new()
        .fill(&mut bytes)
        .map_err(|_| AppError::Internal(anyhow::anyhow!("Random source unavailable")))?;
    Ok(hex::encode(bytes))
}

/// Create a signed session token for a client id.
pub fn create_session_token(client_id: &str, signing_key: &[u8]) -> anyhow::Result<String> {
    let now = SystemTime::now().duration_since(UNIX_EPOCH)?.as_secs() as usize;

    let claims = Claims {
        sub: client_id.to_string(),
        iat: now,
        exp: now + SESSION_TTL_SECS,
    };

    Ok(encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(signing_key),
    )?)
}

/// Client id carried by a valid token.
pub fn verify_session_token(token: &str, signing_key: &[u8]) -> Result<String, AppError> {
    let key = DecodingKey::from_secret(signing_key);
    let validation = Validation::new(Algorithm::HS256);
    let data = decode::<Claims>(token, &key, &validation).map_err(|_| AppError::InvalidToken)?;
    if data.claims.sub.is_empty() {
        return Err(AppError::InvalidToken);
    }
    Ok(data.claims.sub)
}

fn build_session_cookie(token: String, secure: bool) -> Cookie<'static> {
    Cookie::build((SESSION_COOKIE, token))
        .path("/")
        .max_age(time::Duration::seconds(SESSION_TTL_SECS as i64))
        .http_only(true)
        .secure(secure)
        .same_site(SameSite::Lax)
        .build()
}

/// Attach the caller's [`ClientApp`], issuing a new session cookie if the
/// request carried none or an invalid one.
pub async fn client_session(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let key = &state.config.session_signing_key;
    let existing = jar
        .get(SESSION_COOKIE)
        .and_then(|cookie| verify_session_token(cookie.value(), key).ok());

    let (client_id, issued) = match existing {
        Some(id) => (id, false),
        None => (new_client_id()?, true),
    };

    let client = state.clients.get_or_create(&client_id, || {
        ClientApp::new(
            client_id.clone(),
            state.identity.clone(),
            state.db.clone(),
            ClientSettings::from_config(&state.config),
        )
    });
    client.touch();
    request.extensions_mut().insert(client);

    let response = next.run(request).await;
    if !issued {
        return Ok(response);
    }

    let token = create_session_token(&client_id, key)?;
    let secure = state.config.frontend_url.starts_with("https://");
    tracing::debug!(client = %client_id, "Issued session cookie");
    Ok((jar.add(build_session_cookie(token, secure)), response).into_response())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_roundtrip() {
        let key = b"test_jwt_key_32_bytes_minimum!!";
        let token = create_session_token("abc123", key).unwrap();
        assert_eq!(verify_session_token(&token, key).unwrap(), "abc123");
    }

    #[test]
    fn test_token_with_wrong_key_rejected() {
        let token = create_session_token("abc123", b"key-one-key-one-key-one-key-one").unwrap();
        assert!(matches!(
            verify_session_token(&token, b"key-two-key-two-key-two-key-two"),
            Err(AppError::InvalidToken)
        ));
    }

    #[test]
    fn test_client_ids_are_unique_hex() {
        let a = new_client_id().unwrap();
        let b = new_client_id().unwrap();
        assert_eq!(a.len(), 32);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, b);
    }
}
