//! User models: the signed-in auth handle and the stored profile document.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Signed-in user as reported by the identity backend.
///
/// Only the fields the app reads are exposed; tokens stay out of views.
#[derive(Clone, PartialEq, Eq)]
pub struct AuthUser {
    pub uid: String,
    pub display_name: Option<String>,
    pub phone_number: Option<String>,
    pub id_token: String,
    pub refresh_token: String,
}

impl AuthUser {
    /// Label for the signed-in header.
    pub fn label(&self) -> &str {
        self.display_name.as_deref().unwrap_or("Signed in")
    }
}

impl std::fmt::Debug for AuthUser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthUser")
            .field("uid", &self.uid)
            .field("display_name", &self.display_name)
            .field("phone_number", &self.phone_number)
            .finish_non_exhaustive()
    }
}

/// Profile stored at `user/{uid}`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    #[serde(default)]
    pub uid: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone_number: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(rename = "photoURL", default, skip_serializing_if = "Option::is_none")]
    pub photo_url: Option<String>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "firestore::serialize_as_optional_timestamp"
    )]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "firestore::serialize_as_optional_timestamp"
    )]
    pub updated_at: Option<DateTime<Utc>>,
}

/// Partial profile update. `None` fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileFields {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone_number: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(rename = "photoURL", default, skip_serializing_if = "Option::is_none")]
    pub photo_url: Option<String>,
}

impl ProfileFields {
    /// Firestore field paths present in this update (the write mask).
    pub fn field_paths(&self) -> Vec<&'static str> {
        let mut paths = Vec::new();
        if self.uid.is_some() {
            paths.push("uid");
        }
        if self.phone_number.is_some() {
            paths.push("phoneNumber");
        }
        if self.display_name.is_some() {
            paths.push("displayName");
        }
        if self.photo_url.is_some() {
            paths.push("photoURL");
        }
        paths
    }
}

/// A merge-write of profile fields plus server-clock timestamps.
#[derive(Debug, Clone, PartialEq)]
pub struct ProfileWrite {
    pub fields: ProfileFields,
    /// Set `createdAt` to the server time (first write only).
    pub set_created_at: bool,
    /// Set `updatedAt` to the server time.
    pub set_updated_at: bool,
}
