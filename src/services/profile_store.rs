// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Profile persistence at `user/{uid}`.

use crate::db::DocumentStore;
use crate::error::AppError;
use crate::models::{ProfileFields, ProfileWrite, UserProfile};
use std::sync::Arc;

/// Creates or merge-updates user profile documents.
#[derive(Clone)]
pub struct UserProfileStore {
    db: Arc<dyn DocumentStore>,
}

impl UserProfileStore {
    pub fn new(db: Arc<dyn DocumentStore>) -> Self {
        Self { db }
    }

    /// Upsert the profile for `uid`.
    ///
    /// A missing document is created with `uid`, `createdAt` and `updatedAt`.
    /// An existing one only gets the given fields plus `updatedAt`; fields
    /// not supplied keep their stored values.
    pub async fn save_user(&self, uid: &str, fields: ProfileFields) -> Result<(), AppError> {
        let existing = self.db.get_user(uid).await?;

        let write = match existing {
            None => ProfileWrite {
                fields: ProfileFields {
                    uid: Some(uid.to_string()),
                    ..fields
                },
                set_created_at: true,
                set_updated_at: true,
            },
            Some(_) => ProfileWrite {
                fields,
                set_created_at: false,
                set_updated_at: true,
            },
        };

        tracing::debug!(
            uid,
            create = write.set_created_at,
            fields = ?write.fields.field_paths(),
            "Saving user profile"
        );
        self.db.merge_user(uid, &write).await
    }

    /// Read the profile for `uid`; the id is always attached to the result.
    pub async fn get_user(&self, uid: &str) -> Result<Option<UserProfile>, AppError> {
        Ok(self.db.get_user(uid).await?.map(|profile| UserProfile {
            uid: uid.to_string(),
            ..profile
        }))
    }
}
