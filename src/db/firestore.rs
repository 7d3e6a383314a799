// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Firestore client wrapper with typed operations.
//!
//! Provides high-level operations for:
//! - User profiles (`user/{uid}`), merge-written with server timestamps
//! - Coupon history (`user/{uid}/coupon`), watched with a live listener

use super::{doc_id, CouponSnapshot, CouponSubscription, DocumentStore};
use crate::db::collections;
use crate::error::AppError;
use crate::models::{CouponDoc, ProfileWrite, UserProfile};
use firestore::{
    FirestoreListenEvent, FirestoreListenerTarget, FirestoreMemListenStateStorage,
    FirestoreTransformServerValue,
};
use futures_util::future::{self, BoxFuture, FutureExt};
use gcloud_sdk::google::firestore::v1::target_change::TargetChangeType;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{mpsc, oneshot};

/// Each listener watches a single query, so one target id is enough.
const COUPON_TARGET_ID: u32 = 1;

/// Firestore database client.
#[derive(Clone)]
pub struct FirestoreDb {
    client: firestore::FirestoreDb,
}

impl FirestoreDb {
    /// Create a new Firestore client.
    ///
    /// For local development with emulator, set FIRESTORE_EMULATOR_HOST.
    pub async fn new(project_id: &str) -> Result<Self, AppError> {
        // If the emulator environment variable is set, use unauthenticated connection
        // to avoid local credential warnings and leakage.
        if std::env::var("FIRESTORE_EMULATOR_HOST").is_ok() {
            return Self::create_emulator_client(project_id).await;
        }

        let client = firestore::FirestoreDb::new(project_id)
            .await
            .map_err(|e| AppError::Database(format!("Failed to connect to Firestore: {}", e)))?;

        tracing::info!(project = project_id, "Connected to Firestore");

        Ok(Self { client })
    }

    /// Create a Firestore client for the emulator with unauthenticated access.
    async fn create_emulator_client(project_id: &str) -> Result<Self, AppError> {
        tracing::info!("Using unauthenticated connection for Firestore Emulator");

        let token_source = gcloud_sdk::ExternalJwtFunctionSource::new(|| async {
            Ok(gcloud_sdk::Token {
                token_type: "Bearer".to_string(),
                token: gcloud_sdk::SecretValue::new(
                    "eyJhbGciOiJub25lIn0.eyJ1aWQiOiJ0ZXN0In0."
                        .to_string()
                        .into(),
                ),
                expiry: chrono::Utc::now() + chrono::Duration::hours(1),
            })
        });

        let options = firestore::FirestoreDbOptions::new(project_id.to_string());

        let client = firestore::FirestoreDb::with_options_token_source(
            options,
            gcloud_sdk::GCP_DEFAULT_SCOPES.clone(),
            gcloud_sdk::TokenSourceType::ExternalSource(Box::new(token_source)),
        )
        .await
        .map_err(|e| {
            AppError::Database(format!("Failed to connect to Firestore Emulator: {}", e))
        })?;

        tracing::info!(
            project = project_id,
            "Connected to Firestore (Emulator/Unauthenticated)"
        );

        Ok(Self { client })
    }

    // ─── User Operations ─────────────────────────────────────────

    async fn read_user(&self, uid: &str) -> Result<Option<UserProfile>, AppError> {
        self.client
            .fluent()
            .select()
            .by_id_in(collections::USER)
            .obj()
            .one(uid)
            .await
            .map_err(|e| AppError::Persistence(e.to_string()))
    }

    async fn write_user(&self, uid: &str, write: &ProfileWrite) -> Result<(), AppError> {
        let set_created_at = write.set_created_at;
        let set_updated_at = write.set_updated_at;

        let _: () = self
            .client
            .fluent()
            .update()
            .fields(write.fields.field_paths())
            .in_col(collections::USER)
            .document_id(uid)
            .object(&write.fields)
            .transforms(|t| {
                let mut transforms = Vec::new();
                if set_created_at {
                    transforms.push(
                        t.field("createdAt")
                            .server_value(FirestoreTransformServerValue::RequestTime),
                    );
                }
                if set_updated_at {
                    transforms.push(
                        t.field("updatedAt")
                            .server_value(FirestoreTransformServerValue::RequestTime),
                    );
                }
                t.fields(transforms)
            })
            .execute()
            .await
            .map_err(|e| AppError::Persistence(e.to_string()))?;
        Ok(())
    }

    // ─── Coupon History ──────────────────────────────────────────

    async fn open_coupon_listener(&self, uid: &str) -> Result<CouponSubscription, AppError> {
        let parent = self
            .client
            .parent_path(collections::USER, uid)
            .map_err(|e| AppError::Subscription(e.to_string()))?;

        let mut listener = self
            .client
            .create_listener(FirestoreMemListenStateStorage::new())
            .await
            .map_err(|e| AppError::Subscription(e.to_string()))?;

        self.client
            .fluent()
            .select()
            .from(collections::COUPON)
            .parent(&parent)
            .listen()
            .add_target(FirestoreListenerTarget::new(COUPON_TARGET_ID), &mut listener)
            .map_err(|e| AppError::Subscription(e.to_string()))?;

        let (tx, rx) = mpsc::unbounded_channel();
        let state = Arc::new(Mutex::new(ListenState::default()));

        listener
            .start(move |event| {
                let mut state = state.lock().unwrap_or_else(PoisonError::into_inner);
                if let Some(item) = state.apply(event) {
                    let _ = tx.send(item);
                }
                future::ready(Ok::<(), Box<dyn std::error::Error + Send + Sync>>(()))
            })
            .await
            .map_err(|e| AppError::Subscription(e.to_string()))?;

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let owner = uid.to_string();
        let worker = tokio::spawn(async move {
            let _ = shutdown_rx.await;
            if let Err(e) = listener.shutdown().await {
                tracing::warn!(uid = %owner, error = %e, "Coupon listener shutdown failed");
            }
            tracing::debug!(uid = %owner, "Coupon listener closed");
        });

        tracing::debug!(uid, "Coupon listener opened");
        Ok(CouponSubscription::new(rx, shutdown_tx, worker))
    }
}

/// Documents accumulated from listen events, ordered by id like a plain query.
#[derive(Default)]
struct ListenState {
    docs: BTreeMap<String, CouponDoc>,
    dirty: bool,
    emitted: bool,
}

impl ListenState {
    /// Fold one event in. Returns a snapshot at consistency points.
    fn apply(&mut self, event: FirestoreListenEvent) -> Option<Result<CouponSnapshot, String>> {
        match event {
            FirestoreListenEvent::DocumentChange(change) => {
                if let Some(doc) = change.document {
                    let parsed = firestore::FirestoreDb::deserialize_doc_to::<CouponDoc>(&doc)
                        .unwrap_or_else(|e| {
                            tracing::warn!(doc = %doc.name, error = %e, "Unreadable coupon document");
                            CouponDoc::default()
                        });
                    self.docs.insert(doc_id(&doc.name).to_string(), parsed);
                    self.dirty = true;
                }
                None
            }
            FirestoreListenEvent::DocumentDelete(delete) => {
                self.docs.remove(doc_id(&delete.document));
                self.dirty = true;
                None
            }
            FirestoreListenEvent::DocumentRemove(remove) => {
                self.docs.remove(doc_id(&remove.document));
                self.dirty = true;
                None
            }
            FirestoreListenEvent::TargetChange(change) => {
                let kind = TargetChangeType::try_from(change.target_change_type)
                    .unwrap_or(TargetChangeType::NoChange);
                match kind {
                    TargetChangeType::Remove => Some(Err(change
                        .cause
                        .map(|status| status.message)
                        .unwrap_or_else(|| "Coupon query was cancelled".to_string()))),
                    TargetChangeType::Reset => {
                        self.docs.clear();
                        self.dirty = true;
                        None
                    }
                    TargetChangeType::Current => self.flush(),
                    // Global consistency point; only meaningful once CURRENT was seen.
                    TargetChangeType::NoChange
                        if self.dirty && self.emitted && change.target_ids.is_empty() =>
                    {
                        self.flush()
                    }
                    _ => None,
                }
            }
            _ => None,
        }
    }

    fn flush(&mut self) -> Option<Result<CouponSnapshot, String>> {
        self.dirty = false;
        self.emitted = true;
        Some(Ok(self
            .docs
            .iter()
            .map(|(id, doc)| (id.clone(), doc.clone()))
            .collect()))
    }
}

impl DocumentStore for FirestoreDb {
    fn get_user<'a>(
        &'a self,
        uid: &'a str,
    ) -> BoxFuture<'a, Result<Option<UserProfile>, AppError>> {
        self.read_user(uid).boxed()
    }

    fn merge_user<'a>(
        &'a self,
        uid: &'a str,
        write: &'a ProfileWrite,
    ) -> BoxFuture<'a, Result<(), AppError>> {
        self.write_user(uid, write).boxed()
    }

    fn watch_coupons<'a>(
        &'a self,
        uid: &'a str,
    ) -> BoxFuture<'a, Result<CouponSubscription, AppError>> {
        self.open_coupon_listener(uid).boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gcloud_sdk::google::firestore::v1::{
        value::ValueType, Document, DocumentChange, DocumentDelete, TargetChange, Value,
    };
    use gcloud_sdk::google::rpc::Status;
    use std::collections::HashMap;

    fn coupon_changed(id: &str, code: &str) -> FirestoreListenEvent {
        let fields = HashMap::from([(
            "code".to_string(),
            Value {
                value_type: Some(ValueType::StringValue(code.to_string())),
            },
        )]);
        FirestoreListenEvent::DocumentChange(DocumentChange {
            document: Some(Document {
                name: format!("projects/p/databases/(default)/documents/user/u1/coupon/{id}"),
                fields,
                ..Default::default()
            }),
            target_ids: vec![COUPON_TARGET_ID as i32],
            ..Default::default()
        })
    }

    fn coupon_deleted(id: &str) -> FirestoreListenEvent {
        FirestoreListenEvent::DocumentDelete(DocumentDelete {
            document: format!("projects/p/databases/(default)/documents/user/u1/coupon/{id}"),
            ..Default::default()
        })
    }

    fn target(kind: TargetChangeType, target_ids: Vec<i32>) -> FirestoreListenEvent {
        FirestoreListenEvent::TargetChange(TargetChange {
            target_change_type: kind as i32,
            target_ids,
            ..Default::default()
        })
    }

    fn ids(snapshot: &CouponSnapshot) -> Vec<&str> {
        snapshot.iter().map(|(id, _)| id.as_str()).collect()
    }

    #[test]
    fn test_initial_documents_wait_for_current() {
        let mut state = ListenState::default();
        assert!(state.apply(target(TargetChangeType::Add, vec![1])).is_none());
        assert!(state.apply(coupon_changed("c2", "SPRING")).is_none());
        assert!(state.apply(coupon_changed("c1", "WELCOME")).is_none());

        let snapshot = state
            .apply(target(TargetChangeType::Current, vec![1]))
            .unwrap()
            .unwrap();
        assert_eq!(ids(&snapshot), vec!["c1", "c2"]);
        assert_eq!(snapshot[0].1.code.as_deref(), Some("WELCOME"));
    }

    #[test]
    fn test_no_change_before_current_is_ignored() {
        let mut state = ListenState::default();
        state.apply(coupon_changed("c1", "WELCOME"));
        assert!(state.apply(target(TargetChangeType::NoChange, vec![])).is_none());
    }

    #[test]
    fn test_global_no_change_flushes_later_edits() {
        let mut state = ListenState::default();
        state.apply(target(TargetChangeType::Current, vec![1]));

        state.apply(coupon_changed("c1", "WELCOME"));
        // Per-target heartbeat is not a consistency point.
        assert!(state.apply(target(TargetChangeType::NoChange, vec![1])).is_none());

        let snapshot = state
            .apply(target(TargetChangeType::NoChange, vec![]))
            .unwrap()
            .unwrap();
        assert_eq!(ids(&snapshot), vec!["c1"]);

        // Nothing changed since the last snapshot.
        assert!(state.apply(target(TargetChangeType::NoChange, vec![])).is_none());
    }

    #[test]
    fn test_delete_drops_document() {
        let mut state = ListenState::default();
        state.apply(coupon_changed("c1", "WELCOME"));
        state.apply(coupon_changed("c2", "SPRING"));
        state.apply(target(TargetChangeType::Current, vec![1]));

        state.apply(coupon_deleted("c1"));
        let snapshot = state
            .apply(target(TargetChangeType::NoChange, vec![]))
            .unwrap()
            .unwrap();
        assert_eq!(ids(&snapshot), vec!["c2"]);
    }

    #[test]
    fn test_reset_clears_documents() {
        let mut state = ListenState::default();
        state.apply(coupon_changed("c1", "WELCOME"));
        state.apply(target(TargetChangeType::Current, vec![1]));

        assert!(state.apply(target(TargetChangeType::Reset, vec![1])).is_none());
        state.apply(coupon_changed("c3", "AUTUMN"));
        let snapshot = state
            .apply(target(TargetChangeType::Current, vec![1]))
            .unwrap()
            .unwrap();
        assert_eq!(ids(&snapshot), vec!["c3"]);
    }

    #[test]
    fn test_remove_reports_cause() {
        let mut state = ListenState::default();
        let removed = FirestoreListenEvent::TargetChange(TargetChange {
            target_change_type: TargetChangeType::Remove as i32,
            target_ids: vec![1],
            cause: Some(Status {
                code: 7,
                message: "Missing or insufficient permissions.".to_string(),
                ..Default::default()
            }),
            ..Default::default()
        });
        assert_eq!(
            state.apply(removed).unwrap().unwrap_err(),
            "Missing or insufficient permissions."
        );

        let bare = target(TargetChangeType::Remove, vec![1]);
        assert_eq!(
            state.apply(bare).unwrap().unwrap_err(),
            "Coupon query was cancelled"
        );
    }
}
