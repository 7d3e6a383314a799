// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! In-memory document store for tests and offline development.
//!
//! Mirrors the Firestore semantics the app relies on: merge writes only touch
//! present fields, server timestamps come from the store's own clock, and
//! coupon watchers receive a full snapshot on open and after every change.

use super::{CouponSnapshot, CouponSubscription, DocumentStore};
use crate::error::AppError;
use crate::models::{CouponDoc, ProfileWrite, UserProfile};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures_util::future::{BoxFuture, FutureExt};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};

/// Operations that can be made to fail once, for error-path tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemoryOp {
    Read,
    Write,
    Watch,
}

#[derive(Default)]
struct Inner {
    users: DashMap<String, UserProfile>,
    coupons: DashMap<String, watch::Sender<BTreeMap<String, CouponDoc>>>,
    failures: DashMap<MemoryOp, String>,
    open_watchers: DashMap<String, Arc<AtomicUsize>>,
    /// Last issued server time, in microseconds.
    clock: AtomicI64,
    writes: AtomicUsize,
}

/// In-memory [`DocumentStore`].
#[derive(Clone, Default)]
pub struct MemoryDb {
    inner: Arc<Inner>,
}

impl MemoryDb {
    pub fn new() -> Self {
        Self::default()
    }

    /// Server clock: wall time, but strictly increasing across calls.
    fn server_time(&self) -> DateTime<Utc> {
        let now = Utc::now().timestamp_micros();
        let prev = self
            .inner
            .clock
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
                Some(now.max(last + 1))
            })
            .unwrap_or(now);
        let issued = now.max(prev + 1);
        DateTime::from_timestamp_micros(issued).unwrap_or_else(Utc::now)
    }

    fn take_failure(&self, op: MemoryOp) -> Option<String> {
        self.inner.failures.remove(&op).map(|(_, msg)| msg)
    }

    /// Make the next `op` fail with `message`.
    pub fn fail_next(&self, op: MemoryOp, message: impl Into<String>) {
        self.inner.failures.insert(op, message.into());
    }

    /// Number of merge-writes performed so far.
    pub fn write_count(&self) -> usize {
        self.inner.writes.load(Ordering::SeqCst)
    }

    /// Number of coupon watchers currently open for `uid`.
    pub fn open_watchers(&self, uid: &str) -> usize {
        self.inner
            .open_watchers
            .get(uid)
            .map(|c| c.load(Ordering::SeqCst))
            .unwrap_or(0)
    }

    fn with_coupons<R>(
        &self,
        uid: &str,
        f: impl FnOnce(&watch::Sender<BTreeMap<String, CouponDoc>>) -> R,
    ) -> R {
        let channel = self
            .inner
            .coupons
            .entry(uid.to_string())
            .or_insert_with(|| watch::channel(BTreeMap::new()).0);
        f(channel.value())
    }

    /// Insert or replace a coupon document, as the redemption process would.
    pub fn put_coupon(&self, uid: &str, id: &str, doc: CouponDoc) {
        self.with_coupons(uid, |channel| {
            channel.send_modify(|docs| {
                docs.insert(id.to_string(), doc);
            })
        });
    }

    /// Delete a coupon document.
    pub fn delete_coupon(&self, uid: &str, id: &str) {
        self.with_coupons(uid, |channel| {
            channel.send_modify(|docs| {
                docs.remove(id);
            })
        });
    }

    fn snapshot(docs: &BTreeMap<String, CouponDoc>) -> CouponSnapshot {
        docs.iter()
            .map(|(id, doc)| (id.clone(), doc.clone()))
            .collect()
    }
}

impl DocumentStore for MemoryDb {
    fn get_user<'a>(
        &'a self,
        uid: &'a str,
    ) -> BoxFuture<'a, Result<Option<UserProfile>, AppError>> {
        async move {
            if let Some(msg) = self.take_failure(MemoryOp::Read) {
                return Err(AppError::Persistence(msg));
            }
            Ok(self.inner.users.get(uid).map(|doc| doc.clone()))
        }
        .boxed()
    }

    fn merge_user<'a>(
        &'a self,
        uid: &'a str,
        write: &'a ProfileWrite,
    ) -> BoxFuture<'a, Result<(), AppError>> {
        async move {
            if let Some(msg) = self.take_failure(MemoryOp::Write) {
                return Err(AppError::Persistence(msg));
            }

            let now = self.server_time();
            let mut doc = self.inner.users.entry(uid.to_string()).or_default();
            let fields = &write.fields;
            if let Some(v) = &fields.uid {
                doc.uid = v.clone();
            }
            if let Some(v) = &fields.phone_number {
                doc.phone_number = Some(v.clone());
            }
            if let Some(v) = &fields.display_name {
                doc.display_name = Some(v.clone());
            }
            if let Some(v) = &fields.photo_url {
                doc.photo_url = Some(v.clone());
            }
            if write.set_created_at {
                doc.created_at = Some(now);
            }
            if write.set_updated_at {
                doc.updated_at = Some(now);
            }
            drop(doc);

            self.inner.writes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        .boxed()
    }

    fn watch_coupons<'a>(
        &'a self,
        uid: &'a str,
    ) -> BoxFuture<'a, Result<CouponSubscription, AppError>> {
        async move {
            if let Some(msg) = self.take_failure(MemoryOp::Watch) {
                return Err(AppError::Subscription(msg));
            }

            let mut docs_rx = self.with_coupons(uid, |channel| channel.subscribe());
            let (tx, rx) = mpsc::unbounded_channel();
            let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();

            let counter = self
                .inner
                .open_watchers
                .entry(uid.to_string())
                .or_default()
                .clone();
            counter.fetch_add(1, Ordering::SeqCst);

            let worker = tokio::spawn(async move {
                let initial = Self::snapshot(&docs_rx.borrow_and_update());
                if tx.send(Ok(initial)).is_ok() {
                    loop {
                        tokio::select! {
                            _ = &mut shutdown_rx => break,
                            changed = docs_rx.changed() => {
                                if changed.is_err() {
                                    break;
                                }
                                let snapshot = Self::snapshot(&docs_rx.borrow_and_update());
                                if tx.send(Ok(snapshot)).is_err() {
                                    break;
                                }
                            }
                        }
                    }
                }
                counter.fetch_sub(1, Ordering::SeqCst);
            });

            Ok(CouponSubscription::new(rx, shutdown_tx, worker))
        }
        .boxed()
    }
}
