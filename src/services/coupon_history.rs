// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Live coupon history for the signed-in user.
//!
//! The panel owns at most one open subscription. Each subscription runs in a
//! worker task tagged with a generation number; the worker only applies
//! snapshots while its generation is still current, so nothing from a
//! previous uid can land after a switch.

use crate::db::{CouponSnapshot, DocumentStore};
use crate::error::AppError;
use crate::models::{sort_newest_first, CouponHistoryEntry};
use chrono::{FixedOffset, Offset, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
#[cfg(feature = "binding-generation")]
use ts_rs::TS;

/// Placeholder rows shown until the first snapshot arrives.
const SKELETON_ROWS: usize = 3;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PanelState {
    pub generation: u64,
    pub loading: bool,
    pub entries: Vec<CouponHistoryEntry>,
    pub error: Option<String>,
    pub copied_id: Option<String>,
}

struct Worker {
    stop: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

pub struct CouponHistoryPanel {
    store: Arc<dyn DocumentStore>,
    state: Arc<watch::Sender<PanelState>>,
    uid: Option<String>,
    generation: u64,
    worker: Option<Worker>,
    copied_delay: Duration,
    copied_timer: Option<JoinHandle<()>>,
    /// Wall-clock offset for ordering and display of coupon times.
    offset: FixedOffset,
}

impl CouponHistoryPanel {
    /// Create a closed panel.
    pub fn new(store: Arc<dyn DocumentStore>, copied_delay: Duration, offset: FixedOffset) -> Self {
        let (state, _) = watch::channel(PanelState::default());
        Self {
            store,
            state: Arc::new(state),
            uid: None,
            generation: 0,
            worker: None,
            copied_delay,
            copied_timer: None,
            offset,
        }
    }

    pub fn uid(&self) -> Option<&str> {
        self.uid.as_deref()
    }

    /// Current state snapshot.
    pub fn state(&self) -> PanelState {
        self.state.borrow().clone()
    }

    /// Change notifications for re-rendering.
    pub fn subscribe(&self) -> watch::Receiver<PanelState> {
        self.state.subscribe()
    }

    /// Open the live query for `uid`. Any previous subscription must have
    /// been closed first; see [`Self::set_uid`].
    pub fn open(&mut self, uid: &str) {
        self.generation += 1;
        let generation = self.generation;
        self.uid = Some(uid.to_string());
        self.state.send_replace(PanelState {
            generation,
            loading: true,
            ..Default::default()
        });
        tracing::debug!(uid, generation, "Opening coupon history");

        let (stop, stop_rx) = oneshot::channel();
        let task = tokio::spawn(run_subscription(
            self.store.clone(),
            self.state.clone(),
            uid.to_string(),
            generation,
            self.offset,
            stop_rx,
        ));
        self.worker = Some(Worker { stop, task });
    }

    /// Stop the current subscription and wait until it is fully closed.
    pub async fn close(&mut self) {
        self.generation += 1;
        if let Some(timer) = self.copied_timer.take() {
            timer.abort();
        }
        if let Some(worker) = self.worker.take() {
            let _ = worker.stop.send(());
            if let Err(e) = worker.task.await {
                tracing::warn!(error = %e, "Coupon history worker ended abnormally");
            }
        }
        if let Some(uid) = self.uid.take() {
            tracing::debug!(uid = %uid, "Closed coupon history");
        }
        self.state.send_replace(PanelState {
            generation: self.generation,
            ..Default::default()
        });
    }

    /// Follow the signed-in uid. A change closes the old subscription
    /// before the new one opens; the same uid is a no-op.
    pub async fn set_uid(&mut self, uid: Option<&str>) {
        if self.uid.as_deref() == uid {
            return;
        }
        self.close().await;
        if let Some(uid) = uid {
            self.open(uid);
        }
    }

    /// Code of the row `id`, which shows as copied for a short while.
    pub fn copy(&mut self, id: &str) -> Result<String, AppError> {
        let code = self
            .state
            .borrow()
            .entries
            .iter()
            .find(|e| e.id == id)
            .map(|e| e.code.clone())
            .ok_or_else(|| AppError::NotFound(format!("coupon {}", id)))?;

        self.state.send_modify(|s| s.copied_id = Some(id.to_string()));

        if let Some(timer) = self.copied_timer.take() {
            timer.abort();
        }
        let state = self.state.clone();
        let delay = self.copied_delay;
        let id = id.to_string();
        self.copied_timer = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            state.send_if_modified(|s| {
                if s.copied_id.as_deref() == Some(id.as_str()) {
                    s.copied_id = None;
                    true
                } else {
                    false
                }
            });
        }));

        Ok(code)
    }

    pub fn view(&self) -> PanelView {
        PanelView::from_state(&self.state.borrow(), &self.offset)
    }
}

impl Drop for CouponHistoryPanel {
    fn drop(&mut self) {
        if let Some(timer) = self.copied_timer.take() {
            timer.abort();
        }
        // The worker closes its subscription once it sees the stop signal.
        if let Some(worker) = self.worker.take() {
            let _ = worker.stop.send(());
        }
    }
}

async fn run_subscription(
    store: Arc<dyn DocumentStore>,
    state: Arc<watch::Sender<PanelState>>,
    uid: String,
    generation: u64,
    offset: FixedOffset,
    mut stop: oneshot::Receiver<()>,
) {
    let mut subscription = tokio::select! {
        _ = &mut stop => return,
        opened = store.watch_coupons(&uid) => match opened {
            Ok(subscription) => subscription,
            Err(e) => {
                apply_error(&state, generation, &e);
                return;
            }
        },
    };

    loop {
        tokio::select! {
            _ = &mut stop => break,
            item = subscription.next() => match item {
                Some(Ok(snapshot)) => apply_snapshot(&state, generation, snapshot, &offset),
                Some(Err(e)) => apply_error(&state, generation, &e),
                None => break,
            },
        }
    }

    subscription.close().await;
}

fn apply_snapshot(
    state: &watch::Sender<PanelState>,
    generation: u64,
    snapshot: CouponSnapshot,
    offset: &FixedOffset,
) {
    let mut entries: Vec<CouponHistoryEntry> = snapshot
        .into_iter()
        .map(|(id, doc)| CouponHistoryEntry::from_doc(id, doc))
        .collect();
    sort_newest_first(&mut entries, offset);
    let count = entries.len();

    let applied = state.send_if_modified(|s| {
        if s.generation != generation {
            return false;
        }
        s.entries = entries;
        s.loading = false;
        s.error = None;
        true
    });
    if applied {
        tracing::debug!(generation, count, "Coupon history updated");
    } else {
        tracing::debug!(generation, "Discarding stale coupon snapshot");
    }
}

fn apply_error(state: &watch::Sender<PanelState>, generation: u64, err: &AppError) {
    tracing::warn!(generation, error = %err, "Coupon history subscription failed");
    state.send_if_modified(|s| {
        if s.generation != generation {
            return false;
        }
        s.error = Some(err.user_message());
        s.loading = false;
        true
    });
}

/// One history row as displayed.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct CouponRowView {
    pub id: String,
    pub code: String,
    pub msg: Option<String>,
    pub created: String,
    pub copied: bool,
    pub copy_label: String,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct PanelView {
    pub title: String,
    pub subtitle: Option<String>,
    pub loading: bool,
    pub error: Option<String>,
    #[cfg_attr(feature = "binding-generation", ts(type = "number"))]
    pub skeleton_rows: usize,
    pub empty_message: Option<String>,
    pub rows: Vec<CouponRowView>,
}

impl PanelView {
    /// View of a panel waiting for its first snapshot.
    pub fn loading_placeholder() -> Self {
        Self::from_state(
            &PanelState {
                loading: true,
                ..Default::default()
            },
            &Utc.fix(),
        )
    }

    fn from_state(state: &PanelState, offset: &FixedOffset) -> Self {
        let rows: Vec<CouponRowView> = state
            .entries
            .iter()
            .map(|entry| {
                let copied = state.copied_id.as_deref() == Some(entry.id.as_str());
                CouponRowView {
                    id: entry.id.clone(),
                    code: if entry.code.is_empty() {
                        "-".to_string()
                    } else {
                        entry.code.clone()
                    },
                    msg: entry.msg.clone(),
                    created: entry.display_created(offset),
                    copied,
                    copy_label: if copied { "Copied" } else { "Copy" }.to_string(),
                }
            })
            .collect();

        let empty = !state.loading && state.error.is_none() && rows.is_empty();
        let title = match rows.len() {
            0 => "Coupon history".to_string(),
            count => format!("Coupon history ({})", count),
        };
        let subtitle = if state.loading {
            Some("Loading…".to_string())
        } else if rows.is_empty() {
            None
        } else {
            Some("Newest first".to_string())
        };
        PanelView {
            title,
            subtitle,
            loading: state.loading,
            error: state.error.clone(),
            skeleton_rows: if state.loading { SKELETON_ROWS } else { 0 },
            empty_message: empty.then(|| "No coupons redeemed yet.".to_string()),
            rows,
        }
    }
}
