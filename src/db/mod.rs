//! Database layer (Firestore).
//!
//! `DocumentStore` is the seam between the app and its document backend.
//! Production uses [`FirestoreDb`]; tests and local runs use [`MemoryDb`].

pub mod firestore;
pub mod memory;

pub use firestore::FirestoreDb;
pub use memory::MemoryDb;

use crate::error::AppError;
use crate::models::{CouponDoc, ProfileWrite, UserProfile};
use futures_util::future::BoxFuture;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

/// Collection names as constants.
pub mod collections {
    /// User profiles (keyed by uid)
    pub const USER: &str = "user";
    /// Redeemed coupons, a sub-collection of each user document
    pub const COUPON: &str = "coupon";
}

/// Every document of a coupon collection at one point in time, keyed by id.
pub type CouponSnapshot = Vec<(String, CouponDoc)>;

/// Document backend used by the profile store and the history panel.
pub trait DocumentStore: Send + Sync {
    /// Read `user/{uid}`.
    fn get_user<'a>(&'a self, uid: &'a str)
        -> BoxFuture<'a, Result<Option<UserProfile>, AppError>>;

    /// Merge-write `user/{uid}`: only the present fields are touched, and
    /// requested timestamps are set from the server clock.
    fn merge_user<'a>(
        &'a self,
        uid: &'a str,
        write: &'a ProfileWrite,
    ) -> BoxFuture<'a, Result<(), AppError>>;

    /// Open a live query over `user/{uid}/coupon`.
    fn watch_coupons<'a>(
        &'a self,
        uid: &'a str,
    ) -> BoxFuture<'a, Result<CouponSubscription, AppError>>;
}

/// Handle to an open live query.
///
/// Snapshots arrive in the order the backend emits them. Dropping the handle
/// signals the backend worker to stop; [`CouponSubscription::close`] also
/// waits for it to finish.
pub struct CouponSubscription {
    snapshots: mpsc::UnboundedReceiver<Result<CouponSnapshot, String>>,
    shutdown: Option<oneshot::Sender<()>>,
    worker: Option<JoinHandle<()>>,
}

impl CouponSubscription {
    pub fn new(
        snapshots: mpsc::UnboundedReceiver<Result<CouponSnapshot, String>>,
        shutdown: oneshot::Sender<()>,
        worker: JoinHandle<()>,
    ) -> Self {
        Self {
            snapshots,
            shutdown: Some(shutdown),
            worker: Some(worker),
        }
    }

    /// Next snapshot, or `None` once the backend side has gone away.
    pub async fn next(&mut self) -> Option<Result<CouponSnapshot, AppError>> {
        self.snapshots
            .recv()
            .await
            .map(|item| item.map_err(AppError::Subscription))
    }

    /// Stop the backend worker and wait until it has shut down.
    pub async fn close(mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        self.snapshots.close();
        if let Some(worker) = self.worker.take() {
            if let Err(e) = worker.await {
                tracing::warn!(error = %e, "Coupon watch worker ended abnormally");
            }
        }
    }
}

impl Drop for CouponSubscription {
    fn drop(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
    }
}

/// Last path segment of a document resource name.
pub(crate) fn doc_id(name: &str) -> &str {
    name.rsplit('/').next().unwrap_or(name)
}
