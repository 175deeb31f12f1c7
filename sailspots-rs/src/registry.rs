//! The remote favorites registry as the session sees it.

use std::pin::Pin;
use std::task::{Context, Poll};

use futures::channel::mpsc;
use futures::{Stream, StreamExt};
use tether::{FavoriteRecord, PlaceId, SyncError};

/// Every item is the complete set of favorited identifiers at that moment, never a delta.
pub type Snapshot = Result<Vec<PlaceId>, SyncError>;

/// Authoritative per-user store of favorite records.
///
/// Futures returned here are driven on the session's thread, so they don't need to be `Send`.
#[allow(async_fn_in_trait)]
pub trait FavoriteRegistry {
    /// Replace the whole record stored under `id`.
    async fn upsert(&self, id: &str, record: &FavoriteRecord) -> Result<(), SyncError>;

    async fn delete(&self, id: &str) -> Result<(), SyncError>;

    async fn get_by_id(&self, id: &str) -> Result<Option<FavoriteRecord>, SyncError>;

    /// Start a live subscription. The current set is delivered first.
    fn subscribe(&self) -> RegistrySubscription;
}

/// Sending half handed to whoever produces snapshots.
pub type SnapshotSender = mpsc::UnboundedSender<Snapshot>;

pub struct RegistrySubscription {
    receiver: mpsc::UnboundedReceiver<Snapshot>,
}

impl RegistrySubscription {
    pub fn channel() -> (SnapshotSender, RegistrySubscription) {
        let (sender, receiver) = mpsc::unbounded();
        (sender, RegistrySubscription { receiver })
    }

    /// Detach from the registry. The producer sees its sender closed on the next push.
    pub fn unsubscribe(&mut self) {
        self.receiver.close();
    }
}

impl Stream for RegistrySubscription {
    type Item = Snapshot;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.receiver.poll_next_unpin(cx)
    }
}
