//! This is a library for keeping a user's favorite spots in sync across every view that shows them.
//! It was created for SailSpots, so it doesn't include much that was not needed for that project.
//!
//! Syncing strategy:
//! 1. The remote registry is the source of truth. It pushes the complete set of favorite identifiers whenever anything changes, never a delta.
//! 2. Search results arrive on their own schedule and replace the previous results wholesale.
//! 3. The engine merges the two into a single ordered list, deriving `is_favorite` from set membership at merge time.
//! 4. When the user toggles a favorite:
//!   1. The engine flips membership immediately and hands the caller a typed write intent.
//!   2. The caller performs the remote write and reports the outcome.
//!   3. On failure the flip is reverted, unless a newer snapshot has already told us the truth.
//!
//! The engine never touches the network or the disk. Callers own one engine per session and drive it from a single thread.

pub mod data_model;
pub mod engine;
mod error;
pub mod merge;
pub mod search;

pub use data_model::{
    Coordinate, FavoriteIds, FavoriteRecord, ItemDiff, ListDiff, ListenerKey, Place, PlaceId,
    PresentationItem,
};
pub use engine::{
    DueNotification, Emission, FavoritesSource, Notice, ReconciliationEngine, SearchTicket,
    WriteIntent, WriteOp, WriteResolution, WriteTicket,
};
pub use error::SyncError;
pub use search::{Category, DistanceUnit, PlaceCandidate, SearchRequest};
