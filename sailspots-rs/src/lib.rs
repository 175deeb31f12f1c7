//! Sessions for SailSpots: one [`Session`] per signed-in user, shared by every screen that shows spots.
//!
//! The session wires a [`tether::ReconciliationEngine`] to the remote favorites registry, the nearby-search
//! provider and the local spot cache, and marshals all their async completions back onto its own thread.

pub mod config;
pub mod memory_registry;
pub mod places;
pub mod registry;
mod session;

pub use config::{ConfigError, SessionConfig};
pub use memory_registry::MemoryRegistry;
pub use places::{GooglePlacesProvider, SearchProvider};
pub use registry::{FavoriteRegistry, RegistrySubscription, Snapshot};
pub use session::Session;
