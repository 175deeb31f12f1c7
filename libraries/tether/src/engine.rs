//! # ReconciliationEngine
//! Owns the latest search results and the latest favorite set, and is the only thing allowed to change either.
//!
//! Every public mutation queues notifications instead of calling listeners directly. The owner drains them with
//! [`ReconciliationEngine::drain_due_notifications`] once it has released its borrow of the engine, since listeners
//! will often call straight back in.

use std::collections::HashMap;
use std::rc::Rc;

use slotmap::SlotMap;

use crate::SyncError;
use crate::data_model::{
    FavoriteIds, FavoriteRecord, ListDiff, ListenerKey, Place, PlaceId, PresentationItem,
};
use crate::merge;

/// Identifies one remote write issued by [`ReconciliationEngine::toggle_favorite`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WriteTicket {
    id: PlaceId,
    seq: u64,
    wants_favorite: bool,
}

impl WriteTicket {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn wants_favorite(&self) -> bool {
        self.wants_favorite
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum WriteOp {
    /// Full-record replace. Never a flag-only update.
    Upsert(FavoriteRecord),
    Delete,
}

/// The remote write the caller must perform, then report through [`ReconciliationEngine::complete_write`].
#[derive(Clone, Debug, PartialEq)]
pub struct WriteIntent {
    pub ticket: WriteTicket,
    pub op: WriteOp,
}

impl WriteIntent {
    pub fn id(&self) -> &str {
        self.ticket.id()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WriteResolution {
    /// Remote agreed with the optimistic state.
    Confirmed,
    /// Remote refused and membership went back to its pre-toggle value.
    RolledBack,
    /// Remote refused, but a snapshot arrived in the meantime and its answer stands.
    KeptSnapshot,
    /// A newer toggle of the same identifier owns the outcome now.
    Superseded,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SearchTicket(u64);

/// Where the current favorite set came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FavoritesSource {
    Nothing,
    Cache,
    Remote,
}

/// Transient feedback for the user. Nothing here changes what the item stream shows.
#[derive(Clone, Debug, PartialEq)]
pub enum Notice {
    ToggleFailed {
        id: PlaceId,
        wanted: bool,
        reason: SyncError,
    },
    SearchFailed {
        reason: SyncError,
    },
    SubscriptionLost {
        reason: SyncError,
    },
}

/// What item listeners receive. Replace-on-every-emit: `items` is always the whole list.
#[derive(Clone, Debug, PartialEq)]
pub struct Emission {
    pub items: im::Vector<PresentationItem>,
    pub diff: ListDiff,
}

enum Listener {
    Items(Rc<dyn Fn(&Emission)>),
    Notices(Rc<dyn Fn(&Notice)>),
}

/// A listener call that is ready to run. Check the listener is still registered right before running it.
pub struct DueNotification {
    listener: ListenerKey,
    run: Box<dyn FnOnce()>,
}

impl DueNotification {
    pub fn listener(&self) -> ListenerKey {
        self.listener
    }

    pub fn run(self) {
        (self.run)()
    }
}

/// Unresolved writes for one identifier. Rapid toggles share a single entry.
struct PendingWrite {
    /// Latest toggle. Only its outcome decides what the user sees.
    seq: u64,
    /// `snapshot_generation` at the latest toggle.
    generation: u64,
    /// Membership the registry holds as far as we know: the value before the first unresolved
    /// toggle, moved along whenever one of the writes lands.
    baseline: bool,
    in_flight: usize,
    /// The latest write failed, so later completions of older writes settle on `baseline`.
    latest_failed: bool,
}

pub struct ReconciliationEngine {
    places: im::Vector<Place>,
    favorite_ids: FavoriteIds,
    favorites_source: FavoritesSource,
    snapshot_generation: u64,
    subscription_error: Option<SyncError>,

    pending_writes: HashMap<PlaceId, PendingWrite>,
    next_write_seq: u64,
    latest_search: u64,

    listeners: SlotMap<ListenerKey, Listener>,
    items_dirty: bool,
    fresh_item_listeners: Vec<ListenerKey>,
    last_delivered: im::Vector<PresentationItem>,
    due_notices: Vec<Notice>,
}

impl Default for ReconciliationEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl ReconciliationEngine {
    pub fn new() -> Self {
        Self {
            places: im::Vector::new(),
            favorite_ids: FavoriteIds::new(),
            favorites_source: FavoritesSource::Nothing,
            snapshot_generation: 0,
            subscription_error: None,
            pending_writes: HashMap::new(),
            next_write_seq: 0,
            latest_search: 0,
            listeners: SlotMap::with_key(),
            items_dirty: false,
            fresh_item_listeners: Vec::new(),
            last_delivered: im::Vector::new(),
            due_notices: Vec::new(),
        }
    }

    // =======
    // inbound
    // =======

    /// Replace the current places wholesale.
    pub fn submit_search_results(&mut self, places: impl IntoIterator<Item = Place>) {
        self.places = merge::usable_places(places);
        self.items_dirty = true;
    }

    /// Replace the favorite set wholesale with what the registry pushed.
    /// An empty snapshot is a real transition to zero favorites, not something to skip.
    pub fn submit_favorite_snapshot<I, S>(&mut self, ids: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<PlaceId>,
    {
        self.favorite_ids = ids
            .into_iter()
            .map(Into::into)
            .filter(|id: &PlaceId| !id.trim().is_empty())
            .collect();
        self.snapshot_generation += 1;
        self.favorites_source = FavoritesSource::Remote;
        self.subscription_error = None;
        self.items_dirty = true;
    }

    /// Use a locally cached favorite set until the registry delivers its first snapshot.
    /// Returns false (and changes nothing) once a remote snapshot has been seen.
    pub fn seed_favorites<I, S>(&mut self, ids: I) -> bool
    where
        I: IntoIterator<Item = S>,
        S: Into<PlaceId>,
    {
        if self.favorites_source == FavoritesSource::Remote {
            log::debug!("Ignoring cached favorites, registry already delivered a snapshot");
            return false;
        }
        self.favorite_ids = ids
            .into_iter()
            .map(Into::into)
            .filter(|id: &PlaceId| !id.trim().is_empty())
            .collect();
        self.favorites_source = FavoritesSource::Cache;
        self.items_dirty = true;
        true
    }

    /// The registry subscription errored. We keep the last known set: stale favorites beat
    /// an empty set that claims the user has none.
    pub fn subscription_lost(&mut self, reason: SyncError) {
        log::warn!(
            "Favorites subscription lost ({reason}), keeping {} known favorites",
            self.favorite_ids.len()
        );
        self.subscription_error = Some(reason.clone());
        self.due_notices.push(Notice::SubscriptionLost { reason });
    }

    /// Flip membership immediately and return the remote write to perform.
    ///
    /// Fails with [`SyncError::InvalidIdentifier`] when `id` is empty or not among the current places.
    pub fn toggle_favorite(&mut self, id: &str) -> Result<WriteIntent, SyncError> {
        if id.trim().is_empty() {
            return Err(SyncError::InvalidIdentifier(id.to_string()));
        }
        let Some(place) = self.places.iter().find(|place| place.id() == id) else {
            return Err(SyncError::InvalidIdentifier(id.to_string()));
        };
        let record = FavoriteRecord::from_place(place);

        let was_favorite = self.favorite_ids.contains(id);
        let wants_favorite = !was_favorite;
        self.set_membership(id, wants_favorite);

        let seq = self.next_write_seq;
        self.next_write_seq += 1;
        let generation = self.snapshot_generation;
        let pending = self
            .pending_writes
            .entry(id.to_string())
            .or_insert(PendingWrite {
                seq,
                generation,
                baseline: was_favorite,
                in_flight: 0,
                latest_failed: false,
            });
        if pending.in_flight > 0 {
            log::debug!("Toggle of {id} supersedes an unresolved write");
        }
        if pending.generation != generation {
            // a snapshot settled membership since the last toggle
            pending.baseline = was_favorite;
        }
        pending.seq = seq;
        pending.generation = generation;
        pending.in_flight += 1;
        pending.latest_failed = false;

        let ticket = WriteTicket {
            id: id.to_string(),
            seq,
            wants_favorite,
        };
        let op = if wants_favorite {
            WriteOp::Upsert(record)
        } else {
            WriteOp::Delete
        };
        Ok(WriteIntent { ticket, op })
    }

    /// Report how the remote write for `ticket` went.
    ///
    /// A failure of the latest write for an identifier reverts membership to what the registry last
    /// held, unless a snapshot arrived since the toggle or membership no longer holds the optimistic
    /// value. Then the registry has spoken and we leave it be. Older writes never override a newer
    /// toggle, but once that toggle has failed their outcome decides what the registry holds.
    pub fn complete_write(
        &mut self,
        ticket: &WriteTicket,
        outcome: Result<(), SyncError>,
    ) -> WriteResolution {
        let current_generation = self.snapshot_generation;
        let Some(pending) = self.pending_writes.get_mut(&ticket.id) else {
            if let Err(reason) = outcome {
                self.record_write_failure(ticket, reason);
            }
            return WriteResolution::Superseded;
        };

        let is_latest = pending.seq == ticket.seq;
        let snapshot_since = pending.generation != current_generation;
        pending.in_flight = pending.in_flight.saturating_sub(1);
        if outcome.is_ok() && !snapshot_since {
            pending.baseline = ticket.wants_favorite;
        }
        if is_latest {
            pending.latest_failed = outcome.is_err();
        }
        let baseline = pending.baseline;
        let settle_on_baseline = pending.latest_failed && !snapshot_since;
        if pending.in_flight == 0 {
            self.pending_writes.remove(&ticket.id);
        }

        if let Err(reason) = outcome {
            self.record_write_failure(ticket, reason);
        } else if is_latest {
            return WriteResolution::Confirmed;
        }

        if !is_latest {
            if settle_on_baseline && self.is_favorite(&ticket.id) != baseline {
                log::info!("Favorite {} settled by an older write", ticket.id);
                self.set_membership(&ticket.id, baseline);
            }
            return WriteResolution::Superseded;
        }

        if snapshot_since {
            log::info!(
                "Not rolling back {}: a newer snapshot already settled it",
                ticket.id
            );
            return WriteResolution::KeptSnapshot;
        }
        if self.is_favorite(&ticket.id) != ticket.wants_favorite {
            return WriteResolution::KeptSnapshot;
        }

        if baseline != ticket.wants_favorite {
            self.set_membership(&ticket.id, baseline);
        }
        log::info!("Rolled back favorite {}", ticket.id);
        WriteResolution::RolledBack
    }

    fn record_write_failure(&mut self, ticket: &WriteTicket, reason: SyncError) {
        log::warn!(
            "Failed to {} favorite {}: {reason}",
            if ticket.wants_favorite { "add" } else { "remove" },
            ticket.id
        );
        self.due_notices.push(Notice::ToggleFailed {
            id: ticket.id.clone(),
            wanted: ticket.wants_favorite,
            reason,
        });
    }

    /// Start a search. Only the ticket from the most recent call will be accepted by [`Self::complete_search`].
    pub fn begin_search(&mut self) -> SearchTicket {
        self.latest_search += 1;
        SearchTicket(self.latest_search)
    }

    /// Apply a search response if it belongs to the latest search. Returns whether it was applied.
    /// A failure leaves the current places untouched.
    pub fn complete_search(
        &mut self,
        ticket: SearchTicket,
        result: Result<Vec<Place>, SyncError>,
    ) -> bool {
        if ticket.0 != self.latest_search {
            log::debug!(
                "Discarding response for search {} (latest is {})",
                ticket.0,
                self.latest_search
            );
            return false;
        }

        match result {
            Ok(places) => self.submit_search_results(places),
            Err(reason) => {
                log::error!("Error searching for places: {reason}");
                self.due_notices.push(Notice::SearchFailed { reason });
            }
        }
        true
    }

    /// Navigation pass-through. No state changes.
    pub fn select_item(&self, id: &str) -> Result<&Place, SyncError> {
        self.places
            .iter()
            .find(|place| !id.is_empty() && place.id() == id)
            .ok_or_else(|| SyncError::InvalidIdentifier(id.to_string()))
    }

    fn set_membership(&mut self, id: &str, favorite: bool) {
        if favorite {
            self.favorite_ids.insert(id.to_string());
        } else {
            self.favorite_ids.remove(id);
        }
        self.items_dirty = true;
    }

    // =======
    // outbound
    // =======

    /// Register for the merged item list. The listener gets the current list on the next drain.
    pub fn register_item_listener(&mut self, listener: impl Fn(&Emission) + 'static) -> ListenerKey {
        let key = self.listeners.insert(Listener::Items(Rc::new(listener)));
        self.fresh_item_listeners.push(key);
        key
    }

    pub fn register_notice_listener(
        &mut self,
        listener: impl Fn(&Notice) + 'static,
    ) -> ListenerKey {
        self.listeners
            .insert(Listener::Notices(Rc::new(listener)))
    }

    pub fn unregister_listener(&mut self, key: ListenerKey) -> bool {
        self.fresh_item_listeners.retain(|fresh| *fresh != key);
        self.listeners.remove(key).is_some()
    }

    pub fn is_listening(&self, key: ListenerKey) -> bool {
        self.listeners.contains_key(key)
    }

    /// Collect every listener call that is due. Run them after releasing the engine.
    pub fn drain_due_notifications(&mut self) -> Vec<DueNotification> {
        let mut due = Vec::new();

        let fresh = std::mem::take(&mut self.fresh_item_listeners);
        if self.items_dirty || !fresh.is_empty() {
            let items = self.presentation();

            if !fresh.is_empty() {
                let emission = Rc::new(Emission {
                    diff: ListDiff::between(&im::Vector::<PresentationItem>::new(), &items),
                    items: items.clone(),
                });
                for key in &fresh {
                    self.queue_items(&mut due, *key, &emission);
                }
            }

            if self.items_dirty {
                let emission = Rc::new(Emission {
                    diff: ListDiff::between(&self.last_delivered, &items),
                    items: items.clone(),
                });
                let keys: Vec<ListenerKey> = self
                    .listeners
                    .iter()
                    .filter(|(key, listener)| {
                        matches!(listener, Listener::Items(_)) && !fresh.contains(key)
                    })
                    .map(|(key, _)| key)
                    .collect();
                for key in keys {
                    self.queue_items(&mut due, key, &emission);
                }
                self.items_dirty = false;
            }

            self.last_delivered = items;
        }

        for notice in std::mem::take(&mut self.due_notices) {
            let notice = Rc::new(notice);
            for (key, listener) in &self.listeners {
                if let Listener::Notices(callback) = listener {
                    let callback = Rc::clone(callback);
                    let notice = Rc::clone(&notice);
                    due.push(DueNotification {
                        listener: key,
                        run: Box::new(move || callback(&notice)),
                    });
                }
            }
        }

        due
    }

    fn queue_items(&self, due: &mut Vec<DueNotification>, key: ListenerKey, emission: &Rc<Emission>) {
        if let Some(Listener::Items(callback)) = self.listeners.get(key) {
            let callback = Rc::clone(callback);
            let emission = Rc::clone(emission);
            due.push(DueNotification {
                listener: key,
                run: Box::new(move || callback(&emission)),
            });
        }
    }

    // =======
    // reads
    // =======

    pub fn presentation(&self) -> im::Vector<PresentationItem> {
        merge::merge(&self.places, &self.favorite_ids)
    }

    /// Items for the favorites screen from records fetched by identifier.
    pub fn favorites_view(
        &self,
        records: impl IntoIterator<Item = FavoriteRecord>,
    ) -> Vec<PresentationItem> {
        merge::favorites_view(records, &self.favorite_ids)
    }

    pub fn places(&self) -> &im::Vector<Place> {
        &self.places
    }

    pub fn favorite_ids(&self) -> FavoriteIds {
        self.favorite_ids.clone()
    }

    pub fn is_favorite(&self, id: &str) -> bool {
        self.favorite_ids.contains(id)
    }

    pub fn favorites_source(&self) -> FavoritesSource {
        self.favorites_source
    }

    pub fn subscription_error(&self) -> Option<&SyncError> {
        self.subscription_error.as_ref()
    }

    pub fn has_pending_write(&self, id: &str) -> bool {
        self.pending_writes.contains_key(id)
    }

    pub fn pending_write_count(&self) -> usize {
        self.pending_writes.len()
    }
}
