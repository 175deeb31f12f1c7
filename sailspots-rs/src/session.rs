use std::cell::RefCell;
use std::sync::LazyLock;

use futures::StreamExt;
use spot_cache::SpotCache;
use tether::search::prepare_results;
use tether::{
    Category, Coordinate, Emission, FavoriteIds, FavoriteRecord, ListenerKey, Notice, Place,
    PresentationItem, ReconciliationEngine, SearchRequest, SyncError, WriteOp, WriteResolution,
};
use tokio_util::sync::CancellationToken;

use crate::config::SessionConfig;
use crate::places::SearchProvider;
use crate::registry::FavoriteRegistry;

// putting this inside LOGGER prevents us from accidentally initializing the logger more than once
static LOGGER: LazyLock<()> = LazyLock::new(|| {
    if env_logger::try_init().is_ok() {
        log::info!("Logging initialized");
    }
});

/// One signed-in user's view of their spots. Every screen subscribes to the same session.
///
/// Not `Send`: everything runs on the thread that owns it, and the engine is only ever borrowed
/// between awaits, never across one.
pub struct Session<R: FavoriteRegistry, P: SearchProvider> {
    engine: RefCell<ReconciliationEngine>,
    registry: R,
    provider: P,
    cache: Option<SpotCache>,
    config: SessionConfig,
    search_cancel: RefCell<Option<CancellationToken>>,
    subscription_cancel: RefCell<Option<CancellationToken>>,
}

impl<R: FavoriteRegistry, P: SearchProvider> Session<R, P> {
    /// Opens the cache at `config.cache_path` if there is one. A cache that fails to open is
    /// logged and skipped.
    pub fn new(registry: R, provider: P, config: SessionConfig) -> Self {
        let cache = config.cache_path.as_ref().and_then(|path| {
            SpotCache::open(path)
                .inspect_err(|e| {
                    log::error!("Error opening spot cache at {}: {e}", path.display());
                })
                .ok()
        });
        Self::with_cache(registry, provider, config, cache)
    }

    pub fn with_cache(
        registry: R,
        provider: P,
        config: SessionConfig,
        cache: Option<SpotCache>,
    ) -> Self {
        LazyLock::force(&LOGGER);

        let mut engine = ReconciliationEngine::new();
        if let Some(cache) = &cache {
            match cache.favorite_ids() {
                Ok(ids) => {
                    log::debug!("Seeding {} favorites from the spot cache", ids.len());
                    engine.seed_favorites(ids);
                }
                Err(e) => log::error!("Error reading cached favorites: {e}"),
            }
        }

        Self {
            engine: RefCell::new(engine),
            registry,
            provider,
            cache,
            config,
            search_cancel: RefCell::new(None),
            subscription_cancel: RefCell::new(None),
        }
    }

    // =======
    // search
    // =======

    /// Search with the configured radius around `center` (default center if `None`).
    pub async fn search_near(
        &self,
        center: Option<Coordinate>,
        category: Option<Category>,
    ) -> bool {
        let request = self.config.search_request(center, category);
        self.search(request).await
    }

    /// Replace the current places with a fresh search. A newer call cancels this one.
    /// Returns whether this search's outcome was applied.
    pub async fn search(&self, request: SearchRequest) -> bool {
        let token = CancellationToken::new();
        if let Some(previous) = self.search_cancel.replace(Some(token.clone())) {
            previous.cancel();
        }
        let ticket = self.engine.borrow_mut().begin_search();

        let outcome = tokio::select! {
            biased;
            _ = token.cancelled() => {
                log::debug!("Search superseded before the provider answered");
                return false;
            }
            outcome = self.provider.search(&request) => outcome,
        };
        let outcome = outcome.map(|candidates| prepare_results(candidates, &request));

        let _flusher = FlushLater::new(self);
        let applied = self.engine.borrow_mut().complete_search(ticket, outcome);
        applied
    }

    // =======
    // favorites
    // =======

    /// Flip the favorite immediately, then write it through to the registry.
    /// `None` when `id` isn't one of the current places.
    pub async fn toggle_favorite(&self, id: &str) -> Option<WriteResolution> {
        let intent = {
            let _flusher = FlushLater::new(self);
            let intent = self.engine.borrow_mut().toggle_favorite(id);
            match intent {
                Ok(intent) => intent,
                Err(e) => {
                    log::error!("Ignoring favorite toggle: {e}");
                    return None;
                }
            }
        };

        let outcome = match &intent.op {
            WriteOp::Upsert(record) => self.registry.upsert(intent.id(), record).await,
            WriteOp::Delete => self.registry.delete(intent.id()).await,
        };
        if outcome.is_ok() {
            self.mirror_write(&intent.op, intent.id());
        }

        let _flusher = FlushLater::new(self);
        let resolution = self
            .engine
            .borrow_mut()
            .complete_write(&intent.ticket, outcome);
        Some(resolution)
    }

    /// Apply registry snapshots until [`Self::unsubscribe_favorites`] or the subscription fails.
    pub async fn run_favorites_subscription(&self) {
        let token = CancellationToken::new();
        if let Some(previous) = self.subscription_cancel.replace(Some(token.clone())) {
            previous.cancel();
        }

        let mut subscription = self.registry.subscribe();
        loop {
            let next = tokio::select! {
                biased;
                _ = token.cancelled() => break,
                next = subscription.next() => next,
            };
            if token.is_cancelled() {
                break;
            }

            let _flusher = FlushLater::new(self);
            match next {
                Some(Ok(ids)) => {
                    self.prune_cache(&ids);
                    self.engine.borrow_mut().submit_favorite_snapshot(ids);
                }
                Some(Err(reason)) => {
                    self.engine.borrow_mut().subscription_lost(reason);
                    break;
                }
                None => {
                    self.engine
                        .borrow_mut()
                        .subscription_lost(SyncError::SubscriptionLost(
                            "registry closed the subscription".to_string(),
                        ));
                    break;
                }
            }
        }

        subscription.unsubscribe();
    }

    /// No snapshot is applied after this returns.
    pub fn unsubscribe_favorites(&self) {
        if let Some(token) = self.subscription_cancel.take() {
            token.cancel();
        }
    }

    /// Every current favorite, fetched by identifier, sorted by name.
    /// Records the registry returns are copied into the cache. When the registry can't be reached
    /// the cached copy of a record is used instead.
    pub async fn favorites_view(&self) -> Vec<PresentationItem> {
        let ids: Vec<String> = self.engine.borrow().favorite_ids().iter().cloned().collect();
        let fetched = futures::future::join_all(ids.iter().map(|id| self.registry.get_by_id(id))).await;

        let mut fresh = Vec::new();
        let mut cached = Vec::new();
        for (id, result) in ids.iter().zip(fetched) {
            match result {
                Ok(Some(record)) => fresh.push(record),
                Ok(None) => log::debug!("Favorite {id} has no record"),
                Err(e) => {
                    log::warn!("Couldn't fetch favorite {id} ({e}), using cached copy");
                    cached.extend(self.cached_favorite(id));
                }
            }
        }
        self.mirror_records(&fresh);

        self.engine
            .borrow()
            .favorites_view(fresh.into_iter().chain(cached))
    }

    fn cached_favorite(&self, id: &str) -> Option<FavoriteRecord> {
        self.cache
            .as_ref()?
            .get(id)
            .inspect_err(|e| log::error!("Error reading cached favorite {id}: {e}"))
            .ok()
            .flatten()
            .and_then(|spot| spot.to_record())
    }

    fn mirror_records(&self, records: &[FavoriteRecord]) {
        let Some(cache) = &self.cache else {
            return;
        };
        if records.is_empty() {
            return;
        }
        match cache.upsert_all(records) {
            Ok(count) => log::debug!("Cached {count} favorite records"),
            Err(e) => log::error!("Error caching favorite records: {e}"),
        }
    }

    fn mirror_write(&self, op: &WriteOp, id: &str) {
        let Some(cache) = &self.cache else {
            return;
        };
        let result = match op {
            WriteOp::Upsert(record) => cache.upsert(record),
            WriteOp::Delete => cache.delete(id).map(|_| ()),
        };
        if let Err(e) = result {
            log::error!("Error mirroring favorite {id} to the spot cache: {e}");
        }
    }

    fn prune_cache(&self, ids: &[String]) {
        let Some(cache) = &self.cache else {
            return;
        };
        if let Err(e) = cache.retain_only(ids.iter().map(String::as_str)) {
            log::error!("Error pruning the spot cache: {e}");
        }
    }

    // =======
    // navigation
    // =======

    /// The place behind a tapped item. No state changes.
    pub fn select_item(&self, id: &str) -> Option<Place> {
        self.engine
            .borrow()
            .select_item(id)
            .cloned()
            .inspect_err(|e| log::error!("Ignoring selection: {e}"))
            .ok()
    }

    // =======
    // listeners
    // =======

    /// The callback receives the current list right away, then every change.
    pub fn subscribe_items(&self, callback: impl Fn(&Emission) + 'static) -> ListenerKey {
        let _flusher = FlushLater::new(self);
        let key = self.engine.borrow_mut().register_item_listener(callback);
        key
    }

    pub fn subscribe_notices(&self, callback: impl Fn(&Notice) + 'static) -> ListenerKey {
        self.engine.borrow_mut().register_notice_listener(callback)
    }

    pub fn unsubscribe(&self, key: ListenerKey) -> bool {
        self.engine.borrow_mut().unregister_listener(key)
    }

    fn flush_notifications(&self) {
        // do it like this to avoid holding the borrow while we call the callbacks,
        // which are free to call straight back into the session
        let notifications = self.engine.borrow_mut().drain_due_notifications();
        for notification in notifications {
            let listening = self.engine.borrow().is_listening(notification.listener());
            if listening {
                notification.run();
            }
        }
    }

    // =======
    // reads
    // =======

    pub fn items(&self) -> im::Vector<PresentationItem> {
        self.engine.borrow().presentation()
    }

    pub fn favorite_ids(&self) -> FavoriteIds {
        self.engine.borrow().favorite_ids()
    }

    pub fn is_favorite(&self, id: &str) -> bool {
        self.engine.borrow().is_favorite(id)
    }

    pub fn subscription_healthy(&self) -> bool {
        self.engine.borrow().subscription_error().is_none()
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn cache(&self) -> Option<&SpotCache> {
        self.cache.as_ref()
    }
}

struct FlushLater<'a, R: FavoriteRegistry, P: SearchProvider> {
    session: &'a Session<R, P>,
}

impl<'a, R: FavoriteRegistry, P: SearchProvider> FlushLater<'a, R, P> {
    fn new(session: &'a Session<R, P>) -> Self {
        Self { session }
    }
}

impl<R: FavoriteRegistry, P: SearchProvider> Drop for FlushLater<'_, R, P> {
    fn drop(&mut self) {
        self.session.flush_notifications();
    }
}
