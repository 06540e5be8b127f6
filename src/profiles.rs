use std::collections::HashMap;
use std::slice;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, instrument, warn};

use crate::capabilities::{ApiError, ModApiClient, ModStore};
use crate::coalesce::{Admission, InFlightTable};
use crate::model::{ModFilter, ModId, ModProfile, RequestPage};
use crate::page_cache::PagedResultCache;

#[derive(Debug, Default)]
pub struct ProfileMetrics {
    page_cache_hits: AtomicU64,
    page_network_fetches: AtomicU64,
    entity_cache_hits: AtomicU64,
    entity_store_hits: AtomicU64,
    entity_network_fetches: AtomicU64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ProfileMetricsSnapshot {
    pub page_cache_hits: u64,
    pub page_network_fetches: u64,
    pub entity_cache_hits: u64,
    pub entity_store_hits: u64,
    pub entity_network_fetches: u64,
}

impl ProfileMetrics {
    fn snapshot(&self) -> ProfileMetricsSnapshot {
        ProfileMetricsSnapshot {
            page_cache_hits: self.page_cache_hits.load(Ordering::Relaxed),
            page_network_fetches: self.page_network_fetches.load(Ordering::Relaxed),
            entity_cache_hits: self.entity_cache_hits.load(Ordering::Relaxed),
            entity_store_hits: self.entity_store_hits.load(Ordering::Relaxed),
            entity_network_fetches: self.entity_network_fetches.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Default)]
struct ProfileState {
    pages: PagedResultCache<ModFilter, ModProfile>,
    entities: HashMap<ModId, ModProfile>,
}

/// Cached access to mod profiles.
///
/// Paged queries are answered from per-filter merged windows; individual
/// lookups resolve through memory, then the durable mod store, then the
/// network. Everything fetched from the network is folded back into both
/// caches and written through to the store.
pub struct ModProfileService {
    api: Arc<dyn ModApiClient>,
    mod_store: Arc<dyn ModStore>,
    state: Mutex<ProfileState>,
    in_flight: InFlightTable<ModId, Option<ModProfile>, ApiError>,
    metrics: ProfileMetrics,
}

impl ModProfileService {
    #[must_use]
    pub fn new(api: Arc<dyn ModApiClient>, mod_store: Arc<dyn ModStore>) -> Self {
        Self {
            api,
            mod_store,
            state: Mutex::new(ProfileState::default()),
            in_flight: InFlightTable::new(),
            metrics: ProfileMetrics::default(),
        }
    }

    /// Fetches `[offset, offset + count)` of the results matching `filter`,
    /// from cache when the merged window already covers the range.
    ///
    /// A network failure is returned verbatim and leaves the cache
    /// untouched, so the same request is safe to retry.
    #[instrument(skip(self, filter))]
    pub async fn fetch_page(
        &self,
        filter: &ModFilter,
        offset: usize,
        count: usize,
    ) -> Result<RequestPage<ModProfile>, ApiError> {
        if let Some(page) = self.state.lock().pages.serve(filter, offset, count) {
            self.metrics.page_cache_hits.fetch_add(1, Ordering::Relaxed);
            return Ok(page);
        }

        self.metrics
            .page_network_fetches
            .fetch_add(1, Ordering::Relaxed);
        let page = self.api.fetch_mods_page(filter, offset, count).await?;
        debug!(
            items = page.items.len(),
            total = page.result_total,
            "page fetched"
        );

        let served = {
            let mut state = self.state.lock();
            state.pages.merge(filter, &page);
            for profile in &page.items {
                state.entities.insert(profile.id, profile.clone());
            }
            state.pages.serve(filter, offset, count)
        };
        self.write_through(&page.items);

        // The merged window covers the requested range now; the fallback
        // only matters if the server under-delivered.
        Ok(served.unwrap_or(page))
    }

    /// Resolves one profile: memory, then the durable store, then the
    /// network. Concurrent calls for the same uncached id share a single
    /// network fetch. A remote 404 resolves to `None`, not an error.
    #[instrument(skip(self))]
    pub async fn get_by_id(&self, id: ModId) -> Result<Option<ModProfile>, ApiError> {
        if let Some(profile) = self.state.lock().entities.get(&id) {
            self.metrics.entity_cache_hits.fetch_add(1, Ordering::Relaxed);
            return Ok(Some(profile.clone()));
        }

        match self.mod_store.load_by_id(id) {
            Ok(Some(profile)) => {
                self.metrics.entity_store_hits.fetch_add(1, Ordering::Relaxed);
                self.state.lock().entities.insert(id, profile.clone());
                return Ok(Some(profile));
            }
            Ok(None) => {}
            Err(e) => warn!(mod_id = %id, error = %e, "mod store lookup failed"),
        }

        match self.in_flight.admit(&id) {
            Admission::Follow(rx) => match rx.await {
                Ok(result) => result,
                Err(_) => Err(ApiError::Cancelled),
            },
            Admission::Lead => {
                self.metrics
                    .entity_network_fetches
                    .fetch_add(1, Ordering::Relaxed);
                let result = match self.api.fetch_mod(id).await {
                    Ok(profile) => {
                        self.state.lock().entities.insert(id, profile.clone());
                        self.write_through(slice::from_ref(&profile));
                        Ok(Some(profile))
                    }
                    Err(e) if e.status() == Some(404) => Ok(None),
                    Err(e) => Err(e),
                };
                self.in_flight.settle(&id, &result);
                result
            }
        }
    }

    /// Resolves a batch of profiles, preserving input order and length.
    ///
    /// Only the ids still missing after memory and the durable store go to
    /// the network, in one request. Ids the server does not return stay
    /// `None` rather than failing the batch.
    #[instrument(skip(self, ordered_ids), fields(requested = ordered_ids.len()))]
    pub async fn get_by_ids(
        &self,
        ordered_ids: &[ModId],
    ) -> Result<Vec<Option<ModProfile>>, ApiError> {
        let mut results: Vec<Option<ModProfile>> = Vec::with_capacity(ordered_ids.len());
        let mut missing: Vec<ModId> = Vec::new();

        {
            let state = self.state.lock();
            for id in ordered_ids {
                match state.entities.get(id) {
                    Some(profile) => {
                        self.metrics.entity_cache_hits.fetch_add(1, Ordering::Relaxed);
                        results.push(Some(profile.clone()));
                    }
                    None => {
                        results.push(None);
                        if !missing.contains(id) {
                            missing.push(*id);
                        }
                    }
                }
            }
        }

        if !missing.is_empty() {
            match self.mod_store.load_by_ids(&missing) {
                Ok(found) => {
                    let mut state = self.state.lock();
                    for profile in found {
                        self.metrics.entity_store_hits.fetch_add(1, Ordering::Relaxed);
                        missing.retain(|id| *id != profile.id);
                        splice(&mut results, ordered_ids, &profile);
                        state.entities.insert(profile.id, profile);
                    }
                }
                Err(e) => warn!(error = %e, "mod store batch lookup failed"),
            }
        }

        if missing.is_empty() {
            return Ok(results);
        }

        self.metrics
            .entity_network_fetches
            .fetch_add(1, Ordering::Relaxed);
        let filter = ModFilter::default().with_ids(missing.clone());
        let page = self.api.fetch_mods_page(&filter, 0, missing.len()).await?;

        {
            let mut state = self.state.lock();
            for profile in &page.items {
                state.entities.insert(profile.id, profile.clone());
            }
        }
        for profile in &page.items {
            splice(&mut results, ordered_ids, profile);
        }
        self.write_through(&page.items);

        Ok(results)
    }

    /// Drops both caches. The durable store is left alone.
    pub fn reset(&self) {
        let mut state = self.state.lock();
        state.pages.reset();
        state.entities.clear();
    }

    #[must_use]
    pub fn metrics(&self) -> ProfileMetricsSnapshot {
        self.metrics.snapshot()
    }

    fn write_through(&self, profiles: &[ModProfile]) {
        for profile in profiles {
            if let Err(e) = self.mod_store.save(profile) {
                // Write-through is best effort; the store stays a fallback.
                warn!(mod_id = %profile.id, error = %e, "mod store write-through failed");
            }
        }
    }
}

/// Copies `profile` into every result position whose requested id matches.
fn splice(
    results: &mut [Option<ModProfile>],
    ordered_ids: &[ModId],
    profile: &ModProfile,
) {
    for (slot, id) in results.iter_mut().zip(ordered_ids) {
        if *id == profile.id {
            *slot = Some(profile.clone());
        }
    }
}
