use std::fmt;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use lru::LruCache;
use parking_lot::Mutex;
use thiserror::Error;
use tracing::{debug, instrument, warn};
use url::Url;

use crate::capabilities::{ApiError, ModApiClient};
use crate::coalesce::{Admission, InFlightTable};

pub const DEFAULT_FETCH_CACHE_CAPACITY: usize = 256;

#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum FetchKeyError {
    #[error("invalid url '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("unsupported scheme '{scheme}', only http and https are allowed")]
    UnsupportedScheme { scheme: String },

    #[error("url has no host")]
    MissingHost,
}

/// Validated absolute http(s) URL, used as the coalescing key for raw
/// resource fetches. Normalised through a full parse so two spellings of
/// the same URL land on one cache entry.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct FetchKey(String);

impl FetchKey {
    pub fn new(url: impl Into<String>) -> Result<Self, FetchKeyError> {
        let url = url.into();
        let parsed = Url::parse(&url).map_err(|e| FetchKeyError::InvalidUrl {
            url: url.clone(),
            reason: e.to_string(),
        })?;

        match parsed.scheme() {
            "http" | "https" => {}
            other => {
                return Err(FetchKeyError::UnsupportedScheme {
                    scheme: other.to_string(),
                })
            }
        }

        if parsed.host_str().is_none() {
            return Err(FetchKeyError::MissingHost);
        }

        Ok(Self(parsed.to_string()))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FetchKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Clone, Debug)]
pub struct FetchConfig {
    pub cache_capacity: usize,
    /// Keep fetched bytes across [`FetchCoalescer::deactivate`] calls.
    pub retain_cache_on_deactivate: bool,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            cache_capacity: DEFAULT_FETCH_CACHE_CAPACITY,
            retain_cache_on_deactivate: false,
        }
    }
}

#[derive(Debug, Default)]
pub struct FetchMetrics {
    cache_hits: AtomicU64,
    coalesced_waits: AtomicU64,
    network_fetches: AtomicU64,
    failures: AtomicU64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FetchMetricsSnapshot {
    pub cache_hits: u64,
    pub coalesced_waits: u64,
    pub network_fetches: u64,
    pub failures: u64,
}

impl FetchMetrics {
    fn snapshot(&self) -> FetchMetricsSnapshot {
        FetchMetricsSnapshot {
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            coalesced_waits: self.coalesced_waits.load(Ordering::Relaxed),
            network_fetches: self.network_fetches.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
        }
    }
}

/// URL-keyed byte fetches with caching and request coalescing.
///
/// Exactly one network fetch runs per key per in-flight episode no matter
/// how many callers ask; successful bodies land in a bounded LRU cache for
/// synchronous hits afterwards. Failures leave the cache untouched and are
/// delivered verbatim to every waiting caller.
pub struct FetchCoalescer {
    api: Arc<dyn ModApiClient>,
    cache: Mutex<LruCache<FetchKey, Bytes>>,
    in_flight: InFlightTable<FetchKey, Bytes, ApiError>,
    config: FetchConfig,
    metrics: FetchMetrics,
}

impl FetchCoalescer {
    #[must_use]
    pub fn new(api: Arc<dyn ModApiClient>, config: FetchConfig) -> Self {
        let capacity =
            NonZeroUsize::new(config.cache_capacity).unwrap_or(NonZeroUsize::MIN);

        Self {
            api,
            cache: Mutex::new(LruCache::new(capacity)),
            in_flight: InFlightTable::new(),
            config,
            metrics: FetchMetrics::default(),
        }
    }

    #[instrument(skip(self), fields(key = %key))]
    pub async fn request(&self, key: &FetchKey) -> Result<Bytes, ApiError> {
        if let Some(bytes) = self.cache.lock().get(key) {
            self.metrics.cache_hits.fetch_add(1, Ordering::Relaxed);
            return Ok(bytes.clone());
        }

        match self.in_flight.admit(key) {
            Admission::Follow(rx) => {
                self.metrics.coalesced_waits.fetch_add(1, Ordering::Relaxed);
                match rx.await {
                    Ok(result) => result,
                    Err(_) => Err(ApiError::Cancelled),
                }
            }
            Admission::Lead => {
                self.metrics.network_fetches.fetch_add(1, Ordering::Relaxed);
                let result = self.api.fetch_url(key).await;

                match &result {
                    Ok(bytes) => {
                        self.cache.lock().put(key.clone(), bytes.clone());
                        debug!(bytes = bytes.len(), "fetched and cached");
                    }
                    Err(e) => {
                        self.metrics.failures.fetch_add(1, Ordering::Relaxed);
                        warn!(error = %e, "fetch failed");
                    }
                }

                self.in_flight.settle(key, &result);
                result
            }
        }
    }

    /// Host-lifecycle hook: drops the byte cache unless configured to
    /// retain it. In-flight episodes are unaffected.
    pub fn deactivate(&self) {
        if !self.config.retain_cache_on_deactivate {
            self.cache.lock().clear();
        }
    }

    #[must_use]
    pub fn cached_len(&self) -> usize {
        self.cache.lock().len()
    }

    #[must_use]
    pub fn metrics(&self) -> FetchMetricsSnapshot {
        self.metrics.snapshot()
    }
}
