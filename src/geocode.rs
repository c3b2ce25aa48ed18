//! Cached, de-duplicated address resolution.

use std::sync::Arc;
use std::time::Duration;

use rayon::prelude::*;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::cache::{Admission, TtlCache};
use crate::error::GeocodeFailure;
use crate::model::{Coordinate, Stop};
use crate::traits::Geocoder;

/// Geocode cache: normalized address -> coordinate or permanent failure.
pub type GeocodeCache = TtlCache<String, Result<Coordinate, GeocodeFailure>>;

const DEFAULT_NEGATIVE_TTL_SECS: u64 = 10 * 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ResolverOptions {
    /// How long a permanently bad address is remembered.
    pub negative_ttl_secs: u64,
}

impl Default for ResolverOptions {
    fn default() -> Self {
        Self {
            negative_ttl_secs: DEFAULT_NEGATIVE_TTL_SECS,
        }
    }
}

/// Resolves raw addresses through a shared [`GeocodeCache`].
#[derive(Debug)]
pub struct AddressResolver<G> {
    geocoder: G,
    cache: Arc<GeocodeCache>,
    options: ResolverOptions,
}

impl<G: Geocoder> AddressResolver<G> {
    pub fn new(geocoder: G, cache: Arc<GeocodeCache>) -> Self {
        Self::with_options(geocoder, cache, ResolverOptions::default())
    }

    pub fn with_options(geocoder: G, cache: Arc<GeocodeCache>, options: ResolverOptions) -> Self {
        Self {
            geocoder,
            cache,
            options,
        }
    }

    pub fn cache(&self) -> &Arc<GeocodeCache> {
        &self.cache
    }

    /// Resolve one address. At most one external lookup is issued per
    /// normalized address while its cache entry is fresh, regardless of how
    /// many threads ask at once.
    pub fn resolve(&self, raw: &str) -> Result<Coordinate, GeocodeFailure> {
        let key = normalize_address(raw);
        if key.is_empty() {
            return Err(GeocodeFailure::EmptyAddress);
        }

        let negative_ttl = Duration::from_secs(self.options.negative_ttl_secs);
        self.cache.get_or_load(key.clone(), || {
            debug!(address = %key, "geocode cache miss");
            let outcome = self.geocoder.geocode(raw).and_then(|coordinate| {
                if coordinate.is_valid() {
                    Ok(coordinate)
                } else {
                    Err(GeocodeFailure::NotFound)
                }
            });
            let admission = match &outcome {
                Ok(_) => Admission::Store,
                Err(failure) if failure.is_permanent() => Admission::StoreFor(negative_ttl),
                Err(failure) => {
                    warn!(address = %key, error = %failure, "geocoder unavailable, not caching");
                    Admission::Skip
                }
            };
            (outcome, admission)
        })
    }

    /// Resolve every unresolved stop, preserving input order.
    pub fn resolve_stops(&self, stops: Vec<Stop>) -> Vec<Stop> {
        let resolved: Vec<Stop> = stops
            .into_par_iter()
            .map(|stop| {
                if stop.is_resolved() {
                    return stop;
                }
                let outcome = self.resolve(&stop.address);
                stop.with_resolution(outcome)
            })
            .collect();

        let failed = resolved.iter().filter(|stop| !stop.is_resolved()).count();
        debug!(total = resolved.len(), failed, "resolved stop addresses");
        resolved
    }
}

/// Canonical form of an address used as the cache key.
///
/// Lower-cases, trims, collapses runs of whitespace and removes whitespace
/// before commas, so `" 12 Main St ,Springfield"` and `"12 main st, springfield"`
/// share an entry.
pub fn normalize_address(raw: &str) -> String {
    let collapsed = raw.split_whitespace().collect::<Vec<_>>().join(" ");
    let mut normalized = String::with_capacity(collapsed.len());
    for part in collapsed.split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        if !normalized.is_empty() {
            normalized.push_str(", ");
        }
        normalized.push_str(part);
    }
    normalized.to_lowercase()
}
