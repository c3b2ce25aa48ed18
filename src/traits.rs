//! Seams to the external address and distance sources.
//!
//! Both sources are assumed to be rate-limited and slow. The core only talks
//! to them through these traits and caches around them.

use serde::Serialize;

use crate::error::{GeocodeFailure, SourceError};
use crate::model::Coordinate;

/// Turns a free-text address into a coordinate.
pub trait Geocoder: Send + Sync {
    fn geocode(&self, address: &str) -> Result<Coordinate, GeocodeFailure>;
}

/// Distance and travel time between two locations.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
pub struct TravelCost {
    pub distance_m: i32,
    pub duration_s: i32,
}

impl TravelCost {
    pub const ZERO: TravelCost = TravelCost {
        distance_m: 0,
        duration_s: 0,
    };

    pub const fn new(distance_m: i32, duration_s: i32) -> Self {
        Self {
            distance_m,
            duration_s,
        }
    }
}

/// Provides origin × destination tables of travel costs.
///
/// `table` returns one row per origin and one column per destination. A cell
/// is `None` when the source has no route between the two points.
pub trait DistanceSource: Send + Sync {
    fn table(
        &self,
        origins: &[Coordinate],
        destinations: &[Coordinate],
    ) -> Result<Vec<Vec<Option<TravelCost>>>, SourceError>;

    /// Upper bound on `origins.len() * destinations.len()` per request.
    fn max_elements(&self) -> usize {
        100
    }

    /// True for sources that approximate rather than route (e.g. haversine).
    fn is_estimate(&self) -> bool {
        false
    }
}

impl<T: Geocoder + ?Sized> Geocoder for &T {
    fn geocode(&self, address: &str) -> Result<Coordinate, GeocodeFailure> {
        (**self).geocode(address)
    }
}

impl<T: DistanceSource + ?Sized> DistanceSource for &T {
    fn table(
        &self,
        origins: &[Coordinate],
        destinations: &[Coordinate],
    ) -> Result<Vec<Vec<Option<TravelCost>>>, SourceError> {
        (**self).table(origins, destinations)
    }

    fn max_elements(&self) -> usize {
        (**self).max_elements()
    }

    fn is_estimate(&self) -> bool {
        (**self).is_estimate()
    }
}
