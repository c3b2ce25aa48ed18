//! Great-circle travel cost estimates (fallback when no router is reachable).
//!
//! Uses straight-line distance and an assumed average speed. Less accurate
//! than a road router but always available.

use crate::error::SourceError;
use crate::model::Coordinate;
use crate::traits::{DistanceSource, TravelCost};

/// Average driving speed assumption for time estimation.
pub const DEFAULT_SPEED_KMH: f64 = 40.0;

/// Earth radius in kilometers.
const EARTH_RADIUS_KM: f64 = 6371.0;

/// Haversine-based distance source.
#[derive(Debug, Clone, Copy)]
pub struct HaversineMatrix {
    /// Assumed average driving speed in km/h.
    pub speed_kmh: f64,
}

impl Default for HaversineMatrix {
    fn default() -> Self {
        Self {
            speed_kmh: DEFAULT_SPEED_KMH,
        }
    }
}

impl HaversineMatrix {
    pub fn new(speed_kmh: f64) -> Self {
        Self { speed_kmh }
    }

    /// Estimated cost of driving from `from` to `to`.
    pub fn estimate(&self, from: Coordinate, to: Coordinate) -> TravelCost {
        let km = haversine_km(from, to);
        TravelCost::new((km * 1000.0).round() as i32, self.km_to_seconds(km))
    }

    /// Convert distance in km to travel time in seconds.
    fn km_to_seconds(&self, km: f64) -> i32 {
        let hours = km / self.speed_kmh;
        (hours * 3600.0).round() as i32
    }
}

/// Great-circle distance between two points in kilometers.
pub fn haversine_km(from: Coordinate, to: Coordinate) -> f64 {
    let lat1_rad = from.lat.to_radians();
    let lat2_rad = to.lat.to_radians();
    let delta_lat = (to.lat - from.lat).to_radians();
    let delta_lng = (to.lng - from.lng).to_radians();

    let a = (delta_lat / 2.0).sin().powi(2)
        + lat1_rad.cos() * lat2_rad.cos() * (delta_lng / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().asin();

    EARTH_RADIUS_KM * c
}

impl DistanceSource for HaversineMatrix {
    fn table(
        &self,
        origins: &[Coordinate],
        destinations: &[Coordinate],
    ) -> Result<Vec<Vec<Option<TravelCost>>>, SourceError> {
        Ok(origins
            .iter()
            .map(|from| {
                destinations
                    .iter()
                    .map(|to| Some(self.estimate(*from, *to)))
                    .collect()
            })
            .collect())
    }

    fn max_elements(&self) -> usize {
        usize::MAX
    }

    fn is_estimate(&self) -> bool {
        true
    }
}
