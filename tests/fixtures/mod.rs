//! Test fixtures for van-route-planner.
//!
//! Provides:
//! - Real pickup locations around Sandy / Draper, Utah (from OpenStreetMap)
//! - In-memory geocoder and distance source fakes
//! - Helpers that turn stops and a fleet into optimizer input
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};

use van_route_planner::cache::{CacheConfig, ManualClock};
use van_route_planner::error::{GeocodeFailure, SourceError};
use van_route_planner::haversine::HaversineMatrix;
use van_route_planner::matrix::{DistanceMatrix, DistanceMatrixBuilder, LocationPlan, MatrixCache};
use van_route_planner::model::{Coordinate, Stop, Vehicle};
use van_route_planner::solver::{OptimizerOptions, RouteOptimizer};
use van_route_planner::traits::{DistanceSource, Geocoder, TravelCost};

// ============================================================================
// Locations
// ============================================================================

/// Day program the vans leave from and return to.
pub const DEPOT: Coordinate = Coordinate::new(40.5649, -111.8389);

pub const PICKUPS: [(&str, Coordinate); 10] = [
    ("9400 S State St, Sandy", Coordinate::new(40.5800, -111.8910)),
    ("10000 S 1300 E, Sandy", Coordinate::new(40.5698, -111.8537)),
    ("11400 S 700 E, Sandy", Coordinate::new(40.5447, -111.8712)),
    ("12300 S Minuteman Dr, Draper", Coordinate::new(40.5225, -111.8886)),
    ("1100 E Pioneer Rd, Draper", Coordinate::new(40.5193, -111.8620)),
    ("8000 S 700 E, Sandy", Coordinate::new(40.6104, -111.8712)),
    ("2000 E 9400 S, Sandy", Coordinate::new(40.5798, -111.8237)),
    ("13800 S Bangerter Pkwy, Draper", Coordinate::new(40.4990, -111.8761)),
    ("7200 S Union Park Ave, Midvale", Coordinate::new(40.6210, -111.8560)),
    ("10600 S Highland Dr, Sandy", Coordinate::new(40.5587, -111.8262)),
];

pub fn address(i: usize) -> &'static str {
    PICKUPS[i].0
}

/// Unresolved stop at pickup address `i`.
pub fn stop_at(id: &str, i: usize) -> Stop {
    Stop::new(id, address(i))
}

/// Resolved stop at pickup `i`.
pub fn resolved_stop(id: &str, i: usize) -> Stop {
    Stop::new(id, address(i)).at(PICKUPS[i].1)
}

pub fn wheelchair_van(id: &str, capacity: u32) -> Vehicle {
    Vehicle::wheelchair(id, capacity).with_depot(DEPOT)
}

pub fn standard_van(id: &str, capacity: u32) -> Vehicle {
    Vehicle::standard(id, capacity).with_depot(DEPOT)
}

// ============================================================================
// Fakes
// ============================================================================

/// Geocoder backed by a fixed address book. Counts lookups.
#[derive(Debug, Default)]
pub struct FakeGeocoder {
    known: HashMap<String, Coordinate>,
    calls: AtomicUsize,
}

impl FakeGeocoder {
    /// Knows every address in [`PICKUPS`].
    pub fn with_pickups() -> Self {
        let mut geocoder = Self::default();
        for (address, coordinate) in PICKUPS {
            geocoder.known.insert(address.to_string(), coordinate);
        }
        geocoder
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Geocoder for FakeGeocoder {
    fn geocode(&self, address: &str) -> Result<Coordinate, GeocodeFailure> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.known
            .get(address.trim())
            .copied()
            .ok_or(GeocodeFailure::NotFound)
    }
}

/// A geocoder that blocks every lookup until [`GatedGeocoder::open`] is
/// called. Clones share the gate.
#[derive(Debug, Clone)]
pub struct GatedGeocoder {
    inner: Arc<(FakeGeocoder, Mutex<bool>, Condvar)>,
}

impl GatedGeocoder {
    pub fn new(geocoder: FakeGeocoder) -> Self {
        Self {
            inner: Arc::new((geocoder, Mutex::new(false), Condvar::new())),
        }
    }

    pub fn open(&self) {
        let (_, open, ready) = &*self.inner;
        *open.lock().unwrap() = true;
        ready.notify_all();
    }
}

impl Geocoder for GatedGeocoder {
    fn geocode(&self, address: &str) -> Result<Coordinate, GeocodeFailure> {
        let (geocoder, open, ready) = &*self.inner;
        let mut is_open = open.lock().unwrap();
        while !*is_open {
            is_open = ready.wait(is_open).unwrap();
        }
        drop(is_open);
        geocoder.geocode(address)
    }
}

/// Routed-looking distances without a network: Manhattan distance in metres
/// at a steady 10 m/s.
#[derive(Debug, Default)]
pub struct GridSource {
    requests: AtomicUsize,
}

impl GridSource {
    pub fn cost(from: Coordinate, to: Coordinate) -> TravelCost {
        let metres = ((from.lat - to.lat).abs() + (from.lng - to.lng).abs()) * 111_000.0;
        let metres = metres.round() as i32;
        TravelCost::new(metres, metres / 10)
    }

    pub fn requests(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }
}

impl DistanceSource for GridSource {
    fn table(
        &self,
        origins: &[Coordinate],
        destinations: &[Coordinate],
    ) -> Result<Vec<Vec<Option<TravelCost>>>, SourceError> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        Ok(origins
            .iter()
            .map(|&from| {
                destinations
                    .iter()
                    .map(|&to| Some(Self::cost(from, to)))
                    .collect()
            })
            .collect())
    }
}

// ============================================================================
// Builders
// ============================================================================

pub fn fresh_matrix_cache() -> Arc<MatrixCache> {
    Arc::new(MatrixCache::new(CacheConfig::default()))
}

/// Location plan and grid-distance matrix for resolved `stops`.
pub fn routing_data(stops: &[Stop], fleet: &[Vehicle]) -> (LocationPlan, DistanceMatrix) {
    let plan = LocationPlan::new(stops, fleet).unwrap();
    let matrix = DistanceMatrixBuilder::new(GridSource::default(), fresh_matrix_cache())
        .build(&plan.coordinates);
    (plan, matrix)
}

/// Location plan and a straight-line estimate matrix for resolved `stops`.
pub fn estimated_routing_data(stops: &[Stop], fleet: &[Vehicle]) -> (LocationPlan, DistanceMatrix) {
    let plan = LocationPlan::new(stops, fleet).unwrap();
    let matrix = DistanceMatrixBuilder::new(HaversineMatrix::default(), fresh_matrix_cache())
        .build(&plan.coordinates);
    (plan, matrix)
}

/// Optimizer whose time budget never runs out on its own.
pub fn frozen_optimizer(options: OptimizerOptions) -> RouteOptimizer {
    RouteOptimizer::with_clock(options, Arc::new(ManualClock::new()))
}
