//! Domain model: coordinates, stops, vehicles and vehicle load.

use std::ops::{Add, AddAssign};

use serde::{Deserialize, Serialize};

use crate::error::GeocodeFailure;

/// Regular (non-wheelchair) riders a wheelchair vehicle may carry per route.
pub const WHEELCHAIR_VEHICLE_REGULAR_SEATS: u32 = 1;

/// A WGS84 coordinate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub lat: f64,
    pub lng: f64,
}

impl Coordinate {
    pub const fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    pub fn is_valid(self) -> bool {
        self.lat.is_finite()
            && self.lng.is_finite()
            && (-90.0..=90.0).contains(&self.lat)
            && (-180.0..=180.0).contains(&self.lng)
    }

    /// Snap to a grid of `decimals` fractional digits.
    ///
    /// Two geocodes of the same building usually differ only in the last few
    /// digits, so they land on the same grid point.
    pub fn grid_point(self, decimals: u32) -> GridPoint {
        let scale = 10f64.powi(decimals as i32);
        GridPoint {
            lat: (self.lat * scale).round() as i64,
            lng: (self.lng * scale).round() as i64,
        }
    }
}

/// A coordinate rounded to a fixed precision, usable as a hash key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GridPoint {
    pub lat: i64,
    pub lng: i64,
}

/// Permitted arrival interval, seconds from midnight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub earliest: i32,
    pub latest: i32,
}

impl TimeWindow {
    pub const fn new(earliest: i32, latest: i32) -> Self {
        Self { earliest, latest }
    }

    pub const fn is_valid(&self) -> bool {
        self.earliest <= self.latest
    }

    pub const fn contains(&self, time: i32) -> bool {
        self.earliest <= time && time <= self.latest
    }
}

/// Geocoding state of a stop.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Resolution {
    Unresolved,
    Resolved(Coordinate),
    Failed(GeocodeFailure),
}

/// A pickup location with one or more riders.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Stop {
    pub id: String,
    pub address: String,
    /// Names of the riders boarding here. Informational only.
    pub riders: Vec<String>,
    pub demand: u32,
    pub wheelchair: bool,
    pub time_window: Option<TimeWindow>,
    /// Boarding time spent at the stop, in seconds.
    pub dwell_secs: i32,
    pub resolution: Resolution,
}

impl Stop {
    pub fn new(id: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            address: address.into(),
            riders: Vec::new(),
            demand: 1,
            wheelchair: false,
            time_window: None,
            dwell_secs: 0,
            resolution: Resolution::Unresolved,
        }
    }

    pub fn demand(mut self, demand: u32) -> Self {
        self.demand = demand;
        self
    }

    pub fn wheelchair(mut self, wheelchair: bool) -> Self {
        self.wheelchair = wheelchair;
        self
    }

    pub fn time_window(mut self, earliest: i32, latest: i32) -> Self {
        self.time_window = Some(TimeWindow::new(earliest, latest));
        self
    }

    pub fn dwell_secs(mut self, secs: i32) -> Self {
        self.dwell_secs = secs;
        self
    }

    pub fn riders(mut self, riders: Vec<String>) -> Self {
        self.riders = riders;
        self
    }

    /// Mark the stop as already resolved (pre-geocoded input or tests).
    pub fn at(mut self, coordinate: Coordinate) -> Self {
        self.resolution = Resolution::Resolved(coordinate);
        self
    }

    /// Apply a geocoding outcome.
    pub fn with_resolution(mut self, outcome: Result<Coordinate, GeocodeFailure>) -> Self {
        self.resolution = match outcome {
            Ok(coordinate) => Resolution::Resolved(coordinate),
            Err(failure) => Resolution::Failed(failure),
        };
        self
    }

    pub fn coordinate(&self) -> Option<Coordinate> {
        match self.resolution {
            Resolution::Resolved(coordinate) => Some(coordinate),
            _ => None,
        }
    }

    pub fn is_resolved(&self) -> bool {
        matches!(self.resolution, Resolution::Resolved(_))
    }
}

/// Vehicle class. Decides which stops a vehicle may serve and how its
/// seats are counted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VehicleClass {
    Standard,
    Wheelchair,
}

impl VehicleClass {
    pub const fn can_carry(self, stop: &Stop) -> bool {
        match self {
            VehicleClass::Standard => !stop.wheelchair,
            VehicleClass::Wheelchair => {
                stop.wheelchair || stop.demand <= WHEELCHAIR_VEHICLE_REGULAR_SEATS
            }
        }
    }

    /// Whether a whole-route load fits a vehicle of this class.
    pub const fn admits(self, capacity: u32, load: Load) -> bool {
        let within_capacity = load.total() <= capacity;
        match self {
            VehicleClass::Standard => load.wheelchair == 0 && within_capacity,
            VehicleClass::Wheelchair => {
                within_capacity && load.regular <= WHEELCHAIR_VEHICLE_REGULAR_SEATS
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vehicle {
    pub id: String,
    pub capacity: u32,
    pub class: VehicleClass,
    /// Start (and, if configured, end) location of the route.
    #[serde(default)]
    pub depot: Option<Coordinate>,
}

impl Vehicle {
    pub fn standard(id: impl Into<String>, capacity: u32) -> Self {
        Self {
            id: id.into(),
            capacity,
            class: VehicleClass::Standard,
            depot: None,
        }
    }

    pub fn wheelchair(id: impl Into<String>, capacity: u32) -> Self {
        Self {
            id: id.into(),
            capacity,
            class: VehicleClass::Wheelchair,
            depot: None,
        }
    }

    pub fn with_depot(mut self, depot: Coordinate) -> Self {
        self.depot = Some(depot);
        self
    }

    pub fn is_wheelchair_capable(&self) -> bool {
        self.class == VehicleClass::Wheelchair
    }

    pub fn can_carry(&self, stop: &Stop) -> bool {
        self.class.can_carry(stop)
    }

    pub fn admits(&self, load: Load) -> bool {
        self.class.admits(self.capacity, load)
    }
}

/// Riders on board, split by kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Load {
    pub wheelchair: u32,
    pub regular: u32,
}

impl Load {
    pub const fn of(stop: &Stop) -> Self {
        if stop.wheelchair {
            Self {
                wheelchair: stop.demand,
                regular: 0,
            }
        } else {
            Self {
                wheelchair: 0,
                regular: stop.demand,
            }
        }
    }

    /// Saturates at `u32::MAX`.
    pub const fn total(self) -> u32 {
        self.wheelchair.saturating_add(self.regular)
    }
}

impl Add for Load {
    type Output = Load;

    fn add(self, other: Load) -> Load {
        Load {
            wheelchair: self.wheelchair.saturating_add(other.wheelchair),
            regular: self.regular.saturating_add(other.regular),
        }
    }
}

impl AddAssign for Load {
    fn add_assign(&mut self, other: Load) {
        *self = *self + other;
    }
}
