//! Error types shared across the planner core.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::feasibility::FeasibilityReport;
use crate::model::Load;

/// Why an address could not be turned into a coordinate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
pub enum GeocodeFailure {
    #[error("address is empty")]
    EmptyAddress,
    #[error("address not found")]
    NotFound,
    #[error("ambiguous match ({candidates} candidates)")]
    Ambiguous { candidates: usize },
    #[error("geocoding source unavailable: {0}")]
    SourceUnavailable(String),
}

impl GeocodeFailure {
    /// Permanent failures are worth remembering; transport problems are not.
    pub fn is_permanent(&self) -> bool {
        !matches!(self, GeocodeFailure::SourceUnavailable(_))
    }
}

/// Failure of a distance source to answer a table request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SourceError {
    #[error("distance source unavailable: {0}")]
    Unavailable(String),
    #[error("malformed distance source response: {0}")]
    Malformed(String),
}

impl From<reqwest::Error> for SourceError {
    fn from(err: reqwest::Error) -> Self {
        SourceError::Unavailable(err.to_string())
    }
}

/// Hard input errors raised by the feasibility gate.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FeasibilityError {
    #[error("no stops to route")]
    NoStops,
    #[error("no vehicles in fleet")]
    NoVehicles,
    #[error("{count} stops exceeds the maximum of {max}")]
    TooManyStops { count: usize, max: usize },
    #[error("invalid stop rows: {}", .0.len())]
    InvalidRows(Vec<RowProblem>),
    #[error(
        "infeasible fleet: wheelchair demand {wheelchair_demand} exceeds wheelchair capacity {wheelchair_capacity} (short by {shortfall})"
    )]
    InfeasibleFleet {
        wheelchair_demand: u32,
        wheelchair_capacity: u32,
        shortfall: u32,
    },
    #[error(
        "address resolution rate {:.2} is below the required threshold {:.2}",
        .0.resolution_rate,
        .0.threshold
    )]
    ResolutionBelowThreshold(Box<FeasibilityReport>),
}

/// One offending input row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RowProblem {
    pub row: usize,
    pub stop_id: String,
    pub reason: String,
}

/// Errors that stop an optimization run without producing a Solution.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OptimizeError {
    #[error("optimization cancelled")]
    Cancelled,
    #[error("matrix has {actual} locations, expected {expected}")]
    MatrixMismatch { expected: usize, actual: usize },
    #[error("location plan does not match the stop set or fleet")]
    PlanMismatch,
    #[error("stop {0} has no resolved coordinate")]
    UnresolvedStop(String),
    #[error("route for vehicle {vehicle_id} is infeasible: {violation}")]
    InfeasibleRoute {
        vehicle_id: String,
        violation: RouteViolation,
    },
}

/// Why a stop sequence cannot be driven by a vehicle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Error)]
pub enum RouteViolation {
    #[error("unknown vehicle {0}")]
    UnknownVehicle(String),
    #[error("unknown stop {0}")]
    UnknownStop(String),
    #[error("stop {0} appears more than once")]
    DuplicateStop(String),
    #[error("vehicle cannot carry stop {stop_id}")]
    Ineligible { stop_id: String },
    #[error("load of {} riders ({} regular) exceeds capacity {capacity}", .load.total(), .load.regular)]
    OverCapacity { load: Load, capacity: u32 },
    #[error("arrival at {stop_id} at {arrival}s is after the window closes at {latest}s")]
    LateArrival {
        stop_id: String,
        arrival: i32,
        latest: i32,
    },
}

/// Errors surfaced by the end-to-end planner.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PlanError {
    #[error(transparent)]
    Feasibility(#[from] FeasibilityError),
    #[error(transparent)]
    Optimize(#[from] OptimizeError),
    #[error("planner worker panicked")]
    WorkerPanicked,
}

/// Invalid planner configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to parse planner config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid planner config: {0}")]
    Invalid(String),
}
