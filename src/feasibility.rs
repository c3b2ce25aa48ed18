//! Pre-optimization gate over resolved stops and the fleet.
//!
//! Hard problems (no stops, no vehicles, bad rows, a wheelchair shortfall, or
//! too many unresolved addresses) reject the run before any routing work.
//! Unresolved stops below that threshold are reported but do not block.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{FeasibilityError, RowProblem};
use crate::model::{Resolution, Stop, Vehicle};

const DEFAULT_MIN_RESOLUTION_RATE: f64 = 0.85;
const DEFAULT_MAX_STOPS: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct FeasibilityOptions {
    pub min_resolution_rate: f64,
    pub max_stops: usize,
}

impl Default for FeasibilityOptions {
    fn default() -> Self {
        Self {
            min_resolution_rate: DEFAULT_MIN_RESOLUTION_RATE,
            max_stops: DEFAULT_MAX_STOPS,
        }
    }
}

/// A stop whose address did not resolve.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailedRow {
    /// Position of the stop in the input.
    pub row: usize,
    pub stop_id: String,
    pub address: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeasibilityReport {
    pub total: usize,
    pub resolved: usize,
    pub resolution_rate: f64,
    pub threshold: f64,
    pub failures: Vec<FailedRow>,
}

impl FeasibilityReport {
    pub fn passed(&self) -> bool {
        self.resolution_rate >= self.threshold
    }
}

#[derive(Debug, Clone, Default)]
pub struct FeasibilityChecker {
    options: FeasibilityOptions,
}

impl FeasibilityChecker {
    pub fn new(options: FeasibilityOptions) -> Self {
        Self { options }
    }

    /// Validate a resolved stop set against the fleet.
    pub fn check(
        &self,
        stops: &[Stop],
        fleet: &[Vehicle],
    ) -> Result<FeasibilityReport, FeasibilityError> {
        if stops.is_empty() {
            return Err(FeasibilityError::NoStops);
        }
        if fleet.is_empty() {
            return Err(FeasibilityError::NoVehicles);
        }
        if stops.len() > self.options.max_stops {
            return Err(FeasibilityError::TooManyStops {
                count: stops.len(),
                max: self.options.max_stops,
            });
        }

        let problems = invalid_rows(stops);
        if !problems.is_empty() {
            warn!(count = problems.len(), "rejecting invalid stop rows");
            return Err(FeasibilityError::InvalidRows(problems));
        }

        check_wheelchair_capacity(stops, fleet)?;

        let report = self.resolution_report(stops);
        if !report.passed() {
            warn!(
                rate = report.resolution_rate,
                failed = report.failures.len(),
                "address resolution below threshold"
            );
            return Err(FeasibilityError::ResolutionBelowThreshold(Box::new(report)));
        }

        debug!(
            total = report.total,
            resolved = report.resolved,
            "feasibility check passed"
        );
        Ok(report)
    }

    pub fn resolution_report(&self, stops: &[Stop]) -> FeasibilityReport {
        let failures: Vec<FailedRow> = stops
            .iter()
            .enumerate()
            .filter_map(|(row, stop)| {
                let reason = match &stop.resolution {
                    Resolution::Resolved(_) => return None,
                    Resolution::Unresolved => "address not resolved".to_string(),
                    Resolution::Failed(failure) => failure.to_string(),
                };
                Some(FailedRow {
                    row,
                    stop_id: stop.id.clone(),
                    address: stop.address.clone(),
                    reason,
                })
            })
            .collect();

        let total = stops.len();
        let resolved = total - failures.len();
        let resolution_rate = if total == 0 {
            0.0
        } else {
            resolved as f64 / total as f64
        };

        FeasibilityReport {
            total,
            resolved,
            resolution_rate,
            threshold: self.options.min_resolution_rate,
            failures,
        }
    }
}

fn invalid_rows(stops: &[Stop]) -> Vec<RowProblem> {
    let mut seen = HashSet::new();
    let mut problems = Vec::new();
    for (row, stop) in stops.iter().enumerate() {
        let mut flag = |reason: &str| {
            problems.push(RowProblem {
                row,
                stop_id: stop.id.clone(),
                reason: reason.to_string(),
            })
        };
        if stop.id.trim().is_empty() {
            flag("missing stop id");
        } else if !seen.insert(stop.id.as_str()) {
            flag("duplicate stop id");
        }
        if stop.demand == 0 {
            flag("rider count must be at least 1");
        }
        if stop.dwell_secs < 0 {
            flag("negative dwell time");
        }
        if let Some(window) = stop.time_window {
            if !window.is_valid() {
                flag("time window ends before it starts");
            }
        }
    }
    problems
}

fn check_wheelchair_capacity(stops: &[Stop], fleet: &[Vehicle]) -> Result<(), FeasibilityError> {
    let wheelchair_demand: u32 = stops
        .iter()
        .filter(|stop| stop.wheelchair)
        .map(|stop| stop.demand)
        .fold(0, u32::saturating_add);
    let wheelchair_capacity: u32 = fleet
        .iter()
        .filter(|vehicle| vehicle.is_wheelchair_capable())
        .map(|vehicle| vehicle.capacity)
        .fold(0, u32::saturating_add);

    if wheelchair_demand > wheelchair_capacity {
        return Err(FeasibilityError::InfeasibleFleet {
            wheelchair_demand,
            wheelchair_capacity,
            shortfall: wheelchair_demand - wheelchair_capacity,
        });
    }
    Ok(())
}
