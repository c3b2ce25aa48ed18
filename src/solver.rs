//! Route optimizer: greedy cheapest insertion followed by time-budgeted
//! local search.
//!
//! Every candidate route is checked against the hard rules (eligibility,
//! capacity, time windows) by [`Problem::evaluate`]; nothing infeasible is
//! ever kept, so a run cut short by its budget still returns a valid plan.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::cache::{Clock, SystemClock};
use crate::error::{OptimizeError, RouteViolation};
use crate::local_search::{self, Deadline};
use crate::matrix::{DistanceMatrix, LocationPlan};
use crate::model::{Load, Stop, Vehicle};
use crate::run::{RunControl, RunPhase};
use crate::traits::TravelCost;

/// What the optimizer minimizes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Objective {
    #[default]
    Distance,
    Duration,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct OptimizerOptions {
    pub objective: Objective,
    /// Wall-clock budget for the whole run, in milliseconds.
    pub time_budget_ms: u64,
    /// Departure time from the depot, seconds from midnight.
    pub shift_start_secs: i32,
    /// Include the leg from the last stop back to the depot.
    pub return_to_depot: bool,
    /// Safety margin before a window closes when the matrix is estimated.
    /// Arrivals must then be this much earlier than `latest`.
    pub estimated_slack_secs: i32,
    pub max_improvement_passes: usize,
    /// Score insertion candidates for all vehicles in parallel.
    pub parallel_construction: bool,
}

impl Default for OptimizerOptions {
    fn default() -> Self {
        Self {
            objective: Objective::Distance,
            time_budget_ms: 2_000,
            shift_start_secs: 8 * 3600,
            return_to_depot: true,
            estimated_slack_secs: 600,
            max_improvement_passes: 10_000,
            parallel_construction: true,
        }
    }
}

impl OptimizerOptions {
    pub fn time_budget(&self) -> Duration {
        Duration::from_millis(self.time_budget_ms)
    }
}

/// Everything the optimizer reads. Stops must all be resolved and the plan
/// and matrix built from the same stops and fleet.
#[derive(Debug, Clone, Copy)]
pub struct RoutingInput<'a> {
    pub stops: &'a [Stop],
    pub fleet: &'a [Vehicle],
    pub plan: &'a LocationPlan,
    pub matrix: &'a DistanceMatrix,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UnassignedReason {
    /// The address never resolved to a coordinate.
    Unresolved,
    /// No vehicle in the fleet is allowed to carry the stop.
    NoEligibleVehicle,
    Capacity,
    TimeWindow,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnassignedStop {
    pub stop_id: String,
    pub reason: UnassignedReason,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RouteStop {
    pub stop_id: String,
    /// Estimated pickup time, seconds from midnight.
    pub arrival_secs: i32,
    pub cumulative_distance_m: i64,
    pub cumulative_duration_s: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Route {
    pub vehicle_id: String,
    pub stops: Vec<RouteStop>,
    pub load: Load,
    pub distance_m: i64,
    pub duration_s: i64,
}

impl Route {
    pub fn stop_ids(&self) -> Vec<&str> {
        self.stops.iter().map(|s| s.stop_id.as_str()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.stops.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SolveStatus {
    /// Local search ran until a full pass found no improving move.
    Converged,
    /// The time budget (or pass limit) ended local search early.
    BudgetExhausted,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Solution {
    /// One route per vehicle, in fleet order.
    pub routes: Vec<Route>,
    pub unassigned: Vec<UnassignedStop>,
    pub objective: Objective,
    pub objective_value: i64,
    /// Objective value right after construction.
    pub construction_value: i64,
    pub status: SolveStatus,
    pub estimated_distances: bool,
    pub improvement_passes: usize,
}

impl Solution {
    pub fn route_for(&self, vehicle_id: &str) -> Option<&Route> {
        self.routes.iter().find(|r| r.vehicle_id == vehicle_id)
    }

    pub fn is_budget_limited(&self) -> bool {
        self.status == SolveStatus::BudgetExhausted
    }
}

/// Accumulated travel along a route.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct RouteCost {
    pub distance: i64,
    pub duration: i64,
}

/// Read-only view of one run's input shared by construction and local search.
pub(crate) struct Problem<'a> {
    stops: &'a [Stop],
    fleet: &'a [Vehicle],
    plan: &'a LocationPlan,
    matrix: &'a DistanceMatrix,
    options: &'a OptimizerOptions,
    slack: i32,
}

impl<'a> Problem<'a> {
    fn new(input: &RoutingInput<'a>, options: &'a OptimizerOptions) -> Self {
        let slack = if input.matrix.is_estimated() {
            options.estimated_slack_secs
        } else {
            0
        };
        Self {
            stops: input.stops,
            fleet: input.fleet,
            plan: input.plan,
            matrix: input.matrix,
            options,
            slack,
        }
    }

    pub(crate) fn vehicle_count(&self) -> usize {
        self.fleet.len()
    }

    pub(crate) fn can_carry(&self, vehicle: usize, stop: usize) -> bool {
        self.fleet[vehicle].can_carry(&self.stops[stop])
    }

    fn load_of(&self, route: &[usize]) -> Load {
        route
            .iter()
            .fold(Load::default(), |load, &s| load + Load::of(&self.stops[s]))
    }

    fn travel(&self, from: Option<usize>, to: usize) -> TravelCost {
        from.map_or(TravelCost::ZERO, |from| self.matrix.get(from, to))
    }

    /// Drive `route` with `vehicle`, reporting each pickup to `visit`.
    fn walk<F>(&self, vehicle: usize, route: &[usize], mut visit: F) -> Result<RouteCost, RouteViolation>
    where
        F: FnMut(usize, i32, RouteCost),
    {
        let carrier = &self.fleet[vehicle];
        if let Some(&s) = route.iter().find(|&&s| !carrier.can_carry(&self.stops[s])) {
            return Err(RouteViolation::Ineligible {
                stop_id: self.stops[s].id.clone(),
            });
        }
        let load = self.load_of(route);
        if !carrier.admits(load) {
            return Err(RouteViolation::OverCapacity {
                load,
                capacity: carrier.capacity,
            });
        }

        let start = self.options.shift_start_secs;
        let depot = self.plan.depot_nodes[vehicle];
        let mut time = start;
        let mut distance = 0i64;
        let mut previous = depot;

        for &s in route {
            let stop = &self.stops[s];
            let node = self.plan.stop_nodes[s];
            let leg = self.travel(previous, node);
            distance += i64::from(leg.distance_m);
            time += leg.duration_s;

            if let Some(window) = stop.time_window {
                // Early vehicles wait for the window to open.
                time = time.max(window.earliest);
                let cutoff = (window.latest - self.slack).max(window.earliest);
                if time > cutoff {
                    return Err(RouteViolation::LateArrival {
                        stop_id: stop.id.clone(),
                        arrival: time,
                        latest: window.latest,
                    });
                }
            }

            visit(
                s,
                time,
                RouteCost {
                    distance,
                    duration: i64::from(time - start),
                },
            );
            time += stop.dwell_secs;
            previous = Some(node);
        }

        if route.is_empty() {
            return Ok(RouteCost::default());
        }
        if let (true, Some(depot), Some(last)) = (self.options.return_to_depot, depot, previous) {
            let leg = self.matrix.get(last, depot);
            distance += i64::from(leg.distance_m);
            time += leg.duration_s;
        }

        Ok(RouteCost {
            distance,
            duration: i64::from(time - start),
        })
    }

    pub(crate) fn evaluate(&self, vehicle: usize, route: &[usize]) -> Result<RouteCost, RouteViolation> {
        self.walk(vehicle, route, |_, _, _| {})
    }

    pub(crate) fn objective(&self, cost: RouteCost) -> i64 {
        match self.options.objective {
            Objective::Distance => cost.distance,
            Objective::Duration => cost.duration,
        }
    }

    /// Objective value of a feasible route, `None` if it breaks a hard rule.
    pub(crate) fn route_cost(&self, vehicle: usize, route: &[usize]) -> Option<i64> {
        self.evaluate(vehicle, route).ok().map(|cost| self.objective(cost))
    }

    fn schedule(&self, vehicle: usize, route: &[usize]) -> Result<Route, RouteViolation> {
        let mut stops = Vec::with_capacity(route.len());
        let total = self.walk(vehicle, route, |s, arrival, so_far| {
            stops.push(RouteStop {
                stop_id: self.stops[s].id.clone(),
                arrival_secs: arrival,
                cumulative_distance_m: so_far.distance,
                cumulative_duration_s: so_far.duration,
            });
        })?;

        Ok(Route {
            vehicle_id: self.fleet[vehicle].id.clone(),
            stops,
            load: self.load_of(route),
            distance_m: total.distance,
            duration_s: total.duration,
        })
    }
}

#[derive(Debug, Clone, Copy)]
struct Insertion {
    vehicle: usize,
    position: usize,
    delta: i64,
    cost: i64,
}

/// The VRP engine.
#[derive(Debug, Clone)]
pub struct RouteOptimizer {
    options: OptimizerOptions,
    clock: Arc<dyn Clock>,
}

impl Default for RouteOptimizer {
    fn default() -> Self {
        Self::new(OptimizerOptions::default())
    }
}

impl RouteOptimizer {
    pub fn new(options: OptimizerOptions) -> Self {
        Self::with_clock(options, Arc::new(SystemClock))
    }

    /// Use `clock` to measure the time budget.
    pub fn with_clock(options: OptimizerOptions, clock: Arc<dyn Clock>) -> Self {
        Self { options, clock }
    }

    pub fn options(&self) -> &OptimizerOptions {
        &self.options
    }

    pub fn optimize(
        &self,
        input: &RoutingInput<'_>,
        control: &RunControl,
    ) -> Result<Solution, OptimizeError> {
        let deadline = Deadline::new(self.clock.as_ref(), self.options.time_budget());
        validate(input)?;
        let problem = Problem::new(input, &self.options);

        control.enter(RunPhase::Constructing);
        let (mut routes, mut costs, unassigned) = construct(&problem);
        let construction_value: i64 = costs.iter().sum();
        info!(
            stops = input.stops.len(),
            vehicles = input.fleet.len(),
            unassigned = unassigned.len(),
            objective = construction_value,
            "construction finished"
        );

        if control.is_cancelled() {
            return Err(OptimizeError::Cancelled);
        }

        let (status, passes) = if deadline.expired() {
            debug!("time budget spent during construction, skipping improvement");
            (SolveStatus::BudgetExhausted, 0)
        } else {
            control.enter(RunPhase::Improving);
            local_search::improve(
                &problem,
                &mut routes,
                &mut costs,
                &deadline,
                self.options.max_improvement_passes,
                control,
            )?
        };

        let routes = routes
            .iter()
            .enumerate()
            .map(|(vehicle, route)| {
                problem
                    .schedule(vehicle, route)
                    .map_err(|violation| OptimizeError::InfeasibleRoute {
                        vehicle_id: input.fleet[vehicle].id.clone(),
                        violation,
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;
        let objective_value = costs.iter().sum();

        control.enter(RunPhase::Done);
        info!(
            objective = objective_value,
            construction = construction_value,
            passes,
            ?status,
            "optimization finished"
        );

        Ok(Solution {
            routes,
            unassigned,
            objective: self.options.objective,
            objective_value,
            construction_value,
            status,
            estimated_distances: input.matrix.is_estimated(),
            improvement_passes: passes,
        })
    }

    /// Schedule a caller-chosen stop order on one vehicle, e.g. after a
    /// dispatcher hand-edits a route.
    pub fn evaluate_sequence(
        &self,
        input: &RoutingInput<'_>,
        vehicle_id: &str,
        stop_ids: &[&str],
    ) -> Result<Route, OptimizeError> {
        validate(input)?;
        let infeasible = |violation| OptimizeError::InfeasibleRoute {
            vehicle_id: vehicle_id.to_string(),
            violation,
        };

        let vehicle = input
            .fleet
            .iter()
            .position(|v| v.id == vehicle_id)
            .ok_or_else(|| infeasible(RouteViolation::UnknownVehicle(vehicle_id.to_string())))?;

        let by_id: HashMap<&str, usize> = input
            .stops
            .iter()
            .enumerate()
            .map(|(i, stop)| (stop.id.as_str(), i))
            .collect();
        let mut seen = HashSet::new();
        let mut route = Vec::with_capacity(stop_ids.len());
        for &id in stop_ids {
            let index = *by_id
                .get(id)
                .ok_or_else(|| infeasible(RouteViolation::UnknownStop(id.to_string())))?;
            if !seen.insert(index) {
                return Err(infeasible(RouteViolation::DuplicateStop(id.to_string())));
            }
            route.push(index);
        }

        Problem::new(input, &self.options)
            .schedule(vehicle, &route)
            .map_err(infeasible)
    }
}

fn validate(input: &RoutingInput<'_>) -> Result<(), OptimizeError> {
    if input.plan.stop_nodes.len() != input.stops.len()
        || input.plan.depot_nodes.len() != input.fleet.len()
    {
        return Err(OptimizeError::PlanMismatch);
    }
    if input.matrix.size() != input.plan.coordinates.len() {
        return Err(OptimizeError::MatrixMismatch {
            expected: input.plan.coordinates.len(),
            actual: input.matrix.size(),
        });
    }
    if let Some(stop) = input.stops.iter().find(|s| !s.is_resolved()) {
        return Err(OptimizeError::UnresolvedStop(stop.id.clone()));
    }
    Ok(())
}

/// Greedy cheapest insertion. Wheelchair stops go first so they claim
/// wheelchair seats before regular riders compete for the spare one.
fn construct(problem: &Problem<'_>) -> (Vec<Vec<usize>>, Vec<i64>, Vec<UnassignedStop>) {
    let vehicles = problem.vehicle_count();
    let mut routes: Vec<Vec<usize>> = vec![Vec::new(); vehicles];
    let mut costs: Vec<i64> = vec![0; vehicles];
    let mut unassigned: Vec<(usize, UnassignedReason)> = Vec::new();

    let mut order: Vec<usize> = (0..problem.stops.len()).collect();
    order.sort_by_key(|&s| (!problem.stops[s].wheelchair, s));

    for stop in order {
        let eligible: Vec<usize> = (0..vehicles)
            .filter(|&v| problem.can_carry(v, stop))
            .collect();
        if eligible.is_empty() {
            unassigned.push((stop, UnassignedReason::NoEligibleVehicle));
            continue;
        }

        let scan = |&v: &usize| best_insertion(problem, v, &routes[v], costs[v], stop);
        let candidates: Vec<Option<Insertion>> = if problem.options.parallel_construction {
            eligible.par_iter().map(scan).collect()
        } else {
            eligible.iter().map(scan).collect()
        };

        match candidates
            .into_iter()
            .flatten()
            .min_by_key(|c| (c.delta, c.vehicle, c.position))
        {
            Some(best) => {
                routes[best.vehicle].insert(best.position, stop);
                costs[best.vehicle] = best.cost;
            }
            None => {
                let reason = unassignable_reason(problem, &routes, &eligible, stop);
                debug!(stop = %problem.stops[stop].id, ?reason, "no feasible insertion");
                unassigned.push((stop, reason));
            }
        }
    }

    unassigned.sort_by_key(|(stop, _)| *stop);
    let unassigned = unassigned
        .into_iter()
        .map(|(stop, reason)| UnassignedStop {
            stop_id: problem.stops[stop].id.clone(),
            reason,
        })
        .collect();

    (routes, costs, unassigned)
}

/// Cheapest feasible position for `stop` in one vehicle's route.
fn best_insertion(
    problem: &Problem<'_>,
    vehicle: usize,
    route: &[usize],
    current: i64,
    stop: usize,
) -> Option<Insertion> {
    let mut candidate = Vec::with_capacity(route.len() + 1);
    let mut best: Option<Insertion> = None;

    for position in 0..=route.len() {
        candidate.clear();
        candidate.extend_from_slice(&route[..position]);
        candidate.push(stop);
        candidate.extend_from_slice(&route[position..]);

        let Some(cost) = problem.route_cost(vehicle, &candidate) else {
            continue;
        };
        let delta = cost - current;
        if best.is_none_or(|b| delta < b.delta) {
            best = Some(Insertion {
                vehicle,
                position,
                delta,
                cost,
            });
        }
    }

    best
}

/// Capacity if no eligible vehicle has seats left, otherwise the time
/// windows are what blocked every position.
fn unassignable_reason(
    problem: &Problem<'_>,
    routes: &[Vec<usize>],
    eligible: &[usize],
    stop: usize,
) -> UnassignedReason {
    let extra = Load::of(&problem.stops[stop]);
    let has_room = eligible
        .iter()
        .any(|&v| problem.fleet[v].admits(problem.load_of(&routes[v]) + extra));
    if has_room {
        UnassignedReason::TimeWindow
    } else {
        UnassignedReason::Capacity
    }
}
