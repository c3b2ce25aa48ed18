//! Improvement moves over constructed routes.
//!
//! Each move scans its neighbourhood and applies the first candidate that
//! lowers the total objective, so the objective never goes up between passes.

use std::time::{Duration, Instant};

use tracing::trace;

use crate::cache::Clock;
use crate::error::OptimizeError;
use crate::run::RunControl;
use crate::solver::{Problem, SolveStatus};

/// Wall-clock cut-off for one optimization run.
pub(crate) struct Deadline<'a> {
    clock: &'a dyn Clock,
    end: Instant,
}

impl<'a> Deadline<'a> {
    pub(crate) fn new(clock: &'a dyn Clock, budget: Duration) -> Self {
        Self {
            clock,
            end: clock.now() + budget,
        }
    }

    pub(crate) fn expired(&self) -> bool {
        self.clock.now() >= self.end
    }
}

/// Run improvement passes until one finds nothing, the deadline passes, or
/// the pass limit is hit. Returns the status and the number of passes run.
pub(crate) fn improve(
    problem: &Problem<'_>,
    routes: &mut [Vec<usize>],
    costs: &mut [i64],
    deadline: &Deadline<'_>,
    max_passes: usize,
    control: &RunControl,
) -> Result<(SolveStatus, usize), OptimizeError> {
    let mut passes = 0;
    loop {
        if control.is_cancelled() {
            return Err(OptimizeError::Cancelled);
        }
        if deadline.expired() || passes >= max_passes {
            return Ok((SolveStatus::BudgetExhausted, passes));
        }
        passes += 1;

        let mut improved = false;
        for (vehicle, (route, cost)) in routes.iter_mut().zip(costs.iter_mut()).enumerate() {
            improved |= two_opt(problem, vehicle, route, cost);
        }
        improved |= relocate(problem, routes, costs);
        improved |= swap(problem, routes, costs);

        trace!(pass = passes, total = costs.iter().sum::<i64>(), improved, "local search pass");
        if !improved {
            return Ok((SolveStatus::Converged, passes));
        }
    }
}

/// Reverse a segment of one route.
fn two_opt(problem: &Problem<'_>, vehicle: usize, route: &mut Vec<usize>, cost: &mut i64) -> bool {
    let n = route.len();
    if n < 2 {
        return false;
    }

    let mut candidate = route.clone();
    for i in 0..n - 1 {
        for j in i + 1..n {
            candidate[i..=j].reverse();
            if let Some(new_cost) = problem.route_cost(vehicle, &candidate) {
                if new_cost < *cost {
                    *route = candidate;
                    *cost = new_cost;
                    return true;
                }
            }
            candidate[i..=j].reverse();
        }
    }

    false
}

/// Move one stop to another position, in the same route or another one.
fn relocate(problem: &Problem<'_>, routes: &mut [Vec<usize>], costs: &mut [i64]) -> bool {
    let vehicles = routes.len();

    for from in 0..vehicles {
        for index in 0..routes[from].len() {
            let stop = routes[from][index];
            let mut shortened = routes[from].clone();
            shortened.remove(index);

            for to in 0..vehicles {
                if !problem.can_carry(to, stop) {
                    continue;
                }

                if from == to {
                    for position in 0..=shortened.len() {
                        if position == index {
                            continue;
                        }
                        let mut candidate = shortened.clone();
                        candidate.insert(position, stop);
                        if let Some(new_cost) = problem.route_cost(from, &candidate) {
                            if new_cost < costs[from] {
                                routes[from] = candidate;
                                costs[from] = new_cost;
                                return true;
                            }
                        }
                    }
                    continue;
                }

                let Some(from_cost) = problem.route_cost(from, &shortened) else {
                    continue;
                };
                for position in 0..=routes[to].len() {
                    let mut candidate = routes[to].clone();
                    candidate.insert(position, stop);
                    let Some(to_cost) = problem.route_cost(to, &candidate) else {
                        continue;
                    };
                    if from_cost + to_cost < costs[from] + costs[to] {
                        routes[from] = shortened;
                        routes[to] = candidate;
                        costs[from] = from_cost;
                        costs[to] = to_cost;
                        return true;
                    }
                }
            }
        }
    }

    false
}

/// Exchange one stop between two routes.
fn swap(problem: &Problem<'_>, routes: &mut [Vec<usize>], costs: &mut [i64]) -> bool {
    let vehicles = routes.len();

    for a in 0..vehicles {
        for b in a + 1..vehicles {
            for i in 0..routes[a].len() {
                for j in 0..routes[b].len() {
                    let (sa, sb) = (routes[a][i], routes[b][j]);
                    if !problem.can_carry(a, sb) || !problem.can_carry(b, sa) {
                        continue;
                    }

                    let mut route_a = routes[a].clone();
                    let mut route_b = routes[b].clone();
                    route_a[i] = sb;
                    route_b[j] = sa;

                    let (Some(cost_a), Some(cost_b)) = (
                        problem.route_cost(a, &route_a),
                        problem.route_cost(b, &route_b),
                    ) else {
                        continue;
                    };
                    if cost_a + cost_b < costs[a] + costs[b] {
                        routes[a] = route_a;
                        routes[b] = route_b;
                        costs[a] = cost_a;
                        costs[b] = cost_b;
                        return true;
                    }
                }
            }
        }
    }

    false
}
