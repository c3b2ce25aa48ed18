//! Property-based tests for the route optimizer.
//!
//! # Invariants tested
//!
//! - **Partition:** every stop is routed or unassigned, exactly once.
//! - **Eligibility:** wheelchair stops only ride wheelchair vans.
//! - **Capacity:** no route exceeds its vehicle's seats, and a wheelchair van
//!   carries at most one regular rider.
//! - **Time windows:** arrivals stay inside windows. On an estimated matrix
//!   they also keep the safety margin before the window closes.
//! - **Monotonicity:** local search never makes the objective worse.

mod fixtures;

use std::collections::HashMap;

use fixtures::*;
use proptest::prelude::*;
use van_route_planner::matrix::{DistanceMatrix, LocationPlan};
use van_route_planner::model::{Stop, Vehicle};
use van_route_planner::run::RunControl;
use van_route_planner::solver::{OptimizerOptions, RoutingInput, Solution};

#[derive(Debug, Clone)]
struct StopSpec {
    pickup: usize,
    wheelchair: bool,
    demand: u32,
    window: Option<(i32, i32)>,
}

fn stop_strategy() -> impl Strategy<Value = StopSpec> {
    (
        0..PICKUPS.len(),
        prop::bool::weighted(0.25),
        1_u32..=3,
        prop::option::of((0_i32..7200, 600_i32..7200)),
    )
        .prop_map(|(pickup, wheelchair, demand, window)| StopSpec {
            pickup,
            wheelchair,
            demand,
            window: window.map(|(offset, width)| {
                let open = 8 * 3600 + offset;
                (open, open + width)
            }),
        })
}

fn fleet_strategy() -> impl Strategy<Value = Vec<Vehicle>> {
    (2_u32..=6, prop::collection::vec(2_u32..=8, 0..=3)).prop_map(|(wc, standard)| {
        let mut fleet = vec![wheelchair_van("wc", wc)];
        fleet.extend(
            standard
                .into_iter()
                .enumerate()
                .map(|(i, capacity)| standard_van(&format!("van-{i}"), capacity)),
        );
        fleet
    })
}

fn build_stops(specs: &[StopSpec]) -> Vec<Stop> {
    specs
        .iter()
        .enumerate()
        .map(|(i, spec)| {
            let stop = resolved_stop(&format!("s{i}"), spec.pickup)
                .wheelchair(spec.wheelchair)
                .demand(spec.demand)
                .dwell_secs(60);
            match spec.window {
                Some((open, close)) => stop.time_window(open, close),
                None => stop,
            }
        })
        .collect()
}

fn optimize(stops: &[Stop], fleet: &[Vehicle]) -> Solution {
    optimize_on(stops, fleet, routing_data)
}

fn optimize_on(
    stops: &[Stop],
    fleet: &[Vehicle],
    data: fn(&[Stop], &[Vehicle]) -> (LocationPlan, DistanceMatrix),
) -> Solution {
    let (plan, matrix) = data(stops, fleet);
    let input = RoutingInput {
        stops,
        fleet,
        plan: &plan,
        matrix: &matrix,
    };
    let options = OptimizerOptions {
        max_improvement_passes: 25,
        ..OptimizerOptions::default()
    };
    frozen_optimizer(options)
        .optimize(&input, &RunControl::new())
        .expect("optimize should succeed")
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn every_stop_is_placed_exactly_once(
        specs in prop::collection::vec(stop_strategy(), 1..12),
        fleet in fleet_strategy(),
    ) {
        let stops = build_stops(&specs);
        let solution = optimize(&stops, &fleet);

        let mut placements: HashMap<String, usize> = HashMap::new();
        for route in &solution.routes {
            for routed in &route.stops {
                *placements.entry(routed.stop_id.clone()).or_default() += 1;
            }
        }
        for unassigned in &solution.unassigned {
            *placements.entry(unassigned.stop_id.clone()).or_default() += 1;
        }

        prop_assert_eq!(placements.len(), stops.len());
        prop_assert!(placements.values().all(|&count| count == 1));
    }

    #[test]
    fn routes_respect_eligibility_and_capacity(
        specs in prop::collection::vec(stop_strategy(), 1..12),
        fleet in fleet_strategy(),
    ) {
        let stops = build_stops(&specs);
        let solution = optimize(&stops, &fleet);

        for (route, vehicle) in solution.routes.iter().zip(&fleet) {
            prop_assert!(
                route.load.total() <= vehicle.capacity,
                "{} carries {} riders with {} seats",
                vehicle.id,
                route.load.total(),
                vehicle.capacity
            );
            if vehicle.is_wheelchair_capable() {
                prop_assert!(route.load.regular <= 1);
            } else {
                prop_assert_eq!(route.load.wheelchair, 0);
            }

            let mut riders = 0;
            for routed in &route.stops {
                let stop = stops.iter().find(|s| s.id == routed.stop_id).unwrap();
                prop_assert!(vehicle.can_carry(stop), "{} cannot carry {}", vehicle.id, stop.id);
                riders += stop.demand;
            }
            prop_assert_eq!(riders, route.load.total());
        }
    }

    #[test]
    fn arrivals_stay_inside_windows(
        specs in prop::collection::vec(stop_strategy(), 1..12),
        fleet in fleet_strategy(),
    ) {
        let stops = build_stops(&specs);
        let solution = optimize(&stops, &fleet);

        for route in &solution.routes {
            for routed in &route.stops {
                let stop = stops.iter().find(|s| s.id == routed.stop_id).unwrap();
                if let Some(window) = stop.time_window {
                    prop_assert!(window.contains(routed.arrival_secs));
                }
            }
        }
    }

    #[test]
    fn estimated_arrivals_keep_a_margin_before_close(
        specs in prop::collection::vec(stop_strategy(), 1..12),
        fleet in fleet_strategy(),
    ) {
        let stops = build_stops(&specs);
        let solution = optimize_on(&stops, &fleet, estimated_routing_data);
        prop_assert!(solution.estimated_distances);

        let margin = OptimizerOptions::default().estimated_slack_secs;
        for route in &solution.routes {
            for routed in &route.stops {
                let stop = stops.iter().find(|s| s.id == routed.stop_id).unwrap();
                if let Some(window) = stop.time_window {
                    let cutoff = (window.latest - margin).max(window.earliest);
                    prop_assert!(window.contains(routed.arrival_secs));
                    prop_assert!(
                        routed.arrival_secs <= cutoff,
                        "{} arrives at {} past cutoff {}",
                        stop.id,
                        routed.arrival_secs,
                        cutoff
                    );
                }
            }
        }
    }

    #[test]
    fn improvement_never_worsens_the_objective(
        specs in prop::collection::vec(stop_strategy(), 1..12),
        fleet in fleet_strategy(),
    ) {
        let stops = build_stops(&specs);
        let solution = optimize(&stops, &fleet);

        prop_assert!(solution.objective_value <= solution.construction_value);
        let distance: i64 = solution.routes.iter().map(|r| r.distance_m).sum();
        prop_assert_eq!(solution.objective_value, distance);
    }
}
