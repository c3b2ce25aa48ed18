//! End-to-end planning: resolve addresses, gate the run, build the matrix,
//! optimize.

use std::collections::HashMap;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use tracing::{info, warn};

use crate::config::PlannerConfig;
use crate::error::{OptimizeError, PlanError};
use crate::feasibility::FeasibilityChecker;
use crate::geocode::{AddressResolver, GeocodeCache};
use crate::matrix::{DistanceMatrixBuilder, LocationPlan, MatrixCache};
use crate::model::{Stop, Vehicle};
use crate::run::{RunControl, RunPhase};
use crate::solver::{RouteOptimizer, RoutingInput, Solution, UnassignedReason, UnassignedStop};
use crate::traits::{DistanceSource, Geocoder};

#[derive(Debug)]
pub struct Planner<G, S> {
    resolver: AddressResolver<G>,
    matrix_builder: DistanceMatrixBuilder<S>,
    checker: FeasibilityChecker,
    optimizer: RouteOptimizer,
}

impl<G: Geocoder, S: DistanceSource> Planner<G, S> {
    pub fn new(
        resolver: AddressResolver<G>,
        matrix_builder: DistanceMatrixBuilder<S>,
        checker: FeasibilityChecker,
        optimizer: RouteOptimizer,
    ) -> Self {
        Self {
            resolver,
            matrix_builder,
            checker,
            optimizer,
        }
    }

    /// Wire up a planner with fresh caches sized from `config`.
    pub fn from_config(geocoder: G, source: S, config: &PlannerConfig) -> Self {
        let geocode_cache = Arc::new(GeocodeCache::new(config.geocode_cache));
        let matrix_cache = Arc::new(MatrixCache::new(config.matrix_cache));
        Self::with_caches(geocoder, source, geocode_cache, matrix_cache, config)
    }

    /// Like [`Planner::from_config`], sharing caches with other planners.
    pub fn with_caches(
        geocoder: G,
        source: S,
        geocode_cache: Arc<GeocodeCache>,
        matrix_cache: Arc<MatrixCache>,
        config: &PlannerConfig,
    ) -> Self {
        Self::new(
            AddressResolver::with_options(geocoder, geocode_cache, config.resolver),
            DistanceMatrixBuilder::with_options(source, matrix_cache, config.matrix),
            FeasibilityChecker::new(config.feasibility),
            RouteOptimizer::new(config.optimizer.clone()),
        )
    }

    pub fn resolver(&self) -> &AddressResolver<G> {
        &self.resolver
    }

    pub fn matrix_builder(&self) -> &DistanceMatrixBuilder<S> {
        &self.matrix_builder
    }

    /// Plan routes for `stops` on `fleet`.
    ///
    /// Stops whose address fails to resolve (while the run stays above the
    /// resolution threshold) come back as unassigned with
    /// [`UnassignedReason::Unresolved`].
    pub fn plan(
        &self,
        stops: Vec<Stop>,
        fleet: &[Vehicle],
        control: &RunControl,
    ) -> Result<Solution, PlanError> {
        if control.is_cancelled() {
            return Err(OptimizeError::Cancelled.into());
        }

        let stops = self.resolver.resolve_stops(stops);
        let report = self.checker.check(&stops, fleet).inspect_err(|err| {
            warn!(error = %err, "planning rejected");
            control.enter(RunPhase::Failed);
        })?;
        for failure in &report.failures {
            warn!(row = failure.row, stop = %failure.stop_id, reason = %failure.reason, "skipping unresolved stop");
        }

        let input_order: HashMap<&str, usize> = stops
            .iter()
            .enumerate()
            .map(|(row, stop)| (stop.id.as_str(), row))
            .collect();
        let (routable, unresolved): (Vec<&Stop>, Vec<&Stop>) =
            stops.iter().partition(|stop| stop.is_resolved());
        let routable: Vec<Stop> = routable.into_iter().cloned().collect();

        let plan = LocationPlan::new(&routable, fleet)?;
        let matrix = self.matrix_builder.build(&plan.coordinates);
        if control.is_cancelled() {
            return Err(OptimizeError::Cancelled.into());
        }

        let input = RoutingInput {
            stops: &routable,
            fleet,
            plan: &plan,
            matrix: &matrix,
        };
        let mut solution = self.optimizer.optimize(&input, control)?;

        solution
            .unassigned
            .extend(unresolved.into_iter().map(|stop| UnassignedStop {
                stop_id: stop.id.clone(),
                reason: UnassignedReason::Unresolved,
            }));
        solution
            .unassigned
            .sort_by_key(|u| input_order.get(u.stop_id.as_str()).copied());

        info!(
            routes = solution.routes.iter().filter(|r| !r.is_empty()).count(),
            unassigned = solution.unassigned.len(),
            estimated = solution.estimated_distances,
            "plan ready"
        );
        Ok(solution)
    }
}

impl<G, S> Planner<G, S>
where
    G: Geocoder + 'static,
    S: DistanceSource + 'static,
{
    /// Run [`Planner::plan`] on a worker thread. The returned handle can
    /// cancel the run and report its phase while it works.
    pub fn spawn(self: &Arc<Self>, stops: Vec<Stop>, fleet: Vec<Vehicle>) -> PlanHandle {
        let control = RunControl::new();
        let planner = Arc::clone(self);
        let worker_control = control.clone();
        let join = thread::spawn(move || planner.plan(stops, &fleet, &worker_control));
        PlanHandle { control, join }
    }
}

/// A planning run in progress on another thread.
#[derive(Debug)]
pub struct PlanHandle {
    control: RunControl,
    join: JoinHandle<Result<Solution, PlanError>>,
}

impl PlanHandle {
    pub fn cancel(&self) {
        self.control.cancel();
    }

    pub fn phase(&self) -> RunPhase {
        self.control.phase()
    }

    pub fn control(&self) -> &RunControl {
        &self.control
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Wait for the run to end.
    pub fn join(self) -> Result<Solution, PlanError> {
        self.join.join().unwrap_or(Err(PlanError::WorkerPanicked))
    }
}
