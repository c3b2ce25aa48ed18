//! Distance/duration matrix construction over a shared pair cache.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use serde::Deserialize;
use tracing::{debug, warn};

use crate::cache::TtlCache;
use crate::error::OptimizeError;
use crate::haversine::{DEFAULT_SPEED_KMH, HaversineMatrix};
use crate::model::{Coordinate, GridPoint, Stop, Vehicle};
use crate::traits::{DistanceSource, TravelCost};

/// Cache key: an ordered (or, for symmetric builders, sorted) pair of grid points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PairKey {
    pub from: GridPoint,
    pub to: GridPoint,
}

pub type MatrixCache = TtlCache<PairKey, TravelCost>;

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct MatrixOptions {
    /// Fractional digits kept when keying coordinate pairs.
    pub precision_decimals: u32,
    /// Treat A→B and B→A as the same cache entry.
    pub symmetric: bool,
    /// Speed used for haversine estimates when the source fails.
    pub fallback_speed_kmh: f64,
}

impl Default for MatrixOptions {
    fn default() -> Self {
        Self {
            precision_decimals: 4,
            symmetric: false,
            fallback_speed_kmh: DEFAULT_SPEED_KMH,
        }
    }
}

/// Square matrix of travel costs, row-major.
#[derive(Debug, Clone, PartialEq)]
pub struct DistanceMatrix {
    size: usize,
    cells: Vec<TravelCost>,
    estimated: bool,
}

impl DistanceMatrix {
    /// Build from a cost function. Diagonal cells are forced to zero.
    pub fn from_fn<F>(size: usize, estimated: bool, mut cost: F) -> Self
    where
        F: FnMut(usize, usize) -> TravelCost,
    {
        let mut cells = Vec::with_capacity(size * size);
        for from in 0..size {
            for to in 0..size {
                cells.push(if from == to { TravelCost::ZERO } else { cost(from, to) });
            }
        }
        Self {
            size,
            cells,
            estimated,
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn get(&self, from: usize, to: usize) -> TravelCost {
        self.cells[from * self.size + to]
    }

    /// True when some cells are great-circle estimates rather than routed values.
    pub fn is_estimated(&self) -> bool {
        self.estimated
    }
}

/// Builds [`DistanceMatrix`] values, consulting the cache before the source.
#[derive(Debug)]
pub struct DistanceMatrixBuilder<S> {
    source: S,
    cache: Arc<MatrixCache>,
    options: MatrixOptions,
    fallback: HaversineMatrix,
}

impl<S: DistanceSource> DistanceMatrixBuilder<S> {
    pub fn new(source: S, cache: Arc<MatrixCache>) -> Self {
        Self::with_options(source, cache, MatrixOptions::default())
    }

    pub fn with_options(source: S, cache: Arc<MatrixCache>, options: MatrixOptions) -> Self {
        Self {
            source,
            cache,
            options,
            fallback: HaversineMatrix::new(options.fallback_speed_kmh),
        }
    }

    pub fn cache(&self) -> &Arc<MatrixCache> {
        &self.cache
    }

    fn key(&self, from: GridPoint, to: GridPoint) -> PairKey {
        if self.options.symmetric && to < from {
            PairKey { from: to, to: from }
        } else {
            PairKey { from, to }
        }
    }

    pub fn build(&self, coordinates: &[Coordinate]) -> DistanceMatrix {
        let n = coordinates.len();
        let grid: Vec<GridPoint> = coordinates
            .iter()
            .map(|c| c.grid_point(self.options.precision_decimals))
            .collect();
        let mut representative: HashMap<GridPoint, Coordinate> = HashMap::new();
        for (point, coordinate) in grid.iter().zip(coordinates) {
            representative.entry(*point).or_insert(*coordinate);
        }

        let mut cells: Vec<Option<TravelCost>> = vec![None; n * n];
        let mut missing: BTreeSet<PairKey> = BTreeSet::new();
        let mut hits = 0usize;
        for i in 0..n {
            for j in 0..n {
                if grid[i] == grid[j] {
                    cells[i * n + j] = Some(TravelCost::ZERO);
                    continue;
                }
                let key = self.key(grid[i], grid[j]);
                match self.cache.get(&key) {
                    Some(cost) => {
                        hits += 1;
                        cells[i * n + j] = Some(cost);
                    }
                    None => {
                        missing.insert(key);
                    }
                }
            }
        }

        let (fetched, source_failed) = self.fetch(&missing, &representative);
        let mut estimated = self.source.is_estimate() || source_failed;

        for i in 0..n {
            for j in 0..n {
                if cells[i * n + j].is_some() {
                    continue;
                }
                let key = self.key(grid[i], grid[j]);
                let cost = match fetched.get(&key) {
                    Some(cost) => *cost,
                    None => {
                        estimated = true;
                        self.fallback.estimate(coordinates[i], coordinates[j])
                    }
                };
                cells[i * n + j] = Some(cost);
            }
        }

        debug!(
            locations = n,
            cache_hits = hits,
            fetched = fetched.len(),
            estimated,
            "built distance matrix"
        );

        DistanceMatrix {
            size: n,
            cells: cells.into_iter().map(Option::unwrap_or_default).collect(),
            estimated,
        }
    }

    /// Request the missing pairs in origin × destination blocks no larger
    /// than the source's element limit.
    fn fetch(
        &self,
        missing: &BTreeSet<PairKey>,
        representative: &HashMap<GridPoint, Coordinate>,
    ) -> (HashMap<PairKey, TravelCost>, bool) {
        let mut fetched = HashMap::new();
        if missing.is_empty() {
            return (fetched, false);
        }

        let max_elements = self.source.max_elements().max(1);
        let cacheable = !self.source.is_estimate();

        for block in request_blocks(missing) {
            let destinations: Vec<GridPoint> = block.destinations.into_iter().collect();
            let cols_chunk = destinations.len().min(max_elements);
            let rows_chunk = (max_elements / cols_chunk).max(1);

            for row_block in block.origins.chunks(rows_chunk) {
                let from: Vec<Coordinate> = row_block.iter().map(|p| representative[p]).collect();
                for col_block in destinations.chunks(cols_chunk) {
                    let to: Vec<Coordinate> =
                        col_block.iter().map(|p| representative[p]).collect();
                    let table = match self.source.table(&from, &to) {
                        Ok(table) => table,
                        Err(err) => {
                            warn!(error = %err, "distance source failed, falling back to haversine estimates");
                            return (fetched, true);
                        }
                    };
                    for (row, origin) in table.iter().zip(row_block) {
                        for (cell, destination) in row.iter().zip(col_block) {
                            if origin == destination {
                                continue;
                            }
                            let Some(cost) = cell else {
                                continue;
                            };
                            let key = self.key(*origin, *destination);
                            if cacheable {
                                self.cache.insert(key, *cost);
                            }
                            fetched.insert(key, *cost);
                        }
                    }
                }
            }
        }

        (fetched, false)
    }
}

/// Origins sharing one destination set; every off-diagonal cell is missing.
#[derive(Debug, Default)]
struct RequestBlock {
    origins: Vec<GridPoint>,
    destinations: BTreeSet<GridPoint>,
}

/// Group missing pairs by origin so that no block asks for a cached pair.
/// An origin joins the first block whose cross product stays made of missing
/// pairs (and diagonal cells) once it is added.
fn request_blocks(missing: &BTreeSet<PairKey>) -> Vec<RequestBlock> {
    let mut by_origin: BTreeMap<GridPoint, BTreeSet<GridPoint>> = BTreeMap::new();
    for key in missing {
        by_origin.entry(key.from).or_default().insert(key.to);
    }

    let mut blocks: Vec<RequestBlock> = Vec::new();
    for (&origin, wanted) in &by_origin {
        let fits = |block: &RequestBlock| {
            block
                .destinations
                .iter()
                .all(|d| *d == origin || wanted.contains(d))
                && wanted.difference(&block.destinations).all(|d| {
                    block
                        .origins
                        .iter()
                        .all(|r| r == d || by_origin[r].contains(d))
                })
        };
        match blocks.iter().position(fits) {
            Some(i) => {
                blocks[i].origins.push(origin);
                blocks[i].destinations.extend(wanted.iter().copied());
            }
            None => blocks.push(RequestBlock {
                origins: vec![origin],
                destinations: wanted.clone(),
            }),
        }
    }
    blocks
}

/// Maps stops and vehicle depots onto deduplicated matrix nodes.
#[derive(Debug, Clone, PartialEq)]
pub struct LocationPlan {
    pub coordinates: Vec<Coordinate>,
    /// Matrix node of each stop, in stop order.
    pub stop_nodes: Vec<usize>,
    /// Matrix node of each vehicle's depot, in fleet order.
    pub depot_nodes: Vec<Option<usize>>,
}

impl LocationPlan {
    pub fn new(stops: &[Stop], fleet: &[Vehicle]) -> Result<Self, OptimizeError> {
        let mut plan = LocationPlan {
            coordinates: Vec::new(),
            stop_nodes: Vec::with_capacity(stops.len()),
            depot_nodes: Vec::with_capacity(fleet.len()),
        };
        let mut index: HashMap<String, usize> = HashMap::new();

        for vehicle in fleet {
            let node = vehicle.depot.map(|depot| plan.node_for(depot, &mut index));
            plan.depot_nodes.push(node);
        }
        for stop in stops {
            let coordinate = stop
                .coordinate()
                .ok_or_else(|| OptimizeError::UnresolvedStop(stop.id.clone()))?;
            let node = plan.node_for(coordinate, &mut index);
            plan.stop_nodes.push(node);
        }

        Ok(plan)
    }

    fn node_for(&mut self, coordinate: Coordinate, index: &mut HashMap<String, usize>) -> usize {
        *index.entry(location_key(coordinate)).or_insert_with(|| {
            self.coordinates.push(coordinate);
            self.coordinates.len() - 1
        })
    }
}

fn location_key(location: Coordinate) -> String {
    format!("{:.6},{:.6}", location.lat, location.lng)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheConfig;
    use crate::error::SourceError;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingSource {
        requests: Mutex<Vec<(usize, usize)>>,
        max_elements: usize,
        broken: bool,
        unroutable: Option<(usize, usize)>,
    }

    impl RecordingSource {
        fn with_limit(max_elements: usize) -> Self {
            Self {
                max_elements,
                ..Default::default()
            }
        }

        fn request_count(&self) -> usize {
            self.requests.lock().unwrap().len()
        }
    }

    impl DistanceSource for RecordingSource {
        fn table(
            &self,
            origins: &[Coordinate],
            destinations: &[Coordinate],
        ) -> Result<Vec<Vec<Option<TravelCost>>>, SourceError> {
            self.requests
                .lock()
                .unwrap()
                .push((origins.len(), destinations.len()));
            if self.broken {
                return Err(SourceError::Unavailable("connection refused".into()));
            }
            Ok(origins
                .iter()
                .enumerate()
                .map(|(r, _)| {
                    destinations
                        .iter()
                        .enumerate()
                        .map(|(c, _)| {
                            if self.unroutable == Some((r, c)) {
                                None
                            } else {
                                Some(TravelCost::new(1000, 100))
                            }
                        })
                        .collect()
                })
                .collect())
        }

        fn max_elements(&self) -> usize {
            self.max_elements
        }
    }

    fn points() -> Vec<Coordinate> {
        vec![
            Coordinate::new(40.5610, -111.9290),
            Coordinate::new(40.5700, -111.9000),
            Coordinate::new(40.6000, -111.8800),
            Coordinate::new(40.5200, -111.9500),
        ]
    }

    fn fresh_cache() -> Arc<MatrixCache> {
        Arc::new(MatrixCache::new(CacheConfig::default()))
    }

    #[test]
    fn test_diagonal_is_zero() {
        let builder = DistanceMatrixBuilder::new(RecordingSource::with_limit(100), fresh_cache());
        let matrix = builder.build(&points());
        for i in 0..matrix.size() {
            assert_eq!(matrix.get(i, i), TravelCost::ZERO);
        }
        assert_eq!(matrix.get(0, 1), TravelCost::new(1000, 100));
        assert!(!matrix.is_estimated());
    }

    #[test]
    fn test_requests_are_batched_within_element_limit() {
        let source = RecordingSource::with_limit(8);
        let builder = DistanceMatrixBuilder::new(&source, fresh_cache());
        builder.build(&points());

        let requests = source.requests.lock().unwrap().clone();
        assert_eq!(requests, vec![(2, 4), (2, 4)]);
        assert!(requests.iter().all(|(r, c)| r * c <= 8));
    }

    #[test]
    fn test_second_build_is_served_from_cache() {
        let source = RecordingSource::with_limit(100);
        let cache = fresh_cache();
        let builder = DistanceMatrixBuilder::new(&source, Arc::clone(&cache));

        let first = builder.build(&points());
        assert_eq!(source.request_count(), 1);
        assert_eq!(cache.len(), 12);

        let second = builder.build(&points());
        assert_eq!(source.request_count(), 1);
        assert_eq!(first, second);
    }

    #[test]
    fn test_partial_cache_hit_requests_only_new_pairs() {
        let source = RecordingSource::with_limit(100);
        let cache = fresh_cache();
        let builder = DistanceMatrixBuilder::new(&source, Arc::clone(&cache));

        builder.build(&points()[..3]);
        assert_eq!(cache.len(), 6);

        // Only the pairs touching the fourth point are new: one row out of it
        // and one column into it.
        let matrix = builder.build(&points());
        let requests = source.requests.lock().unwrap().clone();
        assert_eq!(requests, vec![(3, 3), (1, 3), (3, 1)]);
        assert_eq!(cache.len(), 12);
        assert!(!matrix.is_estimated());
    }

    #[test]
    fn test_request_blocks_cover_missing_pairs_once() {
        let p: Vec<GridPoint> = points().iter().map(|c| c.grid_point(4)).collect();
        let key = |a: usize, b: usize| PairKey { from: p[a], to: p[b] };
        let missing: BTreeSet<PairKey> =
            [key(0, 1), key(0, 2), key(1, 0), key(2, 3), key(3, 2)].into_iter().collect();

        let mut requested = Vec::new();
        for block in request_blocks(&missing) {
            for origin in &block.origins {
                for destination in &block.destinations {
                    if origin != destination {
                        requested.push(PairKey { from: *origin, to: *destination });
                    }
                }
            }
        }
        requested.sort();
        assert_eq!(requested, missing.into_iter().collect::<Vec<_>>());
    }

    #[test]
    fn test_jittered_coordinates_hit_cache() {
        let source = RecordingSource::with_limit(100);
        let builder = DistanceMatrixBuilder::new(&source, fresh_cache());
        builder.build(&points());

        let jittered: Vec<_> = points()
            .into_iter()
            .map(|c| Coordinate::new(c.lat + 0.000_01, c.lng - 0.000_01))
            .collect();
        builder.build(&jittered);
        assert_eq!(source.request_count(), 1);
    }

    #[test]
    fn test_unavailable_source_falls_back_to_haversine() {
        let source = RecordingSource {
            broken: true,
            ..RecordingSource::with_limit(100)
        };
        let cache = fresh_cache();
        let builder = DistanceMatrixBuilder::new(&source, Arc::clone(&cache));
        let matrix = builder.build(&points());

        assert!(matrix.is_estimated());
        let expected = HaversineMatrix::default().estimate(points()[0], points()[1]);
        assert_eq!(matrix.get(0, 1), expected);
        assert!(cache.is_empty(), "estimates must not be cached");
    }

    #[test]
    fn test_unroutable_cell_is_estimated() {
        let source = RecordingSource {
            unroutable: Some((0, 1)),
            ..RecordingSource::with_limit(100)
        };
        let builder = DistanceMatrixBuilder::new(&source, fresh_cache());
        let matrix = builder.build(&points());
        assert!(matrix.is_estimated());
    }

    #[test]
    fn test_symmetric_builder_shares_entries() {
        let cache = fresh_cache();
        let options = MatrixOptions {
            symmetric: true,
            ..MatrixOptions::default()
        };
        let builder = DistanceMatrixBuilder::with_options(
            RecordingSource::with_limit(100),
            Arc::clone(&cache),
            options,
        );
        let matrix = builder.build(&points());
        assert_eq!(cache.len(), 6);
        assert_eq!(matrix.get(1, 3), matrix.get(3, 1));
    }

    #[test]
    fn test_location_plan_dedupes_shared_points() {
        let depot = Coordinate::new(40.5610, -111.9290);
        let stops = vec![
            Stop::new("a", "x").at(Coordinate::new(40.57, -111.90)),
            Stop::new("b", "y").at(depot),
            Stop::new("c", "z").at(Coordinate::new(40.57, -111.90)),
        ];
        let fleet = vec![
            Vehicle::standard("v1", 5).with_depot(depot),
            Vehicle::standard("v2", 5),
        ];
        let plan = LocationPlan::new(&stops, &fleet).unwrap();

        assert_eq!(plan.coordinates.len(), 2);
        assert_eq!(plan.depot_nodes, vec![Some(0), None]);
        assert_eq!(plan.stop_nodes, vec![1, 0, 1]);
    }

    #[test]
    fn test_location_plan_rejects_unresolved_stop() {
        let stops = vec![Stop::new("a", "x")];
        assert_eq!(
            LocationPlan::new(&stops, &[]),
            Err(OptimizeError::UnresolvedStop("a".into()))
        );
    }
}
