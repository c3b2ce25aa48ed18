//! OSRM HTTP adapter for distance/duration tables.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::SourceError;
use crate::model::Coordinate;
use crate::throttle::Throttle;
use crate::traits::{DistanceSource, TravelCost};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OsrmConfig {
    pub base_url: String,
    pub profile: String,
    pub timeout_secs: u64,
    /// Largest origins × destinations product sent in one table request.
    pub max_elements: usize,
    pub requests_per_second: u32,
}

impl Default for OsrmConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:5000".to_string(),
            profile: "car".to_string(),
            timeout_secs: 10,
            max_elements: 2_500,
            requests_per_second: 40,
        }
    }
}

#[derive(Debug)]
pub struct OsrmClient {
    config: OsrmConfig,
    client: reqwest::blocking::Client,
    throttle: Throttle,
}

impl OsrmClient {
    pub fn new(config: OsrmConfig) -> Result<Self, reqwest::Error> {
        let client = reqwest::blocking::Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()?;
        let throttle = Throttle::per_second(config.requests_per_second);

        Ok(Self {
            config,
            client,
            throttle,
        })
    }

    /// Table URL with origins first, destinations after, selected by index.
    fn table_url(&self, origins: &[Coordinate], destinations: &[Coordinate]) -> String {
        let coords = origins
            .iter()
            .chain(destinations)
            .map(|c| format!("{:.6},{:.6}", c.lng, c.lat))
            .collect::<Vec<_>>()
            .join(";");
        let sources = (0..origins.len())
            .map(|i| i.to_string())
            .collect::<Vec<_>>()
            .join(";");
        let targets = (origins.len()..origins.len() + destinations.len())
            .map(|i| i.to_string())
            .collect::<Vec<_>>()
            .join(";");

        format!(
            "{}/table/v1/{}/{}?sources={}&destinations={}&annotations=distance,duration",
            self.config.base_url.trim_end_matches('/'),
            self.config.profile,
            coords,
            sources,
            targets
        )
    }
}

impl DistanceSource for OsrmClient {
    fn table(
        &self,
        origins: &[Coordinate],
        destinations: &[Coordinate],
    ) -> Result<Vec<Vec<Option<TravelCost>>>, SourceError> {
        if origins.is_empty() || destinations.is_empty() {
            return Ok(vec![Vec::new(); origins.len()]);
        }

        self.throttle.wait();
        let url = self.table_url(origins, destinations);
        debug!(
            origins = origins.len(),
            destinations = destinations.len(),
            "requesting OSRM table"
        );

        let body = self
            .client
            .get(url)
            .send()
            .and_then(|resp| resp.error_for_status())
            .and_then(|resp| resp.json::<OsrmTableResponse>())?;

        body.into_costs(origins.len(), destinations.len())
    }

    fn max_elements(&self) -> usize {
        self.config.max_elements
    }
}

#[derive(Debug, Deserialize)]
struct OsrmTableResponse {
    code: String,
    #[serde(default)]
    message: Option<String>,
    durations: Option<Vec<Vec<Option<f64>>>>,
    distances: Option<Vec<Vec<Option<f64>>>>,
}

impl OsrmTableResponse {
    fn into_costs(
        self,
        rows: usize,
        cols: usize,
    ) -> Result<Vec<Vec<Option<TravelCost>>>, SourceError> {
        if self.code != "Ok" {
            return Err(SourceError::Unavailable(format!(
                "OSRM returned {}: {}",
                self.code,
                self.message.unwrap_or_default()
            )));
        }
        let durations = self
            .durations
            .ok_or_else(|| SourceError::Malformed("missing durations".to_string()))?;
        let distances = self
            .distances
            .ok_or_else(|| SourceError::Malformed("missing distances".to_string()))?;
        if durations.len() != rows || distances.len() != rows {
            return Err(SourceError::Malformed(format!(
                "expected {} rows, got {}",
                rows,
                durations.len()
            )));
        }

        durations
            .into_iter()
            .zip(distances)
            .map(|(duration_row, distance_row)| {
                if duration_row.len() != cols || distance_row.len() != cols {
                    return Err(SourceError::Malformed(format!("expected {} columns", cols)));
                }
                Ok(duration_row
                    .into_iter()
                    .zip(distance_row)
                    .map(|(duration, distance)| match (distance, duration) {
                        (Some(distance), Some(duration)) => Some(TravelCost::new(
                            distance.round() as i32,
                            duration.round() as i32,
                        )),
                        _ => None,
                    })
                    .collect())
            })
            .collect()
    }
}
