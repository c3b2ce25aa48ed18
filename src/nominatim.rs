//! Nominatim HTTP adapter for geocoding.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::GeocodeFailure;
use crate::haversine::haversine_km;
use crate::model::Coordinate;
use crate::throttle::Throttle;
use crate::traits::Geocoder;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NominatimConfig {
    pub base_url: String,
    pub user_agent: String,
    pub timeout_secs: u64,
    pub requests_per_second: u32,
    /// Two top candidates further apart than this make the match ambiguous.
    pub ambiguity_radius_m: f64,
}

impl Default for NominatimConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".to_string(),
            user_agent: "van-route-planner/0.1".to_string(),
            timeout_secs: 10,
            requests_per_second: 1,
            ambiguity_radius_m: 500.0,
        }
    }
}

#[derive(Debug)]
pub struct NominatimClient {
    config: NominatimConfig,
    client: reqwest::blocking::Client,
    throttle: Throttle,
}

impl NominatimClient {
    pub fn new(config: NominatimConfig) -> Result<Self, reqwest::Error> {
        let client = reqwest::blocking::Client::builder()
            .user_agent(config.user_agent.clone())
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()?;
        let throttle = Throttle::per_second(config.requests_per_second);

        Ok(Self {
            config,
            client,
            throttle,
        })
    }

    fn pick(&self, places: Vec<NominatimPlace>) -> Result<Coordinate, GeocodeFailure> {
        let candidates = places
            .into_iter()
            .filter_map(|place| place.coordinate())
            .collect::<Vec<_>>();

        match candidates.as_slice() {
            [] => Err(GeocodeFailure::NotFound),
            [only] => Ok(*only),
            [first, second, ..] => {
                let apart_m = haversine_km(*first, *second) * 1000.0;
                if apart_m > self.config.ambiguity_radius_m {
                    Err(GeocodeFailure::Ambiguous {
                        candidates: candidates.len(),
                    })
                } else {
                    Ok(*first)
                }
            }
        }
    }
}

impl Geocoder for NominatimClient {
    fn geocode(&self, address: &str) -> Result<Coordinate, GeocodeFailure> {
        self.throttle.wait();
        let url = format!("{}/search", self.config.base_url.trim_end_matches('/'));
        debug!(address, "requesting Nominatim search");

        let places = self
            .client
            .get(url)
            .query(&[("q", address), ("format", "jsonv2"), ("limit", "2")])
            .send()
            .and_then(|resp| resp.error_for_status())
            .and_then(|resp| resp.json::<Vec<NominatimPlace>>())
            .map_err(|err| GeocodeFailure::SourceUnavailable(err.to_string()))?;

        self.pick(places)
    }
}

#[derive(Debug, Deserialize)]
struct NominatimPlace {
    lat: String,
    lon: String,
}

impl NominatimPlace {
    fn coordinate(&self) -> Option<Coordinate> {
        let lat = self.lat.parse().ok()?;
        let lng = self.lon.parse().ok()?;
        let coordinate = Coordinate::new(lat, lng);
        coordinate.is_valid().then_some(coordinate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn places(json: &str) -> Vec<NominatimPlace> {
        serde_json::from_str(json).unwrap()
    }

    fn client() -> NominatimClient {
        NominatimClient::new(NominatimConfig::default()).unwrap()
    }

    #[test]
    fn test_no_results_is_not_found() {
        assert_eq!(client().pick(places("[]")), Err(GeocodeFailure::NotFound));
    }

    #[test]
    fn test_nearby_candidates_take_first() {
        let picked = client().pick(places(
            r#"[{"lat":"40.5610","lon":"-111.9290"},{"lat":"40.5612","lon":"-111.9291"}]"#,
        ));
        assert_eq!(picked, Ok(Coordinate::new(40.5610, -111.9290)));
    }

    #[test]
    fn test_distant_candidates_are_ambiguous() {
        let picked = client().pick(places(
            r#"[{"lat":"40.5610","lon":"-111.9290"},{"lat":"41.2230","lon":"-111.9738"}]"#,
        ));
        assert_eq!(picked, Err(GeocodeFailure::Ambiguous { candidates: 2 }));
    }

    #[test]
    fn test_unparseable_coordinates_are_skipped() {
        let picked = client().pick(places(r#"[{"lat":"north","lon":"-111.9"}]"#));
        assert_eq!(picked, Err(GeocodeFailure::NotFound));
    }
}
