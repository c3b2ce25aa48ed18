//! Planner configuration loaded from JSON.

use serde::Deserialize;

use crate::cache::CacheConfig;
use crate::error::ConfigError;
use crate::feasibility::FeasibilityOptions;
use crate::geocode::ResolverOptions;
use crate::matrix::MatrixOptions;
use crate::nominatim::NominatimConfig;
use crate::osrm::OsrmConfig;
use crate::solver::OptimizerOptions;

/// Every tunable of a planning run. Missing sections and fields take their
/// defaults, so `{}` is a valid configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PlannerConfig {
    pub geocode_cache: CacheConfig,
    pub matrix_cache: CacheConfig,
    pub resolver: ResolverOptions,
    pub matrix: MatrixOptions,
    pub feasibility: FeasibilityOptions,
    pub optimizer: OptimizerOptions,
    pub osrm: OsrmConfig,
    pub nominatim: NominatimConfig,
}

impl PlannerConfig {
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: PlannerConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |message: &str| Err(ConfigError::Invalid(message.to_string()));

        if self.geocode_cache.capacity == 0 || self.matrix_cache.capacity == 0 {
            return invalid("cache capacity must be at least 1");
        }
        if !(0.0..=1.0).contains(&self.feasibility.min_resolution_rate) {
            return invalid("min_resolution_rate must be between 0 and 1");
        }
        if self.feasibility.max_stops == 0 {
            return invalid("max_stops must be at least 1");
        }
        let speed = self.matrix.fallback_speed_kmh;
        if speed.is_nan() || speed <= 0.0 {
            return invalid("fallback_speed_kmh must be positive");
        }
        if self.matrix.precision_decimals > 9 {
            return invalid("precision_decimals must be at most 9");
        }
        if !(0..24 * 3600).contains(&self.optimizer.shift_start_secs) {
            return invalid("shift_start_secs must fall within one day");
        }
        if self.optimizer.estimated_slack_secs < 0 {
            return invalid("estimated_slack_secs must not be negative");
        }
        if self.osrm.max_elements == 0 {
            return invalid("osrm.max_elements must be at least 1");
        }
        if self.osrm.requests_per_second == 0 || self.nominatim.requests_per_second == 0 {
            return invalid("requests_per_second must be at least 1");
        }
        Ok(())
    }
}
