//! van-route-planner core
//!
//! Routes a small fleet of standard and wheelchair vans through a day's
//! pickups: cached geocoding, cached distance matrices, a feasibility gate
//! and a time-budgeted optimizer.

pub mod cache;
pub mod config;
pub mod consolidate;
pub mod error;
pub mod feasibility;
pub mod geocode;
pub mod haversine;
mod local_search;
pub mod matrix;
pub mod model;
pub mod nominatim;
pub mod osrm;
pub mod planner;
pub mod run;
pub mod solver;
pub mod throttle;
pub mod traits;
