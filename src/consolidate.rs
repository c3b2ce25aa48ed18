//! Turn a rider roster into pickup stops.

use std::collections::HashMap;

use serde::Deserialize;
use tracing::debug;

use crate::geocode::normalize_address;
use crate::model::{Stop, TimeWindow};

/// One rider row from the master list.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RiderRecord {
    pub name: String,
    pub address: String,
    #[serde(default)]
    pub wheelchair: bool,
    #[serde(default)]
    pub time_window: Option<TimeWindow>,
}

impl RiderRecord {
    pub fn new(name: impl Into<String>, address: impl Into<String>, wheelchair: bool) -> Self {
        Self {
            name: name.into(),
            address: address.into(),
            wheelchair,
            time_window: None,
        }
    }
}

/// Roster spreadsheets mark wheelchair riders with `y`, `yes`, `true` or `1`.
pub fn parse_wheelchair_flag(raw: &str) -> bool {
    matches!(
        raw.trim().to_ascii_lowercase().as_str(),
        "y" | "yes" | "true" | "1"
    )
}

/// Group riders sharing an address (and wheelchair need) into one stop.
///
/// Stops come out in first-seen order with ids `stop-1`, `stop-2`, ...; the
/// first rider's spelling of the address is kept. A stop takes the first
/// time window any of its riders carries.
pub fn consolidate_riders(records: &[RiderRecord]) -> Vec<Stop> {
    let mut stops: Vec<Stop> = Vec::new();
    let mut index: HashMap<(String, bool), usize> = HashMap::new();

    for record in records {
        let key = (normalize_address(&record.address), record.wheelchair);
        match index.get(&key) {
            Some(&at) => {
                let stop = &mut stops[at];
                stop.demand += 1;
                stop.riders.push(record.name.clone());
                if stop.time_window.is_none() {
                    stop.time_window = record.time_window;
                }
            }
            None => {
                let mut stop = Stop::new(format!("stop-{}", stops.len() + 1), record.address.trim())
                    .wheelchair(record.wheelchair)
                    .riders(vec![record.name.clone()]);
                stop.time_window = record.time_window;
                index.insert(key, stops.len());
                stops.push(stop);
            }
        }
    }

    debug!(riders = records.len(), stops = stops.len(), "consolidated riders");
    stops
}
