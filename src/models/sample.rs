// Hardware sample: one row of the time series, raw or bucket-averaged.

use serde::{Deserialize, Serialize};

/// CPU / RAM / disk usage at one instant (percent, 0..=100).
/// Aggregated rows reuse the shape: `timestamp` is then the bucket start.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Sample {
    /// UTC Unix milliseconds.
    pub timestamp: i64,
    pub cpu_percent: f64,
    pub ram_percent: f64,
    pub disk_percent: f64,
}

impl Sample {
    pub fn new(timestamp: i64, cpu_percent: f64, ram_percent: f64, disk_percent: f64) -> Self {
        Self {
            timestamp,
            cpu_percent,
            ram_percent,
            disk_percent,
        }
    }
}
