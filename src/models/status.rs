// Service health rows and the ingestion payload.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthState {
    Healthy,
    Degraded,
    Critical,
    Unhealthy,
    Down,
}

impl HealthState {
    pub fn as_str(self) -> &'static str {
        match self {
            HealthState::Healthy => "healthy",
            HealthState::Degraded => "degraded",
            HealthState::Critical => "critical",
            HealthState::Unhealthy => "unhealthy",
            HealthState::Down => "down",
        }
    }
}

impl fmt::Display for HealthState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HealthState {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "healthy" => Ok(HealthState::Healthy),
            "degraded" => Ok(HealthState::Degraded),
            "critical" => Ok(HealthState::Critical),
            "unhealthy" => Ok(HealthState::Unhealthy),
            "down" => Ok(HealthState::Down),
            other => anyhow::bail!("unknown health state {:?}", other),
        }
    }
}

/// One status observation. Rows accumulate per name; "latest" is derived at read time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceStatus {
    pub name: String,
    pub status: HealthState,
    pub detail: String,
    /// UTC Unix milliseconds.
    pub timestamp: i64,
}

/// Body of POST /api/service/status (pushed by backup scripts and other external jobs).
#[derive(Debug, Clone, Deserialize)]
pub struct StatusSubmission {
    pub name: String,
    pub status: HealthState,
    #[serde(default)]
    pub details: Map<String, Value>,
}

impl StatusSubmission {
    /// Stamps the submission with the receipt time and flattens `details` into `"k: v, k: v"`.
    pub fn into_status(self, received_at: i64) -> ServiceStatus {
        ServiceStatus {
            name: self.name,
            status: self.status,
            detail: flatten_details(&self.details),
            timestamp: received_at,
        }
    }
}

/// Keys come out sorted; strings are printed without quotes.
pub fn flatten_details(details: &Map<String, Value>) -> String {
    let mut pairs: Vec<(&String, &Value)> = details.iter().collect();
    pairs.sort_by(|a, b| a.0.cmp(b.0));
    pairs
        .into_iter()
        .map(|(k, v)| match v {
            Value::String(s) => format!("{}: {}", k, s),
            other => format!("{}: {}", k, other),
        })
        .collect::<Vec<_>>()
        .join(", ")
}
