// Shared test helpers

#![allow(dead_code)]

use homewatch::history_repo::HistoryRepo;
use homewatch::models::{HealthState, Sample, ServiceStatus};
use std::sync::Arc;
use tempfile::TempDir;

pub const TEST_CONFIG: &str = r#"
[server]
port = 8081
host = "0.0.0.0"

[database]
path = "data/test.db"
max_pool_size = 2

[streaming]
tick_interval_secs = 1
channel_capacity = 16
keep_alive_secs = 15
"#;

/// Fresh, initialized store in a temp dir. Keep the TempDir alive for the test's duration.
pub async fn temp_repo() -> (TempDir, Arc<HistoryRepo>) {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("history.db");
    let repo = HistoryRepo::connect(path.to_str().unwrap(), 2, 30)
        .await
        .unwrap();
    repo.init().await.unwrap();
    (dir, Arc::new(repo))
}

/// Store connected but with no tables, so every read fails.
pub async fn uninitialized_repo() -> (TempDir, Arc<HistoryRepo>) {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("empty.db");
    let repo = HistoryRepo::connect(path.to_str().unwrap(), 2, 30)
        .await
        .unwrap();
    (dir, Arc::new(repo))
}

pub fn sample(timestamp: i64, cpu_percent: f64) -> Sample {
    Sample::new(timestamp, cpu_percent, 40.0, 60.0)
}

pub fn status(name: &str, state: HealthState, timestamp: i64) -> ServiceStatus {
    ServiceStatus {
        name: name.into(),
        status: state,
        detail: String::new(),
        timestamp,
    }
}
