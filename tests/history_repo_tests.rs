// HistoryRepo tests: connect, init, samples, statuses, prune

mod common;

use common::{sample, status, temp_repo};
use homewatch::history_repo::HistoryRepo;
use homewatch::models::HealthState;
use tempfile::TempDir;

#[tokio::test]
async fn history_repo_connect_and_init() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("nested").join("history.db");
    let path_str = path.to_str().unwrap();

    let repo = HistoryRepo::connect(path_str, 2, 30).await.unwrap();
    repo.init().await.unwrap();
    // Second init is no-op (IF NOT EXISTS)
    repo.init().await.unwrap();
    assert!(path.exists());
}

#[tokio::test]
async fn history_repo_save_and_recent_samples() {
    let (_dir, repo) = temp_repo().await;

    repo.save_samples(&[sample(1000, 1.0), sample(2000, 2.0), sample(3000, 3.0)])
        .await
        .unwrap();
    repo.save_sample(&sample(4000, 4.0)).await.unwrap();

    let recent = repo.recent_samples(2).await.unwrap();
    assert_eq!(recent.len(), 2);
    assert_eq!(recent[0].timestamp, 3000);
    assert_eq!(recent[1].timestamp, 4000);
    assert_eq!(recent[1].cpu_percent, 4.0);
    assert_eq!(recent[1].ram_percent, 40.0);
    assert_eq!(recent[1].disk_percent, 60.0);
}

#[tokio::test]
async fn history_repo_empty_writes_are_noops() {
    let (_dir, repo) = temp_repo().await;
    repo.save_samples(&[]).await.unwrap();
    repo.save_statuses(&[]).await.unwrap();
    assert!(repo.recent_samples(10).await.unwrap().is_empty());
    assert!(repo.latest_statuses().await.unwrap().is_empty());
}

#[tokio::test]
async fn history_repo_latest_status_per_name() {
    let (_dir, repo) = temp_repo().await;

    repo.save_statuses(&[
        status("web", HealthState::Healthy, 1000),
        status("backup", HealthState::Down, 1000),
        status("web", HealthState::Degraded, 2000),
    ])
    .await
    .unwrap();
    repo.save_statuses(&[status("backup", HealthState::Healthy, 3000)])
        .await
        .unwrap();

    let latest = repo.latest_statuses().await.unwrap();
    assert_eq!(latest.len(), 2);
    assert_eq!(latest[0].name, "backup");
    assert_eq!(latest[0].status, HealthState::Healthy);
    assert_eq!(latest[0].timestamp, 3000);
    assert_eq!(latest[1].name, "web");
    assert_eq!(latest[1].status, HealthState::Degraded);
}

#[tokio::test]
async fn history_repo_latest_status_tie_goes_to_last_insert() {
    let (_dir, repo) = temp_repo().await;

    repo.save_statuses(&[status("nas", HealthState::Healthy, 5000)])
        .await
        .unwrap();
    repo.save_statuses(&[status("nas", HealthState::Critical, 5000)])
        .await
        .unwrap();

    let latest = repo.latest_statuses().await.unwrap();
    assert_eq!(latest.len(), 1);
    assert_eq!(latest[0].status, HealthState::Critical);
}

#[tokio::test]
async fn history_repo_status_history_is_append_only() {
    let (_dir, repo) = temp_repo().await;

    for (i, state) in [HealthState::Healthy, HealthState::Down, HealthState::Healthy]
        .into_iter()
        .enumerate()
    {
        repo.save_statuses(&[status("web", state, 1000 * (i as i64 + 1))])
            .await
            .unwrap();
    }
    repo.save_statuses(&[status("other", HealthState::Down, 1500)])
        .await
        .unwrap();

    let all = repo.status_history("web", 0, i64::MAX).await.unwrap();
    let states: Vec<_> = all.iter().map(|s| s.status).collect();
    assert_eq!(
        states,
        vec![HealthState::Healthy, HealthState::Down, HealthState::Healthy]
    );

    // [from, to)
    let window = repo.status_history("web", 2000, 3000).await.unwrap();
    assert_eq!(window.len(), 1);
    assert_eq!(window[0].timestamp, 2000);
}

#[tokio::test]
async fn history_repo_prune_removes_rows_past_retention() {
    let (_dir, repo) = temp_repo().await;
    let now = chrono::Utc::now().timestamp_millis();
    let old = now - 31 * 24 * 60 * 60 * 1000;

    repo.save_samples(&[sample(old, 1.0), sample(now, 2.0)])
        .await
        .unwrap();
    repo.save_statuses(&[
        status("web", HealthState::Healthy, old),
        status("web", HealthState::Healthy, now),
    ])
    .await
    .unwrap();

    let removed = repo.prune_old_data().await.unwrap();
    assert_eq!(removed, 2);

    let recent = repo.recent_samples(10).await.unwrap();
    assert_eq!(recent.len(), 1);
    assert_eq!(recent[0].timestamp, now);
    let history = repo.status_history("web", 0, i64::MAX).await.unwrap();
    assert_eq!(history.len(), 1);

    repo.vacuum().await.unwrap();
}

#[tokio::test]
async fn history_repo_reads_fail_without_schema() {
    let (_dir, repo) = common::uninitialized_repo().await;
    assert!(repo.latest_statuses().await.is_err());
    assert!(repo.recent_samples(1).await.is_err());
}
