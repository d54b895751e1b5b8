// Bucketed streaming against SQLite: initial windows, incremental polls, bucket boundaries

mod common;

use common::{sample, temp_repo};
use homewatch::models::Sample;
use homewatch::stream::MetricsFeed;
use homewatch::stream::cursor::{Cursor, QueryPlan, Resolution};

const SEC: i64 = 1_000;
const MIN: i64 = 60 * SEC;

fn timestamps(batch: &[Sample]) -> Vec<i64> {
    batch.iter().map(|s| s.timestamp).collect()
}

#[tokio::test]
async fn raw_stream_initial_then_incremental() {
    let (_dir, repo) = temp_repo().await;
    let initial: Vec<_> = (1..=5).map(|t| sample(t * SEC, t as f64)).collect();
    repo.save_samples(&initial).await.unwrap();

    let mut feed = MetricsFeed::new(repo.clone(), Resolution::None);
    let batch = feed.next_batch().await.unwrap();
    assert_eq!(timestamps(&batch), vec![1000, 2000, 3000, 4000, 5000]);
    assert_eq!(feed.cursor(), Cursor::at(5 * SEC));

    repo.save_sample(&sample(6 * SEC, 6.0)).await.unwrap();
    let batch = feed.next_batch().await.unwrap();
    assert_eq!(timestamps(&batch), vec![6000]);
    assert_eq!(feed.cursor(), Cursor::at(6 * SEC));

    // Nothing new: empty batch, cursor stays.
    let batch = feed.next_batch().await.unwrap();
    assert!(batch.is_empty());
    assert_eq!(feed.cursor(), Cursor::at(6 * SEC));
}

#[tokio::test]
async fn raw_initial_window_is_newest_rows_ascending() {
    let (_dir, repo) = temp_repo().await;
    let rows: Vec<_> = (1..=150).map(|t| sample(t * SEC, 0.0)).collect();
    repo.save_samples(&rows).await.unwrap();

    let batch = repo
        .fetch_points(&QueryPlan::Initial {
            resolution: Resolution::None,
            limit: Resolution::None.limit(),
        })
        .await
        .unwrap();
    assert_eq!(batch.len(), 100);
    assert_eq!(batch[0].timestamp, 51 * SEC);
    assert_eq!(batch[99].timestamp, 150 * SEC);
    assert!(batch.windows(2).all(|w| w[0].timestamp < w[1].timestamp));
}

#[tokio::test]
async fn raw_incremental_delivers_equal_timestamps_together() {
    let (_dir, repo) = temp_repo().await;
    repo.save_sample(&sample(1000, 1.0)).await.unwrap();

    let mut feed = MetricsFeed::new(repo.clone(), Resolution::None);
    feed.next_batch().await.unwrap();

    repo.save_samples(&[sample(2000, 2.0), sample(2000, 3.0)])
        .await
        .unwrap();
    let batch = feed.next_batch().await.unwrap();
    assert_eq!(timestamps(&batch), vec![2000, 2000]);
}

#[tokio::test]
async fn minute_buckets_average_and_skip_late_rows() {
    let (_dir, repo) = temp_repo().await;
    repo.save_samples(&[
        sample(0, 5.0),
        sample(30 * SEC, 15.0),
        sample(MIN, 20.0),
        sample(MIN + 10 * SEC, 20.0),
    ])
    .await
    .unwrap();

    let mut feed = MetricsFeed::new(repo.clone(), Resolution::Minute);
    let batch = feed.next_batch().await.unwrap();
    assert_eq!(timestamps(&batch), vec![0, MIN]);
    assert_eq!(batch[0].cpu_percent, 10.0);
    assert_eq!(batch[1].cpu_percent, 20.0);
    assert_eq!(feed.cursor(), Cursor::at(MIN));

    // A row for an already-emitted bucket is not merged back in.
    repo.save_sample(&sample(45 * SEC, 90.0)).await.unwrap();
    let batch = feed.next_batch().await.unwrap();
    assert!(batch.is_empty());
    assert_eq!(feed.cursor(), Cursor::at(MIN));

    // The next bucket arrives normally.
    repo.save_sample(&sample(2 * MIN + 5 * SEC, 30.0))
        .await
        .unwrap();
    let batch = feed.next_batch().await.unwrap();
    assert_eq!(timestamps(&batch), vec![2 * MIN]);
    assert_eq!(batch[0].cpu_percent, 30.0);
    assert_eq!(feed.cursor(), Cursor::at(2 * MIN));
}

#[tokio::test]
async fn grouped_initial_limit_counts_raw_rows() {
    let (_dir, repo) = temp_repo().await;
    // Three buckets; the limit only reaches into the last two.
    repo.save_samples(&[
        sample(0, 100.0),
        sample(MIN, 10.0),
        sample(2 * MIN, 20.0),
        sample(2 * MIN + SEC, 40.0),
    ])
    .await
    .unwrap();

    let batch = repo
        .fetch_points(&QueryPlan::Initial {
            resolution: Resolution::Minute,
            limit: 3,
        })
        .await
        .unwrap();
    assert_eq!(timestamps(&batch), vec![MIN, 2 * MIN]);
    assert_eq!(batch[1].cpu_percent, 30.0);
}

#[tokio::test]
async fn sql_buckets_agree_with_truncate() {
    let (_dir, repo) = temp_repo().await;
    // 2024-03-15T13:47:21.500Z
    let ts = 1_710_510_441_500;
    repo.save_sample(&sample(ts, 1.0)).await.unwrap();

    for resolution in Resolution::ALL {
        let batch = repo
            .fetch_points(&QueryPlan::Initial {
                resolution,
                limit: resolution.limit(),
            })
            .await
            .unwrap();
        assert_eq!(batch.len(), 1, "{}", resolution.as_str());
        assert_eq!(
            batch[0].timestamp,
            resolution.truncate(ts),
            "{}",
            resolution.as_str()
        );
    }
}

#[tokio::test]
async fn month_buckets_split_on_calendar_months() {
    let (_dir, repo) = temp_repo().await;
    // 2024-01-31T23:59:59Z and 2024-02-01T00:00:00Z
    let jan = 1_706_745_599_000;
    let feb = 1_706_745_600_000;
    repo.save_samples(&[sample(jan, 10.0), sample(feb, 30.0)])
        .await
        .unwrap();

    let mut feed = MetricsFeed::new(repo.clone(), Resolution::Month);
    let batch = feed.next_batch().await.unwrap();
    assert_eq!(timestamps(&batch), vec![1_704_067_200_000, feb]);
    assert_eq!(batch[0].cpu_percent, 10.0);
    assert_eq!(batch[1].cpu_percent, 30.0);
}

#[tokio::test]
async fn empty_store_keeps_cursor_unset() {
    let (_dir, repo) = temp_repo().await;
    for resolution in Resolution::ALL {
        let mut feed = MetricsFeed::new(repo.clone(), resolution);
        assert!(feed.next_batch().await.unwrap().is_empty());
        assert!(feed.cursor().is_unset());
    }
}
