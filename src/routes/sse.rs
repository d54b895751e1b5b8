// Server-Sent Events handlers: one publisher task per connection, bridged to the response
// body through a bounded channel.

use axum::{
    extract::{Query, State, rejection::QueryRejection},
    http::{HeaderName, HeaderValue, StatusCode},
    response::{
        IntoResponse, Response,
        sse::{Event, KeepAlive, Sse},
    },
};
use futures_util::stream;
use std::convert::Infallible;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::mpsc;
use tokio::time::Duration;

use super::AppState;
use crate::stream::cursor::Resolution;
use crate::stream::{Feed, MetricsFeed, Publisher, StatusFeed, StreamEvent, StreamSettings};

pub(super) const SSE_SEND_TIMEOUT: Duration = Duration::from_secs(10);

/// Counts live stream connections (connect = +1, drop = -1).
struct StreamGuard(Arc<AtomicUsize>);

impl StreamGuard {
    fn new(counter: Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::Relaxed);
        Self(counter)
    }
}

impl Drop for StreamGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::Relaxed);
    }
}

/// SSE /api/stream/hardware-metrics?group=none|minute|hour|day|month
pub(super) async fn stream_hardware_metrics(
    State(state): State<AppState>,
    params: Result<Query<Vec<(String, String)>>, QueryRejection>,
) -> Response {
    let resolution = group_param(params);
    tracing::info!(
        feed = "hardware_metrics",
        group = resolution.as_str(),
        "SSE client connected"
    );
    let feed = MetricsFeed::new(state.history_repo.clone(), resolution);
    open_stream(&state, feed).await
}

/// SSE /api/stream/service-statuses
pub(super) async fn stream_service_statuses(State(state): State<AppState>) -> Response {
    tracing::info!(feed = "service_statuses", "SSE client connected");
    let feed = StatusFeed::new(state.history_repo.clone());
    open_stream(&state, feed).await
}

/// Runs the initial batch, then hands the connection to a publisher task.
/// A failed initial batch is answered with 500 instead of a stream.
async fn open_stream<F: Feed>(state: &AppState, feed: F) -> Response {
    let label = feed.label();
    let settings = StreamSettings {
        tick_interval: Duration::from_secs(state.config.streaming.tick_interval_secs),
        send_timeout: SSE_SEND_TIMEOUT,
    };
    let (publisher, initial) =
        match Publisher::connect(feed, settings, state.shutdown_rx.clone()).await {
            Ok(connected) => connected,
            Err(e) => {
                tracing::warn!(error = %e, feed = label, "initial batch failed");
                return (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    format!("Failed to query {}", label),
                )
                    .into_response();
            }
        };

    let (tx, rx) = mpsc::channel(state.config.streaming.channel_capacity);
    let guard = StreamGuard::new(state.stream_connections.clone());
    tokio::spawn(async move {
        let _guard = guard;
        publisher.run(initial, tx).await;
    });

    let events = stream::unfold(rx, |mut rx| async move {
        let event = rx.recv().await?;
        Some((Ok::<_, Infallible>(to_sse(&event)), rx))
    });
    let keep_alive = KeepAlive::new().interval(Duration::from_secs(
        state.config.streaming.keep_alive_secs,
    ));
    (
        // Keeps nginx-style proxies from buffering the stream.
        [(
            HeaderName::from_static("x-accel-buffering"),
            HeaderValue::from_static("no"),
        )],
        Sse::new(events).keep_alive(keep_alive),
    )
        .into_response()
}

/// First `group` value wins. A query string that cannot be read at all is treated like an
/// unrecognised group.
fn group_param(params: Result<Query<Vec<(String, String)>>, QueryRejection>) -> Resolution {
    match params {
        Ok(Query(pairs)) => Resolution::from_param(
            pairs
                .iter()
                .find(|(key, _)| key == "group")
                .map(|(_, value)| value.as_str()),
        ),
        Err(e) => {
            tracing::debug!(error = %e, "unreadable stream query; using minute buckets");
            Resolution::Minute
        }
    }
}

fn to_sse(event: &StreamEvent) -> Event {
    Event::default().event(event.name()).data(event.payload())
}
