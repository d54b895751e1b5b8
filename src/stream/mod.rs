// Live push streams: one publisher task per client connection.
// Transport-agnostic: the publisher writes StreamEvents into a channel; routes::sse turns
// them into Server-Sent Events.

pub mod cursor;

use std::future::Future;
use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::time::{Duration, Instant, MissedTickBehavior, interval_at, timeout};

use crate::models::{Sample, ServiceStatus};
use cursor::{Cursor, QueryPlan, Resolution};

/// Read side of the sample table, as seen by metrics streams.
pub trait SampleSource: Send + Sync + 'static {
    fn fetch_points(
        &self,
        plan: &QueryPlan,
    ) -> impl Future<Output = anyhow::Result<Vec<Sample>>> + Send;
}

/// Read side of the status table, as seen by the status feed.
pub trait StatusSource: Send + Sync + 'static {
    fn latest_statuses(&self) -> impl Future<Output = anyhow::Result<Vec<ServiceStatus>>> + Send;
}

/// One push unit: event name plus JSON (or diagnostic text) payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    Update(String),
    Error(String),
}

impl StreamEvent {
    pub fn name(&self) -> &'static str {
        match self {
            StreamEvent::Update(_) => "update",
            StreamEvent::Error(_) => "error",
        }
    }

    pub fn payload(&self) -> &str {
        match self {
            StreamEvent::Update(p) | StreamEvent::Error(p) => p,
        }
    }
}

/// A pollable source of push events. The first poll is the initial batch.
pub trait Feed: Send + 'static {
    /// Short name used in logs.
    fn label(&self) -> &'static str;

    /// Reads the next batch. On error nothing about the feed's position changes.
    fn poll(&mut self) -> impl Future<Output = anyhow::Result<Vec<StreamEvent>>> + Send;
}

/// Hardware samples at one resolution, resumed from a per-connection cursor.
pub struct MetricsFeed<S> {
    source: Arc<S>,
    resolution: Resolution,
    cursor: Cursor,
}

impl<S: SampleSource> MetricsFeed<S> {
    pub fn new(source: Arc<S>, resolution: Resolution) -> Self {
        Self {
            source,
            resolution,
            cursor: Cursor::unset(),
        }
    }

    pub fn cursor(&self) -> Cursor {
        self.cursor
    }

    /// Fetches the batch the cursor points at and advances past it.
    pub async fn next_batch(&mut self) -> anyhow::Result<Vec<Sample>> {
        let plan = cursor::resolve(self.resolution, self.cursor);
        let batch = self.source.fetch_points(&plan).await?;
        self.cursor.advance(&batch);
        Ok(batch)
    }
}

impl<S: SampleSource> Feed for MetricsFeed<S> {
    fn label(&self) -> &'static str {
        "hardware_metrics"
    }

    async fn poll(&mut self) -> anyhow::Result<Vec<StreamEvent>> {
        let batch = self.next_batch().await?;
        let events = batch
            .iter()
            .map(|s| serde_json::to_string(s).map(StreamEvent::Update))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(events)
    }
}

/// Full snapshot of the latest status per service, re-sent every tick.
pub struct StatusFeed<S> {
    source: Arc<S>,
}

impl<S: StatusSource> StatusFeed<S> {
    pub fn new(source: Arc<S>) -> Self {
        Self { source }
    }
}

impl<S: StatusSource> Feed for StatusFeed<S> {
    fn label(&self) -> &'static str {
        "service_statuses"
    }

    async fn poll(&mut self) -> anyhow::Result<Vec<StreamEvent>> {
        let statuses = self.source.latest_statuses().await?;
        if statuses.is_empty() {
            return Ok(Vec::new());
        }
        Ok(vec![StreamEvent::Update(serde_json::to_string(&statuses)?)])
    }
}

/// Lifecycle of one connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Streaming,
    Disconnected,
    ServerStopped,
}

#[derive(Debug, Clone, Copy)]
pub struct StreamSettings {
    pub tick_interval: Duration,
    /// Max time a single event may wait for room in the connection's channel.
    pub send_timeout: Duration,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(5),
            send_timeout: Duration::from_secs(10),
        }
    }
}

pub struct Publisher<F> {
    feed: F,
    settings: StreamSettings,
    shutdown: watch::Receiver<bool>,
    state: StreamState,
}

impl<F: Feed> Publisher<F> {
    /// Runs the initial batch; the publisher comes back already streaming. An error here
    /// fails the connection before any response is sent.
    pub async fn connect(
        mut feed: F,
        settings: StreamSettings,
        shutdown: watch::Receiver<bool>,
    ) -> anyhow::Result<(Self, Vec<StreamEvent>)> {
        let initial = feed.poll().await?;
        let publisher = Self {
            feed,
            settings,
            shutdown,
            state: StreamState::Streaming,
        };
        Ok((publisher, initial))
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    /// Flushes `initial`, then polls every tick until the client goes away or the server
    /// stops. Returns the terminal state.
    pub async fn run(
        mut self,
        initial: Vec<StreamEvent>,
        tx: mpsc::Sender<StreamEvent>,
    ) -> StreamState {
        let label = self.feed.label();
        let send_timeout = self.settings.send_timeout;
        if let Some(end) = flush(send_timeout, initial, &tx, &mut self.shutdown).await {
            return self.finish(end, label);
        }

        let period = self.settings.tick_interval;
        let mut tick = interval_at(Instant::now() + period, period);
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let end = loop {
            if *self.shutdown.borrow() {
                break StreamState::ServerStopped;
            }
            tokio::select! {
                biased;
                _ = stop_signal(&mut self.shutdown) => break StreamState::ServerStopped,
                _ = tx.closed() => break StreamState::Disconnected,
                _ = tick.tick() => {
                    let events = match self.feed.poll().await {
                        Ok(events) => events,
                        Err(e) => {
                            tracing::warn!(error = %e, feed = label, "stream poll failed");
                            vec![StreamEvent::Error(e.to_string())]
                        }
                    };
                    // A poll that raced a shutdown is discarded.
                    if *self.shutdown.borrow() {
                        break StreamState::ServerStopped;
                    }
                    if let Some(end) = flush(send_timeout, events, &tx, &mut self.shutdown).await {
                        break end;
                    }
                }
            }
        };
        self.finish(end, label)
    }

    fn finish(&mut self, end: StreamState, label: &'static str) -> StreamState {
        self.state = end;
        match end {
            StreamState::ServerStopped => {
                tracing::info!(feed = label, "SSE stream closed: server stopping")
            }
            _ => tracing::info!(feed = label, "SSE client disconnected"),
        }
        end
    }
}

/// One channel send per event, each raced against shutdown. Returns the terminal state if
/// the client is gone or the server is stopping.
async fn flush(
    send_timeout: Duration,
    events: Vec<StreamEvent>,
    tx: &mpsc::Sender<StreamEvent>,
    shutdown: &mut watch::Receiver<bool>,
) -> Option<StreamState> {
    for event in events {
        tokio::select! {
            biased;
            _ = stop_signal(shutdown) => return Some(StreamState::ServerStopped),
            sent = timeout(send_timeout, tx.send(event)) => match sent {
                Ok(Ok(())) => {}
                Ok(Err(_)) | Err(_) => return Some(StreamState::Disconnected),
            },
        }
    }
    None
}

/// Resolves once shutdown is flagged or its sender is gone.
async fn stop_signal(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stopped| *stopped).await;
}
