//! Incremental polling of CloudWatch log streams
//!
//! Every cycle the poller:
//!
//! - Resolves dated group names and prefixes against the current time
//! - Enumerates the streams selected by the plan
//! - Fetches, concurrently, the events newer than each stream's checkpoint
//! - Emits the events stream by stream, advancing a stream's checkpoint
//!   only once its whole batch was handed to the sink
//!
//! A failure reading one stream is reported and retried next cycle without
//! affecting the others. Authorization failures stop the poller.

use chrono::{DateTime, Utc};
use futures::future::join_all;
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch, Semaphore};
use tokio::time::Instant;
use tracing::{debug, error, info, trace, warn};

use crate::client::{LogsClientTrait, RawEvent};
use crate::clock::{to_unix_millis, Clock, SystemClock};
use crate::config::{GroupSelector, ResolvedPlan, StartAt};
use crate::error::{ConfigError, LogsClientError, PollerError, Result};
use crate::monitoring::{CycleStatus, MonitoringConfig, PollEvent};
use crate::sink::{EmittedEvent, EventSink};
use crate::store::{CheckpointStore, StreamKey};

/// Runtime settings that are not part of the host configuration
#[derive(Debug, Clone)]
pub struct PollerOptions {
    /// Timeout applied to every API call
    pub api_timeout: Duration,
    /// Maximum number of streams fetched concurrently
    pub max_concurrent_streams: usize,
    /// How long in-flight fetches may run after shutdown is requested
    pub shutdown_grace_period: Duration,
    pub monitoring: MonitoringConfig,
}

impl Default for PollerOptions {
    fn default() -> Self {
        Self {
            api_timeout: Duration::from_secs(30),
            max_concurrent_streams: 8,
            shutdown_grace_period: Duration::from_secs(5),
            monitoring: MonitoringConfig::default(),
        }
    }
}

/// A source that could not be read during a cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFailure {
    pub log_group: String,
    /// `None` when the whole group (or prefix) failed to enumerate
    pub log_stream: Option<String>,
    pub error: String,
}

/// Outcome of one cycle
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleSummary {
    pub streams_polled: usize,
    pub events_emitted: usize,
    pub failures: Vec<SourceFailure>,
}

impl CycleSummary {
    pub fn status(&self) -> CycleStatus {
        if self.failures.is_empty() {
            CycleStatus::Healthy
        } else {
            CycleStatus::Degraded
        }
    }

    fn record_failure(&mut self, log_group: &str, log_stream: Option<&str>, error: String) {
        self.failures.push(SourceFailure {
            log_group: log_group.to_string(),
            log_stream: log_stream.map(String::from),
            error,
        });
    }
}

/// Why a single stream could not be processed this cycle
#[derive(Debug)]
enum StreamError {
    Retrieval(LogsClientError),
    Checkpoint(String),
    /// The fetch task panicked or was cancelled
    Task(String),
}

impl std::fmt::Display for StreamError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StreamError::Retrieval(e) => write!(f, "{}", e),
            StreamError::Checkpoint(e) => write!(f, "checkpoint read failed: {}", e),
            StreamError::Task(e) => write!(f, "fetch task failed: {}", e),
        }
    }
}

type FetchResult = std::result::Result<Vec<RawEvent>, StreamError>;

/// Shared state and collaborators of a poller
pub struct PollingContext<C, S, K>
where
    C: LogsClientTrait + 'static,
    S: CheckpointStore + 'static,
    K: EventSink + 'static,
{
    client: Arc<C>,
    store: Arc<S>,
    sink: Arc<K>,
    clock: Arc<dyn Clock>,
    plan: ResolvedPlan,
    options: PollerOptions,
    monitoring_tx: Option<mpsc::Sender<PollEvent>>,
    /// Lower bound for streams without a checkpoint when starting at the end:
    /// the start of the first cycle that saw the stream.
    tail_origins: Arc<parking_lot::Mutex<HashMap<StreamKey, i64>>>,
}

impl<C, S, K> Clone for PollingContext<C, S, K>
where
    C: LogsClientTrait + 'static,
    S: CheckpointStore + 'static,
    K: EventSink + 'static,
{
    fn clone(&self) -> Self {
        Self {
            client: self.client.clone(),
            store: self.store.clone(),
            sink: self.sink.clone(),
            clock: self.clock.clone(),
            plan: self.plan.clone(),
            options: self.options.clone(),
            monitoring_tx: self.monitoring_tx.clone(),
            tail_origins: self.tail_origins.clone(),
        }
    }
}

impl<C, S, K> PollingContext<C, S, K>
where
    C: LogsClientTrait + 'static,
    S: CheckpointStore + 'static,
    K: EventSink + 'static,
{
    /// Report an event to the host without ever blocking the poller
    fn report(&self, event: PollEvent) {
        if let Some(tx) = &self.monitoring_tx {
            match tx.try_send(event) {
                Ok(()) => trace!("Sent poll event"),
                Err(TrySendError::Full(event)) => {
                    warn!(event = ?event.event_type, "Reporting channel full, dropping event");
                }
                Err(TrySendError::Closed(_)) => trace!("Reporting channel closed"),
            }
        }
    }

    fn escalate(&self, context: &str, err: &LogsClientError) -> PollerError {
        error!(context = %context, error = %err, "Authorization failure, stopping poller");
        let err = PollerError::authorization(context, err);
        self.report(PollEvent::fatal(err.to_string()));
        err
    }
}

async fn with_timeout<T, F>(limit: Duration, call: F) -> std::result::Result<T, LogsClientError>
where
    F: Future<Output = std::result::Result<T, LogsClientError>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(LogsClientError::Timeout(format!(
            "no response within {:?}",
            limit
        ))),
    }
}

/// Resolves once `shutdown` is true or its sender is gone
async fn wait_for_shutdown(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow_and_update() {
            return;
        }
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}

/// Take the part of a stream's batch that fits into the remaining budget.
///
/// When events beyond the kept ones may share the last kept timestamp, that
/// trailing run is held back for the next cycle, since the checkpoint only
/// records a timestamp.
///
/// If the run is all that is left, a budget cut holds back the whole batch:
/// the stream gets a full budget in a later cycle. A run filling an entire
/// page can never be read in one piece, so it is emitted as it is.
fn take_batch(mut events: Vec<RawEvent>, fetch_limit: usize, budget: &mut usize) -> Vec<RawEvent> {
    let budget_cut = events.len() > *budget;
    let mut ambiguous_tail = events.len() >= fetch_limit;
    if budget_cut {
        let keep = *budget;
        ambiguous_tail = keep > 0 && events[keep].timestamp == events[keep - 1].timestamp;
        events.truncate(keep);
    }

    if ambiguous_tail {
        if let Some(last) = events.last().map(|e| e.timestamp) {
            match events.iter().rposition(|e| e.timestamp != last) {
                Some(i) => events.truncate(i + 1),
                None if budget_cut => events.clear(),
                None => {}
            }
        }
    }

    *budget -= events.len();
    events
}

/// Polls CloudWatch log streams and feeds their events to a sink
///
/// # Examples
///
/// ```rust,no_run
/// use cloudwatch_log_poller::{client, ChannelSink, InMemoryCheckpointStore, InputConfig, LogPoller, PollerOptions};
///
/// async fn run(config: InputConfig) -> anyhow::Result<()> {
///     let plan = config.build()?;
///     let client = client::connect(&config.poll).await;
///     let (sink, mut events) = ChannelSink::new(1024);
///     let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
///
///     let (poller, _reports) = LogPoller::new(
///         plan,
///         PollerOptions::default(),
///         client,
///         InMemoryCheckpointStore::new(),
///         sink,
///     )?;
///
///     tokio::spawn(async move {
///         while let Some(event) = events.recv().await {
///             println!("{}: {}", event.log_stream, event.message);
///         }
///     });
///
///     poller.run(shutdown_rx).await?;
///     drop(shutdown_tx);
///     Ok(())
/// }
/// ```
pub struct LogPoller<C, S, K>
where
    C: LogsClientTrait + 'static,
    S: CheckpointStore + 'static,
    K: EventSink + 'static,
{
    context: PollingContext<C, S, K>,
}

impl<C, S, K> LogPoller<C, S, K>
where
    C: LogsClientTrait + 'static,
    S: CheckpointStore + 'static,
    K: EventSink + 'static,
{
    /// Creates a new poller
    ///
    /// Returns the poller and, when monitoring is enabled, the receiving end
    /// of the reporting channel.
    pub fn new(
        plan: ResolvedPlan,
        options: PollerOptions,
        client: C,
        store: S,
        sink: K,
    ) -> std::result::Result<(Self, Option<mpsc::Receiver<PollEvent>>), ConfigError> {
        if options.max_concurrent_streams == 0 {
            return Err(ConfigError::InvalidConcurrency);
        }

        let (monitoring_tx, monitoring_rx) = if options.monitoring.enabled {
            let (tx, rx) = mpsc::channel(options.monitoring.channel_size.max(1));
            (Some(tx), Some(rx))
        } else {
            (None, None)
        };

        let context = PollingContext {
            client: Arc::new(client),
            store: Arc::new(store),
            sink: Arc::new(sink),
            clock: Arc::new(SystemClock),
            plan,
            options,
            monitoring_tx,
            tail_origins: Arc::new(parking_lot::Mutex::new(HashMap::new())),
        };

        Ok((Self { context }, monitoring_rx))
    }

    /// Replace the wall clock used to resolve names and start positions
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.context.clock = clock;
        self
    }

    pub fn plan(&self) -> &ResolvedPlan {
        &self.context.plan
    }

    /// Poll until `shutdown` flips to true.
    ///
    /// Returns `Ok(())` on shutdown and an error only when polling cannot
    /// continue, e.g. on an authorization failure.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        info!(
            groups = ?self.context.plan.groups,
            interval = ?self.context.plan.poll_interval,
            "Starting log poller"
        );

        loop {
            if *shutdown.borrow() {
                info!("Shutdown signal received");
                break;
            }

            match self.poll_cycle(&mut shutdown).await {
                Ok(summary) => debug!(
                    streams = summary.streams_polled,
                    events = summary.events_emitted,
                    failures = summary.failures.len(),
                    "Poll cycle finished"
                ),
                Err(e) if !e.is_fatal() => break,
                Err(e) => {
                    error!(error = %e, "Poller stopped");
                    return Err(e);
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(self.context.plan.poll_interval) => {}
                _ = wait_for_shutdown(&mut shutdown) => {
                    info!("Shutdown received between cycles");
                    break;
                }
            }
        }

        info!("Poller shutdown complete");
        Ok(())
    }

    /// Run exactly one cycle
    pub async fn poll_once(&self) -> Result<CycleSummary> {
        let (_shutdown_tx, mut shutdown_rx) = watch::channel(false);
        self.poll_cycle(&mut shutdown_rx).await
    }

    async fn poll_cycle(&self, shutdown: &mut watch::Receiver<bool>) -> Result<CycleSummary> {
        let ctx = &self.context;
        let started = Instant::now();
        let now = ctx.clock.now();
        let cycle_start_ms = to_unix_millis(&now);
        let mut summary = CycleSummary::default();

        ctx.report(PollEvent::cycle_started());
        debug!(cycle_start_ms, "Starting poll cycle");

        let keys = self.discover_sources(&now, &mut summary).await?;
        if summary.failures.is_empty() {
            self.prune_tail_origins(&keys);
        }
        let fetched = self.fetch_all(keys, cycle_start_ms, shutdown).await?;

        if let Some((key, err)) = fetched.iter().find_map(|(key, result)| match result {
            Err(StreamError::Retrieval(e)) if e.is_fatal() => Some((key, e)),
            _ => None,
        }) {
            return Err(ctx.escalate(&key.to_string(), err));
        }

        let fetch_limit = ctx.plan.event_limit as usize;
        let mut budget = fetch_limit;

        for (key, result) in fetched {
            if *shutdown.borrow() {
                info!("Shutdown requested before emitting remaining streams");
                ctx.report(PollEvent::interrupted());
                return Err(PollerError::Shutdown);
            }

            summary.streams_polled += 1;

            let events = match result {
                Ok(events) => events,
                Err(err) => {
                    warn!(group = %key.group, stream = %key.stream, error = %err, "Failed to read stream");
                    match &err {
                        StreamError::Retrieval(e) => ctx.report(PollEvent::retrieval_failure(
                            &key,
                            e.to_string(),
                            e.is_retryable(),
                        )),
                        StreamError::Checkpoint(e) => {
                            ctx.report(PollEvent::checkpoint_failure(&key, None, e.clone()))
                        }
                        StreamError::Task(e) => {
                            ctx.report(PollEvent::retrieval_failure(&key, e.clone(), true))
                        }
                    }
                    summary.record_failure(&key.group, Some(&key.stream), err.to_string());
                    continue;
                }
            };

            let batch = take_batch(events, fetch_limit, &mut budget);
            if batch.is_empty() {
                trace!(group = %key.group, stream = %key.stream, "No new events");
                continue;
            }

            let emitted = self.emit_batch(&key, batch, &mut summary).await;
            summary.events_emitted += emitted;
        }

        let status = summary.status();
        ctx.report(PollEvent::cycle_complete(
            status,
            summary.streams_polled,
            summary.failures.len(),
            summary.events_emitted,
            started.elapsed(),
        ));
        if status == CycleStatus::Degraded {
            warn!(failures = summary.failures.len(), "Poll cycle degraded");
        }

        Ok(summary)
    }

    /// Forget start positions of streams that are no longer selected, such
    /// as the streams of yesterday's dated group. Skipped when discovery was
    /// incomplete, so a transient listing failure does not move them.
    fn prune_tail_origins(&self, keys: &[StreamKey]) {
        let current: HashSet<&StreamKey> = keys.iter().collect();
        let mut origins = self.context.tail_origins.lock();
        let before = origins.len();
        origins.retain(|key, _| current.contains(key));
        if origins.len() < before {
            debug!(dropped = before - origins.len(), "Dropped start positions of retired streams");
        }
    }

    /// Concrete (group, stream) pairs to read this cycle
    async fn discover_sources(
        &self,
        now: &DateTime<Utc>,
        summary: &mut CycleSummary,
    ) -> Result<Vec<StreamKey>> {
        let ctx = &self.context;
        let timeout = ctx.options.api_timeout;
        let filter = ctx.plan.streams.resolve(now);

        let mut groups = Vec::new();
        for selector in ctx.plan.groups_at(now) {
            match selector {
                GroupSelector::Name(name) => groups.push(name),
                GroupSelector::Prefix(prefix) => {
                    match with_timeout(timeout, ctx.client.list_groups(&prefix)).await {
                        Ok(found) => groups.extend(found),
                        Err(e) if e.is_fatal() => return Err(ctx.escalate(&prefix, &e)),
                        Err(e) => {
                            warn!(prefix = %prefix, error = %e, "Failed to list log groups");
                            ctx.report(PollEvent::discovery_failure(Some(prefix.clone()), e.to_string()));
                            summary.record_failure(&prefix, None, e.to_string());
                        }
                    }
                }
            }
        }

        let mut seen_groups = HashSet::new();
        let mut seen_keys = HashSet::new();
        let mut keys = Vec::new();

        for group in groups {
            if !seen_groups.insert(group.clone()) {
                continue;
            }

            let streams = match with_timeout(timeout, ctx.client.list_streams(&group, &filter)).await {
                Ok(streams) => streams,
                Err(e) if e.is_fatal() => return Err(ctx.escalate(&group, &e)),
                Err(e) => {
                    warn!(group = %group, error = %e, "Failed to list log streams");
                    ctx.report(PollEvent::discovery_failure(Some(group.clone()), e.to_string()));
                    summary.record_failure(&group, None, e.to_string());
                    continue;
                }
            };

            for stream in streams.into_iter().filter(|s| filter.matches(s)) {
                let key = StreamKey::new(group.clone(), stream);
                if seen_keys.insert(key.clone()) {
                    keys.push(key);
                }
            }
        }

        debug!(streams = keys.len(), "Resolved sources for cycle");
        Ok(keys)
    }

    /// Fetch every key concurrently, bounded by `max_concurrent_streams`.
    /// Results come back in the order of `keys`.
    async fn fetch_all(
        &self,
        keys: Vec<StreamKey>,
        cycle_start_ms: i64,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<Vec<(StreamKey, FetchResult)>> {
        let ctx = &self.context;
        let semaphore = Arc::new(Semaphore::new(ctx.options.max_concurrent_streams));

        let mut handles = Vec::with_capacity(keys.len());
        let mut abort_handles = Vec::with_capacity(keys.len());

        for key in keys.iter().cloned() {
            let ctx = ctx.clone();
            let semaphore = semaphore.clone();

            let handle = tokio::spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .map_err(|e| StreamError::Task(e.to_string()))?;
                Self::fetch_stream(&ctx, &key, cycle_start_ms).await
            });

            abort_handles.push(handle.abort_handle());
            handles.push(handle);
        }

        let fan_in = join_all(handles);
        tokio::pin!(fan_in);

        let joined = tokio::select! {
            joined = &mut fan_in => joined,
            _ = wait_for_shutdown(shutdown) => {
                info!("Shutdown requested while fetching events");
                ctx.report(PollEvent::interrupted());
                if tokio::time::timeout(ctx.options.shutdown_grace_period, &mut fan_in)
                    .await
                    .is_err()
                {
                    warn!("Aborting fetches still running after the grace period");
                    for handle in &abort_handles {
                        handle.abort();
                    }
                }
                return Err(PollerError::Shutdown);
            }
        };

        Ok(keys
            .into_iter()
            .zip(joined)
            .map(|(key, outcome)| {
                let result = outcome.unwrap_or_else(|e| {
                    error!(group = %key.group, stream = %key.stream, error = %e, "Fetch task failed");
                    Err(StreamError::Task(e.to_string()))
                });
                (key, result)
            })
            .collect())
    }

    /// Read one stream's checkpoint and the events after it
    async fn fetch_stream(
        ctx: &PollingContext<C, S, K>,
        key: &StreamKey,
        cycle_start_ms: i64,
    ) -> FetchResult {
        let checkpoint = ctx
            .store
            .get_checkpoint(key)
            .await
            .map_err(|e| StreamError::Checkpoint(e.to_string()))?;

        let from_ms = match (checkpoint, ctx.plan.start_at) {
            (Some(ts), _) => ts.saturating_add(1),
            (None, StartAt::Beginning) => 0,
            (None, StartAt::End) => *ctx
                .tail_origins
                .lock()
                .entry(key.clone())
                .or_insert(cycle_start_ms),
        };

        trace!(group = %key.group, stream = %key.stream, checkpoint = ?checkpoint, from_ms, "Fetching events");

        let mut events = with_timeout(
            ctx.options.api_timeout,
            ctx.client
                .get_events(&key.group, &key.stream, from_ms, ctx.plan.event_limit),
        )
        .await
        .map_err(StreamError::Retrieval)?;

        // Anything before the window was already emitted.
        events.retain(|e| e.timestamp >= from_ms);
        events.sort_by_key(|e| e.timestamp);

        debug!(group = %key.group, stream = %key.stream, count = events.len(), "Fetched events");
        Ok(events)
    }

    /// Emit a stream's batch and advance its checkpoint. Returns the number
    /// of events handed to the sink.
    async fn emit_batch(
        &self,
        key: &StreamKey,
        batch: Vec<RawEvent>,
        summary: &mut CycleSummary,
    ) -> usize {
        let ctx = &self.context;
        let Some(last_timestamp) = batch.last().map(|e| e.timestamp) else {
            return 0;
        };

        let mut emitted = 0;
        for raw in batch {
            if let Err(e) = ctx.sink.emit(EmittedEvent::from_raw(key, raw)).await {
                warn!(group = %key.group, stream = %key.stream, error = %e, "Sink rejected event");
                ctx.report(PollEvent::emit_failure(key, e.to_string()));
                summary.record_failure(&key.group, Some(&key.stream), e.to_string());
                return emitted;
            }
            emitted += 1;
        }

        match ctx.store.save_checkpoint(key, last_timestamp).await {
            Ok(()) => {
                ctx.tail_origins.lock().remove(key);
                debug!(
                    group = %key.group,
                    stream = %key.stream,
                    timestamp_ms = last_timestamp,
                    events = emitted,
                    "Checkpoint advanced"
                );
                ctx.report(PollEvent::checkpoint_advanced(key, last_timestamp));
            }
            Err(e) => {
                warn!(group = %key.group, stream = %key.stream, error = %e, "Failed to save checkpoint");
                ctx.report(PollEvent::checkpoint_failure(
                    key,
                    Some(last_timestamp),
                    e.to_string(),
                ));
                summary.record_failure(&key.group, Some(&key.stream), e.to_string());
            }
        }

        emitted
    }
}
