use std::time::{Duration, SystemTime};

use crate::store::StreamKey;

/// Configuration for the host reporting channel
#[derive(Debug, Clone)]
pub struct MonitoringConfig {
    /// Whether events are reported at all
    pub enabled: bool,
    /// Size of the reporting channel buffer. Events are dropped, with a
    /// warning, while the buffer is full.
    pub channel_size: usize,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            channel_size: 1000,
        }
    }
}

/// Overall outcome of one poll cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleStatus {
    /// Every source was read
    Healthy,
    /// At least one source failed and will be retried next cycle
    Degraded,
}

/// Something the poller reports to its host
#[derive(Debug, Clone)]
pub struct PollEvent {
    /// When the event occurred
    pub timestamp: SystemTime,
    /// Log group the event relates to, if any
    pub log_group: Option<String>,
    /// Log stream the event relates to, if any
    pub log_stream: Option<String>,
    pub event_type: PollEventType,
}

#[derive(Debug, Clone)]
pub enum PollEventType {
    CycleStarted,
    CycleComplete {
        status: CycleStatus,
        streams_polled: usize,
        streams_failed: usize,
        events_emitted: usize,
        duration: Duration,
    },
    /// Listing groups or streams failed; the affected sources are skipped
    /// this cycle
    DiscoveryFailure {
        error: String,
    },
    RetrievalFailure {
        error: String,
        retryable: bool,
    },
    EmitFailure {
        error: String,
    },
    CheckpointAdvanced {
        timestamp_ms: i64,
    },
    CheckpointFailure {
        timestamp_ms: Option<i64>,
        error: String,
    },
    /// The poller is stopping because of an unrecoverable error
    Fatal {
        error: String,
    },
    /// Shutdown was observed in the middle of a cycle
    Interrupted,
}

impl PollEvent {
    fn new(log_group: Option<String>, log_stream: Option<String>, event_type: PollEventType) -> Self {
        Self {
            timestamp: SystemTime::now(),
            log_group,
            log_stream,
            event_type,
        }
    }

    fn for_key(key: &StreamKey, event_type: PollEventType) -> Self {
        Self::new(Some(key.group.clone()), Some(key.stream.clone()), event_type)
    }

    pub fn cycle_started() -> Self {
        Self::new(None, None, PollEventType::CycleStarted)
    }

    pub fn cycle_complete(
        status: CycleStatus,
        streams_polled: usize,
        streams_failed: usize,
        events_emitted: usize,
        duration: Duration,
    ) -> Self {
        Self::new(
            None,
            None,
            PollEventType::CycleComplete {
                status,
                streams_polled,
                streams_failed,
                events_emitted,
                duration,
            },
        )
    }

    pub fn discovery_failure(log_group: Option<String>, error: String) -> Self {
        Self::new(log_group, None, PollEventType::DiscoveryFailure { error })
    }

    pub fn retrieval_failure(key: &StreamKey, error: String, retryable: bool) -> Self {
        Self::for_key(key, PollEventType::RetrievalFailure { error, retryable })
    }

    pub fn emit_failure(key: &StreamKey, error: String) -> Self {
        Self::for_key(key, PollEventType::EmitFailure { error })
    }

    pub fn checkpoint_advanced(key: &StreamKey, timestamp_ms: i64) -> Self {
        Self::for_key(key, PollEventType::CheckpointAdvanced { timestamp_ms })
    }

    pub fn checkpoint_failure(key: &StreamKey, timestamp_ms: Option<i64>, error: String) -> Self {
        Self::for_key(
            key,
            PollEventType::CheckpointFailure {
                timestamp_ms,
                error,
            },
        )
    }

    pub fn fatal(error: String) -> Self {
        Self::new(None, None, PollEventType::Fatal { error })
    }

    pub fn interrupted() -> Self {
        Self::new(None, None, PollEventType::Interrupted)
    }

    pub fn is_failure(&self) -> bool {
        matches!(
            self.event_type,
            PollEventType::DiscoveryFailure { .. }
                | PollEventType::RetrievalFailure { .. }
                | PollEventType::EmitFailure { .. }
                | PollEventType::CheckpointFailure { .. }
                | PollEventType::Fatal { .. }
        )
    }
}
