// tests/common/mod.rs
use std::sync::{Arc, Once};

use cloudwatch_log_poller::monitoring::PollEvent;
use cloudwatch_log_poller::test::mocks::{CollectingSink, MockClock, MockLogsClient};
use cloudwatch_log_poller::test::TestUtils;
use cloudwatch_log_poller::{InMemoryCheckpointStore, LogPoller, PollerOptions, ResolvedPlan};
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

static INIT: Once = Once::new();

pub fn init_logging() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::from_default_env()
                    .add_directive("cloudwatch_log_poller=debug".parse().unwrap())
                    .add_directive("test=debug".parse().unwrap()),
            )
            .with_test_writer()
            .with_thread_ids(true)
            .with_line_number(true)
            .try_init()
            .ok();
    });
}

pub type TestPoller = LogPoller<MockLogsClient, InMemoryCheckpointStore, CollectingSink>;

/// 2021-05-12T18:21:51Z
pub const NOW_SECS: i64 = 1620843711;
pub const NOW_MS: i64 = NOW_SECS * 1000;

/// Mocks shared between the pollers of one test, so a test can simulate a
/// restart by building a second poller over the same store.
pub struct TestContext {
    pub client: MockLogsClient,
    pub store: InMemoryCheckpointStore,
    pub sink: CollectingSink,
    pub clock: Arc<MockClock>,
}

impl TestContext {
    pub fn new() -> Self {
        init_logging();
        Self {
            client: MockLogsClient::new(),
            store: InMemoryCheckpointStore::new(),
            sink: CollectingSink::new(),
            clock: Arc::new(MockClock::at_secs(NOW_SECS)),
        }
    }

    pub fn poller(&self, plan: ResolvedPlan) -> (TestPoller, mpsc::Receiver<PollEvent>) {
        self.poller_with_options(plan, TestUtils::fast_options())
    }

    pub fn poller_with_options(
        &self,
        plan: ResolvedPlan,
        options: PollerOptions,
    ) -> (TestPoller, mpsc::Receiver<PollEvent>) {
        let (poller, rx) = LogPoller::new(
            plan,
            options,
            self.client.clone(),
            self.store.clone(),
            self.sink.clone(),
        )
        .expect("valid poller options");
        (
            poller.with_clock(self.clock.clone()),
            rx.expect("monitoring is enabled"),
        )
    }
}

pub fn drain(rx: &mut mpsc::Receiver<PollEvent>) -> Vec<PollEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}
