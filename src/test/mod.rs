//! Test utilities and mock implementations for testing the poller


use std::time::Duration;

use crate::client::RawEvent;
use crate::config::{GroupSelector, ResolvedPlan, StartAt, StreamFilter, DEFAULT_POLL_INTERVAL};
use crate::poller::PollerOptions;

/// Helper functions for creating test data
pub struct TestUtils;

impl TestUtils {
    /// Events `message-0..count` with timestamps `start, start + 1, ...`
    pub fn create_test_events(start: i64, count: usize) -> Vec<RawEvent> {
        (0..count)
            .map(|i| RawEvent::new(start + i as i64, format!("message-{}", i)))
            .collect()
    }

    /// A plan reading the named groups with every other setting at its default
    pub fn plan_for_groups(groups: &[&str], start_at: StartAt) -> ResolvedPlan {
        ResolvedPlan {
            groups: groups
                .iter()
                .map(|g| GroupSelector::Name(g.to_string()))
                .collect(),
            streams: StreamFilter::All,
            poll_interval: DEFAULT_POLL_INTERVAL,
            event_limit: 1000,
            start_at,
        }
    }

    /// Poller options with short timeouts suited to tests
    pub fn fast_options() -> PollerOptions {
        PollerOptions {
            api_timeout: Duration::from_millis(200),
            shutdown_grace_period: Duration::from_millis(50),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_test_events() {
        let events = TestUtils::create_test_events(100, 3);
        assert_eq!(events.len(), 3);
        assert_eq!(events[0].timestamp, 100);
        assert_eq!(events[2].timestamp, 102);
        assert_eq!(events[1].message, "message-1");
    }

    #[test]
    fn test_plan_for_groups() {
        let plan = TestUtils::plan_for_groups(&["a", "b"], StartAt::Beginning);
        assert_eq!(plan.groups.len(), 2);
        assert_eq!(plan.streams, StreamFilter::All);
        assert_eq!(plan.start_at, StartAt::Beginning);
    }
}
