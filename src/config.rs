//! Operator configuration and its validation into a [`ResolvedPlan`]
//!
//! The host hands over an [`InputConfig`], usually deserialized from its own
//! configuration file. Building it resolves the interacting selector fields
//! into a plan the poller evaluates every cycle, or fails with a
//! [`ConfigError`] naming the offending fields.

use chrono::{Datelike, Timelike};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashSet;
use std::str::FromStr;
use std::time::Duration;

use crate::error::ConfigError;
use crate::layout;

/// Largest number of events a single cycle may emit
pub const MAX_EVENT_LIMIT: u32 = 10_000;
pub const DEFAULT_EVENT_LIMIT: u32 = 1_000;
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(60);

/// Which log groups and streams to read
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceSelector {
    /// A single log group name, may contain time directives
    pub log_group_name: Option<String>,
    /// Explicit log group names, may contain time directives
    #[serde(deserialize_with = "null_as_default")]
    pub log_groups: Vec<String>,
    /// Log groups are discovered by this name prefix every cycle
    pub log_group_prefix: Option<String>,
    /// Only read these streams. Conflicts with `log_stream_name_prefix`
    #[serde(deserialize_with = "null_as_default")]
    pub log_stream_names: Vec<String>,
    /// Only read streams whose name starts with this prefix
    pub log_stream_name_prefix: Option<String>,
}

// Hosts send `null` for unset lists.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Polling parameters and AWS connection settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollConfig {
    pub region: String,
    /// Named credential profile, the default chain is used when absent
    pub profile: Option<String>,
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,
    pub event_limit: u32,
    /// `"beginning"` or `"end"`, defaults to `"end"`
    pub start_at: Option<String>,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            region: String::new(),
            profile: None,
            poll_interval: DEFAULT_POLL_INTERVAL,
            event_limit: DEFAULT_EVENT_LIMIT,
            start_at: None,
        }
    }
}

/// Configuration object consumed from the host
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputConfig {
    #[serde(flatten)]
    pub selector: SourceSelector,
    #[serde(flatten)]
    pub poll: PollConfig,
}

impl InputConfig {
    pub fn new(region: impl Into<String>) -> Self {
        Self {
            poll: PollConfig {
                region: region.into(),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    /// Validate the configuration and resolve it into a plan
    pub fn build(&self) -> Result<ResolvedPlan, ConfigError> {
        validate(&self.selector, &self.poll)
    }
}

/// Where to start reading a stream that has no checkpoint yet
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StartAt {
    /// Read the stream's full history
    Beginning,
    /// Only tail events newer than the first cycle that saw the stream
    #[default]
    End,
}

impl FromStr for StartAt {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "beginning" => Ok(StartAt::Beginning),
            "end" | "" => Ok(StartAt::End),
            other => Err(ConfigError::InvalidStartAt(other.to_string())),
        }
    }
}

/// One way of designating log groups
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum GroupSelector {
    Name(String),
    Prefix(String),
}

impl GroupSelector {
    /// Apply time directives for the given instant
    pub fn resolve<T: Datelike + Timelike>(&self, at: &T) -> GroupSelector {
        if !self.is_dynamic() {
            return self.clone();
        }
        match self {
            GroupSelector::Name(name) => GroupSelector::Name(layout::format(name, at)),
            GroupSelector::Prefix(prefix) => GroupSelector::Prefix(layout::format(prefix, at)),
        }
    }

    pub fn is_dynamic(&self) -> bool {
        match self {
            GroupSelector::Name(s) | GroupSelector::Prefix(s) => layout::has_directives(s),
        }
    }
}

/// Which streams of a group to read
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum StreamFilter {
    #[default]
    All,
    Names(Vec<String>),
    Prefix(String),
}

impl StreamFilter {
    pub fn resolve<T: Datelike + Timelike>(&self, at: &T) -> StreamFilter {
        match self {
            StreamFilter::All => StreamFilter::All,
            StreamFilter::Names(names) => {
                StreamFilter::Names(dedup(names.iter().map(|n| format_if_dynamic(n, at))))
            }
            StreamFilter::Prefix(prefix) => StreamFilter::Prefix(format_if_dynamic(prefix, at)),
        }
    }

    pub fn matches(&self, stream: &str) -> bool {
        match self {
            StreamFilter::All => true,
            StreamFilter::Names(names) => names.iter().any(|n| n == stream),
            StreamFilter::Prefix(prefix) => stream.starts_with(prefix.as_str()),
        }
    }
}

/// Validated source selection plus effective polling parameters.
///
/// Group names and prefixes are kept as patterns; directives are only
/// evaluated when a cycle starts so dated names stay current.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPlan {
    pub groups: Vec<GroupSelector>,
    pub streams: StreamFilter,
    pub poll_interval: Duration,
    pub event_limit: u32,
    pub start_at: StartAt,
}

impl ResolvedPlan {
    /// Group selectors with directives applied for `at`, de-duplicated
    pub fn groups_at<T: Datelike + Timelike>(&self, at: &T) -> Vec<GroupSelector> {
        dedup(self.groups.iter().map(|g| g.resolve(at)))
    }
}

fn format_if_dynamic<T: Datelike + Timelike>(pattern: &str, at: &T) -> String {
    if layout::has_directives(pattern) {
        layout::format(pattern, at)
    } else {
        pattern.to_string()
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|s| !s.is_empty())
}

fn dedup<T: Clone + Eq + std::hash::Hash>(items: impl IntoIterator<Item = T>) -> Vec<T> {
    let mut seen = HashSet::new();
    items
        .into_iter()
        .filter(|item| seen.insert(item.clone()))
        .collect()
}

/// Resolve selector fields and polling parameters into a plan.
///
/// Checks run in a fixed order so the first conflict found is the one
/// reported.
pub fn validate(selector: &SourceSelector, poll: &PollConfig) -> Result<ResolvedPlan, ConfigError> {
    let stream_names: Vec<String> = selector
        .log_stream_names
        .iter()
        .filter(|s| !s.is_empty())
        .cloned()
        .collect();
    let stream_prefix = non_empty(&selector.log_stream_name_prefix);

    if !stream_names.is_empty() && stream_prefix.is_some() {
        return Err(ConfigError::ConflictingStreamSelectors);
    }

    if poll.poll_interval.is_zero() {
        return Err(ConfigError::InvalidPollInterval);
    }

    if poll.event_limit == 0 || poll.event_limit > MAX_EVENT_LIMIT {
        return Err(ConfigError::EventLimitOutOfRange(poll.event_limit));
    }

    let start_at = match poll.start_at.as_deref() {
        Some(s) => s.parse::<StartAt>()?,
        None => StartAt::default(),
    };

    let names = non_empty(&selector.log_group_name)
        .into_iter()
        .chain(selector.log_groups.iter().map(String::as_str))
        .filter(|s| !s.is_empty())
        .map(|s| GroupSelector::Name(s.to_string()));
    let prefix = non_empty(&selector.log_group_prefix).map(|p| GroupSelector::Prefix(p.to_string()));

    let groups = dedup(names.chain(prefix));
    if groups.is_empty() {
        return Err(ConfigError::MissingGroupSelector);
    }

    if poll.region.is_empty() {
        return Err(ConfigError::MissingRegion);
    }

    let streams = match stream_prefix {
        Some(prefix) => StreamFilter::Prefix(prefix.to_string()),
        None if !stream_names.is_empty() => StreamFilter::Names(dedup(stream_names)),
        None => StreamFilter::All,
    };

    Ok(ResolvedPlan {
        groups,
        streams,
        poll_interval: poll.poll_interval,
        event_limit: poll.event_limit,
        start_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use pretty_assertions::assert_eq;

    const TEST_NAME: &str = "test";
    const TEST_AWS_PREFIX: &str = "/aws";

    fn basic_config() -> InputConfig {
        let mut cfg = InputConfig::new("test-region");
        cfg.selector.log_groups = vec![TEST_NAME.to_string(), "test-2".to_string()];
        cfg
    }

    fn groups_only() -> InputConfig {
        InputConfig::new("test-region")
    }

    #[test]
    fn test_build_cases() {
        let cases: Vec<(&str, InputConfig, bool)> = vec![
            ("default", basic_config(), false),
            (
                "log-stream-name-prefix-empty",
                {
                    let mut cfg = basic_config();
                    cfg.selector.log_stream_name_prefix = Some(String::new());
                    cfg
                },
                false,
            ),
            (
                "event-limit",
                {
                    let mut cfg = basic_config();
                    cfg.poll.event_limit = 5000;
                    cfg
                },
                false,
            ),
            (
                "poll-interval",
                {
                    let mut cfg = basic_config();
                    cfg.poll.poll_interval = Duration::from_secs(15);
                    cfg
                },
                false,
            ),
            (
                "profile",
                {
                    let mut cfg = basic_config();
                    cfg.poll.profile = Some(TEST_NAME.to_string());
                    cfg
                },
                false,
            ),
            (
                "log-stream-names",
                {
                    let mut cfg = basic_config();
                    cfg.selector.log_stream_names = vec!["test stream".to_string()];
                    cfg
                },
                false,
            ),
            (
                "startat-end",
                {
                    let mut cfg = basic_config();
                    cfg.poll.start_at = Some("end".to_string());
                    cfg
                },
                false,
            ),
            (
                "stream names and stream prefix conflict",
                {
                    let mut cfg = basic_config();
                    cfg.selector.log_stream_names = vec!["test stream".to_string()];
                    cfg.selector.log_stream_name_prefix = Some("some prefix".to_string());
                    cfg
                },
                true,
            ),
            (
                "startat-beginning",
                {
                    let mut cfg = basic_config();
                    cfg.poll.start_at = Some("beginning".to_string());
                    cfg.selector.log_stream_name_prefix = Some("some prefix".to_string());
                    cfg
                },
                false,
            ),
            (
                "poll-interval-invalid",
                {
                    let mut cfg = basic_config();
                    cfg.poll.poll_interval = Duration::ZERO;
                    cfg
                },
                true,
            ),
            (
                "event-limit-invalid",
                {
                    let mut cfg = basic_config();
                    cfg.poll.event_limit = 10001;
                    cfg
                },
                true,
            ),
            (
                "event-limit-zero",
                {
                    let mut cfg = basic_config();
                    cfg.poll.event_limit = 0;
                    cfg
                },
                true,
            ),
            (
                "startat-invalid",
                {
                    let mut cfg = basic_config();
                    cfg.poll.start_at = Some("invalid".to_string());
                    cfg
                },
                true,
            ),
            (
                "log-group-name",
                {
                    let mut cfg = groups_only();
                    cfg.selector.log_group_name = Some(TEST_NAME.to_string());
                    cfg
                },
                false,
            ),
            (
                "log-groups-and-log-group-name",
                {
                    let mut cfg = basic_config();
                    cfg.selector.log_group_name = Some(TEST_NAME.to_string());
                    cfg
                },
                false,
            ),
            (
                "log-group-prefix",
                {
                    let mut cfg = groups_only();
                    cfg.selector.log_group_prefix = Some(TEST_AWS_PREFIX.to_string());
                    cfg
                },
                false,
            ),
            (
                "log-group-prefix-and-log-groups",
                {
                    let mut cfg = basic_config();
                    cfg.selector.log_group_prefix = Some(TEST_AWS_PREFIX.to_string());
                    cfg
                },
                false,
            ),
            (
                "log-group-prefix-and-log-group-name",
                {
                    let mut cfg = groups_only();
                    cfg.selector.log_group_prefix = Some(TEST_AWS_PREFIX.to_string());
                    cfg.selector.log_group_name = Some(TEST_NAME.to_string());
                    cfg
                },
                false,
            ),
            (
                "log-group-prefix-log-group-name-log-groups",
                {
                    let mut cfg = groups_only();
                    cfg.selector.log_group_prefix = Some(TEST_AWS_PREFIX.to_string());
                    cfg.selector.log_group_name = Some(TEST_NAME.to_string());
                    cfg.selector.log_groups = vec![TEST_NAME.to_string(), "aws".to_string()];
                    cfg
                },
                false,
            ),
            ("no-group-selector", groups_only(), true),
            (
                "missing-region",
                {
                    let mut cfg = basic_config();
                    cfg.poll.region = String::new();
                    cfg
                },
                true,
            ),
        ];

        for (name, cfg, expect_err) in cases {
            let result = cfg.build();
            assert_eq!(result.is_err(), expect_err, "case {}: {:?}", name, result);
        }
    }

    #[test]
    fn test_stream_conflict_wins_over_other_errors() {
        let mut cfg = groups_only();
        cfg.selector.log_stream_names = vec!["a".to_string()];
        cfg.selector.log_stream_name_prefix = Some("b".to_string());
        cfg.poll.poll_interval = Duration::ZERO;
        cfg.poll.start_at = Some("invalid".to_string());

        assert_eq!(cfg.build(), Err(ConfigError::ConflictingStreamSelectors));
    }

    #[test]
    fn test_check_precedence() {
        let mut cfg = basic_config();
        cfg.poll.poll_interval = Duration::ZERO;
        cfg.poll.event_limit = 0;
        assert_eq!(cfg.build(), Err(ConfigError::InvalidPollInterval));

        cfg.poll.poll_interval = Duration::from_secs(1);
        cfg.poll.start_at = Some("middle".to_string());
        assert_eq!(cfg.build(), Err(ConfigError::EventLimitOutOfRange(0)));

        cfg.poll.event_limit = 10;
        assert_eq!(
            cfg.build(),
            Err(ConfigError::InvalidStartAt("middle".to_string()))
        );
    }

    #[test]
    fn test_defaults() -> anyhow::Result<()> {
        let plan = basic_config().build()?;
        assert_eq!(plan.start_at, StartAt::End);
        assert_eq!(plan.poll_interval, Duration::from_secs(60));
        assert_eq!(plan.event_limit, DEFAULT_EVENT_LIMIT);
        assert_eq!(plan.streams, StreamFilter::All);
        Ok(())
    }

    #[test]
    fn test_group_union_is_deduplicated() -> anyhow::Result<()> {
        let mut cfg = groups_only();
        cfg.selector.log_group_name = Some(TEST_NAME.to_string());
        cfg.selector.log_groups = vec![TEST_NAME.to_string(), "aws".to_string()];
        cfg.selector.log_group_prefix = Some(TEST_AWS_PREFIX.to_string());

        let plan = cfg.build()?;
        assert_eq!(
            plan.groups,
            vec![
                GroupSelector::Name(TEST_NAME.to_string()),
                GroupSelector::Name("aws".to_string()),
                GroupSelector::Prefix(TEST_AWS_PREFIX.to_string()),
            ]
        );
        Ok(())
    }

    #[test]
    fn test_stream_filters() -> anyhow::Result<()> {
        let mut cfg = basic_config();
        cfg.selector.log_stream_names = vec!["a".into(), "b".into(), "a".into()];
        assert_eq!(
            cfg.build()?.streams,
            StreamFilter::Names(vec!["a".into(), "b".into()])
        );

        let mut cfg = basic_config();
        cfg.selector.log_stream_name_prefix = Some("web-".into());
        let filter = cfg.build()?.streams;
        assert_eq!(filter, StreamFilter::Prefix("web-".into()));
        assert!(filter.matches("web-1"));
        assert!(!filter.matches("api-1"));
        Ok(())
    }

    #[test]
    fn test_dynamic_groups_resolved_per_instant() -> anyhow::Result<()> {
        let mut cfg = groups_only();
        cfg.selector.log_group_name = Some("/app/%Y-%m-%d".into());
        cfg.selector.log_groups = vec!["/app/2021-05-12".into()];
        let plan = cfg.build()?;

        assert!(plan.groups[0].is_dynamic());
        assert!(!plan.groups[1].is_dynamic());

        // Both collapse to the same concrete name on that day
        let day = Utc.timestamp_opt(1620843711, 0).unwrap();
        assert_eq!(
            plan.groups_at(&day),
            vec![GroupSelector::Name("/app/2021-05-12".into())]
        );

        let next_day = Utc.timestamp_opt(1620843711 + 86_400, 0).unwrap();
        assert_eq!(plan.groups_at(&next_day).len(), 2);
        Ok(())
    }

    #[test]
    fn test_deserialize_host_config() -> anyhow::Result<()> {
        let cfg: InputConfig = serde_json::from_str(
            r#"{
                "region": "us-east-1",
                "log_group_prefix": "/aws/lambda",
                "log_stream_name_prefix": "2021",
                "poll_interval": "15s",
                "event_limit": 5000,
                "start_at": "beginning"
            }"#,
        )?;

        assert_eq!(cfg.poll.poll_interval, Duration::from_secs(15));
        let plan = cfg.build()?;
        assert_eq!(plan.start_at, StartAt::Beginning);
        assert_eq!(plan.event_limit, 5000);
        assert_eq!(plan.groups, vec![GroupSelector::Prefix("/aws/lambda".into())]);
        Ok(())
    }

    #[test]
    fn test_deserialize_defaults() -> anyhow::Result<()> {
        let cfg: InputConfig =
            serde_json::from_str(r#"{"region": "us-west-2", "log_group_name": "app"}"#)?;
        assert_eq!(cfg.poll.poll_interval, DEFAULT_POLL_INTERVAL);
        assert_eq!(cfg.poll.event_limit, DEFAULT_EVENT_LIMIT);
        assert!(cfg.build().is_ok());
        Ok(())
    }

    #[test]
    fn test_deserialize_null_lists() -> anyhow::Result<()> {
        let cfg: InputConfig = serde_json::from_str(
            r#"{
                "region": "us-west-2",
                "log_group_name": "app",
                "log_groups": null,
                "log_stream_names": null,
                "log_stream_name_prefix": null
            }"#,
        )?;
        assert!(cfg.selector.log_groups.is_empty());
        assert!(cfg.selector.log_stream_names.is_empty());
        assert_eq!(cfg.build()?.streams, StreamFilter::All);
        Ok(())
    }

    #[test]
    fn test_static_names_pass_through_unformatted() {
        let at = Utc.timestamp_opt(1620843711, 0).unwrap();
        let name = GroupSelector::Name("/app/100%".into());
        assert!(!name.is_dynamic());
        assert_eq!(name.resolve(&at), name);

        let filter = StreamFilter::Prefix("web-%H".into());
        assert_eq!(filter.resolve(&at), StreamFilter::Prefix("web-18".into()));
    }
}
