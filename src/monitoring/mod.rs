//! Reporting channel between the poller and its host
//!
//! Runtime failures never crash the poller; they are reported here with
//! group and stream context, alongside a summary of every cycle.

mod types;

pub use types::{CycleStatus, MonitoringConfig, PollEvent, PollEventType};
