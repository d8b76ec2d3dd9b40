// Copyright © 2025 rustmailrelay contributors
// Licensed under the GNU General Public License v3.0 or later.

use std::sync::LazyLock;

use crate::modules::context::Initialize;
use crate::modules::error::RelayResult;
use crate::utc_now;
use prometheus::{
    register_counter_vec, register_gauge, register_gauge_vec, register_histogram_vec,
    register_int_counter, register_int_counter_vec, CounterVec, Gauge, GaugeVec, HistogramVec,
    IntCounter, IntCounterVec,
};

pub const METRIC_MESSAGES_STORED_TOTAL: &str = "relay_messages_stored_total";
pub const METRIC_MESSAGES_FORWARDED_TOTAL: &str = "relay_messages_forwarded_total";
pub const METRIC_FORWARD_SESSION_DURATION_SECONDS: &str = "relay_forward_session_duration_seconds";
pub const METRIC_FILTER_OUTCOME_TOTAL: &str = "relay_filter_outcome_total";
pub const METRIC_POP_COMMANDS_TOTAL: &str = "relay_pop_commands_total";
pub const METRIC_SPOOL_MESSAGES: &str = "relay_spool_messages";
pub const METRIC_START_TIMESTAMP: &str = "relay_start_timestamp";

/// Messages committed into the spool by the receiver.
pub static RELAY_MESSAGES_STORED_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    register_int_counter!(
        METRIC_MESSAGES_STORED_TOTAL,
        "Total number of messages committed into the spool"
    )
    .expect("failed to register relay_messages_stored_total")
});

/// Forward driver outcomes, grouped by terminal state (`delivered`,
/// `partial`, `failed`, `transient`).
pub static RELAY_MESSAGES_FORWARDED_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec!(
        METRIC_MESSAGES_FORWARDED_TOTAL,
        "Total number of forward-driver outcomes, grouped by result",
        &["result"]
    )
    .expect("failed to register relay_messages_forwarded_total")
});

pub static RELAY_FORWARD_SESSION_DURATION_SECONDS: LazyLock<HistogramVec> = LazyLock::new(|| {
    register_histogram_vec!(
        METRIC_FORWARD_SESSION_DURATION_SECONDS,
        "Duration of a single forward-driver upstream session, in seconds",
        &["result"],
        vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0]
    )
    .expect("failed to register relay_forward_session_duration_seconds")
});

/// Filter chain outcomes, grouped by filter id and result variant.
pub static RELAY_FILTER_OUTCOME_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    register_counter_vec!(
        METRIC_FILTER_OUTCOME_TOTAL,
        "Total filter chain outcomes, grouped by filter id and result",
        &["filter_id", "result"]
    )
    .expect("failed to register relay_filter_outcome_total")
});

pub static RELAY_POP_COMMANDS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec!(
        METRIC_POP_COMMANDS_TOTAL,
        "Total POP3 commands served, grouped by verb",
        &["verb"]
    )
    .expect("failed to register relay_pop_commands_total")
});

pub static RELAY_SPOOL_MESSAGES: LazyLock<GaugeVec> = LazyLock::new(|| {
    register_gauge_vec!(
        METRIC_SPOOL_MESSAGES,
        "Current number of messages in the spool, grouped by state",
        &["state"]
    )
    .expect("failed to register relay_spool_messages")
});

pub static RELAY_START_TIMESTAMP: LazyLock<Gauge> = LazyLock::new(|| {
    register_gauge!(METRIC_START_TIMESTAMP, "Unix timestamp when the relay started")
        .expect("failed to register relay_start_timestamp")
});

pub struct MetricsService;

impl Initialize for MetricsService {
    async fn initialize() -> RelayResult<()> {
        RELAY_START_TIMESTAMP.set(utc_now!() as f64 / 1000.0);
        Ok(())
    }
}
