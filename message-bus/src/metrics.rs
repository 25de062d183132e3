//! Prometheus metrics for notification delivery

use lazy_static::lazy_static;
use prometheus::{register_histogram_vec, register_int_counter_vec, HistogramVec, IntCounterVec};

lazy_static! {
    /// Notifications handed to a transport, by kind and outcome
    pub static ref NOTIFICATIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "notifications_total",
        "Notifications handed to a transport",
        &["kind", "status"]
    )
    .unwrap();

    /// Publish duration
    pub static ref NOTIFICATION_PUBLISH_DURATION: HistogramVec = register_histogram_vec!(
        "notification_publish_duration_seconds",
        "Notification publish duration in seconds",
        &["transport"]
    )
    .unwrap();
}

/// Count one delivery attempt
pub fn record_delivery(kind: &str, status: &str) {
    NOTIFICATIONS_TOTAL.with_label_values(&[kind, status]).inc();
}
