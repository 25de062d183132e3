//! Metrics collection for observability
//!
//! This module provides Prometheus metrics for monitoring the store.
//!
//! # Metrics
//!
//! - `store_transactions_total{operation,outcome}` - Finished store transactions
//! - `store_transaction_retries_total{operation}` - Conflicting attempts that were re-run
//! - `store_transaction_duration_seconds{operation}` - Histogram of transaction latencies
//! - `ledger_entries_total{kind}` - Committed ledger entries

use prometheus::{HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry};
use std::sync::Arc;

/// Metrics collector.
///
/// Each collector owns its registry so several ledgers can live in one
/// process (tests, tools).
#[derive(Clone, Debug)]
pub struct Metrics {
    /// Finished transactions by operation and outcome
    pub transactions_total: IntCounterVec,

    /// Re-run attempts by operation
    pub transaction_retries: IntCounterVec,

    /// Transaction duration histogram
    pub transaction_duration: HistogramVec,

    /// Committed ledger entries by kind
    pub entries_total: IntCounterVec,

    /// Prometheus registry
    pub registry: Arc<Registry>,
}

impl Metrics {
    /// Create new metrics collector
    pub fn new() -> prometheus::Result<Self> {
        let registry = Arc::new(Registry::new());

        let transactions_total = IntCounterVec::new(
            Opts::new("store_transactions_total", "Finished store transactions"),
            &["operation", "outcome"],
        )?;
        registry.register(Box::new(transactions_total.clone()))?;

        let transaction_retries = IntCounterVec::new(
            Opts::new(
                "store_transaction_retries_total",
                "Conflicting transaction attempts that were re-run",
            ),
            &["operation"],
        )?;
        registry.register(Box::new(transaction_retries.clone()))?;

        let transaction_duration = HistogramVec::new(
            HistogramOpts::new(
                "store_transaction_duration_seconds",
                "Histogram of store transaction latencies",
            )
            .buckets(vec![0.0005, 0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 1.0]),
            &["operation"],
        )?;
        registry.register(Box::new(transaction_duration.clone()))?;

        let entries_total = IntCounterVec::new(
            Opts::new("ledger_entries_total", "Committed ledger entries"),
            &["kind"],
        )?;
        registry.register(Box::new(entries_total.clone()))?;

        Ok(Self {
            transactions_total,
            transaction_retries,
            transaction_duration,
            entries_total,
            registry,
        })
    }

    /// Record a finished transaction
    pub fn record_transaction(&self, operation: &str, outcome: &str, duration_seconds: f64) {
        self.transactions_total
            .with_label_values(&[operation, outcome])
            .inc();
        self.transaction_duration
            .with_label_values(&[operation])
            .observe(duration_seconds);
    }

    /// Record a retry
    pub fn record_retry(&self, operation: &str) {
        self.transaction_retries.with_label_values(&[operation]).inc();
    }

    /// Record committed entries
    pub fn record_entries(&self, kind: &str, count: u64) {
        self.entries_total.with_label_values(&[kind]).inc_by(count);
    }

    /// Get metrics registry
    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_creation() {
        let metrics = Metrics::new().unwrap();
        assert_eq!(
            metrics
                .transactions_total
                .with_label_values(&["purchase", "committed"])
                .get(),
            0
        );
    }

    #[test]
    fn test_independent_registries() {
        let first = Metrics::new().unwrap();
        let second = Metrics::new().unwrap();

        first.record_retry("purchase");
        assert_eq!(first.transaction_retries.with_label_values(&["purchase"]).get(), 1);
        assert_eq!(second.transaction_retries.with_label_values(&["purchase"]).get(), 0);
    }

    #[test]
    fn test_record_transaction() {
        let metrics = Metrics::new().unwrap();
        metrics.record_transaction("cancel", "committed", 0.002);
        metrics.record_transaction("cancel", "rejected", 0.001);
        metrics.record_entries("refund", 2);

        assert_eq!(
            metrics
                .transactions_total
                .with_label_values(&["cancel", "committed"])
                .get(),
            1
        );
        assert_eq!(metrics.entries_total.with_label_values(&["refund"]).get(), 2);
        assert!(!metrics.registry().gather().is_empty());
    }
}
