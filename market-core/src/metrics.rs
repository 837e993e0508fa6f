//! Metrics collection for observability
//!
//! This module provides Prometheus metrics for monitoring the marketplace.
//!
//! # Metrics
//!
//! - `market_listings_total` - Articles listed
//! - `market_sales_total` - Articles sold
//! - `market_rejections_total{reason}` - Rejected transitions by reason
//! - `market_events_appended_total` - Events written to the log
//! - `market_purchase_duration_seconds` - Purchase latency, settlement included

use prometheus::{Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry};
use std::sync::Arc;

/// Metrics collector
#[derive(Clone, Debug)]
pub struct Metrics {
    /// Articles listed
    pub listings_total: IntCounter,

    /// Articles sold
    pub sales_total: IntCounter,

    /// Rejections by reason
    pub rejections_total: IntCounterVec,

    /// Events appended
    pub events_appended: IntCounter,

    /// Purchase duration histogram
    pub purchase_duration: Histogram,

    /// Prometheus registry
    pub registry: Arc<Registry>,
}

impl Metrics {
    /// Create new metrics collector with its own registry
    pub fn new() -> prometheus::Result<Self> {
        let registry = Arc::new(Registry::new());

        let listings_total = IntCounter::new("market_listings_total", "Articles listed")?;
        registry.register(Box::new(listings_total.clone()))?;

        let sales_total = IntCounter::new("market_sales_total", "Articles sold")?;
        registry.register(Box::new(sales_total.clone()))?;

        let rejections_total = IntCounterVec::new(
            Opts::new("market_rejections_total", "Rejected transitions by reason"),
            &["reason"],
        )?;
        registry.register(Box::new(rejections_total.clone()))?;

        let events_appended =
            IntCounter::new("market_events_appended_total", "Events appended to the log")?;
        registry.register(Box::new(events_appended.clone()))?;

        let purchase_duration = Histogram::with_opts(
            HistogramOpts::new(
                "market_purchase_duration_seconds",
                "Histogram of purchase latencies",
            )
            .buckets(vec![0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.0]),
        )?;
        registry.register(Box::new(purchase_duration.clone()))?;

        Ok(Self {
            listings_total,
            sales_total,
            rejections_total,
            events_appended,
            purchase_duration,
            registry,
        })
    }

    /// Record an accepted listing
    pub fn record_listing(&self) {
        self.listings_total.inc();
        self.events_appended.inc();
    }

    /// Record an accepted sale
    pub fn record_sale(&self, duration_seconds: f64) {
        self.sales_total.inc();
        self.events_appended.inc();
        self.purchase_duration.observe(duration_seconds);
    }

    /// Record a rejected transition
    pub fn record_rejection(&self, reason: &str) {
        self.rejections_total.with_label_values(&[reason]).inc();
    }

    /// Record events appended outside a transition (recovery)
    pub fn record_recovered_events(&self, count: u64) {
        self.events_appended.inc_by(count);
    }

    /// Get metrics registry
    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}
