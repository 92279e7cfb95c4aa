//! Process Metrics
//!
//! Prometheus instruments for engine RPC traffic and device collection.
//! Instruments live in the default registry so any exposition path
//! (`gather_text`, an external scraper) sees them.

use prometheus::{Encoder, HistogramOpts, HistogramVec, IntCounterVec, Opts, TextEncoder};
use std::sync::OnceLock;
use tracing::debug;

/// Instruments recorded by the manager
pub struct Metrics {
    /// RPC calls by method and outcome
    pub rpc_calls: IntCounterVec,
    /// RPC latency by method
    pub rpc_duration: HistogramVec,
    /// Collector failures by collector name
    pub collector_failures: IntCounterVec,
    /// Devices produced per inventory run, by type
    pub inventory_devices: IntCounterVec,
}

impl Metrics {
    fn new() -> prometheus::Result<Self> {
        let rpc_calls = IntCounterVec::new(
            Opts::new("spdk_manager_rpc_calls_total", "Engine RPC calls"),
            &["method", "outcome"],
        )?;
        let rpc_duration = HistogramVec::new(
            HistogramOpts::new(
                "spdk_manager_rpc_duration_seconds",
                "Duration of engine RPC calls",
            ),
            &["method"],
        )?;
        let collector_failures = IntCounterVec::new(
            Opts::new(
                "spdk_manager_collector_failures_total",
                "Device source collector failures",
            ),
            &["collector"],
        )?;
        let inventory_devices = IntCounterVec::new(
            Opts::new(
                "spdk_manager_inventory_devices_total",
                "Devices produced by inventory runs",
            ),
            &["type"],
        )?;

        let registry = prometheus::default_registry();
        for collector in [
            Box::new(rpc_calls.clone()) as Box<dyn prometheus::core::Collector>,
            Box::new(rpc_duration.clone()),
            Box::new(collector_failures.clone()),
            Box::new(inventory_devices.clone()),
        ] {
            if let Err(e) = registry.register(collector) {
                debug!("Metric registration skipped: {}", e);
            }
        }

        Ok(Self {
            rpc_calls,
            rpc_duration,
            collector_failures,
            inventory_devices,
        })
    }
}

static METRICS: OnceLock<Option<Metrics>> = OnceLock::new();

/// Process-wide instruments; `None` only if construction failed
pub fn metrics() -> Option<&'static Metrics> {
    METRICS
        .get_or_init(|| match Metrics::new() {
            Ok(m) => Some(m),
            Err(e) => {
                debug!("Metrics disabled: {}", e);
                None
            }
        })
        .as_ref()
}

/// Record one finished RPC call
pub fn record_rpc(method: &str, outcome: &str, seconds: f64) {
    if let Some(m) = metrics() {
        m.rpc_calls.with_label_values(&[method, outcome]).inc();
        m.rpc_duration.with_label_values(&[method]).observe(seconds);
    }
}

/// Record a collector that degraded to an empty contribution
pub fn record_collector_failure(collector: &str) {
    if let Some(m) = metrics() {
        m.collector_failures.with_label_values(&[collector]).inc();
    }
}

/// Record the device count of one inventory run
pub fn record_inventory(device_type: &str, count: usize) {
    if let Some(m) = metrics() {
        m.inventory_devices
            .with_label_values(&[device_type])
            .inc_by(count as u64);
    }
}

/// Text exposition of the default registry
pub fn gather_text() -> String {
    let encoder = TextEncoder::new();
    let families = prometheus::gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&families, &mut buffer) {
        debug!("Metric encoding failed: {}", e);
    }
    String::from_utf8_lossy(&buffer).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rpc_calls_exposed() {
        record_rpc("spdk_get_version", "ok", 0.002);
        record_collector_failure("vendor_nvme");

        let text = gather_text();
        assert!(text.contains("spdk_manager_rpc_calls_total"));
        assert!(text.contains("spdk_manager_collector_failures_total"));
    }
}
