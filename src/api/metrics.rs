//! Prometheus metrics exposition.
//!
//! Gauges/counters/histogram for the pull-based `/metrics` scrape endpoint, built on the
//! `prometheus` crate's `Registry`.

use prometheus::{
    CounterVec, Encoder, GaugeVec, HistogramVec, Registry, TextEncoder,
    register_counter_vec_with_registry, register_gauge_vec_with_registry,
    register_histogram_vec_with_registry,
};

pub struct Metrics {
    registry: Registry,
    requests_total: CounterVec,
    request_latency_seconds: HistogramVec,
    holder_count: GaugeVec,
    transfer_count: GaugeVec,
    last_indexed_block: GaugeVec,
    blocks_behind: GaugeVec,
    sync_in_progress: GaugeVec,
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();
        let requests_total = register_counter_vec_with_registry!(
            "indexer_requests_total",
            "Total HTTP requests served",
            &["method", "endpoint", "status"],
            registry
        )
        .expect("static metric descriptor is always valid");
        let request_latency_seconds = register_histogram_vec_with_registry!(
            "indexer_request_latency_seconds",
            "HTTP request latency in seconds",
            &["endpoint"],
            registry
        )
        .expect("static metric descriptor is always valid");
        let holder_count = register_gauge_vec_with_registry!(
            "indexer_holder_count",
            "Number of holders with a positive balance",
            &["chain_id"],
            registry
        )
        .expect("static metric descriptor is always valid");
        let transfer_count = register_gauge_vec_with_registry!(
            "indexer_transfer_count",
            "Number of transfers indexed",
            &["chain_id"],
            registry
        )
        .expect("static metric descriptor is always valid");
        let last_indexed_block = register_gauge_vec_with_registry!(
            "indexer_last_indexed_block",
            "Last indexed block number",
            &["chain_id"],
            registry
        )
        .expect("static metric descriptor is always valid");
        let blocks_behind = register_gauge_vec_with_registry!(
            "indexer_blocks_behind",
            "Blocks behind chain head",
            &["chain_id"],
            registry
        )
        .expect("static metric descriptor is always valid");
        let sync_in_progress = register_gauge_vec_with_registry!(
            "indexer_sync_in_progress",
            "1 if the chain is currently syncing, else 0",
            &["chain_id"],
            registry
        )
        .expect("static metric descriptor is always valid");

        Self {
            registry,
            requests_total,
            request_latency_seconds,
            holder_count,
            transfer_count,
            last_indexed_block,
            blocks_behind,
            sync_in_progress,
        }
    }

    pub fn observe_request(&self, method: &str, endpoint: &str, status: &str, latency_seconds: f64) {
        self.requests_total
            .with_label_values(&[method, endpoint, status])
            .inc();
        self.request_latency_seconds
            .with_label_values(&[endpoint])
            .observe(latency_seconds);
    }

    pub fn set_chain_gauges(
        &self,
        chain_id: i64,
        holders: i64,
        transfers: i64,
        last_indexed: i64,
        behind: i64,
        syncing: bool,
    ) {
        let label = chain_id.to_string();
        self.holder_count.with_label_values(&[&label]).set(holders as f64);
        self.transfer_count.with_label_values(&[&label]).set(transfers as f64);
        self.last_indexed_block
            .with_label_values(&[&label])
            .set(last_indexed as f64);
        self.blocks_behind.with_label_values(&[&label]).set(behind as f64);
        self.sync_in_progress
            .with_label_values(&[&label])
            .set(if syncing { 1.0 } else { 0.0 });
    }

    /// Prometheus text exposition format for `GET /metrics`.
    pub fn encode(&self) -> String {
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&metric_families, &mut buffer)
            .expect("encoding gathered metric families never fails");
        String::from_utf8(buffer).expect("prometheus text encoding is always valid UTF-8")
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_produces_prometheus_text_format() {
        let metrics = Metrics::new();
        metrics.set_chain_gauges(1, 5, 10, 100, 0, false);
        let text = metrics.encode();
        assert!(text.contains("indexer_holder_count"));
        assert!(text.contains("chain_id=\"1\""));
    }

    #[test]
    fn observe_request_increments_counter() {
        let metrics = Metrics::new();
        metrics.observe_request("GET", "/holders", "200", 0.01);
        let text = metrics.encode();
        assert!(text.contains("indexer_requests_total"));
    }
}
