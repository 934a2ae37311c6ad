use anyhow::Result;
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};
use std::sync::Arc;

/// Process-wide counters and histograms, exposed as Prometheus text at
/// `GET /metrics`.
#[derive(Clone)]
pub struct Metrics {
    registry: Arc<Registry>,
    pub requests_total: IntCounterVec,
    pub tool_calls_total: IntCounterVec,
    pub tool_errors_total: IntCounterVec,
    pub rate_limited_total: IntCounter,
    pub cache_hits_total: IntCounter,
    pub cache_misses_total: IntCounter,
    pub search_latency_seconds: HistogramVec,
    pub active_sessions: IntGauge,
    pub indexed_documents: IntGauge,
}

impl Metrics {
    pub fn new() -> Result<Self> {
        let registry = Arc::new(Registry::new());

        let requests_total = IntCounterVec::new(
            Opts::new("conexus_requests_total", "JSON-RPC requests by method"),
            &["method"],
        )?;
        let tool_calls_total = IntCounterVec::new(
            Opts::new("conexus_tool_calls_total", "tools/call invocations by tool"),
            &["tool"],
        )?;
        let tool_errors_total = IntCounterVec::new(
            Opts::new("conexus_tool_errors_total", "Failed tool invocations by tool"),
            &["tool"],
        )?;
        let rate_limited_total = IntCounter::with_opts(Opts::new(
            "conexus_rate_limited_total",
            "Requests denied by the rate limiter",
        ))?;
        let cache_hits_total = IntCounter::with_opts(Opts::new(
            "conexus_federation_cache_hits_total",
            "Federation cache hits",
        ))?;
        let cache_misses_total = IntCounter::with_opts(Opts::new(
            "conexus_federation_cache_misses_total",
            "Federation cache misses",
        ))?;
        let search_latency_seconds = HistogramVec::new(
            HistogramOpts::new("conexus_search_latency_seconds", "Search pipeline latency")
                .buckets(vec![0.005, 0.02, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]),
            &["mode"],
        )?;
        let active_sessions = IntGauge::with_opts(Opts::new(
            "conexus_active_sessions",
            "Live conversation sessions",
        ))?;
        let indexed_documents = IntGauge::with_opts(Opts::new(
            "conexus_indexed_documents",
            "Documents in the vector backend",
        ))?;

        registry.register(Box::new(requests_total.clone()))?;
        registry.register(Box::new(tool_calls_total.clone()))?;
        registry.register(Box::new(tool_errors_total.clone()))?;
        registry.register(Box::new(rate_limited_total.clone()))?;
        registry.register(Box::new(cache_hits_total.clone()))?;
        registry.register(Box::new(cache_misses_total.clone()))?;
        registry.register(Box::new(search_latency_seconds.clone()))?;
        registry.register(Box::new(active_sessions.clone()))?;
        registry.register(Box::new(indexed_documents.clone()))?;

        Ok(Self {
            registry,
            requests_total,
            tool_calls_total,
            tool_errors_total,
            rate_limited_total,
            cache_hits_total,
            cache_misses_total,
            search_latency_seconds,
            active_sessions,
            indexed_documents,
        })
    }

    /// Prometheus text exposition of every registered metric.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        if let Err(err) = encoder.encode(&self.registry.gather(), &mut buffer) {
            log::error!("metrics encoding failed: {err}");
        }
        buffer
    }
}
