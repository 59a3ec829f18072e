//! Prometheus metrics (SPEC_FULL §6): request counts, provider call
//! latency/outcome, breaker transitions, webhook delivery outcomes.
//! Emission only — shipping to a backend is out of scope (spec.md §1).

use lazy_static::lazy_static;
use prometheus::{Histogram, HistogramOpts, IntCounterVec, Opts, Registry};

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();

    pub static ref REQUESTS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("conductor_requests_total", "Total number of API requests"),
        &["method", "path", "status"]
    ).unwrap();

    pub static ref PROVIDER_CALLS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("conductor_provider_calls_total", "Total number of outbound provider calls"),
        &["provider", "operation", "outcome"]
    ).unwrap();

    pub static ref PROVIDER_CALL_LATENCY: Histogram = Histogram::with_opts(
        HistogramOpts::new("conductor_provider_call_latency_seconds", "Provider call latency")
            .buckets(vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0])
    ).unwrap();

    pub static ref BREAKER_TRANSITIONS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("conductor_breaker_transitions_total", "Circuit breaker state transitions"),
        &["provider", "to_state"]
    ).unwrap();

    pub static ref WEBHOOK_DELIVERIES_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("conductor_webhook_deliveries_total", "Outbound webhook delivery outcomes"),
        &["outcome"]
    ).unwrap();
}

pub fn register_metrics() {
    REGISTRY.register(Box::new(REQUESTS_TOTAL.clone())).unwrap();
    REGISTRY.register(Box::new(PROVIDER_CALLS_TOTAL.clone())).unwrap();
    REGISTRY.register(Box::new(PROVIDER_CALL_LATENCY.clone())).unwrap();
    REGISTRY.register(Box::new(BREAKER_TRANSITIONS_TOTAL.clone())).unwrap();
    REGISTRY.register(Box::new(WEBHOOK_DELIVERIES_TOTAL.clone())).unwrap();
}
