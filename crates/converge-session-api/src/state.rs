// Shared state for the HTTP layer.

use std::sync::Arc;

use converge_storage::StorageRegistry;
use prometheus::{HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry};

use crate::service::SessionService;

/// Request-level metrics exposed on /metrics.
#[derive(Clone)]
pub struct HttpMetrics {
    pub requests: IntCounterVec,
    pub duration: HistogramVec,
}

impl HttpMetrics {
    pub fn register(registry: &Registry) -> Result<Self, prometheus::Error> {
        let requests = IntCounterVec::new(
            Opts::new("http_requests_total", "HTTP requests by route and status"),
            &["method", "route", "status"],
        )?;
        let duration = HistogramVec::new(
            HistogramOpts::new("http_request_duration_seconds", "Request latency by route")
                .buckets(vec![0.001, 0.005, 0.025, 0.1, 0.5, 1.0, 5.0]),
            &["method", "route"],
        )?;
        registry.register(Box::new(requests.clone()))?;
        registry.register(Box::new(duration.clone()))?;
        Ok(Self { requests, duration })
    }
}

/// App state shared across routes.
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<SessionService>,
    pub registry: Arc<StorageRegistry>,
    pub metrics: Registry,
    pub http_metrics: HttpMetrics,
}

impl AppState {
    pub fn new(
        service: Arc<SessionService>,
        registry: Arc<StorageRegistry>,
    ) -> Result<Self, prometheus::Error> {
        let metrics = Registry::new();
        let http_metrics = HttpMetrics::register(&metrics)?;
        Ok(Self {
            service,
            registry,
            metrics,
            http_metrics,
        })
    }
}
