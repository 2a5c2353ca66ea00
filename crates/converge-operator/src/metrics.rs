// Controller metrics and diagnostics, exposed by the operator web server.

use chrono::{DateTime, Utc};
use converge_core::CoreError;
use kube::runtime::events::{Recorder, Reporter};
use kube::{Client, Resource};
use prometheus::{HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry};
use serde::Serialize;

/// Reconcile instrumentation by kind.
#[derive(Clone)]
pub struct Metrics {
    pub reconciliations: IntCounterVec,
    pub failures: IntCounterVec,
    pub reconcile_duration: HistogramVec,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            reconciliations: IntCounterVec::new(
                Opts::new("operator_reconciliations_total", "Reconciliations by kind"),
                &["kind"],
            )
            .unwrap(),
            failures: IntCounterVec::new(
                Opts::new(
                    "operator_reconcile_failures_total",
                    "Failed reconciliations by kind and error kind",
                ),
                &["kind", "error"],
            )
            .unwrap(),
            reconcile_duration: HistogramVec::new(
                HistogramOpts::new(
                    "operator_reconcile_duration_seconds",
                    "Reconcile latency by kind",
                )
                .buckets(vec![0.01, 0.05, 0.25, 1.0, 5.0, 15.0, 60.0]),
                &["kind"],
            )
            .unwrap(),
        }
    }

    pub fn register(self, registry: &Registry) -> Result<Self, prometheus::Error> {
        registry.register(Box::new(self.reconciliations.clone()))?;
        registry.register(Box::new(self.failures.clone()))?;
        registry.register(Box::new(self.reconcile_duration.clone()))?;
        Ok(self)
    }

    /// Count one reconcile and time it until the returned guard drops.
    pub fn count_and_measure(&self, kind: &str) -> prometheus::HistogramTimer {
        self.reconciliations.with_label_values(&[kind]).inc();
        self.reconcile_duration
            .with_label_values(&[kind])
            .start_timer()
    }

    pub fn reconcile_failure(&self, kind: &str, error: &CoreError) {
        self.failures
            .with_label_values(&[kind, &format!("{:?}", error.kind())])
            .inc();
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Diagnostics surfaced on the operator's web server.
#[derive(Clone, Serialize)]
pub struct Diagnostics {
    pub last_event: DateTime<Utc>,
    #[serde(skip)]
    pub reporter: Reporter,
}

impl Default for Diagnostics {
    fn default() -> Self {
        Self {
            last_event: Utc::now(),
            reporter: "converge-operator".into(),
        }
    }
}

impl Diagnostics {
    /// Event recorder scoped to one object.
    pub fn recorder<K>(&self, client: Client, object: &K) -> Recorder
    where
        K: Resource<DynamicType = ()>,
    {
        Recorder::new(client, self.reporter.clone(), object.object_ref(&()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_and_count() {
        let registry = Registry::new();
        let metrics = Metrics::new().register(&registry).unwrap();
        {
            let _timer = metrics.count_and_measure("AgentRuntime");
        }
        metrics.reconcile_failure("AgentRuntime", &CoreError::validation("bad ref"));

        assert_eq!(
            metrics
                .reconciliations
                .with_label_values(&["AgentRuntime"])
                .get(),
            1
        );
        assert_eq!(
            metrics
                .failures
                .with_label_values(&["AgentRuntime", "Validation"])
                .get(),
            1
        );
    }
}
