use crate::api::v1::mongodbcluster::MongoDBCluster;
use crate::automation_config::TlsMode;
use crate::util::errors::Error;
use kube::ResourceExt;
use prometheus::{histogram_opts, opts, HistogramVec, IntCounter, IntCounterVec, IntGaugeVec, Registry};
use tokio::time::Instant;
use tracing::debug;

#[derive(Clone)]
pub struct Metrics {
    pub reconciliations: IntCounter,
    pub failures: IntCounterVec,
    pub reconcile_duration: HistogramVec,
    pub tls_mode: IntGaugeVec,
}

impl Default for Metrics {
    fn default() -> Self {
        let reconcile_duration = HistogramVec::new(
            histogram_opts!(
                "controller_reconcile_duration_seconds",
                "The duration of reconcile to complete in seconds",
            )
            .buckets(vec![0.01, 0.1, 0.25, 0.5, 1., 5., 15., 60.]),
            &["instance"],
        )
        .expect("valid histogram definition");
        let failures = IntCounterVec::new(
            opts!("controller_reconciliation_errors_total", "reconciliation errors",),
            &["instance", "error"],
        )
        .expect("valid counter definition");
        let reconciliations =
            IntCounter::new("reconciliations_total", "reconciliations").expect("valid counter definition");
        let tls_mode = IntGaugeVec::new(
            opts!(
                "mongodb_cluster_tls_mode",
                "TLS mode pushed to the members (0 disabled, 1 preferred, 2 required)",
            ),
            &["namespace", "cluster"],
        )
        .expect("valid gauge definition");
        Metrics {
            reconciliations,
            failures,
            reconcile_duration,
            tls_mode,
        }
    }
}

impl Metrics {
    /// Register API metrics to start tracking them.
    pub fn register(self, registry: &Registry) -> Result<Self, prometheus::Error> {
        registry.register(Box::new(self.reconcile_duration.clone()))?;
        registry.register(Box::new(self.failures.clone()))?;
        registry.register(Box::new(self.reconciliations.clone()))?;
        registry.register(Box::new(self.tls_mode.clone()))?;
        Ok(self)
    }

    pub fn reconcile_failure(&self, cluster: &MongoDBCluster, e: &Error) {
        debug!("reconcile_failure: {:?}", &[cluster.name_any(), e.metric_label()]);
        self.failures
            .with_label_values(&[cluster.name_any().as_ref(), e.metric_label().as_ref()])
            .inc()
    }

    pub fn set_tls_mode(&self, cluster: &MongoDBCluster, mode: TlsMode) {
        let value = match mode {
            TlsMode::Disabled => 0,
            TlsMode::Preferred => 1,
            TlsMode::Required => 2,
        };
        self.tls_mode
            .with_label_values(&[
                cluster.namespace().unwrap_or_default().as_ref(),
                cluster.name_any().as_ref(),
            ])
            .set(value);
    }

    /// Drops the per-cluster series of a deleted cluster.
    pub fn forget_cluster(&self, cluster: &MongoDBCluster) {
        let namespace = cluster.namespace().unwrap_or_default();
        // absent when the cluster never got past TLS validation
        let _ = self
            .tls_mode
            .remove_label_values(&[namespace.as_str(), cluster.name_any().as_str()]);
    }

    pub fn count_and_measure(&self, controller: &str) -> ReconcileMeasurer {
        self.reconciliations.inc();
        ReconcileMeasurer {
            start: Instant::now(),
            metric: self.reconcile_duration.clone(),
            instance: controller.to_string(),
        }
    }
}

/// Smart function duration measurer
///
/// Relies on Drop to calculate duration and register the observation in the histogram
pub struct ReconcileMeasurer {
    start: Instant,
    metric: HistogramVec,
    instance: String,
}

impl Drop for ReconcileMeasurer {
    fn drop(&mut self) {
        #[allow(clippy::cast_precision_loss)]
        let duration = self.start.elapsed().as_millis() as f64 / 1000.0;
        self.metric
            .with_label_values(&[self.instance.as_str()])
            .observe(duration);
    }
}
