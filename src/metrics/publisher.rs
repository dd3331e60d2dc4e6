//! Batched publication to the metrics backend.

use tracing::{debug, error, info};

use super::MetricSample;

/// Per-call ingestion limit of the backend.
pub const MAX_BATCH_SIZE: usize = 20;

/// Failure of a single backend call.
#[derive(Debug, Clone, PartialEq)]
pub struct PublishError(pub String);

impl std::fmt::Display for PublishError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "metrics backend: {}", self.0)
    }
}

impl std::error::Error for PublishError {}

/// Metrics ingestion endpoint.
pub trait MetricsBackend {
    /// Sends one batch of at most [`MAX_BATCH_SIZE`] samples.
    fn put_metric_data(
        &mut self,
        region: &str,
        namespace: &str,
        batch: &[MetricSample],
    ) -> Result<(), PublishError>;
}

/// Outcome of [`publish`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PublishReport {
    pub samples: usize,
    pub batches: usize,
    pub failed_batches: usize,
}

impl PublishReport {
    pub fn all_succeeded(&self) -> bool {
        self.failed_batches == 0
    }
}

/// Contiguous, order-preserving batches of at most [`MAX_BATCH_SIZE`] samples.
pub fn batches(samples: &[MetricSample]) -> std::slice::Chunks<'_, MetricSample> {
    samples.chunks(MAX_BATCH_SIZE)
}

/// Sends `samples` in batches. A failed batch is logged and skipped; the
/// remaining batches are still sent.
pub fn publish(
    backend: &mut dyn MetricsBackend,
    region: &str,
    namespace: &str,
    samples: &[MetricSample],
    debug_payload: bool,
) -> PublishReport {
    let mut report = PublishReport {
        samples: samples.len(),
        ..PublishReport::default()
    };

    info!(count = samples.len(), namespace, "publishing metrics");

    for (idx, batch) in batches(samples).enumerate() {
        let group = idx + 1;
        report.batches += 1;
        debug!(group, datapoints = batch.len(), "metrics group");
        if debug_payload {
            debug!(group, payload = ?batch, "metrics group payload");
        }

        if let Err(e) = backend.put_metric_data(region, namespace, batch) {
            report.failed_batches += 1;
            error!(group, datapoints = batch.len(), error = %e, "publishing metrics group failed");
        }
    }

    report
}
